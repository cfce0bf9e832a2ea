use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Default executable names the supervisor looks for and treats as
/// "the backend".
pub const BACKEND_EXECUTABLES: &[&str] = &["koboldcpp_nocuda.exe", "koboldcpp.exe"];

/// Settings for the whole bridge. Defaults match a stock local koboldcpp
/// install; a toml file or command-line flags override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the koboldcpp REST API.
    pub endpoint: String,
    /// Flat-file conversation log, relative paths resolved against the
    /// working directory.
    pub history_file: PathBuf,
    /// How often the streaming poller hits `/api/extra/generate/check`.
    pub poll_interval_ms: u64,
    /// Character budget per chunk when summarising long page text.
    pub chunk_size: usize,
    /// Overlap carried between consecutive chunks.
    pub chunk_overlap: usize,
    /// Token budget per generation.
    pub max_length: u32,
    /// Used when `/api/extra/true_max_context_length` is unreachable.
    pub fallback_max_context_length: u32,
    /// Arguments passed to the backend executable when the supervisor
    /// launches it.
    pub launch_args: Vec<String>,
    /// Executable names the supervisor scans for and launches, in order of
    /// preference.
    pub backend_executables: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            endpoint: "http://127.0.0.1:5001".to_string(),
            history_file: PathBuf::from("conv_history.txt"),
            poll_interval_ms: 150,
            chunk_size: 3000,
            chunk_overlap: 50,
            max_length: 120,
            fallback_max_context_length: 2048,
            launch_args: vec!["no-webui.kcpps".to_string(), "--showgui".to_string()],
            backend_executables: BACKEND_EXECUTABLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl BridgeConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config = toml::from_str(&raw).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid config {}: {}", path.display(), e),
            )
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// `<config dir>/kobold-bridge/config.toml`, when the platform has a
    /// config directory at all.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kobold-bridge").join("config.toml"))
    }

    /// Default config, replaced by the file at `default_path` if one exists.
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => {
                Self::load_from_file(&path).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "falling back to built-in defaults");
                    Self::default()
                })
            }
            _ => Self::default(),
        }
    }
}
