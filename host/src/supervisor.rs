use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use sysinfo::System;
use tracing::{error, info, warn};

/// Scan the OS process table for any of the candidate executable names.
pub fn is_process_running(names: &[String]) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .values()
        .any(|proc| names.iter().any(|name| proc.name().eq_ignore_ascii_case(name)))
}

/// Launches the backend executable when it is not already running.
///
/// The executable names come from the config, searched for next to the host
/// binary, then one directory up; `search_dir` overrides that for packaging
/// layouts and tests.
pub struct Supervisor {
    executables: Vec<String>,
    launch_args: Vec<String>,
    search_dir: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(
        executables: Vec<String>,
        launch_args: Vec<String>,
        search_dir: Option<PathBuf>,
    ) -> Self {
        Supervisor {
            executables,
            launch_args,
            search_dir,
        }
    }

    pub fn is_backend_running(&self) -> bool {
        is_process_running(&self.executables)
    }

    fn base_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.search_dir {
            return Some(dir.clone());
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
    }

    /// Look for a backend executable in the base directory, then its parent.
    pub fn find_executable(&self) -> Option<PathBuf> {
        let base = self.base_dir()?;
        let mut dirs = vec![base.clone()];
        if let Some(parent) = base.parent() {
            dirs.push(parent.to_path_buf());
        }
        for dir in dirs {
            for name in &self.executables {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Launch the backend if it is not already running. Failures are logged;
    /// the next ping retries opportunistically.
    pub fn ensure_running(&self) {
        if self.is_backend_running() {
            info!("backend is already running");
            return;
        }
        match self.find_executable() {
            Some(path) => self.launch(&path),
            None => {
                error!("backend executable not found next to the host or in its parent directory");
            }
        }
    }

    fn launch(&self, path: &Path) {
        info!(path = %path.display(), "launching backend");
        let mut cmd = Command::new(path);
        cmd.args(&self.launch_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = path.parent() {
            cmd.current_dir(dir);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
            cmd.creation_flags(CREATE_NEW_CONSOLE);
        }
        match cmd.spawn() {
            Ok(child) => info!(pid = child.id(), "backend launched"),
            Err(e) => warn!(error = %e, "failed to launch backend"),
        }
    }
}
