use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::prompt::render_turn;

/// Append-only flat-file conversation log with an in-memory mirror.
///
/// The store itself is single-threaded; concurrent turns share it behind a
/// `tokio::sync::Mutex` so file writes never interleave.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    buffer: String,
}

impl ConversationStore {
    /// Open the log at `path`, loading whatever a previous run left behind.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let buffer = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            info!(path = %path.display(), bytes = contents.len(), "loaded conversation history");
            contents
        } else {
            String::new()
        };
        Ok(ConversationStore { path, buffer })
    }

    /// The accumulated history, exactly as persisted.
    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Render one turn through the fixed template and append it to the file
    /// and the in-memory mirror.
    pub fn append_turn(&mut self, instruction: &str, response: &str) -> Result<()> {
        let turn = render_turn(instruction, response);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(turn.as_bytes())?;
        self.buffer.push_str(&turn);
        debug!(bytes = turn.len(), "appended conversation turn");
        Ok(())
    }

    /// Empty the in-memory history and truncate the file. Used on `new_chat`.
    pub fn clear(&mut self) -> Result<()> {
        self.buffer.clear();
        fs::write(&self.path, b"")?;
        info!(path = %self.path.display(), "cleared conversation history");
        Ok(())
    }
}
