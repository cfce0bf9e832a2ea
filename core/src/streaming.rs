//! Turns the cumulative text reported by `/api/extra/generate/check` into
//! incremental deltas, and spots runaway generations.

/// Marker that means the model has started writing the next turn of its own
/// prompt template. Anything at or after it is noise.
pub const RUNAWAY_MARKER: &str = "###";

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Fresh text since the previous poll.
    Delta(String),
    /// The runaway marker appeared. Carries the usable text before the
    /// marker; nothing after it should ever reach the extension.
    Runaway(String),
}

/// Tracks what the poller has already seen across polls of one generation.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    previous: String,
    runaway: bool,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the latest cumulative text; returns what, if anything, is new.
    /// After a runaway has been reported, always returns `None`.
    pub fn advance(&mut self, cumulative: &str) -> Option<Progress> {
        if self.runaway {
            return None;
        }

        // The check endpoint resets between generations; a shrinking or
        // diverging string means a new baseline, not a suffix.
        let fresh = match cumulative.get(self.previous.len()..) {
            Some(suffix) if cumulative.starts_with(self.previous.as_str()) => suffix,
            _ => {
                self.previous.clear();
                cumulative
            }
        };

        if fresh.is_empty() {
            return None;
        }

        // The marker can straddle a poll boundary, so the scan must start a
        // few bytes before the already-seen text ends, not at the start of
        // the fresh suffix.
        let seen = self.previous.len();
        let mut scan_from = seen.saturating_sub(RUNAWAY_MARKER.len() - 1);
        while !cumulative.is_char_boundary(scan_from) {
            scan_from -= 1;
        }

        if let Some(offset) = cumulative[scan_from..].find(RUNAWAY_MARKER) {
            let marker_at = scan_from + offset;
            self.runaway = true;
            Some(Progress::Runaway(
                cumulative[seen..marker_at.max(seen)].to_string(),
            ))
        } else {
            self.previous = cumulative.to_string();
            Some(Progress::Delta(fresh.to_string()))
        }
    }

    pub fn is_runaway(&self) -> bool {
        self.runaway
    }
}
