//! Editor configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bound of the undo and redo stacks.
pub const DEFAULT_UNDO_DEPTH: usize = 100;

/// Configuration shared by a document and its undo manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Maximum entries kept on each of the undo and redo stacks; the oldest
    /// entry is dropped once exceeded. Default: **100**.
    pub undo_depth: usize,

    /// Restore captured before-states when a unit-of-work callback fails.
    /// Default: **true**.
    pub rollback_on_error: bool,

    /// Emit change events on commit. Silent units of work never emit,
    /// regardless of this flag. Default: **true**.
    pub emit_events: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            undo_depth: DEFAULT_UNDO_DEPTH,
            rollback_on_error: true,
            emit_events: true,
        }
    }
}

impl EditorConfig {
    /// Parse a JSON config; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`crate::Error::Codec`] if the JSON is malformed.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
