//! Typed outcomes for pipeline stages.
//!
//! Stages return `anyhow::Result` like the rest of the crate, but wrap these
//! variants so callers (the `run-day` driver, the collector rollover hook)
//! can tell "nothing to do" apart from a real failure via `downcast_ref`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("output already exists: {0} (use --overwrite to rebuild)")]
    AlreadyExists(PathBuf),

    #[error("missing required input: {0}")]
    MissingInput(PathBuf),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

impl StageError {
    /// Returns `true` if `err` is a [`StageError::AlreadyExists`].
    pub fn is_already_exists(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::AlreadyExists(_))
        )
    }
}
