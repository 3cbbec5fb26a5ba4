use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Failure of a single recognition pass.
///
/// Recorded in the page diagnostics; never aborts sibling passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecognitionError {
    /// The engine ran and reported an error.
    EngineFailed(String),
    /// The engine could not be started at all.
    Unavailable(String),
    /// The pass exceeded its time allowance.
    Timeout(Duration),
    /// The worker running the engine panicked.
    Crashed(String),
    /// The engine produced output that could not be parsed.
    UnreadableResult(String),
    /// The page was cancelled before the pass produced a result.
    Cancelled,
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineFailed(msg) => write!(f, "recognition engine failed: {}", msg),
            Self::Unavailable(msg) => write!(f, "recognition engine unavailable: {}", msg),
            Self::Timeout(after) => write!(f, "recognition timed out after {:.1}s", after.as_secs_f64()),
            Self::Crashed(msg) => write!(f, "recognition worker crashed: {}", msg),
            Self::UnreadableResult(msg) => write!(f, "unreadable recognition result: {}", msg),
            Self::Cancelled => write!(f, "recognition cancelled"),
        }
    }
}

impl std::error::Error for RecognitionError {}
