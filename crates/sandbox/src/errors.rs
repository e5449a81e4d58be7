//! Stable error strings reported in operation results.
//!
//! Callers branch on these values, so they never change wording. Anything
//! situational (line numbers, expected text, OS messages) goes in `detail`.

pub const FILE_NOT_FOUND: &str = "File not found";
pub const PATH_NOT_FOUND: &str = "Path not found";
pub const NOT_A_FILE: &str = "Not a file";
pub const NOT_A_DIRECTORY: &str = "Not a directory";
pub const DESTINATION_EXISTS: &str = "Destination exists";
pub const CANNOT_REMOVE_ROOT: &str = "Cannot remove workspace root";
pub const PATH_ESCAPES_SANDBOX: &str = "Path escapes sandbox";
pub const BINARY_FILE: &str = "Binary file not supported";

pub const INVALID_LINE_RANGE: &str = "Invalid line range";
pub const INVALID_DIFF: &str = "Invalid diff";
pub const CONTEXT_MISMATCH: &str = "Context mismatch";
pub const REMOVAL_MISMATCH: &str = "Removal mismatch";
pub const HUNK_OUT_OF_RANGE: &str = "Hunk out of range";
pub const HUNK_OUT_OF_ORDER: &str = "Hunk out of order";
pub const DELETION_NOT_SUPPORTED: &str = "File deletion not supported";
pub const CREATION_NOT_SUPPORTED: &str = "File creation not supported";

pub const INVALID_REGEX: &str = "Invalid regex";
pub const INVALID_GLOB: &str = "Invalid glob";

pub const NO_ACTIVE_WORKSPACE: &str = "No active workspace";
pub const INVALID_PLAN: &str = "Invalid plan";

pub const INTERNAL_ERROR: &str = "Internal error";

/// An expected failure inside an operation, before it is folded into the
/// operation's result object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpFailure {
    pub error: &'static str,
    pub detail: Option<String>,
}

impl OpFailure {
    pub fn new(error: &'static str) -> Self {
        Self {
            error,
            detail: None,
        }
    }

    pub fn with_detail(error: &'static str, detail: impl Into<String>) -> Self {
        Self {
            error,
            detail: Some(detail.into()),
        }
    }

    /// Log an unexpected I/O failure and fold it into the generic error.
    pub fn io(operation: &str, path: &str, err: std::io::Error) -> Self {
        tracing::error!(
            operation = operation,
            path = %path,
            error = %err,
            kind = ?err.kind(),
            "Filesystem operation failed"
        );
        Self::with_detail(INTERNAL_ERROR, err.to_string())
    }
}

impl std::fmt::Display for OpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.error, detail),
            None => write!(f, "{}", self.error),
        }
    }
}
