use thiserror::Error;

/// A chunk could not be turned into a [`Proto`](crate::Proto).
///
/// Produced by source compilers and by the binary chunk reader alike.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{chunk}:{line}: {message}")]
pub struct CompileError {
    /// Name of the chunk being compiled.
    pub chunk: String,
    /// 1-based source line, or 0 when no line applies.
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(chunk: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            chunk: chunk.into(),
            line,
            message: message.into(),
        }
    }
}
