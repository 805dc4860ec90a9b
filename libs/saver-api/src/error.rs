use std::fmt;

/// Error kind for saver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad settings, e.g. an unparsable listen address.
    Config,
    Io,
    Format,
    Shutdown,
}

/// Saver error returned by handlers, stoppable components and the write path.
#[derive(Debug)]
pub struct SaverError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SaverError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Shutdown, message: msg.into() }
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for SaverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SaverError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → SaverError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<std::io::Error> for SaverError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for SaverError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}
