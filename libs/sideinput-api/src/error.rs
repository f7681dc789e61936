/// Category of a side-input error. Lets the caller decide between
/// retry, skip and fail fast without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User generation logic failed — retried on the next tick.
    Generation,
    /// Publishing to the shared store failed — transient, retried with backoff.
    StorageWrite,
    /// Reading from the shared store failed — retried on the next detection cycle.
    StorageRead,
    /// Corrupt or incompatible payload — never applied.
    Deserialization,
    /// Version marker moved under the writer (compare-and-swap lost).
    Conflict,
    /// Invalid configuration — permanent, fail at startup.
    Config,
    /// Logical error (invalid state, cancelled, generic).
    Logic,
}

impl ErrorKind {
    /// Transient kinds are worth another attempt with the same input.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::StorageWrite | ErrorKind::StorageRead)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Generation => f.write_str("generation"),
            ErrorKind::StorageWrite => f.write_str("storage_write"),
            ErrorKind::StorageRead => f.write_str("storage_read"),
            ErrorKind::Deserialization => f.write_str("deserialization"),
            ErrorKind::Conflict => f.write_str("conflict"),
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for generators, stores and update handlers.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls assign a kind automatically so `?` works inside plugins.
#[derive(Clone)]
pub struct SideInputError {
    kind: ErrorKind,
    message: String,
}

impl SideInputError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Generation, message: msg.into() }
    }

    pub fn storage_write(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::StorageWrite, message: msg.into() }
    }

    pub fn storage_read(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::StorageRead, message: msg.into() }
    }

    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Deserialization, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Conflict, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl std::fmt::Debug for SideInputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for SideInputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SideInputError {}

impl From<String> for SideInputError {
    fn from(s: String) -> Self { Self { kind: ErrorKind::Logic, message: s } }
}

impl From<&str> for SideInputError {
    fn from(s: &str) -> Self { Self { kind: ErrorKind::Logic, message: s.to_string() } }
}

// I/O without further context is attributed to the read path; writers
// wrap their own I/O with `storage_write`.
impl From<std::io::Error> for SideInputError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::StorageRead, message: e.to_string() } }
}

impl From<serde_json::Error> for SideInputError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Deserialization, message: e.to_string() } }
}

impl From<base64::DecodeError> for SideInputError {
    fn from(e: base64::DecodeError) -> Self { Self { kind: ErrorKind::Deserialization, message: e.to_string() } }
}

impl From<std::str::Utf8Error> for SideInputError {
    fn from(e: std::str::Utf8Error) -> Self { Self { kind: ErrorKind::Deserialization, message: e.to_string() } }
}
