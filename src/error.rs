use std::fmt;

/// The error kinds a TinyDb operation can fail with.
///
/// One variant per §7 "Kinds" of the design: callers match on these rather
/// than on message text.
#[derive(Debug)]
pub enum TinyDbError {
    Io(String),
    Corruption(String),
    InvalidArgument(String),
    DuplicateKey(String),
    NotFound(String),
    TooLarge(String),
    Conflict(String),
    Disposed,
    Timeout(String),
    Auth(String),
}

impl TinyDbError {
    pub fn io(msg: impl Into<String>) -> Self {
        TinyDbError::Io(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        TinyDbError::Corruption(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TinyDbError::InvalidArgument(msg.into())
    }

    pub fn duplicate_key(msg: impl Into<String>) -> Self {
        TinyDbError::DuplicateKey(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TinyDbError::NotFound(msg.into())
    }

    pub fn too_large(msg: impl Into<String>) -> Self {
        TinyDbError::TooLarge(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        TinyDbError::Conflict(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        TinyDbError::Timeout(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        TinyDbError::Auth(msg.into())
    }
}

impl fmt::Display for TinyDbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TinyDbError::Io(msg) => write!(f, "io error: {}", msg),
            TinyDbError::Corruption(msg) => write!(f, "corruption: {}", msg),
            TinyDbError::InvalidArgument(msg) => {
                write!(f, "invalid argument: {}", msg)
            }
            TinyDbError::DuplicateKey(msg) => {
                write!(f, "duplicate key: {}", msg)
            }
            TinyDbError::NotFound(msg) => write!(f, "not found: {}", msg),
            TinyDbError::TooLarge(msg) => write!(f, "too large: {}", msg),
            TinyDbError::Conflict(msg) => write!(f, "conflict: {}", msg),
            TinyDbError::Disposed => {
                write!(f, "operation on a closed engine")
            }
            TinyDbError::Timeout(msg) => write!(f, "timeout: {}", msg),
            TinyDbError::Auth(msg) => write!(f, "auth error: {}", msg),
        }
    }
}

impl std::error::Error for TinyDbError {}

impl From<std::io::Error> for TinyDbError {
    fn from(e: std::io::Error) -> Self {
        TinyDbError::Io(e.to_string())
    }
}

/// Result alias used throughout the crate, mirroring the teacher's
/// `SmallResult` convention.
pub type TinyResult<T> = Result<T, TinyDbError>;
