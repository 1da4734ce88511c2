use std::fmt;

/// The flat error taxonomy shared by every public operation.
///
/// Each variant carries a stable numeric code so a caller across an FFI or
/// daemon boundary can recover the kind of failure without matching on the
/// enum itself (`caskyd` renders this as `ERROR <errno>`).
#[derive(Debug)]
pub enum Error {
    /// Path is empty or otherwise unusable.
    InvalidPath(String),
    /// An engine handle was used where one is required but missing.
    InvalidPointer(String),
    /// Underlying read/write/flush/fsync/rename failure.
    Io(std::io::Error),
    /// Allocation failure (surfaced for lengths rejected by the sanity
    /// ceiling before any allocation is attempted).
    Memory(String),
    /// Recovery halted on a bad record; the engine is still usable.
    Corrupt(String),
    /// Key missing or malformed for the requested operation.
    InvalidKey(String),
    /// The key is not live in the directory.
    KeyNotFound,
}

impl Error {
    /// Stable numeric code, mirroring the C original's `errno`-style
    /// contract. 0 is reserved for `Ok` and is never produced here.
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) => 1,
            Error::InvalidPointer(_) => 2,
            Error::Io(_) => 3,
            Error::Memory(_) => 4,
            Error::Corrupt(_) => 5,
            Error::InvalidKey(_) => 6,
            Error::KeyNotFound => 7,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPath(msg) => write!(f, "invalid path: {}", msg),
            Error::InvalidPointer(msg) => write!(f, "invalid engine handle: {}", msg),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Memory(msg) => write!(f, "allocation failure: {}", msg),
            Error::Corrupt(msg) => write!(f, "corrupt log: {}", msg),
            Error::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            Error::KeyNotFound => write!(f, "key not found"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Returns the human-readable message for a numeric error code, for hosts
/// that only have the code (e.g. across the daemon protocol).
pub fn strerror(code: i32) -> &'static str {
    match code {
        0 => "ok",
        1 => "invalid path",
        2 => "invalid engine handle",
        3 => "io error",
        4 => "allocation failure",
        5 => "corrupt log",
        6 => "invalid key",
        7 => "key not found",
        _ => "unknown error",
    }
}

/// Result type used throughout `casky`.
pub type CResult<T> = Result<T, Error>;
