use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    /// Stored header checksums disagree with the file on disk.
    Integrity,
    Validation,
    OutOfRange,
    /// Positions held by another session.
    LockConflict(Vec<u32>),
    /// Positions still queued when the retry budget ran out.
    SessionTimeout(Vec<u32>),
    InvalidState,
    Internal,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn integrity(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Integrity, context.into())
    }

    pub fn validation(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Validation, context.into())
    }

    pub fn out_of_range(position: u64, record_count: u32) -> Self {
        Error::new(
            ErrorKind::OutOfRange,
            format!("position {} outside [0, {})", position, record_count),
        )
    }

    pub fn invalid_state(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidState, context.into())
    }

    pub fn lock_conflict(positions: Vec<u32>) -> Self {
        let context = format!(
            "{} position(s) locked by another session: {:?}",
            positions.len(),
            positions
        );
        Error::new(ErrorKind::LockConflict(positions), context)
    }

    pub fn session_timeout(positions: Vec<u32>, waited_millis: u64) -> Self {
        let context = format!(
            "retry budget of {}ms exhausted with {} position(s) outstanding: {:?}",
            waited_millis,
            positions.len(),
            positions
        );
        Error::new(ErrorKind::SessionTimeout(positions), context)
    }

    pub fn is_integrity(&self) -> bool {
        self.kind == ErrorKind::Integrity
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ErrorKind::Validation
    }

    pub fn is_out_of_range(&self) -> bool {
        self.kind == ErrorKind::OutOfRange
    }

    /// Positions named by a lock conflict or a retry timeout.
    pub fn conflicting_positions(&self) -> Option<&[u32]> {
        match &self.kind {
            ErrorKind::LockConflict(positions) | ErrorKind::SessionTimeout(positions) => {
                Some(positions)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::LockConflict(_) => write!(f, "LockConflict"),
            ErrorKind::SessionTimeout(_) => write!(f, "SessionTimeout"),
            other => write!(f, "{:?}", other),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error {
            kind: ErrorKind::Internal,
            context: format!("thread pool error: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
