//! Crate-wide error taxonomy
//!
//! Every fallible operation in the library returns [`Result`]. Error kinds
//! propagate upward unchanged; the binaries map them to exit codes at the
//! outermost layer. Numerical degeneracy (a constant model column, a
//! rank-deficient covariance) is **not** an error: it is signalled by NaN in
//! floating outputs together with a one-shot `tracing::warn!`, and every
//! downstream ranking treats NaN as the worst possible score.

#![forbid(unsafe_code)]

/// The error kinds surfaced by the library.
///
/// The set is closed on purpose: callers dispatch on kinds (exit codes,
/// shell messages), so adding context means adding it to the message of an
/// existing kind, not inventing a new one.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid file header")]
    InvalidHeader,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("invalid data type: {0}")]
    InvalidDataType(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("i/o failure: {0}")]
    IoFailure(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this kind, used by the shell front-end.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidHeader => 1,
            Error::FileNotFound(_) => 2,
            Error::InvalidDataType(_) => 3,
            Error::InvalidCommand(_) => 4,
            Error::InvalidArgument(_) => 5,
            Error::UnsupportedOperation(_) => 6,
            Error::InvalidData(_) => 7,
            Error::UnknownPlugin(_) => 8,
            Error::MissingArgument(_) => 9,
            Error::IoFailure(_) => 10,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
