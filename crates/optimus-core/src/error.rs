//! Error types shared across the core data model.

/// The result type used throughout `optimus-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while constructing or parsing core model values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier string could not be parsed.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// A dependency tag was not one of the supported kinds.
    #[error("unsupported dependency type: {kind}")]
    UnsupportedDependencyType {
        /// The tag that was rejected.
        kind: String,
    },

    /// A replay status string was not a known status.
    #[error("unknown replay status: {value}")]
    UnknownReplayStatus {
        /// The status string that was rejected.
        value: String,
    },
}
