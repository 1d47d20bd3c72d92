//! Error types for the ctrfs library.
//!
//! All fallible operations return [`Result<T>`], an alias for
//! `Result<T, Error>`.
//!
//! # Error Categories
//!
//! - **Live access**: [`CommandFailed`], [`ParseFailed`], [`AllStrategiesExhausted`]
//! - **Snapshot queries**: [`NotFound`], [`NotARegularFile`], [`InvalidPath`],
//!   [`SnapshotTooLarge`]
//! - **Helper provisioning**: [`UnsupportedArchitecture`], [`MissingPayload`],
//!   [`ArchitectureDetection`]
//! - **System errors**: [`Io`], [`Config`], [`Json`]
//!
//! Only the coordinator recovers from an error locally: a failed native attempt
//! routes to the helper strategy. Everything else propagates unchanged.
//!
//! [`CommandFailed`]: Error::CommandFailed
//! [`ParseFailed`]: Error::ParseFailed
//! [`AllStrategiesExhausted`]: Error::AllStrategiesExhausted
//! [`NotFound`]: Error::NotFound
//! [`NotARegularFile`]: Error::NotARegularFile
//! [`InvalidPath`]: Error::InvalidPath
//! [`SnapshotTooLarge`]: Error::SnapshotTooLarge
//! [`UnsupportedArchitecture`]: Error::UnsupportedArchitecture
//! [`MissingPayload`]: Error::MissingPayload
//! [`ArchitectureDetection`]: Error::ArchitectureDetection
//! [`Io`]: Error::Io
//! [`Config`]: Error::Config
//! [`Json`]: Error::Json

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for container filesystem access.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external command exited non-zero or produced no usable output.
    #[error("command `{command}` failed: {message}")]
    CommandFailed {
        /// The rendered command line.
        command: String,
        /// Captured output or launch error.
        message: String,
    },

    /// Command output did not have the expected listing shape.
    #[error("unexpected listing output: {0}")]
    ParseFailed(String),

    /// No snapshot entry exists at the requested path.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// Content was requested for a directory, symlink or special file.
    #[error("not a regular file: {0}")]
    NotARegularFile(String),

    /// An archive member name contains `.` or `..` components.
    #[error("invalid path in archive: {0:?}")]
    InvalidPath(String),

    /// Buffered archive content grew beyond the configured cap.
    #[error("snapshot exceeds the {limit} byte content limit")]
    SnapshotTooLarge {
        /// Configured limit in bytes.
        limit: u64,
    },

    /// No helper payload slot exists for the architecture.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// The payload slot exists but nothing was embedded at build time.
    #[error("helper payload for {0} was not embedded at build time (set CTRFS_HELPER_DIR)")]
    MissingPayload(String),

    /// Architecture detection failed and strict detection is configured.
    #[error("cannot detect architecture of {target}: {reason}")]
    ArchitectureDetection {
        /// Target description.
        target: String,
        /// Why detection failed.
        reason: String,
    },

    /// Both the native and helper strategies failed.
    #[error("all strategies failed; native: {native}; helper: {helper}")]
    AllStrategiesExhausted {
        /// Diagnostic from the native attempt.
        native: String,
        /// Diagnostic from the helper attempt.
        helper: String,
    },

    /// I/O error on a temp file or archive stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON parsing error (runtime `inspect` output).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}
