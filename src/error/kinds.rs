use std::{fmt, io};

use crate::error::mongo::format_mongodb_error;

/// Crate-wide `Result` type using [`ExportError`] as the error.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type for export runs.
#[derive(Debug)]
pub enum ExportError {
    /// Conflicting or missing options, raised before any I/O.
    Config(ConfigError),

    /// The data source could not be reached.
    Connection(ConnectionError),

    /// A document could not be encoded.
    Encode(EncodeError),

    /// Output sink failure.
    Io(io::Error),

    /// MongoDB driver error while streaming.
    MongoDb(mongodb::error::Error),

    /// An encode worker panicked or was torn down.
    Task(String),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Config file could not be parsed.
    InvalidFormat(String),

    /// A required option is missing.
    MissingField(String),

    /// An option has an invalid value.
    InvalidValue { field: String, value: String },

    /// Two options cannot be combined.
    ConflictingOptions(String),

    /// Option is recognised but not supported.
    Unsupported(String),
}

/// Connectivity errors, all fatal before streaming starts.
#[derive(Debug)]
pub enum ConnectionError {
    /// Invalid connection URI.
    InvalidUri(String),

    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// Ping command failed.
    PingFailed(String),
}

/// Per-document encoding errors.
///
/// Any of these aborts the whole run; a partially encoded row is never written.
#[derive(Debug)]
pub enum EncodeError {
    /// The value type has no tabular representation.
    UnsupportedType {
        bson_type: &'static str,
        path: String,
    },

    /// A datetime could not be represented by the calendar formatter.
    DateOutOfRange { path: String, millis: i64 },

    /// The writer received an event that is invalid in its current state.
    Protocol(String),

    /// JSON serialization failed.
    Json(serde_json::Error),
}

/// Process exit status reported by the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Export completed.
    Success,
    /// Export failed after streaming started.
    Failed,
    /// Invalid options; nothing was read or written.
    ConfigError,
    /// Source collection is empty or missing; nothing was written.
    EmptySource,
    /// Source unreachable.
    ConnectionError,
}

impl ExitStatus {
    /// Numeric process exit code.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failed => 1,
            ExitStatus::ConfigError => 2,
            ExitStatus::EmptySource => 3,
            ExitStatus::ConnectionError => 4,
        }
    }
}

impl ExportError {
    /// Exit status a caller should report for this error.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            ExportError::Config(_) => ExitStatus::ConfigError,
            ExportError::Connection(_) => ExitStatus::ConnectionError,
            ExportError::Encode(_)
            | ExportError::Io(_)
            | ExportError::MongoDb(_)
            | ExportError::Task(_)
            | ExportError::Generic(_) => ExitStatus::Failed,
        }
    }

    /// Whether this error is an unsupported-type encode failure.
    pub fn is_unsupported_type(&self) -> bool {
        matches!(
            self,
            ExportError::Encode(EncodeError::UnsupportedType { .. })
        )
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportError::Connection(e) => write!(f, "Connection error: {e}"),
            ExportError::Encode(e) => write!(f, "Encode error: {e}"),
            ExportError::Io(e) => write!(f, "I/O error: {e}"),
            ExportError::MongoDb(e) => format_mongodb_error(f, e),
            ExportError::Task(msg) => write!(f, "Worker failed: {msg}"),
            ExportError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(msg) => write!(f, "{msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for '{field}'")
            }
            ConfigError::ConflictingOptions(msg) => write!(f, "{msg}"),
            ConfigError::Unsupported(msg) => write!(f, "Not supported: {msg}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::InvalidUri(uri) => write!(f, "Invalid connection URI: {uri}"),
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::PingFailed(msg) => write!(f, "Ping failed: {msg}"),
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::UnsupportedType { bson_type, path } => {
                write!(f, "{bson_type} bson type not supported (field '{path}')")
            }
            EncodeError::DateOutOfRange { path, millis } => {
                write!(f, "datetime {millis}ms out of range (field '{path}')")
            }
            EncodeError::Protocol(msg) => write!(f, "invalid writer state: {msg}"),
            EncodeError::Json(e) => write!(f, "json serialization failed: {e}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            ExportError::MongoDb(e) => Some(e),
            _ => None,
        }
    }
}
impl std::error::Error for ConfigError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for EncodeError {}

/* ========================= Conversions to ExportError ========================= */

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<mongodb::error::Error> for ExportError {
    fn from(err: mongodb::error::Error) -> Self {
        ExportError::MongoDb(err)
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Config(err)
    }
}

impl From<ConnectionError> for ExportError {
    fn from(err: ConnectionError) -> Self {
        ExportError::Connection(err)
    }
}

impl From<EncodeError> for ExportError {
    fn from(err: EncodeError) -> Self {
        ExportError::Encode(err)
    }
}

impl From<serde_json::Error> for EncodeError {
    fn from(err: serde_json::Error) -> Self {
        EncodeError::Json(err)
    }
}

impl From<tokio::task::JoinError> for ExportError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExportError::Task(err.to_string())
    }
}

impl From<String> for ExportError {
    fn from(msg: String) -> Self {
        ExportError::Generic(msg)
    }
}
