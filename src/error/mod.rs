//! Error handling for export runs.
//!
//! All fallible operations in the crate return [`Result`], whose error type
//! [`ExportError`] wraps the more specific kinds below. Each kind maps to a
//! process exit status so calling scripts can tell a bad configuration apart
//! from a run that failed mid-stream.
//!
//! # Example
//!
//! ```rust
//! use fastexport::error::{ConfigError, ExitStatus, ExportError};
//!
//! let err: ExportError = ConfigError::ConflictingOptions(
//!     "--projection and --fields cannot both be specified".into(),
//! )
//! .into();
//! assert_eq!(err.exit_status(), ExitStatus::ConfigError);
//! ```

pub mod kinds;
pub mod mongo;

// Re-export commonly used types
pub use kinds::{
    ConfigError, ConnectionError, EncodeError, ExitStatus, ExportError, Result,
};
pub use mongo::ErrorInfo;
