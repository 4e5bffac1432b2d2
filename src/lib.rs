//! fastexport library
//!
//! Streaming export engine for MongoDB collections. The binary is a thin
//! wrapper; everything it does is available here for embedding and testing.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration file management
//! - `connection`: MongoDB connection management
//! - `error`: Error types, exit statuses and handling
//! - `export`: Flattening, writers, pipeline, sources and sinks
//!
//! # Example
//!
//! ```no_run
//! use fastexport::{config::Config, export::{ExportJob, ExportRequest, ExportSettings}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request = ExportRequest {
//!         uri: "mongodb://localhost:27017".to_string(),
//!         database: "bank".to_string(),
//!         collection: "accounts".to_string(),
//!         ..Default::default()
//!     };
//!     let settings = ExportSettings::resolve(request, &Config::default())?;
//!
//!     let outcome = ExportJob::new(settings).run().await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;

// Re-export commonly used types
pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{ExportError, Result};
pub use export::{ExportJob, ExportOutcome, ExportPipeline, ExportSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
