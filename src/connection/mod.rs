//! Connection management for MongoDB
//!
//! This module provides the connection steps an export needs before any
//! document is read:
//! - URI scheme validation (no I/O)
//! - Client construction with a bounded server selection timeout
//! - A `ping` against the target database
//! - A metadata-based emptiness probe on the target collection

use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::mongo::{error_message, is_connectivity_error};
use crate::error::{ConfigError, ConnectionError, ExportError, Result};

/// Accepted URI schemes.
const SUPPORTED_SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

/// Recognised scheme that this tool cannot export from.
const UNSUPPORTED_SCHEME: &str = "msmongodb://";

/// Validate the connection URI scheme
///
/// # Arguments
/// * `uri` - Connection URI
///
/// # Returns
/// * `Result<()>` - Ok for `mongodb://` and `mongodb+srv://` URIs
pub fn validate_uri(uri: &str) -> Result<()> {
    let uri = uri.trim();
    if SUPPORTED_SCHEMES.iter().any(|scheme| uri.starts_with(scheme)) {
        return Ok(());
    }
    if uri.starts_with(UNSUPPORTED_SCHEME) {
        return Err(ConfigError::Unsupported(format!("{UNSUPPORTED_SCHEME} connection strings")).into());
    }
    Err(ConfigError::InvalidValue {
        field: "uri".to_string(),
        value: sanitize_uri(uri),
    }
    .into())
}

/// Hide credentials between `://` and `@`
///
/// # Arguments
/// * `uri` - Connection URI that may contain `user:password@`
///
/// # Returns
/// * `String` - URI safe to print
pub fn sanitize_uri(uri: &str) -> String {
    if let Some(start) = uri.find("://")
        && let Some(at) = uri[start + 3..].find('@')
    {
        let at = start + 3 + at;
        return format!("{}***{}", &uri[..start + 3], &uri[at..]);
    }
    uri.to_string()
}

/// MongoDB connection manager
///
/// Owns the driver client used by one export run.
pub struct ConnectionManager {
    /// MongoDB client instance
    client: Option<Client>,

    /// Connection URI
    uri: String,

    /// Application name reported to the server
    app_name: String,

    /// Server selection timeout
    server_selection_timeout: Duration,
}

impl ConnectionManager {
    /// Create a new connection manager
    ///
    /// # Arguments
    /// * `uri` - MongoDB connection URI
    /// * `app_name` - Application name reported to the server
    /// * `server_selection_timeout` - How long to wait for a usable server
    ///
    /// # Returns
    /// * `Self` - New connection manager instance
    pub fn new(uri: String, app_name: String, server_selection_timeout: Duration) -> Self {
        Self {
            client: None,
            uri,
            app_name,
            server_selection_timeout,
        }
    }

    /// Build the driver client
    ///
    /// The driver connects lazily, so this only fails on malformed URIs or
    /// options. Reachability is checked by [`ConnectionManager::ping`].
    ///
    /// # Returns
    /// * `Result<()>` - Success or connection error
    pub async fn connect(&mut self) -> Result<()> {
        let options = Self::parse_uri(&self.uri).await?;
        let options = self.configure(options);
        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::ConnectionFailed(error_message(&e)))?;

        debug!("Client created for {}", sanitize_uri(&self.uri));
        self.client = Some(client);
        Ok(())
    }

    /// Verify the server is reachable by sending a ping
    ///
    /// # Arguments
    /// * `database` - Database the ping runs against
    ///
    /// # Returns
    /// * `Result<Duration>` - Round-trip time of the ping
    pub async fn ping(&self, database: &str) -> Result<Duration> {
        let client = self.get_client()?;
        let start = Instant::now();

        client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| {
                let message = error_message(&e);
                if is_connectivity_error(&e) {
                    ConnectionError::ConnectionFailed(message)
                } else {
                    ConnectionError::PingFailed(message)
                }
            })?;

        let elapsed = start.elapsed();
        info!("Connected to {} in {} ms", sanitize_uri(&self.uri), elapsed.as_millis());
        Ok(elapsed)
    }

    /// Get a collection handle
    ///
    /// # Arguments
    /// * `database` - Database name
    /// * `collection` - Collection name
    ///
    /// # Returns
    /// * `Result<Collection<Document>>` - Collection handle or error
    pub fn collection(&self, database: &str, collection: &str) -> Result<Collection<Document>> {
        Ok(self.get_client()?.database(database).collection(collection))
    }

    /// Metadata-based document count of a collection
    ///
    /// # Returns
    /// * `Result<u64>` - Estimated count; 0 for a missing collection
    pub async fn estimated_count(&self, database: &str, collection: &str) -> Result<u64> {
        let count = self
            .collection(database, collection)?
            .estimated_document_count()
            .await
            .map_err(classify_driver_error)?;
        debug!("Estimated {} documents in {}.{}", count, database, collection);
        Ok(count)
    }

    /// Get the MongoDB client
    ///
    /// # Returns
    /// * `Result<&Client>` - Reference to client or error
    pub fn get_client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| ConnectionError::ConnectionFailed("not connected".to_string()).into())
    }

    /// Parse connection URI and create client options
    async fn parse_uri(uri: &str) -> Result<ClientOptions> {
        ClientOptions::parse(uri).await.map_err(|e| {
            ConnectionError::InvalidUri(format!("{} ({})", sanitize_uri(uri), error_message(&e))).into()
        })
    }

    /// Apply timeout and application name
    fn configure(&self, mut options: ClientOptions) -> ClientOptions {
        options.server_selection_timeout = Some(self.server_selection_timeout);
        if options.app_name.is_none() {
            options.app_name = Some(self.app_name.clone());
        }
        options
    }
}

/// Report unreachable servers as connection errors, everything else as is.
pub fn classify_driver_error(error: mongodb::error::Error) -> ExportError {
    if is_connectivity_error(&error) {
        ConnectionError::ConnectionFailed(error_message(&error)).into()
    } else {
        ExportError::MongoDb(error)
    }
}
