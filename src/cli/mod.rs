//! Command-line interface for fastexport
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and validation
//! - Turning arguments into a validated [`ExportSettings`]
//! - Log level selection

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::export::settings::{ExportRequest, ExportSettings, OutputMode};
use crate::export::writers::JsonFormat;

/// Extract database name from MongoDB connection URI
///
/// # Arguments
/// * `uri` - MongoDB connection URI
///
/// # Returns
/// * `Option<String>` - Database name if found in URI
fn extract_database_from_uri(uri: &str) -> Option<String> {
    // Format: mongodb://[username:password@]host[:port][/database][?options]
    let after_scheme = uri.split("://").nth(1)?;
    let path_part = after_scheme.split('/').nth(1)?;
    let db_name = path_part.split('?').next().unwrap_or("");
    (!db_name.is_empty()).then(|| db_name.to_string())
}

/// Fast streaming export of a MongoDB collection
#[derive(Parser, Debug)]
#[command(
    name = "fastexport",
    version,
    about = "Export a MongoDB collection to JSON lines or CSV",
    long_about = "Streams the documents of one collection to line-delimited Extended JSON or
delimited text, encoding documents concurrently while a single writer owns the output."
)]
pub struct CliArgs {
    /// MongoDB connection URI
    ///
    /// Format: mongodb://[username:password@]host[:port][/database][?options]
    #[arg(long, value_name = "URI")]
    pub uri: String,

    /// Database name (defaults to the database in the URI)
    #[arg(short = 'd', long = "database", visible_alias = "db", value_name = "NAME")]
    pub database: Option<String>,

    /// Collection name
    #[arg(short = 'c', long, value_name = "NAME")]
    pub collection: String,

    /// Query filter as Extended JSON, e.g. '{"age": {"$gt": 21}}'
    #[arg(short = 'q', long, value_name = "JSON")]
    pub query: Option<String>,

    /// Comma-separated list of fields, e.g. 'name,address.city'
    #[arg(short = 'f', long, value_name = "LIST", value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Projection as Extended JSON, e.g. '{"name": 1, "_id": 0}'
    #[arg(long, value_name = "JSON")]
    pub projection: Option<String>,

    /// Output format
    #[arg(short = 'm', long, value_enum, default_value_t = OutputMode::Csv)]
    pub mode: OutputMode,

    /// Extended JSON flavour (json mode only)
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub json_format: Option<JsonFormat>,

    /// Array field to unwind into one row per element (csv mode only)
    #[arg(short = 'a', long = "array", value_name = "FIELD")]
    pub array_field: Option<String>,

    /// strftime pattern for dates (csv mode only)
    #[arg(long, value_name = "PATTERN")]
    pub date_format: Option<String>,

    /// Write a header line (csv mode only)
    #[arg(long)]
    pub header: bool,

    /// Field delimiter (csv mode only)
    #[arg(long, value_name = "TEXT")]
    pub delimiter: Option<String>,

    /// Output file (defaults to <collection>.<json|csv>)
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Maximum number of records (rows after unwinding in csv mode)
    #[arg(short = 'l', long, value_name = "N", allow_negative_numbers = true)]
    pub limit: Option<i64>,

    /// Print a sample to the console instead of writing a file
    #[arg(short = 't', long)]
    pub test: bool,

    /// Maximum number of documents encoded concurrently
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Progress interval in seconds
    #[arg(
        long = "outputTickSeconds",
        alias = "output-tick-seconds",
        value_name = "SECONDS",
        hide = true
    )]
    pub output_tick_seconds: Option<u64>,

    /// Configuration file path
    #[arg(long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,
}

/// CLI interface manager
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Parse process arguments and load configuration
    ///
    /// # Returns
    /// * `Result<Self>` - Initialized CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build from already parsed arguments
    ///
    /// # Arguments
    /// * `args` - Parsed arguments
    ///
    /// # Returns
    /// * `Result<Self>` - Interface with the configuration file loaded
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config::load(args.config_file.as_deref())?;
        Ok(Self { args, config })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Effective log level: `--vv`, then `-v`, then the config file
    pub fn log_level(&self) -> tracing::Level {
        if self.args.very_verbose {
            tracing::Level::TRACE
        } else if self.args.verbose {
            tracing::Level::DEBUG
        } else {
            self.config.logging.level.to_tracing_level()
        }
    }

    /// Database from `--db`, else from the URI path
    pub fn get_database(&self) -> String {
        self.args
            .database
            .clone()
            .or_else(|| extract_database_from_uri(&self.args.uri))
            .unwrap_or_default()
    }

    /// Raw export request assembled from the arguments
    pub fn export_request(&self) -> ExportRequest {
        let args = &self.args;
        ExportRequest {
            uri: args.uri.clone(),
            database: self.get_database(),
            collection: args.collection.clone(),
            query: args.query.clone(),
            fields: args.fields.clone(),
            projection: args.projection.clone(),
            mode: args.mode,
            json_format: args.json_format,
            array_field: args.array_field.clone(),
            date_format: args.date_format.clone(),
            header: args.header,
            delimiter: args.delimiter.clone(),
            output: args.output.clone(),
            limit: args.limit,
            concurrency: args.concurrency,
            progress_interval: args.output_tick_seconds.map(Duration::from_secs),
            test: args.test,
        }
    }

    /// Validate arguments against the configuration
    ///
    /// # Returns
    /// * `Result<ExportSettings>` - Settings ready to run, or a configuration error
    pub fn settings(&self) -> Result<ExportSettings> {
        ExportSettings::resolve(self.export_request(), &self.config)
    }
}
