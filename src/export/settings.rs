//! Validated export settings
//!
//! [`ExportRequest`] carries the raw, format-agnostic options as given by the
//! user. [`ExportSettings::resolve`] merges them with the configuration file,
//! checks every rule that can be checked without I/O and produces the
//! settings the job runs on. A request that resolves is guaranteed to have a
//! usable column set, encoder and server query.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use super::columns::ColumnSet;
use super::pipeline::PipelineOptions;
use super::sink::validate_path;
use super::source::{QueryPlan, fields_to_projection};
use super::writers::{DateFormat, DocumentEncoder, JsonEncoder, JsonFormat, TabularEncoder};
use crate::config::Config;
use crate::connection::validate_uri;
use crate::error::{ConfigError, Result};

/// Output serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One Extended JSON object per line
    #[default]
    Json,
    /// Delimited text rows
    Csv,
}

impl OutputMode {
    /// File extension used for the default output name.
    pub fn extension(self) -> &'static str {
        match self {
            OutputMode::Json => "json",
            OutputMode::Csv => "csv",
        }
    }
}

/// Raw export options, before validation.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub uri: String,
    pub database: String,
    pub collection: String,
    /// Filter as Extended JSON text
    pub query: Option<String>,
    /// Explicit field list
    pub fields: Vec<String>,
    /// Projection as Extended JSON text
    pub projection: Option<String>,
    pub mode: OutputMode,
    pub json_format: Option<JsonFormat>,
    /// Array field to unwind (CSV only)
    pub array_field: Option<String>,
    pub date_format: Option<String>,
    pub header: bool,
    pub delimiter: Option<String>,
    pub output: Option<PathBuf>,
    pub limit: Option<i64>,
    pub concurrency: Option<usize>,
    pub progress_interval: Option<Duration>,
    pub test: bool,
}

/// Requested document shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSelection {
    /// Every field
    All,
    /// Explicit dotted field names
    Fields(Vec<String>),
    /// Projection document
    Projection(Document),
}

impl FieldSelection {
    /// Server-side projection, if any.
    pub fn projection(&self) -> Option<Document> {
        match self {
            FieldSelection::All => None,
            FieldSelection::Fields(fields) => Some(fields_to_projection(fields)),
            FieldSelection::Projection(projection) => Some(projection.clone()),
        }
    }
}

/// Format-specific settings.
#[derive(Debug, Clone)]
pub enum ExportMode {
    Json {
        json_format: JsonFormat,
    },
    Csv {
        columns: Arc<ColumnSet>,
        array_field: Option<String>,
        date_format: DateFormat,
        delimiter: String,
        include_header: bool,
    },
}

/// Where the exported lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    Stdout,
}

/// Validated, ready-to-run export settings
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub filter: Document,
    pub selection: FieldSelection,
    pub mode: ExportMode,
    pub output: OutputTarget,
    pub concurrency: usize,
    pub progress_interval: Duration,
    pub batch_size: u32,
    pub server_selection_timeout: Duration,
    pub app_name: String,
    pub limit: Option<i64>,
    pub test: bool,
}

impl ExportSettings {
    /// Validate a request against the configuration
    ///
    /// # Arguments
    /// * `request` - Raw options
    /// * `config` - Loaded configuration supplying defaults
    ///
    /// # Returns
    /// * `Result<ExportSettings>` - Settings, or the first configuration error
    pub fn resolve(request: ExportRequest, config: &Config) -> Result<Self> {
        validate_uri(&request.uri)?;
        require("database", &request.database)?;
        require("collection", &request.collection)?;

        let filter = match &request.query {
            Some(text) => parse_document("query", text)?,
            None => Document::new(),
        };
        let selection = resolve_selection(&request)?;
        let mode = resolve_mode(&request, &selection, config)?;

        if let Some(limit) = request.limit
            && limit <= 0
        {
            return Err(invalid("limit", limit));
        }
        // Test mode previews one record unless told otherwise
        let limit = request.limit.or(request.test.then_some(1));

        let concurrency = request.concurrency.unwrap_or(config.export.concurrency);
        if concurrency == 0 {
            return Err(invalid("concurrency", 0));
        }
        let progress_interval = request
            .progress_interval
            .unwrap_or_else(|| config.progress_interval());
        if progress_interval.is_zero() {
            return Err(invalid("output-tick", "0s"));
        }

        let output = if request.test {
            OutputTarget::Stdout
        } else {
            let path = request.output.clone().unwrap_or_else(|| {
                PathBuf::from(format!("{}.{}", request.collection, request.mode.extension()))
            });
            validate_path(&path)?;
            OutputTarget::File(path)
        };

        Ok(Self {
            uri: request.uri,
            database: request.database,
            collection: request.collection,
            filter,
            selection,
            mode,
            output,
            concurrency,
            progress_interval,
            batch_size: config.export.batch_size,
            server_selection_timeout: config.server_selection_timeout(),
            app_name: config.connection.app_name.clone(),
            limit,
            test: request.test,
        })
    }

    /// `database.collection`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    /// Server query feeding the pipeline.
    pub fn query_plan(&self) -> QueryPlan {
        let projection = self.selection.projection();
        match &self.mode {
            ExportMode::Json { .. } => QueryPlan::find(self.filter.clone(), projection, self.limit),
            ExportMode::Csv { array_field, .. } => QueryPlan::aggregate(
                self.filter.clone(),
                projection.unwrap_or_default(),
                array_field.as_deref(),
                self.limit,
            ),
        }
    }

    /// Per-document encoder for the selected format.
    pub fn encoder(&self) -> Arc<dyn DocumentEncoder> {
        match &self.mode {
            ExportMode::Json { json_format } => Arc::new(JsonEncoder::new(*json_format)),
            ExportMode::Csv {
                columns,
                date_format,
                delimiter,
                include_header,
                ..
            } => Arc::new(
                TabularEncoder::new(Arc::clone(columns), delimiter.as_str(), date_format.clone())
                    .with_header(*include_header),
            ),
        }
    }

    /// Whether the server query duplicates documents on an array field.
    pub fn is_unwinding(&self) -> bool {
        matches!(
            &self.mode,
            ExportMode::Csv {
                array_field: Some(_),
                ..
            }
        )
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            concurrency: self.concurrency,
            progress_interval: self.progress_interval,
        }
    }
}

fn resolve_selection(request: &ExportRequest) -> Result<FieldSelection> {
    let fields: Vec<String> = request
        .fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    match (&request.projection, fields.is_empty()) {
        (Some(_), false) => Err(ConfigError::ConflictingOptions(
            "--projection and --fields cannot both be specified".to_string(),
        )
        .into()),
        (Some(text), true) => Ok(FieldSelection::Projection(parse_document("projection", text)?)),
        (None, false) => Ok(FieldSelection::Fields(fields)),
        (None, true) => Ok(FieldSelection::All),
    }
}

fn resolve_mode(request: &ExportRequest, selection: &FieldSelection, config: &Config) -> Result<ExportMode> {
    match request.mode {
        OutputMode::Json => {
            let csv_only = [
                ("--array", request.array_field.is_some()),
                ("--date-format", request.date_format.is_some()),
                ("--header", request.header),
                ("--delimiter", request.delimiter.is_some()),
            ];
            if let Some((flag, _)) = csv_only.iter().find(|(_, given)| *given) {
                return Err(ConfigError::ConflictingOptions(format!("{flag} is only valid with --mode csv")).into());
            }
            Ok(ExportMode::Json {
                json_format: request.json_format.unwrap_or_default(),
            })
        }
        OutputMode::Csv => {
            if request.json_format.is_some() {
                return Err(ConfigError::ConflictingOptions(
                    "--json-format is only valid with --mode json".to_string(),
                )
                .into());
            }
            let columns = match selection {
                FieldSelection::All => {
                    return Err(ConfigError::MissingField(
                        "csv mode requires --fields or --projection".to_string(),
                    )
                    .into());
                }
                FieldSelection::Fields(fields) => ColumnSet::from_fields(fields)?,
                FieldSelection::Projection(projection) => ColumnSet::from_projection(projection)?,
            };

            let delimiter = request
                .delimiter
                .clone()
                .unwrap_or_else(|| config.export.delimiter.clone());
            if delimiter.is_empty() {
                return Err(invalid("delimiter", ""));
            }
            let pattern = request
                .date_format
                .clone()
                .unwrap_or_else(|| config.export.date_format.clone());
            let array_field = match request.array_field.as_deref().map(str::trim) {
                Some("") => return Err(invalid("array", "")),
                other => other.map(str::to_string),
            };

            Ok(ExportMode::Csv {
                columns: Arc::new(columns),
                array_field,
                date_format: DateFormat::new(pattern)?,
                delimiter,
                include_header: request.header,
            })
        }
    }
}

/// Parse relaxed or canonical Extended JSON into a document.
pub fn parse_document(field: &str, text: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{text} ({e})"),
    })?;
    let serde_json::Value::Object(map) = value else {
        return Err(invalid(field, format!("{text} (expected a JSON object)")));
    };
    Document::try_from(map).map_err(|e| invalid(field, format!("{text} ({e})")))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!("--{field} is required")).into());
    }
    Ok(())
}

fn invalid(field: &str, value: impl ToString) -> crate::error::ExportError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
