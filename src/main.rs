//! fastexport - streaming MongoDB collection export
//!
//! Exports one collection to line-delimited Extended JSON or to delimited
//! text rows, encoding documents concurrently.
//!
//! # Usage
//!
//! ```bash
//! # JSON lines to accounts.json
//! fastexport --uri mongodb://localhost:27017 -d bank -c accounts -m json
//!
//! # CSV with header, one row per tax lot
//! fastexport --uri mongodb://localhost:27017 -d bank -c accounts -f taxlots.rec,firstName -a taxlots --header
//!
//! # Preview the first record on the console
//! fastexport --uri mongodb://localhost:27017/bank -c accounts -m json --test
//! ```
//!
//! # Exit status
//!
//! `0` success, `1` failed mid-stream, `2` bad configuration, `3` empty or
//! missing collection, `4` server unreachable.

use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use fastexport::cli::CliInterface;
use fastexport::error::{ExitStatus, Result};
use fastexport::export::ExportJob;

/// Application entry point
#[tokio::main]
async fn main() {
    let status = match run().await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_status()
        }
    };
    std::process::exit(status.code());
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Validate the export settings
/// 4. Run the export, cancelling on Ctrl-C
///
/// # Returns
/// * `Result<ExitStatus>` - Status of a run that did not fail
async fn run() -> Result<ExitStatus> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    let settings = cli.settings()?;
    debug!("Export settings: {:?}", settings);

    let token = CancellationToken::new();
    let _signal = tokio_util::task::AbortOnDropHandle::new(tokio::spawn(cancel_on_ctrl_c(token.clone())));

    let outcome = ExportJob::new(settings).with_cancellation(token).run().await?;
    Ok(outcome.exit_status())
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, stopping export");
        token.cancel();
    }
}

/// Initialize logging on stderr
///
/// `RUST_LOG` takes precedence over the verbosity flags and the config file.
fn initialize_logging(cli: &CliInterface) {
    let level = LevelFilter::from_level(cli.log_level());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
