//! Reward Revert Tool
//!
//! Reverses a redeemed reward in a single Firestore transaction: marks the
//! reward unused, removes `redeemedAt`, deletes the claims that point at it
//! and refunds its points to the owner.
//!
//! ## Usage
//!
//! ```bash
//! export GOOGLE_APPLICATION_CREDENTIALS=~/keys/rewards-admin.json
//!
//! # See what would change
//! cargo run --release --bin revert-reward -- users/abc123/rewards/r1 --dry-run
//!
//! # Apply it
//! cargo run --release --bin revert-reward -- users/abc123/rewards/r1
//! ```
//!
//! Exits 0 on success, 1 on any failure. Nothing is retried: fix the cause
//! and run it again.

use std::path::PathBuf;
use std::process::ExitCode;
use clap::error::ErrorKind;
use clap::Parser;
use thiserror::Error;
use tracing::{error, info};
use rewardtools::config::{get_global_config, init_global_config, ConfigError, DEFAULT_CONFIG_FILE};
use rewardtools::firestore::auth::{credentials_path_from_env, CredentialsError, ServiceAccountKey};
use rewardtools::firestore::{emulator_host_from_env, resolve_project_id, FirestoreStore};
use rewardtools::metrics;
use rewardtools::path::{DocumentPath, PathError};
use rewardtools::revert::{revert_reward, RevertError, RevertOptions};
use rewardtools::telemetry::{init_tracing, TelemetryConfig};

#[derive(Parser, Debug)]
#[clap(name = "revert-reward", version)]
#[clap(about = "Revert a redeemed reward and refund its points", long_about = None)]
struct Args {
    /// Reward document path, e.g. users/{uid}/rewards/{rewardId}
    reward_path: String,

    /// Run all checks and report the changes, then roll back
    #[clap(long, default_value_t = false)]
    dry_run: bool,

    /// Firestore project (defaults to config, then the key file)
    #[clap(long)]
    project_id: Option<String>,

    /// Settings file
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Print Prometheus metrics before exiting
    #[clap(long, default_value_t = false)]
    print_metrics: bool,
}

#[derive(Debug, Error)]
enum ToolError {
    #[error("Invalid reward path: {0}")]
    Path(#[from] PathError),

    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error("No Firestore project id: pass --project-id, set firestore.project_id or GOOGLE_CLOUD_PROJECT")]
    MissingProject,

    #[error(transparent)]
    Revert(#[from] RevertError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    // Pre-flight: nothing else happens without credentials
    let credentials_path = match credentials_path_from_env() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Held until return so file logs are flushed
    let _log_guard = match init_tracing(TelemetryConfig::default()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = metrics::init_metrics() {
        error!(error = %e, "Failed to register metrics");
    }

    let print_metrics = args.print_metrics;
    let code = match run(args, credentials_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Reward revert failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    };

    if print_metrics {
        match metrics::gather_metrics() {
            Ok(text) => println!("\n{}", text),
            Err(e) => eprintln!("Failed to gather metrics: {}", e),
        }
    }

    code
}

async fn run(args: Args, credentials_path: PathBuf) -> Result<(), ToolError> {
    let reward_path = DocumentPath::parse(&args.reward_path)?;

    init_global_config(&args.config)?;
    let settings = &get_global_config().firestore;
    let explicit_project = args.project_id.as_deref().or(settings.project_id.as_deref());

    let store = match emulator_host_from_env() {
        Some(host) => {
            // The key is optional against the emulator; use it for the project id if readable
            let key = ServiceAccountKey::load(&credentials_path).ok();
            let project_id = resolve_project_id(explicit_project, key.as_ref()).ok_or(ToolError::MissingProject)?;
            info!(emulator = %host, project_id = %project_id, "Using Firestore emulator");
            FirestoreStore::with_emulator(&project_id, settings, &host)
        }
        None => {
            let key = ServiceAccountKey::load(&credentials_path)?;
            let project_id = resolve_project_id(explicit_project, Some(&key)).ok_or(ToolError::MissingProject)?;
            info!(
                project_id = %project_id,
                client_email = %key.client_email,
                credentials = %credentials_path.display(),
                "Loaded service account"
            );
            FirestoreStore::with_service_account(&project_id, settings, key)?
        }
    };

    let options = RevertOptions { dry_run: args.dry_run };
    let summary = revert_reward(&store, &reward_path, options).await?;

    println!("Queued revert: {}", summary);
    for claim in &summary.deleted_claims {
        println!("   - {}", claim);
    }
    if summary.committed {
        println!("Transaction committed successfully");
    } else {
        println!("Dry run: transaction rolled back, nothing was changed");
    }

    Ok(())
}
