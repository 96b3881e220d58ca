//! certrotate - client certificate rotation daemon
//!
//! Keeps the client certificate of every configured identity valid by
//! requesting a new one from the CSR authority before the current one
//! runs out.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certrotate::config::{self, LogFormat};
use certrotate::db::{self, SqliteCredentialStore, SqliteStatusReporter};
use certrotate::services::{
    run_once, start_rotation_scheduler, AdmissionGuard, CredentialStore, CsrAuthority,
    HttpCsrAuthority, NeverHalt, RateLimitedAdmission, Reconciler, StatusReporter,
};
use certrotate::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("certrotate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let once = args.iter().any(|arg| arg == "--once");

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must stay alive so buffered log lines reach the file
    let _log_guard = init_logging(&config);

    info!("certrotate starting up");

    if config.identities.is_empty() {
        warn!("No identities configured, nothing to rotate");
        return Ok(());
    }

    ensure_data_directory(&config)?;

    info!("Initializing database connection");
    let pool = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    log_last_conditions(&SqliteStatusReporter::new(pool.clone())).await;

    let mut reconcilers = build_reconcilers(&config, pool)?;

    if once {
        let cancellation = CancellationToken::new();
        let on_signal = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received, abandoning the single run");
                on_signal.cancel();
            }
        });

        let results = run_once(&mut reconcilers, &config.rotation, &cancellation).await;
        let mut failed = 0;
        for (identity, result) in results {
            match result {
                Ok(outcome) => info!(identity = %identity, "Pass finished: {:?}", outcome),
                Err(e) => {
                    error!(identity = %identity, "Pass failed: {}", e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} identities failed to reconcile", failed);
        }
        return Ok(());
    }

    let scheduler = start_rotation_scheduler(reconcilers, &config.rotation).await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    scheduler.stop().await;

    info!("certrotate stopped");
    Ok(())
}

/// Log the condition each identity was left in by the previous run
async fn log_last_conditions(reporter: &SqliteStatusReporter) {
    match reporter.list().await {
        Ok(conditions) => {
            for stored in conditions {
                let condition = &stored.condition;
                info!(
                    identity = %stored.identity,
                    status = condition.status,
                    reason = %condition.reason,
                    since = %stored.last_transition_time,
                    "Last rotation condition: {}",
                    condition.message
                );
            }
        }
        Err(e) => warn!("Unable to read stored rotation conditions: {}", e),
    }
}

/// Wire one reconciler per configured identity
fn build_reconcilers(config: &AppConfig, pool: db::DbPool) -> Result<Vec<Reconciler>> {
    let authority_config = config
        .authority
        .as_ref()
        .context("CSR authority is not configured")?;
    info!("Initializing CSR authority client: {}", authority_config.url);
    let authority: Arc<dyn CsrAuthority> = Arc::new(
        HttpCsrAuthority::new(authority_config)
            .context("Failed to initialize CSR authority client")?,
    );

    let store: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::new(pool.clone()));
    let reporter: Arc<dyn StatusReporter> = Arc::new(SqliteStatusReporter::new(pool));

    // One quota shared by every identity
    let admission: Arc<dyn AdmissionGuard> = match config
        .rotation
        .max_requests_per_hour
        .and_then(RateLimitedAdmission::per_hour)
    {
        Some(guard) => {
            info!("Limiting certificate requests: {:?}", guard);
            Arc::new(guard)
        }
        None => Arc::new(NeverHalt),
    };

    let policy = config.rotation.jitter_policy();
    Ok(config
        .identities
        .iter()
        .map(|identity| {
            info!(
                identity = %identity.name,
                subject = %identity.subject,
                signer = %identity.signer_name,
                "Managing client certificate"
            );
            Reconciler::new(
                identity.clone(),
                store.clone(),
                authority.clone(),
                reporter.clone(),
            )
            .with_policy(policy)
            .with_admission(admission.clone())
        })
        .collect())
}

/// Initialize logging based on configuration
///
/// Returns a guard that must be kept alive for file logging to work properly.
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    match &log_config.target {
        LogTarget::Console => {
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(subscriber, &log_config.format);
            None
        }
        LogTarget::File => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_writer_logging(subscriber, &log_config.format, writer, false);
            Some(guard)
        }
        LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_writer_logging(subscriber, &log_config.format, writer, true);
            Some(guard)
        }
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Initialize console-only logging
fn init_console_logging<S>(subscriber: S, format: &LogFormat)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_target(false))
            .init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init(),
    }
}

/// Initialize file logging, optionally mirrored to the console
fn init_writer_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
    console: bool,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    // Files never get ANSI colors
    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .with(console.then(|| fmt::layer().with_target(true)))
            .init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .with(console.then(|| fmt::layer().with_target(true)))
            .init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .with(console.then(|| fmt::layer().with_target(true)))
            .init(),
    }
}

/// Ensure the directory of a file-backed SQLite database exists
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"certrotate {}

USAGE:
    certrotate [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --once                  Reconcile every identity once and exit. An
                            outstanding certificate request is polled
                            until it is issued or the rotation
                            once_timeout_secs runs out. Exits non-zero
                            when any identity failed.

ENVIRONMENT:
    CERTROTATE_CONFIG                  Path to configuration file
    CERTROTATE_AUTHORITY_URL           CSR authority base URL
    CERTROTATE_DATABASE_URL            SQLite database URL
    CERTROTATE_RESYNC_INTERVAL_SECS    Seconds between reconciliation passes
    CERTROTATE_PENDING_POLL_INTERVAL_SECS
                                       Seconds between polls of an outstanding request
    CERTROTATE_MAX_REQUESTS_PER_HOUR   Cap on new certificate requests
    CERTROTATE_LOG_FORMAT              pretty, json or compact
    CERTROTATE_LOG_TARGET              console, file or both
    RUST_LOG                           Log filter

CONFIGURATION:
    The configuration file is looked up in the following order:
    1. Path specified by CERTROTATE_CONFIG
    2. ./certrotate.yaml
    3. ./config/certrotate.yaml
    4. /etc/certrotate/config.yaml
    5. <user config dir>/certrotate/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
