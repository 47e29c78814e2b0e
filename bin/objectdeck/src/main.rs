//! ObjectDeck server
//!
//! One process owns one data directory: SQLite metadata, staged uploads,
//! job logs, and the process lockfile all live under `--data-dir`.

mod lockfile;

use anyhow::{bail, Context, Result};
use clap::Parser;
use lockfile::Lockfile;
use objectdeck_api::{AppState, AuthConfig, MetaLimits};
use objectdeck_common::DataLayout;
use objectdeck_crypto::SecretCipher;
use objectdeck_engine::EngineDriver;
use objectdeck_events::EventBus;
use objectdeck_jobs::{Scheduler, SchedulerConfig};
use objectdeck_store::Store;
use objectdeck_uploads::{start_reaper, UploadConfig, UploadManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "objectdeck")]
#[command(about = "Self-hosted control plane for object storage")]
#[command(version)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:9300")]
    addr: String,

    /// Data directory (metadata, staged uploads, job logs)
    #[arg(long, default_value = "./objectdeck-data")]
    data_dir: PathBuf,

    /// Directory with the compiled browser UI; served at /
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Static API token required on every request
    #[arg(long, env = "API_TOKEN")]
    api_token: Option<String>,

    /// Base64-encoded 32-byte key for credential encryption at rest
    #[arg(long, env = "ENCRYPTION_KEY")]
    encryption_key: Option<String>,

    /// Allow binding beyond loopback (requires an API token)
    #[arg(long, default_value_t = false)]
    allow_remote: bool,

    /// Host names accepted in Host/Origin when bound remotely (repeatable)
    #[arg(long = "allow-host")]
    allow_hosts: Vec<String>,

    /// Directories local-path sync jobs may touch (repeatable)
    #[arg(long = "allow-local-dir")]
    allow_local_dirs: Vec<PathBuf>,

    /// Maximum concurrently running jobs
    #[arg(long, default_value_t = 2)]
    job_concurrency: usize,

    /// Seconds finished jobs are kept before the retention sweep
    #[arg(long, default_value_t = 7 * 24 * 3600)]
    job_retention: u64,

    /// Per-job log size cap in bytes (truncated from the front)
    #[arg(long, default_value_t = 1024 * 1024)]
    job_log_max_bytes: u64,

    /// Upload session lifetime in seconds
    #[arg(long, default_value_t = 24 * 3600)]
    upload_ttl: u64,

    /// Per-session upload byte ceiling
    #[arg(long, default_value_t = 10 * 1024 * 1024 * 1024)]
    upload_max_bytes: u64,

    /// Allow direct-stream upload sessions
    #[arg(long, default_value_t = true)]
    upload_direct_stream: bool,

    /// Path to the external transfer engine binary
    #[arg(long, env = "TRANSFER_ENGINE_BIN")]
    engine_bin: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ObjectDeck");

    // Configuration validation happens before anything touches disk.
    let addr: SocketAddr = args
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", args.addr))?;
    if args.allow_remote && args.api_token.is_none() {
        bail!("--allow-remote requires an API token");
    }
    if !addr.ip().is_loopback() && !args.allow_remote {
        bail!("binding {} requires --allow-remote", addr);
    }
    let cipher = match &args.encryption_key {
        Some(key) => Some(SecretCipher::new(key).context("invalid --encryption-key")?),
        None => None,
    };
    if let Some(static_dir) = &args.static_dir {
        if !static_dir.is_dir() {
            bail!("static dir {} does not exist", static_dir.display());
        }
    }

    let layout = DataLayout::new(&args.data_dir);
    layout.ensure().context("prepare data directory")?;
    let _lock = Lockfile::acquire(layout.lockfile()).context("acquire data directory lock")?;
    layout.set_encryption_marker(cipher.is_some())?;

    let store = Store::open(&layout.metadata_db(), cipher).context("open metadata store")?;
    let recovered = store.mark_running_jobs_failed()?;
    if recovered > 0 {
        info!(jobs = recovered, "recovered interrupted jobs");
    }
    let migrated = store.ensure_profiles_encrypted()?;
    if migrated > 0 {
        info!(profiles = migrated, "encrypted legacy profile secrets");
    }

    let bus = EventBus::new();
    let engine = EngineDriver::new(args.engine_bin.clone(), layout.clone(), args.job_log_max_bytes);
    let engine_version = engine.probe_version().await;
    match (&args.engine_bin, &engine_version) {
        (Some(bin), Some(version)) => info!("transfer engine: {} ({version})", bin.display()),
        (Some(bin), None) => {
            tracing::warn!("transfer engine {} did not answer --version", bin.display());
        }
        (None, _) => info!("no transfer engine configured; sync jobs are limited"),
    }

    let scheduler = Scheduler::new(
        store.clone(),
        Arc::clone(&bus),
        engine.clone(),
        SchedulerConfig {
            concurrency: args.job_concurrency,
            retention: Duration::from_secs(args.job_retention),
            retention_interval: Duration::from_secs(600),
            retention_batch: 200,
            allow_local_dirs: args.allow_local_dirs.clone(),
        },
    )?;
    Arc::clone(&scheduler).start();

    let connector: objectdeck_jobs::Connector =
        Arc::new(|profile, tls| objectdeck_providers::connect(profile, tls));
    let uploads = UploadManager::new(
        store.clone(),
        layout.clone(),
        Arc::clone(&scheduler),
        Arc::clone(&connector),
        UploadConfig {
            ttl: Duration::from_secs(args.upload_ttl),
            max_bytes: args.upload_max_bytes,
            direct_stream: args.upload_direct_stream,
            presign_ttl: Duration::from_secs(3600),
        },
    );
    let shutdown = CancellationToken::new();
    start_reaper(Arc::clone(&uploads), Duration::from_secs(60), shutdown.clone());

    let state = Arc::new(AppState {
        store,
        bus,
        scheduler: Arc::clone(&scheduler),
        uploads,
        engine,
        connector,
        auth: AuthConfig {
            api_token: args.api_token.clone(),
            allow_remote: args.allow_remote,
            allowed_hosts: args.allow_hosts.clone(),
        },
        limits: MetaLimits {
            upload_max_bytes: args.upload_max_bytes,
            upload_ttl_seconds: args.upload_ttl,
            job_concurrency: args.job_concurrency,
            job_log_max_bytes: args.job_log_max_bytes,
            direct_stream: args.upload_direct_stream,
        },
        engine_version,
        shutdown: shutdown.clone(),
    });

    let app = objectdeck_api::router(state, args.static_dir.clone());

    info!("Listening on {addr}");
    let listener = TcpListener::bind(addr).await.context("bind listen address")?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
            serve_shutdown.cancel();
        })
        .await?;

    scheduler.shutdown();
    info!("ObjectDeck shut down gracefully");
    Ok(())
}
