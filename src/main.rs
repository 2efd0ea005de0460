//! Mastiff - MySQL Topology Coordinator
//!
//! Keeps a single-master MySQL replication topology consistent between
//! etcd (the source of truth) and ProxySQL (the routing layer).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mastiff::config::MastiffConfig;
use mastiff::error::{Error, Result};
use mastiff::probe::MySqlProbe;
use mastiff::proxy::{ProxyAdmin, ProxySqlAdmin};
use mastiff::reconciler::Reconciler;
use mastiff::store::EtcdStore;

/// Mastiff - MySQL Topology Coordinator
#[derive(Parser)]
#[command(name = "mastiff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (optional; the environment always wins)
    #[arg(short, long, default_value = "mastiff.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator loop
    Run,

    /// Validate configuration and exit
    Validate,

    /// Write a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "mastiff.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Run => run(cli.config).await,
        Commands::Validate => validate(cli.config),
        Commands::Init { output } => init(output),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the configuration file when present, then overlay the environment
fn load_config(path: &PathBuf) -> Result<MastiffConfig> {
    let mut config = if path.exists() {
        tracing::info!(path = %path.display(), "Loading configuration file");
        MastiffConfig::from_file(path)?
    } else {
        MastiffConfig::default()
    };
    config.apply_env()?;
    Ok(config)
}

/// Start the coordinator
async fn run(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting mastiff coordinator...");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return Err(e);
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e);
    }

    // Connect to the consensus store
    tracing::info!(endpoints = ?config.store.endpoints, "Connecting to store...");
    let store = match EtcdStore::connect(&config.store).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to store");
            return Err(e);
        }
    };
    tracing::info!("Store connection established");

    // Program the proxy, retrying inside the startup budget; a proxy
    // that never answers is an unrecoverable startup error
    let proxy = ProxySqlAdmin::new(&config.proxy, &config.probe.username, &config.probe.password)?;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match proxy.initialize().await {
            Ok(()) => break,
            Err(e) if attempt < config.proxy.startup_retries => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    retries = config.proxy.startup_retries,
                    "Proxy initialization failed, retrying"
                );
                tokio::time::sleep(config.startup_retry_delay()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Proxy unreachable after initial retry budget");
                return Err(e);
            }
        }
    }

    let probe = Arc::new(MySqlProbe::new(&config.probe));
    let mut reconciler = Reconciler::new(store, probe, proxy, &config);

    // SIGTERM / Ctrl-C drain the in-flight tick, then exit cleanly
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        tracing::info!("Termination signal received");
        let _ = shutdown_tx.send(true);
    });

    reconciler.run(shutdown_rx).await?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

/// Validate configuration file + environment
fn validate(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    config.validate()?;
    println!("Configuration OK");
    println!(
        "  store endpoints: {}",
        config.store.endpoints.join(", ")
    );
    println!(
        "  check interval:  {}s",
        config.reconciler.check_interval_secs
    );
    println!(
        "  hostgroups:      writer={} reader={}",
        config.proxy.writer_hostgroup, config.proxy.reader_hostgroup
    );
    Ok(())
}

/// Write a sample configuration file
fn init(output: PathBuf) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "{} already exists, refusing to overwrite",
            output.display()
        )));
    }

    let sample = r#"# Mastiff coordinator configuration.
# Every value here can be overridden by the environment; see the
# variable names in the comments.

[store]
# ETCDCTL_ENDPOINTS (comma-separated), ETCDCTL_USER (user:pass)
endpoints = ["http://etcd-1:2379"]
user = "mastiff"
password = ""
namespace = ""

[probe]
# MYSQL_REPL_USERNAME / MYSQL_REPL_PASSWORD
username = "repl"
password = ""
timeout_secs = 3
lag_threshold_secs = 300
concurrency = 16

[proxy]
# PROXYSQL_ADMIN_USER / PROXYSQL_ADMIN_PASSWORD,
# WRITER_HOSTGROUP / READER_HOSTGROUP
admin_address = "127.0.0.1:6032"
admin_user = "admin"
admin_password = ""
writer_hostgroup = 10
reader_hostgroup = 20

[reconciler]
# CHECK_INTERVAL, PROMOTION_GRACE_PERIOD, MAX_AGE (all seconds)
check_interval_secs = 5
promotion_grace_secs = 30
max_age_secs = 300
"#;

    std::fs::write(&output, sample)?;
    println!("Wrote {}", output.display());
    Ok(())
}
