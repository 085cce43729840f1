//! Piraeus Operator
//!
//! Deploys and manages LINSTOR clusters on Kubernetes.

use anyhow::Context as _;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use piraeus_operator::config::{self, OperatorConfig, SERVICE_ACCOUNT_NAMESPACE};
use piraeus_operator::controller::{self, Context, Metrics};
use piraeus_operator::linstor::ConnectionSettings;
use piraeus_operator::server::{self, HealthState};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Piraeus Operator - LINSTOR on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace of generated workloads. Defaults to the service account namespace.
    #[arg(long, env = "NAMESPACE")]
    namespace: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Maximum LINSTOR API requests per second
    #[arg(long, env = "LINSTOR_API_QPS", default_value = "100")]
    linstor_api_qps: f64,

    /// Lifetime of cached LINSTOR node and pool queries, 0 disables the cache
    #[arg(long, env = "LINSTOR_NODE_CACHE_SECS", default_value = "60")]
    linstor_node_cache_secs: u64,

    /// LINSTOR API request timeout
    #[arg(long, env = "LINSTOR_REQUEST_TIMEOUT_SECS", default_value = "30")]
    linstor_request_timeout_secs: u64,

    /// Requeue interval of healthy objects
    #[arg(long, env = "REQUEUE_INTERVAL_SECS", default_value = "300")]
    requeue_interval_secs: u64,

    /// Poll interval while a node is evacuated
    #[arg(long, env = "EVACUATION_POLL_SECS", default_value = "30")]
    evacuation_poll_secs: u64,

    /// Image configuration file (YAML, multiple documents allowed)
    #[arg(long, env = "IMAGE_CONFIG")]
    image_config: Option<PathBuf>,

    /// Image pull secret added to generated pods
    #[arg(long, env = "PULL_SECRET")]
    pull_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = operator_config(&args)?;

    info!("Starting Piraeus Operator");
    info!("  Version: {}", piraeus_operator::VERSION);
    info!("  Namespace: {}", config.namespace);
    info!("  Health: {}", config.health_addr);
    info!("  Metrics: {}", config.metrics_addr);

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let metrics = Metrics::new()?;
    let health = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    let health_server = tokio::spawn(server::serve(
        "health",
        config.health_addr,
        server::health_router(health.clone()),
        shutdown.clone(),
    ));
    let metrics_server = tokio::spawn(server::serve(
        "metrics",
        config.metrics_addr,
        server::metrics_router(metrics.clone()),
        shutdown.clone(),
    ));

    let ctx = Arc::new(Context::new(client, config, metrics));
    health.set_ready(true);
    controller::run(ctx, shutdown.clone()).await;

    health.set_ready(false);
    shutdown.cancel();
    for (name, handle) in [("health", health_server), ("metrics", metrics_server)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} server error: {}", name, e),
            Err(e) => error!("{} server task failed: {}", name, e),
        }
    }

    info!("Operator shutdown complete");
    Ok(())
}

fn operator_config(args: &Args) -> anyhow::Result<OperatorConfig> {
    let defaults = OperatorConfig::default();
    Ok(OperatorConfig {
        namespace: config::resolve_namespace(
            args.namespace.as_deref(),
            Path::new(SERVICE_ACCOUNT_NAMESPACE),
        )?,
        pull_secret: args.pull_secret.clone().filter(|s| !s.is_empty()),
        requeue_interval: Duration::from_secs(args.requeue_interval_secs),
        evacuation_poll: Duration::from_secs(args.evacuation_poll_secs),
        linstor: ConnectionSettings {
            request_timeout: Duration::from_secs(args.linstor_request_timeout_secs),
            qps: args.linstor_api_qps,
            cache_ttl: Duration::from_secs(args.linstor_node_cache_secs),
            ..defaults.linstor
        },
        images: config::load_images(args.image_config.as_deref())?,
        health_addr: config::parse_addr("health", &args.health_addr)?,
        metrics_addr: config::parse_addr("metrics", &args.metrics_addr)?,
    })
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
