//! FitSync API server.
//!
//! Every flag can also be set through its `FITSYNC_*` environment variable.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use fitsync_core::CacheKeyScope;
use fitsync_server::app::App;
use fitsync_server::network::{NetworkConfig, NetworkModule};
use fitsync_server::service::config::{FailurePolicy, StoreConfig};
use fitsync_server::service::ServerConfig;
use fitsync_server::storage;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    PathOnly,
    PathAndQuery,
    PerPrincipal,
}

impl From<ScopeArg> for CacheKeyScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::PathOnly => Self::PathOnly,
            ScopeArg::PathAndQuery => Self::PathAndQuery,
            ScopeArg::PerPrincipal => Self::PerPrincipal,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Open,
    Closed,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Open => Self::Open,
            PolicyArg::Closed => Self::Closed,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "fitsync-server", about = "FitSync API server", version)]
struct Args {
    #[arg(long, env = "FITSYNC_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "FITSYNC_PORT", default_value_t = 5000)]
    port: u16,

    /// Shared store; the in-memory store is used when unset (single instance only).
    #[arg(long, env = "FITSYNC_REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "FITSYNC_REDIS_POOL_SIZE", default_value_t = 16)]
    redis_pool_size: usize,

    /// Upper bound for a single store operation.
    #[arg(long, env = "FITSYNC_STORE_TIMEOUT_MS", default_value_t = 250)]
    store_timeout_ms: u64,

    #[arg(long, env = "FITSYNC_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    #[arg(long, env = "FITSYNC_CACHE_TTL_SECS", default_value_t = 300)]
    cache_ttl_secs: u64,

    #[arg(long, env = "FITSYNC_CACHE_SCOPE", value_enum, default_value_t = ScopeArg::PerPrincipal)]
    cache_scope: ScopeArg,

    /// What the rate limiters do when the store is unreachable.
    #[arg(long, env = "FITSYNC_RATE_LIMIT_ON_STORE_ERROR", value_enum, default_value_t = PolicyArg::Open)]
    rate_limit_on_store_error: PolicyArg,

    /// Latency samples kept per endpoint; at least 1.
    #[arg(
        long,
        env = "FITSYNC_METRICS_MAX_SAMPLES",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    metrics_max_samples: u64,

    #[arg(long, env = "FITSYNC_METRICS_RETENTION_SECS", default_value_t = 86_400)]
    metrics_retention_secs: u64,

    #[arg(long, env = "FITSYNC_BATCH_CONCURRENCY", default_value_t = 10)]
    batch_concurrency: usize,

    #[arg(long, env = "FITSYNC_BATCH_MAX_ITEMS", default_value_t = 1000)]
    batch_max_items: usize,

    #[arg(long, env = "FITSYNC_MAX_CONCURRENT_REQUESTS", default_value_t = 1000)]
    max_concurrent_requests: u32,

    #[arg(long, env = "FITSYNC_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Comma-separated allowed origins.
    #[arg(long, env = "FITSYNC_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Comma-separated proxy addresses whose `x-forwarded-for` is believed.
    #[arg(long, env = "FITSYNC_TRUSTED_PROXIES", value_delimiter = ',')]
    trusted_proxies: Vec<IpAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "FITSYNC_LOG_JSON")]
    log_json: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "FITSYNC_PROMETHEUS_ADDR")]
    prometheus_addr: Option<SocketAddr>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let policy = FailurePolicy::from(self.rate_limit_on_store_error);
        let mut config = ServerConfig {
            store: StoreConfig {
                redis_url: self.redis_url.clone(),
                pool_size: self.redis_pool_size,
                op_timeout: Duration::from_millis(self.store_timeout_ms),
            },
            max_concurrent_requests: self.max_concurrent_requests,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..defaults
        };
        config.auth.jwt_secret.clone_from(&self.jwt_secret);
        config.cache.ttl = Duration::from_secs(self.cache_ttl_secs);
        config.cache.scope = self.cache_scope.into();
        config.metrics.max_samples =
            usize::try_from(self.metrics_max_samples).unwrap_or(usize::MAX);
        config.metrics.retention = Duration::from_secs(self.metrics_retention_secs);
        config.batch.concurrency_limit = self.batch_concurrency;
        config.batch.max_items = self.batch_max_items;
        config.register_limit.on_store_error = policy;
        config.ai_limit.on_store_error = policy;
        config
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            // Backstop only; the pipeline's own deadline answers first.
            request_timeout: Duration::from_secs(self.request_timeout_secs + 5),
            ..NetworkConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(addr) = args.prometheus_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("failed to install prometheus exporter: {e}"))?;
        info!(%addr, "prometheus exporter listening");
    }

    let config = args.server_config();
    if config.auth.jwt_secret.len() < 32 {
        warn!("jwt secret is shorter than 32 bytes");
    }

    let store = storage::connect(&config.store).await?;
    let mut app = App::build(&config, store)?;

    let mut network = NetworkModule::new(args.network_config(), &app);
    let port = network.start().await?;
    info!(port, "fitsync server started");
    network.serve(shutdown_signal()).await?;

    if tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .is_err()
    {
        warn!("metrics writer did not stop in time; queued samples dropped");
    }
    info!("fitsync server stopped");
    Ok(())
}
