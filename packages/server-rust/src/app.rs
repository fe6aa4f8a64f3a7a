//! Wires the guards, handlers and route table for the FitSync API.

use std::sync::Arc;
use std::time::Duration;

use fitsync_core::CounterStore;
use http::Method;
use tracing::info;

use crate::service::config::ServerConfig;
use crate::service::domain::{
    AnalyticsHandler, BulkProcessHandler, ChatHandler, GenerateWorkoutHandler, RegisterHandler,
    SimulatedWork,
};
use crate::service::middleware::cache::CacheStats;
use crate::service::middleware::metrics::SampleWriter;
use crate::service::middleware::{
    AuthLayer, CacheLayer, JwtAuthenticator, LoadShedLayer, MetricsLayer, MetricsRecorder,
    PipelineBuilder, RateLimitLayer, RateLimiter, ResponseCache, TimeoutLayer,
};
use crate::service::{BackgroundWorker, BatchExecutor, RouteTable};

pub const REGISTER_PATH: &str = "/api/auth/register";
pub const ANALYTICS_PATH: &str = "/api/workouts/analytics";
pub const GENERATE_PATH: &str = "/api/workouts/generate";
pub const CHAT_PATH: &str = "/api/ai/chat";
pub const BULK_PATH: &str = "/api/bulk/process";

/// The assembled application: one pipeline per route over a shared store.
///
/// Every pipeline starts with the same outer guards (metrics, load shedding,
/// deadline); the route-specific guards follow in the order listed in
/// [`App::build`].
pub struct App {
    routes: Arc<RouteTable>,
    store: Arc<dyn CounterStore>,
    cache_stats: Arc<CacheStats>,
    request_timeout: Duration,
    metrics_worker: BackgroundWorker<SampleWriter>,
}

impl App {
    /// Builds every pipeline. Must run inside a Tokio runtime because the
    /// metrics writer is spawned here.
    ///
    /// | Route | Guards after the common ones |
    /// |---|---|
    /// | `POST /api/auth/register` | rate limit `register` |
    /// | `GET /api/workouts/analytics` | auth, response cache |
    /// | `POST /api/workouts/generate` | auth |
    /// | `POST /api/ai/chat` | auth, rate limit `ai` |
    /// | `POST /api/bulk/process` | auth |
    ///
    /// # Errors
    ///
    /// Fails if the metrics writer cannot be started.
    pub fn build(config: &ServerConfig, store: Arc<dyn CounterStore>) -> anyhow::Result<Self> {
        let jwt = Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret));
        let auth = AuthLayer::new(jwt.clone());

        let cache = Arc::new(ResponseCache::new(Arc::clone(&store)));
        let cache_stats = cache.stats();

        let (recorder, metrics_worker) = MetricsRecorder::start(Arc::clone(&store), config.metrics)?;
        let metrics = MetricsLayer::new(recorder.clone());
        // One semaphore shared by every route.
        let load_shed = LoadShedLayer::new(config.max_concurrent_requests);

        let register_limit = RateLimitLayer::new(Arc::new(RateLimiter::new(
            Arc::clone(&store),
            "register",
            config.register_limit,
        )));
        let ai_limit = RateLimitLayer::new(Arc::new(RateLimiter::new(
            Arc::clone(&store),
            "ai",
            config.ai_limit,
        )));

        let common = |name: &str| {
            PipelineBuilder::new(name)
                .guard(metrics.clone())
                .guard(load_shed.clone())
                .guard(TimeoutLayer)
        };

        let reported_endpoints = vec![
            (Method::POST, REGISTER_PATH.to_string()),
            (Method::POST, GENERATE_PATH.to_string()),
            (Method::POST, CHAT_PATH.to_string()),
            (Method::POST, BULK_PATH.to_string()),
        ];

        let mut routes = RouteTable::new();
        routes.register(
            Method::POST,
            REGISTER_PATH,
            common("register")
                .guard(register_limit)
                .handler(Arc::new(RegisterHandler::new(jwt))),
        );
        routes.register(
            Method::GET,
            ANALYTICS_PATH,
            common("analytics")
                .guard(auth.clone())
                .guard(CacheLayer::new(cache, config.cache))
                .handler(Arc::new(AnalyticsHandler::new(recorder, reported_endpoints))),
        );
        routes.register(
            Method::POST,
            GENERATE_PATH,
            common("generate")
                .guard(auth.clone())
                .handler(Arc::new(GenerateWorkoutHandler::new(Arc::clone(&store)))),
        );
        routes.register(
            Method::POST,
            CHAT_PATH,
            common("chat")
                .guard(auth.clone())
                .guard(ai_limit)
                .handler(Arc::new(ChatHandler)),
        );
        routes.register(
            Method::POST,
            BULK_PATH,
            common("bulk").guard(auth).handler(Arc::new(BulkProcessHandler::new(
                BatchExecutor::new(config.batch),
                Arc::new(SimulatedWork::new(config.batch.item_delay)),
            ))),
        );

        for (method, path, pipeline) in routes.routes() {
            info!(%method, path = %path, pipeline = %pipeline, "route registered");
        }

        Ok(Self {
            routes: Arc::new(routes),
            store,
            cache_stats,
            request_timeout: config.request_timeout,
            metrics_worker,
        })
    }

    #[must_use]
    pub fn routes(&self) -> Arc<RouteTable> {
        Arc::clone(&self.routes)
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn cache_stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.cache_stats)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Flushes queued latency samples and stops the metrics writer.
    pub async fn shutdown(&mut self) {
        self.metrics_worker.stop().await;
        info!("metrics writer stopped");
    }
}
