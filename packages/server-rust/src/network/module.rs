//! HTTP server with deferred startup.
//!
//! `new()` wires shared state, `start()` binds the listener and `serve()`
//! accepts connections until the shutdown future resolves. Splitting bind
//! from serve lets callers learn the OS-assigned port before traffic flows.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    api_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::app::App;

/// Owns the listener and the state shared by all handlers.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    /// Captures the application's route table and store without binding.
    #[must_use]
    pub fn new(config: NetworkConfig, app: &App) -> Self {
        let state = AppState {
            routes: app.routes(),
            store: app.store(),
            cache_stats: app.cache_stats(),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(config.clone()),
            api_timeout: app.request_timeout(),
            start_time: Instant::now(),
        };
        Self {
            config,
            listener: None,
            state,
        }
    }

    /// Shared shutdown controller, for health checks and external triggers.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Router with all routes and the transport stack.
    ///
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - any method on `/api/*`, dispatched through the route table
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/api/{*rest}", any(api_handler))
            .layer(build_http_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the listener and returns the actual port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    ///
    /// Once the signal fires the health state moves to `Draining`, so new
    /// API requests are refused with `503` while accepted ones finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.state.shutdown);

        let signal_controller = Arc::clone(&controller);
        let signal = async move {
            shutdown.await;
            info!("shutdown signal received, draining");
            signal_controller.trigger_shutdown();
        };

        controller.set_ready();
        info!("serving HTTP");
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await?;

        // Covers a server error exit as well as the signalled one.
        controller.trigger_shutdown();
        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("all requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::service::ServerConfig;
    use crate::storage::MemoryCounterStore;

    async fn module() -> (NetworkModule, App) {
        let app = App::build(&ServerConfig::default(), Arc::new(MemoryCounterStore::new()))
            .expect("app builds");
        (NetworkModule::new(NetworkConfig::default(), &app), app)
    }

    #[tokio::test]
    async fn new_does_not_bind() {
        let (module, _app) = module().await;
        assert!(module.listener.is_none());
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let (mut module, _app) = module().await;
        let port = module.start().await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let (module, _app) = module().await;
        let err = module.serve(std::future::ready(())).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn unknown_api_route_is_structured_404() {
        let (module, _app) = module().await;
        let resp = module
            .build_router()
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["reason"], "not_found");
    }

    #[tokio::test]
    async fn draining_server_refuses_api_requests() {
        let (module, _app) = module().await;
        module.shutdown_controller().trigger_shutdown();
        let resp = module
            .build_router()
            .oneshot(
                Request::post("/api/ai/chat")
                    .body(Body::from(r#"{"message":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn serve_stops_on_signal() {
        let (mut module, _app) = module().await;
        module.start().await.unwrap();
        let controller = module.shutdown_controller();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(module.serve(async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(controller.health_state(), crate::network::HealthState::Stopped);
    }
}
