//! Read-through response cache.
//!
//! Only reads (`GET`, `HEAD`) touch the cache. A hit answers from the store
//! without calling anything further down the chain; a miss runs the chain and
//! stores the response when it is a `200`. Store trouble never fails the
//! request: lookups degrade to misses and writes are skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use fitsync_core::keys::cache_key;
use fitsync_core::{CacheKeyScope, CounterStore, PipelineResponse};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::service::config::CacheConfig;
use crate::service::operation::{PipelineError, PipelineFuture, PipelineRequest};

// ---------------------------------------------------------------------------
// CachedResponse
// ---------------------------------------------------------------------------

/// Serialized form of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    /// Base64 of the exact response body.
    pub body: String,
    pub stored_at_ms: u64,
}

impl CachedResponse {
    #[must_use]
    pub fn from_response(resp: &PipelineResponse) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let stored_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Self {
            status: resp.status.as_u16(),
            content_type: resp.content_type.clone(),
            body: BASE64.encode(&resp.body),
            stored_at_ms,
        }
    }

    /// Rebuilds the response.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the entry is not a valid
    /// status or base64 body.
    pub fn into_response(self) -> Result<PipelineResponse, String> {
        let status = StatusCode::from_u16(self.status).map_err(|e| e.to_string())?;
        let body = BASE64.decode(self.body.as_bytes()).map_err(|e| e.to_string())?;
        Ok(PipelineResponse::new(status, self.content_type, body))
    }
}

// ---------------------------------------------------------------------------
// CacheStats
// ---------------------------------------------------------------------------

/// Process-local cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    #[must_use]
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        CacheStatsSnapshot {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

/// Cache operations over the shared store.
pub struct ResponseCache {
    store: Arc<dyn CounterStore>,
    stats: Arc<CacheStats>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            stats: Arc::new(CacheStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Fetches a cached response. Store errors and corrupt entries read as misses.
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.miss();
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache lookup failed, treating as miss");
                self.error();
                self.miss();
                return None;
            }
        };

        match serde_json::from_slice::<CachedResponse>(&raw) {
            Ok(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("fitsync_cache_hits_total").increment(1);
                Some(entry)
            }
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry, treating as miss");
                self.error();
                self.miss();
                None
            }
        }
    }

    /// Writes `resp` under `key` for `ttl`. Returns `false` if the write was skipped.
    pub async fn store(&self, key: &str, resp: &PipelineResponse, ttl: Duration) -> bool {
        let entry = CachedResponse::from_response(resp);
        let encoded = match serde_json::to_vec(&entry) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                warn!(key, error = %e, "failed to encode cache entry");
                self.error();
                return false;
            }
        };
        match self.store.set_with_ttl(key, encoded, ttl).await {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(key, error = %e, "cache write failed, skipping");
                self.error();
                false
            }
        }
    }

    fn miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fitsync_cache_misses_total").increment(1);
    }

    fn error(&self) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fitsync_cache_errors_total").increment(1);
    }
}

// ---------------------------------------------------------------------------
// CacheLayer
// ---------------------------------------------------------------------------

/// Tower layer that serves reads from [`ResponseCache`].
///
/// With the default [`CacheKeyScope::PerPrincipal`] scope it must sit after
/// the authentication gate so the principal is part of the key.
#[derive(Clone)]
pub struct CacheLayer {
    cache: Arc<ResponseCache>,
    config: CacheConfig,
}

impl CacheLayer {
    #[must_use]
    pub fn new(cache: Arc<ResponseCache>, config: CacheConfig) -> Self {
        if config.scope.is_hazardous() {
            warn!(
                scope = ?config.scope,
                "cache keyed by path only: every caller and query string shares one entry"
            );
        }
        Self { cache, config }
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            cache: Arc::clone(&self.cache),
            ttl: self.config.ttl,
            scope: self.config.scope,
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S> {
    inner: S,
    cache: Arc<ResponseCache>,
    ttl: Duration,
    scope: CacheKeyScope,
}

impl<S> Service<PipelineRequest> for CacheService<S>
where
    S: Service<PipelineRequest, Response = PipelineResponse, Error = PipelineError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = PipelineResponse;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PipelineRequest) -> Self::Future {
        if !req.ctx.is_read() {
            return Box::pin(self.inner.call(req));
        }

        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let cache = Arc::clone(&self.cache);
        let ttl = self.ttl;
        let key = cache_key(&req.ctx, self.scope);

        Box::pin(async move {
            if let Some(entry) = cache.lookup(&key).await {
                match entry.into_response() {
                    Ok(resp) => {
                        debug!(key = %key, "cache hit");
                        return Ok(resp.with_header("x-cache", "hit"));
                    }
                    Err(reason) => warn!(key = %key, reason = %reason, "undecodable cache entry"),
                }
            }

            let mut resp = inner.oneshot(req).await?;
            if resp.is_ok() {
                cache.store(&key, &resp, ttl).await;
            }
            resp.insert_header("x-cache", "miss");
            Ok(resp)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use fitsync_core::{Principal, RequestContext};
    use http::Method;

    use super::*;
    use crate::storage::testing::DownStore;
    use crate::storage::MemoryCounterStore;

    /// Handler stand-in that counts calls and answers with a fixed status.
    #[derive(Clone)]
    struct CountingService {
        calls: Arc<AtomicU32>,
        status: StatusCode,
    }

    impl Service<PipelineRequest> for CountingService {
        type Response = PipelineResponse;
        type Error = PipelineError;
        type Future = PipelineFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: PipelineRequest) -> Self::Future {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self.status;
            Box::pin(async move {
                Ok(PipelineResponse::new(
                    status,
                    "application/json",
                    format!("{{\"call\":{n}}}"),
                ))
            })
        }
    }

    fn counting(status: StatusCode) -> (CountingService, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            CountingService {
                calls: Arc::clone(&calls),
                status,
            },
            calls,
        )
    }

    fn get(user: &str) -> PipelineRequest {
        let mut ctx = RequestContext::new(Method::GET, "/api/workouts/analytics", "c")
            .with_query("range=7d");
        ctx.set_principal(Principal::new(user));
        PipelineRequest::new(ctx, "")
    }

    fn layer(store: Arc<dyn CounterStore>, scope: CacheKeyScope) -> (CacheLayer, Arc<CacheStats>) {
        let cache = Arc::new(ResponseCache::new(store));
        let stats = cache.stats();
        let config = CacheConfig {
            ttl: Duration::from_secs(300),
            scope,
        };
        (CacheLayer::new(cache, config), stats)
    }

    #[tokio::test(start_paused = true)]
    async fn second_read_is_served_from_cache() {
        let (layer, stats) = layer(Arc::new(MemoryCounterStore::new()), CacheKeyScope::PerPrincipal);
        let (svc, calls) = counting(StatusCode::OK);
        let svc = layer.layer(svc);

        let first = svc.clone().oneshot(get("u1")).await.unwrap();
        let second = svc.oneshot(get("u1")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.headers.get("x-cache").unwrap(), "miss");
        assert_eq!(second.headers.get("x-cache").unwrap(), "hit");
        assert_eq!(first.body, second.body);
        assert_eq!(second.content_type, "application/json");

        let snapshot = stats.snapshot();
        assert_eq!((snapshot.hits, snapshot.misses, snapshot.writes), (1, 1, 1));
        assert!((snapshot.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let (layer, _) = layer(Arc::new(MemoryCounterStore::new()), CacheKeyScope::PerPrincipal);
        let (svc, calls) = counting(StatusCode::OK);
        let svc = layer.layer(svc);

        svc.clone().oneshot(get("u1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        svc.oneshot(get("u1")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn principals_do_not_share_entries() {
        let (layer, _) = layer(Arc::new(MemoryCounterStore::new()), CacheKeyScope::PerPrincipal);
        let (svc, calls) = counting(StatusCode::OK);
        let svc = layer.layer(svc);

        svc.clone().oneshot(get("u1")).await.unwrap();
        let other = svc.oneshot(get("u2")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(other.headers.get("x-cache").unwrap(), "miss");
    }

    #[tokio::test(start_paused = true)]
    async fn path_only_scope_shares_across_principals() {
        let (layer, _) = layer(Arc::new(MemoryCounterStore::new()), CacheKeyScope::PathOnly);
        let (svc, calls) = counting(StatusCode::OK);
        let svc = layer.layer(svc);

        svc.clone().oneshot(get("u1")).await.unwrap();
        svc.oneshot(get("u2")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_ok_responses_are_not_stored() {
        let (layer, stats) = layer(Arc::new(MemoryCounterStore::new()), CacheKeyScope::PerPrincipal);
        let (svc, calls) = counting(StatusCode::ACCEPTED);
        let svc = layer.layer(svc);

        svc.clone().oneshot(get("u1")).await.unwrap();
        svc.oneshot(get("u1")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().writes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_bypass_the_cache() {
        let (layer, stats) = layer(Arc::new(MemoryCounterStore::new()), CacheKeyScope::PerPrincipal);
        let (svc, calls) = counting(StatusCode::OK);
        let svc = layer.layer(svc);

        let post = || {
            PipelineRequest::new(
                RequestContext::new(Method::POST, "/api/workouts/generate", "c"),
                "{}",
            )
        };
        let resp = svc.clone().oneshot(post()).await.unwrap();
        svc.oneshot(post()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(resp.headers.get("x-cache").is_none());
        assert_eq!(stats.snapshot().misses, 0);
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_miss() {
        let (layer, stats) = layer(Arc::new(DownStore), CacheKeyScope::PerPrincipal);
        let (svc, calls) = counting(StatusCode::OK);
        let svc = layer.layer(svc);

        let resp = svc.oneshot(get("u1")).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.errors, 2); // failed lookup and failed write
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_entry_is_a_miss() {
        let store = Arc::new(MemoryCounterStore::new());
        let cache = ResponseCache::new(store.clone());
        store
            .set_with_ttl("cache:GET:/x", Bytes::from_static(b"not json"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.lookup("cache:GET:/x").await.is_none());
        assert_eq!(cache.stats().snapshot().errors, 1);
    }

    #[test]
    fn cached_body_is_byte_identical() {
        let body: Vec<u8> = (0..=255).collect();
        let resp = PipelineResponse::new(StatusCode::OK, "application/octet-stream", body.clone());
        let restored = CachedResponse::from_response(&resp).into_response().unwrap();
        assert_eq!(&restored.body[..], &body[..]);
        assert_eq!(restored.content_type, "application/octet-stream");
    }
}
