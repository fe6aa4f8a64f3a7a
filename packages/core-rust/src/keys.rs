//! Store key derivation for rate limit counters, cached responses and
//! latency samples.

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

/// Which parts of a request identify a cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyScope {
    /// Method and path only. Every caller and every query string share one
    /// entry, which serves stale or another user's data on endpoints whose
    /// output depends on either.
    PathOnly,
    /// Method, path and normalized query string.
    PathAndQuery,
    /// Method, path, normalized query string and the authenticated principal.
    #[default]
    PerPrincipal,
}

impl CacheKeyScope {
    /// `true` for scopes that can mix up responses across users or queries.
    #[must_use]
    pub fn is_hazardous(self) -> bool {
        matches!(self, Self::PathOnly)
    }
}

/// `rate_limit:{scope}:{client}`
#[must_use]
pub fn rate_limit_key(scope: &str, client_key: &str) -> String {
    format!("rate_limit:{scope}:{client_key}")
}

/// `metrics:{METHOD}:{path}`
#[must_use]
pub fn metrics_key(method: &str, path: &str) -> String {
    format!("metrics:{method}:{path}")
}

/// `cache:{METHOD}:{path}[?{query}][#{principal}]`
#[must_use]
pub fn cache_key(ctx: &RequestContext, scope: CacheKeyScope) -> String {
    let mut key = format!("cache:{}:{}", ctx.method.as_str(), ctx.path);
    if scope == CacheKeyScope::PathOnly {
        return key;
    }
    if let Some(query) = ctx.query.as_deref() {
        let normalized = normalize_query(query);
        if !normalized.is_empty() {
            key.push('?');
            key.push_str(&normalized);
        }
    }
    if scope == CacheKeyScope::PerPrincipal {
        key.push('#');
        key.push_str(ctx.principal_id().unwrap_or("anonymous"));
    }
    key
}

/// Sorts query pairs so `a=1&b=2` and `b=2&a=1` map to the same key.
fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use http::Method;
    use proptest::prelude::*;

    use super::*;
    use crate::types::Principal;

    fn ctx(query: Option<&str>, principal: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new(Method::GET, "/api/workouts/analytics", "10.0.0.1");
        if let Some(q) = query {
            ctx = ctx.with_query(q);
        }
        if let Some(p) = principal {
            ctx.set_principal(Principal::new(p));
        }
        ctx
    }

    #[test]
    fn path_only_ignores_query_and_principal() {
        let a = cache_key(&ctx(Some("range=7d"), Some("1")), CacheKeyScope::PathOnly);
        let b = cache_key(&ctx(None, Some("2")), CacheKeyScope::PathOnly);
        assert_eq!(a, "cache:GET:/api/workouts/analytics");
        assert_eq!(a, b);
        assert!(CacheKeyScope::PathOnly.is_hazardous());
    }

    #[test]
    fn per_principal_separates_users() {
        let a = cache_key(&ctx(None, Some("1")), CacheKeyScope::PerPrincipal);
        let b = cache_key(&ctx(None, Some("2")), CacheKeyScope::PerPrincipal);
        assert_ne!(a, b);
        assert_eq!(a, "cache:GET:/api/workouts/analytics#1");
    }

    #[test]
    fn anonymous_callers_share_a_bucket() {
        let key = cache_key(&ctx(Some("x=1"), None), CacheKeyScope::PerPrincipal);
        assert_eq!(key, "cache:GET:/api/workouts/analytics?x=1#anonymous");
    }

    #[test]
    fn rate_limit_and_metrics_key_formats() {
        assert_eq!(rate_limit_key("register", "1.2.3.4"), "rate_limit:register:1.2.3.4");
        assert_eq!(metrics_key("GET", "/health"), "metrics:GET:/health");
    }

    proptest! {
        #[test]
        fn query_order_does_not_change_key(
            pairs in proptest::collection::vec("[a-z]{1,4}=[0-9]{1,3}", 1..6)
        ) {
            let forward = pairs.join("&");
            let mut reversed = pairs.clone();
            reversed.reverse();
            let backward = reversed.join("&");
            prop_assert_eq!(
                cache_key(&ctx(Some(&forward), Some("u")), CacheKeyScope::PathAndQuery),
                cache_key(&ctx(Some(&backward), Some("u")), CacheKeyScope::PathAndQuery)
            );
        }

        #[test]
        fn distinct_principals_never_collide(a in "[0-9]{1,6}", b in "[0-9]{1,6}") {
            prop_assume!(a != b);
            prop_assert_ne!(
                cache_key(&ctx(None, Some(&a)), CacheKeyScope::PerPrincipal),
                cache_key(&ctx(None, Some(&b)), CacheKeyScope::PerPrincipal)
            );
        }
    }
}
