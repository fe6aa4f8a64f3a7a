//! HTTP listener configuration.

use std::net::IpAddr;
use std::time::Duration;

/// Settings for the HTTP boundary in front of the route table.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Transport-level backstop; requests still running after this get `408`.
    ///
    /// Keep it above the pipeline deadline so the pipeline's own `504` wins.
    pub request_timeout: Duration,
    /// Largest request body accepted by the API handler.
    pub max_body_bytes: usize,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
    /// Peers whose `x-forwarded-for` header names the real client.
    ///
    /// Empty means the socket peer is always the client identity.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(35),
            max_body_bytes: 1024 * 1024,
            drain_timeout: Duration::from_secs(30),
            trusted_proxies: Vec::new(),
        }
    }
}
