//! HTTP server configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many requests a single client may make within a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests: u32,
    pub window_secs: u64,
}

impl RateLimit {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Configuration for the HTTP API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind, e.g. `[::]:3001` or `127.0.0.1:3001`
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Origins allowed by CORS. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Largest accepted request body. Attachments travel base64-encoded
    /// inside the JSON, so this bounds them too.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Applies to `/api/send-email` and `/api/send-bulk-email` together.
    #[serde(default = "default_send_rate_limit")]
    pub send_rate_limit: RateLimit,

    /// Applies to `/api/test-smtp`.
    #[serde(default = "default_verify_rate_limit")]
    pub verify_rate_limit: RateLimit,
}

fn default_listen_address() -> String {
    "[::]:3001".to_string()
}

const fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

const fn default_send_rate_limit() -> RateLimit {
    RateLimit {
        requests: 100,
        window_secs: 15 * 60,
    }
}

const fn default_verify_rate_limit() -> RateLimit {
    RateLimit {
        requests: 10,
        window_secs: 5 * 60,
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            allowed_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            send_rate_limit: default_send_rate_limit(),
            verify_rate_limit: default_verify_rate_limit(),
        }
    }
}
