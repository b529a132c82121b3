#[derive(Clone, Debug)]
pub struct Config {
    pub registry_base: String,
    pub poll_active_secs: u64,
    pub poll_idle_secs: u64,
    pub poll_error_secs: u64,
    pub http_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            registry_base: std::env::var("REGISTRY_BASE")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            poll_active_secs: std::env::var("POLL_ACTIVE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(3),
            poll_idle_secs: std::env::var("POLL_IDLE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            poll_error_secs: std::env::var("POLL_ERROR_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(15),
            http_timeout_ms: std::env::var("HTTP_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(10_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_base: "http://127.0.0.1:8090".to_string(),
            poll_active_secs: 3,
            poll_idle_secs: 10,
            poll_error_secs: 15,
            http_timeout_ms: 10_000,
        }
    }
}
