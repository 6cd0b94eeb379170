//! # config
//!
//! Environment-driven gateway configuration. Every knob has a production
//! default; malformed values fall back rather than abort, so a bad deploy
//! manifest degrades to defaults instead of a crash loop.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Device-facing TCP listener (default 0.0.0.0:5000).
    pub listen_addr: String,
    /// Control-plane HTTP listener (default 0.0.0.0:5001, trusted loopback).
    pub control_addr: String,
    /// Hard cap on concurrent device connections; over-cap accepts are closed
    /// without a reply.
    pub max_connections: usize,
    /// Close a session after this long without a byte from the peer.
    pub read_idle_timeout: Duration,
    /// Per-write deadline for ACKs and outbound commands.
    pub write_timeout: Duration,
    /// How long a sent command waits for its Codec 12 response.
    pub response_timeout: Duration,
    /// Send attempts per command before a timeout becomes terminal.
    pub max_retries: u8,
    /// Base URL of the storage API.
    pub sink_url: String,
    /// Optional bearer token for the storage API.
    pub sink_token: Option<String>,
    pub sink_batch_size: usize,
    pub sink_batch_timeout: Duration,
    pub sink_queue_capacity: usize,
    /// When set, logs also go to a daily-rolling file in this directory.
    pub log_dir: Option<PathBuf>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:5000"),
            control_addr: env_or("CONTROL_ADDR", "0.0.0.0:5001"),
            max_connections: env_parse("MAX_CONNECTIONS", 100),
            read_idle_timeout: Duration::from_secs(env_parse("READ_IDLE_TIMEOUT_S", 120)),
            write_timeout: Duration::from_secs(env_parse("WRITE_TIMEOUT_S", 30)),
            response_timeout: Duration::from_secs(env_parse("RESPONSE_TIMEOUT_S", 15)),
            max_retries: env_parse("MAX_RETRIES", 3),
            sink_url: env_or("SINK_URL", "http://localhost:8000/api"),
            sink_token: std::env::var("SINK_TOKEN").ok().filter(|t| !t.is_empty()),
            sink_batch_size: env_parse("SINK_BATCH_SIZE", 50),
            sink_batch_timeout: Duration::from_secs(env_parse("SINK_BATCH_TIMEOUT_S", 5)),
            sink_queue_capacity: env_parse("SINK_QUEUE_CAPACITY", 1000),
            log_dir: std::env::var("LOG_DIR")
                .ok()
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
        }
    }
}

impl GatewayConfig {
    /// Fixed small configuration for unit tests: short timeouts, no file log.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".into(),
            control_addr: "127.0.0.1:0".into(),
            max_connections: 8,
            read_idle_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_millis(200),
            max_retries: 3,
            sink_url: "http://127.0.0.1:1/api".into(),
            sink_token: None,
            sink_batch_size: 4,
            sink_batch_timeout: Duration::from_millis(50),
            sink_queue_capacity: 16,
            log_dir: None,
        }
    }
}
