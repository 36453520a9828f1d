//! Runtime configuration for the mesh and the signaling relay

use std::time::Duration;

use crate::signaling::DEFAULT_SIGNALING_PORT;

const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CANDIDATE_BUFFER: usize = 16;
const DEFAULT_CANDIDATE_RETENTION: Duration = Duration::from_secs(10);
const DEFAULT_SESSION_QUEUE: usize = 64;

/// Tunables for one mesh manager.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// A session still negotiating after this long is dropped
    pub negotiation_timeout: Duration,
    /// Early candidates kept per unknown peer; oldest evicted first
    pub candidate_buffer_capacity: usize,
    /// How long an early candidate waits for its session
    pub candidate_retention: Duration,
    /// Work a session may have queued before its peer counts as stalled
    pub session_queue_capacity: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            candidate_buffer_capacity: DEFAULT_CANDIDATE_BUFFER,
            candidate_retention: DEFAULT_CANDIDATE_RETENTION,
            session_queue_capacity: DEFAULT_SESSION_QUEUE,
        }
    }
}

impl MeshConfig {
    /// Defaults overridden by `SHOAL_NEGOTIATION_TIMEOUT_SECS`,
    /// `SHOAL_CANDIDATE_BUFFER`, `SHOAL_CANDIDATE_RETENTION_SECS` and
    /// `SHOAL_SESSION_QUEUE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            negotiation_timeout: env_parse::<u64>("SHOAL_NEGOTIATION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.negotiation_timeout),
            candidate_buffer_capacity: env_parse::<usize>("SHOAL_CANDIDATE_BUFFER")
                .unwrap_or(defaults.candidate_buffer_capacity),
            candidate_retention: env_parse::<u64>("SHOAL_CANDIDATE_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.candidate_retention),
            session_queue_capacity: env_parse::<usize>("SHOAL_SESSION_QUEUE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.session_queue_capacity),
        }
    }
}

/// Signaling relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("SHOAL_SIGNALING_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Self::default().bind_addr);
        Self { bind_addr }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
