//! Protocol configuration
//!
//! Defaults suit mainnet peers; the take-offer timeout can be overridden via
//! the TRADE_PROTOCOL_TIMEOUT_SECS environment variable.

use std::env;
use std::time::Duration;

/// Time a peer has to answer the take-offer handshake.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const MIN_TIMEOUT_SECS: u64 = 5;

pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Buffered protocol events per trade before slow subscribers start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub timeout: Duration,
    pub event_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ProtocolConfig {
    /// Reads overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let secs = timeout_secs(env::var("TRADE_PROTOCOL_TIMEOUT_SECS").ok().as_deref());

        Self {
            timeout: Duration::from_secs(secs),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn timeout_secs(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse().ok())
        .map(|secs: u64| {
            if secs < MIN_TIMEOUT_SECS {
                tracing::warn!(
                    secs = secs,
                    min = MIN_TIMEOUT_SECS,
                    "TRADE_PROTOCOL_TIMEOUT_SECS below minimum, using minimum"
                );
                MIN_TIMEOUT_SECS
            } else if secs > MAX_TIMEOUT_SECS {
                tracing::warn!(
                    secs = secs,
                    max = MAX_TIMEOUT_SECS,
                    "TRADE_PROTOCOL_TIMEOUT_SECS above maximum, using maximum"
                );
                MAX_TIMEOUT_SECS
            } else {
                secs
            }
        })
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}
