// Client configuration
// All sections deserialize with defaults so a partial document is enough

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ClientError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry_config: RetryConfig,
    pub cache_config: CacheConfig,
    pub queue_config: QueueConfig,
    pub realtime_config: RealtimeConfig,
    pub booking_policy: BookingPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_ms: 30_000,
            retry_config: RetryConfig::default(),
            cache_config: CacheConfig::default(),
            queue_config: QueueConfig::default(),
            realtime_config: RealtimeConfig::default(),
            booking_policy: BookingPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::ConfigError("base_url must not be empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.cache_config.ttl_seconds == 0 {
            return Err(ClientError::ConfigError(
                "cache ttl_seconds must be greater than zero".to_string(),
            ));
        }
        if self.queue_config.max_retries == 0 {
            return Err(ClientError::ConfigError(
                "queue max_retries must be greater than zero".to_string(),
            ));
        }
        if self.booking_policy.max_stay_nights == 0 {
            return Err(ClientError::ConfigError(
                "max_stay_nights must be greater than zero".to_string(),
            ));
        }
        if self.retry_config.backoff_multiplier < 1.0 {
            return Err(ClientError::ConfigError(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

// HTTP retry policy: exponential backoff with jitter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 15 * 60 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    // Failed replays allowed before an operation is dead-lettered
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    // ws:// or wss:// endpoint; None disables the socket entirely
    pub url: Option<String>,
    pub namespace: String,
    pub connect_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: None,
            namespace: "reservations".to_string(),
            connect_timeout_ms: 10_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingPolicy {
    pub max_stay_nights: u32,
    pub tax_rate: f64,
    pub flat_fee: f64,
    pub max_amount: f64,
    pub currency: String,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            max_stay_nights: 30,
            tax_rate: 0.0,
            flat_fee: 0.0,
            max_amount: 999_999.99,
            currency: "USD".to_string(),
        }
    }
}
