//! Recognized configuration keys (§6.2). This is a plain, serde-deserializable
//! shape; reading it from a TOML/JSON/env source is left to the embedder —
//! config-file parsing is explicitly out of scope (§1).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::BreakerConfig;
use crate::dispatcher::TokenModePreference;
use crate::rate_limiter::TierConfig;
use crate::tool::FilterSpec;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    pub tiers: HashMap<String, TierSettings>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TierSettings {
    pub capacity: f64,
    #[serde(rename = "refillTokens")]
    pub refill_tokens: f64,
    #[serde(rename = "intervalMs")]
    pub interval_ms: u64,
}

impl From<TierSettings> for TierConfig {
    fn from(s: TierSettings) -> Self {
        TierConfig::new(s.capacity, s.refill_tokens, s.interval_ms)
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        let mut tiers = HashMap::new();
        tiers.insert(
            "default".to_string(),
            TierSettings { capacity: 100.0, refill_tokens: 50.0, interval_ms: 60_000 },
        );
        tiers.insert(
            "read".to_string(),
            TierSettings { capacity: 200.0, refill_tokens: 100.0, interval_ms: 60_000 },
        );
        tiers.insert(
            "write".to_string(),
            TierSettings { capacity: 20.0, refill_tokens: 10.0, interval_ms: 60_000 },
        );
        tiers.insert(
            "admin".to_string(),
            TierSettings { capacity: 5.0, refill_tokens: 2.0, interval_ms: 60_000 },
        );
        Self {
            enabled: true,
            tiers,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    #[serde(rename = "defaultTTLms")]
    pub default_ttl_ms: u64,
    #[serde(default, rename = "perCategoryTTLms")]
    pub per_category_ttl_ms: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_ms: Duration::from_secs(5 * 60).as_millis() as u64,
            per_category_ttl_ms: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub volume_threshold: u32,
    pub error_rate_threshold: f64,
    pub slow_call_duration_ms: u64,
    pub slow_call_rate_threshold: f64,
}

impl From<BreakerSettings> for BreakerConfig {
    fn from(s: BreakerSettings) -> Self {
        BreakerConfig {
            failure_threshold: s.failure_threshold,
            success_threshold: s.success_threshold,
            timeout: Duration::from_millis(s.timeout_ms),
            volume_threshold: s.volume_threshold,
            error_rate_threshold: s.error_rate_threshold,
            slow_call_duration: Duration::from_millis(s.slow_call_duration_ms),
            slow_call_rate_threshold: s.slow_call_rate_threshold,
            window_size: 20,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            volume_threshold: 10,
            error_rate_threshold: 0.5,
            slow_call_duration_ms: 5_000,
            slow_call_rate_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    pub default: BreakerSettings,
    #[serde(default)]
    pub per_tool: HashMap<String, BreakerSettings>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            default: BreakerSettings::default(),
            per_tool: HashMap::new(),
        }
    }
}

fn default_token_mode() -> TokenModePreference {
    TokenModePreference::Auto
}

/// The full set of recognized configuration keys (§6.2). `tools` carries
/// the raw filter spec; resolving it against declared descriptors happens
/// in [`crate::tool::ToolRegistryBuilder::finalize`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigOptions {
    pub app_id: String,
    pub app_secret: String,
    #[serde(default)]
    pub user_access_token: Option<String>,
    pub domain: String,
    #[serde(skip)]
    pub tools: Option<FilterSpec>,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default = "default_token_mode", skip)]
    pub token_mode: TokenModePreference,
}
