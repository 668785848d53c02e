//! Process configuration (ambient), loaded once at startup the way the
//! teacher's `models::Config::from_env` does: `.env` + `std::env::var` with
//! sane defaults, never a panic on a missing optional.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub http_port: u16,
    pub institutional_user_agent: String,
    pub profile_registry_path: String,

    pub broker_url: Option<String>,
    pub kv_store_url: Option<String>,

    pub fast_pool_concurrency: usize,
    pub render_pool_concurrency: usize,
    pub deep_pool_concurrency: usize,

    pub fast_pool_timeout: Duration,
    pub render_pool_timeout: Duration,
    pub deep_pool_timeout: Duration,

    /// Gating timeouts (§4.8, §5): independent of transport timeouts.
    pub fast_gate_timeout: Duration,
    pub render_gate_timeout: Duration,

    pub quarantine_ttl: Duration,
    pub hot_score_threshold: f64,

    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown: Duration,

    pub deferred_merge_interval: Duration,
    pub near_dup_simhash_threshold: u32,
    pub same_event_time_window: Duration,

    pub alert_cooldown: Duration,

    /// Documents/minute above which velocity counts as "extreme" for the
    /// UNVERIFIED_VIRAL override (§4.8).
    pub viral_velocity_threshold: f64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            database_path: env_or_string("DATABASE_PATH", "./pautaradar.db"),
            http_port: env_or("HTTP_PORT", 8080u16),
            institutional_user_agent: env_or_string(
                "INSTITUTIONAL_USER_AGENT",
                "PautaRadarBot/1.0 (+https://example.invalid/bot)",
            ),
            profile_registry_path: env_or_string(
                "PROFILE_REGISTRY_PATH",
                "./source_profiles.json",
            ),

            broker_url: env::var("BROKER_URL").ok(),
            kv_store_url: env::var("KV_STORE_URL").ok(),

            fast_pool_concurrency: env_or("FAST_POOL_CONCURRENCY", 16usize),
            render_pool_concurrency: env_or("RENDER_POOL_CONCURRENCY", 4usize),
            deep_pool_concurrency: env_or("DEEP_POOL_CONCURRENCY", 2usize),

            fast_pool_timeout: Duration::from_secs(env_or("FAST_POOL_TIMEOUT_SECS", 5u64)),
            render_pool_timeout: Duration::from_secs(env_or("RENDER_POOL_TIMEOUT_SECS", 30u64)),
            deep_pool_timeout: Duration::from_secs(env_or("DEEP_POOL_TIMEOUT_SECS", 300u64)),

            fast_gate_timeout: Duration::from_secs(env_or("FAST_GATE_TIMEOUT_SECS", 15u64)),
            render_gate_timeout: Duration::from_secs(env_or("RENDER_GATE_TIMEOUT_SECS", 45u64)),

            quarantine_ttl: Duration::from_secs(env_or("QUARANTINE_TTL_SECS", 15 * 60u64)),
            hot_score_threshold: env_or("HOT_SCORE_THRESHOLD", 0.75f64),

            circuit_breaker_failure_threshold: env_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5u32),
            circuit_breaker_cooldown: Duration::from_secs(env_or(
                "CIRCUIT_BREAKER_COOLDOWN_SECS",
                120u64,
            )),

            deferred_merge_interval: Duration::from_secs(env_or(
                "DEFERRED_MERGE_INTERVAL_SECS",
                60u64,
            )),
            near_dup_simhash_threshold: env_or("NEAR_DUP_HAMMING_THRESHOLD", 6u32),
            same_event_time_window: Duration::from_secs(env_or(
                "SAME_EVENT_TIME_WINDOW_SECS",
                6 * 3600u64,
            )),

            alert_cooldown: Duration::from_secs(env_or("ALERT_COOLDOWN_SECS", 600u64)),

            viral_velocity_threshold: env_or("VIRAL_VELOCITY_THRESHOLD", 5.0f64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_env() {
        // Config::from_env should never panic on a fully empty environment.
        let cfg = Config {
            database_path: "x".into(),
            http_port: 0,
            institutional_user_agent: "x".into(),
            profile_registry_path: "x".into(),
            broker_url: None,
            kv_store_url: None,
            fast_pool_concurrency: 1,
            render_pool_concurrency: 1,
            deep_pool_concurrency: 1,
            fast_pool_timeout: Duration::from_secs(1),
            render_pool_timeout: Duration::from_secs(1),
            deep_pool_timeout: Duration::from_secs(1),
            fast_gate_timeout: Duration::from_secs(15),
            render_gate_timeout: Duration::from_secs(45),
            quarantine_ttl: Duration::from_secs(900),
            hot_score_threshold: 0.75,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(120),
            deferred_merge_interval: Duration::from_secs(60),
            near_dup_simhash_threshold: 6,
            same_event_time_window: Duration::from_secs(6 * 3600),
            alert_cooldown: Duration::from_secs(600),
            viral_velocity_threshold: 5.0,
        };
        assert_eq!(cfg.fast_gate_timeout, Duration::from_secs(15));
        assert_eq!(cfg.render_gate_timeout, Duration::from_secs(45));
    }
}
