//! C1 — Source Profile Registry (§4.1, §6).
//!
//! Loads each source's fetch-policy record, validates the minimum contract,
//! and enriches it with the canonical Source fields. Invalid profiles are
//! logged and skipped rather than aborting the process, the same posture
//! the teacher's `DataSourceKillSwitch` takes toward a misconfigured source.

use crate::model::{Pool, Source, Strategy, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cadence {
    pub interval_seconds: Option<u64>,
    pub cron: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub rate_limit_req_per_min: u32,
    pub concurrency_per_domain: u32,
    pub timeout_seconds: u64,
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Observability {
    pub starvation_window_hours: Option<f64>,
    pub yield_keys: Option<Vec<String>>,
    pub baseline_rolling: Option<u32>,
    pub calendar_profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Endpoints {
    pub feed: Option<String>,
    pub latest: Option<String>,
    pub search: Option<String>,
    pub api: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StrategyMetadata {
    pub spa_api_contract: Option<serde_json::Value>,
    pub spa_api_request: Option<serde_json::Value>,
    pub headless_capture: Option<serde_json::Value>,
}

/// The raw, on-disk ingestion contract (§6) before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSourceProfile {
    pub source_id: String,
    pub source_domain: String,
    pub tier: u8,
    pub is_official: bool,
    pub lang: String,
    pub pool: String,
    pub strategy: String,
    pub endpoints: Endpoints,
    pub headers: HashMap<String, String>,
    pub cadence: Cadence,
    pub limits: Limits,
    pub observability: Observability,
    #[serde(default)]
    pub metadata: StrategyMetadata,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A validated, registry-resident profile: the raw contract plus the
/// canonical database fields the registry enriches it with (§4.1).
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub source: Source,
    pub endpoints: Endpoints,
    pub headers: HashMap<String, String>,
    pub cadence: Cadence,
    pub limits: Limits,
    pub observability: Observability,
    pub metadata: StrategyMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileValidationError {
    #[error("missing or invalid tier (must be 1, 2 or 3): {0}")]
    BadTier(u8),
    #[error("unknown pool: {0}")]
    UnknownPool(String),
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("headers missing institutional User-Agent")]
    MissingUserAgent,
    #[error("cadence must declare interval_seconds or cron")]
    MissingCadence,
}

fn parse_pool(s: &str) -> Result<Pool, ProfileValidationError> {
    match s {
        "FAST_POOL" => Ok(Pool::FastPool),
        "HEAVY_RENDER_POOL" => Ok(Pool::HeavyRenderPool),
        "DEEP_EXTRACT_POOL" => Ok(Pool::DeepExtractPool),
        other => Err(ProfileValidationError::UnknownPool(other.to_string())),
    }
}

fn parse_strategy(s: &str) -> Result<Strategy, ProfileValidationError> {
    match s {
        "RSS" => Ok(Strategy::Rss),
        "HTML" => Ok(Strategy::Html),
        "API" => Ok(Strategy::Api),
        "SPA_API" => Ok(Strategy::SpaApi),
        "SPA_HEADLESS" => Ok(Strategy::SpaHeadless),
        "PDF" => Ok(Strategy::Pdf),
        other => Err(ProfileValidationError::UnknownStrategy(other.to_string())),
    }
}

/// Validates the minimum contract and turns a [`RawSourceProfile`] into a
/// registry-resident [`SourceProfile`].
pub fn validate(raw: RawSourceProfile) -> Result<SourceProfile, ProfileValidationError> {
    let tier = Tier::from_u8(raw.tier).ok_or(ProfileValidationError::BadTier(raw.tier))?;
    let pool = parse_pool(&raw.pool)?;
    let strategy = parse_strategy(&raw.strategy)?;
    if !raw.headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
        return Err(ProfileValidationError::MissingUserAgent);
    }
    if raw.cadence.interval_seconds.is_none() && raw.cadence.cron.is_none() {
        return Err(ProfileValidationError::MissingCadence);
    }

    Ok(SourceProfile {
        source: Source {
            source_id: raw.source_id,
            source_domain: raw.source_domain,
            tier,
            is_official: raw.is_official,
            lang: raw.lang,
            pool,
            strategy,
            enabled: raw.enabled,
        },
        endpoints: raw.endpoints,
        headers: raw.headers,
        cadence: raw.cadence,
        limits: raw.limits,
        observability: raw.observability,
        metadata: raw.metadata,
    })
}

/// Holds every validated profile in memory, keyed by `source_id` (§4.1).
#[derive(Debug, Default)]
pub struct SourceProfileRegistry {
    profiles: HashMap<String, SourceProfile>,
}

impl SourceProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON array of [`RawSourceProfile`] from disk, skipping and
    /// logging any profile that fails validation rather than aborting.
    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw_text = std::fs::read_to_string(path.as_ref())?;
        let raw_profiles: Vec<RawSourceProfile> = serde_json::from_str(&raw_text)?;
        let mut registry = Self::new();
        for raw in raw_profiles {
            let source_id = raw.source_id.clone();
            match validate(raw) {
                Ok(profile) => {
                    registry.profiles.insert(source_id, profile);
                }
                Err(err) => {
                    warn!(source_id, error = %err, "rejecting invalid source profile");
                }
            }
        }
        Ok(registry)
    }

    /// "All enabled profiles" query.
    pub fn enabled_profiles(&self) -> impl Iterator<Item = &SourceProfile> {
        self.profiles.values().filter(|p| p.source.enabled)
    }

    /// "Profile by id" query.
    pub fn by_id(&self, source_id: &str) -> Option<&SourceProfile> {
        self.profiles.get(source_id)
    }

    pub fn insert(&mut self, profile: SourceProfile) {
        self.profiles.insert(profile.source.source_id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> RawSourceProfile {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "PautaRadarBot/1.0".to_string());
        RawSourceProfile {
            source_id: "diario-oficial-uniao".to_string(),
            source_domain: "in.gov.br".to_string(),
            tier: 1,
            is_official: true,
            lang: "pt-BR".to_string(),
            pool: "FAST_POOL".to_string(),
            strategy: "RSS".to_string(),
            endpoints: Endpoints {
                feed: Some("https://in.gov.br/rss".to_string()),
                ..Default::default()
            },
            headers,
            cadence: Cadence {
                interval_seconds: Some(60),
                cron: None,
            },
            limits: Limits {
                rate_limit_req_per_min: 30,
                concurrency_per_domain: 2,
                timeout_seconds: 5,
                max_bytes: 5_000_000,
            },
            observability: Observability::default(),
            metadata: StrategyMetadata::default(),
            enabled: true,
        }
    }

    #[test]
    fn valid_profile_round_trips() {
        let profile = validate(sample_raw()).expect("should validate");
        assert_eq!(profile.source.tier, Tier::One);
        assert_eq!(profile.source.pool, Pool::FastPool);
    }

    #[test]
    fn rejects_unknown_pool() {
        let mut raw = sample_raw();
        raw.pool = "NOT_A_POOL".to_string();
        assert!(matches!(
            validate(raw),
            Err(ProfileValidationError::UnknownPool(_))
        ));
    }

    #[test]
    fn rejects_missing_user_agent() {
        let mut raw = sample_raw();
        raw.headers.clear();
        assert!(matches!(
            validate(raw),
            Err(ProfileValidationError::MissingUserAgent)
        ));
    }

    #[test]
    fn rejects_missing_cadence() {
        let mut raw = sample_raw();
        raw.cadence = Cadence {
            interval_seconds: None,
            cron: None,
        };
        assert!(matches!(
            validate(raw),
            Err(ProfileValidationError::MissingCadence)
        ));
    }

    #[test]
    fn registry_enabled_profiles_filters_disabled() {
        let mut registry = SourceProfileRegistry::new();
        let enabled = validate(sample_raw()).unwrap();
        let mut raw_disabled = sample_raw();
        raw_disabled.source_id = "disabled-source".to_string();
        raw_disabled.enabled = false;
        let disabled = validate(raw_disabled).unwrap();

        registry.insert(enabled);
        registry.insert(disabled);

        let ids: Vec<_> = registry
            .enabled_profiles()
            .map(|p| p.source.source_id.as_str())
            .collect();
        assert_eq!(ids, vec!["diario-oficial-uniao"]);
    }
}
