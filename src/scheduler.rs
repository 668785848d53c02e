//! C2 — Scheduler (§4.2).
//!
//! Decides, for each enabled profile, whether it is due against a persisted
//! "last dispatched at" timestamp, and enqueues one fetch job in the pool
//! the profile declares. Never issues two concurrent jobs for the same
//! source; ties are broken `(tier ascending, last_dispatched_at ascending)`.

use crate::model::{Pool, SourceId};
use crate::profile::{Cadence, SourceProfileRegistry};
use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One unit of dispatchable work handed to a pool worker.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub source_id: SourceId,
    pub pool: Pool,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    InFlight,
    Terminal,
}

#[derive(Debug, Clone)]
struct SourceSchedule {
    last_dispatched_at: Option<DateTime<Utc>>,
    state: JobState,
}

impl Default for SourceSchedule {
    fn default() -> Self {
        Self {
            last_dispatched_at: None,
            state: JobState::Terminal,
        }
    }
}

/// Tracks per-source dispatch timestamps and in-flight state. Shared across
/// the scheduler loop and the pool workers that report completion, the same
/// "global mutable state lives in a concurrent map, never a singleton"
/// posture as the teacher's `Arc<ParkingRwLock<..>>` shared state (§9).
pub struct Scheduler {
    schedules: DashMap<SourceId, SourceSchedule>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            schedules: DashMap::new(),
        }
    }

    /// Marks a source's previous job terminal (succeeded, failed, or timed
    /// out) so it becomes eligible for dispatch again.
    pub fn mark_terminal(&self, source_id: &str) {
        self.schedules
            .entry(source_id.to_string())
            .or_default()
            .state = JobState::Terminal;
    }

    fn is_due(&self, source_id: &str, cadence: &Cadence, now: DateTime<Utc>) -> bool {
        let entry = self.schedules.entry(source_id.to_string()).or_default();
        if entry.state == JobState::InFlight {
            return false;
        }
        match entry.last_dispatched_at {
            None => true,
            Some(last) => cadence_elapsed(cadence, last, now),
        }
    }

    /// Builds the ordered dispatch plan for this tick: every enabled, due
    /// profile, sorted `(tier ascending, last_dispatched_at ascending)` so
    /// Tier-1 and starved sources are privileged (§4.2).
    pub fn plan_tick(
        &self,
        registry: &SourceProfileRegistry,
        now: DateTime<Utc>,
    ) -> Vec<FetchJob> {
        let mut due: Vec<FetchJob> = Vec::new();
        let mut order_keys: Vec<(u8, i64, usize)> = Vec::new();

        for profile in registry.enabled_profiles() {
            let source_id = &profile.source.source_id;
            if !self.is_due(source_id, &profile.cadence, now) {
                continue;
            }
            let last = self
                .schedules
                .get(source_id)
                .and_then(|e| e.last_dispatched_at)
                .map(|t| t.timestamp())
                .unwrap_or(i64::MIN);
            order_keys.push((profile.source.tier as u8, last, due.len()));
            due.push(FetchJob {
                source_id: source_id.clone(),
                pool: profile.source.pool,
                dispatched_at: now,
            });
        }

        let mut indices: Vec<usize> = (0..due.len()).collect();
        indices.sort_by_key(|&i| (order_keys[i].0, order_keys[i].1));
        indices.into_iter().map(|i| due[i].clone()).collect()
    }

    /// Records dispatch and flips the source in-flight. Call this
    /// immediately after a job from `plan_tick` is actually enqueued.
    pub fn record_dispatch(&self, source_id: &str, at: DateTime<Utc>) {
        let mut entry = self.schedules.entry(source_id.to_string()).or_default();
        entry.last_dispatched_at = Some(at);
        entry.state = JobState::InFlight;
    }

    /// A source is skipped if its previous job has not produced a terminal
    /// outcome within `cadence + timeout` (§4.2); the sweeper calls this to
    /// force-terminalize stragglers so the scheduler doesn't wedge forever.
    pub fn sweep_stuck(&self, registry: &SourceProfileRegistry, timeout: Duration, now: DateTime<Utc>) {
        for mut entry in self.schedules.iter_mut() {
            if entry.state != JobState::InFlight {
                continue;
            }
            let source_id = entry.key().clone();
            let Some(profile) = registry.by_id(&source_id) else {
                continue;
            };
            let Some(last) = entry.last_dispatched_at else {
                continue;
            };
            let budget = cadence_interval_estimate(&profile.cadence) + timeout;
            if now.signed_duration_since(last).to_std().unwrap_or_default() > budget {
                warn!(source_id, "fetch job exceeded cadence+timeout budget; forcing terminal");
                entry.state = JobState::Terminal;
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// `cadence + timeout` budget estimate used only by the stuck-job sweeper;
/// for cron cadences we fall back to a conservative 1-hour estimate since we
/// only implement a minimal field matcher, not a full next-fire calculator.
fn cadence_interval_estimate(cadence: &Cadence) -> Duration {
    if let Some(secs) = cadence.interval_seconds {
        Duration::from_secs(secs)
    } else {
        Duration::from_secs(3600)
    }
}

fn cadence_elapsed(cadence: &Cadence, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    if let Some(secs) = cadence.interval_seconds {
        let elapsed = now.signed_duration_since(last).num_seconds();
        return elapsed >= secs as i64;
    }
    if let Some(expr) = &cadence.cron {
        return cron_due_since(expr, last, now);
    }
    debug!("cadence has neither interval_seconds nor cron; never due");
    false
}

/// A minimal 5-field cron matcher (`min hour dom month dow`) over UTC.
/// Supports `*` and exact numeric values per field, which covers the
/// cadences this registry actually needs (hourly/daily/business-day
/// dispatch); it intentionally does not implement ranges, steps or lists —
/// no cron crate appears anywhere in the retrieved corpus, and a full
/// implementation is out of proportion to what the scheduler needs.
fn cron_due_since(expr: &str, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        warn!(expr, "malformed cron expression; treating as never due");
        return false;
    }
    let matches = |field: &str, value: u32| field == "*" || field.parse::<u32>().ok() == Some(value);

    // Walk minute-by-minute between `last` and `now`, looking for a boundary
    // that matches the expression. Bounded to 7 days of minutes so a stale
    // `last` can't cause an unbounded scan.
    let mut cursor = last + chrono::Duration::minutes(1);
    let cap = last + chrono::Duration::days(7);
    while cursor <= now && cursor <= cap {
        let hit = matches(fields[0], cursor.minute())
            && matches(fields[1], cursor.hour())
            && matches(fields[2], cursor.day())
            && matches(fields[3], cursor.month())
            && matches(fields[4], cursor.weekday().num_days_from_sunday());
        if hit {
            return true;
        }
        cursor += chrono::Duration::minutes(1);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Pool as ModelPool, Source, Strategy, Tier};
    use crate::profile::{Endpoints, Limits, Observability, SourceProfile, StrategyMetadata};
    use std::collections::HashMap;

    fn profile(id: &str, tier: Tier, interval_secs: Option<u64>, cron: Option<&str>) -> SourceProfile {
        SourceProfile {
            source: Source {
                source_id: id.to_string(),
                source_domain: "example.gov.br".to_string(),
                tier,
                is_official: true,
                lang: "pt-BR".to_string(),
                pool: ModelPool::FastPool,
                strategy: Strategy::Rss,
                enabled: true,
            },
            endpoints: Endpoints::default(),
            headers: HashMap::new(),
            cadence: Cadence {
                interval_seconds: interval_secs,
                cron: cron.map(|s| s.to_string()),
            },
            limits: Limits {
                rate_limit_req_per_min: 30,
                concurrency_per_domain: 2,
                timeout_seconds: 5,
                max_bytes: 1_000_000,
            },
            observability: Observability::default(),
            metadata: StrategyMetadata::default(),
        }
    }

    #[test]
    fn new_source_is_immediately_due() {
        let scheduler = Scheduler::new();
        let mut registry = SourceProfileRegistry::new();
        registry.insert(profile("a", Tier::One, Some(60), None));
        let jobs = scheduler.plan_tick(&registry, Utc::now());
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn not_due_again_before_interval_elapses() {
        let scheduler = Scheduler::new();
        let mut registry = SourceProfileRegistry::new();
        registry.insert(profile("a", Tier::One, Some(60), None));
        let t0 = Utc::now();
        let jobs = scheduler.plan_tick(&registry, t0);
        assert_eq!(jobs.len(), 1);
        scheduler.record_dispatch("a", t0);
        scheduler.mark_terminal("a");

        let jobs = scheduler.plan_tick(&registry, t0 + chrono::Duration::seconds(30));
        assert!(jobs.is_empty());

        let jobs = scheduler.plan_tick(&registry, t0 + chrono::Duration::seconds(61));
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn never_two_concurrent_jobs_for_same_source() {
        let scheduler = Scheduler::new();
        let mut registry = SourceProfileRegistry::new();
        registry.insert(profile("a", Tier::One, Some(60), None));
        let t0 = Utc::now();
        scheduler.record_dispatch("a", t0);
        // Still in flight: not due even though interval elapsed.
        let jobs = scheduler.plan_tick(&registry, t0 + chrono::Duration::seconds(120));
        assert!(jobs.is_empty());
    }

    #[test]
    fn tier_one_ordered_before_tier_three_when_both_due() {
        let scheduler = Scheduler::new();
        let mut registry = SourceProfileRegistry::new();
        registry.insert(profile("low", Tier::Three, Some(60), None));
        registry.insert(profile("high", Tier::One, Some(60), None));
        let jobs = scheduler.plan_tick(&registry, Utc::now());
        assert_eq!(jobs[0].source_id, "high");
        assert_eq!(jobs[1].source_id, "low");
    }

    #[test]
    fn cron_matches_exact_minute_boundary() {
        let scheduler = Scheduler::new();
        let mut registry = SourceProfileRegistry::new();
        registry.insert(profile("c", Tier::One, None, Some("0 9 * * *")));
        let last = DateTime::parse_from_rfc3339("2026-07-25T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        scheduler.record_dispatch("c", last);
        scheduler.mark_terminal("c");

        let too_soon = last + chrono::Duration::hours(1);
        assert!(scheduler.plan_tick(&registry, too_soon).is_empty());

        let next_day_nine = last + chrono::Duration::days(1);
        assert_eq!(scheduler.plan_tick(&registry, next_day_nine).len(), 1);
    }
}
