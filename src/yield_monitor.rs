//! C11 — Yield Monitor (§4.11).
//!
//! Per source, tracks a rolling baseline of "useful yield" (anchors plus
//! documents with non-zero evidence score, per time bucket) and opens a
//! `DATA_STARVATION` incident when observed yield collapses relative to a
//! calendar-shaped expectation while HTTP 200s keep flowing. Grounded on
//! the teacher's `DataSourceKillSwitch` rolling-window bookkeeping
//! (`VecDeque` window, threshold trip), generalized from a latency window
//! to a yield window with a calendar multiplier instead of a fixed
//! threshold.

use crate::model::SourceId;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::VecDeque;

/// Business-day / hour-of-day shape: a source rarely publishes overnight or
/// on weekends, so a flat threshold would false-positive every night.
#[derive(Debug, Clone)]
pub struct CalendarProfile {
    /// Multiplier per hour-of-day (0..24), business days.
    pub business_hour_multiplier: [f64; 24],
    /// Multiplier per hour-of-day (0..24), weekends.
    pub weekend_hour_multiplier: [f64; 24],
}

impl CalendarProfile {
    pub fn flat() -> Self {
        Self {
            business_hour_multiplier: [1.0; 24],
            weekend_hour_multiplier: [1.0; 24],
        }
    }

    fn multiplier_at(&self, at: DateTime<Utc>) -> f64 {
        let hour = at.hour() as usize;
        let is_weekend = matches!(at.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);
        if is_weekend {
            self.weekend_hour_multiplier[hour]
        } else {
            self.business_hour_multiplier[hour]
        }
    }
}

#[derive(Debug, Clone)]
struct YieldBucket {
    at: DateTime<Utc>,
    useful_yield: u32,
    http_200_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataStarvationIncident {
    pub source_id: SourceId,
    pub observed_yield: f64,
    pub expected_yield: f64,
    pub window_buckets: usize,
}

/// Rolling yield tracker for a single source.
pub struct YieldMonitor {
    window_size: usize,
    buckets: VecDeque<YieldBucket>,
    calendar: CalendarProfile,
    starvation_ratio: f64,
}

impl YieldMonitor {
    pub fn new(window_size: usize, calendar: CalendarProfile) -> Self {
        Self {
            window_size,
            buckets: VecDeque::with_capacity(window_size),
            calendar,
            // Yield at or below 5% of the calendar-adjusted baseline counts
            // as "dropped to ~0" per §4.11.
            starvation_ratio: 0.05,
        }
    }

    pub fn record_bucket(&mut self, at: DateTime<Utc>, useful_yield: u32, http_200_count: u32) {
        self.buckets.push_back(YieldBucket { at, useful_yield, http_200_count });
        if self.buckets.len() > self.window_size {
            self.buckets.pop_front();
        }
    }

    fn baseline_yield(&self) -> Option<f64> {
        if self.buckets.len() < 3 {
            return None;
        }
        let weighted: Vec<f64> = self
            .buckets
            .iter()
            .map(|b| {
                let m = self.calendar.multiplier_at(b.at);
                if m > 0.0 {
                    b.useful_yield as f64 / m
                } else {
                    0.0
                }
            })
            .collect();
        let sum: f64 = weighted.iter().sum();
        Some(sum / weighted.len() as f64)
    }

    /// Evaluates the latest bucket against the rolling, calendar-adjusted
    /// baseline and opens an incident if yield has collapsed while HTTP
    /// traffic kept succeeding (§4.11).
    pub fn evaluate(&self, source_id: &SourceId) -> Option<DataStarvationIncident> {
        let latest = self.buckets.back()?;
        if latest.http_200_count == 0 {
            // No traffic at all is a fetch-layer problem, not starvation.
            return None;
        }
        let baseline = self.baseline_yield()?;
        let expected = baseline * self.calendar.multiplier_at(latest.at);
        if expected < 1.0 {
            // Below this floor the calendar shape itself predicts ~nothing,
            // so an empty bucket isn't evidence of starvation.
            return None;
        }
        let observed = latest.useful_yield as f64;
        if observed <= expected * self.starvation_ratio {
            Some(DataStarvationIncident {
                source_id: source_id.clone(),
                observed_yield: observed,
                expected_yield: expected,
                window_buckets: self.buckets.len(),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        // 2026-07-27 is a Monday.
        Utc.with_ymd_and_hms(2026, 7, 27, hour, 0, 0).unwrap()
    }

    #[test]
    fn no_incident_while_yield_tracks_baseline() {
        let mut monitor = YieldMonitor::new(10, CalendarProfile::flat());
        for h in 9..15 {
            monitor.record_bucket(at(h), 10, 12);
        }
        assert_eq!(monitor.evaluate(&"diario-oficial".to_string()), None);
    }

    #[test]
    fn incident_opens_when_yield_collapses_with_continued_200s() {
        let mut monitor = YieldMonitor::new(10, CalendarProfile::flat());
        for h in 9..14 {
            monitor.record_bucket(at(h), 10, 12);
        }
        monitor.record_bucket(at(14), 0, 12);

        let incident = monitor.evaluate(&"diario-oficial".to_string());
        assert!(incident.is_some());
        let incident = incident.unwrap();
        assert_eq!(incident.observed_yield, 0.0);
        assert!(incident.expected_yield > 0.0);
    }

    #[test]
    fn no_incident_when_http_traffic_also_stops() {
        let mut monitor = YieldMonitor::new(10, CalendarProfile::flat());
        for h in 9..14 {
            monitor.record_bucket(at(h), 10, 12);
        }
        monitor.record_bucket(at(14), 0, 0);
        assert_eq!(monitor.evaluate(&"diario-oficial".to_string()), None);
    }

    #[test]
    fn calendar_profile_suppresses_false_positive_outside_business_hours() {
        let mut calendar = CalendarProfile::flat();
        calendar.business_hour_multiplier[3] = 0.01;
        let mut monitor = YieldMonitor::new(10, calendar);
        for h in 9..14 {
            monitor.record_bucket(at(h), 10, 12);
        }
        monitor.record_bucket(at(3), 0, 12);
        assert_eq!(monitor.evaluate(&"diario-oficial".to_string()), None);
    }
}
