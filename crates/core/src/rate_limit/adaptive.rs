use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::LimitType;

const MAX_SAMPLES: usize = 100;
const LOOKBACK_SECS: i64 = 600;

/// Adjusts a base quota before each admission check.
pub trait QuotaPolicy: Send + Sync {
    fn effective_quota(&self, limit_type: LimitType, base: u32, now: DateTime<Utc>) -> u32;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadSample {
    pub at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl LoadSample {
    pub fn score(&self) -> f64 {
        (self.cpu_percent + self.memory_percent) / 2.0
    }
}

/// Scales quotas down under load and up when the host is idle.
#[derive(Debug, Default)]
pub struct AdaptiveQuotaPolicy {
    history: Mutex<VecDeque<LoadSample>>,
}

impl AdaptiveQuotaPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_load(&self, cpu_percent: f64, memory_percent: f64) {
        self.record_sample(LoadSample { at: Utc::now(), cpu_percent, memory_percent });
    }

    pub fn record_sample(&self, sample: LoadSample) {
        let mut history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        history.push_back(sample);
        while history.len() > MAX_SAMPLES {
            history.pop_front();
        }
    }

    /// Mean load score over the lookback window, if any samples fall inside it.
    pub fn average_load(&self, now: DateTime<Utc>) -> Option<f64> {
        let cutoff = now - Duration::seconds(LOOKBACK_SECS);
        let history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let recent: Vec<f64> =
            history.iter().filter(|sample| sample.at > cutoff).map(LoadSample::score).collect();
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }

    pub fn multiplier(&self, now: DateTime<Utc>) -> f64 {
        match self.average_load(now) {
            Some(load) if load > 80.0 => 0.5,
            Some(load) if load > 60.0 => 0.7,
            Some(load) if load < 30.0 => 1.5,
            _ => 1.0,
        }
    }
}

impl QuotaPolicy for AdaptiveQuotaPolicy {
    fn effective_quota(&self, limit_type: LimitType, base: u32, now: DateTime<Utc>) -> u32 {
        let multiplier = self.multiplier(now);
        let scaled = (f64::from(base) * multiplier).floor() as u32;
        let quota = scaled.max(1);
        if quota != base {
            debug!(
                event_name = "rate_limit.adaptive",
                limit_type = limit_type.as_str(),
                base,
                quota,
                multiplier,
                "adjusted quota for current load"
            );
        }
        quota
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{AdaptiveQuotaPolicy, LoadSample, QuotaPolicy, MAX_SAMPLES};
    use crate::rate_limit::LimitType;

    fn sample(at: chrono::DateTime<Utc>, cpu: f64, memory: f64) -> LoadSample {
        LoadSample { at, cpu_percent: cpu, memory_percent: memory }
    }

    #[test]
    fn multiplier_follows_load_bands() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
        let cases = [(90.0, 90.0, 0.5), (70.0, 60.0, 0.7), (50.0, 40.0, 1.0), (10.0, 20.0, 1.5)];

        for (cpu, memory, expected) in cases {
            let policy = AdaptiveQuotaPolicy::new();
            policy.record_sample(sample(now, cpu, memory));
            assert_eq!(policy.multiplier(now), expected, "cpu={cpu} memory={memory}");
        }
    }

    #[test]
    fn no_recent_samples_leaves_quota_unchanged() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
        let policy = AdaptiveQuotaPolicy::new();
        policy.record_sample(sample(now - Duration::seconds(601), 99.0, 99.0));

        assert_eq!(policy.average_load(now), None);
        assert_eq!(policy.effective_quota(LimitType::Api, 1000, now), 1000);
    }

    #[test]
    fn quota_never_drops_below_one() {
        let now = Utc::now();
        let policy = AdaptiveQuotaPolicy::new();
        policy.record_sample(sample(now, 100.0, 100.0));

        assert_eq!(policy.effective_quota(LimitType::SlackCommand, 1, now), 1);
        assert_eq!(policy.effective_quota(LimitType::SlackCommand, 10, now), 5);
    }

    #[test]
    fn history_is_capped() {
        let now = Utc::now();
        let policy = AdaptiveQuotaPolicy::new();
        for _ in 0..(MAX_SAMPLES + 20) {
            policy.record_sample(sample(now, 100.0, 100.0));
        }
        for _ in 0..MAX_SAMPLES {
            policy.record_sample(sample(now, 0.0, 0.0));
        }

        assert_eq!(policy.average_load(now), Some(0.0));
    }
}
