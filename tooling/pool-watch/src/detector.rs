//! Per-pool issue detection.
//!
//! Two independent machines run for every polled pool each cycle:
//!
//! ```text
//!   API availability:  Healthy -> Suspect (1..threshold-1 failures) -> Down
//!                      any successful fetch -> Healthy
//!   Height:            InSync <-> Diverged   (skipped while height is 0)
//! ```

use crate::{config::MonitorSettings, models::PoolRecord};
use std::time::SystemTime;
use tracing::info;

/// Transitions observed for one pool during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSignals {
    pub new_issue: bool,
    pub recovered: bool,
}

impl PoolSignals {
    pub fn any(&self) -> bool {
        self.new_issue || self.recovered
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            new_issue: self.new_issue || other.new_issue,
            recovered: self.recovered || other.recovered,
        }
    }
}

/// Runs both machines against the pool's current `last_height`.
pub fn evaluate_pool(
    pool: &mut PoolRecord,
    consensus_height: u64,
    settings: &MonitorSettings,
    now: SystemTime,
) -> PoolSignals {
    let api = evaluate_api(pool, settings.api_failure_threshold, now);
    let height = if pool.last_height == 0 {
        PoolSignals::default()
    } else {
        evaluate_height(pool, consensus_height, settings.max_height_difference, now)
    };
    api.merge(height)
}

fn evaluate_api(pool: &mut PoolRecord, threshold: u32, now: SystemTime) -> PoolSignals {
    if pool.last_height == 0 {
        pool.api_fail_streak = pool.api_fail_streak.saturating_add(1).min(threshold.max(1));

        if pool.api_fail_streak >= threshold && !pool.api_alert_active {
            info!(pool = %pool.url, streak = pool.api_fail_streak, "pool api down");
            begin_episode(pool, now);
            pool.api_alert_active = true;
            return PoolSignals {
                new_issue: true,
                recovered: false,
            };
        }
        return PoolSignals::default();
    }

    pool.api_fail_streak = 0;
    if pool.api_alert_active {
        info!(pool = %pool.url, height = pool.last_height, "pool api recovered");
        pool.api_alert_active = false;
        pool.just_recovered = true;
        return PoolSignals {
            new_issue: false,
            recovered: true,
        };
    }

    PoolSignals::default()
}

fn evaluate_height(
    pool: &mut PoolRecord,
    consensus_height: u64,
    max_difference: u64,
    now: SystemTime,
) -> PoolSignals {
    let diverged = pool.last_height.abs_diff(consensus_height) > max_difference;

    match (diverged, pool.height_alert_active) {
        (true, false) => {
            info!(
                pool = %pool.url,
                height = pool.last_height,
                consensus = consensus_height,
                "pool height diverged"
            );
            begin_episode(pool, now);
            pool.height_alert_active = true;
            PoolSignals {
                new_issue: true,
                recovered: false,
            }
        }
        (false, true) => {
            info!(pool = %pool.url, height = pool.last_height, "pool height back in sync");
            pool.height_alert_active = false;
            pool.just_recovered = true;
            PoolSignals {
                new_issue: false,
                recovered: true,
            }
        }
        _ => PoolSignals::default(),
    }
}

/// Watchers get paged again for a new issue. The start time is kept when the
/// pool is already inside an episode so the reported duration covers it all.
fn begin_episode(pool: &mut PoolRecord, now: SystemTime) {
    if !pool.in_bad_state() {
        pool.issue_started_at = Some(now);
    }
    pool.mentioned_this_episode = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RosterEntry;
    use std::time::{Duration, UNIX_EPOCH};

    fn pool() -> PoolRecord {
        PoolRecord::from_roster(&RosterEntry::new("pool.example", "https://pool.example/api", "forknote"))
    }

    fn at(second: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(second)
    }

    #[test]
    fn failures_below_threshold_never_alert() {
        let settings = MonitorSettings::default();
        let mut record = pool();

        for cycle in 0..(settings.api_failure_threshold - 1) {
            record.last_height = 0;
            let signals = evaluate_pool(&mut record, 100, &settings, at(u64::from(cycle) * 30));
            assert!(!signals.any());
            assert!(!record.api_alert_active);
        }

        record.last_height = 0;
        let signals = evaluate_pool(&mut record, 100, &settings, at(90));
        assert!(signals.new_issue);
        assert!(record.api_alert_active);
        assert_eq!(record.issue_started_at, Some(at(90)));
        assert!(!record.mentioned_this_episode);
    }

    #[test]
    fn transient_failure_is_absorbed() {
        let settings = MonitorSettings::default();
        let mut record = pool();

        record.last_height = 0;
        let _ = evaluate_pool(&mut record, 100, &settings, at(0));
        record.last_height = 0;
        let _ = evaluate_pool(&mut record, 100, &settings, at(30));
        assert_eq!(record.api_fail_streak, 2);

        record.last_height = 100;
        let signals = evaluate_pool(&mut record, 100, &settings, at(60));
        assert!(!signals.any());
        assert_eq!(record.api_fail_streak, 0);
        assert!(!record.just_recovered);
    }

    #[test]
    fn streak_saturates_and_alert_fires_once() {
        let settings = MonitorSettings::default();
        let mut record = pool();
        let mut raised = 0;

        for cycle in 0..10 {
            record.last_height = 0;
            if evaluate_pool(&mut record, 100, &settings, at(cycle * 30)).new_issue {
                raised += 1;
            }
        }

        assert_eq!(raised, 1);
        assert_eq!(record.api_fail_streak, settings.api_failure_threshold);
    }

    #[test]
    fn recovery_after_down_sets_just_recovered() {
        let settings = MonitorSettings::default();
        let mut record = pool();
        for cycle in 0..3 {
            record.last_height = 0;
            let _ = evaluate_pool(&mut record, 100, &settings, at(cycle * 30));
        }

        record.last_height = 101;
        let signals = evaluate_pool(&mut record, 101, &settings, at(120));

        assert!(signals.recovered);
        assert!(!record.api_alert_active);
        assert!(record.just_recovered);
    }

    #[test]
    fn divergence_uses_strict_threshold() {
        let settings = MonitorSettings::default();
        let mut record = pool();

        record.last_height = 95;
        assert!(!evaluate_pool(&mut record, 100, &settings, at(0)).any());
        assert!(!record.height_alert_active);

        record.last_height = 94;
        let signals = evaluate_pool(&mut record, 100, &settings, at(30));
        assert!(signals.new_issue);
        assert!(record.height_alert_active);

        record.last_height = 94;
        assert!(!evaluate_pool(&mut record, 100, &settings, at(60)).any());

        record.last_height = 100;
        let signals = evaluate_pool(&mut record, 100, &settings, at(90));
        assert!(signals.recovered);
        assert!(!record.height_alert_active);
        assert!(record.just_recovered);
    }

    #[test]
    fn zero_height_skips_divergence() {
        let settings = MonitorSettings::default();
        let mut record = pool();

        record.last_height = 0;
        let _ = evaluate_pool(&mut record, 5_000, &settings, at(0));

        assert!(!record.height_alert_active);
    }

    #[test]
    fn both_machines_can_fire_in_one_cycle() {
        let settings = MonitorSettings::default();
        let mut record = pool();
        for cycle in 0..3 {
            record.last_height = 0;
            let _ = evaluate_pool(&mut record, 100, &settings, at(cycle * 30));
        }

        record.last_height = 50;
        let signals = evaluate_pool(&mut record, 100, &settings, at(120));

        assert!(signals.recovered);
        assert!(signals.new_issue);
        assert!(!record.api_alert_active);
        assert!(record.height_alert_active);
        assert_eq!(record.issue_started_at, Some(at(120)));
    }
}
