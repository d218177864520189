//! Consecutive-failure tracking per target.

use crate::db::{TargetConfig, TargetId};
use crate::probe::ProbeOutcome;

use std::collections::HashMap;

/// What a single applied probe result did to a target's streak.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub target: TargetConfig,
    /// Streak length including this probe, before any post-alert reset.
    pub consecutive_failures: u32,
    /// Set when this probe brought the streak to the threshold.
    pub alert: bool,
}

#[derive(Debug)]
struct Streak {
    target: TargetConfig,
    generation: u64,
    consecutive_failures: u32,
}

/// Per-target failure counters keyed by target id.
///
/// Every (re)start of a target gets a new generation; results carrying any
/// other generation are stale and ignored.
#[derive(Debug, Default)]
pub struct FailureTracker {
    streaks: HashMap<TargetId, Streak>,
}

impl FailureTracker {
    /// Begin tracking a target, replacing any previous state with a zero streak.
    pub fn track(&mut self, target: TargetConfig, generation: u64) {
        self.streaks.insert(
            target.id,
            Streak {
                target,
                generation,
                consecutive_failures: 0,
            },
        );
    }

    /// Drop all state for a target. Returns whether anything was tracked.
    pub fn forget(&mut self, id: TargetId) -> bool {
        self.streaks.remove(&id).is_some()
    }

    pub fn consecutive_failures(&self, id: TargetId) -> Option<u32> {
        self.streaks.get(&id).map(|s| s.consecutive_failures)
    }

    /// Apply one probe result. Returns `None` when the result is stale.
    pub fn record(&mut self, id: TargetId, generation: u64, outcome: ProbeOutcome) -> Option<Transition> {
        let streak = self.streaks.get_mut(&id)?;
        if streak.generation != generation {
            return None;
        }

        if outcome.reachable {
            streak.consecutive_failures = 0;
            return Some(Transition {
                target: streak.target.clone(),
                consecutive_failures: 0,
                alert: false,
            });
        }

        streak.consecutive_failures = streak.consecutive_failures.saturating_add(1);
        let consecutive_failures = streak.consecutive_failures;
        let alert = consecutive_failures >= streak.target.max_consecutive_failures;
        if alert {
            // Next alert needs a fresh run of failures
            streak.consecutive_failures = 0;
        }

        Some(Transition {
            target: streak.target.clone(),
            consecutive_failures,
            alert,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeKind;
    use std::time::Duration;

    fn target(id: TargetId, threshold: u32) -> TargetConfig {
        TargetConfig {
            id,
            name: format!("target-{}", id),
            address: "192.0.2.1".to_string(),
            port: 80,
            probe_kind: ProbeKind::Reachability,
            interval_ms: 1000,
            max_consecutive_failures: threshold,
        }
    }

    fn up() -> ProbeOutcome {
        ProbeOutcome::reachable(Duration::from_millis(5))
    }

    fn down() -> ProbeOutcome {
        ProbeOutcome::unreachable()
    }

    #[test]
    fn test_threshold_alerts_once_and_resets() {
        let mut tracker = FailureTracker::default();
        tracker.track(target(1, 3), 1);

        let alerts: Vec<bool> = (0..3)
            .map(|_| tracker.record(1, 1, down()).unwrap().alert)
            .collect();
        assert_eq!(alerts, vec![false, false, true]);
        assert_eq!(tracker.consecutive_failures(1), Some(0));

        // A fourth failure starts a fresh streak
        let t = tracker.record(1, 1, down()).unwrap();
        assert!(!t.alert);
        assert_eq!(t.consecutive_failures, 1);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut tracker = FailureTracker::default();
        tracker.track(target(1, 3), 1);

        let script = [down(), down(), up(), down(), down(), down()];
        let alerts: Vec<usize> = script
            .iter()
            .enumerate()
            .filter(|(_, o)| tracker.record(1, 1, **o).unwrap().alert)
            .map(|(i, _)| i + 1)
            .collect();

        assert_eq!(alerts, vec![6]);
    }

    #[test]
    fn test_threshold_of_one_alerts_every_failure() {
        let mut tracker = FailureTracker::default();
        tracker.track(target(1, 1), 1);

        assert!(tracker.record(1, 1, down()).unwrap().alert);
        assert!(tracker.record(1, 1, down()).unwrap().alert);
        assert!(!tracker.record(1, 1, up()).unwrap().alert);
    }

    #[test]
    fn test_retrack_resets_and_uses_new_threshold() {
        let mut tracker = FailureTracker::default();
        tracker.track(target(1, 5), 1);
        tracker.record(1, 1, down());
        tracker.record(1, 1, down());
        assert_eq!(tracker.consecutive_failures(1), Some(2));

        tracker.track(target(1, 2), 2);
        assert_eq!(tracker.consecutive_failures(1), Some(0));

        assert!(!tracker.record(1, 2, down()).unwrap().alert);
        assert!(tracker.record(1, 2, down()).unwrap().alert);
    }

    #[test]
    fn test_stale_results_are_ignored() {
        let mut tracker = FailureTracker::default();
        tracker.track(target(1, 1), 7);

        // Old generation
        assert!(tracker.record(1, 6, down()).is_none());
        assert_eq!(tracker.consecutive_failures(1), Some(0));

        // Unknown target
        assert!(tracker.record(2, 7, down()).is_none());

        // Forgotten target
        assert!(tracker.forget(1));
        assert!(!tracker.forget(1));
        assert!(tracker.record(1, 7, down()).is_none());
        assert_eq!(tracker.consecutive_failures(1), None);
    }
}
