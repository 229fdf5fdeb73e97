use tracing::debug;

use crate::database_ops::fetch::IngestPass;

/// How a tracked stat compares with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Nothing stored yet to compare against.
    FirstSeen,
    Unchanged,
    Changed,
}

impl Observation {
    pub fn compare<T: PartialEq>(previous: Option<&T>, current: &T) -> Self {
        match previous {
            None => Observation::FirstSeen,
            Some(prev) if prev == current => Observation::Unchanged,
            Some(_) => Observation::Changed,
        }
    }
}

/// Inactivity counter: grows while polls see no change, resets on change and
/// wraps to zero at the ceiling.
#[derive(Debug, Clone, Copy)]
pub struct DriftTracker {
    ceiling: i32,
}

impl DriftTracker {
    pub fn new(ceiling: i32) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    pub fn ceiling(&self) -> i32 {
        self.ceiling
    }

    pub fn next_counter(&self, counter: i32, observation: Observation) -> i32 {
        match observation {
            Observation::FirstSeen => counter,
            Observation::Changed => 0,
            Observation::Unchanged => {
                let next = counter.saturating_add(1);
                if next >= self.ceiling {
                    0
                } else {
                    next
                }
            }
        }
    }

    /// Apply an observation at most once per aggregate per pass.
    pub fn apply(
        &self,
        pass: &IngestPass,
        aggregate_key: &str,
        counter: i32,
        observation: Observation,
    ) -> i32 {
        if observation == Observation::FirstSeen {
            return counter;
        }
        if !pass.claim_drift_update(aggregate_key) {
            debug!(aggregate_key, "drift already applied this pass");
            return counter;
        }
        let next = self.next_counter(counter, observation);
        debug!(aggregate_key, counter, next, ?observation, "inactivity counter");
        next
    }

    pub fn update_activity<T: PartialEq>(
        &self,
        pass: &IngestPass,
        aggregate_key: &str,
        counter: i32,
        previous: Option<&T>,
        current: &T,
    ) -> i32 {
        self.apply(pass, aggregate_key, counter, Observation::compare(previous, current))
    }
}
