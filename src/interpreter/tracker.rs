//! Tracked-outcome aggregation.
//!
//! Each shot records one outcome string per tracked variable; the runner
//! merges them into per-name counts. Binary outcome strings sort ascending
//! by (width, integer value); non-binary outcomes (`"?"`) sort last.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Per-shot snapshot: tracked name to outcome string, first snapshot wins.
#[derive(Debug, Default)]
pub struct ShotTracker {
    outcomes: HashMap<String, String>,
}

impl ShotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_once(&mut self, name: &str, outcome: String) {
        self.outcomes.entry(name.to_string()).or_insert(outcome);
    }

    pub fn into_outcomes(self) -> HashMap<String, String> {
        self.outcomes
    }
}

/// Aggregated counts across shots: name to outcome to occurrences.
#[derive(Debug, Default)]
pub struct TrackedCounts {
    counts: HashMap<String, HashMap<String, u64>>,
}

impl TrackedCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_shot(&mut self, tracker: ShotTracker) {
        for (name, outcome) in tracker.into_outcomes() {
            *self
                .counts
                .entry(name)
                .or_default()
                .entry(outcome)
                .or_insert(0) += 1;
        }
    }

    pub fn get(&self, name: &str) -> Option<&HashMap<String, u64>> {
        self.counts.get(name)
    }

    pub fn names(&self) -> Vec<&String> {
        let mut names: Vec<_> = self.counts.keys().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// The outcomes of `name` in table order.
    pub fn sorted_outcomes(&self, name: &str) -> Vec<(&String, u64)> {
        let Some(map) = self.counts.get(name) else {
            return vec![];
        };
        let mut entries: Vec<_> = map.iter().map(|(k, v)| (k, *v)).collect();
        entries.sort_by(|(a, _), (b, _)| outcome_order(a, b));
        entries
    }
}

fn is_binary(outcome: &str) -> bool {
    !outcome.is_empty() && outcome.chars().all(|c| c == '0' || c == '1')
}

/// Binary strings ascending by (width, integer value); everything else
/// after them, lexically.
pub fn outcome_order(a: &str, b: &str) -> Ordering {
    match (is_binary(a), is_binary(b)) {
        (true, true) => a
            .len()
            .cmp(&b.len())
            .then_with(|| {
                let a_value = u64::from_str_radix(a, 2).unwrap_or(0);
                let b_value = u64::from_str_radix(b, 2).unwrap_or(0);
                a_value.cmp(&b_value)
            }),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_once_keeps_first() {
        let mut tracker = ShotTracker::new();
        tracker.record_once("q", "0".into());
        tracker.record_once("q", "1".into());

        assert_eq!(tracker.into_outcomes()["q"], "0");
    }

    #[test]
    fn test_merge_counts() {
        let mut counts = TrackedCounts::new();
        for outcome in ["0", "1", "0"] {
            let mut tracker = ShotTracker::new();
            tracker.record_once("q", outcome.into());
            counts.merge_shot(tracker);
        }

        assert_eq!(counts.get("q").unwrap()["0"], 2);
        assert_eq!(counts.get("q").unwrap()["1"], 1);
    }

    #[test]
    fn test_outcome_ordering() {
        let mut outcomes = vec!["?", "11", "0", "1", "00", "10"];
        outcomes.sort_by(|a, b| outcome_order(a, b));

        assert_eq!(outcomes, vec!["0", "1", "00", "10", "11", "?"]);
    }
}
