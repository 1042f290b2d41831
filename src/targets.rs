use serde_derive::{Deserialize, Serialize};

use crate::metrics::Metric;

/// User-chosen bounds for one metric. Owned by whoever configures targets,
/// the core only ever reads them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub metric: Metric,
    pub min: f64,
    pub max: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Disabled,
    Below,
    Within,
    Above,
}

impl TargetRange {
    pub fn new(metric: Metric, min: f64, max: f64) -> Self {
        Self {
            metric,
            min,
            max,
            enabled: true,
        }
    }

    /// Bounds are inclusive on both ends.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn classify(&self, value: f64) -> TargetStatus {
        if !self.enabled {
            TargetStatus::Disabled
        } else if value < self.min {
            TargetStatus::Below
        } else if value > self.max {
            TargetStatus::Above
        } else {
            TargetStatus::Within
        }
    }
}

pub fn default_targets() -> Vec<TargetRange> {
    [
        (Metric::HeartRate, 120.0, 150.0),
        (Metric::Power, 150.0, 200.0),
        (Metric::Cadence, 70.0, 90.0),
        (Metric::Speed, 20.0, 30.0),
        (Metric::Resistance, 5.0, 10.0),
    ]
    .into_iter()
    .map(|(metric, min, max)| TargetRange {
        enabled: false,
        ..TargetRange::new(metric, min, max)
    })
    .collect()
}

/// First enabled range configured for `metric`, if any.
pub fn target_for(targets: &[TargetRange], metric: Metric) -> Option<&TargetRange> {
    targets.iter().find(|t| t.metric == metric && t.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_bounds() {
        let range = TargetRange::new(Metric::HeartRate, 120.0, 150.0);
        assert_eq!(range.classify(119.9), TargetStatus::Below);
        assert_eq!(range.classify(120.0), TargetStatus::Within);
        assert_eq!(range.classify(150.0), TargetStatus::Within);
        assert_eq!(range.classify(150.1), TargetStatus::Above);
        assert!(range.contains(135.0));
    }

    #[test]
    fn disabled_never_classifies() {
        let range = TargetRange {
            enabled: false,
            ..TargetRange::new(Metric::Power, 150.0, 200.0)
        };
        assert_eq!(range.classify(10.0), TargetStatus::Disabled);
        // Still answers the raw question
        assert!(!range.contains(10.0));
    }

    #[test]
    fn defaults_start_disabled() {
        let targets = default_targets();
        assert_eq!(targets.len(), 5);
        assert!(targets.iter().all(|t| !t.enabled));
        assert!(target_for(&targets, Metric::HeartRate).is_none());
    }
}
