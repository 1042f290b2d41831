use std::collections::BTreeMap;

use crate::metrics::{Metric, MetricSeries, MetricsSnapshot, Unit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSummary {
    /// Not reported for distance, only its furthest point matters
    pub avg: Option<f64>,
    pub max: f64,
    pub unit: Unit,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutSummary {
    pub metrics: BTreeMap<Metric, MetricSummary>,
    pub duration_seconds: f64,
}

impl WorkoutSummary {
    pub fn get(&self, metric: Metric) -> Option<&MetricSummary> {
        self.metrics.get(&metric)
    }
}

fn series_max(series: &MetricSeries) -> f64 {
    series.values().fold(f64::NEG_INFINITY, f64::max)
}

/// Works the same on a live snapshot and on one loaded back from the archive.
/// Empty series are left out entirely.
pub fn summarize(snapshot: &MetricsSnapshot) -> WorkoutSummary {
    let mut metrics = BTreeMap::new();
    for (&metric, series) in snapshot.iter().filter(|(_, s)| !s.is_empty()) {
        let summary = if metric == Metric::Distance {
            MetricSummary {
                avg: None,
                max: series_max(series) / 1000.0,
                unit: Unit::Kilometers,
            }
        } else {
            let avg = series.values().sum::<f64>() / series.len() as f64;
            MetricSummary {
                avg: Some(avg),
                max: series_max(series),
                unit: metric.unit(),
            }
        };
        metrics.insert(metric, summary);
    }

    // Heart rate is the reference clock: it's there whenever a session recorded anything
    let duration_seconds = snapshot
        .get(&Metric::HeartRate)
        .filter(|series| !series.is_empty())
        .map(|series| {
            let (min, max) = series
                .timestamps()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
                    (lo.min(t), hi.max(t))
                });
            max - min
        })
        .unwrap_or(0.0);

    WorkoutSummary {
        metrics,
        duration_seconds,
    }
}
