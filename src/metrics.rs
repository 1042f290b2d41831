use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_derive::{Deserialize, Serialize};
use tracing::{trace, warn};

/// How long samples are kept, relative to the store's clock.
pub const RETENTION_SECONDS: f64 = 300.0;

// Hard cap per series on top of the time window, roughly 12 notifications a second
const MAX_SAMPLES_PER_SERIES: usize = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    Power,
    AvgPower,
    Cadence,
    AvgCadence,
    Speed,
    AvgSpeed,
    Distance,
    Resistance,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::HeartRate,
        Metric::Power,
        Metric::AvgPower,
        Metric::Cadence,
        Metric::AvgCadence,
        Metric::Speed,
        Metric::AvgSpeed,
        Metric::Distance,
        Metric::Resistance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HeartRate => "heart_rate",
            Metric::Power => "power",
            Metric::AvgPower => "avg_power",
            Metric::Cadence => "cadence",
            Metric::AvgCadence => "avg_cadence",
            Metric::Speed => "speed",
            Metric::AvgSpeed => "avg_speed",
            Metric::Distance => "distance",
            Metric::Resistance => "resistance",
        }
    }

    /// Unit of the values as they sit in the store.
    pub fn unit(&self) -> Unit {
        match self {
            Metric::HeartRate => Unit::Bpm,
            Metric::Power | Metric::AvgPower => Unit::Watts,
            Metric::Cadence | Metric::AvgCadence => Unit::Rpm,
            Metric::Speed | Metric::AvgSpeed => Unit::KilometersPerHour,
            Metric::Distance => Unit::Meters,
            Metric::Resistance => Unit::Unitless,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| format!("Unknown metric \"{s}\""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Bpm,
    Watts,
    Rpm,
    KilometersPerHour,
    Meters,
    Kilometers,
    Unitless,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Bpm => "bpm",
            Unit::Watts => "W",
            Unit::Rpm => "rpm",
            Unit::KilometersPerHour => "km/h",
            Unit::Meters => "m",
            Unit::Kilometers => "km",
            Unit::Unitless => "",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

/// Time-ordered samples for a single metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    samples: VecDeque<MetricSample>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> + '_ {
        self.samples.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.timestamp)
    }

    pub fn first(&self) -> Option<&MetricSample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    /// Returns `false` (and keeps nothing) if the sample would break time order.
    pub fn push(&mut self, sample: MetricSample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return false;
            }
        }
        if self.samples.len() == MAX_SAMPLES_PER_SERIES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    /// Drops every sample older than `cutoff`, returning how many went.
    pub fn evict_before(&mut self, cutoff: f64) -> usize {
        let mut evicted = 0;
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.timestamp < cutoff)
        {
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }
}

impl MetricSeries {
    /// Builds a series from recorded data, e.g. an archived workout.
    ///
    /// Unlike [`MetricSeries::push`] nothing is dropped: samples are put in time order
    /// and there is no capacity limit.
    pub fn from_samples(mut samples: Vec<MetricSample>) -> Self {
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self {
            samples: samples.into(),
        }
    }
}

impl FromIterator<MetricSample> for MetricSeries {
    fn from_iter<I: IntoIterator<Item = MetricSample>>(iter: I) -> Self {
        let mut series = MetricSeries::new();
        for sample in iter {
            series.push(sample);
        }
        series
    }
}

/// Owned copy of every series, detached from the live store.
pub type MetricsSnapshot = BTreeMap<Metric, MetricSeries>;

pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to. Used by tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: f64) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to the rolling per-metric time series of one session.
///
/// Clones point at the same data. Every operation runs under one lock and first trims
/// anything that has aged out of the retention window, so readers never see stale samples.
#[derive(Clone)]
pub struct MetricsStore {
    series: Arc<Mutex<BTreeMap<Metric, MetricSeries>>>,
    clock: Arc<dyn Clock>,
    retention: f64,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl fmt::Debug for MetricsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsStore")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl MetricsStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_retention(clock, RETENTION_SECONDS)
    }

    pub fn with_retention(clock: Arc<dyn Clock>, retention: f64) -> Self {
        let series = Metric::ALL
            .into_iter()
            .map(|metric| (metric, MetricSeries::new()))
            .collect();
        Self {
            series: Arc::new(Mutex::new(series)),
            clock,
            retention,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    // A panic elsewhere can't leave a series half-written, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, BTreeMap<Metric, MetricSeries>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict(&self, series: &mut BTreeMap<Metric, MetricSeries>) {
        let cutoff = self.clock.now() - self.retention;
        for (metric, samples) in series.iter_mut() {
            let evicted = samples.evict_before(cutoff);
            if evicted > 0 {
                trace!("Evicted {evicted} {metric} samples");
            }
        }
    }

    /// Appends at the end of `metric`'s series, then trims the window.
    ///
    /// Returns `false` if the sample was rejected for arriving out of order.
    pub fn append(&self, metric: Metric, value: f64, timestamp: f64) -> bool {
        let mut series = self.lock();
        let accepted = series
            .entry(metric)
            .or_default()
            .push(MetricSample { value, timestamp });
        if !accepted {
            warn!("Dropping out-of-order {metric} sample at {timestamp}");
        }
        self.evict(&mut series);
        accepted
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut series = self.lock();
        self.evict(&mut series);
        series.clone()
    }

    pub fn latest(&self, metric: Metric) -> Option<MetricSample> {
        let mut series = self.lock();
        self.evict(&mut series);
        series.get(&metric).and_then(|s| s.last().copied())
    }

    pub fn len(&self, metric: Metric) -> usize {
        let mut series = self.lock();
        self.evict(&mut series);
        series.get(&metric).map_or(0, MetricSeries::len)
    }

    pub fn is_empty(&self) -> bool {
        let mut series = self.lock();
        self.evict(&mut series);
        series.values().all(MetricSeries::is_empty)
    }

    /// Clears every series, typically right after the snapshot was archived.
    pub fn reset(&self) {
        for samples in self.lock().values_mut() {
            *samples = MetricSeries::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(start: f64) -> (Arc<ManualClock>, MetricsStore) {
        let clock = Arc::new(ManualClock::new(start));
        let store = MetricsStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn append_and_latest() {
        let (clock, store) = store_at(1000.0);
        assert_eq!(store.latest(Metric::Power), None);
        store.append(Metric::Power, 180.0, clock.now());
        clock.advance(1.0);
        store.append(Metric::Power, 200.0, clock.now());
        assert_eq!(store.len(Metric::Power), 2);
        assert_eq!(
            store.latest(Metric::Power),
            Some(MetricSample {
                value: 200.0,
                timestamp: 1001.0
            })
        );
        assert_eq!(store.len(Metric::HeartRate), 0);
    }

    #[test]
    fn samples_age_out() {
        let (clock, store) = store_at(0.0);
        store.append(Metric::HeartRate, 120.0, 0.0);
        clock.set(10.0);
        store.append(Metric::HeartRate, 125.0, 10.0);

        clock.set(RETENTION_SECONDS + 5.0);
        assert_eq!(store.len(Metric::HeartRate), 1);

        clock.set(RETENTION_SECONDS + 10.5);
        assert_eq!(store.len(Metric::HeartRate), 0);
        assert!(store.is_empty());
        assert_eq!(store.latest(Metric::HeartRate), None);
    }

    #[test]
    fn append_evicts_other_series_too() {
        let (clock, store) = store_at(0.0);
        store.append(Metric::Cadence, 90.0, 0.0);
        clock.set(400.0);
        store.append(Metric::Power, 150.0, 400.0);
        let snapshot = store.snapshot();
        assert!(snapshot[&Metric::Cadence].is_empty());
        assert_eq!(snapshot[&Metric::Power].len(), 1);
    }

    #[test]
    fn retained_window_holds() {
        let (clock, store) = store_at(0.0);
        for second in 0..1000 {
            clock.set(f64::from(second));
            store.append(Metric::Speed, 25.0, f64::from(second));
        }
        let now = clock.now();
        let snapshot = store.snapshot();
        let speed = &snapshot[&Metric::Speed];
        assert!(speed
            .timestamps()
            .all(|t| t >= now - RETENTION_SECONDS && t <= now));
        assert_eq!(speed.len(), 301);
    }

    #[test]
    fn out_of_order_rejected() {
        let (_clock, store) = store_at(100.0);
        assert!(store.append(Metric::HeartRate, 100.0, 100.0));
        assert!(!store.append(Metric::HeartRate, 101.0, 99.0));
        assert_eq!(store.len(Metric::HeartRate), 1);
    }

    #[test]
    fn series_capacity_bounded() {
        let mut series = MetricSeries::new();
        for i in 0..(MAX_SAMPLES_PER_SERIES + 10) {
            series.push(MetricSample {
                value: i as f64,
                timestamp: i as f64 * 0.01,
            });
        }
        assert_eq!(series.len(), MAX_SAMPLES_PER_SERIES);
        assert_eq!(series.first().map(|s| s.value), Some(10.0));
    }

    #[test]
    fn snapshot_is_detached() {
        let (clock, store) = store_at(50.0);
        store.append(Metric::Resistance, 5.0, clock.now());
        let snapshot = store.snapshot();
        store.reset();
        assert!(store.is_empty());
        assert_eq!(snapshot[&Metric::Resistance].len(), 1);
    }

    #[test]
    fn metric_names_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>(), Ok(metric));
        }
        assert!("cadance".parse::<Metric>().is_err());
    }

    #[test]
    fn recorded_series_keeps_every_sample() {
        let samples: Vec<MetricSample> = (0..MAX_SAMPLES_PER_SERIES * 2)
            .rev()
            .map(|i| MetricSample {
                value: i as f64,
                timestamp: i as f64,
            })
            .collect();
        let series = MetricSeries::from_samples(samples);
        assert_eq!(series.len(), MAX_SAMPLES_PER_SERIES * 2);
        assert_eq!(series.first().map(|s| s.timestamp), Some(0.0));
        assert_eq!(
            series.last().map(|s| s.timestamp),
            Some((MAX_SAMPLES_PER_SERIES * 2 - 1) as f64)
        );
    }
}
