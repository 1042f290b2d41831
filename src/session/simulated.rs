use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::TAU;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::{Metric, MetricsStore};

pub const SIMULATION_TICK: Duration = Duration::from_secs(1);

// Trailing window the averaged metrics are computed over
const AVERAGE_WINDOW: usize = 10;

/// (metric, centre, swing, period in ticks, jitter, clamp low, clamp high)
const WAVEFORMS: [(Metric, f64, f64, f64, f64, f64, f64); 5] = [
    (Metric::HeartRate, 135.0, 25.0, 180.0, 3.0, 60.0, 200.0),
    (Metric::Power, 190.0, 80.0, 90.0, 15.0, 0.0, 400.0),
    (Metric::Cadence, 85.0, 10.0, 60.0, 3.0, 0.0, 120.0),
    (Metric::Speed, 27.0, 6.0, 90.0, 1.0, 0.0, 50.0),
    (Metric::Resistance, 8.0, 3.0, 240.0, 0.0, 1.0, 20.0),
];

/// Produces plausible ride data one tick at a time.
pub struct Simulator {
    rng: StdRng,
    tick: u64,
    distance_m: f64,
    recent: BTreeMap<Metric, VecDeque<f64>>,
}

impl Simulator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            tick: 0,
            distance_m: 0.0,
            recent: BTreeMap::new(),
        }
    }

    fn trailing_mean(&mut self, metric: Metric, value: f64) -> f64 {
        let window = self.recent.entry(metric).or_default();
        if window.len() == AVERAGE_WINDOW {
            window.pop_front();
        }
        window.push_back(value);
        window.iter().sum::<f64>() / window.len() as f64
    }

    pub fn next_sample(&mut self) -> BTreeMap<Metric, f64> {
        let t = self.tick as f64;
        self.tick += 1;

        let mut sample = BTreeMap::new();
        for (metric, centre, swing, period, jitter, low, high) in WAVEFORMS {
            let noise = if jitter > 0.0 {
                self.rng.gen_range(-jitter..=jitter)
            } else {
                0.0
            };
            let mut value = (centre + swing * (TAU * t / period).sin() + noise).clamp(low, high);
            if metric == Metric::Resistance {
                value = value.round();
            }
            sample.insert(metric, value);
        }

        for (raw, averaged) in [
            (Metric::Power, Metric::AvgPower),
            (Metric::Cadence, Metric::AvgCadence),
            (Metric::Speed, Metric::AvgSpeed),
        ] {
            let mean = self.trailing_mean(raw, sample[&raw]);
            sample.insert(averaged, mean);
        }

        // km/h over one tick, in meters
        self.distance_m += sample[&Metric::Speed] / 3.6 * SIMULATION_TICK.as_secs_f64();
        sample.insert(Metric::Distance, self.distance_m.floor());

        sample
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn simulation_thread(store: MetricsStore, cancel_token: CancellationToken) {
    let mut simulator = Simulator::new();
    let mut tick_interval = time::interval(SIMULATION_TICK);
    info!("Simulated sensor data started");

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let sample = simulator.next_sample();
                let timestamp = store.now();
                debug!("Simulated sample: {:?}", sample);
                for (metric, value) in sample {
                    store.append(metric, value, timestamp);
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Shutting down simulation thread!");
                break;
            }
        }
    }
}
