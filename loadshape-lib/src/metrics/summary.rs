use std::{collections::BTreeMap, time::Duration};

use rama::utils::str::arcstr::ArcStr;

use super::{
    MetricEvent, names,
    sample::{AbortedIteration, DroppedIteration, Sample, VuGauge},
};

/// Everything recorded during (part of) a run, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    samples: Vec<Sample>,
    dropped: Vec<DroppedIteration>,
    aborted: Vec<AbortedIteration>,
    vus: Vec<VuGauge>,
    window: Duration,
}

impl SampleSet {
    pub(super) fn push(&mut self, event: MetricEvent) {
        match event {
            MetricEvent::Iteration(sample) => self.samples.push(sample),
            MetricEvent::Dropped(dropped) => self.dropped.push(dropped),
            MetricEvent::Aborted(aborted) => self.aborted.push(aborted),
            MetricEvent::Vus(gauge) => self.vus.push(gauge),
        }
    }

    pub(super) fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn dropped(&self) -> &[DroppedIteration] {
        &self.dropped
    }

    pub fn aborted(&self) -> &[AbortedIteration] {
        &self.aborted
    }

    pub fn vu_gauges(&self) -> &[VuGauge] {
        &self.vus
    }

    /// Time span (since run start) this set covers.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn samples_for<'a>(&'a self, scenario: &'a str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples
            .iter()
            .filter(move |sample| sample.scenario.as_str() == scenario)
    }

    pub fn failed(&self) -> usize {
        self.samples.iter().filter(|sample| !sample.success).count()
    }

    /// Aggregate the data of the named metric.
    ///
    /// Returns `None` for metrics without any observation.
    /// The counter metrics always have data.
    pub fn metric(&self, name: &str) -> Option<MetricData> {
        match name {
            names::ITERATION_DURATION => Trend::try_new(
                self.samples
                    .iter()
                    .map(|sample| duration_ms(sample.duration))
                    .collect(),
            )
            .map(MetricData::Trend),
            names::ITERATIONS => Some(self.counter(self.samples.len())),
            names::ITERATION_FAILED => rate(self.samples.iter().map(|sample| !sample.success)),
            names::CHECKS => rate(
                self.samples
                    .iter()
                    .flat_map(|sample| sample.checks.iter().map(|(_, ok)| *ok)),
            ),
            names::DROPPED_ITERATIONS => Some(self.counter(self.dropped.len())),
            names::ABORTED_ITERATIONS => Some(self.counter(self.aborted.len())),
            names::VUS => {
                let values = self.vu_series();
                (!values.is_empty()).then_some(MetricData::Gauge(values))
            }
            custom => self.custom_metric(custom),
        }
    }

    fn custom_metric(&self, name: &str) -> Option<MetricData> {
        let timings: Vec<f64> = self
            .samples
            .iter()
            .flat_map(|sample| sample.timings.iter())
            .filter(|(timing, _)| timing.as_str() == name)
            .map(|(_, duration)| duration_ms(*duration))
            .collect();
        if let Some(trend) = Trend::try_new(timings) {
            return Some(MetricData::Trend(trend));
        }

        rate(
            self.samples
                .iter()
                .flat_map(|sample| sample.checks.iter())
                .filter(|(check, _)| check.as_str() == name)
                .map(|(_, ok)| *ok),
        )
    }

    fn counter(&self, count: usize) -> MetricData {
        MetricData::Counter {
            count: count as u64,
            window: self.window,
        }
    }

    /// Total active VUs over time: after every observation
    /// the latest value of each scenario is summed.
    fn vu_series(&self) -> Vec<f64> {
        let mut latest: BTreeMap<&ArcStr, u64> = BTreeMap::new();
        self.vus
            .iter()
            .map(|gauge| {
                latest.insert(&gauge.scenario, gauge.active);
                latest.values().sum::<u64>() as f64
            })
            .collect()
    }
}

/// Aggregated data of a single metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricData {
    /// Distribution of values, e.g. durations in milliseconds.
    Trend(Trend),
    /// Fraction of hits (true values) out of all observations.
    Rate { hits: u64, total: u64 },
    /// Monotonic count over the window of the sample set.
    Counter { count: u64, window: Duration },
    /// Observed values in time order.
    Gauge(Vec<f64>),
}

impl MetricData {
    pub fn kind(&self) -> &'static str {
        match self {
            MetricData::Trend(_) => "trend",
            MetricData::Rate { .. } => "rate",
            MetricData::Counter { .. } => "counter",
            MetricData::Gauge(_) => "gauge",
        }
    }
}

/// Sorted, non-empty list of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    values: Vec<f64>,
}

impl Trend {
    pub fn try_new(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        Some(Self { values })
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn min(&self) -> f64 {
        self.values[0]
    }

    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    pub fn avg(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn med(&self) -> f64 {
        self.percentile(50.)
    }

    /// Percentile `q` (in `0..=100`), linearly interpolated between the closest ranks.
    pub fn percentile(&self, q: f64) -> f64 {
        let q = q.clamp(0., 100.);
        let rank = q / 100. * (self.values.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let weight = rank - lo as f64;
        self.values[lo] + (self.values[hi] - self.values[lo]) * weight
    }
}

fn rate(observations: impl Iterator<Item = bool>) -> Option<MetricData> {
    let (hits, total) = observations.fold((0, 0), |(hits, total), hit| {
        (hits + u64::from(hit), total + 1)
    });
    (total > 0).then_some(MetricData::Rate { hits, total })
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.
}
