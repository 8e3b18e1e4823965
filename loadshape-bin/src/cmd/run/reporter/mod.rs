use std::collections::BTreeMap;

use loadshape_lib::metrics::MetricEvent;
use rama::utils::str::arcstr::ArcStr;

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonlReporter};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Counters {
    iterations: u64,
    ok: u64,
    failed: u64,
    dropped: u64,
    aborted: u64,
}

impl Counters {
    fn apply(&mut self, ev: &MetricEvent) {
        match ev {
            MetricEvent::Iteration(sample) => {
                self.iterations += 1;
                if sample.success {
                    self.ok += 1;
                } else {
                    self.failed += 1;
                }
            }
            MetricEvent::Dropped(_) => self.dropped += 1,
            MetricEvent::Aborted(_) => self.aborted += 1,
            MetricEvent::Vus(_) => (),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "iterations": self.iterations,
            "ok": self.ok,
            "failed": self.failed,
            "dropped": self.dropped,
            "aborted": self.aborted,
        })
    }
}

/// Interval and running totals, shared by all reporters.
#[derive(Debug, Default)]
struct Progress {
    interval_counts: Counters,
    total_counts: Counters,
    /// Latest (active, live) VU counts per scenario.
    vus: BTreeMap<ArcStr, (u64, u64)>,
    last_tick: std::time::Duration,
}

impl Progress {
    fn apply(&mut self, ev: &MetricEvent) {
        self.interval_counts.apply(ev);
        self.total_counts.apply(ev);
        if let MetricEvent::Vus(gauge) = ev {
            self.vus
                .insert(gauge.scenario.clone(), (gauge.active, gauge.live));
        }
    }

    fn active_vus(&self) -> u64 {
        self.vus.values().map(|(active, _)| active).sum()
    }

    fn live_vus(&self) -> u64 {
        self.vus.values().map(|(_, live)| live).sum()
    }

    /// Iterations per second since the previous tick; resets the interval counts.
    fn rotate(&mut self, now: std::time::Duration) -> (f64, Counters) {
        let interval = now.saturating_sub(self.last_tick).as_secs_f64();
        self.last_tick = now;

        let counts = std::mem::take(&mut self.interval_counts);
        let ips = if interval == 0. {
            0.
        } else {
            counts.iterations as f64 / interval
        };
        (ips, counts)
    }
}
