use loadshape_lib::metrics::{MetricEvent, Reporter};

use super::Progress;

/// Writes progress as JSON lines on stdout.
///
/// With `emit_events` every completed, dropped or aborted iteration
/// gets its own `event` line next to the interval `summary` lines.
#[derive(Debug)]
pub struct JsonlReporter {
    progress: Progress,
    emit_events: bool,
}

impl JsonlReporter {
    pub fn new(emit_events: bool) -> Self {
        Self {
            progress: Progress::default(),
            emit_events,
        }
    }
}

fn event_line(ev: &MetricEvent) -> Option<serde_json::Value> {
    let line = match ev {
        MetricEvent::Iteration(sample) => serde_json::json!({
            "type": "event",
            "kind": "iteration",
            "scenario": sample.scenario.as_str(),
            "vu": sample.vu.number(),
            "iteration": sample.iteration,
            "t_ms": sample.started_at.as_millis(),
            "duration_ms": sample.duration.as_secs_f64() * 1000.,
            "ok": sample.success,
        }),
        MetricEvent::Dropped(dropped) => serde_json::json!({
            "type": "event",
            "kind": "dropped",
            "scenario": dropped.scenario.as_str(),
            "t_ms": dropped.at.as_millis(),
        }),
        MetricEvent::Aborted(aborted) => serde_json::json!({
            "type": "event",
            "kind": "aborted",
            "scenario": aborted.scenario.as_str(),
            "vu": aborted.vu.number(),
            "iteration": aborted.iteration,
            "t_ms": aborted.at.as_millis(),
        }),
        MetricEvent::Vus(_) => return None,
    };
    Some(line)
}

impl Reporter for JsonlReporter {
    fn on_event(&mut self, ev: &MetricEvent) {
        self.progress.apply(ev);

        if self.emit_events
            && let Some(line) = event_line(ev)
        {
            println!("{line}");
        }
    }

    fn on_tick(&mut self, now: std::time::Duration) {
        let (ips, interval) = self.progress.rotate(now);

        let line = serde_json::json!({
            "type": "summary",
            "t_ms": now.as_millis(),
            "vus": self.progress.active_vus(),
            "live_vus": self.progress.live_vus(),
            "ips": ips,
            "interval": interval.to_json(),
            "total": self.progress.total_counts.to_json(),
        });
        println!("{line}");
    }

    fn finish(&mut self) {
        let line = serde_json::json!({
            "type": "final",
            "total": self.progress.total_counts.to_json(),
        });
        println!("{line}");
    }
}
