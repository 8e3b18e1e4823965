use loadshape_lib::metrics::{MetricEvent, Reporter};

use super::Progress;

/// Prints a progress line per reporter interval.
#[derive(Debug, Default)]
pub struct HumanReporter {
    progress: Progress,
}

impl HumanReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for HumanReporter {
    fn on_event(&mut self, ev: &MetricEvent) {
        self.progress.apply(ev);
    }

    fn on_tick(&mut self, now: std::time::Duration) {
        let (ips, interval) = self.progress.rotate(now);
        let total = &self.progress.total_counts;

        println!(
            "t={:.1}s vus={} live={} ips={:.1} ok={} failed={} dropped={} aborted={} total_ok={} total_failed={}",
            now.as_secs_f64(),
            self.progress.active_vus(),
            self.progress.live_vus(),
            ips,
            interval.ok,
            interval.failed,
            interval.dropped,
            interval.aborted,
            total.ok,
            total.failed,
        );
    }

    fn finish(&mut self) {
        let total = &self.progress.total_counts;
        println!(
            "done iterations={} ok={} failed={} dropped={} aborted={}",
            total.iterations, total.ok, total.failed, total.dropped, total.aborted,
        );
    }
}
