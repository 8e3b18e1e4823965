use std::{collections::BTreeSet, fmt::Write as _};

use loadshape_lib::{
    engine::RunReport,
    metrics::{MetricData, SampleSet, names},
    threshold::RuleStatus,
};

const BUILTIN_METRICS: &[&str] = &[
    names::ITERATION_DURATION,
    names::ITERATIONS,
    names::ITERATION_FAILED,
    names::CHECKS,
    names::DROPPED_ITERATIONS,
    names::ABORTED_ITERATIONS,
    names::VUS,
];

/// Built-in metric names followed by the custom ones the workload reported.
fn metric_names(samples: &SampleSet) -> Vec<String> {
    let custom: BTreeSet<&str> = samples
        .samples()
        .iter()
        .flat_map(|sample| {
            sample
                .timings
                .iter()
                .map(|(name, _)| name.as_str())
                .chain(sample.checks.iter().map(|(name, _)| name.as_str()))
        })
        .filter(|name| !BUILTIN_METRICS.contains(name))
        .collect();

    BUILTIN_METRICS
        .iter()
        .copied()
        .chain(custom)
        .map(ToOwned::to_owned)
        .collect()
}

fn describe(data: &MetricData) -> String {
    match data {
        MetricData::Trend(trend) => format!(
            "avg={:.2}ms min={:.2}ms med={:.2}ms max={:.2}ms p(90)={:.2}ms p(95)={:.2}ms",
            trend.avg(),
            trend.min(),
            trend.med(),
            trend.max(),
            trend.percentile(90.),
            trend.percentile(95.),
        ),
        MetricData::Rate { hits, total } => format!(
            "{:.2}% {hits} out of {total}",
            *hits as f64 * 100. / (*total).max(1) as f64,
        ),
        MetricData::Counter { count, window } => {
            let secs = window.as_secs_f64();
            let rate = if secs > 0. { *count as f64 / secs } else { 0. };
            format!("{count} {rate:.2}/s")
        }
        MetricData::Gauge(values) => {
            let last = values.last().copied().unwrap_or_default();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            format!("value={last} min={min} max={max}")
        }
    }
}

fn status_str(status: RuleStatus) -> &'static str {
    match status {
        RuleStatus::Passed => "passed",
        RuleStatus::Failed => "failed",
        RuleStatus::NoData => "no_data",
        RuleStatus::Unsupported => "unsupported",
    }
}

pub fn render_human(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "run finished in {:.2}s{}",
        report.elapsed.as_secs_f64(),
        if report.partial { " (partial)" } else { "" },
    );

    for scenario in &report.scenarios {
        if scenario.skipped {
            let _ = writeln!(out, "  scenario {}: skipped", scenario.name);
            continue;
        }
        let _ = writeln!(
            out,
            "  scenario {} [{}]: scheduled={} dispatched={} completed={} dropped={} aborted={} max_vus={}{}",
            scenario.name,
            scenario.executor,
            scenario.scheduled,
            scenario.dispatched,
            scenario.completed,
            scenario.dropped,
            scenario.aborted,
            scenario.max_live_vus,
            if scenario.interrupted { " interrupted" } else { "" },
        );
    }

    for name in metric_names(&report.samples) {
        if let Some(data) = report.samples.metric(&name) {
            let _ = writeln!(out, "  {name:.<28} {}", describe(&data));
        }
    }

    if !report.thresholds.outcomes().is_empty() {
        let _ = writeln!(out, "thresholds:");
    }
    for outcome in report.thresholds.outcomes() {
        let mark = if outcome.status.is_pass() { "✓" } else { "✗" };
        let observed = outcome
            .observed
            .map(|value| format!(" observed={value:.4}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {mark} {}: {} ({}){observed}",
            outcome.metric,
            outcome.expression,
            status_str(outcome.status),
        );
    }

    let _ = writeln!(
        out,
        "verdict: {}",
        if report.passed() { "passed" } else { "failed" },
    );
    out
}

pub fn render_json(report: &RunReport) -> serde_json::Value {
    let scenarios: Vec<_> = report
        .scenarios
        .iter()
        .map(|scenario| {
            serde_json::json!({
                "name": scenario.name.as_str(),
                "executor": scenario.executor.as_str(),
                "started_at_ms": scenario.started_at.as_millis(),
                "ended_at_ms": scenario.ended_at.as_millis(),
                "scheduled": scenario.scheduled,
                "dispatched": scenario.dispatched,
                "completed": scenario.completed,
                "dropped": scenario.dropped,
                "aborted": scenario.aborted,
                "max_live_vus": scenario.max_live_vus,
                "interrupted": scenario.interrupted,
                "skipped": scenario.skipped,
            })
        })
        .collect();

    let metrics: serde_json::Map<_, _> = metric_names(&report.samples)
        .into_iter()
        .filter_map(|name| {
            let data = report.samples.metric(&name)?;
            let value = match &data {
                MetricData::Trend(trend) => serde_json::json!({
                    "type": data.kind(),
                    "count": trend.count(),
                    "avg": trend.avg(),
                    "min": trend.min(),
                    "med": trend.med(),
                    "max": trend.max(),
                    "p(90)": trend.percentile(90.),
                    "p(95)": trend.percentile(95.),
                }),
                MetricData::Rate { hits, total } => serde_json::json!({
                    "type": data.kind(),
                    "hits": hits,
                    "total": total,
                }),
                MetricData::Counter { count, window } => serde_json::json!({
                    "type": data.kind(),
                    "count": count,
                    "window_ms": window.as_millis(),
                }),
                MetricData::Gauge(values) => serde_json::json!({
                    "type": data.kind(),
                    "value": values.last(),
                }),
            };
            Some((name, value))
        })
        .collect();

    let thresholds: Vec<_> = report
        .thresholds
        .outcomes()
        .iter()
        .map(|outcome| {
            serde_json::json!({
                "metric": outcome.metric,
                "expression": outcome.expression,
                "status": status_str(outcome.status),
                "observed": outcome.observed,
            })
        })
        .collect();

    serde_json::json!({
        "type": "report",
        "elapsed_ms": report.elapsed.as_millis(),
        "partial": report.partial,
        "passed": report.passed(),
        "scenarios": scenarios,
        "metrics": metrics,
        "thresholds": thresholds,
    })
}
