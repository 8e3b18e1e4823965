//! Pass/fail criteria over collected metrics.
//!
//! A rule such as `p(95)<500` on `iteration_duration` is parsed once into a
//! [`ThresholdRule`] and evaluated against a [`SampleSet`], either at the end
//! of a run or periodically on a snapshot.

use std::{cmp::Ordering, fmt, str::FromStr};

use rama::error::{BoxError, ErrorContext as _, ErrorExt as _};

use crate::metrics::{MetricData, SampleSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Max,
    Min,
    Avg,
    Med,
    Count,
    Value,
    Percentile(f64),
}

impl Aggregation {
    /// Apply this aggregation to the metric data,
    /// `None` if it is not supported by the metric kind.
    pub fn apply(self, data: &MetricData) -> Option<f64> {
        match (self, data) {
            (Aggregation::Avg, MetricData::Trend(trend)) => Some(trend.avg()),
            (Aggregation::Min, MetricData::Trend(trend)) => Some(trend.min()),
            (Aggregation::Max, MetricData::Trend(trend)) => Some(trend.max()),
            (Aggregation::Med, MetricData::Trend(trend)) => Some(trend.med()),
            (Aggregation::Percentile(q), MetricData::Trend(trend)) => Some(trend.percentile(q)),
            (Aggregation::Count, MetricData::Trend(trend)) => Some(trend.count() as f64),

            (Aggregation::Rate, MetricData::Rate { hits, total }) => {
                Some(*hits as f64 / (*total).max(1) as f64)
            }

            (Aggregation::Count, MetricData::Counter { count, .. }) => Some(*count as f64),
            (Aggregation::Rate, MetricData::Counter { count, window }) => {
                let secs = window.as_secs_f64();
                Some(if secs > 0. { *count as f64 / secs } else { 0. })
            }

            (Aggregation::Value, MetricData::Gauge(values)) => values.last().copied(),
            (Aggregation::Min, MetricData::Gauge(values)) => {
                values.iter().copied().min_by(f64::total_cmp)
            }
            (Aggregation::Max, MetricData::Gauge(values)) => {
                values.iter().copied().max_by(f64::total_cmp)
            }

            _ => None,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Value => f.write_str("value"),
            Aggregation::Percentile(q) => write!(f, "p({q})"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "rate" => Aggregation::Rate,
            "max" => Aggregation::Max,
            "min" => Aggregation::Min,
            "avg" => Aggregation::Avg,
            "med" => Aggregation::Med,
            "count" => Aggregation::Count,
            "value" => Aggregation::Value,
            _ => {
                let q = s
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| {
                        BoxError::from("unknown aggregation").context_str_field("aggregation", s)
                    })?
                    .trim()
                    .parse::<f64>()
                    .context("parse percentile")?;
                if !(0. ..=100.).contains(&q) {
                    return Err(BoxError::from("percentile out of range [0, 100]")
                        .context_debug_field("percentile", q));
                }
                Aggregation::Percentile(q)
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    // two-char operators first so `<=` is not read as `<`
    const OPERATORS: [(&str, Comparator); 6] = [
        ("<=", Comparator::Le),
        (">=", Comparator::Ge),
        ("==", Comparator::Eq),
        ("!=", Comparator::Ne),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }

    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
            Comparator::Eq => observed == bound,
            Comparator::Ne => observed != bound,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single threshold: `<aggregation> <comparator> <bound>` on a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    metric: String,
    aggregation: Aggregation,
    comparator: Comparator,
    bound: f64,
    expression: String,
}

impl ThresholdRule {
    /// Parse a threshold expression such as `rate<0.1` or `p(95) <= 300`.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, BoxError> {
        let metric = metric.trim();
        if metric.is_empty() {
            return Err(BoxError::from("threshold metric name cannot be empty"));
        }

        let (position, (operator, comparator)) = Comparator::OPERATORS
            .iter()
            .filter_map(|op| expression.find(op.0).map(|position| (position, *op)))
            .min_by_key(|(position, (operator, _))| (*position, usize::MAX - operator.len()))
            .ok_or_else(|| {
                BoxError::from("threshold expression has no comparator")
                    .context_str_field("expression", expression)
            })?;

        let aggregation: Aggregation = expression[..position]
            .trim()
            .parse()
            .with_context(|| format!("parse aggregation of threshold '{expression}'"))?;
        let bound: f64 = expression[position + operator.len()..]
            .trim()
            .parse()
            .with_context(|| format!("parse bound of threshold '{expression}'"))?;

        Ok(Self {
            metric: metric.to_owned(),
            aggregation,
            comparator,
            bound,
            expression: expression.trim().to_owned(),
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn evaluate(&self, samples: &SampleSet) -> RuleOutcome {
        let (status, observed) = match samples.metric(&self.metric) {
            None => (RuleStatus::NoData, None),
            Some(data) => match self.aggregation.apply(&data) {
                None => (RuleStatus::Unsupported, None),
                Some(observed) if self.comparator.holds(observed, self.bound) => {
                    (RuleStatus::Passed, Some(observed))
                }
                Some(observed) => (RuleStatus::Failed, Some(observed)),
            },
        };

        RuleOutcome {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            status,
            observed,
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Passed,
    Failed,
    /// The metric has no observations, which counts as passed.
    NoData,
    /// The aggregation does not apply to the metric kind, which counts as failed.
    Unsupported,
}

impl RuleStatus {
    pub fn is_pass(self) -> bool {
        matches!(self, RuleStatus::Passed | RuleStatus::NoData)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub metric: String,
    pub expression: String,
    pub status: RuleStatus,
    pub observed: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdReport {
    outcomes: Vec<RuleOutcome>,
    partial: bool,
}

impl ThresholdReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.status.is_pass())
    }

    /// Outcomes ordered by metric name, then expression.
    pub fn outcomes(&self) -> &[RuleOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.status.is_pass())
    }

    /// Evaluated over data of a run which was interrupted.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn mark_partial(&mut self) {
        self.partial = true;
    }
}

/// Evaluate every rule against the samples. No rule short-circuits another.
pub fn evaluate(rules: &[ThresholdRule], samples: &SampleSet) -> ThresholdReport {
    let mut outcomes: Vec<_> = rules.iter().map(|rule| rule.evaluate(samples)).collect();
    outcomes.sort_by(|a, b| match a.metric.cmp(&b.metric) {
        Ordering::Equal => a.expression.cmp(&b.expression),
        ordering => ordering,
    });

    ThresholdReport {
        outcomes,
        partial: false,
    }
}

/// Parse `(metric, expression)` pairs, failing on the first invalid one.
pub fn parse_rules<'a>(
    thresholds: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<ThresholdRule>, BoxError> {
    thresholds
        .into_iter()
        .map(|(metric, expression)| ThresholdRule::parse(metric, expression))
        .collect()
}
