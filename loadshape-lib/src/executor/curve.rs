use std::time::Duration;

use crate::config::Stage;

/// Slack absorbing float error when rounding the cumulative iteration count up.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    /// Offset of the segment start, in seconds.
    start: f64,
    /// Length of the segment, in seconds.
    length: f64,
    from: f64,
    to: f64,
}

impl Segment {
    fn end(&self) -> f64 {
        self.start + self.length
    }

    fn value_at(&self, elapsed: f64) -> f64 {
        self.from + (self.to - self.from) * (elapsed / self.length)
    }

    /// Area under the segment from its start until `elapsed` seconds into it.
    fn area_until(&self, elapsed: f64) -> f64 {
        let elapsed = elapsed.clamp(0., self.length);
        self.from * elapsed + (self.to - self.from) * elapsed * elapsed / (2. * self.length)
    }
}

fn segments(start: f64, stages: &[Stage], scale: f64) -> Vec<Segment> {
    let mut offset = 0.;
    let mut from = start;
    stages
        .iter()
        .filter(|stage| !stage.duration.is_zero())
        .map(|stage| {
            let to = stage.target as f64 * scale;
            let segment = Segment {
                start: offset,
                length: stage.duration.as_secs_f64(),
                from,
                to,
            };
            offset = segment.end();
            from = to;
            segment
        })
        .collect()
}

fn find_segment(segments: &[Segment], t: f64) -> Option<&Segment> {
    segments.iter().find(|segment| t < segment.end())
}

/// Piecewise-linear iteration rate over time, in iterations per second.
#[derive(Debug, Clone, PartialEq)]
pub struct RateCurve {
    segments: Vec<Segment>,
    duration: Duration,
}

impl RateCurve {
    pub fn constant(rate: u64, time_unit: Duration, duration: Duration) -> Self {
        let per_second = rate as f64 / time_unit.as_secs_f64();
        Self {
            segments: vec![Segment {
                start: 0.,
                length: duration.as_secs_f64(),
                from: per_second,
                to: per_second,
            }],
            duration,
        }
    }

    /// Ramp linearly from `start_rate` through each stage target.
    ///
    /// With a `duration` the curve is either extended (holding the last target)
    /// or cut to exactly that duration.
    pub fn ramping(
        start_rate: u64,
        time_unit: Duration,
        stages: &[Stage],
        duration: Option<Duration>,
    ) -> Self {
        let scale = 1. / time_unit.as_secs_f64();
        let mut segments = segments(start_rate as f64 * scale, stages, scale);
        let stages_duration: Duration = stages.iter().map(|stage| stage.duration).sum();

        let duration = match duration {
            None => stages_duration,
            Some(duration) if duration > stages_duration => {
                let last = segments
                    .last()
                    .map(|segment| segment.to)
                    .unwrap_or(start_rate as f64 * scale);
                segments.push(Segment {
                    start: stages_duration.as_secs_f64(),
                    length: (duration - stages_duration).as_secs_f64(),
                    from: last,
                    to: last,
                });
                duration
            }
            Some(duration) => {
                let cut = duration.as_secs_f64();
                segments.retain(|segment| segment.start < cut);
                if let Some(last) = segments.last_mut()
                    && last.end() > cut
                {
                    let length = cut - last.start;
                    last.to = last.value_at(length);
                    last.length = length;
                }
                duration
            }
        };

        Self { segments, duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Instantaneous rate at `t`, zero once the curve ended.
    pub fn rate_at(&self, t: Duration) -> f64 {
        let t = t.as_secs_f64();
        find_segment(&self.segments, t)
            .map(|segment| segment.value_at(t - segment.start))
            .unwrap_or(0.)
    }

    /// Cumulative number of iterations `N(t)` the curve asks for by `t`.
    pub fn iterations_until(&self, t: Duration) -> f64 {
        let t = t.as_secs_f64();
        self.segments
            .iter()
            .take_while(|segment| segment.start < t)
            .map(|segment| segment.area_until(t - segment.start))
            .sum()
    }

    /// Whole iterations which are due by `t`: `ceil(N(t))`.
    ///
    /// The first iteration is due right after the start.
    pub fn due_iterations(&self, t: Duration) -> u64 {
        let t = t.min(self.duration);
        (self.iterations_until(t) - EPSILON).ceil().max(0.) as u64
    }

    pub fn total_iterations(&self) -> u64 {
        self.due_iterations(self.duration)
    }
}

/// Piecewise-linear VU target over time.
#[derive(Debug, Clone, PartialEq)]
pub struct VuCurve {
    segments: Vec<Segment>,
    start: u64,
    duration: Duration,
}

impl VuCurve {
    pub fn new(start_vus: u64, stages: &[Stage]) -> Self {
        Self {
            segments: segments(start_vus as f64, stages, 1.),
            start: start_vus,
            duration: stages.iter().map(|stage| stage.duration).sum(),
        }
    }

    /// Fixed amount of VUs for the given duration.
    pub fn constant(vus: u64, duration: Duration) -> Self {
        Self::new(vus, &[Stage::new(vus, duration)])
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Largest target the curve ever reaches.
    pub fn max_target(&self) -> u64 {
        self.segments
            .iter()
            .map(|segment| segment.to as u64)
            .fold(self.start, u64::max)
    }

    /// Target VU count at `t`: the whole part of the curve value.
    ///
    /// A ramp up adds a VU once the line reaches the next integer,
    /// a ramp down removes one as soon as the line drops below the current one.
    /// Exactly the stage target at the end of each stage.
    pub fn target_at(&self, t: Duration) -> u64 {
        let t = t.as_secs_f64();
        match find_segment(&self.segments, t) {
            Some(segment) => (segment.value_at(t - segment.start) + EPSILON).floor().max(0.) as u64,
            None => self
                .segments
                .last()
                .map(|segment| segment.to as u64)
                .unwrap_or(self.start),
        }
    }
}
