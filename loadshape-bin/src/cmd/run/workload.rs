use std::time::Duration;

use rama::{error::BoxError, telemetry::tracing};

use clap::Args;
use loadshape_lib::workload::{IterationContext, IterationReport, Workload};

use crate::cmd::secs_arg;

/// Timing of the simulated request.
pub const SIM_REQ_DURATION: &str = "sim_req_duration";
/// Tail end of the simulated request spent receiving the response.
pub const SIM_REQ_RECEIVING: &str = "sim_req_receiving";
/// Check passed when the simulated request succeeded.
pub const SIM_REQ_OK: &str = "sim_req_ok";

#[derive(Debug, Clone, Args)]
/// Parameters of the simulated workload.
pub struct SimulationConfig {
    /// latency of a simulated request
    #[arg(long, value_name = "SECONDS", default_value_t = 0.1)]
    pub latency: f64,

    /// maximum latency deviation, applied uniformly in both directions
    #[arg(long, value_name = "SECONDS", default_value_t = 0.02)]
    pub jitter: f64,

    /// probability in [0, 1] that a simulated request fails
    #[arg(long, value_name = "P", default_value_t = 0.)]
    pub error_rate: f64,

    /// pause at the end of every iteration, counted as part of it
    #[arg(long, value_name = "SECONDS", default_value_t = 0.)]
    pub think_time: f64,
}

/// Workload which pretends to do a request: it sleeps for a jittered latency
/// and fails with a configured probability. No I/O is performed.
#[derive(Debug, Clone)]
pub struct SimulatedWorkload {
    latency: Duration,
    jitter: Duration,
    error_rate: f64,
    think_time: Duration,
}

impl SimulatedWorkload {
    /// Non-positive timings become zero, timings too large for a [`Duration`] are an error.
    pub fn new(cfg: &SimulationConfig) -> Result<Self, BoxError> {
        Ok(Self {
            latency: secs_arg("latency", cfg.latency)?.unwrap_or_default(),
            jitter: secs_arg("jitter", cfg.jitter)?.unwrap_or_default(),
            error_rate: if cfg.error_rate.is_finite() {
                cfg.error_rate.clamp(0.0, 1.0)
            } else {
                0.
            },
            think_time: secs_arg("think-time", cfg.think_time)?.unwrap_or_default(),
        })
    }

    fn jittered_latency(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let jitter = self.jitter.as_secs_f64();
        let offset = rand::random_range(-jitter..=jitter);
        Duration::try_from_secs_f64((self.latency.as_secs_f64() + offset).max(0.))
            .unwrap_or(Duration::MAX)
    }

    fn fails(&self) -> bool {
        self.error_rate > 0. && rand::random_bool(self.error_rate)
    }
}

/// One tenth of every simulated request is spent receiving.
const RECEIVING_SHARE: u32 = 10;

impl Workload for SimulatedWorkload {
    type Item = serde_json::Value;

    async fn iteration(
        &self,
        ctx: IterationContext,
        item: Self::Item,
    ) -> Result<IterationReport, BoxError> {
        let latency = self.jittered_latency();
        let failed = self.fails();

        tracing::trace!(
            scenario = %ctx.scenario,
            vu = %ctx.vu,
            iteration = ctx.iteration,
            %item,
            ?latency,
            failed,
            "simulated request"
        );

        tokio::time::sleep(latency).await;

        let report = if failed {
            IterationReport::failure()
        } else {
            IterationReport::success()
        }
        .with_timing(SIM_REQ_DURATION, latency)
        .with_timing(SIM_REQ_RECEIVING, latency / RECEIVING_SHARE)
        .with_check(SIM_REQ_OK, !failed);

        if !self.think_time.is_zero() {
            tokio::time::sleep(self.think_time).await;
        }

        Ok(report)
    }
}
