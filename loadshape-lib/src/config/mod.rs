//! Run configuration.
//!
//! Configuration is deserialized into raw (all optional) structures first,
//! which are validated once into the immutable [`RunConfig`] and [`ScenarioSpec`] types.
//! Nothing is generated before validation succeeded.

mod duration;
mod run;
mod scenario;
mod stage;

pub use self::{
    duration::parse_humantime_str,
    run::{RawRunConfig, RunConfig},
    scenario::{
        ConstantArrivalRate, ConstantVus, ExecutorConfig, ExecutorKind, RampingArrivalRate,
        RampingVus, RawScenario, ScenarioSpec,
    },
    stage::{RawStage, Stage},
};
