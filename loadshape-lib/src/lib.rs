#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod executor;
pub mod metrics;
pub mod threshold;
pub mod utils;
pub mod vu;
pub mod workload;
