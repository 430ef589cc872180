//! Core of the loadgen HTTP load tester: a worker pool that paces requests to
//! a ramping target rate, a lock-free statistics sink and the reports built
//! from it.

pub mod client;
pub mod config;
pub mod definition;
pub mod error;
pub mod percentile;
pub mod perf_hint;
pub mod pool;
pub mod ramp;
pub mod report;
pub mod runner;
pub mod statistic;
pub mod stats;
pub mod worker;

pub use client::*;
pub use config::*;
pub use definition::*;
pub use error::*;
pub use percentile::*;
pub use perf_hint::*;
pub use pool::*;
pub use ramp::*;
pub use report::*;
pub use runner::*;
pub use statistic::*;
pub use stats::*;
pub use worker::*;
