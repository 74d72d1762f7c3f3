//! Benchmark orchestration
//!
//! - `dispatcher`: fans tasks over the pool and joins with a deadline
//! - `controller`: iterates the fork x variant x phase matrix
//! - `sample`: the recorded outcome of one dispatcher invocation

pub mod controller;
pub mod dispatcher;
pub mod sample;

pub use controller::RunController;
pub use dispatcher::{dispatch, DispatchOptions, DispatchOutcome, UnitOfWork};
pub use sample::{Phase, RunSample};
