//! Utility modules

pub mod error;
pub mod wire;

pub use error::{BenchError, PoolError, ProvisioningError, Result, UnitOfWorkError};
