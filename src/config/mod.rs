//! Configuration module

pub mod bench_config;
pub mod cli;
pub mod tls_config;

pub use bench_config::BenchConfig;
pub use cli::CliArgs;
pub use tls_config::TlsConfig;
