//! Command-line argument parsing
//!
//! Connection parameters fall back to the `TEST_DB_*` environment
//! variables the upstream connector benchmarks use, so existing bench
//! environments work unchanged. Arguments are grouped by category.

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

/// Throughput benchmark for MariaDB/MySQL client connection variants
#[derive(Parser, Debug, Clone)]
#[command(name = "connector-bench")]
#[command(version, about, long_about = None)]
#[command(disable_help_flag = true)]
pub struct CliArgs {
    /// Print help information
    #[arg(long = "help", action = clap::ArgAction::Help)]
    help: (),

    // ===== Connection Options =====
    /// Server hostname
    #[arg(short = 'h', long = "host", env = "TEST_DB_HOST", default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(short = 'p', long = "port", env = "TEST_DB_PORT", default_value_t = 3306)]
    pub port: u16,

    /// User name
    #[arg(short = 'u', long = "user", env = "TEST_DB_USER", default_value = "root")]
    pub user: String,

    /// Password
    #[arg(short = 'a', long = "auth", env = "TEST_DB_PASSWORD", default_value = "")]
    pub password: String,

    /// Database name
    #[arg(
        short = 'D',
        long = "database",
        env = "TEST_DB_DATABASE",
        default_value = "bench"
    )]
    pub database: String,

    /// Extra options appended to the connection descriptor (k=v&k=v)
    #[arg(long = "conn-options", env = "TEST_DB_OTHER", default_value = "")]
    pub conn_options: String,

    /// Connect timeout in milliseconds
    #[arg(long = "connect-timeout-ms", default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    // ===== TLS Options =====
    /// Enable TLS for all variants
    #[arg(long = "tls")]
    pub tls: bool,

    /// Skip TLS certificate verification (insecure)
    #[arg(long = "tls-skip-verify")]
    pub tls_skip_verify: bool,

    /// CA certificate file for TLS
    #[arg(long = "tls-ca-cert")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Client certificate file for TLS
    #[arg(long = "tls-cert")]
    pub tls_cert: Option<PathBuf>,

    /// Client private key file for TLS
    #[arg(long = "tls-key")]
    pub tls_key: Option<PathBuf>,

    /// Server Name Indication for TLS
    #[arg(long = "tls-sni")]
    pub tls_sni: Option<String>,

    // ===== Benchmark Matrix =====
    /// Variant(s) to benchmark (comma separated; default: all)
    #[arg(short = 't', long = "variants", value_delimiter = ',')]
    pub variants: Option<Vec<String>>,

    /// Unit of work each task performs
    #[arg(short = 'w', long = "workload", default_value = "do-1")]
    pub workload: String,

    /// Members per batch for batch workloads
    #[arg(long = "batch-size", default_value_t = 100)]
    pub batch_size: usize,

    /// Connections per pool
    #[arg(short = 'c', long = "pool-size", default_value_t = 16)]
    pub pool_size: usize,

    /// Tasks submitted per dispatcher invocation
    #[arg(short = 'n', long = "tasks", default_value_t = 100)]
    pub tasks: u64,

    /// Warmup iterations per variant (recorded, non-authoritative)
    #[arg(long = "warmup-iterations", default_value_t = 10)]
    pub warmup_iterations: u32,

    /// Measurement iterations per variant
    #[arg(long = "measurement-iterations", default_value_t = 10)]
    pub measurement_iterations: u32,

    /// Fork replicates (isolated execution contexts)
    #[arg(short = 'f', long = "forks", default_value_t = 5)]
    pub forks: u32,

    // ===== Timing =====
    /// Join deadline per dispatcher invocation, seconds
    #[arg(long = "deadline-secs", default_value_t = 60)]
    pub deadline_secs: u64,

    /// Per-task bound on waiting for a pooled connection, milliseconds
    #[arg(long = "acquire-timeout-ms", default_value_t = 30_000)]
    pub acquire_timeout_ms: u64,

    /// Readiness polling window, milliseconds
    #[arg(long = "ready-timeout-ms", default_value_t = 10_000)]
    pub ready_timeout_ms: u64,

    /// Readiness poll interval, milliseconds
    #[arg(long = "ready-poll-ms", default_value_t = 100)]
    pub ready_poll_ms: u64,

    // ===== Output =====
    /// Write results to a JSON file
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Write per-sample rows to a CSV file
    #[arg(long = "csv-output")]
    pub csv_output: Option<PathBuf>,

    /// Only print errors and the final report
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Debug-level logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl CliArgs {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse from an explicit argument list (tests)
    pub fn parse_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::parse_from(args)
    }

    /// Cross-field validation clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == 0 {
            return Err("--pool-size must be at least 1".to_string());
        }
        if self.tasks == 0 {
            return Err("--tasks must be at least 1".to_string());
        }
        if self.forks == 0 {
            return Err("--forks must be at least 1".to_string());
        }
        if self.measurement_iterations == 0 {
            return Err("--measurement-iterations must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            return Err("--batch-size must be at least 1".to_string());
        }
        if self.ready_poll_ms == 0 {
            return Err("--ready-poll-ms must be at least 1".to_string());
        }
        if (self.tls_cert.is_some()) != (self.tls_key.is_some()) {
            return Err("--tls-cert and --tls-key must be given together".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from_args(["connector-bench"]);
        assert_eq!(args.port, 3306);
        assert_eq!(args.pool_size, 16);
        assert_eq!(args.tasks, 100);
        assert_eq!(args.forks, 5);
        assert_eq!(args.warmup_iterations, 10);
        assert_eq!(args.measurement_iterations, 10);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_variant_list_parsing() {
        let args =
            CliArgs::parse_from_args(["connector-bench", "--variants", "text,binary"]);
        assert_eq!(
            args.variants,
            Some(vec!["text".to_string(), "binary".to_string()])
        );
    }

    #[test]
    fn test_validation_rejects_zero_pool() {
        let args = CliArgs::parse_from_args(["connector-bench", "--pool-size", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_lone_client_cert() {
        let args =
            CliArgs::parse_from_args(["connector-bench", "--tls-cert", "/tmp/cert.pem"]);
        assert!(args.validate().is_err());
    }
}
