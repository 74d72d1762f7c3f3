//! Benchmark configuration derived from CLI arguments

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::cli::CliArgs;
use super::tls_config::TlsConfig;
use crate::variant::{TransportSecurity, Variant, VariantKind};
use crate::workload::Workload;

/// Complete, validated benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    // Connection
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: Duration,
    pub tls_enabled: bool,
    pub tls: TlsConfig,

    // Matrix
    pub variants: Vec<VariantKind>,
    pub workload: Workload,
    pub batch_size: usize,
    pub pool_size: usize,
    pub tasks: u64,
    pub warmup_iterations: u32,
    pub measurement_iterations: u32,
    pub forks: u32,

    // Timing
    pub deadline: Duration,
    pub acquire_timeout: Duration,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,

    // Output
    pub output_path: Option<PathBuf>,
    pub csv_output: Option<PathBuf>,
    pub quiet: bool,
    pub verbose: bool,
}

impl BenchConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        args.validate()?;

        let variants = match &args.variants {
            Some(names) => {
                let mut parsed = Vec::with_capacity(names.len());
                for name in names {
                    parsed.push(
                        VariantKind::parse(name)
                            .ok_or_else(|| format!("Unknown variant: {}", name))?,
                    );
                }
                parsed
            }
            None => VariantKind::all().to_vec(),
        };

        let workload = Workload::parse(&args.workload)
            .ok_or_else(|| format!("Unknown workload: {}", args.workload))?;

        let tls = TlsConfig {
            skip_verify: args.tls_skip_verify,
            ca_cert: args.tls_ca_cert.clone(),
            client_cert: args.tls_cert.clone(),
            client_key: args.tls_key.clone(),
            sni: args.tls_sni.clone(),
        };

        let mut config = Self {
            host: args.host.clone(),
            port: args.port,
            user: args.user.clone(),
            password: args.password.clone(),
            database: args.database.clone(),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            tls_enabled: args.tls,
            tls,

            variants,
            workload,
            batch_size: args.batch_size,
            pool_size: args.pool_size,
            tasks: args.tasks,
            warmup_iterations: args.warmup_iterations,
            measurement_iterations: args.measurement_iterations,
            forks: args.forks,

            deadline: Duration::from_secs(args.deadline_secs),
            acquire_timeout: Duration::from_millis(args.acquire_timeout_ms),
            ready_timeout: Duration::from_millis(args.ready_timeout_ms),
            ready_poll_interval: Duration::from_millis(args.ready_poll_ms),

            output_path: args.output.clone(),
            csv_output: args.csv_output.clone(),
            quiet: args.quiet,
            verbose: args.verbose,
        };

        config.apply_conn_options(&args.conn_options)?;
        Ok(config)
    }

    /// Apply the extra-options string (`k=v&k=v`). Options the driver
    /// understands override the config; the rest are logged and ignored.
    fn apply_conn_options(&mut self, raw: &str) -> Result<(), String> {
        for pair in raw.split('&').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Malformed connection option: {}", pair))?;
            match key {
                "connectTimeout" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| format!("Invalid connectTimeout: {}", value))?;
                    self.connect_timeout = Duration::from_millis(ms);
                }
                "sslMode" => match value.to_lowercase().as_str() {
                    "disabled" => self.tls_enabled = false,
                    "trust" => {
                        self.tls_enabled = true;
                        self.tls.skip_verify = true;
                    }
                    "verify" | "verify-full" => {
                        self.tls_enabled = true;
                        self.tls.skip_verify = false;
                    }
                    other => return Err(format!("Invalid sslMode: {}", other)),
                },
                _ => debug!("Ignoring connection option {}={}", key, value),
            }
        }
        Ok(())
    }

    pub fn security(&self) -> TransportSecurity {
        if self.tls_enabled {
            TransportSecurity::Tls
        } else {
            TransportSecurity::Disabled
        }
    }

    /// Resolve the selected variant names into full variant records
    pub fn variant_list(&self) -> Vec<Variant> {
        let security = self.security();
        self.variants.iter().map(|k| k.settings(security)).collect()
    }

    /// Total dispatcher invocations across the whole matrix
    pub fn total_cells(&self) -> u64 {
        self.forks as u64
            * self.variants.len() as u64
            * (self.warmup_iterations + self.measurement_iterations) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliArgs;

    fn config_from(args: &[&str]) -> Result<BenchConfig, String> {
        let mut argv = vec!["connector-bench"];
        argv.extend_from_slice(args);
        BenchConfig::from_cli(&CliArgs::parse_from_args(argv))
    }

    #[test]
    fn test_default_matrix() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.variants.len(), 5);
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.total_cells(), 5 * 5 * 20);
        assert_eq!(config.security(), TransportSecurity::Disabled);
    }

    #[test]
    fn test_variant_selection() {
        let config = config_from(&["--variants", "text,binary-no-cache"]).unwrap();
        assert_eq!(
            config.variants,
            vec![VariantKind::Text, VariantKind::BinaryNoCache]
        );

        let err = config_from(&["--variants", "nonsense"]).unwrap_err();
        assert!(err.contains("Unknown variant"));
    }

    #[test]
    fn test_conn_options_override() {
        let config = config_from(&["--conn-options", "connectTimeout=250&foo=bar"]).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(250));

        let config = config_from(&["--conn-options", "sslMode=trust"]).unwrap();
        assert!(config.tls_enabled);
        assert!(config.tls.skip_verify);

        let config = config_from(&["--tls", "--conn-options", "sslMode=DISABLED"]).unwrap();
        assert!(!config.tls_enabled);
    }

    #[test]
    fn test_malformed_conn_options() {
        assert!(config_from(&["--conn-options", "justakey"]).is_err());
        assert!(config_from(&["--conn-options", "sslMode=bogus"]).is_err());
    }

    #[test]
    fn test_unknown_workload_rejected() {
        let err = config_from(&["--workload", "nonsense"]).unwrap_err();
        assert!(err.contains("Unknown workload"));
    }
}
