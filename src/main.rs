//! connector-bench - throughput benchmark for MariaDB/MySQL connections
//!
//! Exercises a matrix of connection variants (wire protocol, statement
//! cache, pipelining, batch rewrite) with concurrent workloads against a
//! live server and reports sustained operation rates.

use anyhow::Result;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use connector_bench::benchmark::RunController;
use connector_bench::config::{BenchConfig, CliArgs};
use connector_bench::report;

fn setup_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn config_summary(config: &BenchConfig) -> String {
    format!(
        "host={}:{}, database={}, pool={}, tasks={}, forks={}, warmup={}, measurement={}, workload={}",
        config.host,
        config.port,
        config.database,
        config.pool_size,
        config.tasks,
        config.forks,
        config.warmup_iterations,
        config.measurement_iterations,
        config.workload
    )
}

fn print_banner(config: &BenchConfig) {
    if config.quiet {
        return;
    }

    println!("connector-bench v{}", env!("CARGO_PKG_VERSION"));
    println!("====================================");
    println!("Server: {}:{} db={}", config.host, config.port, config.database);
    println!(
        "Pool: {} connections, Tasks: {}, Deadline: {}s",
        config.pool_size,
        config.tasks,
        config.deadline.as_secs()
    );
    println!(
        "Matrix: {} forks x {} variants x ({} warmup + {} measurement)",
        config.forks,
        config.variants.len(),
        config.warmup_iterations,
        config.measurement_iterations
    );
    println!("Workload: {}", config.workload);
    if config.tls_enabled {
        println!("TLS: enabled");
    }
    println!("====================================\n");
}

fn run() -> Result<()> {
    let args = CliArgs::parse_args();

    setup_logging(args.verbose, args.quiet);

    let config = BenchConfig::from_cli(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    print_banner(&config);

    let controller = RunController::new(config.clone());
    let samples = controller.execute()?;

    let summaries = report::summarize(&samples);
    report::print_report(&summaries);

    if let Some(ref output_path) = config.output_path {
        info!("Writing results to: {:?}", output_path);
        report::write_json(&config_summary(&config), &samples, &summaries, output_path)?;
    }

    if let Some(ref csv_path) = config.csv_output {
        info!("Writing CSV to: {:?}", csv_path);
        report::write_csv(&samples, csv_path)?;
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
