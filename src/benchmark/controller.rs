//! Run controller
//!
//! The outer orchestration: iterates fork replicates, variants and
//! warmup/measurement iterations, provisioning one pool per variant and
//! recording one sample per dispatcher invocation. Variants are strictly
//! sequential; concurrency exists only inside a dispatch.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use super::dispatcher::{dispatch, DispatchOptions};
use super::sample::{Phase, RunSample};
use crate::client::ConnectionFactory;
use crate::config::BenchConfig;
use crate::pool::{await_ready, ReadyStatus};
use crate::utils::Result;
use crate::variant::Variant;
use crate::workload::WorkUnit;

pub struct RunController {
    config: Arc<BenchConfig>,
    factory: ConnectionFactory,
}

impl RunController {
    pub fn new(config: BenchConfig) -> Self {
        let config = Arc::new(config);
        let factory = ConnectionFactory::new(&config);
        Self { config, factory }
    }

    /// Execute the full matrix: fork x variant x (warmup + measurement)
    ///
    /// A failed variant is abandoned for the current fork with a
    /// diagnostic; the rest of the matrix proceeds.
    pub fn execute(&self) -> Result<Vec<RunSample>> {
        let mut samples = Vec::new();
        let progress = self.progress_bar();

        for fork in 0..self.config.forks {
            info!("Fork {}/{}", fork + 1, self.config.forks);

            // Fresh runtime per fork: an isolated execution context, so
            // nothing (timers, abandoned tasks, connections) leaks
            // across replicates
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(self.run_fork(fork, &mut samples, &progress));
            drop(runtime);
        }

        progress.finish_and_clear();
        Ok(samples)
    }

    async fn run_fork(&self, fork: u32, samples: &mut Vec<RunSample>, progress: &ProgressBar) {
        for variant in self.config.variant_list() {
            if let Err(e) = self.run_variant(fork, variant, samples, progress).await {
                error!(
                    "Variant {} abandoned in fork {}: {}",
                    variant.kind, fork, e
                );
            }
        }
    }

    async fn run_variant(
        &self,
        fork: u32,
        variant: Variant,
        samples: &mut Vec<RunSample>,
        progress: &ProgressBar,
    ) -> Result<()> {
        debug!("Provisioning pool for {} (fork {})", variant.kind, fork);
        let pool = self
            .factory
            .provision(variant, self.config.pool_size)
            .await?;

        // Advisory startup barrier: a shortfall is logged, not fatal
        match await_ready(
            &pool,
            self.config.pool_size,
            self.config.ready_timeout,
            self.config.ready_poll_interval,
        )
        .await
        {
            ReadyStatus::Ready => debug!("Pool for {} ready", variant.kind),
            ReadyStatus::PartiallyReady(live) => warn!(
                "Pool for {} reported {}/{} live connections; proceeding",
                variant.kind, live, self.config.pool_size
            ),
        }

        let work = Arc::new(WorkUnit::new(self.config.workload, self.config.batch_size));
        let opts = DispatchOptions {
            tasks: self.config.tasks,
            deadline: self.config.deadline,
            acquire_timeout: self.config.acquire_timeout,
        };

        let result = self
            .run_phases(fork, variant, &pool, work, opts, samples, progress)
            .await;

        // Teardown assumes tasks are joined or abandoned; drained
        // connections get a graceful quit
        for conn in pool.close() {
            conn.shutdown().await;
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        fork: u32,
        variant: Variant,
        pool: &crate::pool::Pool<crate::client::Connection>,
        work: Arc<WorkUnit>,
        opts: DispatchOptions,
        samples: &mut Vec<RunSample>,
        progress: &ProgressBar,
    ) -> Result<()> {
        let phases = [
            (Phase::Warmup, self.config.warmup_iterations),
            (Phase::Measurement, self.config.measurement_iterations),
        ];

        for (phase, iterations) in phases {
            for iteration in 0..iterations {
                let outcome = dispatch(pool, Arc::clone(&work), opts).await?;

                if outcome.timed_out {
                    warn!(
                        "{} {} iteration {} hit the {}s deadline: {} tasks abandoned",
                        variant.kind,
                        phase.as_str(),
                        iteration,
                        opts.deadline.as_secs(),
                        outcome.abandoned()
                    );
                }

                let sample =
                    RunSample::from_outcome(variant.kind, phase, fork, iteration, &outcome);
                progress.set_message(format!(
                    "{} {} {:.0} ops/s",
                    variant.kind,
                    phase.as_str(),
                    sample.throughput()
                ));
                progress.inc(1);
                samples.push(sample);
            }
        }
        Ok(())
    }

    fn progress_bar(&self) -> ProgressBar {
        if self.config.quiet {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(self.config.total_cells());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliArgs;

    // Full matrix runs need a live MariaDB/MySQL server; ignored by
    // default.

    #[test]
    #[ignore]
    fn test_end_to_end_single_cell() {
        let args = CliArgs::parse_from_args([
            "connector-bench",
            "--variants",
            "text",
            "--forks",
            "1",
            "--warmup-iterations",
            "1",
            "--measurement-iterations",
            "1",
            "--quiet",
        ]);
        let config = BenchConfig::from_cli(&args).expect("config");
        let controller = RunController::new(config);

        let samples = controller.execute().expect("execute");
        assert_eq!(samples.len(), 2);
        let measurement = samples.iter().find(|s| s.phase.is_measurement()).unwrap();
        assert_eq!(measurement.completed, 100);
        assert_eq!(measurement.failed, 0);
    }
}
