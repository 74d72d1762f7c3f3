//! Workload dispatcher
//!
//! Fans a fixed task count across tokio tasks, each performing one
//! acquire / unit-of-work / release cycle against the pool. Task counts
//! deliberately oversubscribe pool capacity; the resulting contention on
//! acquire is the thing being measured.
//!
//! Failure policy: per-task failures are counted and never abort
//! siblings. A systemic failure (authentication/configuration class, or
//! a pool protocol violation) aborts the whole dispatch instead of
//! burning the deadline one doomed task at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use crate::pool::Pool;
use crate::utils::{BenchError, PoolError, UnitOfWorkError};

/// One operation applied to an acquired resource, result discarded
#[async_trait]
pub trait UnitOfWork<R>: Send + Sync {
    async fn run(&self, resource: &mut R) -> Result<(), UnitOfWorkError>;
}

/// Knobs for one dispatcher invocation
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Number of independent tasks to submit
    pub tasks: u64,
    /// Join deadline for the whole invocation
    pub deadline: Duration,
    /// Per-task bound on waiting for a pooled resource
    pub acquire_timeout: Duration,
}

/// Aggregated outcome of one dispatcher invocation
#[derive(Debug)]
pub struct DispatchOutcome {
    pub tasks: u64,
    pub completed: u64,
    pub failed: u64,
    /// The deadline elapsed; in-flight tasks were abandoned
    pub timed_out: bool,
    pub elapsed: Duration,
    /// Unit-of-work latency in microseconds
    pub latency: Histogram<u64>,
}

impl DispatchOutcome {
    /// Tasks neither completed nor failed when the deadline hit
    pub fn abandoned(&self) -> u64 {
        self.tasks.saturating_sub(self.completed + self.failed)
    }

    pub fn throughput(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.completed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Counters shared by the dispatch tasks; the only cross-task state
#[derive(Default)]
struct DispatchCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    fatal_seen: AtomicBool,
    fatal: Mutex<Option<BenchError>>,
}

impl DispatchCounters {
    fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn flag_fatal(&self, error: BenchError) {
        let mut slot = self.fatal.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.fatal_seen.store(true, Ordering::SeqCst);
    }

    fn is_fatal(&self) -> bool {
        self.fatal_seen.load(Ordering::Relaxed)
    }
}

/// Submit `opts.tasks` independent acquire/work/release tasks and wait
/// for all of them or the deadline, whichever comes first.
///
/// Returns `Err` only for systemic conditions; individual task failures
/// and the deadline are reported through the outcome.
pub async fn dispatch<R, W>(
    pool: &Pool<R>,
    work: Arc<W>,
    opts: DispatchOptions,
) -> Result<DispatchOutcome, BenchError>
where
    R: Send + 'static,
    W: UnitOfWork<R> + 'static,
{
    let counters = Arc::new(DispatchCounters::default());
    let latency = Arc::new(Mutex::new(
        Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3).expect("histogram bounds"),
    ));

    let started = Instant::now();
    let deadline_at = TokioInstant::now() + opts.deadline;

    let mut tasks: JoinSet<()> = JoinSet::new();
    for _ in 0..opts.tasks {
        let pool = pool.clone();
        let work = Arc::clone(&work);
        let counters = Arc::clone(&counters);
        let latency = Arc::clone(&latency);
        let acquire_timeout = opts.acquire_timeout;

        tasks.spawn(async move {
            // A sibling already hit a systemic failure; running would
            // fail identically
            if counters.is_fatal() {
                return;
            }

            let mut resource = match pool.acquire(acquire_timeout).await {
                Ok(resource) => resource,
                Err(e @ PoolError::AcquireTimeout(_)) => {
                    debug!("Task failed: {}", e);
                    counters.record_failed();
                    return;
                }
                Err(e) => {
                    counters.flag_fatal(BenchError::Pool(e));
                    return;
                }
            };

            let work_started = Instant::now();
            let result = work.run(&mut resource).await;
            let work_elapsed = work_started.elapsed();

            // Release on every exit path, before classifying the result
            if let Err(e) = pool.release(resource) {
                counters.flag_fatal(BenchError::Pool(e));
                return;
            }

            match result {
                Ok(()) => {
                    latency
                        .lock()
                        .record(work_elapsed.as_micros().max(1) as u64)
                        .ok();
                    counters.record_completed();
                }
                Err(e) if e.is_fatal() => {
                    counters.flag_fatal(BenchError::Systemic(e));
                }
                Err(e) => {
                    debug!("Task failed: {}", e);
                    counters.record_failed();
                }
            }
        });
    }

    let mut timed_out = false;
    loop {
        if counters.is_fatal() {
            tasks.abort_all();
            break;
        }
        match tokio::time::timeout_at(deadline_at, tasks.join_next()).await {
            Ok(Some(joined)) => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!("Dispatch task panicked: {}", e);
                    }
                }
            }
            Ok(None) => break,
            Err(_) => {
                // Deadline: stop awaiting, let in-flight tasks run to
                // whatever end on their own; their results are discarded
                timed_out = true;
                tasks.detach_all();
                break;
            }
        }
    }

    if let Some(fatal) = counters.fatal.lock().take() {
        return Err(fatal);
    }

    let elapsed = started.elapsed();
    let latency = Arc::try_unwrap(latency)
        .map(Mutex::into_inner)
        .unwrap_or_else(|shared| shared.lock().clone());

    Ok(DispatchOutcome {
        tasks: opts.tasks,
        completed: counters.completed.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        timed_out,
        elapsed,
        latency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTS: DispatchOptions = DispatchOptions {
        tasks: 100,
        deadline: Duration::from_secs(60),
        acquire_timeout: Duration::from_secs(30),
    };

    struct Succeed;

    #[async_trait]
    impl UnitOfWork<u32> for Succeed {
        async fn run(&self, _resource: &mut u32) -> Result<(), UnitOfWorkError> {
            tokio::task::yield_now().await;
            Ok(())
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl UnitOfWork<u32> for AlwaysFail {
        async fn run(&self, _resource: &mut u32) -> Result<(), UnitOfWorkError> {
            Err(UnitOfWorkError::Server {
                code: 1064,
                message: "syntax error".to_string(),
            })
        }
    }

    struct AccessDenied;

    #[async_trait]
    impl UnitOfWork<u32> for AccessDenied {
        async fn run(&self, _resource: &mut u32) -> Result<(), UnitOfWorkError> {
            Err(UnitOfWorkError::Server {
                code: 1045,
                message: "Access denied".to_string(),
            })
        }
    }

    struct Sleep(Duration);

    #[async_trait]
    impl UnitOfWork<u32> for Sleep {
        async fn run(&self, _resource: &mut u32) -> Result<(), UnitOfWorkError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    fn pool_of(capacity: usize) -> Pool<u32> {
        Pool::new((0..capacity as u32).collect())
    }

    #[tokio::test]
    async fn test_all_tasks_complete() {
        let pool = pool_of(16);
        let outcome = dispatch(&pool, Arc::new(Succeed), OPTS).await.unwrap();

        assert_eq!(outcome.completed, 100);
        assert_eq!(outcome.failed, 0);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.abandoned(), 0);
        assert!(outcome.throughput() > 0.0);
    }

    #[tokio::test]
    async fn test_oversubscription_returns_all_resources() {
        let pool = pool_of(2);
        let outcome = dispatch(&pool, Arc::new(Succeed), OPTS).await.unwrap();

        assert_eq!(outcome.completed, 100);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_task_isolation() {
        let pool = pool_of(4);
        let opts = DispatchOptions {
            tasks: 50,
            ..OPTS
        };
        let outcome = dispatch(&pool, Arc::new(AlwaysFail), opts).await.unwrap();

        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.failed, 50);
        assert!(!outcome.timed_out);
        // Release on the failure path too
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), 4);
    }

    #[tokio::test]
    async fn test_fatal_short_circuits() {
        let pool = pool_of(4);
        let err = dispatch(&pool, Arc::new(AccessDenied), OPTS)
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Systemic(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_respected() {
        let pool = pool_of(4);
        let opts = DispatchOptions {
            tasks: 100,
            deadline: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(30),
        };
        let outcome = dispatch(&pool, Arc::new(Sleep(Duration::from_secs(10))), opts)
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(outcome.completed < 100);
        assert!(outcome.abandoned() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_counts_as_failure() {
        let pool = pool_of(1);
        let opts = DispatchOptions {
            tasks: 10,
            deadline: Duration::from_secs(600),
            acquire_timeout: Duration::from_millis(100),
        };
        // One slow holder starves the other nine waiters past their bound
        let outcome = dispatch(&pool, Arc::new(Sleep(Duration::from_secs(5))), opts)
            .await
            .unwrap();

        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.failed, 9);
        assert!(!outcome.timed_out);
    }
}
