//! `acquire` and `contend` commands

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use fencelock_core::{
    AcquireRequest, Acquisition, FencingGate, HandleSnapshot, LockStrategy, run_locked,
};

/// Result of a single `acquire` run
#[derive(Debug, Clone, Serialize)]
pub struct AcquireReport {
    pub acquired: bool,
    pub handle: Option<HandleSnapshot>,
    pub released: Option<bool>,
}

/// Acquire `request.resource`, hold it for `hold`, then release it.
///
/// `on_acquired` sees the handle while it is held.
pub async fn acquire(
    strategy: &dyn LockStrategy,
    request: &AcquireRequest,
    hold: Duration,
    on_acquired: impl FnOnce(&HandleSnapshot),
) -> anyhow::Result<AcquireReport> {
    let handle = match strategy.acquire(request).await? {
        Acquisition::Held(handle) => handle,
        Acquisition::NotAcquired => {
            info!(resource = %request.resource, "Lock not acquired");
            return Ok(AcquireReport {
                acquired: false,
                handle: None,
                released: None,
            });
        }
    };

    on_acquired(&handle.snapshot());
    tokio::time::sleep(hold).await;

    if !handle.is_held() {
        warn!(resource = %request.resource, "Lock lapsed while held");
    }
    let released = strategy.release(&handle).await?;

    Ok(AcquireReport {
        acquired: true,
        handle: Some(handle.snapshot()),
        released: Some(released),
    })
}

/// Counters of a `contend` run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContendReport {
    pub workers: usize,
    pub rounds: usize,
    pub held: u64,
    pub not_acquired: u64,
    pub errors: u64,
    pub fencing_rejections: u64,
    pub highest_fencing_token: Option<i64>,
    pub elapsed_ms: u64,
    pub acquisitions_per_sec: f64,
}

#[derive(Default)]
struct Counters {
    held: AtomicU64,
    not_acquired: AtomicU64,
    errors: AtomicU64,
    fencing_rejections: AtomicU64,
}

/// Run `workers` concurrent tasks, each doing `rounds` lock cycles on one
/// resource. Every critical section writes through a `FencingGate`.
pub async fn contend(
    strategy: Arc<dyn LockStrategy>,
    request: AcquireRequest,
    workers: usize,
    rounds: usize,
    work: Duration,
) -> anyhow::Result<ContendReport> {
    let gate = Arc::new(FencingGate::new());
    let counters = Arc::new(Counters::default());
    let request = Arc::new(request);
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(workers);
    for worker in 0..workers {
        let strategy = strategy.clone();
        let gate = gate.clone();
        let counters = counters.clone();
        let request = request.clone();

        tasks.push(tokio::spawn(async move {
            for _ in 0..rounds {
                let gate = gate.clone();
                let counters_in = counters.clone();
                let outcome = run_locked(strategy.as_ref(), &request, move |handle| async move {
                    if let Err(rejection) = gate.admit(handle.resource(), handle.fencing_token()) {
                        warn!(worker, error = %rejection, "Write fenced off");
                        counters_in.fencing_rejections.fetch_add(1, Ordering::SeqCst);
                    }
                    if !work.is_zero() {
                        tokio::time::sleep(work).await;
                    }
                })
                .await;

                match outcome {
                    Ok(Some(())) => counters.held.fetch_add(1, Ordering::SeqCst),
                    Ok(None) => counters.not_acquired.fetch_add(1, Ordering::SeqCst),
                    Err(e) => {
                        warn!(worker, error = %e, "Lock cycle failed");
                        counters.errors.fetch_add(1, Ordering::SeqCst)
                    }
                };
            }
        }));
    }

    for task in tasks {
        task.await?;
    }

    let elapsed = started.elapsed();
    let held = counters.held.load(Ordering::SeqCst);
    let report = ContendReport {
        workers,
        rounds,
        held,
        not_acquired: counters.not_acquired.load(Ordering::SeqCst),
        errors: counters.errors.load(Ordering::SeqCst),
        fencing_rejections: counters.fencing_rejections.load(Ordering::SeqCst),
        highest_fencing_token: gate.highest(&request.resource),
        elapsed_ms: elapsed.as_millis() as u64,
        acquisitions_per_sec: if elapsed.is_zero() {
            0.0
        } else {
            held as f64 / elapsed.as_secs_f64()
        },
    };

    info!(
        resource = %request.resource,
        held = report.held,
        not_acquired = report.not_acquired,
        errors = report.errors,
        fencing_rejections = report.fencing_rejections,
        "Contention run finished"
    );
    Ok(report)
}
