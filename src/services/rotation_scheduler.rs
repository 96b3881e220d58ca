//! Background rotation scheduler
//!
//! Each identity gets its own task that owns its [`Reconciler`] and runs a
//! pass on every resync tick, or on the shorter pending poll interval while
//! a signing request is outstanding. Passes of one identity therefore never
//! overlap, while identities reconcile in parallel.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RotationConfig;
use crate::services::reconciler::{Reconciler, SyncContext, SyncOutcome};
use crate::utils::error::{RotationError, RotationResult};

/// Scheduler state for the rotation tasks
#[derive(Clone)]
pub struct RotationSchedulerState {
    running: Arc<RwLock<bool>>,
    cancellation: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RotationSchedulerState {
    fn new() -> Self {
        Self {
            running: Arc::new(RwLock::new(true)),
            cancellation: CancellationToken::new(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check if the scheduler is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Stop the scheduler, cancel in-flight passes and wait for the tasks
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        self.cancellation.cancel();
        info!("Rotation scheduler stop requested");

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Rotation task ended abnormally: {}", e);
            }
        }
        info!("Rotation scheduler stopped");
    }
}

/// Start one rotation task per reconciler
pub async fn start_rotation_scheduler(
    reconcilers: Vec<Reconciler>,
    config: &RotationConfig,
) -> RotationSchedulerState {
    let state = RotationSchedulerState::new();

    let mut tasks = state.tasks.lock().await;
    for reconciler in reconcilers {
        let task_state = state.clone();
        let task_config = config.clone();
        tasks.push(tokio::spawn(async move {
            rotation_task(task_state, reconciler, task_config).await;
        }));
    }
    info!(
        "Rotation scheduler started for {} identities (resync interval: {}s, pending poll interval: {}s)",
        tasks.len(),
        config.resync_interval().as_secs(),
        config.pending_poll_interval().as_secs()
    );
    drop(tasks);

    state
}

/// Delay before the next pass; an outstanding request is polled sooner
fn next_delay(reconciler: &Reconciler, config: &RotationConfig) -> Duration {
    if reconciler.pending().is_idle() {
        config.resync_interval()
    } else {
        config.pending_poll_interval()
    }
}

/// Resync loop of one identity
async fn rotation_task(
    state: RotationSchedulerState,
    mut reconciler: Reconciler,
    config: RotationConfig,
) {
    let name = reconciler.identity().name.clone();
    // First pass runs right away
    let mut delay = Duration::ZERO;

    loop {
        tokio::select! {
            _ = state.cancellation.cancelled() => break,
            _ = sleep(delay) => {}
        }

        if !*state.running.read().await {
            break;
        }

        let ctx = SyncContext::new(Utc::now())
            .with_cancellation(state.cancellation.child_token())
            .with_call_timeout(config.call_timeout());
        match reconciler.sync(&ctx).await {
            Ok(outcome) => log_outcome(&name, &outcome),
            Err(e) if e.is_transient() => {
                debug!(identity = %name, "Rotation pass will be retried: {}", e)
            }
            Err(e) => error!(identity = %name, "Rotation pass failed: {}", e),
        }

        delay = next_delay(&reconciler, &config);
    }

    info!(identity = %name, "Rotation task stopping");
}

fn log_outcome(name: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Unchanged | SyncOutcome::Waiting => {
            debug!(identity = %name, "Rotation pass finished: {:?}", outcome)
        }
        _ => info!(identity = %name, "Rotation pass finished: {:?}", outcome),
    }
}

/// Reconcile every identity once, concurrently
///
/// A pass that leaves a request outstanding is followed by polls on the
/// pending poll interval until the certificate is stored, the request fails,
/// or `once_timeout` runs out. The pending request only lives in memory, so
/// returning earlier would abandon it at the authority.
pub async fn run_once(
    reconcilers: &mut [Reconciler],
    config: &RotationConfig,
    cancellation: &CancellationToken,
) -> Vec<(String, RotationResult<SyncOutcome>)> {
    let passes = reconcilers.iter_mut().map(|reconciler| async move {
        let result = settle(reconciler, config, cancellation).await;
        (reconciler.identity().name.clone(), result)
    });
    join_all(passes).await
}

async fn settle(
    reconciler: &mut Reconciler,
    config: &RotationConfig,
    cancellation: &CancellationToken,
) -> RotationResult<SyncOutcome> {
    let deadline = Instant::now() + config.once_timeout();
    let name = reconciler.identity().name.clone();

    loop {
        let ctx = SyncContext::new(Utc::now())
            .with_cancellation(cancellation.child_token())
            .with_call_timeout(config.call_timeout());
        match reconciler.sync(&ctx).await {
            Ok(SyncOutcome::RequestSubmitted { request_id }) => {
                info!(identity = %name, request = %request_id, "Waiting for certificate issuance");
            }
            Ok(SyncOutcome::Waiting) => {}
            Ok(outcome) => return Ok(outcome),
            // Keep polling an outstanding request through transient failures
            Err(e)
                if e.is_transient()
                    && !reconciler.pending().is_idle()
                    && !cancellation.is_cancelled() =>
            {
                warn!(identity = %name, "Polling certificate request failed: {}", e);
            }
            Err(e) => return Err(e),
        }

        let poll = config.pending_poll_interval();
        if Instant::now() + poll > deadline {
            return Err(RotationError::Timeout(format!(
                "certificate issuance for {}",
                name
            )));
        }
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(RotationError::Cancelled),
            _ = sleep(poll) => {}
        }
    }
}
