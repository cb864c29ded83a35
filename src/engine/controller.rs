//! Engine controller: owns the canonical state machine over
//! idle → running → stopping → completed / error, the plan registry,
//! and the run context. At most one run is active per controller.
//!
//! Every run allocates fresh state (client, channels, tokens, CSV
//! cursors, statistics) and tears it down at the terminal transition,
//! so teardown is deterministic and runs cannot bleed into each other.

use crate::csv::CsvBank;
use crate::engine::aggregator::Aggregator;
use crate::engine::pipeline::PipelineContext;
use crate::engine::scheduler::GroupScheduler;
use crate::engine::vu::GroupContext;
use crate::error::{EngineError, ErrorKind};
use crate::events::{EngineEvent, StatusChange};
use crate::http;
use crate::plan::Plan;
use crate::types::{EngineStateKind, ProgressSnapshot, SecondBucket, StatusReport, Summary};
use crate::vars::ScopeStack;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RESULT_CHANNEL_SIZE: usize = 10_000;
const EVENT_CHANNEL_SIZE: usize = 8_192;

struct RunHandle {
    stop: CancellationToken,
    kill: CancellationToken,
}

struct StateCell {
    kind: EngineStateKind,
    run: Option<RunHandle>,
    snapshot_rx: Option<watch::Receiver<ProgressSnapshot>>,
    summary: Option<Summary>,
    error: Option<String>,
}

struct Inner {
    plans: Mutex<HashMap<String, Arc<Plan>>>,
    state: Mutex<StateCell>,
    events: broadcast::Sender<EngineEvent>,
    state_watch: watch::Sender<EngineStateKind>,
}

#[derive(Clone)]
pub struct EngineController {
    inner: Arc<Inner>,
}

impl Default for EngineController {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineController {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (state_watch, _) = watch::channel(EngineStateKind::Idle);
        Self {
            inner: Arc::new(Inner {
                plans: Mutex::new(HashMap::new()),
                state: Mutex::new(StateCell {
                    kind: EngineStateKind::Idle,
                    run: None,
                    snapshot_rx: None,
                    summary: None,
                    error: None,
                }),
                events,
                state_watch,
            }),
        }
    }

    /// Registers (or replaces) a plan. Validation happens at start.
    pub fn insert_plan(&self, plan: Plan) {
        self.inner
            .plans
            .lock()
            .unwrap()
            .insert(plan.id.clone(), Arc::new(plan));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Starts a run of the registered plan and returns immediately.
    /// Must be called from within a tokio runtime.
    pub fn start_test(&self, plan_id: &str) -> Result<(), EngineError> {
        let plan = self
            .inner
            .plans
            .lock()
            .unwrap()
            .get(plan_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::new(ErrorKind::PlanNotFound, format!("no plan with id '{plan_id}'"))
            })?;

        let mut cell = self.inner.state.lock().unwrap();
        if cell.kind != EngineStateKind::Idle {
            return Err(EngineError::new(
                ErrorKind::AlreadyRunning,
                "a test is already running; reset after completion to start another",
            ));
        }
        plan.validate()?;

        let total_vus: u32 = plan.enabled_groups().map(|g| g.num_threads).sum();
        let client = http::create_client(total_vus, http::request_timeout())
            .map_err(|e| EngineError::fatal(format!("failed to create HTTP client: {e}")))?;

        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let active_vus = Arc::new(AtomicU32::new(0));
        let csv = CsvBank::new(&plan);
        let started_at = Utc::now();

        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(ProgressSnapshot::default());

        let aggregator = Aggregator::new(
            result_rx,
            snapshot_tx,
            self.inner.events.clone(),
            active_vus.clone(),
            plan.id.clone(),
            plan.name.clone(),
            started_at,
        );
        let aggregator_handle = tokio::spawn(aggregator.run());

        let schedulers: Vec<GroupScheduler> = plan
            .enabled_groups()
            .map(|group| {
                let scopes = ScopeStack::for_group(&plan, group);
                let referenced_sources = csv.referenced_by(group);
                GroupScheduler::new(Arc::new(GroupContext {
                    group: Arc::new(group.clone()),
                    pipeline: PipelineContext {
                        client: client.clone(),
                        scopes,
                        group_name: group.name.clone(),
                        result_tx: result_tx.clone(),
                        kill: kill.clone(),
                    },
                    csv: csv.clone(),
                    referenced_sources,
                    stop: stop.clone(),
                    kill: kill.clone(),
                    active_vus: active_vus.clone(),
                }))
            })
            .collect();
        // The aggregator finishes when the last pipeline sender drops.
        drop(result_tx);

        cell.run = Some(RunHandle {
            stop: stop.clone(),
            kill,
        });
        cell.snapshot_rx = Some(snapshot_rx.clone());
        cell.summary = None;
        cell.error = None;
        // Publish `running` before the first VU can emit a result, so
        // subscribers never see results ahead of the status change.
        self.transition(&mut cell, EngineStateKind::Running, None);
        drop(cell);

        tracing::info!(plan = %plan.name, groups = schedulers.len(), "test started");

        let scheduler_handles: Vec<JoinHandle<Result<(), EngineError>>> = schedulers
            .into_iter()
            .map(|scheduler| tokio::spawn(scheduler.run()))
            .collect();

        let inner = self.inner.clone();
        tokio::spawn(supervise(
            inner,
            plan,
            started_at,
            scheduler_handles,
            aggregator_handle,
            snapshot_rx,
        ));

        Ok(())
    }

    /// Requests cooperative cancellation; returns immediately.
    pub fn stop_test(&self) -> Result<(), EngineError> {
        let mut cell = self.inner.state.lock().unwrap();
        if cell.kind != EngineStateKind::Running {
            return Err(EngineError::new(
                ErrorKind::NotRunning,
                "no running test to stop",
            ));
        }
        self.transition(&mut cell, EngineStateKind::Stopping, None);
        if let Some(run) = &cell.run {
            run.stop.cancel();
        }
        tracing::info!("cooperative stop requested");
        Ok(())
    }

    /// Cancels immediately: in-flight requests are dropped without a
    /// result event, and completion follows with the partial summary.
    pub fn force_stop_test(&self) -> Result<(), EngineError> {
        let cell = self.inner.state.lock().unwrap();
        if !matches!(
            cell.kind,
            EngineStateKind::Running | EngineStateKind::Stopping
        ) {
            return Err(EngineError::new(
                ErrorKind::NotRunning,
                "no running test to force-stop",
            ));
        }
        if let Some(run) = &cell.run {
            run.kill.cancel();
            run.stop.cancel();
        }
        tracing::info!("force stop requested");
        Ok(())
    }

    pub fn get_engine_status(&self) -> StatusReport {
        let cell = self.inner.state.lock().unwrap();
        let snapshot = cell
            .snapshot_rx
            .as_ref()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default();
        StatusReport {
            state: cell.kind,
            completed_requests: snapshot.completed_requests,
            total_errors: snapshot.total_errors,
            active_vus: snapshot.active_vus,
            elapsed_ms: snapshot.elapsed_ms,
        }
    }

    pub fn get_results(&self) -> ProgressSnapshot {
        let cell = self.inner.state.lock().unwrap();
        cell.snapshot_rx
            .as_ref()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default()
    }

    pub fn get_time_series(&self) -> Vec<SecondBucket> {
        self.get_results().timeline
    }

    /// Clears the finished run context. Valid in `completed`/`error`.
    pub fn reset(&self) -> Result<(), EngineError> {
        let mut cell = self.inner.state.lock().unwrap();
        if !cell.kind.is_terminal() {
            return Err(EngineError::validation(format!(
                "cannot reset while {}",
                cell.kind.as_str()
            )));
        }
        cell.run = None;
        cell.snapshot_rx = None;
        cell.summary = None;
        cell.error = None;
        self.transition(&mut cell, EngineStateKind::Idle, None);
        Ok(())
    }

    /// Waits for the current run to reach a terminal state and returns
    /// its summary, or the fatal error if the run ended in `error`
    /// (the partial summary still rides the `test-complete` event).
    pub async fn wait_complete(&self) -> Result<Summary, EngineError> {
        let mut rx = self.inner.state_watch.subscribe();
        loop {
            let kind = *rx.borrow_and_update();
            if kind.is_terminal() {
                let cell = self.inner.state.lock().unwrap();
                return match (&cell.summary, &cell.error) {
                    (_, Some(error)) => Err(EngineError::fatal(error.clone())),
                    (Some(summary), None) => Ok(summary.clone()),
                    (None, None) => Err(EngineError::fatal("run produced no summary")),
                };
            }
            if rx.changed().await.is_err() {
                return Err(EngineError::fatal("controller dropped"));
            }
        }
    }

    /// Status transitions are serialised under the state lock, so every
    /// subscriber observes them in the same order.
    fn transition(&self, cell: &mut StateCell, kind: EngineStateKind, error: Option<String>) {
        cell.kind = kind;
        cell.error = error.clone();
        let _ = self.inner.state_watch.send(kind);
        let _ = self
            .inner
            .events
            .send(EngineEvent::Status(StatusChange { status: kind, error }));
        if let Some(rx) = &cell.snapshot_rx {
            let _ = self
                .inner
                .events
                .send(EngineEvent::Progress(rx.borrow().clone()));
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    plan: Arc<Plan>,
    started_at: DateTime<Utc>,
    scheduler_handles: Vec<JoinHandle<Result<(), EngineError>>>,
    aggregator_handle: JoinHandle<Summary>,
    snapshot_rx: watch::Receiver<ProgressSnapshot>,
) {
    let mut fatal: Option<String> = None;

    for result in join_all(scheduler_handles).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => fatal = Some(e.message),
            Err(join_err) => fatal = Some(format!("scheduler task failed: {join_err}")),
        }
    }

    let summary = match aggregator_handle.await {
        Ok(summary) => summary,
        Err(join_err) => {
            fatal = Some(format!("aggregator task failed: {join_err}"));
            partial_summary(&plan, started_at, &snapshot_rx.borrow())
        }
    };

    let controller = EngineController { inner };
    let mut cell = controller.inner.state.lock().unwrap();
    cell.run = None;
    cell.summary = Some(summary.clone());
    match fatal {
        Some(message) => {
            tracing::error!(error = %message, "test failed");
            controller.transition(&mut cell, EngineStateKind::Error, Some(message));
        }
        None => {
            tracing::info!(total = summary.total_requests, "test completed");
            controller.transition(&mut cell, EngineStateKind::Completed, None);
        }
    }
    // test-complete is emitted exactly once per run, after the terminal
    // status, carrying whatever was aggregated.
    let _ = controller
        .inner
        .events
        .send(EngineEvent::Complete(Box::new(summary)));
}

/// Degenerate summary assembled from the last snapshot when the
/// aggregator itself is gone.
fn partial_summary(plan: &Plan, started_at: DateTime<Utc>, snap: &ProgressSnapshot) -> Summary {
    let p95 = (snap.p95_ms.round() as u64).clamp(snap.min_ms, snap.max_ms);
    Summary {
        plan_id: plan.id.clone(),
        plan_name: plan.name.clone(),
        started_at,
        finished_at: Utc::now(),
        total_requests: snap.completed_requests,
        successful_requests: snap.completed_requests - snap.total_errors,
        failed_requests: snap.total_errors,
        min_ms: snap.min_ms,
        mean_ms: snap.mean_ms,
        p50_ms: snap.min_ms,
        p95_ms: p95,
        p99_ms: snap.max_ms,
        max_ms: snap.max_ms,
        avg_rps: if snap.elapsed_ms > 0 {
            snap.completed_requests as f64 / (snap.elapsed_ms as f64 / 1000.0)
        } else {
            0.0
        },
        total_bytes: 0,
        status_codes: HashMap::new(),
        errors: HashMap::new(),
        timeline: snap.timeline.clone(),
    }
}
