//! QueueController: the single writer of task status.
//!
//! Every status change (enqueue, claim, outcome, manual retry, recovery,
//! pruning) happens while holding the controller's state lock, so there is
//! exactly one read-modify-write on the store at a time. Transforms and
//! network uploads run outside the lock.
//!
//! The controller never uploads anything itself: `drain` claims tasks and
//! hands them to the worker pool through a bounded channel, and workers
//! come back through `report_outcome`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Notify, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::domain::{
    Decider, Decision, EnqueueError, EventId, PipelineError, TaskEvent, TaskId, TaskStatus,
    UploadOutcome, UploadTask,
};
use crate::observability::QueueCounts;
use crate::ports::{CaptureGate, Clock, IdGenerator, PayloadStore, TaskStore};
use crate::transform::TransformStage;

/// Buffered state-change events per subscriber before it lags.
pub const EVENT_BUFFER: usize = 256;

/// One raw capture as produced by the capture layer.
///
/// `id` is the capture's stable identity: submitting the same id again while
/// its task is still pending, uploading or uploaded is a no-op.
#[derive(Debug, Clone)]
pub struct Capture {
    pub id: TaskId,
    pub event_id: EventId,
    pub raw: Vec<u8>,
}

/// A task claimed by `drain`, on its way to a worker.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: UploadTask,
}

/// Collaborators of the controller.
#[derive(Clone)]
pub struct ControllerPorts {
    pub tasks: Arc<dyn TaskStore>,
    pub payloads: Arc<dyn PayloadStore>,
    pub gate: Arc<dyn CaptureGate>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub decider: Arc<dyn Decider>,
}

/// Re-check delay while a settlement is waiting for the store.
const UNSETTLED_RECHECK: Duration = Duration::from_secs(1);

/// How a claimed task leaves the in-flight set.
#[derive(Debug, Clone)]
enum Settlement {
    /// A worker reported this outcome.
    Outcome(UploadOutcome),
    /// The claim was never handed to a worker; back to pending.
    Release,
}

#[derive(Debug, Default)]
struct ControllerState {
    /// Claimed and not yet settled on disk. Never larger than `max_concurrent`.
    in_flight: HashSet<TaskId>,
    /// Settlements whose store write failed. Their ids stay in `in_flight`
    /// until the write goes through.
    unsettled: HashMap<TaskId, Settlement>,
}

pub struct QueueController {
    ports: ControllerPorts,
    transform: TransformStage,
    max_concurrent: usize,
    dispatch_tx: mpsc::Sender<ClaimedTask>,
    events: broadcast::Sender<TaskEvent>,
    retry_wakeup: Arc<Notify>,
    state: Mutex<ControllerState>,
}

impl QueueController {
    /// `dispatch_tx` should have capacity `max_concurrent`; claimed tasks
    /// never outnumber it.
    pub fn new(
        ports: ControllerPorts,
        transform: TransformStage,
        max_concurrent: usize,
        dispatch_tx: mpsc::Sender<ClaimedTask>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            ports,
            transform,
            max_concurrent,
            dispatch_tx,
            events,
            retry_wakeup: Arc::new(Notify::new()),
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stream of persisted status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Notified whenever a retry with backoff is scheduled.
    pub fn retry_wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.retry_wakeup)
    }

    fn emit(&self, from: Option<TaskStatus>, task: &UploadTask) {
        // no subscribers is fine
        let _ = self.events.send(TaskEvent::transition(from, task));
    }

    /// Transform a capture and persist it as a new pending task under a fresh id.
    pub async fn enqueue(&self, raw: Vec<u8>, event_id: EventId) -> Result<TaskId, EnqueueError> {
        let id = self.ports.ids.generate_task_id();
        self.enqueue_capture(Capture { id, event_id, raw }).await
    }

    /// Transform a capture and persist it as a pending task.
    ///
    /// # Flow
    /// 1. event gate; a closed event rejects before anything is written
    /// 2. idempotency check on `capture.id`
    /// 3. transform on the blocking pool, outside the lock
    /// 4. under the lock: re-check, write payload, write record, emit
    ///
    /// A capture whose task is `failed` is replaced by a fresh pending task.
    pub async fn enqueue_capture(&self, capture: Capture) -> Result<TaskId, EnqueueError> {
        let Capture { id, event_id, raw } = capture;

        if !self.ports.gate.is_capture_allowed(&event_id).await {
            debug!(task_id = %id, event_id = %event_id, "capture rejected: event closed");
            return Err(EnqueueError::CaptureNotAllowed(event_id));
        }

        if self.is_live(&id).await? {
            debug!(task_id = %id, "capture already queued");
            return Ok(id);
        }

        let payload = self.transform.run(raw).await?;

        let _state = self.state.lock().await;
        let previous = self.ports.tasks.get(&id).await?;
        if previous.as_ref().is_some_and(|t| t.status != TaskStatus::Failed) {
            debug!(task_id = %id, "capture queued concurrently");
            return Ok(id);
        }

        let payload_ref = self.ports.payloads.write(&id, &payload.bytes).await?;
        let task = UploadTask::new(
            id,
            event_id,
            payload_ref,
            payload.meta(),
            self.ports.clock.now(),
        );
        if let Err(e) = self.ports.tasks.put(&task).await {
            // a replaced failed record still points at this payload
            if previous.is_none() {
                if let Err(cleanup) = self.ports.payloads.remove(&task.payload_ref).await {
                    warn!(task_id = %id, error = %cleanup, "orphaned payload left behind");
                }
            }
            return Err(e.into());
        }

        self.emit(previous.map(|t| t.status), &task);
        info!(
            task_id = %task.id,
            event_id = %task.event_id,
            bytes = task.payload_meta.byte_size,
            width = task.payload_meta.width,
            height = task.payload_meta.height,
            "capture enqueued"
        );
        Ok(id)
    }

    async fn is_live(&self, id: &TaskId) -> Result<bool, EnqueueError> {
        Ok(self
            .ports
            .tasks
            .get(id)
            .await?
            .is_some_and(|t| t.status != TaskStatus::Failed))
    }

    /// Claim eligible tasks up to the free worker slots and dispatch them.
    ///
    /// Safe to call from any number of triggers at once: the claim
    /// (eligible pending -> uploading, persisted) happens under the lock, and
    /// a task already in flight is never claimed again. Returns how many
    /// tasks were dispatched.
    pub async fn drain(&self) -> Result<usize, PipelineError> {
        let mut state = self.state.lock().await;
        self.flush_unsettled(&mut state).await?;

        let free = self.max_concurrent.saturating_sub(state.in_flight.len());
        if free == 0 {
            return Ok(0);
        }

        let now = self.ports.clock.now();
        let mut eligible: Vec<UploadTask> = self
            .ports
            .tasks
            .list_eligible(now)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending && !state.in_flight.contains(&t.id))
            .collect();
        eligible.sort_by_key(|t| (t.next_eligible_at, t.created_at, t.id));

        let mut dispatched = 0;
        for mut task in eligible.into_iter().take(free) {
            task.start_upload(now)?;
            self.ports.tasks.put(&task).await?;
            state.in_flight.insert(task.id);
            self.emit(Some(TaskStatus::Pending), &task);

            match self.dispatch_tx.try_send(ClaimedTask { task: task.clone() }) {
                Ok(()) => {
                    debug!(task_id = %task.id, attempt = task.attempt_count + 1, "task dispatched");
                    dispatched += 1;
                }
                Err(e) => {
                    self.settle(&mut state, task.id, Settlement::Release).await?;

                    return match e {
                        TrySendError::Full(_) => {
                            warn!(task_id = %task.id, "dispatch channel full; claim released");
                            Ok(dispatched)
                        }
                        TrySendError::Closed(_) => Err(PipelineError::DispatchClosed),
                    };
                }
            }
        }
        Ok(dispatched)
    }

    /// Apply the result of one upload attempt.
    ///
    /// Returns the task's new status, or `None` if the report was stale
    /// (unknown task, or the task is no longer uploading).
    pub async fn report_outcome(
        &self,
        task_id: TaskId,
        outcome: UploadOutcome,
    ) -> Result<Option<TaskStatus>, PipelineError> {
        let mut state = self.state.lock().await;
        self.settle(&mut state, task_id, Settlement::Outcome(outcome))
            .await
    }

    /// Number of claimed tasks whose final state is waiting for the store.
    pub async fn unsettled(&self) -> usize {
        self.state.lock().await.unsettled.len()
    }

    /// Apply a settlement and free the slot once the result is on disk.
    ///
    /// A store failure on a claimed task keeps its slot and parks the
    /// settlement; the next drain replays it. Any other result frees the slot.
    async fn settle(
        &self,
        state: &mut ControllerState,
        task_id: TaskId,
        settlement: Settlement,
    ) -> Result<Option<TaskStatus>, PipelineError> {
        let result = match &settlement {
            Settlement::Outcome(outcome) => self.apply_outcome(task_id, outcome.clone()).await,
            Settlement::Release => self.release_claim(task_id).await,
        };

        match result {
            Err(PipelineError::Store(e)) if state.in_flight.contains(&task_id) => {
                warn!(
                    task_id = %task_id,
                    error = %e,
                    "settlement not persisted; slot held until the store recovers"
                );
                state.unsettled.insert(task_id, settlement);
                self.retry_wakeup.notify_one();
                Err(PipelineError::Store(e))
            }
            other => {
                state.in_flight.remove(&task_id);
                state.unsettled.remove(&task_id);
                other
            }
        }
    }

    /// Replay parked settlements. Stops at the first one the store still refuses.
    async fn flush_unsettled(&self, state: &mut ControllerState) -> Result<(), PipelineError> {
        let parked: Vec<(TaskId, Settlement)> = state
            .unsettled
            .iter()
            .map(|(id, settlement)| (*id, settlement.clone()))
            .collect();
        for (task_id, settlement) in parked {
            self.settle(state, task_id, settlement).await?;
            debug!(task_id = %task_id, "parked settlement persisted");
        }
        Ok(())
    }

    async fn apply_outcome(
        &self,
        task_id: TaskId,
        outcome: UploadOutcome,
    ) -> Result<Option<TaskStatus>, PipelineError> {
        let Some(mut task) = self.ports.tasks.get(&task_id).await? else {
            warn!(task_id = %task_id, "outcome for unknown task");
            return Ok(None);
        };
        if task.status != TaskStatus::Uploading {
            warn!(task_id = %task_id, status = %task.status, "stale outcome ignored");
            return Ok(None);
        }

        let now = self.ports.clock.now();
        if outcome.was_dispatched() {
            task.record_attempt()?;
        }

        let mut wake_timer = false;
        match outcome {
            UploadOutcome::Success => {
                task.mark_uploaded(now)?;
                info!(task_id = %task.id, attempts = task.attempt_count, "upload succeeded");
            }
            UploadOutcome::Failed { error } => {
                match self.ports.decider.decide(&error, task.attempt_count) {
                    Decision::RetryNow => {
                        debug!(task_id = %task.id, error = %error, "retrying immediately");
                        task.schedule_retry(now, error, now)?;
                    }
                    Decision::RetryAfter(delay) => {
                        let next = after(now, delay);
                        debug!(
                            task_id = %task.id,
                            attempt = task.attempt_count,
                            error = %error,
                            retry_at = %next,
                            "retry scheduled"
                        );
                        task.schedule_retry(next, error, now)?;
                        wake_timer = true;
                    }
                    Decision::Terminal { reason } => {
                        warn!(
                            task_id = %task.id,
                            attempts = task.attempt_count,
                            error = %error,
                            reason = %reason,
                            "upload failed"
                        );
                        task.mark_failed(error, now)?;
                    }
                }
            }
        }

        self.ports.tasks.put(&task).await?;
        self.emit(Some(TaskStatus::Uploading), &task);
        if wake_timer {
            self.retry_wakeup.notify_one();
        }
        Ok(Some(task.status))
    }

    async fn release_claim(&self, task_id: TaskId) -> Result<Option<TaskStatus>, PipelineError> {
        let Some(mut task) = self.ports.tasks.get(&task_id).await? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Uploading {
            return Ok(Some(task.status));
        }
        task.recover(self.ports.clock.now())?;
        self.ports.tasks.put(&task).await?;
        self.emit(Some(TaskStatus::Uploading), &task);
        Ok(Some(task.status))
    }

    /// Reset one failed task to pending with a fresh attempt budget.
    /// Returns `false` if the task is missing or not failed.
    pub async fn retry_failed(&self, task_id: TaskId) -> Result<bool, PipelineError> {
        let _state = self.state.lock().await;

        let Some(mut task) = self.ports.tasks.get(&task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Failed {
            return Ok(false);
        }

        task.reset_for_retry(self.ports.clock.now())?;
        self.ports.tasks.put(&task).await?;
        self.emit(Some(TaskStatus::Failed), &task);
        info!(task_id = %task_id, "failed task reset for retry");
        Ok(true)
    }

    /// Reset every failed task. Returns how many were reset.
    pub async fn retry_all_failed(&self) -> Result<usize, PipelineError> {
        let _state = self.state.lock().await;
        let now = self.ports.clock.now();

        let mut reset = 0;
        for mut task in self.ports.tasks.list().await? {
            if task.status != TaskStatus::Failed {
                continue;
            }
            task.reset_for_retry(now)?;
            self.ports.tasks.put(&task).await?;
            self.emit(Some(TaskStatus::Failed), &task);
            reset += 1;
        }

        if reset > 0 {
            info!(count = reset, "failed tasks reset for retry");
        }
        Ok(reset)
    }

    /// Return tasks left `uploading` by a previous process to `pending`,
    /// eligible immediately. Run once before the first drain.
    pub async fn recover(&self) -> Result<usize, PipelineError> {
        let state = self.state.lock().await;
        let now = self.ports.clock.now();

        let mut recovered = 0;
        for mut task in self.ports.tasks.list().await? {
            if task.status != TaskStatus::Uploading || state.in_flight.contains(&task.id) {
                continue;
            }
            task.recover(now)?;
            self.ports.tasks.put(&task).await?;
            self.emit(Some(TaskStatus::Uploading), &task);
            recovered += 1;
        }

        if recovered > 0 {
            info!(count = recovered, "recovered interrupted uploads");
        }
        Ok(recovered)
    }

    /// Delete uploaded tasks (record and payload) whose retention has passed.
    pub async fn prune_uploaded(&self, retention: Duration) -> Result<usize, PipelineError> {
        let _state = self.state.lock().await;
        let now = self.ports.clock.now();

        let mut pruned = 0;
        for task in self.ports.tasks.list().await? {
            let expired = task.status == TaskStatus::Uploaded
                && task
                    .uploaded_at
                    .is_some_and(|uploaded_at| after(uploaded_at, retention) <= now);
            if !expired {
                continue;
            }
            self.ports.payloads.remove(&task.payload_ref).await?;
            self.ports.tasks.remove(&task.id).await?;
            pruned += 1;
        }

        if pruned > 0 {
            debug!(count = pruned, "pruned uploaded tasks");
        }
        Ok(pruned)
    }

    /// Earliest future `next_eligible_at` among pending tasks, or a short
    /// re-check while a settlement is parked.
    pub async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, PipelineError> {
        let now = self.ports.clock.now();
        let parked = !self.state.lock().await.unsettled.is_empty();
        let recheck = parked.then(|| after(now, UNSETTLED_RECHECK));
        let scheduled = self
            .ports
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending && t.next_eligible_at > now)
            .map(|t| t.next_eligible_at)
            .min();
        Ok(scheduled.into_iter().chain(recheck).min())
    }

    /// Time until the earliest scheduled retry becomes eligible.
    pub async fn next_retry_in(&self) -> Result<Option<Duration>, PipelineError> {
        let next = self.next_retry_at().await?;
        let now = self.ports.clock.now();
        Ok(next.map(|at| (at - now).to_std().unwrap_or(Duration::ZERO)))
    }

    /// Persisted record of one task. Payload bytes are not included.
    pub async fn task(&self, task_id: TaskId) -> Result<Option<UploadTask>, PipelineError> {
        Ok(self.ports.tasks.get(&task_id).await?)
    }

    pub async fn counts(&self) -> Result<QueueCounts, PipelineError> {
        let tasks = self.ports.tasks.list().await?;
        Ok(QueueCounts::from_tasks(&tasks))
    }

    pub async fn pending_count(&self) -> Result<usize, PipelineError> {
        Ok(self.counts().await?.pending)
    }

    pub async fn failed_count(&self) -> Result<usize, PipelineError> {
        Ok(self.counts().await?.failed)
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

fn after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
