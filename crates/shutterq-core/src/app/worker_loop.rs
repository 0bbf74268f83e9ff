//! Upload worker pool.
//!
//! `max_concurrent` long-lived workers share the receiving end of the
//! dispatch channel. Each claimed task is uploaded once and the outcome is
//! sent back on the report channel; workers never touch task status.
//!
//! # Flow (per task)
//! 1. IdentityProvider -> user id (failure: `AttributionUnavailable`)
//! 2. PayloadStore::read (failure: `PayloadMissing`)
//! 3. UploadBackend::upload under `upload_timeout` (elapsed: `Timeout`)
//! 4. AttemptReport -> controller

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::domain::{TaskId, UploadErrorKind, UploadOutcome, UploadTask};
use crate::ports::{IdentityProvider, PayloadStore, UploadBackend, UploadRequest};
use crate::queue::ClaimedTask;

/// Outcome of one attempt, sent from a worker to the controller.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub task_id: TaskId,
    pub outcome: UploadOutcome,
}

/// What a worker needs to perform an upload.
#[derive(Clone)]
pub struct WorkerContext {
    pub backend: Arc<dyn UploadBackend>,
    pub identity: Arc<dyn IdentityProvider>,
    pub payloads: Arc<dyn PayloadStore>,
    pub upload_timeout: Duration,
}

/// Worker group handle.
/// - `request_shutdown()` stops workers from taking new tasks
/// - an upload already running is finished and reported
/// - `shutdown_and_join()` waits for all workers
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(
        n: usize,
        ctx: WorkerContext,
        jobs: mpsc::Receiver<ClaimedTask>,
        reports: mpsc::UnboundedSender<AttemptReport>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(ctx);
        let jobs = Arc::new(Mutex::new(jobs));

        let joins = (0..n)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let jobs = Arc::clone(&jobs);
                let reports = reports.clone();
                let rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, ctx, jobs, reports, rx))
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    jobs: Arc<Mutex<mpsc::Receiver<ClaimedTask>>>,
    reports: mpsc::UnboundedSender<AttemptReport>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let claimed = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            claimed = async { jobs.lock().await.recv().await } => claimed,
        };

        // dispatch side closed
        let Some(ClaimedTask { task }) = claimed else {
            break;
        };

        let outcome = execute(worker_id, &ctx, &task).await;
        let report = AttemptReport {
            task_id: task.id,
            outcome,
        };
        if reports.send(report).is_err() {
            warn!(worker_id, task_id = %task.id, "controller gone; outcome dropped");
            break;
        }
    }
    debug!(worker_id, "worker stopped");
}

#[instrument(
    name = "upload",
    skip_all,
    fields(worker_id = worker_id, task_id = %task.id, event_id = %task.event_id, attempt = task.attempt_count + 1)
)]
async fn execute(worker_id: usize, ctx: &WorkerContext, task: &UploadTask) -> UploadOutcome {
    let user_id = match ctx.identity.current_user_id().await {
        Ok(user_id) => user_id,
        Err(reason) => return UploadOutcome::failed(UploadErrorKind::AttributionUnavailable, reason),
    };

    let payload = match ctx.payloads.read(&task.payload_ref).await {
        Ok(bytes) => bytes,
        Err(e) => return UploadOutcome::failed(UploadErrorKind::PayloadMissing, e.to_string()),
    };

    let request = UploadRequest {
        task_id: task.id,
        event_id: task.event_id.clone(),
        user_id,
        payload,
        meta: task.payload_meta.clone(),
    };

    let outcome = match tokio::time::timeout(ctx.upload_timeout, ctx.backend.upload(request)).await
    {
        Ok(result) => UploadOutcome::from(result),
        Err(_) => UploadOutcome::failed(
            UploadErrorKind::Timeout,
            format!("no response within {:?}", ctx.upload_timeout),
        ),
    };

    match &outcome {
        UploadOutcome::Success => debug!("upload accepted"),
        UploadOutcome::Failed { error } => debug!(error = %error, "upload attempt failed"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PayloadMeta, PayloadRef};
    use crate::impls::InMemoryPayloadStore;
    use crate::testing::{FakeBackend, StaticIdentity, sample_task};

    fn context(backend: Arc<FakeBackend>, identity: StaticIdentity) -> WorkerContext {
        WorkerContext {
            backend,
            identity: Arc::new(identity),
            payloads: Arc::new(InMemoryPayloadStore::new()),
            upload_timeout: Duration::from_secs(5),
        }
    }

    async fn stored_task(ctx: &WorkerContext) -> UploadTask {
        let mut task = sample_task("evt-1");
        task.payload_ref = ctx.payloads.write(&task.id, b"jpeg").await.unwrap();
        task
    }

    #[tokio::test]
    async fn execute_sends_attributed_request() {
        let backend = Arc::new(FakeBackend::succeeding());
        let ctx = context(backend.clone(), StaticIdentity::user("u-1"));
        let task = stored_task(&ctx).await;

        let outcome = execute(0, &ctx, &task).await;

        assert_eq!(outcome, UploadOutcome::Success);
        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].task_id, task.id);
        assert_eq!(requests[0].user_id.as_str(), "u-1");
        assert_eq!(requests[0].payload, b"jpeg");
    }

    #[tokio::test]
    async fn identity_failure_is_not_dispatched() {
        let backend = Arc::new(FakeBackend::succeeding());
        let ctx = context(backend.clone(), StaticIdentity::signed_out());
        let task = stored_task(&ctx).await;

        let outcome = execute(0, &ctx, &task).await;

        assert!(!outcome.was_dispatched());
        assert!(matches!(
            outcome,
            UploadOutcome::Failed { ref error } if error.kind == UploadErrorKind::AttributionUnavailable
        ));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_payload_is_not_dispatched() {
        let backend = Arc::new(FakeBackend::succeeding());
        let ctx = context(backend.clone(), StaticIdentity::user("u-1"));
        let mut task = sample_task("evt-1");
        task.payload_ref = PayloadRef::new("mem:gone");
        task.payload_meta = PayloadMeta {
            content_type: "image/jpeg".into(),
            byte_size: 0,
            width: 1,
            height: 1,
        };

        let outcome = execute(0, &ctx, &task).await;

        assert!(matches!(
            outcome,
            UploadOutcome::Failed { ref error } if error.kind == UploadErrorKind::PayloadMissing
        ));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = Arc::new(FakeBackend::succeeding().with_latency(Duration::from_secs(60)));
        let mut ctx = context(backend, StaticIdentity::user("u-1"));
        ctx.upload_timeout = Duration::from_secs(30);
        let task = stored_task(&ctx).await;

        let outcome = execute(0, &ctx, &task).await;

        assert!(matches!(
            outcome,
            UploadOutcome::Failed { ref error } if error.kind == UploadErrorKind::Timeout
        ));
    }

    #[tokio::test]
    async fn group_reports_every_task_and_stops_when_dispatch_closes() {
        let backend = Arc::new(FakeBackend::succeeding());
        let ctx = context(backend.clone(), StaticIdentity::user("u-1"));
        let (jobs_tx, jobs_rx) = mpsc::channel(4);
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
        let group = WorkerGroup::spawn(2, ctx.clone(), jobs_rx, reports_tx);
        assert_eq!(group.len(), 2);

        let mut ids = Vec::new();
        for _ in 0..4 {
            let task = stored_task(&ctx).await;
            ids.push(task.id);
            jobs_tx.send(ClaimedTask { task }).await.unwrap();
        }
        drop(jobs_tx);

        let mut reported = Vec::new();
        while let Some(report) = reports_rx.recv().await {
            assert_eq!(report.outcome, UploadOutcome::Success);
            reported.push(report.task_id);
        }
        reported.sort();
        ids.sort();
        assert_eq!(reported, ids);

        group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let ctx = context(
            Arc::new(FakeBackend::succeeding()),
            StaticIdentity::user("u-1"),
        );
        let (_jobs_tx, jobs_rx) = mpsc::channel(1);
        let (reports_tx, _reports_rx) = mpsc::unbounded_channel();
        let group = WorkerGroup::spawn(3, ctx, jobs_rx, reports_tx);

        tokio::time::timeout(Duration::from_secs(5), group.shutdown_and_join())
            .await
            .unwrap();
    }
}
