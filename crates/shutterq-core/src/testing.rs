//! Test doubles shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use ulid::Ulid;

use crate::domain::{
    EventId, PayloadMeta, PayloadRef, StoreError, TaskId, UploadError, UploadErrorKind,
    UploadTask, UserId,
};
use crate::impls::InMemoryTaskStore;
use crate::ports::{
    CaptureGate, IdGenerator, IdentityProvider, TaskStore, UploadBackend, UploadRequest,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

/// Pending task created at `t0()` with a fresh id.
pub fn sample_task(event_id: &str) -> UploadTask {
    let id = TaskId::from_ulid(Ulid::new());
    UploadTask::new(
        id,
        EventId::new(event_id),
        PayloadRef::new(format!("mem:{id}")),
        PayloadMeta {
            content_type: "image/jpeg".to_string(),
            byte_size: 4,
            width: 1,
            height: 1,
        },
        t0(),
    )
}

/// PNG gradient of the given size.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub struct AllowAll;

#[async_trait]
impl CaptureGate for AllowAll {
    async fn is_capture_allowed(&self, _event_id: &EventId) -> bool {
        true
    }
}

pub struct DenyAll;

#[async_trait]
impl CaptureGate for DenyAll {
    async fn is_capture_allowed(&self, _event_id: &EventId) -> bool {
        false
    }
}

pub struct StaticIdentity {
    user: Option<UserId>,
}

impl StaticIdentity {
    pub fn user(id: &str) -> Self {
        Self {
            user: Some(UserId::new(id)),
        }
    }

    pub fn signed_out() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user_id(&self) -> Result<UserId, String> {
        self.user.clone().ok_or_else(|| "no active session".to_string())
    }
}

/// Monotonic ids, so creation order is also id order.
#[derive(Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl IdGenerator for SequentialIds {
    fn generate_task_id(&self) -> TaskId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        TaskId::from_ulid(Ulid::from_parts(1_700_000_000_000 + n, u128::from(n)))
    }
}

/// Scripted backend.
///
/// Answers each call with the next scripted result, then with `fallback`
/// once the script runs out. Accepts each task id at most once, records
/// every request, and tracks peak concurrency.
pub struct FakeBackend {
    script: Mutex<VecDeque<Result<(), UploadError>>>,
    fallback: Result<(), UploadError>,
    latency: Duration,
    requests: Mutex<Vec<UploadRequest>>,
    accepted: Mutex<HashSet<TaskId>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeBackend {
    fn with_fallback(fallback: Result<(), UploadError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            accepted: Mutex::new(HashSet::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(()))
    }

    pub fn failing(kind: UploadErrorKind) -> Self {
        Self::with_fallback(Err(UploadError::new(kind, "scripted failure")))
    }

    /// Fail with these kinds first, then succeed.
    pub fn failing_first(kinds: &[UploadErrorKind]) -> Self {
        let backend = Self::succeeding();
        backend.script.lock().unwrap().extend(
            kinds
                .iter()
                .map(|kind| Err(UploadError::new(*kind, "scripted failure"))),
        );
        backend
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, id: TaskId) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_id == id)
            .count()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().unwrap().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadBackend for FakeBackend {
    async fn upload(&self, request: UploadRequest) -> Result<(), UploadError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let task_id = request.task_id;
        self.requests.lock().unwrap().push(request);
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if result.is_ok() {
            self.accepted.lock().unwrap().insert(task_id);
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// In-memory task store whose writes can be made to fail.
///
/// Clones share both the records and the write budget.
#[derive(Debug, Clone, Default)]
pub struct FlakyTaskStore {
    inner: InMemoryTaskStore,
    /// `None`: every write succeeds. `Some(n)`: n more writes succeed.
    write_budget: Arc<Mutex<Option<usize>>>,
}

impl FlakyTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryTaskStore {
        &self.inner
    }

    pub fn fail_puts(&self, fail: bool) {
        *self.write_budget.lock().unwrap() = fail.then_some(0);
    }

    /// Let `n` more writes through, then fail the rest.
    pub fn fail_puts_after(&self, n: usize) {
        *self.write_budget.lock().unwrap() = Some(n);
    }

    fn take_write(&self) -> bool {
        match self.write_budget.lock().unwrap().as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    async fn put(&self, task: &UploadTask) -> Result<(), StoreError> {
        if !self.take_write() {
            return Err(StoreError::io(
                format!("flaky/{}.json", task.id),
                std::io::Error::other("disk full"),
            ));
        }
        self.inner.put(task).await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<UploadTask>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<UploadTask>, StoreError> {
        self.inner.list().await
    }

    async fn remove(&self, id: &TaskId) -> Result<(), StoreError> {
        self.inner.remove(id).await
    }
}
