use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shutterq_core::domain::{EventId, TaskId, UploadError, UploadErrorKind, UserId};
use shutterq_core::impls::channel_trigger;
use shutterq_core::ports::{CaptureGate, IdentityProvider, UploadBackend, UploadRequest};
use shutterq_core::{Pipeline, PipelineBuilder, PipelineConfig, QueueCounts};

/// Simulated storage backend: offline until told otherwise, then flaky.
struct SimulatedBackend {
    online: AtomicBool,
    /// Every n-th online request answers 503.
    flaky_every: u32,
    calls: AtomicU32,
    accepted: Mutex<HashSet<TaskId>>,
}

impl SimulatedBackend {
    fn new(flaky_every: u32) -> Self {
        Self {
            online: AtomicBool::new(false),
            flaky_every,
            calls: AtomicU32::new(0),
            accepted: Mutex::new(HashSet::new()),
        }
    }

    fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UploadBackend for SimulatedBackend {
    async fn upload(&self, request: UploadRequest) -> Result<(), UploadError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(UploadError::new(UploadErrorKind::NoConnectivity, "network unreachable"));
        }

        sleep(Duration::from_millis(150)).await;

        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.flaky_every > 0 && call % self.flaky_every == 0 {
            return Err(UploadError::new(UploadErrorKind::ServerUnavailable, "503 from storage"));
        }

        // idempotent accept keyed by task id
        let mut accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        if !accepted.insert(request.task_id) {
            info!(task_id = %request.task_id, "duplicate upload acknowledged");
        }
        Ok(())
    }
}

struct DemoSession;

#[async_trait]
impl IdentityProvider for DemoSession {
    async fn current_user_id(&self) -> Result<UserId, String> {
        Ok(UserId::new("demo-user"))
    }
}

/// Only `party` accepts captures.
struct DemoEvents;

#[async_trait]
impl CaptureGate for DemoEvents {
    async fn is_capture_allowed(&self, event_id: &EventId) -> bool {
        event_id.as_str() == "party"
    }
}

/// Synthetic "photo": a colored gradient.
fn synthetic_capture(seed: u32, width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x + seed * 40) % 256) as u8,
            ((y + seed * 70) % 256) as u8,
            ((x ^ y) % 256) as u8,
        ])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .context("encode synthetic capture")?;
    Ok(out.into_inner())
}

fn load_config() -> anyhow::Result<PipelineConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("load config from {path}"))?,
        None => PipelineConfig::default(),
    };
    config
        .overridden_by(|key| std::env::var(key).ok())
        .context("apply SHUTTERQ_* overrides")
}

/// Poll until nothing is pending or uploading.
async fn wait_settled(pipeline: &Pipeline) -> anyhow::Result<QueueCounts> {
    loop {
        let counts = pipeline.counts().await?;
        if counts.is_settled() {
            return Ok(counts);
        }
        sleep(Duration::from_millis(100)).await;
    }
}

fn print_counts(label: &str, counts: &QueueCounts) {
    println!(
        "{label}: pending={} uploading={} uploaded={} failed={}",
        counts.pending, counts.uploading, counts.uploaded, counts.failed
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    info!(data_dir = %config.data_dir.display(), "starting demo");

    // (A) collaborators
    let backend = Arc::new(SimulatedBackend::new(4));
    let (connectivity, triggers) = channel_trigger(8);

    // (B) pipeline (recovers anything a previous run left behind)
    let pipeline = PipelineBuilder::new(config)
        .open_file_stores()
        .await?
        .backend(Arc::clone(&backend))
        .identity(DemoSession)
        .capture_gate(DemoEvents)
        .trigger(triggers)
        .start()
        .await?;

    let mut events = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let from = event.from.map(|s| s.to_string()).unwrap_or_else(|| "new".into());
            println!(
                "  {} {from} -> {} (attempts={})",
                event.task_id, event.to, event.attempt_count
            );
        }
    });

    // (C) capture while offline
    for seed in 0..6 {
        let raw = synthetic_capture(seed, 1600, 1200)?;
        let id = pipeline.enqueue(raw, EventId::new("party")).await?;
        info!(task_id = %id, "captured");
    }
    match pipeline
        .enqueue(synthetic_capture(99, 64, 64)?, EventId::new("archived"))
        .await
    {
        Ok(id) => warn!(task_id = %id, "closed event accepted a capture"),
        Err(e) => println!("rejected: {e}"),
    }
    print_counts("offline", &pipeline.counts().await?);

    // (D) connectivity comes back
    sleep(Duration::from_millis(500)).await;
    backend.go_online();
    connectivity.on_connectivity_restored();

    // (E) wait for convergence (or Ctrl-C)
    let interrupted = tokio::select! {
        counts = wait_settled(&pipeline) => {
            print_counts("settled", &counts?);
            false
        }
        _ = tokio::signal::ctrl_c() => {
            println!("interrupted");
            true
        }
    };

    // (F) one manual retry round for anything that gave up
    if !interrupted && pipeline.failed_count().await? > 0 {
        let reset = pipeline.retry_all_failed().await?;
        println!("retrying {reset} failed uploads");
        tokio::select! {
            counts = wait_settled(&pipeline) => print_counts("after retry", &counts?),
            _ = tokio::signal::ctrl_c() => println!("interrupted"),
        }
    }

    pipeline.shutdown().await;
    printer.abort();
    Ok(())
}
