//! PipelineBuilder - wiring and startup
//!
//! # Startup validation (fail fast)
//! - config is validated before anything is spawned
//! - every required collaborator must be set; all missing ones are reported
//!   together in `BuildError::Missing`
//!
//! # Startup order
//! 1. recover tasks left `uploading` by a previous process
//! 2. spawn workers, the outcome loop, trigger loops, retry timer, retention loop
//! 3. initial drain

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

use super::outcome_loop::OutcomeLoop;
use super::pipeline::Pipeline;
use super::retention_loop::RetentionLoop;
use super::retry_timer::RetryTimer;
use super::trigger_loop::TriggerLoop;
use super::worker_loop::{WorkerContext, WorkerGroup};
use crate::config::{ConfigError, PipelineConfig};
use crate::domain::{Decider, DefaultDecider, PipelineError, StoreError};
use crate::impls::{FilePayloadStore, FileTaskStore};
use crate::ports::{
    CaptureGate, Clock, IdGenerator, IdentityProvider, PayloadStore, SystemClock, TaskStore,
    TriggerSource, UlidGenerator, UploadBackend,
};
use crate::queue::{ControllerPorts, QueueController};
use crate::transform::TransformStage;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing pipeline components: {0:?}")]
    Missing(Vec<&'static str>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("startup recovery failed: {0}")]
    Recovery(#[from] PipelineError),
}

/// # Example
/// ```ignore
/// let pipeline = PipelineBuilder::new(PipelineConfig::from_env()?)
///     .open_file_stores()
///     .await?
///     .backend(my_backend)
///     .identity(session)
///     .capture_gate(events)
///     .trigger(connectivity_source)
///     .start()
///     .await?;
/// ```
pub struct PipelineBuilder {
    config: PipelineConfig,
    tasks: Option<Arc<dyn TaskStore>>,
    payloads: Option<Arc<dyn PayloadStore>>,
    backend: Option<Arc<dyn UploadBackend>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    gate: Option<Arc<dyn CaptureGate>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
    triggers: Vec<Box<dyn TriggerSource>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            tasks: None,
            payloads: None,
            backend: None,
            identity: None,
            gate: None,
            clock: None,
            ids: None,
            decider: None,
            triggers: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Use file-backed stores under `config.data_dir`.
    pub async fn open_file_stores(self) -> Result<Self, BuildError> {
        let tasks = FileTaskStore::open(self.config.tasks_dir()).await?;
        let payloads = FilePayloadStore::open(self.config.payloads_dir()).await?;
        Ok(self.task_store(tasks).payload_store(payloads))
    }

    pub fn task_store(mut self, store: impl TaskStore + 'static) -> Self {
        self.tasks = Some(Arc::new(store));
        self
    }

    pub fn payload_store(mut self, store: impl PayloadStore + 'static) -> Self {
        self.payloads = Some(Arc::new(store));
        self
    }

    pub fn backend<B: UploadBackend + 'static>(mut self, backend: Arc<B>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    pub fn capture_gate(mut self, gate: impl CaptureGate + 'static) -> Self {
        self.gate = Some(Arc::new(gate));
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Defaults to a [`UlidGenerator`] on the pipeline clock.
    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Defaults to a [`DefaultDecider`] built from the config's retry policy.
    pub fn decider(mut self, decider: impl Decider + 'static) -> Self {
        self.decider = Some(Arc::new(decider));
        self
    }

    /// Add a source of drain triggers. May be called more than once.
    pub fn trigger(mut self, source: impl TriggerSource + 'static) -> Self {
        self.triggers.push(Box::new(source));
        self
    }

    /// Validate, recover, spawn everything and run the first drain.
    pub async fn start(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;

        let mut missing = Vec::new();
        if self.tasks.is_none() {
            missing.push("task_store");
        }
        if self.payloads.is_none() {
            missing.push("payload_store");
        }
        if self.backend.is_none() {
            missing.push("backend");
        }
        if self.identity.is_none() {
            missing.push("identity");
        }
        if self.gate.is_none() {
            missing.push("capture_gate");
        }
        let (Some(tasks), Some(payloads), Some(backend), Some(identity), Some(gate)) = (
            self.tasks,
            self.payloads,
            self.backend,
            self.identity,
            self.gate,
        ) else {
            return Err(BuildError::Missing(missing));
        };

        let config = self.config;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(DefaultDecider::new(config.retry_policy())));

        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.max_concurrent);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Arc::new(QueueController::new(
            ControllerPorts {
                tasks,
                payloads: Arc::clone(&payloads),
                gate,
                clock,
                ids,
                decider,
            },
            TransformStage::new(config.transform.clone()),
            config.max_concurrent,
            dispatch_tx,
        ));

        controller.recover().await?;

        let workers = WorkerGroup::spawn(
            config.max_concurrent,
            WorkerContext {
                backend,
                identity,
                payloads,
                upload_timeout: config.upload_timeout(),
            },
            dispatch_rx,
            reports_tx,
        );

        let outcome_loop = tokio::spawn(
            OutcomeLoop::new(Arc::clone(&controller), reports_rx).run(shutdown_rx.clone()),
        );

        let mut loops = Vec::new();
        for source in self.triggers {
            loops.push(tokio::spawn(
                TriggerLoop::new(Arc::clone(&controller), source).run(shutdown_rx.clone()),
            ));
        }
        loops.push(tokio::spawn(
            RetryTimer::new(Arc::clone(&controller)).run(shutdown_rx.clone()),
        ));
        loops.push(tokio::spawn(
            RetentionLoop::new(
                Arc::clone(&controller),
                config.retention(),
                config.retention_sweep(),
            )
            .run(shutdown_rx),
        ));

        let dispatched = controller.drain().await?;
        info!(
            workers = workers.len(),
            dispatched,
            max_attempts = config.max_attempts,
            "pipeline started"
        );

        Ok(Pipeline {
            controller,
            drain_on_enqueue: config.drain_on_enqueue,
            shutdown_tx,
            workers,
            loops,
            outcome_loop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryPayloadStore, InMemoryTaskStore};
    use crate::testing::{AllowAll, FakeBackend, StaticIdentity};

    #[tokio::test]
    async fn missing_components_are_all_reported() {
        let result = PipelineBuilder::new(PipelineConfig::default())
            .task_store(InMemoryTaskStore::new())
            .identity(StaticIdentity::user("u-1"))
            .start()
            .await;

        assert!(matches!(
            result,
            Err(BuildError::Missing(missing))
                if missing == vec!["payload_store", "backend", "capture_gate"]
        ));
    }

    #[tokio::test]
    async fn invalid_config_fails_before_spawning() {
        let config = PipelineConfig {
            max_concurrent: 0,
            ..PipelineConfig::default()
        };

        let result = PipelineBuilder::new(config).start().await;

        assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }

    #[tokio::test]
    async fn complete_builder_starts_and_stops() {
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .task_store(InMemoryTaskStore::new())
            .payload_store(InMemoryPayloadStore::new())
            .backend(Arc::new(FakeBackend::succeeding()))
            .identity(StaticIdentity::user("u-1"))
            .capture_gate(AllowAll)
            .start()
            .await
            .unwrap();

        assert_eq!(pipeline.counts().await.unwrap().total(), 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn file_stores_live_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };

        let builder = PipelineBuilder::new(config).open_file_stores().await.unwrap();

        assert!(builder.tasks.is_some() && builder.payloads.is_some());
        assert!(dir.path().join("tasks").is_dir());
        assert!(dir.path().join("payloads").is_dir());
    }
}
