//! RunEngine - State machine for run orchestration
//!
//! The RunEngine executes plans, manages pause/resume/abort, and emits the
//! document stream of each run.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐   start()   ┌─────────┐
//! │ Idle │────────────▶│ Running │
//! └──────┘             └────┬────┘
//!    ▲                      │
//!    │  completed           │ pause() at checkpoint
//!    │                      ▼
//!    │                 ┌────────┐
//!    │◀────resume()────│ Paused │
//!    │                 └────────┘
//!    │
//!    │  abort()
//!    └────────────────────────────
//! ```
//!
//! # Documents
//!
//! Every run emits exactly one `start` first and exactly one `stop` last.
//! In between, each `EmitEvent` turns everything read since the previous
//! event into one `event`. A `descriptor` is emitted right before the first
//! event of every distinct (stream, field set) pair; events carry a
//! `seq_num` counted per descriptor, starting at 1.
//!
//! Documents go to the broadcast channel returned by [`RunEngine::subscribe`]
//! and, synchronously and in order, to every callback registered with
//! [`RunEngine::subscribe_callback`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = RunEngine::new();
//! let recorder = DocumentRecorder::attach(&engine);
//!
//! let summary = engine.run(Box::new(Count::new(2).with_detector(det))).await?;
//! assert_eq!(summary.exit_status, ExitStatus::Success);
//! assert_eq!(recorder.kinds().len(), 5);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use super::plans::{Plan, PlanCommand};
use daq_core::experiment::document::{
    new_uid, DataKey, DescriptorDoc, Document, EventDoc, ExitStatus, StartDoc, StopDoc,
};
use daq_core::Reading;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No plan running, ready to accept new plans
    Idle,
    /// Executing a plan
    Running,
    /// Paused at a checkpoint, can resume or abort
    Paused,
    /// Aborting current plan (will return to Idle)
    Aborting,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
            EngineState::Aborting => write!(f, "aborting"),
        }
    }
}

/// Synchronous document callback.
pub type DocumentCallback = Arc<dyn Fn(&Document) + Send + Sync>;

/// Handle returned by [`RunEngine::subscribe_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Run identifier (uid of the start document)
    pub run_uid: String,
    /// How the run ended
    pub exit_status: ExitStatus,
    /// Reason for abort/failure, empty on success
    pub reason: String,
    /// Events emitted per stream
    pub num_events: BTreeMap<String, u32>,
}

/// A queued plan waiting to be executed
struct QueuedPlan {
    plan: Box<dyn Plan>,
    metadata: HashMap<String, String>,
    run_uid: String,
}

/// Run context for the currently executing plan
#[derive(Default)]
struct RunContext {
    run_uid: String,
    // (stream, sorted field names) -> descriptor uid
    descriptors: HashMap<(String, Vec<String>), String>,
    // descriptor uid -> last seq_num
    seq_nums: HashMap<String, u32>,
    num_events: BTreeMap<String, u32>,
    pending: BTreeMap<String, Reading>,
    pending_keys: BTreeMap<String, DataKey>,
    pending_config: BTreeMap<String, BTreeMap<String, Reading>>,
}

/// The RunEngine orchestrates plan execution
pub struct RunEngine {
    /// Current engine state
    state: RwLock<EngineState>,

    /// Queue of plans to execute
    plan_queue: Mutex<Vec<QueuedPlan>>,

    /// Document broadcast channel
    doc_sender: broadcast::Sender<Document>,

    /// Synchronous document callbacks, in subscription order
    callbacks: parking_lot::RwLock<Vec<(SubscriptionId, DocumentCallback)>>,
    next_subscription: AtomicU64,

    /// Pause request flag
    pause_requested: RwLock<bool>,

    /// Abort request (with reason)
    abort_requested: RwLock<Option<String>>,

    /// Current run context (when running)
    run_context: Mutex<Option<RunContext>>,

    /// Last checkpoint label (for resume)
    last_checkpoint: RwLock<Option<String>>,
}

impl Default for RunEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunEngine {
    /// Create a new RunEngine
    pub fn new() -> Self {
        let (doc_sender, _) = broadcast::channel(1024);

        Self {
            state: RwLock::new(EngineState::Idle),
            plan_queue: Mutex::new(Vec::new()),
            doc_sender,
            callbacks: parking_lot::RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            pause_requested: RwLock::new(false),
            abort_requested: RwLock::new(None),
            run_context: Mutex::new(None),
            last_checkpoint: RwLock::new(None),
        }
    }

    /// Subscribe to document stream
    pub fn subscribe(&self) -> broadcast::Receiver<Document> {
        self.doc_sender.subscribe()
    }

    /// Call `callback` with every document, synchronously, in emission order
    pub fn subscribe_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Document) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if the id was unknown.
    pub fn unsubscribe_callback(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(sub, _)| *sub != id);
        callbacks.len() != before
    }

    /// Get current engine state
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Queue a plan for execution
    pub async fn queue(&self, plan: Box<dyn Plan>) -> String {
        self.queue_with_metadata(plan, HashMap::new()).await
    }

    /// Queue a plan with user-provided metadata
    pub async fn queue_with_metadata(
        &self,
        plan: Box<dyn Plan>,
        metadata: HashMap<String, String>,
    ) -> String {
        let run_uid = new_uid();
        info!(run_uid = %run_uid, plan_type = %plan.plan_type(), "Queueing plan");

        let mut queue = self.plan_queue.lock().await;
        queue.push(QueuedPlan {
            plan,
            metadata,
            run_uid: run_uid.clone(),
        });

        run_uid
    }

    /// Queue a plan and execute it immediately
    pub async fn run(&self, plan: Box<dyn Plan>) -> anyhow::Result<RunSummary> {
        self.queue(plan).await;
        self.start().await
    }

    /// Execute the next queued plan
    pub async fn start(&self) -> anyhow::Result<RunSummary> {
        let current_state = *self.state.read().await;
        if current_state != EngineState::Idle {
            anyhow::bail!("Cannot start: engine is {}", current_state);
        }

        // Reset flags
        *self.pause_requested.write().await = false;
        *self.abort_requested.write().await = None;

        // Get next plan from queue
        let queued = {
            let mut queue = self.plan_queue.lock().await;
            if queue.is_empty() {
                anyhow::bail!("No plans in queue");
            }
            queue.remove(0)
        };

        *self.state.write().await = EngineState::Running;
        info!("Engine started");

        Ok(self.execute_plan(queued).await)
    }

    /// Request pause at next checkpoint
    pub async fn pause(&self) -> anyhow::Result<()> {
        let current_state = *self.state.read().await;
        if current_state != EngineState::Running {
            anyhow::bail!("Cannot pause: engine is {}", current_state);
        }

        info!("Pause requested");
        *self.pause_requested.write().await = true;
        Ok(())
    }

    /// Resume from paused state
    pub async fn resume(&self) -> anyhow::Result<()> {
        let current_state = *self.state.read().await;
        if current_state != EngineState::Paused {
            anyhow::bail!("Cannot resume: engine is {}", current_state);
        }

        info!("Resuming from pause");
        *self.pause_requested.write().await = false;
        *self.state.write().await = EngineState::Running;
        Ok(())
    }

    /// Abort current plan (stops at next command boundary)
    pub async fn abort(&self, reason: &str) -> anyhow::Result<()> {
        let current_state = *self.state.read().await;
        match current_state {
            EngineState::Running | EngineState::Paused => {
                info!(reason = %reason, "Abort requested");
                *self.abort_requested.write().await = Some(reason.to_string());
                *self.state.write().await = EngineState::Aborting;
                Ok(())
            }
            _ => anyhow::bail!("Cannot abort: engine is {}", current_state),
        }
    }

    /// Execute a single plan. A stop document is always emitted.
    async fn execute_plan(&self, mut queued: QueuedPlan) -> RunSummary {
        let plan = &mut queued.plan;

        // Create and emit StartDoc
        let mut start_doc = StartDoc::new(plan.plan_type(), plan.plan_name());
        start_doc.uid = queued.run_uid.clone();
        start_doc.plan_args = plan.plan_args();
        start_doc
            .plan_args
            .insert("num_points".to_string(), plan.num_points().to_string());
        start_doc.metadata = queued.metadata;
        start_doc.hints = plan.movers();

        let run_uid = start_doc.uid.clone();
        info!(run_uid = %run_uid, plan_type = %start_doc.plan_type, "Run started");
        self.emit_document(Document::Start(start_doc));

        *self.run_context.lock().await = Some(RunContext {
            run_uid: run_uid.clone(),
            ..RunContext::default()
        });

        // Execute plan commands
        let mut exit_status = ExitStatus::Success;
        let mut exit_reason = String::new();

        loop {
            // Check for abort
            if let Some(reason) = self.abort_requested.read().await.clone() {
                exit_status = ExitStatus::Abort;
                exit_reason = reason;
                break;
            }

            // Wait out a pause (entered at a checkpoint)
            if *self.state.read().await == EngineState::Paused {
                sleep(Duration::from_millis(20)).await;
                continue;
            }

            // Get next command
            let Some(cmd) = plan.next_command() else {
                // Plan completed successfully
                break;
            };

            // Process command
            if let Err(e) = self.process_command(cmd).await {
                error!(run_uid = %run_uid, error = %e, "Plan execution failed");
                exit_status = ExitStatus::Fail;
                exit_reason = format!("{:#}", e);
                break;
            }
        }

        let num_events = self
            .run_context
            .lock()
            .await
            .take()
            .map(|ctx| ctx.num_events)
            .unwrap_or_default();

        // Emit StopDoc
        let stop_doc = match exit_status {
            ExitStatus::Success => StopDoc::success(&run_uid, num_events.clone()),
            ExitStatus::Abort => StopDoc::abort(&run_uid, &exit_reason, num_events.clone()),
            ExitStatus::Fail => StopDoc::fail(&run_uid, &exit_reason, num_events.clone()),
        };
        self.emit_document(Document::Stop(stop_doc));
        *self.state.write().await = EngineState::Idle;

        info!(
            run_uid = %run_uid,
            exit_status = %exit_status,
            num_events = ?num_events,
            "Plan execution complete"
        );

        RunSummary {
            run_uid,
            exit_status,
            reason: exit_reason,
            num_events,
        }
    }

    /// Process a single plan command
    async fn process_command(&self, cmd: PlanCommand) -> anyhow::Result<()> {
        debug!(?cmd, "Processing command");

        match cmd {
            PlanCommand::Set { signal, value } => {
                debug!(signal = %signal.name(), value = %value, "Setting");
                signal.set(value).await?;
            }

            PlanCommand::Trigger { signal } => {
                debug!(signal = %signal.name(), "Triggering");
                signal.trigger().await?;
            }

            PlanCommand::Read { target } => {
                let name = target.name();
                debug!(target = %name, "Reading");
                let readings = target.read()?;
                let keys = target.describe()?;
                let config = target.read_configuration()?;

                let mut ctx_guard = self.run_context.lock().await;
                let ctx = ctx_guard
                    .as_mut()
                    .ok_or_else(|| anyhow::anyhow!("No active run context"))?;
                ctx.pending.extend(readings);
                ctx.pending_keys.extend(keys);
                if !config.is_empty() {
                    ctx.pending_config.insert(name, config);
                }
            }

            PlanCommand::Wait { seconds } => {
                debug!(seconds = %seconds, "Waiting");
                let delay = Duration::try_from_secs_f64(seconds.max(0.0))
                    .map_err(|_| anyhow::anyhow!("Invalid wait of {} s", seconds))?;
                sleep(delay).await;
            }

            PlanCommand::Checkpoint { label } => {
                debug!(label = %label, "Checkpoint");
                *self.last_checkpoint.write().await = Some(label);

                // Check if pause was requested
                if *self.pause_requested.read().await {
                    info!("Pausing at checkpoint");
                    *self.state.write().await = EngineState::Paused;
                }
            }

            PlanCommand::EmitEvent { stream } => {
                let mut ctx_guard = self.run_context.lock().await;
                let ctx = ctx_guard
                    .as_mut()
                    .ok_or_else(|| anyhow::anyhow!("No active run context"))?;

                let fields: Vec<String> = ctx.pending.keys().cloned().collect();
                let key = (stream.clone(), fields);
                let descriptor_uid = match ctx.descriptors.get(&key) {
                    Some(uid) => uid.clone(),
                    None => {
                        let mut descriptor = DescriptorDoc::new(&ctx.run_uid, &stream);
                        descriptor.data_keys = std::mem::take(&mut ctx.pending_keys);
                        descriptor.configuration = std::mem::take(&mut ctx.pending_config);
                        let uid = descriptor.uid.clone();
                        ctx.descriptors.insert(key, uid.clone());
                        self.emit_document(Document::Descriptor(descriptor));
                        uid
                    }
                };

                let seq_num = ctx.seq_nums.entry(descriptor_uid.clone()).or_insert(0);
                *seq_num += 1;
                let mut event = EventDoc::new(&ctx.run_uid, &descriptor_uid, *seq_num);
                for (field, reading) in std::mem::take(&mut ctx.pending) {
                    event = event.with_reading(&field, &reading);
                }
                ctx.pending_keys.clear();
                ctx.pending_config.clear();
                *ctx.num_events.entry(stream).or_insert(0) += 1;

                drop(ctx_guard);
                self.emit_document(Document::Event(event));
            }
        }
        Ok(())
    }

    /// Emit a document to all subscribers
    fn emit_document(&self, doc: Document) {
        debug!(kind = %doc.kind(), uid = %doc.uid(), run_uid = %doc.run_uid(), "Emitting document");

        let callbacks: Vec<DocumentCallback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(&doc);
        }

        // Ignore send errors (no subscribers)
        let _ = self.doc_sender.send(doc);
    }

    /// Get the number of queued plans
    pub async fn queue_len(&self) -> usize {
        self.plan_queue.lock().await.len()
    }

    /// Clear all queued plans
    pub async fn clear_queue(&self) {
        self.plan_queue.lock().await.clear();
    }

    /// Get the current run UID (if running)
    pub async fn current_run_uid(&self) -> Option<String> {
        self.run_context
            .lock()
            .await
            .as_ref()
            .map(|ctx| ctx.run_uid.clone())
    }

    /// Get current progress (events emitted so far)
    pub async fn current_progress(&self) -> Option<u32> {
        self.run_context
            .lock()
            .await
            .as_ref()
            .map(|ctx| ctx.num_events.values().sum())
    }

    /// Label of the last checkpoint passed
    pub async fn last_checkpoint(&self) -> Option<String> {
        self.last_checkpoint.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::Count;
    use daq_core::{soft_signal_r, BackendKind, DocumentKind, ValueType};
    use parking_lot::Mutex as SyncMutex;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_engine_state_transitions() {
        let engine = RunEngine::new();

        assert_eq!(engine.state().await, EngineState::Idle);

        // Can't pause when idle
        assert!(engine.pause().await.is_err());

        // Can't resume when idle
        assert!(engine.resume().await.is_err());

        // Can't abort when idle
        assert!(engine.abort("nothing running").await.is_err());

        // Nothing to start
        assert!(engine.start().await.is_err());
    }

    #[tokio::test]
    async fn test_queue_plan() {
        let engine = RunEngine::new();

        let plan = Box::new(Count::new(5));
        let _run_uid = engine.queue(plan).await;

        assert_eq!(engine.queue_len().await, 1);
        engine.clear_queue().await;
        assert_eq!(engine.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_document_subscription() {
        let engine = Arc::new(RunEngine::new());
        let mut rx = engine.subscribe();

        let run_uid = engine.queue(Box::new(Count::new(3))).await;
        let engine_for_task = engine.clone();
        tokio::spawn(async move {
            let _ = engine_for_task.start().await;
        });

        let doc = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        match doc {
            Ok(Ok(Document::Start(start))) => {
                assert_eq!(start.plan_type, "count");
                assert_eq!(start.uid, run_uid);
            }
            other => panic!("expected start document, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_callbacks_see_documents_in_order() {
        let det = soft_signal_r("det", ValueType::Float);
        det.connect(BackendKind::Sim).await.unwrap();

        let engine = RunEngine::new();
        let kinds = Arc::new(SyncMutex::new(Vec::new()));
        let sink = kinds.clone();
        engine.subscribe_callback(move |doc| sink.lock().push(doc.kind()));

        let summary = engine
            .run(Box::new(Count::new(2).with_detector(det)))
            .await
            .unwrap();

        assert_eq!(summary.exit_status, ExitStatus::Success);
        assert_eq!(summary.num_events.get("primary"), Some(&2));
        assert_eq!(
            *kinds.lock(),
            vec![
                DocumentKind::Start,
                DocumentKind::Descriptor,
                DocumentKind::Event,
                DocumentKind::Event,
                DocumentKind::Stop,
            ]
        );
        assert_eq!(engine.state().await, EngineState::Idle);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_read_emits_fail_stop() {
        // Never connected, so the read fails.
        let det = soft_signal_r("det", ValueType::Float);
        let engine = RunEngine::new();
        let mut rx = engine.subscribe();

        let summary = engine
            .run(Box::new(Count::new(2).with_detector(det)))
            .await
            .unwrap();
        assert_eq!(summary.exit_status, ExitStatus::Fail);
        assert!(summary.reason.contains("not connected"));

        let mut last = None;
        while let Ok(doc) = rx.try_recv() {
            last = Some(doc);
        }
        match last {
            Some(Document::Stop(stop)) => {
                assert_eq!(stop.exit_status, ExitStatus::Fail);
                assert_eq!(stop.total_events(), 0);
            }
            other => panic!("expected stop document, got {:?}", other),
        }
        assert!(logs_contain("Plan execution failed"));
    }

    #[tokio::test]
    async fn test_unsubscribe_callback() {
        let engine = RunEngine::new();
        let count = Arc::new(SyncMutex::new(0));
        let sink = count.clone();
        let id = engine.subscribe_callback(move |_| *sink.lock() += 1);
        assert!(engine.unsubscribe_callback(id));
        assert!(!engine.unsubscribe_callback(id));

        engine.run(Box::new(Count::new(1))).await.unwrap();
        assert_eq!(*count.lock(), 0);
    }
}
