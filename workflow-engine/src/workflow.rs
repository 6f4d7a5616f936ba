use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use rhai::{Dynamic, Engine, Scope, AST};
use sekia_broker::Broker;
use sekia_protocol::{Event, matches};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{Result, WorkflowError};
use crate::llm::LlmClient;
use crate::manifest::{Manifest, hash_file};
use crate::module::ModuleContext;
use crate::value::json_to_dynamic;

/// Minimum event queue capacity each workflow worker is given.
pub const MIN_QUEUE_CAPACITY: usize = 256;

type QueueItem = (String, Vec<u8>);

/// Control-plane-facing snapshot of one loaded workflow.
#[derive(Clone, Debug, Serialize)]
pub struct WorkflowSnapshot {
    pub name: String,
    pub path: PathBuf,
    pub handlers: usize,
    pub patterns: Vec<String>,
    pub loaded_at: i64,
    pub events_processed: u64,
    pub errors: u64,
}

/// One loaded, running workflow: its own interpreter, event queue, and
/// dedicated worker thread.
pub struct WorkflowState {
    name: String,
    path: PathBuf,
    patterns: Vec<String>,
    loaded_at: i64,
    sender: mpsc::SyncSender<QueueItem>,
    worker: Option<thread::JoinHandle<()>>,
    cancel_current_handler: Arc<AtomicBool>,
    events_processed: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
}

impl WorkflowState {
    /// True if `pattern` in this workflow's handler list matches `subject`.
    #[must_use]
    pub fn matches_any(&self, subject: &str) -> bool {
        self.patterns.iter().any(|p| matches(p, subject))
    }

    /// Non-blocking push onto the workflow's queue. Returns `false` (and the
    /// caller should bump the error counter) if the queue was full.
    #[must_use]
    pub fn try_dispatch(&self, subject: &str, bytes: &[u8]) -> bool {
        self.sender.try_send((subject.to_owned(), bytes.to_vec())).is_ok()
    }

    /// Self-event guard: true if this event originated from this workflow's
    /// own `publish`/`command` calls.
    #[must_use]
    pub fn is_self_origin(&self, source: &str) -> bool {
        source == format!("workflow:{}", self.name)
    }

    pub fn bump_dispatch_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            name: self.name.clone(),
            path: self.path.clone(),
            handlers: self.patterns.len(),
            patterns: self.patterns.clone(),
            loaded_at: self.loaded_at,
            events_processed: self.events_processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue and joins the worker thread. Must be called outside
    /// any lock guarding the workflow map.
    pub fn stop(mut self) {
        drop(self.sender);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Loads a workflow from `path`, verifying its integrity against `manifest`
/// first when `verify_integrity` is set.
#[allow(clippy::too_many_arguments)]
pub fn load_workflow(
    name: &str,
    path: &Path,
    broker: &Broker,
    secret: Vec<u8>,
    manifest: &Manifest,
    verify_integrity: bool,
    handler_timeout: Duration,
    llm_client: Option<Arc<dyn LlmClient>>,
) -> Result<WorkflowState> {
    if verify_integrity {
        let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();
        let expected = manifest
            .expected_hash(filename)
            .ok_or_else(|| WorkflowError::IntegrityViolation { name: name.to_owned() })?;
        let actual = hash_file(path)?;
        if actual != expected {
            return Err(WorkflowError::IntegrityViolation { name: name.to_owned() });
        }
    }

    let source = std::fs::read_to_string(path)?;

    let ctx = ModuleContext::new(name.to_owned(), broker.clone(), secret);
    if let Some(client) = llm_client {
        *ctx.llm_client.write() = Some(client);
    }

    let mut engine = Engine::new();
    crate::module::register(&mut engine, ctx.clone());

    let ast = engine.compile(&source).map_err(|e| WorkflowError::LoadError {
        name: name.to_owned(),
        message: e.to_string(),
    })?;

    let mut scope = Scope::new();
    scope.push_constant("name", name.to_owned());

    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|e| WorkflowError::LoadError { name: name.to_owned(), message: e.to_string() })?;

    let patterns: Vec<String> = ctx.handlers.lock().iter().map(|(p, _)| p.clone()).collect();

    let (sender, receiver) = mpsc::sync_channel::<QueueItem>(MIN_QUEUE_CAPACITY);
    let events_processed = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));
    let cancel_current_handler = Arc::new(AtomicBool::new(false));

    let worker_cancel = cancel_current_handler.clone();
    engine.on_progress(move |_ops| {
        if worker_cancel.load(Ordering::Relaxed) {
            Some(Dynamic::from("handler timed out"))
        } else {
            None
        }
    });

    let worker_name = name.to_owned();
    let worker_events_processed = events_processed.clone();
    let worker_errors = errors.clone();
    let worker_cancel_flag = cancel_current_handler.clone();
    let worker = thread::spawn(move || {
        run_worker(
            engine,
            ast,
            ctx,
            receiver,
            handler_timeout,
            worker_cancel_flag,
            &worker_name,
            &worker_events_processed,
            &worker_errors,
        );
    });

    Ok(WorkflowState {
        name: name.to_owned(),
        path: path.to_owned(),
        patterns,
        loaded_at: chrono::Utc::now().timestamp(),
        sender,
        worker: Some(worker),
        cancel_current_handler,
        events_processed,
        errors,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    engine: Engine,
    ast: AST,
    ctx: Arc<ModuleContext>,
    receiver: mpsc::Receiver<QueueItem>,
    handler_timeout: Duration,
    cancel_flag: Arc<AtomicBool>,
    workflow_name: &str,
    events_processed: &AtomicU64,
    errors: &AtomicU64,
) {
    while let Ok((subject, bytes)) = receiver.recv() {
        let event = match Event::decode(&bytes) {
            Ok(e) => e,
            Err(e) => {
                errors.fetch_add(1, Ordering::Relaxed);
                warn!(workflow = workflow_name, error = ?e, "dropping malformed event");
                continue;
            }
        };

        let event_table = json_to_dynamic(&serde_json::to_value(&event).unwrap_or_default());
        let handlers = ctx.handlers.lock().clone();

        for (pattern, handler) in &handlers {
            if !matches(pattern, &subject) {
                continue;
            }

            cancel_flag.store(false, Ordering::Relaxed);
            let timeout_flag = cancel_flag.clone();
            let (done_tx, done_rx) = mpsc::channel::<()>();
            let timer = thread::spawn(move || {
                if done_rx.recv_timeout(handler_timeout).is_err() {
                    timeout_flag.store(true, Ordering::Relaxed);
                }
            });

            let result = handler.call::<Dynamic>(&engine, &ast, (event_table.clone(),));
            cancel_flag.store(true, Ordering::Relaxed);
            let _ = done_tx.send(());
            let _ = timer.join();

            if let Err(e) = result {
                errors.fetch_add(1, Ordering::Relaxed);
                error!(workflow = workflow_name, error = ?e, "workflow handler failed");
            }
        }

        events_processed.fetch_add(1, Ordering::Relaxed);
    }
}
