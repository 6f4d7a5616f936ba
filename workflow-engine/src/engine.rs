use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use sekia_broker::{Broker, SubscriptionHandle};
use sekia_protocol::{decode_source, subjects};
use tracing::warn;

use crate::error::{Result, WorkflowError};
use crate::llm::LlmClient;
use crate::manifest::Manifest;
use crate::workflow::{WorkflowSnapshot, WorkflowState, load_workflow};

const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// One filesystem change an external watcher has observed, to be replayed
/// into the engine via `handle_file_events`. The watcher itself, including
/// debouncing, is out of scope for the core.
#[derive(Clone, Debug)]
pub enum FileChange {
    Written(PathBuf),
    Removed(PathBuf),
}

struct Inner {
    broker: Broker,
    dir: RwLock<PathBuf>,
    verify_integrity: RwLock<bool>,
    handler_timeout: RwLock<Duration>,
    secret: RwLock<Vec<u8>>,
    llm_client: RwLock<Option<Arc<dyn LlmClient>>>,
    workflows: RwLock<HashMap<String, WorkflowState>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

/// Routes `sekia.events.>` to per-workflow isolated interpreters and
/// workers. The densest subsystem in the core.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(broker: Broker, dir: PathBuf, secret: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                dir: RwLock::new(dir),
                verify_integrity: RwLock::new(true),
                handler_timeout: RwLock::new(DEFAULT_HANDLER_TIMEOUT),
                secret: RwLock::new(secret),
                llm_client: RwLock::new(None),
                workflows: RwLock::new(HashMap::new()),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn set_handler_timeout(&self, timeout: Duration) {
        *self.inner.handler_timeout.write() = timeout;
    }

    pub fn set_llm_client(&self, client: Arc<dyn LlmClient>) {
        *self.inner.llm_client.write() = Some(client);
    }

    pub fn set_verify_integrity(&self, enabled: bool) {
        *self.inner.verify_integrity.write() = enabled;
    }

    /// Subscribes to `sekia.events.>` and starts routing to loaded
    /// workflows. Call once, before or after an initial `reload_all`.
    pub fn attach(&self) -> Result<()> {
        let routing_inner = self.inner.clone();
        let handle = self.inner.broker.subscribe(
            subjects::events_wildcard(),
            Arc::new(move |subject, bytes| route_event(&routing_inner, subject, bytes)),
        )?;
        *self.inner.subscription.lock() = Some(handle);
        Ok(())
    }

    /// Unsubscribes the root event subscription. Must happen before tearing
    /// down individual workflows.
    pub fn detach(&self) {
        if let Some(handle) = self.inner.subscription.lock().take() {
            self.inner.broker.unsubscribe(handle);
        }
    }

    /// Stops every loaded workflow: closes each worker's queue and joins its
    /// thread. Per spec.md §5 "Shutdown", call this after `detach()` so no
    /// new event can be routed to a workflow while its worker drains.
    pub fn shutdown(&self) {
        let states: Vec<WorkflowState> = self.inner.workflows.write().drain().map(|(_, state)| state).collect();
        for state in states {
            state.stop();
        }
    }

    /// Loads (or replaces) a single workflow. Stops the previous version, if
    /// any, outside the map lock.
    pub fn load_one(&self, name: &str, path: &Path) -> Result<()> {
        let manifest = self.current_manifest()?;
        let state = load_workflow(
            name,
            path,
            &self.inner.broker,
            self.inner.secret.read().clone(),
            &manifest,
            *self.inner.verify_integrity.read(),
            *self.inner.handler_timeout.read(),
            self.inner.llm_client.read().clone(),
        )?;

        let previous = self.inner.workflows.write().insert(name.to_owned(), state);
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    /// Unloads a workflow by name. No-op if unknown.
    pub fn unload_one(&self, name: &str) {
        if let Some(state) = self.inner.workflows.write().remove(name) {
            state.stop();
        }
    }

    /// Unloads every workflow and rescans the workflow directory, loading
    /// every `.lua`-suffixed file found.
    pub fn reload_all(&self) -> Result<()> {
        let names: Vec<String> = self.inner.workflows.read().keys().cloned().collect();
        for name in names {
            self.unload_one(&name);
        }

        let dir = self.inner.dir.read().clone();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lua") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Err(e) = self.load_one(stem, &path) {
                warn!(workflow = stem, error = ?e, "failed to load workflow during full reload");
            }
        }
        Ok(())
    }

    /// Applies a batch of file-change notifications from an external
    /// watcher. If the manifest itself changed, triggers a full reload;
    /// otherwise loads or unloads each affected script.
    ///
    /// A load failure for an existing workflow never unloads the prior
    /// version; integrity failures are the exception, since serving an
    /// unverifiable script is the greater risk.
    pub fn handle_file_events(&self, batch: &[FileChange]) -> Result<()> {
        let manifest_name = "workflows.sha256";
        let manifest_touched = batch.iter().any(|c| match c {
            FileChange::Written(p) | FileChange::Removed(p) => p.file_name().and_then(|f| f.to_str()) == Some(manifest_name),
        });
        if manifest_touched {
            return self.reload_all();
        }

        for change in batch {
            match change {
                FileChange::Written(path) => {
                    if path.extension().and_then(|e| e.to_str()) != Some("lua") {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                        continue;
                    };
                    match self.load_one(&stem, path) {
                        Ok(()) => {}
                        Err(WorkflowError::IntegrityViolation { name }) => {
                            self.unload_one(&name);
                            warn!(workflow = %name, "unloaded workflow after integrity violation");
                        }
                        Err(e) => {
                            warn!(workflow = stem, error = ?e, "keeping previous workflow version after load failure");
                        }
                    }
                }
                FileChange::Removed(path) => {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        self.unload_one(stem);
                    }
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn workflows(&self) -> Vec<WorkflowSnapshot> {
        self.inner.workflows.read().values().map(WorkflowState::snapshot).collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.workflows.read().len()
    }

    fn current_manifest(&self) -> Result<Manifest> {
        let path = self.inner.dir.read().join("workflows.sha256");
        Ok(Manifest::load(&path)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sekia_protocol::{Command, Event, Payload, subjects};

    use super::*;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("sekia-workflow-test-{tag}-{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn write(&self, filename: &str, contents: &str) -> PathBuf {
            let path = self.0.join(filename);
            std::fs::write(&path, contents).unwrap();
            path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.0).ok();
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn auto_label_workflow_emits_signed_command() {
        let dir = TempDir::new("auto-label");
        dir.write(
            "auto-label.lua",
            r#"
            on("sekia.events.github", |event| {
                let p = event.payload;
                command("github-agent", "add_label", #{
                    owner: p.owner,
                    repo: p.repo,
                    number: p.number,
                    label: "triage"
                });
            });
            "#,
        );

        let broker = Broker::new();
        let engine = WorkflowEngine::new(broker.clone(), dir.0.clone(), b"s3cr3t".to_vec());
        engine.set_verify_integrity(false);
        engine.attach().unwrap();
        engine.reload_all().unwrap();
        assert_eq!(engine.count(), 1);

        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let r = received.clone();
        broker
            .subscribe(subjects::command("github-agent"), Arc::new(move |_, bytes| {
                r.lock().push(Command::decode(bytes).unwrap());
            }))
            .unwrap();

        let mut payload = Payload::new();
        payload.insert("owner".into(), "myorg".into());
        payload.insert("repo".into(), "myrepo".into());
        payload.insert("number".into(), 42.into());
        payload.insert("title".into(), "Bug: crash on startup".into());
        let event = Event::new("evt-1".to_owned(), "github.issue.opened", "github", 0, payload);
        broker.publish(&subjects::event("github"), &event.encode().unwrap());

        assert!(wait_until(|| received.lock().len() == 1, Duration::from_secs(2)));
        let cmd = received.lock()[0].clone();
        assert_eq!(cmd.command, "add_label");
        assert_eq!(cmd.source, "workflow:auto-label");
        assert!(cmd.verify(b"s3cr3t"));
    }

    #[test]
    fn self_published_event_is_not_redelivered_to_its_own_workflow() {
        let dir = TempDir::new("looper");
        dir.write(
            "looper.lua",
            r#"
            on("sekia.events.loop", |event| {
                publish("sekia.events.loop", "loop.tick", #{});
            });
            "#,
        );

        let broker = Broker::new();
        let engine = WorkflowEngine::new(broker.clone(), dir.0.clone(), vec![]);
        engine.set_verify_integrity(false);
        engine.attach().unwrap();
        engine.reload_all().unwrap();

        let event = Event::new("evt-1".to_owned(), "loop.tick", "external", 0, Payload::new());
        broker.publish(&subjects::event("loop"), &event.encode().unwrap());

        assert!(wait_until(|| engine.workflows()[0].events_processed >= 1, Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(engine.workflows()[0].events_processed, 1, "a republish by `looper` must not be delivered back to itself");
    }

    #[test]
    fn shutdown_stops_every_worker_and_empties_the_map() {
        let dir = TempDir::new("shutdown");
        dir.write("a.lua", "on(\"sekia.events.x\", |e| {});");
        dir.write("b.lua", "on(\"sekia.events.x\", |e| {});");

        let broker = Broker::new();
        let engine = WorkflowEngine::new(broker, dir.0.clone(), vec![]);
        engine.set_verify_integrity(false);
        engine.reload_all().unwrap();
        assert_eq!(engine.count(), 2);

        engine.shutdown();
        assert_eq!(engine.count(), 0, "shutdown must drain the workflow map");
    }

    #[test]
    fn integrity_violation_blocks_load_and_unloads_prior_version() {
        let dir = TempDir::new("integrity");
        let path = dir.write("broken.lua", "on(\"sekia.events.x\", |e| {});");
        dir.write("workflows.sha256", "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff  broken.lua\n");

        let broker = Broker::new();
        let engine = WorkflowEngine::new(broker, dir.0.clone(), vec![]);
        engine.set_verify_integrity(true);

        let err = engine.load_one("broken", &path).unwrap_err();
        assert!(matches!(err, WorkflowError::IntegrityViolation { .. }));
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn handler_timeout_cancels_an_infinite_loop() {
        let dir = TempDir::new("timeout");
        dir.write(
            "spinner.lua",
            r#"
            on("sekia.events.x", |event| {
                loop {}
            });
            "#,
        );

        let broker = Broker::new();
        let engine = WorkflowEngine::new(broker.clone(), dir.0.clone(), vec![]);
        engine.set_verify_integrity(false);
        engine.set_handler_timeout(Duration::from_millis(200));
        engine.attach().unwrap();
        engine.reload_all().unwrap();

        let event = Event::new("evt-1".to_owned(), "x.tick", "external", 0, Payload::new());
        broker.publish(&subjects::event("x"), &event.encode().unwrap());

        assert!(wait_until(|| engine.workflows()[0].errors >= 1, Duration::from_secs(2)));

        broker.publish(&subjects::event("x"), &event.encode().unwrap());
        assert!(wait_until(|| engine.workflows()[0].events_processed >= 2, Duration::from_secs(2)), "worker must keep processing after a cancelled handler");
    }

    #[test]
    fn burst_beyond_queue_capacity_drops_newest_and_counts_errors() {
        let dir = TempDir::new("burst");
        dir.write(
            "slow.lua",
            r#"
            on("sekia.events.burst", |event| {
                let x = 0;
                for i in range(0, 300_000) {
                    x += 1;
                }
            });
            "#,
        );

        let broker = Broker::new();
        let engine = WorkflowEngine::new(broker.clone(), dir.0.clone(), vec![]);
        engine.set_verify_integrity(false);
        engine.attach().unwrap();
        engine.reload_all().unwrap();
        assert_eq!(engine.count(), 1);

        const TOTAL: u64 = 1024;
        for i in 0..TOTAL {
            let event = Event::new(format!("evt-{i}"), "burst.tick", "external", 0, Payload::new());
            broker.publish(&subjects::event("burst"), &event.encode().unwrap());
        }

        assert!(wait_until(
            || {
                let snap = &engine.workflows()[0];
                snap.events_processed + snap.errors >= TOTAL
            },
            Duration::from_secs(10),
        ));

        let snap = &engine.workflows()[0];
        assert_eq!(snap.events_processed + snap.errors, TOTAL);
        assert!(snap.errors >= TOTAL - crate::workflow::MIN_QUEUE_CAPACITY as u64, "expected at least {} drops, got {}", TOTAL - crate::workflow::MIN_QUEUE_CAPACITY as u64, snap.errors);
    }
}

fn route_event(inner: &Inner, subject: &str, bytes: &[u8]) {
    let source = match decode_source(bytes) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = ?e, subject, "dropping malformed event at routing");
            return;
        }
    };

    let workflows = inner.workflows.read();
    for workflow in workflows.values() {
        if workflow.is_self_origin(&source) {
            continue;
        }
        if !workflow.matches_any(subject) {
            continue;
        }
        if !workflow.try_dispatch(subject, bytes) {
            workflow.bump_dispatch_error();
            warn!(subject, "workflow queue full, dropping event");
        }
    }
}
