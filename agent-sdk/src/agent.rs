use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use sekia_protocol::{Command, Heartbeat, Registration, subjects};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{Bus, SubHandle};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A callback invoked when a `Command` addressed to this agent arrives and
/// passes signature verification.
pub type CommandHandler = Arc<dyn Fn(Command) + Send + Sync>;

/// A callback invoked when a config-reload signal (broadcast or targeted)
/// arrives.
pub type ReloadHandler = Arc<dyn Fn() + Send + Sync>;

struct Counters {
    events_processed: AtomicU64,
    errors: AtomicU64,
    status: RwLock<String>,
    last_event: RwLock<String>,
}

struct Subscriptions {
    command: Option<SubHandle>,
    config_broadcast: Option<SubHandle>,
    config_targeted: Option<SubHandle>,
}

struct Inner {
    name: String,
    bus: Arc<dyn Bus>,
    secret: Vec<u8>,
    counters: Counters,
    command_handler: RwLock<Option<CommandHandler>>,
    reload_handler: RwLock<Option<ReloadHandler>>,
    subs: Mutex<Subscriptions>,
    heartbeat_token: CancellationToken,
}

/// Thin client used by any component that behaves as an agent on the bus:
/// registers, heartbeats every 30 seconds, subscribes to its own command
/// subject, and answers config-reload broadcasts.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    /// Registers on the bus, starts the heartbeat worker, and subscribes to
    /// this agent's command subject.
    ///
    /// `secret` is the HMAC secret used to verify incoming commands; an
    /// empty secret disables verification.
    pub fn connect(
        bus: Arc<dyn Bus>,
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: HashSet<String>,
        commands: HashSet<String>,
        secret: Vec<u8>,
    ) -> anyhow::Result<Self> {
        let name = name.into();

        let registration = Registration {
            name: name.clone(),
            version: version.into(),
            capabilities,
            commands,
        };
        bus.publish(&subjects::registry(), &registration.encode()?);

        let inner = Arc::new(Inner {
            name: name.clone(),
            bus,
            secret,
            counters: Counters {
                events_processed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                status: RwLock::new("ok".to_owned()),
                last_event: RwLock::new(chrono::Utc::now().to_rfc3339()),
            },
            command_handler: RwLock::new(None),
            reload_handler: RwLock::new(None),
            subs: Mutex::new(Subscriptions {
                command: None,
                config_broadcast: None,
                config_targeted: None,
            }),
            heartbeat_token: CancellationToken::new(),
        });

        let agent = Self { inner };
        agent.subscribe_command_subject()?;
        agent.spawn_heartbeat_worker();

        info!(agent = %name, "agent connected");
        Ok(agent)
    }

    fn subscribe_command_subject(&self) -> anyhow::Result<()> {
        let dispatch_inner = self.inner.clone();
        let handle = self.inner.bus.subscribe(
            &subjects::command(&self.inner.name),
            Arc::new(move |_subject, bytes| {
                let command = match Command::decode(bytes) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = ?e, "dropping malformed command");
                        dispatch_inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                };

                if !command.verify(&dispatch_inner.secret) {
                    warn!(command = %command.command, "rejecting command with invalid signature");
                    dispatch_inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                if let Some(handler) = dispatch_inner.command_handler.read().clone() {
                    handler(command);
                }
            }),
        )?;
        self.inner.subs.lock().command = Some(handle);
        Ok(())
    }

    fn spawn_heartbeat_worker(&self) {
        let inner = self.inner.clone();
        let token = self.inner.heartbeat_token.clone();
        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let heartbeat = Heartbeat {
                            name: inner.name.clone(),
                            status: inner.counters.status.read().clone(),
                            last_event: inner.counters.last_event.read().clone(),
                            events_processed: inner.counters.events_processed.load(Ordering::Relaxed),
                            errors: inner.counters.errors.load(Ordering::Relaxed),
                        };
                        match heartbeat.encode() {
                            Ok(bytes) => inner.bus.publish(&subjects::heartbeat(&inner.name), &bytes),
                            Err(e) => error!(error = ?e, "failed to encode heartbeat"),
                        }
                    }
                }
            }
        });
    }

    /// Registers the callback invoked for commands addressed to this agent.
    pub fn on_command(&self, handler: CommandHandler) {
        *self.inner.command_handler.write() = Some(handler);
    }

    /// Subscribes `handler` to both the broadcast and per-agent config-reload
    /// subjects.
    pub fn on_config_reload(&self, handler: ReloadHandler) -> anyhow::Result<()> {
        *self.inner.reload_handler.write() = Some(handler.clone());

        let broadcast_inner = self.inner.clone();
        let broadcast = self.inner.bus.subscribe(
            subjects::config_reload(),
            Arc::new(move |_, _| {
                if let Some(h) = broadcast_inner.reload_handler.read().clone() {
                    h();
                }
            }),
        )?;

        let targeted_inner = self.inner.clone();
        let targeted = self.inner.bus.subscribe(
            &subjects::config_reload_for(&self.inner.name),
            Arc::new(move |_, _| {
                if let Some(h) = targeted_inner.reload_handler.read().clone() {
                    h();
                }
            }),
        )?;

        let mut subs = self.inner.subs.lock();
        subs.config_broadcast = Some(broadcast);
        subs.config_targeted = Some(targeted);
        Ok(())
    }

    /// Bumps the processed-event counter and stamps `last_event`.
    pub fn record_event(&self) {
        self.inner.counters.events_processed.fetch_add(1, Ordering::Relaxed);
        *self.inner.counters.last_event.write() = chrono::Utc::now().to_rfc3339();
    }

    /// Bumps the error counter.
    pub fn record_error(&self) {
        self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Overwrites the free-form status string the next heartbeat will carry.
    pub fn set_status(&self, status: impl Into<String>) {
        *self.inner.counters.status.write() = status.into();
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Cancels the heartbeat worker and unsubscribes from every subject this
    /// agent listened on.
    pub fn close(&self) {
        self.inner.heartbeat_token.cancel();
        let mut subs = self.inner.subs.lock();
        for handle in [subs.command.take(), subs.config_broadcast.take(), subs.config_targeted.take()].into_iter().flatten() {
            self.inner.bus.unsubscribe(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use sekia_broker::Broker;
    use sekia_protocol::Payload;

    use super::*;

    #[tokio::test]
    async fn connect_publishes_registration_and_starts_heartbeats() {
        let broker = Broker::new();
        let registrations = Arc::new(StdMutex::new(Vec::new()));
        let r = registrations.clone();
        broker
            .subscribe(subjects::registry(), Arc::new(move |_, bytes| {
                r.lock().unwrap().push(Registration::decode(bytes).unwrap());
            }))
            .unwrap();

        let agent = Agent::connect(
            Arc::new(broker.clone()),
            "github-agent",
            "1.0.0",
            HashSet::from(["triage".to_owned()]),
            HashSet::from(["add_label".to_owned()]),
            vec![],
        )
        .unwrap();

        assert_eq!(registrations.lock().unwrap().len(), 1);
        agent.close();
    }

    #[tokio::test]
    async fn valid_command_reaches_handler_invalid_is_rejected() {
        let broker = Broker::new();
        let agent = Agent::connect(
            Arc::new(broker.clone()),
            "github-agent",
            "1.0.0",
            HashSet::new(),
            HashSet::from(["add_label".to_owned()]),
            b"s3cr3t".to_vec(),
        )
        .unwrap();

        let received = Arc::new(StdMutex::new(Vec::new()));
        let r = received.clone();
        agent.on_command(Arc::new(move |cmd| r.lock().unwrap().push(cmd)));

        let mut valid = Command::new("add_label", Payload::new(), "workflow:auto-label");
        valid.sign(b"s3cr3t").unwrap();
        broker.publish(&subjects::command("github-agent"), &valid.encode().unwrap());

        let invalid = Command::new("add_label", Payload::new(), "workflow:auto-label");
        broker.publish(&subjects::command("github-agent"), &invalid.encode().unwrap());

        assert_eq!(received.lock().unwrap().len(), 1);
        agent.close();
    }

    #[tokio::test]
    async fn record_event_bumps_counter_and_last_event() {
        let broker = Broker::new();
        let agent = Agent::connect(Arc::new(broker), "x", "1.0.0", HashSet::new(), HashSet::new(), vec![]).unwrap();

        agent.record_event();
        assert_eq!(agent.inner.counters.events_processed.load(Ordering::Relaxed), 1);
        assert!(!agent.inner.counters.last_event.read().is_empty());
        agent.close();
    }
}
