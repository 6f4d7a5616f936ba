//! Live agent roster fused from `Registration` and `Heartbeat` signals
//! (spec.md §4.4).

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use sekia_broker::{Broker, SubscriptionHandle};
use sekia_protocol::{Heartbeat, Registration, subjects};
use serde::Serialize;
use tracing::warn;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs() as i64
}

/// The registry's fused view of one agent: registration fields plus the
/// latest heartbeat counters, never evicted by the core.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AgentState {
    pub name: String,
    pub version: String,
    pub capabilities: std::collections::HashSet<String>,
    pub commands: std::collections::HashSet<String>,
    pub status: String,
    pub last_event: String,
    pub events_processed: u64,
    pub errors: u64,
    pub registered_at: i64,
    pub last_seen: i64,
}

impl AgentState {
    fn placeholder(name: &str, now: i64) -> Self {
        Self {
            name: name.to_owned(),
            version: String::new(),
            capabilities: Default::default(),
            commands: Default::default(),
            status: String::new(),
            last_event: String::new(),
            events_processed: 0,
            errors: 0,
            registered_at: now,
            last_seen: now,
        }
    }

    fn apply_registration(&mut self, reg: &Registration, now: i64) {
        self.version = reg.version.clone();
        self.capabilities = reg.capabilities.clone();
        self.commands = reg.commands.clone();
        self.last_seen = now;
    }

    fn apply_heartbeat(&mut self, hb: &Heartbeat, now: i64) {
        self.status = hb.status.clone();
        self.last_event = hb.last_event.clone();
        self.events_processed = hb.events_processed;
        self.errors = hb.errors;
        self.last_seen = now;
    }
}

struct Inner {
    agents: Mutex<HashMap<String, AgentState>>,
}

/// Subscribes to `sekia.registry` and `sekia.heartbeat.*` and fuses both
/// streams into a live roster, keyed by agent name.
///
/// Entries are created on whichever signal arrives first and are never
/// deleted by the registry itself; staleness is a consumer's job.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

/// Subscription handles kept alive for as long as the registry should listen.
pub struct RegistrySubscriptions {
    registration: SubscriptionHandle,
    heartbeat: SubscriptionHandle,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                agents: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribes the registry to the broker. Returns handles the caller
    /// should keep and pass to `unsubscribe` on teardown.
    pub fn attach(&self, broker: &Broker) -> sekia_broker::Result<RegistrySubscriptions> {
        let registration_registry = self.clone();
        let registration = broker.subscribe(
            subjects::registry(),
            Arc::new(move |_subject, bytes| match Registration::decode(bytes) {
                Ok(reg) => registration_registry.on_registration(&reg),
                Err(e) => warn!(error = ?e, "dropping malformed registration"),
            }),
        )?;

        let heartbeat_registry = self.clone();
        let heartbeat = broker.subscribe(
            subjects::heartbeat_wildcard(),
            Arc::new(move |_subject, bytes| match Heartbeat::decode(bytes) {
                Ok(hb) => heartbeat_registry.on_heartbeat(&hb),
                Err(e) => warn!(error = ?e, "dropping malformed heartbeat"),
            }),
        )?;

        Ok(RegistrySubscriptions { registration, heartbeat })
    }

    /// Unsubscribes the registry from the broker, e.g. on shutdown.
    pub fn detach(&self, broker: &Broker, subs: RegistrySubscriptions) {
        broker.unsubscribe(subs.registration);
        broker.unsubscribe(subs.heartbeat);
    }

    fn on_registration(&self, reg: &Registration) {
        let now = now_unix();
        let mut agents = self.inner.agents.lock();
        agents
            .entry(reg.name.clone())
            .and_modify(|state| state.apply_registration(reg, now))
            .or_insert_with(|| {
                let mut state = AgentState::placeholder(&reg.name, now);
                state.apply_registration(reg, now);
                state
            });
    }

    fn on_heartbeat(&self, hb: &Heartbeat) {
        let now = now_unix();
        let mut agents = self.inner.agents.lock();
        agents
            .entry(hb.name.clone())
            .and_modify(|state| state.apply_heartbeat(hb, now))
            .or_insert_with(|| {
                let mut state = AgentState::placeholder(&hb.name, now);
                state.apply_heartbeat(hb, now);
                state
            });
    }

    /// Snapshot of every known agent, for API consumption.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentState> {
        self.inner.agents.lock().values().cloned().collect()
    }

    /// Number of known agents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.agents.lock().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn registration(name: &str) -> Registration {
        Registration {
            name: name.to_owned(),
            version: "1.0.0".to_owned(),
            capabilities: HashSet::from(["triage".to_owned()]),
            commands: HashSet::from(["add_label".to_owned()]),
        }
    }

    fn heartbeat(name: &str) -> Heartbeat {
        Heartbeat {
            name: name.to_owned(),
            status: "ok".to_owned(),
            last_event: "2026-01-01T00:00:00Z".to_owned(),
            events_processed: 3,
            errors: 0,
        }
    }

    #[test]
    fn registration_then_heartbeat_fuses_into_one_entry() {
        let registry = Registry::new();
        registry.on_registration(&registration("github-agent"));
        registry.on_heartbeat(&heartbeat("github-agent"));

        assert_eq!(registry.count(), 1);
        let agent = &registry.agents()[0];
        assert_eq!(agent.version, "1.0.0");
        assert_eq!(agent.events_processed, 3);
    }

    #[test]
    fn heartbeat_before_registration_creates_placeholder_then_merges() {
        let registry = Registry::new();
        registry.on_heartbeat(&heartbeat("slack-agent"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.agents()[0].version, "");

        registry.on_registration(&registration("slack-agent"));
        assert_eq!(registry.count(), 1);
        let agent = &registry.agents()[0];
        assert_eq!(agent.version, "1.0.0");
        assert_eq!(agent.events_processed, 3);
    }

    #[test]
    fn second_registration_overwrites_fields_but_keeps_heartbeat_data() {
        let registry = Registry::new();
        registry.on_registration(&registration("github-agent"));
        registry.on_heartbeat(&heartbeat("github-agent"));

        let mut updated = registration("github-agent");
        updated.version = "2.0.0".to_owned();
        registry.on_registration(&updated);

        let agent = &registry.agents()[0];
        assert_eq!(agent.version, "2.0.0");
        assert_eq!(agent.events_processed, 3, "heartbeat data must survive a re-registration");
    }

    #[test]
    fn unknown_agents_are_never_evicted() {
        let registry = Registry::new();
        registry.on_registration(&registration("a"));
        registry.on_registration(&registration("b"));
        assert_eq!(registry.count(), 2);
    }
}
