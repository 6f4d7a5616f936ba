use std::{sync::Arc, time::Instant};

use sekia_broker::Broker;
use sekia_registry::Registry;
use sekia_workflow::WorkflowEngine;

struct Inner {
    broker: Broker,
    registry: Registry,
    engine: Option<WorkflowEngine>,
    started_at: Instant,
}

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    #[must_use]
    pub fn new(broker: Broker, registry: Registry, engine: Option<WorkflowEngine>) -> Self {
        Self { inner: Arc::new(Inner { broker, registry, engine, started_at: Instant::now() }) }
    }

    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    #[must_use]
    pub fn engine(&self) -> Option<&WorkflowEngine> {
        self.inner.engine.as_ref()
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
