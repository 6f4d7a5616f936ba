use sekia_broker::{Broker, Handler};

use crate::error::Result;

/// Opaque subscription handle, abstracting over whichever transport backs
/// a `Bus`.
#[derive(Clone, Copy, Debug)]
pub enum SubHandle {
    InProcess(sekia_broker::SubscriptionHandle),
    Loopback(u64),
}

/// Whatever an agent publishes to and subscribes on. Implemented directly
/// by the in-process broker, and by `LoopbackClient` for agents that live
/// in a separate process, connecting over the optional TCP loopback.
pub trait Bus: Send + Sync {
    fn publish(&self, subject: &str, bytes: &[u8]);
    fn subscribe(&self, pattern: &str, handler: Handler) -> Result<SubHandle>;
    fn unsubscribe(&self, handle: SubHandle);
}

impl Bus for Broker {
    fn publish(&self, subject: &str, bytes: &[u8]) {
        Broker::publish(self, subject, bytes);
    }

    fn subscribe(&self, pattern: &str, handler: Handler) -> Result<SubHandle> {
        Ok(SubHandle::InProcess(Broker::subscribe(self, pattern, handler)?))
    }

    fn unsubscribe(&self, handle: SubHandle) {
        if let SubHandle::InProcess(handle) = handle {
            Broker::unsubscribe(self, handle);
        }
    }
}
