use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use metrics::{counter, describe_counter};
use parking_lot::RwLock;
use sekia_protocol::{is_valid_pattern, matches};
use tracing::warn;

use crate::error::{BrokerError, Result};
use crate::journal::Journal;

/// A subscriber callback. Invoked synchronously on the publisher's thread;
/// per spec.md §4.1, handlers MUST NOT block.
pub type Handler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// An opaque handle returned by `subscribe`, used to `unsubscribe` later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

struct Subscription {
    id: u64,
    pattern: String,
    handler: Handler,
}

struct Inner {
    subs: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    journal: Option<Journal>,
    loopback_addr: RwLock<Option<String>>,
}

/// Embedded, in-process publish/subscribe broker with wildcard subject
/// routing (spec.md §4.1).
///
/// Delivery is at-most-once and best-effort: a publish fans out synchronously
/// to every matching subscriber on the calling thread, with FIFO order
/// preserved per (publisher, subject) pair because dispatch for one publish
/// call completes before the next begins.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    /// Creates a broker with no durable journal.
    #[must_use]
    pub fn new() -> Self {
        describe_counter!("sekia_broker_published_total", "Envelopes published on the bus");
        describe_counter!("sekia_broker_delivered_total", "Envelope deliveries to matching subscribers");

        Self {
            inner: Arc::new(Inner {
                subs: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                journal: None,
                loopback_addr: RwLock::new(None),
            }),
        }
    }

    /// Creates a broker that also appends every published envelope to a
    /// durable journal directory (spec.md §6.3), for future replay use.
    pub fn with_journal(journal_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        describe_counter!("sekia_broker_published_total", "Envelopes published on the bus");
        describe_counter!("sekia_broker_delivered_total", "Envelope deliveries to matching subscribers");

        let journal = Journal::open(journal_dir.into())?;
        Ok(Self {
            inner: Arc::new(Inner {
                subs: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                journal: Some(journal),
                loopback_addr: RwLock::new(None),
            }),
        })
    }

    /// Publishes `bytes` on `subject`. Fire-and-forget: no ordering guarantee
    /// across subjects, silently dropped if the broker has shut down.
    pub fn publish(&self, subject: &str, bytes: &[u8]) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        counter!("sekia_broker_published_total").increment(1);

        if let Some(journal) = &self.inner.journal
            && let Err(e) = journal.append(subject, bytes)
        {
            warn!(error = ?e, subject, "failed to append to broker journal");
        }

        let subs = self.inner.subs.read();
        for sub in subs.iter() {
            if matches(&sub.pattern, subject) {
                counter!("sekia_broker_delivered_total").increment(1);
                (sub.handler)(subject, bytes);
            }
        }
    }

    /// Registers `handler` for every subject matching `pattern`.
    ///
    /// Fails with `BrokerError::Closed` if the broker has stopped, or
    /// `BrokerError::InvalidPattern` if `pattern` places `>` anywhere but the
    /// final token.
    pub fn subscribe(&self, pattern: impl Into<String>, handler: Handler) -> Result<SubscriptionHandle> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let pattern = pattern.into();
        if !is_valid_pattern(&pattern) {
            return Err(sekia_protocol::ProtocolError::InvalidPattern(pattern).into());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subs.write().push(Subscription { id, pattern, handler });
        Ok(SubscriptionHandle(id))
    }

    /// Stops delivery to the subscription. May be called concurrently with
    /// `publish`; any in-flight callback still completes.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.subs.write().retain(|s| s.id != handle.0);
    }

    /// Number of live subscriptions, for diagnostics.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subs.read().len()
    }

    /// A handle local components use to connect without going through the
    /// loopback transport.
    #[must_use]
    pub fn in_process_handle(&self) -> Broker {
        self.clone()
    }

    /// The address external agents should dial, if a loopback listener has
    /// been started; otherwise an in-process pseudo-URL.
    #[must_use]
    pub fn client_url(&self) -> String {
        self.inner
            .loopback_addr
            .read()
            .clone()
            .unwrap_or_else(|| "inproc://sekia".to_owned())
    }

    pub(crate) fn set_loopback_addr(&self, addr: String) {
        *self.inner.loopback_addr.write() = Some(addr);
    }

    /// Stops accepting new subscriptions and publishes. Existing
    /// subscriptions are dropped; in-flight callbacks are allowed to finish
    /// since `publish` holds only a read lock while dispatching.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subs.write().clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn delivers_to_matching_subscribers_only() {
        let broker = Broker::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let r = received.clone();
        broker
            .subscribe("sekia.events.github", Arc::new(move |subject, bytes| {
                r.lock().unwrap().push((subject.to_owned(), bytes.to_vec()));
            }))
            .unwrap();

        broker.publish("sekia.events.github", b"issue-opened");
        broker.publish("sekia.events.slack", b"message-posted");

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "sekia.events.github");
    }

    #[test]
    fn wildcard_subscription_matches_all_sources() {
        let broker = Broker::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        broker
            .subscribe("sekia.events.>", Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();

        broker.publish("sekia.events.github", b"a");
        broker.publish("sekia.events.slack", b"b");
        broker.publish("sekia.commands.github-agent", b"c");

        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let broker = Broker::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let handle = broker
            .subscribe("sekia.events.github", Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();

        broker.publish("sekia.events.github", b"a");
        broker.unsubscribe(handle);
        broker.publish("sekia.events.github", b"b");

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn publish_after_shutdown_is_silently_dropped() {
        let broker = Broker::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        broker
            .subscribe(">", Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();

        broker.shutdown();
        broker.publish("sekia.events.github", b"a");
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn subscribe_after_shutdown_fails_closed() {
        let broker = Broker::new();
        broker.shutdown();
        let err = broker.subscribe(">", Arc::new(|_, _| {})).unwrap_err();
        assert!(matches!(err, BrokerError::Closed));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let broker = Broker::new();
        let err = broker.subscribe("a.>.b", Arc::new(|_, _| {})).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidPattern(_)));
    }
}
