use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use sekia_broker::Handler;
use sekia_protocol::matches;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{Bus, SubHandle};
use crate::error::Result;

const RECONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Serialize, Deserialize)]
struct LoopbackFrame {
    subject: String,
    payload: serde_json::Value,
}

struct Subscription {
    id: u64,
    pattern: String,
    handler: Handler,
}

struct Inner {
    subs: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

/// A bus connection for agents running outside the core process, dialing a
/// `sekia-broker` loopback listener over TCP.
///
/// Reconnects forever on disconnect with a fixed 2-second backoff, logging
/// every connect/disconnect state change.
#[derive(Clone)]
pub struct LoopbackClient {
    inner: Arc<Inner>,
}

impl LoopbackClient {
    /// Dials `addr` and spawns the background connection-management task.
    /// Returns immediately; the first connection attempt happens in the
    /// background, matching "infinite reconnect" semantics even for the
    /// initial dial.
    #[must_use]
    pub fn spawn(addr: String, token: CancellationToken) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            subs: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            outbound: outbound_tx,
        });

        let client = Self { inner };
        let dispatch_client = client.clone();
        tokio::spawn(run_connection_loop(addr, dispatch_client, outbound_rx, token));
        client
    }

    fn dispatch(&self, subject: &str, bytes: &[u8]) {
        let subs = self.inner.subs.read();
        for sub in subs.iter() {
            if matches(&sub.pattern, subject) {
                (sub.handler)(subject, bytes);
            }
        }
    }
}

impl Bus for LoopbackClient {
    fn publish(&self, subject: &str, bytes: &[u8]) {
        let _ = self.inner.outbound.send((subject.to_owned(), bytes.to_vec()));
    }

    fn subscribe(&self, pattern: &str, handler: Handler) -> Result<SubHandle> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subs.write().push(Subscription {
            id,
            pattern: pattern.to_owned(),
            handler,
        });
        Ok(SubHandle::Loopback(id))
    }

    fn unsubscribe(&self, handle: SubHandle) {
        if let SubHandle::Loopback(id) = handle {
            self.inner.subs.write().retain(|s| s.id != id);
        }
    }
}

async fn run_connection_loop(
    addr: String,
    client: LoopbackClient,
    mut outbound_rx: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            return;
        }

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(%addr, "loopback connection established");
                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();

                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        outgoing = outbound_rx.recv() => {
                            let Some((subject, payload)) = outgoing else { return };
                            let frame = LoopbackFrame {
                                subject,
                                payload: serde_json::from_slice(&payload).unwrap_or(serde_json::Value::Null),
                            };
                            let Ok(mut line) = serde_json::to_vec(&frame) else { continue };
                            line.push(b'\n');
                            if write_half.write_all(&line).await.is_err() {
                                break;
                            }
                        }
                        line = lines.next_line() => {
                            match line {
                                Ok(Some(line)) => {
                                    if let Ok(frame) = serde_json::from_str::<LoopbackFrame>(&line)
                                        && let Ok(bytes) = serde_json::to_vec(&frame.payload)
                                    {
                                        client.dispatch(&frame.subject, &bytes);
                                    }
                                }
                                _ => break,
                            }
                        }
                    }
                }

                warn!(%addr, "loopback connection dropped, reconnecting");
            }
            Err(e) => {
                warn!(%addr, error = ?e, "loopback connect failed, retrying");
            }
        }

        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}
