use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::Broker;

/// Wire shape exchanged over a loopback connection: the bus subject plus the
/// envelope bytes already published on it, re-parsed as JSON so the frame is
/// human-readable on the wire.
#[derive(Serialize, Deserialize)]
struct LoopbackFrame {
    subject: String,
    payload: serde_json::Value,
}

/// Newline-delimited-JSON `Event` frames, one per line, for external agents
/// that cannot link against `sekia-broker` directly (spec.md §4.1 "optional
/// loopback for external agents").
///
/// Every connection subscribes to `>` and receives every published event;
/// it may also write frames back, which are republished on the broker under
/// the event's own subject. Intended for localhost-only use.
pub struct LoopbackServer {
    broker: Broker,
    listener: TcpListener,
    local_addr: std::net::SocketAddr,
}

impl LoopbackServer {
    /// Binds `addr` (use `127.0.0.1:0` for an ephemeral port) and records the
    /// resulting address on `broker` so `Broker::client_url` reflects it.
    pub async fn bind(broker: Broker, addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        broker.set_loopback_addr(format!("tcp://{local_addr}"));
        Ok(Self {
            broker,
            listener,
            local_addr,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `token` is cancelled. Each connection is
    /// handled on its own spawned task.
    pub async fn serve(self, token: CancellationToken) {
        let (broadcast_tx, _) = broadcast::channel::<(String, Vec<u8>)>(1024);
        let broadcast_tx = Arc::new(broadcast_tx);

        let tx_for_bus = broadcast_tx.clone();
        let bus_handle = self
            .broker
            .subscribe(
                ">",
                Arc::new(move |subject, bytes| {
                    let _ = tx_for_bus.send((subject.to_owned(), bytes.to_vec()));
                }),
            )
            .expect("`>` is always a valid pattern");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "loopback connection accepted");
                            let broker = self.broker.clone();
                            let rx = broadcast_tx.subscribe();
                            let child_token = token.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, broker, rx, child_token).await {
                                    warn!(%peer, error = ?e, "loopback connection closed with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = ?e, "loopback accept failed");
                        }
                    }
                }
            }
        }

        self.broker.unsubscribe(bus_handle);
    }
}

async fn handle_connection(
    stream: TcpStream,
    broker: Broker,
    mut rx: broadcast::Receiver<(String, Vec<u8>)>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            sent = rx.recv() => {
                match sent {
                    Ok((subject, bytes)) => {
                        let payload = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
                        let frame = LoopbackFrame { subject, payload };
                        let mut line = serde_json::to_vec(&frame)?;
                        line.push(b'\n');
                        write_half.write_all(&line).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Ok(frame) = serde_json::from_str::<LoopbackFrame>(&line) {
                            broker.publish(&frame.subject, &serde_json::to_vec(&frame.payload)?);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}
