// src/connection/actor.rs

//! The per-socket actor: one connection bridging a transport to the hub via
//! a read pump and a write pump that fail independently.

use super::transport::{Frame, Transport, TransportReader, TransportWriter};
use crate::config::HubConfig;
use crate::core::HubError;
use crate::core::hub::{Dispatch, Handler, HubHandle, into_handler};
use crate::core::protocol::{Command, ConnectionId, Packet};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval_at, timeout};

/// One live connection.
///
/// The hub owns the registry entry (and with it the strong side of the
/// outbound queue); the connection holds only a weak sender for the
/// self-send fast path and a routing handle for pushing events to the hub.
pub struct Connection {
    id: ConnectionId,
    hub: HubHandle,
    outbound: mpsc::WeakSender<Bytes>,
    closes: Mutex<HashMap<String, Handler>>,
    dispatch: Arc<Dispatch>,
    config: HubConfig,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        hub: HubHandle,
        outbound: mpsc::WeakSender<Bytes>,
        dispatch: Arc<Dispatch>,
        config: HubConfig,
    ) -> Self {
        Self {
            id,
            hub,
            outbound,
            closes: Mutex::new(HashMap::new()),
            dispatch,
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Pushes a line onto the hub's log channel, prefixed with this
    /// connection's id. Never blocks.
    pub fn log(&self, line: &str) {
        self.hub.log_line(format!("connection {}, {line}", self.id));
    }

    /// Sends a command to the connection identified by `to`.
    ///
    /// Sending to one's own id enqueues directly onto this connection's
    /// outbound queue, bypassing the hub loop entirely; anything else goes
    /// through the hub's relay channel. Failures resolve into log lines,
    /// never into errors for the caller.
    pub async fn send(&self, to: ConnectionId, cmd: &Command) {
        let message = cmd.encode();

        if to == self.id {
            match self.outbound.upgrade() {
                Some(queue) => {
                    if queue.send(message).await.is_err() {
                        self.log("outbound queue closed, dropping message");
                    }
                }
                None => self.log("outbound queue gone, dropping message"),
            }
            return;
        }

        let packet = Packet {
            to: Some(to),
            message,
        };
        let _ = self.hub.relay.send(packet).await;
    }

    /// Sends a command to every registered connection via the hub.
    pub async fn broadcast(&self, cmd: &Command) {
        let packet = Packet {
            to: None,
            message: cmd.encode(),
        };
        let _ = self.hub.broadcast.send(packet).await;
    }

    /// Registers a named callback invoked when this connection tears down.
    /// Registration can happen from any task; the map is read by the read
    /// pump at teardown, hence the dedicated lock.
    pub fn register_close_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Connection>, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.closes.lock().insert(name.into(), into_handler(handler));
    }

    pub fn unregister_close_handler(&self, name: &str) {
        self.closes.lock().remove(name);
    }

    /// Starts the read and write pumps as independent tasks.
    pub(crate) fn spawn_pumps(
        self: &Arc<Self>,
        transport: Box<dyn Transport>,
        outbound: mpsc::Receiver<Bytes>,
    ) {
        let (reader, writer) = transport.split();
        tokio::spawn(read_pump(self.clone(), reader));
        tokio::spawn(write_pump(self.clone(), writer, outbound));
    }
}

/// Decodes inbound frames and dispatches them to registered handlers.
///
/// Handlers run as independent tasks and are never awaited here; read
/// throughput must not depend on handler latency. Protocol problems are
/// logged and skipped; only a transport failure ends the pump, at which
/// point the connection unregisters, its close handlers run, and the reader
/// is dropped.
async fn read_pump(conn: Arc<Connection>, mut reader: Box<dyn TransportReader>) {
    loop {
        let raw = match reader.next().await {
            Some(Ok(raw)) => raw,
            Some(Err(err)) => {
                conn.log(&format!("failed to read message: {err}"));
                break;
            }
            None => {
                conn.log("transport closed by peer");
                break;
            }
        };

        if raw.len() > conn.config.max_frame_bytes {
            let err = HubError::FrameTooLarge {
                got: raw.len(),
                limit: conn.config.max_frame_bytes,
            };
            conn.log(&format!("dropping frame: {err}"));
            continue;
        }

        let cmd = match Command::decode(&raw) {
            Ok(cmd) => cmd,
            Err(err) => {
                conn.log(&format!("failed to decode frame: {err}"));
                continue;
            }
        };

        match conn.dispatch.lookup(&cmd.name) {
            Some(handler) => {
                tokio::spawn(handler(conn.clone(), cmd.body));
            }
            None => conn.log(&format!("unknown command '{}', dropping frame", cmd.name)),
        }
    }

    conn.log("leave read");
    let _ = conn.hub.unregister.send(conn.id).await;

    let closes: Vec<Handler> = conn.closes.lock().values().cloned().collect();
    for handler in closes {
        handler(conn.clone(), Bytes::new()).await;
    }
}

/// Drains the outbound queue to the transport, interleaved with keepalive
/// pings. Bursts already buffered in the queue are coalesced into a single
/// flush under one write deadline. The transport is closed on every exit
/// path, which also unblocks the paired read pump.
async fn write_pump(
    conn: Arc<Connection>,
    mut writer: Box<dyn TransportWriter>,
    mut outbound: mpsc::Receiver<Bytes>,
) {
    let period = conn.config.ping_period;
    let mut ping = interval_at(tokio::time::Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = outbound.recv() => match maybe {
                Some(message) => {
                    let mut batch = vec![message];
                    while let Ok(more) = outbound.try_recv() {
                        batch.push(more);
                    }
                    match timeout(conn.config.write_timeout, writer.write_batch(batch)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            conn.log(&format!("failed to write message: {err}"));
                            break;
                        }
                        Err(_) => {
                            conn.log(&format!("failed to write message: {}", HubError::WriteTimeout));
                            break;
                        }
                    }
                }
                None => {
                    // The hub closed the queue.
                    conn.log("outbound queue closed by hub");
                    let _ = timeout(conn.config.write_timeout, writer.write(Frame::Close)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                match timeout(conn.config.write_timeout, writer.write(Frame::Ping)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        conn.log(&format!("failed to write ping message: {err}"));
                        break;
                    }
                    Err(_) => {
                        conn.log(&format!("failed to write ping message: {}", HubError::WriteTimeout));
                        break;
                    }
                }
            }
        }
    }

    conn.log("leave write");
    writer.close().await;
}
