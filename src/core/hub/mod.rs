// src/core/hub/mod.rs

//! The hub: a single-task router owning the live-connection registry.
//!
//! Every registry mutation and routing decision is serialized onto one event
//! loop, so the hot path needs no lock. Callers talk to the loop exclusively
//! through its event channels: `register`, `unregister`, `broadcast`, and
//! `relay`, plus a buffered log channel drained into an injected sink.

mod registry;

use crate::config::HubConfig;
use crate::connection::Connection;
use crate::connection::transport::Upgrade;
use crate::core::HubError;
use crate::core::protocol::{Command, ConnectionId, Packet};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use registry::{Registry, RelayOutcome};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// A command handler: invoked once per matching decoded inbound command, as
/// its own task, with the originating connection and the raw command body.
pub type Handler = Arc<dyn Fn(Arc<Connection>, Bytes) -> HandlerFuture + Send + Sync>;

pub type HandlerFuture = BoxFuture<'static, ()>;

/// The log sink consumed by the hub. Driven off the buffered log channel so
/// the emitting pumps never block on it.
pub type LogSink = Arc<dyn Fn(String) + Send + Sync>;

pub(crate) fn into_handler<F, Fut>(handler: F) -> Handler
where
    F: Fn(Arc<Connection>, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |conn, body| handler(conn, body).boxed())
}

/// The command dispatch table plus the hub's running flag.
///
/// The table is closed for modification once the loop starts; the flag is
/// what makes the rejection observable rather than conventional.
pub(crate) struct Dispatch {
    handlers: RwLock<HashMap<String, Handler>>,
    running: AtomicBool,
}

impl Dispatch {
    fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Handler> {
        self.handlers.read().get(name).cloned()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A registration event: a fresh connection id plus the sending side of its
/// outbound queue. The registry entry holds the queue's only strong sender,
/// so dropping the entry is what closes the queue.
pub(crate) struct Registration {
    pub id: ConnectionId,
    pub outbound: mpsc::Sender<Bytes>,
}

/// The cloneable bundle of event-channel senders. Connections hold one as
/// their non-owning route back to the hub; it is never used to read or
/// mutate hub-owned state.
#[derive(Clone)]
pub(crate) struct HubHandle {
    pub register: mpsc::Sender<Registration>,
    pub unregister: mpsc::Sender<ConnectionId>,
    pub broadcast: mpsc::Sender<Packet>,
    pub relay: mpsc::Sender<Packet>,
    log: mpsc::Sender<String>,
}

impl HubHandle {
    /// Pushes a line onto the log channel. Overflow drops the line; the
    /// emitting side never blocks.
    pub(crate) fn log_line(&self, line: String) {
        let _ = self.log.try_send(line);
    }
}

/// The receiving halves of the event channels, owned by `run` while the loop
/// is active and parked here while the hub is idle.
struct HubInbox {
    register: mpsc::Receiver<Registration>,
    unregister: mpsc::Receiver<ConnectionId>,
    broadcast: mpsc::Receiver<Packet>,
    relay: mpsc::Receiver<Packet>,
    log: mpsc::Receiver<String>,
}

/// The connection hub. See the module docs for the ownership model.
pub struct Hub {
    handle: HubHandle,
    inbox: Mutex<Option<HubInbox>>,
    dispatch: Arc<Dispatch>,
    sink: LogSink,
    config: HubConfig,
}

impl Hub {
    pub fn new(config: HubConfig, sink: LogSink) -> Self {
        let events = config.event_queue.max(1);
        let (register_tx, register_rx) = mpsc::channel(events);
        let (unregister_tx, unregister_rx) = mpsc::channel(events);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(events);
        let (relay_tx, relay_rx) = mpsc::channel(events);
        let (log_tx, log_rx) = mpsc::channel(config.log_queue.max(1));

        Self {
            handle: HubHandle {
                register: register_tx,
                unregister: unregister_tx,
                broadcast: broadcast_tx,
                relay: relay_tx,
                log: log_tx,
            },
            inbox: Mutex::new(Some(HubInbox {
                register: register_rx,
                unregister: unregister_rx,
                broadcast: broadcast_rx,
                relay: relay_rx,
                log: log_rx,
            })),
            dispatch: Arc::new(Dispatch::new()),
            sink,
            config,
        }
    }

    /// Whether the event loop is currently active.
    pub fn is_running(&self) -> bool {
        self.dispatch.is_running()
    }

    /// Adds an entry to the command dispatch table.
    ///
    /// The table is fixed once the loop runs: a late registration is logged
    /// and dropped, leaving the table unchanged.
    pub fn register_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Connection>, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.is_running() {
            self.log(format!(
                "hub is running, dropping handler registration for '{name}'"
            ));
            return;
        }
        self.dispatch
            .handlers
            .write()
            .insert(name, into_handler(handler));
    }

    /// The names currently present in the dispatch table, sorted.
    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dispatch.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs the upgrade collaborator and, on success, registers a new
    /// connection and starts its pumps. This is the one operation that
    /// surfaces an error to its caller; after registration every failure
    /// resolves into a log line or a lifecycle transition.
    pub async fn accept<U: Upgrade>(&self, upgrade: U) -> Result<ConnectionId, HubError> {
        let transport = upgrade.upgrade().await?;

        let id = ConnectionId::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let connection = Arc::new(Connection::new(
            id,
            self.handle.clone(),
            outbound_tx.downgrade(),
            self.dispatch.clone(),
            self.config.clone(),
        ));

        self.handle
            .register
            .send(Registration {
                id,
                outbound: outbound_tx,
            })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        connection.spawn_pumps(transport, outbound_rx);

        Ok(id)
    }

    /// Queues a command for delivery to every registered connection.
    pub async fn broadcast(&self, cmd: &Command) {
        let packet = Packet {
            to: None,
            message: cmd.encode(),
        };
        let _ = self.handle.broadcast.send(packet).await;
    }

    /// Queues a command for delivery to one connection. An unknown target is
    /// not an error here; the loop logs and drops the packet.
    pub async fn relay(&self, to: ConnectionId, cmd: &Command) {
        let packet = Packet {
            to: Some(to),
            message: cmd.encode(),
        };
        let _ = self.handle.relay.send(packet).await;
    }

    /// The hub's event loop. Blocks until `shutdown` fires, then closes every
    /// live connection's outbound queue (which closes its transport and
    /// drives normal teardown) and returns with the registry empty.
    ///
    /// Re-entering `run` after it returns starts a fresh running phase;
    /// events buffered while idle are processed then.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), HubError> {
        let inbox = self.inbox.lock().take().ok_or(HubError::AlreadyRunning)?;
        let HubInbox {
            mut register,
            mut unregister,
            mut broadcast,
            mut relay,
            log,
        } = inbox;

        self.dispatch.running.store(true, Ordering::SeqCst);

        let stop = CancellationToken::new();
        let drain = tokio::spawn(drain_logs(log, self.sink.clone(), stop.clone()));

        let mut registry = Registry::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    self.log(format!(
                        "hub received shutdown signal, closing {} connections",
                        registry.len()
                    ));
                    break;
                }
                Some(registration) = register.recv() => {
                    self.log(format!("connection {} registered", registration.id));
                    registry.register(registration.id, registration.outbound);
                }
                Some(id) = unregister.recv() => {
                    if registry.unregister(&id) {
                        self.log(format!("connection {id} unregistered"));
                    }
                }
                Some(packet) = broadcast.recv() => {
                    for id in registry.broadcast(&packet.message) {
                        self.log(format!("connection {id}, outbound queue full, evicting"));
                    }
                }
                Some(packet) = relay.recv() => {
                    let Some(to) = packet.to else { continue };
                    match registry.relay(&to, &packet.message) {
                        RelayOutcome::Delivered => {}
                        RelayOutcome::UnknownTarget => {
                            self.log(format!("relay target {to} not registered, dropping message"));
                        }
                        RelayOutcome::Evicted => {
                            self.log(format!("connection {to}, outbound queue full, evicting"));
                        }
                    }
                }
            }
        }

        // Dropping every registry entry closes every outbound queue; each
        // write pump then emits a close frame and closes its transport,
        // unblocking the paired read pump.
        registry.clear();
        self.dispatch.running.store(false, Ordering::SeqCst);

        stop.cancel();
        let log = drain.await.expect("log drain task panicked");
        *self.inbox.lock() = Some(HubInbox {
            register,
            unregister,
            broadcast,
            relay,
            log,
        });

        Ok(())
    }

    fn log(&self, line: String) {
        self.handle.log_line(line);
    }
}

/// Feeds buffered log lines into the sink until stopped, then drains what is
/// left and hands the receiver back for the next running phase.
async fn drain_logs(
    mut log: mpsc::Receiver<String>,
    sink: LogSink,
    stop: CancellationToken,
) -> mpsc::Receiver<String> {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            maybe = log.recv() => match maybe {
                Some(line) => sink(line),
                None => break,
            },
        }
    }
    while let Ok(line) = log.try_recv() {
        sink(line);
    }
    log
}
