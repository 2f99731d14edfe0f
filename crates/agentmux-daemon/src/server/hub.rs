//! Connection and subscription management.
//!
//! The hub is the only owner of the connection map. Registry events arrive
//! through [`BroadcastHub::run_events`]; client requests through
//! [`BroadcastHub::handle_text`]. Each connection has a bounded outbound
//! queue drained by its transport task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, ServerMessage, decode_client_message};
use crate::session::{CreateOptions, SessionEvent, SessionRegistry};

/// Outbound side of one client connection.
struct ClientConnection {
    tx: mpsc::Sender<ServerMessage>,
    subscriptions: HashSet<String>,
    /// Output messages dropped because the queue was full.
    dropped: u64,
}

/// Receiving end handed to the transport when a client connects.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: u64,
    pub rx: mpsc::Receiver<ServerMessage>,
}

/// Result of offering one message to one connection.
enum Delivery {
    Sent,
    Dropped,
    Evict,
}

/// Routes client requests to the registry and fans registry events out.
pub struct BroadcastHub {
    registry: Arc<SessionRegistry>,
    connections: RwLock<HashMap<u64, ClientConnection>>,
    next_conn_id: AtomicU64,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(registry: Arc<SessionRegistry>, queue_capacity: usize) -> Self {
        Self {
            registry,
            connections: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new client connection with an empty subscription set.
    pub async fn connect(&self) -> ConnectionHandle {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.write().await.insert(
            id,
            ClientConnection {
                tx,
                subscriptions: HashSet::new(),
                dropped: 0,
            },
        );
        info!(conn_id = id, "Client connected");
        ConnectionHandle { id, rx }
    }

    /// Forget a connection and its subscriptions.
    pub async fn disconnect(&self, conn_id: u64) {
        if let Some(conn) = self.connections.write().await.remove(&conn_id) {
            info!(
                conn_id,
                subscriptions = conn.subscriptions.len(),
                dropped = conn.dropped,
                "Client disconnected"
            );
        }
    }

    /// Disconnect every client.
    pub async fn close(&self) {
        let count = {
            let mut connections = self.connections.write().await;
            let count = connections.len();
            connections.clear();
            count
        };
        info!(connections = count, "Hub closed");
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Session ids a connection is subscribed to, or `None` if it is gone.
    pub async fn subscriptions(&self, conn_id: u64) -> Option<HashSet<String>> {
        self.connections
            .read()
            .await
            .get(&conn_id)
            .map(|conn| conn.subscriptions.clone())
    }

    /// Handle one text frame from a client.
    pub async fn handle_text(&self, conn_id: u64, text: &str) {
        match decode_client_message(text) {
            Ok(message) => self.handle_message(conn_id, message).await,
            Err(e) => {
                debug!(conn_id, error = %e, "Rejected client frame");
                self.reply(conn_id, ServerMessage::error(e.to_string()))
                    .await;
            }
        }
    }

    /// Handle one decoded client request.
    pub async fn handle_message(&self, conn_id: u64, message: ClientMessage) {
        match message {
            ClientMessage::List => {
                let sessions = self.registry.list().await;
                self.reply(conn_id, ServerMessage::List { sessions }).await;
            }
            ClientMessage::Create { name, cwd } => {
                self.create_session(conn_id, CreateOptions {
                    name,
                    cwd,
                    ..CreateOptions::default()
                })
                .await;
            }
            ClientMessage::Kill { session_id } => {
                self.registry.kill(&session_id).await;
            }
            ClientMessage::Subscribe { session_id } => {
                self.subscribe(conn_id, session_id).await;
            }
            ClientMessage::Unsubscribe { session_id } => {
                if let Some(conn) = self.connections.write().await.get_mut(&conn_id) {
                    debug!(conn_id, session_id = %session_id, "Unsubscribed");
                    conn.subscriptions.remove(&session_id);
                }
            }
            ClientMessage::Input { session_id, text } => {
                self.send_input(conn_id, &session_id, &text).await;
            }
            ClientMessage::Approve { session_id } => {
                let line = self.registry.config().approve_line.clone();
                self.send_input(conn_id, &session_id, &line).await;
            }
            ClientMessage::Deny { session_id } => {
                let line = self.registry.config().deny_line.clone();
                self.send_input(conn_id, &session_id, &line).await;
            }
        }
    }

    /// Create a session, announce it to everyone and subscribe the requester.
    ///
    /// The connection map stays locked for the whole operation so no output
    /// of the new session can be dispatched before the requester subscribes.
    async fn create_session(&self, conn_id: u64, options: CreateOptions) {
        let mut connections = self.connections.write().await;
        let info = match self.registry.create(options).await {
            Ok(info) => info,
            Err(e) => {
                deliver_or_evict(&mut connections, conn_id, ServerMessage::error(e.to_string()));
                return;
            }
        };

        if let Some(conn) = connections.get_mut(&conn_id) {
            conn.subscriptions.insert(info.id.clone());
        }
        broadcast(&mut connections, &ServerMessage::Created { session: info });
    }

    /// Add an active session to a connection's subscription set.
    ///
    /// The connection map is locked before the registry lookup, so an `Ended`
    /// for the session is dispatched after the insert and clears it.
    async fn subscribe(&self, conn_id: u64, session_id: String) {
        let mut connections = self.connections.write().await;
        if self.registry.get(&session_id).await.is_none() {
            debug!(conn_id, session_id = %session_id, "Ignoring subscribe to inactive session");
            return;
        }
        if let Some(conn) = connections.get_mut(&conn_id) {
            debug!(conn_id, session_id = %session_id, "Subscribed");
            conn.subscriptions.insert(session_id);
        }
    }

    async fn send_input(&self, conn_id: u64, session_id: &str, text: &str) {
        if let Err(e) = self.registry.write(session_id, text).await {
            self.reply(conn_id, ServerMessage::error(e.to_string())).await;
        }
    }

    async fn reply(&self, conn_id: u64, message: ServerMessage) {
        let mut connections = self.connections.write().await;
        deliver_or_evict(&mut connections, conn_id, message);
    }

    /// Fan one registry event out to the connections that should see it.
    pub async fn dispatch(&self, event: SessionEvent) {
        let mut connections = self.connections.write().await;
        match event {
            SessionEvent::Output {
                session_id, text, ..
            } => {
                let targets: Vec<u64> = connections
                    .iter()
                    .filter(|(_, conn)| conn.subscriptions.contains(&session_id))
                    .map(|(id, _)| *id)
                    .collect();
                let message = ServerMessage::Output { session_id, text };
                for id in targets {
                    deliver_or_evict(&mut connections, id, message.clone());
                }
            }
            SessionEvent::Ended { session_id, .. } => {
                for conn in connections.values_mut() {
                    conn.subscriptions.remove(&session_id);
                }
                broadcast(&mut connections, &ServerMessage::Ended { session_id });
            }
        }
    }

    /// Consume registry events until the registry is dropped.
    pub async fn run_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        debug!("Registry event stream closed");
    }
}

fn broadcast(connections: &mut HashMap<u64, ClientConnection>, message: &ServerMessage) {
    let ids: Vec<u64> = connections.keys().copied().collect();
    for id in ids {
        deliver_or_evict(connections, id, message.clone());
    }
}

fn deliver_or_evict(
    connections: &mut HashMap<u64, ClientConnection>,
    conn_id: u64,
    message: ServerMessage,
) {
    let Some(conn) = connections.get_mut(&conn_id) else {
        return;
    };
    match offer(conn, message) {
        Delivery::Sent | Delivery::Dropped => {}
        Delivery::Evict => {
            connections.remove(&conn_id);
            warn!(conn_id, "Evicted stalled client");
        }
    }
}

fn offer(conn: &mut ClientConnection, message: ServerMessage) -> Delivery {
    match conn.tx.try_send(message) {
        Ok(()) => Delivery::Sent,
        Err(mpsc::error::TrySendError::Full(message)) if message.is_droppable() => {
            conn.dropped += 1;
            if conn.dropped.is_power_of_two() {
                warn!(dropped = conn.dropped, "Client queue full, dropping output");
            }
            Delivery::Dropped
        }
        Err(_) => Delivery::Evict,
    }
}
