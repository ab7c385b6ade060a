// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivery fabric: long-lived client sessions, room membership, and
//! fan-out that reaches every instance.
//!
//! `emit(room, event)` applies the event to local room members and relays it
//! over the shared store's pub/sub channel; other instances apply it to
//! their local members.  Delivery is at-most-once — clients reconcile via
//! the durable record on reconnect.

pub mod events;
pub mod ws;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::presence::Presence;
use crate::store::{keys, SharedStore};
use events::{RelayEnvelope, Room, ServerEvent};

/// Per-connection outbound queue capacity.
const QUEUE_CAP: usize = 256;

/// An outbound frame for one connection.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text { body: String, critical: bool },
    /// Terminate the connection with a policy reason.
    Close { reason: String },
}

/// Bounded outbound queue with drop-oldest shedding for non-critical
/// frames.  Critical frames are FIFO and never shed.
pub struct ConnQueue {
    frames: Mutex<VecDeque<Outbound>>,
    notify: Notify,
    closed: AtomicBool,
}

impl ConnQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn push(&self, frame: Outbound) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let critical = matches!(frame, Outbound::Close { .. })
            || matches!(frame, Outbound::Text { critical: true, .. });
        {
            let Ok(mut frames) = self.frames.lock() else { return };
            if frames.len() >= QUEUE_CAP {
                // Shed the oldest sheddable frame to make room.
                if let Some(pos) = frames
                    .iter()
                    .position(|f| matches!(f, Outbound::Text { critical: false, .. }))
                {
                    frames.remove(pos);
                } else if !critical {
                    debug!("outbound queue full, dropping non-critical frame");
                    return;
                }
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Pop the next frame without waiting.
    pub fn try_pop(&self) -> Option<Outbound> {
        self.frames.lock().ok().and_then(|mut frames| frames.pop_front())
    }

    /// Pop the next frame, waiting until one arrives or the queue closes.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            {
                let Ok(mut frames) = self.frames.lock() else { return None };
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct ConnEntry {
    user_id: String,
    queue: Arc<ConnQueue>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct FabricInner {
    conns: HashMap<u64, ConnEntry>,
    rooms: HashMap<String, HashSet<u64>>,
    /// Connection ids per user, oldest first.
    user_conns: HashMap<String, VecDeque<u64>>,
}

/// The per-instance connection hub.
pub struct DeliveryFabric {
    pub instance_id: String,
    store: Arc<dyn SharedStore>,
    pub presence: Arc<dyn Presence>,
    max_conns_per_user: usize,
    next_conn_id: AtomicU64,
    inner: Mutex<FabricInner>,
}

impl DeliveryFabric {
    pub fn new(
        instance_id: String,
        store: Arc<dyn SharedStore>,
        presence: Arc<dyn Presence>,
        max_conns_per_user: usize,
    ) -> Self {
        Self {
            instance_id,
            store,
            presence,
            max_conns_per_user,
            next_conn_id: AtomicU64::new(1),
            inner: Mutex::new(FabricInner::default()),
        }
    }

    /// Register a connection, binding it to its user and role rooms.  When
    /// the per-user ceiling is exceeded the oldest connection is closed with
    /// a policy message.
    pub fn register(&self, user_id: &str, role: crate::model::Role) -> (u64, Arc<ConnQueue>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let queue = ConnQueue::new();
        let initial_rooms =
            [Room::User(user_id.to_owned()).key(), Room::Role(role).key()];

        let evicted: Option<Arc<ConnQueue>> = {
            let Ok(mut inner) = self.inner.lock() else { return (conn_id, queue) };
            let mut entry = ConnEntry {
                user_id: user_id.to_owned(),
                queue: Arc::clone(&queue),
                rooms: HashSet::new(),
            };
            for room in initial_rooms {
                inner.rooms.entry(room.clone()).or_default().insert(conn_id);
                entry.rooms.insert(room);
            }
            inner.conns.insert(conn_id, entry);

            let user_queue = inner.user_conns.entry(user_id.to_owned()).or_default();
            user_queue.push_back(conn_id);
            let oldest = if user_queue.len() > self.max_conns_per_user {
                user_queue.pop_front()
            } else {
                None
            };
            oldest.and_then(|oldest| Self::detach(&mut inner, oldest))
        };

        if let Some(old_queue) = evicted {
            old_queue
                .push(Outbound::Close { reason: "connection limit exceeded".to_owned() });
            old_queue.close();
        }
        (conn_id, queue)
    }

    /// Drop a connection from every room and the user index.
    pub fn unregister(&self, conn_id: u64) {
        let queue = {
            let Ok(mut inner) = self.inner.lock() else { return };
            Self::detach(&mut inner, conn_id)
        };
        if let Some(queue) = queue {
            queue.close();
        }
    }

    fn detach(inner: &mut FabricInner, conn_id: u64) -> Option<Arc<ConnQueue>> {
        let entry = inner.conns.remove(&conn_id)?;
        for room in &entry.rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }
        if let Some(user_queue) = inner.user_conns.get_mut(&entry.user_id) {
            user_queue.retain(|id| *id != conn_id);
            if user_queue.is_empty() {
                inner.user_conns.remove(&entry.user_id);
            }
        }
        Some(entry.queue)
    }

    pub fn join(&self, conn_id: u64, room: &Room) {
        let Ok(mut inner) = self.inner.lock() else { return };
        let key = room.key();
        if let Some(entry) = inner.conns.get_mut(&conn_id) {
            entry.rooms.insert(key.clone());
        } else {
            return;
        }
        inner.rooms.entry(key).or_default().insert(conn_id);
    }

    pub fn leave(&self, conn_id: u64, room: &Room) {
        let Ok(mut inner) = self.inner.lock() else { return };
        let key = room.key();
        if let Some(entry) = inner.conns.get_mut(&conn_id) {
            entry.rooms.remove(&key);
        }
        if let Some(members) = inner.rooms.get_mut(&key) {
            members.remove(&conn_id);
            if members.is_empty() {
                inner.rooms.remove(&key);
            }
        }
    }

    /// Emit an event into a room on every instance.
    pub async fn emit(&self, room: &Room, event: &ServerEvent) {
        let body = match serde_json::to_string(event) {
            Ok(body) => body,
            Err(e) => {
                warn!(err = %e, "unserializable event");
                return;
            }
        };
        let critical = event.is_critical();
        self.deliver_local(&room.key(), &body, critical);

        let envelope = RelayEnvelope {
            src: self.instance_id.clone(),
            room: room.key(),
            payload: body,
            critical,
        };
        match serde_json::to_string(&envelope) {
            Ok(raw) => {
                // Relay is best-effort: local members already have the event
                // and clients reconcile on reconnect.
                if let Err(e) = self.store.publish(keys::FABRIC_CHANNEL, &raw).await {
                    warn!(err = %e, "fabric relay publish failed");
                }
            }
            Err(e) => warn!(err = %e, "unserializable relay envelope"),
        }
    }

    /// Queue a frame for every local member of `room`.
    pub fn deliver_local(&self, room_key: &str, body: &str, critical: bool) {
        let queues: Vec<Arc<ConnQueue>> = {
            let Ok(inner) = self.inner.lock() else { return };
            let Some(members) = inner.rooms.get(room_key) else { return };
            members
                .iter()
                .filter_map(|id| inner.conns.get(id).map(|e| Arc::clone(&e.queue)))
                .collect()
        };
        for queue in queues {
            queue.push(Outbound::Text { body: body.to_owned(), critical });
        }
    }

    /// Send to one connection directly (e.g. the `connected` greeting).
    pub fn send_to_conn(&self, conn_id: u64, event: &ServerEvent) {
        let Ok(body) = serde_json::to_string(event) else { return };
        let queue = {
            let Ok(inner) = self.inner.lock() else { return };
            inner.conns.get(&conn_id).map(|e| Arc::clone(&e.queue))
        };
        if let Some(queue) = queue {
            queue.push(Outbound::Text { body, critical: event.is_critical() });
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.conns.len()).unwrap_or(0)
    }
}

/// Spawn the relay consumer: applies events published by other instances to
/// local room members.  Resubscribes with backoff if the stream drops.
pub fn spawn_relay(fabric: Arc<DeliveryFabric>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let mut rx = match fabric.store.subscribe(keys::FABRIC_CHANNEL).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(err = %e, "fabric relay subscribe failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => continue,
                    }
                }
            };

            loop {
                let raw = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    msg = rx.recv() => match msg {
                        Some(raw) => raw,
                        None => break,
                    },
                };
                let envelope: RelayEnvelope = match serde_json::from_str(&raw) {
                    Ok(env) => env,
                    Err(e) => {
                        warn!(err = %e, "undecodable relay envelope");
                        continue;
                    }
                };
                if envelope.src == fabric.instance_id {
                    continue;
                }
                fabric.deliver_local(&envelope.room, &envelope.payload, envelope.critical);
            }
        }
    });
}

#[cfg(test)]
#[path = "fabric_tests.rs"]
mod tests;
