use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stackly_core::{ChannelId, ConnectionId, UserId};

/// One live duplex connection, owned by the registry for its lifetime.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub channel: ChannelId,
    tx: mpsc::Sender<String>,
    last_pong: AtomicU64,
    closed: CancellationToken,
}

impl ConnectionHandle {
    fn new(user_id: UserId, channel: ChannelId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            channel,
            tx,
            last_pong: AtomicU64::new(now_secs()),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a serialized frame without waiting. Returns false when the
    /// queue is full or the writer is gone.
    pub fn try_deliver(&self, payload: &str) -> bool {
        match self.tx.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.id, "connection closed, skipping");
                false
            }
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Resolves once the registry has dropped this connection.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    #[cfg(test)]
    pub(crate) fn set_last_pong(&self, secs: u64) {
        self.last_pong.store(secs, Ordering::Relaxed);
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Result of [`ConnectionRegistry::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// The user had no live connection on this process before.
    FirstConnection,
    Additional,
}

/// Result of [`ConnectionRegistry::remove`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Removal {
    /// The user has no live connection left on this process.
    LastConnection(UserId),
    StillConnected(UserId),
    /// Unknown or already removed connection.
    NotRegistered,
}

/// A registered connection plus the receiving end of its send queue.
pub struct NewConnection {
    pub handle: Arc<ConnectionHandle>,
    pub rx: mpsc::Receiver<String>,
    pub registration: Registration,
}

/// Per-process map of live connections by channel, with a live-connection
/// count per user.
///
/// Constructed once at startup and shared by `Arc`. Reads are snapshots and
/// are not transactional with concurrent add/remove.
pub struct ConnectionRegistry {
    channels: DashMap<ChannelId, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    user_counts: DashMap<UserId, usize>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    /// `max_send_queue` is clamped to at least one slot per connection.
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            channels: DashMap::new(),
            connections: DashMap::new(),
            user_counts: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a live connection for `user_id` under `channel`.
    pub fn add(&self, user_id: UserId, channel: ChannelId) -> NewConnection {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let handle = Arc::new(ConnectionHandle::new(user_id, channel.clone(), tx));

        self.connections.insert(handle.id.clone(), Arc::clone(&handle));
        self.channels
            .entry(channel)
            .or_default()
            .insert(handle.id.clone(), Arc::clone(&handle));

        let registration = {
            let mut count = self.user_counts.entry(user_id).or_insert(0);
            *count += 1;
            if *count == 1 {
                Registration::FirstConnection
            } else {
                Registration::Additional
            }
        };

        tracing::debug!(
            connection_id = %handle.id,
            user_id = %user_id,
            channel = %handle.channel,
            ?registration,
            "connection registered"
        );
        NewConnection {
            handle,
            rx,
            registration,
        }
    }

    /// Drop a connection. Safe to call any number of times.
    pub fn remove(&self, id: &ConnectionId) -> Removal {
        let Some((_, handle)) = self.connections.remove(id) else {
            return Removal::NotRegistered;
        };
        handle.closed.cancel();

        if let Entry::Occupied(mut members) = self.channels.entry(handle.channel.clone()) {
            members.get_mut().remove(id);
            if members.get().is_empty() {
                members.remove();
            }
        }

        let user_id = handle.user_id;
        let removal = match self.user_counts.entry(user_id) {
            Entry::Occupied(mut count) => {
                *count.get_mut() = count.get().saturating_sub(1);
                if *count.get() == 0 {
                    count.remove();
                    Removal::LastConnection(user_id)
                } else {
                    Removal::StillConnected(user_id)
                }
            }
            Entry::Vacant(_) => Removal::LastConnection(user_id),
        };

        tracing::debug!(connection_id = %id, user_id = %user_id, ?removal, "connection removed");
        removal
    }

    /// Users with at least one live connection, in ascending order.
    pub fn list_online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.user_counts.iter().map(|entry| *entry.key()).collect();
        users.sort_unstable();
        users
    }

    pub fn user_connection_count(&self, user_id: UserId) -> usize {
        self.user_counts.get(&user_id).map(|c| *c).unwrap_or(0)
    }

    /// Total live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of one channel's members.
    pub fn channel_members(&self, channel: &ChannelId) -> Vec<Arc<ConnectionHandle>> {
        self.channels
            .get(channel)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live connection on this process.
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn user_connections(&self, user_id: UserId) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Connections whose last pong is older than `timeout`.
    pub fn dead_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop every connection. Used at shutdown.
    pub fn clear(&self) {
        for entry in self.connections.iter() {
            entry.value().closed.cancel();
        }
        self.connections.clear();
        self.channels.clear();
        self.user_counts.clear();
    }
}
