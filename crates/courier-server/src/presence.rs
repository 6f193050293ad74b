//! Presence Registry.
//!
//! In-process directory of which users currently hold a live connection.
//! The map is owned by [`PresenceRegistry`] and only reachable through its
//! methods; connection tasks never touch it directly.
//!
//! One binding per user: registering a second connection for the same user
//! replaces the first (last connection wins) and the displaced handle is
//! told to shut down. State is memory-only and lost on restart.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, warn};

use courier_shared::{PresenceProfile, ServerEvent, UserId};

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound side of one live connection.
///
/// Events are queued on a bounded channel drained by a single writer task,
/// so they reach the client in emission order.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    profile: PresenceProfile,
    tx: mpsc::Sender<ServerEvent>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(profile: PresenceProfile, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            profile,
            tx,
            shutdown: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.profile.user_id
    }

    pub fn profile(&self) -> &PresenceProfile {
        &self.profile
    }

    /// Best-effort, non-blocking push. A full queue or a closed connection
    /// drops the event.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(
                    user = %self.profile.user_id,
                    conn = self.id,
                    event = event.name(),
                    "Outbound queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(
                    user = %self.profile.user_id,
                    conn = self.id,
                    event = event.name(),
                    "Connection closed, dropping event"
                );
                false
            }
        }
    }

    /// Ask the connection task to close the socket.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once [`ConnectionHandle::close`] has been called.
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    connections: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the handle's user to it, returning the displaced handle if the
    /// user was already connected.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user = handle.user_id().clone();
        let mut connections = self.connections.write().await;
        connections.insert(user, handle)
    }

    pub async fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(user).cloned()
    }

    /// Remove the binding for `user` if it still points at `conn`.
    ///
    /// A superseded connection closing late must not evict its successor.
    pub async fn unregister(&self, user: &UserId, conn: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user) {
            Some(current) if current.id() == conn => {
                connections.remove(user);
                true
            }
            _ => false,
        }
    }

    pub async fn list_online(&self) -> BTreeSet<UserId> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.connections.read().await.contains_key(user)
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Push `event` to the user's connection, if any.
    pub async fn send_to(&self, user: &UserId, event: ServerEvent) -> bool {
        match self.lookup(user).await {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    /// Send the current online list followed by `point_event` to everyone.
    ///
    /// Snapshot and fan-out share one read lock, so a registration cannot
    /// slip in between and no client receives a list older than one it
    /// already holds. Returns how many connections accepted both events.
    pub async fn broadcast_presence(&self, point_event: &ServerEvent) -> usize {
        let connections = self.connections.read().await;
        let online: BTreeSet<&UserId> = connections.keys().collect();
        let snapshot = ServerEvent::OnlineUsers(online.into_iter().cloned().collect());
        connections
            .values()
            .filter(|handle| {
                let listed = handle.send(snapshot.clone());
                handle.send(point_event.clone()) && listed
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> PresenceProfile {
        PresenceProfile::anonymous(UserId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn test_register_lookup_unregister() {
        let registry = PresenceRegistry::new();
        let (h, _rx) = ConnectionHandle::new(profile("u"), 4);
        let user = h.user_id().clone();

        assert!(registry.register(h.clone()).await.is_none());
        assert_eq!(registry.lookup(&user).await.map(|x| x.id()), Some(h.id()));

        assert!(registry.unregister(&user, h.id()).await);
        assert!(registry.lookup(&user).await.is_none());
        assert!(!registry.unregister(&user, h.id()).await);
    }

    #[tokio::test]
    async fn test_second_register_wins() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = ConnectionHandle::new(profile("u"), 4);
        let (h2, _rx2) = ConnectionHandle::new(profile("u"), 4);
        let user = h1.user_id().clone();

        registry.register(h1.clone()).await;
        let displaced = registry.register(h2.clone()).await;
        assert_eq!(displaced.map(|x| x.id()), Some(h1.id()));
        assert_eq!(registry.lookup(&user).await.map(|x| x.id()), Some(h2.id()));

        // The stale connection going away leaves the new binding alone.
        assert!(!registry.unregister(&user, h1.id()).await);
        assert!(registry.is_online(&user).await);
    }

    #[tokio::test]
    async fn test_list_and_broadcast_presence() {
        let registry = PresenceRegistry::new();
        let (a, mut rx_a) = ConnectionHandle::new(profile("a"), 4);
        let (b, mut rx_b) = ConnectionHandle::new(profile("b"), 4);
        registry.register(a).await;
        registry.register(b).await;

        let online: Vec<_> = registry
            .list_online()
            .await
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(online, vec!["a", "b"]);

        let point = ServerEvent::UserOffline(profile("c"));
        let list = ServerEvent::OnlineUsers(registry.list_online().await.into_iter().collect());
        assert_eq!(registry.broadcast_presence(&point).await, 2);
        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await, Some(list.clone()));
            assert_eq!(rx.recv().await, Some(point.clone()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_presence_converges() {
        let registry = PresenceRegistry::new();
        let names: Vec<String> = (0..8).map(|i| format!("user{i}")).collect();

        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for name in &names {
            let (handle, rx) = ConnectionHandle::new(profile(name), 64);
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let announced = ServerEvent::UserOnline(handle.profile().clone());
                registry.register(handle).await;
                registry.broadcast_presence(&announced).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let everyone: Vec<UserId> = names.iter().map(|n| UserId::parse(n).unwrap()).collect();
        for mut rx in receivers {
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            // Lists arrive paired with their point event and never shrink.
            assert_eq!(events.len() % 2, 0);
            let lists: Vec<&Vec<UserId>> = events
                .chunks(2)
                .map(|pair| match pair {
                    [ServerEvent::OnlineUsers(list), ServerEvent::UserOnline(_)] => list,
                    other => panic!("unexpected pair {other:?}"),
                })
                .collect();
            assert!(lists.windows(2).all(|w| w[0].len() <= w[1].len()));
            assert_eq!(lists.last().map(|l| l.as_slice()), Some(everyone.as_slice()));
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (h, _rx) = ConnectionHandle::new(profile("u"), 1);
        assert!(h.send(ServerEvent::OnlineUsers(vec![])));
        assert!(!h.send(ServerEvent::OnlineUsers(vec![])));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let (h, _rx) = ConnectionHandle::new(profile("u"), 1);
        h.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), h.closed())
            .await
            .expect("close should be observed");
    }
}
