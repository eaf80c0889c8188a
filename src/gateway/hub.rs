//! Process-wide registry of connected chatters and active rooms.
//!
//! All mutation goes through one mutex; register, unregister, join, leave
//! and both broadcast scopes each take it exactly once. Per-chatter
//! outbound queues are unbounded, so enqueueing while the lock is held
//! never blocks; a queue whose writer is gone is skipped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The chatter is not registered with the hub.
    UnknownChatter,
    /// The room already holds the configured maximum of chatters.
    RoomFull,
    /// A broadcast matched zero recipients.
    NoMatch,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownChatter => f.write_str("a user is not registered"),
            Self::RoomFull => f.write_str("room participants exceeded"),
            Self::NoMatch => {
                f.write_str("error finding the chatters to broadcast the message")
            }
        }
    }
}

impl std::error::Error for HubError {}

/// One authenticated connection. Owned by its reader and writer loops; the
/// hub and rooms hold `Arc` references keyed by `conn_id`.
pub struct Chatter {
    pub conn_id: u64,
    pub user_id: u64,
    pub is_customer: bool,
    pub is_moderator: bool,
    outbound: mpsc::UnboundedSender<String>,
    /// Keys of the rooms this chatter has joined. A weak relation: rooms
    /// are owned by the hub and may outlive or predecease this view.
    rooms: Mutex<HashSet<String>>,
    closing: watch::Sender<bool>,
}

impl Chatter {
    /// Create a chatter together with its outbound queue receiver and the
    /// close signal both loops watch.
    pub fn new(
        user_id: u64,
        is_customer: bool,
        is_moderator: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closing, closing_rx) = watch::channel(false);
        let chatter = Arc::new(Self {
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            is_customer,
            is_moderator,
            outbound,
            rooms: Mutex::new(HashSet::new()),
            closing,
        });
        (chatter, outbound_rx, closing_rx)
    }

    /// Queue a serialized payload for the writer loop. Delivery means
    /// "queued", not "received". Returns false if the writer is gone.
    pub fn enqueue(&self, payload: String) -> bool {
        self.outbound.send(payload).is_ok()
    }

    pub fn in_room(&self, key: &str) -> bool {
        self.rooms.lock().contains(key)
    }

    /// Tell both loops to unwind. Idempotent.
    pub fn signal_close(&self) {
        let _ = self.closing.send(true);
    }
}

struct Room {
    members: HashMap<u64, Arc<Chatter>>,
}

#[derive(Default)]
struct HubInner {
    chatters: HashMap<u64, Arc<Chatter>>,
    rooms: HashMap<String, Room>,
}

pub struct Hub {
    capacity: usize,
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(HubInner::default()),
        }
    }

    pub fn register(&self, chatter: &Arc<Chatter>) {
        let mut inner = self.inner.lock();
        inner.chatters.insert(chatter.conn_id, chatter.clone());
        tracing::info!(user_id = chatter.user_id, "chatter registered");
    }

    /// Remove the chatter from the registry. Idempotent.
    pub fn unregister(&self, chatter: &Chatter) {
        let mut inner = self.inner.lock();
        inner.chatters.remove(&chatter.conn_id);
    }

    /// Join a room, creating it lazily. Re-joining is a no-op; an
    /// unregistered chatter or a room at capacity is an error.
    pub fn join(&self, chatter: &Arc<Chatter>, key: &str) -> Result<(), HubError> {
        let mut inner = self.inner.lock();

        if !inner.chatters.contains_key(&chatter.conn_id) {
            return Err(HubError::UnknownChatter);
        }

        let room = inner.rooms.entry(key.to_string()).or_insert_with(|| Room {
            members: HashMap::new(),
        });

        if room.members.len() == self.capacity {
            tracing::info!(room = key, "chatter limit exceeded");
            return Err(HubError::RoomFull);
        }

        if room
            .members
            .insert(chatter.conn_id, chatter.clone())
            .is_none()
        {
            tracing::info!(user_id = chatter.user_id, room = key, "chatter joined");
        }
        chatter.rooms.lock().insert(key.to_string());

        Ok(())
    }

    /// Remove the chatter from every room it joined, deleting rooms that
    /// become empty. Idempotent; safe to call from both loops.
    pub fn leave(&self, chatter: &Chatter) {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = chatter.rooms.lock().drain().collect();

        for key in keys {
            if let Some(room) = inner.rooms.get_mut(&key) {
                if room.members.remove(&chatter.conn_id).is_some() {
                    tracing::info!(user_id = chatter.user_id, room = %key, "chatter left");
                    if room.members.is_empty() {
                        inner.rooms.remove(&key);
                    }
                }
            }
        }
    }

    /// Enqueue the payload onto every registered chatter matching the
    /// predicate. `NoMatch` when nobody matched.
    pub fn broadcast<F>(&self, payload: &str, predicate: F) -> Result<(), HubError>
    where
        F: Fn(&Chatter) -> bool,
    {
        let inner = self.inner.lock();
        deliver(inner.chatters.values(), payload, predicate)
    }

    /// Room-scoped broadcast. A missing room matches nobody.
    pub fn broadcast_room<F>(&self, key: &str, payload: &str, predicate: F) -> Result<(), HubError>
    where
        F: Fn(&Chatter) -> bool,
    {
        let inner = self.inner.lock();
        let Some(room) = inner.rooms.get(key) else {
            return Err(HubError::NoMatch);
        };
        deliver(room.members.values(), payload, predicate)
    }

    pub fn chatter_count(&self) -> usize {
        self.inner.lock().chatters.len()
    }

    /// Current membership size of a room, `None` if the room doesn't exist.
    pub fn room_size(&self, key: &str) -> Option<usize> {
        self.inner.lock().rooms.get(key).map(|r| r.members.len())
    }
}

fn deliver<'a, I, F>(members: I, payload: &str, predicate: F) -> Result<(), HubError>
where
    I: Iterator<Item = &'a Arc<Chatter>>,
    F: Fn(&Chatter) -> bool,
{
    let mut at_least_once = false;
    for chatter in members {
        if !predicate(chatter) {
            continue;
        }
        if chatter.enqueue(payload.to_string()) {
            at_least_once = true;
        } else {
            // Writer already gone; the chatter is tearing down.
            tracing::debug!(user_id = chatter.user_id, "skipping closed outbound queue");
        }
    }

    if at_least_once {
        Ok(())
    } else {
        Err(HubError::NoMatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn registered(hub: &Hub, user_id: u64, moderator: bool) -> (Arc<Chatter>, UnboundedReceiver<String>) {
        let (chatter, rx, _closing) = Chatter::new(user_id, !moderator, moderator);
        hub.register(&chatter);
        (chatter, rx)
    }

    #[test]
    fn join_requires_registration() {
        let hub = Hub::new(4);
        let (chatter, _rx, _closing) = Chatter::new(1, true, false);
        assert_eq!(hub.join(&chatter, "42"), Err(HubError::UnknownChatter));
    }

    #[test]
    fn room_never_exceeds_capacity() {
        let hub = Hub::new(2);
        let (a, _ra) = registered(&hub, 1, false);
        let (b, _rb) = registered(&hub, 2, false);
        let (c, _rc) = registered(&hub, 3, false);

        assert!(hub.join(&a, "42").is_ok());
        assert!(hub.join(&b, "42").is_ok());
        assert_eq!(hub.join(&c, "42"), Err(HubError::RoomFull));
        assert_eq!(hub.room_size("42"), Some(2));
        assert!(!c.in_room("42"));
    }

    #[test]
    fn rejoin_is_a_no_op() {
        let hub = Hub::new(2);
        let (a, _ra) = registered(&hub, 1, false);

        assert!(hub.join(&a, "42").is_ok());
        assert!(hub.join(&a, "42").is_ok());
        assert_eq!(hub.room_size("42"), Some(1));
    }

    #[test]
    fn last_leave_deletes_the_room() {
        let hub = Hub::new(4);
        let (a, _ra) = registered(&hub, 1, false);
        let (b, _rb) = registered(&hub, 2, false);

        hub.join(&a, "42").unwrap();
        hub.join(&b, "42").unwrap();

        hub.leave(&a);
        assert_eq!(hub.room_size("42"), Some(1));

        hub.leave(&b);
        assert_eq!(hub.room_size("42"), None);

        // A fresh join recreates the room empty of history.
        hub.join(&a, "42").unwrap();
        assert_eq!(hub.room_size("42"), Some(1));
    }

    #[test]
    fn leave_and_unregister_are_idempotent() {
        let hub = Hub::new(4);
        let (a, _ra) = registered(&hub, 1, false);
        hub.join(&a, "42").unwrap();

        // Run the cleanup path twice, as both loops would.
        hub.leave(&a);
        hub.unregister(&a);
        hub.leave(&a);
        hub.unregister(&a);

        assert_eq!(hub.chatter_count(), 0);
        assert_eq!(hub.room_size("42"), None);
    }

    #[test]
    fn room_broadcast_skips_the_sender() {
        let hub = Hub::new(4);
        let (a, mut ra) = registered(&hub, 1, false);
        let (b, mut rb) = registered(&hub, 2, false);
        hub.join(&a, "42").unwrap();
        hub.join(&b, "42").unwrap();

        hub.broadcast_room("42", "payload", |peer| peer.conn_id != a.conn_id)
            .unwrap();

        assert_eq!(rb.try_recv().unwrap(), "payload");
        assert!(ra.try_recv().is_err());
    }

    #[test]
    fn broadcast_with_no_recipient_is_no_match() {
        let hub = Hub::new(4);
        let (a, mut ra) = registered(&hub, 1, false);
        hub.join(&a, "42").unwrap();

        let result = hub.broadcast_room("42", "payload", |peer| peer.conn_id != a.conn_id);
        assert_eq!(result, Err(HubError::NoMatch));
        assert!(ra.try_recv().is_err());

        assert_eq!(
            hub.broadcast_room("no-such-room", "payload", |_| true),
            Err(HubError::NoMatch)
        );
    }

    #[test]
    fn global_broadcast_honors_the_predicate() {
        let hub = Hub::new(4);
        let (customer, mut customer_rx) = registered(&hub, 1, false);
        let (moderator, mut moderator_rx) = registered(&hub, 2, true);

        hub.broadcast("payload", |peer| {
            peer.conn_id != customer.conn_id && peer.is_moderator
        })
        .unwrap();

        assert_eq!(moderator_rx.try_recv().unwrap(), "payload");
        assert!(customer_rx.try_recv().is_err());
        drop(moderator);
    }

    #[test]
    fn closed_queue_does_not_count_as_a_match() {
        let hub = Hub::new(4);
        let (a, ra) = registered(&hub, 1, false);
        hub.join(&a, "42").unwrap();
        drop(ra); // Writer loop gone.

        let result = hub.broadcast_room("42", "payload", |_| true);
        assert_eq!(result, Err(HubError::NoMatch));
    }
}
