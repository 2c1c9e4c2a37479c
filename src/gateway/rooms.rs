//! Room identity and the per-room broadcast registry.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::db::UserId;
use crate::gateway::frames::ServerEvent;

/// Canonical name of the conversation between two users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order the pair ascending and join with a separator that cannot occur
/// inside a decimal id, so the mapping is commutative and injective.
pub fn resolve_room(a: UserId, b: UserId) -> RoomId {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    RoomId(format!("chat_{}_{}", low, high))
}

pub type ConnectionId = u64;

struct Member {
    user_id: UserId,
    outbox: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct Room {
    members: Mutex<HashMap<ConnectionId, Member>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const SEQUENCE_STRIPES: usize = 64;

/// Live connections grouped by room.
///
/// The outer map is locked only to find, create or drop a room; fan-out
/// holds just that room's lock. Join and leave take the outer lock first so
/// a room emptied by a leave can never swallow a concurrent join.
///
/// Publishing to a room is serialized through one of a fixed set of async
/// stripes, picked by hashing the room id, so stored order and delivery
/// order agree within a room.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Arc<Room>>>,
    next_connection: AtomicU64,
    stripes: Vec<AsyncMutex<()>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        RoomRegistry {
            rooms: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(0),
            stripes: (0..SEQUENCE_STRIPES).map(|_| AsyncMutex::new(())).collect(),
        }
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the publishing turn of `room`. Store-then-broadcast must
    /// happen while the returned guard is held.
    pub async fn sequence(&self, room: &RoomId) -> AsyncMutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        room.hash(&mut hasher);
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[stripe].lock().await
    }

    /// Register a connection's outbox under `room`. The connection stays
    /// registered until the returned guard is dropped.
    pub fn join(
        self: &Arc<Self>,
        room: RoomId,
        user_id: UserId,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) -> RoomMembership {
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        {
            let mut rooms = lock(&self.rooms);
            let entry = rooms.entry(room.clone()).or_default();
            lock(&entry.members).insert(connection, Member { user_id, outbox });
        }
        tracing::debug!(%room, user_id, connection, "joined room");

        RoomMembership {
            registry: Arc::clone(self),
            room,
            connection,
        }
    }

    fn leave(&self, room: &RoomId, connection: ConnectionId) {
        let mut rooms = lock(&self.rooms);
        let Some(entry) = rooms.get(room) else {
            return;
        };
        let now_empty = {
            let mut members = lock(&entry.members);
            if let Some(member) = members.remove(&connection) {
                tracing::debug!(%room, user_id = member.user_id, connection, "left room");
            }
            members.is_empty()
        };
        if now_empty {
            rooms.remove(room);
        }
    }

    /// Send `event` to every connection currently in `room`, the sender's
    /// own included. Returns how many outboxes accepted it; outboxes whose
    /// connection task is gone are dropped.
    pub fn broadcast(&self, room: &RoomId, event: &ServerEvent) -> usize {
        let Some(entry) = lock(&self.rooms).get(room).cloned() else {
            return 0;
        };

        let mut members = lock(&entry.members);
        let mut delivered = 0;
        members.retain(|connection, member| {
            if member.outbox.send(event.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                tracing::debug!(%room, connection, "dropping closed outbox");
                false
            }
        });
        delivered
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        lock(&self.rooms)
            .get(room)
            .map(|entry| lock(&entry.members).len())
            .unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        lock(&self.rooms).len()
    }
}

/// Registration of one connection in one room; dropping it deregisters,
/// including when the connection task unwinds.
pub struct RoomMembership {
    registry: Arc<RoomRegistry>,
    room: RoomId,
    connection: ConnectionId,
}

impl RoomMembership {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        self.registry.leave(&self.room, self.connection);
    }
}
