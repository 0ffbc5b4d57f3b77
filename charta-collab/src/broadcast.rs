//! Room-based fan-out to N-1 participants.
//!
//! Every diagram gets one broadcast channel. Frames are tagged with the
//! originating user id; each connection's forwarding loop drops frames
//! whose origin matches its own user, which is what enforces the rule
//! that a change never returns to its author.
//!
//! Stats are atomics so the send path never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// One fan-out unit: a pre-encoded frame plus its origin.
#[derive(Debug, Clone)]
pub struct BroadcastFrame {
    /// User id of the originator; receivers with the same user id skip
    /// the frame. `None` frames reach everyone.
    pub origin: Option<String>,
    pub payload: Arc<String>,
}

impl BroadcastFrame {
    pub fn new(origin: Option<String>, payload: impl Into<String>) -> Self {
        Self {
            origin,
            payload: Arc::new(payload.into()),
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub subscribers: usize,
}

struct AtomicBroadcastStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

/// A broadcast group for a single diagram room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<BroadcastFrame>,
    capacity: usize,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` bounds how many frames a lagging subscriber can buffer
    /// before it starts dropping (backpressure).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: Arc::new(AtomicBroadcastStats {
                frames_sent: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe a new receiver for one connection.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastFrame> {
        self.sender.subscribe()
    }

    /// Fan a frame out to all current subscribers. Returns how many
    /// receivers got it (origin filtering happens at each receiver).
    pub fn send(&self, frame: BroadcastFrame) -> usize {
        let delivered = self.sender.send(frame).unwrap_or(0);
        if delivered == 0 {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Maps diagram ids to broadcast groups, isolating rooms from each other.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Get or create the room for a diagram.
    pub async fn get_or_create(&self, diagram_id: &str) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(diagram_id) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(diagram_id) {
            return room.clone();
        }
        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(diagram_id.to_string(), room.clone());
        room
    }

    /// Drop a room once nobody listens to it anymore.
    pub async fn remove_if_empty(&self, diagram_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(diagram_id) {
            if room.subscriber_count() == 0 {
                rooms.remove(diagram_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_diagrams(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
