//! The room registry. One cooperative actor owns the whole table:
//! - [`Hub`]: the cloneable producer side (register / unregister / broadcast)
//! - [`HubTask`]: the event loop that is the only writer of the room map
//!
//! Broadcasts never block on a client. A full outbound channel means that
//! consumer is slow, and the frame is dropped for them alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use protocol::OUTBOUND_BUFFER_SIZE;

use crate::store::Player;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// One connected observer of a game. The handle is shared between the hub,
/// the connection's own loops and the unicast emission paths; the receiver
/// half lives in the connection's writer loop.
#[derive(Clone)]
pub struct ClientHandle {
    pub id: u64,
    pub game_id: String,
    pub player: Player,
    outbound: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    pub fn new(game_id: String, player: Player) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let handle = Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            game_id,
            player,
            outbound,
        };
        (handle, rx)
    }

    /// Unicast to this client only. Used for the initial snapshot and for
    /// error replies; waits for room in the queue rather than dropping.
    pub async fn send(&self, frame: Bytes) {
        let _ = self.outbound.send(frame).await;
    }

    /// Serializes `payload` into an envelope frame and unicasts it.
    pub async fn send_event<T: Serialize>(&self, kind: &str, payload: &T) {
        match protocol::envelope(kind, payload) {
            Ok(frame) => self.send(Bytes::from(frame)).await,
            Err(err) => tracing::error!(?err, kind, "failed to encode unicast frame"),
        }
    }
}

struct RoomMessage {
    game_id: String,
    frame: Bytes,
}

/// Producer side of the hub. Cheap to clone; any task may enqueue.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<ClientHandle>,
    unregister_tx: mpsc::Sender<ClientHandle>,
    broadcast_tx: mpsc::Sender<RoomMessage>,
}

impl Hub {
    pub fn new() -> (Hub, HubTask) {
        let (register_tx, register_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (unregister_tx, unregister_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        (
            Hub {
                register_tx,
                unregister_tx,
                broadcast_tx,
            },
            HubTask {
                register_rx,
                unregister_rx,
                broadcast_rx,
                rooms: HashMap::new(),
            },
        )
    }

    pub async fn register(&self, client: ClientHandle) {
        let _ = self.register_tx.send(client).await;
    }

    pub async fn unregister(&self, client: ClientHandle) {
        let _ = self.unregister_tx.send(client).await;
    }

    /// Queues a raw frame for every client in the game's room.
    pub async fn broadcast(&self, game_id: &str, frame: Bytes) {
        let _ = self
            .broadcast_tx
            .send(RoomMessage {
                game_id: game_id.to_string(),
                frame,
            })
            .await;
    }

    /// Serializes `payload` into an envelope frame and broadcasts it.
    pub async fn publish<T: Serialize>(&self, game_id: &str, kind: &str, payload: &T) {
        match protocol::envelope(kind, payload) {
            Ok(frame) => self.broadcast(game_id, Bytes::from(frame)).await,
            Err(err) => tracing::error!(?err, kind, "failed to encode broadcast frame"),
        }
    }
}

/// The event loop half. Owns the room table; nothing else ever touches it.
pub struct HubTask {
    register_rx: mpsc::Receiver<ClientHandle>,
    unregister_rx: mpsc::Receiver<ClientHandle>,
    broadcast_rx: mpsc::Receiver<RoomMessage>,
    rooms: HashMap<String, HashMap<u64, mpsc::Sender<Bytes>>>,
}

impl HubTask {
    /// Serves commands until every producer handle is gone. Registrations
    /// win ties so that a client queued before a broadcast is part of it.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(client) = self.register_rx.recv() => self.register(client),
                Some(client) = self.unregister_rx.recv() => self.unregister(&client),
                Some(msg) = self.broadcast_rx.recv() => self.broadcast(msg),
                else => break,
            }
        }
    }

    fn register(&mut self, client: ClientHandle) {
        self.rooms
            .entry(client.game_id.clone())
            .or_default()
            .insert(client.id, client.outbound);
    }

    fn unregister(&mut self, client: &ClientHandle) {
        let Some(room) = self.rooms.get_mut(&client.game_id) else {
            return;
        };
        // Dropping the stored sender is the hub's half of closing the
        // outbound channel; it happens at most once per client.
        room.remove(&client.id);
        if room.is_empty() {
            self.rooms.remove(&client.game_id);
        }
    }

    fn broadcast(&mut self, msg: RoomMessage) {
        let Some(room) = self.rooms.get(&msg.game_id) else {
            return;
        };
        for (client_id, outbound) in room {
            match outbound.try_send(msg.frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(client_id, game_id = %msg.game_id, "slow consumer, frame dropped");
                }
                // The client is unwinding; unregister will catch up.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}
