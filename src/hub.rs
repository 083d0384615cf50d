use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use log::{debug, warn};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

use crate::bus::{Bus, room_channel};
use crate::connection::Connection;
use crate::metrics::Metrics;
use crate::models::{RoomEvent, RoomEventKind};

/// Membership mutations flow through one bounded FIFO channel with a
/// single consumer. Keeping register and unregister on the same channel
/// makes a room switch (unregister old, register new) observe in exactly
/// that order.
enum HubCommand {
    Register {
        conn: Arc<Connection>,
        room_id: i64,
    },
    Unregister {
        conn: Arc<Connection>,
        room_id: i64,
    },
}

/// Per-instance registry of local connections by room, plus the two
/// long-running loops: the control loop (serial consumer of
/// register/unregister) and the bus subscriber loop (decodes RoomEvents
/// and fans them out locally).
pub struct Hub {
    rooms: RwLock<HashMap<i64, HashMap<u64, Arc<Connection>>>>,
    control_tx: mpsc::Sender<HubCommand>,
    control_rx: AsyncMutex<Option<mpsc::Receiver<HubCommand>>>,
    bus: Arc<dyn Bus>,
    metrics: Arc<Metrics>,
    shutdown: watch::Sender<bool>,
}

impl Hub {
    pub fn new(bus: Arc<dyn Bus>, metrics: Arc<Metrics>, reg_cap: usize) -> Arc<Self> {
        let (control_tx, control_rx) = mpsc::channel(reg_cap);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Hub {
            rooms: RwLock::new(HashMap::new()),
            control_tx,
            control_rx: AsyncMutex::new(Some(control_rx)),
            bus,
            metrics,
            shutdown,
        })
    }

    /// Spawn the control loop and the bus subscriber loop.
    pub fn start(self: &Arc<Self>) {
        let hub = self.clone();
        tokio::spawn(async move { hub.run_control_loop().await });
        let hub = self.clone();
        tokio::spawn(async move { hub.run_bus_loop().await });
    }

    /// Enqueue a registration. Blocks only when the control channel is at
    /// capacity; callers are individual reader tasks, so that is the
    /// intended backpressure.
    pub async fn register(&self, conn: Arc<Connection>, room_id: i64) {
        let _ = self
            .control_tx
            .send(HubCommand::Register { conn, room_id })
            .await;
    }

    pub async fn unregister(&self, conn: Arc<Connection>, room_id: i64) {
        let _ = self
            .control_tx
            .send(HubCommand::Unregister { conn, room_id })
            .await;
    }

    /// Serial consumer of membership mutations.
    pub async fn run_control_loop(self: Arc<Self>) {
        let Some(mut rx) = self.control_rx.lock().await.take() else {
            return;
        };
        self.metrics.spawned_tasks.inc();
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(HubCommand::Register { conn, room_id }) => self.apply_register(conn, room_id),
                    Some(HubCommand::Unregister { conn, room_id }) => self.apply_unregister(conn, room_id),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        self.metrics.spawned_tasks.dec();
    }

    /// Wildcard bus subscription: every RoomEvent published anywhere in
    /// the cluster (including by this instance) arrives here and is
    /// delivered to local members. This is the only delivery path.
    pub async fn run_bus_loop(self: Arc<Self>) {
        let mut stream = self.bus.subscribe_pattern("room:*");
        self.metrics.spawned_tasks.inc();
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                msg = stream.recv() => match msg {
                    Some(msg) => match RoomEvent::decode(&msg.payload) {
                        Ok(event) => self.fan_out(&event),
                        Err(e) => warn!("undecodable bus payload on {}: {e}", msg.channel),
                    },
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        self.metrics.spawned_tasks.dec();
    }

    fn apply_register(&self, conn: Arc<Connection>, room_id: i64) {
        let (room_size, room_count) = {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            let members = rooms.entry(room_id).or_default();
            members.insert(conn.id(), conn.clone());
            (members.len(), rooms.len())
        };
        self.metrics.room_joins_total.inc();
        self.metrics.users_per_room.observe(room_size as f64);
        self.metrics.active_rooms.set(room_count as i64);
        debug!(
            "conn {} joined room {room_id} ({room_size} local members)",
            conn.id()
        );

        let event = RoomEvent::presence(
            RoomEventKind::UserJoined,
            room_id,
            conn.user_id(),
            &conn.username(),
        );
        if let Err(e) = self.bus.publish(&room_channel(room_id), event.encode()) {
            warn!("failed to publish user_joined for room {room_id}: {e}");
        }
    }

    fn apply_unregister(&self, conn: Arc<Connection>, room_id: i64) {
        let removed = {
            let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
            let Some(members) = rooms.get_mut(&room_id) else {
                return;
            };
            let removed = members.remove(&conn.id()).is_some();
            if members.is_empty() {
                rooms.remove(&room_id);
            }
            removed
        };
        // A soft-evicted connection unregisters twice (fan-out and reader
        // exit); only the first removal emits presence and metrics.
        if !removed {
            return;
        }

        let room_count = self.rooms.read().unwrap_or_else(|e| e.into_inner()).len();
        self.metrics.room_leaves_total.inc();
        self.metrics.active_rooms.set(room_count as i64);
        debug!("conn {} left room {room_id}", conn.id());

        let event = RoomEvent::presence(
            RoomEventKind::UserLeft,
            room_id,
            conn.user_id(),
            &conn.username(),
        );
        if let Err(e) = self.bus.publish(&room_channel(room_id), event.encode()) {
            warn!("failed to publish user_left for room {room_id}: {e}");
        }
    }

    /// Deliver one event to every local member of its room. The member
    /// set is copied under the read lock; sends happen outside it, each a
    /// single non-blocking enqueue, so one stuck peer cannot delay the
    /// rest and successive events reach each peer in bus order. A full
    /// queue counts as a drop and soft-evicts the peer.
    pub fn fan_out(&self, event: &RoomEvent) {
        let started = Instant::now();
        let members: Vec<Arc<Connection>> = {
            let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
            match rooms.get(&event.room_id) {
                Some(members) => members.values().cloned().collect(),
                None => return,
            }
        };

        let frame = event.to_frame().encode();
        for conn in members {
            if conn.try_send(frame.clone()) {
                continue;
            }
            self.metrics.dropped_messages_total.inc();
            warn!(
                "dropping frame for conn {} (queue full or closed), evicting",
                conn.id()
            );
            conn.close();
            let _ = self.control_tx.try_send(HubCommand::Unregister {
                conn,
                room_id: event.room_id,
            });
        }

        self.metrics
            .broadcast_duration_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Stop both loops and close every local connection. Each writer
    /// drains its queue, sends a Close frame, and exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        for members in rooms.values() {
            for conn in members.values() {
                conn.close();
            }
        }
    }

    // --- Introspection (health endpoint and tests) ---

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn member_count(&self, room_id: i64) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&room_id)
            .map_or(0, |m| m.len())
    }

    pub fn contains(&self, room_id: i64, conn_id: u64) -> bool {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&room_id)
            .is_some_and(|m| m.contains_key(&conn_id))
    }

    /// Rooms that contain a given connection. The single-room invariant
    /// says this has at most one element.
    pub fn rooms_of(&self, conn_id: u64) -> Vec<i64> {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, members)| members.contains_key(&conn_id))
            .map(|(room_id, _)| *room_id)
            .collect()
    }
}
