use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;
use tokio::time::timeout;

use crate::admission::{AccessError, Admission};
use crate::auth::TokenValidator;
use crate::bus::{Bus, room_channel};
use crate::connection::Connection;
use crate::hub::Hub;
use crate::metrics::Metrics;
use crate::models::{ClientFrame, NewMessage, RoomEvent, ServerFrame};
use crate::store::MessageStore;

/// What the reader loop should do after a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// Outcome of a collaborator call bounded by the dependency deadline.
/// A timeout is transient: the client gets an `error` frame and the
/// connection stays up. A panic inside the call is internal: the owning
/// connection is terminated.
enum CallOutcome<T> {
    Done(T),
    TimedOut,
    Panicked,
}

/// Routes inbound frames through the per-connection state machine:
///
/// ```text
/// NEW --auth--> AUTHENTICATED --join_room--> IN_ROOM
/// ```
///
/// The state lives on the Connection itself (`user_id`, `room_id`); the
/// dispatcher is stateless and shared by every reader task.
pub struct Dispatcher {
    validator: Arc<dyn TokenValidator>,
    admission: Admission,
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn Bus>,
    hub: Arc<Hub>,
    metrics: Arc<Metrics>,
    rpc_deadline: Duration,
}

impl Dispatcher {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        admission: Admission,
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn Bus>,
        hub: Arc<Hub>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Dispatcher {
            validator,
            admission,
            store,
            bus,
            hub,
            metrics,
            rpc_deadline: Duration::from_secs(5),
        }
    }

    /// Override the 5 s collaborator deadline.
    pub fn with_rpc_deadline(mut self, deadline: Duration) -> Self {
        self.rpc_deadline = deadline;
        self
    }

    /// Run a blocking collaborator call (store, directory, bus) off the
    /// reader task, bounded by the dependency deadline. A hung backend
    /// costs the caller at most one deadline, not an unbounded wait.
    async fn call_blocking<T, F>(&self, f: F) -> CallOutcome<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match timeout(self.rpc_deadline, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(value)) => CallOutcome::Done(value),
            Ok(Err(e)) => {
                warn!("collaborator call panicked: {e}");
                CallOutcome::Panicked
            }
            Err(_) => CallOutcome::TimedOut,
        }
    }

    /// Handle one inbound text frame. Called only from the connection's
    /// reader task, which is the sole mutator of session state.
    pub async fn handle(&self, conn: &Arc<Connection>, raw: &str) -> Flow {
        self.metrics.messages_received_total.inc();

        let frame = match ClientFrame::decode(raw) {
            Ok(frame) => frame,
            Err(_) => {
                self.reply(conn, &ServerFrame::error("Invalid frame"));
                return Flow::Continue;
            }
        };

        match frame {
            ClientFrame::Auth { token } => self.handle_auth(conn, &token).await,
            ClientFrame::JoinRoom { room_id } => self.handle_join(conn, room_id).await,
            ClientFrame::SendMessage {
                content,
                message_type,
                file_url,
                file_name,
                file_size,
                mime_type,
            } => {
                self.handle_send(
                    conn,
                    NewMessage {
                        room_id: conn.room_id(),
                        user_id: conn.user_id(),
                        username: conn.username(),
                        content: content.trim().to_string(),
                        message_type,
                        file_url,
                        file_name,
                        file_size,
                        mime_type,
                    },
                )
                .await
            }
            ClientFrame::LeaveRoom => self.handle_leave(conn).await,
            ClientFrame::Ping => {
                self.reply(conn, &ServerFrame::Pong);
                Flow::Continue
            }
        }
    }

    /// Auth is one-shot: a failed validation terminates the connection.
    /// A validator timeout is transient, so the (still unauthenticated)
    /// client may retry.
    async fn handle_auth(&self, conn: &Arc<Connection>, token: &str) -> Flow {
        if conn.user_id() != 0 {
            self.reply(conn, &ServerFrame::error("Already authenticated"));
            return Flow::Continue;
        }

        let kind = self.validator.kind();
        match timeout(self.rpc_deadline, self.validator.validate(token)).await {
            Ok(Ok(identity)) => {
                conn.set_identity(identity.user_id, &identity.username);
                self.metrics
                    .auth_requests_total
                    .with_label_values(&[kind, "success"])
                    .inc();
                self.reply(conn, &ServerFrame::success("Authenticated successfully"));
                Flow::Continue
            }
            Ok(Err(e)) => {
                self.metrics
                    .auth_requests_total
                    .with_label_values(&[kind, "failure"])
                    .inc();
                warn!("auth failed for conn {}: {e}", conn.id());
                self.reply(conn, &ServerFrame::error("Invalid token"));
                Flow::Terminate
            }
            Err(_) => {
                self.metrics
                    .auth_requests_total
                    .with_label_values(&[kind, "timeout"])
                    .inc();
                self.reply(conn, &ServerFrame::error("Authentication timed out"));
                Flow::Continue
            }
        }
    }

    async fn handle_join(&self, conn: &Arc<Connection>, room_id: i64) -> Flow {
        let user_id = conn.user_id();
        if user_id == 0 {
            self.reply(conn, &ServerFrame::error("Please authenticate first"));
            return Flow::Continue;
        }

        let admission = self.admission.clone();
        let room = match self
            .call_blocking(move || admission.check(user_id, room_id))
            .await
        {
            CallOutcome::Done(Ok(room)) => room,
            CallOutcome::Done(Err(e)) => {
                self.reply(conn, &ServerFrame::error(access_message(&e)));
                return Flow::Continue;
            }
            CallOutcome::TimedOut => {
                warn!("room directory timed out (room {room_id}, user {user_id})");
                self.reply(conn, &ServerFrame::error("Room directory timed out"));
                return Flow::Continue;
            }
            CallOutcome::Panicked => {
                self.reply(conn, &ServerFrame::error("Internal error"));
                return Flow::Terminate;
            }
        };

        let old_room = conn.room_id();
        if old_room == room_id {
            // re-joining the current room is a no-op for the hub
            self.reply(conn, &ServerFrame::RoomJoined { room_id, room });
            return Flow::Continue;
        }

        // The old room's unregister is enqueued before the new register on
        // the same FIFO control channel, so no event for the old room can
        // reach this connection after the switch is acknowledged.
        if old_room != 0 {
            self.hub.unregister(conn.clone(), old_room).await;
        }
        conn.set_room_id(room_id);
        self.hub.register(conn.clone(), room_id).await;
        self.reply(conn, &ServerFrame::RoomJoined { room_id, room });
        Flow::Continue
    }

    async fn handle_send(&self, conn: &Arc<Connection>, new: NewMessage) -> Flow {
        if new.user_id == 0 || new.room_id == 0 {
            self.reply(conn, &ServerFrame::error("Please join a room first"));
            return Flow::Continue;
        }

        if let Err(message) = new.validate() {
            self.reply(conn, &ServerFrame::error(message));
            return Flow::Continue;
        }

        // Membership is re-verified on every send so a revocation takes
        // effect immediately, not at the next join.
        let admission = self.admission.clone();
        let (user_id, room_id) = (new.user_id, new.room_id);
        let room = match self
            .call_blocking(move || admission.check(user_id, room_id))
            .await
        {
            CallOutcome::Done(Ok(room)) => room,
            CallOutcome::Done(Err(e)) => {
                self.reply(conn, &ServerFrame::error(access_message(&e)));
                return Flow::Continue;
            }
            CallOutcome::TimedOut => {
                warn!("room directory timed out (room {room_id}, user {user_id})");
                self.reply(conn, &ServerFrame::error("Room directory timed out"));
                return Flow::Continue;
            }
            CallOutcome::Panicked => {
                self.reply(conn, &ServerFrame::error("Internal error"));
                return Flow::Terminate;
            }
        };

        let started = Instant::now();
        let store = self.store.clone();
        let record = new.clone();
        let message = match self.call_blocking(move || store.append(&record)).await {
            CallOutcome::Done(Ok(message)) => message,
            CallOutcome::Done(Err(e)) => {
                warn!(
                    "message append failed (room {}, user {}): {e}",
                    new.room_id, new.user_id
                );
                self.reply(conn, &ServerFrame::error("Failed to store message"));
                return Flow::Continue;
            }
            CallOutcome::TimedOut => {
                warn!(
                    "message store timed out (room {}, user {})",
                    new.room_id, new.user_id
                );
                self.reply(conn, &ServerFrame::error("Message store timed out"));
                return Flow::Continue;
            }
            CallOutcome::Panicked => {
                self.reply(conn, &ServerFrame::error("Internal error"));
                return Flow::Terminate;
            }
        };

        // Published to the bus only; the subscriber loop delivers it back
        // to every local member including the sender, so one code path
        // serves all instances.
        let event = RoomEvent::message(&message);
        let bus = self.bus.clone();
        let channel = room_channel(message.room_id);
        let payload = event.encode();
        match self.call_blocking(move || bus.publish(&channel, payload)).await {
            CallOutcome::Done(Ok(())) => {}
            CallOutcome::Done(Err(e)) => {
                warn!(
                    "bus publish failed (room {}, user {}): {e}",
                    message.room_id, message.user_id
                );
                self.reply(conn, &ServerFrame::error("Failed to deliver message"));
                return Flow::Continue;
            }
            CallOutcome::TimedOut => {
                warn!(
                    "bus publish timed out (room {}, user {})",
                    message.room_id, message.user_id
                );
                self.reply(conn, &ServerFrame::error("Message delivery timed out"));
                return Flow::Continue;
            }
            CallOutcome::Panicked => {
                self.reply(conn, &ServerFrame::error("Internal error"));
                return Flow::Terminate;
            }
        }

        self.metrics
            .messages_sent_total
            .with_label_values(&[room.room_type.as_str()])
            .inc();
        self.metrics
            .message_latency_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        Flow::Continue
    }

    async fn handle_leave(&self, conn: &Arc<Connection>) -> Flow {
        let room_id = conn.room_id();
        if room_id == 0 {
            self.reply(conn, &ServerFrame::error("Not in a room"));
            return Flow::Continue;
        }
        self.hub.unregister(conn.clone(), room_id).await;
        conn.set_room_id(0);
        self.reply(conn, &ServerFrame::success("Left room"));
        Flow::Continue
    }

    fn reply(&self, conn: &Connection, frame: &ServerFrame) {
        if !conn.send_frame(frame) {
            self.metrics.dropped_messages_total.inc();
        }
    }
}

fn access_message(e: &AccessError) -> &'static str {
    match e {
        AccessError::RoomNotFound => "Room not found",
        AccessError::NotMember => "You are not a member of this room",
        AccessError::Directory(_) => "Room directory unavailable",
    }
}
