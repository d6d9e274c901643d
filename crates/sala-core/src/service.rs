//! The chat coordinator.
//!
//! [`ChatService`] owns the registry, directory, history, and reconnection
//! tracker, and drives the cross-cutting join/leave/broadcast sequencing on
//! top of a [`RoomDelivery`](crate::delivery::RoomDelivery) implementation.
//!
//! Handlers for one room are serialized through a per-room async mutex;
//! handlers for different rooms run fully in parallel. Malformed or
//! out-of-order events are dropped without touching other rooms: the only
//! error ever surfaced to a client is the room-no-longer-exists rejection
//! on join.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::delivery::RoomDelivery;
use crate::directory::{participant_key, ParticipantDirectory};
use crate::history::MessageHistoryStore;
use crate::reconnect::{ReconnectionTracker, EXPIRY_SLACK, RECONNECTION_WINDOW};
use crate::registry::RoomRegistry;
use crate::time::now_millis;
use crate::typing::ConnContext;
use sala_protocol::{ClientEvent, MessageStatus, ServerEvent, STATUS_ACTIVE};

/// Default delay before a typing indicator clears itself.
pub const TYPING_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Grace window during which a disconnect is presumed transient.
    pub reconnection_window: Duration,
    /// Extra time a reconnection record lives beyond the window.
    pub reconnection_expiry_slack: Duration,
    /// Delay before a typing indicator clears itself.
    pub typing_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            reconnection_window: RECONNECTION_WINDOW,
            reconnection_expiry_slack: EXPIRY_SLACK,
            typing_timeout: TYPING_TIMEOUT,
        }
    }
}

/// Coordinator statistics.
#[derive(Debug, Clone)]
pub struct ServiceStats {
    /// Number of open rooms.
    pub room_count: usize,
    /// Total live members across rooms.
    pub member_count: usize,
    /// Outstanding reconnection records.
    pub pending_reconnects: usize,
}

/// The presence, membership, and history-replay coordinator.
pub struct ChatService {
    registry: RoomRegistry,
    directory: ParticipantDirectory,
    history: MessageHistoryStore,
    reconnect: ReconnectionTracker,
    /// Per-room handler serialization. Entries are retained so a reused
    /// room code reuses its lock.
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: ChatConfig,
    delivery: Arc<dyn RoomDelivery>,
}

impl ChatService {
    /// Create a coordinator with default configuration.
    #[must_use]
    pub fn new(delivery: Arc<dyn RoomDelivery>) -> Self {
        Self::with_config(ChatConfig::default(), delivery)
    }

    /// Create a coordinator with custom configuration.
    #[must_use]
    pub fn with_config(config: ChatConfig, delivery: Arc<dyn RoomDelivery>) -> Self {
        info!("Creating chat service with config: {:?}", config);
        Self {
            registry: RoomRegistry::new(),
            directory: ParticipantDirectory::new(),
            history: MessageHistoryStore::new(),
            reconnect: ReconnectionTracker::new(
                config.reconnection_window,
                config.reconnection_expiry_slack,
            ),
            locks: DashMap::new(),
            config,
            delivery,
        }
    }

    /// Get coordinator statistics.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            room_count: self.registry.room_count(),
            member_count: self.registry.total_members(),
            pending_reconnects: self.reconnect.len(),
        }
    }

    fn room_lock(&self, code: &str) -> Arc<Mutex<()>> {
        self.locks.entry(code.to_string()).or_default().clone()
    }

    /// Dispatch an inbound event to its handler.
    pub async fn handle_event(self: &Arc<Self>, ctx: &mut ConnContext, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom {
                room_code,
                user_name,
                display_name,
            } => {
                self.handle_join(ctx, room_code, user_name, display_name)
                    .await;
            }
            ClientEvent::SendMessage {
                room_code,
                user_name,
                display_name,
                message,
            } => {
                self.handle_send_message(ctx, &room_code, &user_name, display_name, &message)
                    .await;
            }
            ClientEvent::LeaveRoom {
                room_code,
                user_name,
                display_name,
            } => {
                self.handle_leave(ctx, &room_code, &user_name, display_name)
                    .await;
            }
            ClientEvent::Typing {
                room_code,
                user_name,
                display_name,
            } => {
                self.handle_typing(ctx, &room_code, &user_name, display_name)
                    .await;
            }
            ClientEvent::StopTyping {
                room_code,
                user_name,
                display_name,
            } => {
                self.handle_stop_typing(ctx, &room_code, &user_name, display_name)
                    .await;
            }
            ClientEvent::UpdateStatus {
                room_code,
                user_name,
                display_name,
                status,
            } => {
                self.handle_update_status(ctx, &room_code, &user_name, display_name, status)
                    .await;
            }
        }
    }

    /// Handle a join: room lifecycle checks, reconnection detection, the
    /// join notification, the presence broadcast, and the targeted replay.
    pub async fn handle_join(
        self: &Arc<Self>,
        ctx: &mut ConnContext,
        room_code: String,
        user_name: String,
        display_name: Option<String>,
    ) {
        let display_name =
            sala_protocol::resolve_display_name(&user_name, display_name.as_deref());

        // A connection moving rooms is detached from the previous one
        // first; the previous room's lock is released before the target
        // room's is taken, so two movers can never hold both.
        if let Some(prev) = ctx.current_room.clone() {
            if prev != room_code {
                self.detach_from_room(ctx, &prev, &display_name).await;
            }
        }

        let lock = self.room_lock(&room_code);
        let _guard = lock.lock().await;

        // A code with a ghost directory but no open room has been claimed
        // and closed; it cannot be silently recreated by a second claimant.
        let room_exists = self.registry.contains(&room_code);
        if !room_exists && self.directory.has_room(&room_code) {
            warn!(room = %room_code, user = %display_name, "Join rejected: room closed");
            self.delivery
                .send_to_one(
                    &ctx.conn,
                    ServerEvent::Error {
                        message: format!("La sala {room_code} ya no existe o ha sido cerrada."),
                    },
                )
                .await;
            return;
        }

        let reconnecting = self
            .reconnect
            .take_recent(&participant_key(&display_name, &room_code));

        self.delivery.join_group(&ctx.conn, &room_code).await;

        if !room_exists {
            if let Err(e) = self.registry.create(room_code.clone()) {
                warn!(room = %room_code, error = %e, "Room creation raced");
            }
        }
        self.directory.ensure_room(&room_code);
        self.history.ensure_room(&room_code);

        let now = now_millis();
        let Some(outcome) = self.registry.with_room(&room_code, |room| {
            self.directory
                .join(room, &room_code, &display_name, ctx.conn.clone(), now)
        }) else {
            return;
        };

        ctx.current_room = Some(room_code.clone());
        ctx.current_user = Some(user_name);
        ctx.display_name = Some(display_name.clone());

        debug!(
            room = %room_code,
            user = %display_name,
            new = outcome.is_new_user,
            reconnecting,
            "User joined"
        );

        if (outcome.is_new_user && !reconnecting) || outcome.had_left_voluntarily {
            let content = format!("{display_name} ha ingresado a la sala.");
            let timestamp = self.history.notification(&room_code, content.clone());
            self.delivery
                .broadcast_to_room(
                    &room_code,
                    ServerEvent::Message {
                        room_code: room_code.clone(),
                        id: None,
                        sender: None,
                        timestamp,
                        status: None,
                        message: content,
                    },
                )
                .await;
        }

        self.broadcast_user_list(&room_code).await;

        // Replay goes to the joining connection only, bounded by the stable
        // join cursor. A join that created the cursor starts fresh.
        if !outcome.first_time {
            let messages = self.history.replay_since(&room_code, outcome.joined_at);
            if !messages.is_empty() {
                self.delivery
                    .send_to_one(
                        &ctx.conn,
                        ServerEvent::MessageHistory {
                            room_code: room_code.clone(),
                            messages,
                        },
                    )
                    .await;
            }
        }
    }

    /// Handle a chat message from a connection's current room.
    pub async fn handle_send_message(
        &self,
        ctx: &mut ConnContext,
        room_code: &str,
        user_name: &str,
        display_name: Option<String>,
        message: &str,
    ) {
        if !ctx.is_tracked() || ctx.current_room.as_deref() != Some(room_code) {
            debug!(room = %room_code, "Dropping sendMessage from untracked connection");
            return;
        }
        let sender = sala_protocol::resolve_display_name(user_name, display_name.as_deref());

        let lock = self.room_lock(room_code);
        let _guard = lock.lock().await;

        if !self.registry.contains(room_code) {
            debug!(room = %room_code, "Dropping sendMessage for missing room");
            return;
        }

        let now = now_millis();
        ctx.typing_timer.disarm();
        // Sending implies the sender stopped typing.
        let sender_is_live = self
            .registry
            .with_room(room_code, |room| {
                self.directory
                    .set_status(room, room_code, &sender, STATUS_ACTIVE, now);
                self.directory.set_typing(room, &sender, false, now)
            })
            .unwrap_or(false);

        if sender_is_live {
            self.delivery
                .broadcast_to_room(
                    room_code,
                    ServerEvent::TypingStatus {
                        room_code: room_code.to_string(),
                        user_name: sender.clone(),
                        is_typing: false,
                    },
                )
                .await;
        }

        let appended = self.history.chat_message(room_code, &sender, message);
        self.delivery
            .broadcast_to_room(
                room_code,
                ServerEvent::Message {
                    room_code: room_code.to_string(),
                    id: Some(appended.id),
                    sender: Some(sender),
                    timestamp: appended.timestamp,
                    status: Some(MessageStatus::Delivered),
                    message: appended.formatted,
                },
            )
            .await;
    }

    /// Handle a voluntary leave.
    pub async fn handle_leave(
        &self,
        ctx: &mut ConnContext,
        room_code: &str,
        user_name: &str,
        display_name: Option<String>,
    ) {
        let display_name = sala_protocol::resolve_display_name(user_name, display_name.as_deref());

        self.delivery.leave_group(&ctx.conn, room_code).await;

        let lock = self.room_lock(room_code);
        let _guard = lock.lock().await;

        if self.registry.contains(room_code) {
            let removed = self
                .registry
                .with_room(room_code, |room| {
                    self.directory.leave_voluntarily(room, room_code, &display_name)
                })
                .unwrap_or(false);

            if removed {
                let content = format!("{display_name} ha abandonado la sala.");
                let timestamp = self.history.notification(room_code, content.clone());
                self.delivery
                    .broadcast_to_room(
                        room_code,
                        ServerEvent::Message {
                            room_code: room_code.to_string(),
                            id: None,
                            sender: None,
                            timestamp,
                            status: None,
                            message: content,
                        },
                    )
                    .await;
                self.broadcast_user_list(room_code).await;
                self.destroy_if_empty(room_code);
            }
        }

        if ctx.current_room.as_deref() == Some(room_code) {
            ctx.current_room = None;
            ctx.current_user = None;
        }
    }

    /// Handle a typing start: flag, broadcast, and arm the auto-clear.
    pub async fn handle_typing(
        self: &Arc<Self>,
        ctx: &mut ConnContext,
        room_code: &str,
        user_name: &str,
        display_name: Option<String>,
    ) {
        if !ctx.is_tracked() {
            return;
        }
        let display_name = sala_protocol::resolve_display_name(user_name, display_name.as_deref());

        let lock = self.room_lock(room_code);
        let _guard = lock.lock().await;

        let now = now_millis();
        let is_live = self
            .registry
            .with_room(room_code, |room| {
                self.directory.set_typing(room, &display_name, true, now)
            })
            .unwrap_or(false);
        if !is_live {
            return;
        }

        let service = Arc::clone(self);
        let code = room_code.to_string();
        let name = display_name.clone();
        let timeout = self.config.typing_timeout;
        ctx.typing_timer.arm(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            service.clear_typing_after_timeout(&code, &name).await;
        }));

        self.delivery
            .broadcast_to_room(
                room_code,
                ServerEvent::TypingStatus {
                    room_code: room_code.to_string(),
                    user_name: display_name,
                    is_typing: true,
                },
            )
            .await;
    }

    /// Handle an explicit typing stop.
    pub async fn handle_stop_typing(
        &self,
        ctx: &mut ConnContext,
        room_code: &str,
        user_name: &str,
        display_name: Option<String>,
    ) {
        if !ctx.is_tracked() {
            return;
        }
        let display_name = sala_protocol::resolve_display_name(user_name, display_name.as_deref());

        let lock = self.room_lock(room_code);
        let _guard = lock.lock().await;

        let now = now_millis();
        let is_live = self
            .registry
            .with_room(room_code, |room| {
                self.directory.set_typing(room, &display_name, false, now)
            })
            .unwrap_or(false);
        if !is_live {
            return;
        }

        ctx.typing_timer.disarm();
        self.delivery
            .broadcast_to_room(
                room_code,
                ServerEvent::TypingStatus {
                    room_code: room_code.to_string(),
                    user_name: display_name,
                    is_typing: false,
                },
            )
            .await;
    }

    /// Handle a presence status update.
    pub async fn handle_update_status(
        &self,
        ctx: &mut ConnContext,
        room_code: &str,
        user_name: &str,
        display_name: Option<String>,
        status: Option<String>,
    ) {
        if !ctx.is_tracked() {
            return;
        }
        let display_name = sala_protocol::resolve_display_name(user_name, display_name.as_deref());
        let status = status.unwrap_or_else(|| STATUS_ACTIVE.to_string());

        let lock = self.room_lock(room_code);
        let _guard = lock.lock().await;

        let now = now_millis();
        self.registry.with_room(room_code, |room| {
            self.directory
                .set_status(room, room_code, &display_name, &status, now);
        });
        self.broadcast_user_list(room_code).await;
    }

    /// Handle an involuntary disconnect of a connection.
    pub async fn handle_disconnect(&self, ctx: &mut ConnContext) {
        ctx.typing_timer.disarm();

        let (Some(room_code), Some(user_name)) =
            (ctx.current_room.clone(), ctx.current_user.clone())
        else {
            return;
        };
        let display_name = ctx
            .display_name
            .clone()
            .unwrap_or_else(|| sala_protocol::resolve_display_name(&user_name, None));

        self.reconnect
            .record_disconnect(participant_key(&display_name, &room_code));

        let lock = self.room_lock(&room_code);
        let _guard = lock.lock().await;

        if self.registry.contains(&room_code) {
            let now = now_millis();
            let was_live = self
                .registry
                .with_room(&room_code, |room| {
                    self.directory
                        .mark_disconnected(room, &room_code, &display_name, now)
                })
                .unwrap_or(false);

            if was_live {
                self.broadcast_user_list(&room_code).await;
                self.destroy_if_empty(&room_code);
            }
        }
    }

    /// Detach a connection from a room it is moving away from: the user is
    /// marked disconnected there, not removed, and no departure
    /// notification is emitted.
    async fn detach_from_room(&self, ctx: &mut ConnContext, room_code: &str, display_name: &str) {
        self.delivery.leave_group(&ctx.conn, room_code).await;

        let lock = self.room_lock(room_code);
        let _guard = lock.lock().await;

        let now = now_millis();
        let was_live = self
            .registry
            .with_room(room_code, |room| {
                self.directory
                    .mark_disconnected(room, room_code, display_name, now)
            })
            .unwrap_or(false);

        if was_live {
            self.broadcast_user_list(room_code).await;
        }

        ctx.current_room = None;
        ctx.current_user = None;
    }

    /// The fired end of a typing auto-clear timer. Finding the flag already
    /// cleared means the timer was superseded; that is a no-op.
    async fn clear_typing_after_timeout(&self, room_code: &str, display_name: &str) {
        let lock = self.room_lock(room_code);
        let _guard = lock.lock().await;

        let cleared = self
            .registry
            .with_room(room_code, |room| match room.member_mut(display_name) {
                Some(member) if member.typing => {
                    member.typing = false;
                    true
                }
                _ => false,
            })
            .unwrap_or(false);

        if cleared {
            self.delivery
                .broadcast_to_room(
                    room_code,
                    ServerEvent::TypingStatus {
                        room_code: room_code.to_string(),
                        user_name: display_name.to_string(),
                        is_typing: false,
                    },
                )
                .await;
        }
    }

    /// Broadcast the room's presence listing.
    async fn broadcast_user_list(&self, room_code: &str) {
        let Some((count, active_count, users)) = self.registry.with_room(room_code, |room| {
            let (users, connected) = self.directory.list_presence(room, room_code);
            (room.member_count(), connected, users)
        }) else {
            return;
        };

        self.delivery
            .broadcast_to_room(
                room_code,
                ServerEvent::UserList {
                    room_code: room_code.to_string(),
                    count,
                    active_count,
                    users,
                },
            )
            .await;
    }

    /// Destroy a room once it has neither live members nor history.
    ///
    /// A room with zero live members but a non-empty history is retained so
    /// replay continuity survives for future joiners.
    fn destroy_if_empty(&self, room_code: &str) {
        let live_empty = self
            .registry
            .with_room(room_code, |room| room.is_empty())
            .unwrap_or(false);
        if !live_empty {
            return;
        }

        if self.history.is_empty(room_code) {
            self.registry.remove(room_code);
            self.history.remove_room(room_code);
            self.directory.remove_room(room_code);
            info!(room = %room_code, "Room destroyed: no users and no history");
        } else {
            debug!(
                room = %room_code,
                entries = self.history.len(room_code),
                "Room retained with history"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ConnectionId;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CapturingDelivery {
        sent: StdMutex<Vec<ServerEvent>>,
    }

    #[async_trait]
    impl RoomDelivery for CapturingDelivery {
        async fn join_group(&self, _conn: &ConnectionId, _room_code: &str) {}

        async fn leave_group(&self, _conn: &ConnectionId, _room_code: &str) {}

        async fn send_to_one(&self, _conn: &ConnectionId, event: ServerEvent) {
            self.sent.lock().unwrap().push(event);
        }

        async fn broadcast_to_room(&self, _room_code: &str, event: ServerEvent) {
            self.sent.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn test_join_rejected_for_closed_room() {
        let delivery = Arc::new(CapturingDelivery::default());
        let service = Arc::new(ChatService::new(delivery.clone()));

        // A ghost directory without a registry entry is a claimed and
        // closed code.
        service.directory.ensure_room("GONE");

        let mut ctx = ConnContext::new(ConnectionId::new("c1"));
        service
            .handle_join(&mut ctx, "GONE".to_string(), "alice".to_string(), None)
            .await;

        assert!(!ctx.is_tracked());
        let sent = delivery.sent.lock().unwrap();
        assert!(matches!(
            &sent[..],
            [ServerEvent::Error { message }]
                if message.as_str() == "La sala GONE ya no existe o ha sido cerrada."
        ));
    }

    #[tokio::test]
    async fn test_destroy_requires_empty_history() {
        let delivery = Arc::new(CapturingDelivery::default());
        let service = ChatService::new(delivery);

        service.registry.create("EMPTY".to_string()).unwrap();
        service.directory.ensure_room("EMPTY");
        service.history.ensure_room("EMPTY");
        service.destroy_if_empty("EMPTY");
        assert!(!service.registry.contains("EMPTY"));
        assert!(!service.directory.has_room("EMPTY"));

        service.registry.create("KEPT".to_string()).unwrap();
        service
            .history
            .notification("KEPT", "alice ha ingresado a la sala.".to_string());
        service.destroy_if_empty("KEPT");
        assert!(service.registry.contains("KEPT"));
    }
}
