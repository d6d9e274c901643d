//! End-to-end coordinator flows against a recording delivery stub.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sala_core::{ChatService, ConnContext, ConnectionId, RoomDelivery};
use sala_protocol::{ClientEvent, HistoryEntry, ServerEvent};

/// Everything the coordinator asked the transport to do, in order.
#[derive(Debug, Clone)]
enum Action {
    Group {
        conn: ConnectionId,
        room: String,
        joined: bool,
    },
    ToOne {
        conn: ConnectionId,
        event: ServerEvent,
    },
    ToRoom {
        room: String,
        event: ServerEvent,
    },
}

#[derive(Default)]
struct RecordingDelivery {
    actions: Mutex<Vec<Action>>,
}

impl RecordingDelivery {
    fn len(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    fn actions_since(&self, mark: usize) -> Vec<Action> {
        self.actions.lock().unwrap()[mark..].to_vec()
    }

    /// Events delivered to a single connection since a mark.
    fn sent_to(&self, conn: &ConnectionId, mark: usize) -> Vec<ServerEvent> {
        self.actions_since(mark)
            .into_iter()
            .filter_map(|a| match a {
                Action::ToOne { conn: c, event } if &c == conn => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Events broadcast to a room since a mark.
    fn broadcast_to(&self, room: &str, mark: usize) -> Vec<ServerEvent> {
        self.actions_since(mark)
            .into_iter()
            .filter_map(|a| match a {
                Action::ToRoom { room: r, event } if r == room => Some(event),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RoomDelivery for RecordingDelivery {
    async fn join_group(&self, conn: &ConnectionId, room_code: &str) {
        self.actions.lock().unwrap().push(Action::Group {
            conn: conn.clone(),
            room: room_code.to_string(),
            joined: true,
        });
    }

    async fn leave_group(&self, conn: &ConnectionId, room_code: &str) {
        self.actions.lock().unwrap().push(Action::Group {
            conn: conn.clone(),
            room: room_code.to_string(),
            joined: false,
        });
    }

    async fn send_to_one(&self, conn: &ConnectionId, event: ServerEvent) {
        self.actions.lock().unwrap().push(Action::ToOne {
            conn: conn.clone(),
            event,
        });
    }

    async fn broadcast_to_room(&self, room_code: &str, event: ServerEvent) {
        self.actions.lock().unwrap().push(Action::ToRoom {
            room: room_code.to_string(),
            event,
        });
    }
}

fn setup() -> (Arc<ChatService>, Arc<RecordingDelivery>) {
    let delivery = Arc::new(RecordingDelivery::default());
    let service = Arc::new(ChatService::new(delivery.clone()));
    (service, delivery)
}

async fn join(service: &Arc<ChatService>, ctx: &mut ConnContext, room: &str, user: &str) {
    service
        .handle_event(
            ctx,
            ClientEvent::JoinRoom {
                room_code: room.to_string(),
                user_name: user.to_string(),
                display_name: None,
            },
        )
        .await;
}

fn notifications(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Message {
                sender: None,
                message,
                ..
            } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn last_user_list(events: &[ServerEvent]) -> Option<(usize, usize, Vec<String>, Vec<bool>)> {
    events.iter().rev().find_map(|e| match e {
        ServerEvent::UserList {
            count,
            active_count,
            users,
            ..
        } => Some((
            *count,
            *active_count,
            users.iter().map(|u| u.name.clone()).collect(),
            users.iter().map(|u| u.connected).collect(),
        )),
        _ => None,
    })
}

// Small real delay so history timestamps land on distinct milliseconds.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_room_scenario_with_reconnection() {
    let (service, delivery) = setup();

    // alice creates the room.
    let mut alice = ConnContext::new(ConnectionId::new("c-alice"));
    join(&service, &mut alice, "ABC", "alice_1").await;

    let events = delivery.broadcast_to("ABC", 0);
    let (count, active, names, _) = last_user_list(&events).unwrap();
    assert_eq!((count, active), (1, 1));
    assert_eq!(names, vec!["alice"]);
    // First-time joiner: no replay at all.
    assert!(delivery.sent_to(&alice.conn, 0).is_empty());

    tick().await;

    // bob joins; everyone sees the notification and a presence list of 2.
    let mark = delivery.len();
    let mut bob = ConnContext::new(ConnectionId::new("c-bob"));
    join(&service, &mut bob, "ABC", "bob_2").await;

    let events = delivery.broadcast_to("ABC", mark);
    assert_eq!(
        notifications(&events),
        vec!["bob ha ingresado a la sala.".to_string()]
    );
    let (count, active, names, _) = last_user_list(&events).unwrap();
    assert_eq!((count, active), (2, 2));
    assert_eq!(names, vec!["alice", "bob"]);
    assert!(delivery.sent_to(&bob.conn, mark).is_empty());

    tick().await;

    // alice sends a message; both see the formatted broadcast.
    let mark = delivery.len();
    service
        .handle_event(
            &mut alice,
            ClientEvent::SendMessage {
                room_code: "ABC".to_string(),
                user_name: "alice_1".to_string(),
                display_name: None,
                message: "hi".to_string(),
            },
        )
        .await;

    let chat = delivery
        .broadcast_to("ABC", mark)
        .into_iter()
        .find_map(|e| match e {
            ServerEvent::Message {
                id: Some(id),
                sender: Some(sender),
                message,
                ..
            } => Some((id, sender, message)),
            _ => None,
        })
        .expect("chat broadcast");
    assert!(chat.0.starts_with("msg_"));
    assert_eq!(chat.1, "alice");
    assert!(chat.2.starts_with("alice ["));
    assert!(chat.2.ends_with("]: hi"));

    tick().await;

    // bob drops; no leave notification, presence shows bob disconnected.
    let mark = delivery.len();
    service.handle_disconnect(&mut bob).await;

    let events = delivery.broadcast_to("ABC", mark);
    assert!(notifications(&events).is_empty());
    let (count, active, names, connected) = last_user_list(&events).unwrap();
    assert_eq!((count, active), (1, 1));
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(connected, vec![true, false]);
    assert_eq!(service.stats().pending_reconnects, 1);

    tick().await;

    // bob reconnects within the grace window on a fresh connection: no
    // join notification, presence shows bob connected, and the replay
    // covers exactly the history from bob's first join onward.
    let mark = delivery.len();
    let mut bob2 = ConnContext::new(ConnectionId::new("c-bob-2"));
    join(&service, &mut bob2, "ABC", "bob_2").await;

    let events = delivery.broadcast_to("ABC", mark);
    assert!(notifications(&events).is_empty());
    let (count, active, names, connected) = last_user_list(&events).unwrap();
    assert_eq!((count, active), (2, 2));
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(connected, vec![true, true]);

    let replay = delivery
        .sent_to(&bob2.conn, mark)
        .into_iter()
        .find_map(|e| match e {
            ServerEvent::MessageHistory { messages, .. } => Some(messages),
            _ => None,
        })
        .expect("history replay for reconnection");

    // His own join notification and the chat message are in the window;
    // alice's earlier join notification is not.
    assert!(replay.iter().any(|m| matches!(
        m,
        HistoryEntry::Chat { content, .. } if content == "hi"
    )));
    assert!(replay.iter().any(|m| matches!(
        m,
        HistoryEntry::Notification { content, .. } if content == "bob ha ingresado a la sala."
    )));
    assert!(!replay.iter().any(|m| matches!(
        m,
        HistoryEntry::Notification { content, .. } if content == "alice ha ingresado a la sala."
    )));
    assert_eq!(service.stats().pending_reconnects, 0);
}

#[tokio::test]
async fn test_member_count_tracks_connected_users() {
    let (service, _delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    let mut bob = ConnContext::new(ConnectionId::new("c2"));
    join(&service, &mut alice, "ABC", "alice").await;
    join(&service, &mut bob, "ABC", "bob").await;
    assert_eq!(service.stats().member_count, 2);

    service.handle_disconnect(&mut bob).await;
    assert_eq!(service.stats().member_count, 1);

    let mut bob2 = ConnContext::new(ConnectionId::new("c3"));
    join(&service, &mut bob2, "ABC", "bob").await;
    assert_eq!(service.stats().member_count, 2);

    service
        .handle_event(
            &mut alice,
            ClientEvent::LeaveRoom {
                room_code: "ABC".to_string(),
                user_name: "alice".to_string(),
                display_name: None,
            },
        )
        .await;
    assert_eq!(service.stats().member_count, 1);
    assert!(!alice.is_tracked());
}

#[tokio::test]
async fn test_voluntary_leave_then_rejoin_is_fresh() {
    let (service, delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    let mut bob = ConnContext::new(ConnectionId::new("c2"));
    join(&service, &mut alice, "ABC", "alice").await;
    join(&service, &mut bob, "ABC", "bob").await;

    tick().await;
    service
        .handle_event(
            &mut alice,
            ClientEvent::SendMessage {
                room_code: "ABC".to_string(),
                user_name: "alice".to_string(),
                display_name: None,
                message: "before".to_string(),
            },
        )
        .await;

    tick().await;
    let mark = delivery.len();
    service
        .handle_event(
            &mut bob,
            ClientEvent::LeaveRoom {
                room_code: "ABC".to_string(),
                user_name: "bob".to_string(),
                display_name: None,
            },
        )
        .await;
    assert_eq!(
        notifications(&delivery.broadcast_to("ABC", mark)),
        vec!["bob ha abandonado la sala.".to_string()]
    );

    tick().await;

    // Rejoin after leaving: treated as new. Notification is broadcast and
    // no history from before the new join is replayed.
    let mark = delivery.len();
    let mut bob2 = ConnContext::new(ConnectionId::new("c3"));
    join(&service, &mut bob2, "ABC", "bob").await;

    assert_eq!(
        notifications(&delivery.broadcast_to("ABC", mark)),
        vec!["bob ha ingresado a la sala.".to_string()]
    );
    assert!(delivery
        .sent_to(&bob2.conn, mark)
        .iter()
        .all(|e| !matches!(e, ServerEvent::MessageHistory { .. })));
}

#[tokio::test]
async fn test_rejoin_to_open_room_is_not_rejected() {
    let (service, delivery) = setup();

    // The room keeps its ghost directory while history exists, even with
    // nobody live in it.
    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    join(&service, &mut alice, "XYZ", "alice").await;
    service.handle_disconnect(&mut alice).await;
    assert_eq!(service.stats().room_count, 1);

    // A joiner to an open room is fine; the rejection only applies to a
    // claimed-and-closed code, which requires the registry entry to be
    // gone while ghosts remain.
    let mark = delivery.len();
    let mut bob = ConnContext::new(ConnectionId::new("c2"));
    join(&service, &mut bob, "XYZ", "bob").await;
    assert!(delivery
        .sent_to(&bob.conn, mark)
        .iter()
        .all(|e| !matches!(e, ServerEvent::Error { .. })));
    assert!(bob.is_tracked());
}

#[tokio::test]
async fn test_room_with_history_survives_everyone_leaving() {
    let (service, _delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    join(&service, &mut alice, "ABC", "alice").await;
    service
        .handle_event(
            &mut alice,
            ClientEvent::LeaveRoom {
                room_code: "ABC".to_string(),
                user_name: "alice".to_string(),
                display_name: None,
            },
        )
        .await;

    // Zero live members, but the join/leave notifications are history.
    let stats = service.stats();
    assert_eq!(stats.member_count, 0);
    assert_eq!(stats.room_count, 1);
}

#[tokio::test]
async fn test_untracked_events_are_dropped_silently() {
    let (service, delivery) = setup();

    let mut stranger = ConnContext::new(ConnectionId::new("c1"));
    service
        .handle_event(
            &mut stranger,
            ClientEvent::SendMessage {
                room_code: "ABC".to_string(),
                user_name: "ghost".to_string(),
                display_name: None,
                message: "hello?".to_string(),
            },
        )
        .await;
    service
        .handle_event(
            &mut stranger,
            ClientEvent::Typing {
                room_code: "ABC".to_string(),
                user_name: "ghost".to_string(),
                display_name: None,
            },
        )
        .await;
    service.handle_disconnect(&mut stranger).await;

    assert_eq!(delivery.len(), 0);
    assert_eq!(service.stats().room_count, 0);
}

#[tokio::test]
async fn test_room_switch_detaches_from_previous_room() {
    let (service, delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    let mut bob = ConnContext::new(ConnectionId::new("c2"));
    join(&service, &mut alice, "AAA", "alice").await;
    join(&service, &mut bob, "AAA", "bob").await;

    // bob moves to a second room; AAA sees a disconnect, no departure
    // notification.
    let mark = delivery.len();
    join(&service, &mut bob, "BBB", "bob").await;

    let events = delivery.broadcast_to("AAA", mark);
    assert!(notifications(&events).is_empty());
    let (count, _, names, connected) = last_user_list(&events).unwrap();
    assert_eq!(count, 1);
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(connected, vec![true, false]);

    assert_eq!(bob.current_room.as_deref(), Some("BBB"));
    assert_eq!(
        notifications(&delivery.broadcast_to("BBB", mark)),
        vec!["bob ha ingresado a la sala.".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_typing_restart_supersedes_timer() {
    let (service, delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    join(&service, &mut alice, "ABC", "alice").await;

    let typing = ClientEvent::Typing {
        room_code: "ABC".to_string(),
        user_name: "alice".to_string(),
        display_name: None,
    };

    let mark = delivery.len();
    service.handle_event(&mut alice, typing.clone()).await;
    tokio::time::advance(Duration::from_millis(1_000)).await;
    service.handle_event(&mut alice, typing).await;
    tokio::task::yield_now().await;

    // At t=3500 the superseded first timer would have fired; nothing has.
    tokio::time::advance(Duration::from_millis(2_500)).await;
    tokio::task::yield_now().await;
    let stops = |mark| {
        delivery
            .broadcast_to("ABC", mark)
            .iter()
            .filter(|e| matches!(e, ServerEvent::TypingStatus { is_typing: false, .. }))
            .count()
    };
    assert_eq!(stops(mark), 0);

    // The second timer fires at t=4000: exactly one "not typing".
    tokio::time::advance(Duration::from_millis(600)).await;
    tokio::task::yield_now().await;
    assert_eq!(stops(mark), 1);

    // And it stays at one.
    tokio::time::advance(Duration::from_millis(5_000)).await;
    tokio::task::yield_now().await;
    assert_eq!(stops(mark), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_typing_cancels_timer() {
    let (service, delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    join(&service, &mut alice, "ABC", "alice").await;

    let mark = delivery.len();
    service
        .handle_event(
            &mut alice,
            ClientEvent::Typing {
                room_code: "ABC".to_string(),
                user_name: "alice".to_string(),
                display_name: None,
            },
        )
        .await;
    service
        .handle_event(
            &mut alice,
            ClientEvent::StopTyping {
                room_code: "ABC".to_string(),
                user_name: "alice".to_string(),
                display_name: None,
            },
        )
        .await;

    // One immediate "not typing" from the stop; the timer never fires a
    // second one.
    tokio::time::advance(Duration::from_millis(10_000)).await;
    tokio::task::yield_now().await;
    let stops = delivery
        .broadcast_to("ABC", mark)
        .iter()
        .filter(|e| matches!(e, ServerEvent::TypingStatus { is_typing: false, .. }))
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_after_grace_window_is_announced() {
    let (service, delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    let mut bob = ConnContext::new(ConnectionId::new("c2"));
    join(&service, &mut alice, "ABC", "alice").await;
    join(&service, &mut bob, "ABC", "bob").await;

    service.handle_disconnect(&mut bob).await;

    // Past the grace window the drop is no longer presumed transient.
    tokio::time::advance(Duration::from_millis(10_500)).await;

    let mark = delivery.len();
    let mut bob2 = ConnContext::new(ConnectionId::new("c3"));
    join(&service, &mut bob2, "ABC", "bob").await;
    assert_eq!(
        notifications(&delivery.broadcast_to("ABC", mark)),
        vec!["bob ha ingresado a la sala.".to_string()]
    );
}

#[tokio::test]
async fn test_update_status_rebroadcasts_presence() {
    let (service, delivery) = setup();

    let mut alice = ConnContext::new(ConnectionId::new("c1"));
    join(&service, &mut alice, "ABC", "alice").await;

    let mark = delivery.len();
    service
        .handle_event(
            &mut alice,
            ClientEvent::UpdateStatus {
                room_code: "ABC".to_string(),
                user_name: "alice".to_string(),
                display_name: None,
                status: Some("ausente".to_string()),
            },
        )
        .await;

    let statuses: Vec<String> = delivery
        .broadcast_to("ABC", mark)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::UserList { users, .. } => Some(users[0].status.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec!["ausente".to_string()]);
}
