//! Per-connection context and the typing auto-clear timer.
//!
//! Every connection carries one [`ConnContext`] for the lifetime of the
//! socket: which room and user the connection is currently tracked as, and
//! a single slot for the pending typing-clear timer. Arming the slot always
//! supersedes the previous timer, never stacks a second one.

use tokio::task::JoinHandle;

use crate::delivery::ConnectionId;

/// A single abortable timer slot.
///
/// At most one timer is live at any time; arming aborts the previous one
/// and dropping the slot aborts whatever is pending.
#[derive(Debug, Default)]
pub struct TypingTimer {
    handle: Option<JoinHandle<()>>,
}

impl TypingTimer {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new pending timer, aborting any previous one.
    pub fn arm(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.handle.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the pending timer, if any.
    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a timer is currently installed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TypingTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Mutable per-connection state, owned by the connection's handler task.
#[derive(Debug)]
pub struct ConnContext {
    /// The transport connection this context belongs to.
    pub conn: ConnectionId,
    /// Room the connection is currently tracked in.
    pub current_room: Option<String>,
    /// Raw user name from the last join.
    pub current_user: Option<String>,
    /// Resolved display name from the last join.
    pub display_name: Option<String>,
    /// Pending typing auto-clear timer.
    pub typing_timer: TypingTimer,
}

impl ConnContext {
    /// Create a fresh context for a connection.
    #[must_use]
    pub fn new(conn: ConnectionId) -> Self {
        Self {
            conn,
            current_room: None,
            current_user: None,
            display_name: None,
            typing_timer: TypingTimer::new(),
        }
    }

    /// Whether the connection is currently tracked in a room.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.current_room.is_some() && self.current_user.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fire_after(counter: Arc<AtomicU32>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_supersedes_previous_timer() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut slot = TypingTimer::new();

        slot.arm(fire_after(Arc::clone(&fired), Duration::from_millis(3_000)));
        tokio::time::advance(Duration::from_millis(1_000)).await;
        slot.arm(fire_after(Arc::clone(&fired), Duration::from_millis(3_000)));
        tokio::task::yield_now().await;

        // The first timer would have fired at t=3000; it was superseded.
        tokio::time::advance(Duration::from_millis(2_500)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // The second fires at t=4000.
        tokio::time::advance(Duration::from_millis(1_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_cancels() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut slot = TypingTimer::new();

        slot.arm(fire_after(Arc::clone(&fired), Duration::from_millis(3_000)));
        assert!(slot.is_armed());
        slot.disarm();
        assert!(!slot.is_armed());

        tokio::time::advance(Duration::from_millis(10_000)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_context_tracking() {
        let mut ctx = ConnContext::new(ConnectionId::new("c1"));
        assert!(!ctx.is_tracked());

        ctx.current_room = Some("ABC".to_string());
        ctx.current_user = Some("alice_1".to_string());
        assert!(ctx.is_tracked());
    }
}
