//! # sala-transport
//!
//! Connection hub and room fan-out for the Sala chat coordinator.
//!
//! The [`Hub`] is the concrete [`RoomDelivery`](sala_core::RoomDelivery)
//! implementation: each WebSocket task registers its connection to get an
//! outbox receiver, and the coordinator's broadcasts fan out through the
//! hub's room groups.
//!
//! ```rust,ignore
//! use sala_transport::Hub;
//!
//! let hub = Hub::new();
//! let mut outbox = hub.register(&conn_id);
//! while let Some(event) = outbox.recv().await {
//!     // Write the event to the wire
//! }
//! ```

pub mod hub;

pub use hub::{Hub, HubStats};
