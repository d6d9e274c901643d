//! Connection handlers for the Sala server.
//!
//! This module handles the WebSocket connection lifecycle: each socket
//! registers an outbox with the hub, feeds decoded events to the
//! coordinator, and drains coordinator broadcasts back onto the wire.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use sala_core::{ChatService, ConnContext, ConnectionId};
use sala_protocol::{codec, ClientEvent};
use sala_transport::Hub;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat coordinator.
    pub service: Arc<ChatService>,
    /// The connection hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(Hub::new());
        let service = Arc::new(ChatService::with_config(
            config.chat_config(),
            hub.clone(),
        ));

        Self {
            service,
            hub,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Sala server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.service.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": stats.room_count,
        "members": stats.member_count,
        "connections": state.hub.stats().connection_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    let mut outbox = state.hub.register(&connection_id);
    let mut ctx = ConnContext::new(connection_id.clone());

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Socket loop: coordinator broadcasts out, client events in.
    loop {
        tokio::select! {
            biased;

            Some(event) = outbox.recv() => {
                match codec::encode_server_event(&event) {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Encode error");
                        metrics::record_error("encode");
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &mut ctx, &state).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Tolerate clients that send JSON as binary frames.
                        match std::str::from_utf8(&data) {
                            Ok(text) => handle_frame(text, &mut ctx, &state).await,
                            Err(_) => {
                                warn!(connection = %connection_id, "Non-UTF8 binary frame");
                                metrics::record_error("frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: the coordinator applies the reconnection grace window, the
    // hub drops the outbox and group memberships.
    state.service.handle_disconnect(&mut ctx).await;
    state.hub.unregister(&connection_id);
    metrics::set_service_stats(&state.service.stats());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and dispatch one inbound text frame.
async fn handle_frame(text: &str, ctx: &mut ConnContext, state: &Arc<AppState>) {
    let event = match codec::decode_client_event(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(connection = %ctx.conn, error = %e, "Dropping undecodable frame");
            metrics::record_error("decode");
            return;
        }
    };

    metrics::record_event(event_kind(&event));
    state.service.handle_event(ctx, event).await;
    metrics::set_service_stats(&state.service.stats());
}

fn event_kind(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::JoinRoom { .. } => "joinRoom",
        ClientEvent::SendMessage { .. } => "sendMessage",
        ClientEvent::LeaveRoom { .. } => "leaveRoom",
        ClientEvent::Typing { .. } => "typing",
        ClientEvent::StopTyping { .. } => "stopTyping",
        ClientEvent::UpdateStatus { .. } => "updateStatus",
    }
}
