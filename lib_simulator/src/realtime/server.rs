//! WebSocket endpoint for the realtime protocol: `GET /graphql/realtime`.
//!
//! Each upgraded socket gets one task that pumps four event sources through
//! the connection state machine: inbound frames, broker deliveries, the
//! init-timeout timer, and the keepalive interval, plus the server-wide
//! shutdown broadcast. All registry mutations happen inside the state
//! machine; this module only moves bytes and owns the timers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

use crate::realtime::connection::Connection;
use crate::realtime::model::{ClientFrame, ServerFrame};
use crate::simulator::AppState;

static NEXT_CONNECTION_ID: AtomicUsize = AtomicUsize::new(1);

pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();
    let mut connection = Connection::new(
        connection_id,
        state.schema.clone(),
        state.broker.clone(),
        delivery_tx,
        state.settings.connection_timeout_ms,
    );
    let mut shutdown = state.realtime_shutdown.subscribe();
    log::info!("Realtime connection {} opened", connection_id);

    let init_deadline = sleep(Duration::from_millis(state.settings.init_timeout_ms));
    tokio::pin!(init_deadline);

    let mut keepalive = interval(Duration::from_millis(state.settings.keepalive_interval_ms));
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await; // the first tick completes immediately

    let grace = Duration::from_millis(state.settings.connection_timeout_ms);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Connection {}: server shutting down", connection_id);
                break;
            }

            // Only armed until the handshake settles one way or the other.
            _ = &mut init_deadline, if !connection.is_connected() && !connection.is_closed() => {
                let frames = connection.on_init_timeout();
                let _ = send_frames(&mut socket, &frames).await;
                break;
            }

            _ = keepalive.tick(), if connection.is_connected() => {
                if last_activity.elapsed() > grace {
                    log::info!(
                        "Connection {}: no activity within the keepalive grace window, closing",
                        connection_id
                    );
                    break;
                }
                if send_frames(&mut socket, &[ServerFrame::Ka]).await.is_err() {
                    break;
                }
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        let frames = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => connection.on_frame(frame),
                            Err(e) => connection.on_protocol_error(&format!("unrecognized message: {e}")),
                        };
                        if send_frames(&mut socket, &frames).await.is_err() {
                            break;
                        }
                        if connection.is_closed() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // The protocol is text-framed; binary is ignored.
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        log::debug!("Connection {}: socket error: {}", connection_id, e);
                        break;
                    }
                }
            }

            delivery = delivery_rx.recv() => {
                if let Some(delivery) = delivery {
                    // Skip deliveries queued just before a stop raced in.
                    if connection.owns(&delivery.subscription_id) {
                        let frame = ServerFrame::Data {
                            id: delivery.subscription_id.clone(),
                            payload: delivery.payload,
                        };
                        if send_frames(&mut socket, &[frame]).await.is_err() {
                            log::warn!(
                                "Connection {}: data delivery failed, closing",
                                connection_id
                            );
                            break;
                        }
                    }
                }
            }
        }
    }

    // One terminal cleanup path for every exit above. The close frame is
    // best effort; the peer may already be gone.
    let _ = socket.send(Message::Close(None)).await;
    connection.close();
    log::info!("Realtime connection {} closed", connection_id);
}

async fn send_frames(socket: &mut WebSocket, frames: &[ServerFrame]) -> Result<(), axum::Error> {
    for frame in frames {
        let encoded = serde_json::to_string(frame).map_err(axum::Error::new)?;
        socket.send(Message::Text(encoded.into())).await?;
    }
    Ok(())
}
