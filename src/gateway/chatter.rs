//! The per-connection actor: an inbound loop dispatching events and an
//! outbound loop draining the chatter's queue and keeping the peer alive.
//!
//! Either loop exiting runs the shared teardown (leave rooms, unregister,
//! signal the other loop); teardown is idempotent and guarded by the hub
//! mutex, so both loops may run it.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

use crate::gateway::events::Event;
use crate::gateway::hub::Chatter;
use crate::AppState;

pub async fn run(
    state: AppState,
    chatter: Arc<Chatter>,
    socket: WebSocket,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    closing_rx: watch::Receiver<bool>,
) {
    let (ws_tx, ws_rx) = socket.split();

    let writer = tokio::spawn(write_loop(
        state.clone(),
        chatter.clone(),
        ws_tx,
        outbound_rx,
        closing_rx.clone(),
    ));

    read_loop(&state, &chatter, ws_rx, closing_rx).await;
    let _ = writer.await;

    tracing::info!(user_id = chatter.user_id, "chatter connection closed");
}

async fn read_loop(
    state: &AppState,
    chatter: &Arc<Chatter>,
    mut ws_rx: SplitStream<WebSocket>,
    mut closing: watch::Receiver<bool>,
) {
    let pong_wait = state.config.pong_wait();
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = closing.changed() => break,
            next = time::timeout_at(deadline, ws_rx.next()) => match next {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!(user_id = chatter.user_id, "read deadline expired");
                    break;
                }
            },
        };

        let raw = match next {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Pong(_))) => {
                deadline = Instant::now() + pong_wait;
                continue;
            }
            // axum answers pings itself.
            Some(Ok(Message::Ping(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(err)) => {
                tracing::error!(%err, user_id = chatter.user_id, "read message error");
                break;
            }
        };

        let event: Event = match serde_json::from_slice(&raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(%err, user_id = chatter.user_id, "message parsing error");
                let reply = serde_json::json!({
                    "name": "",
                    "ok": false,
                    "result": format!("message parsing error: {err}"),
                });
                if !chatter.enqueue(reply.to_string()) {
                    break;
                }
                continue;
            }
        };

        let result = match super::dispatch(state, chatter, event).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    %err,
                    user_id = chatter.user_id,
                    "a critical error happened, closing the socket"
                );
                break;
            }
        };

        match serde_json::to_string(&result) {
            Ok(raw) => {
                if !chatter.enqueue(raw) {
                    break;
                }
            }
            Err(err) => {
                tracing::error!(%err, user_id = chatter.user_id, "event result serialization error");
                continue;
            }
        }
    }

    teardown(state, chatter);
}

async fn write_loop(
    state: AppState,
    chatter: Arc<Chatter>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut closing: watch::Receiver<bool>,
) {
    let write_wait = state.config.write_wait();
    let mut keepalive = time::interval(state.config.ping_period());
    keepalive.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            _ = closing.changed() => {
                let _ = time::timeout(write_wait, ws_tx.send(Message::Close(None))).await;
                break;
            }

            item = outbound_rx.recv() => match item {
                Some(payload) => {
                    let send = time::timeout(write_wait, ws_tx.send(Message::Text(payload.into()))).await;
                    match send {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::error!(%err, user_id = chatter.user_id, "writing message back error");
                            break;
                        }
                        Err(_) => {
                            tracing::error!(user_id = chatter.user_id, "write deadline expired");
                            break;
                        }
                    }
                }
                None => {
                    let _ = time::timeout(write_wait, ws_tx.send(Message::Close(None))).await;
                    break;
                }
            },

            _ = keepalive.tick() => {
                let send = time::timeout(write_wait, ws_tx.send(Message::Ping(Vec::new().into()))).await;
                if !matches!(send, Ok(Ok(()))) {
                    break;
                }
            }
        }
    }

    teardown(&state, &chatter);
}

/// Shared cleanup for both loops: leave every joined room, drop the
/// registration, and wake the other loop so it unwinds too.
fn teardown(state: &AppState, chatter: &Chatter) {
    state.hub.leave(chatter);
    state.hub.unregister(chatter);
    chatter.signal_close();
}
