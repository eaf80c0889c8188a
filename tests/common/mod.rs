use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::EncodingKey;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, http};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chat_hub::config::Config;
use chat_hub::gateway::hub::Hub;
use chat_hub::storage::{ChatStore, MemoryStore};
use chat_hub::AppState;

pub const TEST_SECRET: &str = "integration-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config() -> Config {
    Config {
        port: 0,
        jwt_secret: TEST_SECRET.to_string(),
        room_capacity: 10,
        max_message_size: 4096,
        write_buffer_size: 4096,
        allowed_origin: None,
        pong_wait_secs: 60,
        write_wait_secs: 10,
    }
}

/// Start an actual TCP server for WebSocket testing. Returns (addr, state);
/// the server runs in the background.
pub async fn start_ws_server(config: Config) -> (SocketAddr, AppState) {
    let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
    let state = AppState {
        hub: Arc::new(Hub::new(config.room_capacity)),
        config: Arc::new(config),
        store,
    };
    let app = chat_hub::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Mint a connection token the way the parent application would.
pub fn mint_token(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("encode token")
}

pub fn customer_token(user_id: u64) -> String {
    mint_token(serde_json::json!({ "request_id": user_id }))
}

pub fn moderator_token(user_id: u64) -> String {
    mint_token(serde_json::json!({ "admin_id": user_id }))
}

/// Connect to `/ws` carrying the token in the `Sec-WebSocket-Protocol`
/// header, as a browser client would.
pub async fn connect(
    addr: SocketAddr,
    sid: &str,
    token: &str,
) -> Result<WsStream, tungstenite::Error> {
    let url = format!("ws://{addr}/ws?sid={sid}");
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        http::header::SEC_WEBSOCKET_PROTOCOL,
        format!("access_token, {token}").parse().expect("header"),
    );
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

/// Send one event and wait for the next text frame, parsed as JSON.
pub async fn round_trip(ws: &mut WsStream, event: serde_json::Value) -> serde_json::Value {
    ws.send(tungstenite::Message::Text(event.to_string().into()))
        .await
        .expect("send event");
    recv_json(ws).await
}

pub async fn recv_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for a frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse frame")
            }
            // The client answers pings automatically; skip control frames.
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
