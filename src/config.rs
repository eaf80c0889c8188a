use std::time::Duration;

/// Chat hub configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// HS256 secret used to verify connection tokens.
    pub jwt_secret: String,
    /// Maximum number of chatters allowed in one room.
    pub room_capacity: usize,
    /// Maximum size of an inbound WebSocket payload in bytes.
    pub max_message_size: usize,
    /// WebSocket write buffer size in bytes.
    pub write_buffer_size: usize,
    /// When set, the `Origin` host of an upgrade request must match.
    pub allowed_origin: Option<String>,
    /// Read deadline window; refreshed on every keepalive pong.
    pub pong_wait_secs: u64,
    /// Per-send write deadline.
    pub write_wait_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT", 4000),
            jwt_secret: required_var("CHAT_JWT_SECRET"),
            room_capacity: parsed_var("ROOM_CAPACITY", 10),
            max_message_size: parsed_var("MAX_MESSAGE_SIZE", 4096),
            write_buffer_size: parsed_var("WRITE_BUFFER_SIZE", 4096),
            allowed_origin: std::env::var("ALLOWED_ORIGIN")
                .ok()
                .filter(|s| !s.is_empty()),
            pong_wait_secs: parsed_var("PONG_WAIT_SECS", 60),
            write_wait_secs: parsed_var("WRITE_WAIT_SECS", 10),
        }
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    /// Keepalive ping interval: 9/10 of the read deadline window, so a live
    /// peer always has a pong in flight before the deadline expires.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
