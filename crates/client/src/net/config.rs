use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Session parameters. Read once when the session starts.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub nickname: String,
    /// Token from a previous session to resume instead of creating a new one.
    pub session_token: Option<String>,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    pub moves_per_turn: u32,
    pub actions_per_turn: u32,
    pub protocol_version: String,
    pub data_version: String,
    /// Ask the server to play for this account right after login.
    pub ai_play: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nickname: "unnamed".to_string(),
            session_token: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            moves_per_turn: 2,
            actions_per_turn: 2,
            protocol_version: towerlink::SERVICE_PROTOCOL_VERSION.to_string(),
            data_version: towerlink::DATA_VERSION.to_string(),
            ai_play: false,
        }
    }
}
