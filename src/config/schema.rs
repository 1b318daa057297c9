use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// Main application configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Local participant identity
    pub identity: IdentityConfig,
    /// Signaling relay connection settings
    pub relay: RelayConfig,
    /// ICE server settings
    pub webrtc: WebRtcSettings,
    /// Available capture sources
    pub media: MediaConfig,
    /// Room/call to enter on start
    pub call: CallConfig,
}

/// Local identity configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity used as the peer key by every other participant (e.g. e-mail)
    pub id: String,
}

/// Relay connection configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay base URL (http(s):// or ws(s)://)
    pub url: String,
    /// Authentication token, the channel waits until one is available
    pub token: Option<String>,
    /// Delay between reconnect attempts in milliseconds
    #[typeshare(skip)]
    pub reconnect_interval_ms: u64,
    /// Poll interval while waiting for a token in milliseconds
    #[typeshare(skip)]
    pub credential_poll_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            token: None,
            reconnect_interval_ms: 500,
            credential_poll_ms: 250,
        }
    }
}

/// TURN server entry
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServerConfig {
    /// TURN URLs (e.g. "turn:turn.example.com:3478")
    pub urls: Vec<String>,
    /// Username
    pub username: String,
    /// Credential
    pub credential: String,
}

/// ICE server configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcSettings {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN servers
    pub turn_servers: Vec<TurnServerConfig>,
}

impl Default for WebRtcSettings {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
        }
    }
}

/// Capture source availability
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    /// Camera available
    pub camera: bool,
    /// Microphone available
    pub microphone: bool,
    /// Screen capture available
    pub screen: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            screen: true,
        }
    }
}

/// Startup call configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    /// Room to join on start
    #[typeshare(skip)]
    pub room_id: Option<i64>,
    /// Join the room's call right after entering the room
    pub auto_join: bool,
}
