//! WebRTC configuration

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::config::WebRtcSettings;

/// WebRTC configuration used to build every peer connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
        }
    }
}

impl From<&WebRtcSettings> for WebRtcConfig {
    fn from(settings: &WebRtcSettings) -> Self {
        Self {
            stun_servers: settings.stun_servers.clone(),
            turn_servers: settings
                .turn_servers
                .iter()
                .map(|t| TurnServer {
                    urls: t.urls.clone(),
                    username: t.username.clone(),
                    credential: t.credential.clone(),
                })
                .collect(),
        }
    }
}

impl WebRtcConfig {
    /// Build the ICE server list for `RTCConfiguration`
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs, several allow UDP/TCP fallback
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;

    #[test]
    fn test_ice_servers_from_settings() {
        let settings = WebRtcSettings {
            stun_servers: vec!["stun:stun.example.com:3478".to_string()],
            turn_servers: vec![TurnServerConfig {
                urls: vec![
                    "turn:turn.example.com:3478?transport=udp".to_string(),
                    "turn:turn.example.com:3478?transport=tcp".to_string(),
                ],
                username: "u".to_string(),
                credential: "c".to_string(),
            }],
        };

        let servers = WebRtcConfig::from(&settings).ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.com:3478".to_string()]);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].urls.len(), 2);
        assert_eq!(servers[1].credential, "c");
    }
}
