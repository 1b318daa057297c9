//! Capture device access
//!
//! Permission prompts and device enumeration are external; this module only
//! defines the acquisition boundary and a configuration-driven implementation
//! for headless participants.
//!
//! [`StaticMediaDevices`] opens no capture hardware. Its tracks negotiate as
//! Opus and VP8 senders but nothing writes samples into them, so peers see
//! silent audio and no video frames. A real capture source feeds samples
//! through [`LocalTrack::rtp_track`].

use async_trait::async_trait;
use tracing::info;

use super::media::{LocalStream, LocalTrack, TrackSource};
use crate::config::MediaConfig;
use crate::error::{AppError, Result};

/// Acquires local capture streams
#[async_trait]
pub trait MediaDevices: Send + Sync + 'static {
    /// Camera and microphone
    async fn user_media(&self) -> Result<LocalStream>;

    /// Screen capture (video only)
    async fn display_media(&self) -> Result<LocalStream>;
}

/// Devices whose availability comes from configuration
#[derive(Debug, Clone)]
pub struct StaticMediaDevices {
    config: MediaConfig,
}

impl StaticMediaDevices {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaDevices for StaticMediaDevices {
    async fn user_media(&self) -> Result<LocalStream> {
        let stream_id = format!("user-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();
        if self.config.microphone {
            tracks.push(LocalTrack::new(TrackSource::Microphone, stream_id.clone()));
        }
        if self.config.camera {
            tracks.push(LocalTrack::new(TrackSource::Camera, stream_id.clone()));
        }

        if tracks.is_empty() {
            return Err(AppError::MediaAccess(
                "no camera or microphone available".to_string(),
            ));
        }
        info!("Acquired user media ({} tracks)", tracks.len());
        Ok(LocalStream::new(tracks))
    }

    async fn display_media(&self) -> Result<LocalStream> {
        if !self.config.screen {
            return Err(AppError::MediaAccess("screen capture unavailable".to_string()));
        }
        let stream_id = format!("screen-{}", uuid::Uuid::new_v4());
        info!("Acquired screen capture");
        Ok(LocalStream::new(vec![LocalTrack::new(TrackSource::Screen, stream_id)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_user_media_respects_config() {
        let devices = StaticMediaDevices::new(MediaConfig {
            camera: false,
            microphone: true,
            screen: true,
        });
        let stream = assert_ok!(devices.user_media().await);
        assert!(stream.video_track().is_none());
        assert!(stream.audio_track().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_sources_are_media_access_errors() {
        let devices = StaticMediaDevices::new(MediaConfig {
            camera: false,
            microphone: false,
            screen: false,
        });
        let err = assert_err!(devices.user_media().await);
        assert_eq!(err.kind(), ErrorKind::MediaAccess);
        let err = assert_err!(devices.display_media().await);
        assert_eq!(err.kind(), ErrorKind::MediaAccess);
    }
}
