//! Screen-share controller
//!
//! Holds the local capture streams and decides which tracks go out. Only one
//! producer feeds the outgoing video at a time: the screen while sharing,
//! the camera otherwise. Switching replaces the video sender in place on
//! every connection and renegotiates with every peer.

use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::webrtc::media::{LocalStream, LocalTrack};
use crate::webrtc::peer::PeerConnectionManager;

/// Result of stopping a share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareStop {
    /// Outgoing video is the camera again
    Reverted,
    /// No camera to revert to; nothing is sent
    ViewOnly,
    /// No share was active
    NotSharing,
}

#[derive(Debug, Default)]
pub struct ScreenShareController {
    camera: Option<LocalStream>,
    screen: Option<LocalStream>,
}

impl ScreenShareController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(&self) -> Option<&LocalStream> {
        self.camera.as_ref()
    }

    /// Whether camera or microphone tracks are held
    pub fn has_local_media(&self) -> bool {
        self.camera.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Install the camera/microphone stream, stopping any previous one
    pub fn set_camera(&mut self, stream: LocalStream) {
        if let Some(previous) = self.camera.replace(stream) {
            previous.stop();
        }
    }

    /// Stop and drop the camera/microphone stream
    pub fn stop_camera(&mut self) -> bool {
        match self.camera.take() {
            Some(stream) => {
                stream.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn screen_track(&self) -> Option<&LocalTrack> {
        self.screen.as_ref().and_then(LocalStream::video_track)
    }

    /// Tracks a new connection should send
    ///
    /// While sharing: camera audio plus screen video.
    pub fn outgoing(&self) -> Vec<LocalTrack> {
        let mut tracks = Vec::new();
        match (&self.screen, &self.camera) {
            (Some(screen), camera) => {
                if let Some(audio) = camera.as_ref().and_then(LocalStream::audio_track) {
                    tracks.push(audio.clone());
                }
                if let Some(video) = screen.video_track() {
                    tracks.push(video.clone());
                }
            }
            (None, Some(camera)) => tracks.extend(camera.tracks.iter().cloned()),
            (None, None) => {}
        }
        tracks.retain(|t| !t.is_ended());
        tracks
    }

    /// Switch every connection's outgoing video to the screen and renegotiate
    ///
    /// Returns the screen video track so the caller can watch for it ending.
    pub fn begin(&mut self, screen: LocalStream, manager: &PeerConnectionManager) -> Result<LocalTrack> {
        let Some(video) = screen.video_track().cloned() else {
            screen.stop();
            return Err(AppError::MediaAccess(
                "screen capture has no video track".to_string(),
            ));
        };

        if let Some(previous) = self.screen.replace(screen) {
            previous.stop();
        }

        manager.set_outgoing_video_all(&video);
        manager.renegotiate_all();
        info!("Screen share started ({} peers)", manager.len());
        Ok(video)
    }

    /// Stop the capture and revert to the camera video when there is one
    pub fn end(&mut self, manager: &PeerConnectionManager) -> ShareStop {
        let Some(screen) = self.screen.take() else {
            return ShareStop::NotSharing;
        };
        screen.stop();

        let camera_video = self
            .camera
            .as_ref()
            .and_then(LocalStream::video_track)
            .filter(|t| !t.is_ended());
        match camera_video {
            Some(video) => {
                manager.set_outgoing_video_all(video);
                manager.renegotiate_all();
                info!("Screen share stopped, reverted to camera");
                ShareStop::Reverted
            }
            None => {
                info!("Screen share stopped, no camera to revert to (view-only)");
                ShareStop::ViewOnly
            }
        }
    }

    /// Stop every capture (call cleanup)
    pub fn stop_all(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if self.stop_camera() {
            debug!("Local capture stopped");
        }
    }
}
