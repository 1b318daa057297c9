//! Outbound frame queue
//!
//! Frames are removed only after the link accepted them, so a write failure
//! leaves the failed frame at the head for the next connection.

use std::collections::VecDeque;

use super::connector::LinkWriter;
use crate::error::Result;

/// FIFO of not-yet-sent text frames
#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: String) {
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop everything (explicit channel teardown only)
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Write every queued frame in order
    ///
    /// Returns the number of frames written. On error the unsent frames,
    /// including the one that failed, stay queued in their original order.
    pub async fn flush(&mut self, writer: &mut dyn LinkWriter) -> Result<usize> {
        let mut sent = 0;
        while let Some(frame) = self.frames.front() {
            writer.send(frame).await?;
            self.frames.pop_front();
            sent += 1;
        }
        Ok(sent)
    }
}
