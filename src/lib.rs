//! meshcall - mesh WebRTC calls over a room relay
//!
//! Every participant holds one peer connection per other participant. Offers,
//! answers, ICE candidates and call membership travel as JSON envelopes over
//! a single resilient WebSocket connection to the relay.

pub mod call;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod signaling;
pub mod utils;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
