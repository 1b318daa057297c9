//! Relay signaling envelopes and receive-side filtering

pub mod envelope;
pub mod filter;

pub use envelope::{Envelope, PresenceStatus, Signal};
pub use filter::{admit, DropReason};
