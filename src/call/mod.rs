//! Call layer
//!
//! Session tracking, offer arbitration, track routing, stage selection and
//! screen sharing, driven by the [`CallOrchestrator`] actor.

pub mod arbitration;
pub mod orchestrator;
pub mod router;
pub mod session;
pub mod share;
pub mod stage;

pub use arbitration::{plan_offers, should_offer, OfferGuard};
pub use orchestrator::{CallCommand, CallHandle, CallOrchestrator, CallView};
pub use router::{MediaTrackRouter, PeerSnapshot, RemoteStream, TrackInfo};
pub use session::{CallSession, SessionState, SessionTransition, StartedAt};
pub use share::{ScreenShareController, ShareStop};
pub use stage::{select_stage, Stage, StageReason};
