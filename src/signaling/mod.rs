//! Signaling protocol: wire messages and the per-frame router

pub mod message;
pub mod router;

pub use message::{decode_frame, ClientFrame, DecodedFrame, IceCandidate, ServerFrame};
pub use router::SignalingRouter;
