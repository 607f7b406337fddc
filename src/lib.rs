//! callhub - signaling coordinator for multi-party video calls
//!
//! This crate provides the server side of a selective-forwarding video
//! conferencing system: it registers participants, brokers SDP offer/answer
//! exchanges for producers and consumers, relays trickled ICE candidates to
//! the right negotiation session, and keeps every connected client's view
//! of room membership consistent via broadcast events.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod signaling;
pub mod state;
pub mod web;

pub use error::{AppError, Result};
