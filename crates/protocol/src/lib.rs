//! Wire protocol for chunklift client-server communication.
//!
//! All control traffic travels as JSON envelopes over WebSocket text
//! frames; chunk payloads travel as binary frames (framing lives in the
//! server and uploader crates). This crate defines the envelope, the
//! typed payloads, and the shared protocol constants.

pub mod constants;
pub mod envelope;
pub mod messages;

pub use constants::MessageType;
pub use envelope::{Message, WireError};
