//! # Wire Protocols
//!
//! Message schemas for both legs of a call, one tagged enum per direction.
//! Unknown tags deserialize to an `Unknown` variant so the relay can ignore
//! them; anything that fails to deserialize is a malformed message.

pub mod realtime;    // Upstream: conversational AI realtime API
pub mod telephony;   // Downstream: telephony media stream

pub use realtime::{RealtimeInbound, RealtimeOutbound, SessionSettings, TurnDetection};
pub use telephony::{TelephonyInbound, TelephonyOutbound};
