//! # Audio Module
//!
//! Everything the relay needs to move audio between the two legs of a call.
//!
//! ## Key Components:
//! - **Codec**: G.711 μ-law ⇄ PCM16 sample conversion (`codec`)
//! - **Frame**: payload + codec tag, base64 transport encoding (`frame`)
//!
//! ## Audio Format Assumptions:
//! - **Sample Rate**: 8kHz on both legs (never resampled)
//! - **Telephony leg**: 8-bit μ-law
//! - **Realtime leg**: 16-bit PCM, little-endian, mono

pub mod codec;   // μ-law companding law
pub mod frame;   // Transient audio frames

pub use frame::{AudioEncoding, AudioFrame};
