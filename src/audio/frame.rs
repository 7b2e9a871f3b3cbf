//! # Audio Frames
//!
//! An `AudioFrame` is the unit of work that crosses the relay: one payload plus
//! the codec it is encoded with. Frames are never stored, they are decoded from
//! a message, transcoded, re-encoded into the other leg's message and dropped.

use crate::audio::codec::{self, TranscodeError};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;

/// Codec tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// G.711 μ-law, one byte per sample (telephony leg)
    Mulaw,
    /// Signed 16-bit little-endian PCM, two bytes per sample (realtime leg)
    Pcm16,
}

impl AudioEncoding {
    /// Wire name used by the realtime API for this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Mulaw => "g711_ulaw",
            AudioEncoding::Pcm16 => "pcm16",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Mulaw => 1,
            AudioEncoding::Pcm16 => 2,
        }
    }
}

/// Failure to turn a transport payload into a usable frame.
#[derive(Debug)]
pub enum FrameError {
    /// Payload was not valid base64
    Base64(base64::DecodeError),
    /// Payload decoded but could not be transcoded
    Transcode(TranscodeError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Base64(err) => write!(f, "invalid base64 payload: {}", err),
            FrameError::Transcode(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<base64::DecodeError> for FrameError {
    fn from(err: base64::DecodeError) -> Self {
        FrameError::Base64(err)
    }
}

impl From<TranscodeError> for FrameError {
    fn from(err: TranscodeError) -> Self {
        FrameError::Transcode(err)
    }
}

/// One chunk of audio in a known encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub encoding: AudioEncoding,
    pub data: Vec<u8>,
}

impl AudioFrame {
    pub fn new(encoding: AudioEncoding, data: Vec<u8>) -> Self {
        Self { encoding, data }
    }

    /// Decode a base64 transport payload.
    pub fn from_base64(encoding: AudioEncoding, payload: &str) -> Result<Self, FrameError> {
        let data = BASE64.decode(payload.trim())?;
        Ok(Self { encoding, data })
    }

    /// Encode the payload for a JSON message.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    /// Number of samples in the frame.
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.encoding.bytes_per_sample()
    }

    /// Convert to the other encoding.
    ///
    /// ## Conversion:
    /// - **Mulaw → Pcm16**: always succeeds, doubles the byte length
    /// - **Pcm16 → Mulaw**: fails on an odd byte count, halves the byte length
    pub fn transcode(&self) -> Result<AudioFrame, TranscodeError> {
        match self.encoding {
            AudioEncoding::Mulaw => Ok(AudioFrame::new(
                AudioEncoding::Pcm16,
                codec::mulaw_to_pcm16(&self.data),
            )),
            AudioEncoding::Pcm16 => Ok(AudioFrame::new(
                AudioEncoding::Mulaw,
                codec::pcm16_to_mulaw(&self.data)?,
            )),
        }
    }
}
