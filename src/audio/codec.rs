//! # G.711 μ-law Transcoding
//!
//! Stateless conversion between 8-bit μ-law telephony samples and signed 16-bit
//! little-endian linear PCM. Both legs of a call run at 8 kHz, so this is purely
//! a per-sample bit-depth change: no filtering, no resampling, no state carried
//! from one sample to the next.
//!
//! ## Sizes:
//! - **μ-law → PCM16**: output is exactly twice the input length
//! - **PCM16 → μ-law**: input must be even, output is half the input length
//!
//! ## Precision:
//! μ-law is lossy. Compressing a linear sample and expanding it again lands
//! within half a quantization step of the original (the step doubles with
//! every segment, from 8 in the first segment up to 1024 in the last).

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt;

/// Bias added to the magnitude before segment lookup (ITU-T G.711).
const BIAS: i32 = 0x84;

/// Largest magnitude that can be represented once the bias is added.
pub const CLIP: i32 = 32635;

/// Errors produced while transcoding a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeError {
    /// A PCM16 buffer must contain whole samples
    OddLength(usize),
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::OddLength(len) => {
                write!(f, "PCM16 payload has odd length {} (must be a whole number of 16-bit samples)", len)
            }
        }
    }
}

impl std::error::Error for TranscodeError {}

/// Expand one μ-law byte to a linear 16-bit sample.
pub fn decode_sample(encoded: u8) -> i16 {
    let inverted = !encoded;
    let sign = inverted & 0x80;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = inverted & 0x0F;

    let magnitude = ((((mantissa as i32) << 3) + BIAS) << exponent) - BIAS;

    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compress one linear 16-bit sample to a μ-law byte.
pub fn encode_sample(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    magnitude = magnitude.min(CLIP) + BIAS;

    // magnitude >> 7 is in 1..=255, its highest set bit is the segment
    let exponent = 31 - ((magnitude >> 7) as u32).leading_zeros();
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !(sign | ((exponent as i32) << 4) | mantissa) as u8
}

/// Expand a μ-law buffer into PCM16 little-endian bytes.
///
/// Never fails: every byte is a valid μ-law sample.
pub fn mulaw_to_pcm16(mulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw.len() * 2);
    for &byte in mulaw {
        // Writing into a Vec cannot fail
        let _ = pcm.write_i16::<LittleEndian>(decode_sample(byte));
    }
    pcm
}

/// Compress PCM16 little-endian bytes into a μ-law buffer.
///
/// ## Errors:
/// Returns `TranscodeError::OddLength` instead of silently dropping a trailing byte.
pub fn pcm16_to_mulaw(pcm: &[u8]) -> Result<Vec<u8>, TranscodeError> {
    if pcm.len() % 2 != 0 {
        return Err(TranscodeError::OddLength(pcm.len()));
    }

    Ok(pcm
        .chunks_exact(2)
        .map(|pair| encode_sample(LittleEndian::read_i16(pair)))
        .collect())
}
