//! # Realtime AI Messages
//!
//! JSON events exchanged with the conversational AI over the upstream leg.
//! Every message carries a `type` tag; audio travels as base64 PCM16.

use serde::{Deserialize, Serialize};

/// Messages sent to the realtime API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeOutbound {
    /// One-time session configuration, sent right after the leg opens
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    /// Append caller audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64 PCM16 audio
        audio: String,
    },

    /// Submit whatever is in the input buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
}

/// Body of `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub turn_detection: TurnDetection,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub voice: String,
    pub instructions: String,
    pub modalities: Vec<String>,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

impl TurnDetection {
    /// Let the server decide when the caller has finished speaking.
    pub fn server_vad() -> Self {
        Self { kind: "server_vad".to_string() }
    }
}

/// Messages received from the realtime API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeInbound {
    /// A chunk of synthesized speech
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        /// Base64 PCM16 audio
        delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },

    /// The model finished a response (end of turn)
    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "error")]
    Error { error: RealtimeErrorBody },

    /// Transcripts, rate limits and everything else the relay does not act on
    #[serde(other)]
    Unknown,
}

/// Error details reported by the realtime API.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RealtimeErrorBody {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
