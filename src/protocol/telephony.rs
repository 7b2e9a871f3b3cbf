//! # Telephony Media-Stream Messages
//!
//! JSON events exchanged with the telephony provider over the downstream leg.
//! Every message carries an `event` tag; audio travels as base64 μ-law.
//!
//! ## Inbound (provider → relay):
//! - `connected`: socket is up (informational)
//! - `start`: call begins, carries the stream identifier
//! - `media`: one chunk of caller audio
//! - `stop`: caller audio ended
//! - `mark`: a mark we sent earlier finished playing (informational)
//!
//! ## Outbound (relay → provider):
//! - `media`: one chunk of audio to play to the caller
//! - `mark`: a named boundary placed after a response

use serde::{Deserialize, Serialize};

/// Messages received from the telephony leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInbound {
    Connected,

    Start {
        start: StartMetadata,
    },

    Media {
        media: InboundMedia,
    },

    Stop,

    Mark,

    Dtmf,

    /// Any event this relay does not understand
    #[serde(other)]
    Unknown,
}

/// Body of the `start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMetadata {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,

    #[serde(rename = "callSid", default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,

    #[serde(rename = "mediaFormat", default, skip_serializing_if = "Option::is_none")]
    pub media_format: Option<MediaFormat>,
}

/// Audio format announced by the provider in the `start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
}

fn default_channels() -> u8 {
    1
}

impl MediaFormat {
    /// The only format the relay can transcode without resampling.
    pub fn is_supported(&self) -> bool {
        self.encoding.eq_ignore_ascii_case("audio/x-mulaw") && self.sample_rate == 8000 && self.channels == 1
    }
}

/// Body of an inbound `media` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMedia {
    /// Base64 μ-law audio
    pub payload: String,
}

/// Messages sent to the telephony leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkName,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkName {
    pub name: String,
}

impl TelephonyOutbound {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    pub fn mark(stream_sid: &str, name: String) -> Self {
        TelephonyOutbound::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkName { name },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ100",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ100"
        }"#;

        match serde_json::from_str::<TelephonyInbound>(json).unwrap() {
            TelephonyInbound::Start { start } => {
                assert_eq!(start.stream_sid, "MZ100");
                assert_eq!(start.call_sid.as_deref(), Some("CA1"));
                assert!(start.media_format.unwrap().is_supported());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_and_stop() {
        let media = r#"{"event":"media","media":{"track":"inbound","chunk":"2","timestamp":"5","payload":"/w=="},"streamSid":"MZ100"}"#;
        assert_eq!(
            serde_json::from_str::<TelephonyInbound>(media).unwrap(),
            TelephonyInbound::Media { media: InboundMedia { payload: "/w==".to_string() } }
        );

        let stop = r#"{"event":"stop","stop":{"callSid":"CA1"},"streamSid":"MZ100"}"#;
        assert_eq!(serde_json::from_str::<TelephonyInbound>(stop).unwrap(), TelephonyInbound::Stop);
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let json = r#"{"event":"something_new","foo":1}"#;
        assert_eq!(serde_json::from_str::<TelephonyInbound>(json).unwrap(), TelephonyInbound::Unknown);
    }

    #[test]
    fn test_malformed_messages_fail() {
        assert!(serde_json::from_str::<TelephonyInbound>(r#"{"media":{}}"#).is_err());
        assert!(serde_json::from_str::<TelephonyInbound>(r#"{"event":"media"}"#).is_err());
        assert!(serde_json::from_str::<TelephonyInbound>("not json").is_err());
    }

    #[test]
    fn test_outbound_shapes() {
        let media = serde_json::to_value(TelephonyOutbound::media("MZ1", "AAA=".to_string())).unwrap();
        assert_eq!(
            media,
            serde_json::json!({"event": "media", "streamSid": "MZ1", "media": {"payload": "AAA="}})
        );

        let mark = serde_json::to_value(TelephonyOutbound::mark("MZ1", "response-1".to_string())).unwrap();
        assert_eq!(
            mark,
            serde_json::json!({"event": "mark", "streamSid": "MZ1", "mark": {"name": "response-1"}})
        );
    }

    #[test]
    fn test_unsupported_media_format() {
        let format = MediaFormat { encoding: "audio/x-alaw".to_string(), sample_rate: 8000, channels: 1 };
        assert!(!format.is_supported());
    }
}
