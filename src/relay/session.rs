//! # Relay Session
//!
//! One `Session` per call. It owns both leg handles exclusively and is the only
//! place where messages from one leg become messages on the other.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: telephony leg attached, upstream being opened
//! 2. **Active**: both legs open, audio flows both ways
//! 3. **Closing**: stop, close or error seen on a leg; both legs asked to close
//! 4. **Closed**: both legs confirmed closed (or the close grace ran out)
//!
//! ## Lock-step teardown:
//! Any close or error on one leg closes the other. Once `Closed`, every event
//! is discarded without looking at it.
//!
//! The session itself is synchronous. It never awaits; the runtime feeds it one
//! event at a time and each event runs to completion.

use crate::audio::{AudioEncoding, AudioFrame};
use crate::config::PersonaConfig;
use crate::error::{Leg, RelayError};
use crate::protocol::{
    RealtimeInbound, RealtimeOutbound, SessionSettings, TelephonyInbound, TelephonyOutbound, TurnDetection,
};
use crate::relay::leg::{LegEvent, LegHandle};

use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// Everything a session needs to know about its route, fixed at creation.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub route: String,
    pub persona: Arc<PersonaConfig>,
    pub temperature: f32,
}

/// What happened during a session, reported once it ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub route: String,
    pub stream_sid: Option<String>,
    pub reached_active: bool,
    pub frames_upstream: u64,
    pub frames_downstream: u64,
    pub frames_dropped: u64,
    pub marks_sent: u64,
    /// Why the session ended; `None` for a clean stop from the caller
    pub end_reason: Option<RelayError>,
}

pub struct Session<D: LegHandle, U: LegHandle> {
    id: Uuid,
    profile: SessionProfile,
    state: SessionState,

    /// Bound by the first `start` event, never overwritten
    stream_sid: Option<String>,

    downstream: D,
    upstream: Option<U>,

    /// Confirmed closed, as opposed to merely asked to close
    downstream_closed: bool,
    upstream_closed: bool,

    /// Audio appended upstream since the last commit
    uncommitted_audio: bool,
    commit_sent: bool,

    mark_sequence: u64,
    summary: SessionSummary,
}

impl<D: LegHandle, U: LegHandle> Session<D, U> {
    /// Create a session in `Connecting` around an accepted telephony leg.
    pub fn new(downstream: D, profile: SessionProfile) -> Self {
        let id = Uuid::new_v4();
        info!(
            session_id = %id,
            route = %profile.route,
            voice = %profile.persona.voice,
            "Session created"
        );

        let summary = SessionSummary {
            session_id: id.to_string(),
            route: profile.route.clone(),
            ..Default::default()
        };

        Self {
            id,
            profile,
            state: SessionState::Connecting,
            stream_sid: None,
            downstream,
            upstream: None,
            downstream_closed: false,
            upstream_closed: false,
            uncommitted_audio: false,
            commit_sent: false,
            mark_sequence: 0,
            summary,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn persona(&self) -> &PersonaConfig {
        &self.profile.persona
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            stream_sid: self.stream_sid.clone(),
            ..self.summary.clone()
        }
    }

    /// The one-time configuration sent when the upstream leg opens.
    pub fn session_update(&self) -> RealtimeOutbound {
        RealtimeOutbound::SessionUpdate {
            session: SessionSettings {
                turn_detection: TurnDetection::server_vad(),
                input_audio_format: AudioEncoding::Pcm16.as_str().to_string(),
                output_audio_format: AudioEncoding::Pcm16.as_str().to_string(),
                voice: self.profile.persona.voice.clone(),
                instructions: self.profile.persona.instructions.clone(),
                modalities: vec!["text".to_string(), "audio".to_string()],
                temperature: self.profile.temperature,
            },
        }
    }

    /// The upstream leg opened: configure it and go `Active`.
    ///
    /// If the session already left `Connecting` (the caller hung up while we
    /// were dialing out), the new leg is closed straight away.
    pub fn attach_upstream(&mut self, upstream: U) {
        self.upstream = Some(upstream);

        if self.state != SessionState::Connecting {
            warn!(session_id = %self.id, "Upstream opened after teardown began, closing it");
            self.close_upstream();
            self.check_closed();
            return;
        }

        let update = self.session_update();
        if !self.send_upstream(&update) {
            self.begin_close(Some(RelayError::PeerClosed(Leg::Upstream)));
            return;
        }

        self.state = SessionState::Active;
        self.summary.reached_active = true;
        info!(
            session_id = %self.id,
            route = %self.profile.route,
            voice = %self.persona().voice,
            "Session active"
        );
    }

    /// The upstream leg could not be opened: close the telephony leg and end.
    pub fn fail_connect(&mut self, err: RelayError) {
        warn!(session_id = %self.id, "{}", err);
        self.summary.end_reason = Some(err);
        self.downstream.close();
        self.upstream_closed = true;
        self.state = SessionState::Closed;
    }

    /// Handle one event from the telephony leg.
    pub fn handle_downstream(&mut self, event: LegEvent) {
        if self.state == SessionState::Closed {
            debug!(session_id = %self.id, "Discarding downstream event after close");
            return;
        }

        match event {
            LegEvent::Text(text) => self.on_telephony_message(&text),
            LegEvent::Closed => {
                self.downstream_closed = true;
                self.begin_close(Some(RelayError::PeerClosed(Leg::Downstream)));
            }
            LegEvent::Error(detail) => {
                self.downstream_closed = true;
                self.begin_close(Some(RelayError::PeerError {
                    leg: Leg::Downstream,
                    detail,
                }));
            }
        }
    }

    /// Handle one event from the realtime leg.
    pub fn handle_upstream(&mut self, event: LegEvent) {
        if self.state == SessionState::Closed {
            debug!(session_id = %self.id, "Discarding upstream event after close");
            return;
        }

        match event {
            LegEvent::Text(text) => self.on_realtime_message(&text),
            LegEvent::Closed => {
                self.upstream_closed = true;
                self.begin_close(Some(RelayError::PeerClosed(Leg::Upstream)));
            }
            LegEvent::Error(detail) => {
                self.upstream_closed = true;
                self.begin_close(Some(RelayError::PeerError {
                    leg: Leg::Upstream,
                    detail,
                }));
            }
        }
    }

    /// Give up waiting for close confirmations.
    pub fn force_close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        warn!(
            session_id = %self.id,
            downstream_confirmed = self.downstream_closed,
            upstream_confirmed = self.upstream_closed,
            "Close grace elapsed, abandoning unconfirmed legs"
        );
        self.downstream.close();
        self.close_upstream();
        self.state = SessionState::Closed;
    }

    fn on_telephony_message(&mut self, text: &str) {
        let message = match serde_json::from_str::<TelephonyInbound>(text) {
            Ok(message) => message,
            Err(e) => {
                let err = RelayError::MessageParseFailure {
                    leg: Leg::Downstream,
                    detail: e.to_string(),
                };
                warn!(session_id = %self.id, "{}", err);
                return;
            }
        };

        match message {
            TelephonyInbound::Start { start } => {
                if let Some(existing) = &self.stream_sid {
                    debug!(
                        session_id = %self.id,
                        stream_sid = %existing,
                        ignored = %start.stream_sid,
                        "Ignoring repeated start"
                    );
                    return;
                }
                if let Some(format) = start.media_format.as_ref().filter(|f| !f.is_supported()) {
                    warn!(session_id = %self.id, "Unexpected media format {:?}", format);
                }
                info!(session_id = %self.id, stream_sid = %start.stream_sid, "Stream started");
                self.stream_sid = Some(start.stream_sid);
            }
            TelephonyInbound::Media { media } => self.forward_caller_audio(&media.payload),
            TelephonyInbound::Stop => {
                info!(session_id = %self.id, "Stream stopped by caller");
                self.commit_once();
                self.begin_close(None);
            }
            TelephonyInbound::Connected | TelephonyInbound::Mark | TelephonyInbound::Dtmf => {
                debug!(session_id = %self.id, "Telephony event {:?}", message);
            }
            TelephonyInbound::Unknown => {
                debug!(session_id = %self.id, "Ignoring unknown telephony event");
            }
        }
    }

    fn on_realtime_message(&mut self, text: &str) {
        let message = match serde_json::from_str::<RealtimeInbound>(text) {
            Ok(message) => message,
            Err(e) => {
                let err = RelayError::MessageParseFailure {
                    leg: Leg::Upstream,
                    detail: e.to_string(),
                };
                warn!(session_id = %self.id, "{}", err);
                return;
            }
        };

        match message {
            RealtimeInbound::ResponseAudioDelta { delta, .. } => self.forward_assistant_audio(&delta),
            RealtimeInbound::ResponseDone => self.send_mark(),
            RealtimeInbound::SessionCreated | RealtimeInbound::SessionUpdated => {
                debug!(session_id = %self.id, "Realtime session event {:?}", message);
            }
            RealtimeInbound::Error { error } => {
                warn!(
                    session_id = %self.id,
                    kind = ?error.kind,
                    code = ?error.code,
                    "Realtime API error: {}",
                    error.message.as_deref().unwrap_or("(no message)")
                );
            }
            RealtimeInbound::Unknown => {}
        }
    }

    /// μ-law from the caller → PCM16 append on the realtime leg.
    fn forward_caller_audio(&mut self, payload: &str) {
        if self.state != SessionState::Active || !self.upstream_is_open() {
            self.summary.frames_dropped += 1;
            return;
        }

        let frame = match AudioFrame::from_base64(AudioEncoding::Mulaw, payload)
            .map_err(RelayError::from)
            .and_then(|frame| frame.transcode().map_err(RelayError::from))
        {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %self.id, "Dropping caller frame: {}", err);
                self.summary.frames_dropped += 1;
                return;
            }
        };

        trace!(session_id = %self.id, samples = frame.sample_count(), "Caller audio");
        let append = RealtimeOutbound::InputAudioBufferAppend {
            audio: frame.to_base64(),
        };
        if self.send_upstream(&append) {
            self.summary.frames_upstream += 1;
            self.uncommitted_audio = true;
        } else {
            self.summary.frames_dropped += 1;
        }
    }

    /// PCM16 from the assistant → μ-law media on the telephony leg.
    fn forward_assistant_audio(&mut self, delta: &str) {
        let Some(stream_sid) = self.stream_sid.clone() else {
            debug!(session_id = %self.id, "Dropping assistant audio before start");
            self.summary.frames_dropped += 1;
            return;
        };
        if !self.downstream.is_open() {
            self.summary.frames_dropped += 1;
            return;
        }

        let frame = match AudioFrame::from_base64(AudioEncoding::Pcm16, delta)
            .map_err(RelayError::from)
            .and_then(|frame| frame.transcode().map_err(RelayError::from))
        {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %self.id, "Dropping assistant frame: {}", err);
                self.summary.frames_dropped += 1;
                return;
            }
        };

        trace!(session_id = %self.id, samples = frame.sample_count(), "Assistant audio");
        if self.send_downstream(&TelephonyOutbound::media(&stream_sid, frame.to_base64())) {
            self.summary.frames_downstream += 1;
        } else {
            self.summary.frames_dropped += 1;
        }
    }

    /// End of an assistant turn → named mark on the telephony leg.
    fn send_mark(&mut self) {
        let Some(stream_sid) = self.stream_sid.clone() else {
            return;
        };
        if !self.downstream.is_open() {
            return;
        }

        let name = format!(
            "response-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            self.mark_sequence
        );
        self.mark_sequence += 1;

        if self.send_downstream(&TelephonyOutbound::mark(&stream_sid, name)) {
            self.summary.marks_sent += 1;
        }
    }

    /// Submit buffered caller audio, at most once per session.
    fn commit_once(&mut self) {
        if self.commit_sent || !self.upstream_is_open() {
            return;
        }
        self.commit_sent = true;
        self.uncommitted_audio = false;
        self.send_upstream(&RealtimeOutbound::InputAudioBufferCommit);
    }

    /// Start teardown. Only the first trigger decides the end reason; later
    /// calls just record confirmations.
    fn begin_close(&mut self, reason: Option<RelayError>) {
        if self.state == SessionState::Closing || self.state == SessionState::Closed {
            self.check_closed();
            return;
        }
        self.summary.end_reason = reason;

        let reason = match &self.summary.end_reason {
            Some(err) => err.to_string(),
            None => "stop".to_string(),
        };
        info!(
            session_id = %self.id,
            from = self.state.as_str(),
            reason = %reason,
            "Session closing"
        );
        self.state = SessionState::Closing;

        if self.uncommitted_audio {
            self.commit_once();
        }

        self.downstream.close();
        self.close_upstream();
        self.check_closed();
    }

    fn close_upstream(&mut self) {
        match self.upstream.as_mut() {
            Some(upstream) => upstream.close(),
            // Never opened, nothing to wait for
            None => self.upstream_closed = true,
        }
    }

    fn check_closed(&mut self) {
        if self.state == SessionState::Closing && self.downstream_closed && self.upstream_closed {
            self.state = SessionState::Closed;
            info!(
                session_id = %self.id,
                frames_upstream = self.summary.frames_upstream,
                frames_downstream = self.summary.frames_downstream,
                frames_dropped = self.summary.frames_dropped,
                "Session closed"
            );
        }
    }

    fn upstream_is_open(&self) -> bool {
        !self.upstream_closed && self.upstream.as_ref().is_some_and(|u| u.is_open())
    }

    fn send_upstream(&mut self, message: &RealtimeOutbound) -> bool {
        let Some(upstream) = self.upstream.as_mut() else {
            return false;
        };
        match serde_json::to_string(message) {
            Ok(json) => upstream.send_text(json),
            Err(e) => {
                warn!(session_id = %self.id, "Failed to serialize upstream message: {}", e);
                false
            }
        }
    }

    fn send_downstream(&mut self, message: &TelephonyOutbound) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.downstream.send_text(json),
            Err(e) => {
                warn!(session_id = %self.id, "Failed to serialize downstream message: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec;
    use crate::config::AppConfig;
    use crate::relay::leg::fake::FakeLeg;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn profile(route: &str) -> SessionProfile {
        let config = AppConfig::default();
        SessionProfile {
            route: route.to_string(),
            persona: Arc::new(config.persona(route).unwrap().clone()),
            temperature: config.relay.temperature,
        }
    }

    /// A session that has reached Active, plus observers for both legs.
    fn active_session(route: &str) -> (Session<FakeLeg, FakeLeg>, FakeLeg, FakeLeg) {
        let downstream = FakeLeg::new();
        let upstream = FakeLeg::new();
        let mut session = Session::new(downstream.clone(), profile(route));
        session.attach_upstream(upstream.clone());
        assert_eq!(session.state(), SessionState::Active);
        (session, downstream, upstream)
    }

    fn start(sid: &str) -> LegEvent {
        LegEvent::Text(format!(r#"{{"event":"start","start":{{"streamSid":"{}"}}}}"#, sid))
    }

    fn media(payload: &[u8]) -> LegEvent {
        LegEvent::Text(format!(
            r#"{{"event":"media","media":{{"payload":"{}"}}}}"#,
            BASE64.encode(payload)
        ))
    }

    fn stop() -> LegEvent {
        LegEvent::Text(r#"{"event":"stop"}"#.to_string())
    }

    fn delta(pcm: &[u8]) -> LegEvent {
        LegEvent::Text(format!(
            r#"{{"type":"response.audio.delta","delta":"{}"}}"#,
            BASE64.encode(pcm)
        ))
    }

    fn types(leg: &FakeLeg) -> Vec<String> {
        leg.sent_json()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_attach_sends_session_update() {
        let (session, _downstream, upstream) = active_session("/stream-sales");

        let sent = upstream.sent_json();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "session.update");
        assert_eq!(sent[0]["session"]["voice"], "alloy");
        assert_eq!(sent[0]["session"]["input_audio_format"], "pcm16");
        assert_eq!(sent[0]["session"]["output_audio_format"], "pcm16");
        assert_eq!(sent[0]["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(sent[0]["session"]["instructions"], session.persona().instructions.as_str());
        assert!(session.summary().reached_active);
    }

    /// Sales route, start MZ100 then stop: exactly one commit, Closed once both legs confirm.
    #[test]
    fn test_start_then_stop_scenario() {
        let (mut session, downstream, upstream) = active_session("/stream-sales");
        assert_eq!(session.persona().voice, "alloy");
        assert!(session.persona().instructions.contains("sales"));

        session.handle_downstream(start("MZ100"));
        assert_eq!(session.stream_sid(), Some("MZ100"));

        session.handle_downstream(stop());
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(
            types(&upstream),
            vec!["session.update".to_string(), "input_audio_buffer.commit".to_string()]
        );
        assert!(downstream.was_closed());
        assert!(upstream.was_closed());

        session.handle_downstream(LegEvent::Closed);
        assert_eq!(session.state(), SessionState::Closing);
        session.handle_upstream(LegEvent::Closed);
        assert_eq!(session.state(), SessionState::Closed);

        let commits = types(&upstream).iter().filter(|t| *t == "input_audio_buffer.commit").count();
        assert_eq!(commits, 1);
        assert_eq!(session.summary().end_reason, None);
    }

    /// A 160-byte μ-law frame becomes one append carrying 320 bytes of PCM16.
    #[test]
    fn test_media_frame_sizes() {
        let (mut session, _downstream, upstream) = active_session("/stream-sales");
        session.handle_downstream(start("MZ1"));

        let mulaw: Vec<u8> = (0..160).map(|i| i as u8).collect();
        session.handle_downstream(media(&mulaw));

        let sent = upstream.sent_json();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["type"], "input_audio_buffer.append");

        let pcm = BASE64.decode(sent[1]["audio"].as_str().unwrap()).unwrap();
        assert_eq!(pcm.len(), 320);
        assert_eq!(pcm, codec::mulaw_to_pcm16(&mulaw));
        assert_eq!(session.summary().frames_upstream, 1);
    }

    #[test]
    fn test_assistant_audio_becomes_telephony_media() {
        let (mut session, downstream, _upstream) = active_session("/stream-support");
        session.handle_downstream(start("MZ7"));

        let pcm = codec::mulaw_to_pcm16(&[0x10, 0x90, 0xFF, 0x7F]);
        session.handle_upstream(delta(&pcm));

        let sent = downstream.sent_json();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event"], "media");
        assert_eq!(sent[0]["streamSid"], "MZ7");
        let mulaw = BASE64.decode(sent[0]["media"]["payload"].as_str().unwrap()).unwrap();
        assert_eq!(mulaw, vec![0x10, 0x90, 0xFF, 0xFF]);
    }

    #[test]
    fn test_response_done_sends_unique_marks() {
        let (mut session, downstream, _upstream) = active_session("/stream-sales");
        session.handle_downstream(start("MZ1"));

        let done = LegEvent::Text(r#"{"type":"response.done","response":{}}"#.to_string());
        session.handle_upstream(done.clone());
        session.handle_upstream(done);

        let sent = downstream.sent_json();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m["event"] == "mark" && m["streamSid"] == "MZ1"));
        assert_ne!(sent[0]["mark"]["name"], sent[1]["mark"]["name"]);
        assert_eq!(session.summary().marks_sent, 2);
    }

    #[test]
    fn test_second_start_is_ignored() {
        let (mut session, _downstream, _upstream) = active_session("/stream-sales");
        session.handle_downstream(start("MZ1"));
        session.handle_downstream(start("MZ2"));
        assert_eq!(session.stream_sid(), Some("MZ1"));
    }

    #[test]
    fn test_malformed_and_unknown_messages_are_contained() {
        let (mut session, downstream, upstream) = active_session("/stream-sales");
        session.handle_downstream(start("MZ1"));

        session.handle_downstream(LegEvent::Text("{not json".to_string()));
        session.handle_downstream(LegEvent::Text(r#"{"event":"media"}"#.to_string()));
        session.handle_downstream(LegEvent::Text(r#"{"event":"brand_new"}"#.to_string()));
        session.handle_upstream(LegEvent::Text(r#"{"type":"response.audio.delta"}"#.to_string()));
        session.handle_upstream(LegEvent::Text(r#"{"type":"rate_limits.updated"}"#.to_string()));
        session.handle_upstream(LegEvent::Text(
            r#"{"type":"error","error":{"message":"slow down"}}"#.to_string(),
        ));

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(upstream.sent().len(), 1);
        assert!(downstream.sent().is_empty());
    }

    #[test]
    fn test_bad_audio_payloads_are_dropped() {
        let (mut session, downstream, upstream) = active_session("/stream-sales");
        session.handle_downstream(start("MZ1"));

        session.handle_downstream(LegEvent::Text(
            r#"{"event":"media","media":{"payload":"***"}}"#.to_string(),
        ));
        // Odd-length PCM cannot be compressed
        session.handle_upstream(delta(&[1, 2, 3]));

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(upstream.sent().len(), 1);
        assert!(downstream.sent().is_empty());
        assert_eq!(session.summary().frames_dropped, 2);
    }

    #[test]
    fn test_media_before_active_is_dropped() {
        let downstream = FakeLeg::new();
        let mut session: Session<FakeLeg, FakeLeg> = Session::new(downstream.clone(), profile("/stream-sales"));

        session.handle_downstream(start("MZ1"));
        session.handle_downstream(media(&[0xFF; 160]));

        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.stream_sid(), Some("MZ1"));
        assert_eq!(session.summary().frames_dropped, 1);

        let upstream = FakeLeg::new();
        session.attach_upstream(upstream.clone());
        assert_eq!(types(&upstream), vec!["session.update".to_string()]);
    }

    #[test]
    fn test_media_dropped_when_upstream_not_open() {
        let (mut session, _downstream, upstream) = active_session("/stream-sales");
        upstream.state.borrow_mut().open = false;

        session.handle_downstream(media(&[0xFF; 160]));
        assert_eq!(session.summary().frames_dropped, 1);
        assert_eq!(upstream.sent().len(), 1);
    }

    #[test]
    fn test_assistant_audio_before_start_is_dropped() {
        let (mut session, downstream, _upstream) = active_session("/stream-sales");
        session.handle_upstream(delta(&[0, 0, 0, 0]));
        assert!(downstream.sent().is_empty());
    }

    /// Lock-step teardown for every leg/trigger combination.
    #[test]
    fn test_lock_step_teardown() {
        type Fake = Session<FakeLeg, FakeLeg>;
        let triggers: Vec<(&str, fn(&mut Fake))> = vec![
            ("downstream close", |s: &mut Fake| s.handle_downstream(LegEvent::Closed)),
            ("downstream error", |s: &mut Fake| s.handle_downstream(LegEvent::Error("reset".into()))),
            ("upstream close", |s: &mut Fake| s.handle_upstream(LegEvent::Closed)),
            ("upstream error", |s: &mut Fake| s.handle_upstream(LegEvent::Error("reset".into()))),
        ];

        for (name, trigger) in triggers {
            let (mut session, downstream, upstream) = active_session("/stream-sales");
            trigger(&mut session);

            assert_eq!(session.state(), SessionState::Closing, "{}", name);
            assert!(downstream.was_closed(), "{}: downstream left open", name);
            assert!(upstream.was_closed(), "{}: upstream left open", name);
            assert!(session.summary().end_reason.as_ref().unwrap().is_fatal(), "{}", name);

            // The peer confirms and the session finishes
            session.handle_downstream(LegEvent::Closed);
            session.handle_upstream(LegEvent::Closed);
            assert_eq!(session.state(), SessionState::Closed, "{}", name);
        }
    }

    #[test]
    fn test_close_is_idempotent_and_late_events_are_discarded() {
        let (mut session, downstream, upstream) = active_session("/stream-sales");
        session.handle_downstream(start("MZ1"));
        session.handle_downstream(LegEvent::Closed);
        session.handle_downstream(LegEvent::Closed);
        session.handle_upstream(LegEvent::Closed);
        assert_eq!(session.state(), SessionState::Closed);

        session.handle_upstream(delta(&[0, 0]));
        session.handle_downstream(media(&[0xFF; 10]));
        session.handle_upstream(LegEvent::Error("late".into()));

        assert_eq!(session.state(), SessionState::Closed);
        assert!(downstream.sent().is_empty());
        assert_eq!(upstream.sent().len(), 1);
        assert_eq!(session.summary().end_reason, Some(RelayError::PeerClosed(Leg::Downstream)));
    }

    #[test]
    fn test_pending_audio_committed_on_downstream_close() {
        let (mut session, _downstream, upstream) = active_session("/stream-sales");
        session.handle_downstream(start("MZ1"));
        session.handle_downstream(media(&[0xFF; 160]));
        session.handle_downstream(LegEvent::Closed);

        assert_eq!(
            types(&upstream),
            vec![
                "session.update".to_string(),
                "input_audio_buffer.append".to_string(),
                "input_audio_buffer.commit".to_string()
            ]
        );
    }

    #[test]
    fn test_no_commit_when_upstream_closed_first() {
        let (mut session, _downstream, upstream) = active_session("/stream-sales");
        session.handle_downstream(media(&[0xFF; 160]));
        session.handle_upstream(LegEvent::Closed);
        assert!(!types(&upstream).contains(&"input_audio_buffer.commit".to_string()));
    }

    #[test]
    fn test_fail_connect_closes_downstream() {
        let downstream = FakeLeg::new();
        let mut session: Session<FakeLeg, FakeLeg> = Session::new(downstream.clone(), profile("/stream-sales"));

        session.fail_connect(RelayError::UpstreamConnectFailure("refused".into()));

        assert_eq!(session.state(), SessionState::Closed);
        assert!(downstream.was_closed());
        assert!(!session.summary().reached_active);
    }

    #[test]
    fn test_upstream_attached_after_hangup_is_closed() {
        let downstream = FakeLeg::new();
        let mut session: Session<FakeLeg, FakeLeg> = Session::new(downstream.clone(), profile("/stream-sales"));

        session.handle_downstream(stop());
        assert_eq!(session.state(), SessionState::Closing);
        session.handle_downstream(LegEvent::Closed);
        assert_eq!(session.state(), SessionState::Closed);

        let upstream = FakeLeg::new();
        session.attach_upstream(upstream.clone());
        assert!(upstream.was_closed());
        assert!(upstream.sent().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_force_close() {
        let (mut session, downstream, upstream) = active_session("/stream-sales");
        session.handle_downstream(stop());
        session.force_close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(downstream.close_calls(), 2);
        assert!(upstream.was_closed());
    }

    /// Two sessions on different routes share nothing.
    #[test]
    fn test_concurrent_sessions_are_isolated() {
        let (mut sales, sales_down, sales_up) = active_session("/stream-sales");
        let (mut support, support_down, support_up) = active_session("/stream-support");

        sales.handle_downstream(start("MZ-SALES"));
        support.handle_downstream(start("MZ-SUPPORT"));

        assert_eq!(sales.persona().voice, "alloy");
        assert_eq!(support.persona().voice, "shimmer");
        assert_eq!(sales_up.sent_json()[0]["session"]["voice"], "alloy");
        assert_eq!(support_up.sent_json()[0]["session"]["voice"], "shimmer");

        sales.handle_downstream(LegEvent::Closed);
        sales.handle_upstream(LegEvent::Closed);
        assert_eq!(sales.state(), SessionState::Closed);

        assert_eq!(support.state(), SessionState::Active);
        assert!(!support_down.was_closed());
        assert!(!support_up.was_closed());
        assert_eq!(support.stream_sid(), Some("MZ-SUPPORT"));

        support.handle_upstream(delta(&[0, 0]));
        let sent = support_down.sent_json();
        assert_eq!(sent[0]["streamSid"], "MZ-SUPPORT");
        assert!(sales_down.sent().is_empty());
        assert_ne!(sales.id(), support.id());
    }
}
