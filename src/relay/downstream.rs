//! # Telephony WebSocket Leg
//!
//! The downstream leg of a session: one actix actor per telephony media
//! stream. The actor does no relaying itself. It forwards every frame it
//! receives to the session coordinator as a `LegEvent` and writes whatever the
//! coordinator hands back through `DownstreamHandle`.
//!
//! ## Actor Model:
//! Each WebSocket connection is an independent actor. Frames arrive through
//! `StreamHandler` in socket order; outbound frames and the close request are
//! actix messages, so they are applied in the order the session sent them.
//!
//! ## Heartbeat:
//! A media stream sends audio continuously while a call is up. If nothing at
//! all arrives for `CLIENT_TIMEOUT`, the leg is treated as failed.

use crate::relay::leg::{LegEvent, LegHandle};

use actix::prelude::*;
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How often the actor checks for a silent peer.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Silence longer than this fails the leg.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one telephony media stream.
pub struct TelephonyLeg {
    /// Where frames and lifecycle events are reported
    events: mpsc::UnboundedSender<LegEvent>,

    /// Last time anything arrived from the peer
    last_heartbeat: Instant,

    /// Whether Closed/Error has already been reported
    reported_end: bool,
}

impl TelephonyLeg {
    pub fn new(events: mpsc::UnboundedSender<LegEvent>) -> Self {
        Self {
            events,
            last_heartbeat: Instant::now(),
            reported_end: false,
        }
    }

    fn report(&mut self, event: LegEvent) {
        if self.reported_end {
            return;
        }
        if matches!(event, LegEvent::Closed | LegEvent::Error(_)) {
            self.reported_end = true;
        }
        // The coordinator may already be gone after teardown
        let _ = self.events.send(event);
    }
}

/// Message for sending one text frame to the telephony provider.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendFrame(pub String);

/// Message asking the actor to close the socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseLeg;

impl Actor for TelephonyLeg {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!("Telephony leg started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Telephony leg silent for {:?}, closing", CLIENT_TIMEOUT);
                act.report(LegEvent::Error("heartbeat timeout".to_string()));
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        debug!("Telephony leg stopped");
        self.report(LegEvent::Closed);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TelephonyLeg {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => {
                self.report(LegEvent::Text(text.to_string()));
            }
            Ok(ws::Message::Binary(data)) => {
                warn!("Ignoring {} byte binary frame on telephony leg", data.len());
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!("Telephony leg closed by peer: {:?}", reason);
                self.report(LegEvent::Closed);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!("Telephony leg protocol error: {}", err);
                self.report(LegEvent::Error(err.to_string()));
                ctx.stop();
            }
        }
    }
}

impl Handler<SendFrame> for TelephonyLeg {
    type Result = ();

    fn handle(&mut self, msg: SendFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseLeg> for TelephonyLeg {
    type Result = ();

    fn handle(&mut self, _msg: CloseLeg, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// The session's handle on its telephony leg.
pub struct DownstreamHandle {
    addr: Addr<TelephonyLeg>,
    close_requested: bool,
}

impl DownstreamHandle {
    pub fn new(addr: Addr<TelephonyLeg>) -> Self {
        Self {
            addr,
            close_requested: false,
        }
    }
}

impl LegHandle for DownstreamHandle {
    fn send_text(&mut self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.addr.do_send(SendFrame(text));
        true
    }

    fn close(&mut self) {
        if self.close_requested {
            return;
        }
        self.close_requested = true;
        // A stopped actor drops the message, which is what we want
        self.addr.do_send(CloseLeg);
    }

    fn is_open(&self) -> bool {
        !self.close_requested && self.addr.connected()
    }
}
