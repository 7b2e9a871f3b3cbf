//! # Session Runtime
//!
//! Drives one `Session` from upgrade to teardown. This is the only task that
//! touches the session, so everything arriving from both legs is applied in a
//! single sequence:
//!
//! 1. **Connect**: open the upstream leg under `connect_timeout` while still
//!    listening to the telephony leg (a caller may hang up mid-dial)
//! 2. **Relay**: select over both legs' events until the session closes
//! 3. **Grace**: once closing, wait at most `close_grace` for both legs to
//!    confirm before giving up on them
//!
//! The future is not `Send`: it is spawned on the actix worker that accepted
//! the upgrade, next to the telephony actor.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::relay::leg::{LegEvent, LegHandle};
use crate::relay::session::{Session, SessionProfile, SessionState, SessionSummary};
use crate::relay::upstream::UpstreamConnector;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::debug;

/// Time limits applied to every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub connect_timeout: Duration,
    pub close_grace: Duration,
}

impl SessionTiming {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            close_grace: config.close_grace(),
        }
    }
}

/// Run a session to completion and report what happened.
pub async fn run_session<D, C>(
    downstream: D,
    mut downstream_events: mpsc::UnboundedReceiver<LegEvent>,
    connector: &C,
    profile: SessionProfile,
    timing: SessionTiming,
) -> SessionSummary
where
    D: LegHandle,
    C: UpstreamConnector,
{
    let mut session: Session<D, C::Handle> = Session::new(downstream, profile);
    let (upstream_tx, mut upstream_events) = mpsc::unbounded_channel();

    let mut downstream_done = false;
    let mut upstream_done = false;

    {
        let connect = timeout(timing.connect_timeout, connector.connect(upstream_tx));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    match result {
                        Ok(Ok(upstream)) => session.attach_upstream(upstream),
                        Ok(Err(err)) => session.fail_connect(err),
                        Err(_) => session.fail_connect(RelayError::UpstreamConnectFailure(format!(
                            "no answer within {}ms",
                            timing.connect_timeout.as_millis()
                        ))),
                    }
                    break;
                }
                event = downstream_events.recv(), if !downstream_done => {
                    let event = event.unwrap_or_else(|| {
                        downstream_done = true;
                        LegEvent::Closed
                    });
                    session.handle_downstream(event);
                    if session.state() != SessionState::Connecting {
                        debug!(session_id = %session.id(), "Abandoning upstream connect");
                        break;
                    }
                }
            }
        }
    }

    let mut grace_deadline: Option<Instant> = None;

    while session.state() != SessionState::Closed {
        if session.state() == SessionState::Closing && grace_deadline.is_none() {
            grace_deadline = Some(Instant::now() + timing.close_grace);
        }
        let deadline = grace_deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            event = downstream_events.recv(), if !downstream_done => {
                let event = event.unwrap_or_else(|| {
                    downstream_done = true;
                    LegEvent::Closed
                });
                session.handle_downstream(event);
            }
            event = upstream_events.recv(), if !upstream_done => {
                let event = event.unwrap_or_else(|| {
                    upstream_done = true;
                    LegEvent::Closed
                });
                session.handle_upstream(event);
            }
            _ = sleep_until(deadline), if grace_deadline.is_some() => {
                session.force_close();
            }
            else => session.force_close(),
        }
    }

    session.summary()
}
