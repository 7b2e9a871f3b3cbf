//! # Leg Handles
//!
//! A session talks to each of its two connections through a `LegHandle` and
//! hears from them through a stream of `LegEvent`s. The handle side is
//! fire-and-forget: queuing a frame never waits for the socket.
//!
//! ## Why a trait:
//! The downstream leg is an actix actor and the upstream leg is a pair of
//! tokio tasks around a tungstenite socket. The session state machine only
//! needs "send", "close" and "is it open", so both sit behind the same trait
//! and tests can swap in recording fakes.

/// Something that happened on a leg, delivered to the session in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegEvent {
    /// A text frame arrived
    Text(String),
    /// The leg is closed (either side initiated it)
    Closed,
    /// The transport failed; the leg is gone
    Error(String),
}

/// Outbound half of a leg, exclusively owned by one session.
pub trait LegHandle {
    /// Queue a text frame. Returns `false` when the leg is no longer open and
    /// the frame was dropped.
    fn send_text(&mut self, text: String) -> bool;

    /// Ask the leg to close. Calling this on a closed leg is a no-op.
    fn close(&mut self);

    /// Whether frames queued now can still reach the peer.
    fn is_open(&self) -> bool;
}
