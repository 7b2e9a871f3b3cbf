//! # Relay
//!
//! Everything between an accepted media stream and the realtime AI socket:
//! admission, the two legs, and the per-call session that joins them.

pub mod dispatcher;
pub mod downstream;
pub mod gate;
pub mod leg;
pub mod runtime;
pub mod session;
pub mod upstream;

pub use dispatcher::{relay_upgrade, RelayDispatcher};
