//! Core building blocks for event-stream capture sessions.
//!
//! A [`StreamSession`] drives a [`StreamTransport`] and feeds every
//! delivered record through an [`IngestListener`], which updates
//! [`ArrivalStats`] and lands the payload in a [`RecordBuffer`]. The
//! scripted transport replays canned frame sequences for tests and
//! offline runs.

pub mod buffer;
pub mod listener;
pub mod session;
pub mod stats;
pub mod transport;

pub use buffer::RecordBuffer;
pub use listener::{IngestListener, StreamListener};
pub use session::{SessionConfig, SessionError, SessionState, StreamSession};
pub use stats::{ArrivalSnapshot, ArrivalStats, PrecisionOverflow};
pub use transport::scripted::{ScriptedFrame, ScriptedTransport};
pub use transport::{RecordDeliveryError, StreamTransport, TransportFault};
