//! Live capture shell for websocket record streams.
//!
//! Wires the websocket transport into a `spout_core` session, with TOML
//! configuration and CLI overrides provided by the binary.

pub mod config;
pub mod ws;

pub use config::CaptureConfig;
pub use ws::{WsConfig, WsTransport};
