//! # Realtime STT Bridge
//!
//! Pairs one client WebSocket with one upstream speech-to-text WebSocket and
//! translates between their dialects for the lifetime of a voice session.
//!
//! ## Components:
//! - **machine**: Pure session state machine (`INIT → AWAITING_UPSTREAM → ACTIVE → CLOSED`)
//! - **protocol**: Client and upstream message formats plus the translation table
//! - **upstream**: The tokio task that owns the vendor socket
//!
//! The client-facing actor that drives all of this lives in `src/websocket.rs`.

pub mod machine;
pub mod protocol;
pub mod upstream;

pub use machine::{transition, BridgeAction, BridgeEvent, BridgeState, Discard, TimeoutKind};
