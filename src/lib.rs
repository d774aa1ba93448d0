//! voice-gate: always-on wake word, voice authentication and session
//! control for a personal assistant client
//!
//! The [`state::Controller`] ties the pieces together; everything it talks
//! to (recognizer, synthesizer, backend, host) sits behind a trait so it can
//! be driven by fakes.

pub mod auth;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod ipc;
pub mod lifecycle;
pub mod recognition;
pub mod session;
pub mod speech;
pub mod state;
pub mod wake;
