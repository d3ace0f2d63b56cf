//! HTTP API for the Executa handoff service.
//!
//! The binary in `main.rs` wires configuration, storage and the outbox
//! worker around [`router`].

pub mod http;

pub use http::{router, AppState};
