//! `tarsy-gateway` — HTTP/WebSocket surface, event fan-out and the
//! investigation runtime of the TARSy alert-triage service.

pub mod api;
pub mod events;
pub mod runtime;
pub mod state;
