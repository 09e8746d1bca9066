//! The WebSocket side of the server: the room hub, the per-connection
//! lifecycle and the session service that turns messages into transitions.

pub mod handler;
pub mod hub;
pub mod service;
