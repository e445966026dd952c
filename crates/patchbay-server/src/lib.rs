//! Patchbay server - HTTP/WebSocket surface over the pty session engine.
//!
//! This library provides the HTTP routes, WebSocket handlers, and
//! application state for the server binary. It's separated from main.rs
//! to enable integration testing.

pub mod config;
pub mod global_ws;
pub mod logging;
pub mod routes;
pub mod state;
pub mod websocket;
