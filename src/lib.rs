//! Tether - keeps a remote cloud sandbox alive while a playground session
//! is active.
//!
//! The server side owns a single sandbox handle: it provisions lazily,
//! recycles the sandbox after a window of inactivity, and proxies file and
//! prompt requests to it. The client side provides the heartbeat emitter
//! and the shared playground state the UI panels render from.

pub mod agent;
pub mod config;
pub mod error;
pub mod files;
pub mod heartbeat;
pub mod http_server;
pub mod lifecycle;
pub mod playground;
pub mod provisioner;
pub mod state;
