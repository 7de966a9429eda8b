//! HTTP/WebSocket process wrapper around the dialogue core: session
//! lifecycle routes, the duplex audio channel, and the push-only event
//! channel.

pub mod rate_limit;
pub mod server;
pub mod state;
