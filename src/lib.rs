//! Depot - a small networked file registry
//!
//! A TCP server stores uploaded files in a shared directory, tracks which
//! client owns each file, and lets any connected client list, download, or
//! delete files subject to ownership rules. Messages after the plain-text
//! handshake travel as length-prefixed frames carrying bincode-encoded
//! command/response objects.

pub mod cli;
pub mod client;
pub mod framing;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod server;
