//! netrelay: a netcat-style relay between stdin/stdout and TCP, UDP, Unix
//! stream and Unix datagram sockets.

// Roles
pub mod client;
pub mod datagram;
pub mod server;

// Plumbing
pub mod config;
pub mod error;
pub mod net;
pub mod relay;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use client::ConnectionEngine;
pub use config::Config;
pub use datagram::DatagramBridge;
pub use error::{RelayError, RelayResult};
pub use lifecycle::Shutdown;
pub use server::{ConnectionRegistry, ListenerHub};
