//! Listen-mode subsystem.
//!
//! # Data Flow
//! ```text
//! hub.rs: bind endpoint (tcp4 → tcp6 for unqualified networks)
//!     ├─ datagram endpoint → DatagramBridge (listen mode)
//!     ├─ single mode → accept one allowed peer → stdin ⇄ peer ⇄ output
//!     └─ keep-open / broker:
//!          accept → access check → ConnectionId → registry.rs
//!              → relay task per connection
//!                    broker: lines → registry.broadcast (all but sender)
//!                    otherwise: bytes → output; first conn also gets stdin
//! ```
//!
//! # Design Decisions
//! - The registry is owned by one accept loop, never global
//! - Relay tasks own their read halves; the registry owns the write halves
//! - Denial policy is explicit configuration (stop or skip)

pub mod hub;
pub mod registry;

pub use hub::{ListenEndpoint, ListenerHub};
pub use registry::ConnectionRegistry;
