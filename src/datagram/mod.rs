//! Datagram relaying.
//!
//! # Data Flow
//! ```text
//! Listen mode:
//!     socket.recv_from → access check (UDP only) → learned peer fixed
//!
//! Relay phase:
//!     stdin → input task → send / send_to(learned peer)
//!     socket → receive loop (100 ms polls) → peer filter → output
//!
//! Input EOF (connect) or input error → AbortSignal → receive loop exits
//! ```
//!
//! # Design Decisions
//! - The abort slot holds at most one notification; raising never blocks
//! - Timed-out polls are not errors, only a chance to check the abort slot
//! - The learned peer never changes once set

pub mod bridge;

pub use bridge::{AbortSignal, BridgeMode, BridgeOptions, DatagramBridge, MAX_DATAGRAM, POLL_INTERVAL};
pub use crate::net::DatagramSocket;
