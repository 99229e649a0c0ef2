//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP peer / first UDP datagram:
//!     → access_control.rs (address, bare host, reverse names)
//!     → allow-list hit, or deny-list miss
//!     → registered (stream) or learned as peer (datagram)
//! ```
//!
//! # Design Decisions
//! - Table built once at startup, read-only afterwards
//! - Allow entries override deny entries for the same identifier
//! - Reverse DNS sits behind a trait so `no_dns` and tests avoid the network

pub mod access_control;

pub use access_control::{host_identifiers, AccessControl, NoResolve, ReverseResolver, SystemResolver};
