//! Connect-mode subsystem.
//!
//! # Data Flow
//! ```text
//! engine.rs: scan configured? → scan_ports (probe each port, log open/closed)
//!     otherwise race tcp4 → tcp6 (or udp4 → udp6):
//!         stream   → Dialer (direct / proxy / TLS) → Connection
//!                       ├─ zero-I/O → done
//!                       ├─ exec → child process ⇄ connection
//!                       └─ stdin → conn (task), conn → output (caller)
//!         datagram → dial_datagram → DatagramBridge (connect mode)
//! ```
//!
//! # Design Decisions
//! - Only establishment is raced; relaying happens once on the winner
//! - A stdin-side error takes precedence over a receive-side error

pub mod engine;
pub mod scan;

pub use engine::{race_dual_stack, ConnectionEngine, Established};
pub use scan::PortRange;
