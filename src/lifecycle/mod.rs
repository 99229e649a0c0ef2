//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → access lists → output sinks → connect or listen mode
//!
//! Shutdown (shutdown.rs):
//!     trigger() → every ShutdownSignal resolves → accept loop stops → relays drain
//!
//! Signals (signals.rs):
//!     Ctrl+C → shutdown trigger
//! ```
//!
//! # Design Decisions
//! - Fail fast: configuration and access-list errors end the run before any socket opens
//! - Shutdown only stops accepting; relays already running finish on their own

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::shutdown_signal;
pub use startup::run;
