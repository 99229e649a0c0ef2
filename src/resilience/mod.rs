//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop:
//!     → accept error logged
//!     → backoff.rs (exponential delay with jitter, capped)
//!     → retry accept; first success resets the failure count
//! ```
//!
//! # Design Decisions
//! - A failing accept never ends the listener
//! - Delays are capped so recovery is noticed quickly

pub mod backoff;

pub use backoff::{calculate_backoff, FailureBackoff};
