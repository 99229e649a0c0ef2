//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems emit tracing events with structured fields
//!     → logging.rs (EnvFilter → fmt layer → stderr)
//! ```
//!
//! # Design Decisions
//! - Stdout carries relayed data, so diagnostics only ever go to stderr
//! - Quiet by default; verbosity flags raise the level, RUST_LOG overrides both

pub mod logging;

pub use logging::init;
