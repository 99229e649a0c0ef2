//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command line (clap)          config file (TOML, optional)
//!     → cli.rs (parse flags)       → loader.rs (parse & deserialize)
//!     → cli.rs overlays flags on the file's values
//!     → validation.rs (semantic checks, all errors collected)
//!     → Config (validated, immutable)
//!     → shared via Arc with the client, server and datagram layers
//! ```
//!
//! # Design Decisions
//! - Config is immutable for the whole run
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use cli::Cli;
pub use loader::{load_config, ConfigError};
pub use schema::{Config, ConnectionMode, DenyPolicy};
pub use validation::ValidationError;
