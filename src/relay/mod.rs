//! Byte relay collaborators shared by connect and listen mode.
//!
//! # Data Flow
//! ```text
//! stdin
//!     → stdin.rs (RunOnce gate, EOL rewriting, line delay)
//!     → connection write half / registry
//!
//! connection read half
//!     → copy.rs (chunked copy, idle timeout)
//!     → output.rs (stdout + tee file + hex dump)
//!
//! exec.rs replaces both directions with a child process
//! ```
//!
//! # Design Decisions
//! - One `SharedOutput` per run, cloned into every relay task
//! - Stdin is owned by whichever task wins the `RunOnce` gate

pub mod copy;
pub mod exec;
pub mod output;
pub mod stdin;

pub use copy::{copy_to_output, copy_to_writer, read_chunk};
pub use exec::run_command;
pub use output::{BoxedReader, BoxedWriter, SharedOutput};
pub use stdin::{copy_lines, InputChunks, RunOnce};
