//! netrelay command-line entry point.
//!
//! # Architecture Overview
//!
//! ```text
//!            ┌───────────────────────────────────────────────────────────┐
//!            │                         NETRELAY                          │
//!  stdin ───▶│  ┌────────┐   ┌──────────────┐   ┌─────────────────────┐  │
//!            │  │ config │──▶│  lifecycle   │──▶│ client (connect)    │──┼──▶ remote
//!            │  │  cli   │   │   startup    │   │ server (listen)     │◀─┼─── peers
//!  stdout ◀──│  └────────┘   └──────────────┘   │ datagram (udp/unix) │  │
//!            │                                  └─────────────────────┘  │
//!            │  ┌──────────────────────────────────────────────────────┐ │
//!            │  │ net · relay · security · resilience · observability │ │
//!            │  └──────────────────────────────────────────────────────┘ │
//!            └───────────────────────────────────────────────────────────┘
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use netrelay::config::Cli;
use netrelay::lifecycle::{self, Shutdown};
use netrelay::observability;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cli_level = cli.log_level();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            observability::init(cli_level.unwrap_or("warn"));
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    observability::init(cli_level.unwrap_or(config.observability.log_level.as_str()));

    let shutdown = Shutdown::new();
    let run = lifecycle::run(
        Arc::new(config),
        Box::new(tokio::io::stdin()),
        Box::new(tokio::io::stdout()),
        shutdown.subscribe(),
    );
    tokio::pin!(run);

    let result = tokio::select! {
        res = &mut run => res,
        _ = lifecycle::shutdown_signal() => {
            shutdown.trigger();
            // a second interrupt abandons relays still draining
            tokio::select! {
                res = &mut run => res,
                _ = lifecycle::shutdown_signal() => Ok(()),
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
    }
}
