//! Startup orchestration.
//!
//! # Responsibilities
//! - Build access control and the shared output from the configuration
//! - Dispatch to the connect-mode engine or the listen-mode hub
//!
//! # Design Decisions
//! - Access lists load before binding so a bad list never leaves a listener open
//! - Stdin and stdout are passed in, so the whole run can be driven from tests

use std::sync::Arc;

use crate::client::ConnectionEngine;
use crate::config::Config;
use crate::error::RelayResult;
use crate::lifecycle::ShutdownSignal;
use crate::relay::{BoxedReader, BoxedWriter, SharedOutput};
use crate::security::{AccessControl, ReverseResolver, SystemResolver};
use crate::server::ListenerHub;

/// Run one connect-mode or listen-mode session to completion.
pub async fn run(
    config: Arc<Config>,
    stdin: BoxedReader,
    stdout: BoxedWriter,
    shutdown: ShutdownSignal,
) -> RelayResult<()> {
    let output = SharedOutput::open(stdout, &config.output).await?;
    let network = config.network();
    let address = config.address();

    tracing::info!(
        mode = ?config.mode,
        network = %network,
        address = %address,
        "Starting"
    );

    if config.is_listen() {
        let access = Arc::new(AccessControl::load(&config.access)?);
        let resolver: Arc<dyn ReverseResolver> = Arc::new(SystemResolver);
        ListenerHub::new(config.clone(), access, resolver, stdin)
            .with_shutdown(shutdown)
            .listen_mode(output, network, &address)
            .await
    } else {
        ConnectionEngine::new(config.clone(), stdin)
            .connect(output, network, &address)
            .await
    }
}
