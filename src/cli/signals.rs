//! Stop running deployments on SIGINT/SIGTERM
//!
//! Commands run in their own terminal sessions, so a Ctrl-C at the user's
//! terminal never reaches them. The handler stops every executor instead,
//! which signals the commands and lets the stage threads release their
//! locks on the way out.

use crate::runner::StopHandle;
use std::io;
use std::thread;
use tokio::runtime::Builder;
use tokio::signal::unix::{signal, SignalKind};

/// Stop every handle in `handles` when the process is interrupted.
///
/// The handlers are registered before this returns; a detached thread
/// waits for the first signal.
pub fn stop_on_signals(handles: Vec<StopHandle>) -> io::Result<()> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    let (mut sigint, mut sigterm) = {
        let _guard = runtime.enter();
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    thread::Builder::new()
        .name("stagehand-signals".to_string())
        .spawn(move || {
            let name = runtime.block_on(async {
                tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                }
            });
            tracing::info!(signal = name, "stopping deployments");
            for handle in &handles {
                handle.stop();
            }
        })?;

    Ok(())
}
