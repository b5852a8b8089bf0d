//! Command sequence execution
//!
//! `CommandExecutor` runs commands one after another, streams their merged
//! output to a sink as it arrives and stops at the first failure. Another
//! thread may cancel the run at any time through `stop()` or a `StopHandle`.

use crate::process::{ExitStatus, ProcessHandle, ProcessLauncher, Terminate};
use crate::runner::OutputSink;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Default interval between cancellation checks while a command runs
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default time a cancelled child gets before it is killed
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Tuning for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// How often the cancellation flag is checked while waiting for output
    pub poll_interval: Duration,

    /// How long a terminated child may take to exit before escalation
    pub grace_period: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        ExecutorOptions {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Runs an ordered sequence of commands as one unit
pub struct CommandExecutor {
    launcher: Arc<dyn ProcessLauncher>,
    options: ExecutorOptions,
    session: Arc<Session>,
}

/// Cancels a `CommandExecutor` from another thread
#[derive(Clone)]
pub struct StopHandle {
    session: Arc<Session>,
}

impl StopHandle {
    /// Request cancellation and signal the running command, if any
    pub fn stop(&self) {
        self.session.stop();
    }

    /// Whether cancellation was requested
    pub fn is_stopped(&self) -> bool {
        self.session.is_stopped()
    }
}

#[derive(Default)]
struct Session {
    stopped: AtomicBool,
    active: Mutex<Option<ActiveProcess>>,
}

struct ActiveProcess {
    pid: Option<u32>,
    terminator: Arc<dyn Terminate>,
}

impl Session {
    fn active(&self) -> MutexGuard<'_, Option<ActiveProcess>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(process) = self.active().as_ref() {
            tracing::info!(pid = ?process.pid, "stopping running command");
            terminate(&*process.terminator);
        }
    }

    fn activate(&self, pid: Option<u32>, terminator: Arc<dyn Terminate>) {
        let mut active = self.active();
        // stop() may have run between spawn and now and found nothing to signal
        if self.is_stopped() {
            terminate(&*terminator);
        }
        *active = Some(ActiveProcess { pid, terminator });
    }

    fn deactivate(&self) {
        *self.active() = None;
    }
}

enum PumpEvent {
    Output(Vec<u8>),
    ReadFailed(io::Error),
    Exited(io::Result<ExitStatus>),
}

enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Where a cancelled command is in its wind-down
#[derive(Default)]
struct WindDown {
    noticed_at: Option<Instant>,
    killed_at: Option<Instant>,
}

impl CommandExecutor {
    /// Create an executor that spawns commands through `launcher`
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        CommandExecutor {
            launcher,
            options: ExecutorOptions::default(),
            session: Arc::new(Session::default()),
        }
    }

    /// Set cancellation tuning
    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options
    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// A cloneable handle for cancelling this executor from another thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            session: self.session.clone(),
        }
    }

    /// Request cancellation.
    ///
    /// The first call sets the flag and signals the running command; later
    /// calls do nothing. Once stopped, `execute` starts no further commands.
    pub fn stop(&self) {
        self.session.stop();
    }

    /// Whether cancellation was requested
    pub fn is_stopped(&self) -> bool {
        self.session.is_stopped()
    }

    /// Pid of the command currently running, if any
    pub fn pid(&self) -> Option<u32> {
        self.session.active().as_ref().and_then(|p| p.pid)
    }

    /// Run `commands` in order, streaming output into `sink`.
    ///
    /// Returns true only if every command exited zero. A failing command
    /// gets a `Failed to execute "<command>"` line appended and ends the
    /// run; a cancelled run ends without that line.
    pub fn execute<C, S>(&self, commands: &[C], sink: &mut S) -> bool
    where
        C: AsRef<str>,
        S: OutputSink + ?Sized,
    {
        let terminator = self.launcher.line_terminator().to_string();

        for command in commands {
            let command = command.as_ref();
            if self.is_stopped() {
                tracing::info!(command, "execution stopped before command started");
                return false;
            }

            match self.run_command(command, sink, &terminator) {
                Outcome::Succeeded => {}
                Outcome::Failed => {
                    let message = format!("Failed to execute \"{}\"{}", command, terminator);
                    sink.append(message.as_bytes());
                    return false;
                }
                Outcome::Cancelled => return false,
            }
        }

        true
    }

    fn run_command<S>(&self, command: &str, sink: &mut S, terminator: &str) -> Outcome
    where
        S: OutputSink + ?Sized,
    {
        let handle = match self.launcher.spawn(command) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to spawn command");
                sink.append(format!("{}{}", e, terminator).as_bytes());
                return Outcome::Failed;
            }
        };

        let pid = handle.pid();
        let process = handle.terminator();
        self.session.activate(pid, process.clone());
        tracing::debug!(command, pid = ?pid, "command started");

        // The handle is passed over only once the reader thread exists, so a
        // failed thread spawn leaves it here to be reaped
        let (tx, rx) = mpsc::channel();
        let (handle_tx, handle_rx) = mpsc::channel::<Box<dyn ProcessHandle>>();
        let spawned = thread::Builder::new()
            .name("stagehand-pump".to_string())
            .spawn(move || {
                if let Ok(handle) = handle_rx.recv() {
                    pump(handle, tx);
                }
            });
        let outcome = match spawned {
            Ok(_) => match handle_tx.send(handle) {
                Ok(()) => self.drain(command, &rx, &*process, sink),
                Err(mpsc::SendError(handle)) => {
                    tracing::error!(command, "output reader exited before it started");
                    reap_unread(command, handle);
                    Outcome::Failed
                }
            },
            Err(e) => {
                tracing::error!(command, error = %e, "failed to start output reader");
                reap_unread(command, handle);
                Outcome::Failed
            }
        };

        self.session.deactivate();
        outcome
    }

    /// Forward output until the pump reports the exit status
    fn drain<S>(
        &self,
        command: &str,
        rx: &Receiver<PumpEvent>,
        process: &dyn Terminate,
        sink: &mut S,
    ) -> Outcome
    where
        S: OutputSink + ?Sized,
    {
        let mut wind_down = WindDown::default();
        let mut truncated = false;

        loop {
            match rx.recv_timeout(self.options.poll_interval) {
                Ok(PumpEvent::Output(chunk)) => sink.append(&chunk),
                Ok(PumpEvent::ReadFailed(e)) => {
                    tracing::warn!(command, error = %e, "output stream ended with an error");
                    truncated = true;
                }
                Ok(PumpEvent::Exited(status)) => return self.finish(command, status, truncated),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::error!(command, "output reader exited without an exit status");
                    return if self.is_stopped() {
                        Outcome::Cancelled
                    } else {
                        Outcome::Failed
                    };
                }
            }

            if self.is_stopped() && self.escalate(command, process, &mut wind_down) {
                return Outcome::Cancelled;
            }
        }
    }

    /// Kill a cancelled child that outlives its grace period. Returns true
    /// once draining should be abandoned.
    fn escalate(&self, command: &str, process: &dyn Terminate, wind_down: &mut WindDown) -> bool {
        let now = Instant::now();
        let noticed_at = *wind_down.noticed_at.get_or_insert(now);
        let grace = self.options.grace_period;

        match wind_down.killed_at {
            None if now.duration_since(noticed_at) >= grace => {
                tracing::warn!(command, "command ignored termination, killing it");
                if let Err(e) = process.kill() {
                    tracing::warn!(command, error = %e, "failed to kill command");
                }
                wind_down.killed_at = Some(now);
                false
            }
            Some(killed_at) if now.duration_since(killed_at) >= grace => {
                tracing::warn!(command, "output still open after kill, abandoning reader");
                true
            }
            _ => false,
        }
    }

    /// Decide the outcome once the child is reaped. Output cut short by a
    /// read error fails the command even when it exited zero.
    fn finish(&self, command: &str, status: io::Result<ExitStatus>, truncated: bool) -> Outcome {
        if self.is_stopped() {
            tracing::info!(command, "command cancelled");
            return Outcome::Cancelled;
        }

        match status {
            Ok(status) if status.success() && truncated => {
                tracing::warn!(command, "command succeeded but its output was lost");
                Outcome::Failed
            }
            Ok(status) if status.success() => {
                tracing::debug!(command, "command succeeded");
                Outcome::Succeeded
            }
            Ok(status) => {
                tracing::debug!(command, code = status.code(), "command failed");
                Outcome::Failed
            }
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to reap command");
                Outcome::Failed
            }
        }
    }
}

/// Read a child's output to the end, then reap it
fn pump(mut handle: Box<dyn ProcessHandle>, tx: Sender<PumpEvent>) {
    loop {
        match handle.read_chunk() {
            Ok(Some(chunk)) => {
                if tx.send(PumpEvent::Output(chunk)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(PumpEvent::ReadFailed(e));
                break;
            }
        }
    }

    let status = handle.wait();
    let _ = tx.send(PumpEvent::Exited(status));
}

/// Kill and reap a child whose output nobody will read
fn reap_unread(command: &str, mut handle: Box<dyn ProcessHandle>) {
    if let Err(e) = handle.terminator().kill() {
        tracing::warn!(command, error = %e, "failed to kill orphaned command");
    }
    if let Err(e) = handle.wait() {
        tracing::warn!(command, error = %e, "failed to reap orphaned command");
    }
}

fn terminate(process: &dyn Terminate) {
    if let Err(e) = process.terminate() {
        tracing::warn!(error = %e, "failed to signal command");
    }
}
