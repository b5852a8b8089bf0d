//! Process control
//!
//! Everything that touches OS processes sits behind the traits in this
//! module: spawn, read merged output, signal, wait. The executor and the
//! lock layer only see these traits, so tests can drive them with a
//! scripted launcher instead of real processes.

#[cfg(unix)]
pub mod pty;

#[cfg(unix)]
pub use pty::PtyLauncher;

use std::io;
use std::sync::Arc;

/// Exit status of a finished child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: u32,
}

impl ExitStatus {
    /// Create an exit status from a raw exit code
    pub fn from_code(code: u32) -> Self {
        ExitStatus { code }
    }

    /// The raw exit code
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Whether the child exited with code zero
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Starts commands
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `command` attached to a fresh output channel
    fn spawn(&self, command: &str) -> io::Result<Box<dyn ProcessHandle>>;

    /// Line terminator used by the output channel
    fn line_terminator(&self) -> &str {
        "\r\n"
    }
}

/// A running child and its merged output stream
pub trait ProcessHandle: Send {
    /// OS process id, if the platform reports one
    fn pid(&self) -> Option<u32>;

    /// Block until the next chunk of output is available.
    ///
    /// Returns `Ok(None)` at end of stream.
    fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// A handle that can signal this child from any thread
    fn terminator(&self) -> Arc<dyn Terminate>;

    /// Block until the child exits and reap it
    fn wait(&mut self) -> io::Result<ExitStatus>;
}

/// Signals a child from outside the thread that owns it.
///
/// Both calls are idempotent and do nothing once the child has been reaped.
pub trait Terminate: Send + Sync {
    /// Ask the child (and its process group) to exit
    fn terminate(&self) -> io::Result<()>;

    /// Forcefully kill the child (and its process group)
    fn kill(&self) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::from_code(0).success());
        assert!(!ExitStatus::from_code(2).success());
        assert_eq!(ExitStatus::from_code(127).code(), 127);
    }
}
