//! Pseudo-terminal process launcher
//!
//! Each command runs through the configured interpreter (`sh -c` by default)
//! on its own pseudo-terminal, so stdout and stderr arrive merged on the
//! master side in the order the child wrote them, with the terminal's
//! `\r\n` line endings.
//!
//! Commands get no input: the terminal's input queue holds a single
//! end-of-file, so the first read from it returns immediately.

use crate::process::{ExitStatus, ProcessHandle, ProcessLauncher, Terminate};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::env;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const READ_BUFFER_SIZE: usize = 4096;

/// VEOF of the default termios (^D)
const END_OF_INPUT: u8 = 0x04;

/// Launches commands on a fresh pseudo-terminal
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    /// Interpreter and its flags (e.g., ["bash", "-c"])
    interpreter: Vec<String>,

    /// Directory commands start in
    working_dir: PathBuf,

    /// Extra environment for every command
    env: HashMap<String, String>,
}

impl PtyLauncher {
    /// Create a launcher using `sh -c` in the current directory
    pub fn new() -> Self {
        PtyLauncher {
            interpreter: vec!["sh".to_string(), "-c".to_string()],
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: HashMap::new(),
        }
    }

    /// Set the interpreter
    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        if !interpreter.is_empty() {
            self.interpreter = interpreter;
        }
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Set extra environment variables
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// The interpreter in use
    pub fn interpreter(&self) -> &[String] {
        &self.interpreter
    }

    fn command_builder(&self, command: &str) -> CommandBuilder {
        let mut builder = CommandBuilder::new(&self.interpreter[0]);
        builder.args(&self.interpreter[1..]);
        builder.arg(command);
        builder.cwd(&self.working_dir);
        for (key, value) in &self.env {
            builder.env(key, value);
        }
        builder
    }
}

impl Default for PtyLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for PtyLauncher {
    fn spawn(&self, command: &str) -> io::Result<Box<dyn ProcessHandle>> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(to_io)?;

        // Queued before the child exists; its first read of the terminal sees EOF
        let mut writer = pair.master.take_writer().map_err(to_io)?;
        writer.write_all(&[END_OF_INPUT])?;
        writer.flush()?;

        let child = pair
            .slave
            .spawn_command(self.command_builder(command))
            .map_err(to_io)?;
        // Only the child may keep the slave open, otherwise the reader never sees EOF.
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(to_io)?;
        let terminator = Arc::new(PtyTerminator {
            pid: child.process_id(),
            reaped: AtomicBool::new(false),
        });

        tracing::debug!(pid = ?child.process_id(), command, "spawned on pty");

        Ok(Box::new(PtyHandle {
            child,
            reader,
            _writer: writer,
            _master: pair.master,
            terminator,
        }))
    }
}

struct PtyHandle {
    child: Box<dyn Child + Send + Sync>,
    reader: Box<dyn Read + Send>,
    // Dropping the writer sends a newline, so it lives until the child is gone
    _writer: Box<dyn Write + Send>,
    _master: Box<dyn MasterPty + Send>,
    terminator: Arc<PtyTerminator>,
}

impl ProcessHandle for PtyHandle {
    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(buf[..n].to_vec())),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Linux reports EIO on the master once every slave fd is closed
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn terminator(&self) -> Arc<dyn Terminate> {
        self.terminator.clone()
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait()?;
        self.terminator.reaped.store(true, Ordering::SeqCst);
        Ok(ExitStatus::from_code(status.exit_code()))
    }
}

/// Signals the child's process group.
///
/// The child is started as a session leader, so its process group id equals
/// its pid and anything it forks stays in that group.
struct PtyTerminator {
    pid: Option<u32>,
    reaped: AtomicBool,
}

impl PtyTerminator {
    fn signal(&self, signal: libc::c_int) -> io::Result<()> {
        if self.reaped.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = pid as libc::pid_t;

        if unsafe { libc::kill(-pid, signal) } == 0 {
            return Ok(());
        }
        if unsafe { libc::kill(pid, signal) } == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Already gone
            Ok(())
        } else {
            Err(err)
        }
    }
}

impl Terminate for PtyTerminator {
    fn terminate(&self) -> io::Result<()> {
        self.signal(libc::SIGTERM)
    }

    fn kill(&self) -> io::Result<()> {
        self.signal(libc::SIGKILL)
    }
}

fn to_io(err: anyhow::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(handle: &mut Box<dyn ProcessHandle>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = handle.read_chunk().unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[test]
    fn test_default_interpreter() {
        let launcher = PtyLauncher::new();
        assert_eq!(launcher.interpreter(), &["sh".to_string(), "-c".to_string()]);
        assert_eq!(launcher.line_terminator(), "\r\n");
    }

    #[test]
    fn test_empty_interpreter_is_ignored() {
        let launcher = PtyLauncher::new().with_interpreter(Vec::new());
        assert_eq!(launcher.interpreter(), &["sh".to_string(), "-c".to_string()]);
    }

    #[test]
    fn test_spawn_reads_merged_output() {
        let launcher = PtyLauncher::new();
        let mut handle = launcher.spawn("echo out; echo err >&2").unwrap();
        assert!(handle.pid().is_some());

        let output = read_all(&mut handle);
        assert_eq!(String::from_utf8_lossy(&output), "out\r\nerr\r\n");
        assert!(handle.wait().unwrap().success());
    }

    #[test]
    fn test_spawn_reports_exit_code() {
        let launcher = PtyLauncher::new();
        let mut handle = launcher.spawn("exit 3").unwrap();
        read_all(&mut handle);
        assert_eq!(handle.wait().unwrap().code(), 3);
    }

    #[test]
    fn test_environment_and_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut env = HashMap::new();
        env.insert("STAGEHAND_GREETING".to_string(), "howdy".to_string());

        let launcher = PtyLauncher::new()
            .with_working_dir(dir.path().to_path_buf())
            .with_env(env);
        let mut handle = launcher
            .spawn("echo $STAGEHAND_GREETING; touch marker")
            .unwrap();

        let output = read_all(&mut handle);
        assert!(handle.wait().unwrap().success());
        assert_eq!(String::from_utf8_lossy(&output), "howdy\r\n");
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn test_input_is_closed() {
        let launcher = PtyLauncher::new();
        let mut handle = launcher.spawn("read answer; echo got:$answer").unwrap();

        let output = read_all(&mut handle);
        assert_eq!(String::from_utf8_lossy(&output), "got:\r\n");
        assert!(handle.wait().unwrap().success());
    }

    #[test]
    fn test_terminate_ends_long_running_child() {
        let launcher = PtyLauncher::new();
        let mut handle = launcher.spawn("sleep 100").unwrap();
        let terminator = handle.terminator();

        terminator.terminate().unwrap();
        read_all(&mut handle);
        assert!(!handle.wait().unwrap().success());

        // Reaped children are never signalled again
        terminator.terminate().unwrap();
        terminator.kill().unwrap();
    }
}
