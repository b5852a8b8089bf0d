//! Locked execution
//!
//! Runs a command sequence while holding the lock for its resource, so at
//! most one sequence runs against a given resource at a time.

use crate::lock::LockRegistry;
use crate::runner::{CommandExecutor, OutputSink};
use std::cell::RefCell;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Runs command sequences under per-resource locks
#[derive(Debug)]
pub struct Coordinator<K>
where
    K: Eq + Hash + Clone + Debug,
{
    registry: Arc<LockRegistry<K>>,
}

impl<K> Clone for Coordinator<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn clone(&self) -> Self {
        Coordinator {
            registry: self.registry.clone(),
        }
    }
}

impl<K> Coordinator<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create a coordinator over a shared registry
    pub fn new(registry: Arc<LockRegistry<K>>) -> Self {
        Coordinator { registry }
    }

    /// The registry locks are taken from
    pub fn registry(&self) -> &Arc<LockRegistry<K>> {
        &self.registry
    }

    /// Execute `commands` with `executor` while holding `resource`.
    ///
    /// The lock is held until the executor returns, including any
    /// cancellation wind-down. If the lock is not free within `timeout`,
    /// `on_timeout` gets the sink so it can report why nothing ran, and the
    /// result is false.
    #[allow(clippy::too_many_arguments)]
    pub fn run<C, S, F>(
        &self,
        resource: &K,
        holder: &str,
        timeout: Duration,
        executor: &CommandExecutor,
        commands: &[C],
        sink: &mut S,
        on_timeout: Option<F>,
    ) -> bool
    where
        C: AsRef<str>,
        S: OutputSink + ?Sized,
        F: FnOnce(&mut S),
    {
        // Only one of the two closures ever runs, but both need the sink
        let sink = RefCell::new(sink);
        let sink = &sink;

        let result = self.registry.with_lock(
            resource,
            holder,
            timeout,
            move || {
                tracing::info!(resource = ?resource, holder, "running commands under lock");
                executor.execute(commands, &mut **sink.borrow_mut())
            },
            on_timeout.map(|callback| move || callback(&mut **sink.borrow_mut())),
        );

        result.unwrap_or_else(|e| {
            tracing::warn!(resource = ?resource, holder, error = %e, "could not lock resource");
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ExitStatus, ProcessHandle, ProcessLauncher, Terminate};
    use crate::runner::SharedOutput;
    use std::io;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Mutex;

    /// Echoes the command text back and records whether the resource was
    /// locked at spawn time
    struct EchoLauncher {
        registry: Arc<LockRegistry<u64>>,
        locked_during_spawn: Mutex<Vec<bool>>,
    }

    struct EchoHandle {
        output: Option<Vec<u8>>,
        code: u32,
    }

    struct Nothing;

    impl Terminate for Nothing {
        fn terminate(&self) -> io::Result<()> {
            Ok(())
        }

        fn kill(&self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ProcessLauncher for EchoLauncher {
        fn spawn(&self, command: &str) -> io::Result<Box<dyn ProcessHandle>> {
            self.locked_during_spawn
                .lock()
                .unwrap()
                .push(self.registry.is_locked(&1));
            Ok(Box::new(EchoHandle {
                output: Some(format!("{}\n", command).into_bytes()),
                code: if command == "false" { 1 } else { 0 },
            }))
        }

        fn line_terminator(&self) -> &str {
            "\n"
        }
    }

    impl ProcessHandle for EchoHandle {
        fn pid(&self) -> Option<u32> {
            Some(1)
        }

        fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.output.take())
        }

        fn terminator(&self) -> Arc<dyn Terminate> {
            Arc::new(Nothing)
        }

        fn wait(&mut self) -> io::Result<ExitStatus> {
            Ok(ExitStatus::from_code(self.code))
        }
    }

    fn setup() -> (Coordinator<u64>, Arc<EchoLauncher>) {
        let registry = Arc::new(LockRegistry::new().with_poll_interval(Duration::from_millis(5)));
        let launcher = Arc::new(EchoLauncher {
            registry: registry.clone(),
            locked_during_spawn: Mutex::new(Vec::new()),
        });
        (Coordinator::new(registry), launcher)
    }

    #[test]
    fn test_run_holds_lock_while_executing() {
        let (coordinator, launcher) = setup();
        let executor = CommandExecutor::new(launcher.clone());
        let mut output = SharedOutput::new();

        let ok = coordinator.run(
            &1,
            "test",
            Duration::from_secs(1),
            &executor,
            &["one", "two"],
            &mut output,
            None::<fn(&mut SharedOutput)>,
        );

        assert!(ok);
        assert_eq!(output.contents(), "one\ntwo\n");
        assert_eq!(*launcher.locked_during_spawn.lock().unwrap(), vec![true, true]);
        assert!(!coordinator.registry().is_locked(&1));
    }

    #[test]
    fn test_run_releases_after_failure() {
        let (coordinator, launcher) = setup();
        let executor = CommandExecutor::new(launcher);
        let mut output = SharedOutput::new();

        let ok = coordinator.run(
            &1,
            "test",
            Duration::from_secs(1),
            &executor,
            &["false", "never"],
            &mut output,
            None::<fn(&mut SharedOutput)>,
        );

        assert!(!ok);
        assert_eq!(output.contents(), "false\nFailed to execute \"false\"\n");
        assert!(!coordinator.registry().is_locked(&1));
    }

    /// A sink whose owner crashes on the first write
    struct Exploding;

    impl io::Write for Exploding {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            panic!("sink crashed");
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_run_releases_when_the_sink_panics() {
        let (coordinator, launcher) = setup();
        let executor = CommandExecutor::new(launcher);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            coordinator.run(
                &1,
                "test",
                Duration::from_secs(1),
                &executor,
                &["echo hi"],
                &mut Exploding,
                None::<fn(&mut Exploding)>,
            )
        }));

        assert!(result.is_err());
        assert!(!coordinator.registry().is_locked(&1));
    }

    #[test]
    fn test_run_timeout_calls_back_with_sink() {
        let (coordinator, launcher) = setup();
        assert!(coordinator.registry().try_acquire(&1, "someone else"));
        let executor = CommandExecutor::new(launcher.clone());
        let mut output = SharedOutput::new();

        let ok = coordinator.run(
            &1,
            "test",
            Duration::from_millis(50),
            &executor,
            &["echo hi"],
            &mut output,
            Some(|sink: &mut SharedOutput| sink.append(b"using the error callback")),
        );

        assert!(!ok);
        assert_eq!(output.contents(), "using the error callback");
        assert!(launcher.locked_during_spawn.lock().unwrap().is_empty());
        assert_eq!(
            coordinator.registry().holder(&1).unwrap().holder,
            "someone else"
        );
    }
}
