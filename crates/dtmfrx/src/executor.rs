//! Command execution, throttling, and the transmit fail-safe
//!
//! The [`CommandExecutor`] runs matched commands and is the last
//! line of defense for unattended operation. Nothing a handler does
//! may take down the dispatch loop or leave the transmitter keyed:
//!
//! * every run is throttled by the command's minimum run interval;
//! * handler errors and panics are caught and recorded as failures;
//! * in isolated mode the handler runs on its own worker with a hard
//!   deadline. A worker that misses the deadline is abandoned: its
//!   result channel is dropped and nothing it does afterwards can
//!   reach the dispatch loop. The transmitter is disabled
//!   unconditionally before the timeout is reported.
//!
//! There is deliberately no graceful-cancellation handshake: a hung
//! handler must not be able to extend its own deadline.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use strum_macros::{Display, EnumString};

#[cfg(not(test))]
use log::{debug, info, warn};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

use crate::command::{CommandHandler, HandlerResult};
use crate::radio::Transmitter;
use crate::registry::Command;

/// Run-time limit applied when a command has no override
///
/// Chosen to match the station's maximum transmit time: a command
/// cannot hold the transmitter longer than the radio is allowed to
/// key.
pub const DEFAULT_MAX_RUN_TIME: Duration = Duration::from_secs(120);

/// How a command handler is invoked
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExecutorKind {
    /// On the dispatch thread, synchronously
    ///
    /// Simple and fast, but a hung handler hangs the loop. Use for
    /// development and for trusted handler sets.
    Native,

    /// On a dedicated worker with a hard deadline
    Isolated,
}

/// Result of one dispatch attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The handler completed, with its optional result value
    Success(Option<String>),

    /// The handler returned an error or panicked; the payload is the
    /// error detail
    Failure(String),

    /// The handler missed its deadline and was abandoned; the
    /// transmit fail-safe has fired
    Timeout,

    /// Throttled: the command ran too recently
    Refused,
}

/// Per-command execution counters
///
/// Process-local and never persisted; a fresh process starts from
/// zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Completed runs
    pub success: u64,
    /// Runs which returned an error or panicked
    pub failure: u64,
    /// Runs which missed their deadline
    pub timeout: u64,
    /// Dispatch attempts refused by the throttle
    pub refused: u64,
}

/// Runs matched commands with throttling and outcome accounting
pub struct CommandExecutor {
    kind: ExecutorKind,
    default_max_run_time: Duration,
    transmitter: Arc<dyn Transmitter>,
    last_run: HashMap<String, Instant>,
    stats: HashMap<String, ExecutionRecord>,
}

impl CommandExecutor {
    /// New executor using the given strategy
    ///
    /// The `transmitter` is the fail-safe target: it is disabled
    /// whenever an isolated run times out.
    pub fn new(kind: ExecutorKind, transmitter: Arc<dyn Transmitter>) -> Self {
        Self {
            kind,
            default_max_run_time: DEFAULT_MAX_RUN_TIME,
            transmitter,
            last_run: HashMap::new(),
            stats: HashMap::new(),
        }
    }

    /// Set the run-time limit used when a command has no override
    pub fn with_default_max_run_time(mut self, limit: Duration) -> Self {
        self.default_max_run_time = limit;
        self
    }

    /// Run a matched command
    ///
    /// Applies the throttle, invokes the handler per the configured
    /// strategy, and updates the command's [`ExecutionRecord`]. The
    /// throttle timestamp is taken *before* the run, so a
    /// long-running command counts against its own next interval.
    pub fn run(&mut self, command: &Command, data: Option<&str>) -> Outcome {
        let descriptor = command.descriptor();
        let id = descriptor.id().to_owned();

        debug!("running command {}", id);

        if !self.can_run(command) {
            self.stats.entry(id).or_default().refused += 1;
            return Outcome::Refused;
        }

        let start = Instant::now();
        self.last_run.insert(id.clone(), start);

        let outcome = match self.kind {
            ExecutorKind::Native => run_native(command.handler(), data),
            ExecutorKind::Isolated => {
                let limit = descriptor.max_run_time().unwrap_or(self.default_max_run_time);
                run_isolated(&id, command.handler(), data, limit, &self.transmitter)
            }
        };

        let record = self.stats.entry(id.clone()).or_default();
        match &outcome {
            Outcome::Success(_) => record.success += 1,
            Outcome::Failure(_) => record.failure += 1,
            Outcome::Timeout => record.timeout += 1,
            Outcome::Refused => record.refused += 1,
        }

        let duration = start.elapsed();
        match &outcome {
            Outcome::Failure(error) => {
                warn!("command {} failed after {:?}: {}", id, duration, error)
            }
            Outcome::Timeout => warn!("command {} timed out after {:?}", id, duration),
            _ => debug!("command {} finished in {:?}: {:?}", id, duration, outcome),
        }

        outcome
    }

    /// Execution counters for a command
    pub fn record(&self, id: &str) -> Option<&ExecutionRecord> {
        self.stats.get(id)
    }

    // Throttle check, against the timestamp of the previous dispatch
    fn can_run(&self, command: &Command) -> bool {
        let descriptor = command.descriptor();
        let interval = match descriptor.minimum_run_interval() {
            Some(interval) => interval,
            None => return true,
        };

        match self.last_run.get(descriptor.id()) {
            Some(previous) if previous.elapsed() < interval => {
                let wait = interval - previous.elapsed();
                info!(
                    "command {} ran less than {:?} ago, refusing execution; it can run again in {:?}",
                    descriptor.id(),
                    interval,
                    wait
                );
                false
            }
            _ => true,
        }
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("kind", &self.kind)
            .field("default_max_run_time", &self.default_max_run_time)
            .field("stats", &self.stats)
            .finish()
    }
}

// Run the handler on the calling thread
fn run_native(handler: &Arc<dyn CommandHandler>, data: Option<&str>) -> Outcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| handler.run(data)));
    outcome_from_result(result)
}

// Run the handler on a worker thread, joined with a deadline
//
// The worker sends its result over a bounded channel. If the
// deadline passes first the worker is abandoned: the receiver is
// dropped, its eventual send fails silently, and the transmit
// fail-safe fires before the timeout is reported.
fn run_isolated(
    id: &str,
    handler: &Arc<dyn CommandHandler>,
    data: Option<&str>,
    limit: Duration,
    transmitter: &Arc<dyn Transmitter>,
) -> Outcome {
    let (result_tx, result_rx) = bounded(1);
    let worker_handler = Arc::clone(handler);
    let worker_data = data.map(str::to_owned);

    let spawned = thread::Builder::new()
        .name(format!("cmd-{}", id))
        .spawn(move || {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| worker_handler.run(worker_data.as_deref())));
            let _ = result_tx.send(result);
        });

    if let Err(err) = spawned {
        return Outcome::Failure(format!("unable to spawn command worker: {}", err));
    }

    match result_rx.recv_timeout(limit) {
        Ok(result) => outcome_from_result(result),
        Err(RecvTimeoutError::Timeout) => {
            info!(
                "command {} did not finish in {:?}, abandoning it and disabling transmit",
                id, limit
            );
            transmitter.disable();
            Outcome::Timeout
        }
        Err(RecvTimeoutError::Disconnected) => {
            Outcome::Failure("command worker exited without a result".to_owned())
        }
    }
}

// Map a caught handler result onto an Outcome
fn outcome_from_result(result: Result<HandlerResult, Box<dyn std::any::Any + Send>>) -> Outcome {
    match result {
        Ok(Ok(value)) => Outcome::Success(value),
        Ok(Err(error)) => Outcome::Failure(error.to_string()),
        Err(panic) => Outcome::Failure(panic_message(panic)),
    }
}

// Best-effort extraction of a panic payload message
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::command::{CommandDescriptor, CommandError};
    use crate::registry::CommandRegistry;

    // Transmitter which counts calls
    #[derive(Debug, Default)]
    struct CountingTransmitter {
        enabled: AtomicU32,
        disabled: AtomicU32,
    }

    impl Transmitter for CountingTransmitter {
        fn enable(&self) {
            self.enabled.fetch_add(1, Ordering::SeqCst);
        }

        fn disable(&self) {
            self.disabled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry_with<H>(descriptor: CommandDescriptor, handler: H) -> CommandRegistry
    where
        H: CommandHandler + 'static,
    {
        let mut registry = CommandRegistry::new();
        registry.register(descriptor, handler).unwrap();
        registry
    }

    fn single_command(registry: &CommandRegistry) -> &Command {
        registry.commands().next().unwrap()
    }

    #[test]
    fn test_native_success() {
        let registry = registry_with(
            CommandDescriptor::new("ok", "21"),
            |_data: Option<&str>| -> HandlerResult { Ok(Some("fine".to_owned())) },
        );
        let transmitter = Arc::new(CountingTransmitter::default());
        let mut executor = CommandExecutor::new(ExecutorKind::Native, transmitter);

        assert_eq!(
            Outcome::Success(Some("fine".to_owned())),
            executor.run(single_command(&registry), None)
        );
        assert_eq!(1, executor.record("ok").unwrap().success);
    }

    #[test]
    fn test_native_failure_is_caught() {
        let registry = registry_with(
            CommandDescriptor::new("bad", "21"),
            |_data: Option<&str>| -> HandlerResult { Err(CommandError::new("it broke")) },
        );
        let transmitter = Arc::new(CountingTransmitter::default());
        let mut executor = CommandExecutor::new(ExecutorKind::Native, transmitter);

        assert_eq!(
            Outcome::Failure("it broke".to_owned()),
            executor.run(single_command(&registry), None)
        );
        assert_eq!(1, executor.record("bad").unwrap().failure);
    }

    #[test]
    fn test_native_panic_is_caught() {
        let registry = registry_with(
            CommandDescriptor::new("panics", "21"),
            |_data: Option<&str>| -> HandlerResult { panic!("boom") },
        );
        let transmitter = Arc::new(CountingTransmitter::default());
        let mut executor = CommandExecutor::new(ExecutorKind::Native, transmitter);

        match executor.run(single_command(&registry), None) {
            Outcome::Failure(message) => assert!(message.contains("boom")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(1, executor.record("panics").unwrap().failure);
    }

    #[test]
    fn test_throttle_refuses_second_run() {
        let registry = registry_with(
            CommandDescriptor::new("slowpoke", "21")
                .with_minimum_run_interval(Duration::from_secs(10)),
            |_data: Option<&str>| -> HandlerResult { Ok(None) },
        );
        let transmitter = Arc::new(CountingTransmitter::default());
        let mut executor = CommandExecutor::new(ExecutorKind::Native, transmitter);
        let command = single_command(&registry);

        assert_eq!(Outcome::Success(None), executor.run(command, None));
        assert_eq!(Outcome::Refused, executor.run(command, None));

        let record = executor.record("slowpoke").unwrap();
        assert_eq!(1, record.success);
        assert_eq!(1, record.refused);
    }

    #[test]
    fn test_isolated_success_drains_the_result() {
        let registry = registry_with(
            CommandDescriptor::new("echo", "21"),
            |data: Option<&str>| -> HandlerResult { Ok(data.map(str::to_owned)) },
        );
        let transmitter = Arc::new(CountingTransmitter::default());
        let mut executor = CommandExecutor::new(ExecutorKind::Isolated, transmitter.clone());

        assert_eq!(
            Outcome::Success(Some("42".to_owned())),
            executor.run(single_command(&registry), Some("42"))
        );
        assert_eq!(0, transmitter.disabled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_isolated_timeout_fires_the_failsafe_once() {
        let registry = registry_with(
            CommandDescriptor::new("sleeper", "21").with_max_run_time(Duration::from_millis(50)),
            |_data: Option<&str>| -> HandlerResult {
                thread::sleep(Duration::from_secs(2));
                Ok(None)
            },
        );
        let transmitter = Arc::new(CountingTransmitter::default());
        let mut executor = CommandExecutor::new(ExecutorKind::Isolated, transmitter.clone());

        assert_eq!(
            Outcome::Timeout,
            executor.run(single_command(&registry), None)
        );
        assert_eq!(1, transmitter.disabled.load(Ordering::SeqCst));
        assert_eq!(1, executor.record("sleeper").unwrap().timeout);
    }

    #[test]
    fn test_isolated_failure_is_reported() {
        let registry = registry_with(
            CommandDescriptor::new("bad", "21"),
            |_data: Option<&str>| -> HandlerResult { Err(CommandError::new("nope")) },
        );
        let transmitter = Arc::new(CountingTransmitter::default());
        let mut executor = CommandExecutor::new(ExecutorKind::Isolated, transmitter);

        assert_eq!(
            Outcome::Failure("nope".to_owned()),
            executor.run(single_command(&registry), None)
        );
    }

    #[test]
    fn test_executor_kind_from_config_string() {
        use std::str::FromStr;

        assert_eq!(ExecutorKind::Native, ExecutorKind::from_str("native").unwrap());
        assert_eq!(
            ExecutorKind::Isolated,
            ExecutorKind::from_str("isolated").unwrap()
        );
        assert!(ExecutorKind::from_str("subprocess").is_err());
    }
}
