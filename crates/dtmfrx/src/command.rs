//! Command descriptors and handlers
//!
//! A command is a [`CommandDescriptor`] (the metadata the matcher
//! and executor act on) plus a [`CommandHandler`] (the behavior).
//! Handlers are registered explicitly at startup; there is no
//! runtime discovery.

use std::fmt;
use std::time::Duration;

/// Error raised by a command handler
///
/// Handler failures are caught at the executor boundary and recorded
/// as a failed run; they never terminate the dispatch loop.
#[derive(Debug)]
pub struct CommandError(String);

impl CommandError {
    /// New error with the given detail message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for CommandError {}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

/// Result of one handler invocation
///
/// The `Ok` value is an optional free-form result string. It is
/// reported with the execution outcome and is useful for diagnostic
/// commands; most handlers return `Ok(None)` and do their work
/// through the station collaborators instead.
pub type HandlerResult = Result<Option<String>, CommandError>;

/// Behavior of a registered command
///
/// `data` carries whatever the matcher captured from the dialed
/// sequence, or `None` for commands without capture slots. Handlers
/// run either on the dispatch thread or on an isolated worker, so
/// they must be `Send + Sync` and own their collaborators.
pub trait CommandHandler: Send + Sync {
    /// Run the command
    fn run(&self, data: Option<&str>) -> HandlerResult;
}

impl<F> CommandHandler for F
where
    F: Fn(Option<&str>) -> HandlerResult + Send + Sync,
{
    fn run(&self, data: Option<&str>) -> HandlerResult {
        self(data)
    }
}

/// Metadata for a registered command
///
/// Descriptors are built once at startup and are immutable
/// afterwards; the per-command enabled flag lives outside the
/// registry (see [`CommandGate`](crate::CommandGate)).
///
/// ```
/// use std::time::Duration;
/// use dtmfrx::CommandDescriptor;
///
/// let descriptor = CommandDescriptor::new("current_time", "23")
///     .with_description("Current date and time.")
///     .with_minimum_run_interval(Duration::from_secs(10));
/// assert_eq!("23", descriptor.pattern());
/// assert!(!descriptor.is_admin());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandDescriptor {
    id: String,
    description: String,
    pattern: String,
    admin: bool,
    minimum_run_interval: Option<Duration>,
    max_run_time: Option<Duration>,
}

impl CommandDescriptor {
    /// New descriptor for command `id`, dialed with `pattern`
    ///
    /// `pattern` is a string over the DTMF alphabet plus `?`, where
    /// each `?` captures exactly one dialed character and a trailing
    /// `*` matches any remainder. For admin commands the one-time
    /// code slot is *not* written in the pattern; the matcher
    /// appends it after the literal part.
    pub fn new<I: Into<String>, P: Into<String>>(id: I, pattern: P) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            pattern: pattern.into(),
            admin: false,
            minimum_run_interval: None,
            max_run_time: None,
        }
    }

    /// Set the spoken help description
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Mark this command as privileged
    ///
    /// Privileged commands only match when the dialed sequence
    /// carries a valid, unused one-time code between the pattern
    /// literal and any capture slots.
    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    /// Set the minimum interval between two runs
    ///
    /// A dispatch attempt inside the interval is refused without
    /// running the handler.
    pub fn with_minimum_run_interval(mut self, interval: Duration) -> Self {
        self.minimum_run_interval = Some(interval);
        self
    }

    /// Set a per-command run-time limit for isolated execution
    ///
    /// Overrides the executor's global limit.
    pub fn with_max_run_time(mut self, limit: Duration) -> Self {
        self.max_run_time = Some(limit);
        self
    }

    /// Command id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spoken help description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Dialing pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True for privileged commands
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Minimum interval between runs, if throttled
    pub fn minimum_run_interval(&self) -> Option<Duration> {
        self.minimum_run_interval
    }

    /// Per-command run-time limit, if set
    pub fn max_run_time(&self) -> Option<Duration> {
        self.max_run_time
    }
}
