//! Command registration and sequence matching
//!
//! The [`CommandRegistry`] holds every registered command in
//! registration order and resolves dialed sequences against their
//! patterns. Registration fails fast on configuration mistakes;
//! matching is the hot path of the dispatch loop and never mutates
//! the registry.
//!
//! Privileged (admin) commands are matched as
//! `literal + one-time code + capture slots`: the code sits
//! immediately after the static literal, ahead of any data payload,
//! so a privileged dispatch cannot be forged by replaying a
//! non-privileged payload that happens to contain four digits.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[cfg(not(test))]
use log::{debug, warn};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as warn;

use crate::command::{CommandDescriptor, CommandHandler};
use crate::otp::{OtpStore, OTP_LENGTH};

/// Command registration error
///
/// Raised while the startup registration list is applied. These are
/// configuration mistakes and abort startup; nothing here can occur
/// once the registry is built.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two commands share one pattern
    #[error("pattern \"{pattern}\" is already registered for another command ({registered_id})")]
    DuplicatePattern {
        /// The colliding pattern
        pattern: String,
        /// Id of the command which registered the pattern first
        registered_id: String,
    },

    /// Two commands share one id
    #[error("command id \"{0}\" is already registered")]
    DuplicateId(String),

    /// Pattern contains characters outside the DTMF alphabet + `?`,
    /// or has no literal part
    #[error("pattern \"{0}\" is not a valid command pattern")]
    InvalidPattern(String),

    /// Non-admin pattern repeats a literal character in adjacent
    /// positions
    ///
    /// The decoder debounces held tones, so a dialed repeat of the
    /// same character cannot be told apart from one long press. Such
    /// patterns would register but never match.
    #[error("pattern \"{0}\" repeats '{1}' in adjacent positions")]
    AdjacentRepeat(String, char),
}

/// A registered command: descriptor plus handler
pub struct Command {
    descriptor: CommandDescriptor,
    handler: Arc<dyn CommandHandler>,
}

impl Command {
    /// Command metadata
    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    /// Command behavior
    pub fn handler(&self) -> &Arc<dyn CommandHandler> {
        &self.handler
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// A successful sequence match
#[derive(Debug)]
pub struct SequenceMatch<'r> {
    /// The matched command
    pub command: &'r Command,

    /// Data captured from the sequence, if the pattern has capture
    /// slots
    pub data: Option<String>,
}

/// Holds every registered command and matches sequences against them
///
/// Commands are evaluated in registration order and the first match
/// wins. The registry itself is immutable after startup; the
/// per-command enabled flag is supplied by the caller on every match
/// attempt so that an external disable takes effect without a
/// restart.
///
/// ```
/// use dtmfrx::{CommandDescriptor, CommandRegistry, HandlerResult, OtpStore};
///
/// fn handler(_data: Option<&str>) -> HandlerResult {
///     Ok(None)
/// }
///
/// let mut registry = CommandRegistry::new();
/// registry
///     .register(CommandDescriptor::new("current_time", "23"), handler)
///     .unwrap();
///
/// let otp = OtpStore::new("/nonexistent/otps.txt");
/// let found = registry.find_match("23", &otp, &|_id| true).unwrap();
/// assert_eq!("current_time", found.command.descriptor().id());
/// assert!(registry.find_match("24", &otp, &|_id| true).is_none());
/// ```
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
}

impl CommandRegistry {
    /// New empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command
    ///
    /// Fails if the pattern is malformed, collides with an existing
    /// registration, or (for non-admin commands) contains adjacent
    /// repeated literal characters.
    pub fn register<H>(&mut self, descriptor: CommandDescriptor, handler: H) -> Result<(), RegistryError>
    where
        H: CommandHandler + 'static,
    {
        lazy_static! {
            static ref PATTERN_RE: Regex = Regex::new(r"^[0-9A-D*#?]+$").expect("pattern alphabet");
        }

        let pattern = descriptor.pattern();
        if !PATTERN_RE.is_match(pattern) {
            return Err(RegistryError::InvalidPattern(pattern.to_owned()));
        }

        // admin patterns are a literal followed by capture slots; a
        // glob tail or an interior slot would make the one-time code
        // position ambiguous
        if descriptor.is_admin() {
            let slots = pattern.chars().filter(|chr| *chr == '?').count();
            let (literal, tail) = pattern.split_at(pattern.len() - slots);
            if pattern.contains('*') || literal.contains('?') || tail.chars().any(|chr| chr != '?') {
                return Err(RegistryError::InvalidPattern(pattern.to_owned()));
            }
        }

        if !descriptor.is_admin() {
            let chars: Vec<char> = pattern.chars().collect();
            if let Some(pair) = chars
                .windows(2)
                .find(|pair| pair[0] == pair[1] && pair[0] != '?')
            {
                return Err(RegistryError::AdjacentRepeat(pattern.to_owned(), pair[0]));
            }
        }

        for existing in &self.commands {
            if existing.descriptor.pattern() == pattern {
                return Err(RegistryError::DuplicatePattern {
                    pattern: pattern.to_owned(),
                    registered_id: existing.descriptor.id().to_owned(),
                });
            }
            if existing.descriptor.id() == descriptor.id() {
                return Err(RegistryError::DuplicateId(descriptor.id().to_owned()));
            }
        }

        debug!(
            "registered command {} with sequence #{}",
            descriptor.id(),
            descriptor.pattern()
        );

        self.commands.push(Command {
            descriptor,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Registered commands, in registration order
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if no commands are registered
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Match a dialed sequence against every registered command
    ///
    /// Commands are tried in registration order; the first match
    /// wins. `enabled` is consulted for every candidate before its
    /// pattern is evaluated, so an externally disabled command never
    /// matches. For admin commands a structural match additionally
    /// requires the embedded one-time code to validate against
    /// `otp`; validation revokes the code, so a replay of the same
    /// sequence will not match a second time.
    pub fn find_match<'r>(
        &'r self,
        sequence: &str,
        otp: &OtpStore,
        enabled: &dyn Fn(&str) -> bool,
    ) -> Option<SequenceMatch<'r>> {
        for command in &self.commands {
            if !enabled(command.descriptor.id()) {
                continue;
            }

            let matched = if command.descriptor.is_admin() {
                match_admin(command.descriptor.pattern(), sequence, otp)
            } else {
                match_plain(command.descriptor.pattern(), sequence)
            };

            if let Some(data) = matched {
                return Some(SequenceMatch { command, data });
            }
        }

        None
    }
}

// Match a non-admin pattern; Some(captured) on success
fn match_plain(pattern: &str, sequence: &str) -> Option<Option<String>> {
    if let Some(literal) = pattern.strip_suffix('*') {
        // glob tail: any remainder matches and the captured data is
        // the wildcard token itself
        if sequence.len() >= literal.len() && literal_slots_match(literal, sequence) {
            return Some(Some("*".to_owned()));
        }
        return None;
    }

    if sequence.len() != pattern.len() || !literal_slots_match(pattern, sequence) {
        return None;
    }

    match pattern.find('?') {
        Some(prefix_len) => Some(Some(sequence[prefix_len..].to_owned())),
        None => Some(None),
    }
}

// Match an admin pattern: literal, then the one-time code, then any
// capture slots from the pattern
fn match_admin(pattern: &str, sequence: &str, otp: &OtpStore) -> Option<Option<String>> {
    let slots = pattern.chars().filter(|chr| *chr == '?').count();
    let literal = &pattern[..pattern.len() - slots];

    if sequence.len() != literal.len() + OTP_LENGTH + slots || !sequence.starts_with(literal) {
        return None;
    }

    let code = &sequence[literal.len()..literal.len() + OTP_LENGTH];
    if !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    match otp.validate(code) {
        Ok(true) => {}
        Ok(false) => return None,
        Err(err) => {
            warn!("unable to validate OTP: {}", err);
            return None;
        }
    }

    if slots > 0 {
        Some(Some(sequence[literal.len() + OTP_LENGTH..].to_owned()))
    } else {
        Some(None)
    }
}

// True if each pattern position matches the sequence position:
// either a capture slot or the same literal character
fn literal_slots_match(pattern: &str, sequence: &str) -> bool {
    pattern
        .chars()
        .zip(sequence.chars())
        .all(|(want, got)| want == '?' || want == got)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::command::HandlerResult;

    fn noop(_data: Option<&str>) -> HandlerResult {
        Ok(None)
    }

    fn temp_otp(codes: &[&str]) -> (tempfile::TempDir, OtpStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("otps.txt");
        std::fs::write(&path, codes.join("\n")).expect("write pool");
        (dir, OtpStore::new(path))
    }

    fn all_enabled(_id: &str) -> bool {
        true
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::new("current_time", "23"), noop)
            .unwrap();

        assert_eq!(
            Err(RegistryError::DuplicatePattern {
                pattern: "23".to_owned(),
                registered_id: "current_time".to_owned(),
            }),
            registry.register(CommandDescriptor::new("other", "23"), noop)
        );
        assert_eq!(
            Err(RegistryError::DuplicateId("current_time".to_owned())),
            registry.register(CommandDescriptor::new("current_time", "24"), noop)
        );
    }

    #[test]
    fn test_register_rejects_bad_patterns() {
        let mut registry = CommandRegistry::new();

        assert_eq!(
            Err(RegistryError::InvalidPattern("2E".to_owned())),
            registry.register(CommandDescriptor::new("bad_alphabet", "2E"), noop)
        );
        assert_eq!(
            Err(RegistryError::InvalidPattern("".to_owned())),
            registry.register(CommandDescriptor::new("empty", ""), noop)
        );
        assert_eq!(
            Err(RegistryError::AdjacentRepeat("335".to_owned(), '3')),
            registry.register(CommandDescriptor::new("repeat", "335"), noop)
        );
        assert_eq!(
            Err(RegistryError::InvalidPattern("9*".to_owned())),
            registry.register(CommandDescriptor::new("admin_glob", "9*").admin(), noop)
        );

        // capture slots may sit side by side
        registry
            .register(CommandDescriptor::new("slots", "35??"), noop)
            .unwrap();
    }

    #[test]
    fn test_plain_match() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::new("current_time", "23"), noop)
            .unwrap();
        let (_dir, otp) = temp_otp(&[]);

        let found = registry.find_match("23", &otp, &all_enabled).unwrap();
        assert_eq!("current_time", found.command.descriptor().id());
        assert_eq!(None, found.data);

        assert!(registry.find_match("2", &otp, &all_enabled).is_none());
        assert!(registry.find_match("233", &otp, &all_enabled).is_none());
    }

    #[test]
    fn test_capture_match() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::new("location_weather", "35??"), noop)
            .unwrap();
        let (_dir, otp) = temp_otp(&[]);

        let found = registry.find_match("3501", &otp, &all_enabled).unwrap();
        assert_eq!(Some("01".to_owned()), found.data);

        assert!(registry.find_match("350", &otp, &all_enabled).is_none());
        assert!(registry.find_match("35012", &otp, &all_enabled).is_none());
    }

    #[test]
    fn test_glob_match_passes_the_wildcard_through() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::new("clear_sequence", "*D*"), noop)
            .unwrap();
        let (_dir, otp) = temp_otp(&[]);

        let found = registry.find_match("*D", &otp, &all_enabled).unwrap();
        assert_eq!(Some("*".to_owned()), found.data);
        let found = registry.find_match("*D123", &otp, &all_enabled).unwrap();
        assert_eq!(Some("*".to_owned()), found.data);

        assert!(registry.find_match("*C", &otp, &all_enabled).is_none());
    }

    #[test]
    fn test_admin_match_requires_valid_otp() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::new("disable_commands", "93").admin(), noop)
            .unwrap();
        let (_dir, otp) = temp_otp(&["1234", "5656"]);

        // wrong shape: no code, short code, non-digit code
        assert!(registry.find_match("93", &otp, &all_enabled).is_none());
        assert!(registry.find_match("93123", &otp, &all_enabled).is_none());
        assert!(registry.find_match("93123A", &otp, &all_enabled).is_none());

        // unused code matches once
        assert!(registry.find_match("931234", &otp, &all_enabled).is_some());

        // the code is revoked: an identical replay does not match
        assert!(registry.find_match("931234", &otp, &all_enabled).is_none());
        assert!(registry.find_match("935656", &otp, &all_enabled).is_some());
    }

    #[test]
    fn test_admin_match_with_data_slots() {
        let mut registry = CommandRegistry::new();
        registry
            .register(
                CommandDescriptor::new("change_announcer", "92?").admin(),
                noop,
            )
            .unwrap();
        let (_dir, otp) = temp_otp(&["4747"]);

        // code between the literal and the payload
        let found = registry.find_match("9247471", &otp, &all_enabled).unwrap();
        assert_eq!(Some("1".to_owned()), found.data);

        // payload digits cannot stand in for the code
        assert!(registry.find_match("9212342", &otp, &all_enabled).is_none());
    }

    #[test]
    fn test_first_registered_match_wins() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::new("exact", "25"), noop)
            .unwrap();
        registry
            .register(CommandDescriptor::new("capture", "2?"), noop)
            .unwrap();
        let (_dir, otp) = temp_otp(&[]);

        let found = registry.find_match("25", &otp, &all_enabled).unwrap();
        assert_eq!("exact", found.command.descriptor().id());

        let found = registry.find_match("27", &otp, &all_enabled).unwrap();
        assert_eq!("capture", found.command.descriptor().id());
    }

    #[test]
    fn test_disabled_command_does_not_match() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDescriptor::new("current_time", "23"), noop)
            .unwrap();
        let (_dir, otp) = temp_otp(&[]);

        assert!(registry
            .find_match("23", &otp, &|id| id != "current_time")
            .is_none());
        assert!(registry.find_match("23", &otp, &all_enabled).is_some());
    }
}
