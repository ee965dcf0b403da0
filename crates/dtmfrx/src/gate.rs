//! Per-command enable/disable state
//!
//! Whether a command is currently enabled lives outside the
//! (immutable) registry, in a small state file: one disabled command
//! id per line. The matcher consults this store on every match
//! attempt, so flipping a command takes effect on the next dialed
//! sequence without a restart, and the state survives one.
//!
//! An absent file means every command is enabled, which keeps a
//! fresh installation permissive and makes "delete the file" a
//! usable recovery tool.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(not(test))]
use log::{info, warn};

#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

/// Persisted enable/disable switch for registered commands
///
/// ```no_run
/// use dtmfrx::CommandGate;
///
/// let gate = CommandGate::new("/var/lib/dtmfbridge/disabled.txt");
/// gate.set_enabled("current_time", false).unwrap();
/// assert!(!gate.is_enabled("current_time"));
/// ```
#[derive(Clone, Debug)]
pub struct CommandGate {
    path: PathBuf,
}

impl CommandGate {
    /// Gate backed by the state file at `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if `id` is currently enabled
    ///
    /// Re-reads the state file on every call. If the file cannot be
    /// read the command is treated as enabled; a broken state store
    /// must not silence the station.
    pub fn is_enabled(&self, id: &str) -> bool {
        match self.disabled() {
            Ok(disabled) => !disabled.contains(id),
            Err(err) => {
                warn!("unable to read command state file: {}", err);
                true
            }
        }
    }

    /// Enable or disable a command
    pub fn set_enabled(&self, id: &str, enabled: bool) -> io::Result<()> {
        let mut disabled = self.disabled()?;

        let changed = if enabled {
            disabled.remove(id)
        } else {
            disabled.insert(id.to_owned())
        };

        if changed {
            info!(
                "command {} is now {}",
                id,
                if enabled { "enabled" } else { "disabled" }
            );
            self.persist(&disabled)?;
        }

        Ok(())
    }

    /// Ids of all currently disabled commands
    pub fn disabled(&self) -> io::Result<BTreeSet<String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(err),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn persist(&self, disabled: &BTreeSet<String>) -> io::Result<()> {
        let mut content = disabled.iter().cloned().collect::<Vec<String>>().join("\n");
        content.push('\n');
        std::fs::write(&self.path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_gate() -> (tempfile::TempDir, CommandGate) {
        let dir = tempfile::tempdir().expect("tempdir");
        let gate = CommandGate::new(dir.path().join("disabled.txt"));
        (dir, gate)
    }

    #[test]
    fn test_absent_file_enables_everything() {
        let (_dir, gate) = temp_gate();
        assert!(gate.is_enabled("current_time"));
        assert!(gate.disabled().unwrap().is_empty());
    }

    #[test]
    fn test_disable_and_reenable() {
        let (_dir, gate) = temp_gate();

        gate.set_enabled("current_time", false).unwrap();
        assert!(!gate.is_enabled("current_time"));
        assert!(gate.is_enabled("help"));

        gate.set_enabled("current_time", true).unwrap();
        assert!(gate.is_enabled("current_time"));
    }

    #[test]
    fn test_state_is_shared_through_the_file() {
        let (_dir, gate) = temp_gate();
        let observer = CommandGate::new(gate.path());

        gate.set_enabled("help", false).unwrap();
        assert!(!observer.is_enabled("help"));
    }
}
