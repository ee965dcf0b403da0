//! Built-in station commands
//!
//! Each command is a small struct owning the collaborators it
//! speaks through, registered at startup by
//! [`build_registry()`]. Patterns may be overridden per command in
//! the station configuration; a command with `enabled = false` in
//! the configuration is not registered at all (the runtime
//! enable/disable state is a separate, persisted concern flipped by
//! the admin commands).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, Timelike, Utc};

use dtmfrx::{
    Announcer, CommandDescriptor, CommandError, CommandGate, CommandHandler, CommandRegistry,
    HandlerResult,
};

use crate::config::BridgeConfig;

/// Speaks the current local and UTC time
pub struct CurrentTimeHandler {
    announcer: Arc<dyn Announcer>,
}

impl CommandHandler for CurrentTimeHandler {
    fn run(&self, _data: Option<&str>) -> HandlerResult {
        let now_local = Local::now();
        let now_utc = Utc::now();

        let text = format!(
            "Current time is {} {} local. {}, {} U T C.",
            now_local.hour(),
            now_local.minute(),
            now_utc.hour(),
            now_utc.minute()
        );
        self.announcer.say(&text)?;
        Ok(None)
    }
}

/// Speaks the list of available (non-admin) commands
pub struct HelpHandler {
    announcer: Arc<dyn Announcer>,
    entries: Vec<(String, String)>,
}

impl CommandHandler for HelpHandler {
    fn run(&self, _data: Option<&str>) -> HandlerResult {
        let mut text = "Available commands:".to_owned();

        for (index, (pattern, description)) in self.entries.iter().enumerate() {
            let spelled: String = pattern
                .chars()
                .map(|chr| chr.to_string())
                .collect::<Vec<String>>()
                .join(" ");
            text.push_str(&format!(
                "\n{}. Sequence {}. {}",
                index + 1,
                spelled,
                description
            ));
        }

        self.announcer.say(&text)?;
        Ok(None)
    }
}

/// Speaks details for a repeater selected by its dialed code
///
/// The repeater table comes from the command's `options` in the
/// station configuration: each option key is a dialed code and its
/// value is the text to speak.
pub struct RepeaterInfoHandler {
    announcer: Arc<dyn Announcer>,
    repeaters: BTreeMap<String, String>,
}

impl CommandHandler for RepeaterInfoHandler {
    fn run(&self, data: Option<&str>) -> HandlerResult {
        let code = data.ok_or_else(|| CommandError::new("no repeater code captured"))?;

        match self.repeaters.get(code) {
            Some(text) => {
                self.announcer.say(text)?;
                Ok(Some(code.to_owned()))
            }
            None => {
                self.announcer.say("Unknown repeater.")?;
                Ok(None)
            }
        }
    }
}

/// Clears a mistyped sequence
///
/// Dispatching any command clears the accumulated sequence, so the
/// handler itself has nothing to do.
pub struct ClearSequenceHandler;

impl CommandHandler for ClearSequenceHandler {
    fn run(&self, _data: Option<&str>) -> HandlerResult {
        Ok(None)
    }
}

/// Admin: confirms that one-time codes and dispatch work
pub struct AdminTestHandler {
    announcer: Arc<dyn Announcer>,
}

impl CommandHandler for AdminTestHandler {
    fn run(&self, _data: Option<&str>) -> HandlerResult {
        self.announcer.say("Admin test command successful.")?;
        Ok(None)
    }
}

/// Admin: enables or disables all non-admin commands
pub struct SetCommandsEnabledHandler {
    announcer: Arc<dyn Announcer>,
    gate: CommandGate,
    command_ids: Vec<String>,
    enabled: bool,
}

impl CommandHandler for SetCommandsEnabledHandler {
    fn run(&self, _data: Option<&str>) -> HandlerResult {
        for id in &self.command_ids {
            self.gate.set_enabled(id, self.enabled)?;
        }

        let text = if self.enabled {
            "D T M F commands have been enabled."
        } else {
            "D T M F commands have been disabled."
        };
        self.announcer.say(text)?;
        Ok(None)
    }
}

// Built-in command metadata: id, default pattern, admin, description
const BUILTINS: &[(&str, &str, bool, &str)] = &[
    ("help", "12", false, "List available commands."),
    ("current_time", "23", false, "Current date and time."),
    ("repeater_info", "38???", false, "Information for a specific repeater."),
    ("clear_sequence", "*D*", false, "Clear currently accumulated sequence."),
    ("admin_test", "91", true, "Test admin command."),
    ("disable_commands", "93", true, "Disable all the non-admin commands."),
    ("enable_commands", "94", true, "Enable all the non-admin commands."),
];

/// Build the command registry from the built-in set and the station
/// configuration
pub fn build_registry(
    config: &BridgeConfig,
    announcer: Arc<dyn Announcer>,
    gate: &CommandGate,
) -> anyhow::Result<CommandRegistry> {
    // resolve descriptors first: the help command speaks the final
    // pattern of every other non-admin command
    let mut descriptors = Vec::new();
    for (id, default_pattern, admin, description) in BUILTINS {
        let command_config = config.command(id);
        if !command_config.enabled {
            continue;
        }

        let pattern = command_config
            .pattern
            .clone()
            .unwrap_or_else(|| (*default_pattern).to_owned());

        let mut descriptor = CommandDescriptor::new(*id, pattern).with_description(*description);
        if *admin {
            descriptor = descriptor.admin();
        }

        if let Some(interval) = command_config.minimum_run_interval() {
            descriptor = descriptor.with_minimum_run_interval(interval);
        }
        if let Some(limit) = command_config.max_run_time() {
            descriptor = descriptor.with_max_run_time(limit);
        }

        descriptors.push(descriptor);
    }

    let help_entries: Vec<(String, String)> = descriptors
        .iter()
        .filter(|descriptor| !descriptor.is_admin())
        .map(|descriptor| {
            (
                descriptor.pattern().to_owned(),
                descriptor.description().to_owned(),
            )
        })
        .collect();
    let non_admin_ids: Vec<String> = descriptors
        .iter()
        .filter(|descriptor| !descriptor.is_admin())
        .map(|descriptor| descriptor.id().to_owned())
        .collect();

    let mut registry = CommandRegistry::new();
    for descriptor in descriptors {
        let id = descriptor.id().to_owned();
        let registered = match id.as_str() {
            "help" => registry.register(
                descriptor,
                HelpHandler {
                    announcer: announcer.clone(),
                    entries: help_entries.clone(),
                },
            ),
            "current_time" => registry.register(
                descriptor,
                CurrentTimeHandler {
                    announcer: announcer.clone(),
                },
            ),
            "repeater_info" => registry.register(
                descriptor,
                RepeaterInfoHandler {
                    announcer: announcer.clone(),
                    repeaters: config.command("repeater_info").options,
                },
            ),
            "clear_sequence" => registry.register(descriptor, ClearSequenceHandler),
            "admin_test" => registry.register(
                descriptor,
                AdminTestHandler {
                    announcer: announcer.clone(),
                },
            ),
            "disable_commands" => registry.register(
                descriptor,
                SetCommandsEnabledHandler {
                    announcer: announcer.clone(),
                    gate: gate.clone(),
                    command_ids: non_admin_ids.clone(),
                    enabled: false,
                },
            ),
            "enable_commands" => registry.register(
                descriptor,
                SetCommandsEnabledHandler {
                    announcer: announcer.clone(),
                    gate: gate.clone(),
                    command_ids: non_admin_ids.clone(),
                    enabled: true,
                },
            ),
            other => anyhow::bail!("no handler for built-in command \"{}\"", other),
        };

        registered.with_context(|| format!("unable to register command \"{}\"", id))?;
    }

    Ok(registry)
}
