//! Station configuration
//!
//! One JSON file defines the station identity, the transmitter mode,
//! the announcement pipeline, per-command settings, and the
//! scheduled announcement jobs. Everything is validated up front;
//! a bad configuration aborts startup before the receiver opens.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveTime;
use serde::Deserialize;

use dtmfrx::{ExecutorKind, JobTrigger};

/// Shortest allowed scheduled-job interval outside dev mode
///
/// Keeps a mistyped job spec from turning the station into a
/// beacon.
const MINIMUM_TRIGGER_INTERVAL: Duration = Duration::from_secs(120);

/// Top-level station configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Station callsign, spoken (or played, if it names an audio
    /// file) before every announcement
    pub callsign: String,

    /// Transmitter mode: "vox" or "keyed"
    #[serde(default = "default_tx_mode")]
    pub tx_mode: String,

    /// Value file driving the PTT line in keyed mode
    #[serde(default)]
    pub tx_pin_path: Option<PathBuf>,

    /// Pool file for one-time admin codes
    pub otp_pool_path: PathBuf,

    /// State file recording externally disabled commands
    pub command_state_path: PathBuf,

    /// Executor strategy: "native" or "isolated"
    #[serde(default = "default_executor")]
    pub executor: String,

    /// Global command run-time limit, seconds (isolated mode)
    #[serde(default = "default_max_run_time_secs")]
    pub max_run_time_secs: u64,

    /// Text-to-speech pipeline; the text is appended as the final
    /// argument. Empty: announcements are logged only.
    #[serde(default)]
    pub say_command: Vec<String>,

    /// Audio playback pipeline; the asset is appended as the final
    /// argument. Empty: playback requests are logged only.
    #[serde(default)]
    pub play_command: Vec<String>,

    /// Per-command settings, keyed by command id
    #[serde(default)]
    pub commands: BTreeMap<String, CommandConfig>,

    /// Scheduled announcement jobs, keyed by job id
    #[serde(default)]
    pub jobs: BTreeMap<String, JobConfig>,
}

/// Per-command settings
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Override the command's built-in dialing pattern
    #[serde(default)]
    pub pattern: Option<String>,

    /// Register the command at all
    ///
    /// This is the startup switch. The runtime enable/disable state
    /// lives in the command state file and is flipped by the admin
    /// commands.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum seconds between two runs
    #[serde(default)]
    pub minimum_run_interval_secs: Option<u64>,

    /// Per-command run-time limit, seconds
    #[serde(default)]
    pub max_run_time_secs: Option<u64>,

    /// Free-form handler options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// One scheduled announcement job
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Trigger type: "interval" or "daily"
    pub trigger: String,

    /// Interval seconds (trigger = "interval")
    #[serde(default)]
    pub every_secs: Option<u64>,

    /// Local firing time "HH:MM" (trigger = "daily")
    #[serde(default)]
    pub at: Option<String>,

    /// Job action: "say" or "play"
    pub action: String,

    /// Text to say, or the audio asset to play
    ///
    /// Text may reference `{callsign}`, `{time_local}`, and
    /// `{time_utc}`.
    pub value: String,
}

impl BridgeConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P, dev_mode: bool) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file \"{}\"", path.display()))?;
        let config: BridgeConfig = serde_json::from_str(&content)
            .with_context(|| format!("unable to parse config file \"{}\"", path.display()))?;

        config.validate(dev_mode)?;
        Ok(config)
    }

    /// Parsed executor strategy
    pub fn executor_kind(&self) -> anyhow::Result<ExecutorKind> {
        ExecutorKind::from_str(&self.executor)
            .with_context(|| format!("unknown executor \"{}\"", self.executor))
    }

    /// Global run-time limit
    pub fn max_run_time(&self) -> Duration {
        Duration::from_secs(self.max_run_time_secs)
    }

    /// Settings for one command, defaults if absent
    pub fn command(&self, id: &str) -> CommandConfig {
        self.commands.get(id).cloned().unwrap_or_default()
    }

    // Startup validation; failures abort before anything transmits
    fn validate(&self, dev_mode: bool) -> anyhow::Result<()> {
        if self.callsign.trim().is_empty() {
            bail!("callsign must not be empty");
        }

        match self.tx_mode.as_str() {
            "vox" => {}
            "keyed" => {
                if self.tx_pin_path.is_none() {
                    bail!("tx_mode \"keyed\" requires tx_pin_path");
                }
            }
            other => bail!("unknown tx_mode \"{}\" (expected \"vox\" or \"keyed\")", other),
        }

        self.executor_kind()?;
        if self.max_run_time_secs == 0 {
            bail!("max_run_time_secs must be positive");
        }

        for (id, command) in &self.commands {
            if command.minimum_run_interval_secs == Some(0) {
                bail!("command \"{}\": minimum_run_interval_secs must be positive", id);
            }
            if command.max_run_time_secs == Some(0) {
                bail!("command \"{}\": max_run_time_secs must be positive", id);
            }
        }

        for (id, job) in &self.jobs {
            let trigger = job
                .job_trigger()
                .with_context(|| format!("job \"{}\"", id))?;

            if let JobTrigger::Interval(interval) = trigger {
                if !dev_mode && interval < MINIMUM_TRIGGER_INTERVAL {
                    bail!(
                        "job \"{}\": requested interval is {}s, but the minimum allowed value is {}s",
                        id,
                        interval.as_secs(),
                        MINIMUM_TRIGGER_INTERVAL.as_secs()
                    );
                }
            }

            match job.action.as_str() {
                "say" | "play" => {}
                other => bail!("job \"{}\": unknown action \"{}\"", id, other),
            }
        }

        Ok(())
    }
}

impl CommandConfig {
    /// Minimum run interval as a duration
    pub fn minimum_run_interval(&self) -> Option<Duration> {
        self.minimum_run_interval_secs.map(Duration::from_secs)
    }

    /// Run-time limit as a duration
    pub fn max_run_time(&self) -> Option<Duration> {
        self.max_run_time_secs.map(Duration::from_secs)
    }
}

impl JobConfig {
    /// Parsed trigger for the scheduler
    pub fn job_trigger(&self) -> anyhow::Result<JobTrigger> {
        match self.trigger.as_str() {
            "interval" => {
                let every_secs = self
                    .every_secs
                    .context("trigger \"interval\" requires every_secs")?;
                if every_secs == 0 {
                    bail!("every_secs must be positive");
                }
                Ok(JobTrigger::Interval(Duration::from_secs(every_secs)))
            }
            "daily" => {
                let at = self.at.as_deref().context("trigger \"daily\" requires at")?;
                let time = NaiveTime::parse_from_str(at, "%H:%M")
                    .with_context(|| format!("unable to parse time \"{}\"", at))?;
                Ok(JobTrigger::Daily(time))
            }
            other => bail!("unknown trigger \"{}\"", other),
        }
    }
}

fn default_tx_mode() -> String {
    "vox".to_owned()
}

fn default_executor() -> String {
    "isolated".to_owned()
}

fn default_max_run_time_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> serde_json::Value {
        serde_json::json!({
            "callsign": "S55ABC",
            "otp_pool_path": "/tmp/otps.txt",
            "command_state_path": "/tmp/disabled.txt"
        })
    }

    fn load_value(value: serde_json::Value, dev_mode: bool) -> anyhow::Result<BridgeConfig> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, value.to_string()).expect("write config");
        BridgeConfig::load(&path, dev_mode)
    }

    #[test]
    fn test_minimal_config() {
        let config = load_value(minimal_config(), false).unwrap();

        assert_eq!("S55ABC", config.callsign);
        assert_eq!("vox", config.tx_mode);
        assert_eq!(ExecutorKind::Isolated, config.executor_kind().unwrap());
        assert_eq!(Duration::from_secs(120), config.max_run_time());
        assert!(config.command("current_time").enabled);
    }

    #[test]
    fn test_keyed_mode_requires_a_pin() {
        let mut value = minimal_config();
        value["tx_mode"] = "keyed".into();
        assert!(load_value(value.clone(), false).is_err());

        value["tx_pin_path"] = "/sys/class/gpio/gpio17/value".into();
        assert!(load_value(value, false).is_ok());
    }

    #[test]
    fn test_unknown_executor_is_rejected() {
        let mut value = minimal_config();
        value["executor"] = "subprocess".into();
        assert!(load_value(value, false).is_err());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let mut value = minimal_config();
        value["commands"] =
            serde_json::json!({"current_time": {"minimum_run_interval_secs": 0}});
        assert!(load_value(value, false).is_err());
    }

    #[test]
    fn test_job_validation() {
        let mut value = minimal_config();
        value["jobs"] = serde_json::json!({
            "station_id": {"trigger": "interval", "every_secs": 1800,
                           "action": "say", "value": "This is {callsign}"}
        });
        let config = load_value(value.clone(), false).unwrap();
        assert_eq!(
            JobTrigger::Interval(Duration::from_secs(1800)),
            config.jobs["station_id"].job_trigger().unwrap()
        );

        // too fast outside dev mode
        value["jobs"]["station_id"]["every_secs"] = 30.into();
        assert!(load_value(value.clone(), false).is_err());
        assert!(load_value(value.clone(), true).is_ok());

        // bad action
        value["jobs"]["station_id"]["every_secs"] = 1800.into();
        value["jobs"]["station_id"]["action"] = "transmit".into();
        assert!(load_value(value.clone(), false).is_err());

        // daily trigger needs a parseable time
        value["jobs"]["station_id"] = serde_json::json!(
            {"trigger": "daily", "at": "07:30", "action": "say", "value": "Good morning"});
        assert!(load_value(value.clone(), false).is_ok());
        value["jobs"]["station_id"]["at"] = "7 thirty".into();
        assert!(load_value(value, false).is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let mut value = minimal_config();
        value["callsgn"] = "TYPO".into();
        assert!(load_value(value, false).is_err());
    }
}
