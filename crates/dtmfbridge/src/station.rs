//! Transmitter and announcer implementations
//!
//! The library core only knows the [`Transmitter`] and [`Announcer`]
//! traits; this module supplies the concrete station hardware
//! bindings. Keyed transmitters are driven through a GPIO-style
//! value file. Announcements are produced by handing text (or an
//! audio asset) to an external pipeline command, with the callsign
//! announced first and the transmitter keyed around the whole
//! announcement.

use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use log::{info, trace, warn};

use dtmfrx::{Announcer, Transmitter};

/// Transmitter keyed through a GPIO value file
///
/// Writes `1` to key the transmitter and `0` to unkey it. Keying is
/// best-effort by contract: a failed write is logged, never raised,
/// so the executor's fail-safe can always run.
#[derive(Clone, Debug)]
pub struct KeyedTransmitter {
    pin_path: PathBuf,
}

impl KeyedTransmitter {
    /// Transmitter driving the value file at `pin_path`
    pub fn new<P: Into<PathBuf>>(pin_path: P) -> Self {
        Self {
            pin_path: pin_path.into(),
        }
    }

    fn set(&self, value: &str) {
        if let Err(err) = std::fs::write(&self.pin_path, value) {
            warn!(
                "unable to write \"{}\" to {}: {}",
                value,
                self.pin_path.display(),
                err
            );
        }
    }
}

impl Transmitter for KeyedTransmitter {
    fn enable(&self) {
        trace!("enabling TX mode");
        self.set("1");
    }

    fn disable(&self) {
        trace!("disabling TX mode");
        self.set("0");
    }
}

/// Announcer which feeds an external synthesis/playback pipeline
///
/// Speech and playback each run a configured command line with the
/// text or asset appended as the final argument. With no command
/// configured the announcement is logged instead, which is the
/// normal development setup.
pub struct PipelineAnnouncer {
    callsign: String,
    say_command: Vec<String>,
    play_command: Vec<String>,
    transmitter: Arc<dyn Transmitter>,
}

impl PipelineAnnouncer {
    /// New announcer for the given station identity and pipelines
    pub fn new(
        callsign: String,
        say_command: Vec<String>,
        play_command: Vec<String>,
        transmitter: Arc<dyn Transmitter>,
    ) -> Self {
        Self {
            callsign,
            say_command,
            play_command,
            transmitter,
        }
    }

    // Announce the callsign: play it if it names an audio file,
    // speak it otherwise
    fn announce_callsign(&self) -> io::Result<()> {
        if self.callsign.ends_with(".mp3") || self.callsign.ends_with(".wav") {
            self.pipe(&self.play_command, &self.callsign)
        } else {
            self.pipe(&self.say_command, &self.callsign)
        }
    }

    // Run one pipeline command with `value` as its final argument
    fn pipe(&self, pipeline: &[String], value: &str) -> io::Result<()> {
        let program = match pipeline.first() {
            Some(program) => program,
            None => {
                info!("announce: {}", value);
                return Ok(());
            }
        };

        let status = Command::new(program)
            .args(&pipeline[1..])
            .arg(value)
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("announcement pipeline exited with {}", status),
            ))
        }
    }
}

impl Announcer for PipelineAnnouncer {
    fn say(&self, text: &str) -> io::Result<()> {
        self.transmitter.enable();

        let result = self
            .announce_callsign()
            .and_then(|_| self.pipe(&self.say_command, text));

        // the transmitter is unkeyed no matter how the pipeline fared
        self.transmitter.disable();
        result
    }

    fn play(&self, asset: &str) -> io::Result<()> {
        self.transmitter.enable();

        let result = self
            .announce_callsign()
            .and_then(|_| self.pipe(&self.play_command, asset));

        self.transmitter.disable();
        result
    }
}
