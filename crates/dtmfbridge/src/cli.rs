use std::fmt::Display;

use clap::{error::ErrorKind, value_parser, CommandFactory, Parser};

/// Standard input filename
const STDIN_FILE: &str = "-";

const USAGE_SHORT: &str = r#"
This program accepts raw PCM samples in signed 16-bit (i16) format, at the given sampling --rate, decodes DTMF command sequences, and dispatches the matching station commands.

See --help for more details.

ALWAYS TEST YOUR STATION SETUP OFF-AIR FIRST!
"#;

const USAGE_LONG: &str = r#"
This program accepts raw PCM samples in signed 16-bit (i16) format, at the given sampling --rate, decodes DTMF command sequences, and dispatches the matching station commands. Commands, announcement jobs, and the station identity are defined in the --config file.

You can pipe in receiver audio with sox

    sox -d -t raw -r 48k -e signed -b 16 -c 1 - \
        | dtmfbridge --config station.json -r 48000

or replay a recording for testing:

    sox recording.wav -t raw -r 48k -e signed -b 16 -c 1 - \
        | dtmfbridge --config station.json -r 48000

With --emulator no audio is decoded: DTMF characters are read from standard input instead (press enter to flush a line of keys). This is useful for exercising command handlers without a receiver.

On startup the pool of one-time admin codes is topped up and the unused codes are logged at info level. Privileged commands are dialed as their sequence followed by one of these codes.

ALWAYS TEST YOUR STATION SETUP OFF-AIR FIRST!
"#;

const ADVANCED: &str = "Advanced Decoder Options";

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about, long_about = None)]
#[command(after_help = USAGE_SHORT, after_long_help = USAGE_LONG)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Verbosity level (-vvv for more)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print nothing, not even startup logging
    #[arg(short, long)]
    pub quiet: bool,

    /// Station configuration file
    #[arg(short, long, default_value_t = String::from("dtmfbridge.json"))]
    pub config: String,

    /// Sampling rate (Hz)
    ///
    /// Set to the sampling rate of your audio source. If sampling from
    /// a sound card, use the card's native rate—usually 44100 or 48000.
    /// Avoid resampling the audio.
    #[arg(short, long, default_value_t = 48000)]
    pub rate: u32,

    /// Input file (or "-" for stdin)
    ///
    /// The input must be one-channel (mono), signed 16-bit
    /// native-endian at --rate.
    #[arg(long, default_value_t = STDIN_FILE.to_string())]
    pub file: String,

    /// Read DTMF characters from the keyboard instead of audio
    #[arg(long)]
    pub emulator: bool,

    /// Development mode: relax scheduler validation limits
    #[arg(long)]
    pub dev: bool,

    /// Recording window per decode cycle (ms)
    #[arg(long, default_value_t = 400)]
    #[arg(value_parser = value_parser!(u64).range(100..5000))]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub window_ms: u64,

    /// Classification sub-interval (ms)
    #[arg(long, default_value_t = 50)]
    #[arg(value_parser = value_parser!(u64).range(10..1000))]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub interval_ms: u64,

    /// Tone snap tolerance (Hz)
    #[arg(long, default_value_t = 20.0)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub tolerance_hz: f32,

    /// Unchanged decode cycles before a partial sequence is dropped
    #[arg(long, default_value_t = 15)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub max_idle_ticks: u32,

    /// Longest dialed sequence kept before an overflow reset
    #[arg(long, default_value_t = 7)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub max_sequence_length: usize,
}

impl Args {
    /// Return true if the user requests input from stdin
    pub fn input_is_stdin(&self) -> bool {
        self.file == STDIN_FILE
    }
}

/// A program-level error with exit code
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    exit_code: i32,
}

impl CliError {
    /// Create new error with a custom exit code
    pub fn new(error: anyhow::Error, code: i32) -> CliError {
        CliError {
            error,
            exit_code: code,
        }
    }

    /// Print this error to the terminal
    ///
    /// Errors from clap are printed verbatim. Other types of errors
    /// are printed indirectly via clap's fancy formatter.
    pub fn print(&self) -> std::io::Result<()> {
        if let Some(e) = self.error.downcast_ref::<clap::Error>() {
            e.print()
        } else {
            Args::command()
                .error(ErrorKind::Format, self.to_string())
                .print()
        }
    }

    /// Print this error to the terminal and exit
    pub fn exit(&self) -> ! {
        drop(self.print());
        std::process::exit(self.exit_code);
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> CliError {
        CliError::new(err, 1)
    }
}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        let code = if err.use_stderr() { 1 } else { 0 };
        CliError::new(err.into(), code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clap() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
