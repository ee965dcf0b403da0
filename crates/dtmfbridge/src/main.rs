use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{info, LevelFilter};

use dtmfrx::{
    Announcer, CommandExecutor, CommandGate, JobScheduler, OtpStore, SequenceAccumulator,
    ToneDecoder, Transmitter, VoxTransmitter,
};

mod app;
mod cli;
mod config;
mod handlers;
mod input;
mod station;

use cli::{Args, CliError};
use config::BridgeConfig;
use input::{KeyboardSource, PcmSymbolSource, KEYBOARD_TICK};
use station::{KeyedTransmitter, PipelineAnnouncer};

fn main() {
    match bridge() {
        Ok(()) => {}
        Err(cli_error) => cli_error.exit(),
    }
}

fn bridge() -> Result<(), CliError> {
    // Parse options and start logging
    let args = Args::try_parse()?;
    log_setup(&args);

    if args.dev {
        info!("development mode is active");
    }
    if args.emulator {
        info!("running in emulator mode");
    }

    let config = BridgeConfig::load(&args.config, args.dev)?;

    // top up the one-time code pool; operators read the fresh codes
    // off the startup log
    let otp = OtpStore::new(&config.otp_pool_path);
    let (all_codes, fresh_codes) = otp
        .generate_pool()
        .context("unable to top up the OTP pool")?;
    info!(
        "{} unused admin codes on hand ({} newly generated)",
        all_codes.len(),
        fresh_codes.len()
    );
    info!(
        "valid admin codes: {}",
        all_codes.iter().cloned().collect::<Vec<String>>().join(" ")
    );

    let transmitter: Arc<dyn Transmitter> = match config.tx_mode.as_str() {
        "keyed" => match &config.tx_pin_path {
            Some(pin_path) => Arc::new(KeyedTransmitter::new(pin_path.clone())),
            None => return Err(anyhow!("tx_mode \"keyed\" requires tx_pin_path").into()),
        },
        _ => Arc::new(VoxTransmitter),
    };

    let announcer: Arc<dyn Announcer> = Arc::new(PipelineAnnouncer::new(
        config.callsign.clone(),
        config.say_command.clone(),
        config.play_command.clone(),
        transmitter.clone(),
    ));

    // register the command set
    let gate = CommandGate::new(&config.command_state_path);
    let registry = handlers::build_registry(&config, announcer.clone(), &gate)?;
    info!(
        "active commands: {}",
        registry
            .commands()
            .map(|command| command.descriptor().id().to_owned())
            .collect::<Vec<String>>()
            .join(", ")
    );

    let executor = CommandExecutor::new(config.executor_kind()?, transmitter.clone())
        .with_default_max_run_time(config.max_run_time());

    // the scheduler thread only feeds the job queue; jobs run on
    // the dispatch loop
    let mut scheduler = JobScheduler::new();
    for (job_id, job) in &config.jobs {
        let trigger = job
            .job_trigger()
            .with_context(|| format!("job \"{}\"", job_id))?;
        scheduler.add_job(job_id.clone(), trigger);
    }
    let queue = scheduler.start().context("unable to start the scheduler")?;

    // in emulator mode the poll timeout differs from the recording
    // window; rescale the idle bound so the wall-clock sequence
    // timeout stays the same
    let max_idle_ticks = if args.emulator {
        ((args.max_idle_ticks as u64 * args.window_ms) / KEYBOARD_TICK.as_millis() as u64) as u32
    } else {
        args.max_idle_ticks
    };
    let accumulator = SequenceAccumulator::new()
        .with_max_idle_ticks(max_idle_ticks)
        .with_max_sequence_length(args.max_sequence_length);

    let mut app = app::App {
        callsign: config.callsign.clone(),
        registry,
        otp,
        gate,
        accumulator,
        executor,
        announcer,
        jobs: config.jobs.clone(),
        queue,
    };

    info!("dtmfbridge started");

    if args.emulator {
        let mut source = KeyboardSource::stdin();
        app.run(&mut source);
    } else {
        let decoder = ToneDecoder::new()
            .with_interval(Duration::from_millis(args.interval_ms))
            .with_tolerance_hz(args.tolerance_hz);

        let stdin = io::stdin();
        let reader = file_setup(&args, stdin.lock())?;
        let mut source = PcmSymbolSource::new(
            reader,
            args.rate,
            Duration::from_millis(args.window_ms),
            decoder,
        );
        app.run(&mut source);
    }

    scheduler.stop();
    Ok(())
}

fn log_setup(args: &Args) {
    if args.quiet {
        // no logging
        return;
    } else if std::env::var_os("RUST_LOG").is_none() {
        // parameter controls
        let log_filter = match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        pretty_env_logger::formatted_builder()
            .filter_module("dtmfrx", log_filter)
            .filter_module("dtmfbridge", log_filter)
            .init();
    } else {
        // environment controls
        pretty_env_logger::init();
    }
}

fn file_setup<'stdin>(
    args: &Args,
    stdin: std::io::StdinLock<'stdin>,
) -> Result<Box<dyn io::BufRead + 'stdin>, anyhow::Error> {
    if args.input_is_stdin() {
        info!("reading receiver audio from standard input");
        if !is_terminal(&std::io::stdin()) {
            Ok(Box::new(io::BufReader::new(stdin)))
        } else {
            Err(anyhow!(
                "cowardly refusing to read audio samples from a terminal.

Pipe a source of raw uncompressed audio from sox, parec, rtl_fm,
or similar into this program, or use --emulator to type DTMF
characters instead."
            ))
        }
    } else {
        info!("reading receiver audio from file: \"{}\"", &args.file);
        Ok(Box::new(io::BufReader::new(
            std::fs::File::open(&args.file)
                .with_context(|| format!("Unable to open --file \"{}\"", args.file))?,
        )))
    }
}

#[cfg(not(target_os = "windows"))]
fn is_terminal<S>(stream: &S) -> bool
where
    S: std::os::fd::AsRawFd,
{
    terminal_size::terminal_size_using_fd(stream.as_raw_fd()).is_some()
}

#[cfg(target_os = "windows")]
fn is_terminal<S>(stream: &S) -> bool
where
    S: std::os::windows::io::AsRawHandle,
{
    terminal_size::terminal_size_using_handle(stream.as_raw_handle()).is_some()
}
