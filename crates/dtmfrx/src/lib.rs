//! # dtmfrx: DTMF Remote Command Reception
//!
//! This crate turns DTMF tones heard by a radio receiver into
//! commands that drive an automated station: announcements,
//! telemetry read-outs, transmitter keying. It provides the complete
//! receive-side chain:
//!
//! 1. [`ToneDecoder`]: classifies a window of mono audio into DTMF
//!    symbols by frequency-domain analysis;
//! 2. [`SequenceAccumulator`]: debounces decoded symbols into a
//!    growing dialed sequence, with idle and length bounds;
//! 3. [`CommandRegistry`]: matches sequences against registered
//!    command patterns, including capture slots and one-time-code
//!    gated privileged commands backed by an [`OtpStore`];
//! 4. [`CommandExecutor`]: runs the matched command natively or on
//!    an isolated, deadline-bounded worker, with per-command
//!    throttling and a transmitter fail-safe.
//!
//! ## Disclaimer
//!
//! This crate has not been certified for licensed-band remote
//! control in any jurisdiction. Operating a station unattended may
//! require a license; the one-time-code gate is a courtesy lock, not
//! a security boundary. You are responsible for what your
//! transmitter does.
//!
//! ## Example
//!
//! Audio capture is beyond the scope of this crate: bring any source
//! of fixed-duration mono PCM windows (a sound card wrapper, a pipe
//! from your SDR, a file). Feed each window through the decoder and
//! tick the accumulator with the result:
//!
//! ```
//! use std::sync::Arc;
//! use dtmfrx::{
//!     AudioWindow, CommandDescriptor, CommandExecutor, CommandRegistry, ExecutorKind,
//!     HandlerResult, OtpStore, SequenceAccumulator, TickOutcome, ToneDecoder, VoxTransmitter,
//! };
//!
//! fn say_time(_data: Option<&str>) -> HandlerResult {
//!     // speak through your announcement collaborator here
//!     Ok(None)
//! }
//!
//! let mut registry = CommandRegistry::new();
//! registry
//!     .register(CommandDescriptor::new("current_time", "23"), say_time)
//!     .unwrap();
//!
//! let otp = OtpStore::new("/tmp/dtmfrx-doc-otps.txt");
//! let decoder = ToneDecoder::new();
//! let mut accumulator = SequenceAccumulator::new();
//! let mut executor = CommandExecutor::new(ExecutorKind::Native, Arc::new(VoxTransmitter));
//!
//! # let capture_window = || vec![0.0f32; 3200];
//! for _tick in 0..3 {
//!     let samples: Vec<f32> = capture_window();
//!     let window = AudioWindow::new_mono(&samples, 8000);
//!     let symbol = decoder.first_symbol(&window).unwrap();
//!
//!     if let TickOutcome::Extended(sequence) = accumulator.tick(symbol) {
//!         match registry.find_match(&sequence, &otp, &|_id| true) {
//!             Some(found) => {
//!                 executor.run(found.command, found.data.as_deref());
//!                 accumulator.complete();
//!             }
//!             None => {
//!                 accumulator.prune();
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! Privileged commands are registered with
//! [`CommandDescriptor::admin()`] and dialed as the pattern literal
//! followed by a four-digit one-time code from the [`OtpStore`]
//! pool. Each code validates exactly once; replaying a recorded
//! admin sequence does nothing.
//!
//! A second input path for scheduled announcements is provided by
//! [`JobScheduler`]: its thread only ever appends job ids to a
//! [`JobQueue`], which the caller drains at the top of each tick, so
//! scheduled and dialed work never run concurrently.

mod command;
mod decoder;
mod executor;
mod gate;
mod otp;
mod radio;
mod registry;
mod scheduler;
mod sequencer;
mod symbols;

pub use command::{CommandDescriptor, CommandError, CommandHandler, HandlerResult};
pub use decoder::{AudioWindow, DecodeError, ToneDecoder};
pub use executor::{
    CommandExecutor, ExecutionRecord, ExecutorKind, Outcome, DEFAULT_MAX_RUN_TIME,
};
pub use gate::CommandGate;
pub use otp::{OtpStore, DEFAULT_POOL_SIZE, OTP_LENGTH};
pub use radio::{Announcer, Transmitter, VoxTransmitter};
pub use registry::{Command, CommandRegistry, RegistryError, SequenceMatch};
pub use scheduler::{JobQueue, JobScheduler, JobTrigger};
pub use sequencer::{SequenceAccumulator, TickOutcome};
pub use symbols::{is_symbol, symbol_for_pair, tone_pair, HIGH_TONES, LOW_TONES, TONE_PAIRS};
