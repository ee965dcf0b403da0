//! Symbol input sources
//!
//! The main loop is fed one symbol (or one silence) per tick by a
//! [`SymbolSource`]. Two sources are provided:
//!
//! * [`PcmSymbolSource`] reads a fixed-duration window of raw i16
//!   PCM from a reader and runs it through the tone decoder. The
//!   blocking read is the loop's pacing: one window, one tick.
//! * [`KeyboardSource`] takes typed DTMF characters from standard
//!   input instead, for exercising the station without a receiver.
//!   It polls on a fixed timeout so the accumulator's idle clock
//!   keeps running while nobody types.

use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use byteorder::{NativeEndian, ReadBytesExt};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{error, info, warn};

use dtmfrx::{is_symbol, AudioWindow, ToneDecoder};

/// Keyboard poll timeout per tick
///
/// The accumulator's idle bound is expressed in ticks; callers
/// rescale it by the ratio of this timeout to the audio window so
/// the wall-clock sequence timeout is the same in both modes.
pub const KEYBOARD_TICK: Duration = Duration::from_millis(500);

/// One tick's worth of input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourcePoll {
    /// A DTMF character was decoded (or typed)
    Symbol(char),

    /// A tick passed with no symbol
    Quiet,

    /// The input is exhausted; the main loop should exit
    Closed,
}

/// A source of one symbol per main-loop tick
pub trait SymbolSource {
    /// Block for up to one tick and report what arrived
    fn poll(&mut self) -> SourcePoll;
}

/// Decodes symbols from raw i16 PCM windows
pub struct PcmSymbolSource<R> {
    reader: R,
    decoder: ToneDecoder,
    sample_rate: u32,
    window_samples: usize,
    samples: Vec<f32>,
}

impl<R: io::Read> PcmSymbolSource<R> {
    /// Source reading mono i16 samples at `sample_rate` from
    /// `reader`, decoding one window of `window` duration per tick
    pub fn new(reader: R, sample_rate: u32, window: Duration, decoder: ToneDecoder) -> Self {
        let window_samples = (sample_rate as f64 * window.as_secs_f64()) as usize;
        Self {
            reader,
            decoder,
            sample_rate,
            window_samples,
            samples: Vec::with_capacity(window_samples),
        }
    }
}

impl<R: io::Read> SymbolSource for PcmSymbolSource<R> {
    fn poll(&mut self) -> SourcePoll {
        self.samples.clear();
        while self.samples.len() < self.window_samples {
            match self.reader.read_i16::<NativeEndian>() {
                Ok(sample) => self.samples.push(sample as f32),
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => {
                    warn!("error reading audio samples: {}", err);
                    break;
                }
            }
        }

        if self.samples.is_empty() {
            return SourcePoll::Closed;
        }

        let window = AudioWindow::new_mono(&self.samples, self.sample_rate);
        match self.decoder.first_symbol(&window) {
            Ok(Some(symbol)) => SourcePoll::Symbol(symbol),
            Ok(None) => SourcePoll::Quiet,
            Err(err) => {
                // fatal to the window, not to the loop
                error!("unable to decode window: {}", err);
                SourcePoll::Quiet
            }
        }
    }
}

/// Reads typed DTMF characters instead of decoding audio
///
/// A reader thread pulls bytes from the given input and forwards
/// printable characters, uppercased, over a channel. Characters
/// outside the DTMF alphabet are rejected with a log line, exactly
/// like a tone the decoder cannot classify.
pub struct KeyboardSource {
    keys: Receiver<char>,
    tick: Duration,
}

impl KeyboardSource {
    /// Source reading keys from standard input
    pub fn stdin() -> Self {
        Self::from_reader(io::stdin())
    }

    /// Source reading keys from an arbitrary reader
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (key_tx, key_rx) = bounded(64);

        // the reader thread exits when the input closes or the
        // source is dropped
        let spawned = thread::Builder::new()
            .name("keyboard".to_owned())
            .spawn(move || {
                for byte in reader.bytes() {
                    let byte = match byte {
                        Ok(byte) => byte,
                        Err(_) => break,
                    };

                    let chr = char::from(byte).to_ascii_uppercase();
                    if chr.is_whitespace() {
                        continue;
                    }
                    if key_tx.send(chr).is_err() {
                        break;
                    }
                }
            });

        if let Err(err) = spawned {
            warn!("unable to spawn keyboard reader: {}", err);
        }

        Self {
            keys: key_rx,
            tick: KEYBOARD_TICK,
        }
    }

    /// Override the poll timeout
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

impl SymbolSource for KeyboardSource {
    fn poll(&mut self) -> SourcePoll {
        match self.keys.recv_timeout(self.tick) {
            Ok(chr) if is_symbol(chr) => {
                info!("read DTMF character {} from the keyboard", chr);
                SourcePoll::Symbol(chr)
            }
            Ok(chr) => {
                error!("invalid DTMF character: {}", chr);
                SourcePoll::Quiet
            }
            Err(RecvTimeoutError::Timeout) => SourcePoll::Quiet,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Closed,
        }
    }
}
