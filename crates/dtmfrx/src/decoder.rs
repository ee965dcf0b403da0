//! Frequency-domain DTMF tone classification
//!
//! The [`ToneDecoder`] splits an audio window into fixed-size
//! sub-intervals and classifies each one against the DTMF tone grid.
//! For every sub-interval it computes a discrete Fourier transform,
//! finds the strongest frequency in the low band (below 1050 Hz) and
//! in the high band (1100 Hz – 2000 Hz), and snaps each peak to the
//! nearest canonical row or column tone. If both peaks snap within
//! tolerance, the pair resolves to a symbol via the inverse tone
//! table.
//!
//! A tone which is *held* across several sub-intervals produces one
//! symbol, not one per interval: repeats are collapsed until a
//! sub-interval with no tone is observed. This is what turns a
//! keypress of arbitrary duration into exactly one character.
//!
//! The bands of interest end at 2 kHz and the sub-intervals are tens
//! of milliseconds long, so the transform is evaluated directly on
//! the bins inside each band. There is no windowing; the snapping
//! tolerance absorbs the scalloping error.

use std::f32::consts::PI;
use std::time::Duration;

use num_complex::Complex;
use thiserror::Error;

use crate::symbols;

/// Default sub-interval length for classification
const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Default peak-snapping tolerance, in Hz
const DEFAULT_TOLERANCE_HZ: f32 = 20.0;

/// Low band search range (Hz): `(0, LOW_BAND_MAX]`
const LOW_BAND_MAX: f32 = 1050.0;

/// High band search range (Hz): `[HIGH_BAND_MIN, HIGH_BAND_MAX]`
const HIGH_BAND_MIN: f32 = 1100.0;
const HIGH_BAND_MAX: f32 = 2000.0;

/// Tone classification error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input window is not one-channel audio
    #[error("input audio is not mono ({0} channels)")]
    NotMono(u16),
}

/// A fixed-duration window of PCM audio samples
///
/// The window borrows its samples and is never mutated. Use
/// [`AudioWindow::new_mono()`] when the capture path already
/// guarantees one channel.
#[derive(Clone, Copy, Debug)]
pub struct AudioWindow<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    channels: u16,
}

impl<'a> AudioWindow<'a> {
    /// Window over interleaved samples with `channels` channels
    pub fn new(samples: &'a [f32], sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Window over one-channel samples
    pub fn new_mono(samples: &'a [f32], sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Samples in this window
    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    /// Sampling rate, in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total duration of the window
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// DTMF tone decoder
///
/// Classifies an [`AudioWindow`] into DTMF symbols. Two entry points
/// are provided:
///
/// * [`first_symbol()`](ToneDecoder::first_symbol) stops at the first
///   symbol transition and is intended for live dispatch, where the
///   caller polls one short window at a time;
/// * [`symbol_transitions()`](ToneDecoder::symbol_transitions) scans
///   the entire window and reports every transition, for diagnostics
///   and batch decoding of recordings.
///
/// ```
/// use dtmfrx::{AudioWindow, ToneDecoder};
///
/// let decoder = ToneDecoder::new();
/// let silence = vec![0.0f32; 8000];
/// let window = AudioWindow::new_mono(&silence, 8000);
/// assert_eq!(None, decoder.first_symbol(&window).unwrap());
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToneDecoder {
    interval: Duration,
    tolerance_hz: f32,
}

impl ToneDecoder {
    /// New decoder with default interval and tolerance
    pub fn new() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tolerance_hz: DEFAULT_TOLERANCE_HZ,
        }
    }

    /// Set the classification sub-interval
    ///
    /// Windows are classified in chunks of this duration. Shorter
    /// intervals reduce latency but widen the transform's bin
    /// spacing; at 50 ms the bins are 20 Hz apart, which matches the
    /// default snap tolerance.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the peak-snapping tolerance, in Hz
    ///
    /// A band peak further than this from every canonical tone is
    /// treated as "no tone" for that band.
    pub fn with_tolerance_hz(mut self, tolerance_hz: f32) -> Self {
        self.tolerance_hz = tolerance_hz;
        self
    }

    /// Classify the window and return the first symbol found
    ///
    /// Scans sub-intervals in order and returns as soon as one of
    /// them yields a symbol. Returns `Ok(None)` for silence, noise,
    /// or a window shorter than one sub-interval.
    ///
    /// The input must be mono; anything else is a hard error.
    pub fn first_symbol(&self, window: &AudioWindow<'_>) -> Result<Option<char>, DecodeError> {
        Ok(self.scan(window, true)?.into_iter().next())
    }

    /// Classify the window and return every symbol transition
    ///
    /// A held tone is reported once. A symbol is reported again only
    /// if a no-tone sub-interval separates the two presses.
    pub fn symbol_transitions(&self, window: &AudioWindow<'_>) -> Result<Vec<char>, DecodeError> {
        self.scan(window, false)
    }

    // Scan sub-intervals, collapsing repeats of the running symbol
    fn scan(
        &self,
        window: &AudioWindow<'_>,
        stop_at_first: bool,
    ) -> Result<Vec<char>, DecodeError> {
        if window.channels != 1 {
            return Err(DecodeError::NotMono(window.channels));
        }

        let mut out = Vec::new();

        let step = (window.sample_rate as f64 * self.interval.as_secs_f64()) as usize;
        if step == 0 || window.samples.len() < step {
            return Ok(out);
        }

        let mut current: Option<char> = None;
        for chunk in window.samples.chunks_exact(step) {
            let low = self.band_tone(chunk, window.sample_rate, &symbols::LOW_TONES, 0.0, LOW_BAND_MAX);
            let high = self.band_tone(
                chunk,
                window.sample_rate,
                &symbols::HIGH_TONES,
                HIGH_BAND_MIN,
                HIGH_BAND_MAX,
            );

            match (low, high) {
                (Some(low), Some(high)) => {
                    let symbol = symbols::symbol_for_pair(low, high);
                    if symbol != current {
                        current = symbol;
                        if let Some(symbol) = symbol {
                            out.push(symbol);
                            if stop_at_first {
                                break;
                            }
                        }
                    }
                }
                // one band empty: no tone, and the next repeat of the
                // previous symbol counts as a fresh press
                _ => current = None,
            }
        }

        Ok(out)
    }

    // Strongest in-band frequency, snapped to a canonical tone
    //
    // Returns None when the band peak is further than the tolerance
    // from every canonical tone.
    fn band_tone(
        &self,
        chunk: &[f32],
        sample_rate: u32,
        canonical: &[u32],
        band_min: f32,
        band_max: f32,
    ) -> Option<u32> {
        let peak = band_peak(chunk, sample_rate, band_min, band_max)?;

        let mut delta = self.tolerance_hz;
        let mut best = None;
        for tone in canonical {
            let distance = (peak - *tone as f32).abs();
            if distance < delta {
                delta = distance;
                best = Some(*tone);
            }
        }

        best
    }
}

impl Default for ToneDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// Frequency (Hz) of the strongest DFT bin with band_min < f ≤ band_max
//
// Evaluates the transform directly at each in-band bin: the bins of
// interest number at most a few hundred, so this costs one complex
// multiply-add per sample per bin and needs no scratch storage.
fn band_peak(chunk: &[f32], sample_rate: u32, band_min: f32, band_max: f32) -> Option<f32> {
    let n = chunk.len();
    let bin_hz = sample_rate as f32 / n as f32;

    let k_min = (band_min / bin_hz).floor() as usize + 1;
    let k_max = usize::min((band_max / bin_hz).floor() as usize, n / 2);
    if k_min > k_max {
        return None;
    }

    let mut best_k = 0usize;
    let mut best_mag = f32::NEG_INFINITY;
    for k in k_min..=k_max {
        let step = Complex::from_polar(1.0f32, -2.0 * PI * k as f32 / n as f32);
        let mut twiddle = Complex::new(1.0f32, 0.0);
        let mut acc = Complex::new(0.0f32, 0.0);
        for sample in chunk {
            acc += twiddle * sample;
            twiddle *= step;
        }

        let mag = acc.norm_sqr();
        if mag > best_mag {
            best_mag = mag;
            best_k = k;
        }
    }

    Some(best_k as f32 * bin_hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    const RATE: u32 = 8000;

    // Two-tone test signal at the given frequencies
    fn two_tone(low_hz: f32, high_hz: f32, duration: Duration) -> Vec<f32> {
        let samples = (RATE as f64 * duration.as_secs_f64()) as usize;
        (0..samples)
            .map(|i| {
                let t = i as f32 / RATE as f32;
                0.5 * (2.0 * PI * low_hz * t).sin() + 0.5 * (2.0 * PI * high_hz * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_band_peak() {
        let samples = two_tone(697.0, 1209.0, Duration::from_millis(50));

        let low = band_peak(&samples, RATE, 0.0, LOW_BAND_MAX).unwrap();
        let high = band_peak(&samples, RATE, HIGH_BAND_MIN, HIGH_BAND_MAX).unwrap();

        // 50 ms at 8 kHz → 20 Hz bins
        assert_approx_eq!(low, 697.0, 20.0);
        assert_approx_eq!(high, 1209.0, 20.0);
    }

    #[test]
    fn test_decode_all_symbols() {
        let decoder = ToneDecoder::new();

        for (chr, (low, high)) in crate::symbols::TONE_PAIRS.entries() {
            let samples = two_tone(*low as f32, *high as f32, Duration::from_millis(200));
            let window = AudioWindow::new_mono(&samples, RATE);
            assert_eq!(
                Some(*chr),
                decoder.first_symbol(&window).unwrap(),
                "symbol {}",
                chr
            );
        }
    }

    #[test]
    fn test_silence_yields_nothing() {
        let decoder = ToneDecoder::new();
        let silence = vec![0.0f32; RATE as usize / 2];
        let window = AudioWindow::new_mono(&silence, RATE);

        assert_eq!(None, decoder.first_symbol(&window).unwrap());
        assert!(decoder.symbol_transitions(&window).unwrap().is_empty());
    }

    #[test]
    fn test_short_window_yields_nothing() {
        let decoder = ToneDecoder::new();
        let samples = two_tone(697.0, 1209.0, Duration::from_millis(10));
        let window = AudioWindow::new_mono(&samples, RATE);

        assert_eq!(None, decoder.first_symbol(&window).unwrap());
    }

    #[test]
    fn test_not_mono_is_an_error() {
        let decoder = ToneDecoder::new();
        let samples = vec![0.0f32; 1024];
        let window = AudioWindow::new(&samples, RATE, 2);

        assert_eq!(Err(DecodeError::NotMono(2)), decoder.first_symbol(&window));
    }

    #[test]
    fn test_held_tone_collapses_to_one_symbol() {
        let decoder = ToneDecoder::new();

        // one second of a held "5": twenty 50 ms sub-intervals
        let samples = two_tone(770.0, 1336.0, Duration::from_secs(1));
        let window = AudioWindow::new_mono(&samples, RATE);

        assert_eq!(vec!['5'], decoder.symbol_transitions(&window).unwrap());
    }

    #[test]
    fn test_silence_separates_repeated_presses() {
        let decoder = ToneDecoder::new();

        let mut samples = two_tone(770.0, 1336.0, Duration::from_millis(200));
        samples.extend(std::iter::repeat(0.0f32).take(RATE as usize / 5));
        samples.extend(two_tone(770.0, 1336.0, Duration::from_millis(200)));
        let window = AudioWindow::new_mono(&samples, RATE);

        assert_eq!(vec!['5', '5'], decoder.symbol_transitions(&window).unwrap());
    }

    #[test]
    fn test_transition_between_symbols() {
        let decoder = ToneDecoder::new();

        let mut samples = two_tone(697.0, 1209.0, Duration::from_millis(200));
        samples.extend(two_tone(941.0, 1477.0, Duration::from_millis(200)));
        let window = AudioWindow::new_mono(&samples, RATE);

        assert_eq!(vec!['1', '#'], decoder.symbol_transitions(&window).unwrap());
    }

    #[test]
    fn test_off_grid_tone_is_rejected() {
        let decoder = ToneDecoder::new();

        // between the 697 and 770 row tones, outside the snap tolerance
        let samples = two_tone(737.0, 1209.0, Duration::from_millis(200));
        let window = AudioWindow::new_mono(&samples, RATE);

        assert_eq!(None, decoder.first_symbol(&window).unwrap());
    }
}
