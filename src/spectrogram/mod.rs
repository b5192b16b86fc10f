//! Spectrogram construction.
//!
//! A spectrogram is built by sliding a frame over the sample buffer, taking
//! a real FFT per frame, and compressing the per-bin magnitudes into a
//! small number of logarithmically spaced frequency bands. The result is
//! the `[time][band]` matrix the wavelet stage decomposes.

pub mod fft;
pub mod real;
pub mod stft;

use fft::{FftError, Result};
use real::RealFft;

/// Sums FFT magnitudes into logarithmically spaced frequency bins.
///
/// Bin boundaries are fixed at construction: the `i`'th bin covers
/// frequencies from `lowest * (highest/lowest)^(i/bins)` up to the next
/// edge, translated to FFT bin indices against half the sample rate.
#[derive(Debug, Clone)]
pub struct FrequencySplitter {
    /// Half-open `[low, high)` amplitude index ranges, one per bin.
    ranges: Vec<(usize, usize)>,
}

impl FrequencySplitter {
    /// Compute bin boundaries for the given geometry.
    ///
    /// `amplitude_count` is the number of magnitudes a transform yields,
    /// i.e. half the FFT frame length. Frequencies are in Hz.
    ///
    /// # Panics
    ///
    /// Panics if `lowest_frequency` is zero.
    pub fn new(
        sample_rate: u32,
        amplitude_count: usize,
        bin_count: usize,
        lowest_frequency: u32,
        highest_frequency: u32,
    ) -> Self {
        assert!(lowest_frequency > 0, "lowest frequency must be positive");

        // the frequency the last FFT amplitude corresponds to
        let fft_max = f64::from(sample_rate / 2);
        let max_log = f64::from(highest_frequency / lowest_frequency).ln();

        let mut ranges = Vec::with_capacity(bin_count);
        for i in 0..bin_count {
            let low_log = max_log * i as f64 / bin_count as f64;
            let high_log = max_log * (i + 1) as f64 / bin_count as f64;

            let low_freq = f64::from(lowest_frequency) * low_log.exp();
            let high_freq = f64::from(lowest_frequency) * high_log.exp();

            // ceil, not round: rounding can break the monotonic growth of
            // bin widths. Edges are clamped so apply never over-reads.
            let low = (amplitude_count as f64 * low_freq / fft_max).ceil() as usize;
            let high = (amplitude_count as f64 * high_freq / fft_max).ceil() as usize;
            ranges.push((low.min(amplitude_count), high.min(amplitude_count)));
        }
        Self { ranges }
    }

    /// Sum `amplitudes` into one value per bin.
    pub fn apply(&self, amplitudes: &[f64]) -> Vec<f64> {
        self.ranges
            .iter()
            .map(|&(low, high)| amplitudes[low..high].iter().sum())
            .collect()
    }
}

/// Builds fixed-shape spectrograms from overlapping FFT frames.
#[derive(Debug, Clone)]
pub struct SpectrogramBuilder {
    length: usize,
    frame_length: usize,
    step: usize,
    fft: RealFft,
    splitter: FrequencySplitter,
}

impl SpectrogramBuilder {
    /// Create a builder producing `length` frames of `width` frequency
    /// bins, with FFT frames of `2^frame_length_log2` samples taken every
    /// `step` samples.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        length: usize,
        frame_length_log2: u32,
        step: usize,
        sample_rate: u32,
        width: usize,
        lowest_frequency: u32,
        highest_frequency: u32,
    ) -> Self {
        let frame_length = 1usize << frame_length_log2;
        Self {
            length,
            frame_length,
            step,
            fft: RealFft::new(frame_length_log2),
            splitter: FrequencySplitter::new(
                sample_rate,
                frame_length >> 1,
                width,
                lowest_frequency,
                highest_frequency,
            ),
        }
    }

    /// Number of samples one spectrogram consumes.
    pub fn length_in_samples(&self) -> usize {
        self.step * (self.length - 1) + self.frame_length
    }

    /// Build the spectrogram of the window starting at `start`.
    pub fn spectrogram(&self, samples: &[i16], start: usize) -> Result<Vec<Vec<f64>>> {
        let required = start + self.length_in_samples();
        if samples.len() < required {
            return Err(FftError::InputTooShort {
                input: "samples",
                required,
                actual: samples.len(),
            });
        }

        let mut spectrogram = Vec::with_capacity(self.length);
        let mut re = vec![0.0; self.frame_length];
        let half = self.frame_length >> 1;

        for frame in 0..self.length {
            let frame_start = start + frame * self.step;
            for (x, &sample) in re.iter_mut().zip(&samples[frame_start..]) {
                *x = f64::from(sample);
            }

            self.fft.transform(&mut re)?;

            let mut amplitudes = Vec::with_capacity(half);
            for i in 0..half {
                let re_amp = re[i];
                let im_amp = re[half + i];
                amplitudes.push((re_amp * re_amp + im_amp * im_amp).sqrt());
            }

            spectrogram.push(self.splitter.apply(&amplitudes));
        }
        Ok(spectrogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitter_bins_follow_exponential_edges() {
        // fft_max = 4 Hz, 4 amplitudes, 2 bins over 1..4 Hz:
        // edges at 1, 2 and 4 Hz give index ranges [1, 2) and [2, 4)
        let splitter = FrequencySplitter::new(8, 4, 2, 1, 4);
        let bins = splitter.apply(&[100.0, 1.0, 2.0, 4.0]);
        assert_eq!(bins, vec![1.0, 6.0]);
    }

    #[test]
    fn splitter_clamps_edges_to_available_amplitudes() {
        // highest frequency above fft_max = 2 Hz: ranges come out as
        // [2, 4) and [4, 4), the top bin collapsing to empty instead of
        // reading past the amplitude array
        let splitter = FrequencySplitter::new(4, 4, 2, 1, 4);
        let bins = splitter.apply(&[1.0, 2.0, 4.0, 8.0]);
        assert_eq!(bins, vec![12.0, 0.0]);
    }

    #[test]
    fn spectrogram_puts_a_pure_tone_in_the_right_band() {
        // one cosine cycle per 8-sample frame at 8 Hz sampling = 1 Hz tone;
        // with bins [1, 2) and [2, 4) all energy lands in the first band
        let builder = SpectrogramBuilder::new(2, 3, 4, 8, 2, 1, 4);
        assert_eq!(builder.length_in_samples(), 12);

        let cycle = [100i16, 71, 0, -71, -100, -71, 0, 71];
        let samples: Vec<i16> = cycle.iter().copied().cycle().take(16).collect();

        let spectrogram = builder.spectrogram(&samples, 0).expect("enough samples");
        assert_eq!(spectrogram.len(), 2);
        for row in &spectrogram {
            assert_eq!(row.len(), 2);
            assert!(
                row[0] > 90.0 && row[1] < 5.0,
                "tone energy should stay in band 0: {row:?}"
            );
        }
    }

    #[test]
    fn spectrogram_rejects_short_buffers_with_required_count() {
        let builder = SpectrogramBuilder::new(2, 3, 4, 8, 2, 1, 4);
        let samples = vec![0i16; 13];
        match builder.spectrogram(&samples, 2) {
            Err(FftError::InputTooShort {
                input: "samples",
                required: 14,
                actual: 13,
            }) => {}
            other => panic!("expected too-short error, got {other:?}"),
        }
    }
}
