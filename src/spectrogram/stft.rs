//! Incremental short-time Fourier transform with a rectangular window.
//!
//! Consecutive frames overlap by all but `step` samples, so each spectrum
//! can be derived from the previous one instead of being recomputed. Let
//! `x` be the previous frame and `y` the next. Rotating `x` left by `step`
//! gives a frame `y'` that differs from `y` only in its last `step`
//! samples, and rotation in time is a per-bin phase factor in frequency:
//! `F(y)[n] = F(y')[n] * phase[n]` with `phase[n] = e^(2*pi*i*step*n/N)`.
//! `F(y')` itself is `F(x) - F(x - y')`, and `x - y'` is non-zero only in
//! its first `step` positions, which makes its transform a job for the
//! zero-tail FFT. With `step` much smaller than the frame length this
//! replaces a full transform per frame with a sparse one.

use super::fft::{ComplexFft, FftError, Result, SimpleComplexFft, ZeroTailComplexFft};

/// One complex spectrum produced by the STFT.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Real parts, one per bin.
    pub re: Vec<f64>,
    /// Imaginary parts, one per bin.
    pub im: Vec<f64>,
}

/// Sliding-window transform yielding a fixed number of spectra.
#[derive(Debug, Clone)]
pub struct RectangularStft {
    frame_length: usize,
    step: usize,
    frame_count: usize,
    /// Per-bin phase factor that undoes the left rotation by `step`.
    re_phase: Vec<f64>,
    im_phase: Vec<f64>,
    initial_fft: SimpleComplexFft,
    subsequent_fft: ZeroTailComplexFft,
}

impl RectangularStft {
    /// Create a transform producing `frame_count` spectra of length
    /// `2^frame_length_log2`, each `2^step_log2` samples after the previous.
    ///
    /// # Panics
    ///
    /// Panics if `frame_count` is zero or `step_log2 > frame_length_log2`.
    pub fn new(frame_length_log2: u32, step_log2: u32, frame_count: usize) -> Self {
        assert!(frame_count > 0, "frame count must be positive");
        let frame_length = 1usize << frame_length_log2;
        let step = 1usize << step_log2;

        let mut re_phase = Vec::with_capacity(frame_length);
        let mut im_phase = Vec::with_capacity(frame_length);
        let two_pi_m_over_n =
            2.0 * std::f64::consts::PI / frame_length as f64 * step as f64;
        for k in 0..frame_length {
            re_phase.push((two_pi_m_over_n * k as f64).cos());
            im_phase.push((two_pi_m_over_n * k as f64).sin());
        }

        Self {
            frame_length,
            step,
            frame_count,
            re_phase,
            im_phase,
            initial_fft: SimpleComplexFft::new(frame_length_log2),
            subsequent_fft: ZeroTailComplexFft::new(frame_length_log2, step_log2),
        }
    }

    /// Shortest waveform the transform accepts.
    pub fn required_length(&self) -> usize {
        self.frame_length + self.step * (self.frame_count - 1)
    }

    /// Compute the spectra of all frames of the given waveform.
    ///
    /// Both arrays must hold at least [`required_length`](Self::required_length)
    /// elements; extra elements are ignored.
    pub fn transform(&self, re: &[f64], im: &[f64]) -> Result<Vec<Spectrum>> {
        let required = self.required_length();
        if re.len() < required {
            return Err(FftError::InputTooShort {
                input: "re",
                required,
                actual: re.len(),
            });
        }
        if im.len() < required {
            return Err(FftError::InputTooShort {
                input: "im",
                required,
                actual: im.len(),
            });
        }

        let mut result = Vec::with_capacity(self.frame_count);

        let mut re_x = re[..self.frame_length].to_vec();
        let mut im_x = im[..self.frame_length].to_vec();
        self.initial_fft.transform(&mut re_x, &mut im_x)?;
        result.push(Spectrum {
            re: re_x.clone(),
            im: im_x.clone(),
        });

        let mut re_diff = vec![0.0; self.frame_length];
        let mut im_diff = vec![0.0; self.frame_length];
        let mut re_y = vec![0.0; self.frame_length];
        let mut im_y = vec![0.0; self.frame_length];

        for frame in 1..self.frame_count {
            let start_x = (frame - 1) * self.step;

            // x minus its left rotation: non-zero only in the first `step`
            // positions, where the rotation pulled in the fresh samples
            for n in 0..self.frame_length {
                let rotated = self.rotated_index(start_x, n);
                re_diff[n] = re[start_x + n] - re[rotated];
                im_diff[n] = im[start_x + n] - im[rotated];
            }
            self.subsequent_fft.transform(&mut re_diff, &mut im_diff)?;

            for n in 0..self.frame_length {
                let re_rotated = re_x[n] - re_diff[n];
                let im_rotated = im_x[n] - im_diff[n];

                re_y[n] = re_rotated * self.re_phase[n] - im_rotated * self.im_phase[n];
                im_y[n] = im_rotated * self.re_phase[n] + re_rotated * self.im_phase[n];
            }

            result.push(Spectrum {
                re: re_y.clone(),
                im: im_y.clone(),
            });
            re_x.copy_from_slice(&re_y);
            im_x.copy_from_slice(&im_y);
        }
        Ok(result)
    }

    /// Index of sample `n` of the previous frame rotated left by `step`.
    #[inline]
    fn rotated_index(&self, start_x: usize, n: usize) -> usize {
        if n < self.step {
            start_x + self.frame_length + n
        } else {
            start_x + n
        }
    }
}
