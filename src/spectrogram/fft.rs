//! Radix-2 decimation-in-time FFT with precomputed tables.
//!
//! Both variants scale every output bin by 1/N on every call. This is not
//! the textbook normalization, but the whole fingerprint pipeline is built
//! on these exact values, so the scaling must stay as it is.
//!
//! The zero-tail variant exploits inputs whose last `N - 2^m` elements are
//! zero: after the bit-reversal sort, zeros cluster into whole windows, and
//! any window recombined from two zero windows can be skipped. A bitmask on
//! the window index identifies the windows that still need work.

use thiserror::Error;

/// Convenient result alias for transform operations.
pub type Result<T> = std::result::Result<T, FftError>;

/// Errors raised by the transform family.
#[derive(Debug, Error)]
pub enum FftError {
    /// An input array does not have the length the transform was built for.
    #[error("{array} array has length {actual}, expected {expected}")]
    LengthMismatch {
        /// Name of the offending array.
        array: &'static str,
        /// Length that was passed in.
        actual: usize,
        /// Length the transform was constructed for.
        expected: usize,
    },
    /// An input holds fewer elements than the operation needs.
    #[error("{input} is too short: required at least {required}, actual {actual}")]
    InputTooShort {
        /// Name of the offending input.
        input: &'static str,
        /// Minimum number of elements required.
        required: usize,
        /// Number of elements passed in.
        actual: usize,
    },
}

/// Discrete Fourier transform of a split-complex sequence, in place.
pub trait ComplexFft {
    /// Transform `re`/`im` in place, scaling every bin by 1/N.
    ///
    /// Both arrays must have exactly the length the transform was
    /// constructed for.
    fn transform(&self, re: &mut [f64], im: &mut [f64]) -> Result<()>;
}

/// Precomputed data shared by the FFT variants: the bit-reversal
/// permutation and per-level twiddle factors.
///
/// Construction costs O(N log N); the tables are immutable afterwards and
/// can be shared freely across threads.
#[derive(Debug, Clone)]
pub struct FftTables {
    /// Base-2 logarithm of the transform length.
    length_log2: u32,
    /// `permuted[i] = source[bit_reversal[i]]`.
    bit_reversal: Vec<usize>,
    /// Twiddle sines, indexed by (level - 1), then by butterfly index.
    sines: Vec<Vec<f64>>,
    /// Twiddle cosines, same indexing as `sines`.
    cosines: Vec<Vec<f64>>,
}

impl FftTables {
    /// Precompute tables for transforms of length `2^length_log2`.
    pub fn new(length_log2: u32) -> Self {
        let length = 1usize << length_log2;

        let mut bit_reversal = Vec::with_capacity(length);
        for i in 0..length {
            let mut x = i;
            let mut r = 0;
            for _ in 0..length_log2 {
                r = (r << 1) | (x & 1);
                x >>= 1;
            }
            bit_reversal.push(r);
        }

        let mut sines = Vec::with_capacity(length_log2 as usize);
        let mut cosines = Vec::with_capacity(length_log2 as usize);
        for level in 1..=length_log2 {
            let cur_length = 1usize << level;
            let prev_length = cur_length >> 1;
            let mut sin = Vec::with_capacity(prev_length);
            let mut cos = Vec::with_capacity(prev_length);
            for k in 0..prev_length {
                let arg = -2.0 * std::f64::consts::PI * k as f64 / cur_length as f64;
                sin.push(arg.sin());
                cos.push(arg.cos());
            }
            sines.push(sin);
            cosines.push(cos);
        }

        Self {
            length_log2,
            bit_reversal,
            sines,
            cosines,
        }
    }

    /// Base-2 logarithm of the transform length.
    pub fn length_log2(&self) -> u32 {
        self.length_log2
    }

    /// Transform length in elements.
    pub fn length(&self) -> usize {
        1 << self.length_log2
    }

    fn check_lengths(&self, re: &[f64], im: &[f64]) -> Result<()> {
        let expected = self.length();
        if re.len() != expected {
            return Err(FftError::LengthMismatch {
                array: "re",
                actual: re.len(),
                expected,
            });
        }
        if im.len() != expected {
            return Err(FftError::LengthMismatch {
                array: "im",
                actual: im.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Apply the bit-reversal sort to both arrays.
    ///
    /// The permutation is an involution, so applying it reduces to one
    /// swap per out-of-place pair.
    fn bit_reverse_sort(&self, re: &mut [f64], im: &mut [f64]) {
        for (i, &j) in self.bit_reversal.iter().enumerate() {
            if i < j {
                re.swap(i, j);
                im.swap(i, j);
            }
        }
    }

    #[inline]
    fn butterfly(&self, re: &mut [f64], im: &mut [f64], level: u32, k: usize, window: usize) {
        let prev_length = 1usize << (level - 1);
        let cur_length = prev_length << 1;

        let re_tk = self.cosines[(level - 1) as usize][k];
        let im_tk = self.sines[(level - 1) as usize][k];

        // k'th element of the window, and its pair half a window ahead
        let even = k + window * cur_length;
        let odd = even + prev_length;

        let re_ek = re[even];
        let im_ek = im[even];
        let re_ok = re[odd];
        let im_ok = im[odd];

        let re_tok = re_tk * re_ok - im_tk * im_ok;
        let im_tok = im_tk * re_ok + re_tk * im_ok;

        re[even] = re_ek + re_tok;
        im[even] = im_ek + im_tok;
        re[odd] = re_ek - re_tok;
        im[odd] = im_ek - im_tok;
    }

    fn normalize(&self, re: &mut [f64], im: &mut [f64]) {
        let length = self.length() as f64;
        for x in re.iter_mut() {
            *x /= length;
        }
        for x in im.iter_mut() {
            *x /= length;
        }
    }
}

/// Plain in-place FFT evaluating every butterfly.
#[derive(Debug, Clone)]
pub struct SimpleComplexFft {
    tables: FftTables,
}

impl SimpleComplexFft {
    /// Create a transform of length `2^length_log2`.
    pub fn new(length_log2: u32) -> Self {
        Self {
            tables: FftTables::new(length_log2),
        }
    }
}

impl ComplexFft for SimpleComplexFft {
    fn transform(&self, re: &mut [f64], im: &mut [f64]) -> Result<()> {
        self.tables.check_lengths(re, im)?;
        self.tables.bit_reverse_sort(re, im);

        let length = self.tables.length();
        for level in 1..=self.tables.length_log2 {
            let cur_length = 1usize << level;
            let prev_length = cur_length >> 1;
            let window_count = length >> level;
            for k in 0..prev_length {
                for window in 0..window_count {
                    self.tables.butterfly(re, im, level, k, window);
                }
            }
        }

        self.tables.normalize(re, im);
        Ok(())
    }
}

/// FFT variant for inputs whose tail is known to be zero.
///
/// If only the first `2^nonzero_log2` elements may be non-zero, windows at
/// the lower recombination levels that would merge two all-zero windows are
/// skipped outright; the zeros are already in place after the bit-reversal
/// sort. Output is identical to [`SimpleComplexFft`] for any input that
/// honors the zero-tail promise.
#[derive(Debug, Clone)]
pub struct ZeroTailComplexFft {
    tables: FftTables,
    nonzero_log2: u32,
}

impl ZeroTailComplexFft {
    /// Create a transform of length `2^length_log2` for inputs with at most
    /// `2^nonzero_log2` leading non-zero elements.
    ///
    /// # Panics
    ///
    /// Panics if `nonzero_log2 > length_log2`.
    pub fn new(length_log2: u32, nonzero_log2: u32) -> Self {
        assert!(
            nonzero_log2 <= length_log2,
            "non-zero head length 2^{nonzero_log2} exceeds transform length 2^{length_log2}"
        );
        Self {
            tables: FftTables::new(length_log2),
            nonzero_log2,
        }
    }
}

impl ComplexFft for ZeroTailComplexFft {
    fn transform(&self, re: &mut [f64], im: &mut [f64]) -> Result<()> {
        self.tables.check_lengths(re, im)?;
        self.tables.bit_reverse_sort(re, im);

        let length = self.tables.length();
        let length_log2 = self.tables.length_log2;
        for level in 1..=length_log2 {
            let cur_length = 1usize << level;
            let prev_length = cur_length >> 1;
            let window_count = length >> level;

            // Windows whose index has any of these bits set are recombined
            // from two zero windows; at high levels every window is dirty.
            let dirty_window_mask = if level < length_log2 - self.nonzero_log2 {
                (1usize << (length_log2 - self.nonzero_log2 - level)) - 1
            } else {
                0
            };

            for k in 0..prev_length {
                for window in 0..window_count {
                    if window & dirty_window_mask == 0 {
                        self.tables.butterfly(re, im, level, k, window);
                    }
                }
            }
        }

        self.tables.normalize(re, im);
        Ok(())
    }
}
