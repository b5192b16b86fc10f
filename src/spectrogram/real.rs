//! FFT of a real-valued signal, packed into a single array.
//!
//! The input is transformed as a complex sequence with zero imaginary part;
//! the spectrum is then folded back into the input array. After the call,
//! `re[i]` holds the doubled cosine coefficient of bin `i` and
//! `re[N/2 + i]` the doubled, negated sine coefficient, so a consumer reads
//! bin `i`'s real part at `re[i]` and its imaginary part at `re[N/2 + i]`.

use super::fft::{ComplexFft, Result, SimpleComplexFft};

/// Real-signal FFT built on top of the complex transform.
#[derive(Debug, Clone)]
pub struct RealFft {
    half_length: usize,
    fft: SimpleComplexFft,
}

impl RealFft {
    /// Create a transform for real signals of length `2^length_log2`.
    ///
    /// # Panics
    ///
    /// Panics if `length_log2` is zero; the packing needs at least one
    /// sample pair.
    pub fn new(length_log2: u32) -> Self {
        Self {
            half_length: 1 << (length_log2 - 1),
            fft: SimpleComplexFft::new(length_log2),
        }
    }

    /// Transform `re` in place, leaving the packed spectrum described in
    /// the module docs.
    pub fn transform(&self, re: &mut [f64]) -> Result<()> {
        let mut im = vec![0.0; re.len()];
        self.fft.transform(re, &mut im)?;

        // fold the sine coefficients into the source array
        re[0] += re[self.half_length];
        re[self.half_length] = 0.0;
        for i in 1..self.half_length {
            re[i] *= 2.0;
            re[self.half_length + i] = -2.0 * im[i];
        }
        Ok(())
    }
}
