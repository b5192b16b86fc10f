//! Fingerprinting pipeline.
//!
//! Ties the stages together: spectrogram, standard wavelet
//! decomposition, top-coefficient selection and minhashing, then track
//! lookup through the banded index. Two strides drive the pipeline,
//! a wide one for indexing whole tracks and a narrow one for probing,
//! so probe windows land close to some indexed window of the same
//! audio.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::config::WaveprintConfig;
use crate::lsh;
use crate::minhash::{Fingerprint, MinHashError, MinHasher, Permutation};
use crate::spectrogram::fft::FftError;
use crate::spectrogram::SpectrogramBuilder;
use crate::store::{StoreError, TrackDatabase};
use crate::wavelet::{self, TopWaveletSelector};

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, WaveprintError>;

/// Errors raised while assembling or running the pipeline.
#[derive(Debug, Error)]
pub enum WaveprintError {
    /// A dimension that must be a power of two is not.
    #[error("{name} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// Which dimension is at fault.
        name: &'static str,
        /// The configured value.
        value: usize,
    },
    /// The analysis frame must hold at least two samples.
    #[error("frame length exponent must be positive")]
    FrameTooShort,
    /// A window stride of zero would never advance.
    #[error("{name} must be positive")]
    ZeroStep {
        /// Which stride is at fault.
        name: &'static str,
    },
    /// The analyzed frequency range is empty or starts at zero.
    #[error("frequency range {lowest} to {highest} Hz is unusable")]
    FrequencyRange {
        /// Configured lower edge in Hz.
        lowest: u32,
        /// Configured upper edge in Hz.
        highest: u32,
    },
    /// The number of kept wavelet coefficients does not fit the
    /// spectrogram.
    #[error("cannot keep {requested} of {available} wavelet coefficients")]
    TopWaveletCount {
        /// Configured number of coefficients to keep.
        requested: usize,
        /// Cells in one spectrogram.
        available: usize,
    },
    /// The number of permutations does not match the signature length.
    #[error("{actual} permutations supplied where {expected} were expected")]
    PermutationCount {
        /// Signature length the settings call for.
        expected: usize,
        /// Permutations actually supplied.
        actual: usize,
    },
    /// A permutation does not rank every spectrogram cell.
    #[error("permutation {index} covers {actual} positions instead of {expected}")]
    PermutationLength {
        /// Position of the offending permutation.
        index: usize,
        /// Cells in one spectrogram.
        expected: usize,
        /// Positions the permutation actually covers.
        actual: usize,
    },
    /// The hashing bands do not fit into the signature.
    #[error("{bins} bands of {band_bytes} bytes do not fit a {signature}-byte signature")]
    BandLayout {
        /// Configured band count.
        bins: usize,
        /// Bytes consumed per band.
        band_bytes: usize,
        /// Configured signature length.
        signature: usize,
    },
    /// Spectrogram computation failed.
    #[error("spectrogram failed: {0}")]
    Fft(#[from] FftError),
    /// Minhashing failed.
    #[error("minhash failed: {0}")]
    MinHash(#[from] MinHashError),
    /// Database access failed.
    #[error("database failed: {0}")]
    Store(#[from] StoreError),
}

/// One candidate track and its accumulated similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    /// Track id in the database.
    pub track_id: i64,
    /// Sum of signature agreements across all probe windows.
    pub similarity: u64,
}

/// Ranked outcome of probing the database with one sample buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    /// Number of probe fingerprints computed from the buffer.
    pub probe_count: usize,
    /// Total similarity a perfect match would reach, with every probe
    /// agreeing with a stored fingerprint on every position.
    pub max_similarity: u64,
    /// Candidate tracks, best first.
    pub matches: Vec<MatchResult>,
}

/// The assembled fingerprinting pipeline.
pub struct Waveprint {
    spectrogram: SpectrogramBuilder,
    selector: TopWaveletSelector,
    hasher: MinHasher,
    rows_log2: u32,
    cols_log2: u32,
    db_step: usize,
    probe_step: usize,
}

impl Waveprint {
    /// Assemble the pipeline from parsed settings and the permutations
    /// the database was set up with.
    ///
    /// The settings are checked for mutual fit here, once, so the
    /// stages themselves can assume well-formed inputs.
    pub fn new(config: &WaveprintConfig, permutations: Vec<Permutation>) -> Result<Self> {
        let length = config.spectrogram_length();
        let width = config.spectrogram_width();
        if !length.is_power_of_two() {
            return Err(WaveprintError::NotPowerOfTwo {
                name: "spectrogram length",
                value: length,
            });
        }
        if !width.is_power_of_two() {
            return Err(WaveprintError::NotPowerOfTwo {
                name: "spectrogram width",
                value: width,
            });
        }
        if config.frame_length_log2() == 0 {
            return Err(WaveprintError::FrameTooShort);
        }
        if config.db_fingerprint_step() == 0 {
            return Err(WaveprintError::ZeroStep {
                name: "db fingerprint step",
            });
        }
        if config.probe_fingerprint_step() == 0 {
            return Err(WaveprintError::ZeroStep {
                name: "probe fingerprint step",
            });
        }
        if config.lowest_frequency() == 0 || config.highest_frequency() < config.lowest_frequency()
        {
            return Err(WaveprintError::FrequencyRange {
                lowest: config.lowest_frequency(),
                highest: config.highest_frequency(),
            });
        }
        let cells = length * width;
        if config.top_wavelets() == 0 || config.top_wavelets() > cells {
            return Err(WaveprintError::TopWaveletCount {
                requested: config.top_wavelets(),
                available: cells,
            });
        }
        if permutations.len() != config.minhash_length() {
            return Err(WaveprintError::PermutationCount {
                expected: config.minhash_length(),
                actual: permutations.len(),
            });
        }
        for (index, permutation) in permutations.iter().enumerate() {
            if permutation.len() != cells {
                return Err(WaveprintError::PermutationLength {
                    index,
                    expected: cells,
                    actual: permutation.len(),
                });
            }
        }
        if config.lsh_bin_count() * lsh::BAND_BYTES > config.minhash_length() {
            return Err(WaveprintError::BandLayout {
                bins: config.lsh_bin_count(),
                band_bytes: lsh::BAND_BYTES,
                signature: config.minhash_length(),
            });
        }

        Ok(Self {
            spectrogram: SpectrogramBuilder::new(
                length,
                config.frame_length_log2(),
                config.frame_step(),
                config.sample_rate(),
                width,
                config.lowest_frequency(),
                config.highest_frequency(),
            ),
            selector: TopWaveletSelector::new(config.top_wavelets()),
            hasher: MinHasher::new(permutations),
            rows_log2: length.trailing_zeros(),
            cols_log2: width.trailing_zeros(),
            db_step: config.db_fingerprint_step(),
            probe_step: config.probe_fingerprint_step(),
        })
    }

    /// Number of samples one fingerprint window consumes.
    pub fn length_in_samples(&self) -> usize {
        self.spectrogram.length_in_samples()
    }

    /// Fingerprints spaced for indexing a whole track.
    pub fn db_fingerprints(&self, samples: &[i16]) -> Result<Vec<Fingerprint>> {
        self.fingerprint(samples, self.db_step)
    }

    /// Fingerprints spaced for probing.
    pub fn probe_fingerprints(&self, samples: &[i16]) -> Result<Vec<Fingerprint>> {
        self.fingerprint(samples, self.probe_step)
    }

    /// Fingerprint every window of `samples`, one window per `step`
    /// samples. Buffers shorter than one window yield no fingerprints.
    pub fn fingerprint(&self, samples: &[i16], step: usize) -> Result<Vec<Fingerprint>> {
        let mut fingerprints = Vec::new();
        let Some(max_start) = samples.len().checked_sub(self.length_in_samples()) else {
            return Ok(fingerprints);
        };
        let mut start = 0;
        while start <= max_start {
            let mut image = self.spectrogram.spectrogram(samples, start)?;
            wavelet::decompose(&mut image, self.rows_log2, self.cols_log2);
            let top = self.selector.select(&image);
            fingerprints.push(self.hasher.hash(&top)?);
            start += step;
        }
        Ok(fingerprints)
    }

    /// Probe the database with a sample buffer and rank the candidate
    /// tracks.
    ///
    /// Every candidate fingerprint of a track adds its similarity to
    /// the track's total. Tracks are ranked by descending total, ties
    /// broken by ascending track id, and only the best `count` are
    /// kept.
    pub fn find_best_matches(
        &self,
        samples: &[i16],
        db: &TrackDatabase,
        count: usize,
    ) -> Result<MatchReport> {
        let probes = self.probe_fingerprints(samples)?;
        let candidates = db.lsh_matches(&probes)?;

        let mut by_track: BTreeMap<i64, u64> = BTreeMap::new();
        for probe_candidates in &candidates {
            for candidate in probe_candidates {
                *by_track.entry(candidate.track_id).or_insert(0) +=
                    u64::from(candidate.similarity);
            }
        }

        let mut matches: Vec<MatchResult> = by_track
            .into_iter()
            .map(|(track_id, similarity)| MatchResult {
                track_id,
                similarity,
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .cmp(&a.similarity)
                .then(a.track_id.cmp(&b.track_id))
        });
        matches.truncate(count);

        Ok(MatchReport {
            probe_count: probes.len(),
            max_similarity: (probes.len() * self.hasher.signature_length()) as u64,
            matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;
    use crate::minhash::generate_permutations;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn config_with(overrides: &[(&str, &str)]) -> WaveprintConfig {
        let mut settings: BTreeMap<String, String> = [
            (keys::SAMPLE_RATE, "8"),
            (keys::DB_FINGERPRINT_STEP, "4"),
            (keys::PROBE_FINGERPRINT_STEP, "2"),
            (keys::SPECTROGRAM_LENGTH, "4"),
            (keys::SPECTROGRAM_WIDTH, "2"),
            (keys::SPECTROGRAM_FRAME_LENGTH_LOG2, "3"),
            (keys::SPECTROGRAM_FRAME_STEP, "2"),
            (keys::SPECTROGRAM_LOWEST_FREQUENCY, "1"),
            (keys::SPECTROGRAM_HIGHEST_FREQUENCY, "4"),
            (keys::TOP_WAVELETS, "5"),
            (keys::MINHASH_LENGTH, "8"),
            (keys::LSH_BIN_COUNT, "2"),
            (keys::LSH_VOTE_THRESHOLD, "2"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
        for (key, value) in overrides {
            settings.insert((*key).to_string(), (*value).to_string());
        }
        WaveprintConfig::from_settings(&settings).expect("test settings parse")
    }

    fn fitted_permutations(config: &WaveprintConfig, seed: u64) -> Vec<Permutation> {
        let mut rng = SmallRng::seed_from_u64(seed);
        generate_permutations(
            config.minhash_length(),
            config.spectrogram_length() * config.spectrogram_width(),
            &mut rng,
        )
    }

    fn random_samples(len: usize, seed: u64) -> Vec<i16> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..len).map(|_| rng.random_range(-2000..2000)).collect()
    }

    #[test]
    fn well_formed_settings_assemble() {
        let config = config_with(&[]);
        let permutations = fitted_permutations(&config, 1);
        let engine = Waveprint::new(&config, permutations).expect("pipeline assembles");
        assert_eq!(engine.length_in_samples(), 14);
    }

    #[test]
    fn spectrogram_dimensions_must_be_powers_of_two() {
        let config = config_with(&[(keys::SPECTROGRAM_LENGTH, "3")]);
        let permutations = fitted_permutations(&config, 1);
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::NotPowerOfTwo {
                name: "spectrogram length",
                value: 3,
            })
        ));
    }

    #[test]
    fn one_sample_frames_are_rejected() {
        let config = config_with(&[(keys::SPECTROGRAM_FRAME_LENGTH_LOG2, "0")]);
        let permutations = fitted_permutations(&config, 1);
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::FrameTooShort)
        ));
    }

    #[test]
    fn zero_strides_are_rejected() {
        let config = config_with(&[(keys::DB_FINGERPRINT_STEP, "0")]);
        let permutations = fitted_permutations(&config, 1);
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::ZeroStep { .. })
        ));
    }

    #[test]
    fn empty_frequency_ranges_are_rejected() {
        let config = config_with(&[
            (keys::SPECTROGRAM_LOWEST_FREQUENCY, "4"),
            (keys::SPECTROGRAM_HIGHEST_FREQUENCY, "2"),
        ]);
        let permutations = fitted_permutations(&config, 1);
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::FrequencyRange {
                lowest: 4,
                highest: 2,
            })
        ));
    }

    #[test]
    fn top_wavelet_count_must_fit_the_spectrogram() {
        let config = config_with(&[(keys::TOP_WAVELETS, "9")]);
        let permutations = fitted_permutations(&config, 1);
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::TopWaveletCount {
                requested: 9,
                available: 8,
            })
        ));
    }

    #[test]
    fn permutation_count_must_match_the_signature_length() {
        let config = config_with(&[]);
        let mut permutations = fitted_permutations(&config, 1);
        permutations.pop();
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::PermutationCount {
                expected: 8,
                actual: 7,
            })
        ));
    }

    #[test]
    fn permutations_must_cover_every_cell() {
        let config = config_with(&[]);
        let mut permutations = fitted_permutations(&config, 1);
        let mut rng = SmallRng::seed_from_u64(2);
        permutations[3] = Permutation::random(4, &mut rng);
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::PermutationLength {
                index: 3,
                expected: 8,
                actual: 4,
            })
        ));
    }

    #[test]
    fn bands_must_fit_the_signature() {
        let config = config_with(&[(keys::LSH_BIN_COUNT, "3")]);
        let permutations = fitted_permutations(&config, 1);
        assert!(matches!(
            Waveprint::new(&config, permutations),
            Err(WaveprintError::BandLayout {
                bins: 3,
                band_bytes: 4,
                signature: 8,
            })
        ));
    }

    #[test]
    fn short_buffers_yield_no_fingerprints() {
        let config = config_with(&[]);
        let engine =
            Waveprint::new(&config, fitted_permutations(&config, 1)).expect("pipeline assembles");

        let samples = random_samples(engine.length_in_samples() - 1, 3);
        let fingerprints = engine.db_fingerprints(&samples).expect("fingerprint");
        assert!(fingerprints.is_empty());
    }

    #[test]
    fn window_count_follows_the_stride() {
        let config = config_with(&[]);
        let engine =
            Waveprint::new(&config, fitted_permutations(&config, 1)).expect("pipeline assembles");

        // 22 samples hold windows at 0..=8: five probe strides of 2,
        // three db strides of 4.
        let samples = random_samples(22, 4);
        assert_eq!(engine.probe_fingerprints(&samples).expect("probe").len(), 5);
        assert_eq!(engine.db_fingerprints(&samples).expect("db").len(), 3);
    }

    #[test]
    fn fingerprints_are_deterministic() {
        let config = config_with(&[]);
        let engine =
            Waveprint::new(&config, fitted_permutations(&config, 1)).expect("pipeline assembles");

        let samples = random_samples(30, 5);
        let first = engine.db_fingerprints(&samples).expect("first run");
        let second = engine.db_fingerprints(&samples).expect("second run");
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 8, "signatures carry one value per permutation");
    }

    #[test]
    fn silence_fingerprints_without_errors() {
        let config = config_with(&[]);
        let engine =
            Waveprint::new(&config, fitted_permutations(&config, 1)).expect("pipeline assembles");

        let samples = vec![0i16; 20];
        let fingerprints = engine.db_fingerprints(&samples).expect("silence hashes");
        assert_eq!(fingerprints.len(), 2);
    }
}
