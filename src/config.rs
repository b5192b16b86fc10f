//! Engine settings.
//!
//! Every tunable of the fingerprinting pipeline is an integer stored
//! under a well-known key. Settings travel as plain key/value strings
//! (that is how [the database](crate::store) keeps them) and are parsed
//! into a typed [`WaveprintConfig`] before anything runs.

use std::collections::BTreeMap;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Result alias for settings handling.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Well-known settings keys.
pub mod keys {
    /// Sampling rate of the audio the engine works on, in Hz.
    pub const SAMPLE_RATE: &str = "sample-rate";
    /// Stride in samples between fingerprint windows when indexing.
    pub const DB_FINGERPRINT_STEP: &str = "fingerprint.step.db";
    /// Stride in samples between fingerprint windows when probing.
    pub const PROBE_FINGERPRINT_STEP: &str = "fingerprint.step.probe";
    /// Number of FFT frames in one spectrogram.
    pub const SPECTROGRAM_LENGTH: &str = "spectrogram.length";
    /// Number of frequency bins per spectrogram frame.
    pub const SPECTROGRAM_WIDTH: &str = "spectrogram.width";
    /// Base-2 logarithm of the FFT frame length in samples.
    pub const SPECTROGRAM_FRAME_LENGTH_LOG2: &str = "spectrogram.frame.length-l2";
    /// Samples between the starts of consecutive FFT frames.
    pub const SPECTROGRAM_FRAME_STEP: &str = "spectrogram.frame.step";
    /// Lower edge of the analyzed frequency range, in Hz.
    pub const SPECTROGRAM_LOWEST_FREQUENCY: &str = "spectrogram.frequency.lowest";
    /// Upper edge of the analyzed frequency range, in Hz.
    pub const SPECTROGRAM_HIGHEST_FREQUENCY: &str = "spectrogram.frequency.highest";
    /// Number of top wavelet coefficients kept per window.
    pub const TOP_WAVELETS: &str = "wavelets.top";
    /// Number of minhash permutations, which is the signature length.
    pub const MINHASH_LENGTH: &str = "minhash.length";
    /// Number of locality-sensitive hashing bands.
    pub const LSH_BIN_COUNT: &str = "lsh.bin.count";
    /// Band collisions required before a fingerprint becomes a candidate.
    pub const LSH_VOTE_THRESHOLD: &str = "lsh.vote.threshold";
}

/// Errors raised while loading or parsing settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A settings file could not be read from disk.
    #[error("failed to read settings file {path}: {source}")]
    Read {
        /// Location of the settings file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A settings file does not hold a JSON object.
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        /// Location of the settings file.
        path: PathBuf,
        /// Underlying JSON failure.
        #[source]
        source: serde_json::Error,
    },
    /// A JSON setting is neither a number nor a string.
    #[error("setting {key:?} must be a number or a string")]
    UnsupportedValue {
        /// Key of the offending entry.
        key: String,
    },
    /// A required setting is absent.
    #[error("setting {0:?} is missing")]
    MissingKey(String),
    /// A setting is present but is not a valid integer.
    #[error("setting {key:?} has invalid value {value:?}: {source}")]
    InvalidValue {
        /// Key of the offending entry.
        key: String,
        /// The value as found.
        value: String,
        /// Underlying parse failure.
        #[source]
        source: ParseIntError,
    },
}

/// Typed view of the engine settings.
///
/// Keys the engine does not recognize are kept verbatim so they survive
/// a round trip through the database info table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveprintConfig {
    sample_rate: u32,
    db_fingerprint_step: usize,
    probe_fingerprint_step: usize,
    spectrogram_length: usize,
    spectrogram_width: usize,
    frame_length_log2: u32,
    frame_step: usize,
    lowest_frequency: u32,
    highest_frequency: u32,
    top_wavelets: usize,
    minhash_length: usize,
    lsh_bin_count: usize,
    lsh_vote_threshold: u32,
    extra: BTreeMap<String, String>,
}

impl WaveprintConfig {
    /// Parse a typed configuration out of key/value settings.
    pub fn from_settings(settings: &BTreeMap<String, String>) -> Result<Self> {
        let mut remaining = settings.clone();
        Ok(Self {
            sample_rate: parse_taken(&mut remaining, keys::SAMPLE_RATE)?,
            db_fingerprint_step: parse_taken(&mut remaining, keys::DB_FINGERPRINT_STEP)?,
            probe_fingerprint_step: parse_taken(&mut remaining, keys::PROBE_FINGERPRINT_STEP)?,
            spectrogram_length: parse_taken(&mut remaining, keys::SPECTROGRAM_LENGTH)?,
            spectrogram_width: parse_taken(&mut remaining, keys::SPECTROGRAM_WIDTH)?,
            frame_length_log2: parse_taken(&mut remaining, keys::SPECTROGRAM_FRAME_LENGTH_LOG2)?,
            frame_step: parse_taken(&mut remaining, keys::SPECTROGRAM_FRAME_STEP)?,
            lowest_frequency: parse_taken(&mut remaining, keys::SPECTROGRAM_LOWEST_FREQUENCY)?,
            highest_frequency: parse_taken(&mut remaining, keys::SPECTROGRAM_HIGHEST_FREQUENCY)?,
            top_wavelets: parse_taken(&mut remaining, keys::TOP_WAVELETS)?,
            minhash_length: parse_taken(&mut remaining, keys::MINHASH_LENGTH)?,
            lsh_bin_count: parse_taken(&mut remaining, keys::LSH_BIN_COUNT)?,
            lsh_vote_threshold: parse_taken(&mut remaining, keys::LSH_VOTE_THRESHOLD)?,
            extra: remaining,
        })
    }

    /// Load settings from a JSON object file.
    ///
    /// Values may be JSON numbers or strings; both are flattened to the
    /// string form the database stores.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut settings = BTreeMap::new();
        for (key, value) in raw {
            let value = match value {
                serde_json::Value::String(text) => text,
                serde_json::Value::Number(number) => number.to_string(),
                _ => return Err(ConfigError::UnsupportedValue { key }),
            };
            settings.insert(key, value);
        }
        Self::from_settings(&settings)
    }

    /// Flatten the configuration back into key/value form, including
    /// any unrecognized keys.
    pub fn settings(&self) -> BTreeMap<String, String> {
        let mut settings = self.extra.clone();
        let entries = [
            (keys::SAMPLE_RATE, self.sample_rate.to_string()),
            (keys::DB_FINGERPRINT_STEP, self.db_fingerprint_step.to_string()),
            (
                keys::PROBE_FINGERPRINT_STEP,
                self.probe_fingerprint_step.to_string(),
            ),
            (keys::SPECTROGRAM_LENGTH, self.spectrogram_length.to_string()),
            (keys::SPECTROGRAM_WIDTH, self.spectrogram_width.to_string()),
            (
                keys::SPECTROGRAM_FRAME_LENGTH_LOG2,
                self.frame_length_log2.to_string(),
            ),
            (keys::SPECTROGRAM_FRAME_STEP, self.frame_step.to_string()),
            (
                keys::SPECTROGRAM_LOWEST_FREQUENCY,
                self.lowest_frequency.to_string(),
            ),
            (
                keys::SPECTROGRAM_HIGHEST_FREQUENCY,
                self.highest_frequency.to_string(),
            ),
            (keys::TOP_WAVELETS, self.top_wavelets.to_string()),
            (keys::MINHASH_LENGTH, self.minhash_length.to_string()),
            (keys::LSH_BIN_COUNT, self.lsh_bin_count.to_string()),
            (keys::LSH_VOTE_THRESHOLD, self.lsh_vote_threshold.to_string()),
        ];
        for (key, value) in entries {
            settings.insert(key.to_string(), value);
        }
        settings
    }

    /// Sampling rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Window stride used when indexing tracks.
    pub fn db_fingerprint_step(&self) -> usize {
        self.db_fingerprint_step
    }

    /// Window stride used when probing.
    pub fn probe_fingerprint_step(&self) -> usize {
        self.probe_fingerprint_step
    }

    /// FFT frames per spectrogram.
    pub fn spectrogram_length(&self) -> usize {
        self.spectrogram_length
    }

    /// Frequency bins per spectrogram frame.
    pub fn spectrogram_width(&self) -> usize {
        self.spectrogram_width
    }

    /// Base-2 logarithm of the FFT frame length.
    pub fn frame_length_log2(&self) -> u32 {
        self.frame_length_log2
    }

    /// Samples between consecutive FFT frames.
    pub fn frame_step(&self) -> usize {
        self.frame_step
    }

    /// Lower analyzed frequency, in Hz.
    pub fn lowest_frequency(&self) -> u32 {
        self.lowest_frequency
    }

    /// Upper analyzed frequency, in Hz.
    pub fn highest_frequency(&self) -> u32 {
        self.highest_frequency
    }

    /// Wavelet coefficients kept per window.
    pub fn top_wavelets(&self) -> usize {
        self.top_wavelets
    }

    /// Minhash signature length.
    pub fn minhash_length(&self) -> usize {
        self.minhash_length
    }

    /// Locality-sensitive hashing band count.
    pub fn lsh_bin_count(&self) -> usize {
        self.lsh_bin_count
    }

    /// Votes required before a stored fingerprint is scored.
    pub fn lsh_vote_threshold(&self) -> u32 {
        self.lsh_vote_threshold
    }
}

fn parse_taken<T>(settings: &mut BTreeMap<String, String>, key: &str) -> Result<T>
where
    T: FromStr<Err = ParseIntError>,
{
    let value = settings
        .remove(key)
        .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
    value.parse().map_err(|source| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn full_settings() -> BTreeMap<String, String> {
        let entries = [
            (keys::SAMPLE_RATE, "5512"),
            (keys::DB_FINGERPRINT_STEP, "1024"),
            (keys::PROBE_FINGERPRINT_STEP, "512"),
            (keys::SPECTROGRAM_LENGTH, "128"),
            (keys::SPECTROGRAM_WIDTH, "32"),
            (keys::SPECTROGRAM_FRAME_LENGTH_LOG2, "11"),
            (keys::SPECTROGRAM_FRAME_STEP, "64"),
            (keys::SPECTROGRAM_LOWEST_FREQUENCY, "318"),
            (keys::SPECTROGRAM_HIGHEST_FREQUENCY, "2004"),
            (keys::TOP_WAVELETS, "200"),
            (keys::MINHASH_LENGTH, "100"),
            (keys::LSH_BIN_COUNT, "25"),
            (keys::LSH_VOTE_THRESHOLD, "2"),
        ];
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn parses_every_known_key() {
        let config = WaveprintConfig::from_settings(&full_settings())
            .expect("full settings should parse");

        assert_eq!(config.sample_rate(), 5512);
        assert_eq!(config.db_fingerprint_step(), 1024);
        assert_eq!(config.probe_fingerprint_step(), 512);
        assert_eq!(config.spectrogram_length(), 128);
        assert_eq!(config.spectrogram_width(), 32);
        assert_eq!(config.frame_length_log2(), 11);
        assert_eq!(config.frame_step(), 64);
        assert_eq!(config.lowest_frequency(), 318);
        assert_eq!(config.highest_frequency(), 2004);
        assert_eq!(config.top_wavelets(), 200);
        assert_eq!(config.minhash_length(), 100);
        assert_eq!(config.lsh_bin_count(), 25);
        assert_eq!(config.lsh_vote_threshold(), 2);
    }

    #[test]
    fn settings_round_trip_including_unknown_keys() {
        let mut settings = full_settings();
        settings.insert("comment".to_string(), "ripped 2013-06-01".to_string());

        let config = WaveprintConfig::from_settings(&settings)
            .expect("extra keys must not break parsing");

        assert_eq!(config.settings(), settings);
    }

    #[test]
    fn missing_key_is_named() {
        let mut settings = full_settings();
        settings.remove(keys::MINHASH_LENGTH);

        match WaveprintConfig::from_settings(&settings) {
            Err(ConfigError::MissingKey(key)) => assert_eq!(key, keys::MINHASH_LENGTH),
            other => panic!("expected a missing-key error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_value_is_named() {
        let mut settings = full_settings();
        settings.insert(keys::SAMPLE_RATE.to_string(), "very fast".to_string());

        match WaveprintConfig::from_settings(&settings) {
            Err(ConfigError::InvalidValue { key, value, .. }) => {
                assert_eq!(key, keys::SAMPLE_RATE);
                assert_eq!(value, "very fast");
            }
            other => panic!("expected an invalid-value error, got {other:?}"),
        }
    }

    #[test]
    fn json_files_accept_numbers_and_strings() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "sample-rate": 5512,
                "fingerprint.step.db": "1024",
                "fingerprint.step.probe": 512,
                "spectrogram.length": 128,
                "spectrogram.width": 32,
                "spectrogram.frame.length-l2": 11,
                "spectrogram.frame.step": 64,
                "spectrogram.frequency.lowest": 318,
                "spectrogram.frequency.highest": 2004,
                "wavelets.top": 200,
                "minhash.length": 100,
                "lsh.bin.count": 25,
                "lsh.vote.threshold": 2
            }}"#
        )
        .expect("write settings json");

        let config = WaveprintConfig::from_json_file(file.path())
            .expect("mixed numbers and strings should parse");
        assert_eq!(config.sample_rate(), 5512);
        assert_eq!(config.db_fingerprint_step(), 1024);
    }

    #[test]
    fn json_values_of_other_types_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "sample-rate": true }}"#).expect("write settings json");

        match WaveprintConfig::from_json_file(file.path()) {
            Err(ConfigError::UnsupportedValue { key }) => assert_eq!(key, "sample-rate"),
            other => panic!("expected an unsupported-value error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "sample-rate=5512").expect("write settings text");

        assert!(matches!(
            WaveprintConfig::from_json_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
