//! Acoustic fingerprinting and track identification.
//!
//! Indexes audio tracks by tiny content-derived signatures and finds
//! them again from short, possibly degraded recordings. Audio is
//! decoded by an external `ffmpeg` process into mono PCM; overlapping
//! windows of the sample stream are reduced to log-frequency
//! spectrograms, decomposed with a standard wavelet transform, and the
//! strongest coefficients are minhashed into fixed-length signatures.
//! A banded locality-sensitive index over those signatures turns
//! matching into a handful of SQLite lookups.
//!
//! # Features
//! - Radix-2 FFTs with a zero-tail variant and an incremental
//!   short-time transform for sliding windows
//! - Logarithmically binned spectrograms over a configurable
//!   frequency range
//! - Standard two-dimensional wavelet decomposition and
//!   top-coefficient selection
//! - Minhash signatures over randomly generated permutations
//! - Banded locality-sensitive lookup with vote thresholds and
//!   exact signature rescoring
//! - Single-file SQLite persistence for settings, permutations,
//!   tracks and the band index
//!
//! # Quick start
//! ```no_run
//! use std::path::Path;
//! use waveprint::{SampleExtractor, TrackDatabase, Waveprint, WaveprintConfig};
//!
//! let db = TrackDatabase::open(Path::new("tracks.db")).unwrap();
//! let config = WaveprintConfig::from_settings(&db.read_settings().unwrap()).unwrap();
//! let engine = Waveprint::new(&config, db.read_permutations().unwrap()).unwrap();
//!
//! let extractor = SampleExtractor::new(config.sample_rate());
//! let samples = extractor.extract(Path::new("query.mp3"), Some(60)).unwrap();
//! let report = engine.find_best_matches(&samples, &db, 5).unwrap();
//! for result in &report.matches {
//!     let name = db.track_name(result.track_id).unwrap();
//!     println!("{name}: {} / {}", result.similarity, report.max_similarity);
//! }
//! ```

#![warn(missing_docs)]

pub mod config; // Settings keys and parsing
pub mod engine; // Fingerprinting pipeline
pub mod extract; // Audio ingestion via ffmpeg
pub mod lsh; // Banded signature hashing
pub mod minhash; // Permutations and signatures
pub mod spectrogram; // FFTs and log-frequency spectrograms
pub mod store; // SQLite track index
pub mod wavelet; // Standard wavelet decomposition

// Public API exports
pub use config::{ConfigError, WaveprintConfig};
pub use engine::{MatchReport, MatchResult, Waveprint, WaveprintError};
pub use extract::{ExtractError, SampleExtractor};
pub use minhash::{generate_permutations, Fingerprint, MinHashError, MinHasher, Permutation};
pub use store::{LshMatch, StoreError, TrackDatabase};
