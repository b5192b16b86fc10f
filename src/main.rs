//! Command-line front end for building and querying fingerprint
//! databases.
//!
//! The lifecycle is: `setup` a database from a settings file, generate
//! `permutations` into it, `add` tracks, then `find` recordings.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;
use walkdir::WalkDir;

use waveprint::store::setup;
use waveprint::{
    generate_permutations, Permutation, SampleExtractor, TrackDatabase, Waveprint,
    WaveprintConfig,
};

#[derive(Parser)]
#[command(name = "waveprint")]
#[command(about = "Acoustic fingerprinting and track identification", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fingerprint database from a JSON settings file.
    Setup {
        /// Database file to create.
        #[arg(short, long)]
        database: PathBuf,
        /// JSON file with the engine settings.
        #[arg(short, long)]
        settings: PathBuf,
    },
    /// Generate minhash permutations.
    ///
    /// With --database, count and length come from the stored settings
    /// and the generated set replaces the stored one. With --file, the
    /// permutations are written as text, one per line.
    Permutations {
        /// Database to generate into.
        #[arg(short, long, required_unless_present = "file", conflicts_with = "file")]
        database: Option<PathBuf>,
        /// Text file to write instead of a database.
        #[arg(short, long, requires = "count", requires = "length")]
        file: Option<PathBuf>,
        /// Number of permutations to generate.
        #[arg(long, conflicts_with = "database")]
        count: Option<usize>,
        /// Positions each permutation covers.
        #[arg(long, conflicts_with = "database")]
        length: Option<usize>,
    },
    /// Fingerprint audio files or directory trees and add them as
    /// tracks.
    Add {
        /// Database to add tracks to.
        #[arg(short, long)]
        database: PathBuf,
        /// Audio files or directories to walk.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Identify audio files against the database.
    Find {
        /// Database to search in.
        #[arg(short, long)]
        database: PathBuf,
        /// Number of candidate tracks to report per file.
        #[arg(short, long, default_value_t = 5)]
        count: usize,
        /// Seconds of audio to use from each file.
        #[arg(short, long, default_value_t = 60)]
        seconds: u32,
        /// Print results as JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Audio files or directories to identify.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Setup { database, settings } => run_setup(&database, &settings),
        Command::Permutations {
            database,
            file,
            count,
            length,
        } => run_permutations(database, file, count, length),
        Command::Add { database, paths } => run_add(&database, &paths),
        Command::Find {
            database,
            count,
            seconds,
            json,
            paths,
        } => run_find(&database, count, seconds, json, &paths),
    }
}

fn run_setup(database: &Path, settings: &Path) -> anyhow::Result<()> {
    let config = WaveprintConfig::from_json_file(settings)?;
    setup::initialize(database, &config)
        .with_context(|| format!("failed to set up database {}", database.display()))?;
    println!(
        "Created {} with {} settings",
        database.display(),
        config.settings().len()
    );
    Ok(())
}

fn run_permutations(
    database: Option<PathBuf>,
    file: Option<PathBuf>,
    count: Option<usize>,
    length: Option<usize>,
) -> anyhow::Result<()> {
    let mut rng = SmallRng::from_os_rng();
    if let Some(database) = database {
        let db = TrackDatabase::open(&database)?;
        let config = WaveprintConfig::from_settings(&db.read_settings()?)?;
        db.close()?;

        let count = config.minhash_length();
        let length = config.spectrogram_length() * config.spectrogram_width();
        let permutations = generate_permutations(count, length, &mut rng);
        setup::store_permutations(&database, &permutations)?;
        println!(
            "Stored {count} permutations of {length} positions in {}",
            database.display()
        );
    } else if let Some(file) = file {
        let (count, length) = match (count, length) {
            (Some(count), Some(length)) => (count, length),
            _ => anyhow::bail!("--file needs both --count and --length"),
        };
        let permutations = generate_permutations(count, length, &mut rng);
        let lines: Vec<String> = permutations.iter().map(Permutation::to_text).collect();
        std::fs::write(&file, lines.join("\n") + "\n")
            .with_context(|| format!("failed to write permutations to {}", file.display()))?;
        println!(
            "Wrote {count} permutations of {length} positions to {}",
            file.display()
        );
    }
    Ok(())
}

fn run_add(database: &Path, paths: &[PathBuf]) -> anyhow::Result<()> {
    let db = TrackDatabase::open(database)?;
    let config = WaveprintConfig::from_settings(&db.read_settings()?)?;
    let engine = Waveprint::new(&config, db.read_permutations()?)?;
    let extractor = SampleExtractor::new(config.sample_rate());

    let mut added = 0usize;
    for file in audio_files(paths) {
        let started = Instant::now();
        let samples = match extractor.extract(&file, None) {
            Ok(samples) => samples,
            Err(error) => {
                eprintln!("Skipping {}: {error}", file.display());
                continue;
            }
        };
        let fingerprints = engine.db_fingerprints(&samples)?;
        if fingerprints.is_empty() {
            eprintln!(
                "Skipping {}: shorter than one fingerprint window",
                file.display()
            );
            continue;
        }
        let name = file.display().to_string();
        let track_id = db.add_track(&name, &fingerprints)?;
        added += 1;
        println!(
            "{added:4} added {name} as track {track_id} ({} fingerprints, {} ms)",
            fingerprints.len(),
            started.elapsed().as_millis()
        );
    }
    println!("Added {added} track(s)");
    db.close()?;
    Ok(())
}

fn run_find(
    database: &Path,
    count: usize,
    seconds: u32,
    json: bool,
    paths: &[PathBuf],
) -> anyhow::Result<()> {
    let db = TrackDatabase::open(database)?;
    let config = WaveprintConfig::from_settings(&db.read_settings()?)?;
    let engine = Waveprint::new(&config, db.read_permutations()?)?;
    let extractor = SampleExtractor::new(config.sample_rate());

    let mut reports = Vec::new();
    for file in audio_files(paths) {
        if !json {
            println!("Searching for {}", file.display());
        }
        let started = Instant::now();
        let samples = match extractor.extract(&file, Some(seconds)) {
            Ok(samples) => samples,
            Err(error) => {
                eprintln!("Skipping {}: {error}", file.display());
                continue;
            }
        };
        let extracted = started.elapsed();

        let started = Instant::now();
        let report = engine.find_best_matches(&samples, &db, count)?;
        let matched = started.elapsed();

        if !json {
            println!(
                "  {} samples in {} ms, {} probe windows matched in {} ms",
                samples.len(),
                extracted.as_millis(),
                report.probe_count,
                matched.as_millis()
            );
        }

        let mut matches = Vec::with_capacity(report.matches.len());
        for (rank, result) in report.matches.iter().enumerate() {
            let name = db.track_name(result.track_id)?;
            let relevance = relevance(result.similarity, report.max_similarity);
            if !json {
                println!(
                    "  {}. {name} ({} / {}, {relevance:.5})",
                    rank + 1,
                    result.similarity,
                    report.max_similarity
                );
            }
            matches.push(NamedMatch {
                track_id: result.track_id,
                name,
                similarity: result.similarity,
                relevance,
            });
        }
        if !json && matches.is_empty() {
            println!("  no candidates");
        }
        reports.push(FileReport {
            file: file.display().to_string(),
            probe_count: report.probe_count,
            max_similarity: report.max_similarity,
            matches,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    db.close()?;
    Ok(())
}

/// Expand directory arguments into the files under them, in a stable
/// order.
fn audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                WalkDir::new(path)
                    .follow_links(true)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path()),
            );
        } else {
            files.push(path.clone());
        }
    }
    files
}

#[derive(Serialize)]
struct FileReport {
    file: String,
    probe_count: usize,
    max_similarity: u64,
    matches: Vec<NamedMatch>,
}

#[derive(Serialize)]
struct NamedMatch {
    track_id: i64,
    name: String,
    similarity: u64,
    relevance: f64,
}

fn relevance(similarity: u64, max_similarity: u64) -> f64 {
    if max_similarity == 0 {
        0.0
    } else {
        similarity as f64 / max_similarity as f64
    }
}
