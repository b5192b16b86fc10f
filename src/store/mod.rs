//! Fingerprint database.
//!
//! Tracks, their saturated minhash signatures and one lookup table per
//! locality-sensitive hashing band all live in a single SQLite file,
//! next to an `info` table holding the settings the database was
//! created with. A handle owns one connection behind a mutex; every
//! operation holds the lock for its whole duration, so multi-statement
//! batches never interleave.

pub mod setup;

use std::collections::BTreeMap;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use crate::config::keys;
use crate::lsh;
use crate::minhash::{Fingerprint, Permutation};

/// Result alias for database operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the fingerprint database.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened.
    #[error("failed to open database {path}: {source}")]
    Open {
        /// Location of the database file.
        path: PathBuf,
        /// Underlying SQLite failure.
        #[source]
        source: rusqlite::Error,
    },
    /// An SQL operation failed.
    #[error("database access failed: {0}")]
    Access(#[from] rusqlite::Error),
    /// A setting required by the engine has no row in the info table.
    #[error("no setting stored under key {0:?}")]
    MissingSetting(String),
    /// A stored setting is not a valid integer.
    #[error("stored setting {key:?} has unusable value {value:?}")]
    InvalidSetting {
        /// Key of the offending setting.
        key: String,
        /// The value as stored.
        value: String,
    },
    /// The permutation table does not describe the expected bijections.
    #[error("stored permutations are corrupt: {0}")]
    CorruptPermutations(String),
    /// A track id without a corresponding row.
    #[error("no track with id {0}")]
    UnknownTrack(i64),
}

/// One stored fingerprint that collected enough band votes for a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LshMatch {
    /// Row id of the matching stored fingerprint.
    pub fingerprint_id: i64,
    /// Track the fingerprint belongs to.
    pub track_id: i64,
    /// Signature positions on which the stored fingerprint agrees with
    /// the probe.
    pub similarity: u32,
}

/// Handle to one fingerprint database file.
pub struct TrackDatabase {
    conn: Mutex<Connection>,
    bin_count: usize,
    vote_threshold: u32,
}

impl TrackDatabase {
    /// Open an existing database file.
    ///
    /// The band count and vote threshold are read from the stored
    /// settings once, here; the file must have been prepared by
    /// [`setup::initialize`].
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_readwrite(path)?;
        let bin_count = int_setting(&conn, keys::LSH_BIN_COUNT)?;
        let vote_threshold = int_setting(&conn, keys::LSH_VOTE_THRESHOLD)?;
        Ok(Self {
            conn: Mutex::new(conn),
            bin_count,
            vote_threshold,
        })
    }

    /// Read one setting from the info table.
    pub fn read_setting(&self, key: &str) -> Result<String> {
        setting(&self.conn.lock(), key)
    }

    /// Read every stored setting.
    pub fn read_settings(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("select key, value from info")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let settings = rows.collect::<rusqlite::Result<_>>()?;
        Ok(settings)
    }

    /// Read the stored minhash permutations.
    ///
    /// The expected shape comes from the stored settings: one
    /// permutation per signature position, each over the number of
    /// spectrogram cells. Any deviation in the table is reported as
    /// corruption.
    pub fn read_permutations(&self) -> Result<Vec<Permutation>> {
        let conn = self.conn.lock();
        let count: usize = int_setting(&conn, keys::MINHASH_LENGTH)?;
        let spectrogram_length: usize = int_setting(&conn, keys::SPECTROGRAM_LENGTH)?;
        let width: usize = int_setting(&conn, keys::SPECTROGRAM_WIDTH)?;
        let length = spectrogram_length * width;

        let mut stmt =
            conn.prepare_cached("select num, pos, value from permutation order by num, pos")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?;

        let mut permutations = Vec::with_capacity(count);
        let mut values: Vec<u32> = Vec::with_capacity(length);
        for row in rows {
            let (num, pos, value) = row?;
            let expected_num = permutations.len() as i64;
            let expected_pos = values.len() as i64;
            if num != expected_num || pos != expected_pos {
                return Err(StoreError::CorruptPermutations(format!(
                    "row ({num}, {pos}) where ({expected_num}, {expected_pos}) was expected"
                )));
            }
            values.push(value);
            if values.len() == length {
                let complete = std::mem::replace(&mut values, Vec::with_capacity(length));
                let permutation = Permutation::from_values(complete)
                    .map_err(|e| StoreError::CorruptPermutations(e.to_string()))?;
                permutations.push(permutation);
            }
        }
        if !values.is_empty() || permutations.len() != count {
            return Err(StoreError::CorruptPermutations(format!(
                "found {} complete permutations where {count} were expected",
                permutations.len()
            )));
        }
        Ok(permutations)
    }

    /// Add a track and all of its window fingerprints in one
    /// transaction. Signatures are saturated to bytes before storage.
    /// Returns the new track id.
    ///
    /// # Panics
    ///
    /// Panics if a fingerprint is too short to cover every hashing
    /// band of the database.
    pub fn add_track(&self, name: &str, fingerprints: &[Fingerprint]) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let track_id = {
            tx.prepare_cached("insert into track (name) values (?1)")?
                .execute([name])?;
            let track_id = tx.last_insert_rowid();

            let mut insert_fingerprint = tx.prepare_cached(
                "insert into fingerprint (track_id, seq, value) values (?1, ?2, ?3)",
            )?;
            let mut insert_bins = Vec::with_capacity(self.bin_count);
            for bin in 0..self.bin_count {
                insert_bins.push(tx.prepare_cached(&format!(
                    "insert into lsh_bin_{bin} (fingerprint_id, value) values (?1, ?2)"
                ))?);
            }

            for (seq, fingerprint) in fingerprints.iter().enumerate() {
                let clamped = lsh::clamp_signature(fingerprint);
                insert_fingerprint.execute(params![track_id, seq as i64, clamped])?;
                let fingerprint_id = tx.last_insert_rowid();
                for (bin, insert) in insert_bins.iter_mut().enumerate() {
                    insert.execute(params![fingerprint_id, lsh::band_key(&clamped, bin)])?;
                }
            }
            track_id
        };
        tx.commit()?;
        Ok(track_id)
    }

    /// For each probe signature, find the stored fingerprints sharing
    /// at least the threshold number of band keys with it, scored by
    /// positional agreement over the whole signature.
    ///
    /// Band tables are queried once per band for all probes together,
    /// with the probes grouped by band key.
    ///
    /// # Panics
    ///
    /// Panics if a probe is too short to cover every hashing band of
    /// the database.
    pub fn lsh_matches(&self, probes: &[Fingerprint]) -> Result<Vec<Vec<LshMatch>>> {
        if probes.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let clamped: Vec<Vec<u8>> = probes.iter().map(|p| lsh::clamp_signature(p)).collect();

        // votes[probe]: fingerprint id -> (track id, colliding bands)
        let mut votes: Vec<BTreeMap<i64, (i64, u32)>> = vec![BTreeMap::new(); probes.len()];
        for bin in 0..self.bin_count {
            let mut probes_by_key: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
            for (probe, signature) in clamped.iter().enumerate() {
                probes_by_key
                    .entry(lsh::band_key(signature, bin))
                    .or_default()
                    .push(probe);
            }

            let placeholders = vec!["?"; probes_by_key.len()].join(", ");
            let sql = format!(
                "select lb.value, fp.id, fp.track_id \
                 from lsh_bin_{bin} lb \
                 join fingerprint fp on lb.fingerprint_id = fp.id \
                 where lb.value in ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(probes_by_key.keys().copied()), |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (key, fingerprint_id, track_id) = row?;
                for &probe in &probes_by_key[&key] {
                    votes[probe]
                        .entry(fingerprint_id)
                        .or_insert((track_id, 0))
                        .1 += 1;
                }
            }
        }

        let mut lookup = conn.prepare_cached("select value from fingerprint where id = ?1")?;
        let mut matches = Vec::with_capacity(probes.len());
        for (probe, probe_votes) in votes.into_iter().enumerate() {
            let mut probe_matches = Vec::new();
            for (fingerprint_id, (track_id, vote_count)) in probe_votes {
                if vote_count < self.vote_threshold {
                    continue;
                }
                let stored: Vec<u8> = lookup.query_row([fingerprint_id], |row| row.get(0))?;
                probe_matches.push(LshMatch {
                    fingerprint_id,
                    track_id,
                    similarity: lsh::similarity(&clamped[probe], &stored),
                });
            }
            matches.push(probe_matches);
        }
        Ok(matches)
    }

    /// Name a track was registered under.
    pub fn track_name(&self, track_id: i64) -> Result<String> {
        let conn = self.conn.lock();
        let name = conn
            .prepare_cached("select name from track where id = ?1")?
            .query_row([track_id], |row| row.get(0))
            .optional()?;
        name.ok_or(StoreError::UnknownTrack(track_id))
    }

    /// Close the underlying connection, reporting any failure to flush.
    pub fn close(self) -> Result<()> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, source)| StoreError::Access(source))
    }
}

fn open_readwrite(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE).map_err(|source| {
        StoreError::Open {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn setting(conn: &Connection, key: &str) -> Result<String> {
    conn.prepare_cached("select value from info where key = ?1")?
        .query_row([key], |row| row.get(0))
        .optional()?
        .ok_or_else(|| StoreError::MissingSetting(key.to_string()))
}

fn int_setting<T>(conn: &Connection, key: &str) -> Result<T>
where
    T: FromStr<Err = ParseIntError>,
{
    let value = setting(conn, key)?;
    value.parse().map_err(|_| StoreError::InvalidSetting {
        key: key.to_string(),
        value,
    })
}
