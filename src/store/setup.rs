//! Database creation.
//!
//! A database is laid out once, from a parsed configuration: the
//! settings go into the `info` table and one lookup table is created
//! per locality-sensitive hashing band. Permutations are written in a
//! separate step so they can be generated after the schema exists.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::config::WaveprintConfig;
use crate::minhash::Permutation;

use super::{open_readwrite, Result, StoreError};

/// Create the schema in a new database file and persist the settings.
///
/// Fails if the file already carries a schema.
pub fn initialize(path: &Path, config: &WaveprintConfig) -> Result<()> {
    let mut conn = Connection::open(path).map_err(|source| StoreError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let tx = conn.transaction()?;
    tx.execute_batch(&schema_sql(config.lsh_bin_count()))?;
    {
        let mut insert = tx.prepare("insert into info (key, value) values (?1, ?2)")?;
        for (key, value) in config.settings() {
            insert.execute(params![key, value])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Replace the stored minhash permutations.
pub fn store_permutations(path: &Path, permutations: &[Permutation]) -> Result<()> {
    let mut conn = open_readwrite(path)?;
    let tx = conn.transaction()?;
    tx.execute("delete from permutation", [])?;
    {
        let mut insert =
            tx.prepare("insert into permutation (num, pos, value) values (?1, ?2, ?3)")?;
        for (num, permutation) in permutations.iter().enumerate() {
            for (pos, &value) in permutation.values().iter().enumerate() {
                insert.execute(params![num as i64, pos as i64, value])?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn schema_sql(bin_count: usize) -> String {
    let mut sql = String::from(
        "create table info (
            key text primary key,
            value text not null
        );
        create table track (
            id integer primary key,
            name text not null
        );
        create table fingerprint (
            id integer primary key,
            track_id integer not null references track (id),
            seq integer not null,
            value blob not null
        );
        create table permutation (
            num integer not null,
            pos integer not null,
            value integer not null
        );
        ",
    );
    for bin in 0..bin_count {
        sql.push_str(&format!(
            "create table lsh_bin_{bin} (
                fingerprint_id integer not null references fingerprint (id),
                value integer not null
            );
            create index ix_lsh_bin_{bin} on lsh_bin_{bin} (value);
            "
        ));
    }
    sql
}
