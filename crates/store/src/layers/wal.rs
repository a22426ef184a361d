//! Write-ahead log for flush batches.
//!
//! A flush writes every pending mutation to `<root>/wal/<stamp>.wal` before
//! any layer file, one line per mutation in application order:
//! `<hex tenant> <hex key> <hex value | ~>`. The WAL is removed once every
//! tenant's layer file is durable. A WAL found at open is replayed.

use std::{
    fs,
    path::{Path, PathBuf},
};

use snafu::ResultExt;

use super::{
    file::{decode_record, encode_record, remove_if_exists, write_lines_atomically},
    stamp::Stamp,
};
use crate::error::{Error, IoSnafu, Result};

const WAL_DIR: &str = "wal";
const WAL_EXT: &str = "wal";

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WalRecord {
    pub tenant: String,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// A WAL file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WalFile {
    pub stamp: Stamp,
    pub path: PathBuf,
}

pub(crate) fn wal_path(root: &Path, stamp: Stamp) -> PathBuf {
    root.join(WAL_DIR).join(format!("{stamp}.{WAL_EXT}"))
}

fn parse_wal_filename(filename: &str) -> Option<Stamp> {
    Stamp::parse(filename.strip_suffix(WAL_EXT)?.strip_suffix('.')?)
}

/// Lists WAL files, oldest first.
pub(crate) fn list_wal_files(root: &Path) -> Result<Vec<WalFile>> {
    let dir = root.join(WAL_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir).context(IoSnafu { path: &dir })? {
        let entry = entry.context(IoSnafu { path: &dir })?;
        if let Some(stamp) = entry.file_name().to_str().and_then(parse_wal_filename) {
            files.push(WalFile { stamp, path: entry.path() });
        }
    }
    files.sort_by_key(|file| file.stamp);
    Ok(files)
}

/// Writes `records` to a new WAL file stamped `stamp`.
pub(crate) fn write_wal(
    root: &Path,
    stamp: Stamp,
    records: &[WalRecord],
    sync: bool,
) -> Result<PathBuf> {
    let dir = root.join(WAL_DIR);
    fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;

    let path = wal_path(root, stamp);
    let lines = records.iter().map(|record| {
        format!(
            "{} {}",
            hex::encode(record.tenant.as_bytes()),
            encode_record(&record.key, record.value.as_deref())
        )
    });
    write_lines_atomically(&path, lines, sync)?;
    Ok(path)
}

/// Reads a WAL file in logged order.
pub(crate) fn read_wal(path: &Path) -> Result<Vec<WalRecord>> {
    let contents = fs::read_to_string(path).context(IoSnafu { path })?;
    let corrupted = |line: usize, reason: String| Error::Corrupted {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (tenant, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| corrupted(index + 1, "missing key".to_string()))?;
        let tenant = hex::decode(tenant)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| corrupted(index + 1, "bad tenant".to_string()))?;
        let (key, value) = decode_record(rest).map_err(|reason| corrupted(index + 1, reason))?;
        records.push(WalRecord { tenant, key, value });
    }
    Ok(records)
}

pub(crate) fn remove_wal(path: &Path) -> Result<()> {
    remove_if_exists(path)
}
