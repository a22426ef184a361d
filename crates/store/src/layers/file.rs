//! Layer file naming, encoding, and I/O.
//!
//! Layout under the engine root:
//!
//! ```text
//! <root>/tenants/<hex tenant>/<timestamp>-<sequence>-L<layer>.layer
//! ```
//!
//! Each file is newline-delimited text, one record per line:
//! `<hex key> <hex value>`, or `<hex key> ~` for a deletion. Lines are parsed
//! by splitting on the first whitespace. Files are written to a `.tmp`
//! sibling and renamed into place, so a listed file is always complete.

use std::{
    collections::BTreeMap,
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use snafu::ResultExt;

use super::stamp::Stamp;
use crate::error::{Error, IoSnafu, Result};

/// Directory under the root holding one subdirectory per tenant.
const TENANTS_DIR: &str = "tenants";

/// Layer file extension.
const LAYER_EXT: &str = "layer";

/// Value marker for a deleted key.
pub(crate) const TOMBSTONE: &str = "~";

/// A persisted mutation: `Some(value)` for a put, `None` for a delete.
pub type Record = (Vec<u8>, Option<Vec<u8>>);

/// Records keyed by key; iteration order is key order.
pub type RecordMap = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// A layer file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFile {
    /// Owning tenant (partition).
    pub tenant: String,
    /// Recency stamp from the filename.
    pub stamp: Stamp,
    /// Generation: 0 for flushed files, +1 per merge.
    pub layer: u32,
    /// Full path.
    pub path: PathBuf,
}

/// Returns the directory holding `tenant`'s layer files.
pub fn tenant_dir(root: &Path, tenant: &str) -> PathBuf {
    root.join(TENANTS_DIR).join(hex::encode(tenant.as_bytes()))
}

/// Formats a layer filename.
pub fn layer_filename(stamp: Stamp, layer: u32) -> String {
    format!("{stamp}-L{layer}.{LAYER_EXT}")
}

/// Parses a layer filename into its stamp and layer.
pub fn parse_layer_filename(filename: &str) -> Option<(Stamp, u32)> {
    let stem = filename.strip_suffix(LAYER_EXT)?.strip_suffix('.')?;
    let (stamp, layer) = stem.rsplit_once("-L")?;
    Some((Stamp::parse(stamp)?, layer.parse().ok()?))
}

/// Lists tenants that have a layer directory.
///
/// # Errors
///
/// Returns `Error::Io` if the tenants directory cannot be read.
pub fn list_tenants(root: &Path) -> Result<Vec<String>> {
    let dir = root.join(TENANTS_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut tenants = Vec::new();
    for entry in fs::read_dir(&dir).context(IoSnafu { path: &dir })? {
        let entry = entry.context(IoSnafu { path: &dir })?;
        if let Some(name) = entry.file_name().to_str()
            && let Ok(bytes) = hex::decode(name)
            && let Ok(tenant) = String::from_utf8(bytes)
        {
            tenants.push(tenant);
        }
    }
    tenants.sort();
    Ok(tenants)
}

/// Lists a tenant's layer files, sorted by layer then stamp (oldest first).
///
/// # Errors
///
/// Returns `Error::Io` if the tenant directory cannot be read.
pub fn list_layer_files(root: &Path, tenant: &str) -> Result<Vec<LayerFile>> {
    let dir = tenant_dir(root, tenant);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir).context(IoSnafu { path: &dir })? {
        let entry = entry.context(IoSnafu { path: &dir })?;
        if let Some(filename) = entry.file_name().to_str()
            && let Some((stamp, layer)) = parse_layer_filename(filename)
        {
            files.push(LayerFile { tenant: tenant.to_string(), stamp, layer, path: entry.path() });
        }
    }

    files.sort_by_key(|file| (file.layer, file.stamp));
    Ok(files)
}

/// Writes `records` as a new layer file for `tenant` and returns it.
///
/// # Errors
///
/// Returns `Error::Io` if the directory or file cannot be written.
pub fn write_layer_file(
    root: &Path,
    tenant: &str,
    stamp: Stamp,
    layer: u32,
    records: &RecordMap,
    sync: bool,
) -> Result<LayerFile> {
    let dir = tenant_dir(root, tenant);
    fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;

    let path = dir.join(layer_filename(stamp, layer));
    let lines = records.iter().map(|(key, value)| encode_record(key, value.as_deref()));
    write_lines_atomically(&path, lines, sync)?;

    Ok(LayerFile { tenant: tenant.to_string(), stamp, layer, path })
}

/// Reads every record of a layer file, in file order.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read, or `Error::Corrupted` if a
/// line is malformed.
pub fn read_layer_file(path: &Path) -> Result<Vec<Record>> {
    let contents = fs::read_to_string(path).context(IoSnafu { path })?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            decode_record(line).map_err(|reason| Error::Corrupted {
                path: path.to_path_buf(),
                line: index + 1,
                reason,
            })
        })
        .collect()
}

/// Formats one `<hex key> <hex value | ~>` line.
pub(crate) fn encode_record(key: &[u8], value: Option<&[u8]>) -> String {
    match value {
        Some(value) => format!("{} {}", hex::encode(key), hex::encode(value)),
        None => format!("{} {TOMBSTONE}", hex::encode(key)),
    }
}

/// Parses one record line, splitting on the first whitespace.
pub(crate) fn decode_record(line: &str) -> std::result::Result<Record, String> {
    let (key, value) =
        line.split_once(char::is_whitespace).ok_or_else(|| "missing value".to_string())?;
    let key = hex::decode(key).map_err(|e| format!("bad key: {e}"))?;
    let value = value.trim();
    if value == TOMBSTONE {
        return Ok((key, None));
    }
    let value = hex::decode(value).map_err(|e| format!("bad value: {e}"))?;
    Ok((key, Some(value)))
}

/// Writes lines to `<path>.tmp`, optionally fsyncs, then renames over `path`.
pub(crate) fn write_lines_atomically<I>(path: &Path, lines: I, sync: bool) -> Result<()>
where
    I: IntoIterator<Item = String>,
{
    let tmp = path.with_extension("tmp");
    let file = fs::File::create(&tmp).context(IoSnafu { path: &tmp })?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writer.write_all(line.as_bytes()).context(IoSnafu { path: &tmp })?;
        writer.write_all(b"\n").context(IoSnafu { path: &tmp })?;
    }
    let file = writer
        .into_inner()
        .map_err(|e| Error::Io { path: tmp.clone(), source: e.into_error() })?;
    if sync {
        file.sync_all().context(IoSnafu { path: &tmp })?;
    }
    drop(file);

    fs::rename(&tmp, path).context(IoSnafu { path })?;
    Ok(())
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Io { path: path.to_path_buf(), source }),
    }
}
