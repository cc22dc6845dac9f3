//! Zip bundle reading, writing and verification

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;

/// SHA-256 of an entry's uncompressed content
pub(crate) type EntryDigest = [u8; 32];

/// Where the bytes of a new bundle entry come from
pub(crate) enum EntrySource {
    /// A raw file on disk
    File(PathBuf),
    /// An entry of an existing bundle, by name
    Bundle(String),
}

pub(crate) fn digest_reader(mut reader: impl Read) -> std::io::Result<EntryDigest> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}

pub(crate) fn digest_file(path: &Path) -> Result<EntryDigest, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::io("failed to open", path, e))?;
    digest_reader(file).map_err(|e| ArchiveError::io("failed to read", path, e))
}

pub(crate) fn open(bundle: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    let file = File::open(bundle).map_err(|e| ArchiveError::io("failed to open", bundle, e))?;
    ZipArchive::new(file).map_err(|e| ArchiveError::Corrupt {
        bundle: bundle.to_path_buf(),
        reason: e.to_string(),
    })
}

fn corrupt(bundle: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Corrupt {
        bundle: bundle.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Digest of every entry in a bundle, keyed by entry name
///
/// Fails on duplicate entry names, which a bundle written here never has.
pub(crate) fn entry_digests(bundle: &Path) -> Result<BTreeMap<String, EntryDigest>, ArchiveError> {
    let mut archive = open(bundle)?;
    let mut digests = BTreeMap::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|e| corrupt(bundle, e))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let digest = digest_reader(entry).map_err(|e| corrupt(bundle, e))?;
        if digests.insert(name.clone(), digest).is_some() {
            return Err(corrupt(bundle, format!("duplicate entry {}", name)));
        }
    }
    Ok(digests)
}

/// Content of a single entry, `None` when the bundle has no such entry
pub(crate) fn read_entry(bundle: &Path, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    let mut archive = open(bundle)?;
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(corrupt(bundle, e)),
    };
    let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
    entry.read_to_end(&mut bytes).map_err(|e| corrupt(bundle, e))?;
    Ok(Some(bytes))
}

/// Extract every file entry into `dest`, returning (entry name, extracted path)
pub(crate) fn extract_all(bundle: &Path, dest: &Path) -> Result<Vec<(String, PathBuf)>, ArchiveError> {
    let mut archive = open(bundle)?;
    let mut extracted = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| corrupt(bundle, e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            debug!(entry = entry.name(), "skipping entry with unsafe path");
            continue;
        };
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::io("failed to create directory", parent, e))?;
        }
        let mut out =
            File::create(&target).map_err(|e| ArchiveError::io("failed to create", &target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| corrupt(bundle, e))?;
        extracted.push((entry.name().to_string(), target));
    }
    Ok(extracted)
}

/// Write a new bundle at `path` (deflate), one entry per source, in order
///
/// `previous` must be given when any entry comes from an existing bundle.
pub(crate) fn write(
    path: &Path,
    entries: &[(String, EntrySource)],
    previous: Option<&Path>,
) -> Result<(), ArchiveError> {
    let file = File::create(path).map_err(|e| ArchiveError::io("failed to create", path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut previous = previous
        .map(|bundle| open(bundle).map(|archive| (archive, bundle)))
        .transpose()?;

    let write_err = |e: std::io::Error| ArchiveError::io("failed to write", path, e);

    for (name, source) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| write_err(e.into()))?;
        match source {
            EntrySource::File(raw) => {
                let mut input =
                    File::open(raw).map_err(|e| ArchiveError::io("failed to open", raw, e))?;
                std::io::copy(&mut input, &mut writer).map_err(write_err)?;
            }
            EntrySource::Bundle(entry_name) => {
                let Some((archive, bundle)) = previous.as_mut() else {
                    return Err(corrupt(path, "entry copied without a source bundle"));
                };
                let bundle: &Path = bundle;
                let mut entry = archive
                    .by_name(entry_name)
                    .map_err(|e| corrupt(bundle, e))?;
                std::io::copy(&mut entry, &mut writer).map_err(write_err)?;
            }
        }
    }

    let mut file = writer.finish().map_err(|e| write_err(e.into()))?;
    file.flush().map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    Ok(())
}

/// Check a written bundle against the digests taken before writing
///
/// The entry count and every entry's SHA-256 must match exactly.
pub(crate) fn verify(bundle: &Path, expected: &BTreeMap<String, EntryDigest>) -> Result<(), String> {
    let actual = entry_digests(bundle).map_err(|e| e.to_string())?;
    if actual.len() != expected.len() {
        return Err(format!(
            "expected {} entries, found {}",
            expected.len(),
            actual.len()
        ));
    }
    for (name, digest) in expected {
        match actual.get(name) {
            None => return Err(format!("entry {} is missing", name)),
            Some(found) if found != digest => {
                return Err(format!("entry {} does not match its source", name));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
