//! Raw file storage and compaction into per-period bundles
//!
//! Every fetched payload is stored as one raw file per fetch period. Once an
//! archive period is closed, its raw files are folded into a single zip bundle:
//!
//! ```text
//! data_dir/SolarForecast/2024/SolarForecast_Elia_20240201.json   (raw)
//! archive_dir/SolarForecast/SolarForecast_2024.zip               (archived)
//! ```
//!
//! The state of an archive period is decided by the final bundle name alone.
//! A bundle is written under a `.partial` name, verified entry by entry against
//! the SHA-256 of its sources, and only then renamed into place; raw files are
//! deleted after the rename. A failed or interrupted compaction therefore
//! leaves the period `Raw` with all raw files intact.

use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::{ArchiveGranularity, PathsConfig};
use crate::error::ArchiveError;
use crate::types::{ArchivePeriod, FetchPeriod, SourceType};

mod bundle;

use bundle::{EntryDigest, EntrySource};

/// Observable state of an archive period
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveState {
    /// Raw files only (possibly none yet)
    Raw,
    /// The bundle exists
    Archived,
}

/// What a call to [`ArchiveManager::compact_if_needed`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The period is not closed yet
    NotClosed,
    /// Closed, but there are no raw files and no bundle
    NothingToArchive,
    /// Already archived with no raw files left over
    AlreadyArchived,
    /// A new bundle was written
    Archived {
        /// Number of entries in the bundle
        entries: usize,
    },
    /// Raw files next to an existing bundle were folded into it
    Merged {
        /// Entries added or replaced in the bundle
        added: usize,
        /// Raw files that were already in the bundle and got removed
        removed: usize,
    },
}

/// One fetch period's payload as materialized on disk
#[derive(Clone, Debug)]
pub struct MaterializedFile {
    /// Fetch period the file holds
    pub period: FetchPeriod,
    /// Location of the payload
    pub path: PathBuf,
}

/// Readable view of an archive period
///
/// For an archived period the bundle is extracted into a scratch directory
/// that is removed when this value is dropped; the bundle itself is never
/// modified. For a raw period the raw files are returned in place.
#[derive(Debug)]
pub struct MaterializedPeriod {
    period: ArchivePeriod,
    files: Vec<MaterializedFile>,
    scratch: Option<TempDir>,
}

impl MaterializedPeriod {
    /// The archive period this view belongs to
    pub fn period(&self) -> ArchivePeriod {
        self.period
    }

    /// Payload files in chronological order
    pub fn files(&self) -> &[MaterializedFile] {
        &self.files
    }

    /// Scratch directory holding extracted files, if any
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

/// Sole owner of raw files and bundles
#[derive(Clone, Debug)]
pub struct ArchiveManager {
    data_dir: PathBuf,
    archive_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
    granularity: ArchiveGranularity,
}

impl ArchiveManager {
    /// Create a manager over the configured directories
    pub fn new(paths: &PathsConfig, granularity: ArchiveGranularity) -> Self {
        Self {
            data_dir: paths.data_dir.clone(),
            archive_dir: paths.archive_dir.clone(),
            scratch_dir: paths.scratch_dir.clone(),
            granularity,
        }
    }

    /// Configured bundle granularity
    pub fn granularity(&self) -> ArchiveGranularity {
        self.granularity
    }

    /// Archive period a fetch period is stored under
    pub fn archive_period(&self, source: SourceType, period: &FetchPeriod) -> ArchivePeriod {
        period.archive_period(source, self.granularity)
    }

    /// Directory holding the raw files of a source and year
    pub fn raw_dir(&self, source: SourceType, year: i32) -> PathBuf {
        self.data_dir.join(source.dir_name()).join(year.to_string())
    }

    /// Path of the raw file for a fetch period
    pub fn raw_path(&self, source: SourceType, period: &FetchPeriod) -> PathBuf {
        self.raw_dir(source, period.year())
            .join(period.raw_file_name(source))
    }

    /// Path of the bundle for an archive period
    pub fn bundle_path(&self, period: &ArchivePeriod) -> PathBuf {
        self.archive_dir
            .join(period.source.dir_name())
            .join(period.bundle_name())
    }

    fn partial_path(&self, period: &ArchivePeriod) -> PathBuf {
        self.archive_dir
            .join(period.source.dir_name())
            .join(format!("{}.partial", period.bundle_name()))
    }

    /// Current state of an archive period
    pub fn state(&self, period: &ArchivePeriod) -> ArchiveState {
        if self.bundle_path(period).is_file() {
            ArchiveState::Archived
        } else {
            ArchiveState::Raw
        }
    }

    /// Whether the period lies strictly before the period containing `reference_date`
    pub fn is_closed(&self, period: &ArchivePeriod, reference_date: NaiveDate) -> bool {
        match period.month {
            None => period.year < reference_date.year(),
            Some(month) => (period.year, month) < (reference_date.year(), reference_date.month()),
        }
    }

    /// Store the raw payload of a fetch period
    ///
    /// The file is written under a temporary name in the target directory and
    /// renamed into place, so a raw file is either complete or absent.
    pub fn store_raw(
        &self,
        source: SourceType,
        period: &FetchPeriod,
        payload: &[u8],
    ) -> Result<PathBuf, ArchiveError> {
        use std::io::Write;

        let dir = self.raw_dir(source, period.year());
        std::fs::create_dir_all(&dir)
            .map_err(|e| ArchiveError::io("failed to create directory", &dir, e))?;

        let target = dir.join(period.raw_file_name(source));
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| ArchiveError::io("failed to create temporary file in", &dir, e))?;
        temp.write_all(payload)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| ArchiveError::io("failed to write", temp.path().to_path_buf(), e))?;
        temp.persist(&target)
            .map_err(|e| ArchiveError::io("failed to rename into", &target, e.error))?;

        debug!(source = %source, period = %period, bytes = payload.len(), path = ?target, "Stored raw file");
        Ok(target)
    }

    /// Stored payload of a fetch period, from its raw file or from the bundle
    ///
    /// Returns `None` when the period was never stored.
    pub fn read_raw(
        &self,
        source: SourceType,
        period: &FetchPeriod,
    ) -> Result<Option<Vec<u8>>, ArchiveError> {
        let raw = self.raw_path(source, period);
        match std::fs::read(&raw) {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ArchiveError::io("failed to read", raw, e)),
        }

        let bundle = self.bundle_path(&self.archive_period(source, period));
        if !bundle.is_file() {
            return Ok(None);
        }
        bundle::read_entry(&bundle, &period.raw_file_name(source))
    }

    /// Raw files of an archive period on disk, sorted by fetch period
    pub fn raw_files(&self, period: &ArchivePeriod) -> Result<Vec<MaterializedFile>, ArchiveError> {
        let dir = self.raw_dir(period.source, period.year);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArchiveError::io("failed to read directory", dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArchiveError::io("failed to read directory", &dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(fetch_period) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| FetchPeriod::from_raw_file_name(period.source, n))
            else {
                continue;
            };
            if period.contains(&fetch_period) {
                files.push(MaterializedFile {
                    period: fetch_period,
                    path,
                });
            }
        }
        files.sort_by_key(|f| f.period);
        Ok(files)
    }

    /// Archive periods of a source present on disk (raw files or bundles)
    pub fn periods(&self, source: SourceType) -> Result<Vec<ArchivePeriod>, ArchiveError> {
        let mut periods = BTreeSet::new();

        let bundle_dir = self.archive_dir.join(source.dir_name());
        for name in file_names(&bundle_dir)? {
            if let Some(period) = parse_bundle_name(source, &name) {
                periods.insert(period);
            }
        }

        let raw_root = self.data_dir.join(source.dir_name());
        for year_dir in file_names(&raw_root)? {
            if year_dir.parse::<i32>().is_err() {
                continue;
            }
            for name in file_names(&raw_root.join(&year_dir))? {
                if let Some(fetch_period) = FetchPeriod::from_raw_file_name(source, &name) {
                    periods.insert(self.archive_period(source, &fetch_period));
                }
            }
        }

        Ok(periods.into_iter().collect())
    }

    /// Readable view of an archive period
    pub fn materialize(&self, period: &ArchivePeriod) -> Result<MaterializedPeriod, ArchiveError> {
        let raw = self.raw_files(period)?;
        let bundle = self.bundle_path(period);
        if !bundle.is_file() {
            return Ok(MaterializedPeriod {
                period: *period,
                files: raw,
                scratch: None,
            });
        }

        let scratch = match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| ArchiveError::io("failed to create directory", dir, e))?;
                TempDir::new_in(dir)
                    .map_err(|e| ArchiveError::io("failed to create scratch directory in", dir, e))?
            }
            None => TempDir::new().map_err(|e| {
                ArchiveError::io("failed to create scratch directory in", std::env::temp_dir(), e)
            })?,
        };

        let mut by_period: BTreeMap<FetchPeriod, PathBuf> = BTreeMap::new();
        for (name, path) in bundle::extract_all(&bundle, scratch.path())? {
            match FetchPeriod::from_raw_file_name(period.source, &name) {
                Some(fetch_period) if period.contains(&fetch_period) => {
                    by_period.insert(fetch_period, path);
                }
                _ => debug!(bundle = ?bundle, entry = %name, "ignoring foreign bundle entry"),
            }
        }
        // stray raw files win over the bundle, as compaction would make them do
        for file in raw {
            by_period.insert(file.period, file.path);
        }

        Ok(MaterializedPeriod {
            period: *period,
            files: by_period
                .into_iter()
                .map(|(period, path)| MaterializedFile { period, path })
                .collect(),
            scratch: Some(scratch),
        })
    }

    /// Bundle the raw files of a closed period
    ///
    /// No-op for periods that are open, empty, or archived without raw files
    /// left over. On an integrity failure the partial bundle is removed and the
    /// raw files stay untouched.
    pub fn compact_if_needed(
        &self,
        period: &ArchivePeriod,
        reference_date: NaiveDate,
    ) -> Result<CompactionOutcome, ArchiveError> {
        self.compact_with(period, reference_date, |_| Ok(()))
    }

    /// [`Self::compact_if_needed`] with a hook run on the partial bundle before verification
    pub(crate) fn compact_with<H>(
        &self,
        period: &ArchivePeriod,
        reference_date: NaiveDate,
        before_verify: H,
    ) -> Result<CompactionOutcome, ArchiveError>
    where
        H: FnOnce(&Path) -> std::io::Result<()>,
    {
        if !self.is_closed(period, reference_date) {
            return Ok(CompactionOutcome::NotClosed);
        }

        let raw = self.raw_files(period)?;
        let bundle = self.bundle_path(period);
        let archived = bundle.is_file();

        if raw.is_empty() {
            return Ok(if archived {
                CompactionOutcome::AlreadyArchived
            } else {
                CompactionOutcome::NothingToArchive
            });
        }

        let mut raw_digests = Vec::with_capacity(raw.len());
        for file in &raw {
            raw_digests.push((entry_name(period, file), bundle::digest_file(&file.path)?));
        }

        if !archived {
            let expected: BTreeMap<String, EntryDigest> = raw_digests.iter().cloned().collect();
            let entries: Vec<(String, EntrySource)> = raw
                .iter()
                .map(|f| (entry_name(period, f), EntrySource::File(f.path.clone())))
                .collect();

            self.write_verified(period, &entries, None, &expected, before_verify)?;
            self.remove_raw(period, &raw);

            info!(period = %period, entries = entries.len(), bundle = ?bundle, "Archived period");
            return Ok(CompactionOutcome::Archived {
                entries: entries.len(),
            });
        }

        let existing = bundle::entry_digests(&bundle)?;
        let (identical, changed): (Vec<_>, Vec<_>) = raw
            .iter()
            .zip(&raw_digests)
            .partition(|(_, (name, digest))| existing.get(name) == Some(digest));

        if !changed.is_empty() {
            let mut expected = existing.clone();
            let mut entries: Vec<(String, EntrySource)> = Vec::with_capacity(existing.len() + changed.len());
            let replaced: BTreeSet<&String> = changed.iter().map(|(_, (name, _))| name).collect();

            for name in existing.keys().filter(|name| !replaced.contains(name)) {
                entries.push((name.clone(), EntrySource::Bundle(name.clone())));
            }
            for (file, (name, digest)) in &changed {
                expected.insert(name.clone(), *digest);
                entries.push((name.clone(), EntrySource::File(file.path.clone())));
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            self.write_verified(period, &entries, Some(bundle.as_path()), &expected, before_verify)?;
        }

        self.remove_raw(period, &raw);
        info!(
            period = %period,
            added = changed.len(),
            removed = identical.len(),
            "Folded raw files into existing bundle"
        );
        Ok(CompactionOutcome::Merged {
            added: changed.len(),
            removed: identical.len(),
        })
    }

    /// Write `entries` to the partial bundle, verify, and rename it over the bundle
    fn write_verified<H>(
        &self,
        period: &ArchivePeriod,
        entries: &[(String, EntrySource)],
        previous: Option<&Path>,
        expected: &BTreeMap<String, EntryDigest>,
        before_verify: H,
    ) -> Result<(), ArchiveError>
    where
        H: FnOnce(&Path) -> std::io::Result<()>,
    {
        let bundle = self.bundle_path(period);
        let partial = self.partial_path(period);
        if let Some(parent) = partial.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::io("failed to create directory", parent, e))?;
        }

        let result = bundle::write(&partial, entries, previous)
            .and_then(|()| {
                before_verify(&partial).map_err(|e| ArchiveError::io("failed to prepare", &partial, e))
            })
            .and_then(|()| {
                bundle::verify(&partial, expected).map_err(|reason| ArchiveError::Integrity {
                    period: *period,
                    bundle: partial.clone(),
                    reason,
                })
            })
            .and_then(|()| {
                std::fs::rename(&partial, &bundle)
                    .map_err(|e| ArchiveError::io("failed to rename into", &bundle, e))
            });

        if let Err(e) = result {
            warn!(period = %period, error = %e, "Compaction failed, raw files kept");
            if let Err(remove_err) = std::fs::remove_file(&partial)
                && remove_err.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = ?partial, error = %remove_err, "Failed to remove partial bundle");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Delete raw files now contained in the bundle
    ///
    /// Failures only leave a stray file behind, which the next compaction
    /// removes as already present.
    fn remove_raw(&self, period: &ArchivePeriod, raw: &[MaterializedFile]) {
        for file in raw {
            if let Err(e) = std::fs::remove_file(&file.path) {
                warn!(path = ?file.path, error = %e, "Failed to remove archived raw file");
            }
        }
        // only succeeds once the year directory is empty
        let _ = std::fs::remove_dir(self.raw_dir(period.source, period.year));
    }
}

fn entry_name(period: &ArchivePeriod, file: &MaterializedFile) -> String {
    file.period.raw_file_name(period.source)
}

fn file_names(dir: &Path) -> Result<Vec<String>, ArchiveError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArchiveError::io("failed to read directory", dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::io("failed to read directory", dir, e))?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Inverse of [`ArchivePeriod::bundle_name`]
fn parse_bundle_name(source: SourceType, name: &str) -> Option<ArchivePeriod> {
    let stem = name
        .strip_prefix(source.dir_name())?
        .strip_prefix('_')?
        .strip_suffix(".zip")?;
    if !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match stem.len() {
        4 => Some(ArchivePeriod::year(source, stem.parse().ok()?)),
        6 => {
            let month: u32 = stem[4..].parse().ok()?;
            (1..=12)
                .contains(&month)
                .then_some(ArchivePeriod::month(source, stem[..4].parse().ok()?, month))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests;
