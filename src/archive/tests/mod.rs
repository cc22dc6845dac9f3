// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use std::io::Write;
use tempfile::TempDir;

fn manager(granularity: ArchiveGranularity) -> (ArchiveManager, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let paths = PathsConfig {
        data_dir: temp_dir.path().join("Data"),
        archive_dir: temp_dir.path().join("Archive"),
        scratch_dir: Some(temp_dir.path().join("scratch")),
        log_dir: temp_dir.path().join("Log"),
    };
    (ArchiveManager::new(&paths, granularity), temp_dir)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> FetchPeriod {
    FetchPeriod::Day(date(y, m, d))
}

fn payload(period: &FetchPeriod) -> Vec<u8> {
    format!(r#"[{{"datetime": "{}T12:00:00+00:00", "measured": 42.5}}]"#, period).into_bytes()
}

/// Store three days of solar data for 2023 and return them
fn store_solar_2023(archive: &ArchiveManager) -> Vec<FetchPeriod> {
    let periods = vec![day(2023, 1, 1), day(2023, 6, 15), day(2023, 12, 31)];
    for period in &periods {
        archive
            .store_raw(SourceType::Solar, period, &payload(period))
            .unwrap();
    }
    periods
}

#[test]
fn store_raw_uses_the_dated_layout() {
    let (archive, temp_dir) = manager(ArchiveGranularity::Year);
    let path = archive
        .store_raw(SourceType::Solar, &day(2024, 2, 1), b"[]")
        .unwrap();

    assert_eq!(
        path,
        temp_dir
            .path()
            .join("Data/SolarForecast/2024/SolarForecast_Elia_20240201.json")
    );
    assert_eq!(std::fs::read(&path).unwrap(), b"[]");

    let price = archive
        .store_raw(SourceType::Price, &FetchPeriod::Month { year: 2024, month: 2 }, b"Date;Euro\n")
        .unwrap();
    assert!(price.ends_with("Belpex/2024/Belpex_202402.csv"));
}

#[test]
fn store_raw_leaves_no_temporary_files() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    let period = day(2024, 2, 1);
    archive.store_raw(SourceType::Wind, &period, b"first").unwrap();
    archive.store_raw(SourceType::Wind, &period, b"second").unwrap();

    let names: Vec<String> = std::fs::read_dir(archive.raw_dir(SourceType::Wind, 2024))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["WindForecast_Elia_20240201.json".to_string()]);
    assert_eq!(
        archive.read_raw(SourceType::Wind, &period).unwrap().as_deref(),
        Some(&b"second"[..])
    );
}

#[test]
fn read_raw_of_unknown_period_is_none() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    assert_eq!(archive.read_raw(SourceType::Solar, &day(2024, 2, 1)).unwrap(), None);
}

#[test]
fn open_periods_are_not_compacted() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);

    let outcome = archive.compact_if_needed(&period, date(2023, 12, 31)).unwrap();

    assert_eq!(outcome, CompactionOutcome::NotClosed);
    assert_eq!(archive.state(&period), ArchiveState::Raw);
    assert_eq!(archive.raw_files(&period).unwrap().len(), 3);
}

#[test]
fn closed_periods_are_strictly_before_the_reference_period() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Month);
    let reference = date(2024, 3, 1);

    assert!(archive.is_closed(&ArchivePeriod::month(SourceType::Price, 2024, 2), reference));
    assert!(!archive.is_closed(&ArchivePeriod::month(SourceType::Price, 2024, 3), reference));
    assert!(archive.is_closed(&ArchivePeriod::year(SourceType::Price, 2023), reference));
    assert!(!archive.is_closed(&ArchivePeriod::year(SourceType::Price, 2024), reference));
}

#[test]
fn compaction_round_trips_byte_identical() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    let stored = store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);

    let outcome = archive.compact_if_needed(&period, date(2024, 3, 10)).unwrap();

    assert_eq!(outcome, CompactionOutcome::Archived { entries: 3 });
    assert_eq!(archive.state(&period), ArchiveState::Archived);
    assert!(archive.raw_files(&period).unwrap().is_empty());
    assert!(
        !archive.raw_dir(SourceType::Solar, 2023).exists(),
        "empty year directory should be removed"
    );

    let materialized = archive.materialize(&period).unwrap();
    let files = materialized.files();
    assert_eq!(files.len(), 3);
    for (file, expected) in files.iter().zip(&stored) {
        assert_eq!(file.period, *expected);
        assert_eq!(std::fs::read(&file.path).unwrap(), payload(expected));
    }

    for expected in &stored {
        assert_eq!(
            archive.read_raw(SourceType::Solar, expected).unwrap(),
            Some(payload(expected))
        );
    }
}

#[test]
fn materialize_cleans_up_its_scratch_directory() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);
    archive.compact_if_needed(&period, date(2024, 1, 1)).unwrap();
    let bundle_before = std::fs::read(archive.bundle_path(&period)).unwrap();

    let scratch = {
        let materialized = archive.materialize(&period).unwrap();
        let scratch = materialized.scratch_dir().unwrap().to_path_buf();
        assert!(scratch.is_dir());
        scratch
    };

    assert!(!scratch.exists(), "scratch directory should be removed on drop");
    assert_eq!(
        std::fs::read(archive.bundle_path(&period)).unwrap(),
        bundle_before,
        "materialize must not touch the bundle"
    );
}

#[test]
fn materialize_raw_period_returns_files_in_place() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);

    let materialized = archive.materialize(&period).unwrap();

    assert!(materialized.scratch_dir().is_none());
    assert_eq!(materialized.files().len(), 3);
    assert!(
        materialized.files()[0]
            .path
            .starts_with(archive.raw_dir(SourceType::Solar, 2023))
    );
}

#[test]
fn failed_verification_keeps_raw_files() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    let stored = store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);

    // replace one entry's content after writing, before verification
    let result = archive.compact_with(&period, date(2024, 3, 10), |partial| {
        let file = std::fs::File::create(partial)?;
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (i, period) in stored.iter().enumerate() {
            writer.start_file(period.raw_file_name(SourceType::Solar), options)?;
            if i == 1 {
                writer.write_all(b"corrupted")?;
            } else {
                writer.write_all(&payload(period))?;
            }
        }
        writer.finish()?;
        Ok(())
    });

    match result {
        Err(ArchiveError::Integrity { period: failed, reason, .. }) => {
            assert_eq!(failed, period);
            assert!(reason.contains("SolarForecast_Elia_20230615.json"), "reason: {reason}");
        }
        other => panic!("expected integrity failure, got {other:?}"),
    }

    assert_eq!(archive.state(&period), ArchiveState::Raw);
    assert!(!archive.bundle_path(&period).exists());
    assert!(!archive.partial_path(&period).exists(), "partial bundle should be removed");
    for expected in &stored {
        assert_eq!(
            std::fs::read(archive.raw_path(SourceType::Solar, expected)).unwrap(),
            payload(expected)
        );
    }

    // a later compaction succeeds from the retained raw files
    assert_eq!(
        archive.compact_if_needed(&period, date(2024, 3, 10)).unwrap(),
        CompactionOutcome::Archived { entries: 3 }
    );
}

#[test]
fn missing_entry_fails_verification() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);

    let result = archive.compact_with(&period, date(2024, 3, 10), |partial| {
        let file = std::fs::File::create(partial)?;
        zip::ZipWriter::new(file).finish()?;
        Ok(())
    });

    assert!(matches!(result, Err(ArchiveError::Integrity { .. })));
    assert_eq!(archive.raw_files(&period).unwrap().len(), 3);
}

#[test]
fn compaction_is_idempotent() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);

    archive.compact_if_needed(&period, date(2024, 3, 10)).unwrap();
    let bundle = std::fs::read(archive.bundle_path(&period)).unwrap();

    let outcome = archive.compact_if_needed(&period, date(2024, 3, 10)).unwrap();

    assert_eq!(outcome, CompactionOutcome::AlreadyArchived);
    assert_eq!(std::fs::read(archive.bundle_path(&period)).unwrap(), bundle);
}

#[test]
fn empty_closed_period_has_nothing_to_archive() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    let period = ArchivePeriod::year(SourceType::Wind, 2020);
    assert_eq!(
        archive.compact_if_needed(&period, date(2024, 3, 10)).unwrap(),
        CompactionOutcome::NothingToArchive
    );
    assert!(!archive.bundle_path(&period).exists());
}

#[test]
fn stray_raw_files_are_folded_into_the_bundle() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    let stored = store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);
    archive.compact_if_needed(&period, date(2024, 1, 2)).unwrap();

    // one leftover identical to its entry, one day that arrived late
    let late = day(2023, 12, 30);
    archive
        .store_raw(SourceType::Solar, &stored[0], &payload(&stored[0]))
        .unwrap();
    archive
        .store_raw(SourceType::Solar, &late, &payload(&late))
        .unwrap();

    let outcome = archive.compact_if_needed(&period, date(2024, 1, 6)).unwrap();

    assert_eq!(outcome, CompactionOutcome::Merged { added: 1, removed: 1 });
    assert!(archive.raw_files(&period).unwrap().is_empty());

    let materialized = archive.materialize(&period).unwrap();
    let periods: Vec<FetchPeriod> = materialized.files().iter().map(|f| f.period).collect();
    assert_eq!(
        periods,
        vec![stored[0], stored[1], late, stored[2]],
        "bundle should hold every day in order"
    );
    assert_eq!(
        archive.read_raw(SourceType::Solar, &late).unwrap(),
        Some(payload(&late))
    );
}

#[test]
fn identical_leftovers_are_removed_without_rewriting() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    let stored = store_solar_2023(&archive);
    let period = ArchivePeriod::year(SourceType::Solar, 2023);
    archive.compact_if_needed(&period, date(2024, 1, 2)).unwrap();
    let bundle = std::fs::read(archive.bundle_path(&period)).unwrap();

    archive
        .store_raw(SourceType::Solar, &stored[1], &payload(&stored[1]))
        .unwrap();
    let outcome = archive.compact_if_needed(&period, date(2024, 1, 2)).unwrap();

    assert_eq!(outcome, CompactionOutcome::Merged { added: 0, removed: 1 });
    assert_eq!(std::fs::read(archive.bundle_path(&period)).unwrap(), bundle);
}

#[test]
fn monthly_granularity_bundles_per_month() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Month);
    for period in [day(2024, 1, 31), day(2024, 2, 1), day(2024, 2, 2)] {
        archive
            .store_raw(SourceType::Wind, &period, &payload(&period))
            .unwrap();
    }

    let january = ArchivePeriod::month(SourceType::Wind, 2024, 1);
    let february = ArchivePeriod::month(SourceType::Wind, 2024, 2);
    let reference = date(2024, 2, 20);

    assert_eq!(
        archive.compact_if_needed(&january, reference).unwrap(),
        CompactionOutcome::Archived { entries: 1 }
    );
    assert_eq!(
        archive.compact_if_needed(&february, reference).unwrap(),
        CompactionOutcome::NotClosed
    );
    assert!(
        archive
            .bundle_path(&january)
            .ends_with("WindForecast/WindForecast_202401.zip")
    );
    assert_eq!(archive.raw_files(&february).unwrap().len(), 2);
    assert_eq!(archive.periods(SourceType::Wind).unwrap(), vec![january, february]);
}

#[test]
fn periods_lists_bundles_and_raw_years() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    store_solar_2023(&archive);
    archive
        .compact_if_needed(&ArchivePeriod::year(SourceType::Solar, 2023), date(2024, 1, 1))
        .unwrap();
    archive
        .store_raw(SourceType::Solar, &day(2024, 2, 1), b"[]")
        .unwrap();

    assert_eq!(
        archive.periods(SourceType::Solar).unwrap(),
        vec![
            ArchivePeriod::year(SourceType::Solar, 2023),
            ArchivePeriod::year(SourceType::Solar, 2024),
        ]
    );
    assert!(archive.periods(SourceType::Price).unwrap().is_empty());
}

#[test]
fn unreadable_bundle_is_reported_as_corrupt() {
    let (archive, _temp_dir) = manager(ArchiveGranularity::Year);
    let period = ArchivePeriod::year(SourceType::Solar, 2022);
    let bundle = archive.bundle_path(&period);
    std::fs::create_dir_all(bundle.parent().unwrap()).unwrap();
    std::fs::write(&bundle, b"not a zip").unwrap();

    let err = archive.read_raw(SourceType::Solar, &day(2022, 5, 1)).unwrap_err();
    assert!(matches!(err, ArchiveError::Corrupt { .. }));
    assert!(archive.materialize(&period).is_err());
}

#[test]
fn bundle_names_parse_back() {
    assert_eq!(
        parse_bundle_name(SourceType::Price, "Belpex_2023.zip"),
        Some(ArchivePeriod::year(SourceType::Price, 2023))
    );
    assert_eq!(
        parse_bundle_name(SourceType::Solar, "SolarForecast_202311.zip"),
        Some(ArchivePeriod::month(SourceType::Solar, 2023, 11))
    );
    assert_eq!(parse_bundle_name(SourceType::Solar, "SolarForecast_2023.zip.partial"), None);
    assert_eq!(parse_bundle_name(SourceType::Solar, "WindForecast_2023.zip"), None);
    assert_eq!(parse_bundle_name(SourceType::Solar, "SolarForecast_202313.zip"), None);
}
