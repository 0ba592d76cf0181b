mod common;

use std::fs;

use unicov::error::CovError;
use unicov::ingest::{self, ParseSettings};

#[test]
fn files_without_a_recognizable_report_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.xml");
    fs::write(&notes, "<notes><entry>not coverage</entry></notes>").unwrap();

    let result = ingest::parse_files(
        &[notes, common::fixture("ncover.xml")],
        &ParseSettings::default(),
    )
    .unwrap();

    assert_eq!(result.parser_name(), "NCoverParser");
    assert_eq!(result.assemblies().len(), 1);
}

#[test]
fn nothing_but_unrecognizable_files_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.xml");
    fs::write(&notes, "<notes/>").unwrap();

    let result = ingest::parse_files(&[notes], &ParseSettings::default());
    assert!(matches!(result, Err(CovError::NoReportsParsed)));
}

#[test]
fn configured_source_directories_are_attached_to_the_result() {
    let settings = ParseSettings {
        source_directories: vec!["/work/src".to_string()],
        ..ParseSettings::default()
    };
    let result = ingest::parse_files(&[common::fixture("ncover.xml")], &settings).unwrap();

    assert!(result.source_directories.contains("/work/src"));
}

#[test]
fn assembly_filters_apply_before_merging() {
    let settings = ParseSettings {
        assembly_filters: vec!["-Test".to_string()],
        ..ParseSettings::default()
    };
    let result = ingest::parse_files(&[common::fixture("ncover.xml")], &settings).unwrap();

    assert!(result.assemblies().is_empty());
}

#[test]
fn a_bounded_worker_pool_produces_the_same_result() {
    let files = [common::fixture("ncover.xml"), common::fixture("mprof.xml")];
    let sequential = ingest::parse_files(&files, &ParseSettings::default()).unwrap();
    let limited = ingest::parse_files(
        &files,
        &ParseSettings {
            parallelism: Some(2),
            ..ParseSettings::default()
        },
    )
    .unwrap();

    assert_eq!(limited.parser_name(), sequential.parser_name());
    assert_eq!(
        limited.assemblies()[0].covered_lines(),
        sequential.assemblies()[0].covered_lines()
    );
    assert_eq!(
        limited.assemblies()[0].coverable_lines(),
        sequential.assemblies()[0].coverable_lines()
    );
}
