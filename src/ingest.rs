use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analysis::{ParserResult, QuotaPrecision};
use crate::detect;
use crate::error::{CovError, Result};
use crate::filtering::Filter;
use crate::parsers::{self, ParserContext};

/// Options controlling how reports are read and merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseSettings {
    pub assembly_filters: Vec<String>,
    pub class_filters: Vec<String>,
    pub file_filters: Vec<String>,
    pub source_directories: Vec<String>,
    pub raw_mode: bool,
    pub parallelism: Option<usize>,
    pub maximum_decimal_places: u8,
}

impl Default for ParseSettings {
    fn default() -> Self {
        ParseSettings {
            assembly_filters: Vec::new(),
            class_filters: Vec::new(),
            file_filters: Vec::new(),
            source_directories: Vec::new(),
            raw_mode: false,
            parallelism: None,
            maximum_decimal_places: 1,
        }
    }
}

/// Reads the given report files, auto-detects their formats, parses them
/// and merges everything into one result.
///
/// Unreadable or unparseable files are logged and skipped. If files were
/// given but none of them yielded a report, an error is returned. A
/// recognized but unsupported format aborts the whole run.
pub fn parse_files(paths: &[PathBuf], settings: &ParseSettings) -> Result<ParserResult> {
    if paths.is_empty() {
        return Ok(ParserResult::default());
    }

    let context = ParserContext {
        assembly_filter: Filter::new(&settings.assembly_filters)?,
        class_filter: Filter::new(&settings.class_filters)?,
        file_filter: Filter::for_paths(&settings.file_filters)?,
        raw_mode: settings.raw_mode,
        precision: QuotaPrecision::new(settings.maximum_decimal_places),
    };

    let counter = AtomicUsize::new(0);
    let total = paths.len();

    let load = |path: &PathBuf| -> Result<Option<ParserResult>> {
        let number = counter.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("loading report '{}' ({number}/{total})", path.display());
        match parse_file(path, &context) {
            Ok(result) => Ok(Some(result)),
            Err(error @ CovError::UnsupportedFormat { .. }) => Err(error),
            Err(error) => {
                let size = fs::metadata(path).map(|m| m.len()).ok();
                log::error!(
                    "error reading report {} ({}): {error}",
                    path.display(),
                    human_readable_file_size(size)
                );
                Ok(None)
            }
        }
    };

    let results: Vec<Result<Option<ParserResult>>> = match settings.parallelism {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|error| CovError::Other(error.to_string()))?;
            pool.install(|| paths.par_iter().map(load).collect())
        }
        None => paths.par_iter().map(load).collect(),
    };

    // Merging sequentially in input order keeps the result deterministic.
    let mut merged = ParserResult::default();
    let mut parsed_any = false;
    for result in results {
        if let Some(result) = result? {
            parsed_any = true;
            merged.merge(result, context.precision);
        }
    }
    if !parsed_any {
        return Err(CovError::NoReportsParsed);
    }

    for directory in &settings.source_directories {
        merged.add_source_directory(directory);
    }

    Ok(merged)
}

fn parse_file(path: &Path, context: &ParserContext) -> Result<ParserResult> {
    let content = fs::read(path)?;
    let documents = detect::detect(&content)?;
    if documents.is_empty() {
        return Err(CovError::Parse("no coverage report found".into()));
    }

    let mut merged = ParserResult::default();
    for (format, mut root) in documents {
        log::debug!("preprocessing {format} report");
        parsers::preprocess(format, &mut root);
        let parser = parsers::parser_for(format);
        log::debug!("initiating parser: {}", parser.name());
        merged.merge(parser.parse(&root, context)?, context.precision);
    }
    Ok(merged)
}

fn human_readable_file_size(bytes: Option<u64>) -> String {
    const SUFFIXES: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

    let Some(bytes) = bytes else {
        return "-".to_string();
    };
    if bytes == 0 {
        return "0B".to_string();
    }

    let place = ((bytes as f64).log(1024.0).floor() as usize).min(SUFFIXES.len() - 1);
    let value = bytes as f64 / 1024f64.powi(place as i32);
    let rounded = (value * 10.0).round() / 10.0;
    let mut text = format!("{rounded:.1}");
    if let Some(stripped) = text.strip_suffix(".0") {
        text = stripped.to_string();
    }
    format!("{}{}", text, SUFFIXES[place])
}
