/// Auto-detection of coverage report formats.
///
/// Strategy:
///   1. Scan the input for the root elements of known formats
///   2. The first matching root kind claims every occurrence in the file,
///      so a file holding several merged reports yields several documents
///   3. Ambiguous <coverage> roots are told apart by their attributes
use crate::error::{CovError, Result};
use crate::xmltree::{collect_named, Element};

/// Supported coverage report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Cobertura,
    DotCover,
    DynamicCodeCoverage,
    MProf,
    NCover,
    OpenCover,
    VisualStudio,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Cobertura => "cobertura",
            ReportFormat::DotCover => "dotcover",
            ReportFormat::DynamicCodeCoverage => "dynamiccodecoverage",
            ReportFormat::MProf => "mprof",
            ReportFormat::NCover => "ncover",
            ReportFormat::OpenCover => "opencover",
            ReportFormat::VisualStudio => "visualstudio",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detects the report format from the file content and extracts one
/// document per report found in it.
///
/// PartCover reports are recognized but rejected. An empty result means
/// no known root element was found.
pub fn detect(input: &[u8]) -> Result<Vec<(ReportFormat, Element)>> {
    let sessions = collect_named(input, "CoverageSession")?;
    if !sessions.is_empty() {
        return Ok(claim(sessions, ReportFormat::OpenCover));
    }

    let roots: Vec<Element> = collect_named(input, "Root")?
        .into_iter()
        .filter(|root| root.attr("ReportType") == Some("DetailedXml"))
        .collect();
    if !roots.is_empty() {
        return Ok(claim(roots, ReportFormat::DotCover));
    }

    if !collect_named(input, "PartCoverReport")?.is_empty() {
        return Err(CovError::UnsupportedFormat {
            format: "PartCover".into(),
        });
    }

    // Cobertura, NCover and monocov all use a <coverage> root.
    let coverages = collect_named(input, "coverage")?;
    if !coverages.is_empty() {
        return Ok(coverages
            .into_iter()
            .map(|root| {
                let format = if root.attr("profilerVersion").is_some() {
                    ReportFormat::NCover
                } else if root.attribute_count() > 1 {
                    ReportFormat::Cobertura
                } else {
                    ReportFormat::MProf
                };
                (format, root)
            })
            .collect());
    }

    let priv_roots = collect_named(input, "CoverageDSPriv")?;
    if !priv_roots.is_empty() {
        return Ok(claim(priv_roots, ReportFormat::VisualStudio));
    }

    let results: Vec<Element> = collect_named(input, "results")?
        .into_iter()
        .filter(|root| root.child("modules").is_some())
        .collect();
    if !results.is_empty() {
        return Ok(claim(results, ReportFormat::DynamicCodeCoverage));
    }

    Ok(Vec::new())
}

fn claim(roots: Vec<Element>, format: ReportFormat) -> Vec<(ReportFormat, Element)> {
    roots.into_iter().map(|root| (format, root)).collect()
}
