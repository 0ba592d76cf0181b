pub mod cobertura;
pub mod dotcover;
pub mod dynamiccodecoverage;
pub mod mprof;
pub mod ncover;
pub mod opencover;
pub mod visualstudio;

use crate::analysis::{ParserResult, QuotaPrecision};
use crate::detect::ReportFormat;
use crate::error::Result;
use crate::filtering::Filter;
use crate::xmltree::Element;

/// Every format parser implements this trait.
pub trait CoverageParser {
    /// Parser name as recorded in the merged result.
    fn name(&self) -> &'static str;

    /// Parse a preprocessed report document into the coverage model.
    fn parse(&self, root: &Element, context: &ParserContext) -> Result<ParserResult>;
}

/// The parser for a detected report format.
pub fn parser_for(format: ReportFormat) -> Box<dyn CoverageParser> {
    match format {
        ReportFormat::Cobertura => Box::new(cobertura::CoberturaParser),
        ReportFormat::DotCover => Box::new(dotcover::DotCoverParser),
        ReportFormat::DynamicCodeCoverage => {
            Box::new(dynamiccodecoverage::DynamicCodeCoverageParser)
        }
        ReportFormat::MProf => Box::new(mprof::MProfParser),
        ReportFormat::NCover => Box::new(ncover::NCoverParser),
        ReportFormat::OpenCover => Box::new(opencover::OpenCoverParser),
        ReportFormat::VisualStudio => Box::new(visualstudio::VisualStudioParser),
    }
}

/// Applies the format's preprocessor to the report document, if the
/// format has one.
pub fn preprocess(format: ReportFormat, root: &mut Element) {
    match format {
        ReportFormat::Cobertura => crate::preprocessing::cobertura::preprocess(root),
        ReportFormat::DotCover => crate::preprocessing::dotcover::preprocess(root),
        ReportFormat::OpenCover => crate::preprocessing::opencover::preprocess(root),
        ReportFormat::VisualStudio => crate::preprocessing::visualstudio::preprocess(root),
        ReportFormat::DynamicCodeCoverage => {
            crate::preprocessing::dynamiccodecoverage::preprocess(root)
        }
        ReportFormat::NCover | ReportFormat::MProf => {}
    }
}

/// Filters and options shared by all parsers.
pub struct ParserContext {
    pub assembly_filter: Filter,
    pub class_filter: Filter,
    pub file_filter: Filter,
    pub raw_mode: bool,
    pub precision: QuotaPrecision,
}

/// Parses a visit counter, clamping values beyond the `i32` range.
pub(crate) fn parse_visits(value: &str) -> Option<i32> {
    let parsed: i64 = value.trim().parse().ok()?;
    Some(parsed.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
}

/// Parses a metric value. `NaN` turns into `None`, decimal commas are
/// accepted.
pub(crate) fn parse_metric_value(value: &str) -> Option<f64> {
    if value.trim().eq_ignore_ascii_case("nan") {
        return None;
    }
    value.trim().replace(',', ".").parse().ok()
}

pub(crate) fn round_half_away(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    (value * factor).round() / factor
}

/// The crap score of a method combines cyclomatic complexity and
/// coverage. Untested complex code scores highest.
pub(crate) fn crap_score(cyclomatic_complexity: f64, coverage_quota: f64) -> f64 {
    let uncovered = (100.0 - coverage_quota) / 100.0;
    cyclomatic_complexity * cyclomatic_complexity * uncovered.powi(3) + cyclomatic_complexity
}

/// Compacts a method name for display. Argument lists collapse to
/// `(...)`, names without one stay untouched.
pub(crate) fn short_method_name(full_name: &str) -> String {
    let open = full_name.find('(').map_or(-1, |i| i as i64);
    if open <= 0 {
        return full_name.to_string();
    }
    let close = full_name.find(')').map_or(-1, |i| i as i64);
    let arguments = if close - open <= 1 { "()" } else { "(...)" };
    format!("{}{}", &full_name[..open as usize], arguments)
}

/// Groups elements by a name, preserving the order in which names first
/// appear.
pub(crate) fn group_by_name<'a, I>(items: I) -> Vec<(String, Vec<&'a Element>)>
where
    I: Iterator<Item = (String, &'a Element)>,
{
    let mut groups: Vec<(String, Vec<&'a Element>)> = Vec::new();
    for (name, element) in items {
        match groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, list)) => list.push(element),
            None => groups.push((name, vec![element])),
        }
    }
    groups
}

#[cfg(test)]
pub(crate) fn test_context() -> ParserContext {
    ParserContext {
        assembly_filter: Filter::new(&[]).unwrap(),
        class_filter: Filter::new(&[]).unwrap(),
        file_filter: Filter::for_paths(&[]).unwrap(),
        raw_mode: false,
        precision: QuotaPrecision::default(),
    }
}
