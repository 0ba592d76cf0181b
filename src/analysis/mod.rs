//! The merged coverage model.
//!
//! Parsers produce a [`ParserResult`] per report, holding assemblies,
//! classes and source files with per line visit counts. Results of
//! different reports and formats merge into a single model, visit counts
//! add up and statuses never get downgraded.

mod assembly;
mod branch;
mod class;
mod code_element;
mod code_file;
mod metric;
mod parser_result;

pub use assembly::Assembly;
pub use branch::Branch;
pub use class::Class;
pub use code_element::{CodeElement, CodeElementType};
pub use code_file::{CodeFile, LineVisitStatus, TestMethod, TrackedMethodCoverage};
pub use metric::{Metric, MetricMergeOrder, MetricType, MethodMetric};
pub use parser_result::ParserResult;

/// Number of decimal places used when computing coverage quotas.
///
/// Quotas are truncated, not rounded, so a quota only reaches 100% when
/// every single line is covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPrecision {
    decimal_places: u8,
}

impl QuotaPrecision {
    /// Creates a precision with the given number of decimal places,
    /// capped at 8.
    #[must_use]
    pub fn new(decimal_places: u8) -> Self {
        QuotaPrecision {
            decimal_places: decimal_places.min(8),
        }
    }

    #[must_use]
    pub fn decimal_places(&self) -> u8 {
        self.decimal_places
    }

    /// The percentage of `covered` in `total`, truncated to this
    /// precision. `None` when `total` is zero.
    pub fn quota(&self, covered: usize, total: usize) -> Option<f64> {
        if total == 0 {
            return None;
        }
        let divisor = 10f64.powi(i32::from(self.decimal_places));
        Some((100.0 * divisor * covered as f64 / total as f64).trunc() / divisor)
    }
}

impl Default for QuotaPrecision {
    fn default() -> Self {
        QuotaPrecision::new(1)
    }
}

/// Sums optional values, `None` only when no value is present at all.
pub(crate) fn safe_sum<I>(values: I) -> Option<usize>
where
    I: Iterator<Item = Option<usize>>,
{
    let mut total = None;
    for value in values.flatten() {
        *total.get_or_insert(0) += value;
    }
    total
}
