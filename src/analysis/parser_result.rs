use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::analysis::{Assembly, QuotaPrecision};

/// The outcome of parsing one or several coverage reports.
#[derive(Debug, Clone)]
pub struct ParserResult {
    assemblies: Vec<Assembly>,
    parser_names: Vec<String>,
    pub supports_branch_coverage: bool,
    pub source_directories: BTreeSet<String>,
    pub minimum_time_stamp: Option<DateTime<Utc>>,
    pub maximum_time_stamp: Option<DateTime<Utc>>,
}

impl Default for ParserResult {
    fn default() -> Self {
        ParserResult {
            assemblies: Vec::new(),
            parser_names: Vec::new(),
            supports_branch_coverage: false,
            source_directories: BTreeSet::new(),
            minimum_time_stamp: None,
            maximum_time_stamp: None,
        }
    }
}

impl ParserResult {
    pub fn new(
        mut assemblies: Vec<Assembly>,
        supports_branch_coverage: bool,
        parser_name: impl Into<String>,
    ) -> Self {
        assemblies.sort_by(|a, b| a.name().cmp(b.name()));
        ParserResult {
            assemblies,
            parser_names: vec![parser_name.into()],
            supports_branch_coverage,
            source_directories: BTreeSet::new(),
            minimum_time_stamp: None,
            maximum_time_stamp: None,
        }
    }

    /// The assemblies of the merged result, ordered by name.
    #[must_use]
    pub fn assemblies(&self) -> &[Assembly] {
        &self.assemblies
    }

    pub fn assembly_by_name(&self, name: &str) -> Option<&Assembly> {
        self.assemblies.iter().find(|a| a.name() == name)
    }

    pub fn add_source_directory(&mut self, directory: impl Into<String>) {
        self.source_directories.insert(directory.into());
    }

    /// Name of the parser(s) that produced this result. After merging
    /// results of several reports the individual parsers are listed with
    /// their multiplicity.
    #[must_use]
    pub fn parser_name(&self) -> String {
        match self.parser_names.len() {
            0 => String::new(),
            1 => self.parser_names[0].clone(),
            _ => {
                let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                for name in &self.parser_names {
                    *counts.entry(name).or_insert(0) += 1;
                }
                let groups = counts
                    .iter()
                    .map(|(name, count)| format!("{count}x {name}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("MultiReportParser ({groups})")
            }
        }
    }

    /// Merges the result of another report into this one.
    pub fn merge(&mut self, other: ParserResult, precision: QuotaPrecision) {
        for assembly in other.assemblies {
            match self.assemblies.iter_mut().find(|a| **a == assembly) {
                Some(existing) => existing.merge(assembly, precision),
                None => self.assemblies.push(assembly),
            }
        }
        self.assemblies.sort_by(|a, b| a.name().cmp(b.name()));

        self.supports_branch_coverage |= other.supports_branch_coverage;
        self.parser_names.extend(other.parser_names);
        self.source_directories.extend(other.source_directories);

        self.minimum_time_stamp = match (self.minimum_time_stamp, other.minimum_time_stamp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.maximum_time_stamp = match (self.maximum_time_stamp, other.maximum_time_stamp) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Class, CodeFile};
    use crate::analysis::LineVisitStatus::{Covered, NotCoverable, NotCovered};
    use chrono::TimeZone;

    fn result_with(assembly_name: &str, parser_name: &str) -> ParserResult {
        let mut class = Class::new("Test.Class", "");
        class.add_file(CodeFile::new(
            "Class.cs",
            vec![-1, 1, 0],
            vec![NotCoverable, Covered, NotCovered],
        ));
        let mut assembly = Assembly::new(assembly_name);
        assembly.add_class(class);
        ParserResult::new(vec![assembly], false, parser_name)
    }

    #[test]
    fn branch_coverage_is_not_supported_by_default() {
        assert!(!ParserResult::default().supports_branch_coverage);
    }

    #[test]
    fn parser_name_of_an_empty_result_is_empty() {
        assert_eq!(ParserResult::default().parser_name(), "");
    }

    #[test]
    fn parser_name_of_a_single_report_is_the_parser() {
        let result = result_with("Test", "CoberturaParser");
        assert_eq!(result.parser_name(), "CoberturaParser");
    }

    #[test]
    fn parser_name_counts_merged_parsers() {
        let mut result = result_with("Test", "OpenCoverParser");
        result.merge(
            result_with("Test", "OpenCoverParser"),
            QuotaPrecision::default(),
        );
        assert_eq!(result.parser_name(), "MultiReportParser (2x OpenCoverParser)");

        result.merge(
            result_with("Test", "NCoverParser"),
            QuotaPrecision::default(),
        );
        assert_eq!(
            result.parser_name(),
            "MultiReportParser (1x NCoverParser, 2x OpenCoverParser)"
        );
    }

    #[test]
    fn merge_combines_assemblies_by_name_and_keeps_them_ordered() {
        let mut result = result_with("Zulu", "CoberturaParser");
        result.merge(result_with("Alpha", "CoberturaParser"), QuotaPrecision::default());
        result.merge(result_with("Zulu", "CoberturaParser"), QuotaPrecision::default());

        let names: Vec<&str> = result.assemblies().iter().map(Assembly::name).collect();
        assert_eq!(names, ["Alpha", "Zulu"]);
        assert_eq!(result.assemblies()[1].covered_lines(), 2);
    }

    #[test]
    fn merge_widens_the_time_stamp_range() {
        let mut a = result_with("Test", "CoberturaParser");
        let early = Utc.with_ymd_and_hms(2015, 2, 1, 10, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2015, 6, 1, 10, 0, 0).unwrap();
        a.minimum_time_stamp = Some(late);
        a.maximum_time_stamp = Some(late);

        let mut b = result_with("Test", "CoberturaParser");
        b.minimum_time_stamp = Some(early);
        b.maximum_time_stamp = Some(early);

        a.merge(b, QuotaPrecision::default());
        assert_eq!(a.minimum_time_stamp, Some(early));
        assert_eq!(a.maximum_time_stamp, Some(late));

        let mut c = result_with("Test", "CoberturaParser");
        c.minimum_time_stamp = None;
        a.merge(c, QuotaPrecision::default());
        assert_eq!(a.minimum_time_stamp, Some(early));
    }

    #[test]
    fn merge_keeps_branch_support_once_seen() {
        let mut result = result_with("Test", "NCoverParser");
        let mut branch_aware = result_with("Test", "OpenCoverParser");
        branch_aware.supports_branch_coverage = true;

        result.merge(branch_aware, QuotaPrecision::default());
        assert!(result.supports_branch_coverage);
    }
}
