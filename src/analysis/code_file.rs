use std::collections::BTreeMap;

use crate::analysis::{Branch, CodeElement, MethodMetric, QuotaPrecision};

/// Visit status of a single line. The variants are ordered so that merging
/// two statuses is a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LineVisitStatus {
    NotCoverable,
    NotCovered,
    PartiallyCovered,
    Covered,
}

/// A test method for which per-test coverage was recorded.
#[derive(Debug, Clone)]
pub struct TestMethod {
    pub name: String,
    pub short_name: String,
}

impl TestMethod {
    pub fn new(name: impl Into<String>, short_name: impl Into<String>) -> Self {
        TestMethod {
            name: name.into(),
            short_name: short_name.into(),
        }
    }
}

impl PartialEq for TestMethod {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TestMethod {}

impl PartialOrd for TestMethod {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TestMethod {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

/// Line coverage recorded while a single test method was executing.
#[derive(Debug, Clone)]
pub struct TrackedMethodCoverage {
    pub coverage: Vec<i32>,
    pub line_visit_status: Vec<LineVisitStatus>,
}

/// Coverage of one source file.
///
/// `line_coverage[n]` holds the number of visits of line `n`, `-1` if the
/// line is not coverable. Index 0 is unused since line numbers start at 1.
#[derive(Debug, Clone)]
pub struct CodeFile {
    path: String,
    line_coverage: Vec<i32>,
    line_visit_status: Vec<LineVisitStatus>,
    branches: Option<BTreeMap<i32, Vec<Branch>>>,
    coverage_by_test_method: BTreeMap<TestMethod, TrackedMethodCoverage>,
    method_metrics: Vec<MethodMetric>,
    code_elements: Vec<CodeElement>,
}

impl CodeFile {
    pub fn new(
        path: impl Into<String>,
        line_coverage: Vec<i32>,
        line_visit_status: Vec<LineVisitStatus>,
    ) -> Self {
        Self::with_branches(path, line_coverage, line_visit_status, None)
    }

    pub fn with_branches(
        path: impl Into<String>,
        line_coverage: Vec<i32>,
        line_visit_status: Vec<LineVisitStatus>,
        branches: Option<BTreeMap<i32, Vec<Branch>>>,
    ) -> Self {
        assert_eq!(
            line_coverage.len(),
            line_visit_status.len(),
            "line coverage and line visit status must cover the same lines"
        );
        CodeFile {
            path: path.into(),
            line_coverage,
            line_visit_status,
            branches,
            coverage_by_test_method: BTreeMap::new(),
            method_metrics: Vec::new(),
            code_elements: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn line_coverage(&self) -> &[i32] {
        &self.line_coverage
    }

    #[must_use]
    pub fn line_visit_status(&self) -> &[LineVisitStatus] {
        &self.line_visit_status
    }

    #[must_use]
    pub fn branches_by_line(&self) -> Option<&BTreeMap<i32, Vec<Branch>>> {
        self.branches.as_ref()
    }

    #[must_use]
    pub fn covered_lines(&self) -> usize {
        self.line_coverage.iter().filter(|&&v| v > 0).count()
    }

    #[must_use]
    pub fn coverable_lines(&self) -> usize {
        self.line_coverage.iter().filter(|&&v| v >= 0).count()
    }

    #[must_use]
    pub fn covered_branches(&self) -> Option<usize> {
        self.branches.as_ref().map(|branches| {
            branches
                .values()
                .flatten()
                .filter(|b| b.branch_visits > 0)
                .count()
        })
    }

    #[must_use]
    pub fn total_branches(&self) -> Option<usize> {
        self.branches
            .as_ref()
            .map(|branches| branches.values().map(Vec::len).sum())
    }

    pub fn coverage_quota(&self, precision: QuotaPrecision) -> Option<f64> {
        precision.quota(self.covered_lines(), self.coverable_lines())
    }

    /// Coverage quota of the lines in `first..=last`, or `None` when the
    /// range lies outside the recorded lines or contains nothing coverable.
    pub fn coverage_quota_in_range(
        &self,
        first_line: i32,
        last_line: i32,
        precision: QuotaPrecision,
    ) -> Option<f64> {
        range_quota(&self.line_visit_status, first_line, last_line, precision)
    }

    #[must_use]
    pub fn method_metrics(&self) -> &[MethodMetric] {
        &self.method_metrics
    }

    #[must_use]
    pub fn code_elements(&self) -> &[CodeElement] {
        &self.code_elements
    }

    #[must_use]
    pub fn total_code_elements(&self) -> usize {
        self.code_elements.len()
    }

    #[must_use]
    pub fn covered_code_elements(&self) -> usize {
        self.code_elements
            .iter()
            .filter(|e| {
                line_window(&self.line_coverage, e.first_line, e.last_line)
                    .iter()
                    .any(|&v| v > 0)
            })
            .count()
    }

    #[must_use]
    pub fn full_covered_code_elements(&self) -> usize {
        self.code_elements
            .iter()
            .filter(|e| {
                line_window(&self.line_coverage, e.first_line, e.last_line)
                    .iter()
                    .all(|&v| v > 0)
            })
            .count()
    }

    #[must_use]
    pub fn coverage_by_test_method(&self) -> &BTreeMap<TestMethod, TrackedMethodCoverage> {
        &self.coverage_by_test_method
    }

    pub fn add_coverage_by_test_method(
        &mut self,
        test_method: TestMethod,
        coverage: TrackedMethodCoverage,
    ) {
        match self.coverage_by_test_method.get_mut(&test_method) {
            Some(existing) => merge_tracked(existing, coverage),
            None => {
                self.coverage_by_test_method.insert(test_method, coverage);
            }
        }
    }

    /// Adds a method metric unless one with the same identity exists.
    pub fn add_method_metric(&mut self, metric: MethodMetric) {
        if !self.method_metrics.contains(&metric) {
            self.method_metrics.push(metric);
        }
    }

    /// Adds a code element unless one with the same identity exists.
    pub fn add_code_element(&mut self, element: CodeElement) {
        if !self.code_elements.contains(&element) {
            self.code_elements.push(element);
        }
    }

    /// Whether both files refer to the same source file. Only the file name
    /// component is compared, case insensitively, so reports generated on
    /// machines with different checkout roots still merge.
    #[must_use]
    pub fn is_same_file(&self, other: &CodeFile) -> bool {
        file_name(&self.path).eq_ignore_ascii_case(file_name(&other.path))
    }

    /// Merges the coverage of another report for the same source file into
    /// this one. Visit counts add up, statuses never get downgraded.
    pub fn merge(&mut self, other: CodeFile, precision: QuotaPrecision) {
        let len = self.line_coverage.len().max(other.line_coverage.len());
        self.line_coverage.resize(len, -1);
        self.line_visit_status
            .resize(len, LineVisitStatus::NotCoverable);

        if let Some(other_branches) = other.branches {
            let branches = self.branches.get_or_insert_with(BTreeMap::new);
            for (line, incoming) in other_branches {
                match branches.get_mut(&line) {
                    Some(existing) => {
                        for branch in incoming {
                            match existing.iter_mut().find(|b| **b == branch) {
                                Some(known) => known.branch_visits += branch.branch_visits,
                                None => existing.push(branch),
                            }
                        }
                    }
                    None => {
                        branches.insert(line, incoming);
                    }
                }
            }
        }

        for (i, &visits) in other.line_coverage.iter().enumerate() {
            if self.line_coverage[i] < 0 {
                self.line_coverage[i] = visits;
            } else if visits > 0 {
                self.line_coverage[i] += visits;
            }
        }

        for (i, &status) in other.line_visit_status.iter().enumerate() {
            let merged = self.line_visit_status[i].max(status);
            self.line_visit_status[i] = merged;
            if merged == LineVisitStatus::PartiallyCovered {
                if let Some(branches) = self.branches.as_ref().and_then(|b| b.get(&(i as i32))) {
                    if branches.iter().all(|b| b.branch_visits > 0) {
                        self.line_visit_status[i] = LineVisitStatus::Covered;
                    }
                }
            }
        }

        for (test_method, coverage) in other.coverage_by_test_method {
            self.add_coverage_by_test_method(test_method, coverage);
        }

        for metric in other.method_metrics {
            match self.method_metrics.iter_mut().find(|m| **m == metric) {
                Some(existing) => existing.merge(metric),
                None => self.method_metrics.push(metric),
            }
        }

        for element in other.code_elements {
            self.add_code_element(element);
        }

        for i in 0..self.code_elements.len() {
            let quota = range_quota(
                &self.line_visit_status,
                self.code_elements[i].first_line,
                self.code_elements[i].last_line,
                precision,
            );
            self.code_elements[i].apply_maximum_coverage_quota(quota);
        }
    }
}

fn merge_tracked(target: &mut TrackedMethodCoverage, other: TrackedMethodCoverage) {
    let len = target.coverage.len().max(other.coverage.len());
    target.coverage.resize(len, -1);
    target
        .line_visit_status
        .resize(len, LineVisitStatus::NotCoverable);

    for (i, &visits) in other.coverage.iter().enumerate() {
        if target.coverage[i] < 0 {
            target.coverage[i] = visits;
        } else if visits > 0 {
            target.coverage[i] += visits;
        }
    }

    for (i, &status) in other.line_visit_status.iter().enumerate() {
        target.line_visit_status[i] = target.line_visit_status[i].max(status);
    }
}

fn range_quota(
    statuses: &[LineVisitStatus],
    first_line: i32,
    last_line: i32,
    precision: QuotaPrecision,
) -> Option<f64> {
    if first_line < 0
        || first_line as usize >= statuses.len()
        || last_line < 0
        || last_line as usize >= statuses.len()
        || first_line > last_line
    {
        return None;
    }

    let range = &statuses[first_line as usize..=last_line as usize];
    let coverable = range
        .iter()
        .filter(|&&s| s != LineVisitStatus::NotCoverable)
        .count();
    let covered = range
        .iter()
        .filter(|&&s| s > LineVisitStatus::NotCovered)
        .count();
    precision.quota(covered, coverable)
}

fn line_window(coverage: &[i32], first_line: i32, last_line: i32) -> &[i32] {
    let count = (i64::from(last_line) - i64::from(first_line) + 1).max(0) as usize;
    let start = coverage.len().min(first_line.max(0) as usize);
    let end = coverage.len().min(start.saturating_add(count));
    &coverage[start..end]
}

fn file_name(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CodeElementType, Metric};
    use LineVisitStatus::{Covered, NotCoverable, NotCovered, PartiallyCovered};

    fn statuses_for(coverage: &[i32]) -> Vec<LineVisitStatus> {
        coverage
            .iter()
            .map(|&v| match v {
                v if v > 0 => Covered,
                0 => NotCovered,
                _ => NotCoverable,
            })
            .collect()
    }

    #[test]
    fn merge_adds_visit_counts_and_extends_shorter_files() {
        let a = vec![-1, -1, -1, 0, 0, 0, 1, 1, 1];
        let b = vec![-1, 0, 1, -1, 0, 1, -1, 0, 1, -1, 0, 1];
        let mut target = CodeFile::new("C:\\temp\\Program.cs", a.clone(), statuses_for(&a));
        let other = CodeFile::new("C:\\temp\\Program.cs", b.clone(), statuses_for(&b));

        target.merge(other, QuotaPrecision::default());

        assert_eq!(
            target.line_coverage(),
            &[-1, 0, 1, 0, 0, 1, 1, 1, 2, -1, 0, 1]
        );
        assert_eq!(target.coverable_lines(), 10);
        assert_eq!(target.covered_lines(), 6);
    }

    #[test]
    fn merge_combines_branches_by_identifier() {
        let coverage = vec![-1, 1, 1];
        let mut left = BTreeMap::new();
        left.insert(1, vec![Branch::new(1, "1"), Branch::new(0, "2")]);
        left.insert(2, vec![Branch::new(0, "3"), Branch::new(2, "4")]);
        let mut target = CodeFile::with_branches(
            "C:\\temp\\Program.cs",
            coverage.clone(),
            statuses_for(&coverage),
            Some(left),
        );

        let mut right = BTreeMap::new();
        right.insert(1, vec![Branch::new(4, "1"), Branch::new(3, "5")]);
        right.insert(3, vec![Branch::new(0, "3"), Branch::new(2, "4")]);
        let other_coverage = vec![-1, 1, 1, 1];
        let other = CodeFile::with_branches(
            "C:\\temp\\Program.cs",
            other_coverage.clone(),
            statuses_for(&other_coverage),
            Some(right),
        );

        target.merge(other, QuotaPrecision::default());

        assert_eq!(target.total_branches(), Some(7));
        assert_eq!(target.covered_branches(), Some(4));
        let line1 = &target.branches_by_line().unwrap()[&1];
        assert_eq!(line1.len(), 3);
        assert_eq!(line1[0].branch_visits, 5);
        assert_eq!(line1[1].branch_visits, 0);
        assert_eq!(line1[2].branch_visits, 3);
    }

    #[test]
    fn merge_upgrades_partially_covered_lines_once_all_branches_are_visited() {
        let coverage = vec![-1, 1, 1];
        let statuses = vec![NotCoverable, PartiallyCovered, PartiallyCovered];

        let mut left = BTreeMap::new();
        left.insert(1, vec![Branch::new(1, "a"), Branch::new(0, "b")]);
        left.insert(2, vec![Branch::new(1, "x"), Branch::new(0, "y")]);
        let mut target = CodeFile::with_branches(
            "C:\\temp\\Program.cs",
            coverage.clone(),
            statuses.clone(),
            Some(left),
        );

        let mut right = BTreeMap::new();
        right.insert(1, vec![Branch::new(2, "b")]);
        right.insert(2, vec![Branch::new(0, "y")]);
        let other = CodeFile::with_branches(
            "C:\\temp\\Program.cs",
            coverage,
            statuses,
            Some(right),
        );

        target.merge(other, QuotaPrecision::default());

        assert_eq!(target.covered_branches(), Some(3));
        assert_eq!(target.total_branches(), Some(4));
        assert_eq!(target.line_visit_status()[1], Covered);
        assert_eq!(target.line_visit_status()[2], PartiallyCovered);
    }

    #[test]
    fn merge_combines_per_test_coverage_of_the_same_test_method() {
        let file_coverage = vec![-1, -1, -1, -1, 0, 0, 0, 1, 1, 1];
        let mut target = CodeFile::new(
            "C:\\temp\\Program.cs",
            file_coverage.clone(),
            statuses_for(&file_coverage),
        );
        let overlay_a = vec![-1, -1, -1, -1, 0, 0, 0, 1, 1, 1];
        target.add_coverage_by_test_method(
            TestMethod::new("Test.Case1()", "Case1()"),
            TrackedMethodCoverage {
                line_visit_status: statuses_for(&overlay_a),
                coverage: overlay_a,
            },
        );

        let mut other = CodeFile::new(
            "C:\\temp\\Program.cs",
            file_coverage.clone(),
            statuses_for(&file_coverage),
        );
        let overlay_b = vec![-1, 0, 1, -1, 1, 0, 1, -1, 1, 0];
        other.add_coverage_by_test_method(
            TestMethod::new("Test.Case1()", "Case1()"),
            TrackedMethodCoverage {
                line_visit_status: statuses_for(&overlay_b),
                coverage: overlay_b,
            },
        );

        target.merge(other, QuotaPrecision::default());

        assert_eq!(target.coverage_by_test_method().len(), 1);
        let merged = &target.coverage_by_test_method()[&TestMethod::new("Test.Case1()", "Case1()")];
        assert_eq!(merged.coverage, vec![-1, 0, 1, -1, 1, 0, 1, 1, 2, 1]);
    }

    #[test]
    fn merge_keeps_per_test_coverage_of_distinct_test_methods_apart() {
        let coverage = vec![-1, 1];
        let mut target = CodeFile::new("a.cs", coverage.clone(), statuses_for(&coverage));
        target.add_coverage_by_test_method(
            TestMethod::new("Test.Case1()", "Case1()"),
            TrackedMethodCoverage {
                coverage: vec![-1, 1],
                line_visit_status: vec![NotCoverable, Covered],
            },
        );

        let mut other = CodeFile::new("a.cs", coverage.clone(), statuses_for(&coverage));
        other.add_coverage_by_test_method(
            TestMethod::new("Test.Case2()", "Case2()"),
            TrackedMethodCoverage {
                coverage: vec![-1, 0],
                line_visit_status: vec![NotCoverable, NotCovered],
            },
        );

        target.merge(other, QuotaPrecision::default());
        assert_eq!(target.coverage_by_test_method().len(), 2);
    }

    #[test]
    fn quota_in_range_rejects_out_of_bounds_ranges() {
        let statuses = vec![NotCoverable, Covered, NotCovered, Covered];
        let file = CodeFile::new("a.cs", vec![-1, 1, 0, 1], statuses);
        let precision = QuotaPrecision::default();

        assert_eq!(file.coverage_quota_in_range(1, 3, precision), Some(66.6));
        assert_eq!(file.coverage_quota_in_range(-1, 2, precision), None);
        assert_eq!(file.coverage_quota_in_range(2, 9, precision), None);
        assert_eq!(file.coverage_quota_in_range(3, 1, precision), None);
    }

    #[test]
    fn partially_covered_lines_count_as_covered_in_range_quotas() {
        let statuses = vec![NotCoverable, PartiallyCovered, NotCovered];
        let file = CodeFile::new("a.cs", vec![-1, 1, 0], statuses);
        assert_eq!(
            file.coverage_quota_in_range(1, 2, QuotaPrecision::default()),
            Some(50.0)
        );
    }

    #[test]
    fn code_element_coverage_counts() {
        let coverage = vec![-1, 0, 1, 1];
        let mut file = CodeFile::new("a.cs", coverage.clone(), statuses_for(&coverage));
        file.add_code_element(CodeElement::new(
            "M1()",
            "M1()",
            CodeElementType::Method,
            1,
            2,
            None,
        ));
        file.add_code_element(CodeElement::new(
            "M2()",
            "M2()",
            CodeElementType::Method,
            2,
            3,
            None,
        ));
        file.add_code_element(CodeElement::new(
            "M3()",
            "M3()",
            CodeElementType::Method,
            1,
            1,
            None,
        ));

        assert_eq!(file.total_code_elements(), 3);
        assert_eq!(file.covered_code_elements(), 2);
        assert_eq!(file.full_covered_code_elements(), 1);
    }

    #[test]
    fn duplicate_metrics_and_elements_are_added_once() {
        let coverage = vec![-1, 1];
        let mut file = CodeFile::new("a.cs", coverage.clone(), statuses_for(&coverage));

        let mut metric = MethodMetric::new("Test()", "Test()").with_line(Some(1));
        metric.add_metric(Metric::line_coverage(Some(10.0)));
        file.add_method_metric(metric.clone());
        file.add_method_metric(metric);
        assert_eq!(file.method_metrics().len(), 1);

        let element = CodeElement::new("Test()", "Test()", CodeElementType::Method, 1, 1, None);
        file.add_code_element(element.clone());
        file.add_code_element(element);
        assert_eq!(file.total_code_elements(), 1);
    }

    #[test]
    fn file_identity_compares_file_names_case_insensitively() {
        let a = CodeFile::new("C:\\temp\\Program.cs", vec![], vec![]);
        let b = CodeFile::new("D:\\other\\PROGRAM.CS", vec![], vec![]);
        let c = CodeFile::new("C:\\temp\\Other.cs", vec![], vec![]);
        assert!(a.is_same_file(&b));
        assert!(!a.is_same_file(&c));
    }
}
