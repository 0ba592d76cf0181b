mod common;

use unicov::analysis::{CodeElementType, LineVisitStatus, ParserResult};
use unicov::ingest::{self, ParseSettings};

fn parse(name: &str) -> ParserResult {
    ingest::parse_files(&[common::fixture(name)], &ParseSettings::default()).unwrap()
}

#[test]
fn lines_branches_and_tracked_tests() {
    let result = parse("opencover.xml");

    assert_eq!(result.parser_name(), "OpenCoverParser");
    assert!(result.supports_branch_coverage);
    // The skipped module is not reported.
    assert_eq!(result.assemblies().len(), 1);

    let assembly = &result.assemblies()[0];
    assert_eq!(assembly.name(), "Test");
    let class = &assembly.classes()[0];
    assert_eq!(class.name(), "Test.TestClass");
    let file = &class.files()[0];
    assert_eq!(file.path(), "C:\\temp\\TestClass.cs");

    assert_eq!(file.coverable_lines(), 5);
    assert_eq!(file.covered_lines(), 4);
    assert_eq!(file.line_coverage()[9], 2);
    assert_eq!(file.line_coverage()[15], 4);
    assert_eq!(file.line_visit_status()[10], LineVisitStatus::PartiallyCovered);
    assert_eq!(file.line_visit_status()[11], LineVisitStatus::NotCovered);
    assert_eq!(file.covered_branches(), Some(1));
    assert_eq!(file.total_branches(), Some(2));

    // Visit counts of the tracked unit test overlay the file.
    let (test_method, coverage) = file.coverage_by_test_method().iter().next().unwrap();
    assert_eq!(test_method.short_name, "Test()");
    assert_eq!(coverage.coverage[9], 2);
    assert_eq!(coverage.coverage[10], -1);
}

#[test]
fn crap_score_is_rounded_to_two_decimal_places() {
    let result = parse("opencover.xml");

    let class = &result.assemblies()[0].classes()[0];
    let metric = class
        .method_metrics()
        .find(|m| m.full_name == "SampleFunction()")
        .unwrap();

    let names: Vec<&str> = metric.metrics().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "Cyclomatic complexity",
            "NPath complexity",
            "Sequence coverage",
            "Branch coverage",
            "Crap Score"
        ]
    );
    let crap = metric.metrics().last().unwrap();
    // 3^2 * (1 - 0.75)^3 + 3
    assert_eq!(crap.value, Some(3.14));
}

#[test]
fn getters_become_property_elements() {
    let result = parse("opencover.xml");

    let class = &result.assemblies()[0].classes()[0];
    let property = class
        .code_elements()
        .find(|e| e.element_type == CodeElementType::Property)
        .unwrap();
    assert_eq!(property.full_name, "get_Count()");
    assert_eq!(property.first_line, 15);
}

#[test]
fn reading_the_same_report_twice_doubles_visits_but_not_branches() {
    let path = common::fixture("opencover.xml");
    let result = ingest::parse_files(&[path.clone(), path], &ParseSettings::default()).unwrap();

    assert_eq!(result.parser_name(), "MultiReportParser (2x OpenCoverParser)");

    let file = &result.assemblies()[0].classes()[0].files()[0];
    assert_eq!(file.line_coverage()[9], 4); // 2 + 2
    assert_eq!(file.line_coverage()[12], 2); // 1 + 1
    assert_eq!(file.line_coverage()[15], 8); // 4 + 4
    assert_eq!(file.coverable_lines(), 5);
    assert_eq!(file.covered_lines(), 4);

    // Branches merge by identifier instead of adding up.
    assert_eq!(file.covered_branches(), Some(1));
    assert_eq!(file.total_branches(), Some(2));
    assert_eq!(file.line_visit_status()[10], LineVisitStatus::PartiallyCovered);

    // The tracked test keeps accumulating.
    let (_, coverage) = file.coverage_by_test_method().iter().next().unwrap();
    assert_eq!(coverage.coverage[9], 4);
}

#[test]
fn a_report_with_two_sessions_merges_into_a_multi_report() {
    let result = parse("opencover_double.xml");

    assert_eq!(result.parser_name(), "MultiReportParser (2x OpenCoverParser)");

    let file = &result.assemblies()[0].classes()[0].files()[0];
    assert_eq!(file.line_coverage()[9], 3); // 1 + 2
    assert_eq!(file.line_coverage()[10], 1); // 0 + 1
    // The second session upgrades line 10.
    assert_eq!(file.line_visit_status()[10], LineVisitStatus::Covered);
}
