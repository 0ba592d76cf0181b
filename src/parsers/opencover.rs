/// Parser for OpenCover XML coverage reports.
///
/// OpenCover XML structure:
///   <CoverageSession>
///     <Modules>
///       <Module hash="...">
///         <ModuleName>Test</ModuleName>
///         <Files><File uid="1" fullPath="C:\temp\TestClass.cs"/></Files>
///         <Classes>
///           <Class>
///             <FullName>Test.TestClass</FullName>
///             <Methods>
///               <Method cyclomaticComplexity="..." sequenceCoverage="...">
///                 <Name>System.Void Test.TestClass::SampleFunction()</Name>
///                 <FileRef uid="1"/>
///                 <SequencePoints>
///                   <SequencePoint vc="1" sl="9">
///                     <TrackedMethodRefs>
///                       <TrackedMethodRef uid="1" vc="1"/>
///                     </TrackedMethodRefs>
///                   </SequencePoint>
///                 </SequencePoints>
///                 <BranchPoints>
///                   <BranchPoint vc="1" sl="9" path="0" offset="3"/>
///                 </BranchPoints>
///                 <MethodPoint vc="1" sl="9"/>
///               </Method>
///             </Methods>
///           </Class>
///         </Classes>
///         <TrackedMethods>
///           <TrackedMethod uid="1" name="...::Test()"/>
///         </TrackedMethods>
///       </Module>
///     </Modules>
///   </CoverageSession>
///
/// Modules sharing a name become one assembly. Compiler generated classes
/// normalize to the class they were generated for, so async state machines
/// contribute their lines to the declaring class.
use std::collections::BTreeMap;
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;

use crate::analysis::{
    Assembly, Branch, Class, CodeElement, CodeElementType, CodeFile, LineVisitStatus, Metric,
    MethodMetric, ParserResult, TestMethod, TrackedMethodCoverage,
};
use crate::error::Result;
use crate::naming::{parse_class_name, ClassName};
use crate::parsers::{
    crap_score, group_by_name, parse_metric_value, parse_visits, round_half_away,
    short_method_name, CoverageParser, ParserContext,
};
use crate::xmltree::Element;

static LAMBDA_METHOD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::<.+>.+__").unwrap());

static COMPILER_GENERATED_METHOD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<class_name>.+)(/|\.)<(?P<compiler_generated_name>.+)>.+__.+::MoveNext\(\)$")
        .unwrap()
});

static LOCAL_FUNCTION_METHOD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^.*(?P<parent_method_name><.+>).*__(?P<nested_method_name>[^|]+)\|.*\((?P<arguments>.*)\)$",
    )
    .unwrap()
});

static METHOD_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*::(?P<method_name>.+)\((?P<arguments>.*)\)$").unwrap());

pub struct OpenCoverParser;

impl CoverageParser for OpenCoverParser {
    fn name(&self) -> &'static str {
        "OpenCoverParser"
    }

    fn parse(&self, root: &Element, context: &ParserContext) -> Result<ParserResult> {
        parse(root, context)
    }
}

pub fn parse(root: &Element, context: &ParserContext) -> Result<ParserResult> {
    let modules: Vec<&Element> = root
        .descendants("Module")
        .into_iter()
        .filter(|m| m.attr("skippedDueTo").is_none())
        .collect();

    let groups = group_by_name(
        modules
            .iter()
            .filter_map(|m| m.child_text("ModuleName").map(|n| (n, *m))),
    );

    let mut assemblies = Vec::new();
    for (name, elements) in groups {
        if !context.assembly_filter.is_included(&name) {
            continue;
        }
        assemblies.push(process_assembly(&name, &elements, context));
    }

    Ok(ParserResult::new(assemblies, true, "OpenCoverParser"))
}

fn process_assembly(name: &str, modules: &[&Element], context: &ParserContext) -> Assembly {
    log::debug!("current assembly: {name}");

    // File uids and tracked method uids are unique per module but the
    // lookup spans all modules of the assembly, first entry wins.
    let mut file_paths: BTreeMap<String, String> = BTreeMap::new();
    let mut tracked_methods: BTreeMap<String, String> = BTreeMap::new();
    for module in modules {
        for file in module.descendants("File") {
            if let (Some(uid), Some(path)) = (file.attr("uid"), file.attr("fullPath")) {
                file_paths
                    .entry(uid.to_string())
                    .or_insert_with(|| path.to_string());
            }
        }
        for tracked in module.descendants("TrackedMethod") {
            if let (Some(uid), Some(method_name)) = (tracked.attr("uid"), tracked.attr("name")) {
                tracked_methods
                    .entry(uid.to_string())
                    .or_insert_with(|| method_name.to_string());
            }
        }
    }

    let class_elements: Vec<&Element> = modules
        .iter()
        .flat_map(|m| m.descendants("Class"))
        .filter(|c| c.attr("skippedDueTo").is_none())
        .collect();

    // Class elements of generated classes normalize to the same name as
    // their declaring class and are processed together.
    let mut grouped: Vec<(ClassName, Vec<&Element>)> = Vec::new();
    for element in &class_elements {
        let Some(full_name) = element.child_text("FullName") else {
            continue;
        };
        let parsed = parse_class_name(&full_name, context.raw_mode);
        if !parsed.include {
            continue;
        }
        match grouped.iter_mut().find(|(existing, _)| *existing == parsed) {
            Some((_, elements)) => elements.push(element),
            None => grouped.push((parsed, vec![element])),
        }
    }
    grouped.retain(|(c, _)| context.class_filter.is_included(&c.name));
    grouped.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));

    let classes: Vec<Option<Class>> = grouped
        .par_iter()
        .map(|(class_name, elements)| {
            process_class(
                class_name,
                elements,
                name,
                &file_paths,
                &tracked_methods,
                context,
            )
        })
        .collect();

    let mut assembly = Assembly::new(name);
    for class in classes.into_iter().flatten() {
        assembly.add_class(class);
    }
    assembly
}

fn process_class(
    class_name: &ClassName,
    class_elements: &[&Element],
    assembly_name: &str,
    file_paths: &BTreeMap<String, String>,
    tracked_methods: &BTreeMap<String, String>,
    context: &ParserContext,
) -> Option<Class> {
    let methods: Vec<&Element> = class_elements
        .iter()
        .flat_map(|c| c.descendants("Method"))
        .collect();

    let mut file_ids: Vec<String> = Vec::new();
    for method in &methods {
        if let Some(uid) = method.child("FileRef").and_then(|f| f.attr("uid")) {
            if !file_ids.iter().any(|id| id == uid) {
                file_ids.push(uid.to_string());
            }
        }
    }

    // Uids without a File entry have no path to report against.
    let mut files: Vec<(String, String)> = Vec::new();
    for uid in file_ids {
        if let Some(path) = file_paths.get(&uid) {
            files.push((uid, path.clone()));
        }
    }
    let filtered: Vec<&(String, String)> = files
        .iter()
        .filter(|(_, path)| context.file_filter.is_included(path))
        .collect();

    let keep =
        (files.is_empty() && !context.file_filter.has_custom_filters()) || !filtered.is_empty();
    if !keep {
        return None;
    }

    let mut class = Class::with_raw_name(
        class_name.display_name.clone(),
        class_name.raw_name.clone(),
        assembly_name,
    );
    for (uid, path) in filtered {
        class.add_file(process_file(&methods, uid, path, tracked_methods, context));
    }
    Some(class)
}

fn process_file(
    methods: &[&Element],
    file_id: &str,
    file_path: &str,
    tracked_methods: &BTreeMap<String, String>,
    context: &ParserContext,
) -> CodeFile {
    let file_methods: Vec<&Element> = methods
        .iter()
        .filter(|m| m.child("FileRef").and_then(|f| f.attr("uid")) == Some(file_id))
        .copied()
        .collect();

    // Visit counts of all points of the file, summed per line. Methods
    // without sequence points still carry a single MethodPoint.
    let mut line_visits: BTreeMap<i32, i32> = BTreeMap::new();
    for &method in &file_methods {
        let mut had_sequence_points = false;
        for point in sequence_points(method) {
            had_sequence_points = true;
            if let Some((line, visits)) = parse_point(point) {
                accumulate(&mut line_visits, line, visits);
            }
        }
        if !had_sequence_points {
            if let Some((line, visits)) = method.child("MethodPoint").and_then(parse_point) {
                accumulate(&mut line_visits, line, visits);
            }
        }
    }

    let mut branches: BTreeMap<i32, Vec<Branch>> = BTreeMap::new();
    for method in &file_methods {
        for point in method
            .elements("BranchPoints")
            .flat_map(|b| b.elements("BranchPoint"))
        {
            let Some((line, visits)) = parse_point(point) else {
                continue;
            };
            let path = point.attr("path").unwrap_or_default();
            let offset = point.attr("offset").unwrap_or_default();
            let identifier = format!("{line}_{path}_{offset}");
            let entry = branches.entry(line).or_default();
            match entry.iter_mut().find(|b| b.identifier == identifier) {
                Some(existing) => {
                    existing.branch_visits = existing.branch_visits.saturating_add(visits);
                }
                None => entry.push(Branch::new(visits, identifier)),
            }
        }
    }

    let size = line_visits
        .keys()
        .next_back()
        .map_or(0, |line| *line as usize + 1);
    let mut line_coverage = vec![-1; size];
    let mut line_visit_status = vec![LineVisitStatus::NotCoverable; size];
    for (line, visits) in &line_visits {
        let index = *line as usize;
        line_coverage[index] = *visits;
        line_visit_status[index] = if *visits > 0 {
            let partially = branches
                .get(line)
                .is_some_and(|b| b.iter().any(|branch| branch.branch_visits == 0));
            if partially {
                LineVisitStatus::PartiallyCovered
            } else {
                LineVisitStatus::Covered
            }
        } else {
            LineVisitStatus::NotCovered
        };
    }

    let mut file =
        CodeFile::with_branches(file_path, line_coverage, line_visit_status, Some(branches));

    for (uid, visits_by_line) in collect_tracked_visits(&file_methods) {
        let Some(tracked_name) = tracked_methods.get(&uid) else {
            continue;
        };
        let mut coverage = vec![-1; file.line_coverage().len()];
        let mut status = vec![LineVisitStatus::NotCoverable; coverage.len()];
        for (line, visits) in visits_by_line {
            let index = line as usize;
            if index >= coverage.len() {
                continue;
            }
            coverage[index] = visits;
            status[index] = if visits > 0 {
                LineVisitStatus::Covered
            } else {
                LineVisitStatus::NotCovered
            };
        }
        file.add_coverage_by_test_method(
            TestMethod::new(tracked_name.clone(), short_test_name(tracked_name)),
            TrackedMethodCoverage {
                coverage,
                line_visit_status: status,
            },
        );
    }

    for &method in &file_methods {
        process_method(method, &mut file, context);
    }

    file
}

fn sequence_points<'a>(method: &'a Element) -> impl Iterator<Item = &'a Element> {
    method
        .elements("SequencePoints")
        .flat_map(|s| s.elements("SequencePoint"))
}

fn parse_point(element: &Element) -> Option<(i32, i32)> {
    let line = element.attr("sl")?.parse::<i32>().ok()?;
    let visits = element.attr("vc").and_then(parse_visits)?;
    (line >= 0).then_some((line, visits))
}

fn accumulate(line_visits: &mut BTreeMap<i32, i32>, line: i32, visits: i32) {
    line_visits
        .entry(line)
        .and_modify(|v| *v = v.saturating_add(visits))
        .or_insert(visits);
}

/// Visit counts per tracked test method, summed per line.
fn collect_tracked_visits(file_methods: &[&Element]) -> BTreeMap<String, BTreeMap<i32, i32>> {
    let mut tracked: BTreeMap<String, BTreeMap<i32, i32>> = BTreeMap::new();
    for &method in file_methods {
        for point in sequence_points(method) {
            let Some((line, _)) = parse_point(point) else {
                continue;
            };
            for reference in point
                .elements("TrackedMethodRefs")
                .flat_map(|t| t.elements("TrackedMethodRef"))
            {
                let Some(uid) = reference.attr("uid") else {
                    continue;
                };
                let Some(visits) = reference.attr("vc").and_then(parse_visits) else {
                    continue;
                };
                accumulate(tracked.entry(uid.to_string()).or_default(), line, visits);
            }
        }
    }
    tracked
}

fn process_method(method: &Element, file: &mut CodeFile, context: &ParserContext) {
    let Some(full_name) = method.child_text("Name") else {
        return;
    };
    if !context.raw_mode
        && full_name.contains("__")
        && LAMBDA_METHOD_NAME_RE.is_match(&full_name)
    {
        return;
    }
    let method_name = extract_method_name(&full_name, context.raw_mode);

    let point_lines: Vec<i32> = sequence_points(method)
        .filter_map(|sp| sp.attr("sl").and_then(|v| v.parse::<i32>().ok()))
        .collect();
    let metric_line = point_lines.first().copied();

    let mut metric =
        MethodMetric::new(method_name.clone(), short_method_name(&method_name)).with_line(metric_line);

    if let Some(value) = method.attr("cyclomaticComplexity") {
        metric.add_metric(Metric::cyclomatic_complexity(parse_metric_value(value)));
    }
    if let Some(value) = method.attr("nPathComplexity") {
        metric.add_metric(Metric::npath_complexity(parse_metric_value(value)));
    }
    if let Some(value) = method.attr("sequenceCoverage") {
        metric.add_metric(Metric::sequence_coverage(parse_metric_value(value)));
    }
    if let Some(value) = method.attr("branchCoverage") {
        metric.add_metric(Metric::branch_coverage(parse_metric_value(value)));
    }

    let complexity = metric_value(&metric, "Cyclomatic complexity");
    let coverage = metric_value(&metric, "Sequence coverage");
    if let (Some(complexity), Some(coverage)) = (complexity, coverage) {
        metric.add_metric(Metric::crap_score(Some(round_half_away(
            crap_score(complexity, coverage),
            2,
        ))));
    }

    file.add_method_metric(metric);

    let first_line = point_lines.iter().min().copied();
    let last_line = point_lines.iter().max().copied();
    if let (Some(first_line), Some(last_line)) = (first_line, last_line) {
        let is_property = method.attr("isGetter") == Some("true")
            || method.attr("isSetter") == Some("true");
        let element_type = if is_property {
            CodeElementType::Property
        } else {
            CodeElementType::Method
        };
        let quota = file.coverage_quota_in_range(first_line, last_line, context.precision);
        file.add_code_element(CodeElement::new(
            method_name.clone(),
            method_name,
            element_type,
            first_line,
            last_line,
            quota,
        ));
    }
}

fn metric_value(metric: &MethodMetric, name: &str) -> Option<f64> {
    metric
        .metrics()
        .iter()
        .find(|m| m.name == name)
        .and_then(|m| m.value)
}

/// Extracts the plain method name from a full OpenCover method name like
/// "System.Void Test.TestClass::SampleFunction(string)". Compiler
/// generated names collapse to the method they were generated for.
fn extract_method_name(full_name: &str, raw_mode: bool) -> String {
    if raw_mode {
        return full_name.to_string();
    }
    if full_name.contains('|') {
        if let Some(caps) = LOCAL_FUNCTION_METHOD_NAME_RE.captures(full_name) {
            return format!("{}({})", &caps["nested_method_name"], &caps["arguments"]);
        }
    }
    if full_name.ends_with("::MoveNext()") {
        if let Some(caps) = COMPILER_GENERATED_METHOD_NAME_RE.captures(full_name) {
            return format!("{}()", &caps["compiler_generated_name"]);
        }
    }
    if let Some(caps) = METHOD_NAME_RE.captures(full_name) {
        return format!("{}({})", &caps["method_name"], &caps["arguments"]);
    }
    full_name.to_string()
}

fn short_test_name(full_name: &str) -> String {
    match full_name.rfind("::") {
        Some(index) => full_name[index + 2..].to_string(),
        None => full_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_context;
    use crate::xmltree::collect_named;

    fn parse_report(xml: &str) -> ParserResult {
        let root = collect_named(xml.as_bytes(), "CoverageSession")
            .unwrap()
            .remove(0);
        parse(&root, &test_context()).unwrap()
    }

    const REPORT: &str = r#"<CoverageSession>
<Modules>
<Module hash="A">
<ModuleName>Test</ModuleName>
<Files><File uid="1" fullPath="C:\temp\TestClass.cs"/></Files>
<Classes>
<Class>
<FullName>Test.TestClass</FullName>
<Methods>
<Method cyclomaticComplexity="3" nPathComplexity="2" sequenceCoverage="75" branchCoverage="50">
<Name>System.Void Test.TestClass::SampleFunction()</Name>
<FileRef uid="1"/>
<SequencePoints>
<SequencePoint vc="2" sl="9">
<TrackedMethodRefs><TrackedMethodRef uid="1" vc="2"/></TrackedMethodRefs>
</SequencePoint>
<SequencePoint vc="1" sl="10"/>
<SequencePoint vc="0" sl="11"/>
<SequencePoint vc="1" sl="12"/>
</SequencePoints>
<BranchPoints>
<BranchPoint vc="1" sl="9" path="0" offset="3"/>
<BranchPoint vc="0" sl="9" path="1" offset="3"/>
</BranchPoints>
<MethodPoint vc="4" sl="9"/>
</Method>
</Methods>
</Class>
</Classes>
<TrackedMethods>
<TrackedMethod uid="1" name="System.Void TestNamespace.UnitTest::Test()"/>
</TrackedMethods>
</Module>
</Modules>
</CoverageSession>"#;

    #[test]
    fn test_extract_method_name() {
        assert_eq!(
            extract_method_name("System.Void Test.TestClass::SampleFunction(string)", false),
            "SampleFunction(string)"
        );
        assert_eq!(
            extract_method_name(
                "System.Void Test.AsyncClass/<SendAsync>d__0::MoveNext()",
                false
            ),
            "SendAsync()"
        );
        assert_eq!(
            extract_method_name(
                "System.Void Test.TestClass::<MyMethod>g__MyLocalFunction|0_0(System.String)",
                false
            ),
            "MyLocalFunction(System.String)"
        );
        assert_eq!(
            extract_method_name("System.Void Test.AsyncClass/<SendAsync>d__0::MoveNext()", true),
            "System.Void Test.AsyncClass/<SendAsync>d__0::MoveNext()"
        );
    }

    #[test]
    fn test_line_coverage_and_branches() {
        let result = parse_report(REPORT);

        let assembly = &result.assemblies()[0];
        assert_eq!(assembly.name(), "Test");
        let file = &assembly.classes()[0].files()[0];
        assert_eq!(file.coverable_lines(), 4);
        assert_eq!(file.covered_lines(), 3);
        // MethodPoint is ignored when sequence points exist.
        assert_eq!(file.line_coverage()[9], 2);
        assert_eq!(file.total_branches(), Some(2));
        assert_eq!(file.covered_branches(), Some(1));
        assert_eq!(
            file.line_visit_status()[9],
            LineVisitStatus::PartiallyCovered
        );
        assert_eq!(file.line_visit_status()[10], LineVisitStatus::Covered);
        assert_eq!(file.line_visit_status()[11], LineVisitStatus::NotCovered);
        assert!(result.supports_branch_coverage);
    }

    #[test]
    fn test_method_metrics_with_crap_score_from_sequence_coverage() {
        let result = parse_report(REPORT);

        let class = &result.assemblies()[0].classes()[0];
        let metric = class.method_metrics().next().unwrap();
        assert_eq!(metric.full_name, "SampleFunction()");
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
        // Coverage attributes are percentages already.
        assert_eq!(metric.metrics()[2].value, Some(75.0));
        assert_eq!(metric.metrics()[4].value, Some(3.14));
    }

    #[test]
    fn test_coverage_by_test_method() {
        let result = parse_report(REPORT);

        let file = &result.assemblies()[0].classes()[0].files()[0];
        assert_eq!(file.coverage_by_test_method().len(), 1);
        let (test_method, coverage) = file.coverage_by_test_method().iter().next().unwrap();
        assert_eq!(test_method.short_name, "Test()");
        assert_eq!(coverage.coverage[9], 2);
        assert_eq!(coverage.coverage[10], -1);
    }

    #[test]
    fn test_generated_classes_merge_into_their_declaring_class() {
        let result = parse_report(
            r#"<CoverageSession>
<Modules>
<Module hash="A">
<ModuleName>Test</ModuleName>
<Files><File uid="1" fullPath="C:\temp\AsyncClass.cs"/></Files>
<Classes>
<Class>
<FullName>Test.AsyncClass</FullName>
<Methods>
<Method><Name>System.Void Test.AsyncClass::.ctor()</Name>
<FileRef uid="1"/>
<SequencePoints><SequencePoint vc="1" sl="3"/></SequencePoints>
</Method>
</Methods>
</Class>
<Class>
<FullName>Test.AsyncClass/&lt;SendAsync&gt;d__0</FullName>
<Methods>
<Method><Name>System.Void Test.AsyncClass/&lt;SendAsync&gt;d__0::MoveNext()</Name>
<FileRef uid="1"/>
<SequencePoints><SequencePoint vc="1" sl="7"/><SequencePoint vc="0" sl="8"/></SequencePoints>
</Method>
</Methods>
</Class>
</Classes>
</Module>
</Modules>
</CoverageSession>"#,
        );

        let classes = result.assemblies()[0].classes();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name(), "Test.AsyncClass");
        let file = &classes[0].files()[0];
        assert_eq!(file.coverable_lines(), 3);
        assert_eq!(file.covered_lines(), 2);
        // The state machine method reports under the name it was
        // generated for.
        let names: Vec<&str> = classes[0]
            .method_metrics()
            .map(|m| m.full_name.as_str())
            .collect();
        assert!(names.contains(&"SendAsync()"));
    }

    #[test]
    fn test_method_point_is_used_when_sequence_points_are_missing() {
        let result = parse_report(
            r#"<CoverageSession>
<Modules>
<Module hash="A">
<ModuleName>Test</ModuleName>
<Files><File uid="1" fullPath="C:\temp\TestClass.cs"/></Files>
<Classes>
<Class>
<FullName>Test.TestClass</FullName>
<Methods>
<Method>
<Name>System.Void Test.TestClass::SampleFunction()</Name>
<FileRef uid="1"/>
<SequencePoints/>
<MethodPoint vc="4" sl="9"/>
</Method>
</Methods>
</Class>
</Classes>
</Module>
</Modules>
</CoverageSession>"#,
        );

        let file = &result.assemblies()[0].classes()[0].files()[0];
        assert_eq!(file.line_coverage()[9], 4);
        assert_eq!(file.coverable_lines(), 1);
    }

    #[test]
    fn test_skipped_modules_and_classes_are_ignored() {
        let result = parse_report(
            r#"<CoverageSession>
<Modules>
<Module hash="A" skippedDueTo="Filter">
<ModuleName>Skipped</ModuleName>
</Module>
<Module hash="B">
<ModuleName>Test</ModuleName>
<Files><File uid="1" fullPath="C:\temp\TestClass.cs"/></Files>
<Classes>
<Class skippedDueTo="Filter"><FullName>Test.SkippedClass</FullName></Class>
<Class>
<FullName>Test.TestClass</FullName>
<Methods>
<Method><Name>System.Void Test.TestClass::SampleFunction()</Name>
<FileRef uid="1"/>
<SequencePoints><SequencePoint vc="1" sl="9"/></SequencePoints>
</Method>
</Methods>
</Class>
</Classes>
</Module>
</Modules>
</CoverageSession>"#,
        );

        assert_eq!(result.assemblies().len(), 1);
        let classes = result.assemblies()[0].classes();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name(), "Test.TestClass");
    }
}
