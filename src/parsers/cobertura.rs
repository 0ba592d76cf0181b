/// Parser for Cobertura XML coverage reports.
///
/// Cobertura XML structure:
///   <coverage line-rate="..." branch-rate="..." timestamp="...">
///     <sources><source>...</source></sources>
///     <packages>
///       <package name="...">
///         <classes>
///           <class name="..." filename="..." line-rate="..." complexity="...">
///             <methods>
///               <method name="..." signature="..." line-rate="...">
///                 <lines><line number="..." hits="..."/></lines>
///               </method>
///             </methods>
///             <lines>
///               <line number="..." hits="..." branch="true"
///                     condition-coverage="50% (1/2)"/>
///             </lines>
///           </class>
///         </classes>
///       </package>
///     </packages>
///   </coverage>
///
/// Packages of the same name become one assembly. Compiler generated
/// classes are folded into the class they were generated for by the name
/// normalizer, so their lines and branches count towards that class.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::DateTime;
use rayon::prelude::*;
use regex::Regex;

use crate::analysis::{
    Assembly, Branch, Class, CodeElement, CodeElementType, CodeFile, LineVisitStatus, Metric,
    MethodMetric, ParserResult,
};
use crate::error::Result;
use crate::naming::{parse_class_name, ClassName};
use crate::parsers::{
    crap_score, group_by_name, parse_metric_value, parse_visits, round_half_away,
    short_method_name, CoverageParser, ParserContext,
};
use crate::xmltree::Element;

/// Pre-compiled regex for condition-coverage attributes like "75% (3/4)".
static CONDITION_COVERAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((?P<covered>\d+)/(?P<total>\d+)\)$").unwrap());

static LAMBDA_METHOD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.+>.+__").unwrap());

static COMPILER_GENERATED_METHOD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<class_name>.+)(/|\.)<(?P<compiler_generated_name>.+)>.+__.+MoveNext\(\)$")
        .unwrap()
});

static LOCAL_FUNCTION_METHOD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*(?P<parent_method_name><.+>).*__(?P<nested_method_name>[^|]+)\|.*$").unwrap()
});

pub struct CoberturaParser;

impl CoverageParser for CoberturaParser {
    fn name(&self) -> &'static str {
        "CoberturaParser"
    }

    fn parse(&self, root: &Element, context: &ParserContext) -> Result<ParserResult> {
        parse(root, context)
    }
}

pub fn parse(root: &Element, context: &ParserContext) -> Result<ParserResult> {
    let packages = root.descendants("package");
    let groups = group_by_name(
        packages
            .iter()
            .filter_map(|p| p.attr("name").map(|n| (n.to_string(), *p))),
    );

    let mut assemblies = Vec::new();
    for (name, elements) in groups {
        if !context.assembly_filter.is_included(&name) {
            continue;
        }
        assemblies.push(process_assembly(&name, &elements, context));
    }

    let mut result = ParserResult::new(assemblies, true, "CoberturaParser");

    for sources in root.descendants("sources") {
        for source in sources.elements("source") {
            let text = source.text();
            if !text.is_empty() {
                result.add_source_directory(text);
            }
        }
    }

    if let Some(seconds) = root.attr("timestamp").and_then(|v| v.parse::<f64>().ok()) {
        if let Some(time_stamp) = DateTime::from_timestamp(seconds.trunc() as i64, 0) {
            result.minimum_time_stamp = Some(time_stamp);
            result.maximum_time_stamp = Some(time_stamp);
        }
    }

    Ok(result)
}

fn process_assembly(name: &str, elements: &[&Element], context: &ParserContext) -> Assembly {
    log::debug!("current assembly: {name}");

    let class_elements: Vec<&Element> = elements
        .iter()
        .flat_map(|e| e.descendants("class"))
        .collect();

    let mut class_names: Vec<ClassName> = Vec::new();
    for element in &class_elements {
        let Some(raw) = element.attr("name") else {
            continue;
        };
        let parsed = parse_class_name(raw, context.raw_mode);
        if !parsed.include || class_names.contains(&parsed) {
            continue;
        }
        class_names.push(parsed);
    }
    class_names.retain(|c| context.class_filter.is_included(&c.name));
    class_names.sort_by(|a, b| a.name.cmp(&b.name));

    let classes: Vec<Option<Class>> = class_names
        .par_iter()
        .map(|class_name| process_class(class_name, &class_elements, name, context))
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
    context: &ParserContext,
) -> Option<Class> {
    let matched: Vec<&Element> = class_elements
        .iter()
        .filter(|e| {
            e.attr("name")
                .is_some_and(|name| belongs_to_class(name, &class_name.name, context.raw_mode))
        })
        .copied()
        .collect();

    let mut files: Vec<String> = Vec::new();
    for element in &matched {
        if let Some(file) = element.attr("filename") {
            if !files.iter().any(|f| f == file) {
                files.push(file.to_string());
            }
        }
    }
    let filtered: Vec<&String> = files
        .iter()
        .filter(|f| context.file_filter.is_included(f))
        .collect();

    // A class keeps its place if it has no file information at all and no
    // file filters are set, or if at least one of its files passed them.
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
    for file in filtered {
        class.add_file(process_file(&matched, file, context));
    }
    Some(class)
}

/// A class element belongs to a normalized class when its name is the
/// class name itself or a compiler generated extension of it.
fn belongs_to_class(element_name: &str, class_name: &str, raw_mode: bool) -> bool {
    if element_name == class_name {
        return true;
    }
    if raw_mode {
        return false;
    }
    match element_name.strip_prefix(class_name) {
        Some(rest) => matches!(rest.chars().next(), Some(',' | '/' | '.')),
        None => false,
    }
}

fn process_file(class_elements: &[&Element], file_path: &str, context: &ParserContext) -> CodeFile {
    let relevant: Vec<&Element> = class_elements
        .iter()
        .filter(|e| e.attr("filename") == Some(file_path))
        .copied()
        .collect();

    let class_lines: Vec<&Element> = relevant
        .iter()
        .flat_map(|e| e.elements("lines"))
        .flat_map(|lines| lines.elements("line"))
        .collect();

    // Lines nested in methods only count when the class level does not
    // list the same line number. Numbers are compared as strings, exactly
    // as reported.
    let class_line_numbers: BTreeSet<&str> =
        class_lines.iter().filter_map(|l| l.attr("number")).collect();

    let method_lines: Vec<&Element> = relevant
        .iter()
        .flat_map(|e| e.elements("methods"))
        .flat_map(|m| m.elements("method"))
        .flat_map(|m| m.elements("lines"))
        .flat_map(|lines| lines.elements("line"))
        .filter(|l| {
            l.attr("number")
                .is_some_and(|n| !class_line_numbers.contains(n))
        })
        .collect();

    let mut entries: Vec<(i32, i32)> = Vec::new();
    for line in class_lines.iter().chain(method_lines.iter()) {
        let Some(number) = line.attr("number").and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let Some(visits) = line.attr("hits").and_then(parse_visits) else {
            continue;
        };
        if number < 0 {
            continue;
        }
        entries.push((number, visits));
    }
    entries.sort_by_key(|(number, _)| *number);

    let branches = collect_branches(&class_lines);

    let size = entries.last().map_or(0, |(number, _)| *number as usize + 1);
    let mut line_coverage = vec![-1; size];
    let mut line_visit_status = vec![LineVisitStatus::NotCoverable; size];

    for (number, visits) in &entries {
        let index = *number as usize;
        line_coverage[index] = *visits;
        line_visit_status[index] = if *visits > 0 {
            let partially = branches
                .get(number)
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

    let mut file = CodeFile::with_branches(file_path, line_coverage, line_visit_status, Some(branches));

    for element in &relevant {
        let element_class_name = element.attr("name").unwrap_or_default();
        for methods in element.elements("methods") {
            for method in methods.elements("method") {
                process_method(method, element_class_name, &mut file, context);
            }
        }
    }

    file
}

fn collect_branches(class_lines: &[&Element]) -> BTreeMap<i32, Vec<Branch>> {
    let mut branches: BTreeMap<i32, Vec<Branch>> = BTreeMap::new();

    for line in class_lines {
        let is_branch = line
            .attr("branch")
            .is_some_and(|b| b.eq_ignore_ascii_case("true"));
        let Some(condition_coverage) = line.attr("condition-coverage") else {
            continue;
        };
        if !is_branch {
            continue;
        }
        let Some(caps) = CONDITION_COVERAGE_RE.captures(condition_coverage) else {
            continue;
        };
        let Some(number) = line.attr("number").and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let (Ok(covered), Ok(total)) = (
            caps["covered"].parse::<i32>(),
            caps["total"].parse::<i32>(),
        ) else {
            continue;
        };
        if number < 0 {
            continue;
        }

        let new_branches: Vec<Branch> = (0..total)
            .map(|i| Branch::new(i32::from(i < covered), format!("{number}_{i}")))
            .collect();

        // Partial classes can report the same branching line twice. The
        // entry with more covered branches wins, ties keep the first.
        match branches.get(&number) {
            Some(existing) => {
                let existing_covered =
                    existing.iter().filter(|b| b.branch_visits == 1).count() as i32;
                if covered > existing_covered {
                    branches.insert(number, new_branches);
                }
            }
            None => {
                branches.insert(number, new_branches);
            }
        }
    }

    branches
}

fn process_method(
    method: &Element,
    element_class_name: &str,
    file: &mut CodeFile,
    context: &ParserContext,
) {
    let full_name = format!(
        "{}{}",
        method.attr("name").unwrap_or_default(),
        method.attr("signature").unwrap_or_default()
    );
    let method_name = extract_method_name(&full_name, element_class_name, context.raw_mode);
    if !context.raw_mode
        && method_name.contains("__")
        && LAMBDA_METHOD_NAME_RE.is_match(&method_name)
    {
        return;
    }

    let line_elements: Vec<&Element> = method
        .elements("lines")
        .flat_map(|lines| lines.elements("line"))
        .collect();
    let first_line = line_elements
        .first()
        .and_then(|l| l.attr("number"))
        .and_then(|n| n.parse::<i32>().ok());
    let last_line = line_elements
        .last()
        .and_then(|l| l.attr("number"))
        .and_then(|n| n.parse::<i32>().ok());

    let mut metric =
        MethodMetric::new(method_name.clone(), short_method_name(&method_name)).with_line(first_line);

    if let Some(rate) = method.attr("line-rate") {
        metric.add_metric(Metric::line_coverage(
            parse_metric_value(rate).map(|v| round_half_away(v * 100.0, 2)),
        ));
    }
    if let Some(rate) = method.attr("branch-rate") {
        metric.add_metric(Metric::branch_coverage(
            parse_metric_value(rate).map(|v| round_half_away(v * 100.0, 2)),
        ));
    }
    if let Some(complexity) = method.attr("complexity") {
        metric.insert_metric(
            0,
            Metric::cyclomatic_complexity(
                parse_metric_value(complexity).map(|v| round_half_away(v, 2)),
            ),
        );
    }

    let complexity_value = metric_value(&metric, "Cyclomatic complexity");
    let coverage_value = metric_value(&metric, "Line coverage");
    if let (Some(complexity), Some(coverage)) = (complexity_value, coverage_value) {
        metric.insert_metric(
            0,
            Metric::crap_score(Some(round_half_away(crap_score(complexity, coverage), 0))),
        );
    }

    file.add_method_metric(metric);

    if let (Some(first_line), Some(last_line)) = (first_line, last_line) {
        let element_type = if method_name.starts_with("get_") || method_name.starts_with("set_") {
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

/// Collapses compiler generated method names to the name of the method
/// they were generated for. Async state machines report as `MoveNext()`
/// inside a generated class, local functions carry a `|` marker.
fn extract_method_name(method_name: &str, class_name: &str, raw_mode: bool) -> String {
    if raw_mode {
        return method_name.to_string();
    }
    let combined = format!("{class_name}{method_name}");
    if class_name.contains('|') || method_name.contains('|') {
        if let Some(caps) = LOCAL_FUNCTION_METHOD_NAME_RE.captures(&combined) {
            return format!("{}()", &caps["nested_method_name"]);
        }
    }
    if method_name.ends_with("MoveNext()") {
        if let Some(caps) = COMPILER_GENERATED_METHOD_NAME_RE.captures(&combined) {
            return format!("{}()", &caps["compiler_generated_name"]);
        }
    }
    method_name.to_string()
}
