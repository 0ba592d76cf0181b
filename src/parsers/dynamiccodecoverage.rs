/// Parser for Dynamic Code Coverage reports (CodeCoverage.exe XML export).
///
/// Dynamic Code Coverage XML structure:
///   <results>
///     <modules>
///       <module name="test.dll" path="...">
///         <functions>
///           <function name="SampleFunction()" namespace="Test"
///                     type_name="TestClass" blocks_covered="4"
///                     blocks_not_covered="2">
///             <ranges>
///               <range source_id="0" covered="yes" start_line="9"
///                      end_line="9" start_column="13" end_column="33"/>
///             </ranges>
///           </function>
///         </functions>
///         <source_files>
///           <source_file id="0" path="C:\temp\TestClass.cs"/>
///         </source_files>
///       </module>
///     </modules>
///   </results>
///
/// A range covers a span of lines in one state: "yes", "partial" or "no".
/// Nested and compiler generated types collapse onto their declaring type
/// through the class name normalizer.
use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::analysis::{
    Assembly, Class, CodeElement, CodeElementType, CodeFile, LineVisitStatus, Metric, MethodMetric,
    ParserResult,
};
use crate::error::Result;
use crate::naming::{parse_dynamic_code_coverage_class_name, DynamicCodeCoverageClassName};
use crate::parsers::{group_by_name, parse_metric_value, CoverageParser, ParserContext};
use crate::xmltree::Element;

struct Range {
    start: i32,
    end: i32,
    visits: i32,
    status: LineVisitStatus,
}

pub struct DynamicCodeCoverageParser;

impl CoverageParser for DynamicCodeCoverageParser {
    fn name(&self) -> &'static str {
        "DynamicCodeCoverageParser"
    }

    fn parse(&self, root: &Element, context: &ParserContext) -> Result<ParserResult> {
        parse(root, context)
    }
}

pub fn parse(root: &Element, context: &ParserContext) -> Result<ParserResult> {
    let modules = root.descendants("module");
    let groups = group_by_name(
        modules
            .iter()
            .filter_map(|m| m.attr("name").map(|n| (n.to_string(), *m))),
    );

    let mut assemblies = Vec::new();
    for (name, elements) in groups {
        if !context.assembly_filter.is_included(&name) {
            continue;
        }
        assemblies.push(process_assembly(&name, &elements, context));
    }

    Ok(ParserResult::new(
        assemblies,
        false,
        "DynamicCodeCoverageParser",
    ))
}

fn process_assembly(name: &str, modules: &[&Element], context: &ParserContext) -> Assembly {
    log::debug!("current assembly: {name}");

    let mut file_paths: BTreeMap<String, String> = BTreeMap::new();
    for module in modules {
        for source_file in module.descendants("source_file") {
            if let (Some(id), Some(path)) = (source_file.attr("id"), source_file.attr("path")) {
                file_paths
                    .entry(id.to_string())
                    .or_insert_with(|| path.to_string());
            }
        }
    }

    let functions: Vec<&Element> = modules
        .iter()
        .flat_map(|m| m.descendants("function"))
        .collect();

    // Functions sharing a normalized type name form one class.
    let mut grouped: Vec<(DynamicCodeCoverageClassName, Vec<&Element>)> = Vec::new();
    for &function in &functions {
        let Some(type_name) = function.attr("type_name") else {
            continue;
        };
        let parsed = parse_dynamic_code_coverage_class_name(type_name, function.attr("namespace"));
        if !parsed.include {
            continue;
        }
        match grouped.iter_mut().find(|(existing, _)| *existing == parsed) {
            Some((_, elements)) => elements.push(function),
            None => grouped.push((parsed, vec![function])),
        }
    }
    grouped.retain(|(class_name, _)| context.class_filter.is_included(&class_name.full_name()));
    grouped.sort_by(|(a, _), (b, _)| a.full_name().cmp(&b.full_name()));

    let classes: Vec<Option<Class>> = grouped
        .par_iter()
        .map(|(class_name, elements)| {
            process_class(class_name, elements, name, &file_paths, context)
        })
        .collect();

    let mut assembly = Assembly::new(name);
    for class in classes.into_iter().flatten() {
        assembly.add_class(class);
    }
    assembly
}

fn process_class(
    class_name: &DynamicCodeCoverageClassName,
    functions: &[&Element],
    assembly_name: &str,
    file_paths: &BTreeMap<String, String>,
    context: &ParserContext,
) -> Option<Class> {
    let mut file_ids: Vec<String> = Vec::new();
    for function in functions {
        for range in function.descendants("range") {
            if let Some(id) = range.attr("source_id") {
                if !file_ids.iter().any(|f| f == id) {
                    file_ids.push(id.to_string());
                }
            }
        }
    }

    let mut files: Vec<(String, String)> = Vec::new();
    for id in file_ids {
        if let Some(path) = file_paths.get(&id) {
            files.push((id, path.clone()));
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

    let mut class = Class::new(class_name.full_name(), assembly_name);
    for (id, path) in filtered {
        class.add_file(process_file(functions, id, path, context));
    }
    Some(class)
}

fn process_file(
    functions: &[&Element],
    file_id: &str,
    file_path: &str,
    context: &ParserContext,
) -> CodeFile {
    let mut ranges: Vec<Range> = Vec::new();
    for function in functions {
        for range in function.descendants("range") {
            if range.attr("source_id") != Some(file_id) {
                continue;
            }
            if let Some(range) = parse_range(range) {
                ranges.push(range);
            }
        }
    }

    let size = ranges
        .iter()
        .map(|r| r.end)
        .max()
        .map_or(0, |end| end as usize + 1);
    let mut line_coverage = vec![-1; size];
    let mut line_visit_status = vec![LineVisitStatus::NotCoverable; size];

    // Ranges of different functions can overlap on shared lines. Visits
    // cap at 1, the most covered status wins.
    for range in &ranges {
        for line in range.start..=range.end {
            let index = line as usize;
            line_coverage[index] = if line_coverage[index] < 0 {
                range.visits
            } else {
                (line_coverage[index] + range.visits).min(1)
            };
            line_visit_status[index] = line_visit_status[index].max(range.status);
        }
    }

    let mut file = CodeFile::new(file_path, line_coverage, line_visit_status);
    for &function in functions {
        process_function(function, file_id, &mut file, context);
    }
    file
}

fn parse_range(range: &Element) -> Option<Range> {
    let start = range.attr("start_line")?.parse::<i32>().ok()?;
    let end = range.attr("end_line")?.parse::<i32>().ok()?;
    if start < 0 || end < start {
        return None;
    }
    let (visits, status) = match range.attr("covered")? {
        "yes" => (1, LineVisitStatus::Covered),
        "partial" => (1, LineVisitStatus::PartiallyCovered),
        _ => (0, LineVisitStatus::NotCovered),
    };
    Some(Range {
        start,
        end,
        visits,
        status,
    })
}

fn process_function(function: &Element, file_id: &str, file: &mut CodeFile, context: &ParserContext) {
    let Some(method_name) = function.attr("name") else {
        return;
    };

    let lines: Vec<(i32, i32)> = function
        .descendants("range")
        .into_iter()
        .filter(|r| r.attr("source_id") == Some(file_id))
        .filter_map(|r| {
            let start = r.attr("start_line")?.parse::<i32>().ok()?;
            let end = r.attr("end_line")?.parse::<i32>().ok()?;
            Some((start, end))
        })
        .collect();
    let Some(first_line) = lines.iter().map(|(start, _)| *start).min() else {
        return;
    };
    let Some(last_line) = lines.iter().map(|(_, end)| *end).max() else {
        return;
    };

    // Function names already carry their argument list, so the short
    // name is the name itself.
    let mut metric =
        MethodMetric::new(method_name, method_name).with_line(Some(first_line));
    if let Some(value) = function.attr("blocks_covered") {
        metric.add_metric(Metric::blocks_covered(parse_metric_value(value)));
    }
    if let Some(value) = function.attr("blocks_not_covered") {
        metric.add_metric(Metric::blocks_not_covered(parse_metric_value(value)));
    }
    file.add_method_metric(metric);

    let quota = file.coverage_quota_in_range(first_line, last_line, context.precision);
    file.add_code_element(CodeElement::new(
        method_name,
        method_name,
        CodeElementType::Method,
        first_line,
        last_line,
        quota,
    ));
}
