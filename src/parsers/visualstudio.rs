/// Parser for Visual Studio coverage reports (CoverageDSPriv XML export).
///
/// Visual Studio XML structure:
///   <CoverageDSPriv>
///     <Module>
///       <ModuleName>test.exe</ModuleName>
///       <NamespaceTable>
///         <NamespaceName>Test</NamespaceName>
///         <Class>
///           <ClassName>TestClass</ClassName>
///           <Method>
///             <MethodName>SampleFunction(string)</MethodName>
///             <BlocksCovered>4</BlocksCovered>
///             <BlocksNotCovered>2</BlocksNotCovered>
///             <Lines>
///               <LnStart>9</LnStart>
///               <LnEnd>9</LnEnd>
///               <Coverage>0</Coverage>
///               <SourceFileID>1</SourceFileID>
///             </Lines>
///           </Method>
///         </Class>
///       </NamespaceTable>
///     </Module>
///     <SourceFileNames>
///       <SourceFileID>1</SourceFileID>
///       <SourceFileName>C:\temp\TestClass.cs</SourceFileName>
///     </SourceFileNames>
///   </CoverageDSPriv>
///
/// A Lines element describes a range of lines sharing one coverage state:
/// 0 is covered, 1 partially covered, everything else not covered.
use std::collections::BTreeMap;
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;

use crate::analysis::{
    Assembly, Class, CodeElement, CodeElementType, CodeFile, LineVisitStatus, Metric, MethodMetric,
    ParserResult,
};
use crate::error::Result;
use crate::parsers::{
    group_by_name, parse_metric_value, short_method_name, CoverageParser, ParserContext,
};
use crate::xmltree::Element;

static COMPILER_GENERATED_CLASS_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?P<compiler_generated_name>.+)>.+__").unwrap());

struct Range {
    start: i32,
    end: i32,
    visits: i32,
    status: LineVisitStatus,
}

pub struct VisualStudioParser;

impl CoverageParser for VisualStudioParser {
    fn name(&self) -> &'static str {
        "VisualStudioParser"
    }

    fn parse(&self, root: &Element, context: &ParserContext) -> Result<ParserResult> {
        parse(root, context)
    }
}

pub fn parse(root: &Element, context: &ParserContext) -> Result<ParserResult> {
    // SourceFileNames elements are siblings of the modules.
    let mut file_paths: BTreeMap<String, String> = BTreeMap::new();
    for names in root.descendants("SourceFileNames") {
        if let (Some(id), Some(path)) = (
            names.child_text("SourceFileID"),
            names.child_text("SourceFileName"),
        ) {
            file_paths.entry(id).or_insert(path);
        }
    }

    let modules = root.descendants("Module");
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
        assemblies.push(process_assembly(&name, &elements, &file_paths, context));
    }

    Ok(ParserResult::new(assemblies, false, "VisualStudioParser"))
}

fn process_assembly(
    name: &str,
    modules: &[&Element],
    file_paths: &BTreeMap<String, String>,
    context: &ParserContext,
) -> Assembly {
    log::debug!("current assembly: {name}");

    // Compiler generated classes normalize to their declaring class and
    // are processed together under that name.
    let mut grouped: Vec<(String, Vec<&Element>)> = Vec::new();
    for module in modules {
        for table in module.descendants("NamespaceTable") {
            let namespace_name = table.child_text("NamespaceName").unwrap_or_default();
            for class in table.elements("Class") {
                let Some(raw_name) = class.child_text("ClassName") else {
                    continue;
                };
                let Some(class_name) = class_name_of(&namespace_name, &raw_name, context.raw_mode)
                else {
                    continue;
                };
                match grouped.iter_mut().find(|(n, _)| *n == class_name) {
                    Some((_, elements)) => elements.push(class),
                    None => grouped.push((class_name, vec![class])),
                }
            }
        }
    }
    grouped.retain(|(n, _)| context.class_filter.is_included(n));
    grouped.sort_by(|(a, _), (b, _)| a.cmp(b));

    let classes: Vec<Option<Class>> = grouped
        .par_iter()
        .map(|(class_name, elements)| {
            process_class(class_name, elements, name, file_paths, context)
        })
        .collect();

    let mut assembly = Assembly::new(name);
    for class in classes.into_iter().flatten() {
        assembly.add_class(class);
    }
    assembly
}

/// Composes the namespace qualified class name. Names of compiler
/// generated classes are cut back to the declaring class, lambda
/// containers are dropped entirely.
fn class_name_of(namespace_name: &str, class_name: &str, raw_mode: bool) -> Option<String> {
    if raw_mode {
        return Some(format!("{namespace_name}.{class_name}"));
    }
    if class_name.starts_with('<') {
        return None;
    }
    match class_name.find(".<") {
        Some(index) => Some(format!("{namespace_name}.{}", &class_name[..index])),
        None => Some(format!("{namespace_name}.{class_name}")),
    }
}

fn process_class(
    class_name: &str,
    class_elements: &[&Element],
    assembly_name: &str,
    file_paths: &BTreeMap<String, String>,
    context: &ParserContext,
) -> Option<Class> {
    // Methods keep the raw name of the class they were declared in so
    // async state machine methods can be collapsed later.
    let mut methods: Vec<(String, &Element)> = Vec::new();
    for class in class_elements {
        let raw_name = class.child_text("ClassName").unwrap_or_default();
        for method in class.descendants("Method") {
            methods.push((raw_name.clone(), method));
        }
    }

    let mut file_ids: Vec<String> = Vec::new();
    for (_, method) in &methods {
        for lines in method.elements("Lines") {
            if let Some(id) = lines.child_text("SourceFileID") {
                if !file_ids.iter().any(|f| *f == id) {
                    file_ids.push(id);
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

    let mut class = Class::new(class_name, assembly_name);
    for (id, path) in filtered {
        class.add_file(process_file(&methods, id, path, context));
    }
    Some(class)
}

fn process_file(
    methods: &[(String, &Element)],
    file_id: &str,
    file_path: &str,
    context: &ParserContext,
) -> CodeFile {
    let mut ranges: Vec<Range> = Vec::new();
    for (_, method) in methods {
        for lines in method
            .elements("Lines")
            .filter(|l| l.child_text("SourceFileID").as_deref() == Some(file_id))
        {
            if let Some(range) = parse_range(lines) {
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

    // Ranges of different methods can overlap on shared lines. Visits cap
    // at 1, the most covered status wins.
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
    for (class_name, method) in methods {
        process_method(class_name, method, file_id, &mut file, context);
    }
    file
}

fn parse_range(lines: &Element) -> Option<Range> {
    let start = lines.child_text("LnStart")?.parse::<i32>().ok()?;
    let end = lines.child_text("LnEnd")?.parse::<i32>().ok()?;
    let coverage = lines.child_text("Coverage")?.parse::<i32>().ok()?;
    if start < 0 || end < start {
        return None;
    }
    let (visits, status) = match coverage {
        0 => (1, LineVisitStatus::Covered),
        1 => (1, LineVisitStatus::PartiallyCovered),
        _ => (0, LineVisitStatus::NotCovered),
    };
    Some(Range {
        start,
        end,
        visits,
        status,
    })
}

fn process_method(
    class_name: &str,
    method: &Element,
    file_id: &str,
    file: &mut CodeFile,
    context: &ParserContext,
) {
    let Some(raw_name) = method.child_text("MethodName") else {
        return;
    };
    let method_name = extract_method_name(class_name, &raw_name, context.raw_mode);

    let lines: Vec<(i32, i32)> = method
        .elements("Lines")
        .filter(|l| l.child_text("SourceFileID").as_deref() == Some(file_id))
        .filter_map(|l| {
            let start = l.child_text("LnStart")?.parse::<i32>().ok()?;
            let end = l.child_text("LnEnd")?.parse::<i32>().ok()?;
            Some((start, end))
        })
        .collect();
    let Some(first_line) = lines.iter().map(|(start, _)| *start).min() else {
        return;
    };
    let Some(last_line) = lines.iter().map(|(_, end)| *end).max() else {
        return;
    };

    let mut metric = MethodMetric::new(method_name.clone(), short_method_name(&method_name))
        .with_line(Some(first_line));
    if let Some(value) = method.child_text("BlocksCovered") {
        metric.add_metric(Metric::blocks_covered(parse_metric_value(&value)));
    }
    if let Some(value) = method.child_text("BlocksNotCovered") {
        metric.add_metric(Metric::blocks_not_covered(parse_metric_value(&value)));
    }
    file.add_method_metric(metric);

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

/// Async state machine methods report as `MoveNext` inside a generated
/// class. They collapse to the name of the method the class was
/// generated for.
fn extract_method_name(class_name: &str, method_name: &str, raw_mode: bool) -> String {
    if raw_mode {
        return method_name.to_string();
    }
    if method_name.contains("MoveNext") {
        if let Some(caps) = COMPILER_GENERATED_CLASS_NAME_RE.captures(class_name) {
            return format!("{}()", &caps["compiler_generated_name"]);
        }
    }
    method_name.to_string()
}
