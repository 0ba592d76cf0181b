/// Parser for dotCover reports in DetailedXml format.
///
/// dotCover XML structure:
///   <Root ReportType="DetailedXml" DotCoverVersion="...">
///     <FileIndices>
///       <File Index="1" Name="C:\temp\TestClass.cs"/>
///     </FileIndices>
///     <Assembly Name="Test" CoveragePercent="...">
///       <Namespace Name="Test">
///         <Type Name="TestClass" CoveragePercent="...">
///           <Method Name="SampleFunction():void">
///             <Statement FileIndex="1" Line="9" EndLine="9" Covered="True"/>
///           </Method>
///           <Type Name="NestedClass">...</Type>
///         </Type>
///       </Namespace>
///     </Assembly>
///   </Root>
///
/// Types directly below an assembly have no namespace prefix. Nested types
/// belong to their declaring type, compiler generated types contribute
/// their statements to the type they were generated for.
use std::collections::BTreeMap;
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;

use crate::analysis::{
    Assembly, Class, CodeElement, CodeElementType, CodeFile, LineVisitStatus, ParserResult,
};
use crate::error::{CovError, Result};
use crate::parsers::{CoverageParser, ParserContext};
use crate::xmltree::Element;

static GENERATED_CLASS_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<.*>.+__").unwrap());

static COMPILER_GENERATED_METHOD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?P<compiler_generated_name>.+)>.+__.+MoveNext\(\):.+$").unwrap()
});

static LOCAL_FUNCTION_METHOD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^.*(?P<parent_method_name><.+>).*__(?P<nested_method_name>[^|]+)\|.+\((?P<arguments>.*)\):.+$",
    )
    .unwrap()
});

pub struct DotCoverParser;

impl CoverageParser for DotCoverParser {
    fn name(&self) -> &'static str {
        "DotCoverParser"
    }

    fn parse(&self, root: &Element, context: &ParserContext) -> Result<ParserResult> {
        parse(root, context)
    }
}

pub fn parse(root: &Element, context: &ParserContext) -> Result<ParserResult> {
    let assembly_elements = root.descendants("Assembly");

    let mut file_paths: BTreeMap<String, String> = BTreeMap::new();
    for file in root.descendants("File") {
        if let (Some(index), Some(name)) = (file.attr("Index"), file.attr("Name")) {
            file_paths
                .entry(index.to_string())
                .or_insert_with(|| name.to_string());
        }
    }

    let mut names: Vec<String> = Vec::new();
    for element in &assembly_elements {
        if let Some(name) = element.attr("Name") {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names.retain(|n| context.assembly_filter.is_included(n));

    let mut assemblies = Vec::new();
    for name in &names {
        assemblies.push(process_assembly(
            name,
            &assembly_elements,
            &file_paths,
            context,
        )?);
    }

    Ok(ParserResult::new(assemblies, false, "DotCoverParser"))
}

fn process_assembly(
    name: &str,
    assembly_elements: &[&Element],
    file_paths: &BTreeMap<String, String>,
    context: &ParserContext,
) -> Result<Assembly> {
    log::debug!("current assembly: {name}");

    let matching: Vec<&Element> = assembly_elements
        .iter()
        .filter(|a| a.attr("Name") == Some(name))
        .copied()
        .collect();

    // Partial classes can appear as several Type elements, they are
    // processed together under their composed name.
    let mut entries: Vec<(String, Vec<&Element>)> = Vec::new();
    for &assembly in &matching {
        for (composed_name, element) in collect_types(assembly, context.raw_mode) {
            match entries.iter_mut().find(|(n, _)| *n == composed_name) {
                Some((_, elements)) => elements.push(element),
                None => entries.push((composed_name, vec![element])),
            }
        }
    }
    entries.retain(|(n, _)| context.class_filter.is_included(n));

    let classes: Vec<Result<Option<Class>>> = entries
        .par_iter()
        .map(|(class_name, elements)| {
            process_class(class_name, elements, name, file_paths, context)
        })
        .collect();

    let mut assembly = Assembly::new(name);
    for class in classes {
        if let Some(class) = class? {
            assembly.add_class(class);
        }
    }
    Ok(assembly)
}

/// Collects the types of an assembly element with their composed names.
/// In raw mode every nested type is its own class, otherwise only top
/// level types are listed and nested ones roll into their parent.
fn collect_types<'a>(assembly: &'a Element, raw_mode: bool) -> Vec<(String, &'a Element)> {
    let mut out = Vec::new();
    for type_element in assembly.elements("Type") {
        collect_type(type_element, "", raw_mode, &mut out);
    }
    for namespace in assembly.elements("Namespace") {
        let prefix = namespace
            .attr("Name")
            .map_or_else(String::new, |n| format!("{n}."));
        for type_element in namespace.elements("Type") {
            collect_type(type_element, &prefix, raw_mode, &mut out);
        }
    }
    out
}

fn collect_type<'a>(
    type_element: &'a Element,
    prefix: &str,
    raw_mode: bool,
    out: &mut Vec<(String, &'a Element)>,
) {
    let Some(name) = type_element.attr("Name") else {
        return;
    };
    if GENERATED_CLASS_NAME_RE.is_match(name) {
        return;
    }
    let composed = format!("{prefix}{name}");
    if raw_mode {
        let nested_prefix = format!("{composed}.");
        for nested in type_element.elements("Type") {
            collect_type(nested, &nested_prefix, raw_mode, out);
        }
    }
    out.push((composed, type_element));
}

fn process_class(
    class_name: &str,
    type_elements: &[&Element],
    assembly_name: &str,
    file_paths: &BTreeMap<String, String>,
    context: &ParserContext,
) -> Result<Option<Class>> {
    let statements: Vec<&Element> = type_elements
        .iter()
        .copied()
        .flat_map(|t| class_statements(t, context.raw_mode))
        .collect();

    let mut file_ids: Vec<String> = Vec::new();
    for statement in &statements {
        if let Some(index) = statement.attr("FileIndex") {
            if !file_ids.iter().any(|id| id == index) {
                file_ids.push(index.to_string());
            }
        }
    }

    let mut files: Vec<(String, String)> = Vec::new();
    for id in file_ids {
        match file_paths.get(&id) {
            Some(path) => files.push((id, path.clone())),
            None => {
                return Err(CovError::Parse(format!(
                    "file index {id} of class {class_name} has no file entry"
                )))
            }
        }
    }
    let filtered: Vec<&(String, String)> = files
        .iter()
        .filter(|(_, path)| context.file_filter.is_included(path))
        .collect();

    let keep =
        (files.is_empty() && !context.file_filter.has_custom_filters()) || !filtered.is_empty();
    if !keep {
        return Ok(None);
    }

    let mut method_pairs: Vec<(String, &Element)> = Vec::new();
    for &type_element in type_elements {
        let type_name = type_element.attr("Name").unwrap_or_default();
        collect_methods(type_element, type_name, context.raw_mode, &mut method_pairs);
    }

    let mut class = Class::new(class_name, assembly_name);
    for (id, path) in filtered {
        let mut file = process_file(&statements, id, path);
        for (type_name, method) in &method_pairs {
            add_code_element(type_name, *method, id, &mut file, context);
        }
        class.add_file(file);
    }
    Ok(Some(class))
}

fn class_statements<'a>(type_element: &'a Element, raw_mode: bool) -> Vec<&'a Element> {
    if raw_mode {
        type_element
            .elements("Method")
            .flat_map(|m| m.elements("Statement"))
            .collect()
    } else {
        type_element.descendants("Statement")
    }
}

/// Methods of the class with the name of the type they are declared in.
/// Methods of compiler generated nested types carry that type's name so
/// async state machines can be collapsed to the method they belong to.
fn collect_methods<'a>(
    type_element: &'a Element,
    type_name: &str,
    raw_mode: bool,
    out: &mut Vec<(String, &'a Element)>,
) {
    for method in type_element.elements("Method") {
        out.push((type_name.to_string(), method));
    }
    if raw_mode {
        return;
    }
    for nested in type_element.elements("Type") {
        if let Some(name) = nested.attr("Name") {
            collect_methods(nested, name, raw_mode, out);
        }
    }
}

fn process_file(statements: &[&Element], file_id: &str, file_path: &str) -> CodeFile {
    struct Statement {
        line: i32,
        end_line: i32,
        visits: i32,
    }

    let mut relevant: Vec<Statement> = statements
        .iter()
        .filter(|s| s.attr("FileIndex") == Some(file_id))
        .filter_map(|s| {
            let line = s.attr("Line")?.parse::<i32>().ok()?;
            let end_line = s.attr("EndLine")?.parse::<i32>().ok()?;
            let covered = s.attr("Covered").is_some_and(|c| c == "True");
            (line >= 0 && end_line >= line).then_some(Statement {
                line,
                end_line,
                visits: i32::from(covered),
            })
        })
        .collect();
    relevant.sort_by_key(|s| s.end_line);

    let size = relevant.last().map_or(0, |s| s.end_line as usize + 1);
    let mut line_coverage = vec![-1; size];
    let mut line_visit_status = vec![LineVisitStatus::NotCoverable; size];

    // A statement spans all lines from Line to EndLine. Visit counts are
    // capped at 1 since dotCover only records whether a statement ran.
    for statement in &relevant {
        for line in statement.line..=statement.end_line {
            let index = line as usize;
            line_coverage[index] = if line_coverage[index] < 0 {
                statement.visits
            } else {
                (line_coverage[index] + statement.visits).min(1)
            };
            line_visit_status[index] =
                if statement.visits > 0 || line_visit_status[index] == LineVisitStatus::Covered {
                    LineVisitStatus::Covered
                } else {
                    LineVisitStatus::NotCovered
                };
        }
    }

    CodeFile::new(file_path, line_coverage, line_visit_status)
}

fn add_code_element(
    type_name: &str,
    method: &Element,
    file_id: &str,
    file: &mut CodeFile,
    context: &ParserContext,
) {
    let Some(method_name) = method.attr("Name") else {
        return;
    };
    let statements: Vec<&Element> = method
        .elements("Statement")
        .filter(|s| s.attr("FileIndex") == Some(file_id))
        .collect();
    let first_line = statements
        .iter()
        .filter_map(|s| s.attr("Line").and_then(|v| v.parse::<i32>().ok()))
        .min();
    let last_line = statements
        .iter()
        .filter_map(|s| s.attr("EndLine").and_then(|v| v.parse::<i32>().ok()))
        .max();
    let (Some(first_line), Some(last_line)) = (first_line, last_line) else {
        return;
    };

    let extracted = extract_method_name(type_name, method_name, context.raw_mode);
    let is_property = extracted
        .get(..4)
        .is_some_and(|p| p.eq_ignore_ascii_case("get_") || p.eq_ignore_ascii_case("set_"));
    let (element_type, name) = if is_property {
        (CodeElementType::Property, extracted[4..].to_string())
    } else {
        (CodeElementType::Method, extracted.clone())
    };
    let quota = file.coverage_quota_in_range(first_line, last_line, context.precision);
    file.add_code_element(CodeElement::new(
        extracted,
        name,
        element_type,
        first_line,
        last_line,
        quota,
    ));
}

/// Strips the return type from a dotCover method name like
/// "SampleFunction():void". Compiler generated names collapse to the
/// method they were generated for.
fn extract_method_name(type_name: &str, method_name: &str, raw_mode: bool) -> String {
    if raw_mode {
        return method_name.to_string();
    }
    let combined = format!("{type_name}.{method_name}");
    if type_name.contains('|') || method_name.contains('|') {
        if let Some(caps) = LOCAL_FUNCTION_METHOD_NAME_RE.captures(&combined) {
            return format!("{}({})", &caps["nested_method_name"], &caps["arguments"]);
        }
    }
    if method_name.contains("MoveNext()") {
        if let Some(caps) = COMPILER_GENERATED_METHOD_NAME_RE.captures(&combined) {
            return format!("{}()", &caps["compiler_generated_name"]);
        }
    }
    match method_name.rfind(':') {
        Some(index) => method_name[..index].to_string(),
        None => method_name.to_string(),
    }
}
