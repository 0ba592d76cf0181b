/// Parser for mono mprof-report coverage output.
///
/// mprof XML structure:
///   <coverage version="0.3" assembly="Test">
///     <method assembly="Test" class="Test.TestClass"
///             name="SampleFunction (string)" token="100663296"
///             filename="/home/user/TestClass.cs">
///       <statement line="9" counter="1"/>
///     </method>
///   </coverage>
///
/// The root shares its name with Cobertura and NCover reports but carries
/// at most one attribute besides the version, which is how the dispatcher
/// tells them apart.
use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::analysis::{Assembly, Class, CodeFile, LineVisitStatus, ParserResult};
use crate::error::Result;
use crate::parsers::{group_by_name, parse_visits, CoverageParser, ParserContext};
use crate::xmltree::Element;

pub struct MProfParser;

impl CoverageParser for MProfParser {
    fn name(&self) -> &'static str {
        "MProfParser"
    }

    fn parse(&self, root: &Element, context: &ParserContext) -> Result<ParserResult> {
        parse(root, context)
    }
}

pub fn parse(root: &Element, context: &ParserContext) -> Result<ParserResult> {
    let methods = root.descendants("method");
    let groups = group_by_name(
        methods
            .iter()
            .filter_map(|m| m.attr("assembly").map(|n| (n.to_string(), *m))),
    );

    let mut assemblies = Vec::new();
    for (name, elements) in groups {
        if !context.assembly_filter.is_included(&name) {
            continue;
        }
        assemblies.push(process_assembly(&name, &elements, context));
    }

    Ok(ParserResult::new(assemblies, false, "MProfParser"))
}

fn process_assembly(name: &str, methods: &[&Element], context: &ParserContext) -> Assembly {
    log::debug!("current assembly: {name}");

    let mut class_names: Vec<String> = Vec::new();
    for method in methods {
        if let Some(class_name) = method.attr("class") {
            if !class_names.iter().any(|c| c == class_name) {
                class_names.push(class_name.to_string());
            }
        }
    }
    class_names.retain(|c| context.class_filter.is_included(c));
    class_names.sort();

    let classes: Vec<Option<Class>> = class_names
        .par_iter()
        .map(|class_name| process_class(class_name, methods, name, context))
        .collect();

    let mut assembly = Assembly::new(name);
    for class in classes.into_iter().flatten() {
        assembly.add_class(class);
    }
    assembly
}

fn process_class(
    class_name: &str,
    methods: &[&Element],
    assembly_name: &str,
    context: &ParserContext,
) -> Option<Class> {
    let class_methods: Vec<&Element> = methods
        .iter()
        .filter(|m| m.attr("class") == Some(class_name))
        .copied()
        .collect();

    let mut files: Vec<String> = Vec::new();
    for method in &class_methods {
        if let Some(filename) = method.attr("filename") {
            if !files.iter().any(|f| f == filename) {
                files.push(filename.to_string());
            }
        }
    }
    let filtered: Vec<&String> = files
        .iter()
        .filter(|f| context.file_filter.is_included(f))
        .collect();

    let keep =
        (files.is_empty() && !context.file_filter.has_custom_filters()) || !filtered.is_empty();
    if !keep {
        return None;
    }

    let mut class = Class::new(class_name, assembly_name);
    for file in filtered {
        class.add_file(process_file(&class_methods, file));
    }
    Some(class)
}

fn process_file(class_methods: &[&Element], file_path: &str) -> CodeFile {
    let mut line_visits: BTreeMap<i32, i32> = BTreeMap::new();
    for method in class_methods
        .iter()
        .filter(|m| m.attr("filename") == Some(file_path))
    {
        for statement in method.elements("statement") {
            let Some(line) = statement.attr("line").and_then(|v| v.parse::<i32>().ok()) else {
                continue;
            };
            let Some(visits) = statement.attr("counter").and_then(parse_visits) else {
                continue;
            };
            if line < 0 {
                continue;
            }
            line_visits
                .entry(line)
                .and_modify(|v| *v = v.saturating_add(visits))
                .or_insert(visits);
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
            LineVisitStatus::Covered
        } else {
            LineVisitStatus::NotCovered
        };
    }

    CodeFile::new(file_path, line_coverage, line_visit_status)
}
