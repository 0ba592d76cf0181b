/// Parser for NCover XML coverage reports.
///
/// NCover XML structure:
///   <coverage profilerVersion="1.5.8" driverVersion="1.5.8">
///     <module moduleId="..." name="..." assembly="Test">
///       <method name="SampleFunction" class="Test.TestClass"
///               excluded="false" instrumented="true">
///         <seqpnt visitcount="1" line="9" column="13" endline="9"
///                 endcolumn="37" document="C:\temp\TestClass.cs"/>
///       </method>
///     </module>
///   </coverage>
///
/// Class names are reported verbatim. The profilerVersion attribute on the
/// root distinguishes NCover from other dialects using a `coverage` root.
use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::analysis::{Assembly, Class, CodeFile, LineVisitStatus, ParserResult};
use crate::error::Result;
use crate::parsers::{group_by_name, parse_visits, CoverageParser, ParserContext};
use crate::xmltree::Element;

pub struct NCoverParser;

impl CoverageParser for NCoverParser {
    fn name(&self) -> &'static str {
        "NCoverParser"
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
            .filter_map(|m| m.attr("assembly").map(|n| (n.to_string(), *m))),
    );

    let mut assemblies = Vec::new();
    for (name, elements) in groups {
        if !context.assembly_filter.is_included(&name) {
            continue;
        }
        assemblies.push(process_assembly(&name, &elements, context));
    }

    Ok(ParserResult::new(assemblies, false, "NCoverParser"))
}

fn process_assembly(name: &str, modules: &[&Element], context: &ParserContext) -> Assembly {
    log::debug!("current assembly: {name}");

    let methods: Vec<&Element> = modules
        .iter()
        .flat_map(|m| m.descendants("method"))
        .filter(|m| m.attr("excluded") != Some("true"))
        .collect();

    let mut class_names: Vec<String> = Vec::new();
    for method in &methods {
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
        .map(|class_name| process_class(class_name, &methods, name, context))
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
        for seqpnt in method.elements("seqpnt") {
            if let Some(document) = seqpnt.attr("document") {
                if !files.iter().any(|f| f == document) {
                    files.push(document.to_string());
                }
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
    for method in class_methods {
        for seqpnt in method
            .elements("seqpnt")
            .filter(|s| s.attr("document") == Some(file_path))
        {
            let Some(line) = seqpnt.attr("line").and_then(|v| v.parse::<i32>().ok()) else {
                continue;
            };
            let Some(visits) = seqpnt.attr("visitcount").and_then(parse_visits) else {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_context;
    use crate::xmltree::collect_named;

    fn parse_report(xml: &str) -> ParserResult {
        let root = collect_named(xml.as_bytes(), "coverage").unwrap().remove(0);
        parse(&root, &test_context()).unwrap()
    }

    #[test]
    fn test_report() {
        let result = parse_report(
            r#"<coverage profilerVersion="1.5.8" driverVersion="1.5.8">
<module moduleId="1" name="Test.dll" assembly="Test">
<method name="SampleFunction" class="Test.TestClass" excluded="false">
<seqpnt visitcount="3" line="9" document="C:\temp\TestClass.cs"/>
<seqpnt visitcount="0" line="10" document="C:\temp\TestClass.cs"/>
</method>
<method name="Excluded" class="Test.ExcludedClass" excluded="true">
<seqpnt visitcount="1" line="5" document="C:\temp\ExcludedClass.cs"/>
</method>
</module>
</coverage>"#,
        );

        assert_eq!(result.parser_name(), "NCoverParser");
        assert!(!result.supports_branch_coverage);
        let assembly = &result.assemblies()[0];
        assert_eq!(assembly.name(), "Test");
        let classes = assembly.classes();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name(), "Test.TestClass");
        let file = &classes[0].files()[0];
        assert_eq!(file.coverable_lines(), 2);
        assert_eq!(file.covered_lines(), 1);
        assert_eq!(file.line_coverage()[9], 3);
        assert_eq!(file.line_visit_status()[10], LineVisitStatus::NotCovered);
    }

    #[test]
    fn test_visit_counts_of_shared_lines_are_summed() {
        let result = parse_report(
            r#"<coverage profilerVersion="1.5.8">
<module moduleId="1" name="Test.dll" assembly="Test">
<method name="A" class="Test.PartialClass">
<seqpnt visitcount="2" line="5" document="C:\temp\PartialClass.cs"/>
</method>
<method name="B" class="Test.PartialClass">
<seqpnt visitcount="3" line="5" document="C:\temp\PartialClass.cs"/>
</method>
</module>
</coverage>"#,
        );

        let file = &result.assemblies()[0].classes()[0].files()[0];
        assert_eq!(file.line_coverage()[5], 5);
    }
}
