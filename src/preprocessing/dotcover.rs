//! Moves dotCover startup code types into the type they were generated
//! for.
//!
//! dotCover nests the startup code of VB.NET projects under a
//! `<StartupCode$...>` namespace inside `$Module...` container types. The
//! contained types are relocated into the nearest preceding type of the
//! same source file, the container types are dropped.

use std::collections::BTreeSet;

use log::error;

use crate::preprocessing::closest_preceding;
use crate::xmltree::Element;

/// Location of a regular top level type within an assembly element.
/// `container` is `None` for types directly below the assembly, otherwise
/// the child index of the surrounding namespace element.
struct RegularType {
    container: Option<usize>,
    type_index: usize,
    file_id: Option<String>,
    first_line: Option<i32>,
}

pub fn preprocess(root: &mut Element) {
    let has_statements = root
        .descendants("Assembly")
        .iter()
        .any(|assembly| !assembly.descendants("Statement").is_empty());
    if !has_statements {
        error!("invalid dotCover report, expected a detailed XML report containing statements");
        return;
    }

    root.for_each_named_mut("Assembly", &mut process_assembly);
}

fn process_assembly(assembly: &mut Element) {
    let mut regular: Vec<RegularType> = Vec::new();
    let mut startup_namespaces: Vec<usize> = Vec::new();
    let mut nested: Vec<(Option<String>, Option<i32>)> = Vec::new();

    let mut direct_type_index = 0usize;
    for (child_index, child) in assembly.child_elements().enumerate() {
        match child.name.as_str() {
            "Type" => {
                let (file_id, first_line) = statement_location(child);
                regular.push(RegularType {
                    container: None,
                    type_index: direct_type_index,
                    file_id,
                    first_line,
                });
                direct_type_index += 1;
            }
            "Namespace" => {
                let name = child.attr("Name").unwrap_or_default();
                if name.starts_with("<StartupCode$") {
                    startup_namespaces.push(child_index);
                    for module_type in child
                        .elements("Type")
                        .filter(|t| is_module_container(t))
                    {
                        for nested_type in module_type.elements("Type") {
                            nested.push(statement_location(nested_type));
                        }
                    }
                } else {
                    for (type_index, namespace_type) in child.elements("Type").enumerate() {
                        let (file_id, first_line) = statement_location(namespace_type);
                        regular.push(RegularType {
                            container: Some(child_index),
                            type_index,
                            file_id,
                            first_line,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    if startup_namespaces.is_empty() {
        return;
    }

    // Target of each nested type, in the order they appear in the report.
    let targets: Vec<Option<usize>> = nested
        .iter()
        .map(|(file_id, first_line)| {
            let (Some(file_id), Some(first_line)) = (file_id, *first_line) else {
                return None;
            };
            let candidates = regular.iter().enumerate().filter_map(|(i, candidate)| {
                if candidate.file_id.as_ref() != Some(file_id) {
                    return None;
                }
                candidate.first_line.map(|line| (i, line))
            });
            closest_preceding(candidates, first_line)
        })
        .collect();

    let mut moved: Vec<Element> = Vec::new();
    for &namespace_index in &startup_namespaces {
        if let Some(namespace) = assembly.child_elements_mut().nth(namespace_index) {
            for mut module_type in
                namespace.extract_children(|e| e.name == "Type" && is_module_container(e))
            {
                moved.extend(module_type.extract_children(|e| e.name == "Type"));
            }
        }
    }

    for (element, target) in moved.into_iter().zip(targets) {
        // Without a target the type vanishes together with its container.
        let Some(target) = target else { continue };
        let destination = &regular[target];
        let parent = match destination.container {
            None => assembly
                .child_elements_mut()
                .filter(|e| e.name == "Type")
                .nth(destination.type_index),
            Some(namespace_index) => assembly
                .child_elements_mut()
                .nth(namespace_index)
                .and_then(|namespace| {
                    namespace
                        .child_elements_mut()
                        .filter(|e| e.name == "Type")
                        .nth(destination.type_index)
                }),
        };
        if let Some(parent) = parent {
            parent.push_element(element);
        }
    }
}

fn is_module_container(element: &Element) -> bool {
    element
        .attr("Name")
        .is_some_and(|name| name.starts_with("$Module"))
}

fn statement_location(type_element: &Element) -> (Option<String>, Option<i32>) {
    let mut file_ids: BTreeSet<&str> = BTreeSet::new();
    let mut first_line: Option<i32> = None;

    for statement in type_element.descendants("Statement") {
        if let Some(file_index) = statement.attr("FileIndex") {
            file_ids.insert(file_index);
        }
        if let Some(line) = statement.attr("Line").and_then(|v| v.parse::<i32>().ok()) {
            first_line = Some(first_line.map_or(line, |f| f.min(line)));
        }
    }

    let file_id = if file_ids.len() == 1 {
        file_ids.into_iter().next().map(str::to_string)
    } else {
        None
    };
    (file_id, first_line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree::collect_named;

    fn parse(xml: &str) -> Element {
        collect_named(xml.as_bytes(), "Root").unwrap().remove(0)
    }

    const REPORT: &str = r#"<Root ReportType="DetailedXml" DotCoverVersion="10.0.2">
<Assembly Name="Test">
<Namespace Name="ViewModels">
<Type Name="MainWindowViewModel">
<Method Name="Test():void"><Statement FileIndex="1" Line="10" EndLine="10" Covered="True"/></Method>
</Type>
</Namespace>
<Namespace Name="&lt;StartupCode$Test&gt;">
<Type Name="$Module1">
<Type Name="MyStartup">
<Method Name="Main():void"><Statement FileIndex="1" Line="15" EndLine="15" Covered="True"/></Method>
</Type>
</Type>
</Namespace>
</Assembly>
<FileIndices><File Index="1" Name="C:\temp\MainWindow.xaml.vb"/></FileIndices>
</Root>"#;

    #[test]
    fn startup_types_move_into_the_nearest_preceding_type() {
        let mut root = parse(REPORT);

        preprocess(&mut root);

        let assembly = &root.descendants("Assembly")[0];
        let regular = assembly.descendants("Type");
        let main = regular
            .iter()
            .find(|t| t.attr("Name") == Some("MainWindowViewModel"))
            .unwrap();
        assert!(main
            .elements("Type")
            .any(|t| t.attr("Name") == Some("MyStartup")));
    }

    #[test]
    fn module_container_types_are_removed() {
        let mut root = parse(REPORT);

        preprocess(&mut root);

        assert!(root
            .descendants("Type")
            .iter()
            .all(|t| t.attr("Name") != Some("$Module1")));
    }

    #[test]
    fn reports_without_statements_are_left_alone() {
        let mut root = parse(
            r#"<Root ReportType="DetailedXml">
<Assembly Name="Test"><Namespace Name="&lt;StartupCode$Test&gt;">
<Type Name="$Module1"><Type Name="MyStartup"/></Type>
</Namespace></Assembly>
</Root>"#,
        );

        preprocess(&mut root);

        assert!(root
            .descendants("Type")
            .iter()
            .any(|t| t.attr("Name") == Some("$Module1")));
    }
}
