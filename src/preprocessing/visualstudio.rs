//! Renames Visual Studio startup code classes after the class they were
//! generated for.
//!
//! Startup code lives in a `<StartupCode$...>` namespace table. Classes in
//! there get the namespace and class name of the nearest preceding class
//! of the same source file, so both merge during analysis.

use std::collections::BTreeSet;

use crate::preprocessing::closest_preceding;
use crate::xmltree::Element;

struct RegularClass {
    namespace_name: String,
    class_name: String,
    file_id: String,
    first_line: i32,
}

pub fn preprocess(root: &mut Element) {
    root.for_each_named_mut("Module", &mut process_module);
}

fn process_module(module: &mut Element) {
    let mut regular: Vec<RegularClass> = Vec::new();
    let mut startups: Vec<(usize, usize, Option<String>, Option<i32>)> = Vec::new();

    for (table_index, table) in module.elements("NamespaceTable").enumerate() {
        let namespace_name = table.child_text("NamespaceName").unwrap_or_default();
        let is_startup = namespace_name.starts_with("<StartupCode$");

        for (class_index, class) in table.elements("Class").enumerate() {
            let class_name = class.child_text("ClassName").unwrap_or_default();
            let (file_id, first_line) = lines_location(class);

            if is_startup {
                if class_name.contains('.') {
                    startups.push((table_index, class_index, file_id, first_line));
                }
            } else if let (Some(file_id), Some(first_line)) = (file_id, first_line) {
                regular.push(RegularClass {
                    namespace_name: namespace_name.clone(),
                    class_name,
                    file_id,
                    first_line,
                });
            }
        }
    }

    let mut renames: Vec<(usize, usize, String, String)> = Vec::new();
    for (table_index, class_index, file_id, first_line) in startups {
        let (Some(file_id), Some(first_line)) = (file_id, first_line) else {
            continue;
        };
        let candidates = regular.iter().enumerate().filter_map(|(i, candidate)| {
            (candidate.file_id == file_id).then_some((i, candidate.first_line))
        });
        if let Some(closest) = closest_preceding(candidates, first_line) {
            renames.push((
                table_index,
                class_index,
                regular[closest].namespace_name.clone(),
                regular[closest].class_name.clone(),
            ));
        }
    }

    for (table_index, class_index, namespace_name, class_name) in renames {
        let Some(table) = module
            .child_elements_mut()
            .filter(|e| e.name == "NamespaceTable")
            .nth(table_index)
        else {
            continue;
        };
        if let Some(name) = table.child_mut("NamespaceName") {
            name.set_text(namespace_name);
        }
        if let Some(name) = table
            .child_elements_mut()
            .filter(|e| e.name == "Class")
            .nth(class_index)
            .and_then(|class| class.child_mut("ClassName"))
        {
            name.set_text(class_name);
        }
    }
}

fn lines_location(class: &Element) -> (Option<String>, Option<i32>) {
    let mut file_ids: BTreeSet<String> = BTreeSet::new();
    let mut first_line: Option<i32> = None;

    for lines in class.descendants("Lines") {
        if let Some(file_id) = lines.child_text("SourceFileID") {
            file_ids.insert(file_id);
        }
        if let Some(line) = lines
            .child_text("LnStart")
            .and_then(|v| v.parse::<i32>().ok())
        {
            first_line = Some(first_line.map_or(line, |f| f.min(line)));
        }
    }

    let file_id = if file_ids.len() == 1 {
        file_ids.into_iter().next()
    } else {
        None
    };
    (file_id, first_line)
}
