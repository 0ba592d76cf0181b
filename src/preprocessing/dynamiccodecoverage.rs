//! Attaches `$`-prefixed helper functions in Dynamic Code Coverage
//! reports to the type of the nearest preceding regular function in the
//! same source file.

use std::collections::BTreeMap;

use crate::preprocessing::closest_preceding;
use crate::xmltree::Element;

struct FunctionInfo {
    type_name: String,
    source_id: Option<String>,
    start_line: Option<i32>,
}

pub fn preprocess(root: &mut Element) {
    root.for_each_named_mut("module", &mut process_module);
}

fn process_module(module: &mut Element) {
    let infos: Vec<FunctionInfo> = module
        .descendants("function")
        .iter()
        .map(|function| {
            let range = first_range(function);
            FunctionInfo {
                type_name: function.attr("type_name").unwrap_or_default().to_string(),
                source_id: range
                    .and_then(|r| r.attr("source_id"))
                    .map(str::to_string),
                start_line: range.and_then(|r| r.attr("start_line")).and_then(|v| v.parse().ok()),
            }
        })
        .collect();

    let mut renames: BTreeMap<usize, String> = BTreeMap::new();
    for (index, info) in infos.iter().enumerate() {
        if !info.type_name.starts_with('$') {
            continue;
        }
        let (Some(source_id), Some(start_line)) = (&info.source_id, info.start_line) else {
            continue;
        };
        let candidates = infos.iter().enumerate().filter_map(|(i, candidate)| {
            if candidate.type_name.starts_with('$')
                || candidate.source_id.as_ref() != Some(source_id)
            {
                return None;
            }
            candidate.start_line.map(|line| (i, line))
        });
        if let Some(closest) = closest_preceding(candidates, start_line) {
            renames.insert(
                index,
                format!("{}.{}", infos[closest].type_name, info.type_name),
            );
        }
    }

    if renames.is_empty() {
        return;
    }
    let mut position = 0usize;
    module.for_each_named_mut("function", &mut |function| {
        if let Some(new_name) = renames.get(&position) {
            function.set_attr("type_name", new_name.clone());
        }
        position += 1;
    });
}

fn first_range(function: &Element) -> Option<&Element> {
    function.child("ranges")?.elements("range").next()
}
