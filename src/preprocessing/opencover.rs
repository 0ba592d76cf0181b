//! Renames OpenCover startup code classes so they merge into the class
//! they were generated for.
//!
//! VB.NET projects report classes like `<StartupCode$Test>/MyClass` in a
//! module of their own. The preprocessor prefixes such names with the
//! nearest preceding class of the same source file, which makes the name
//! normalizer treat them as nested classes.

use std::collections::BTreeSet;

use crate::preprocessing::closest_preceding;
use crate::xmltree::Element;

struct ClassInfo {
    startup: bool,
    full_name: String,
    file_id: Option<String>,
    first_line: Option<i32>,
}

pub fn preprocess(root: &mut Element) {
    root.for_each_named_mut("Module", &mut process_module);
}

fn process_module(module: &mut Element) {
    let infos: Vec<ClassInfo> = match module.child("Classes") {
        Some(classes) => classes
            .elements("Class")
            .map(|class| {
                let full_name = class.child_text("FullName").unwrap_or_default();
                let (file_id, first_line) = file_and_first_line(class);
                ClassInfo {
                    startup: is_startup_name(&full_name),
                    full_name,
                    file_id,
                    first_line,
                }
            })
            .collect(),
        None => return,
    };

    let mut renames: Vec<(usize, String)> = Vec::new();
    for (index, info) in infos.iter().enumerate() {
        if !info.startup || !info.full_name.contains('/') {
            continue;
        }
        let (Some(file_id), Some(first_line)) = (&info.file_id, info.first_line) else {
            continue;
        };

        let candidates = infos.iter().enumerate().filter_map(|(i, candidate)| {
            if candidate.startup || candidate.file_id.as_ref() != Some(file_id) {
                return None;
            }
            candidate.first_line.map(|line| (i, line))
        });
        if let Some(closest) = closest_preceding(candidates, first_line) {
            renames.push((
                index,
                format!("{}/{}", infos[closest].full_name, info.full_name),
            ));
        }
    }

    if renames.is_empty() {
        return;
    }
    if let Some(classes) = module.child_mut("Classes") {
        for (index, new_name) in renames {
            if let Some(full_name) = classes
                .child_elements_mut()
                .filter(|e| e.name == "Class")
                .nth(index)
                .and_then(|class| class.child_mut("FullName"))
            {
                full_name.set_text(new_name);
            }
        }
    }
}

fn file_and_first_line(class: &Element) -> (Option<String>, Option<i32>) {
    let mut file_ids: BTreeSet<&str> = BTreeSet::new();
    let mut first_line: Option<i32> = None;

    for methods in class.elements("Methods") {
        for method in methods.elements("Method") {
            let Some(uid) = method.child("FileRef").and_then(|f| f.attr("uid")) else {
                continue;
            };
            file_ids.insert(uid);

            if let Some(points) = method.child("SequencePoints") {
                for point in points.elements("SequencePoint") {
                    if let Some(line) = point.attr("sl").and_then(|v| v.parse::<i32>().ok()) {
                        first_line = Some(first_line.map_or(line, |f| f.min(line)));
                    }
                }
            }
        }
    }

    let file_id = if file_ids.len() == 1 {
        file_ids.into_iter().next().map(str::to_string)
    } else {
        None
    };
    (file_id, first_line)
}

fn is_startup_name(name: &str) -> bool {
    const PREFIX: &str = "<StartupCode$";
    name.get(..PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree::collect_named;

    fn parse(xml: &str) -> Element {
        collect_named(xml.as_bytes(), "CoverageSession")
            .unwrap()
            .remove(0)
    }

    fn class_names(root: &Element) -> Vec<String> {
        root.descendants("Class")
            .iter()
            .filter_map(|c| c.child_text("FullName"))
            .collect()
    }

    fn module_with_classes(classes: &str) -> String {
        format!(
            r#"<CoverageSession><Modules><Module>
<ModuleName>Test</ModuleName>
<Files><File uid="1" fullPath="C:\temp\MainWindow.xaml.vb"/></Files>
<Classes>{classes}</Classes>
</Module></Modules></CoverageSession>"#
        )
    }

    fn class(full_name: &str, uid: &str, line: i32) -> String {
        format!(
            r#"<Class><FullName>{full_name}</FullName><Methods><Method>
<FileRef uid="{uid}"/>
<SequencePoints><SequencePoint sl="{line}"/></SequencePoints>
</Method></Methods></Class>"#
        )
    }

    #[test]
    fn startup_code_gets_attached_to_the_nearest_preceding_class() {
        let xml = module_with_classes(&format!(
            "{}{}{}",
            class("ViewModels.EarlyViewModel", "1", 10),
            class("ViewModels.MainWindowViewModel", "1", 22),
            class("&lt;StartupCode$Test&gt;/MyStartup", "1", 25),
        ));
        let mut root = parse(&xml);

        preprocess(&mut root);

        assert_eq!(
            class_names(&root)[2],
            "ViewModels.MainWindowViewModel/<StartupCode$Test>/MyStartup"
        );
    }

    #[test]
    fn startup_code_of_another_file_is_left_alone() {
        let xml = module_with_classes(&format!(
            "{}{}",
            class("ViewModels.MainWindowViewModel", "1", 10),
            class("&lt;StartupCode$Test&gt;/MyStartup", "2", 25),
        ));
        let mut root = parse(&xml);

        preprocess(&mut root);

        assert_eq!(class_names(&root)[1], "<StartupCode$Test>/MyStartup");
    }

    #[test]
    fn startup_code_without_a_slash_is_left_alone() {
        let xml = module_with_classes(&format!(
            "{}{}",
            class("ViewModels.MainWindowViewModel", "1", 10),
            class("&lt;StartupCode$Test&gt;", "1", 25),
        ));
        let mut root = parse(&xml);

        preprocess(&mut root);

        assert_eq!(class_names(&root)[1], "<StartupCode$Test>");
    }
}
