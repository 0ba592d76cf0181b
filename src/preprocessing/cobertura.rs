//! Resolves relative file names in Cobertura reports against the source
//! directories listed in the `<sources>` element.

use std::path::{Path, MAIN_SEPARATOR};

use crate::xmltree::Element;

pub fn preprocess(root: &mut Element) {
    let sources: Vec<String> = root
        .descendants("sources")
        .iter()
        .flat_map(|sources| sources.elements("source"))
        .map(Element::text)
        .filter(|text| !text.is_empty())
        .collect();

    if sources.is_empty() {
        return;
    }

    root.for_each_named_mut("class", &mut |class| {
        let Some(file_name) = class.attr("filename").map(str::to_string) else {
            return;
        };
        if sources.len() == 1 {
            class.set_attr("filename", join_source(&sources[0], &file_name));
        } else {
            // With several source directories only an existing file tells
            // which one the relative path belongs to.
            for source in &sources {
                let combined = join_source(source, &file_name);
                if Path::new(&combined).exists() {
                    class.set_attr("filename", combined);
                    break;
                }
            }
        }
    });
}

fn join_source(source: &str, file_name: &str) -> String {
    let combined = if is_rooted(file_name) || source.is_empty() {
        file_name.to_string()
    } else {
        format!(
            "{}{}{}",
            source.trim_end_matches(['/', '\\']),
            MAIN_SEPARATOR,
            file_name
        )
    };
    combined.replace(['/', '\\'], &MAIN_SEPARATOR.to_string())
}

fn is_rooted(path: &str) -> bool {
    path.starts_with('/') || path.starts_with('\\') || path.as_bytes().get(1) == Some(&b':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree::collect_named;

    fn parse(xml: &str) -> Element {
        collect_named(xml.as_bytes(), "coverage").unwrap().remove(0)
    }

    fn first_class_file_name(root: &Element) -> String {
        root.descendants("class")[0].attr("filename").unwrap().to_string()
    }

    #[test]
    fn a_single_source_is_prepended_to_relative_file_names() {
        let mut root = parse(
            r#"<coverage>
<sources><source>src/dir</source></sources>
<packages><package name="Test"><classes>
<class name="Test.Class1" filename="sub/Class1.cs"/>
</classes></package></packages>
</coverage>"#,
        );

        preprocess(&mut root);

        let sep = MAIN_SEPARATOR;
        assert_eq!(
            first_class_file_name(&root),
            format!("src{sep}dir{sep}sub{sep}Class1.cs")
        );
    }

    #[test]
    fn rooted_file_names_are_left_alone() {
        let mut root = parse(
            r#"<coverage>
<sources><source>src</source></sources>
<packages><package name="Test"><classes>
<class name="Test.Class1" filename="/checkout/Class1.cs"/>
</classes></package></packages>
</coverage>"#,
        );

        preprocess(&mut root);

        let sep = MAIN_SEPARATOR;
        assert_eq!(
            first_class_file_name(&root),
            format!("{sep}checkout{sep}Class1.cs")
        );
    }

    #[test]
    fn without_sources_nothing_changes() {
        let mut root = parse(
            r#"<coverage>
<packages><package name="Test"><classes>
<class name="Test.Class1" filename="Class1.cs"/>
</classes></package></packages>
</coverage>"#,
        );

        preprocess(&mut root);
        assert_eq!(first_class_file_name(&root), "Class1.cs");
    }

    #[test]
    fn with_several_sources_the_directory_containing_the_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("Class1.cs"), "class Class1 {}").unwrap();

        let mut root = parse(&format!(
            r#"<coverage>
<sources><source>{}</source><source>{}</source></sources>
<packages><package name="Test"><classes>
<class name="Test.Class1" filename="Class1.cs"/>
</classes></package></packages>
</coverage>"#,
            first.display(),
            second.display()
        ));

        preprocess(&mut root);

        assert_eq!(
            first_class_file_name(&root),
            second.join("Class1.cs").display().to_string()
        );
    }
}
