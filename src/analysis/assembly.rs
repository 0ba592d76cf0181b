use crate::analysis::{safe_sum, Class, QuotaPrecision};

/// An assembly (or module) with the classes it contains.
#[derive(Debug, Clone)]
pub struct Assembly {
    name: String,
    classes: Vec<Class>,
}

impl Assembly {
    pub fn new(name: impl Into<String>) -> Self {
        Assembly {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name without any leading path, e.g. `test.dll` for an assembly
    /// reported by its location on disk.
    #[must_use]
    pub fn short_name(&self) -> String {
        let normalized = self.name.replace('/', "\\");
        match normalized.rfind('\\') {
            Some(index) => normalized[index + 1..].to_string(),
            None => normalized,
        }
    }

    /// The classes of this assembly, ordered by name.
    #[must_use]
    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn class_by_name(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name() == name)
    }

    /// Adds a class, keeping the classes ordered by name. The class is
    /// reparented to this assembly.
    pub fn add_class(&mut self, mut class: Class) {
        class.set_assembly_name(self.name.clone());
        let index = match self
            .classes
            .binary_search_by(|c| c.name().cmp(class.name()))
        {
            Ok(index) | Err(index) => index,
        };
        self.classes.insert(index, class);
    }

    #[must_use]
    pub fn covered_lines(&self) -> usize {
        self.classes.iter().map(Class::covered_lines).sum()
    }

    #[must_use]
    pub fn coverable_lines(&self) -> usize {
        self.classes.iter().map(Class::coverable_lines).sum()
    }

    #[must_use]
    pub fn covered_branches(&self) -> Option<usize> {
        safe_sum(self.classes.iter().map(Class::covered_branches))
    }

    #[must_use]
    pub fn total_branches(&self) -> Option<usize> {
        safe_sum(self.classes.iter().map(Class::total_branches))
    }

    pub fn coverage_quota(&self, precision: QuotaPrecision) -> Option<f64> {
        precision.quota(self.covered_lines(), self.coverable_lines())
    }

    pub fn branch_coverage_quota(&self, precision: QuotaPrecision) -> Option<f64> {
        match (self.covered_branches(), self.total_branches()) {
            (Some(covered), Some(total)) => precision.quota(covered, total),
            _ => None,
        }
    }

    #[must_use]
    pub fn total_code_elements(&self) -> usize {
        self.classes.iter().map(Class::total_code_elements).sum()
    }

    #[must_use]
    pub fn covered_code_elements(&self) -> usize {
        self.classes.iter().map(Class::covered_code_elements).sum()
    }

    #[must_use]
    pub fn full_covered_code_elements(&self) -> usize {
        self.classes
            .iter()
            .map(Class::full_covered_code_elements)
            .sum()
    }

    /// Merges another instance of the same assembly. Known classes are
    /// merged, unknown ones are adopted.
    pub fn merge(&mut self, other: Assembly, precision: QuotaPrecision) {
        for class in other.classes {
            match self.classes.iter_mut().find(|c| **c == class) {
                Some(existing) => existing.merge(class, precision),
                None => self.add_class(class),
            }
        }
    }
}

impl PartialEq for Assembly {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Assembly {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CodeFile;
    use crate::analysis::LineVisitStatus::{Covered, NotCoverable, NotCovered};

    fn class_with_file(name: &str, path: &str, coverage: Vec<i32>) -> Class {
        let statuses = coverage
            .iter()
            .map(|&v| match v {
                v if v > 0 => Covered,
                0 => NotCovered,
                _ => NotCoverable,
            })
            .collect();
        let mut class = Class::new(name, "");
        class.add_file(CodeFile::new(path, coverage, statuses));
        class
    }

    #[test]
    fn short_name_strips_the_path() {
        assert_eq!(Assembly::new("Test.Application").short_name(), "Test.Application");
        assert_eq!(Assembly::new("C:\\temp\\test.exe").short_name(), "test.exe");
        assert_eq!(Assembly::new("/usr/local/lib/test.dll").short_name(), "test.dll");
    }

    #[test]
    fn classes_are_kept_ordered_by_name() {
        let mut assembly = Assembly::new("Test");
        assembly.add_class(Class::new("Test.Zulu", ""));
        assembly.add_class(Class::new("Test.Alpha", ""));
        assembly.add_class(Class::new("Test.Mike", ""));

        let names: Vec<&str> = assembly.classes().iter().map(Class::name).collect();
        assert_eq!(names, ["Test.Alpha", "Test.Mike", "Test.Zulu"]);
    }

    #[test]
    fn add_class_reparents_the_class() {
        let mut assembly = Assembly::new("Test");
        assembly.add_class(Class::new("Test.Class", "somewhere.else"));
        assert_eq!(assembly.classes()[0].assembly_name(), "Test");
    }

    #[test]
    fn merge_combines_known_classes_and_adopts_new_ones() {
        let mut target = Assembly::new("Test");
        target.add_class(class_with_file("Test.Class1", "Class1.cs", vec![-1, 1, 0]));

        let mut other = Assembly::new("Test");
        other.add_class(class_with_file("Test.Class1", "Class1.cs", vec![-1, 0, 1]));
        other.add_class(class_with_file("Test.Class2", "Class2.cs", vec![-1, 1]));

        target.merge(other, QuotaPrecision::default());

        assert_eq!(target.classes().len(), 2);
        assert_eq!(target.coverable_lines(), 3);
        assert_eq!(target.covered_lines(), 3);
    }
}
