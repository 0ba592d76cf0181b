use std::sync::LazyLock;

use regex::Regex;

use crate::analysis::{safe_sum, CodeElement, CodeFile, MethodMetric, QuotaPrecision};

static GENERIC_ARITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.+)`(?P<number>\d+)$").unwrap());

/// A class with the source files its members were compiled from.
///
/// Partial classes spread over several files end up as one `Class` with
/// several files attached.
#[derive(Debug, Clone)]
pub struct Class {
    name: String,
    display_name: String,
    raw_name: String,
    assembly_name: String,
    files: Vec<CodeFile>,
}

impl Class {
    pub fn new(name: impl Into<String>, assembly_name: impl Into<String>) -> Self {
        let name = name.into();
        let raw_name = name.clone();
        Self::with_raw_name(name, raw_name, assembly_name)
    }

    pub fn with_raw_name(
        name: impl Into<String>,
        raw_name: impl Into<String>,
        assembly_name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let display_name = expand_generic_arity(&name);
        Class {
            name,
            display_name,
            raw_name: raw_name.into(),
            assembly_name: assembly_name.into(),
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    #[must_use]
    pub fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    pub(crate) fn set_assembly_name(&mut self, assembly_name: impl Into<String>) {
        self.assembly_name = assembly_name.into();
    }

    #[must_use]
    pub fn files(&self) -> &[CodeFile] {
        &self.files
    }

    pub fn add_file(&mut self, file: CodeFile) {
        self.files.push(file);
    }

    #[must_use]
    pub fn covered_lines(&self) -> usize {
        self.files.iter().map(CodeFile::covered_lines).sum()
    }

    #[must_use]
    pub fn coverable_lines(&self) -> usize {
        self.files.iter().map(CodeFile::coverable_lines).sum()
    }

    #[must_use]
    pub fn covered_branches(&self) -> Option<usize> {
        safe_sum(self.files.iter().map(CodeFile::covered_branches))
    }

    #[must_use]
    pub fn total_branches(&self) -> Option<usize> {
        safe_sum(self.files.iter().map(CodeFile::total_branches))
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
        self.files.iter().map(CodeFile::total_code_elements).sum()
    }

    #[must_use]
    pub fn covered_code_elements(&self) -> usize {
        self.files.iter().map(CodeFile::covered_code_elements).sum()
    }

    #[must_use]
    pub fn full_covered_code_elements(&self) -> usize {
        self.files
            .iter()
            .map(CodeFile::full_covered_code_elements)
            .sum()
    }

    pub fn method_metrics(&self) -> impl Iterator<Item = &MethodMetric> {
        self.files.iter().flat_map(|f| f.method_metrics().iter())
    }

    pub fn code_elements(&self) -> impl Iterator<Item = &CodeElement> {
        self.files.iter().flat_map(|f| f.code_elements().iter())
    }

    /// Merges another instance of the same class. Files referring to the
    /// same source file are merged, unknown files are appended.
    pub fn merge(&mut self, other: Class, precision: QuotaPrecision) {
        for file in other.files {
            match self.files.iter_mut().find(|f| f.is_same_file(&file)) {
                Some(existing) => existing.merge(file, precision),
                None => self.files.push(file),
            }
        }
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.raw_name == other.raw_name
    }
}

impl Eq for Class {}

/// Rewrites trailing CLR generic arity markers into readable type
/// parameter lists, e.g. `` Test.GenericClass`2 `` into
/// `Test.GenericClass<T1, T2>`.
fn expand_generic_arity(name: &str) -> String {
    let Some(caps) = GENERIC_ARITY_RE.captures(name) else {
        return name.to_string();
    };
    let Ok(number) = caps["number"].parse::<usize>() else {
        return name.to_string();
    };

    let arguments = if number == 1 {
        "T".to_string()
    } else {
        (1..=number)
            .map(|i| format!("T{i}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{}<{}>", &caps["name"], arguments)
}
