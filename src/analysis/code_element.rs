use std::hash::{Hash, Hasher};

/// Kind of a code element within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodeElementType {
    Method,
    Property,
}

/// A method or property together with the line span it occupies.
#[derive(Debug, Clone)]
pub struct CodeElement {
    pub full_name: String,
    pub name: String,
    pub element_type: CodeElementType,
    pub first_line: i32,
    pub last_line: i32,
    coverage_quota: Option<f64>,
}

impl CodeElement {
    pub fn new(
        full_name: impl Into<String>,
        name: impl Into<String>,
        element_type: CodeElementType,
        first_line: i32,
        last_line: i32,
        coverage_quota: Option<f64>,
    ) -> Self {
        CodeElement {
            full_name: full_name.into(),
            name: name.into(),
            element_type,
            first_line,
            last_line,
            coverage_quota: coverage_quota.map(|q| q.clamp(0.0, 100.0)),
        }
    }

    #[must_use]
    pub fn coverage_quota(&self) -> Option<f64> {
        self.coverage_quota
    }

    /// Keeps the higher of the current quota and the given one. Used after
    /// merging files so an element never reports less coverage than any of
    /// the merged inputs recorded for it.
    pub fn apply_maximum_coverage_quota(&mut self, quota: Option<f64>) {
        if let Some(quota) = quota {
            let quota = quota.clamp(0.0, 100.0);
            match self.coverage_quota {
                Some(existing) if existing >= quota => {}
                _ => self.coverage_quota = Some(quota),
            }
        }
    }
}

impl PartialEq for CodeElement {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name && self.first_line == other.first_line
    }
}

impl Eq for CodeElement {}

impl Hash for CodeElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_name.hash(state);
        self.first_line.hash(state);
    }
}
