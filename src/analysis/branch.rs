use std::hash::{Hash, Hasher};

/// A single branch of a branching statement.
///
/// The identifier is stable across repeated parses of the same report so
/// that merging twice counts visits twice without inventing new branches.
#[derive(Debug, Clone)]
pub struct Branch {
    pub branch_visits: i32,
    pub identifier: String,
}

impl Branch {
    pub fn new(branch_visits: i32, identifier: impl Into<String>) -> Self {
        Branch {
            branch_visits,
            identifier: identifier.into(),
        }
    }
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Branch {}

impl Hash for Branch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_visit_counts() {
        assert_eq!(Branch::new(10, "Test"), Branch::new(11, "Test"));
        assert_ne!(Branch::new(10, "Test"), Branch::new(10, "Other"));
    }
}
