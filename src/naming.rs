//! Class-name normalization.
//!
//! Compilers emit synthetic type names for async state machines, lambdas
//! and local functions (`Test.AsyncClass/<SendAsync>d__0`,
//! `Test.TestClass.<>c__DisplayClass14_0`, ...). The normalizers collapse
//! those back onto the declaring class and split generic suffixes into a
//! display name, so coverage lands on the class a reader expects.

use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;

/// Compiler-generated fragments: a character, an angle-quoted member name
/// and the synthetic suffix (`.<MoveNext>d__4`, `.<>c__DisplayClass1_0`).
static CLEANUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".<.*>\w_?_?\w*\d*").unwrap());

/// A trailing generic argument list (`<T>`, `<T1, T2>`).
static GENERIC_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<class_name>.+)(?P<generic_types><.+>)$").unwrap());

/// Any angle-quoted fragment, shortest match.
static ANGLE_FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").unwrap());

/// Normalized class name. Two results are the same class when name and
/// display name agree; the raw name may differ between occurrences.
#[derive(Debug, Clone)]
pub struct ClassName {
    pub name: String,
    pub display_name: String,
    pub raw_name: String,
    pub include: bool,
}

impl PartialEq for ClassName {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.display_name == other.display_name
    }
}

impl Eq for ClassName {}

impl Hash for ClassName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.display_name.hash(state);
    }
}

impl ClassName {
    fn passthrough(raw_name: &str, include: bool) -> Self {
        ClassName {
            name: raw_name.to_string(),
            display_name: raw_name.to_string(),
            raw_name: raw_name.to_string(),
            include,
        }
    }
}

/// Splits a raw class name into name, display name and include flag.
/// In raw mode the name passes through untouched.
pub fn parse_class_name(raw_name: &str, raw_mode: bool) -> ClassName {
    if raw_mode {
        return ClassName::passthrough(raw_name, true);
    }

    if let Some(separator) = raw_name.find('/') {
        let class_name = &raw_name[..separator];
        return ClassName {
            name: class_name.to_string(),
            display_name: class_name.to_string(),
            raw_name: raw_name.to_string(),
            include: include_class(class_name),
        };
    }

    if raw_name.contains('<') {
        let cleaned = CLEANUP_RE.replace_all(raw_name, "");

        if cleaned == raw_name {
            return ClassName::passthrough(raw_name, include_class(raw_name));
        }

        if let Some(caps) = GENERIC_CLASS_RE.captures(&cleaned) {
            let name = caps["class_name"].to_string();
            let display_name = format!("{}{}", &caps["class_name"], &caps["generic_types"]);
            return ClassName {
                include: include_class(&name),
                name,
                display_name,
                raw_name: raw_name.to_string(),
            };
        }

        let cleaned = cleaned.into_owned();
        return ClassName {
            include: include_class(&cleaned),
            name: cleaned.clone(),
            display_name: cleaned,
            raw_name: raw_name.to_string(),
        };
    }

    ClassName::passthrough(raw_name, include_class(raw_name))
}

fn include_class(name: &str) -> bool {
    !name.contains('$')
}

/// Normalized Dynamic Code Coverage type name. Equality spans name,
/// display name and namespace.
#[derive(Debug, Clone)]
pub struct DynamicCodeCoverageClassName {
    pub name: String,
    pub display_name: String,
    pub generic_type: Option<String>,
    pub namespace: Option<String>,
    pub include: bool,
}

impl DynamicCodeCoverageClassName {
    /// Namespace-qualified display name.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}.{}", self.display_name),
            _ => self.display_name.clone(),
        }
    }
}

impl PartialEq for DynamicCodeCoverageClassName {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.display_name == other.display_name
            && self.namespace == other.namespace
    }
}

impl Eq for DynamicCodeCoverageClassName {}

impl Hash for DynamicCodeCoverageClassName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.display_name.hash(state);
        self.namespace.hash(state);
    }
}

/// Splits a Dynamic Code Coverage `type_name` attribute. Nested and
/// compiler-generated types collapse onto their outermost declaring type;
/// a generic suffix survives only when it belongs to that type itself.
pub fn parse_dynamic_code_coverage_class_name(
    raw_name: &str,
    namespace: Option<&str>,
) -> DynamicCodeCoverageClassName {
    let (base, generic) = match GENERIC_CLASS_RE.captures(raw_name) {
        Some(caps) => (
            caps["class_name"].to_string(),
            Some(caps["generic_types"].to_string()),
        ),
        None => (raw_name.to_string(), None),
    };

    let (name, display_name, generic) = if base.contains('<') {
        let stripped = ANGLE_FRAGMENT_RE.replace_all(&base, "");
        let name = match stripped.find('.') {
            Some(idx) => stripped[..idx].to_string(),
            None => stripped.into_owned(),
        };
        let display_name = match &generic {
            Some(generic) => format!("{name}{generic}"),
            None => name.clone(),
        };
        (name, display_name, generic)
    } else if let Some(idx) = base.find('.') {
        let name = base[..idx].to_string();
        (name.clone(), name, None)
    } else {
        let display_name = match &generic {
            Some(generic) => format!("{base}{generic}"),
            None => base.clone(),
        };
        (base, display_name, generic)
    };

    DynamicCodeCoverageClassName {
        name,
        display_name,
        generic_type: generic,
        namespace: namespace.map(str::to_string),
        include: !raw_name.starts_with('<'),
    }
}
