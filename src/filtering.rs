//! Include/exclude filters for assemblies, classes and files.
//!
//! Patterns use a leading `+` (include) or `-` (exclude) and `*` as the
//! only wildcard. Without any include pattern everything is included.
//! Matching is case-insensitive and anchored to the whole name.

use regex::{Regex, RegexBuilder};

use crate::error::{CovError, Result};

#[derive(Debug)]
pub struct Filter {
    exclude: Vec<Regex>,
    include: Vec<Regex>,
    has_custom_filters: bool,
}

impl Filter {
    /// Builds a filter from `+`/`-` patterns. Patterns with any other
    /// prefix are ignored.
    pub fn new(patterns: &[String]) -> Result<Self> {
        Self::build(patterns, false)
    }

    /// Like [`Filter::new`], but `/` and `\` in patterns match either
    /// path separator. Used for file filters.
    pub fn for_paths(patterns: &[String]) -> Result<Self> {
        Self::build(patterns, true)
    }

    fn build(patterns: &[String], os_independent_path_separators: bool) -> Result<Self> {
        let exclude = patterns
            .iter()
            .filter(|p| p.starts_with('-'))
            .map(|p| filter_regex(p, os_independent_path_separators))
            .collect::<Result<Vec<_>>>()?;

        let mut include = patterns
            .iter()
            .filter(|p| p.starts_with('+'))
            .map(|p| filter_regex(p, os_independent_path_separators))
            .collect::<Result<Vec<_>>>()?;

        let has_custom_filters = !exclude.is_empty() || !include.is_empty();

        if include.is_empty() {
            include.push(filter_regex("+*", os_independent_path_separators)?);
        }

        Ok(Filter {
            exclude,
            include,
            has_custom_filters,
        })
    }

    /// Whether any pattern was supplied at all.
    #[must_use]
    pub fn has_custom_filters(&self) -> bool {
        self.has_custom_filters
    }

    /// Excludes win over includes.
    #[must_use]
    pub fn is_included(&self, name: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(name)) {
            return false;
        }

        self.include.iter().any(|re| re.is_match(name))
    }
}

fn filter_regex(pattern: &str, os_independent_path_separators: bool) -> Result<Regex> {
    // Wildcards and separators are swapped for placeholders so that the
    // remaining text can be regex-escaped as a whole.
    let mut body = pattern[1..].replace('*', "$$$*");

    if os_independent_path_separators {
        body = body.replace('/', "$$$pathseparator$$$");
        body = body.replace('\\', "$$$pathseparator$$$");
    }

    let mut escaped = regex::escape(&body);
    escaped = escaped.replace(r"\$\$\$\*", ".*");
    escaped = escaped.replace(r"\$\$\$pathseparator\$\$\$", r"[/\\]");

    RegexBuilder::new(&format!("^{escaped}$"))
        .case_insensitive(true)
        .build()
        .map_err(|err| CovError::Parse(format!("invalid filter '{pattern}': {err}")))
}
