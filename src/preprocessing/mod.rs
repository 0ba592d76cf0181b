//! Report preprocessors.
//!
//! Several report formats list compiler generated startup code as classes
//! of their own, detached from the class they were generated for. The
//! preprocessors rewrite such reports in place before parsing so that the
//! generated code gets attributed to the class it belongs to.

pub mod cobertura;
pub mod dotcover;
pub mod dynamiccodecoverage;
pub mod opencover;
pub mod visualstudio;

/// Picks the nearest candidate declared at or before `first_line`.
/// Candidates are visited in document order, a later candidate on the same
/// line wins.
pub(crate) fn closest_preceding<I>(candidates: I, first_line: i32) -> Option<usize>
where
    I: Iterator<Item = (usize, i32)>,
{
    let mut closest: Option<(usize, i32)> = None;
    for (index, line) in candidates {
        if line > first_line {
            continue;
        }
        match closest {
            Some((_, best)) if line < best => {}
            _ => closest = Some((index, line)),
        }
    }
    closest.map(|(index, _)| index)
}
