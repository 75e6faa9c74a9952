//! Path-prefix ignore rules.

use crate::paths::is_same_or_descendant;

/// Set of ignored subtrees, expressed as index paths.
///
/// A pattern such as `/docs/private` ignores `docs/private` and everything
/// beneath it, but not `docs/private-notes`. Leading and trailing slashes
/// in patterns are insignificant; matching is case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    patterns: Vec<String>,
}

impl IgnoreSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        patterns.sort();
        patterns.dedup();

        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// True when `relative` is an ignored path or lies beneath one.
    pub fn is_ignored(&self, relative: &str) -> bool {
        !relative.is_empty()
            && self
                .patterns
                .iter()
                .any(|pattern| is_same_or_descendant(relative, pattern))
    }

    /// True when some ignored subtree lies strictly beneath `relative`.
    pub fn contains_ignored_descendant(&self, relative: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern != relative && is_same_or_descendant(pattern, relative))
    }
}
