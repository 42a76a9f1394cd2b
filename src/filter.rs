//! Candidate tag filter.
//!
//! Decides whether a tag set qualifies as a boundary of interest. The filter
//! is a plain map of `tag name -> rule` and every configured rule must match
//! (an object missing any configured tag is rejected).

use std::collections::HashSet;

use hashbrown::HashMap;

use crate::models::Tags;

/// Rule applied to a single tag.
#[derive(Debug, Clone)]
pub enum TagRule {
    /// Any value is accepted, but the tag must be present.
    Any,
    /// Only the listed values are accepted.
    OneOf(HashSet<String>),
}

impl TagRule {
    fn matches(&self, value: &str) -> bool {
        match self {
            TagRule::Any => true,
            TagRule::OneOf(values) => values.contains(value),
        }
    }
}

/// Pure predicate over a tag set.
#[derive(Debug, Clone)]
pub struct TagFilter {
    rules: HashMap<String, TagRule>,
}

impl TagFilter {
    pub fn new(rules: HashMap<String, TagRule>) -> Self {
        Self { rules }
    }

    /// Strict administrative boundary policy: `boundary=administrative`
    /// and a present `admin_level` tag.
    pub fn administrative() -> Self {
        Self::boundaries(["administrative"])
    }

    /// Boundary policy over an accepted set of `boundary` values
    /// (e.g. administrative, historic, ceremonial). `admin_level` must be
    /// present regardless.
    pub fn boundaries<I, S>(accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rules = HashMap::new();
        rules.insert(
            "boundary".to_string(),
            TagRule::OneOf(accepted.into_iter().map(Into::into).collect()),
        );
        rules.insert("admin_level".to_string(), TagRule::Any);
        Self::new(rules)
    }

    /// Evaluate the filter against a tag set. Deterministic and free of side
    /// effects; a tag absent from `tags` never matches its rule.
    pub fn evaluate(&self, tags: &Tags) -> bool {
        self.rules.iter().all(|(tag, rule)| {
            tags.get(tag).map(|value| rule.matches(value)).unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_administrative_match() {
        let filter = TagFilter::administrative();
        assert!(filter.evaluate(&tags(&[("boundary", "administrative"), ("admin_level", "8")])));
    }

    #[test]
    fn test_missing_admin_level_rejected() {
        let filter = TagFilter::administrative();
        assert!(!filter.evaluate(&tags(&[("boundary", "administrative")])));
    }

    #[test]
    fn test_unaccepted_boundary_value_rejected() {
        let filter = TagFilter::administrative();
        assert!(!filter.evaluate(&tags(&[("boundary", "maritime"), ("admin_level", "2")])));
    }

    #[test]
    fn test_absent_tag_never_matches() {
        let filter = TagFilter::administrative();
        assert!(!filter.evaluate(&tags(&[])));
        assert!(!filter.evaluate(&tags(&[("admin_level", "4")])));
    }

    #[test]
    fn test_accepted_value_set() {
        let filter = TagFilter::boundaries(["administrative", "historic", "ceremonial"]);
        assert!(filter.evaluate(&tags(&[("boundary", "historic"), ("admin_level", "6")])));
        assert!(filter.evaluate(&tags(&[("boundary", "ceremonial"), ("admin_level", "6")])));
        assert!(!filter.evaluate(&tags(&[("boundary", "national_park"), ("admin_level", "6")])));
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let filter = TagFilter::administrative();
        let t = tags(&[("boundary", "administrative"), ("admin_level", "8")]);
        for _ in 0..100 {
            assert!(filter.evaluate(&t));
        }
        // input is untouched
        assert_eq!(t.len(), 2);
    }
}
