use serde::{Deserialize, Serialize};

use super::TagSet;

/// Result of evaluating one expression for one tag combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub tags: TagSet,
    pub value: f64,
}

impl Group {
    pub fn new(tags: TagSet, value: f64) -> Self {
        Self { tags, value }
    }

    /// Any non-zero value is truthy. NaN counts as truthy, as it is not zero.
    pub fn is_truthy(&self) -> bool {
        self.value != 0.0
    }
}

/// Sort groups by canonical tags so output order never depends on backend order
pub fn sort_groups(groups: &mut [Group]) {
    groups.sort_by(|a, b| a.tags.cmp(&b.tags));
}

/// True if any truthy group in `groups` matches `tags`
pub fn any_truthy_match(groups: &[Group], tags: &TagSet) -> bool {
    groups.iter().any(|g| g.is_truthy() && g.tags.matches(tags))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Group::new(TagSet::new(), 1.0).is_truthy());
        assert!(Group::new(TagSet::new(), -0.5).is_truthy());
        assert!(!Group::new(TagSet::new(), 0.0).is_truthy());
    }

    #[test]
    fn test_sort_groups_by_canonical_tags() {
        let mut groups = vec![
            Group::new(TagSet::new().with("a", "c"), 1.0),
            Group::new(TagSet::new().with("a", "b"), 1.0),
        ];
        sort_groups(&mut groups);
        assert_eq!(groups[0].tags.get("a"), Some("b"));
    }

    #[test]
    fn test_any_truthy_match_ignores_false_groups() {
        let groups = vec![
            Group::new(TagSet::new().with("a", "b"), 1.0),
            Group::new(TagSet::new().with("a", "c"), 0.0),
        ];
        assert!(any_truthy_match(&groups, &TagSet::new().with("a", "b")));
        assert!(!any_truthy_match(&groups, &TagSet::new().with("a", "c")));
    }
}
