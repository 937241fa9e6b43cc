//! Dependency resolution
//!
//! Two rules decide whether a crit/warn group may count toward a severity:
//!
//! - same-alert suppression: a truthy depends group with matching tags
//!   suppresses the group, which then falls through to Normal;
//! - cross-alert blocking: for `depends = alert(B, S)`, a committed instance
//!   of B with matching tags at S, or at Unevaluated, makes the group
//!   Unevaluated. Unevaluated cascades down dependency chains this way.
//!
//! Matching is intersection-equality on tags, so a coarse depends result can
//! cover many finer-grained groups.

use std::collections::BTreeMap;

use super::graph::Depends;
use super::state::StateReader;
use crate::alerts::Severity;
use crate::tags::{any_truthy_match, Group, TagSet};

/// What the resolver decided for one group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// Counts toward Critical/Warning if truthy
    Active,
    /// Masked by the alert's own depends expression
    Suppressed,
    /// Blocked by another alert's state
    Unevaluated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGroup {
    pub group: Group,
    pub status: GroupStatus,
}

impl ResolvedGroup {
    /// Truthy and not suppressed or blocked
    pub fn fires(&self) -> bool {
        self.status == GroupStatus::Active && self.group.is_truthy()
    }
}

/// Crit and warn groups of one alert after both rules have been applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub crit: Vec<ResolvedGroup>,
    pub warn: Vec<ResolvedGroup>,
}

/// Apply same-alert suppression, then cross-alert blocking
pub fn resolve(
    crit: Vec<Group>,
    warn: Vec<Group>,
    depends_groups: Option<&[Group]>,
    depends: Option<&Depends>,
    state: &dyn StateReader,
) -> Resolution {
    let mut resolution = Resolution {
        crit: suppress_same_alert(crit, depends_groups),
        warn: suppress_same_alert(warn, depends_groups),
    };

    if let Some(Depends::Alert { alert, severity }) = depends {
        let entries = state.instances(alert);
        block_cross_alert(&mut resolution.crit, &entries, *severity);
        block_cross_alert(&mut resolution.warn, &entries, *severity);
    }

    resolution
}

/// Mark each group suppressed if any truthy depends group matches its tags
pub fn suppress_same_alert(groups: Vec<Group>, depends: Option<&[Group]>) -> Vec<ResolvedGroup> {
    groups
        .into_iter()
        .map(|group| {
            let suppressed = depends.map_or(false, |d| any_truthy_match(d, &group.tags));
            ResolvedGroup {
                group,
                status: if suppressed {
                    GroupStatus::Suppressed
                } else {
                    GroupStatus::Active
                },
            }
        })
        .collect()
}

/// Mark each group Unevaluated if a matching entry of the referenced alert
/// sits at `required` or is itself Unevaluated
pub fn block_cross_alert(groups: &mut [ResolvedGroup], entries: &[(TagSet, Severity)], required: Severity) {
    for resolved in groups.iter_mut() {
        let blocked = entries.iter().any(|(tags, severity)| {
            (*severity == required || *severity == Severity::Unevaluated)
                && resolved.group.tags.matches(tags)
        });
        if blocked {
            resolved.status = GroupStatus::Unevaluated;
        }
    }
}

/// Final severity per instance.
///
/// Instances are the union of crit and warn tag sets. Unevaluated wins
/// outright; otherwise Critical if the crit group fires, else Warning if the
/// warn group fires, else Normal.
pub fn assign_severities(resolution: &Resolution) -> Vec<(TagSet, Severity)> {
    #[derive(Default)]
    struct Instance {
        crit: bool,
        warn: bool,
        unevaluated: bool,
    }

    let mut instances: BTreeMap<&TagSet, Instance> = BTreeMap::new();
    for r in &resolution.crit {
        let entry = instances.entry(&r.group.tags).or_default();
        entry.crit |= r.fires();
        entry.unevaluated |= r.status == GroupStatus::Unevaluated;
    }
    for r in &resolution.warn {
        let entry = instances.entry(&r.group.tags).or_default();
        entry.warn |= r.fires();
        entry.unevaluated |= r.status == GroupStatus::Unevaluated;
    }

    instances
        .into_iter()
        .map(|(tags, i)| {
            let severity = if i.unevaluated {
                Severity::Unevaluated
            } else if i.crit {
                Severity::Critical
            } else if i.warn {
                Severity::Warning
            } else {
                Severity::Normal
            };
            (tags.clone(), severity)
        })
        .collect()
}
