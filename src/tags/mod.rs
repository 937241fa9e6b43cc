//! Tag sets, groups and the intersection-equality matching rule

pub mod group;
pub mod series;
pub mod tagset;

pub use group::{any_truthy_match, sort_groups, Group};
pub use series::Series;
pub use tagset::{TagParseError, TagSet};
