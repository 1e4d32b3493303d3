//! Staleness classification and the predicates that select hosts by state.

mod builder;
mod classifier;
mod predicate;

pub use builder::{PolicyBranch, PredicateBuilder};
pub use classifier::{ClassifyPolicy, classify};
pub use predicate::{CheckInWindow, HostPredicate};
