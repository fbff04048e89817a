//! The Subsystem Build Graph (spec.md §4.11): hook metadata, topological
//! sort with an amortizing cache, and transactional facet install/rollback.
//!
//! Grounded in the teacher's `BeanRegistry` (`quarlus-core::beans`): a
//! `Hook<C>` plays the role of `Bean`, a `Facet` the role of a resolved bean
//! instance, and `BuildGraph::verify`/`execute` together are `resolve()`
//! split into its pure sort and its side-effecting construction so a failed
//! construction can roll back (the teacher's beans never needed rollback —
//! bean construction there can't observably fail partway through a subsystem
//! that's still being used).

pub mod error;
pub mod facet;
pub mod graph;
pub mod hook;

pub use error::BuildError;
pub use facet::{Facet, FacetKind};
pub use graph::{BuildGraph, FacetContainer, VerifiedPlan};
pub use hook::{merge_hooks, BoxedHook, Hook};
