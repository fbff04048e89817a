//! Unforgeable tokens.
//!
//! Mycelia's "keys" are opaque values compared by reference identity, not by
//! cryptographic material (see spec.md §1 Non-goals: "not a cryptographic
//! protocol"). A `PKey` is cheap to clone (an `Arc` bump) and two clones of
//! the same mint always compare equal; two independently minted keys never do,
//! regardless of any incidental structural similarity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Clone)]
pub struct PKey(Arc<()>);

impl PKey {
    /// Mint a new, unique token.
    pub fn mint() -> Self {
        PKey(Arc::new(()))
    }
}

impl PartialEq for PKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for PKey {}

impl Hash for PKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for PKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PKey({:p})", Arc::as_ptr(&self.0))
    }
}
