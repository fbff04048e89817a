//! Hooks: `(ctx, api, subsystem) -> Facet` factories plus metadata
//! (spec.md §3 "Hook / Facet", §4.11).
//!
//! Grounded in the teacher's `Bean` trait (`r2e-core`/`quarlus-core`
//! `beans.rs`): a hook declares its `kind` plus a `required` set the same
//! way a `Bean` declares `dependencies()`, and `build` plays the role of
//! `Bean::build(ctx)`.

use crate::error::Result;
use crate::facet::{Facet, FacetKind};

/// A hook factory generic over the build context `C` a subsystem threads
/// through (the facade crate's `BuildContext`, holding `ctx`, `api`, and a
/// handle back to the subsystem being built).
pub trait Hook<C>: Send + Sync {
    /// The facet kind this hook produces.
    fn kind(&self) -> FacetKind;

    /// Facet kinds that must already be installed (and initialized) before
    /// this hook runs. Combined with `Facet::dependencies()` when the graph
    /// builder computes the full dependency edge set (spec.md §4.11 step 5).
    fn required(&self) -> Vec<FacetKind> {
        Vec::new()
    }

    /// Whether, if a facet of this kind already exists, this hook's output
    /// should replace it (spec.md §4.11: "If present and `shouldOverwrite()`
    /// is true, remove the old ... then add/init/attach the new").
    fn should_overwrite(&self) -> bool {
        false
    }

    /// A short label used in `BuildError::HookFailed` and tracing events —
    /// e.g. `"default/router"`, `"myapp/custom-listeners"`.
    fn source(&self) -> &'static str {
        "unknown"
    }

    /// Build the facet. Hook execution never suspends (spec.md §5).
    fn build(&self, ctx: &C) -> Result<Facet>;
}

/// A boxed, type-erased hook list entry, as stored by `BuildGraph::verify`.
pub type BoxedHook<C> = std::sync::Arc<dyn Hook<C>>;

/// Merge default hooks with user-supplied hooks (spec.md §4.11 step 1): user
/// hooks for a kind already present among the defaults replace the default
/// for that kind, preserving the defaults' relative order for everything
/// else and appending any genuinely new kind at the end.
pub fn merge_hooks<C>(defaults: Vec<BoxedHook<C>>, user: Vec<BoxedHook<C>>) -> Vec<BoxedHook<C>> {
    let mut merged = defaults;
    for hook in user {
        let kind = hook.kind();
        if let Some(slot) = merged.iter_mut().find(|h| h.kind() == kind) {
            *slot = hook;
        } else {
            merged.push(hook);
        }
    }
    merged
}
