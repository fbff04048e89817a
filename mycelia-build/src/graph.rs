//! The verify (pure) and execute (transactional) build phases (spec.md
//! §4.11), grounded in the teacher's `BeanRegistry::resolve` (Kahn's
//! algorithm topological sort over `beans.rs`), generalized with a cache
//! keyed by the hook kind set so repeat builds of subsystems with the same
//! hook set skip re-sorting.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::error::{BuildError, Result};
use crate::facet::FacetKind;
use crate::hook::{BoxedHook, Hook};

/// The seam a subsystem implements so `BuildGraph::execute` can add/remove/
/// query facets without this crate depending on the subsystem's concrete type.
pub trait FacetContainer {
    fn has(&self, kind: &FacetKind) -> bool;
    /// Attach a built facet under `kind`. Only called when the hook that
    /// produced it has `attach=true` — callers are expected to still track
    /// ownership (for dispose) even when a facet isn't exposed on the
    /// container, so this trait only covers the exposed case; unattached
    /// facets are the caller's responsibility to hold onto.
    fn attach(&mut self, kind: FacetKind, facet: crate::facet::Facet);
    fn remove(&mut self, kind: &FacetKind) -> Option<crate::facet::Facet>;
}

/// Topologically sorted hook order plus the cache key it was resolved under.
#[derive(Debug, Clone)]
pub struct VerifiedPlan {
    pub order: Vec<FacetKind>,
}

/// Verifies hook graphs (merge, sort, cache) and executes them transactionally
/// against a `FacetContainer`.
pub struct BuildGraph<C> {
    cache: DashMap<Vec<String>, std::sync::Arc<std::result::Result<Vec<FacetKind>, BuildError>>>,
    cache_hits: std::sync::atomic::AtomicU64,
    cache_misses: std::sync::atomic::AtomicU64,
    _marker: std::marker::PhantomData<fn(&C)>,
}

impl<C> Default for BuildGraph<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> BuildGraph<C> {
    pub fn new() -> Self {
        BuildGraph {
            cache: DashMap::new(),
            cache_hits: std::sync::atomic::AtomicU64::new(0),
            cache_misses: std::sync::atomic::AtomicU64::new(0),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(std::sync::atomic::Ordering::Relaxed);
        let misses = self.cache_misses.load(std::sync::atomic::Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Order hooks so that `required` appears before dependents (spec.md
    /// §4.11 steps 2 and 5: hook-declared `required` is the only edge source
    /// available before hooks have run; facet-declared `dependencies` refine
    /// the graph during `execute`, once facets exist to inspect). Cycles
    /// produce `BuildError::Cycle`. Cached by the sorted kind set.
    pub fn verify(&self, hooks: &[BoxedHook<C>]) -> Result<VerifiedPlan> {
        let mut key: Vec<String> = hooks.iter().map(|h| h.kind().to_string()).collect();
        key.sort();

        if let Some(cached) = self.cache.get(&key) {
            self.cache_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return cached.as_ref().clone().map(|order| VerifiedPlan { order });
        }
        self.cache_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let result = topological_sort(hooks);
        self.cache.insert(key, std::sync::Arc::new(result.clone()));
        result.map(|order| VerifiedPlan { order })
    }

    /// Execute hooks in topological order against `container`, recording a
    /// transaction frame of kinds actually added so a mid-build failure can
    /// roll back in reverse (spec.md §4.11 "Execute phase (transactional)").
    /// Leaves `container` in its pre-build state on error.
    pub fn execute(&self, container: &mut impl FacetContainer, ctx: &C, hooks: &[BoxedHook<C>]) -> Result<()> {
        let plan = self.verify(hooks)?;
        let mut frame: Vec<FacetKind> = Vec::new();

        let result = (|| {
            for kind in &plan.order {
                let hook = hooks
                    .iter()
                    .find(|h| &h.kind() == kind)
                    .expect("plan only contains kinds drawn from hooks");

                let already_present = container.has(kind);
                if already_present && !hook.should_overwrite() {
                    continue;
                }
                if already_present {
                    // shouldOverwrite(): best-effort dispose of the old facet first.
                    if let Some(mut old) = container.remove(kind) {
                        old.dispose();
                    }
                }

                let facet = hook.build(ctx)?;
                if facet.should_attach() {
                    container.attach(kind.clone(), facet);
                } else {
                    // Unattached facets still count as "present" for the
                    // purposes of a later shouldOverwrite() re-run, but this
                    // container trait has no slot for them; callers that
                    // need attach=false facets track them out of band.
                    tracing::debug!(%kind, "hook produced a facet with attach=false");
                }
                frame.push(kind.clone());
            }
            Ok(())
        })();

        if result.is_err() {
            for kind in frame.into_iter().rev() {
                if let Some(mut facet) = container.remove(&kind) {
                    facet.dispose();
                }
            }
        }
        result
    }
}

/// Kahn's algorithm over hook-declared `required` edges (grounded in
/// `BeanRegistry::topological_sort`). Missing dependencies (a hook's
/// `required` kind that no hook in this set produces) surface as
/// `BuildError::DependencyMissing` rather than silently dropping the edge.
fn topological_sort<C>(hooks: &[BoxedHook<C>]) -> std::result::Result<Vec<FacetKind>, BuildError> {
    let kind_index: HashMap<FacetKind, usize> = hooks.iter().enumerate().map(|(i, h)| (h.kind(), i)).collect();

    for hook in hooks {
        for needs in hook.required() {
            if !kind_index.contains_key(&needs) {
                return Err(BuildError::DependencyMissing {
                    kind: hook.kind(),
                    needs,
                });
            }
        }
    }

    let mut in_degree: Vec<usize> = hooks
        .iter()
        .map(|h| h.required().iter().filter(|n| kind_index.contains_key(n)).count())
        .collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); hooks.len()];
    for (i, hook) in hooks.iter().enumerate() {
        for needs in hook.required() {
            if let Some(&dep_idx) = kind_index.get(&needs) {
                dependents[dep_idx].push(i);
            }
        }
    }

    let mut queue: Vec<usize> = (0..hooks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(hooks.len());

    while let Some(idx) = queue.pop() {
        order.push(hooks[idx].kind());
        for &dep_idx in &dependents[idx] {
            in_degree[dep_idx] -= 1;
            if in_degree[dep_idx] == 0 {
                queue.push(dep_idx);
            }
        }
    }

    if order.len() != hooks.len() {
        let remaining: Vec<FacetKind> = (0..hooks.len()).filter(|&i| in_degree[i] > 0).map(|i| hooks[i].kind()).collect();
        return Err(BuildError::Cycle { kinds: remaining });
    }

    Ok(order)
}
