//! Facet kinds and the facet capability record itself (spec.md §3 "Hook /
//! Facet", Design Notes §9 "Dynamic dispatch → tagged variants").
//!
//! The source language composes facets by duck typing; here a `Facet` wraps
//! a typed capability behind `Any` and callers downcast once, at the seam
//! where a subsystem exposes it (`identity`, `router`, `listeners`, ...) —
//! stringly-typed lookup never leaks past that seam.

use std::any::Any;
use std::fmt;

/// The closed-ish set of facet kinds a subsystem family wires together.
/// `Custom` covers application-defined facets the core kinds don't name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FacetKind {
    Queue,
    Processor,
    Scheduler,
    Router,
    Identity,
    Listeners,
    Requests,
    Responses,
    Commands,
    Queries,
    Custom(&'static str),
}

impl fmt::Display for FacetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacetKind::Queue => write!(f, "queue"),
            FacetKind::Processor => write!(f, "processor"),
            FacetKind::Scheduler => write!(f, "scheduler"),
            FacetKind::Router => write!(f, "router"),
            FacetKind::Identity => write!(f, "identity"),
            FacetKind::Listeners => write!(f, "listeners"),
            FacetKind::Requests => write!(f, "requests"),
            FacetKind::Responses => write!(f, "responses"),
            FacetKind::Commands => write!(f, "commands"),
            FacetKind::Queries => write!(f, "queries"),
            FacetKind::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// A named capability attached to a subsystem. Holds the typed capability
/// value behind `Any` plus the runtime `dependencies` a validator may
/// consult (spec.md §4.11: "Facets may add runtime `dependencies`"), and an
/// optional disposer invoked on best-effort teardown (rollback or normal
/// dispose).
pub struct Facet {
    kind: FacetKind,
    dependencies: Vec<FacetKind>,
    attach: bool,
    value: Box<dyn Any + Send + Sync>,
    on_dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facet")
            .field("kind", &self.kind)
            .field("dependencies", &self.dependencies)
            .field("attach", &self.attach)
            .finish_non_exhaustive()
    }
}

impl Facet {
    pub fn new<T: Send + Sync + 'static>(kind: FacetKind, value: T) -> Self {
        Facet {
            kind,
            dependencies: Vec::new(),
            attach: true,
            value: Box::new(value),
            on_dispose: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<FacetKind>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_attach(mut self, attach: bool) -> Self {
        self.attach = attach;
        self
    }

    /// Register an `onDispose` callback, run best-effort during rollback
    /// (spec.md §4.11) or ordinary subsystem disposal.
    pub fn with_dispose(mut self, on_dispose: impl FnOnce() + Send + 'static) -> Self {
        self.on_dispose = Some(Box::new(on_dispose));
        self
    }

    pub fn kind(&self) -> &FacetKind {
        &self.kind
    }

    pub fn dependencies(&self) -> &[FacetKind] {
        &self.dependencies
    }

    /// Whether `attach=true`, i.e. whether the graph executor should expose
    /// this facet on the subsystem at all (spec.md §4.11 step "attach
    /// (`subsystem[kind] = facet`) if `attach=true`").
    pub fn should_attach(&self) -> bool {
        self.attach
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }

    /// Invoke the disposer, if any, consuming it so it can only ever run once.
    pub fn dispose(&mut self) {
        if let Some(on_dispose) = self.on_dispose.take() {
            on_dispose();
        }
    }
}
