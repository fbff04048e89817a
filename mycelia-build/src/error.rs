//! `BuildError`, flattened into `mycelia_core::MyceliaError` at the boundary
//! (SPEC_FULL.md §4.16).

use std::fmt;

use mycelia_core::error::MyceliaError;

use crate::facet::FacetKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Topological sort of hook `required` + facet `dependencies` detected a cycle.
    Cycle { kinds: Vec<FacetKind> },
    /// A hook's required facet kind is not available anywhere in the build.
    DependencyMissing { kind: FacetKind, needs: FacetKind },
    /// A hook's `build` call returned an error; `source` is the hook's
    /// `source()` label, used for diagnostics.
    HookFailed { kind: FacetKind, source: &'static str, message: String },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Cycle { kinds } => {
                write!(f, "build graph cycle among: {}", kinds.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))
            }
            BuildError::DependencyMissing { kind, needs } => {
                write!(f, "facet {kind} requires missing facet {needs}")
            }
            BuildError::HookFailed { kind, source, message } => {
                write!(f, "hook for {kind} ({source}) failed: {message}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl From<BuildError> for MyceliaError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Cycle { kinds } => MyceliaError::BuildCycle {
                kinds: kinds.iter().map(ToString::to_string).collect(),
            },
            BuildError::DependencyMissing { kind, needs } => MyceliaError::BuildDependencyMissing {
                kind: kind.to_string(),
                needs: needs.to_string(),
            },
            BuildError::HookFailed { kind, message, .. } => MyceliaError::HandlerError {
                inner: format!("{kind}: {message}"),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
