//! The closed error taxonomy shared by every Mycelia crate.

use std::fmt;

/// All errors surfaced through the Mycelia public API.
///
/// This is the single error type kernel, router, build graph, and request
/// engine funnel into; crate-local error types (e.g. `mycelia_build::BuildError`)
/// convert into this one at the boundary rather than leaking their own shape.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MyceliaError {
    /// Path fails the grammar in `path::parse`, or is empty.
    InvalidPath { path: String },
    /// Unknown subsystem, or no registered pattern matches.
    NoRoute { path: String },
    /// `accept` rejected because the queue is full under the `reject` policy.
    QueueFull { subsystem: String },
    /// `accept` attempted on a paused subsystem configured to reject.
    Paused { subsystem: String },
    /// ACL denied: channel access, permission wrapper, or non-kernel `callerIdSetBy`.
    AccessDenied { path: String, reason: &'static str },
    /// The PKR is known but has expired.
    PKRExpired { uuid: String },
    /// The PKR is not known to the registry.
    PKRUnknown { uuid: String },
    /// A handler raised an error while processing a message.
    HandlerError { inner: String },
    /// A response-required send did not receive a response before its deadline.
    Timeout { timeout_ms: u64 },
    /// Topological sort of the build graph detected a cycle.
    BuildCycle { kinds: Vec<String> },
    /// A hook's required facet kind is not available in the build.
    BuildDependencyMissing { kind: String, needs: String },
    /// A channel route is already registered.
    DuplicateChannel { route: String },
    /// The operation was cancelled explicitly, or its owner was disposed while pending.
    OperationCancelled,
    /// `MessagePool::acquire` failed because the pool is bounded and construction
    /// is forbidden by configuration.
    PoolExhausted,
}

impl fmt::Display for MyceliaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MyceliaError::InvalidPath { path } => write!(f, "invalid path: {path:?}"),
            MyceliaError::NoRoute { path } => write!(f, "no route for path: {path}"),
            MyceliaError::QueueFull { subsystem } => {
                write!(f, "queue full for subsystem: {subsystem}")
            }
            MyceliaError::Paused { subsystem } => {
                write!(f, "subsystem is paused: {subsystem}")
            }
            MyceliaError::AccessDenied { path, reason } => {
                write!(f, "access denied for {path}: {reason}")
            }
            MyceliaError::PKRExpired { uuid } => write!(f, "PKR expired: {uuid}"),
            MyceliaError::PKRUnknown { uuid } => write!(f, "PKR unknown: {uuid}"),
            MyceliaError::HandlerError { inner } => write!(f, "handler error: {inner}"),
            MyceliaError::Timeout { timeout_ms } => {
                write!(f, "timed out after {timeout_ms}ms")
            }
            MyceliaError::BuildCycle { kinds } => {
                write!(f, "build graph cycle among: {}", kinds.join(" -> "))
            }
            MyceliaError::BuildDependencyMissing { kind, needs } => {
                write!(f, "facet {kind} requires missing facet {needs}")
            }
            MyceliaError::DuplicateChannel { route } => {
                write!(f, "channel already registered: {route}")
            }
            MyceliaError::OperationCancelled => write!(f, "operation cancelled"),
            MyceliaError::PoolExhausted => write!(f, "message pool exhausted"),
        }
    }
}

impl std::error::Error for MyceliaError {}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MyceliaError>;
