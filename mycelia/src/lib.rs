//! Mycelia — an in-process, capability-secured message kernel.
//!
//! This facade crate wires the sub-crates together into the process root a
//! host binary actually builds:
//!
//! ```ignore
//! use mycelia::prelude::*;
//!
//! let system = MessageSystem::bootstrap(MessageSystemConfig::default())?;
//! let inventory = system.register_subsystem("inventory", SubsystemConfig::default()).await?;
//! inventory.register_route("inventory://items/{id}", handler)?;
//! ```
//!
//! | Crate             | Provides                                           |
//! |--------------------|----------------------------------------------------|
//! | `mycelia-core`     | Message/MessagePool, Path, config, error taxonomy   |
//! | `mycelia-build`    | Hook/Facet, the transactional build graph           |
//! | `mycelia-runtime`  | CircularBuffer queue, Processor, Scheduler          |
//! | `mycelia-rpc`      | ChannelManager, ResponseManager, RequestEngine      |
//! | `mycelia-access`   | AccessControl child subsystem                       |
//! | `mycelia-events`   | ListenerRegistry (pub/sub fan-out)                  |
//! | `mycelia` (here)   | Router, Subsystem, Kernel, MessageSystem            |

pub mod default_hooks;
pub mod kernel;
pub mod router;
pub mod subsystem;
pub mod system;

pub use kernel::Kernel;
pub use router::{MatchPolicy, RouteHandler, Router};
pub use subsystem::{BuildContext, LifecycleState, Subsystem};
pub use system::MessageSystem;

pub use default_hooks::{default_hooks, CommandsFacet, QueriesFacet, RequestsFacet, ResponsesFacet};

// Re-exported so a downstream crate depending only on `mycelia` doesn't also
// need a direct `mycelia-core`/`mycelia-build`/... dependency to name the
// types that cross this facade's own public API (config structs, the error
// taxonomy, `Message`, the hook/facet types).
pub use mycelia_build::{BoxedHook, Facet, FacetKind, Hook};
pub use mycelia_core::config::{MatchPolicy as ConfigMatchPolicy, MessageSystemConfig, OverflowPolicy, SubsystemConfig};
pub use mycelia_core::error::{MyceliaError, Result};
pub use mycelia_core::message::{Message, MessagePool, MessageType, PoolStats};
pub use mycelia_core::security::{IdentityHandle, KernelLink, Pkr, PrincipalKind, SendOptions};
pub use mycelia_events::ListenerRegistry;
pub use mycelia_rpc::{ChannelManager, RegisterChannelOpts, RequestEngine, ResponseManager, TimeoutEmitter};
pub use mycelia_runtime::{ProcessorStats, Scheduler, Tickable};

/// Unified prelude — `use mycelia::prelude::*` pulls in the types a host
/// binary building a `MessageSystem` needs without naming every sub-crate.
pub mod prelude {
    pub use crate::{
        default_hooks, BuildContext, ConfigMatchPolicy, Kernel, LifecycleState, MatchPolicy, Message, MessageSystemConfig, MyceliaError,
        Result, Router, SendOptions, Subsystem, SubsystemConfig,
    };
    pub use crate::MessageSystem;
}
