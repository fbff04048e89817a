//! The AccessControl subsystem (spec.md §4.12): a factory surface for
//! resources, friends, and wired subsystem identities, invoked through
//! `kernel://create/*` messages so every identity creation goes through the
//! normal `sendProtected` pipeline (enforced by the facade crate's `Kernel`,
//! which trusts these factories only because it calls them itself after
//! confirming `callerIdSetBy == kernel.pkr`).

use std::sync::Arc;

use mycelia_core::error::Result;
use mycelia_core::security::{CreatePrincipalOpts, IdentityHandle, KernelLink, Pkr, PrincipalKind, PrincipalRegistry};

/// A `resource` principal owned by another principal, with an attached
/// resource identity (spec.md §4.12 `createResource`).
pub struct Resource<K: KernelLink> {
    pub pkr: Pkr,
    pub identity: Arc<IdentityHandle<K>>,
}

/// A `friend` principal representing an external collaborator (spec.md
/// §4.12 `createFriend`).
pub struct Friend<K: KernelLink> {
    pub pkr: Pkr,
    pub identity: Arc<IdentityHandle<K>>,
    pub endpoint: Option<String>,
    pub role: Option<String>,
}

/// Options accepted by `AccessControl::create_friend`.
#[derive(Debug, Clone, Default)]
pub struct CreateFriendOpts {
    pub endpoint: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub session_key: Option<String>,
    pub role: Option<String>,
}

/// Which kind of principal `wire_subsystem` mints — the two kinds spec.md
/// §4.12 names as legal for a wired subsystem (`child, topLevel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Child,
    TopLevel,
}

impl From<WireKind> for PrincipalKind {
    fn from(kind: WireKind) -> Self {
        match kind {
            WireKind::Child => PrincipalKind::Child,
            WireKind::TopLevel => PrincipalKind::TopLevel,
        }
    }
}

/// A subsystem principal plus its identity wrapper, returned by `wire_subsystem`.
pub struct WiredSubsystem<K: KernelLink> {
    pub pkr: Pkr,
    pub identity: Arc<IdentityHandle<K>>,
}

/// The kernel child subsystem exposing `createResource`, `createFriend`,
/// and `wireSubsystem`. Holds the same `PrincipalRegistry`/`KernelLink`
/// handles the kernel itself does — it is a privileged facet of the kernel,
/// not an independently addressable principal of its own.
pub struct AccessControl<K: KernelLink> {
    registry: Arc<PrincipalRegistry>,
    kernel: Arc<K>,
}

impl<K: KernelLink> AccessControl<K> {
    pub fn new(registry: Arc<PrincipalRegistry>, kernel: Arc<K>) -> Self {
        AccessControl { registry, kernel }
    }

    fn make_identity(&self, pkr: Pkr) -> Result<Arc<IdentityHandle<K>>> {
        self.registry.create_rws(&pkr)?;
        Ok(Arc::new(IdentityHandle::new(pkr, self.registry.clone(), self.kernel.clone())))
    }

    /// `createResource(ownerInstance, name, resourceInstance, metadata?)`:
    /// creates a `resource` principal owned by `owner`'s PKR and an attached
    /// resource identity.
    pub fn create_resource(&self, owner: &Pkr, name: impl Into<String>, metadata: Option<serde_json::Value>) -> Result<Resource<K>> {
        let pkr = self.registry.create_principal(
            PrincipalKind::Resource,
            CreatePrincipalOpts {
                name: Some(name.into()),
                instance: None,
                owner: Some(owner.clone()),
                metadata,
            },
        )?;
        let identity = self.make_identity(pkr.clone())?;
        tracing::debug!(resource = %pkr.uuid, owner = %owner.uuid, "resource created");
        Ok(Resource { pkr, identity })
    }

    /// `createFriend(name, {endpoint?, metadata?, sessionKey?, role?})`:
    /// creates a `friend` principal representing an external collaborator.
    pub fn create_friend(&self, name: impl Into<String>, opts: CreateFriendOpts) -> Result<Friend<K>> {
        let pkr = self.registry.create_principal(
            PrincipalKind::Friend,
            CreatePrincipalOpts {
                name: Some(name.into()),
                instance: None,
                owner: None,
                metadata: opts.metadata,
            },
        )?;
        let identity = self.make_identity(pkr.clone())?;
        tracing::debug!(friend = %pkr.uuid, "friend created");
        Ok(Friend {
            pkr,
            identity,
            endpoint: opts.endpoint,
            role: opts.role,
        })
    }

    /// `wireSubsystem(kind, subsystemInstance, {metadata?})`: registers a
    /// principal for a `child`/`topLevel` subsystem instance and returns its
    /// identity, ready to attach to that instance's `identity` slot.
    pub fn wire_subsystem(&self, kind: WireKind, instance_name: impl Into<String>, metadata: Option<serde_json::Value>) -> Result<WiredSubsystem<K>> {
        let instance_name = instance_name.into();
        let pkr = self.registry.create_principal(
            kind.into(),
            CreatePrincipalOpts {
                name: Some(instance_name.clone()),
                instance: Some(instance_name),
                owner: None,
                metadata,
            },
        )?;
        let identity = self.make_identity(pkr.clone())?;
        tracing::debug!(subsystem = %pkr.uuid, ?kind, "subsystem wired");
        Ok(WiredSubsystem { pkr, identity })
    }
}
