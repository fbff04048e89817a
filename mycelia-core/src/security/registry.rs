//! The centralized Principal Registry (spec.md §4.3.1).

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{MyceliaError, Result};

use super::pkey::PKey;
use super::principal::{Mint, Pkr, Principal, PrincipalKind};
use super::rws::Rws;

/// Options accepted by `PrincipalRegistry::create_principal`.
#[derive(Debug, Clone, Default)]
pub struct CreatePrincipalOpts {
    pub name: Option<String>,
    pub instance: Option<String>,
    pub owner: Option<Pkr>,
    pub metadata: Option<serde_json::Value>,
}

/// Centralized manager for principals, PKRs, and RWSes.
///
/// Indices mirror spec.md §4.3.1: `by_uuid`, `by_name`, `by_public_key`,
/// `by_private_key`, `public_to_private`, `rws_by_uuid`, `refresh_locks`.
/// Backed by `dashmap` (the teacher stack's concurrent-map crate of choice)
/// since principal lookups can be driven from any subsystem's task.
pub struct PrincipalRegistry {
    by_uuid: DashMap<String, Principal>,
    by_name: DashMap<String, String>,
    by_public_key: DashMap<PKey, String>,
    by_private_key: DashMap<PKey, String>,
    public_to_private: DashMap<PKey, PKey>,
    rws_by_uuid: DashMap<String, Rws>,
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    pkrs: DashMap<String, Pkr>,
    kernel_uuid: std::sync::OnceLock<String>,
}

impl Default for PrincipalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PrincipalRegistry {
    pub fn new() -> Self {
        PrincipalRegistry {
            by_uuid: DashMap::new(),
            by_name: DashMap::new(),
            by_public_key: DashMap::new(),
            by_private_key: DashMap::new(),
            public_to_private: DashMap::new(),
            rws_by_uuid: DashMap::new(),
            refresh_locks: DashMap::new(),
            pkrs: DashMap::new(),
            kernel_uuid: std::sync::OnceLock::new(),
        }
    }

    /// Generate unforgeable tokens for a principal kind. `kernel`, `topLevel`,
    /// and `friend` receive a private key; `child` and `resource` do not.
    pub fn mint(&self, kind: PrincipalKind) -> Mint {
        let public_key = PKey::mint();
        let private_key = if kind.mints_private_key() {
            let pk = PKey::mint();
            self.public_to_private.insert(public_key.clone(), pk.clone());
            Some(pk)
        } else {
            None
        };
        Mint { public_key, private_key }
    }

    /// Create a principal and return its `Pkr`. Enforces at most one kernel
    /// principal registry-wide.
    pub fn create_principal(&self, kind: PrincipalKind, opts: CreatePrincipalOpts) -> Result<Pkr> {
        if kind == PrincipalKind::Kernel && self.kernel_uuid.get().is_some() {
            return Err(MyceliaError::AccessDenied {
                path: "kernel://create/principal".to_string(),
                reason: "a kernel principal already exists",
            });
        }
        let uuid = Uuid::new_v4().to_string();
        let mint = self.mint(kind);
        let name = opts.name.or_else(|| opts.instance.clone());

        let mut principal = Principal::new(
            uuid.clone(),
            name.clone(),
            kind,
            mint.public_key.clone(),
            opts.owner.as_ref().map(|o| o.uuid.clone()),
        );
        if let Some(instance) = &opts.instance {
            principal.bind_instance(instance.clone());
        }

        let minter = match kind {
            PrincipalKind::Kernel => None,
            _ => self.kernel_uuid.get().and_then(|k| self.by_uuid.get(k)).map(|p| p.public_key.clone()),
        };

        let pkr = Pkr {
            uuid: uuid.clone(),
            name,
            kind,
            public_key: mint.public_key.clone(),
            minter,
            expires_at: SystemTime::now() + Pkr::DEFAULT_EXPIRATION,
        };

        if kind == PrincipalKind::Kernel {
            let _ = self.kernel_uuid.set(uuid.clone());
        }

        if let Some(n) = &pkr.name {
            self.by_name.insert(n.clone(), uuid.clone());
        }
        self.by_public_key.insert(mint.public_key.clone(), uuid.clone());
        if let Some(pk) = &mint.private_key {
            self.by_private_key.insert(pk.clone(), uuid.clone());
        }
        self.pkrs.insert(uuid.clone(), pkr.clone());
        self.by_uuid.insert(uuid, principal);

        Ok(pkr)
    }

    /// The kernel's own PKR, once created.
    pub fn kernel_pkr(&self) -> Option<Pkr> {
        self.kernel_uuid.get().and_then(|u| self.pkrs.get(u).map(|r| r.clone()))
    }

    /// Validate non-expiration and minter provenance, returning the canonical
    /// private-key token (stable across rotations) if one exists for this PKR.
    pub fn resolve_pkr(&self, pkr: &Pkr) -> Result<Option<PKey>> {
        let current = self
            .pkrs
            .get(&pkr.uuid)
            .ok_or_else(|| MyceliaError::PKRUnknown { uuid: pkr.uuid.clone() })?;
        if current.is_expired() {
            return Err(MyceliaError::PKRExpired { uuid: pkr.uuid.clone() });
        }
        Ok(self.public_to_private.get(&current.public_key).map(|r| r.clone()))
    }

    /// Look up a PKR by uuid, failing with `PKRUnknown` if absent.
    pub fn get_pkr(&self, uuid: &str) -> Result<Pkr> {
        self.pkrs
            .get(uuid)
            .map(|r| r.clone())
            .ok_or_else(|| MyceliaError::PKRUnknown { uuid: uuid.to_string() })
    }

    /// Rotate keys for a principal, idempotently under concurrent callers
    /// (serialized per-uuid via `refresh_locks`). During refresh, concurrent
    /// callers observe the current live PKR rather than racing on a half
    /// rotated one.
    pub async fn refresh_principal(&self, uuid: &str) -> Result<Pkr> {
        let lock = self
            .refresh_locks
            .entry(uuid.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut principal_entry = self
            .by_uuid
            .get_mut(uuid)
            .ok_or_else(|| MyceliaError::PKRUnknown { uuid: uuid.to_string() })?;
        let kind = principal_entry.kind;
        let old_public = principal_entry.public_key.clone();

        let mint = self.mint(kind);
        principal_entry.public_key = mint.public_key.clone();
        drop(principal_entry);

        self.by_public_key.remove(&old_public);
        self.by_public_key.insert(mint.public_key.clone(), uuid.to_string());

        let mut pkr = self
            .pkrs
            .get(uuid)
            .map(|r| r.clone())
            .ok_or_else(|| MyceliaError::PKRUnknown { uuid: uuid.to_string() })?;
        pkr.public_key = mint.public_key;
        pkr.expires_at = SystemTime::now() + Pkr::DEFAULT_EXPIRATION;
        self.pkrs.insert(uuid.to_string(), pkr.clone());

        Ok(pkr)
    }

    /// Resolve `key` to its canonical private-key token (spec.md §4.3.2),
    /// stable across the owning principal's `refresh_principal` rotations.
    /// Falls back to `key` itself for keyless `child`/`resource` kinds,
    /// which never mint a private key and so have no `public_to_private`
    /// entry to resolve through.
    pub fn canonical_key(&self, key: &PKey) -> PKey {
        self.public_to_private.get(key).map(|r| r.clone()).unwrap_or_else(|| key.clone())
    }

    /// Create (or fetch the cached) `Rws` for an owner. Owner and kernel are
    /// stored as canonical private-key tokens, same as grantees, so a
    /// `role_of` comparison never breaks when the owner's or kernel's public
    /// key later rotates.
    pub fn create_rws(&self, owner: &Pkr) -> Result<()> {
        let kernel = self
            .kernel_pkr()
            .ok_or_else(|| MyceliaError::AccessDenied {
                path: "kernel://create/rws".to_string(),
                reason: "kernel not initialized",
            })?;
        self.rws_by_uuid.entry(owner.uuid.clone()).or_insert_with(|| {
            Rws::new(self.canonical_key(&owner.public_key), self.canonical_key(&kernel.public_key))
        });
        Ok(())
    }

    pub fn rws_for(&self, owner_uuid: &str) -> Option<dashmap::mapref::one::Ref<'_, String, Rws>> {
        self.rws_by_uuid.get(owner_uuid)
    }

    pub fn rws_for_mut(&self, owner_uuid: &str) -> Option<dashmap::mapref::one::RefMut<'_, String, Rws>> {
        self.rws_by_uuid.get_mut(owner_uuid)
    }

    pub fn by_name(&self, name: &str) -> Option<Pkr> {
        self.by_name.get(name).and_then(|uuid| self.pkrs.get(uuid.as_str()).map(|r| r.clone()))
    }
}
