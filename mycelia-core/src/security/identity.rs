//! The Identity wrapper (spec.md §4.3.3) and the `KernelLink` seam it uses to
//! reach back into the kernel without this crate depending on it.

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::{MyceliaError, Result};
use crate::message::Message;

use super::pkey::PKey;
use super::principal::Pkr;
use super::registry::PrincipalRegistry;
use super::rws::Rws;

/// Per-send options threaded through `sendProtected`. The kernel is the only
/// writer of `caller_id`/`caller_id_set_by` (spec.md §4.6 step 2): any value
/// a caller supplies here is discarded and overwritten during `sendProtected`.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub response_required: Option<ResponseRequiredOpts>,
    pub is_response: bool,
    pub caller_id: Option<PKey>,
    pub caller_id_set_by: Option<PKey>,
    /// Set by `Kernel::send_pooled_protected` on the message it just
    /// acquired from the pool, so the processor knows to release it back
    /// (spec.md §4.6 "on either success or failure, `pool.release(msg)` in a
    /// scoped guard") once its handler has run. Never set by callers.
    pub from_pool: bool,
}

#[derive(Debug, Clone)]
pub struct ResponseRequiredOpts {
    pub reply_to: String,
    pub timeout_ms: u64,
}

/// The seam `Identity`/request-engine code uses to reach the kernel, defined
/// here (rather than depending on the `mycelia` facade crate) so the
/// security core has no upward dependency. `Kernel` in the facade crate is
/// the sole implementer.
///
/// Mirrors the teacher's `IdentityBuilder`/`ClaimsIdentity` convention of
/// returning `impl Future<...> + Send` instead of pulling in `async-trait`.
pub trait KernelLink: Send + Sync + 'static {
    fn kernel_pkr(&self) -> Pkr;

    fn send_protected(
        &self,
        caller: Pkr,
        msg: Message,
        opts: SendOptions,
    ) -> impl Future<Output = Result<()>> + Send;

    fn send_pooled_protected(
        &self,
        caller: Pkr,
        path: String,
        body: serde_json::Value,
        opts: SendOptions,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Release a pool-acquired message back to the kernel's `MessagePool`
    /// (spec.md §4.1/§4.6). Called once a message stamped `from_pool` has
    /// finished its trip through a subsystem's processor, success or error
    /// alike — the deferred-queue equivalent of the scoped guard spec.md
    /// §4.6 describes around `sendPooledProtected`. No-op by default for
    /// implementers (e.g. test doubles) that never set `from_pool`.
    fn release_pooled(&self, _msg: Message) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Wraps a principal's PKR with permission queries and permission-checked
/// call wrappers, plus the `sendProtected`/`sendPooledProtected` entry
/// points every subsystem handler ultimately goes through.
pub struct IdentityHandle<K: KernelLink> {
    pub pkr: Pkr,
    registry: Arc<PrincipalRegistry>,
    kernel: Arc<K>,
    role: Mutex<serde_json::Value>,
}

impl<K: KernelLink> IdentityHandle<K> {
    pub fn new(pkr: Pkr, registry: Arc<PrincipalRegistry>, kernel: Arc<K>) -> Self {
        IdentityHandle {
            pkr,
            registry,
            kernel,
            role: Mutex::new(serde_json::Value::Null),
        }
    }

    fn with_rws<T>(&self, f: impl FnOnce(&Rws) -> T, default: T) -> T {
        match self.registry.rws_for(&self.pkr.uuid) {
            Some(rws) => f(&rws),
            None => default,
        }
    }

    /// `canRead(pkr, {inherit})`. `inherit` ascension across resource parent
    /// chains is left to callers that model a parent hierarchy; at this
    /// layer a resource's own `Rws` is authoritative.
    ///
    /// The checked key is resolved to its canonical private-key token first
    /// (spec.md §4.3.2), the same form membership was stored under at grant
    /// time, so a key rotation of the checked principal never falsely
    /// revokes access.
    pub fn can_read(&self, key: &PKey) -> bool {
        let key = self.registry.canonical_key(key);
        self.with_rws(|rws| rws.can_read(&key), false)
    }

    pub fn can_write(&self, key: &PKey) -> bool {
        let key = self.registry.canonical_key(key);
        self.with_rws(|rws| rws.can_write(&key), false)
    }

    pub fn can_grant(&self, key: &PKey) -> bool {
        let key = self.registry.canonical_key(key);
        self.with_rws(|rws| rws.can_grant(&key), false)
    }

    pub fn require_read<F, R>(&self, key: &PKey, path: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        if self.can_read(key) {
            Ok(f())
        } else {
            Err(MyceliaError::AccessDenied {
                path: path.to_string(),
                reason: "caller lacks read permission",
            })
        }
    }

    pub fn require_write<F, R>(&self, key: &PKey, path: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        if self.can_write(key) {
            Ok(f())
        } else {
            Err(MyceliaError::AccessDenied {
                path: path.to_string(),
                reason: "caller lacks write permission",
            })
        }
    }

    pub fn require_grant<F, R>(&self, key: &PKey, path: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        if self.can_grant(key) {
            Ok(f())
        } else {
            Err(MyceliaError::AccessDenied {
                path: path.to_string(),
                reason: "caller lacks grant permission",
            })
        }
    }

    /// The core security rule of §4.3.3: only run `f` if `callerIdSetBy`
    /// equals the kernel's own PKR public key — proof that `callerId` was
    /// stamped by `Kernel::send_protected` and not spoofed by the caller.
    pub fn require_auth<F, R>(&self, opts: &SendOptions, path: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let kernel_key = self.kernel.kernel_pkr().public_key;
        match &opts.caller_id_set_by {
            Some(key) if *key == kernel_key => Ok(f()),
            _ => Err(MyceliaError::AccessDenied {
                path: path.to_string(),
                reason: "callerIdSetBy was not stamped by the kernel",
            }),
        }
    }

    /// Grants resolve both `granter` and `grantee` to their canonical
    /// private-key tokens before touching the `Rws` (spec.md §4.3.2), so
    /// membership stays valid across either party's later key rotation.
    /// Keyless `child`/`resource` principals resolve to their own public
    /// key via `canonical_key`'s fallback.
    pub fn grant_read(&self, granter: &PKey, grantee: PKey) -> bool {
        let granter = self.registry.canonical_key(granter);
        let grantee = self.registry.canonical_key(&grantee);
        match self.registry.rws_for_mut(&self.pkr.uuid) {
            Some(mut rws) => rws.add_reader(&granter, grantee),
            None => false,
        }
    }

    pub fn grant_write(&self, granter: &PKey, grantee: PKey) -> bool {
        let granter = self.registry.canonical_key(granter);
        let grantee = self.registry.canonical_key(&grantee);
        match self.registry.rws_for_mut(&self.pkr.uuid) {
            Some(mut rws) => rws.add_writer(&granter, grantee),
            None => false,
        }
    }

    pub fn revoke_read(&self, granter: &PKey, grantee: &PKey) -> bool {
        let granter = self.registry.canonical_key(granter);
        let grantee = self.registry.canonical_key(grantee);
        match self.registry.rws_for_mut(&self.pkr.uuid) {
            Some(mut rws) => rws.remove_reader(&granter, &grantee),
            None => false,
        }
    }

    pub fn revoke_write(&self, granter: &PKey, grantee: &PKey) -> bool {
        let granter = self.registry.canonical_key(granter);
        let grantee = self.registry.canonical_key(grantee);
        match self.registry.rws_for_mut(&self.pkr.uuid) {
            Some(mut rws) => rws.remove_writer(&granter, &grantee),
            None => false,
        }
    }

    pub fn promote(&self, granter: &PKey, grantee: PKey) -> bool {
        let granter = self.registry.canonical_key(granter);
        let grantee = self.registry.canonical_key(&grantee);
        match self.registry.rws_for_mut(&self.pkr.uuid) {
            Some(mut rws) => rws.promote(&granter, grantee),
            None => false,
        }
    }

    pub fn demote(&self, granter: &PKey, grantee: PKey) -> bool {
        let granter = self.registry.canonical_key(granter);
        let grantee = self.registry.canonical_key(&grantee);
        match self.registry.rws_for_mut(&self.pkr.uuid) {
            Some(mut rws) => rws.demote(&granter, grantee),
            None => false,
        }
    }

    /// Send a message, auto-injecting this identity's own PKR as caller.
    pub async fn send_protected(&self, msg: Message, opts: SendOptions) -> Result<()> {
        self.kernel.send_protected(self.pkr.clone(), msg, opts).await
    }

    /// Pooled-send variant; the pool itself lives with the kernel/MessageSystem.
    pub async fn send_pooled_protected(
        &self,
        path: impl Into<String>,
        body: serde_json::Value,
        opts: SendOptions,
    ) -> Result<()> {
        self.kernel
            .send_pooled_protected(self.pkr.clone(), path.into(), body, opts)
            .await
    }

    /// Role/profile data — carried but not enforced (spec.md §9 Open
    /// Questions: "Role/profile model is partly wired but not enforced
    /// globally; spec treats it as data only").
    pub fn get_role(&self) -> serde_json::Value {
        self.role.lock().expect("role mutex poisoned").clone()
    }

    pub fn set_role(&self, role: serde_json::Value) {
        *self.role.lock().expect("role mutex poisoned") = role;
    }
}
