//! Principal and PKR (Public Key Record).

use std::time::{Duration, SystemTime};

use super::pkey::PKey;

/// The kind of principal. Only `kernel`, `topLevel`, and `friend` receive a
/// private key on mint (spec.md §4.3.1); `child` and `resource` are
/// read-only capability holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    Kernel,
    TopLevel,
    Child,
    Friend,
    Resource,
}

impl PrincipalKind {
    pub fn mints_private_key(self) -> bool {
        matches!(self, PrincipalKind::Kernel | PrincipalKind::TopLevel | PrincipalKind::Friend)
    }
}

/// A minted keypair: always a public key; a private key only for kinds that
/// `mints_private_key()`.
#[derive(Debug, Clone)]
pub struct Mint {
    pub public_key: PKey,
    pub private_key: Option<PKey>,
}

/// Immutable, shareable identity reference (spec.md §3 "PKR").
#[derive(Debug, Clone)]
pub struct Pkr {
    pub uuid: String,
    pub name: Option<String>,
    pub kind: PrincipalKind,
    pub public_key: PKey,
    pub minter: Option<PKey>,
    pub expires_at: SystemTime,
}

impl Pkr {
    /// Default PKR lifetime: one week, per spec.md §3.
    pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    pub fn is_minter(&self, key: &PKey) -> bool {
        self.minter.as_ref() == Some(key)
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// `isMinter(kernelKey) ∧ ¬isExpired()`.
    pub fn is_valid(&self, kernel_key: &PKey) -> bool {
        self.is_minter(kernel_key) && !self.is_expired()
    }
}

impl PartialEq for Pkr {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

/// The mutable, kernel-internal record a `Pkr` is a view onto. Holds the
/// instance-binding slot (set at most once) and any owning PKR for
/// `resource`/`child` kinds.
#[derive(Debug, Clone)]
pub struct Principal {
    pub uuid: String,
    pub name: Option<String>,
    pub kind: PrincipalKind,
    pub public_key: PKey,
    pub kernel_id: Option<String>,
    instance: Option<String>,
}

impl Principal {
    pub fn new(uuid: String, name: Option<String>, kind: PrincipalKind, public_key: PKey, kernel_id: Option<String>) -> Self {
        Principal {
            uuid,
            name,
            kind,
            public_key,
            kernel_id,
            instance: None,
        }
    }

    /// Bind this principal to an instance descriptor. Fails (returns
    /// `false`) if already bound: "may be attached at most once" (spec.md §3).
    pub fn bind_instance(&mut self, instance: impl Into<String>) -> bool {
        if self.instance.is_some() {
            return false;
        }
        self.instance = Some(instance.into());
        true
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }
}
