//! ReaderWriterSet: the per-owner permission set.

use std::collections::HashSet;

use super::pkey::PKey;

/// `{ owner, readers, writers, granters }`, all keyed by the canonical
/// *private*-key token (stable across the owner's key rotations, per
/// spec.md §4.3.2: "Grantee keys are stored as canonical private-key tokens
/// so that later key rotations of the grantee do not affect membership").
/// `PrincipalRegistry::canonical_key` is what resolves a raw public key to
/// that token before it ever reaches an `Rws` method; keyless `child`/
/// `resource` principals have no private key to resolve to, so their public
/// key doubles as their token here.
#[derive(Debug, Clone)]
pub struct Rws {
    pub owner: PKey,
    kernel: PKey,
    readers: HashSet<PKey>,
    writers: HashSet<PKey>,
    granters: HashSet<PKey>,
}

/// Which of the four recognized roles a key holds relative to an `Rws`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Kernel,
    Owner,
    Writer,
    Reader,
    Granter,
    None,
}

impl Rws {
    pub fn new(owner: PKey, kernel: PKey) -> Self {
        Rws {
            owner,
            kernel,
            readers: HashSet::new(),
            writers: HashSet::new(),
            granters: HashSet::new(),
        }
    }

    pub fn role_of(&self, key: &PKey) -> Role {
        if key == &self.kernel {
            Role::Kernel
        } else if key == &self.owner {
            Role::Owner
        } else if self.writers.contains(key) {
            Role::Writer
        } else if self.readers.contains(key) {
            Role::Reader
        } else if self.granters.contains(key) {
            Role::Granter
        } else {
            Role::None
        }
    }

    pub fn can_read(&self, key: &PKey) -> bool {
        matches!(self.role_of(key), Role::Kernel | Role::Owner | Role::Writer | Role::Reader)
    }

    pub fn can_write(&self, key: &PKey) -> bool {
        matches!(self.role_of(key), Role::Kernel | Role::Owner | Role::Writer)
    }

    /// "`canGrant` passes for kernel, owner, or any PKR in `granters`."
    pub fn can_grant(&self, key: &PKey) -> bool {
        matches!(self.role_of(key), Role::Kernel | Role::Owner | Role::Granter)
    }

    pub fn add_reader(&mut self, granter: &PKey, grantee: PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.readers.insert(grantee);
        })
    }

    pub fn add_writer(&mut self, granter: &PKey, grantee: PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.writers.insert(grantee);
        })
    }

    pub fn add_granter(&mut self, granter: &PKey, grantee: PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.granters.insert(grantee);
        })
    }

    pub fn remove_reader(&mut self, granter: &PKey, grantee: &PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.readers.remove(grantee);
        })
    }

    pub fn remove_writer(&mut self, granter: &PKey, grantee: &PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.writers.remove(grantee);
        })
    }

    pub fn remove_granter(&mut self, granter: &PKey, grantee: &PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.granters.remove(grantee);
        })
    }

    /// Promote a reader to writer.
    pub fn promote(&mut self, granter: &PKey, grantee: PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.readers.remove(&grantee);
            rws.writers.insert(grantee);
        })
    }

    /// Demote a writer to reader.
    pub fn demote(&mut self, granter: &PKey, grantee: PKey) -> bool {
        self.mutate(granter, |rws| {
            rws.writers.remove(&grantee);
            rws.readers.insert(grantee);
        })
    }

    fn mutate(&mut self, granter: &PKey, f: impl FnOnce(&mut Self)) -> bool {
        if !self.can_grant(granter) {
            return false;
        }
        f(self);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_can_always_grant() {
        let owner = PKey::mint();
        let kernel = PKey::mint();
        let mut rws = Rws::new(owner.clone(), kernel);
        let grantee = PKey::mint();
        assert!(rws.add_reader(&owner, grantee.clone()));
        assert!(rws.can_read(&grantee));
    }

    #[test]
    fn non_granter_mutation_fails() {
        let owner = PKey::mint();
        let kernel = PKey::mint();
        let mut rws = Rws::new(owner, kernel);
        let stranger = PKey::mint();
        let grantee = PKey::mint();
        assert!(!rws.add_reader(&stranger, grantee.clone()));
        assert!(!rws.can_read(&grantee));
    }

    #[test]
    fn promote_moves_reader_to_writer() {
        let owner = PKey::mint();
        let kernel = PKey::mint();
        let mut rws = Rws::new(owner.clone(), kernel);
        let grantee = PKey::mint();
        rws.add_reader(&owner, grantee.clone());
        assert!(rws.can_read(&grantee) && !rws.can_write(&grantee));
        rws.promote(&owner, grantee.clone());
        assert!(rws.can_write(&grantee));
    }

    #[test]
    fn granter_role_can_grant_but_not_write() {
        let owner = PKey::mint();
        let kernel = PKey::mint();
        let mut rws = Rws::new(owner.clone(), kernel);
        let granter = PKey::mint();
        rws.add_granter(&owner, granter.clone());
        assert!(rws.can_grant(&granter));
        assert!(!rws.can_write(&granter));
        let grantee = PKey::mint();
        assert!(rws.add_reader(&granter, grantee.clone()));
        assert!(rws.can_read(&grantee));
    }
}
