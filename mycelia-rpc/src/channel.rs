//! Channel Manager: named, long-lived, ACL-guarded routes (spec.md §4.4).

use std::collections::HashSet;

use dashmap::DashMap;
use mycelia_core::error::{MyceliaError, Result};
use mycelia_core::security::{PKey, Pkr};

/// `{ route, ownerPkr, participants, metadata }`.
#[derive(Debug, Clone)]
pub struct Channel {
    pub route: String,
    pub owner: Pkr,
    pub participants: HashSet<PKey>,
    pub metadata: serde_json::Value,
}

impl Channel {
    /// `verifyAccess(path, callerPkr) = callerPkr == owner ∨ callerPkr ∈
    /// participants ∨ callerPkr is kernel`.
    pub fn verify_access(&self, caller: &PKey, kernel: &PKey) -> bool {
        caller == kernel || caller == &self.owner.public_key || self.participants.contains(caller)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterChannelOpts {
    pub participants: HashSet<PKey>,
    pub metadata: serde_json::Value,
}

/// Stores channels keyed by route.
pub struct ChannelManager {
    channels: DashMap<String, Channel>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    pub fn new() -> Self {
        ChannelManager {
            channels: DashMap::new(),
        }
    }

    /// Fails on duplicate route.
    pub fn register_channel(&self, route: impl Into<String>, owner: Pkr, opts: RegisterChannelOpts) -> Result<Channel> {
        let route = route.into();
        if self.channels.contains_key(&route) {
            return Err(MyceliaError::DuplicateChannel { route });
        }
        let channel = Channel {
            route: route.clone(),
            owner,
            participants: opts.participants,
            metadata: opts.metadata,
        };
        self.channels.insert(route, channel.clone());
        Ok(channel)
    }

    pub fn add_participant(&self, route: &str, participant: PKey) -> bool {
        match self.channels.get_mut(route) {
            Some(mut ch) => {
                ch.participants.insert(participant);
                true
            }
            None => false,
        }
    }

    pub fn remove_participant(&self, route: &str, participant: &PKey) -> bool {
        match self.channels.get_mut(route) {
            Some(mut ch) => {
                ch.participants.remove(participant);
                true
            }
            None => false,
        }
    }

    /// Resolve either a full route (contains `://`) or a trailing segment
    /// under `{subsystem}://channel/`.
    pub fn get_channel_for(&self, subsystem: &str, name_or_route: &str) -> Option<Channel> {
        let route = if name_or_route.contains("://") {
            name_or_route.to_string()
        } else {
            format!("{subsystem}://channel/{name_or_route}")
        };
        self.channels.get(&route).map(|r| r.clone())
    }

    pub fn get_by_route(&self, route: &str) -> Option<Channel> {
        self.channels.get(route).map(|r| r.clone())
    }

    pub fn list_all_channels_for(&self, owner: &Pkr) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|entry| entry.owner.public_key == owner.public_key)
            .map(|entry| entry.clone())
            .collect()
    }

    /// `true` iff a registered channel exists for `route` and `caller`
    /// passes `Channel::verify_access` against it.
    pub fn verify_access(&self, route: &str, caller: &PKey, kernel: &PKey) -> bool {
        self.channels.get(route).map(|ch| ch.verify_access(caller, kernel)).unwrap_or(false)
    }

    pub fn is_registered(&self, route: &str) -> bool {
        self.channels.contains_key(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelia_core::security::{PrincipalKind, PrincipalRegistry, CreatePrincipalOpts};

    fn make_pkr(reg: &PrincipalRegistry, kind: PrincipalKind) -> Pkr {
        reg.create_principal(kind, CreatePrincipalOpts::default()).unwrap()
    }

    #[test]
    fn duplicate_route_registration_fails() {
        let reg = PrincipalRegistry::new();
        let kernel = make_pkr(&reg, PrincipalKind::Kernel);
        let owner = make_pkr(&reg, PrincipalKind::TopLevel);
        let mgr = ChannelManager::new();
        mgr.register_channel("data://channel/replies", owner.clone(), RegisterChannelOpts::default())
            .unwrap();
        let err = mgr
            .register_channel("data://channel/replies", owner, RegisterChannelOpts::default())
            .unwrap_err();
        assert!(matches!(err, MyceliaError::DuplicateChannel { .. }));
        let _ = kernel;
    }

    #[test]
    fn acl_denies_then_allows_after_participant_added() {
        let reg = PrincipalRegistry::new();
        let kernel = make_pkr(&reg, PrincipalKind::Kernel);
        let owner = make_pkr(&reg, PrincipalKind::TopLevel);
        let stranger = make_pkr(&reg, PrincipalKind::TopLevel);
        let mgr = ChannelManager::new();
        mgr.register_channel("data://channel/replies", owner, RegisterChannelOpts::default())
            .unwrap();
        assert!(!mgr.verify_access("data://channel/replies", &stranger.public_key, &kernel.public_key));
        mgr.add_participant("data://channel/replies", stranger.public_key.clone());
        assert!(mgr.verify_access("data://channel/replies", &stranger.public_key, &kernel.public_key));
    }

    #[test]
    fn kernel_always_has_access() {
        let reg = PrincipalRegistry::new();
        let kernel = make_pkr(&reg, PrincipalKind::Kernel);
        let owner = make_pkr(&reg, PrincipalKind::TopLevel);
        let mgr = ChannelManager::new();
        mgr.register_channel("data://channel/replies", owner, RegisterChannelOpts::default())
            .unwrap();
        assert!(mgr.verify_access("data://channel/replies", &kernel.public_key, &kernel.public_key));
    }
}
