// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// User id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(u32);

impl Uid {
    const ROOT: Self = Self(0);

    pub const fn new(uid: u32) -> Self {
        Self(uid)
    }

    pub const fn new_root() -> Self {
        Self::ROOT
    }

    pub const fn is_root(&self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl From<u32> for Uid {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Uid> for u32 {
    fn from(value: Uid) -> Self {
        value.0
    }
}

/// Group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gid(u32);

impl Gid {
    pub const fn new(gid: u32) -> Self {
        Self(gid)
    }

    pub const fn new_root() -> Self {
        Self(0)
    }
}

impl From<u32> for Gid {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Gid> for u32 {
    fn from(value: Gid) -> Self {
        value.0
    }
}

/// The credentials an actor presents to IPC permission checks.
///
/// Only the effective ids matter here. The privileged override stands for
/// the `IPC_ADMIN`, `IPC_READ` and `IPC_WRITE` privileges of the host.
#[derive(Debug, Clone)]
pub struct Credentials {
    euid: Uid,
    egid: Gid,
    /// A set of additional groups to which the actor belongs.
    supplementary_gids: BTreeSet<Gid>,
    privileged: bool,
}

impl Credentials {
    /// Creates credentials for an unprivileged actor.
    ///
    /// The effective group is also a member of the supplementary groups.
    pub fn new(uid: Uid, gid: Gid) -> Self {
        let mut supplementary_gids = BTreeSet::new();
        supplementary_gids.insert(gid);

        Self {
            euid: uid,
            egid: gid,
            supplementary_gids,
            privileged: uid.is_root(),
        }
    }

    /// Creates the credentials of the superuser.
    pub fn new_root() -> Self {
        Self::new(Uid::new_root(), Gid::new_root())
    }

    /// Adds a supplementary group.
    pub fn with_group(mut self, gid: Gid) -> Self {
        self.supplementary_gids.insert(gid);
        self
    }

    /// Overrides whether the privileged IPC checks pass.
    pub fn with_privilege(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn euid(&self) -> Uid {
        self.euid
    }

    pub fn egid(&self) -> Gid {
        self.egid
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Returns whether the actor belongs to `gid`.
    pub fn is_group_member(&self, gid: Gid) -> bool {
        self.egid == gid || self.supplementary_gids.contains(&gid)
    }
}
