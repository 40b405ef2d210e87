// SPDX-License-Identifier: MPL-2.0

//! System V IPC objects.
//!
//! Only semaphores are provided. The types in this module (keys, flags,
//! control commands and permissions) are the parts of System V IPC that are
//! shared by all object kinds.

use crate::prelude::*;

mod ipc_types;
pub mod semaphore;

pub use self::ipc_types::{IpcPerm, SemidDs};

#[expect(non_camel_case_types)]
pub type key_t = i32;

/// The key that always creates a new, private object.
pub const IPC_PRIVATE: key_t = 0;

bitflags! {
    /// Flags accepted by the `*get` calls, on top of the nine permission bits.
    pub struct IpcFlags: i32 {
        /// Create the object if the key does not exist.
        const IPC_CREAT = 0o1000;
        /// Fail if the key exists.
        const IPC_EXCL = 0o2000;
        /// Return an error instead of waiting.
        const IPC_NOWAIT = 0o4000;
    }
}

impl IpcFlags {
    /// The permission bits carried by a `*get` flag word.
    pub const MODE_MASK: i32 = 0o777;
}

/// Control commands of `semctl`.
///
/// The numbering follows the Linux ABI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
#[expect(non_camel_case_types)]
pub enum IpcControlCmd {
    IPC_RMID = 0,
    IPC_SET = 1,
    IPC_STAT = 2,

    SEM_GETPID = 11,
    SEM_GETVAL = 12,
    SEM_GETALL = 13,
    SEM_GETNCNT = 14,
    SEM_GETZCNT = 15,
    SEM_SETVAL = 16,
    SEM_SETALL = 17,
    SEM_STAT = 18,
}

bitflags! {
    /// Access rights checked against an [`IpcPermission`].
    pub struct PermissionMode: u32 {
        /// Read access (`IPC_R`).
        const READ = 0o400;
        /// Write access, which for semaphores means altering values (`IPC_W`).
        const ALTER = 0o200;
        /// Ownership rights needed by `IPC_SET` and `IPC_RMID` (`IPC_M`).
        const MANAGE = 0o10000;
    }
}

/// The ownership and access bits of an IPC object.
#[derive(Debug, Clone)]
pub struct IpcPermission {
    key: key_t,
    /// Owner's user ID
    uid: Uid,
    /// Owner's group ID
    gid: Gid,
    /// Creator's user ID
    cuid: Uid,
    /// Creator's group ID
    cgid: Gid,
    /// Read/write permission, the low nine bits only
    mode: u16,
}

impl IpcPermission {
    pub fn new_sem_perm(key: key_t, uid: Uid, gid: Gid, mode: u16) -> Self {
        Self {
            key,
            uid,
            gid,
            cuid: uid,
            cgid: gid,
            mode: mode & 0o777,
        }
    }

    pub fn key(&self) -> key_t {
        self.key
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    pub fn cuid(&self) -> Uid {
        self.cuid
    }

    pub fn cgid(&self) -> Gid {
        self.cgid
    }

    pub fn mode(&self) -> u16 {
        self.mode
    }

    /// Changes the owner and the permission bits, as `IPC_SET` does.
    ///
    /// Bits outside of the low nine are ignored.
    pub fn set(&mut self, uid: Uid, gid: Gid, mode: u16) {
        self.uid = uid;
        self.gid = gid;
        self.mode = mode & 0o777;
    }

    /// Checks whether `credentials` grant all of `required`.
    ///
    /// The owner class applies to the owner and the creator and also grants
    /// [`PermissionMode::MANAGE`]. Then the group class applies to members of
    /// the owner or creator group, and the other class to everybody else.
    /// Whatever the classes do not grant is granted to privileged actors.
    pub fn check(&self, credentials: &Credentials, required: PermissionMode) -> Result<()> {
        let mut granted = PermissionMode::empty();

        let euid = credentials.euid();
        let obj_mode = if euid == self.cuid || euid == self.uid {
            granted |= PermissionMode::MANAGE;
            self.mode as u32
        } else if credentials.is_group_member(self.gid) || credentials.is_group_member(self.cgid) {
            (self.mode as u32) << 3
        } else {
            (self.mode as u32) << 6
        };
        granted |= PermissionMode::from_bits_truncate(obj_mode)
            & (PermissionMode::READ | PermissionMode::ALTER);

        if granted.contains(required) || credentials.is_privileged() {
            return Ok(());
        }

        return_errno_with_message!(Errno::EACCES, "permission denied");
    }
}
