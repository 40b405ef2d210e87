// SPDX-License-Identifier: MPL-2.0

//! This mod defines the types used in IPC operations

use super::key_t;

/// IPC permissions structure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct IpcPerm {
    /// Key
    pub key: key_t,
    /// Owner's user ID
    pub uid: u32,
    /// Owner's group ID
    pub gid: u32,
    /// Creator's user ID
    pub cuid: u32,
    /// Creator's group ID
    pub cgid: u32,
    /// Read/write permission
    pub mode: u16,
    /// Sequence number
    pub seq: u16,
}

/// Semaphore set data structure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SemidDs {
    /// Operation permissions
    pub sem_perm: IpcPerm,
    /// Last semop time
    pub sem_otime: i64,
    /// Last change time
    pub sem_ctime: i64,
    /// Number of semaphores in the set
    pub sem_nsems: u16,
}
