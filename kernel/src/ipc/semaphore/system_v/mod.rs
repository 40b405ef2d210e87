// SPDX-License-Identifier: MPL-2.0

//! System V semaphores.
//!
//! A [`SemSystem`] owns a fixed table of semaphore sets, addressed by [`SemId`]s, and the
//! adjust-on-exit records of the actors that use them. Sets are created or looked up by key
//! with [`SemSystem::semget`], inspected and changed with [`SemSystem::semctl`], and operated
//! on atomically with [`SemSystem::semop`]. The host calls [`SemSystem::exit`] when an actor
//! exits, so that its `SEM_UNDO` operations are reverted.
//!
//! Most hosts use the process-wide instance installed by [`init`].

use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

pub use self::{
    accounting::{NoAccounting, SemAccounting},
    limits::SemLimits,
    sem::{SemBuf, SemFlags, Semaphore},
    sem_ctl::{SemCtlArg, SemCtlRet},
    sem_set::{SEM_ALLOC, SemId, SemaphoreSet},
};
use self::{
    limits::{check_semaem, check_semmsl, check_semvmx},
    sem_set::{SemTable, TableState},
    undo::UndoRegistry,
};
use crate::{
    ipc::{IPC_PRIVATE, IpcFlags, PermissionMode, SemidDs, key_t},
    prelude::*,
};

mod accounting;
pub mod limits;
mod sem;
mod sem_ctl;
mod sem_set;
mod undo;

/// The semaphore facility.
pub struct SemSystem {
    /// The limits fixed at start
    limits: SemLimits,
    semmsl: AtomicUsize,
    semvmx: AtomicI32,
    semaem: AtomicI32,
    table: SemTable,
    undo: UndoRegistry,
    accounting: Box<dyn SemAccounting>,
}

impl SemSystem {
    /// Creates a facility without resource accounting.
    pub fn new(limits: SemLimits) -> Result<Self> {
        Self::with_accounting(limits, Box::new(NoAccounting))
    }

    /// Creates a facility that consults `accounting` before handing out semaphores.
    pub fn with_accounting(limits: SemLimits, accounting: Box<dyn SemAccounting>) -> Result<Self> {
        limits.validate()?;

        Ok(Self {
            limits,
            semmsl: AtomicUsize::new(limits.semmsl),
            semvmx: AtomicI32::new(limits.semvmx),
            semaem: AtomicI32::new(limits.semaem),
            table: SemTable::new(limits.semmni),
            undo: UndoRegistry::new(limits.semmnu, limits.semume),
            accounting,
        })
    }

    /// Returns the current limits, including the runtime tunables.
    pub fn limits(&self) -> SemLimits {
        SemLimits {
            semmsl: self.semmsl(),
            semvmx: self.semvmx(),
            semaem: self.semaem(),
            ..self.limits
        }
    }

    fn semmsl(&self) -> usize {
        self.semmsl.load(Ordering::Relaxed)
    }

    fn semvmx(&self) -> i32 {
        self.semvmx.load(Ordering::Relaxed)
    }

    fn semaem(&self) -> i32 {
        self.semaem.load(Ordering::Relaxed)
    }

    /// Changes the maximum number of semaphores per set. Existing sets are not affected.
    pub fn set_semmsl(&self, semmsl: usize) -> Result<()> {
        check_semmsl(semmsl).inspect_err(|_| warn!("[SemSystem] rejected semmsl = {}", semmsl))?;
        self.semmsl.store(semmsl, Ordering::Relaxed);
        Ok(())
    }

    /// Changes the maximum semaphore value. Existing values are not clamped.
    pub fn set_semvmx(&self, semvmx: i32) -> Result<()> {
        check_semvmx(semvmx).inspect_err(|_| warn!("[SemSystem] rejected semvmx = {}", semvmx))?;
        self.semvmx.store(semvmx, Ordering::Relaxed);
        Ok(())
    }

    /// Changes the maximum magnitude of adjust-on-exit values.
    pub fn set_semaem(&self, semaem: i32) -> Result<()> {
        check_semaem(semaem).inspect_err(|_| warn!("[SemSystem] rejected semaem = {}", semaem))?;
        self.semaem.store(semaem, Ordering::Relaxed);
        Ok(())
    }

    /// Looks up the set of `key`, or creates one.
    ///
    /// The low nine bits of `flags` are the permission bits of a new set; they are also the
    /// rights checked against an existing set. `nsems` may be zero when looking up.
    ///
    /// # Errors
    ///
    /// - `EEXIST` if the key exists and `flags` has both `IPC_CREAT` and `IPC_EXCL`;
    /// - `EACCES` if the requested rights on an existing set are not granted;
    /// - `EINVAL` if an existing set has fewer than `nsems` semaphores, or a new set would have
    ///   no semaphores or more than `semmsl`;
    /// - `ENOENT` if the key does not exist and `IPC_CREAT` is not given;
    /// - `ENOSPC` if the system runs out of semaphores or slots, or the accounting refuses.
    pub fn semget(&self, key: key_t, nsems: i32, flags: i32, actor: &Actor) -> Result<SemId> {
        debug!(
            "[semget] key = {}, nsems = {}, flags = {:#o}, pid = {}",
            key,
            nsems,
            flags,
            actor.pid()
        );

        let mode = (flags & IpcFlags::MODE_MASK) as u16;
        loop {
            let table = self.table.lock();
            if let Some(id) = self.lookup(&table, key, nsems, flags, actor)? {
                return Ok(id);
            }
            let nsems = self.check_create(&table, nsems)?;
            drop(table);

            // The accounting hook may block, so no lock is held here.
            self.accounting
                .charge(actor, nsems)
                .map_err(|_| Error::with_message(Errno::ENOSPC, "semaphore quota exceeded"))?;

            let mut table = self.table.lock();
            if key != IPC_PRIVATE && table.find_key(key).is_some() {
                drop(table);
                self.accounting.uncharge(actor.credentials(), nsems);
                debug!("[semget] key = {} created concurrently, retrying", key);
                continue;
            }

            let res = self.check_create(&table, nsems as i32).and_then(|_| {
                self.table
                    .install(&mut table, key, nsems, mode, actor.credentials())
            });
            drop(table);

            return match res {
                Ok(id) => {
                    debug!("[semget] semid = {} created", id.as_raw());
                    Ok(id)
                }
                Err(err) => {
                    self.accounting.uncharge(actor.credentials(), nsems);
                    Err(err)
                }
            };
        }
    }

    /// Returns the set of `key` if it exists, or `None` if a set should be created.
    fn lookup(
        &self,
        table: &TableState,
        key: key_t,
        nsems: i32,
        flags: i32,
        actor: &Actor,
    ) -> Result<Option<SemId>> {
        if key == IPC_PRIVATE {
            return Ok(None);
        }

        let ipc_flags = IpcFlags::from_bits_truncate(flags);
        let Some(index) = table.find_key(key) else {
            if !ipc_flags.contains(IpcFlags::IPC_CREAT) {
                return_errno_with_message!(Errno::ENOENT, "no semaphore set for key");
            }
            return Ok(None);
        };

        let set = self.table.lock_index(index)?;
        if ipc_flags.contains(IpcFlags::IPC_CREAT | IpcFlags::IPC_EXCL) {
            return_errno_with_message!(Errno::EEXIST, "semaphore key exists");
        }

        let required_perm = PermissionMode::from_bits_truncate((flags & 0o700) as u32)
            & (PermissionMode::READ | PermissionMode::ALTER);
        set.permission().check(actor.credentials(), required_perm)?;

        if nsems > 0 && nsems as usize > set.nsems() {
            return_errno_with_message!(Errno::EINVAL, "semaphore set too small");
        }
        Ok(Some(set.id()))
    }

    /// Checks that a set of `nsems` semaphores can be created, returning the count.
    fn check_create(&self, table: &TableState, nsems: i32) -> Result<usize> {
        if nsems <= 0 || nsems as usize > self.semmsl() {
            return_errno_with_message!(Errno::EINVAL, "invalid number of semaphores");
        }
        let nsems = nsems as usize;
        if nsems > self.limits.semmns - table.semtot() {
            return_errno_with_message!(Errno::ENOSPC, "not enough semaphores left");
        }
        if table.nsets() >= self.table.nslots() {
            return_errno_with_message!(Errno::ENOSPC, "no free semaphore slot");
        }
        Ok(nsems)
    }

    /// Reverts the `SEM_UNDO` operations of `actor`, which is exiting.
    ///
    /// Adjustments of removed sets are dropped, and values never go below zero.
    pub fn exit(&self, actor: &Actor) {
        let entries = self.undo.take(actor.pid());
        if entries.is_empty() {
            return;
        }
        debug!(
            "[semexit] pid = {}, {} undo entries",
            actor.pid(),
            entries.len()
        );

        let semvmx = self.semvmx();
        for entry in entries {
            let Ok(mut set) = self.table.lock_set(entry.id) else {
                continue;
            };
            let sem_num = entry.sem_num as usize;
            let Ok(sem) = set.sem_mut(sem_num) else {
                panic!(
                    "semexit: semnum {} out of range of semid {}",
                    sem_num,
                    entry.id.as_raw()
                );
            };

            let val = sem.val() as i32;
            let new_val = (val + entry.adj_val as i32).clamp(0, semvmx.max(val));
            trace!(
                "[semexit] semid = {}, sem_num = {}, {} -> {}",
                entry.id.as_raw(),
                sem_num,
                val,
                new_val
            );
            sem.set_val(new_val as u16);
            set.unlock_and_wake_all();
        }
    }

    /// Returns the `IPC_STAT` view of every slot, `None` for free slots.
    ///
    /// No permission is checked.
    pub fn snapshot(&self) -> Vec<Option<SemidDs>> {
        self.table.snapshot()
    }

    /// Returns the number of semaphores over all sets.
    pub fn semtot(&self) -> usize {
        self.table.lock().semtot()
    }

    /// Returns whether no set is allocated.
    pub fn is_idle(&self) -> bool {
        self.table.lock().nsets() == 0
    }
}

impl Debug for SemSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SemSystem")
            .field("limits", &self.limits())
            .field("table", &self.table)
            .field("undo", &self.undo)
            .finish_non_exhaustive()
    }
}

static SEM_SYSTEM: Once<SemSystem> = Once::new();

/// Installs the process-wide facility.
///
/// Only the first successful call has an effect.
pub fn init(limits: SemLimits) -> Result<()> {
    if SEM_SYSTEM.get().is_some() {
        return Ok(());
    }

    let system = SemSystem::new(limits)?;
    SEM_SYSTEM.call_once(|| system);
    Ok(())
}

/// Returns the process-wide facility, if it is installed.
pub fn sem_system() -> Option<&'static SemSystem> {
    SEM_SYSTEM.get()
}

/// Reverts the `SEM_UNDO` operations of an exiting actor in the process-wide facility.
pub fn exit_hook(actor: &Actor) {
    if let Some(system) = SEM_SYSTEM.get() {
        system.exit(actor);
    }
}
