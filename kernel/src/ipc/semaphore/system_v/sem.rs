// SPDX-License-Identifier: MPL-2.0

use super::{
    SemSystem,
    sem_set::{SemId, SemSetGuard},
    undo::UndoReservation,
};
use crate::{ipc::PermissionMode, prelude::*, sync::Waiter};

#[derive(Debug, Clone, Default)]
pub struct Semaphore {
    val: u16,
    /// PID of the actor that last modified the value
    latest_modified_pid: Pid,
    /// Number of actors waiting for the value to increase
    ncnt: u16,
    /// Number of actors waiting for the value to become zero
    zcnt: u16,
}

impl Semaphore {
    pub(super) fn new(val: u16) -> Self {
        Self {
            val,
            ..Self::default()
        }
    }

    pub fn val(&self) -> u16 {
        self.val
    }

    pub(super) fn set_val(&mut self, val: u16) {
        self.val = val;
    }

    pub fn latest_modified_pid(&self) -> Pid {
        self.latest_modified_pid
    }

    pub(super) fn set_latest_modified_pid(&mut self, pid: Pid) {
        self.latest_modified_pid = pid;
    }

    pub fn ncnt(&self) -> u16 {
        self.ncnt
    }

    pub fn zcnt(&self) -> u16 {
        self.zcnt
    }
}

bitflags! {
    pub struct SemFlags: i16 {
        /// Return `EAGAIN` instead of blocking.
        const IPC_NOWAIT = 0o4000;
        /// Record the operation so that it is reverted when the actor exits.
        const SEM_UNDO = 0o10000;
    }
}

/// One operation of a `semop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SemBuf {
    sem_num: u16,
    sem_op: i16,
    sem_flg: i16,
}

impl SemBuf {
    pub fn new(sem_num: u16, sem_op: i16, flags: SemFlags) -> Self {
        Self {
            sem_num,
            sem_op,
            sem_flg: flags.bits(),
        }
    }

    pub fn sem_num(&self) -> u16 {
        self.sem_num
    }

    pub fn sem_op(&self) -> i16 {
        self.sem_op
    }

    pub fn flags(&self) -> SemFlags {
        SemFlags::from_bits_truncate(self.sem_flg)
    }

    pub fn is_nowait(&self) -> bool {
        self.flags().contains(SemFlags::IPC_NOWAIT)
    }

    pub fn is_undo(&self) -> bool {
        self.flags().contains(SemFlags::SEM_UNDO)
    }
}

/// The outcome of applying all operations of a request.
#[derive(Debug)]
enum Walk {
    /// All operations were applied. Sleepers must be woken up if `wake_up` is true.
    Applied { wake_up: bool },
    /// The operation at this index cannot proceed yet. Nothing was applied.
    Blocked(usize),
    /// The request can never succeed. Nothing was applied.
    Failed(Error),
}

/// Applies `sops` in order, rolling back the applied prefix if an operation cannot proceed.
fn try_semop(sems: &mut [Semaphore], sops: &[SemBuf], semvmx: i32) -> Walk {
    let mut wake_up = false;

    for (i, sop) in sops.iter().enumerate() {
        let sem = &mut sems[sop.sem_num() as usize];
        let val = sem.val() as i32;
        let op = sop.sem_op() as i32;

        trace!(
            "[semop] sem_num = {}, sem_op = {}, val = {}",
            sop.sem_num(),
            op,
            val
        );

        if op < 0 {
            if val + op < 0 {
                rollback(sems, &sops[..i]);
                return Walk::Blocked(i);
            }
            sem.set_val((val + op) as u16);
            if val + op == 0 && sem.zcnt() > 0 {
                wake_up = true;
            }
        } else if op == 0 {
            if val != 0 {
                rollback(sems, &sops[..i]);
                return Walk::Blocked(i);
            }
        } else {
            if val + op > semvmx {
                rollback(sems, &sops[..i]);
                return Walk::Failed(Error::with_message(
                    Errno::ERANGE,
                    "semaphore value would exceed semvmx",
                ));
            }
            if sem.ncnt() > 0 {
                wake_up = true;
            }
            sem.set_val((val + op) as u16);
        }
    }

    Walk::Applied { wake_up }
}

/// Reverts `applied` in reverse order.
fn rollback(sems: &mut [Semaphore], applied: &[SemBuf]) {
    for sop in applied.iter().rev() {
        let sem = &mut sems[sop.sem_num() as usize];
        sem.set_val((sem.val() as i32 - sop.sem_op() as i32) as u16);
    }
}

impl SemSystem {
    /// Atomically applies `sops` to the semaphores of set `id`.
    ///
    /// Either all operations are applied at once or none is. If some operation cannot proceed,
    /// the caller blocks until the set changes and then retries from the first operation, unless
    /// the blocking operation carries `IPC_NOWAIT`.
    ///
    /// # Errors
    ///
    /// - `EINVAL` if `sops` is empty or `id` names no live set;
    /// - `E2BIG` if there are more than `semopm` operations or the accounting hook refuses them;
    /// - `EFBIG` if a semaphore number is out of range;
    /// - `EACCES` if the caller lacks read (for zero operations) or alter rights;
    /// - `ERANGE` if a value would exceed `semvmx`, or an undo adjustment would exceed `semaem`;
    /// - `ENOSPC` if undo records or undo entries are exhausted;
    /// - `EAGAIN` if an `IPC_NOWAIT` operation would block;
    /// - `EINTR` if the caller is interrupted while blocked;
    /// - `EIDRM` if the set is removed while the caller is blocked.
    pub fn semop(&self, id: SemId, sops: &[SemBuf], actor: &Actor) -> Result<()> {
        debug!(
            "[semop] semid = {}, nsops = {}, pid = {}",
            id.as_raw(),
            sops.len(),
            actor.pid()
        );

        if sops.is_empty() {
            return_errno_with_message!(Errno::EINVAL, "no semaphore operations");
        }
        if sops.len() > self.limits.semopm {
            return_errno_with_message!(Errno::E2BIG, "too many semaphore operations");
        }
        if !self.accounting.can_operate(actor, sops.len()) {
            return_errno_with_message!(Errno::E2BIG, "semaphore operations over quota");
        }

        let mut set = self.table.lock_set(id)?;

        let mut required_perm = PermissionMode::empty();
        for sop in sops {
            if sop.sem_num() as usize >= set.nsems() {
                return_errno_with_message!(Errno::EFBIG, "semaphore number out of range");
            }
            required_perm |= if sop.sem_op() == 0 {
                PermissionMode::READ
            } else {
                PermissionMode::ALTER
            };
        }
        set.permission()
            .check(actor.credentials(), required_perm)?;

        let needs_undo = sops.iter().any(|sop| sop.is_undo() && sop.sem_op() != 0);
        let mut reservation: Option<UndoReservation> = None;

        loop {
            match try_semop(set.sems_mut(), sops, self.semvmx()) {
                Walk::Applied { wake_up } => {
                    if needs_undo && reservation.is_none() {
                        // Record the undo adjustments first, with the values untouched and the
                        // slot unlocked, then apply the operations again.
                        rollback(set.sems_mut(), sops);
                        drop(set);

                        let reserved = self.undo.reserve(actor.pid(), id, sops, self.semaem())?;
                        set = match self.table.lock_set(id) {
                            Ok(set) => set,
                            Err(_) => {
                                self.undo.release(reserved);
                                return_errno_with_message!(
                                    Errno::EIDRM,
                                    "semaphore set removed"
                                );
                            }
                        };
                        reservation = Some(reserved);
                        continue;
                    }

                    for sop in sops {
                        set.sems_mut()[sop.sem_num() as usize]
                            .set_latest_modified_pid(actor.pid());
                    }
                    set.update_otime();

                    if wake_up {
                        set.unlock_and_wake_all();
                    } else {
                        drop(set);
                    }
                    if let Some(reserved) = reservation {
                        self.undo.commit(reserved);
                    }
                    return Ok(());
                }
                Walk::Failed(err) => {
                    drop(set);
                    if let Some(reserved) = reservation {
                        self.undo.release(reserved);
                    }
                    return Err(err);
                }
                Walk::Blocked(index) => {
                    if let Some(reserved) = reservation.take() {
                        // The reservation may not outlive the slot lock while blocked, so take
                        // it back and reserve again once the operations can proceed.
                        drop(set);
                        self.undo.release(reserved);
                        set = self.relock(id)?;
                        continue;
                    }

                    let sop = sops[index];
                    if sop.is_nowait() {
                        return_errno_with_message!(
                            Errno::EAGAIN,
                            "semaphore operation would block"
                        );
                    }
                    set = self.sleep(set, sop, actor)?;
                }
            }
        }
    }

    /// Blocks on the set until it changes, then returns the relocked set.
    fn sleep<'a>(
        &'a self,
        mut set: SemSetGuard<'a>,
        sop: SemBuf,
        actor: &Actor,
    ) -> Result<SemSetGuard<'a>> {
        let id = set.id();
        let sem_num = sop.sem_num() as usize;
        let waits_for_zero = sop.sem_op() == 0;

        let sem = &mut set.sems_mut()[sem_num];
        if waits_for_zero {
            sem.zcnt += 1;
        } else {
            sem.ncnt += 1;
        }

        let (waiter, waker) = Waiter::new_pair();
        set.wait_queue().enqueue(waker);
        drop(set);

        trace!("[semop] pid = {} sleeps on semid = {}", actor.pid(), id.as_raw());
        let res = actor.pauser().pause(&waiter);

        // The counters went away with the set if it was removed.
        let mut set = self.relock(id)?;
        let sem = &mut set.sems_mut()[sem_num];
        if waits_for_zero {
            sem.zcnt -= 1;
        } else {
            sem.ncnt -= 1;
        }

        res?;
        Ok(set)
    }

    fn relock(&self, id: SemId) -> Result<SemSetGuard<'_>> {
        self.table
            .lock_set(id)
            .map_err(|_| Error::with_message(Errno::EIDRM, "semaphore set removed"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn op(sem_num: u16, sem_op: i16) -> SemBuf {
        SemBuf::new(sem_num, sem_op, SemFlags::empty())
    }

    fn sems(vals: &[u16]) -> Vec<Semaphore> {
        vals.iter().map(|&val| Semaphore::new(val)).collect()
    }

    fn vals(sems: &[Semaphore]) -> Vec<u16> {
        sems.iter().map(Semaphore::val).collect()
    }

    #[test]
    fn applies_all_operations() {
        let mut sems = sems(&[1, 0, 5]);
        let walk = try_semop(&mut sems, &[op(0, -1), op(1, 2), op(2, 1)], 32767);

        assert!(matches!(walk, Walk::Applied { wake_up: false }));
        assert_eq!(vals(&sems), [0, 2, 6]);
    }

    #[test]
    fn blocked_walk_is_rolled_back() {
        let mut sems = sems(&[1, 3]);
        let walk = try_semop(&mut sems, &[op(0, -1), op(1, 1), op(0, -1)], 32767);

        assert!(matches!(walk, Walk::Blocked(2)));
        assert_eq!(vals(&sems), [1, 3]);

        let walk = try_semop(&mut sems, &[op(0, -1), op(1, 0)], 32767);
        assert!(matches!(walk, Walk::Blocked(1)));
        assert_eq!(vals(&sems), [1, 3]);
    }

    #[test]
    fn same_semaphore_twice() {
        let mut sems = sems(&[0]);
        let walk = try_semop(&mut sems, &[op(0, 2), op(0, -1)], 32767);

        assert!(matches!(walk, Walk::Applied { .. }));
        assert_eq!(vals(&sems), [1]);
    }

    #[test]
    fn value_limit() {
        let mut sems = sems(&[10, 0]);
        let walk = try_semop(&mut sems, &[op(1, 1), op(0, 1)], 10);

        match walk {
            Walk::Failed(err) => assert_eq!(err.error(), Errno::ERANGE),
            walk => panic!("unexpected walk: {:?}", walk),
        }
        assert_eq!(vals(&sems), [10, 0]);
    }

    #[test]
    fn wake_up_conditions() {
        let mut sems = sems(&[1, 0]);
        sems[0].zcnt = 1;
        let walk = try_semop(&mut sems, &[op(0, -1)], 32767);
        assert!(matches!(walk, Walk::Applied { wake_up: true }));

        sems[1].ncnt = 1;
        let walk = try_semop(&mut sems, &[op(1, 1)], 32767);
        assert!(matches!(walk, Walk::Applied { wake_up: true }));

        let walk = try_semop(&mut sems, &[op(1, -1)], 32767);
        assert!(matches!(walk, Walk::Applied { wake_up: false }));
    }

    #[test]
    fn flags_of_sembuf() {
        let sop = SemBuf::new(3, -1, SemFlags::IPC_NOWAIT | SemFlags::SEM_UNDO);
        assert!(sop.is_nowait());
        assert!(sop.is_undo());
        assert!(!op(0, 1).is_undo());
    }
}
