// SPDX-License-Identifier: MPL-2.0

use super::{SemSystem, sem::Semaphore, sem_set::SemId};
use crate::{
    ipc::{IpcControlCmd, IpcPerm, PermissionMode, SemidDs},
    prelude::*,
};

/// The argument of a `semctl` command, i.e., `union semun`.
#[derive(Debug)]
pub enum SemCtlArg<'a> {
    /// No argument.
    None,
    /// The value of `SETVAL`.
    Val(i32),
    /// The status buffer of `IPC_STAT`, `SEM_STAT` and `IPC_SET`.
    Buf(&'a mut SemidDs),
    /// The value array of `GETALL` and `SETALL`.
    Array(&'a mut [u16]),
}

/// The result of a `semctl` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemCtlRet {
    /// The command has no result besides what it wrote into the argument.
    Done,
    /// The value, PID or count that was asked for.
    Value(i32),
    /// The identifier of the set that `SEM_STAT` reported.
    Id(SemId),
}

impl SemCtlRet {
    /// Returns the value that the system call returns.
    pub fn as_raw(&self) -> i32 {
        match self {
            SemCtlRet::Done => 0,
            SemCtlRet::Value(value) => *value,
            SemCtlRet::Id(id) => id.as_raw(),
        }
    }
}

fn to_sem_num(semnum: i32) -> Result<usize> {
    usize::try_from(semnum)
        .map_err(|_| Error::with_message(Errno::EINVAL, "invalid semaphore number"))
}

impl SemSystem {
    /// Performs the control command `cmd` on set `id`.
    ///
    /// For `SEM_STAT`, `id` is the raw slot index instead. `semnum` is only used by the
    /// per-semaphore commands. A command whose argument is missing fails with `EFAULT`, like a
    /// null user pointer would.
    pub fn semctl(
        &self,
        id: SemId,
        semnum: i32,
        cmd: IpcControlCmd,
        arg: SemCtlArg,
        actor: &Actor,
    ) -> Result<SemCtlRet> {
        debug!(
            "[semctl] semid = {}, semnum = {}, cmd = {:?}, pid = {}",
            id.as_raw(),
            semnum,
            cmd,
            actor.pid()
        );

        let ret = match (cmd, arg) {
            (IpcControlCmd::IPC_RMID, _) => {
                self.remove(id, actor)?;
                SemCtlRet::Done
            }
            (IpcControlCmd::IPC_SET, SemCtlArg::Buf(buf)) => {
                self.set(id, &buf.sem_perm, actor)?;
                SemCtlRet::Done
            }
            (IpcControlCmd::IPC_STAT, SemCtlArg::Buf(buf)) => {
                *buf = self.stat(id, actor)?;
                SemCtlRet::Done
            }
            (IpcControlCmd::SEM_STAT, SemCtlArg::Buf(buf)) => {
                let (id, ds) = self.sem_stat(id.as_raw(), actor)?;
                *buf = ds;
                SemCtlRet::Id(id)
            }
            (IpcControlCmd::SEM_GETALL, SemCtlArg::Array(array)) => {
                let vals = self.get_all(id, actor)?;
                let Some(dst) = array.get_mut(..vals.len()) else {
                    return_errno_with_message!(Errno::EFAULT, "value array too short");
                };
                dst.copy_from_slice(&vals);
                SemCtlRet::Done
            }
            (IpcControlCmd::SEM_SETALL, SemCtlArg::Array(array)) => {
                self.set_all(id, array, actor)?;
                SemCtlRet::Done
            }
            (IpcControlCmd::SEM_SETVAL, SemCtlArg::Val(val)) => {
                self.set_val(id, to_sem_num(semnum)?, val, actor)?;
                SemCtlRet::Done
            }
            (IpcControlCmd::SEM_GETVAL, _) => {
                SemCtlRet::Value(self.get_val(id, to_sem_num(semnum)?, actor)? as i32)
            }
            (IpcControlCmd::SEM_GETPID, _) => {
                SemCtlRet::Value(self.get_pid(id, to_sem_num(semnum)?, actor)?)
            }
            (IpcControlCmd::SEM_GETNCNT, _) => {
                SemCtlRet::Value(self.get_ncnt(id, to_sem_num(semnum)?, actor)? as i32)
            }
            (IpcControlCmd::SEM_GETZCNT, _) => {
                SemCtlRet::Value(self.get_zcnt(id, to_sem_num(semnum)?, actor)? as i32)
            }
            (cmd, arg) => {
                warn!("[semctl] {:?} got an unusable argument {:?}", cmd, arg);
                return_errno_with_message!(Errno::EFAULT, "missing semctl argument");
            }
        };

        Ok(ret)
    }

    /// Returns the status of set `id` (`IPC_STAT`).
    pub fn stat(&self, id: SemId, actor: &Actor) -> Result<SemidDs> {
        let set = self.table.lock_set(id)?;
        set.permission()
            .check(actor.credentials(), PermissionMode::READ)?;
        Ok(set.stat(id.seq()))
    }

    /// Returns the ID and status of the set in slot `index` (`SEM_STAT`).
    pub fn sem_stat(&self, index: i32, actor: &Actor) -> Result<(SemId, SemidDs)> {
        let index = usize::try_from(index)
            .map_err(|_| Error::with_message(Errno::EINVAL, "slot index out of range"))?;
        let set = self.table.lock_index(index)?;
        set.permission()
            .check(actor.credentials(), PermissionMode::READ)?;
        Ok((set.id(), set.stat(set.id().seq())))
    }

    /// Changes the owner and permission bits of set `id` (`IPC_SET`).
    pub fn set(&self, id: SemId, perm: &IpcPerm, actor: &Actor) -> Result<()> {
        let mut set = self.table.lock_set(id)?;
        set.permission()
            .check(actor.credentials(), PermissionMode::MANAGE)?;

        set.permission_mut()
            .set(Uid::new(perm.uid), Gid::new(perm.gid), perm.mode);
        set.update_ctime();
        Ok(())
    }

    /// Removes set `id` (`IPC_RMID`).
    ///
    /// Actors blocked on the set fail with `EIDRM`, and all adjust-on-exit entries of the set
    /// are dropped.
    pub fn remove(&self, id: SemId, actor: &Actor) -> Result<()> {
        let mut table = self.table.lock();
        let set = self.table.lock_set(id)?;
        set.permission()
            .check(actor.credentials(), PermissionMode::MANAGE)?;

        let removed = set.remove(&mut table);
        drop(table);
        debug!(
            "[semctl] semid = {} removed, {} semaphores freed",
            id.as_raw(),
            removed.nsems()
        );

        self.accounting
            .uncharge(removed.creator(), removed.nsems());
        self.undo.clear(id, None);
        Ok(())
    }

    /// Returns the values of all semaphores of set `id` (`GETALL`).
    pub fn get_all(&self, id: SemId, actor: &Actor) -> Result<Vec<u16>> {
        let count = self.table.lock_set(id)?.nsems();
        let mut vals = Vec::with_capacity(count);

        let set = self.table.lock_set(id)?;
        assert_eq!(count, set.nsems(), "nsems changed");
        set.permission()
            .check(actor.credentials(), PermissionMode::READ)?;

        vals.extend(set.sems().iter().map(Semaphore::val));
        Ok(vals)
    }

    /// Sets the values of all semaphores of set `id` (`SETALL`).
    ///
    /// `vals` must hold at least as many values as the set has semaphores; extra values are
    /// ignored. Either all values are set or, on error, none is.
    pub fn set_all(&self, id: SemId, vals: &[u16], actor: &Actor) -> Result<()> {
        let count = self.table.lock_set(id)?.nsems();
        let Some(vals) = vals.get(..count) else {
            return_errno_with_message!(Errno::EFAULT, "value array too short");
        };
        let vals = vals.to_vec();

        let mut set = self.table.lock_set(id)?;
        assert_eq!(count, set.nsems(), "nsems changed");
        set.permission()
            .check(actor.credentials(), PermissionMode::ALTER)?;

        let semvmx = self.semvmx();
        if vals.iter().any(|&val| val as i32 > semvmx) {
            return_errno_with_message!(Errno::ERANGE, "semaphore value exceeds semvmx");
        }
        for (sem, &val) in set.sems_mut().iter_mut().zip(vals.iter()) {
            sem.set_val(val);
        }

        let wait_queue = set.wait_queue();
        drop(set);
        self.undo.clear(id, None);
        wait_queue.wake_all();
        Ok(())
    }

    /// Returns the value of semaphore `sem_num` of set `id` (`GETVAL`).
    pub fn get_val(&self, id: SemId, sem_num: usize, actor: &Actor) -> Result<u16> {
        self.read_sem(id, sem_num, actor, Semaphore::val)
    }

    /// Sets the value of semaphore `sem_num` of set `id` (`SETVAL`).
    ///
    /// Adjust-on-exit entries of the semaphore are dropped.
    pub fn set_val(&self, id: SemId, sem_num: usize, val: i32, actor: &Actor) -> Result<()> {
        let mut set = self.table.lock_set(id)?;
        set.permission()
            .check(actor.credentials(), PermissionMode::ALTER)?;

        let semvmx = self.semvmx();
        let sem = set.sem_mut(sem_num)?;
        if !(0..=semvmx).contains(&val) {
            return_errno_with_message!(Errno::ERANGE, "semaphore value out of range");
        }
        sem.set_val(val as u16);

        let wait_queue = set.wait_queue();
        drop(set);
        self.undo.clear(id, Some(sem_num as u16));
        wait_queue.wake_all();
        Ok(())
    }

    /// Returns the PID of the last actor that operated on semaphore `sem_num` (`GETPID`).
    pub fn get_pid(&self, id: SemId, sem_num: usize, actor: &Actor) -> Result<Pid> {
        self.read_sem(id, sem_num, actor, Semaphore::latest_modified_pid)
    }

    /// Returns the number of actors waiting for semaphore `sem_num` to increase (`GETNCNT`).
    pub fn get_ncnt(&self, id: SemId, sem_num: usize, actor: &Actor) -> Result<u16> {
        self.read_sem(id, sem_num, actor, Semaphore::ncnt)
    }

    /// Returns the number of actors waiting for semaphore `sem_num` to become zero (`GETZCNT`).
    pub fn get_zcnt(&self, id: SemId, sem_num: usize, actor: &Actor) -> Result<u16> {
        self.read_sem(id, sem_num, actor, Semaphore::zcnt)
    }

    fn read_sem<T>(
        &self,
        id: SemId,
        sem_num: usize,
        actor: &Actor,
        func: impl FnOnce(&Semaphore) -> T,
    ) -> Result<T> {
        let set = self.table.lock_set(id)?;
        set.permission()
            .check(actor.credentials(), PermissionMode::READ)?;
        Ok(func(set.sem(sem_num)?))
    }
}
