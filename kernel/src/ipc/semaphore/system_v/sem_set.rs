// SPDX-License-Identifier: MPL-2.0

use core::ops::{Deref, DerefMut};

use id_alloc::IdAlloc;

use super::sem::Semaphore;
use crate::{
    ipc::{IpcPerm, IpcPermission, SemidDs, key_t},
    prelude::*,
    sync::WaitQueue,
    time::RealTimeCoarseClock,
};

/// The `mode` bit reported by `IPC_STAT` for an allocated set.
pub const SEM_ALLOC: u16 = 0o1000;

/// The sequence numbers of a slot wrap within 15 bits so that IDs stay positive.
const SEQ_MASK: u16 = 0x7fff;

/// The identifier of a semaphore set.
///
/// The lower 16 bits are the slot index and the upper bits are the sequence number of the slot
/// at the time the set was created. A slot that is freed and reused gets a new sequence number,
/// so IDs of removed sets never name their successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemId(i32);

impl SemId {
    pub(super) fn new(index: usize, seq: u16) -> Self {
        debug_assert!(index <= 0xffff);
        Self((((seq & SEQ_MASK) as i32) << 16) | index as i32)
    }

    /// Wraps a raw ID handed in by a caller. No validation happens here.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> i32 {
        self.0
    }

    pub fn index(&self) -> usize {
        (self.0 & 0xffff) as usize
    }

    pub fn seq(&self) -> u16 {
        ((self.0 >> 16) & SEQ_MASK as i32) as u16
    }
}

#[derive(Debug)]
pub struct SemaphoreSet {
    /// Semaphores
    sems: Box<[Semaphore]>,
    /// Semaphore permission
    permission: IpcPermission,
    /// The credentials of the creator, which the set is charged against
    creator: Credentials,
    /// Creation time or last modification via `semctl`
    sem_ctime: u64,
    /// Last semop time
    sem_otime: u64,
}

impl SemaphoreSet {
    fn new(key: key_t, nsems: usize, mode: u16, creator: &Credentials) -> Self {
        let sems = (0..nsems).map(|_| Semaphore::new(0)).collect();
        let permission = IpcPermission::new_sem_perm(key, creator.euid(), creator.egid(), mode);

        Self {
            sems,
            permission,
            creator: creator.clone(),
            sem_ctime: RealTimeCoarseClock::get().read_time().as_secs(),
            sem_otime: 0,
        }
    }

    pub fn nsems(&self) -> usize {
        self.sems.len()
    }

    pub fn permission(&self) -> &IpcPermission {
        &self.permission
    }

    pub(super) fn permission_mut(&mut self) -> &mut IpcPermission {
        &mut self.permission
    }

    pub(super) fn creator(&self) -> &Credentials {
        &self.creator
    }

    pub(super) fn sems(&self) -> &[Semaphore] {
        &self.sems
    }

    pub(super) fn sems_mut(&mut self) -> &mut [Semaphore] {
        &mut self.sems
    }

    /// Gets the semaphore numbered `sem_num`.
    pub(super) fn sem(&self, sem_num: usize) -> Result<&Semaphore> {
        self.sems
            .get(sem_num)
            .ok_or(Error::with_message(Errno::EINVAL, "invalid semaphore number"))
    }

    pub(super) fn sem_mut(&mut self, sem_num: usize) -> Result<&mut Semaphore> {
        self.sems
            .get_mut(sem_num)
            .ok_or(Error::with_message(Errno::EINVAL, "invalid semaphore number"))
    }

    pub fn sem_ctime(&self) -> u64 {
        self.sem_ctime
    }

    pub fn sem_otime(&self) -> u64 {
        self.sem_otime
    }

    pub(super) fn update_ctime(&mut self) {
        self.sem_ctime = RealTimeCoarseClock::get().read_time().as_secs();
    }

    pub(super) fn update_otime(&mut self) {
        self.sem_otime = RealTimeCoarseClock::get().read_time().as_secs();
    }

    /// Fills the status structure of the set, as `IPC_STAT` reports it.
    pub(super) fn stat(&self, seq: u16) -> SemidDs {
        let permission = &self.permission;
        SemidDs {
            sem_perm: IpcPerm {
                key: permission.key(),
                uid: permission.uid().into(),
                gid: permission.gid().into(),
                cuid: permission.cuid().into(),
                cgid: permission.cgid().into(),
                mode: permission.mode() | SEM_ALLOC,
                seq,
            },
            sem_otime: self.sem_otime as i64,
            sem_ctime: self.sem_ctime as i64,
            sem_nsems: self.sems.len() as u16,
        }
    }
}

/// The state of a slot, protected by the per-slot lock.
#[derive(Debug, Default)]
pub(super) struct SlotState {
    seq: u16,
    set: Option<SemaphoreSet>,
}

/// One entry of the semaphore table.
#[derive(Debug, Default)]
pub(super) struct SemSlot {
    state: SpinLock<SlotState>,
    /// Actors blocked in `semop` on the set in this slot
    wait_queue: WaitQueue,
}

impl SemSlot {
    pub(super) fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }
}

/// The state protected by the global lock of the table.
#[derive(Debug)]
pub(super) struct TableState {
    /// Slot indexes in use
    ids: IdAlloc,
    /// Non-private keys and the slots that hold them
    keys: BTreeMap<key_t, usize>,
    /// Number of allocated sets
    nsets: usize,
    /// Number of semaphores over all sets
    semtot: usize,
}

impl TableState {
    pub(super) fn find_key(&self, key: key_t) -> Option<usize> {
        self.keys.get(&key).copied()
    }

    pub(super) fn nsets(&self) -> usize {
        self.nsets
    }

    pub(super) fn semtot(&self) -> usize {
        self.semtot
    }
}

/// The table of semaphore sets.
///
/// Locks must be acquired in the order of the global lock first, then a slot lock. Most
/// operations only need the slot lock of the set they work on; the global lock guards the key
/// index, slot allocation and the semaphore count.
#[derive(Debug)]
pub(super) struct SemTable {
    slots: Box<[SemSlot]>,
    state: SpinLock<TableState>,
}

impl SemTable {
    pub(super) fn new(semmni: usize) -> Self {
        let slots = (0..semmni).map(|_| SemSlot::default()).collect();

        Self {
            slots,
            state: SpinLock::new(TableState {
                ids: IdAlloc::with_capacity(semmni),
                keys: BTreeMap::new(),
                nsets: 0,
                semtot: 0,
            }),
        }
    }

    pub(super) fn nslots(&self) -> usize {
        self.slots.len()
    }

    /// Acquires the global lock.
    pub(super) fn lock(&self) -> SpinLockGuard<'_, TableState> {
        self.state.lock()
    }

    /// Locks the set named by `id`.
    ///
    /// # Errors
    ///
    /// Returns `EINVAL` if the slot is free or has been reused since `id` was handed out.
    pub(super) fn lock_set(&self, id: SemId) -> Result<SemSetGuard<'_>> {
        let Some(slot) = self.slots.get(id.index()) else {
            return_errno_with_message!(Errno::EINVAL, "invalid semaphore identifier");
        };

        let state = slot.state.lock();
        if state.set.is_none() || state.seq != id.seq() {
            return_errno_with_message!(Errno::EINVAL, "invalid semaphore identifier");
        }

        Ok(SemSetGuard { slot, state, id })
    }

    /// Locks the set in the slot numbered `index`, whatever its sequence number is.
    pub(super) fn lock_index(&self, index: usize) -> Result<SemSetGuard<'_>> {
        let Some(slot) = self.slots.get(index) else {
            return_errno_with_message!(Errno::EINVAL, "slot index out of range");
        };

        let state = slot.state.lock();
        if state.set.is_none() {
            return_errno_with_message!(Errno::EINVAL, "slot is free");
        }

        let id = SemId::new(index, state.seq);
        Ok(SemSetGuard { slot, state, id })
    }

    /// Creates a set in the lowest free slot.
    ///
    /// The caller must hold the global lock, which is passed in as `table`.
    pub(super) fn install(
        &self,
        table: &mut TableState,
        key: key_t,
        nsems: usize,
        mode: u16,
        creator: &Credentials,
    ) -> Result<SemId> {
        let index = table
            .ids
            .alloc()
            .ok_or(Error::with_message(Errno::ENOSPC, "no free semaphore slot"))?;

        let mut state = self.slots[index].state.lock();
        debug_assert!(state.set.is_none());
        state.seq = state.seq.wrapping_add(1) & SEQ_MASK;
        state.set = Some(SemaphoreSet::new(key, nsems, mode, creator));

        if key != crate::ipc::IPC_PRIVATE {
            table.keys.insert(key, index);
        }
        table.nsets += 1;
        table.semtot += nsems;

        Ok(SemId::new(index, state.seq))
    }

    /// Reports the status of every slot; `None` marks a free slot.
    pub(super) fn snapshot(&self) -> Vec<Option<SemidDs>> {
        self.slots
            .iter()
            .map(|slot| {
                let state = slot.state.lock();
                state.set.as_ref().map(|set| set.stat(state.seq))
            })
            .collect()
    }
}

/// A locked slot that is known to hold a live set.
pub(super) struct SemSetGuard<'a> {
    slot: &'a SemSlot,
    state: SpinLockGuard<'a, SlotState>,
    id: SemId,
}

impl<'a> SemSetGuard<'a> {
    pub(super) fn id(&self) -> SemId {
        self.id
    }

    pub(super) fn wait_queue(&self) -> &'a WaitQueue {
        &self.slot.wait_queue
    }

    /// Releases the slot lock and wakes up all actors blocked on the set.
    pub(super) fn unlock_and_wake_all(self) {
        let Self { slot, state, .. } = self;
        drop(state);
        slot.wait_queue.wake_all();
    }

    /// Frees the slot and returns the removed set.
    ///
    /// The caller must hold the global lock and is responsible for updating `table`. Actors
    /// blocked on the set are woken up once the slot lock is released.
    pub(super) fn remove(self, table: &mut TableState) -> SemaphoreSet {
        let Self {
            slot,
            mut state,
            id,
        } = self;

        let Some(set) = state.set.take() else {
            unreachable!("a guarded slot always holds a set");
        };
        drop(state);

        table.ids.free(id.index());
        let key = set.permission().key();
        if key != crate::ipc::IPC_PRIVATE {
            table.keys.remove(&key);
        }
        table.nsets -= 1;
        table.semtot -= set.nsems();

        slot.wait_queue.wake_all();
        set
    }
}

impl Deref for SemSetGuard<'_> {
    type Target = SemaphoreSet;

    fn deref(&self) -> &Self::Target {
        match self.state.set.as_ref() {
            Some(set) => set,
            None => unreachable!("a guarded slot always holds a set"),
        }
    }
}

impl DerefMut for SemSetGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.state.set.as_mut() {
            Some(set) => set,
            None => unreachable!("a guarded slot always holds a set"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn creator() -> Credentials {
        Credentials::new(Uid::new(1000), Gid::new(100))
    }

    #[test]
    fn id_encoding() {
        let id = SemId::new(3, 2);
        assert_eq!(id.as_raw(), (2 << 16) | 3);
        assert_eq!(id.index(), 3);
        assert_eq!(id.seq(), 2);
        assert_eq!(SemId::from_raw(id.as_raw()), id);
        assert!(SemId::new(0xffff, SEQ_MASK).as_raw() > 0);
    }

    #[test]
    fn reused_slot_gets_new_id() {
        let table = SemTable::new(4);

        let mut state = table.lock();
        let first = table.install(&mut state, 7, 2, 0o600, &creator()).unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(state.find_key(7), Some(0));
        assert_eq!(state.nsets(), 1);
        assert_eq!(state.semtot(), 2);

        let set = table.lock_set(first).unwrap();
        let removed = set.remove(&mut state);
        assert_eq!(removed.nsems(), 2);
        assert_eq!(state.find_key(7), None);
        assert_eq!(state.nsets(), 0);
        assert_eq!(state.semtot(), 0);

        let second = table.install(&mut state, 7, 1, 0o600, &creator()).unwrap();
        drop(state);

        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert_eq!(
            table.lock_set(first).err().unwrap().error(),
            Errno::EINVAL
        );
        assert_eq!(table.lock_set(second).unwrap().nsems(), 1);
    }

    #[test]
    fn full_table() {
        let table = SemTable::new(2);
        let mut state = table.lock();
        for _ in 0..2 {
            table
                .install(&mut state, crate::ipc::IPC_PRIVATE, 1, 0o600, &creator())
                .unwrap();
        }
        let err = table
            .install(&mut state, crate::ipc::IPC_PRIVATE, 1, 0o600, &creator())
            .unwrap_err();
        assert_eq!(err.error(), Errno::ENOSPC);
        // Private keys never enter the key index.
        assert!(state.keys.is_empty());
    }

    #[test]
    fn stat_view() {
        let table = SemTable::new(2);
        let mut state = table.lock();
        let id = table.install(&mut state, 9, 3, 0o640, &creator()).unwrap();
        drop(state);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[1].is_none());

        let ds = snapshot[0].unwrap();
        assert_eq!(ds.sem_nsems, 3);
        assert_eq!(ds.sem_perm.key, 9);
        assert_eq!(ds.sem_perm.mode, 0o640 | SEM_ALLOC);
        assert_eq!(ds.sem_perm.seq, id.seq());
        assert_eq!(ds.sem_perm.uid, 1000);
        assert_eq!(ds.sem_otime, 0);
        assert!(ds.sem_ctime > 0);

        assert_eq!(table.lock_index(0).unwrap().id(), id);
        assert!(table.lock_index(1).is_err());
        assert!(table.lock_index(2).is_err());
    }
}
