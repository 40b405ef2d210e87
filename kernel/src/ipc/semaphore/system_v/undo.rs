// SPDX-License-Identifier: MPL-2.0

//! Adjust-on-exit records of `SEM_UNDO` operations.
//!
//! Every actor that performed `SEM_UNDO` operations owns one record, and every record holds the
//! pending adjustments of that actor, one entry per semaphore. An adjustment is the amount that
//! will be added to the semaphore when the actor exits, i.e., the negation of the sum of its
//! `SEM_UNDO` operations. Entries whose adjustment drops to zero are deleted, and records whose
//! entries are all gone are freed.
//!
//! A `semop` call records its adjustments before applying its operations, as an
//! [`UndoReservation`]. While a reservation is outstanding, the record stays allocated and its
//! zeroed entries stay in place, so that handing the reservation back restores the record
//! exactly.
//!
//! The registry has its own lock, which is never held together with a slot lock.

use hashbrown::HashMap;

use super::{sem::SemBuf, sem_set::SemId};
use crate::prelude::*;

/// A pending adjustment of one semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct UndoEntry {
    pub(super) id: SemId,
    pub(super) sem_num: u16,
    pub(super) adj_val: i16,
}

#[derive(Debug, Default)]
struct UndoRecord {
    entries: Vec<UndoEntry>,
    /// Number of outstanding reservations
    reserved: usize,
    /// The `(id, sem_num)` pairs cleared while reservations are outstanding
    cleared: Vec<(SemId, u16)>,
}

impl UndoRecord {
    fn position(&self, id: SemId, sem_num: u16) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.id == id && entry.sem_num == sem_num)
    }

    fn is_unused(&self) -> bool {
        self.entries.is_empty() && self.reserved == 0
    }

    /// Adds `adj_val` to the adjustment of semaphore `sem_num` in set `id`.
    fn adjust(
        &mut self,
        id: SemId,
        sem_num: u16,
        adj_val: i32,
        semaem: i32,
        max_entries: usize,
    ) -> Result<()> {
        let pos = self.position(id, sem_num);

        let new_val = adj_val + pos.map_or(0, |pos| self.entries[pos].adj_val as i32);
        if new_val > semaem || new_val < -semaem {
            return_errno_with_message!(Errno::ERANGE, "undo adjustment out of range");
        }

        match pos {
            Some(pos) if new_val == 0 && self.reserved == 0 => {
                self.entries.swap_remove(pos);
            }
            Some(pos) => self.entries[pos].adj_val = new_val as i16,
            None => {
                if self.entries.len() >= max_entries {
                    return_errno_with_message!(Errno::ENOSPC, "undo entries exhausted");
                }
                self.entries.push(UndoEntry {
                    id,
                    sem_num,
                    adj_val: new_val as i16,
                });
            }
        }
        Ok(())
    }

    /// Takes back an adjustment made under a reservation.
    ///
    /// Returns `false` if the entry is gone, which only a clear or an exit can cause.
    fn revert(&mut self, id: SemId, sem_num: u16, adj_val: i32) -> bool {
        let Some(pos) = self.position(id, sem_num) else {
            return false;
        };
        let entry = &mut self.entries[pos];
        entry.adj_val =
            (entry.adj_val as i32 - adj_val).clamp(-(i16::MAX as i32), i16::MAX as i32) as i16;
        true
    }

    fn unpin(&mut self) {
        self.reserved -= 1;
        if self.reserved == 0 {
            self.entries.retain(|entry| entry.adj_val != 0);
            self.cleared.clear();
        }
    }
}

#[derive(Debug)]
struct UndoRecords {
    active: HashMap<Pid, UndoRecord>,
    max_records: usize,
    max_entries: usize,
}

impl UndoRecords {
    /// Returns the record of `pid`, allocating one if needed.
    fn record_mut(&mut self, pid: Pid) -> Result<&mut UndoRecord> {
        if !self.active.contains_key(&pid) && self.active.len() >= self.max_records {
            return_errno_with_message!(Errno::ENOSPC, "no undo records available");
        }
        Ok(self.active.entry(pid).or_default())
    }

    fn free_if_unused(&mut self, pid: Pid) {
        if self.active.get(&pid).is_some_and(UndoRecord::is_unused) {
            self.active.remove(&pid);
        }
    }

    fn unpin(&mut self, pid: Pid) {
        if let Some(record) = self.active.get_mut(&pid) {
            record.unpin();
        }
        self.free_if_unused(pid);
    }
}

/// The adjustments that a `semop` call has recorded before applying its operations.
///
/// A reservation must be handed to either [`UndoRegistry::commit`], once the operations are
/// applied, or [`UndoRegistry::release`].
#[derive(Debug)]
#[must_use]
pub(super) struct UndoReservation {
    pid: Pid,
    id: SemId,
    /// The recorded `(sem_num, adjustment)` pairs, in recording order
    adjustments: Vec<(u16, i32)>,
}

/// The registry of adjust-on-exit records.
#[derive(Debug)]
pub(super) struct UndoRegistry {
    records: SpinLock<UndoRecords>,
}

impl UndoRegistry {
    pub(super) fn new(max_records: usize, max_entries: usize) -> Self {
        Self {
            records: SpinLock::new(UndoRecords {
                active: HashMap::new(),
                max_records,
                max_entries,
            }),
        }
    }

    /// Adds `adj_val` to the adjustment of semaphore `sem_num` in set `id` on behalf of `pid`.
    ///
    /// Nothing changes on error.
    #[cfg(test)]
    pub(super) fn adjust(
        &self,
        pid: Pid,
        id: SemId,
        sem_num: u16,
        adj_val: i32,
        semaem: i32,
    ) -> Result<()> {
        if adj_val == 0 {
            return Ok(());
        }

        let mut records = self.records.lock();
        let max_entries = records.max_entries;
        let res = records
            .record_mut(pid)?
            .adjust(id, sem_num, adj_val, semaem, max_entries);
        records.free_if_unused(pid);
        res
    }

    /// Records the adjustments of all `SEM_UNDO` operations in `sops`.
    ///
    /// Either every adjustment is recorded or, on error, none is.
    ///
    /// # Errors
    ///
    /// - `ENOSPC` if `pid` has no record and all of them are in use, or if a new entry is
    ///   needed but the record of `pid` is full;
    /// - `ERANGE` if a resulting adjustment would exceed `semaem` in magnitude.
    pub(super) fn reserve(
        &self,
        pid: Pid,
        id: SemId,
        sops: &[SemBuf],
        semaem: i32,
    ) -> Result<UndoReservation> {
        let mut records = self.records.lock();
        let max_entries = records.max_entries;
        let record = records.record_mut(pid)?;
        record.reserved += 1;

        let mut adjustments = Vec::new();
        for sop in sops.iter().filter(|sop| sop.is_undo() && sop.sem_op() != 0) {
            let adj_val = -(sop.sem_op() as i32);
            if let Err(err) = record.adjust(id, sop.sem_num(), adj_val, semaem, max_entries) {
                for &(sem_num, adj_val) in adjustments.iter().rev() {
                    record.revert(id, sem_num, adj_val);
                }
                records.unpin(pid);
                return Err(err);
            }
            adjustments.push((sop.sem_num(), adj_val));
        }

        Ok(UndoReservation {
            pid,
            id,
            adjustments,
        })
    }

    /// Keeps the adjustments of a reservation whose operations were applied.
    pub(super) fn commit(&self, reservation: UndoReservation) {
        self.records.lock().unpin(reservation.pid);
    }

    /// Takes back the adjustments of a reservation whose operations were not applied.
    ///
    /// Adjustments of semaphores that were cleared in the meantime stay dropped.
    pub(super) fn release(&self, reservation: UndoReservation) {
        let UndoReservation {
            pid,
            id,
            adjustments,
        } = reservation;
        let mut records = self.records.lock();

        let Some(record) = records.active.get_mut(&pid) else {
            warn!("[semop] undo record of pid {} vanished while reserved", pid);
            return;
        };
        for &(sem_num, adj_val) in adjustments.iter().rev() {
            if record.cleared.contains(&(id, sem_num)) {
                continue;
            }
            if !record.revert(id, sem_num, adj_val) {
                warn!(
                    "[semop] reserved undo entry gone, pid = {}, semid = {}, sem_num = {}",
                    pid,
                    id.as_raw(),
                    sem_num
                );
            }
        }
        records.unpin(pid);
    }

    /// Deletes the entries of set `id`, limited to semaphore `sem_num` if given, from every record.
    pub(super) fn clear(&self, id: SemId, sem_num: Option<u16>) {
        let mut records = self.records.lock();
        let mut removed = 0;

        records.active.retain(|_, record| {
            let before = record.entries.len();
            let reserved = record.reserved > 0;
            let UndoRecord {
                entries, cleared, ..
            } = record;
            entries.retain(|entry| {
                let keep = entry.id != id || sem_num.is_some_and(|num| num != entry.sem_num);
                if !keep && reserved {
                    cleared.push((entry.id, entry.sem_num));
                }
                keep
            });
            removed += before - entries.len();
            !record.is_unused()
        });

        if removed > 0 {
            trace!(
                "[undo] cleared {} entries of semid = {}",
                removed,
                id.as_raw()
            );
        }
    }

    /// Removes the record of `pid` and returns its entries.
    pub(super) fn take(&self, pid: Pid) -> Vec<UndoEntry> {
        let Some(record) = self.records.lock().active.remove(&pid) else {
            return Vec::new();
        };
        if record.reserved > 0 {
            warn!("[semexit] pid {} exits with reserved undo entries", pid);
        }
        record
            .entries
            .into_iter()
            .filter(|entry| entry.adj_val != 0)
            .collect()
    }

    /// Returns the number of records in use.
    pub(super) fn nrecords(&self) -> usize {
        self.records.lock().active.len()
    }

    /// Returns the entries of `pid` with a non-zero adjustment.
    #[cfg(test)]
    pub(super) fn entries_of(&self, pid: Pid) -> Vec<UndoEntry> {
        self.records
            .lock()
            .active
            .get(&pid)
            .map(|record| {
                record
                    .entries
                    .iter()
                    .filter(|entry| entry.adj_val != 0)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }
}
