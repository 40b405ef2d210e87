// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// Per-actor resource accounting of semaphores.
///
/// The host may plug in an implementation to put quotas on the number of semaphores an actor
/// owns and the number of operations it submits at once. Methods are called without any lock of
/// the facility held, so they may block.
pub trait SemAccounting: Send + Sync {
    /// Charges `nsems` semaphores to `actor` before a set is created.
    ///
    /// An error refuses the creation, which fails with `ENOSPC`.
    fn charge(&self, _actor: &Actor, _nsems: usize) -> Result<()> {
        Ok(())
    }

    /// Gives back the `nsems` semaphores of a removed set to its creator.
    fn uncharge(&self, _creator: &Credentials, _nsems: usize) {}

    /// Returns whether `actor` may submit `nops` operations in one `semop` call.
    fn can_operate(&self, _actor: &Actor, _nops: usize) -> bool {
        true
    }
}

/// The accounting that never refuses anything.
#[derive(Debug, Default)]
pub struct NoAccounting;

impl SemAccounting for NoAccounting {}
