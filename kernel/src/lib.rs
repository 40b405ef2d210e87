// SPDX-License-Identifier: MPL-2.0

//! System V semaphores, as a library.
//!
//! The crate keeps a table of semaphore sets that actors look up by key, operate on atomically
//! and inspect or change through control commands. Operations may block until they can proceed,
//! and operations marked `SEM_UNDO` are reverted when their actor exits.
//!
//! The host owns processes and hands the facility an [`Actor`] per request. It installs the
//! process-wide instance with [`init`], forwards actor exits to [`exit_hook`], and either calls
//! [`SemSystem`] directly or goes through the raw entries in [`syscall`].
//!
//! For the semantics of the individual calls, see the FreeBSD manual pages of `semget(2)`,
//! `semctl(2)` and `semop(2)`.

#![deny(unsafe_code)]

extern crate alloc;

pub mod error;
pub mod ipc;
mod prelude;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod time;

pub use self::{
    error::{Errno, Error},
    ipc::semaphore::system_v::{
        SemBuf, SemCtlArg, SemCtlRet, SemFlags, SemId, SemLimits, SemSystem, exit_hook, init,
        sem_system,
    },
    process::{Actor, Credentials, Gid, Pid, Uid},
};
