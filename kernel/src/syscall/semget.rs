// SPDX-License-Identifier: MPL-2.0

use super::{SyscallReturn, sem_system};
use crate::{ipc::key_t, prelude::*};

pub fn sys_semget(key: key_t, nsems: i32, semflg: i32, actor: &Actor) -> Result<SyscallReturn> {
    debug!(
        "[sys_semget] key = {}, nsems = {}, semflg = {:#o}",
        key, nsems, semflg
    );

    let id = sem_system()?.semget(key, nsems, semflg, actor)?;
    Ok(SyscallReturn::Return(id.as_raw() as isize))
}
