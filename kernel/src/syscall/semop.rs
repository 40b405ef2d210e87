// SPDX-License-Identifier: MPL-2.0

use super::{SyscallReturn, sem_system};
use crate::{
    ipc::semaphore::system_v::{SemBuf, SemId},
    prelude::*,
};

pub fn sys_semop(semid: i32, sops: &[SemBuf], actor: &Actor) -> Result<SyscallReturn> {
    debug!("[sys_semop] semid = {}, nsops = {}", semid, sops.len());

    if semid < 0 {
        return_errno_with_message!(Errno::EINVAL, "invalid semaphore identifier");
    }

    sem_system()?.semop(SemId::from_raw(semid), sops, actor)?;
    Ok(SyscallReturn::Return(0))
}
