// SPDX-License-Identifier: MPL-2.0

use super::{SyscallReturn, sem_system};
use crate::{
    ipc::{
        IpcControlCmd,
        semaphore::system_v::{SemCtlArg, SemId},
    },
    prelude::*,
};

pub fn sys_semctl(
    semid: i32,
    semnum: i32,
    cmd: i32,
    arg: SemCtlArg,
    actor: &Actor,
) -> Result<SyscallReturn> {
    if semid < 0 {
        return_errno!(Errno::EINVAL)
    }

    let cmd = IpcControlCmd::try_from(cmd)?;
    debug!(
        "[sys_semctl] semid = {}, semnum = {}, cmd = {:?}, arg = {:?}",
        semid, semnum, cmd, arg
    );

    let ret = sem_system()?.semctl(SemId::from_raw(semid), semnum, cmd, arg, actor)?;
    Ok(SyscallReturn::Return(ret.as_raw() as isize))
}
