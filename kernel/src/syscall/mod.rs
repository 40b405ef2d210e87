// SPDX-License-Identifier: MPL-2.0

//! Raw entry points of the semaphore facility.
//!
//! The entries take the integers that a system call receives and work on the process-wide
//! facility installed by [`crate::ipc::semaphore::system_v::init`]. Without it they fail with
//! `ENOSYS`, like a kernel built without System V IPC.

pub use self::{semctl::sys_semctl, semget::sys_semget, semop::sys_semop};
use crate::{ipc::semaphore::system_v::SemSystem, prelude::*};

mod semctl;
mod semget;
mod semop;

/// Syscall return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    /// return isize, this value will be handed back to the caller
    Return(isize),
}

/// Converts the outcome of an entry into the raw return value, i.e., the value or `-errno`.
pub fn raw_return(result: Result<SyscallReturn>) -> isize {
    match result {
        Ok(SyscallReturn::Return(return_value)) => return_value,
        Err(err) => {
            debug!("syscall return error: {:?}", err);
            -(err.error() as i32 as isize)
        }
    }
}

fn sem_system() -> Result<&'static SemSystem> {
    crate::ipc::semaphore::system_v::sem_system()
        .ok_or(Error::with_message(Errno::ENOSYS, "semaphores are not initialized"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ipc::{
        IPC_PRIVATE, IpcControlCmd,
        semaphore::system_v::{self, SemBuf, SemCtlArg, SemFlags, SemLimits},
    };

    fn setup() {
        system_v::init(SemLimits::default()).unwrap();
    }

    fn value(ret: SyscallReturn) -> isize {
        let SyscallReturn::Return(value) = ret;
        value
    }

    #[test]
    fn raw_round_trip() {
        setup();
        let actor = Actor::new(500, Credentials::new(Uid::new(500), Gid::new(500)));

        let semid = value(sys_semget(IPC_PRIVATE, 2, 0o600, &actor).unwrap()) as i32;
        assert!(semid > 0);

        let sops = [SemBuf::new(1, 3, SemFlags::SEM_UNDO)];
        assert_eq!(
            sys_semop(semid, &sops, &actor).unwrap(),
            SyscallReturn::Return(0)
        );

        let getval = IpcControlCmd::SEM_GETVAL as i32;
        let ret = sys_semctl(semid, 1, getval, SemCtlArg::None, &actor).unwrap();
        assert_eq!(value(ret), 3);

        system_v::exit_hook(&actor);
        let ret = sys_semctl(semid, 1, getval, SemCtlArg::None, &actor).unwrap();
        assert_eq!(value(ret), 0);

        let rmid = IpcControlCmd::IPC_RMID as i32;
        sys_semctl(semid, 0, rmid, SemCtlArg::None, &actor).unwrap();
        assert_eq!(
            raw_return(sys_semop(semid, &sops, &actor)),
            -(Errno::EINVAL as isize)
        );
    }

    #[test]
    fn bad_raw_arguments() {
        setup();
        let actor = Actor::new(501, Credentials::new(Uid::new(501), Gid::new(501)));

        let err = sys_semctl(0, 0, 99, SemCtlArg::None, &actor).unwrap_err();
        assert_eq!(err.error(), Errno::EINVAL);

        let stat = IpcControlCmd::IPC_STAT as i32;
        let err = sys_semctl(-1, 0, stat, SemCtlArg::None, &actor).unwrap_err();
        assert_eq!(err.error(), Errno::EINVAL);

        let sops = [SemBuf::new(0, 1, SemFlags::empty())];
        let err = sys_semop(-5, &sops, &actor).unwrap_err();
        assert_eq!(err.error(), Errno::EINVAL);
    }

    #[test]
    fn errors_become_negative_errno() {
        assert_eq!(raw_return(Ok(SyscallReturn::Return(7))), 7);
        assert_eq!(raw_return(Err(Error::new(Errno::EIDRM))), -43);
    }
}
