// SPDX-License-Identifier: MPL-2.0

//! The actors on whose behalf semaphore operations are performed.
//!
//! Process lifecycle is owned by the host. The facility only needs to know
//! who is asking (pid and credentials) and how to interrupt a sleeping
//! request.

mod credentials;
mod pauser;

pub use self::{
    credentials::{Credentials, Gid, Uid},
    pauser::Pauser,
};
use crate::prelude::*;

/// Process id.
pub type Pid = i32;

/// A requesting actor.
///
/// Cloning an actor yields another handle to the same actor; interrupting
/// any of the handles interrupts the actor.
#[derive(Debug, Clone)]
pub struct Actor {
    pid: Pid,
    credentials: Credentials,
    pauser: Arc<Pauser>,
}

impl Actor {
    pub fn new(pid: Pid, credentials: Credentials) -> Self {
        Self {
            pid,
            credentials,
            pauser: Pauser::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn pauser(&self) -> &Arc<Pauser> {
        &self.pauser
    }

    /// Interrupts a blocking operation of this actor, as a signal would.
    pub fn interrupt(&self) {
        self.pauser.interrupt();
    }
}
