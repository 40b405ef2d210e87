// SPDX-License-Identifier: MPL-2.0

//! Blocking primitives used by the semaphore facility.

mod wait;

pub use self::wait::{WaitQueue, Waiter, Waker};
