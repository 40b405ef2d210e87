// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    prelude::*,
    sync::{Waiter, Waker},
};

/// A `Pauser` allows pausing the execution of an actor until it is woken up or interrupted.
///
/// Behind the scene, `Pauser` is implemented with [`Waiter`]. But unlike a bare [`Waiter`],
/// `Pauser` is aware of interruptions: if an actor paused by a `Pauser` is interrupted, then the
/// actor will resume its execution and observe `EINTR`.
///
/// An interruption that arrives while the actor is not paused stays pending and cuts the next
/// pause short, which mirrors how a pending signal aborts an interruptible sleep.
///
/// # Example
///
/// ```ignore
/// let (waiter, waker) = Waiter::new_pair();
/// wait_queue.enqueue(waker);
/// match actor.pauser().pause(&waiter) {
///     Ok(()) => {
///         // Woken up by someone, re-check the condition...
///     }
///     Err(EINTR) => {
///         // Interrupted...
///     }
/// }
/// ```
pub struct Pauser {
    is_interrupted: AtomicBool,
    waker: SpinLock<Option<Arc<Waker>>>,
}

impl Pauser {
    /// Creates a new `Pauser` with no pending interruption.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            is_interrupted: AtomicBool::new(false),
            waker: SpinLock::new(None),
        })
    }

    /// Pauses the current thread until `waiter` is woken up or the actor is interrupted.
    ///
    /// A pending interruption is consumed by this method.
    ///
    /// # Errors
    ///
    /// If an interruption is pending or arrives before the waiter is woken up, this method
    /// returns `Err(EINTR)`.
    pub fn pause(&self, waiter: &Waiter) -> Result<()> {
        *self.waker.lock() = Some(waiter.waker());

        // An interruption may come before we register the waker, so we check here.
        let res = if self.take_interrupted() {
            Err(Error::with_message(Errno::EINTR, "interrupted"))
        } else {
            waiter.wait();
            if self.take_interrupted() {
                Err(Error::with_message(Errno::EINTR, "interrupted"))
            } else {
                Ok(())
            }
        };

        *self.waker.lock() = None;
        res
    }

    /// Interrupts the paused actor, or the next pause if the actor is running.
    pub fn interrupt(&self) {
        self.is_interrupted.store(true, Ordering::Release);
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.wake_up();
        }
    }

    /// Returns whether an interruption is pending.
    pub fn is_interrupted(&self) -> bool {
        self.is_interrupted.load(Ordering::Acquire)
    }

    fn take_interrupted(&self) -> bool {
        self.is_interrupted.swap(false, Ordering::AcqRel)
    }
}

impl Debug for Pauser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pauser")
            .field("is_interrupted", &self.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn pending_interrupt_cuts_pause_short() {
        let pauser = Pauser::new();
        pauser.interrupt();

        let (waiter, _waker) = Waiter::new_pair();
        let err = pauser.pause(&waiter).unwrap_err();
        assert_eq!(err.error(), Errno::EINTR);
        assert!(!pauser.is_interrupted());
    }

    #[test]
    fn wake_up_resumes_pause() {
        let pauser = Pauser::new();
        let (waiter, waker) = Waiter::new_pair();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            waker.wake_up();
        });

        assert!(pauser.pause(&waiter).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn interrupt_from_another_thread() {
        let pauser = Pauser::new();
        let pauser_cloned = pauser.clone();
        let (waiter, _waker) = Waiter::new_pair();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            pauser_cloned.interrupt();
        });

        let err = pauser.pause(&waiter).unwrap_err();
        assert_eq!(err.error(), Errno::EINTR);
        handle.join().unwrap();
    }
}
