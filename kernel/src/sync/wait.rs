// SPDX-License-Identifier: MPL-2.0

use alloc::{collections::VecDeque, sync::Arc};
use core::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};
use std::thread::{self, Thread};

use spin::Mutex as SpinLock;

// # Memory orders
//
// A semaphore value is changed under the slot lock, and the slot lock is released before the
// sleepers are woken up. A woken sleeper takes the slot lock again before it looks at any value,
// so the values themselves need no ordering from this file.
//
// What must not get lost is the wake event itself. `Waker::wake_up` sets `has_woken` with
// `Ordering::Release`, and `Waiter::wait` consumes it with `Ordering::Acquire`, so a wake event
// that happens between enqueuing a waker and parking is seen when the waiter parks. Dropping a
// waiter closes its waker, which makes later wake-ups of the waker no-ops.

/// A queue of the actors sleeping on one semaphore set.
///
/// A sleeper creates a [`Waiter`] and its [`Waker`] with [`Waiter::new_pair`], enqueues the waker
/// while it still holds the slot lock, and waits after releasing the lock. Whoever changes the set
/// in a way a sleeper may care about calls [`WaitQueue::wake_all`]; every sleeper re-checks its
/// operations itself.
pub struct WaitQueue {
    // A copy of `wakers.len()`, used for the lock-free fast path in `wake_all`.
    num_wakers: AtomicU32,
    wakers: SpinLock<VecDeque<Arc<Waker>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            num_wakers: AtomicU32::new(0),
            wakers: SpinLock::new(VecDeque::new()),
        }
    }

    /// Wakes up every queued sleeper and empties the queue.
    ///
    /// Returns the number of sleepers that were actually woken up. Wakers of sleepers that were
    /// already woken up, or that gave up waiting, are dropped without effect.
    pub fn wake_all(&self) -> usize {
        if self.num_wakers.load(Ordering::Acquire) == 0 {
            return 0;
        }

        let wakers = {
            let mut wakers = self.wakers.lock();
            self.num_wakers.store(0, Ordering::Release);
            core::mem::take(&mut *wakers)
        };

        wakers.iter().filter(|waker| waker.wake_up()).count()
    }

    /// Enqueues the waker of a sleeper.
    pub fn enqueue(&self, waker: Arc<Waker>) {
        let mut wakers = self.wakers.lock();
        wakers.push_back(waker);
        self.num_wakers.fetch_add(1, Ordering::Release);
    }

    fn len(&self) -> usize {
        self.num_wakers.load(Ordering::Relaxed) as usize
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitQueue")
            .field("num_wakers", &self.len())
            .finish()
    }
}

/// The sleeping half of a waiter/waker pair.
///
/// A waiter parks the thread that created it, so it is neither `Send` nor `Sync`.
pub struct Waiter {
    waker: Arc<Waker>,
    _not_send: PhantomData<*const ()>,
}

/// The waking half of a waiter/waker pair, shared with the [`WaitQueue`] and the actor's
/// [`Pauser`](crate::process::Pauser).
pub struct Waker {
    has_woken: AtomicBool,
    thread: Thread,
}

impl Waiter {
    /// Creates a waiter for the current thread and its associated [`Waker`].
    pub fn new_pair() -> (Self, Arc<Waker>) {
        let waker = Arc::new(Waker {
            has_woken: AtomicBool::new(false),
            thread: thread::current(),
        });
        let waiter = Self {
            waker: waker.clone(),
            _not_send: PhantomData,
        };
        (waiter, waker)
    }

    /// Parks the current thread until the waker is woken up.
    ///
    /// Returns at once if a wake-up arrived since the last call, or since the pair was created.
    pub fn wait(&self) {
        while !self.waker.has_woken.swap(false, Ordering::Acquire) {
            // `park` may return spuriously.
            thread::park();
        }
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.waker.has_woken.store(true, Ordering::Release);
    }
}

impl Waker {
    /// Wakes up the associated [`Waiter`].
    ///
    /// Returns `false` if the waiter was already woken up and has not waited since, or if it has
    /// been dropped.
    pub fn wake_up(&self) -> bool {
        if self.has_woken.swap(true, Ordering::Release) {
            return false;
        }
        self.thread.unpark();

        true
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn wake_all_wakes_every_sleeper() {
        let queue = WaitQueue::new();
        let ready = AtomicU32::new(0);

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    let (waiter, waker) = Waiter::new_pair();
                    queue.enqueue(waker);
                    ready.fetch_add(1, Ordering::AcqRel);
                    waiter.wait();
                });
            }

            while ready.load(Ordering::Acquire) < 3 {
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(queue.wake_all(), 3);
        });

        assert_eq!(queue.wake_all(), 0);
    }

    #[test]
    fn wake_up_before_wait() {
        let (waiter, waker) = Waiter::new_pair();

        assert!(waker.wake_up());
        assert!(!waker.wake_up());
        waiter.wait();
        assert!(waker.wake_up());
    }

    #[test]
    fn stale_wakers_are_skipped() {
        let queue = WaitQueue::new();

        let (waiter, waker) = Waiter::new_pair();
        queue.enqueue(waker);
        drop(waiter);

        let (_waiter, waker) = Waiter::new_pair();
        queue.enqueue(waker);

        assert_eq!(queue.wake_all(), 1);
        assert_eq!(queue.wake_all(), 0);
    }
}
