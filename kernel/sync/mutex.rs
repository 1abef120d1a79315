// Copyright 2025 The Pigweed Authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use circular_queue::CircularQueue;
use kernel_config::{KernelConfig, KernelConfigInterface};

use crate::scheduler::{SchedLock, Scheduler, ThreadId};

const MUTEX_DEBUG: bool = false;
macro_rules! mutex_debug {
    ($($args:tt)*) => {{
        pw_log::debug_if!(MUTEX_DEBUG, $($args)*)
    }}
}

const WAIT_QUEUE_CAPACITY: usize = KernelConfig::MUTEX_WAIT_QUEUE_CAPACITY;

struct MutexState {
    holder: Option<ThreadId>,
    // Threads blocked in `lock`, in arrival order.
    waiters: CircularQueue<ThreadId, WAIT_QUEUE_CAPACITY>,
}

/// A blocking mutex for kernel threads.
///
/// Contended lockers queue in arrival order and are handed the lock
/// directly by `unlock`: the holder is switched to the first waiter before
/// that waiter becomes runnable, so no other thread can slip in between.
///
/// Every call on a given mutex must pass the same scheduler.
pub struct KernelMutex<T> {
    state: SchedLock<MutexState>,
    inner: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for KernelMutex<T> {}
unsafe impl<T: Send> Send for KernelMutex<T> {}

pub struct KernelMutexGuard<'lock, T> {
    lock: &'lock KernelMutex<T>,
    scheduler: &'lock Scheduler,
}

impl<T> Deref for KernelMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for KernelMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for KernelMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock(self.scheduler);
    }
}

impl<T> KernelMutex<T> {
    pub const fn new(initial_value: T) -> Self {
        Self {
            state: SchedLock::new(MutexState {
                holder: None,
                waiters: CircularQueue::new(),
            }),
            inner: UnsafeCell::new(initial_value),
        }
    }

    /// Acquire the mutex, blocking the current thread while another holds
    /// it.  Locking a mutex the caller already holds is fatal.
    pub fn lock<'a>(&'a self, scheduler: &'a Scheduler) -> KernelMutexGuard<'a, T> {
        let mut state = self.state.lock(scheduler);
        let Some(current) = state.sched().current_thread_id() else {
            pw_assert::panic!("mutex locked outside of a thread");
        };
        pw_assert::ne!(state.holder, Some(current), "mutex already held by caller");

        if state.holder.is_none() {
            state.holder = Some(current);
        } else {
            mutex_debug!("mutex {:08x} lock wait", &raw const *self as usize);
            // Overflow is a sizing bug and fatal.
            state.waiters.enqueue(current);
            state = state.block_current();

            // `unlock` handed the mutex over before waking us.
            pw_assert::eq!(state.holder, Some(current));
        }
        mutex_debug!("mutex {:08x} lock acquired", &raw const *self as usize);

        // At this point we have exclusive access to `self.inner`.
        KernelMutexGuard {
            lock: self,
            scheduler,
        }
    }

    /// Acquire the mutex only if it is free.
    pub fn try_lock<'a>(&'a self, scheduler: &'a Scheduler) -> Option<KernelMutexGuard<'a, T>> {
        let mut state = self.state.lock(scheduler);
        let Some(current) = state.sched().current_thread_id() else {
            pw_assert::panic!("mutex locked outside of a thread");
        };
        if state.holder.is_some() {
            return None;
        }
        state.holder = Some(current);
        Some(KernelMutexGuard {
            lock: self,
            scheduler,
        })
    }

    fn unlock(&self, scheduler: &Scheduler) {
        let mut state = self.state.lock(scheduler);
        let current = state.sched().current_thread_id();
        pw_assert::eq!(state.holder, current, "mutex unlocked by non-holder");

        match state.waiters.dequeue() {
            Some(next) => {
                mutex_debug!("mutex {:08x} handed to {:?}", &raw const *self as usize, next);
                state.holder = Some(next);
                state.sched_mut().wakeup(next, None);
            }
            None => state.holder = None,
        }
    }

    #[must_use]
    pub fn holder(&self, scheduler: &Scheduler) -> Option<ThreadId> {
        self.state.lock(scheduler).holder
    }

    #[must_use]
    pub fn waiting_count(&self, scheduler: &Scheduler) -> usize {
        self.state.lock(scheduler).waiters.len()
    }
}

impl<T> Drop for KernelMutex<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        pw_assert::assert!(
            state.waiters.is_empty(),
            "mutex dropped with {} waiters",
            state.waiters.len()
        );
    }
}

#[cfg(all(test, feature = "arch_host"))]
mod tests {
    use std::boxed::Box;

    use super::*;

    fn scheduler() -> &'static Scheduler {
        Box::leak(Box::new(Scheduler::new()))
    }

    #[test]
    fn uncontended_lock_records_holder() -> unittest::Result<()> {
        let scheduler = scheduler();
        let me = scheduler.adopt_current_thread("main");
        let mutex = KernelMutex::new(1u32);
        {
            let mut guard = mutex.lock(scheduler);
            *guard += 1;
            unittest::assert_eq!(mutex.holder(scheduler), Some(me));
            unittest::assert_true!(mutex.try_lock(scheduler).is_none());
        }
        unittest::assert_eq!(mutex.holder(scheduler), None);
        unittest::assert_eq!(*mutex.lock(scheduler), 2);
        Ok(())
    }

    #[test]
    #[should_panic]
    fn recursive_lock_is_fatal() {
        let scheduler = scheduler();
        let _ = scheduler.adopt_current_thread("main");
        let mutex = KernelMutex::new(());
        let _first = mutex.lock(scheduler);
        let _second = mutex.lock(scheduler);
    }

    #[test]
    #[should_panic]
    fn dropping_with_waiters_is_fatal() {
        let scheduler = scheduler();
        let me = scheduler.adopt_current_thread("main");
        let mut mutex = KernelMutex::new(());
        mutex.state.get_mut().waiters.enqueue(me);
        drop(mutex);
    }
}
