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

use crate::scheduler::{Scheduler, SchedulerState};
use crate::sync::spinlock::SpinLockGuard;

/// Data protected by the scheduler lock.
///
/// Lets a wait queue and the scheduler state it feeds be updated in one
/// critical section, which is what makes block and wakeup race free.
///
/// # Safety
/// Every `lock` of a given `SchedLock` must pass the same scheduler.  Taking
/// two different `SchedLock`s at the same time will deadlock as they share
/// the same underlying lock.
pub struct SchedLock<T> {
    inner: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SchedLock<T> {}
unsafe impl<T: Send> Send for SchedLock<T> {}

impl<T> SchedLock<T> {
    pub const fn new(initial_value: T) -> Self {
        Self {
            inner: UnsafeCell::new(initial_value),
        }
    }

    /// Direct access when the caller already has exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn lock<'a>(&'a self, scheduler: &'a Scheduler) -> SchedLockGuard<'a, T> {
        let guard = scheduler.lock();
        SchedLockGuard {
            guard,
            // SAFETY: the scheduler lock is held for the guard's lifetime.
            inner: unsafe { &mut *self.inner.get() },
            scheduler,
        }
    }
}

pub struct SchedLockGuard<'lock, T> {
    guard: SpinLockGuard<'lock, SchedulerState>,
    inner: &'lock mut T,
    scheduler: &'lock Scheduler,
}

impl<'lock, T> SchedLockGuard<'lock, T> {
    #[must_use]
    pub fn sched(&self) -> &SpinLockGuard<'lock, SchedulerState> {
        &self.guard
    }

    #[must_use]
    pub fn sched_mut(&mut self) -> &mut SpinLockGuard<'lock, SchedulerState> {
        &mut self.guard
    }

    /// Block the current thread, releasing the lock while it is off the
    /// CPU.  The protected data may have changed by the time this returns.
    #[must_use]
    pub fn block_current(self) -> Self {
        let Self {
            guard,
            inner,
            scheduler,
        } = self;
        let guard = scheduler.block_current(guard);
        Self {
            guard,
            inner,
            scheduler,
        }
    }
}

impl<T> Deref for SchedLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner
    }
}

impl<T> DerefMut for SchedLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner
    }
}
