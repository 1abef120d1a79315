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
use core::sync::atomic::{Ordering, compiler_fence};

use cortex_m::register::primask;

/// Masks interrupts for its lifetime, restoring the previous PRIMASK state
/// on drop so guards nest.
pub struct InterruptGuard {
    were_enabled: bool,
}

impl InterruptGuard {
    #[inline]
    pub fn new() -> Self {
        let were_enabled = primask::read().is_active();
        cortex_m::interrupt::disable();
        compiler_fence(Ordering::SeqCst);
        Self { were_enabled }
    }
}

impl Drop for InterruptGuard {
    #[inline]
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        if self.were_enabled {
            // SAFETY: interrupts were enabled when this guard was created.
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

pub struct CortexMSpinLockGuard<'a> {
    lock: &'a BareSpinLock,
    _interrupts: InterruptGuard,
}

impl Drop for CortexMSpinLockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: interrupts are still masked by `_interrupts`.
        unsafe { *self.lock.is_locked.get() = false };
    }
}

/// Uniprocessor spinlock.
///
/// Masking interrupts is what provides exclusion.  The flag only exists so
/// `try_lock` can detect a lock already held by the interrupted context;
/// spinning on it from a handler would never terminate, so `lock` treats
/// that as fatal.
pub struct BareSpinLock {
    is_locked: UnsafeCell<bool>,
}

// SAFETY: `is_locked` is only accessed with interrupts masked.
unsafe impl Send for BareSpinLock {}
unsafe impl Sync for BareSpinLock {}

impl BareSpinLock {
    pub const fn new() -> Self {
        Self {
            is_locked: UnsafeCell::new(false),
        }
    }
}

impl Default for BareSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::sync::spinlock::BareSpinLock for BareSpinLock {
    type Guard<'a> = CortexMSpinLockGuard<'a>;

    #[allow(clippy::declare_interior_mutable_const)]
    const NEW: BareSpinLock = Self::new();

    #[inline(always)]
    fn try_lock(&self) -> Option<Self::Guard<'_>> {
        let interrupts = InterruptGuard::new();
        // SAFETY: interrupts are masked.
        unsafe {
            if *self.is_locked.get() {
                return None;
            }
            *self.is_locked.get() = true;
        }
        Some(CortexMSpinLockGuard {
            lock: self,
            _interrupts: interrupts,
        })
    }

    #[inline(always)]
    fn lock(&self) -> Self::Guard<'_> {
        match self.try_lock() {
            Some(guard) => guard,
            None => pw_assert::panic!("spinlock re-entered on a single core"),
        }
    }
}
