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
#![cfg_attr(not(test), no_std)]

use core::mem::MaybeUninit;

use pw_status::{Error, Result};

/// A fixed-capacity FIFO queue.
///
/// Used for the scheduler run queue, mutex waiter lists and the worker task
/// list.  Those users treat running out of room as a configuration bug, so
/// [`CircularQueue::enqueue`] is fatal on overflow while
/// [`CircularQueue::try_enqueue`] reports it.
///
/// ## Invariants
///
/// 1. `self.len <= N`.
/// 2. `self.front < N` whenever `N > 0`.
/// 3. The `self.len` populated elements live at indices
///    `self.front`, `(self.front + 1) % N`, ..., `(self.front + self.len - 1) % N`
///    in arrival order.
///
/// `N = 0` is valid: every enqueue fails and every dequeue yields `None`.
pub struct CircularQueue<T, const N: usize> {
    slots: [MaybeUninit<T>; N],
    front: usize,
    len: usize,
}

impl<T, const N: usize> CircularQueue<T, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { MaybeUninit::uninit() }; N],
            front: 0,
            len: 0,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn is_full(&self) -> bool {
        self.len == N
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    const fn slot(&self, offset: usize) -> usize {
        (self.front + offset) % N
    }

    /// Appends `item` at the back.
    ///
    /// Returns `Error::ResourceExhausted` if the queue is full.
    pub fn try_enqueue(&mut self, item: T) -> Result<()> {
        if self.is_full() {
            return Err(Error::ResourceExhausted);
        }
        let back = self.slot(self.len);
        // SAFETY: `len < N` so `back` is in bounds and, by invariant 3, not
        // one of the populated slots.
        unsafe {
            self.slots.get_unchecked_mut(back).write(item);
        }
        self.len += 1;
        Ok(())
    }

    /// Appends `item` at the back, halting if the queue is full.
    pub fn enqueue(&mut self, item: T) {
        if self.try_enqueue(item).is_err() {
            pw_assert::panic!("circular queue overflow (capacity {})", N);
        }
    }

    /// Removes the element at the front.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        // SAFETY: `len > 0`, so by invariant 3 the slot at `front` is
        // populated.  It is logically removed below and never read again.
        let item = unsafe { self.slots.get_unchecked(self.front).assume_init_read() };
        self.front = self.slot(1);
        self.len -= 1;
        Some(item)
    }

    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.iter().next()
    }

    /// Iterates from front to back.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        // SAFETY: offsets below `len` map to populated slots (invariant 3).
        (0..self.len).map(move |offset| unsafe {
            self.slots
                .get_unchecked(self.slot(offset))
                .assume_init_ref()
        })
    }

    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|queued| queued == item)
    }

    /// Removes the first element equal to `item`, keeping the order of the
    /// rest.  Returns whether one was found.
    pub fn remove(&mut self, item: &T) -> bool
    where
        T: PartialEq,
    {
        let mut found = false;
        for _ in 0..self.len {
            let Some(queued) = self.dequeue() else {
                break;
            };
            if !found && queued == *item {
                found = true;
                continue;
            }
            // Cannot fail: an element was just dequeued.
            let _ = self.try_enqueue(queued);
        }
        found
    }
}

impl<T, const N: usize> Default for CircularQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for CircularQueue<T, N> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}
