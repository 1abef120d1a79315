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

//! Buddy page allocator.
//!
//! The arena is a single `2^max_power` byte block at boot.  Requests are
//! served from per-power free lists; when a list is empty a block of the
//! next power up is split in two, the upper half is parked on the list and
//! the lower half is handed out.
//!
//! Freed blocks are never merged with their buddies.  They go back on the
//! list for their own power and only become part of a larger allocation
//! again if the larger block they were split from is still whole.
//!
//! The free lists live inside the free blocks: the first word of a free
//! block holds the arena offset of the next free block of the same power.
//! Blocks therefore have to be at least one link word long, and smaller
//! requests are served from a `2^LINK_POWER` block.

use core::mem::size_of;
use core::ptr::NonNull;

use kernel_config::{KernelConfig, KernelConfigInterface};
use pw_log::info;
use pw_status::{Error, Result};

use crate::sync::spinlock::SpinLock;

const PAGE_ALLOCATOR_DEBUG: bool = false;
macro_rules! page_debug {
    ($($args:tt)*) => {{
        pw_log::debug_if!(PAGE_ALLOCATOR_DEBUG, $($args)*)
    }}
}

/// Number of free lists: one per power `0..=PAGE_ARENA_POWER`.
pub const PAGE_LEVELS: usize = KernelConfig::PAGE_ARENA_POWER as usize + 1;

/// Smallest block tracked on a free list.
pub const LINK_POWER: u8 = size_of::<u32>().trailing_zeros() as u8;

const NIL: u32 = u32::MAX;

const ARENA_SIZE: usize = 1 << KernelConfig::PAGE_ARENA_POWER;

/// Backing store for the page allocator.  Aligned to its own size so every
/// block the allocator hands out is aligned to its size in absolute terms,
/// which MPU regions require.
#[repr(C, align(32768))]
pub struct PageArena(pub [u8; ARENA_SIZE]);

const _: () = assert!(align_of::<PageArena>() == size_of::<PageArena>());

impl PageArena {
    #[must_use]
    pub const fn new() -> Self {
        Self([0; ARENA_SIZE])
    }
}

impl Default for PageArena {
    fn default() -> Self {
        Self::new()
    }
}

/// A `2^power` byte block starting at `base`.
///
/// A bare descriptor: it does not own the memory it describes.  See
/// [`OwnedPageRange`] for the owning flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    power: u8,
    base: usize,
}

impl PageRange {
    #[must_use]
    pub fn new(power: u8, base: usize) -> Self {
        pw_assert::eq!(base & ((1 << power) - 1), 0, "page range base is misaligned");
        Self { power, base }
    }

    #[must_use]
    pub const fn power(&self) -> u8 {
        self.power
    }

    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        1 << self.power
    }

    #[must_use]
    pub const fn end(&self) -> usize {
        self.base + self.size()
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.base < other.end() && other.base < self.end()
    }

    /// Pointer to the first byte.  Only meaningful for ranges issued by a
    /// [`PageAllocator`], whose arena provenance is exposed at construction.
    #[must_use]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        core::ptr::with_exposed_provenance_mut(self.base)
    }
}

/// A page range released back to its allocator on drop.
pub struct OwnedPageRange {
    range: PageRange,
    allocator: &'static PageAllocator,
}

impl OwnedPageRange {
    #[must_use]
    pub const fn range(&self) -> PageRange {
        self.range
    }

    /// The block's bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: the allocator issued this range exclusively to `self`.
        unsafe { core::slice::from_raw_parts_mut(self.range.as_mut_ptr(), self.range.size()) }
    }

    /// Give up ownership without releasing the range.
    #[must_use]
    pub fn into_range(self) -> PageRange {
        let range = self.range;
        core::mem::forget(self);
        range
    }
}

impl Drop for OwnedPageRange {
    fn drop(&mut self) {
        self.allocator.deallocate(self.range);
    }
}

struct FreeLists {
    arena: NonNull<u8>,
    max_power: u8,
    // Arena offset of the first free block of each power, or `NIL`.
    heads: [u32; PAGE_LEVELS],
}

// SAFETY: the arena pointer is only dereferenced under the allocator lock.
unsafe impl Send for FreeLists {}

impl FreeLists {
    fn link(&self, offset: u32) -> *mut u32 {
        // SAFETY: offsets on the free lists lie inside the arena.
        unsafe { self.arena.as_ptr().add(offset as usize).cast::<u32>() }
    }

    fn push(&mut self, power: u8, offset: u32) {
        let head = self.heads[power as usize];
        // SAFETY: the block is free, inside the arena and at least
        // `2^LINK_POWER` aligned, so its first word can hold the link.
        unsafe { self.link(offset).write(head) };
        self.heads[power as usize] = offset;
    }

    fn pop(&mut self, power: u8) -> Option<u32> {
        let offset = self.heads[power as usize];
        if offset == NIL {
            return None;
        }
        // SAFETY: `offset` came off the free list, so its first word is a link.
        self.heads[power as usize] = unsafe { self.link(offset).read() };
        Some(offset)
    }

    fn allocate_locked(&mut self, power: u8) -> Result<u32> {
        if power > self.max_power {
            return Err(Error::ResourceExhausted);
        }
        if let Some(offset) = self.pop(power) {
            return Ok(offset);
        }

        let parent = self.allocate_locked(power + 1)?;
        page_debug!("split {:#x} at power {}", parent, power + 1);
        self.push(power, parent + (1 << power));
        Ok(parent)
    }

    fn count(&self, power: u8) -> usize {
        let mut count = 0;
        let mut offset = self.heads[power as usize];
        while offset != NIL {
            count += 1;
            // SAFETY: every offset on the list is a free block.
            offset = unsafe { self.link(offset).read() };
        }
        count
    }
}

pub struct PageAllocator {
    base: usize,
    max_power: u8,
    lists: SpinLock<FreeLists>,
}

impl PageAllocator {
    /// Take over `arena` and seed it as one free block.
    ///
    /// The arena length must be a power of two between `2^LINK_POWER` and
    /// `2^PAGE_ARENA_POWER`, and its address aligned to its length.
    pub fn new(arena: &'static mut [u8]) -> Self {
        let len = arena.len();
        pw_assert::assert!(len.is_power_of_two(), "arena size must be a power of two");
        let max_power = len.trailing_zeros() as u8;
        pw_assert::assert!((LINK_POWER..=KernelConfig::PAGE_ARENA_POWER).contains(&max_power));

        let arena = NonNull::from(arena).cast::<u8>();
        let base = arena.as_ptr().expose_provenance();
        pw_assert::eq!(base & (len - 1), 0, "arena must be aligned to its size");

        let mut lists = FreeLists {
            arena,
            max_power,
            heads: [NIL; PAGE_LEVELS],
        };
        lists.push(max_power, 0);
        info!("page allocator: {} bytes at {:#010x}", len, base);

        Self {
            base,
            max_power,
            lists: SpinLock::new(lists),
        }
    }

    #[must_use]
    pub const fn max_power(&self) -> u8 {
        self.max_power
    }

    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Allocate a `2^power` byte block.
    ///
    /// Fails with `ResourceExhausted` when no block of that size or larger is
    /// free, and with `InvalidArgument` when `power` exceeds the arena.
    pub fn allocate(&self, power: u8) -> Result<PageRange> {
        if power > self.max_power {
            return Err(Error::InvalidArgument);
        }
        let offset = self.lists.lock().allocate_locked(power.max(LINK_POWER))?;
        let range = PageRange::new(power, self.base + offset as usize);
        page_debug!("allocate {:#010x} power {}", range.base(), power);
        Ok(range)
    }

    pub fn allocate_owned(&'static self, power: u8) -> Result<OwnedPageRange> {
        let range = self.allocate(power)?;
        Ok(OwnedPageRange {
            range,
            allocator: self,
        })
    }

    /// Return `range` to the free list for its power.
    ///
    /// `range` must have been issued by this allocator and not released
    /// since.
    ///
    /// A range outside the arena, or one not aligned to the block it would
    /// be listed as, is fatal.
    pub fn deallocate(&self, range: PageRange) {
        pw_assert::assert!(range.power() <= self.max_power);
        let Some(offset) = range.base().checked_sub(self.base) else {
            pw_assert::panic!("range {:#010x} is below the arena", range.base());
        };
        pw_assert::assert!(
            offset + range.size() <= 1 << self.max_power,
            "range {:#010x} is past the end of the arena",
            range.base()
        );
        let power = range.power().max(LINK_POWER);
        pw_assert::eq!(offset & ((1 << power) - 1), 0, "range is not a block of its power");
        page_debug!("deallocate {:#010x} power {}", range.base(), range.power());

        self.lists.lock().push(power, offset as u32);
    }

    /// Number of free blocks on the list for `power`.
    #[must_use]
    pub fn free_block_count(&self, power: u8) -> usize {
        if power > self.max_power {
            return 0;
        }
        self.lists.lock().count(power)
    }

    pub fn dump(&self) {
        info!("page allocator free lists:");
        let lists = self.lists.lock();
        for power in 0..=self.max_power {
            let count = lists.count(power);
            if count > 0 {
                info!("  power {:2}: {} free", power, count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::boxed::Box;
    use std::vec::Vec;

    use super::*;

    fn arena() -> &'static mut [u8] {
        &mut Box::leak(Box::new(PageArena::new())).0
    }

    fn small_arena(power: u8) -> &'static mut [u8] {
        let len = 1 << power;
        let arena = &mut Box::leak(Box::new(PageArena::new())).0;
        &mut arena[..len]
    }

    #[test]
    fn fresh_allocator_has_one_maximal_block() -> unittest::Result<()> {
        let allocator = PageAllocator::new(arena());
        unittest::assert_eq!(allocator.max_power(), 15);
        unittest::assert_eq!(allocator.free_block_count(15), 1);
        for power in 0..15 {
            unittest::assert_eq!(allocator.free_block_count(power), 0);
        }
        Ok(())
    }

    #[test]
    fn five_smallest_allocations_are_distinct() -> unittest::Result<()> {
        let allocator = PageAllocator::new(arena());
        let mut ranges = Vec::new();
        for _ in 0..5 {
            let range = allocator.allocate(0);
            unittest::assert_true!(range.is_ok());
            ranges.push(range.unwrap());
        }
        for (i, a) in ranges.iter().enumerate() {
            unittest::assert_eq!(a.power(), 0);
            for b in &ranges[i + 1..] {
                unittest::assert_ne!(a.base(), b.base());
                unittest::assert_false!(a.overlaps(b));
            }
        }
        Ok(())
    }

    #[test]
    fn split_keeps_lower_half_and_frees_upper_half() -> unittest::Result<()> {
        let allocator = PageAllocator::new(arena());
        let base = allocator.base();

        let range = allocator.allocate(12);
        unittest::assert_eq!(range, Ok(PageRange::new(12, base)));

        // One buddy left behind at every level that was split.
        for power in 12..15 {
            unittest::assert_eq!(allocator.free_block_count(power), 1);
        }
        unittest::assert_eq!(allocator.free_block_count(15), 0);

        let next = allocator.allocate(12);
        unittest::assert_eq!(next, Ok(PageRange::new(12, base + (1 << 12))));
        Ok(())
    }

    #[test]
    fn returned_ranges_are_aligned_to_their_size() -> unittest::Result<()> {
        let allocator = PageAllocator::new(arena());
        for power in [3, 0, 9, 5, 10, 2, 7, 1, 11] {
            let range = allocator.allocate(power);
            unittest::assert_true!(range.is_ok());
            let range = range.unwrap();
            unittest::assert_eq!(range.power(), power);
            unittest::assert_eq!(range.base() % range.size(), 0);
            unittest::assert_true!(range.end() <= allocator.base() + (1 << 15));
        }
        Ok(())
    }

    #[test]
    fn exhausted_arena_fails_without_crashing() -> unittest::Result<()> {
        let allocator = PageAllocator::new(arena());
        let whole = allocator.allocate(15);
        unittest::assert_true!(whole.is_ok());

        unittest::assert_eq!(allocator.allocate(15), Err(Error::ResourceExhausted));
        unittest::assert_eq!(allocator.allocate(0), Err(Error::ResourceExhausted));

        allocator.deallocate(whole.unwrap());
        unittest::assert_true!(allocator.allocate(15).is_ok());
        Ok(())
    }

    #[test]
    fn oversized_request_is_rejected() -> unittest::Result<()> {
        let allocator = PageAllocator::new(small_arena(10));
        unittest::assert_eq!(allocator.max_power(), 10);
        unittest::assert_eq!(allocator.allocate(11), Err(Error::InvalidArgument));
        unittest::assert_true!(allocator.allocate(10).is_ok());
        Ok(())
    }

    #[test]
    fn freed_halves_are_not_coalesced() -> unittest::Result<()> {
        let allocator = PageAllocator::new(arena());

        let low = allocator.allocate(14);
        let high = allocator.allocate(14);
        unittest::assert_true!(low.is_ok() && high.is_ok());
        allocator.deallocate(low.unwrap());
        allocator.deallocate(high.unwrap());

        // Both halves sit on the power 14 list; the power 15 list stays empty.
        unittest::assert_eq!(allocator.free_block_count(14), 2);
        unittest::assert_eq!(allocator.free_block_count(15), 0);
        unittest::assert_eq!(allocator.allocate(15), Err(Error::ResourceExhausted));

        // A smaller request splits one of the freed halves rather than a
        // merged parent.
        let quarter = allocator.allocate(13);
        unittest::assert_true!(quarter.is_ok());
        unittest::assert_eq!(allocator.free_block_count(14), 1);
        unittest::assert_eq!(allocator.free_block_count(13), 1);
        Ok(())
    }

    #[test]
    fn sub_link_requests_share_the_smallest_list() -> unittest::Result<()> {
        let allocator = PageAllocator::new(arena());
        let byte = allocator.allocate(0);
        unittest::assert_true!(byte.is_ok());
        let byte = byte.unwrap();

        allocator.deallocate(byte);
        unittest::assert_eq!(allocator.free_block_count(0), 0);
        unittest::assert_eq!(allocator.free_block_count(LINK_POWER), 2);

        // The most recently freed block is handed out first.
        unittest::assert_eq!(allocator.allocate(1).map(|r| r.base()), Ok(byte.base()));
        Ok(())
    }

    #[test]
    #[should_panic]
    fn deallocating_a_foreign_range_is_fatal() {
        let allocator = PageAllocator::new(arena());
        let other = PageAllocator::new(arena());
        let foreign = other.allocate(8).unwrap();
        allocator.deallocate(foreign);
    }

    #[test]
    #[should_panic]
    fn deallocating_past_the_arena_is_fatal() {
        let allocator = PageAllocator::new(small_arena(10));
        allocator.deallocate(PageRange::new(8, allocator.base() + (1 << 10)));
    }

    #[test]
    #[should_panic]
    fn deallocating_a_misaligned_small_range_is_fatal() {
        let allocator = PageAllocator::new(arena());
        // Valid as a one-byte range, but not a link-sized block.
        allocator.deallocate(PageRange::new(0, allocator.base() + 1));
    }

    #[test]
    fn owned_range_releases_on_drop() -> unittest::Result<()> {
        let allocator: &'static PageAllocator = Box::leak(Box::new(PageAllocator::new(arena())));
        {
            let owned = allocator.allocate_owned(15);
            unittest::assert_true!(owned.is_ok());
            let mut owned = owned.unwrap();
            owned.as_bytes_mut()[0] = 0x5a;
            unittest::assert_eq!(owned.as_bytes_mut().len(), 1 << 15);
            unittest::assert_true!(allocator.allocate(0).is_err());
        }
        unittest::assert_eq!(allocator.free_block_count(15), 1);

        let owned = allocator.allocate_owned(15);
        unittest::assert_true!(owned.is_ok());
        let range = owned.unwrap().into_range();
        unittest::assert_eq!(allocator.free_block_count(15), 0);
        allocator.deallocate(range);
        Ok(())
    }

    #[test]
    fn concurrent_allocations_never_overlap() -> unittest::Result<()> {
        let allocator: &'static PageAllocator = Box::leak(Box::new(PageAllocator::new(arena())));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(move || {
                    let mut held = Vec::new();
                    for round in 0..64u32 {
                        if let Ok(range) = allocator.allocate((round % 6) as u8 + 3) {
                            held.push(range);
                        }
                        if round % 3 == 0 {
                            if let Some(range) = held.pop() {
                                allocator.deallocate(range);
                            }
                        }
                    }
                    held
                })
            })
            .collect();

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.join().unwrap_or_default());
        }
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                unittest::assert_false!(a.overlaps(b));
            }
        }
        Ok(())
    }
}
