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

use core::mem::{align_of, size_of};

use kernel_config::{KernelConfig, KernelConfigInterface};
use pw_log::info;
use pw_status::Result;

use crate::arch::{Arch, ArchInterface, Context};
use crate::memory::{
    AccessPermission, MemoryRegion, MemoryRegionType, MpuRegion, OwnedPageRange, PageAllocator,
    PageRange, RegionAttributes, RegionList,
};
use crate::scheduler::Scheduler;

const MAX_PAGE_RANGES: usize = KernelConfig::MAX_THREAD_PAGE_RANGES;

/// A downward growing stack.
pub struct Stack {
    // Lowest address.  Inclusive.
    start: *mut u8,

    // Highest address.  Exclusive.
    end: *mut u8,

    // Lowest address handed out by `reserve` so far.
    sp: *mut u8,
}

impl Stack {
    pub fn from_slice(slice: &mut [u8]) -> Self {
        let range = slice.as_mut_ptr_range();
        Self {
            start: range.start,
            end: range.end,
            sp: range.end,
        }
    }

    pub fn from_range(range: &mut OwnedPageRange) -> Self {
        Self::from_slice(range.as_bytes_mut())
    }

    #[must_use]
    pub fn start(&self) -> *mut u8 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> *mut u8 {
        self.end
    }

    #[must_use]
    pub fn sp(&self) -> *mut u8 {
        self.sp
    }

    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        ptr >= self.start.cast_const() && ptr < self.end.cast_const()
    }

    /// Carve `size` bytes aligned to `alignment` off the top of the unused
    /// part of the stack and return their address.
    pub fn reserve(&mut self, size: usize, alignment: usize) -> *mut u8 {
        pw_assert::assert!(alignment.is_power_of_two());
        let start = self.start.addr();
        let sp = self.sp.addr();
        let addr = sp.checked_sub(size).map(|addr| addr & !(alignment - 1));
        let Some(addr) = addr.filter(|addr| *addr >= start) else {
            pw_assert::panic!("stack overflow reserving {} bytes", size);
        };
        self.sp = self.sp.with_addr(addr);
        self.sp
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Created but not yet given a stack and entry point.
    New,
    Ready,
    Running,
    Blocked,
    /// Finished.  Its resources are released by the next reap.
    Terminated,
}

impl State {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            State::New => "New",
            State::Ready => "Ready",
            State::Running => "Running",
            State::Blocked => "Blocked",
            State::Terminated => "Terminated",
        }
    }
}

/// Value delivered to a blocked thread by whoever wakes it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnblockInfo {
    /// Completion of a request made on the thread's behalf.
    Syscall { return_value: u32 },
}

/// An address space and its threads.  Purely descriptive for now: kernel
/// threads share the kernel's address space.
#[derive(Debug)]
pub struct Process {
    pub name: &'static str,
    pub pid: u32,
}

impl Process {
    #[must_use]
    pub const fn new(name: &'static str, pid: u32) -> Self {
        Self { name, pid }
    }

    /// Region for a process image executing in place from flash.
    pub fn flash_region(base: usize, power: u8) -> Result<MpuRegion> {
        MpuRegion::new(
            base,
            power,
            AccessPermission::ReadOnly,
            true,
            RegionAttributes::NORMAL,
        )
    }

    /// Region for a process data segment carved from the page arena.
    pub fn ram_region(range: &PageRange) -> Result<MpuRegion> {
        MpuRegion::from_memory_region(&MemoryRegion::from_page_range(
            MemoryRegionType::ReadWriteData,
            range,
        ))
    }
}

pub struct Thread {
    name: &'static str,
    process: Option<&'static Process>,
    pub(super) state: State,

    // Set by `exit_current`.  The thread becomes `Terminated` the next time
    // it is switched out.
    pub(super) die_at_next_opportunity: bool,

    // Set by `request_termination`.  The thread polls it at points where it
    // holds nothing and exits on its own.
    pub(super) termination_requested: bool,

    // The start record on the stack until the first dispatch hands it to
    // the trampoline.
    pending_start: Option<PendingStart>,

    // Saved while the thread is not running.
    pub(super) context: Option<Context>,

    stashed_context: Option<Context>,

    pub(super) regions: RegionList,
    page_ranges: [Option<OwnedPageRange>; MAX_PAGE_RANGES],
    pub(super) unblock_info: Option<UnblockInfo>,
}

impl Thread {
    #[must_use]
    pub fn new(name: &'static str, process: Option<&'static Process>) -> Self {
        Self {
            name,
            process,
            state: State::New,
            die_at_next_opportunity: false,
            termination_requested: false,
            pending_start: None,
            context: None,
            stashed_context: None,
            regions: RegionList::new(),
            page_ranges: [const { None }; MAX_PAGE_RANGES],
            unblock_info: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn process(&self) -> Option<&'static Process> {
        self.process
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Grant the thread access to `region` from its next dispatch on.
    pub fn add_region(&mut self, region: MpuRegion) -> Result<()> {
        self.regions.push(region)
    }

    /// Take ownership of `range`, which is released when the thread is
    /// reaped.
    pub fn adopt_page_range(&mut self, range: OwnedPageRange) -> Result<()> {
        let Some(slot) = self.page_ranges.iter_mut().find(|slot| slot.is_none()) else {
            return Err(pw_status::Error::ResourceExhausted);
        };
        *slot = Some(range);
        Ok(())
    }

    /// Park the current context while the thread runs on another one.
    pub fn stash_context(&mut self, context: Context) {
        pw_assert::assert!(self.stashed_context.is_none(), "context already stashed");
        self.stashed_context = Some(context);
    }

    pub fn unstash_context(&mut self) -> Context {
        let Some(context) = self.stashed_context.take() else {
            pw_assert::panic!("no stashed context");
        };
        context
    }

    /// Give the thread a stack and a first context that runs `callback`
    /// and then exits through `scheduler`.
    ///
    /// `callback` is moved onto the new stack, so nothing outside the page
    /// arena is allocated.
    pub fn setup_context<C>(
        &mut self,
        pages: &'static PageAllocator,
        scheduler: &'static Scheduler,
        callback: C,
    ) -> Result<()>
    where
        C: FnOnce() + Send + 'static,
    {
        pw_assert::eq!(self.state, State::New);

        let mut stack_range = pages.allocate_owned(KernelConfig::THREAD_STACK_POWER)?;
        self.add_region(Process::ram_region(&stack_range.range())?)?;

        // The range stays in place once adopted, so the stack outlives the
        // move.
        let mut stack = Stack::from_range(&mut stack_range);
        self.adopt_page_range(stack_range)?;

        let start = stack
            .reserve(size_of::<ThreadStart<C>>(), align_of::<ThreadStart<C>>())
            .cast::<ThreadStart<C>>();
        // SAFETY: `reserve` returned suitably sized and aligned space inside
        // the stack.  It is read back exactly once, by the trampoline or by
        // `discard_start`.
        unsafe { start.write(ThreadStart { callback, scheduler }) };
        let addr = start.expose_provenance();
        self.pending_start = Some(PendingStart {
            addr,
            discard: discard_start::<C>,
        });

        self.context = Some(Arch::initialize_context(&mut stack, trampoline::<C>, addr));
        self.state = State::Ready;
        Ok(())
    }

    /// Whether the thread has been set up but never dispatched.
    #[must_use]
    pub fn is_unstarted(&self) -> bool {
        self.pending_start.is_some()
    }

    /// From the first dispatch on the start record belongs to the
    /// trampoline.
    pub(super) fn mark_dispatched(&mut self) {
        self.pending_start = None;
    }

    pub fn dump(&self) {
        info!(
            "thread {} ({}) state {} regions {}",
            self.name,
            self.process.map_or("kernel", |process| process.name),
            self.state.as_str(),
            self.regions.len()
        );
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        let Some(start) = self.pending_start.take() else {
            return;
        };
        info!("discarding unstarted thread {}", self.name);
        // SAFETY: the thread was never dispatched, so the record is unread,
        // and its stack is still held in `page_ranges`.
        unsafe { (start.discard)(start.addr) };
        if let Some(context) = self.context.take() {
            Arch::discard_context(context);
        }
    }
}

// First thing on a new thread's stack.
struct ThreadStart<C> {
    callback: C,
    scheduler: &'static Scheduler,
}

struct PendingStart {
    addr: usize,
    discard: unsafe fn(usize),
}

/// Drop an unread `ThreadStart<C>` in place.
///
/// # Safety
///
/// `addr` must hold a `ThreadStart<C>` nothing has read or dropped.
unsafe fn discard_start<C>(addr: usize) {
    let start = core::ptr::with_exposed_provenance_mut::<ThreadStart<C>>(addr);
    // SAFETY: guaranteed by the caller.
    unsafe { core::ptr::drop_in_place(start) };
}

extern "C" fn trampoline<C: FnOnce()>(arg: usize) {
    // SAFETY: `arg` is the address `setup_context` wrote a `ThreadStart<C>` to.
    let start = core::ptr::with_exposed_provenance::<ThreadStart<C>>(arg);
    let start = unsafe { core::ptr::read(start) };
    (start.callback)();
    start.scheduler.exit_current()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct TestStack([u8; 64]);

    #[test]
    fn reserve_aligns_down_from_the_top() -> unittest::Result<()> {
        let mut storage = TestStack([0; 64]);
        let mut stack = Stack::from_slice(&mut storage.0);
        let top = stack.end() as usize;

        let first = stack.reserve(3, 1) as usize;
        unittest::assert_eq!(first, top - 3);
        let second = stack.reserve(4, 8) as usize;
        unittest::assert_eq!(second % 8, 0);
        unittest::assert_true!(second + 4 <= first);
        unittest::assert_true!(stack.contains(stack.sp()));
        Ok(())
    }

    #[test]
    #[should_panic]
    fn reserve_past_the_bottom_is_fatal() {
        let mut storage = TestStack([0; 64]);
        let mut stack = Stack::from_slice(&mut storage.0);
        let _ = stack.reserve(65, 1);
    }

    #[test]
    fn page_ranges_are_bounded() -> unittest::Result<()> {
        use std::boxed::Box;

        use crate::memory::PageArena;

        let arena = &mut Box::leak(Box::new(PageArena::new())).0;
        let pages: &'static PageAllocator = Box::leak(Box::new(PageAllocator::new(arena)));
        let mut thread = Thread::new("ranges", None);
        for _ in 0..MAX_PAGE_RANGES {
            let range = pages.allocate_owned(8);
            unittest::assert_true!(range.is_ok());
            unittest::assert_eq!(thread.adopt_page_range(range.unwrap()), Ok(()));
        }
        let extra = pages.allocate_owned(8);
        unittest::assert_true!(extra.is_ok());
        // The rejected range is dropped and released on the spot.
        unittest::assert_eq!(
            thread.adopt_page_range(extra.unwrap()),
            Err(pw_status::Error::ResourceExhausted)
        );

        let free = pages.free_block_count(8);
        drop(thread);
        unittest::assert_eq!(pages.free_block_count(8), free + MAX_PAGE_RANGES);
        Ok(())
    }

    #[test]
    #[should_panic]
    fn unstash_without_stash_is_fatal() {
        let mut thread = Thread::new("stash", None);
        let _ = thread.unstash_context();
    }
}
