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

//! A small kernel for single-core Cortex-M0+ parts: buddy page allocation,
//! round-robin threads with a blocking mutex, and a worker thread for
//! blocking I/O.
//!
//! Everything hangs off a [`Kernel`] value that the board creates once and
//! keeps for the life of the system.  With the `arch_host` feature the same
//! kernel runs on top of std threads for testing.

#![cfg_attr(not(any(test, feature = "arch_host")), no_std)]

#[cfg(all(feature = "arch_host", feature = "arch_arm_cortex_m"))]
compile_error!("the `arch_host` and `arch_arm_cortex_m` features are mutually exclusive");

#[cfg(not(any(feature = "arch_host", feature = "arch_arm_cortex_m")))]
compile_error!("one of the `arch_host` or `arch_arm_cortex_m` features is required");

use pw_log::info;
use pw_status::Result;

mod arch;
pub mod memory;
#[cfg(not(feature = "arch_host"))]
mod panic;
pub mod scheduler;
pub mod sync;
pub mod worker;

pub use arch::{Arch, ArchInterface};
pub use memory::{
    AccessPermission, MemoryRegion, MemoryRegionType, MpuRegion, OwnedPageRange, PageAllocator,
    PageArena, PageRange, RegionAttributes,
};
pub use scheduler::thread::{Process, Stack, State, Thread, UnblockInfo};
pub use scheduler::{Scheduler, ThreadId};
pub use sync::mutex::{KernelMutex, KernelMutexGuard};
pub use worker::Worker;

#[cfg(not(feature = "arch_host"))]
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub fn pw_assert_HandleFailure() -> ! {
    Arch::panic()
}

/// The kernel's singletons.
///
/// Threads, mutexes and the worker reach these through the `&'static
/// Kernel` they are created with rather than through globals.
pub struct Kernel {
    pub page_allocator: PageAllocator,
    pub scheduler: Scheduler,
    pub worker: Worker,
}

impl Kernel {
    /// Build a kernel whose page allocator owns `arena`.  See
    /// [`PageAllocator::new`] for the requirements on `arena`.
    pub fn new(arena: &'static mut [u8]) -> Self {
        Self {
            page_allocator: PageAllocator::new(arena),
            scheduler: Scheduler::new(),
            worker: Worker::new(),
        }
    }

    pub fn create_thread<F>(&'static self, name: &'static str, f: F) -> Result<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.create_thread(&self.page_allocator, name, f)
    }

    /// Create a thread belonging to `process`.
    ///
    /// The thread can execute from `flash` and gets a private
    /// `2^data_power` byte data segment from the page arena, which is
    /// passed to `f` and released with the thread.
    pub fn create_process_thread<F>(
        &'static self,
        process: &'static Process,
        name: &'static str,
        flash: MpuRegion,
        data_power: u8,
        f: F,
    ) -> Result<ThreadId>
    where
        F: FnOnce(PageRange) + Send + 'static,
    {
        self.scheduler.reap_terminated();

        let mut thread = Thread::new(name, Some(process));
        thread.add_region(flash)?;
        let data = self.page_allocator.allocate_owned(data_power)?;
        let range = data.range();
        thread.add_region(Process::ram_region(&range)?)?;
        thread.adopt_page_range(data)?;

        self.scheduler
            .spawn(&self.page_allocator, thread, move || f(range))
    }

    /// Create the worker thread.  Blocking reads fail until this is called.
    pub fn start_worker(&'static self) -> Result<ThreadId> {
        let id = self.create_thread("worker", move || self.worker.run(&self.scheduler))?;
        self.worker.attach(&self.scheduler, id);
        Ok(id)
    }

    pub fn dump(&self) {
        self.page_allocator.dump();
        self.scheduler.dump();
    }

    /// Bring up the CPU and dispatch the first thread.  Threads created
    /// before this run in creation order.
    #[cfg(feature = "arch_arm_cortex_m")]
    pub fn start(&'static self) -> ! {
        info!("kernel starting");
        arch::install_kernel(self);
        Arch::early_init();

        if self.create_thread("idle", move || idle_loop(self)).is_err() {
            pw_assert::panic!("unable to create idle thread");
        }
        self.dump();

        self.scheduler.start();
        arch::start_first_thread()
    }

    /// Adopt the calling OS thread as the first running kernel thread.
    ///
    /// Host only.  Returns the id of the adopted thread.
    #[cfg(feature = "arch_host")]
    pub fn start_on_current_thread(&'static self, name: &'static str) -> ThreadId {
        info!("kernel starting on host thread {}", name);
        Arch::early_init();
        let id = self.scheduler.adopt_current_thread(name);
        self.scheduler.start();
        id
    }
}

// Keeps the run queue from ever being empty and releases finished threads.
#[cfg(feature = "arch_arm_cortex_m")]
fn idle_loop(kernel: &Kernel) -> ! {
    pw_assert::assert!(Arch::interrupts_enabled());
    loop {
        kernel.scheduler.reap_terminated();
        kernel.scheduler.yield_now();
        Arch::idle();
    }
}

#[doc(hidden)]
pub mod __private {
    /// Takes a mutable reference to a global static.
    ///
    /// # Safety
    ///
    /// Each invocation of `static_mut_ref!` must be executed at most once at
    /// run time.
    #[doc(hidden)] // `#[macro_export]` bypasses this module's `#[doc(hidden)]`
    #[macro_export]
    macro_rules! static_mut_ref {
        ($ty:ty = $value:expr) => {{
            static mut __STATIC: $ty = $value;
            // SAFETY: The caller promises that this macro will be executed at
            // most once, and so taking a `&mut` reference to this global
            // static, which is defined per-call site, will not violate
            // aliasing.
            &mut *&raw mut __STATIC
        }};
    }
}
