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

use core::fmt::Debug;

#[cfg(feature = "arch_arm_cortex_m")]
mod arm_cortex_m;
#[cfg(feature = "arch_arm_cortex_m")]
pub use arm_cortex_m::Arch;

#[cfg(feature = "arch_host")]
mod host;
#[cfg(feature = "arch_host")]
pub use host::Arch;
#[cfg(all(test, feature = "arch_host"))]
pub(crate) use host::test_context;
#[cfg(feature = "arch_host")]
pub(crate) use host::adopt_current_os_thread;
#[cfg(feature = "arch_arm_cortex_m")]
pub(crate) use arm_cortex_m::{install_kernel, start_first_thread};

pub mod exception_frame;

use crate::memory::RegionList;
use crate::scheduler::thread::Stack;
use crate::scheduler::{Scheduler, SchedulerState};
pub use crate::sync::spinlock::BareSpinLock;
use crate::sync::spinlock::SpinLockGuard;

/// Saved execution state of a thread that is not currently running.
pub type Context = <Arch as ArchInterface>::Context;

/// Entry point placed in a new thread's first context.  Receives the
/// argument passed to [`ArchInterface::initialize_context`].
pub type ThreadEntry = extern "C" fn(usize);

pub trait ArchInterface {
    type BareSpinLock: BareSpinLock;
    type Context: Copy + PartialEq + Debug + Send;

    fn early_init() {}

    fn panic() -> ! {
        #[allow(clippy::empty_loop)]
        loop {}
    }

    fn interrupts_enabled() -> bool;

    fn in_interrupt_handler() -> bool {
        false
    }

    fn idle() {}

    /// Lay out the first context of a new thread on `stack` so that
    /// resuming it calls `entry(arg)`.
    fn initialize_context(stack: &mut Stack, entry: ThreadEntry, arg: usize) -> Self::Context;

    /// Release a context built by `initialize_context` that will never be
    /// resumed.
    fn discard_context(_context: Self::Context) {}

    /// Ask for the context switch handler to run at the next opportunity.
    fn pend_context_switch();

    /// Give up the CPU.
    ///
    /// `state` is dropped while other threads run and reacquired before
    /// returning, so the caller must not assume anything it read before the
    /// call still holds.  Returns once the scheduler has picked the calling
    /// thread again, which is immediately if it is the only runnable one.
    fn context_switch<'a>(
        scheduler: &'a Scheduler,
        state: SpinLockGuard<'a, SchedulerState>,
    ) -> SpinLockGuard<'a, SchedulerState>;

    /// Leave the current thread for good.  Its die flag is already set.
    fn exit_thread(scheduler: &Scheduler) -> !;

    /// Load the protection regions of the thread about to run.
    fn configure_memory(_regions: &RegionList) {}
}
