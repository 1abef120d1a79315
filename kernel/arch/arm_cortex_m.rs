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

//! ARMv6-M (Cortex-M0/M0+) backend.
//!
//! All threads run privileged in thread mode on the process stack.  The
//! main stack belongs to exception handlers.  Context switches happen only
//! in the PendSV handler, which runs at the lowest priority so it can never
//! preempt another handler.
//!
//! Because threads are privileged and the MPU keeps the default memory map
//! as background, a thread's regions make its stack non-executable and its
//! flash read-only but do not stop it from touching memory outside them.
//! Running process threads unprivileged would be needed for isolation.

use core::sync::atomic::{AtomicPtr, Ordering};

use cortex_m::peripheral::scb::{SystemHandler, VectActive};
use cortex_m::peripheral::{Peripherals, SCB};
use pw_log::info;

use super::{ArchInterface, ThreadEntry};
use crate::Kernel;
use crate::memory::RegionList;
use crate::scheduler::thread::Stack;
use crate::scheduler::{Scheduler, SchedulerState};
use crate::sync::spinlock::SpinLockGuard;

mod exceptions;
mod mpu;
mod spinlock;
mod threads;
mod timer;

pub use threads::SavedStackPointer;

// Kernel reached by exception handlers, which take no arguments.  Written
// once before the first thread is dispatched.  Only plain loads and stores
// are used since ARMv6-M has no compare-and-swap.
static KERNEL: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

pub(crate) fn install_kernel(kernel: &'static Kernel) {
    pw_assert::assert!(KERNEL.load(Ordering::Acquire).is_null());
    KERNEL.store(core::ptr::from_ref(kernel).cast_mut(), Ordering::Release);
}

fn installed_kernel() -> Option<&'static Kernel> {
    // SAFETY: the only non-null value ever stored came from a `&'static Kernel`.
    unsafe { KERNEL.load(Ordering::Acquire).as_ref() }
}

pub struct Arch;

impl ArchInterface for Arch {
    type BareSpinLock = spinlock::BareSpinLock;
    type Context = SavedStackPointer;

    fn early_init() {
        info!("arch early init");
        let Some(mut p) = Peripherals::take() else {
            pw_assert::panic!("cortex-m peripherals already taken");
        };
        info!("CPUID {:#010x}", p.CPUID.base.read());

        // ARMv6-M implements only the top two priority bits.  Higher values
        // have lower priority.
        unsafe {
            // PendSV runs last so a switch never interrupts another handler.
            p.SCB.set_priority(SystemHandler::PendSV, 0b1100_0000);
            p.SCB.set_priority(SystemHandler::SysTick, 0b1000_0000);
        }

        mpu::init(&mut p.MPU);
        timer::systick_init(&mut p.SYST);
    }

    fn panic() -> ! {
        cortex_m::asm::bkpt();
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn interrupts_enabled() -> bool {
        cortex_m::register::primask::read().is_active()
    }

    fn in_interrupt_handler() -> bool {
        SCB::vect_active() != VectActive::ThreadMode
    }

    fn idle() {
        cortex_m::asm::wfi();
    }

    fn initialize_context(stack: &mut Stack, entry: ThreadEntry, arg: usize) -> SavedStackPointer {
        threads::initialize_context(stack, entry, arg)
    }

    fn pend_context_switch() {
        SCB::set_pendsv();
    }

    fn context_switch<'a>(
        scheduler: &'a Scheduler,
        state: SpinLockGuard<'a, SchedulerState>,
    ) -> SpinLockGuard<'a, SchedulerState> {
        pw_assert::assert!(!Self::in_interrupt_handler());
        SCB::set_pendsv();

        // Dropping the guard unmasks interrupts and PendSV is taken right
        // here.  The lock is reacquired once this thread is picked again.
        drop(state);
        cortex_m::asm::isb();
        scheduler.lock()
    }

    fn exit_thread(_scheduler: &Scheduler) -> ! {
        // The switch handler retires this thread the next time it runs.
        SCB::set_pendsv();
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn configure_memory(regions: &RegionList) {
        mpu::configure(regions);
    }
}

/// Dispatch the first thread.  Never returns: the boot code's main stack
/// context is abandoned to exception handlers.
pub(crate) fn start_first_thread() -> ! {
    threads::start_first_thread()
}
