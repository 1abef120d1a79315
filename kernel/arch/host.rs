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

//! Host simulation of the kernel's execution model.
//!
//! Each kernel thread runs on its own OS thread but only while it holds its
//! [`Baton`].  A context switch hands the baton of the thread the scheduler
//! picked to that thread and then waits for its own to come back, so at
//! most one simulated thread executes kernel code at any time, just as on a
//! single core.  There are no interrupts: preemption only happens at
//! explicit yields, and [`ArchInterface::pend_context_switch`] is a no-op.

use core::cell::Cell;
use core::fmt;
use std::boxed::Box;
use std::sync::{Condvar, Mutex};

use pw_log::info;

use crate::arch::{ArchInterface, ThreadEntry};
use crate::scheduler::thread::Stack;
use crate::scheduler::{Scheduler, SchedulerState};
use crate::sync::spinlock::SpinLockGuard;

mod spinlock;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Signal {
    Idle,
    Run,
    // The thread was discarded before it ever ran.
    Discard,
}

/// Permission for one simulated thread to run.
///
/// A release that arrives before the owner starts waiting is remembered, so
/// a thread that is woken and rescheduled before it has finished switching
/// away does not miss its turn.
pub struct Baton {
    signal: Mutex<Signal>,
    cond: Condvar,
}

impl Baton {
    fn leak() -> &'static Baton {
        Box::leak(Box::new(Baton {
            signal: Mutex::new(Signal::Idle),
            cond: Condvar::new(),
        }))
    }

    fn post(&self, signal: Signal) {
        let mut current = self.signal.lock().unwrap_or_else(|e| e.into_inner());
        *current = signal;
        self.cond.notify_one();
    }

    fn release(&self) {
        self.post(Signal::Run);
    }

    /// Wait for the next signal.  Returns `false` if the thread is to be
    /// dropped instead of run.
    fn wait(&self) -> bool {
        let mut signal = self.signal.lock().unwrap_or_else(|e| e.into_inner());
        while *signal == Signal::Idle {
            signal = self.cond.wait(signal).unwrap_or_else(|e| e.into_inner());
        }
        let run = *signal == Signal::Run;
        *signal = Signal::Idle;
        run
    }
}

/// Saved context of a simulated thread: the baton it is parked on.
#[derive(Clone, Copy)]
pub struct HostContext(&'static Baton);

impl PartialEq for HostContext {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.0, other.0)
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostContext({:p})", self.0)
    }
}

std::thread_local! {
    static CURRENT_BATON: Cell<Option<&'static Baton>> = const { Cell::new(None) };
}

fn current_context() -> HostContext {
    match CURRENT_BATON.with(Cell::get) {
        Some(baton) => HostContext(baton),
        None => pw_assert::panic!("OS thread is not a kernel thread"),
    }
}

/// Make the calling OS thread a kernel thread.
///
/// Used to adopt a test's own thread as the bootstrap thread.
pub(crate) fn adopt_current_os_thread() {
    pw_assert::assert!(CURRENT_BATON.with(Cell::get).is_none());
    let baton = Baton::leak();
    CURRENT_BATON.with(|current| current.set(Some(baton)));
}

/// A context no thread will ever resume.
#[cfg(test)]
pub(crate) fn test_context() -> HostContext {
    HostContext(Baton::leak())
}

#[derive(Copy, Clone)]
pub struct Arch;

impl ArchInterface for Arch {
    type BareSpinLock = spinlock::BareSpinLock;
    type Context = HostContext;

    fn early_init() {
        info!("HOST arch early init");
    }

    fn panic() -> ! {
        std::panic!("kernel panic");
    }

    fn interrupts_enabled() -> bool {
        true
    }

    fn idle() {
        std::thread::yield_now();
    }

    fn initialize_context(_stack: &mut Stack, entry: ThreadEntry, arg: usize) -> HostContext {
        let baton = Baton::leak();
        let spawned = std::thread::Builder::new().spawn(move || {
            CURRENT_BATON.with(|current| current.set(Some(baton)));
            if baton.wait() {
                entry(arg);
            }
        });
        if spawned.is_err() {
            pw_assert::panic!("unable to spawn host thread");
        }
        HostContext(baton)
    }

    fn discard_context(context: HostContext) {
        // Lets the parked OS thread return without calling its entry.
        context.0.post(Signal::Discard);
    }

    fn pend_context_switch() {}

    fn context_switch<'a>(
        scheduler: &'a Scheduler,
        mut state: SpinLockGuard<'a, SchedulerState>,
    ) -> SpinLockGuard<'a, SchedulerState> {
        let me = current_context();
        let next = state.switch_context(me);
        drop(state);

        if next != me {
            next.0.release();
            let resumed = me.0.wait();
            pw_assert::assert!(resumed, "running thread was discarded");
        }
        scheduler.lock()
    }

    fn exit_thread(scheduler: &Scheduler) -> ! {
        let me = current_context();
        let next = scheduler.lock().switch_context(me);
        pw_assert::ne!(next, me);
        next.0.release();

        // The OS thread has nothing left to run.  Its baton is never
        // released again.
        loop {
            std::thread::park();
        }
    }
}
