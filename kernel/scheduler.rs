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

//! Round-robin scheduler.
//!
//! Threads live in a fixed table owned by [`SchedulerState`] and are named
//! by [`ThreadId`] handles.  The run queue holds the ids of every `Ready`
//! thread in dispatch order; the running thread is never on it.
//!
//! The only place a new thread is picked is
//! [`SchedulerState::switch_context`], called by the architecture's context
//! switch path with the scheduler lock held.

use circular_queue::CircularQueue;
use kernel_config::{KernelConfig, KernelConfigInterface};
use pw_log::info;
use pw_status::{Error, Result};

use crate::arch::{Arch, ArchInterface, Context};
use crate::memory::PageAllocator;
use crate::sync::spinlock::{SpinLock, SpinLockGuard};

mod locks;
pub mod thread;

pub use locks::{SchedLock, SchedLockGuard};
use thread::{State, Thread, UnblockInfo};

const SCHEDULER_DEBUG: bool = false;
macro_rules! sched_debug {
    ($($args:tt)*) => {{
        pw_log::debug_if!(SCHEDULER_DEBUG, $($args)*)
    }}
}

const MAX_THREADS: usize = KernelConfig::MAX_THREADS;

/// Handle to a thread in the scheduler's table.
///
/// The generation changes every time a slot is reused, so a handle to a
/// reaped thread never aliases its successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadId {
    index: u16,
    generation: u16,
}

struct ThreadSlot {
    generation: u16,
    thread: Option<Thread>,
}

impl ThreadSlot {
    const EMPTY: Self = Self {
        generation: 0,
        thread: None,
    };
}

pub struct SchedulerState {
    threads: [ThreadSlot; MAX_THREADS],
    current: Option<ThreadId>,
    run_queue: CircularQueue<ThreadId, MAX_THREADS>,
    started: bool,
    switch_pending: bool,
}

impl SchedulerState {
    const fn new() -> Self {
        Self {
            threads: [ThreadSlot::EMPTY; MAX_THREADS],
            current: None,
            run_queue: CircularQueue::new(),
            started: false,
            switch_pending: false,
        }
    }

    /// Look up a live thread.  A stale or unknown handle is fatal.
    pub fn thread(&self, id: ThreadId) -> &Thread {
        let slot = self.threads.get(id.index as usize);
        match slot {
            Some(ThreadSlot {
                generation,
                thread: Some(thread),
            }) if *generation == id.generation => thread,
            _ => pw_assert::panic!("stale thread id {:?}", id),
        }
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        let slot = self.threads.get_mut(id.index as usize);
        match slot {
            Some(ThreadSlot {
                generation,
                thread: Some(thread),
            }) if *generation == id.generation => thread,
            _ => pw_assert::panic!("stale thread id {:?}", id),
        }
    }

    #[must_use]
    pub fn current_thread_id(&self) -> Option<ThreadId> {
        self.current
    }

    /// The running thread.  Fatal before the first dispatch.
    pub fn current_thread_mut(&mut self) -> &mut Thread {
        let Some(id) = self.current else {
            pw_assert::panic!("no current thread");
        };
        self.thread_mut(id)
    }

    /// Place `thread` in a free slot without making it runnable.
    fn insert(&mut self, thread: Thread) -> Result<ThreadId> {
        let Some(index) = self.threads.iter().position(|slot| slot.thread.is_none()) else {
            return Err(Error::ResourceExhausted);
        };
        let slot = &mut self.threads[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.thread = Some(thread);
        Ok(ThreadId {
            index: index as u16,
            generation: slot.generation,
        })
    }

    /// Append a `Ready` thread to the run queue.
    fn make_ready(&mut self, id: ThreadId) {
        pw_assert::eq!(self.thread(id).state, State::Ready);
        pw_assert::assert!(!self.run_queue.contains(&id), "thread queued twice");
        self.run_queue.enqueue(id);
    }

    /// Make a blocked thread runnable again, handing it `info`.
    ///
    /// The thread joins the back of the run queue; the caller keeps the CPU.
    pub fn wakeup(&mut self, id: ThreadId, info: Option<UnblockInfo>) {
        let thread = self.thread_mut(id);
        pw_assert::eq!(thread.state, State::Blocked);
        thread.state = State::Ready;
        thread.unblock_info = info;
        sched_debug!("wakeup {}", thread.name());
        self.make_ready(id);
    }

    /// Collect what the waker left for the current thread.
    pub fn take_unblock_info(&mut self) -> Option<UnblockInfo> {
        self.current_thread_mut().unblock_info.take()
    }

    /// Rotate to the next thread.
    ///
    /// `outgoing` is the context of the thread that was running.  It is
    /// stored back into that thread, which goes to the back of the run queue
    /// unless it is blocked or exiting.  With no current thread (the boot
    /// context) `outgoing` is discarded.  Returns the context to resume.
    pub fn switch_context(&mut self, outgoing: Context) -> Context {
        if let Some(id) = self.current.take() {
            let thread = self.thread_mut(id);
            thread.context = Some(outgoing);
            match thread.state {
                State::Blocked => {}
                _ if thread.die_at_next_opportunity => {
                    sched_debug!("retiring {}", thread.name());
                    thread.state = State::Terminated;
                }
                _ => {
                    thread.state = State::Ready;
                    self.make_ready(id);
                }
            }
        }

        let Some(next) = self.run_queue.dequeue() else {
            pw_assert::panic!("run queue empty");
        };
        let thread = self.thread_mut(next);
        pw_assert::eq!(thread.state, State::Ready);
        thread.state = State::Running;
        thread.mark_dispatched();
        let Some(context) = thread.context.take() else {
            pw_assert::panic!("ready thread {} has no context", thread.name());
        };
        sched_debug!("switching to {}", thread.name());
        Arch::configure_memory(&thread.regions);

        self.current = Some(next);
        self.switch_pending = false;
        context
    }

    pub fn dump(&self) {
        info!("threads:");
        for slot in &self.threads {
            if let Some(thread) = &slot.thread {
                thread.dump();
            }
        }
        info!("run queue: {} ready", self.run_queue.len());
    }
}

pub struct Scheduler {
    state: SpinLock<SchedulerState>,
}

impl Scheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(SchedulerState::new()),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, SchedulerState> {
        self.state.lock()
    }

    /// Register `thread` and queue it to run `callback` on a fresh stack.
    pub fn spawn<C>(
        &'static self,
        pages: &'static PageAllocator,
        mut thread: Thread,
        callback: C,
    ) -> Result<ThreadId>
    where
        C: FnOnce() + Send + 'static,
    {
        // Stack allocation happens outside the scheduler lock.
        thread.setup_context(pages, self, callback)?;
        let name = thread.name();

        let mut state = self.lock();
        if !state.threads.iter().any(|slot| slot.thread.is_none()) {
            // The rejected thread runs its drop outside the lock.
            drop(state);
            drop(thread);
            return Err(Error::ResourceExhausted);
        }
        let id = state.insert(thread)?;
        state.make_ready(id);
        drop(state);

        info!("created thread {}", name);
        Ok(id)
    }

    /// Create a kernel thread that runs `callback` and then exits.
    ///
    /// Threads that finished earlier are reaped first so their slots and
    /// stacks can be reused.
    pub fn create_thread<C>(
        &'static self,
        pages: &'static PageAllocator,
        name: &'static str,
        callback: C,
    ) -> Result<ThreadId>
    where
        C: FnOnce() + Send + 'static,
    {
        self.reap_terminated();
        self.spawn(pages, Thread::new(name, None), callback)
    }

    /// Mark dispatching as live.  Ticks before this are ignored.
    pub fn start(&self) {
        let mut state = self.lock();
        pw_assert::assert!(!state.started, "scheduler started twice");
        state.started = true;
        info!("scheduler started with {} ready", state.run_queue.len());
    }

    /// Move the current thread to the back of the run queue and run the
    /// next one.  Returns immediately if nothing else is ready.
    pub fn yield_now(&self) {
        let state = self.lock();
        drop(Arch::context_switch(self, state));
    }

    /// Timer tick.  Asks for a switch at the next opportunity once the
    /// scheduler has started.
    pub fn tick(&self) {
        let mut state = self.lock();
        if !state.started {
            return;
        }
        state.switch_pending = true;
        drop(state);
        Arch::pend_context_switch();
    }

    #[must_use]
    pub fn is_switch_pending(&self) -> bool {
        self.lock().switch_pending
    }

    /// Block the current thread until someone passes its id to
    /// [`SchedulerState::wakeup`].  The caller must have recorded the id
    /// somewhere the waker will find it before calling.
    pub fn block_current<'a>(
        &'a self,
        mut state: SpinLockGuard<'a, SchedulerState>,
    ) -> SpinLockGuard<'a, SchedulerState> {
        let thread = state.current_thread_mut();
        pw_assert::eq!(thread.state, State::Running);
        thread.state = State::Blocked;
        sched_debug!("blocking {}", thread.name());
        Arch::context_switch(self, state)
    }

    /// End the current thread.  Its resources are released by a later
    /// [`Scheduler::reap_terminated`].
    pub fn exit_current(&self) -> ! {
        let mut state = self.lock();
        let thread = state.current_thread_mut();
        info!("thread {} exiting", thread.name());
        thread.die_at_next_opportunity = true;
        drop(state);
        Arch::exit_thread(self)
    }

    /// Ask a thread to terminate.
    ///
    /// A thread that has never run holds nothing and is retired on the spot.
    /// Any other thread keeps running, including through mutex handoffs and
    /// wakeups, until it sees [`Scheduler::termination_requested`] at a point
    /// of its choosing and exits.
    pub fn request_termination(&self, id: ThreadId) {
        let mut state = self.lock();
        let thread = state.thread_mut(id);
        info!("termination requested for {}", thread.name());
        if !thread.is_unstarted() {
            thread.termination_requested = true;
            return;
        }
        thread.state = State::Terminated;
        let dequeued = state.run_queue.remove(&id);
        pw_assert::assert!(dequeued, "unstarted thread missing from the run queue");
    }

    /// Whether someone asked the current thread to terminate.
    #[must_use]
    pub fn termination_requested(&self) -> bool {
        let state = self.lock();
        state
            .current
            .is_some_and(|id| state.thread(id).termination_requested)
    }

    /// Release every terminated thread.  Returns how many were reaped.
    pub fn reap_terminated(&self) -> usize {
        let mut reaped = 0;
        loop {
            let mut state = self.lock();
            let dead = state.threads.iter_mut().find(|slot| {
                matches!(&slot.thread, Some(thread) if thread.state == State::Terminated)
            });
            let Some(thread) = dead.and_then(|slot| slot.thread.take()) else {
                return reaped;
            };
            drop(state);

            info!("reaped thread {}", thread.name());
            drop(thread);
            reaped += 1;
        }
    }

    /// Entry point for the context switch handler.
    pub fn switch_context(&self, outgoing: Context) -> Context {
        self.lock().switch_context(outgoing)
    }

    #[must_use]
    pub fn current_thread_id(&self) -> Option<ThreadId> {
        self.lock().current
    }

    /// State of `id`, or `None` once the thread has been reaped.
    #[must_use]
    pub fn thread_state(&self, id: ThreadId) -> Option<State> {
        let state = self.lock();
        match state.threads.get(id.index as usize) {
            Some(ThreadSlot {
                generation,
                thread: Some(thread),
            }) if *generation == id.generation => Some(thread.state),
            _ => None,
        }
    }

    pub fn dump(&self) {
        self.lock().dump();
    }

    /// Turn the calling OS thread into the running kernel thread `name`.
    ///
    /// Host only: lets a test drive the scheduler from its own thread.
    #[cfg(feature = "arch_host")]
    pub fn adopt_current_thread(&self, name: &'static str) -> ThreadId {
        crate::arch::adopt_current_os_thread();
        let mut thread = Thread::new(name, None);
        thread.state = State::Running;

        let mut state = self.lock();
        pw_assert::assert!(state.current.is_none(), "scheduler already has a running thread");
        let id = match state.insert(thread) {
            Ok(id) => id,
            Err(_) => pw_assert::panic!("thread table full"),
        };
        state.current = Some(id);
        id
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "arch_host"))]
mod tests {
    use super::*;

    #[test]
    fn rotation_is_round_robin() -> unittest::Result<()> {
        let mut state = SchedulerState::new();
        let contexts = [
            crate::arch::test_context(),
            crate::arch::test_context(),
            crate::arch::test_context(),
        ];
        let mut ids = [None; 3];
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            let mut thread = Thread::new(name, None);
            thread.state = State::Ready;
            thread.context = Some(contexts[i]);
            let id = state.insert(thread);
            unittest::assert_true!(id.is_ok());
            let id = id.unwrap();
            state.make_ready(id);
            ids[i] = Some(id);
        }

        // The boot context is discarded on the first switch.
        let boot = crate::arch::test_context();
        unittest::assert_eq!(state.switch_context(boot), contexts[0]);
        unittest::assert_eq!(state.current_thread_id(), ids[0]);

        unittest::assert_eq!(state.switch_context(contexts[0]), contexts[1]);
        unittest::assert_eq!(state.switch_context(contexts[1]), contexts[2]);
        unittest::assert_eq!(state.switch_context(contexts[2]), contexts[0]);
        unittest::assert_eq!(state.run_queue.len(), 2);
        Ok(())
    }

    #[test]
    fn blocked_and_dying_threads_leave_the_rotation() -> unittest::Result<()> {
        let mut state = SchedulerState::new();
        let contexts = [crate::arch::test_context(), crate::arch::test_context()];
        let mut ids = [None; 2];
        for (i, name) in ["blocker", "runner"].into_iter().enumerate() {
            let mut thread = Thread::new(name, None);
            thread.state = State::Ready;
            thread.context = Some(contexts[i]);
            let id = state.insert(thread).unwrap();
            state.make_ready(id);
            ids[i] = Some(id);
        }
        let (blocker, runner) = (ids[0].unwrap(), ids[1].unwrap());

        let _ = state.switch_context(crate::arch::test_context());
        state.thread_mut(blocker).state = State::Blocked;
        unittest::assert_eq!(state.switch_context(contexts[0]), contexts[1]);

        // Only the runner is left, so it is picked again.
        unittest::assert_eq!(state.switch_context(contexts[1]), contexts[1]);

        state.wakeup(blocker, Some(UnblockInfo::Syscall { return_value: 7 }));
        state.thread_mut(runner).die_at_next_opportunity = true;
        unittest::assert_eq!(state.switch_context(contexts[1]), contexts[0]);
        unittest::assert_eq!(state.thread(runner).state, State::Terminated);
        unittest::assert_eq!(
            state.take_unblock_info(),
            Some(UnblockInfo::Syscall { return_value: 7 })
        );
        unittest::assert_true!(state.run_queue.is_empty());
        Ok(())
    }

    #[test]
    fn slot_reuse_bumps_the_generation() -> unittest::Result<()> {
        let mut state = SchedulerState::new();
        let first = state.insert(Thread::new("first", None)).unwrap();
        state.threads[first.index as usize].thread = None;
        let second = state.insert(Thread::new("second", None)).unwrap();
        unittest::assert_eq!(first.index, second.index);
        unittest::assert_ne!(first, second);
        Ok(())
    }

    #[test]
    #[should_panic]
    fn stale_thread_id_is_fatal() {
        let mut state = SchedulerState::new();
        let first = state.insert(Thread::new("first", None)).unwrap();
        state.threads[first.index as usize].thread = None;
        let _ = state.insert(Thread::new("second", None));
        let _ = state.thread(first);
    }

    #[test]
    fn full_table_is_reported() -> unittest::Result<()> {
        let mut state = SchedulerState::new();
        for _ in 0..MAX_THREADS {
            unittest::assert_true!(state.insert(Thread::new("filler", None)).is_ok());
        }
        unittest::assert_eq!(
            state.insert(Thread::new("extra", None)).err(),
            Some(Error::ResourceExhausted)
        );
        Ok(())
    }
}
