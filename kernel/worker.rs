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

//! Blocking I/O on behalf of other threads.
//!
//! A requesting thread queues a [`Task`] and blocks.  The worker thread
//! performs the I/O in thread context and wakes the requester with the
//! result encoded in its [`UnblockInfo`].

use core::ptr::NonNull;

use circular_queue::CircularQueue;
use embedded_io::Read;
use kernel_config::{KernelConfig, KernelConfigInterface};
use pw_log::info;
use pw_status::{Error, Result};

use crate::scheduler::thread::{State, UnblockInfo};
use crate::scheduler::{SchedLock, Scheduler, ThreadId};

const WORKER_DEBUG: bool = false;
macro_rules! worker_debug {
    ($($args:tt)*) => {{
        pw_log::debug_if!(WORKER_DEBUG, $($args)*)
    }}
}

const TASK_CAPACITY: usize = KernelConfig::WORKER_TASK_CAPACITY;

/// Byte source usable by the worker.
pub type ReadHandle = dyn Read<Error = Error>;

pub enum Task {
    ReadBlocking {
        handle: NonNull<ReadHandle>,
        buffer: NonNull<[u8]>,
        thread: ThreadId,
    },
}

// SAFETY: the pointers are only dereferenced by the worker while the
// requesting thread, which lent them, is blocked.
unsafe impl Send for Task {}

impl Task {
    fn run(self) -> (ThreadId, Result<usize>) {
        match self {
            Task::ReadBlocking {
                mut handle,
                mut buffer,
                thread,
            } => {
                // SAFETY: see `unsafe impl Send for Task`.
                let result = unsafe { handle.as_mut().read(buffer.as_mut()) };
                (thread, result)
            }
        }
    }
}

/// Pack a read result into a syscall return value: the byte count on
/// success, the negated status code on failure.
#[must_use]
pub fn encode_return_value(result: Result<usize>) -> u32 {
    match result {
        Ok(count) => count as u32,
        Err(error) => (error as u32).wrapping_neg(),
    }
}

#[must_use]
pub fn decode_return_value(value: u32) -> Result<usize> {
    match value as i32 {
        count @ 0.. => Ok(count as usize),
        negated => Err(Error::from_code(negated.unsigned_abs()).unwrap_or(Error::Unknown)),
    }
}

struct WorkerState {
    tasks: CircularQueue<Task, TASK_CAPACITY>,
    worker: Option<ThreadId>,
}

pub struct Worker {
    state: SchedLock<WorkerState>,
}

impl Worker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SchedLock::new(WorkerState {
                tasks: CircularQueue::new(),
                worker: None,
            }),
        }
    }

    /// Record the thread running [`Worker::run`].
    pub fn attach(&self, scheduler: &Scheduler, thread: ThreadId) {
        let mut state = self.state.lock(scheduler);
        pw_assert::assert!(state.worker.is_none(), "worker already attached");
        state.worker = Some(thread);
    }

    /// Drain the task queue forever, blocking while it is empty.
    pub fn run(&self, scheduler: &Scheduler) -> ! {
        info!("worker running");
        loop {
            let mut state = self.state.lock(scheduler);
            let task = loop {
                if let Some(task) = state.tasks.dequeue() {
                    break task;
                }
                state = state.block_current();
            };
            drop(state);

            let (thread, result) = task.run();
            worker_debug!("task for {:?} done: {:?}", thread, result);

            let mut state = self.state.lock(scheduler);
            let return_value = encode_return_value(result);
            state
                .sched_mut()
                .wakeup(thread, Some(UnblockInfo::Syscall { return_value }));
        }
    }

    /// Read into `buffer` from `handle` on the worker thread, blocking the
    /// caller until the read completes.
    ///
    /// Fails with `FailedPrecondition` if no worker is attached.  A full
    /// task queue is fatal.
    pub fn read_blocking(
        &self,
        scheduler: &Scheduler,
        handle: &mut ReadHandle,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let mut state = self.state.lock(scheduler);
        let Some(worker) = state.worker else {
            return Err(Error::FailedPrecondition);
        };
        let Some(current) = state.sched().current_thread_id() else {
            pw_assert::panic!("blocking read outside of a thread");
        };
        pw_assert::ne!(worker, current, "worker cannot wait on itself");

        state.tasks.enqueue(Task::ReadBlocking {
            handle: NonNull::from(handle),
            buffer: NonNull::from(buffer),
            thread: current,
        });
        if state.sched().thread(worker).state() == State::Blocked {
            state.sched_mut().wakeup(worker, None);
        }

        state = state.block_current();
        let info = state.sched_mut().take_unblock_info();
        drop(state);

        match info {
            Some(UnblockInfo::Syscall { return_value }) => decode_return_value(return_value),
            None => pw_assert::panic!("woken without a read result"),
        }
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_values_carry_counts_and_errors() -> unittest::Result<()> {
        unittest::assert_eq!(encode_return_value(Ok(12)), 12);
        unittest::assert_eq!(decode_return_value(12), Ok(12));
        unittest::assert_eq!(decode_return_value(0), Ok(0));

        let value = encode_return_value(Err(Error::Unavailable));
        unittest::assert_true!((value as i32) < 0);
        unittest::assert_eq!(decode_return_value(value), Err(Error::Unavailable));

        unittest::assert_eq!(decode_return_value(u32::MAX - 99), Err(Error::Unknown));
        Ok(())
    }
}
