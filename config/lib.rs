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
#![no_std]

/// Kernel configuration common to all architectures.
///
/// Every queue and table in the kernel is sized from these constants, so
/// the values are boot-time capacity decisions: overflowing any of them is
/// fatal rather than a recoverable error.
pub trait KernelConfigInterface {
    /// The page arena spans `2^PAGE_ARENA_POWER` bytes.  The allocator
    /// keeps one free list per power `0..=PAGE_ARENA_POWER`.
    const PAGE_ARENA_POWER: u8 = 15;

    /// Each thread stack is one `2^THREAD_STACK_POWER` byte page range.
    const THREAD_STACK_POWER: u8 = 10;

    /// Threads alive at once, including idle and worker threads.  Also the
    /// run queue capacity.
    const MAX_THREADS: usize = 8;

    /// Threads that may wait on a single kernel mutex.
    const MUTEX_WAIT_QUEUE_CAPACITY: usize = 16;

    /// Outstanding blocking requests the worker will queue.
    const WORKER_TASK_CAPACITY: usize = 8;

    /// Memory protection regions tracked per thread.
    const MAX_THREAD_REGIONS: usize = 4;

    /// Page ranges owned per thread (stack plus loader supplied ranges).
    const MAX_THREAD_PAGE_RANGES: usize = 2;
}

/// Cortex-M specific configuration.
pub trait CortexMKernelConfigInterface {
    /// SysTick reload value in core clock cycles.
    const SYSTICK_RELOAD: u32;

    /// Number of supported MPU regions.
    const NUM_MPU_REGIONS: usize;
}

/// Configuration for the RP2040 (Cortex-M0+, 264 KiB SRAM).
pub struct KernelConfig;

impl KernelConfigInterface for KernelConfig {}

impl CortexMKernelConfigInterface for KernelConfig {
    const SYSTICK_RELOAD: u32 = 1_000_000;
    const NUM_MPU_REGIONS: usize = 8;
}
