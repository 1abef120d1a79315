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

//! Demo image for the RP2040: two threads share a counter behind a
//! `KernelMutex`, a third reads a canned message through the worker, and a
//! process thread gets its own data segment.

#![no_std]
#![no_main]

use core::fmt;
use core::mem::MaybeUninit;

use cortex_m_rt::entry;
use embedded_io::{ErrorType, Read};
use kernel::{Kernel, KernelMutex, PageArena, Process, static_mut_ref};
use pw_log::{LogLevel, info};
use pw_status::Error;

const ROUNDS: u32 = 5;

static COUNTER: KernelMutex<u32> = KernelMutex::new(0);

static APP: Process = Process::new("app", 1);

fn log_sink(level: LogLevel, args: fmt::Arguments<'_>) {
    #[cfg(feature = "semihosting")]
    cortex_m_semihosting::hprintln!("[{}] {}", level.tag(), args);
    #[cfg(not(feature = "semihosting"))]
    let _ = (level, args);
}

/// Stand-in for a UART receive path.
struct CannedInput(&'static [u8]);

impl ErrorType for CannedInput {
    type Error = Error;
}

impl Read for CannedInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.0.is_empty() {
            return Err(Error::OutOfRange);
        }
        let count = buf.len().min(self.0.len());
        let (head, tail) = self.0.split_at(count);
        buf[..count].copy_from_slice(head);
        self.0 = tail;
        Ok(count)
    }
}

fn counter_thread(kernel: &'static Kernel, name: &'static str) {
    for _ in 0..ROUNDS {
        let mut count = COUNTER.lock(&kernel.scheduler);
        *count += 1;
        info!("{}: counter {}", name, *count);
        drop(count);
        kernel.scheduler.yield_now();
    }
}

fn reader_thread(kernel: &'static Kernel) {
    let mut input = CannedInput(b"hello from the worker");
    let mut buffer = [0u8; 8];
    loop {
        match kernel
            .worker
            .read_blocking(&kernel.scheduler, &mut input, &mut buffer)
        {
            Ok(count) => info!("reader: {} bytes {:?}", count, &buffer[..count]),
            Err(error) => {
                info!("reader: done ({})", error);
                break;
            }
        }
    }
}

fn reporter_thread(kernel: &'static Kernel) {
    while *COUNTER.lock(&kernel.scheduler) < 2 * ROUNDS {
        kernel.scheduler.yield_now();
    }
    info!("counter reached {}", 2 * ROUNDS);
    kernel.dump();
}

fn spawn<F>(kernel: &'static Kernel, name: &'static str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(error) = kernel.create_thread(name, f) {
        pw_assert::panic!("unable to create {}: {}", name, error);
    }
}

#[entry]
fn main() -> ! {
    pw_log::set_sink(log_sink);
    info!("rp2040 demo booting");

    // SAFETY: `main` runs once.
    let arena = unsafe { static_mut_ref!(PageArena = PageArena::new()) };
    // SAFETY: `main` runs once.
    let kernel: &'static Kernel =
        unsafe { static_mut_ref!(MaybeUninit<Kernel> = MaybeUninit::uninit()) }
            .write(Kernel::new(&mut arena.0));

    if let Err(error) = kernel.start_worker() {
        pw_assert::panic!("unable to start worker: {}", error);
    }
    spawn(kernel, "counter_a", move || counter_thread(kernel, "counter_a"));
    spawn(kernel, "counter_b", move || counter_thread(kernel, "counter_b"));
    spawn(kernel, "reader", move || reader_thread(kernel));
    spawn(kernel, "reporter", move || reporter_thread(kernel));

    let flash = match Process::flash_region(0x2000_0000, 17) {
        Ok(region) => region,
        Err(error) => pw_assert::panic!("bad image region: {}", error),
    };
    let app = kernel.create_process_thread(&APP, "app_main", flash, 10, |data| {
        info!("app: data segment {:#010x}+{}", data.base(), data.size());
    });
    if let Err(error) = app {
        pw_assert::panic!("unable to create app thread: {}", error);
    }

    kernel.start()
}
