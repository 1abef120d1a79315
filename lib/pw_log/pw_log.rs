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

//! Kernel logging facade.
//!
//! The macros accept `core::fmt` format strings and hand a
//! [`core::fmt::Arguments`] to the backend.  With the `std` feature the
//! backend writes to stderr.  Otherwise every line goes to the sink
//! installed with [`set_sink`]; lines logged before a sink is installed are
//! dropped.
//!
//! ```
//! const ALLOCATOR_DEBUG: bool = false;
//! pw_log::info!("arena at {:#010x}", 0x2000_0000usize);
//! pw_log::debug_if!(ALLOCATOR_DEBUG, "split power {}", 12);
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

use core::fmt;
#[cfg(not(feature = "std"))]
use core::sync::atomic::{AtomicPtr, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warn => "WRN",
            LogLevel::Error => "ERR",
            LogLevel::Fatal => "FTL",
        }
    }
}

/// Receives one formatted log line.
pub type Sink = fn(LogLevel, fmt::Arguments<'_>);

#[cfg(not(feature = "std"))]
static SINK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Route log output to `sink`.
///
/// Only load and store are used so this works on cores without
/// compare-and-swap.
pub fn set_sink(sink: Sink) {
    #[cfg(not(feature = "std"))]
    SINK.store(sink as *mut (), Ordering::Release);
    #[cfg(feature = "std")]
    let _ = sink;
}

#[doc(hidden)]
pub fn __write(level: LogLevel, args: fmt::Arguments<'_>) {
    #[cfg(feature = "std")]
    {
        std::eprintln!("[{}] {}", level.tag(), args);
    }
    #[cfg(not(feature = "std"))]
    {
        let sink = SINK.load(Ordering::Acquire);
        if !sink.is_null() {
            // Safety: the only non-null value ever stored is a `Sink`.
            let sink: Sink = unsafe { core::mem::transmute::<*mut (), Sink>(sink) };
            sink(level, args);
        }
    }
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($args:tt)+) => {
        $crate::__write($level, format_args!($($args)+))
    };
}

#[macro_export]
macro_rules! debug {
    ($($args:tt)+) => { $crate::log!($crate::LogLevel::Debug, $($args)+) };
}

#[macro_export]
macro_rules! info {
    ($($args:tt)+) => { $crate::log!($crate::LogLevel::Info, $($args)+) };
}

#[macro_export]
macro_rules! warn {
    ($($args:tt)+) => { $crate::log!($crate::LogLevel::Warn, $($args)+) };
}

#[macro_export]
macro_rules! error {
    ($($args:tt)+) => { $crate::log!($crate::LogLevel::Error, $($args)+) };
}

#[macro_export]
macro_rules! fatal {
    ($($args:tt)+) => { $crate::log!($crate::LogLevel::Fatal, $($args)+) };
}

/// Emit a debug line only when `condition` holds.
///
/// Intended for per-module `const FOO_DEBUG: bool` switches so disabled
/// logging compiles away.
#[macro_export]
macro_rules! debug_if {
    ($condition:expr, $($args:tt)+) => {{
        if $condition {
            $crate::debug!($($args)+)
        }
    }};
}
