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

//! Fatal assertions.
//!
//! Every macro logs through `pw_log::fatal!` and then diverges.  On target
//! the failure path is the `pw_assert_HandleFailure` symbol, which the
//! kernel points at its architecture panic hook.

#![no_std]

#[cfg(feature = "std")]
extern crate std;

#[cfg(not(feature = "std"))]
unsafe extern "Rust" {
    pub fn pw_assert_HandleFailure() -> !;
}

#[doc(hidden)]
pub mod __private {
    pub use pw_log::fatal;

    #[cold]
    #[inline(never)]
    pub fn handle_failure() -> ! {
        #[cfg(feature = "std")]
        {
            std::panic!("pw_assert failure");
        }
        #[cfg(not(feature = "std"))]
        unsafe {
            super::pw_assert_HandleFailure()
        }
    }
}

#[macro_export]
macro_rules! panic {
    ($($args:tt)+) => {{
        $crate::__private::fatal!("PANIC: {}", format_args!($($args)+));
        $crate::__private::handle_failure()
    }};
}

#[macro_export]
macro_rules! assert {
    ($condition:expr $(,)?) => {{
        if !$condition {
            $crate::__private::fatal!(
                "assert!({}) failed at {}:{}",
                stringify!($condition),
                file!(),
                line!()
            );
            $crate::__private::handle_failure()
        }
    }};

    ($condition:expr, $($args:tt)+) => {{
        if !$condition {
            $crate::__private::fatal!(
                "assert!({}) failed at {}:{}",
                stringify!($condition),
                file!(),
                line!()
            );
            $crate::__private::fatal!($($args)+);
            $crate::__private::handle_failure()
        }
    }};
}

#[macro_export]
macro_rules! eq {
    ($a:expr, $b:expr $(,)?) => {{
        let a = &$a;
        let b = &$b;
        if *a != *b {
            $crate::__private::fatal!("assert_eq!() failed, {:?} != {:?}", a, b);
            $crate::__private::handle_failure()
        }
    }};

    ($a:expr, $b:expr, $($args:tt)+) => {{
        let a = &$a;
        let b = &$b;
        if *a != *b {
            $crate::__private::fatal!("assert_eq!() failed, {:?} != {:?}", a, b);
            $crate::__private::fatal!($($args)+);
            $crate::__private::handle_failure()
        }
    }};
}

#[macro_export]
macro_rules! ne {
    ($a:expr, $b:expr $(,)?) => {{
        let a = &$a;
        let b = &$b;
        if *a == *b {
            $crate::__private::fatal!("assert_ne!() failed, {:?} == {:?}", a, b);
            $crate::__private::handle_failure()
        }
    }};

    ($a:expr, $b:expr, $($args:tt)+) => {{
        let a = &$a;
        let b = &$b;
        if *a == *b {
            $crate::__private::fatal!("assert_ne!() failed, {:?} == {:?}", a, b);
            $crate::__private::fatal!($($args)+);
            $crate::__private::handle_failure()
        }
    }};
}

/// Like [`assert!`] but compiled out of release builds.
#[macro_export]
macro_rules! debug_assert {
    ($($args:tt)+) => {{
        if cfg!(debug_assertions) {
            $crate::assert!($($args)+)
        }
    }};
}
