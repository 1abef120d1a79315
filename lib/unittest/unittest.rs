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

//! Assertion macros for kernel tests.
//!
//! Tests return [`Result`] and bail out with a [`TestError`] that records
//! where the failing assertion lives, so a failure reads the same whether it
//! is reported by the host test harness or logged from a target runner.

#![no_std]

use core::fmt;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TestError {
    pub file: &'static str,
    pub line: u32,
    pub message: &'static str,
}

impl fmt::Debug for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub type Result<T> = core::result::Result<T, TestError>;

#[macro_export]
macro_rules! assert_eq {
    ($a:expr, $b:expr $(,)?) => {
        if $a != $b {
            return Err($crate::TestError {
                file: file!(),
                line: line!(),
                message: concat!("assert_eq!(", stringify!($a), ", ", stringify!($b), ") failed"),
            });
        }
    };
}

#[macro_export]
macro_rules! assert_ne {
    ($a:expr, $b:expr $(,)?) => {
        if $a == $b {
            return Err($crate::TestError {
                file: file!(),
                line: line!(),
                message: concat!("assert_ne!(", stringify!($a), ", ", stringify!($b), ") failed"),
            });
        }
    };
}

#[macro_export]
macro_rules! assert_true {
    ($a:expr $(,)?) => {
        if !$a {
            return Err($crate::TestError {
                file: file!(),
                line: line!(),
                message: concat!("assert_true!(", stringify!($a), ") failed"),
            });
        }
    };
}

#[macro_export]
macro_rules! assert_false {
    ($a:expr $(,)?) => {
        if $a {
            return Err($crate::TestError {
                file: file!(),
                line: line!(),
                message: concat!("assert_false!(", stringify!($a), ") failed"),
            });
        }
    };
}
