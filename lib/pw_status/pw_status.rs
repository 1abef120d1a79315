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

//! # pw_status
//!
//! Canonical error codes shared by the kernel crates.  `OK` is not part of
//! the `Error` enum; [`StatusCode`] converts a `Result` into the numeric
//! code for callers that need to cross an ABI boundary (syscall return
//! values written back into a blocked thread, for instance).
//!
//! ```
//! use pw_status::{Error, Result};
//!
//! fn split(power: u8) -> Result<u8> {
//!     power.checked_sub(1).ok_or(Error::OutOfRange)
//! }
//!
//! assert_eq!(split(4), Ok(3));
//! assert_eq!(split(0), Err(Error::OutOfRange));
//! ```

#![cfg_attr(not(test), no_std)]

use core::fmt;

/// Status code for no error.
pub const OK: u32 = 0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Error {
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    /// Out of pages, queue slots or region slots.
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Error {
    /// Recover an `Error` from a numeric status code.  `OK` and unknown
    /// codes yield `None`.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Error::Cancelled,
            2 => Error::Unknown,
            3 => Error::InvalidArgument,
            4 => Error::DeadlineExceeded,
            5 => Error::NotFound,
            6 => Error::AlreadyExists,
            7 => Error::PermissionDenied,
            8 => Error::ResourceExhausted,
            9 => Error::FailedPrecondition,
            10 => Error::Aborted,
            11 => Error::OutOfRange,
            12 => Error::Unimplemented,
            13 => Error::Internal,
            14 => Error::Unavailable,
            15 => Error::DataLoss,
            16 => Error::Unauthenticated,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Error::Cancelled => "CANCELLED",
            Error::Unknown => "UNKNOWN",
            Error::InvalidArgument => "INVALID_ARGUMENT",
            Error::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Error::NotFound => "NOT_FOUND",
            Error::AlreadyExists => "ALREADY_EXISTS",
            Error::PermissionDenied => "PERMISSION_DENIED",
            Error::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Error::FailedPrecondition => "FAILED_PRECONDITION",
            Error::Aborted => "ABORTED",
            Error::OutOfRange => "OUT_OF_RANGE",
            Error::Unimplemented => "UNIMPLEMENTED",
            Error::Internal => "INTERNAL",
            Error::Unavailable => "UNAVAILABLE",
            Error::DataLoss => "DATA_LOSS",
            Error::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Convert a Result into a status code.
pub trait StatusCode {
    fn status_code(self) -> u32;
}

impl<T> StatusCode for Result<T> {
    fn status_code(self) -> u32 {
        match self {
            Ok(_) => OK,
            Err(e) => e as u32,
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        match self {
            Error::Cancelled | Error::Aborted => ErrorKind::Interrupted,
            Error::InvalidArgument | Error::FailedPrecondition | Error::OutOfRange => {
                ErrorKind::InvalidInput
            }
            Error::DeadlineExceeded => ErrorKind::TimedOut,
            Error::NotFound => ErrorKind::NotFound,
            Error::AlreadyExists => ErrorKind::AlreadyExists,
            Error::PermissionDenied => ErrorKind::PermissionDenied,
            Error::ResourceExhausted => ErrorKind::OutOfMemory,
            Error::Unimplemented | Error::Internal => ErrorKind::Unsupported,
            Error::Unknown | Error::Unavailable | Error::DataLoss | Error::Unauthenticated => {
                ErrorKind::Other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_of_ok_is_zero() -> unittest::Result<()> {
        unittest::assert_eq!(Result::Ok(()).status_code(), OK);
        unittest::assert_eq!(Result::<()>::Err(Error::ResourceExhausted).status_code(), 8);
        unittest::assert_eq!(Result::<()>::Err(Error::InvalidArgument).status_code(), 3);
        Ok(())
    }

    #[test]
    fn codes_round_trip_through_from_code() -> unittest::Result<()> {
        for code in 1..=16 {
            let error = Error::from_code(code);
            unittest::assert_true!(error.is_some());
            unittest::assert_eq!(Result::<()>::Err(error.unwrap()).status_code(), code);
        }
        unittest::assert_true!(Error::from_code(OK).is_none());
        unittest::assert_true!(Error::from_code(17).is_none());
        Ok(())
    }

    #[test]
    fn display_uses_canonical_names() -> unittest::Result<()> {
        unittest::assert_eq!(
            std::format!("{}", Error::ResourceExhausted),
            "RESOURCE_EXHAUSTED"
        );
        Ok(())
    }
}
