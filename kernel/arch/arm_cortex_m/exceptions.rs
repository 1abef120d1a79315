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
#![allow(non_snake_case)]

use pw_log::error;

use crate::arch::exception_frame::ExceptionFrame;

#[inline(never)]
fn dump_exception_frame(frame: &ExceptionFrame) {
    error!("Exception frame {:#010x}:", core::ptr::from_ref(frame) as usize);
    error!(
        "r0  {:#010x} r1 {:#010x} r2  {:#010x} r3   {:#010x}",
        frame.r0, frame.r1, frame.r2, frame.r3
    );
    error!(
        "r12 {:#010x} lr {:#010x} pc  {:#010x} xpsr {:#010x}",
        frame.r12, frame.lr, frame.pc, frame.xpsr
    );
}

/// HardFault, reached through the cortex-m-rt trampoline with the stacked
/// frame of whichever stack was active.  ARMv6-M reports MPU violations as
/// HardFaults too.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn HardFault(frame: &ExceptionFrame) -> ! {
    error!("HardFault");
    dump_exception_frame(frame);
    pw_assert::panic!("unrecoverable fault at pc {:#010x}", frame.pc);
}
