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

//! ARMv6-M thread frame layout.
//!
//! A suspended thread's stack pointer addresses a [`ThreadFrame`]: the
//! callee-saved registers pushed by the context switch handler sit below
//! the frame the hardware pushes on exception entry.  Resuming a thread
//! pops both in that order, so a new thread must start from exactly this
//! layout.  The layout is plain data and is built the same way on every
//! host so it can be checked without hardware.

use core::mem::size_of;

use super::ThreadEntry;
use crate::scheduler::thread::Stack;

/// Thumb state bit of xPSR.  ARMv6-M only executes Thumb code; returning
/// with this bit clear faults.
pub const XPSR_THUMB: u32 = 1 << 24;

/// Exception entry and return require an 8 byte aligned frame.
pub const STACK_ALIGNMENT: usize = 8;

/// Registers stacked by hardware on exception entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Registers stacked by the context switch handler.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SoftwareFrame {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadFrame {
    pub software: SoftwareFrame,
    pub hardware: ExceptionFrame,
}

const _: () = assert!(size_of::<ThreadFrame>() == 16 * size_of::<u32>());

/// Write the frame a new thread is first resumed from and return its
/// address, which becomes the thread's saved stack pointer.
///
/// Every general purpose register starts at zero except `r0`, which
/// carries `arg` into `entry`.
pub fn initialize_thread_frame(
    stack: &mut Stack,
    entry: ThreadEntry,
    arg: usize,
) -> *mut ThreadFrame {
    let frame = stack
        .reserve(size_of::<ThreadFrame>(), STACK_ALIGNMENT)
        .cast::<ThreadFrame>();

    let hardware = ExceptionFrame {
        r0: arg as u32,
        // Exception return requires bit 0 of the stacked PC clear.
        pc: (entry as usize & !1) as u32,
        xpsr: XPSR_THUMB,
        ..ExceptionFrame::default()
    };

    // SAFETY: `reserve` returned `size_of::<ThreadFrame>()` bytes inside the
    // stack, aligned to 8 which satisfies `ThreadFrame`'s alignment.
    unsafe {
        frame.write(ThreadFrame {
            software: SoftwareFrame::default(),
            hardware,
        });
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn entry(_arg: usize) {}

    #[repr(C, align(8))]
    struct TestStack([u8; 256]);

    #[test]
    fn frame_matches_exception_return_layout() -> unittest::Result<()> {
        let mut storage = TestStack([0xa5; 256]);
        let mut stack = Stack::from_slice(&mut storage.0);
        let top = stack.end() as usize;

        let frame = initialize_thread_frame(&mut stack, entry, 0x2000_1234);
        let frame_addr = frame as usize;

        unittest::assert_eq!(frame_addr % STACK_ALIGNMENT, 0);
        unittest::assert_eq!(top - frame_addr, size_of::<ThreadFrame>());
        unittest::assert_eq!(stack.sp() as usize, frame_addr);

        // SAFETY: `frame` was just initialized inside `storage`.
        let frame = unsafe { frame.read() };
        unittest::assert_eq!(frame.software, SoftwareFrame::default());
        unittest::assert_eq!(frame.hardware.r0, 0x2000_1234);
        unittest::assert_eq!(frame.hardware.r1, 0);
        unittest::assert_eq!(frame.hardware.r12, 0);
        unittest::assert_eq!(frame.hardware.lr, 0);
        unittest::assert_eq!(frame.hardware.pc, (entry as usize & !1) as u32);
        unittest::assert_eq!(frame.hardware.xpsr, XPSR_THUMB);
        Ok(())
    }

    #[test]
    fn hardware_frame_sits_above_software_frame() -> unittest::Result<()> {
        // The switch handler restores r4-r11 from `sp` and hands `sp + 32` to
        // the hardware as the exception frame.
        unittest::assert_eq!(core::mem::offset_of!(ThreadFrame, software), 0);
        unittest::assert_eq!(core::mem::offset_of!(ThreadFrame, hardware), 32);
        unittest::assert_eq!(core::mem::offset_of!(ExceptionFrame, pc), 24);
        unittest::assert_eq!(core::mem::offset_of!(ExceptionFrame, xpsr), 28);
        Ok(())
    }

    #[test]
    fn frame_below_unaligned_reservation_is_realigned() -> unittest::Result<()> {
        let mut storage = TestStack([0; 256]);
        let mut stack = Stack::from_slice(&mut storage.0);
        let _ = stack.reserve(5, 1);

        let frame = initialize_thread_frame(&mut stack, entry, 0) as usize;
        unittest::assert_eq!(frame % STACK_ALIGNMENT, 0);
        unittest::assert_true!(frame + size_of::<ThreadFrame>() <= stack.end() as usize - 5);
        Ok(())
    }
}
