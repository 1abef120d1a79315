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

use core::arch::global_asm;
use core::ptr::addr_of_mut;

use cortex_m::peripheral::SCB;

use super::installed_kernel;
use crate::arch::ThreadEntry;
use crate::arch::exception_frame::initialize_thread_frame;
use crate::scheduler::thread::Stack;

/// Process stack pointer of a switched-out thread.  It addresses the
/// [`ThreadFrame`](crate::arch::exception_frame::ThreadFrame) left by the
/// PendSV handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SavedStackPointer(*mut u8);

// SAFETY: the pointer is only dereferenced by the PendSV handler when the
// owning thread is resumed.
unsafe impl Send for SavedStackPointer {}

pub fn initialize_context(stack: &mut Stack, entry: ThreadEntry, arg: usize) -> SavedStackPointer {
    SavedStackPointer(initialize_thread_frame(stack, entry, arg).cast())
}

// PendSV: save r4-r11 below the hardware frame on the process stack, let the
// scheduler pick the next thread, then restore that thread's r4-r11 and
// return to thread mode on the process stack.  ARMv6-M can only
// store/load r0-r7 in bulk, hence the shuffling through low registers.
//
// The return value is always EXC_RETURN 0xFFFFFFFD rather than the incoming
// lr: the very first switch comes from boot code running on the main stack.
global_asm!(
    "
    .section .text.PendSV, \"ax\", %progbits
    .global PendSV
    .type PendSV, %function
    .thumb_func
PendSV:
    mrs     r0, psp
    subs    r0, #32
    mov     r1, r0
    stmia   r1!, {{r4-r7}}
    mov     r4, r8
    mov     r5, r9
    mov     r6, r10
    mov     r7, r11
    stmia   r1!, {{r4-r7}}

    bl      kernel_switch_context

    mov     r1, r0
    adds    r1, #16
    ldmia   r1!, {{r4-r7}}
    mov     r8, r4
    mov     r9, r5
    mov     r10, r6
    mov     r11, r7
    msr     psp, r1
    ldmia   r0!, {{r4-r7}}

    movs    r0, #2
    mvns    r0, r0
    bx      r0
    .size PendSV, . - PendSV
    "
);

/// Called from PendSV with the outgoing thread's saved stack pointer.
/// Returns the stack pointer of the thread to resume.
#[unsafe(no_mangle)]
extern "C" fn kernel_switch_context(sp: *mut u8) -> *mut u8 {
    let Some(kernel) = installed_kernel() else {
        pw_assert::panic!("context switch before kernel start");
    };
    kernel.scheduler.switch_context(SavedStackPointer(sp)).0
}

// Scratch process stack for the boot context's first (discarded) save.
static mut BOOT_PROCESS_STACK: [u64; 8] = [0; 8];

pub fn start_first_thread() -> ! {
    let top = addr_of_mut!(BOOT_PROCESS_STACK).cast::<u8>().wrapping_add(64);
    // SAFETY: the scratch stack is only ever written by the first PendSV.
    unsafe {
        cortex_m::register::psp::write(top as u32);
    }
    SCB::set_pendsv();
    // SAFETY: the scheduler is ready to dispatch.
    unsafe {
        cortex_m::interrupt::enable();
    }
    cortex_m::asm::isb();

    // PendSV switches away from here and never comes back.
    loop {
        cortex_m::asm::wfi();
    }
}
