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

use cortex_m::peripheral::MPU;
use kernel_config::{CortexMKernelConfigInterface, KernelConfig};
use pw_log::info;

use crate::memory::RegionList;

const MPU_CTRL_ENABLE: u32 = 1 << 0;
// Privileged accesses outside every region fall back to the default map.
// Threads run privileged, so a thread's regions only narrow the access and
// execute rights of the memory they cover.  Addresses outside them are not
// isolated.
const MPU_CTRL_PRIVDEFENA: u32 = 1 << 2;

pub fn init(mpu: &mut MPU) {
    let regions = (mpu._type.read() >> 8) & 0xff;
    info!("MPU regions: {}", regions);
    pw_assert::assert!(regions as usize >= KernelConfig::NUM_MPU_REGIONS);

    // SAFETY: all regions are disabled before the MPU is turned on.
    unsafe {
        for region in 0..KernelConfig::NUM_MPU_REGIONS {
            mpu.rnr.write(region as u32);
            mpu.rasr.write(0);
        }
        mpu.ctrl.write(MPU_CTRL_ENABLE | MPU_CTRL_PRIVDEFENA);
    }
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

/// Program the regions of the thread about to run.  Slots past the end of
/// `regions` are disabled.  Called from the switch handler.
pub fn configure(regions: &RegionList) {
    // SAFETY: only the switch handler and `init` touch the MPU, and they
    // never run concurrently.
    let mpu = unsafe { &*MPU::PTR };
    let mut programmed = regions.iter();
    for slot in 0..KernelConfig::NUM_MPU_REGIONS {
        // SAFETY: the switch handler runs on the main stack with the
        // default map, and the barriers below complete the update before
        // the next thread resumes.
        unsafe {
            mpu.rnr.write(slot as u32);
            match programmed.next() {
                Some(region) => {
                    mpu.rbar.write(region.rbar());
                    mpu.rasr.write(region.rasr());
                }
                None => mpu.rasr.write(0),
            }
        }
    }
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}
