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

use cortex_m::peripheral::SYST;
use cortex_m::peripheral::syst::SystClkSource;
use kernel_config::{CortexMKernelConfigInterface, KernelConfig};
use pw_log::info;

use super::installed_kernel;

pub fn systick_init(syst: &mut SYST) {
    info!("starting systick, reload {}", KernelConfig::SYSTICK_RELOAD);

    syst.disable_counter();
    syst.disable_interrupt();
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(KernelConfig::SYSTICK_RELOAD);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();
}

#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn SysTick() {
    if let Some(kernel) = installed_kernel() {
        kernel.scheduler.tick();
    }
}
