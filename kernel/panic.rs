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

use core::panic::PanicInfo;

use pw_log::fatal;

use crate::arch::{Arch, ArchInterface};

#[panic_handler]
fn panic_handler(info: &PanicInfo) -> ! {
    match info.location() {
        Some(location) => fatal!(
            "panic at {}:{}:{}: {}",
            location.file(),
            location.line(),
            location.column(),
            info.message()
        ),
        None => fatal!("panic: {}", info.message()),
    }
    Arch::panic()
}
