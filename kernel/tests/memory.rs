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

use kernel::{
    AccessPermission, MemoryRegion, MemoryRegionType, MpuRegion, PageAllocator, PageArena,
    Process,
};

const ALL_TYPES: [MemoryRegionType; 5] = [
    MemoryRegionType::ReadOnlyData,
    MemoryRegionType::ReadWriteData,
    MemoryRegionType::ReadOnlyExecutable,
    MemoryRegionType::ReadWriteExecutable,
    MemoryRegionType::Device,
];

#[test]
fn region_type_permissions() -> unittest::Result<()> {
    // (readable, writeable, executable, device)
    let expected = [
        (true, false, false, false),
        (true, true, false, false),
        (true, false, true, false),
        (true, true, true, false),
        (true, true, false, true),
    ];
    for (ty, (r, w, x, d)) in ALL_TYPES.into_iter().zip(expected) {
        unittest::assert_eq!(ty.is_readable(), r);
        unittest::assert_eq!(ty.is_writeable(), w);
        unittest::assert_eq!(ty.is_executable(), x);
        unittest::assert_eq!(ty.is_device(), d);
    }
    Ok(())
}

#[test]
fn region_type_access_is_a_subset_check() -> unittest::Result<()> {
    for held in ALL_TYPES {
        for requested in ALL_TYPES {
            let subset = (!requested.is_writeable() || held.is_writeable())
                && (!requested.is_executable() || held.is_executable())
                && (!requested.is_device() || held.is_device());
            unittest::assert_eq!(held.has_access(requested), subset);
        }
    }
    Ok(())
}

#[test]
fn region_access_requires_containment() -> unittest::Result<()> {
    let outer = MemoryRegion::new(MemoryRegionType::ReadWriteData, 0x2000_0000, 0x2000_1000);
    let inner = |start, end| MemoryRegion::new(MemoryRegionType::ReadOnlyData, start, end);

    unittest::assert_true!(outer.has_access(&inner(0x2000_0000, 0x2000_1000)));
    unittest::assert_true!(outer.has_access(&inner(0x2000_0400, 0x2000_0800)));
    unittest::assert_false!(outer.has_access(&inner(0x1fff_ffff, 0x2000_0800)));
    unittest::assert_false!(outer.has_access(&inner(0x2000_0800, 0x2000_1001)));
    unittest::assert_false!(outer.has_access(&inner(0x1fff_0000, 0x2000_2000)));

    let executable = MemoryRegion::new(
        MemoryRegionType::ReadWriteExecutable,
        0x2000_0000,
        0x2000_0100,
    );
    unittest::assert_false!(outer.has_access(&executable));
    Ok(())
}

#[test]
fn page_ranges_make_valid_mpu_regions() -> unittest::Result<()> {
    let arena = &mut Box::leak(Box::new(PageArena::new())).0;
    let pages = PageAllocator::new(arena);

    for power in [8, 10, 12, 14] {
        let range = pages.allocate(power);
        unittest::assert_true!(range.is_ok());
        let range = range.unwrap();

        let region = Process::ram_region(&range);
        unittest::assert_true!(region.is_ok());
        let region = region.unwrap();
        unittest::assert_eq!(region.base(), range.base());
        unittest::assert_eq!(region.size_class(), power - 1);
        unittest::assert_eq!(region.access(), AccessPermission::FullAccess);
        unittest::assert_false!(region.is_executable());
        pages.deallocate(range);
    }

    // Below the MPU's 256 byte granule.
    let small = pages.allocate(7);
    unittest::assert_true!(small.is_ok());
    unittest::assert_true!(Process::ram_region(&small.unwrap()).is_err());
    Ok(())
}

#[test]
fn flash_region_is_executable_read_only() -> unittest::Result<()> {
    let region = Process::flash_region(0x1000_0000, 16);
    unittest::assert_true!(region.is_ok());
    let region: MpuRegion = region.unwrap();
    unittest::assert_true!(region.is_executable());
    unittest::assert_eq!(region.access(), AccessPermission::ReadOnly);

    unittest::assert_true!(Process::flash_region(0x1000_0100, 16).is_err());
    Ok(())
}
