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

use bitflags::bitflags;
use kernel_config::{KernelConfig, KernelConfigInterface};
use pw_status::{Error, Result};

pub mod page_allocator;

pub use page_allocator::{OwnedPageRange, PageAllocator, PageArena, PageRange};

const READABLE: usize = 1 << 0;
const WRITEABLE: usize = 1 << 1;
const EXECUTABLE: usize = 1 << 2;
const DEVICE: usize = 1 << 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum MemoryRegionType {
    /// Read Only, Non-Executable data.
    ReadOnlyData = READABLE,

    /// Mode Read/Write, Non-Executable data.
    ReadWriteData = READABLE | WRITEABLE,

    /// Mode Read Only, Executable data.
    ReadOnlyExecutable = READABLE | EXECUTABLE,

    /// Mode Read/Write, Executable data.
    ReadWriteExecutable = READABLE | WRITEABLE | EXECUTABLE,

    /// Device MMIO memory.
    Device = READABLE | WRITEABLE | DEVICE,
}

impl MemoryRegionType {
    #[must_use]
    pub fn has_access(&self, request: Self) -> bool {
        let request_bits = request as usize;
        let self_bits = *self as usize;
        request_bits & self_bits == request_bits
    }

    #[must_use]
    const fn is_mask_set(&self, mask: usize) -> bool {
        *self as usize & mask == mask
    }

    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.is_mask_set(READABLE)
    }

    #[must_use]
    pub const fn is_writeable(&self) -> bool {
        self.is_mask_set(WRITEABLE)
    }

    #[must_use]
    pub const fn is_executable(&self) -> bool {
        self.is_mask_set(EXECUTABLE)
    }

    #[must_use]
    pub const fn is_device(&self) -> bool {
        self.is_mask_set(DEVICE)
    }
}

/// Architecture independent memory region description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub ty: MemoryRegionType,

    /// Start address of the memory region (inclusive)
    pub start: usize,

    /// End address of the memory region (exclusive)
    pub end: usize,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(ty: MemoryRegionType, start: usize, end: usize) -> Self {
        Self { ty, start, end }
    }

    /// Region covering a page range.
    #[must_use]
    pub fn from_page_range(ty: MemoryRegionType, range: &PageRange) -> Self {
        Self::new(ty, range.base(), range.end())
    }

    #[must_use]
    pub fn has_access(&self, region: &Self) -> bool {
        if !(self.start..self.end).contains(&region.start)
            || !(self.start..self.end).contains(&(region.end - 1))
        {
            return false;
        }

        self.ty.has_access(region.ty)
    }
}

/// `AP` field of an ARMv6-M region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AccessPermission {
    NoAccess = 0b000,
    PrivilegedReadWrite = 0b001,
    UnprivilegedReadOnly = 0b010,
    FullAccess = 0b011,
    PrivilegedReadOnly = 0b101,
    ReadOnly = 0b111,
}

bitflags! {
    /// Memory type bits of `MPU_RASR` (TEX is always 0).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RegionAttributes: u32 {
        const BUFFERABLE = 1 << 16;
        const CACHEABLE = 1 << 17;
        const SHAREABLE = 1 << 18;
    }
}

impl RegionAttributes {
    /// Normal write-back SRAM and flash.
    pub const NORMAL: Self = Self::SHAREABLE
        .union(Self::CACHEABLE)
        .union(Self::BUFFERABLE);

    /// Shareable device memory.
    pub const DEVICE: Self = Self::SHAREABLE.union(Self::BUFFERABLE);
}

const RASR_ENABLE: u32 = 1 << 0;
const RASR_SIZE_SHIFT: u32 = 1;
const RASR_AP_SHIFT: u32 = 24;
const RASR_XN: u32 = 1 << 28;

/// ARMv6-M regions span `2^8` to `2^32` bytes.
pub const MIN_REGION_POWER: u8 = 8;
pub const MAX_REGION_POWER: u8 = 32;

/// One ARMv6-M MPU region.
///
/// The constructors enforce the hardware's rules (power of two size of at
/// least 256 bytes, base aligned to the size), so a descriptor that exists
/// can always be loaded without faulting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MpuRegion {
    base: usize,
    size_class: u8,
    access: AccessPermission,
    executable: bool,
    attributes: RegionAttributes,
}

impl MpuRegion {
    pub fn new(
        base: usize,
        power: u8,
        access: AccessPermission,
        executable: bool,
        attributes: RegionAttributes,
    ) -> Result<Self> {
        if !(MIN_REGION_POWER..=MAX_REGION_POWER).contains(&power) {
            return Err(Error::InvalidArgument);
        }
        let size = 1u128 << power;
        if base as u128 % size != 0 || base as u128 + size > usize::MAX as u128 + 1 {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            base,
            size_class: power - 1,
            access,
            executable,
            attributes,
        })
    }

    /// Region with the permissions `region.ty` calls for.
    pub fn from_memory_region(region: &MemoryRegion) -> Result<Self> {
        let size = region.end.checked_sub(region.start).ok_or(Error::InvalidArgument)?;
        if !size.is_power_of_two() {
            return Err(Error::InvalidArgument);
        }
        let access = if region.ty.is_writeable() {
            AccessPermission::FullAccess
        } else {
            AccessPermission::ReadOnly
        };
        let attributes = if region.ty.is_device() {
            RegionAttributes::DEVICE
        } else {
            RegionAttributes::NORMAL
        };
        Self::new(
            region.start,
            size.trailing_zeros() as u8,
            access,
            region.ty.is_executable(),
            attributes,
        )
    }

    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Size is `2^(size_class + 1)` bytes.
    #[must_use]
    pub const fn size_class(&self) -> u8 {
        self.size_class
    }

    #[must_use]
    pub const fn access(&self) -> AccessPermission {
        self.access
    }

    #[must_use]
    pub const fn is_executable(&self) -> bool {
        self.executable
    }

    /// `MPU_RBAR` value, without the VALID and REGION fields.
    #[must_use]
    pub const fn rbar(&self) -> u32 {
        self.base as u32 & !((1 << MIN_REGION_POWER) - 1)
    }

    /// `MPU_RASR` value with the region enabled.
    #[must_use]
    pub const fn rasr(&self) -> u32 {
        let xn = if self.executable { 0 } else { RASR_XN };
        xn | (self.access as u32) << RASR_AP_SHIFT
            | self.attributes.bits()
            | (self.size_class as u32) << RASR_SIZE_SHIFT
            | RASR_ENABLE
    }
}

const MAX_REGIONS: usize = KernelConfig::MAX_THREAD_REGIONS;

/// The protection regions of one thread, loaded in order on every switch.
pub struct RegionList {
    regions: [Option<MpuRegion>; MAX_REGIONS],
    len: usize,
}

impl RegionList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: [None; MAX_REGIONS],
            len: 0,
        }
    }

    pub fn push(&mut self, region: MpuRegion) -> Result<()> {
        let slot = self.regions.get_mut(self.len).ok_or(Error::ResourceExhausted)?;
        *slot = Some(region);
        self.len += 1;
        Ok(())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &MpuRegion> {
        self.regions.iter().flatten()
    }
}

impl Default for RegionList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_region_is_read_write_no_execute() -> unittest::Result<()> {
        let region = MpuRegion::from_memory_region(&MemoryRegion::new(
            MemoryRegionType::ReadWriteData,
            0x2000_0400,
            0x2000_0800,
        ));
        unittest::assert_true!(region.is_ok());
        let region = region.unwrap();

        unittest::assert_eq!(region.base(), 0x2000_0400);
        unittest::assert_eq!(region.size_class(), 9);
        unittest::assert_eq!(region.access(), AccessPermission::FullAccess);
        unittest::assert_false!(region.is_executable());
        unittest::assert_eq!(region.rbar(), 0x2000_0400);
        unittest::assert_eq!(
            region.rasr(),
            RASR_XN | 0b011 << 24 | RegionAttributes::NORMAL.bits() | 9 << 1 | 1
        );
        Ok(())
    }

    #[test]
    fn flash_region_is_read_only_executable() -> unittest::Result<()> {
        let region = MpuRegion::new(
            0x1000_0000,
            21,
            AccessPermission::ReadOnly,
            true,
            RegionAttributes::NORMAL,
        );
        unittest::assert_true!(region.is_ok());
        let rasr = region.unwrap().rasr();
        unittest::assert_eq!(rasr & RASR_XN, 0);
        unittest::assert_eq!((rasr >> 24) & 0b111, 0b111);
        unittest::assert_eq!((rasr >> 1) & 0b1_1111, 20);
        Ok(())
    }

    #[test]
    fn misaligned_or_undersized_regions_are_rejected() -> unittest::Result<()> {
        let too_small = MpuRegion::new(
            0x2000_0000,
            7,
            AccessPermission::FullAccess,
            false,
            RegionAttributes::NORMAL,
        );
        unittest::assert_eq!(too_small, Err(Error::InvalidArgument));

        let misaligned = MpuRegion::new(
            0x2000_0100,
            10,
            AccessPermission::FullAccess,
            false,
            RegionAttributes::NORMAL,
        );
        unittest::assert_eq!(misaligned, Err(Error::InvalidArgument));

        let not_power_of_two = MpuRegion::from_memory_region(&MemoryRegion::new(
            MemoryRegionType::ReadWriteData,
            0x2000_0000,
            0x2000_0300,
        ));
        unittest::assert_eq!(not_power_of_two, Err(Error::InvalidArgument));

        let inverted = MpuRegion::from_memory_region(&MemoryRegion::new(
            MemoryRegionType::ReadWriteData,
            0x2000_0400,
            0x2000_0000,
        ));
        unittest::assert_eq!(inverted, Err(Error::InvalidArgument));
        Ok(())
    }

    #[test]
    fn region_list_is_bounded() -> unittest::Result<()> {
        let mut list = RegionList::new();
        let region = MpuRegion::new(
            0x2000_0000,
            8,
            AccessPermission::FullAccess,
            false,
            RegionAttributes::NORMAL,
        );
        unittest::assert_true!(region.is_ok());
        let region = region.unwrap();
        for _ in 0..MAX_REGIONS {
            unittest::assert_eq!(list.push(region), Ok(()));
        }
        unittest::assert_eq!(list.push(region), Err(Error::ResourceExhausted));
        unittest::assert_eq!(list.iter().count(), MAX_REGIONS);
        Ok(())
    }
}
