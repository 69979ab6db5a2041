// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A region-table isolation HAL for MPU-based platforms.
//!
//! The platform supplies two static tables: the memory map, describing what
//! may be touched by whom, and the list of peripherals partitions are allowed
//! to ask for by name. Binding a partition packs everything its boundary needs
//! into the token itself:
//!
//! ```text
//!  31      24 23    21 20   17 16   13 12    9 8     5 4     1   0
//! +----------+--------+-------+-------+-------+-------+-------+-----+
//! |  index   |   0    | mmio4 | mmio3 | mmio2 | mmio1 | mmio0 | priv|
//! +----------+--------+-------+-------+-------+-------+-------+-----+
//! ```
//!
//! Each MMIO nibble holds a one-based index into the peripheral list in its
//! low three bits and the read-write flag in bit 3. A zero nibble ends the
//! list. The top byte makes every binding's token distinct, so two partitions
//! with the same attributes still get different tokens.
//!
//! Switching boundaries reprograms the MPU from the token and the partition's
//! memory assets. Privileged partitions run with the default map and no
//! regions.

use abi::BoundaryToken;
use spmcore::{covers, MemoryRegion, Span};

use crate::descs::{Asset, PartitionDesc};
use crate::err::HalError;
use crate::hal::{AccessAttr, Isolation};

/// Number of MPU regions available to partitions.
pub const REGION_COUNT: usize = 8;

const PRIV_BIT: u32 = 1 << 0;
const MMIO_SHIFT: u32 = 1;
const MMIO_BITS: u32 = 4;
const MMIO_SLOTS: usize = 5;
const MMIO_INDEX_MASK: u32 = 0b0111;
const MMIO_RW: u32 = 0b1000;
const INDEX_SHIFT: u32 = 24;
const MAX_BINDINGS: u32 = 0xFF;

/// One MPU region, as the isolation layer wants it programmed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MpuRegion {
    pub base: u32,
    /// First byte past the region.
    pub limit: u32,
    pub writable: bool,
    /// Device memory rather than normal memory.
    pub device: bool,
}

/// Control over the memory protection unit and thread privilege.
pub trait Mpu {
    fn set_privileged(&mut self, privileged: bool);
    fn enable_region(&mut self, index: usize, region: MpuRegion);
    fn disable_region(&mut self, index: usize);
}

/// A peripheral partitions may ask for by name.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MmioDevice {
    pub id: u32,
    pub base: u32,
    pub limit: u32,
}

bitflags::bitflags! {
    /// Who may do what to a memory map entry.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct RegionAttr: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Accessible from unprivileged code.
        const UNPRIV = 1 << 2;
        /// Belongs to the non-secure world.
        const NS = 1 << 3;
    }
}

/// An entry of the platform memory map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AccessRegion {
    pub base: u32,
    pub limit: u32,
    pub attr: RegionAttr,
}

impl MemoryRegion for AccessRegion {
    fn base(&self) -> u32 {
        self.base
    }

    fn end(&self) -> u64 {
        u64::from(self.limit)
    }
}

impl AccessRegion {
    /// Checks whether this entry allows the access described by `want`.
    fn allows(&self, want: AccessAttr) -> bool {
        let ns = self.attr.contains(RegionAttr::NS);
        if ns != want.contains(AccessAttr::NS) {
            return false;
        }
        let mut need = RegionAttr::empty();
        if want.contains(AccessAttr::READABLE) {
            need |= RegionAttr::READ;
        }
        if want.contains(AccessAttr::WRITABLE) {
            need |= RegionAttr::WRITE;
        }
        if want.contains(AccessAttr::UNPRIV) {
            need |= RegionAttr::UNPRIV;
        }
        self.attr.contains(need)
    }
}

pub struct ReferenceIsolation<M> {
    mpu: M,
    mmio: &'static [MmioDevice],
    map: &'static [AccessRegion],
    bindings: u32,
    /// Token most recently made live.
    live: Option<BoundaryToken>,
}

impl<M: Mpu> ReferenceIsolation<M> {
    /// Creates the HAL. `map` must be sorted by address, without overlaps.
    pub fn new(
        mpu: M,
        mmio: &'static [MmioDevice],
        map: &'static [AccessRegion],
    ) -> Self {
        uassert!(map
            .windows(2)
            .all(|w| u64::from(w[1].base) >= w[0].end()));
        Self {
            mpu,
            mmio,
            map,
            bindings: 0,
            live: None,
        }
    }

    pub fn mpu(&self) -> &M {
        &self.mpu
    }

    /// Regions needed by an unprivileged partition holding `token`.
    fn regions(
        &self,
        desc: &PartitionDesc,
        token: BoundaryToken,
    ) -> Result<heapless::Vec<MpuRegion, REGION_COUNT>, HalError> {
        let mut out = heapless::Vec::new();

        for asset in desc.assets {
            if let Asset::Memory { start, limit } = *asset {
                out.push(MpuRegion {
                    base: start,
                    limit,
                    writable: true,
                    device: false,
                })
                .map_err(|_| HalError::BadAsset)?;
            }
        }

        for slot in 0..MMIO_SLOTS {
            let nibble = token.0 >> (MMIO_SHIFT + slot as u32 * MMIO_BITS)
                & (MMIO_INDEX_MASK | MMIO_RW);
            let index = nibble & MMIO_INDEX_MASK;
            if index == 0 {
                break;
            }
            let dev = self
                .mmio
                .get(index as usize - 1)
                .ok_or(HalError::BadAsset)?;
            out.push(MpuRegion {
                base: dev.base,
                limit: dev.limit,
                writable: nibble & MMIO_RW != 0,
                device: true,
            })
            .map_err(|_| HalError::BadAsset)?;
        }

        Ok(out)
    }
}

impl<M: Mpu> Isolation for ReferenceIsolation<M> {
    fn bind_boundaries(
        &mut self,
        desc: &PartitionDesc,
    ) -> Result<BoundaryToken, HalError> {
        if self.bindings > MAX_BINDINGS {
            return Err(HalError::Generic);
        }

        let mut token = 0;
        if desc.is_privileged() {
            token |= PRIV_BIT;
        }

        let devices = desc.assets.iter().filter_map(|a| match *a {
            Asset::NamedMmio { device, writable } => Some((device, writable)),
            Asset::Memory { .. } => None,
        });
        for (slot, (device, writable)) in devices.enumerate() {
            if slot >= MMIO_SLOTS {
                return Err(HalError::BadAsset);
            }
            let Some(pos) = self.mmio.iter().position(|d| d.id == device)
            else {
                return Err(HalError::BadAsset);
            };
            let index = pos as u32 + 1;
            if index > MMIO_INDEX_MASK {
                return Err(HalError::BadAsset);
            }

            let mut nibble = index;
            if writable {
                nibble |= MMIO_RW;
            }
            token |= nibble << (MMIO_SHIFT + slot as u32 * MMIO_BITS);
        }

        token |= self.bindings << INDEX_SHIFT;
        self.bindings += 1;
        Ok(BoundaryToken(token))
    }

    fn update_boundaries(
        &mut self,
        desc: &PartitionDesc,
        token: BoundaryToken,
    ) -> Result<(), HalError> {
        if self.live == Some(token) {
            return Ok(());
        }

        let privileged = token.0 & PRIV_BIT != 0;
        let regions = if privileged {
            heapless::Vec::new()
        } else {
            self.regions(desc, token)?
        };

        self.mpu.set_privileged(privileged);
        for (i, r) in regions.iter().enumerate() {
            self.mpu.enable_region(i, *r);
        }
        for i in regions.len()..REGION_COUNT {
            self.mpu.disable_region(i);
        }

        self.live = Some(token);
        Ok(())
    }

    fn memory_has_access(
        &self,
        base: u32,
        len: u32,
        attr: AccessAttr,
    ) -> Result<(), HalError> {
        if covers(Span { base, len }, self.map, |r| r.allows(attr)) {
            Ok(())
        } else {
            Err(HalError::NotPermitted)
        }
    }
}
