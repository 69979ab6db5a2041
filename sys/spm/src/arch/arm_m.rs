// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ARMv8-M support.
//!
//! The SPM never switches context itself. `do_schedule` runs from the PendSV
//! handler, which saves the outgoing thread's callee-saved registers, asks
//! for the pair of contexts to switch between, and restores the incoming one.
//! What lives here is the small amount of processor state the SPM logic needs
//! to read or poke on the way: the process stack pointer, the lazy FP state,
//! the PendSV pend bit, and the MPU.

use crate::hal::{ClientMemory, Cpu};
use crate::isolation::{Mpu, MpuRegion};

macro_rules! uassert {
    ($cond : expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

/// Bytes the exception entry sequence pushes below the saved stack pointer,
/// in addition to the basic frame: the integrity signature plus r4-r11.
pub const ADDITIONAL_CONTEXT_SIZE: u32 = 40;

/// Processor registers used by the scheduler glue.
pub struct CortexM {
    _private: (),
}

impl CortexM {
    /// # Safety
    ///
    /// There must be only one of these. It assumes it is the only code pending
    /// PendSV and reading the process stack pointer on the SPM's behalf.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Cpu for CortexM {
    fn psp(&self) -> u32 {
        cortex_m::register::psp::read()
    }

    fn flush_fp_context(&mut self) {
        // Any FP instruction forces lazily-stacked state out to the frame the
        // hardware reserved for it.
        #[cfg(target_abi = "eabihf")]
        unsafe {
            core::arch::asm!("vmov.f32 s0, s0", options(nomem, nostack));
        }
    }

    fn trigger_pendsv(&mut self) -> u32 {
        // PendSV happens after the current handler (and any chained ones)
        // returns, and performs the switch.
        cortex_m::peripheral::SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
        0
    }
}

/// Client memory accessed in place. Every address handed to this has been
/// through the isolation HAL's access check first.
pub struct DirectMemory {
    _private: (),
}

impl DirectMemory {
    /// # Safety
    ///
    /// Callers of `read` and `write` must have checked the client's access to
    /// the addresses they pass.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl ClientMemory for DirectMemory {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        // Safety: access has been checked by the caller (see `new`), and the
        // SPM never hands out its own memory as a client buffer.
        unsafe {
            core::ptr::copy_nonoverlapping(
                addr as usize as *const u8,
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
    }

    fn write(&mut self, addr: u32, data: &[u8]) {
        // Safety: as for `read`.
        unsafe {
            core::ptr::copy_nonoverlapping(
                data.as_ptr(),
                addr as usize as *mut u8,
                data.len(),
            );
        }
    }
}

/// The processor's own MPU and thread-mode privilege control.
pub struct ArmMpu {
    _private: (),
}

impl ArmMpu {
    /// # Safety
    ///
    /// There must be only one of these, and nothing else may program the MPU.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(armv8m)]
impl Mpu for ArmMpu {
    fn set_privileged(&mut self, privileged: bool) {
        let mut control = cortex_m::register::control::read();
        control.set_npriv(if privileged {
            cortex_m::register::control::Npriv::Privileged
        } else {
            cortex_m::register::control::Npriv::Unprivileged
        });
        // Safety: only thread mode privilege changes, and we are in handler
        // mode.
        unsafe {
            cortex_m::register::control::write(control);
        }
        cortex_m::asm::isb();
    }

    fn enable_region(&mut self, index: usize, region: MpuRegion) {
        let mpu = unsafe {
            // At least by not taking a &mut we're confident we're not
            // violating aliasing....
            &*cortex_m::peripheral::MPU::PTR
        };

        // AP: 0b01 RW at any privilege, 0b11 RO at any privilege.
        let ap = if region.writable { 0b01 } else { 0b11 };
        let xn = 1;
        let rbar = (region.base & !0x1F) | ap << 1 | xn;
        // Attribute index 0 is normal memory, 1 is device.
        let attr_idx = u32::from(region.device);
        let rlar = ((region.limit - 1) & !0x1F) | attr_idx << 1 | 1;

        // Safety: we're loading regions computed from the partition's own
        // descriptors, with the MPU disabled for the duration.
        unsafe {
            mpu.ctrl.write(0);
            mpu.rnr.write(index as u32);
            mpu.rbar.write(rbar);
            mpu.rlar.write(rlar);
            // PRIVDEFENA | ENABLE
            mpu.ctrl.write(0b101);
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn disable_region(&mut self, index: usize) {
        let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };
        // Safety: clearing a region's enable bit only removes access.
        unsafe {
            mpu.rnr.write(index as u32);
            mpu.rlar.write(0);
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}
