// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces the SPM consumes from the platform.
//!
//! The SPM doesn't program the MPU, save registers, or run a thread scheduler
//! itself. It asks for those services through the traits here, and a platform
//! hands it a single value implementing all of them (see [`Platform`]).

use abi::BoundaryToken;

use crate::descs::PartitionDesc;
use crate::err::HalError;

bitflags::bitflags! {
    /// Access being asked for in a memory check.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct AccessAttr: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        /// Caller runs unprivileged.
        const UNPRIV = 1 << 2;
        /// Caller is in the non-secure world.
        const NS = 1 << 3;
    }
}

/// Hardware isolation control.
pub trait Isolation {
    /// Works out the isolation configuration for a partition. Called once per
    /// partition at boot.
    fn bind_boundaries(
        &mut self,
        desc: &PartitionDesc,
    ) -> Result<BoundaryToken, HalError>;

    /// Makes `token` the live configuration. Must tolerate being asked for
    /// the configuration that is already live.
    fn update_boundaries(
        &mut self,
        desc: &PartitionDesc,
        token: BoundaryToken,
    ) -> Result<(), HalError>;

    /// Checks that `[base, base + len)` may be accessed as `attr` describes.
    fn memory_has_access(
        &self,
        base: u32,
        len: u32,
        attr: AccessAttr,
    ) -> Result<(), HalError>;
}

/// Access to memory named by client addresses. Callers check access with
/// [`Isolation::memory_has_access`] first.
pub trait ClientMemory {
    fn read(&self, addr: u32, buf: &mut [u8]);
    fn write(&mut self, addr: u32, data: &[u8]);
}

/// Names a thread. On hardware this is the address of the thread's context
/// control block, which is what the context switch trampoline consumes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct ThreadId(pub u32);

/// Stack bookkeeping for a thread.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ContextCtrl {
    pub sp: u32,
    pub sp_limit: u32,
}

impl ContextCtrl {
    /// Context for an empty stack of `size` bytes starting at `base`.
    pub fn for_stack(base: u32, size: u32) -> Self {
        Self {
            sp: base.wrapping_add(size),
            sp_limit: base,
        }
    }
}

/// Everything needed to start a thread.
#[derive(Copy, Clone, Debug)]
pub struct ThreadSpec {
    pub ctx: ContextCtrl,
    pub priority: u8,
    pub entry: u32,
    /// Index of the partition the thread runs for.
    pub owner: usize,
}

/// The cooperative thread layer.
pub trait Threads {
    /// Thread currently holding the CPU, if the scheduler has started.
    fn current(&self) -> Option<ThreadId>;
    /// Thread the scheduler would run next.
    fn next(&self) -> Option<ThreadId>;
    /// Makes `thread` current.
    fn commit(&mut self, thread: ThreadId);
    fn context(&self, thread: ThreadId) -> ContextCtrl;
    /// Partition index given when `thread` was started.
    fn owner(&self, thread: ThreadId) -> usize;
    /// Scheduler lock is held; no switches allowed.
    fn is_locked(&self) -> bool;

    fn start(&mut self, spec: ThreadSpec) -> ThreadId;
    /// Hands the CPU to the highest priority runnable thread.
    fn start_scheduler(&mut self) -> u32;

    fn block(&mut self, thread: ThreadId);
    /// Makes `thread` runnable again, with `retval` as the result of the call
    /// it blocked in.
    fn wake(&mut self, thread: ThreadId, retval: u32);
    fn is_blocked(&self, thread: ThreadId) -> bool;
    /// A switch has been made necessary since the last schedule.
    fn expecting_schedule(&self) -> bool;
}

/// Odds and ends of the processor.
pub trait Cpu {
    /// Current process stack pointer.
    fn psp(&self) -> u32;
    /// Forces any lazily-stacked floating point state out.
    fn flush_fp_context(&mut self);
    /// Asks for a context switch at the next opportunity.
    fn trigger_pendsv(&mut self) -> u32;
}

/// All the platform services the SPM uses, in one bound.
pub trait Platform: Isolation + ClientMemory + Threads + Cpu {}

impl<T: Isolation + ClientMemory + Threads + Cpu> Platform for T {}
