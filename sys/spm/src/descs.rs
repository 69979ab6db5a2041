// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static partition and service descriptors.
//!
//! These are produced by the image loader and never change at runtime; the
//! SPM builds its mutable state from them once, at boot.

use abi::{Msg, PartitionFlags, ServiceFlags, Sid};

use crate::interface::Psa;

/// Service function of a directly-called partition. Returns the status to
/// hand back to the client.
pub type ServiceFn = fn(&mut dyn Psa, &Msg) -> i32;

/// One-time initialization routine of a directly-called partition. A negative
/// return means the partition could not start.
pub type InitFn = fn(&mut dyn Psa) -> i32;

/// How a partition comes to life.
#[derive(Copy, Clone, Debug)]
pub enum Entry {
    /// Nothing to run before the first request.
    None,
    /// Run this once, lazily, before the partition's first service call.
    Init(InitFn),
    /// Start a thread at this address. Used by partitions that own a thread.
    Thread(u32),
}

/// Something a partition is allowed to touch besides its own stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Asset {
    /// Runtime memory, `[start, limit)`.
    Memory { start: u32, limit: u32 },
    /// A peripheral named by its platform id.
    NamedMmio { device: u32, writable: bool },
}

#[derive(Debug)]
pub struct PartitionDesc {
    /// Partition id. Also the client id of this partition's own calls.
    pub pid: i32,
    pub flags: PartitionFlags,
    /// Thread priority; numerically lower is more important.
    pub priority: u8,
    pub entry: Entry,
    pub stack_base: u32,
    pub stack_size: u32,
    /// Services this partition is allowed to call.
    pub deps: &'static [Sid],
    pub assets: &'static [Asset],
    pub services: &'static [ServiceDesc],
}

impl PartitionDesc {
    pub fn is_ipc(&self) -> bool {
        self.flags.contains(PartitionFlags::IPC)
    }

    pub fn is_privileged(&self) -> bool {
        self.flags.contains(PartitionFlags::PSA_ROT)
    }

    pub fn is_ns_agent(&self) -> bool {
        self.flags.contains(PartitionFlags::NS_AGENT)
    }

    pub fn depends_on(&self, sid: Sid) -> bool {
        self.deps.contains(&sid)
    }
}

#[derive(Debug)]
pub struct ServiceDesc {
    pub sid: Sid,
    /// Signal asserted on the owning partition when a message arrives.
    pub signal: u32,
    pub flags: ServiceFlags,
    pub version: u32,
    /// Raw version policy, see `abi::VersionPolicy`. Unknown values reject
    /// every client.
    pub version_policy: u32,
    /// Slot in the stateless table, for `STATELESS` services.
    pub stateless_index: u8,
    /// Entry point for directly-called partitions.
    pub sfn: Option<ServiceFn>,
}

impl ServiceDesc {
    pub fn is_stateless(&self) -> bool {
        self.flags.contains(ServiceFlags::STATELESS)
    }

    pub fn is_ns_accessible(&self) -> bool {
        self.flags.contains(ServiceFlags::NS_ACCESSIBLE)
    }

    pub fn allows_mm_iovec(&self) -> bool {
        self.flags.contains(ServiceFlags::MM_IOVEC)
    }
}
