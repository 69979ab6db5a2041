// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SPM ABI definitions, shared between the partition manager and partitions.
//!
//! Everything in here either crosses the isolation boundary (status codes,
//! handles, message records, I/O vectors) or is baked into the static
//! partition tables produced by the loader (flag words, service ids).

#![cfg_attr(not(test), no_std)]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Version of the framework API implemented by the SPM.
pub const FRAMEWORK_VERSION: u32 = 0x0101;

/// Returned by a version query for a service that does not exist or cannot be
/// reached by the caller.
pub const VERSION_NONE: u32 = 0;

/// Maximum number of I/O vectors in a single request, counting inputs and
/// outputs together.
pub const MAX_IOVEC: usize = 4;

/// Message types. Request types are `>= IPC_CALL`.
pub const IPC_CONNECT: i32 = -1;
pub const IPC_CALL: i32 = 0;
pub const IPC_DISCONNECT: i32 = -2;

/// `wait` timeouts.
pub const BLOCK: u32 = 0x8000_0000;
pub const POLL: u32 = 0x0000_0000;

/// Signal mask accepting every signal.
pub const WAIT_ANY: u32 = 0xFFFF_FFFF;

/// Signal asserted by `notify`.
pub const DOORBELL: u32 = 1 << 3;

/// Partition id of the non-secure agent. Calls made while this partition is
/// running come from the non-secure world.
pub const NS_AGENT_ID: i32 = 0;

/// Partition id reported when no partition is running.
pub const INVALID_PARTITION_ID: i32 = -1;

/// Number of entries in the stateless service table; also bounds the index
/// field of a static handle.
pub const STATELESS_HANDLE_LIMIT: usize = 32;

/// Status codes returned across the call surface.
///
/// Non-negative values are success (some calls overload them to carry a
/// handle); everything else is an error.
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const PROGRAMMER_ERROR: i32 = -129;
    pub const CONNECTION_REFUSED: i32 = -130;
    pub const CONNECTION_BUSY: i32 = -131;
    pub const GENERIC_ERROR: i32 = -132;
    pub const NOT_PERMITTED: i32 = -133;
    pub const NOT_SUPPORTED: i32 = -134;
    pub const INVALID_ARGUMENT: i32 = -135;
    pub const INVALID_HANDLE: i32 = -136;
    pub const BAD_STATE: i32 = -137;
    pub const BUFFER_TOO_SMALL: i32 = -138;
    pub const DOES_NOT_EXIST: i32 = -140;
    pub const SERVICE_FAILURE: i32 = -144;
}

/// Identifies a service across the whole system.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
pub struct Sid(pub u32);

/// Checks whether `client_id` names a non-secure client.
///
/// Secure partitions are identified by their (non-negative) partition id;
/// non-secure clients always carry negative ids.
#[inline(always)]
pub const fn client_id_is_ns(client_id: i32) -> bool {
    client_id < 0
}

/// Opaque connection handle as seen by clients and services.
///
/// Two kinds of handle share this type:
///
/// - Handles issued by `connect`, which name a record in the SPM's connection
///   pool. These are always in `1..=Handle::USER_MAX`.
/// - Static handles naming a stateless service. These have bit 30 set, with
///   the service's index in the stateless table in bits 0-4 and the requested
///   version in bits 8-15.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct Handle(pub i32);

impl Handle {
    pub const NULL: Self = Self(0);

    /// Largest value a pool-backed handle may take. Everything above this has
    /// the static-handle indicator set.
    pub const USER_MAX: i32 = 0x3FFF_FFFF;

    const STATIC_INDICATOR: i32 = 1 << 30;
    const STATIC_INDEX_MASK: i32 = 0x1F;
    const STATIC_VERSION_SHIFT: u32 = 8;
    const STATIC_VERSION_MASK: i32 = 0xFF;

    /// Fabricates the static handle for stateless table entry `index`,
    /// requesting `version`.
    pub const fn for_static(index: u8, version: u8) -> Self {
        Self(
            Self::STATIC_INDICATOR
                | ((version as i32) << Self::STATIC_VERSION_SHIFT)
                | (index as i32 & Self::STATIC_INDEX_MASK),
        )
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    pub fn is_static(self) -> bool {
        self.0 > 0 && self.0 & Self::STATIC_INDICATOR != 0
    }

    /// Index into the stateless table. Only meaningful for static handles.
    pub fn static_index(self) -> usize {
        (self.0 & Self::STATIC_INDEX_MASK) as usize
    }

    /// Version requested by a static handle.
    pub fn static_version(self) -> u32 {
        ((self.0 >> Self::STATIC_VERSION_SHIFT) & Self::STATIC_VERSION_MASK)
            as u32
    }
}

/// A client buffer descriptor. The same layout is used for input and output
/// vectors; for outputs the SPM rewrites `len` with the number of bytes the
/// service actually produced.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct IoVec {
    pub base: u32,
    pub len: u32,
}

impl IoVec {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

/// The message record handed to a service.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct Msg {
    /// `IPC_CONNECT`, `IPC_DISCONNECT`, or a request type `>= IPC_CALL`.
    pub ty: i32,
    /// Handle the service uses to refer to this message.
    pub handle: Handle,
    pub client_id: i32,
    /// Reverse handle previously set by the service on this connection.
    pub rhandle: u32,
    /// Bytes remaining to be read from each input vector.
    pub in_size: [u32; MAX_IOVEC],
    /// Declared capacity of each output vector.
    pub out_size: [u32; MAX_IOVEC],
}

impl Msg {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn is_request(&self) -> bool {
        self.ty >= IPC_CALL
    }
}

/// Request type and vector counts, packed into the `call` control word.
///
/// Layout: bits 16-31 hold the (signed) request type, bits 8-15 the number of
/// input vectors, bits 0-7 the number of output vectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CallParams {
    pub ty: i32,
    pub in_len: usize,
    pub out_len: usize,
}

impl CallParams {
    const TYPE_SHIFT: u32 = 16;
    const IN_LEN_SHIFT: u32 = 8;
    const LEN_MASK: u32 = 0xFF;

    /// Packs the parameters. Counts are truncated to their 8-bit fields; the
    /// SPM range-checks them on the way back out.
    pub fn pack(self) -> u32 {
        ((self.ty as u32) << Self::TYPE_SHIFT)
            | ((self.in_len as u32 & Self::LEN_MASK) << Self::IN_LEN_SHIFT)
            | (self.out_len as u32 & Self::LEN_MASK)
    }

    pub fn unpack(ctrl: u32) -> Self {
        Self {
            ty: i32::from((ctrl >> Self::TYPE_SHIFT) as u16 as i16),
            in_len: ((ctrl >> Self::IN_LEN_SHIFT) & Self::LEN_MASK) as usize,
            out_len: (ctrl & Self::LEN_MASK) as usize,
        }
    }
}

bitflags::bitflags! {
    /// Static properties of a service.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct ServiceFlags: u32 {
        /// Service may be called from the non-secure world.
        const NS_ACCESSIBLE = 1 << 0;
        /// Service is connectionless and is reached through a static handle.
        const STATELESS = 1 << 1;
        /// Service may map client vectors directly instead of copying.
        const MM_IOVEC = 1 << 2;
    }
}

/// How a service compares the version requested by a client against the
/// version it publishes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum VersionPolicy {
    /// Accept any requested version up to the published one.
    Relaxed,
    /// Accept only the published version.
    Strict,
}

impl VersionPolicy {
    pub const RELAXED: u32 = 0;
    pub const STRICT: u32 = 1;
}

impl TryFrom<u32> for VersionPolicy {
    type Error = u32;

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            Self::RELAXED => Ok(Self::Relaxed),
            Self::STRICT => Ok(Self::Strict),
            _ => Err(x),
        }
    }
}

bitflags::bitflags! {
    /// Static properties of a partition.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct PartitionFlags: u32 {
        /// Partition runs privileged (PSA root of trust).
        const PSA_ROT = 1 << 0;
        /// Partition owns a thread and receives requests through its message
        /// queue, rather than being called directly.
        const IPC = 1 << 1;
        /// Partition is the agent for the non-secure world.
        const NS_AGENT = 1 << 2;
    }
}

/// Opaque value naming a bound isolation configuration. Produced once per
/// partition at boot and compared by value when switching partitions.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct BoundaryToken(pub u32);

/// Enumeration of cross-call API numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Api {
    FrameworkVersion = 0,
    Version = 1,
    Connect = 2,
    Call = 3,
    Close = 4,
    Wait = 5,
    Get = 6,
    Read = 7,
    Skip = 8,
    Write = 9,
    Reply = 10,
    SetRhandle = 11,
    Notify = 12,
    Clear = 13,
    MapInvec = 14,
    UnmapInvec = 15,
    MapOutvec = 16,
    UnmapOutvec = 17,
    Panic = 18,
}

impl core::convert::TryFrom<u32> for Api {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::FrameworkVersion),
            1 => Ok(Self::Version),
            2 => Ok(Self::Connect),
            3 => Ok(Self::Call),
            4 => Ok(Self::Close),
            5 => Ok(Self::Wait),
            6 => Ok(Self::Get),
            7 => Ok(Self::Read),
            8 => Ok(Self::Skip),
            9 => Ok(Self::Write),
            10 => Ok(Self::Reply),
            11 => Ok(Self::SetRhandle),
            12 => Ok(Self::Notify),
            13 => Ok(Self::Clear),
            14 => Ok(Self::MapInvec),
            15 => Ok(Self::UnmapInvec),
            16 => Ok(Self::MapOutvec),
            17 => Ok(Self::UnmapOutvec),
            18 => Ok(Self::Panic),
            _ => Err(()),
        }
    }
}

/// Argument frame of a cross call: four words in, the result back in `a0`.
/// The two trailing words are padding the trampoline keeps for stack
/// alignment.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct CrossCallFrame {
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub unused0: u32,
    pub unused1: u32,
}
