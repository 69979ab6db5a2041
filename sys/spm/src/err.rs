// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Errors come in three weights:
//!
//! - `SpmError`: a check failed on behalf of a client. Recoverable; turned
//!   into a status code at the call surface.
//! - `Fault`: a partition broke the rules badly enough that it may not run
//!   again. Applied with `Spm::force_fault`.
//! - Anything suggesting the SPM's own state is corrupt panics, taking the
//!   whole system down.

use abi::status;

/// A recoverable failure inside the SPM.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SpmError {
    /// Generic refusal: unknown handle, wrong owner, not authorized.
    Generic,
    /// Requested version not acceptable to the service.
    Version,
    /// Null buffer with non-zero length.
    BadParameters,
    /// Buffer not accessible to the caller, or wraps the address space.
    MemoryCheck,
    /// Connection pool exhausted.
    Exhausted,
}

impl From<SpmError> for i32 {
    fn from(e: SpmError) -> Self {
        match e {
            SpmError::Exhausted => status::CONNECTION_BUSY,
            SpmError::Generic | SpmError::Version => {
                status::CONNECTION_REFUSED
            }
            SpmError::BadParameters | SpmError::MemoryCheck => {
                status::PROGRAMMER_ERROR
            }
        }
    }
}

/// Why a partition was stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// A programmer error was returned to a secure caller.
    ProgrammerError,
    /// The partition's init routine failed.
    InitFailed(i32),
    /// A message handle that doesn't name a live message owned by the caller.
    BadMessageHandle,
    /// A partition-side call on a message of the wrong type.
    WrongMessageType,
    /// Vector index out of range.
    BadVectorIndex,
    /// Write past the declared capacity of an output vector.
    OutputOverflow,
    /// A buffer of the partition's own that it may not access as asked.
    BadBuffer,
    /// Map/unmap sequence violated, or mapping not permitted by the service.
    BadMapping,
    /// Signal not allowed for this partition, or not a single signal.
    BadSignal,
    /// Asked for a signal that isn't asserted.
    SignalNotAsserted,
    /// Service replied to a connect with a status it may not use.
    BadReply(i32),
    /// `set_rhandle` on a stateless service.
    StatelessRhandle,
    /// `notify` named a partition that doesn't exist.
    NoSuchPartition(i32),
    /// The partition called `panic`.
    Panicked,
    /// Cross-call to an unknown API number.
    UnknownApi(u32),
}

/// Failure reported by an isolation HAL.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HalError {
    Generic,
    /// Access check failed.
    NotPermitted,
    /// A partition asked for a peripheral the platform doesn't allow, or for
    /// more than the boundary encoding can hold.
    BadAsset,
}
