// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! How messages reach services.
//!
//! Two strategies exist, and a system is built with exactly one of them:
//!
//! - [`Sfn`]: the service function is called directly on the client's stack,
//!   and its return value is the reply.
//! - [`Ipc`]: every partition has a thread; messages are queued on the target
//!   and the client sleeps until the service replies explicitly.

use crate::hal::Platform;
use crate::handle::ConnRef;
use crate::spm::Spm;

mod ipc;
mod sfn;

pub use ipc::Ipc;
pub use sfn::Sfn;

/// Returned from `messaging` when the client has been put to sleep and a
/// context switch must happen before it sees a real status. Never reaches a
/// partition.
pub const STATUS_NEED_SCHEDULE: i32 = 0x7FFF_FFFF;

pub trait Backend: Sized {
    /// Prepares partition `index` after it has been loaded and bound.
    /// `services` is the union of its services' signals.
    fn comp_init<P: Platform>(spm: &mut Spm<P, Self>, index: usize, services: u32);

    /// Brings the system up once every partition is loaded.
    fn system_run<P: Platform>(spm: &mut Spm<P, Self>) -> u32;

    /// Delivers the message in record `conn` to its service.
    fn messaging<P: Platform>(spm: &mut Spm<P, Self>, conn: ConnRef) -> i32;

    /// Completes the message in record `conn`, handing `status` back to the
    /// client. Returns what the replying service sees.
    fn replying<P: Platform>(
        spm: &mut Spm<P, Self>,
        conn: ConnRef,
        status: i32,
    ) -> i32;
}
