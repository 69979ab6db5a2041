// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use abi::{BoundaryToken, Handle, Sid};

use crate::err::Fault;

/// Events recorded in the SPM's trace ring. Partitions are named by id.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Loaded { pid: i32 },
    Bound { pid: i32, token: BoundaryToken },
    Inited { pid: i32 },
    InitFailed { pid: i32, status: i32 },
    Connect { sid: Sid, client_id: i32 },
    Call { handle: Handle, ty: i32 },
    Close { handle: Handle },
    Reply { handle: Handle, status: i32 },
    NoHandles { sid: Sid },
    ProgrammerError { pid: i32, status: i32 },
    Faulted { pid: i32, fault: Fault },
    Signal { pid: i32, signal: u32 },
    Switch { from: i32, to: i32 },
    PendSv,
}
