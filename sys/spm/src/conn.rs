// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection records: the state of one client's conversation with one
//! service, and of the message currently in flight on it.

use abi::{Handle, IoVec, Msg, MAX_IOVEC};
use zerocopy::IntoBytes;

use crate::hal::ClientMemory;
use crate::sync::SyncObj;

/// Liveness tag of a record holding a message. Cleared before a record goes
/// back to the pool.
pub const MSG_MAGIC: u32 = 0x1515_4343;

/// Marks a message delivered by direct call rather than through a queue.
pub const SFN_MAGIC: u32 = 0x1515_4344;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ConnStatus {
    /// No request in flight.
    #[default]
    Idle,
    /// A request is being handled.
    Active,
    /// The service reported a programmer error to a non-secure client. Only
    /// `close` is useful from here.
    ConnectError,
}

bitflags::bitflags! {
    /// Progress of a service through one vector of a request.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct IovecStatus: u8 {
        const MAPPED = 1 << 0;
        const UNMAPPED = 1 << 1;
        /// Read, skipped, or written through the copying calls.
        const ACCESSED = 1 << 2;
    }
}

#[derive(Debug, Default)]
pub struct ConnHandle {
    /// Index of the target service in the registry.
    pub service: Option<usize>,
    /// Partition that issued the request in flight.
    pub client: Option<usize>,
    pub client_id: i32,
    pub status: ConnStatus,
    pub magic: u32,
    pub sfn_magic: u32,
    /// Working copies of the client's vectors. `invec[i].base` and
    /// `msg.in_size[i]` advance as the service consumes input; `outvec[i].len`
    /// counts bytes written so far.
    pub invec: [IoVec; MAX_IOVEC],
    pub outvec: [IoVec; MAX_IOVEC],
    pub invec_status: [IovecStatus; MAX_IOVEC],
    pub outvec_status: [IovecStatus; MAX_IOVEC],
    /// Client address of the output vector array, for reporting lengths back.
    pub caller_outvec: u32,
    pub msg: Msg,
    pub rhandle: u32,
    /// Where the client waits for the reply.
    pub ack: SyncObj,
}

impl ConnHandle {
    /// Resets the record for a new connection from `client_id`.
    pub fn open(&mut self, service: usize, client_id: i32) {
        *self = Self {
            service: Some(service),
            client_id,
            ..Self::default()
        };
    }

    pub fn is_live(&self) -> bool {
        self.magic == MSG_MAGIC
    }

    /// Loads a message into the record.
    ///
    /// Only buffer descriptors are copied; buffer contents stay where the
    /// client put them. The vector counts must already have been checked
    /// against `MAX_IOVEC`: a caller that got this far with more is corrupt,
    /// so this panics.
    pub fn fill(
        &mut self,
        service: usize,
        client: Option<usize>,
        handle: Handle,
        ty: i32,
        client_id: i32,
        in_vecs: &[IoVec],
        out_vecs: &[IoVec],
        caller_outvec: u32,
    ) {
        uassert!(in_vecs.len() <= MAX_IOVEC);
        uassert!(out_vecs.len() <= MAX_IOVEC);
        uassert!(in_vecs.len() + out_vecs.len() <= MAX_IOVEC);

        self.msg = Msg::default();
        self.ack = SyncObj::default();
        self.magic = MSG_MAGIC;
        self.sfn_magic = 0;
        self.service = Some(service);
        self.client = client;
        self.caller_outvec = caller_outvec;
        self.invec = [IoVec::default(); MAX_IOVEC];
        self.outvec = [IoVec::default(); MAX_IOVEC];
        self.invec_status = [IovecStatus::empty(); MAX_IOVEC];
        self.outvec_status = [IovecStatus::empty(); MAX_IOVEC];

        self.msg.ty = ty;
        self.msg.client_id = client_id;

        for (i, v) in in_vecs.iter().enumerate() {
            self.msg.in_size[i] = v.len;
            self.invec[i].base = v.base;
        }
        for (i, v) in out_vecs.iter().enumerate() {
            self.msg.out_size[i] = v.len;
            self.outvec[i].base = v.base;
            // len counts what the service has written
            self.outvec[i].len = 0;
        }

        self.msg.handle = handle;
        self.msg.rhandle = self.rhandle;
    }

    /// Reports the number of bytes written to each output vector back into
    /// the client's own vector array.
    ///
    /// The client's array must still describe the buffers it described when
    /// the request was made; if it doesn't, something rewrote client state
    /// underneath us, and this panics.
    pub fn propagate_output_lengths<M: ClientMemory + ?Sized>(
        &self,
        mem: &mut M,
    ) {
        for i in 0..MAX_IOVEC {
            if self.msg.out_size[i] == 0 {
                continue;
            }

            let addr = self.caller_outvec + (i * IoVec::SIZE) as u32;
            let mut caller = IoVec::default();
            mem.read(addr, caller.as_mut_bytes());
            uassert!(caller.base == self.outvec[i].base);

            caller.len = self.outvec[i].len;
            mem.write(addr, caller.as_bytes());
        }
    }
}

/// Reads `n` vectors from client memory at `addr`.
pub fn load_vectors<M: ClientMemory + ?Sized>(
    mem: &M,
    addr: u32,
    n: usize,
) -> [IoVec; MAX_IOVEC] {
    let mut vecs = [IoVec::default(); MAX_IOVEC];
    let n = n.min(MAX_IOVEC);
    mem.read(addr, vecs[..n].as_mut_bytes());
    vecs
}
