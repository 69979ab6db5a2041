// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The call surface seen by partitions that are called directly.
//!
//! Service functions and init routines get a `&mut dyn Psa` and make all of
//! their calls through it, both as clients of other services and as
//! services working through their own messages.
//!
//! With the direct-call backend, a client call runs the service to
//! completion before returning. The service's return value is its reply:
//! when the target is still marked current after the call, the reply is made
//! here on the service's behalf.

use abi::{status, CallParams, Handle, Msg, Sid, FRAMEWORK_VERSION};

use crate::backend::Backend;
use crate::err::Fault;
use crate::hal::Platform;
use crate::spm::Spm;

pub trait Psa {
    fn framework_version(&self) -> u32;

    /// Version of service `sid`, or `VERSION_NONE` if the caller can't see
    /// it.
    fn version(&mut self, sid: Sid) -> u32;

    /// Connects to `sid`. On failure, gives the negative status.
    fn connect(&mut self, sid: Sid, version: u32) -> Result<Handle, i32>;

    /// Makes a request on `handle`. `invec` and `outvec` are the addresses of
    /// the caller's vector arrays, sized by `params`.
    fn call(
        &mut self,
        handle: Handle,
        params: CallParams,
        invec: u32,
        outvec: u32,
    ) -> i32;

    fn close(&mut self, handle: Handle);

    /// Returns the signals in `mask` that are asserted, blocking first if
    /// none are and `timeout` is `BLOCK`.
    fn wait(&mut self, mask: u32, timeout: u32) -> u32;

    /// Takes the next message on `signal`.
    fn get(&mut self, signal: u32) -> Result<Msg, i32>;

    fn read(&mut self, msg: Handle, idx: usize, buf: &mut [u8]) -> usize;
    fn skip(&mut self, msg: Handle, idx: usize, n: usize) -> usize;
    fn write(&mut self, msg: Handle, idx: usize, data: &[u8]);
    fn reply(&mut self, msg: Handle, status: i32);
    fn set_rhandle(&mut self, msg: Handle, rhandle: u32);

    fn notify(&mut self, partition_id: i32);
    fn clear(&mut self);

    fn map_invec(&mut self, msg: Handle, idx: usize) -> u32;
    fn unmap_invec(&mut self, msg: Handle, idx: usize);
    fn map_outvec(&mut self, msg: Handle, idx: usize) -> u32;
    fn unmap_outvec(&mut self, msg: Handle, idx: usize, len: u32);

    /// Stops the calling partition.
    fn panic(&mut self);
}

impl<P: Platform, B: Backend> Spm<P, B> {
    /// Runs a client operation and, if the service it reached is still
    /// current when it returns, replies with what the service returned.
    fn client_op(
        &mut self,
        op: impl FnOnce(&mut Self, bool) -> i32,
        reply: impl FnOnce(i32) -> i32,
    ) -> i32 {
        let client = self.current;
        let ns = self.is_ns_caller();
        let mut stat = op(self, ns);

        let target = self.current;
        if let Some(t) = target.filter(|_| target != client) {
            let pending = self.partitions[t].active.map(|c| self.user_handle(c));
            if let Some(msg) = pending {
                // A service that faulted on the way has no say in the reply.
                let code = if self.partitions[t].is_faulted() {
                    status::SERVICE_FAILURE
                } else {
                    reply(stat)
                };
                stat = match self.do_reply(msg, code) {
                    Ok(s) => s,
                    Err(f) => {
                        self.fault_current(f);
                        self.current = client;
                        status::SERVICE_FAILURE
                    }
                };
            }
        }

        self.handle_programmer_errors(stat)
    }

    /// Runs a partition-side operation, stopping the partition if it broke
    /// the rules.
    fn service_op<T: Default>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, Fault>,
    ) -> T {
        match op(self) {
            Ok(v) => v,
            Err(fault) => {
                self.fault_current(fault);
                T::default()
            }
        }
    }
}

impl<P: Platform, B: Backend> Psa for Spm<P, B> {
    fn framework_version(&self) -> u32 {
        FRAMEWORK_VERSION
    }

    fn version(&mut self, sid: Sid) -> u32 {
        let ns = self.is_ns_caller();
        self.do_version(sid, ns)
    }

    fn connect(&mut self, sid: Sid, version: u32) -> Result<Handle, i32> {
        let stat = self.client_op(
            |spm, ns| spm.do_connect(sid, version, ns),
            |stat| stat,
        );
        if stat < status::SUCCESS {
            Err(stat)
        } else {
            Ok(Handle(stat))
        }
    }

    fn call(
        &mut self,
        handle: Handle,
        params: CallParams,
        invec: u32,
        outvec: u32,
    ) -> i32 {
        let ctrl = params.pack();
        self.client_op(
            |spm, ns| spm.do_call(handle, ctrl, invec, outvec, ns),
            |stat| stat,
        )
    }

    fn close(&mut self, handle: Handle) {
        self.client_op(
            |spm, ns| spm.do_close(handle, ns),
            |_| status::SUCCESS,
        );
    }

    fn wait(&mut self, mask: u32, timeout: u32) -> u32 {
        self.service_op(|spm| spm.do_wait(mask, timeout))
    }

    fn get(&mut self, signal: u32) -> Result<Msg, i32> {
        self.service_op(|spm| spm.do_get(signal))
            .ok_or(status::DOES_NOT_EXIST)
    }

    fn read(&mut self, msg: Handle, idx: usize, buf: &mut [u8]) -> usize {
        self.service_op(|spm| spm.do_read(msg, idx, buf))
    }

    fn skip(&mut self, msg: Handle, idx: usize, n: usize) -> usize {
        self.service_op(|spm| spm.do_skip(msg, idx, n))
    }

    fn write(&mut self, msg: Handle, idx: usize, data: &[u8]) {
        self.service_op(|spm| spm.do_write(msg, idx, data))
    }

    fn reply(&mut self, msg: Handle, status: i32) {
        self.service_op(|spm| spm.do_reply(msg, status).map(|_| ()))
    }

    fn set_rhandle(&mut self, msg: Handle, rhandle: u32) {
        self.service_op(|spm| spm.do_set_rhandle(msg, rhandle))
    }

    fn notify(&mut self, partition_id: i32) {
        self.service_op(|spm| spm.do_notify(partition_id))
    }

    fn clear(&mut self) {
        self.service_op(|spm| spm.do_clear())
    }

    fn map_invec(&mut self, msg: Handle, idx: usize) -> u32 {
        self.service_op(|spm| spm.do_map_invec(msg, idx))
    }

    fn unmap_invec(&mut self, msg: Handle, idx: usize) {
        self.service_op(|spm| spm.do_unmap_invec(msg, idx))
    }

    fn map_outvec(&mut self, msg: Handle, idx: usize) -> u32 {
        self.service_op(|spm| spm.do_map_outvec(msg, idx))
    }

    fn unmap_outvec(&mut self, msg: Handle, idx: usize, len: u32) {
        self.service_op(|spm| spm.do_unmap_outvec(msg, idx, len))
    }

    fn panic(&mut self) {
        self.do_panic();
    }
}
