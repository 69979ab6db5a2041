// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entry point for calls trapped from partition threads.
//!
//! The architecture trampoline saves the caller's argument registers into a
//! `CrossCallFrame` and calls `Spm::cross_call` with the API number the caller
//! asked for. Arguments arrive as raw words; this turns them into typed
//! operands, runs the operation with preemption held off, and leaves the
//! result in `a0`.
//!
//! Buffers named by the calling partition for its own use (the destination of
//! `read`, the source of `write`, the message record of `get`) are checked
//! here, against the partition's own access rights. A partition that passes a
//! buffer it can't touch is faulted.

use abi::{
    status, Api, CrossCallFrame, Handle, Msg, Sid, FRAMEWORK_VERSION,
};
use ringbuf::ringbuf_entry;
use zerocopy::IntoBytes;

use crate::backend::Backend;
use crate::err::Fault;
use crate::hal::Platform;
use crate::spm::{Access, Spm};
use crate::trace::Trace;

/// Bytes moved per step when copying between a message and a partition
/// buffer.
const CHUNK: usize = 64;

impl<P: Platform, B: Backend> Spm<P, B> {
    /// Runs cross call `api` with the arguments in `frame`.
    pub fn cross_call(&mut self, api: u32, frame: &mut CrossCallFrame) {
        let result = critical_section::with(|_| {
            let api = Api::try_from(api).map_err(|()| Fault::UnknownApi(api))?;
            self.dispatch(api, frame)
        });
        frame.a0 = match result {
            Ok(a0) => a0,
            Err(fault) => {
                self.fault_current(fault);
                0
            }
        };

        // The policy may fault the caller, which is itself a reason to
        // switch, so it goes first.
        self.handle_programmer_errors(frame.a0 as i32);

        if self.platform.expecting_schedule() {
            frame.a0 = self.platform.trigger_pendsv();
            ringbuf_entry!(self.trace, Trace::PendSv);
        }
    }

    fn dispatch(
        &mut self,
        api: Api,
        frame: &CrossCallFrame,
    ) -> Result<u32, Fault> {
        let ns = self.is_ns_caller();
        let &CrossCallFrame { a0, a1, a2, a3, .. } = frame;
        let msg = Handle(a0 as i32);

        let ret = match api {
            Api::FrameworkVersion => FRAMEWORK_VERSION,
            Api::Version => self.do_version(Sid(a0), ns),
            Api::Connect => self.do_connect(Sid(a0), a1, ns) as u32,
            Api::Call => self.do_call(msg, a1, a2, a3, ns) as u32,
            Api::Close => self.do_close(msg, ns) as u32,
            Api::Wait => self.do_wait(a0, a1)?,
            Api::Get => self.get_into(a0, a1)? as u32,
            Api::Read => self.read_into(msg, a1 as usize, a2, a3)? as u32,
            Api::Skip => self.do_skip(msg, a1 as usize, a2 as usize)? as u32,
            Api::Write => {
                self.write_from(msg, a1 as usize, a2, a3)?;
                status::SUCCESS as u32
            }
            Api::Reply => self.do_reply(msg, a1 as i32)? as u32,
            Api::SetRhandle => {
                self.do_set_rhandle(msg, a1)?;
                status::SUCCESS as u32
            }
            Api::Notify => {
                self.do_notify(a0 as i32)?;
                status::SUCCESS as u32
            }
            Api::Clear => {
                self.do_clear()?;
                status::SUCCESS as u32
            }
            Api::MapInvec => self.do_map_invec(msg, a1 as usize)?,
            Api::UnmapInvec => {
                self.do_unmap_invec(msg, a1 as usize)?;
                status::SUCCESS as u32
            }
            Api::MapOutvec => self.do_map_outvec(msg, a1 as usize)?,
            Api::UnmapOutvec => {
                self.do_unmap_outvec(msg, a1 as usize, a2)?;
                status::SUCCESS as u32
            }
            Api::Panic => {
                self.do_panic();
                status::SUCCESS as u32
            }
        };
        Ok(ret)
    }

    /// Checks a buffer the running partition named for its own use.
    fn own_buffer(
        &self,
        base: u32,
        len: u32,
        access: Access,
    ) -> Result<(), Fault> {
        let privileged = self.current_is_privileged(false);
        self.memory_check(base, len, false, access, privileged)
            .map_err(|_| Fault::BadBuffer)
    }

    /// `get`, delivering the message record to `out`.
    fn get_into(&mut self, signal: u32, out: u32) -> Result<i32, Fault> {
        self.own_buffer(out, Msg::SIZE as u32, Access::ReadWrite)?;
        match self.do_get(signal)? {
            Some(msg) => {
                self.platform.write(out, msg.as_bytes());
                Ok(status::SUCCESS)
            }
            None => Ok(status::DOES_NOT_EXIST),
        }
    }

    /// `read`, copying into `len` bytes at `dst`.
    fn read_into(
        &mut self,
        msg: Handle,
        idx: usize,
        dst: u32,
        len: u32,
    ) -> Result<usize, Fault> {
        self.own_buffer(dst, len, Access::ReadWrite)?;

        let mut chunk = [0u8; CHUNK];
        let mut done = 0;
        while done < len as usize {
            let want = (len as usize - done).min(CHUNK);
            let n = self.do_read(msg, idx, &mut chunk[..want])?;
            if n == 0 {
                break;
            }
            self.platform.write(dst + done as u32, &chunk[..n]);
            done += n;
        }
        Ok(done)
    }

    /// `write`, taking `len` bytes from `src`.
    fn write_from(
        &mut self,
        msg: Handle,
        idx: usize,
        src: u32,
        len: u32,
    ) -> Result<(), Fault> {
        self.own_buffer(src, len, Access::ReadOnly)?;
        // Refuse up front so that an oversized write doesn't land partially.
        if len > self.outvec_room(msg, idx)? {
            return Err(Fault::OutputOverflow);
        }

        let mut chunk = [0u8; CHUNK];
        let mut done = 0;
        while done < len as usize {
            let n = (len as usize - done).min(CHUNK);
            self.platform.read(src + done as u32, &mut chunk[..n]);
            self.do_write(msg, idx, &chunk[..n])?;
            done += n;
        }
        Ok(())
    }
}
