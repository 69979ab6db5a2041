// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The PSA operations themselves.
//!
//! Client-side operations (`do_connect`, `do_call`, `do_close`) return a PSA
//! status, because whatever goes wrong is the client's to hear about.
//! Partition-side operations return `Result<_, Fault>`: a service that
//! misuses a message handle or a vector has a bug, and the entry layer stops
//! it rather than telling it so.
//!
//! None of these apply the programmer error policy; the entry layers
//! (`interface` for direct calls, `cross_call` for trapped calls) do that on
//! the way out.

use abi::{
    status, CallParams, Handle, IoVec, Msg, Sid, BLOCK, DOORBELL,
    IPC_CONNECT, IPC_DISCONNECT, MAX_IOVEC, VERSION_NONE,
};
use ringbuf::ringbuf_entry;

use crate::backend::Backend;
use crate::conn::{load_vectors, ConnStatus, IovecStatus};
use crate::err::Fault;
use crate::hal::Platform;
use crate::handle::ConnRef;
use crate::registry::{check_authorization, check_version};
use crate::spm::{Access, Spm};
use crate::trace::Trace;

/// Which way a vector points.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Dir {
    In,
    Out,
}

impl<P: Platform, B: Backend> Spm<P, B> {
    pub fn do_version(&mut self, sid: Sid, ns: bool) -> u32 {
        match self.registry.find_by_sid(sid) {
            Some(svc) => {
                let desc = self.registry.get(svc).desc;
                if ns && !desc.is_ns_accessible() {
                    VERSION_NONE
                } else {
                    desc.version
                }
            }
            None => VERSION_NONE,
        }
    }

    /// Opens a connection to `sid`. Returns the user handle, or a negative
    /// status.
    pub fn do_connect(&mut self, sid: Sid, version: u32, ns: bool) -> i32 {
        let Some(svc) = self.registry.find_by_sid(sid) else {
            return status::CONNECTION_REFUSED;
        };
        let service = *self.registry.get(svc);

        // Stateless services are reached through their static handle only.
        if service.desc.is_stateless() {
            return status::PROGRAMMER_ERROR;
        }

        let client = self.partitions[self.current_index()].desc;
        if let Err(e) = check_authorization(sid, service.desc, ns, client)
            .and_then(|()| check_version(service.desc, version))
        {
            return e.into();
        }

        if self.partitions[service.partition].is_faulted() {
            return status::SERVICE_FAILURE;
        }

        let client_id = self.client_id(ns);
        let slot = match self.create_conn(svc, client_id) {
            Ok(slot) => slot,
            Err(e) => {
                ringbuf_entry!(self.trace, Trace::NoHandles { sid });
                return e.into();
            }
        };

        let handle = self.codec.encode(slot);
        let caller = self.current;
        self.live_conn(ConnRef::Pool(slot)).fill(
            svc,
            caller,
            handle,
            IPC_CONNECT,
            client_id,
            &[],
            &[],
            0,
        );
        ringbuf_entry!(self.trace, Trace::Connect { sid, client_id });

        B::messaging(self, ConnRef::Pool(slot))
    }

    /// Makes a request. `invec` and `outvec` are the client addresses of its
    /// vector arrays, with lengths given in `ctrl`.
    pub fn do_call(
        &mut self,
        handle: Handle,
        ctrl: u32,
        invec: u32,
        outvec: u32,
        ns: bool,
    ) -> i32 {
        let params = CallParams::unpack(ctrl);
        if params.ty < 0
            || params.in_len > MAX_IOVEC
            || params.out_len > MAX_IOVEC
            || params.in_len + params.out_len > MAX_IOVEC
        {
            return status::PROGRAMMER_ERROR;
        }

        let client_id = self.client_id(ns);

        let (conn, svc) = if handle.is_static() {
            let index = handle.static_index();
            let Some(svc) = self.registry.stateless(index) else {
                return status::PROGRAMMER_ERROR;
            };
            let desc = self.registry.get(svc).desc;
            let client = self.partitions[self.current_index()].desc;
            if let Err(e) = check_authorization(desc.sid, desc, ns, client) {
                return e.into();
            }
            if check_version(desc, handle.static_version()).is_err() {
                return status::PROGRAMMER_ERROR;
            }
            if self.statics[index].status == ConnStatus::Active {
                return status::CONNECTION_BUSY;
            }
            (ConnRef::Static(index), svc)
        } else {
            let Some(ConnRef::Pool(slot)) = self.codec.decode(handle) else {
                return status::PROGRAMMER_ERROR;
            };
            if self.validate_conn(slot, client_id).is_err() {
                return status::PROGRAMMER_ERROR;
            }
            let record = self.live_conn(ConnRef::Pool(slot));
            if record.status != ConnStatus::Idle {
                return status::PROGRAMMER_ERROR;
            }
            let Some(svc) = record.service else {
                panic!("connection without a service");
            };
            (ConnRef::Pool(slot), svc)
        };

        if self.partitions[self.registry.get(svc).partition].is_faulted() {
            return status::SERVICE_FAILURE;
        }

        let privileged = self.current_is_privileged(ns);
        let table_len = |n: usize| (n * IoVec::SIZE) as u32;
        if self
            .memory_check(
                invec,
                table_len(params.in_len),
                ns,
                Access::ReadOnly,
                privileged,
            )
            .and_then(|()| {
                self.memory_check(
                    outvec,
                    table_len(params.out_len),
                    ns,
                    Access::ReadWrite,
                    privileged,
                )
            })
            .is_err()
        {
            return status::PROGRAMMER_ERROR;
        }

        // Take our own copies of the tables so the client can't change them
        // between the checks below and their use.
        let ins = load_vectors(&self.platform, invec, params.in_len);
        let outs = load_vectors(&self.platform, outvec, params.out_len);
        let ins = &ins[..params.in_len];
        let outs = &outs[..params.out_len];

        let buffers_ok = ins.iter().all(|v| {
            self.memory_check(v.base, v.len, ns, Access::ReadOnly, privileged)
                .is_ok()
        }) && outs.iter().all(|v| {
            self.memory_check(v.base, v.len, ns, Access::ReadWrite, privileged)
                .is_ok()
        });
        if !buffers_ok {
            return status::PROGRAMMER_ERROR;
        }

        let caller = self.current;
        let record = match conn {
            ConnRef::Static(_) => {
                let record = self.live_conn(conn);
                record.open(svc, client_id);
                record
            }
            ConnRef::Pool(_) => self.live_conn(conn),
        };
        record.status = ConnStatus::Active;
        record.fill(
            svc,
            caller,
            handle,
            params.ty,
            client_id,
            ins,
            outs,
            outvec,
        );
        ringbuf_entry!(
            self.trace,
            Trace::Call {
                handle,
                ty: params.ty
            }
        );

        B::messaging(self, conn)
    }

    pub fn do_close(&mut self, handle: Handle, ns: bool) -> i32 {
        if handle.is_null() {
            return status::SUCCESS;
        }
        if handle.is_static() {
            return status::PROGRAMMER_ERROR;
        }

        let client_id = self.client_id(ns);
        let Some(ConnRef::Pool(slot)) = self.codec.decode(handle) else {
            return status::PROGRAMMER_ERROR;
        };
        if self.validate_conn(slot, client_id).is_err() {
            return status::PROGRAMMER_ERROR;
        }
        let conn = ConnRef::Pool(slot);
        let record = self.live_conn(conn);
        if record.status == ConnStatus::Active {
            return status::PROGRAMMER_ERROR;
        }
        let Some(svc) = record.service else {
            panic!("connection without a service");
        };

        ringbuf_entry!(self.trace, Trace::Close { handle });

        // A stopped service never hears about it; the record just goes.
        if self.partitions[self.registry.get(svc).partition].is_faulted() {
            self.free_conn(conn);
            return status::SUCCESS;
        }

        let caller = self.current;
        self.live_conn(conn).fill(
            svc,
            caller,
            handle,
            IPC_DISCONNECT,
            client_id,
            &[],
            &[],
            0,
        );

        B::messaging(self, conn)
    }

    /// Finishes the message `msg`, and tells its client `code`. Returns
    /// what the client was given, after backend processing.
    pub fn do_reply(&mut self, msg: Handle, code: i32) -> Result<i32, Fault> {
        let conn = self
            .resolve_user_handle(msg)
            .ok_or(Fault::BadMessageHandle)?;
        let record = self.live_conn(conn);
        let ty = record.msg.ty;
        let client_id = record.msg.client_id;
        let client = record.client;
        let Some(svc) = record.service else {
            panic!("message without a service");
        };

        let mut ret = code;
        let mut free_after = false;

        match ty {
            IPC_CONNECT => match code {
                status::SUCCESS => ret = msg.0,
                status::CONNECTION_REFUSED | status::CONNECTION_BUSY => {
                    // The client never gets this handle.
                    free_after = true;
                }
                _ => {
                    self.fault_current(Fault::BadReply(code));
                    free_after = true;
                    ret = status::SERVICE_FAILURE;
                }
            },
            IPC_DISCONNECT => {
                free_after = true;
                ret = status::SUCCESS;
            }
            _ => {
                // Bytes written are reported back whatever the status.
                self.propagate_output_lengths(conn);
                if self.registry.get(svc).desc.is_stateless() {
                    // Back in the table for the next caller.
                    self.live_conn(conn).magic = 0;
                }
            }
        }

        let mut fault_client = None;
        if ret == status::PROGRAMMER_ERROR {
            if abi::client_id_is_ns(client_id) {
                self.live_conn(conn).status = ConnStatus::ConnectError;
            } else {
                self.live_conn(conn).status = ConnStatus::Idle;
                fault_client = client;
            }
        } else {
            self.live_conn(conn).status = ConnStatus::Idle;
        }

        ringbuf_entry!(self.trace, Trace::Reply { handle: msg, status: ret });
        let ret = critical_section::with(|_| B::replying(self, conn, ret));
        // Faulted only once the reply is out; a faulted client never wakes.
        if let Some(c) = fault_client {
            self.force_fault(c, Fault::ProgrammerError);
        }

        if free_after {
            self.free_conn(conn);
        }
        Ok(ret)
    }

    pub fn do_wait(&mut self, mask: u32, timeout: u32) -> Result<u32, Fault> {
        let p = self.current_index();
        if mask & self.partitions[p].signals_allowed == 0 {
            return Err(Fault::BadSignal);
        }

        let part = &mut self.partitions[p];
        if timeout == BLOCK && part.signals_asserted & mask == 0 {
            let Some(t) = self.platform.current() else {
                panic!("wait with no thread running");
            };
            critical_section::with(|_| part.signals_waiting = mask);
            part.waitobj.wait_on(&mut self.platform, t);
        }
        Ok(part.signals_asserted & mask)
    }

    /// Takes the next message on `signal`, which must be a single asserted
    /// signal the partition is allowed. `None` if it was asserted with no
    /// message behind it.
    pub fn do_get(&mut self, signal: u32) -> Result<Option<Msg>, Fault> {
        let p = self.current_index();
        let part = &self.partitions[p];
        if signal.count_ones() != 1 || part.signals_allowed & signal == 0 {
            return Err(Fault::BadSignal);
        }
        if part.signals_asserted & signal == 0 {
            return Err(Fault::SignalNotAsserted);
        }

        Ok(self
            .handle_by_signal(p, signal)
            .and_then(|c| self.conn(c))
            .map(|r| r.msg))
    }

    /// Resolves `msg` for a vector operation, checking that it is a request
    /// and that `idx` names a vector.
    fn request_vector(
        &self,
        msg: Handle,
        idx: usize,
    ) -> Result<ConnRef, Fault> {
        let conn = self
            .resolve_user_handle(msg)
            .ok_or(Fault::BadMessageHandle)?;
        let Some(record) = self.conn(conn) else {
            return Err(Fault::BadMessageHandle);
        };
        if !record.msg.is_request() {
            return Err(Fault::WrongMessageType);
        }
        if idx >= MAX_IOVEC {
            return Err(Fault::BadVectorIndex);
        }
        Ok(conn)
    }

    /// Copies up to `buf.len()` bytes from input vector `idx`, returning how
    /// many were copied.
    pub fn do_read(
        &mut self,
        msg: Handle,
        idx: usize,
        buf: &mut [u8],
    ) -> Result<usize, Fault> {
        let conn = self.request_vector(msg, idx)?;
        let record = self.live_conn(conn);
        let remaining = record.msg.in_size[idx] as usize;
        if remaining == 0 {
            return Ok(0);
        }
        if record.invec_status[idx].contains(IovecStatus::MAPPED) {
            return Err(Fault::BadMapping);
        }

        let n = buf.len().min(remaining);
        let base = record.invec[idx].base;
        self.platform.read(base, &mut buf[..n]);

        let record = self.live_conn(conn);
        record.invec[idx].base += n as u32;
        record.msg.in_size[idx] -= n as u32;
        record.invec_status[idx] |= IovecStatus::ACCESSED;
        Ok(n)
    }

    /// Discards up to `n` bytes of input vector `idx`.
    pub fn do_skip(
        &mut self,
        msg: Handle,
        idx: usize,
        n: usize,
    ) -> Result<usize, Fault> {
        let conn = self.request_vector(msg, idx)?;
        let record = self.live_conn(conn);
        let remaining = record.msg.in_size[idx] as usize;
        if remaining == 0 {
            return Ok(0);
        }
        if record.invec_status[idx].contains(IovecStatus::MAPPED) {
            return Err(Fault::BadMapping);
        }

        let n = n.min(remaining);
        record.invec[idx].base += n as u32;
        record.msg.in_size[idx] -= n as u32;
        record.invec_status[idx] |= IovecStatus::ACCESSED;
        Ok(n)
    }

    /// Room left in output vector `idx` of `msg`.
    pub fn outvec_room(&self, msg: Handle, idx: usize) -> Result<u32, Fault> {
        let conn = self.request_vector(msg, idx)?;
        let Some(record) = self.conn(conn) else {
            return Err(Fault::BadMessageHandle);
        };
        Ok(record.msg.out_size[idx] - record.outvec[idx].len)
    }

    /// Appends `data` to output vector `idx`.
    pub fn do_write(
        &mut self,
        msg: Handle,
        idx: usize,
        data: &[u8],
    ) -> Result<(), Fault> {
        let conn = self.request_vector(msg, idx)?;
        let record = self.live_conn(conn);
        let room = record.msg.out_size[idx] - record.outvec[idx].len;
        if data.len() > room as usize {
            return Err(Fault::OutputOverflow);
        }
        if record.outvec_status[idx].contains(IovecStatus::MAPPED) {
            return Err(Fault::BadMapping);
        }

        let at = record.outvec[idx].base + record.outvec[idx].len;
        self.platform.write(at, data);

        let record = self.live_conn(conn);
        record.outvec[idx].len += data.len() as u32;
        record.outvec_status[idx] |= IovecStatus::ACCESSED;
        Ok(())
    }

    /// Common checks for the mapping calls: the service must allow mapping,
    /// on top of the usual request and index checks.
    fn mapped_vector(
        &self,
        msg: Handle,
        idx: usize,
    ) -> Result<ConnRef, Fault> {
        let conn = self.request_vector(msg, idx)?;
        let svc = self.conn(conn).and_then(|r| r.service);
        match svc {
            Some(s) if self.registry.get(s).desc.allows_mm_iovec() => Ok(conn),
            _ => Err(Fault::BadMapping),
        }
    }

    fn map(&mut self, msg: Handle, idx: usize, dir: Dir) -> Result<u32, Fault> {
        let conn = self.mapped_vector(msg, idx)?;
        let part = self.current_index();
        let privileged = self.partitions[part].desc.is_privileged();

        let record = self.live_conn(conn);
        let (status, base, size) = match dir {
            Dir::In => (
                record.invec_status[idx],
                record.invec[idx].base,
                record.msg.in_size[idx],
            ),
            Dir::Out => (
                record.outvec_status[idx],
                record.outvec[idx].base,
                record.msg.out_size[idx],
            ),
        };
        if status.intersects(IovecStatus::MAPPED | IovecStatus::ACCESSED) {
            return Err(Fault::BadMapping);
        }
        if size == 0 {
            return Ok(0);
        }

        let ns = abi::client_id_is_ns(record.msg.client_id);
        let access = match dir {
            Dir::In => Access::ReadOnly,
            Dir::Out => Access::ReadWrite,
        };
        self.memory_check(base, size, ns, access, privileged)
            .map_err(|_| Fault::BadMapping)?;

        let record = self.live_conn(conn);
        match dir {
            Dir::In => record.invec_status[idx] |= IovecStatus::MAPPED,
            Dir::Out => record.outvec_status[idx] |= IovecStatus::MAPPED,
        }
        Ok(base)
    }

    fn unmap(
        &mut self,
        msg: Handle,
        idx: usize,
        dir: Dir,
    ) -> Result<ConnRef, Fault> {
        let conn = self.mapped_vector(msg, idx)?;
        let record = self.live_conn(conn);
        let status = match dir {
            Dir::In => &mut record.invec_status[idx],
            Dir::Out => &mut record.outvec_status[idx],
        };
        if !status.contains(IovecStatus::MAPPED)
            || status.contains(IovecStatus::UNMAPPED)
        {
            return Err(Fault::BadMapping);
        }
        *status |= IovecStatus::UNMAPPED;
        Ok(conn)
    }

    /// Maps input vector `idx` for direct access, returning its address, or 0
    /// if it is empty.
    pub fn do_map_invec(&mut self, msg: Handle, idx: usize) -> Result<u32, Fault> {
        self.map(msg, idx, Dir::In)
    }

    pub fn do_unmap_invec(&mut self, msg: Handle, idx: usize) -> Result<(), Fault> {
        self.unmap(msg, idx, Dir::In).map(|_| ())
    }

    pub fn do_map_outvec(&mut self, msg: Handle, idx: usize) -> Result<u32, Fault> {
        self.map(msg, idx, Dir::Out)
    }

    /// Ends direct access to output vector `idx`, recording that `len` bytes
    /// were produced.
    pub fn do_unmap_outvec(
        &mut self,
        msg: Handle,
        idx: usize,
        len: u32,
    ) -> Result<(), Fault> {
        let conn = self.mapped_vector(msg, idx)?;
        if len > self.live_conn(conn).msg.out_size[idx] {
            return Err(Fault::OutputOverflow);
        }
        self.unmap(msg, idx, Dir::Out)?;
        self.live_conn(conn).outvec[idx].len = len;
        Ok(())
    }

    pub fn do_set_rhandle(&mut self, msg: Handle, rhandle: u32) -> Result<(), Fault> {
        let conn = self
            .resolve_user_handle(msg)
            .ok_or(Fault::BadMessageHandle)?;
        let record = self.live_conn(conn);
        let Some(svc) = record.service else {
            return Err(Fault::BadMessageHandle);
        };
        if self.registry.get(svc).desc.is_stateless() {
            return Err(Fault::StatelessRhandle);
        }
        let record = self.live_conn(conn);
        record.rhandle = rhandle;
        record.msg.rhandle = rhandle;
        Ok(())
    }

    /// Rings the doorbell of partition `pid`.
    pub fn do_notify(&mut self, pid: i32) -> Result<(), Fault> {
        let index = self
            .partition_index(pid)
            .ok_or(Fault::NoSuchPartition(pid))?;
        self.assert_signal(index, DOORBELL);
        Ok(())
    }

    /// Acknowledges the running partition's doorbell.
    pub fn do_clear(&mut self) -> Result<(), Fault> {
        let p = self.current_index();
        let part = &mut self.partitions[p];
        if part.signals_asserted & DOORBELL == 0 {
            return Err(Fault::SignalNotAsserted);
        }
        critical_section::with(|_| part.signals_asserted &= !DOORBELL);
        Ok(())
    }

    pub fn do_panic(&mut self) {
        self.fault_current(Fault::Panicked);
    }
}
