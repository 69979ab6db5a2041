// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The partition manager's state, and the bookkeeping shared by every call.
//!
//! `Spm` owns everything mutable: partitions, the service registry, the
//! connection pool and stateless records, the handle codec, and the trace
//! ring. It is built once at boot from the static descriptor table, and from
//! then on every entry point (direct calls, the cross-call dispatcher, the
//! scheduler) works through `&mut Spm`.

use core::marker::PhantomData;

use abi::{client_id_is_ns, Handle, INVALID_PARTITION_ID, STATELESS_HANDLE_LIMIT};
use ringbuf::{ringbuf_entry, Ringbuf};

use crate::backend::Backend;
use crate::config::{CONN_HANDLE_MAX_NUM, MAX_PARTITIONS, TRACE_DEPTH};
use crate::conn::{ConnHandle, SFN_MAGIC};
use crate::descs::PartitionDesc;
use crate::err::{Fault, SpmError};
use crate::hal::{AccessAttr, Platform, ThreadId};
use crate::handle::{ConnRef, HandleCodec};
use crate::nspm::Nspm;
use crate::partition::{Partition, PartitionState};
use crate::pool::Pool;
use crate::registry::Registry;
use crate::trace::Trace;

/// Access wanted on a client buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

pub struct Spm<P: Platform, B: Backend> {
    pub(crate) platform: P,
    pub(crate) partitions: heapless::Vec<Partition, MAX_PARTITIONS>,
    pub(crate) registry: Registry,
    pub(crate) pool: Pool<ConnHandle, CONN_HANDLE_MAX_NUM>,
    /// One record per stateless table slot. Never allocated or freed.
    pub(crate) statics: [ConnHandle; STATELESS_HANDLE_LIMIT],
    pub(crate) codec: HandleCodec,
    pub(crate) nspm: Nspm,
    /// Index of the partition whose code is running.
    pub(crate) current: Option<usize>,
    pub(crate) trace: Ringbuf<Trace, TRACE_DEPTH>,
    backend: PhantomData<B>,
}

impl<P: Platform, B: Backend> Spm<P, B> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            partitions: heapless::Vec::new(),
            registry: Registry::new(),
            pool: Pool::new(),
            statics: core::array::from_fn(|_| ConnHandle::default()),
            codec: HandleCodec::new(),
            nspm: Nspm::new(),
            current: None,
            trace: Ringbuf::new(Trace::None),
            backend: PhantomData,
        }
    }

    /// Loads every partition in `table`, in order: registers its services,
    /// binds its isolation boundary, and hands it to the backend to set up.
    ///
    /// A table the platform can't bind is not something we can run with, so
    /// failures here panic.
    pub fn init(&mut self, table: &'static [PartitionDesc]) {
        for desc in table {
            let index = self.partitions.len();
            if self.partitions.push(Partition::new(desc)).is_err() {
                panic!("too many partitions");
            }
            ringbuf_entry!(self.trace, Trace::Loaded { pid: desc.pid });

            let mut service_set = 0;
            for service in desc.services {
                self.registry.register(service, index);
                service_set |= service.signal;
            }

            let token = match self.platform.bind_boundaries(desc) {
                Ok(t) => t,
                Err(e) => panic!("binding partition {}: {e:?}", desc.pid),
            };
            self.partitions[index].boundary = token;
            ringbuf_entry!(self.trace, Trace::Bound { pid: desc.pid, token });

            B::comp_init(self, index, service_set);
        }
    }

    /// Starts the system. Only returns on platforms whose scheduler does.
    pub fn run(&mut self) -> u32 {
        B::system_run(self)
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    pub fn nspm_mut(&mut self) -> &mut Nspm {
        &mut self.nspm
    }

    pub fn partition(&self, pid: i32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.pid() == pid)
    }

    pub(crate) fn partition_index(&self, pid: i32) -> Option<usize> {
        self.partitions.iter().position(|p| p.pid() == pid)
    }

    /// Id of the running partition, or `INVALID_PARTITION_ID` before any
    /// runs.
    pub fn current_pid(&self) -> i32 {
        self.current
            .map_or(INVALID_PARTITION_ID, |p| self.partitions[p].pid())
    }

    /// Index of the running partition. Partition-facing calls can only come
    /// from a running partition, so there must be one.
    pub(crate) fn current_index(&self) -> usize {
        match self.current {
            Some(p) => p,
            None => panic!("no partition running"),
        }
    }

    /// Partition that owns `thread`. Every thread the SPM schedules belongs to
    /// some partition.
    pub(crate) fn owner_of(&self, thread: ThreadId) -> usize {
        let p = self.platform.owner(thread);
        if p >= self.partitions.len() {
            panic!("thread {:#x} has no partition", thread.0);
        }
        p
    }

    /// Checks whether the running partition is calling on behalf of the
    /// non-secure world.
    pub fn is_ns_caller(&self) -> bool {
        self.current
            .is_some_and(|p| self.partitions[p].desc.is_ns_agent())
    }

    /// Client id to stamp on a call. Non-secure calls carry the id of the
    /// non-secure client; secure calls carry the calling partition's id.
    pub fn client_id(&self, ns: bool) -> i32 {
        let id = if ns {
            self.nspm.client_id()
        } else {
            self.current_pid()
        };
        uassert!(client_id_is_ns(id) == ns);
        id
    }

    /// Stops partition `index` for good. The first fault recorded is the one
    /// that sticks. A partition with its own thread never runs again.
    pub fn force_fault(&mut self, index: usize, fault: Fault) {
        let part = &mut self.partitions[index];
        if part.is_faulted() {
            return;
        }
        part.state = PartitionState::Faulted(fault);
        if let Some(t) = part.thread {
            self.platform.block(t);
        }
        ringbuf_entry!(
            self.trace,
            Trace::Faulted {
                pid: part.desc.pid,
                fault
            }
        );
    }

    pub(crate) fn fault_current(&mut self, fault: Fault) {
        let p = self.current_index();
        self.force_fault(p, fault);
    }

    /// Applies the programmer error policy to `status` on its way back to the
    /// running partition: a secure caller that earned a programmer error or a
    /// refused connection is faulted; the non-secure world just gets told.
    pub fn handle_programmer_errors(&mut self, status: i32) -> i32 {
        use abi::status::{CONNECTION_REFUSED, PROGRAMMER_ERROR};

        if (status == PROGRAMMER_ERROR || status == CONNECTION_REFUSED)
            && !self.is_ns_caller()
        {
            if let Some(p) = self.current {
                ringbuf_entry!(
                    self.trace,
                    Trace::ProgrammerError {
                        pid: self.partitions[p].pid(),
                        status
                    }
                );
                self.force_fault(p, Fault::ProgrammerError);
            }
        }
        status
    }

    /// Checks a client-supplied buffer before anything is done with it.
    pub fn memory_check(
        &self,
        base: u32,
        len: u32,
        ns: bool,
        access: Access,
        privileged: bool,
    ) -> Result<(), SpmError> {
        if len == 0 {
            return Ok(());
        }
        if base == 0 {
            return Err(SpmError::BadParameters);
        }
        if base > u32::MAX - len {
            return Err(SpmError::MemoryCheck);
        }

        let mut attr = AccessAttr::READABLE;
        if access == Access::ReadWrite {
            attr |= AccessAttr::WRITABLE;
        }
        if !privileged {
            attr |= AccessAttr::UNPRIV;
        }
        if ns {
            attr |= AccessAttr::NS;
        }

        self.platform
            .memory_has_access(base, len, attr)
            .map_err(|_| SpmError::MemoryCheck)
    }

    /// Whether memory checks on the current partition's behalf are done at
    /// privileged level.
    pub(crate) fn current_is_privileged(&self, ns: bool) -> bool {
        !ns && self
            .current
            .is_some_and(|p| self.partitions[p].desc.is_privileged())
    }

    pub(crate) fn conn(&self, c: ConnRef) -> Option<&ConnHandle> {
        match c {
            ConnRef::Pool(slot) => self.pool.get(slot),
            ConnRef::Static(i) => {
                self.registry.stateless(i).and(self.statics.get(i))
            }
        }
    }

    pub(crate) fn conn_mut(&mut self, c: ConnRef) -> Option<&mut ConnHandle> {
        match c {
            ConnRef::Pool(slot) => self.pool.get_mut(slot),
            ConnRef::Static(i) => {
                if self.registry.stateless(i).is_some() {
                    self.statics.get_mut(i)
                } else {
                    None
                }
            }
        }
    }

    /// Looks up a record the caller has already established exists. Failing
    /// to find it means our own bookkeeping is broken.
    pub(crate) fn live_conn(&mut self, c: ConnRef) -> &mut ConnHandle {
        match self.conn_mut(c) {
            Some(conn) => conn,
            None => panic!("dangling connection {c:?}"),
        }
    }

    /// Partition providing the service `c` is connected to.
    pub(crate) fn target_of(&self, c: ConnRef) -> usize {
        match self.conn(c).and_then(|conn| conn.service) {
            Some(svc) => self.registry.get(svc).partition,
            None => panic!("connection {c:?} has no service"),
        }
    }

    /// Allocates a pool record connected to service `service`.
    pub(crate) fn create_conn(
        &mut self,
        service: usize,
        client_id: i32,
    ) -> Result<usize, SpmError> {
        let slot = self.pool.alloc().ok_or(SpmError::Exhausted)?;
        self.live_conn(ConnRef::Pool(slot)).open(service, client_id);
        Ok(slot)
    }

    /// Confirms that `slot` is a live pool record belonging to `client_id`.
    pub(crate) fn validate_conn(
        &self,
        slot: usize,
        client_id: i32,
    ) -> Result<(), SpmError> {
        match self.pool.get(slot) {
            Some(conn) if conn.client_id == client_id => Ok(()),
            _ => Err(SpmError::Generic),
        }
    }

    /// Retires a record. The liveness tag is cleared before the slot goes
    /// back to the pool, so nothing can observe a free but still tagged
    /// record.
    pub(crate) fn free_conn(&mut self, c: ConnRef) {
        critical_section::with(|_| {
            self.live_conn(c).magic = 0;
            if let ConnRef::Pool(slot) = c {
                self.pool.free(slot);
            }
        })
    }

    /// Turns a message handle from a partition into the record it names.
    ///
    /// The handle must decode to an allocated record (pool or stateless), the
    /// record must hold a message, and the message must be for a service of
    /// the running partition.
    pub fn resolve_user_handle(&self, handle: Handle) -> Option<ConnRef> {
        let c = self.codec.decode(handle)?;
        let conn = self.conn(c)?;
        if !conn.is_live() {
            return None;
        }
        let svc = conn.service?;
        if Some(self.registry.get(svc).partition) != self.current {
            return None;
        }
        Some(c)
    }

    /// User-visible handle of record `c`.
    pub(crate) fn user_handle(&self, c: ConnRef) -> Handle {
        match self.conn(c) {
            Some(conn) => conn.msg.handle,
            None => Handle::NULL,
        }
    }

    /// Reports bytes written back into the client's output vector array.
    pub(crate) fn propagate_output_lengths(&mut self, c: ConnRef) {
        let record = match c {
            ConnRef::Pool(slot) => self.pool.get(slot),
            ConnRef::Static(i) => self.statics.get(i),
        };
        let Some(record) = record else {
            panic!("dangling connection {c:?}");
        };
        // A queued client is parked on the record until the reply.
        if record.sfn_magic != SFN_MAGIC {
            if let Some(t) = record.ack.owner() {
                uassert!(self.platform.is_blocked(t));
            }
        }
        record.propagate_output_lengths(&mut self.platform);
    }

    /// Raises `signal` on partition `index`.
    pub(crate) fn assert_signal(&mut self, index: usize, signal: u32) {
        let part = &mut self.partitions[index];
        part.assert_signal(&mut self.platform, signal);
        ringbuf_entry!(
            self.trace,
            Trace::Signal {
                pid: part.desc.pid,
                signal
            }
        );
    }

    /// Takes the oldest message queued on partition `index` for `signal`.
    pub(crate) fn handle_by_signal(
        &mut self,
        index: usize,
        signal: u32,
    ) -> Option<ConnRef> {
        self.partitions[index].dequeue(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Sfn;
    use crate::testutil::{self, FakePlatform};
    use abi::status;

    fn booted() -> Spm<FakePlatform, Sfn> {
        let mut spm = Spm::new(testutil::platform());
        spm.init(&testutil::SFN_TABLE);
        spm.run();
        spm
    }

    #[test]
    fn pooled_handles_resolve_only_while_allocated() {
        let mut spm = booted();
        let svc = spm.registry.find_by_sid(testutil::ECHO_SID).unwrap();
        let slot = spm.create_conn(svc, testutil::CLIENT_PID).unwrap();
        let h = spm.codec.encode(slot);
        let caller = spm.current;
        spm.live_conn(ConnRef::Pool(slot)).fill(
            svc,
            caller,
            h,
            abi::IPC_CALL,
            testutil::CLIENT_PID,
            &[],
            &[],
            0,
        );

        // Only the owning partition may resolve it.
        spm.current = spm.partition_index(testutil::CLIENT_PID);
        assert_eq!(spm.resolve_user_handle(h), None);
        spm.current = spm.partition_index(testutil::SERVICE_PID);
        assert_eq!(spm.resolve_user_handle(h), Some(ConnRef::Pool(slot)));

        spm.free_conn(ConnRef::Pool(slot));
        assert_eq!(spm.resolve_user_handle(h), None);
    }

    #[test]
    fn never_allocated_handles_do_not_resolve() {
        let mut spm = booted();
        spm.current = spm.partition_index(testutil::SERVICE_PID);
        for raw in [1, 2, 0x3F, 0x3FFF_FFFF, -1, 0] {
            assert_eq!(spm.resolve_user_handle(Handle(raw)), None);
        }
        // Static handle for an empty stateless slot.
        assert_eq!(spm.resolve_user_handle(Handle::for_static(30, 1)), None);
    }

    #[test]
    fn memory_check_edges() {
        let spm = booted();
        let base = testutil::CLIENT_RAM;
        assert_eq!(
            spm.memory_check(0, 0, false, Access::ReadOnly, false),
            Ok(())
        );
        assert_eq!(
            spm.memory_check(0, 4, false, Access::ReadOnly, false),
            Err(SpmError::BadParameters)
        );
        assert_eq!(
            spm.memory_check(u32::MAX - 3, 8, false, Access::ReadOnly, false),
            Err(SpmError::MemoryCheck)
        );
        assert_eq!(
            spm.memory_check(base, 16, false, Access::ReadWrite, false),
            Ok(())
        );
        assert_eq!(
            spm.memory_check(
                testutil::RO_RAM,
                16,
                false,
                Access::ReadWrite,
                false
            ),
            Err(SpmError::MemoryCheck)
        );
        assert_eq!(
            spm.memory_check(testutil::RO_RAM, 16, false, Access::ReadOnly, false),
            Ok(())
        );
    }

    #[test]
    fn client_ids_follow_the_caller() {
        let mut spm = booted();
        spm.current = spm.partition_index(testutil::CLIENT_PID);
        assert_eq!(spm.client_id(false), testutil::CLIENT_PID);

        spm.current = spm.partition_index(testutil::NS_AGENT_PID);
        assert!(spm.is_ns_caller());
        assert_eq!(spm.client_id(true), -1);
        spm.nspm_mut().set_client_id(-9);
        assert_eq!(spm.client_id(true), -9);
    }

    #[test]
    #[should_panic]
    fn secure_id_without_a_partition_panics() {
        let mut spm = booted();
        spm.current = None;
        spm.client_id(false);
    }

    #[test]
    fn programmer_errors_fault_secure_callers_only() {
        let mut spm = booted();
        let client = spm.partition_index(testutil::CLIENT_PID).unwrap();
        let agent = spm.partition_index(testutil::NS_AGENT_PID).unwrap();

        spm.current = Some(agent);
        assert_eq!(
            spm.handle_programmer_errors(status::PROGRAMMER_ERROR),
            status::PROGRAMMER_ERROR
        );
        assert!(!spm.partitions[agent].is_faulted());

        spm.current = Some(client);
        spm.handle_programmer_errors(status::CONNECTION_BUSY);
        assert!(!spm.partitions[client].is_faulted());
        spm.handle_programmer_errors(status::CONNECTION_REFUSED);
        assert_eq!(
            spm.partitions[client].state,
            PartitionState::Faulted(Fault::ProgrammerError)
        );
    }

    #[test]
    fn first_fault_sticks() {
        let mut spm = booted();
        let p = spm.partition_index(testutil::SERVICE_PID).unwrap();
        spm.force_fault(p, Fault::Panicked);
        spm.force_fault(p, Fault::BadSignal);
        assert_eq!(
            spm.partitions[p].state,
            PartitionState::Faulted(Fault::Panicked)
        );
        assert!(spm.trace().payloads().any(|t| t
            == Trace::Faulted {
                pid: testutil::SERVICE_PID,
                fault: Fault::Panicked
            }));
    }
}
