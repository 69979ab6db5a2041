// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A host platform for tests: recording fakes for every platform trait, and
//! small partition tables to boot against.

use std::collections::HashMap;

use abi::{
    status, BoundaryToken, Handle, IoVec, Msg, PartitionFlags, ServiceFlags,
    Sid, VersionPolicy, IPC_CALL, IPC_CONNECT, NS_AGENT_ID,
};
use zerocopy::IntoBytes;

use crate::descs::{Asset, Entry, PartitionDesc, ServiceDesc};
use crate::err::HalError;
use crate::hal::{
    AccessAttr, ClientMemory, ContextCtrl, Cpu, Isolation, ThreadId,
    ThreadSpec, Threads,
};
use crate::interface::Psa;
use crate::isolation::{
    AccessRegion, MmioDevice, Mpu, MpuRegion, ReferenceIsolation, RegionAttr,
    REGION_COUNT,
};

pub const CLIENT_RAM: u32 = 0x2000_0000;
pub const SERVICE_RAM: u32 = 0x2000_4000;
pub const RO_RAM: u32 = 0x2000_8000;
pub const PRIV_RAM: u32 = 0x2000_9000;
pub const NS_RAM: u32 = 0x2800_0000;

const SECURE_END: u32 = 0x2000_A000;
const NS_END: u32 = 0x2800_4000;

static MAP: [AccessRegion; 5] = [
    AccessRegion {
        base: CLIENT_RAM,
        limit: SERVICE_RAM,
        attr: RegionAttr::READ
            .union(RegionAttr::WRITE)
            .union(RegionAttr::UNPRIV),
    },
    AccessRegion {
        base: SERVICE_RAM,
        limit: RO_RAM,
        attr: RegionAttr::READ
            .union(RegionAttr::WRITE)
            .union(RegionAttr::UNPRIV),
    },
    AccessRegion {
        base: RO_RAM,
        limit: PRIV_RAM,
        attr: RegionAttr::READ.union(RegionAttr::UNPRIV),
    },
    AccessRegion {
        base: PRIV_RAM,
        limit: SECURE_END,
        attr: RegionAttr::READ.union(RegionAttr::WRITE),
    },
    AccessRegion {
        base: NS_RAM,
        limit: NS_END,
        attr: RegionAttr::READ
            .union(RegionAttr::WRITE)
            .union(RegionAttr::UNPRIV)
            .union(RegionAttr::NS),
    },
];

static MMIO: [MmioDevice; 1] = [MmioDevice {
    id: 1,
    base: 0x4000_0000,
    limit: 0x4000_1000,
}];

/// Byte-addressed memory over a few windows of the address space.
#[derive(Debug, Default)]
pub struct FlatMemory {
    windows: Vec<(u32, Vec<u8>)>,
}

impl FlatMemory {
    pub fn new(base: u32, size: usize) -> Self {
        Self::default().with_window(base, size)
    }

    pub fn with_window(mut self, base: u32, size: usize) -> Self {
        self.windows.push((base, vec![0; size]));
        self
    }

    fn locate(&self, addr: u32, len: usize) -> (usize, usize) {
        for (i, (base, bytes)) in self.windows.iter().enumerate() {
            if addr >= *base {
                let off = (addr - base) as usize;
                if off + len <= bytes.len() {
                    return (i, off);
                }
            }
        }
        panic!("{len} bytes at {addr:#x} are outside fake memory");
    }

    pub fn put_vectors(&mut self, addr: u32, vecs: &[IoVec]) {
        self.write(addr, vecs.as_bytes());
    }

    pub fn get_vectors(&self, addr: u32, n: usize) -> Vec<IoVec> {
        let mut vecs = vec![IoVec::default(); n];
        self.read(addr, vecs.as_mut_bytes());
        vecs
    }
}

impl ClientMemory for FlatMemory {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        let (w, off) = self.locate(addr, buf.len());
        buf.copy_from_slice(&self.windows[w].1[off..off + buf.len()]);
    }

    fn write(&mut self, addr: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let (w, off) = self.locate(addr, data.len());
        self.windows[w].1[off..off + data.len()].copy_from_slice(data);
    }
}

#[derive(Debug)]
struct FakeThread {
    ctx: ContextCtrl,
    priority: u8,
    owner: usize,
    blocked: bool,
}

/// A thread table with the scheduling decisions left to the test.
#[derive(Debug, Default)]
pub struct FakeThreads {
    threads: Vec<FakeThread>,
    pub current: Option<ThreadId>,
    pub next: Option<ThreadId>,
    pub locked: bool,
    /// Set whenever a thread blocks or wakes; cleared by a switch.
    pub pending_switch: bool,
    pub wakes: Vec<(ThreadId, u32)>,
}

impl FakeThreads {
    const ID_BASE: u32 = 0x3000_0000;
    const ID_STRIDE: u32 = 0x40;

    fn slot(&self, t: ThreadId) -> usize {
        let i = ((t.0 - Self::ID_BASE) / Self::ID_STRIDE) as usize;
        assert!(i < self.threads.len(), "unknown thread {:#x}", t.0);
        i
    }

    fn id(i: usize) -> ThreadId {
        ThreadId(Self::ID_BASE + i as u32 * Self::ID_STRIDE)
    }
}

impl Threads for FakeThreads {
    fn current(&self) -> Option<ThreadId> {
        self.current
    }

    fn next(&self) -> Option<ThreadId> {
        self.next
    }

    fn commit(&mut self, thread: ThreadId) {
        self.current = Some(thread);
        self.pending_switch = false;
    }

    fn context(&self, thread: ThreadId) -> ContextCtrl {
        self.threads[self.slot(thread)].ctx
    }

    fn owner(&self, thread: ThreadId) -> usize {
        self.threads[self.slot(thread)].owner
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn start(&mut self, spec: ThreadSpec) -> ThreadId {
        self.threads.push(FakeThread {
            ctx: spec.ctx,
            priority: spec.priority,
            owner: spec.owner,
            blocked: false,
        });
        Self::id(self.threads.len() - 1)
    }

    fn start_scheduler(&mut self) -> u32 {
        self.current = self
            .threads
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.blocked)
            .min_by_key(|(_, t)| t.priority)
            .map(|(i, _)| Self::id(i));
        self.pending_switch = false;
        0
    }

    fn block(&mut self, thread: ThreadId) {
        let i = self.slot(thread);
        self.threads[i].blocked = true;
        self.pending_switch = true;
    }

    fn wake(&mut self, thread: ThreadId, retval: u32) {
        let i = self.slot(thread);
        self.threads[i].blocked = false;
        self.wakes.push((thread, retval));
        self.pending_switch = true;
    }

    fn is_blocked(&self, thread: ThreadId) -> bool {
        self.threads[self.slot(thread)].blocked
    }

    fn expecting_schedule(&self) -> bool {
        self.pending_switch
    }
}

/// An MPU that remembers what it was told.
#[derive(Debug, Default)]
pub struct RecordingMpu {
    pub privileged: Option<bool>,
    pub regions: [Option<MpuRegion>; REGION_COUNT],
    pub writes: usize,
}

impl Mpu for RecordingMpu {
    fn set_privileged(&mut self, privileged: bool) {
        self.privileged = Some(privileged);
        self.writes += 1;
    }

    fn enable_region(&mut self, index: usize, region: MpuRegion) {
        self.regions[index] = Some(region);
        self.writes += 1;
    }

    fn disable_region(&mut self, index: usize) {
        self.regions[index] = None;
        self.writes += 1;
    }
}

/// The region-table HAL over a recording MPU, plus hooks for steering it.
pub struct FakeIsolation {
    pub inner: ReferenceIsolation<RecordingMpu>,
    /// Tokens to hand out instead of binding, by partition id.
    pub tokens: HashMap<i32, BoundaryToken>,
    pub bound: Vec<i32>,
    pub updates: Vec<(i32, BoundaryToken)>,
    pub fail_update: bool,
}

impl Default for FakeIsolation {
    fn default() -> Self {
        Self {
            inner: ReferenceIsolation::new(
                RecordingMpu::default(),
                &MMIO,
                &MAP,
            ),
            tokens: HashMap::new(),
            bound: Vec::new(),
            updates: Vec::new(),
            fail_update: false,
        }
    }
}

impl Isolation for FakeIsolation {
    fn bind_boundaries(
        &mut self,
        desc: &PartitionDesc,
    ) -> Result<BoundaryToken, HalError> {
        self.bound.push(desc.pid);
        match self.tokens.get(&desc.pid) {
            Some(t) => Ok(*t),
            None => self.inner.bind_boundaries(desc),
        }
    }

    fn update_boundaries(
        &mut self,
        desc: &PartitionDesc,
        token: BoundaryToken,
    ) -> Result<(), HalError> {
        if self.fail_update {
            return Err(HalError::Generic);
        }
        self.updates.push((desc.pid, token));
        if self.tokens.values().any(|t| *t == token) {
            Ok(())
        } else {
            self.inner.update_boundaries(desc, token)
        }
    }

    fn memory_has_access(
        &self,
        base: u32,
        len: u32,
        attr: AccessAttr,
    ) -> Result<(), HalError> {
        self.inner.memory_has_access(base, len, attr)
    }
}

#[derive(Debug)]
pub struct FakeCpu {
    pub psp: u32,
    pub pendsv: usize,
    pub fp_flushes: usize,
}

impl Default for FakeCpu {
    fn default() -> Self {
        Self {
            // Above every stack, so headroom checks pass unless a test says
            // otherwise.
            psp: u32::MAX,
            pendsv: 0,
            fp_flushes: 0,
        }
    }
}

pub struct FakePlatform {
    pub mem: FlatMemory,
    pub threads: FakeThreads,
    pub iso: FakeIsolation,
    pub cpu: FakeCpu,
}

impl Isolation for FakePlatform {
    fn bind_boundaries(
        &mut self,
        desc: &PartitionDesc,
    ) -> Result<BoundaryToken, HalError> {
        self.iso.bind_boundaries(desc)
    }

    fn update_boundaries(
        &mut self,
        desc: &PartitionDesc,
        token: BoundaryToken,
    ) -> Result<(), HalError> {
        self.iso.update_boundaries(desc, token)
    }

    fn memory_has_access(
        &self,
        base: u32,
        len: u32,
        attr: AccessAttr,
    ) -> Result<(), HalError> {
        self.iso.memory_has_access(base, len, attr)
    }
}

impl ClientMemory for FakePlatform {
    fn read(&self, addr: u32, buf: &mut [u8]) {
        self.mem.read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) {
        self.mem.write(addr, data)
    }
}

impl Threads for FakePlatform {
    fn current(&self) -> Option<ThreadId> {
        self.threads.current()
    }

    fn next(&self) -> Option<ThreadId> {
        self.threads.next()
    }

    fn commit(&mut self, thread: ThreadId) {
        self.threads.commit(thread)
    }

    fn context(&self, thread: ThreadId) -> ContextCtrl {
        self.threads.context(thread)
    }

    fn owner(&self, thread: ThreadId) -> usize {
        self.threads.owner(thread)
    }

    fn is_locked(&self) -> bool {
        self.threads.is_locked()
    }

    fn start(&mut self, spec: ThreadSpec) -> ThreadId {
        self.threads.start(spec)
    }

    fn start_scheduler(&mut self) -> u32 {
        self.threads.start_scheduler()
    }

    fn block(&mut self, thread: ThreadId) {
        self.threads.block(thread)
    }

    fn wake(&mut self, thread: ThreadId, retval: u32) {
        self.threads.wake(thread, retval)
    }

    fn is_blocked(&self, thread: ThreadId) -> bool {
        self.threads.is_blocked(thread)
    }

    fn expecting_schedule(&self) -> bool {
        self.threads.expecting_schedule()
    }
}

impl Cpu for FakePlatform {
    fn psp(&self) -> u32 {
        self.cpu.psp
    }

    fn flush_fp_context(&mut self) {
        self.cpu.fp_flushes += 1;
    }

    fn trigger_pendsv(&mut self) -> u32 {
        self.cpu.pendsv += 1;
        0
    }
}

pub fn platform() -> FakePlatform {
    platform_with(FakeIsolation::default())
}

pub fn platform_with(iso: FakeIsolation) -> FakePlatform {
    FakePlatform {
        mem: FlatMemory::new(CLIENT_RAM, (SECURE_END - CLIENT_RAM) as usize)
            .with_window(NS_RAM, (NS_END - NS_RAM) as usize),
        threads: FakeThreads::default(),
        iso,
        cpu: FakeCpu::default(),
    }
}

pub const NS_AGENT_PID: i32 = NS_AGENT_ID;
pub const CLIENT_PID: i32 = 1;
pub const SERVICE_PID: i32 = 2;
pub const BROKEN_PID: i32 = 3;

pub const ECHO_SID: Sid = Sid(0x100);
pub const STATELESS_SID: Sid = Sid(0x101);
pub const MAPPING_SID: Sid = Sid(0x102);
pub const STRICT_SID: Sid = Sid(0x103);
pub const BROKEN_SID: Sid = Sid(0x104);

pub const ECHO_SIGNAL: u32 = 1 << 4;
pub const STATELESS_SIGNAL: u32 = 1 << 5;
pub const MAPPING_SIGNAL: u32 = 1 << 6;
pub const STRICT_SIGNAL: u32 = 1 << 7;

pub const STATELESS_INDEX: u8 = 3;

/// Request types understood by the echo service.
pub const ECHO: i32 = IPC_CALL;
pub const ECHO_PROGRAMMER_ERROR: i32 = 1;
pub const ECHO_OVERFLOW: i32 = 2;
pub const ECHO_PANIC: i32 = 3;

/// Reverse handle the echo service sets on every connection.
pub const ECHO_RHANDLE: u32 = 0xBEEF;

/// Copies input vector 0 to output vector 0, returning the byte count. The
/// other request types misbehave in the ways their names say.
fn echo(psa: &mut dyn Psa, msg: &Msg) -> i32 {
    match msg.ty {
        IPC_CONNECT => {
            psa.set_rhandle(msg.handle, ECHO_RHANDLE);
            status::SUCCESS
        }
        ECHO => {
            let mut buf = [0u8; 32];
            let n = psa.read(msg.handle, 0, &mut buf);
            psa.write(msg.handle, 0, &buf[..n]);
            n as i32
        }
        ECHO_PROGRAMMER_ERROR => status::PROGRAMMER_ERROR,
        ECHO_OVERFLOW => {
            psa.write(msg.handle, 0, &[0xEE; 64]);
            status::SUCCESS
        }
        ECHO_PANIC => {
            psa.panic();
            status::SUCCESS
        }
        _ => status::SUCCESS,
    }
}

/// Maps input 0 and output 0, and reports the whole input as produced.
/// Request type 1 maps the input twice.
fn mapping(psa: &mut dyn Psa, msg: &Msg) -> i32 {
    if !msg.is_request() {
        return status::SUCCESS;
    }
    let input = psa.map_invec(msg.handle, 0);
    if msg.ty == 1 {
        psa.map_invec(msg.handle, 0);
        return status::SUCCESS;
    }
    let output = psa.map_outvec(msg.handle, 0);
    psa.unmap_invec(msg.handle, 0);
    psa.unmap_outvec(msg.handle, 0, msg.in_size[0]);
    if input == 0 || output == 0 {
        status::GENERIC_ERROR
    } else {
        status::SUCCESS
    }
}

fn service_init(psa: &mut dyn Psa) -> i32 {
    if psa.framework_version() == abi::FRAMEWORK_VERSION {
        status::SUCCESS
    } else {
        status::GENERIC_ERROR
    }
}

fn broken_init(_psa: &mut dyn Psa) -> i32 {
    status::GENERIC_ERROR
}

const fn service(
    sid: Sid,
    signal: u32,
    flags: ServiceFlags,
    sfn: fn(&mut dyn Psa, &Msg) -> i32,
) -> ServiceDesc {
    ServiceDesc {
        sid,
        signal,
        flags,
        version: 1,
        version_policy: VersionPolicy::RELAXED,
        stateless_index: 0,
        sfn: Some(sfn),
    }
}

static SFN_SERVICES: [ServiceDesc; 4] = [
    service(ECHO_SID, ECHO_SIGNAL, ServiceFlags::NS_ACCESSIBLE, echo),
    ServiceDesc {
        stateless_index: STATELESS_INDEX,
        version_policy: VersionPolicy::STRICT,
        ..service(
            STATELESS_SID,
            STATELESS_SIGNAL,
            ServiceFlags::STATELESS.union(ServiceFlags::NS_ACCESSIBLE),
            echo,
        )
    },
    service(MAPPING_SID, MAPPING_SIGNAL, ServiceFlags::MM_IOVEC, mapping),
    ServiceDesc {
        version: 2,
        version_policy: VersionPolicy::STRICT,
        ..service(STRICT_SID, STRICT_SIGNAL, ServiceFlags::empty(), echo)
    },
];

static BROKEN_SERVICES: [ServiceDesc; 1] =
    [service(BROKEN_SID, ECHO_SIGNAL, ServiceFlags::empty(), echo)];

static CLIENT_DEPS: [Sid; 5] =
    [ECHO_SID, STATELESS_SID, MAPPING_SID, STRICT_SID, BROKEN_SID];

static CLIENT_ASSETS: [Asset; 1] = [Asset::Memory {
    start: CLIENT_RAM,
    limit: SERVICE_RAM,
}];

static SERVICE_ASSETS: [Asset; 2] = [
    Asset::Memory {
        start: SERVICE_RAM,
        limit: RO_RAM,
    },
    Asset::NamedMmio {
        device: 1,
        writable: true,
    },
];

const fn partition(
    pid: i32,
    flags: PartitionFlags,
    priority: u8,
    entry: Entry,
) -> PartitionDesc {
    PartitionDesc {
        pid,
        flags,
        priority,
        entry,
        stack_base: 0x3100_0000 + pid as u32 * 0x1000,
        stack_size: 0x800,
        deps: &[],
        assets: &[],
        services: &[],
    }
}

/// Direct-call system: the non-secure agent thread, a client partition, and
/// a partition providing every kind of service.
pub static SFN_TABLE: [PartitionDesc; 3] = [
    partition(
        NS_AGENT_PID,
        PartitionFlags::NS_AGENT,
        0,
        Entry::Thread(0x1000_0001),
    ),
    PartitionDesc {
        deps: &CLIENT_DEPS,
        assets: &CLIENT_ASSETS,
        ..partition(CLIENT_PID, PartitionFlags::empty(), 1, Entry::None)
    },
    PartitionDesc {
        services: &SFN_SERVICES,
        assets: &SERVICE_ASSETS,
        ..partition(
            SERVICE_PID,
            PartitionFlags::empty(),
            2,
            Entry::Init(service_init),
        )
    },
];

/// Like `SFN_TABLE`, with an extra partition whose init always fails.
pub static BROKEN_TABLE: [PartitionDesc; 3] = [
    partition(
        NS_AGENT_PID,
        PartitionFlags::NS_AGENT,
        0,
        Entry::Thread(0x1000_0001),
    ),
    PartitionDesc {
        deps: &CLIENT_DEPS,
        ..partition(CLIENT_PID, PartitionFlags::empty(), 1, Entry::None)
    },
    PartitionDesc {
        services: &BROKEN_SERVICES,
        ..partition(
            BROKEN_PID,
            PartitionFlags::empty(),
            2,
            Entry::Init(broken_init),
        )
    },
];

static IPC_SERVICES: [ServiceDesc; 1] = [ServiceDesc {
    sfn: None,
    ..service(ECHO_SID, ECHO_SIGNAL, ServiceFlags::empty(), echo)
}];

static IPC_CLIENT_DEPS: [Sid; 1] = [ECHO_SID];

/// Queued-message system: a client thread and a service thread.
pub static IPC_TABLE: [PartitionDesc; 2] = [
    PartitionDesc {
        deps: &IPC_CLIENT_DEPS,
        assets: &CLIENT_ASSETS,
        ..partition(
            CLIENT_PID,
            PartitionFlags::IPC,
            1,
            Entry::Thread(0x1000_0101),
        )
    },
    PartitionDesc {
        services: &IPC_SERVICES,
        assets: &SERVICE_ASSETS,
        ..partition(
            SERVICE_PID,
            PartitionFlags::IPC,
            2,
            Entry::Thread(0x1000_0201),
        )
    },
];

/// Handle for the stateless service at version 1.
pub const STATELESS_HANDLE: Handle = Handle::for_static(STATELESS_INDEX, 1);
