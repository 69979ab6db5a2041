// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use abi::{status, DOORBELL};
use ringbuf::ringbuf_entry;

use super::Backend;
use crate::conn::SFN_MAGIC;
use crate::descs::Entry;
use crate::err::Fault;
use crate::hal::{ContextCtrl, Platform, ThreadSpec};
use crate::handle::ConnRef;
use crate::interface::Psa;
use crate::partition::PartitionState;
use crate::spm::Spm;
use crate::trace::Trace;

/// Direct-call backend.
///
/// Only partitions with a thread entry (in practice, the non-secure agent)
/// get a thread. Everything else runs on the stack of whoever called it.
pub enum Sfn {}

/// Runs the init routine of partition `index`, if it has one, with that
/// partition current. Returns the routine's failure status.
fn init_partition<P: Platform>(
    spm: &mut Spm<P, Sfn>,
    index: usize,
) -> Result<(), i32> {
    let desc = spm.partitions[index].desc;
    if let Entry::Init(init) = desc.entry {
        let status = init(spm as &mut dyn Psa);
        if status < status::SUCCESS {
            ringbuf_entry!(
                spm.trace,
                Trace::InitFailed {
                    pid: desc.pid,
                    status
                }
            );
            return Err(status);
        }
    }
    spm.partitions[index].state = PartitionState::Inited;
    ringbuf_entry!(spm.trace, Trace::Inited { pid: desc.pid });
    Ok(())
}

impl Backend for Sfn {
    fn comp_init<P: Platform>(spm: &mut Spm<P, Self>, index: usize, services: u32) {
        let part = &mut spm.partitions[index];
        part.state = PartitionState::NotInited;
        part.signals_allowed |= DOORBELL | services;

        let desc = part.desc;
        if let Entry::Thread(entry) = desc.entry {
            let t = spm.platform.start(ThreadSpec {
                ctx: ContextCtrl::for_stack(desc.stack_base, desc.stack_size),
                priority: desc.priority,
                entry,
                owner: index,
            });
            spm.partitions[index].thread = Some(t);
        }
    }

    fn system_run<P: Platform>(spm: &mut Spm<P, Self>) -> u32 {
        for index in 0..spm.partitions.len() {
            let part = &spm.partitions[index];
            if part.desc.is_ipc() || part.state != PartitionState::NotInited {
                continue;
            }
            spm.current = Some(index);
            if let Err(status) = init_partition(spm, index) {
                panic!(
                    "partition {} failed to start: {status}",
                    spm.partitions[index].pid()
                );
            }
        }

        let ret = spm.platform.start_scheduler();
        spm.current = spm.platform.current().map(|t| spm.owner_of(t));
        ret
    }

    fn messaging<P: Platform>(spm: &mut Spm<P, Self>, conn: ConnRef) -> i32 {
        let target = spm.target_of(conn);
        let record = spm.live_conn(conn);
        record.sfn_magic = SFN_MAGIC;
        let msg = record.msg;
        let svc = record.service;

        spm.partitions[target].active = Some(conn);
        spm.current = Some(target);

        if spm.partitions[target].state == PartitionState::NotInited {
            if let Err(status) = init_partition(spm, target) {
                spm.force_fault(target, Fault::InitFailed(status));
                return status::PROGRAMMER_ERROR;
            }
        }

        let entry = svc.and_then(|s| spm.registry.get(s).desc.sfn);
        let Some(sfn) = entry else {
            panic!("service of partition {} has no entry", spm.current_pid());
        };
        sfn(spm as &mut dyn Psa, &msg)
    }

    fn replying<P: Platform>(
        spm: &mut Spm<P, Self>,
        conn: ConnRef,
        status: i32,
    ) -> i32 {
        let target = spm.target_of(conn);
        spm.partitions[target].active = None;
        spm.current = spm.live_conn(conn).client;
        status
    }
}
