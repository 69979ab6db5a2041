// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use abi::{status, DOORBELL};

use super::{Backend, STATUS_NEED_SCHEDULE};
use crate::descs::Entry;
use crate::hal::{ContextCtrl, Platform, ThreadSpec};
use crate::handle::ConnRef;
use crate::partition::PartitionState;
use crate::spm::Spm;

/// Queued-message backend. Every partition owns a thread, and services run
/// when their thread is scheduled.
pub enum Ipc {}

impl Backend for Ipc {
    fn comp_init<P: Platform>(spm: &mut Spm<P, Self>, index: usize, services: u32) {
        let part = &mut spm.partitions[index];
        part.state = PartitionState::Inited;
        part.signals_allowed |= DOORBELL | services;

        let desc = part.desc;
        let Entry::Thread(entry) = desc.entry else {
            panic!("partition {} has no thread entry", desc.pid);
        };
        let t = spm.platform.start(ThreadSpec {
            ctx: ContextCtrl::for_stack(desc.stack_base, desc.stack_size),
            priority: desc.priority,
            entry,
            owner: index,
        });
        spm.partitions[index].thread = Some(t);
    }

    fn system_run<P: Platform>(spm: &mut Spm<P, Self>) -> u32 {
        let ret = spm.platform.start_scheduler();
        spm.current = spm.platform.current().map(|t| spm.owner_of(t));
        ret
    }

    fn messaging<P: Platform>(spm: &mut Spm<P, Self>, conn: ConnRef) -> i32 {
        let target = spm.target_of(conn);
        let signal = match spm.live_conn(conn).service {
            Some(svc) => spm.registry.get(svc).desc.signal,
            None => panic!("message without a service"),
        };

        critical_section::with(|_| {
            spm.partitions[target].enqueue(conn, signal);
        });
        spm.assert_signal(target, signal);

        let Some(client) = spm.platform.current() else {
            panic!("message sent with no thread running");
        };
        let mut ack = spm.live_conn(conn).ack;
        ack.wait_on(&mut spm.platform, client);
        spm.live_conn(conn).ack = ack;

        STATUS_NEED_SCHEDULE
    }

    fn replying<P: Platform>(
        spm: &mut Spm<P, Self>,
        conn: ConnRef,
        status: i32,
    ) -> i32 {
        let record = spm.live_conn(conn);
        let (mut ack, client) = (record.ack, record.client);
        let faulted = client.is_some_and(|c| spm.partitions[c].is_faulted());
        if faulted {
            ack.abandon();
        } else {
            ack.wake_up(&mut spm.platform, status as u32);
        }
        spm.live_conn(conn).ack = ack;
        status::SUCCESS
    }
}
