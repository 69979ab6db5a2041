// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler glue: picking the next thread and moving the isolation boundary
//! with it.

use ringbuf::ringbuf_entry;

use crate::arch::ADDITIONAL_CONTEXT_SIZE;
use crate::backend::Backend;
use crate::hal::{Platform, ThreadId};
use crate::spm::Spm;
use crate::trace::Trace;

/// The two contexts the switch trampoline moves between. Equal when no
/// switch is needed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchPair {
    pub curr: ThreadId,
    pub next: ThreadId,
}

/// The trampoline receives the pair in one 64-bit return value: current in
/// the low word, next in the high word.
impl From<SwitchPair> for u64 {
    fn from(p: SwitchPair) -> Self {
        u64::from(p.curr.0) | u64::from(p.next.0) << 32
    }
}

impl<P: Platform, B: Backend> Spm<P, B> {
    /// Decides what runs next. This is the only place the running thread
    /// changes.
    ///
    /// Moving to a thread of another partition loads that partition's
    /// isolation boundary first; moving between threads of one partition
    /// doesn't touch it.
    pub fn do_schedule(&mut self) -> SwitchPair {
        let Some(curr) = self.platform.current() else {
            panic!("schedule with no thread running");
        };
        let stay = SwitchPair { curr, next: curr };

        let Some(next) = self.platform.next() else {
            return stay;
        };
        if self.platform.is_locked() || next == curr {
            return stay;
        }

        let from = self.owner_of(curr);
        let to = self.owner_of(next);
        if from == to {
            self.platform.commit(next);
            return SwitchPair { curr, next };
        }

        // The outgoing stack must still have room for the rest of its
        // context.
        let limit = self.platform.context(curr).sp_limit;
        uassert!(
            u64::from(limit) + u64::from(ADDITIONAL_CONTEXT_SIZE)
                <= u64::from(self.platform.psp())
        );

        critical_section::with(|_| {
            let incoming = &self.partitions[to];
            if self.partitions[from].boundary != incoming.boundary {
                if let Err(e) = self
                    .platform
                    .update_boundaries(incoming.desc, incoming.boundary)
                {
                    panic!("switching to partition {}: {e:?}", incoming.pid());
                }
            }
            self.platform.flush_fp_context();
            self.platform.commit(next);
            self.current = Some(to);
        });

        ringbuf_entry!(
            self.trace,
            Trace::Switch {
                from: self.partitions[from].pid(),
                to: self.partitions[to].pid(),
            }
        );
        SwitchPair { curr, next }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Ipc;
    use crate::hal::{ContextCtrl, ThreadSpec, Threads};
    use crate::testutil::{self, FakePlatform};
    use abi::BoundaryToken;

    fn booted() -> Spm<FakePlatform, Ipc> {
        let mut spm = Spm::new(testutil::platform());
        spm.init(&testutil::IPC_TABLE);
        spm.run();
        spm
    }

    fn thread_of(spm: &Spm<FakePlatform, Ipc>, pid: i32) -> ThreadId {
        spm.partition(pid).and_then(|p| p.thread).unwrap()
    }

    #[test]
    fn pair_packs_next_high() {
        let p = SwitchPair {
            curr: ThreadId(0x2000_0100),
            next: ThreadId(0x2000_0200),
        };
        assert_eq!(u64::from(p), 0x2000_0200_2000_0100);
    }

    #[test]
    fn nothing_to_run_stays_put() {
        let mut spm = booted();
        let curr = spm.platform.threads.current.unwrap();
        spm.platform.threads.next = None;
        assert_eq!(spm.do_schedule(), SwitchPair { curr, next: curr });
    }

    #[test]
    fn locked_scheduler_stays_put() {
        let mut spm = booted();
        let curr = spm.platform.threads.current.unwrap();
        spm.platform.threads.next = Some(thread_of(&spm, testutil::SERVICE_PID));
        spm.platform.threads.locked = true;
        assert_eq!(spm.do_schedule(), SwitchPair { curr, next: curr });
        assert!(spm.platform.iso.updates.is_empty());
    }

    #[test]
    fn switching_partitions_moves_the_boundary() {
        let mut spm = booted();
        let curr = spm.platform.threads.current.unwrap();
        let next = thread_of(&spm, testutil::SERVICE_PID);
        spm.platform.threads.next = Some(next);

        assert_eq!(spm.do_schedule(), SwitchPair { curr, next });
        assert_eq!(spm.current_pid(), testutil::SERVICE_PID);
        assert_eq!(spm.platform.threads.current, Some(next));
        assert_eq!(spm.platform.iso.updates.len(), 1);
        assert_eq!(spm.platform.iso.updates[0].0, testutil::SERVICE_PID);
        assert_eq!(spm.platform.cpu.fp_flushes, 1);
    }

    #[test]
    fn same_token_skips_the_update() {
        let mut iso = testutil::FakeIsolation::default();
        iso.tokens.insert(testutil::CLIENT_PID, BoundaryToken(0x77));
        iso.tokens.insert(testutil::SERVICE_PID, BoundaryToken(0x77));
        let mut spm: Spm<FakePlatform, Ipc> =
            Spm::new(testutil::platform_with(iso));
        spm.init(&testutil::IPC_TABLE);
        spm.run();

        let client = thread_of(&spm, testutil::CLIENT_PID);
        spm.platform.threads.current = Some(client);
        spm.current = spm.partition_index(testutil::CLIENT_PID);
        let next = thread_of(&spm, testutil::SERVICE_PID);
        spm.platform.threads.next = Some(next);

        assert_eq!(spm.do_schedule(), SwitchPair { curr: client, next });
        assert!(spm.platform.iso.updates.is_empty());
        assert_eq!(spm.current_pid(), testutil::SERVICE_PID);
    }

    #[test]
    fn threads_of_one_partition_share_the_boundary() {
        let mut spm = booted();
        let client_index = spm.partition_index(testutil::CLIENT_PID).unwrap();
        let client = thread_of(&spm, testutil::CLIENT_PID);
        let sibling = spm.platform.threads.start(ThreadSpec {
            ctx: ContextCtrl::for_stack(0x2000_8000, 0x400),
            priority: 1,
            entry: 0x1000_0105,
            owner: client_index,
        });
        spm.platform.threads.current = Some(client);
        spm.current = Some(client_index);
        spm.platform.threads.next = Some(sibling);
        let flushes = spm.platform.cpu.fp_flushes;

        assert_eq!(
            spm.do_schedule(),
            SwitchPair { curr: client, next: sibling }
        );
        assert!(spm.platform.iso.updates.is_empty());
        assert_eq!(spm.platform.cpu.fp_flushes, flushes);
        assert_eq!(spm.current_pid(), testutil::CLIENT_PID);
        assert_eq!(spm.platform.threads.current, Some(sibling));
    }

    #[test]
    #[should_panic]
    fn exhausted_stack_panics() {
        let mut spm = booted();
        let curr = spm.platform.threads.current.unwrap();
        let limit = spm.platform.threads.context(curr).sp_limit;
        spm.platform.cpu.psp = limit + ADDITIONAL_CONTEXT_SIZE - 4;
        spm.platform.threads.next = Some(thread_of(&spm, testutil::SERVICE_PID));
        spm.do_schedule();
    }

    #[test]
    #[should_panic]
    fn failed_boundary_update_panics() {
        let mut spm = booted();
        spm.platform.iso.fail_update = true;
        spm.platform.threads.next = Some(thread_of(&spm, testutil::SERVICE_PID));
        spm.do_schedule();
    }
}
