// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime state of a loaded partition.

use abi::{BoundaryToken, STATELESS_HANDLE_LIMIT};
use heapless::Vec;

use crate::config::CONN_HANDLE_MAX_NUM;
use crate::descs::PartitionDesc;
use crate::err::Fault;
use crate::hal::{ThreadId, Threads};
use crate::handle::ConnRef;
use crate::sync::SyncObj;

/// Every connection record can be waiting on some partition at once, but
/// never on two.
const QUEUE_DEPTH: usize = CONN_HANDLE_MAX_NUM + STATELESS_HANDLE_LIMIT;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PartitionState {
    /// Directly-called partition whose init routine hasn't run yet.
    NotInited,
    Inited,
    /// Stopped for good. Nothing is dispatched to it again.
    Faulted(Fault),
}

/// A message waiting to be picked up, and the signal it arrived on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Pending {
    conn: ConnRef,
    signal: u32,
}

pub struct Partition {
    pub desc: &'static PartitionDesc,
    pub state: PartitionState,
    pub boundary: BoundaryToken,
    pub thread: Option<ThreadId>,
    pub signals_allowed: u32,
    pub signals_asserted: u32,
    pub signals_waiting: u32,
    pub waitobj: SyncObj,
    /// Message being handled by direct call, if any.
    pub active: Option<ConnRef>,
    queue: Vec<Pending, QUEUE_DEPTH>,
}

impl Partition {
    pub fn new(desc: &'static PartitionDesc) -> Self {
        Self {
            desc,
            state: PartitionState::NotInited,
            boundary: BoundaryToken::default(),
            thread: None,
            signals_allowed: 0,
            signals_asserted: 0,
            signals_waiting: 0,
            waitobj: SyncObj::default(),
            active: None,
            queue: Vec::new(),
        }
    }

    pub fn pid(&self) -> i32 {
        self.desc.pid
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state, PartitionState::Faulted(_))
    }

    /// Queues `conn` for pickup with `get(signal)`.
    pub fn enqueue(&mut self, conn: ConnRef, signal: u32) {
        // A record is queued at most once, so this can't overflow unless our
        // bookkeeping is wrong.
        if self.queue.push(Pending { conn, signal }).is_err() {
            panic!("message queue overflow");
        }
    }

    /// Takes the oldest message that arrived on `signal`.
    ///
    /// When that was the only one, the signal is deasserted; otherwise it
    /// stays up for the rest.
    pub fn dequeue(&mut self, signal: u32) -> Option<ConnRef> {
        critical_section::with(|_| {
            let pos = self.queue.iter().position(|p| p.signal == signal)?;
            let count =
                self.queue.iter().filter(|p| p.signal == signal).count();
            let conn = self.queue[pos].conn;

            self.queue[pos..].rotate_left(1);
            self.queue.pop();

            if count == 1 {
                self.signals_asserted &= !signal;
            }
            Some(conn)
        })
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Raises `signal`, waking the partition if it is waiting on it.
    ///
    /// The woken thread gets every asserted signal it was waiting on, not just
    /// this one; only this signal is dropped from the waiting set.
    pub fn assert_signal<T: Threads + ?Sized>(
        &mut self,
        threads: &mut T,
        signal: u32,
    ) {
        critical_section::with(|_| {
            self.signals_asserted |= signal;
            if self.signals_waiting & signal != 0 {
                self.waitobj.wake_up(
                    threads,
                    self.signals_asserted & self.signals_waiting,
                );
                self.signals_waiting &= !signal;
            }
        })
    }
}
