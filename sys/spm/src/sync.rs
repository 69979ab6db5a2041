// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wait objects: a single thread parked until somebody wakes it with a value.

use crate::hal::{ThreadId, Threads};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncObj {
    owner: Option<ThreadId>,
}

impl SyncObj {
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Parks `thread` on this object.
    pub fn wait_on<T: Threads + ?Sized>(
        &mut self,
        threads: &mut T,
        thread: ThreadId,
    ) {
        self.owner = Some(thread);
        threads.block(thread);
    }

    /// Forgets the parked thread without waking it.
    pub fn abandon(&mut self) {
        self.owner = None;
    }

    /// Wakes the parked thread, if it is still blocked, handing it `retval`.
    /// Returns `true` if a thread was woken.
    pub fn wake_up<T: Threads + ?Sized>(
        &mut self,
        threads: &mut T,
        retval: u32,
    ) -> bool {
        match self.owner {
            Some(t) if threads.is_blocked(t) => {
                threads.wake(t, retval);
                self.owner = None;
                true
            }
            _ => false,
        }
    }
}
