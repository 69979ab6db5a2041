// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Where the SPM leaves its last words.
//!
//! Partition faults are survivable and are recorded in the partition table.
//! This module covers the rest: failures after which no partition can run
//! safely, all of which reach `die` through the panic handler.
//!
//! - Boot: a partition table the isolation hardware can't bind, more
//!   partitions or services than the static tables hold, or a reused
//!   stateless slot.
//! - Scheduling: a boundary switch the hardware rejects, or an outgoing
//!   stack without room for the rest of its context.
//! - Messaging: a connection record that no longer points at a live
//!   service, or a full message queue.
//!
//! Tooling reads two symbols. `SPM_HAS_FAILED` goes true on the way down.
//! `SPM_EPITAPH` holds the start of the panic message as UTF-8, NUL padded.

use core::fmt::{Display, Write};
use core::sync::atomic::Ordering;

#[used]
static mut SPM_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

#[used]
static mut SPM_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

/// Claims the epitaph buffer. A panic while dying spins here instead of
/// overwriting the first message.
fn claim_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: only reached on the way down, with interrupts no longer
    // scheduling partitions.
    let already_failed = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(SPM_HAS_FAILED), true)
    };
    if already_failed {
        halt();
    }

    // Safety: only the first caller gets here.
    unsafe { &mut *core::ptr::addr_of_mut!(SPM_EPITAPH) }
}

fn halt() -> ! {
    loop {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Stops every partition for good, leaving `msg` for the debugger.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let mut epitaph = EpitaphWriter {
        dest: claim_epitaph(),
    };
    write!(epitaph, "{msg}").ok();
    halt()
}

/// Fills a fixed buffer front to back; the tail of a long message is lost.
struct EpitaphWriter<'a> {
    dest: &'a mut [u8],
}

impl Write for EpitaphWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, rest) = core::mem::take(&mut self.dest).split_at_mut(n);
        dest.copy_from_slice(&s[..n]);
        self.dest = rest;
        Ok(())
    }
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
