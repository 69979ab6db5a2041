// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-size event trace for code that cannot afford to format strings.
//!
//! A [`Ringbuf`] holds the last `N` events recorded into it. Each entry
//! carries the source line that recorded it, a payload, a generation number
//! bumped every time the slot is overwritten, and a repeat count: recording
//! the same payload from the same line twice in a row bumps the count of the
//! existing entry instead of consuming a new slot. A debugger (or a test) can
//! then read the buffer back to see what happened leading up to a failure.
//!
//! Unlike a static ring buffer, a `Ringbuf` here is an ordinary value; embed
//! it in whatever structure owns the events:
//!
//! ```
//! struct Driver {
//!     trace: Ringbuf<Event, 32>,
//! }
//!
//! ringbuf_entry!(driver.trace, Event::Reset);
//! ```
//!
//! Payloads must be `Copy + PartialEq`.

#![cfg_attr(not(test), no_std)]

/// Records `payload` into the ring buffer `buf`, tagged with the current
/// source line.
///
/// `buf` is any place expression of type `Ringbuf<T, N>`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before borrowing the buffer, so the payload
        // expression may itself read from the structure owning the buffer.
        let p = $payload;
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

/// One recorded event.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring of `N` events of type `T`.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Makes an empty buffer. `init` fills the unused slots and is never
    /// reported by [`Ringbuf::iter`].
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // `last` is None only before the first insertion; treating that as an
        // out-of-range index sends us down the "new slot at 0" path below.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        // No remainder here: most of our targets lack a hardware divider, and
        // wrapping usize::MAX to 0 also covers the first insertion.
        let ndx = {
            let next = last.wrapping_add(1);
            if next >= N {
                0
            } else {
                next
            }
        };

        if let Some(ent) = self.buffer.get_mut(ndx) {
            *ent = RingbufEntry {
                line,
                generation: ent.generation.wrapping_add(1),
                count: 1,
                payload,
            };
            self.last = Some(ndx);
        }
    }

    /// The most recently recorded entry, if any.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = self.last.map(|l| l + 1).unwrap_or(0);
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|e| e.count != 0)
    }

    /// Recorded payloads, oldest first. Repeats collapse to one item.
    pub fn payloads(&self) -> impl Iterator<Item = T> + '_ {
        self.iter().map(|e| e.payload)
    }
}
