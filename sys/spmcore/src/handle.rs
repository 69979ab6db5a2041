// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Arithmetic for turning connection pool slots into user handles and back.
//!
//! A user handle is
//!
//! ```text
//! (slot << salt_bits) + USER_HANDLE_BASE + salt
//! ```
//!
//! where `salt` rotates through `0..2^salt_bits` on every encode. The same
//! slot therefore shows up under a different value each time it is handed
//! out, at least until the salt wraps. Nothing here proves a handle is live:
//! [`decode`] happily maps any in-range value onto a slot, and the caller must
//! check the slot against the pool afterwards.

/// Smallest user handle. Zero is the null handle.
pub const USER_HANDLE_BASE: i32 = 1;

/// Largest user handle. Bit 30 and up are reserved for static handles.
pub const USER_HANDLE_MAX: i32 = 0x3FFF_FFFF;

/// Upper bound on the salt width.
pub const MAX_SALT_BITS: u32 = 5;

/// Computes the user handle for `slot` under `salt`.
///
/// `salt` must be below `1 << salt_bits`.
#[inline]
pub const fn encode(slot: usize, salt: u32, salt_bits: u32) -> i32 {
    ((slot as i32) << salt_bits) + USER_HANDLE_BASE + salt as i32
}

/// Recovers the slot named by `user`, or `None` if `user` is outside the range
/// pool handles can occupy.
#[inline]
pub fn decode(user: i32, salt_bits: u32) -> Option<usize> {
    if !(USER_HANDLE_BASE..=USER_HANDLE_MAX).contains(&user) {
        return None;
    }
    Some(((user - USER_HANDLE_BASE) >> salt_bits) as usize)
}

/// Largest value [`encode`] can produce for a pool of `slots` entries. Used to
/// check a pool configuration at build time.
pub const fn max_user_handle(slots: usize, salt_bits: u32) -> u64 {
    ((slots as u64).saturating_sub(1) << salt_bits)
        + USER_HANDLE_BASE as u64
        + (1u64 << salt_bits)
        - 1
}

/// The rotating salt.
#[derive(Debug)]
pub struct Salt {
    bits: u32,
    next: u32,
}

impl Salt {
    pub const fn new(bits: u32) -> Self {
        Self { bits, next: 0 }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Returns the salt to use for this encode, and advances.
    pub fn take(&mut self) -> u32 {
        let salt = self.next;
        self.next = (salt + 1) & ((1 << self.bits) - 1);
        salt
    }
}
