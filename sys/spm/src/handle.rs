// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translation between user handles and connection records.

use abi::Handle;
use spmcore::handle::{self as codec, Salt};

use crate::config::HANDLE_SALT_BITS;

/// Names a connection record, by where it lives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnRef {
    /// Slot in the connection pool.
    Pool(usize),
    /// Entry in the stateless table. Never pool-allocated or freed.
    Static(usize),
}

/// Issues and interprets user handles.
#[derive(Debug)]
pub struct HandleCodec {
    salt: Salt,
}

impl HandleCodec {
    pub const fn new() -> Self {
        Self {
            salt: Salt::new(HANDLE_SALT_BITS),
        }
    }

    /// Produces a fresh user handle for pool slot `slot`.
    pub fn encode(&mut self, slot: usize) -> Handle {
        let salt = critical_section::with(|_| self.salt.take());
        Handle(codec::encode(slot, salt, self.salt.bits()))
    }

    /// Works out which record `handle` claims to name.
    ///
    /// This only undoes the encoding. The result must still be checked against
    /// the pool (or stateless table) and the record's liveness tag before it
    /// means anything.
    pub fn decode(&self, handle: Handle) -> Option<ConnRef> {
        if handle.is_static() {
            Some(ConnRef::Static(handle.static_index()))
        } else {
            codec::decode(handle.0, self.salt.bits()).map(ConnRef::Pool)
        }
    }
}

impl Default for HandleCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_slot_yields_fresh_values() {
        let mut c = HandleCodec::new();
        let period = 1usize << HANDLE_SALT_BITS;
        let issued: Vec<Handle> = (0..period).map(|_| c.encode(2)).collect();
        for (i, a) in issued.iter().enumerate() {
            for b in &issued[i + 1..] {
                assert_ne!(a, b);
            }
            assert_eq!(c.decode(*a), Some(ConnRef::Pool(2)));
        }
        // And the cycle repeats.
        assert_eq!(c.encode(2), issued[0]);
    }

    #[test]
    fn static_handles_decode_to_the_stateless_table() {
        let c = HandleCodec::new();
        let h = Handle::for_static(5, 1);
        assert_eq!(c.decode(h), Some(ConnRef::Static(5)));
    }

    #[test]
    fn null_and_negative_handles_do_not_decode() {
        let c = HandleCodec::new();
        assert_eq!(c.decode(Handle::NULL), None);
        assert_eq!(c.decode(Handle(-3)), None);
    }
}
