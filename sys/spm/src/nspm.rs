// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity of the non-secure client behind calls from the non-secure agent.

use abi::client_id_is_ns;

/// Client id used until the non-secure side names one.
pub const DEFAULT_NS_CLIENT_ID: i32 = -1;

#[derive(Debug)]
pub struct Nspm {
    client_id: i32,
}

impl Nspm {
    pub const fn new() -> Self {
        Self {
            client_id: DEFAULT_NS_CLIENT_ID,
        }
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    /// Records the non-secure client now making calls. Non-secure ids are
    /// negative; anything else is refused.
    pub fn set_client_id(&mut self, id: i32) -> bool {
        if client_id_is_ns(id) {
            self.client_id = id;
            true
        } else {
            false
        }
    }
}

impl Default for Nspm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_negative_ids_are_accepted() {
        let mut n = Nspm::new();
        assert_eq!(n.client_id(), DEFAULT_NS_CLIENT_ID);
        assert!(n.set_client_id(-42));
        assert_eq!(n.client_id(), -42);
        assert!(!n.set_client_id(0));
        assert!(!n.set_client_id(9));
        assert_eq!(n.client_id(), -42);
    }
}
