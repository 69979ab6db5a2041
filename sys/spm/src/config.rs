// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time sizing, generated from `SPM_CONFIG` by the build script.

use static_assertions::const_assert;

include!(concat!(env!("OUT_DIR"), "/config.rs"));

/// Depth of the kernel trace ring.
pub const TRACE_DEPTH: usize = 64;

const_assert!(CONN_HANDLE_MAX_NUM > 0);
const_assert!(HANDLE_SALT_BITS <= spmcore::handle::MAX_SALT_BITS);
// Every pool-backed user handle must stay clear of the static handle space.
const_assert!(
    spmcore::handle::max_user_handle(CONN_HANDLE_MAX_NUM, HANDLE_SALT_BITS)
        <= spmcore::handle::USER_HANDLE_MAX as u64
);
