// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

/// Bytes the exception entry sequence pushes below the saved stack pointer,
/// in addition to the basic frame.
pub const ADDITIONAL_CONTEXT_SIZE: u32 = 40;
