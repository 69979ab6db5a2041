// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Secure partition manager.
//!
//! This is the core of a trusted-execution firmware: it keeps isolated
//! partitions apart, brokers the calls they make on each other's services,
//! and decides which of them runs, moving the hardware isolation boundary
//! along with every switch.
//!
//! The platform (MPU programming, register save and restore, the thread
//! scheduler) is consumed through the traits in `hal`; the partition and
//! service tables come from the image builder as static descriptors.
//!
//! # Design principles
//!
//! 1. Static configuration. Every table has a fixed size chosen at build
//!    time, and nothing is allocated at runtime.
//! 2. Partitions are untrusted. Anything a partition hands us is checked
//!    before use, and a partition that breaks the rules is stopped, never the
//!    SPM.
//! 3. Our own state is trusted. When it turns out to be inconsistent, the
//!    isolation guarantees may already be gone, so we panic.

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod arch;

pub mod backend;
pub mod config;
pub mod conn;
pub mod cross_call;
pub mod descs;
pub mod err;
pub mod fail;
pub mod hal;
pub mod handle;
pub mod interface;
pub mod isolation;
pub mod nspm;
pub mod partition;
pub mod pool;
pub mod psa;
pub mod registry;
pub mod sched;
pub mod spm;
pub mod sync;
pub mod trace;

#[cfg(test)]
mod testutil;

pub use backend::{Backend, Ipc, Sfn};
pub use interface::Psa;
pub use sched::SwitchPair;
pub use spm::Spm;
