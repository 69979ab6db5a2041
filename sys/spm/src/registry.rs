// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Service registry, and the checks that decide who may talk to what.

use abi::{Sid, VersionPolicy, STATELESS_HANDLE_LIMIT};
use heapless::Vec;

use crate::config::MAX_SERVICES;
use crate::descs::{PartitionDesc, ServiceDesc};
use crate::err::SpmError;

/// A registered service and the partition (by index) that provides it.
#[derive(Copy, Clone, Debug)]
pub struct Service {
    pub desc: &'static ServiceDesc,
    pub partition: usize,
}

pub struct Registry {
    services: Vec<Service, MAX_SERVICES>,
    /// Search order for `find_by_sid`, most recently found first. Holds every
    /// index into `services` exactly once.
    order: Vec<usize, MAX_SERVICES>,
    stateless: [Option<usize>; STATELESS_HANDLE_LIMIT],
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            services: Vec::new(),
            order: Vec::new(),
            stateless: [None; STATELESS_HANDLE_LIMIT],
        }
    }

    /// Adds a service provided by partition `partition`, returning its index.
    ///
    /// Descriptor tables come from the image builder, so anything wrong here
    /// (too many services, a stateless slot out of range or claimed twice)
    /// is a broken image and panics.
    pub fn register(
        &mut self,
        desc: &'static ServiceDesc,
        partition: usize,
    ) -> usize {
        let index = self.services.len();
        if self.services.push(Service { desc, partition }).is_err() {
            panic!("too many services");
        }
        if self.order.push(index).is_err() {
            panic!("too many services");
        }

        if desc.is_stateless() {
            let slot = usize::from(desc.stateless_index);
            let Some(entry) = self.stateless.get_mut(slot) else {
                panic!("stateless slot {slot} out of range");
            };
            if entry.is_some() {
                panic!("stateless slot {slot} reused");
            }
            *entry = Some(index);
        }

        index
    }

    pub fn get(&self, index: usize) -> &Service {
        &self.services[index]
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Service occupying stateless table slot `slot`, if any.
    pub fn stateless(&self, slot: usize) -> Option<usize> {
        self.stateless.get(slot).copied().flatten()
    }

    /// Looks up a service by id. A hit moves to the front of the search
    /// order.
    pub fn find_by_sid(&mut self, sid: Sid) -> Option<usize> {
        critical_section::with(|_| {
            let services = &self.services;
            let pos = self
                .order
                .iter()
                .position(|&i| services[i].desc.sid == sid)?;
            let index = self.order[pos];
            self.order[..=pos].rotate_right(1);
            Some(index)
        })
    }

    #[cfg(test)]
    fn search_order(&self) -> &[usize] {
        &self.order
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks a client's requested version against what the service publishes.
pub fn check_version(
    desc: &ServiceDesc,
    requested: u32,
) -> Result<(), SpmError> {
    match VersionPolicy::try_from(desc.version_policy) {
        Ok(VersionPolicy::Relaxed) if requested <= desc.version => Ok(()),
        Ok(VersionPolicy::Strict) if requested == desc.version => Ok(()),
        _ => Err(SpmError::Version),
    }
}

/// Checks that a caller may use service `sid`.
///
/// Non-secure callers (`ns`) may reach only services flagged for them.
/// Secure callers must have listed the service among their dependencies.
/// `client` is the partition making the call; for non-secure calls that is
/// the non-secure agent, and its dependency list is not consulted.
pub fn check_authorization(
    sid: Sid,
    desc: &ServiceDesc,
    ns: bool,
    client: &PartitionDesc,
) -> Result<(), SpmError> {
    let allowed = if ns {
        desc.is_ns_accessible()
    } else {
        client.depends_on(sid)
    };
    if allowed {
        Ok(())
    } else {
        Err(SpmError::Generic)
    }
}
