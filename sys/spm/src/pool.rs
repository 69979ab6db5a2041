// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity slab of records, handed out by slot index.

/// `N` records of type `T`, each either free or in use.
///
/// Slots are identified by index. The pool knows nothing about what the
/// records mean; it only tracks which are allocated.
pub struct Pool<T, const N: usize> {
    slots: [T; N],
    in_use: [bool; N],
}

impl<T: Default, const N: usize> Pool<T, N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| T::default()),
            in_use: [false; N],
        }
    }

    /// Takes a free slot, resets it to `T::default()`, and returns its index.
    /// `None` if every slot is in use.
    pub fn alloc(&mut self) -> Option<usize> {
        critical_section::with(|_| {
            let slot = self.in_use.iter().position(|used| !used)?;
            self.in_use[slot] = true;
            self.slots[slot] = T::default();
            Some(slot)
        })
    }

    /// Returns `slot` to the pool. Freeing a slot that isn't allocated means
    /// the caller's bookkeeping is broken, and panics.
    pub fn free(&mut self, slot: usize) {
        critical_section::with(|_| {
            uassert!(self.is_member(slot));
            self.in_use[slot] = false;
        })
    }

    /// Checks that `slot` names an allocated record of this pool.
    pub fn is_member(&self, slot: usize) -> bool {
        self.in_use.get(slot).copied().unwrap_or(false)
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        if self.is_member(slot) {
            self.slots.get(slot)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        if self.is_member(slot) {
            self.slots.get_mut(slot)
        } else {
            None
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.iter().filter(|u| **u).count()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Default, const N: usize> Default for Pool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
