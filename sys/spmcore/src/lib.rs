// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Algorithms used by the partition manager that don't need any of its types.
//!
//! Keeping these apart lets them be exercised on the host with ordinary
//! `cargo test`, and keeps the kernel crate focused on state management.

// Allow std-y things to be used in test. Note that this attribute is a bit of a
// trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

use core::cmp::Ordering;

pub mod handle;

/// A run of client memory, `[base, base + len)`, named by an untrusted
/// caller.
///
/// The end is computed in 64 bits so that a span touching the top of the
/// 32-bit address space is representable; callers are expected to have
/// rejected spans that wrap before getting here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Span {
    pub base: u32,
    pub len: u32,
}

impl Span {
    pub fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.len)
    }
}

/// Describes one entry of an isolation region table.
///
/// Attributes are deliberately absent: the caller decides what makes a region
/// acceptable through the predicate handed to [`covers`].
pub trait MemoryRegion {
    /// First byte of the region.
    fn base(&self) -> u32;
    /// First byte past the region.
    fn end(&self) -> u64;
}

impl<T: MemoryRegion> MemoryRegion for &T {
    #[inline(always)]
    fn base(&self) -> u32 {
        (**self).base()
    }

    #[inline(always)]
    fn end(&self) -> u64 {
        (**self).end()
    }
}

/// Position of `region` relative to `addr`, for binary searching a sorted
/// table: `Equal` if the region holds `addr`, `Greater` if it lies above,
/// `Less` if it lies below.
#[inline(always)]
fn locate(region: &impl MemoryRegion, addr: u64) -> Ordering {
    if addr < u64::from(region.base()) {
        Ordering::Greater
    } else if addr >= region.end() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Checks whether `span` is entirely covered by regions from `table` that
/// satisfy `region_ok`.
///
/// A span may cross region boundaries, but the regions it crosses must be
/// back-to-back; any gap, or any region rejected by `region_ok`, fails the
/// check.
///
/// Empty spans are always accepted. They carry no authority, and clients
/// routinely pass a null base with a zero length.
///
/// # Preconditions
///
/// `table` is sorted by base address and its regions do not overlap.
#[must_use]
pub fn covers<R: MemoryRegion>(
    span: Span,
    table: &[R],
    region_ok: impl Fn(&R) -> bool,
) -> bool {
    if span.len == 0 {
        return true;
    }

    let mut cursor = u64::from(span.base);
    let end = span.end();

    let Ok(first) = table.binary_search_by(|r| locate(r, cursor)) else {
        return false;
    };

    for region in &table[first..] {
        if u64::from(region.base()) > cursor {
            // hole
            return false;
        }
        if !region_ok(region) {
            return false;
        }
        cursor = region.end();
        if cursor >= end {
            return true;
        }
    }

    // Ran off the end of the table before the span did.
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Kind {
        SecureCode,
        PartitionData,
        NsData,
    }

    struct Region {
        base: u32,
        size: u32,
        kind: Kind,
    }

    impl MemoryRegion for Region {
        fn base(&self) -> u32 {
            self.base
        }

        fn end(&self) -> u64 {
            u64::from(self.base) + u64::from(self.size)
        }
    }

    fn layout() -> Vec<Region> {
        vec![
            Region {
                base: 0x1000_0000,
                size: 0x0004_0000,
                kind: Kind::SecureCode,
            },
            // Two partition data regions laid end to end.
            Region {
                base: 0x3000_0000,
                size: 0x0000_8000,
                kind: Kind::PartitionData,
            },
            Region {
                base: 0x3000_8000,
                size: 0x0000_8000,
                kind: Kind::PartitionData,
            },
            // Secure code wedged between partition data.
            Region {
                base: 0x3001_0000,
                size: 0x0000_1000,
                kind: Kind::SecureCode,
            },
            Region {
                base: 0x3001_1000,
                size: 0x0000_1000,
                kind: Kind::PartitionData,
            },
            Region {
                base: 0x2010_0000,
                size: 0x0001_0000,
                kind: Kind::NsData,
            },
        ]
    }

    fn sorted(mut table: Vec<Region>) -> Vec<Region> {
        table.sort_by_key(|r| r.base);
        table
    }

    fn data_only(r: &Region) -> bool {
        r.kind == Kind::PartitionData
    }

    #[test]
    fn span_inside_one_region() {
        let table = sorted(layout());
        let span = Span {
            base: 0x3000_0010,
            len: 0x100,
        };
        assert!(covers(span, &table, data_only));
    }

    #[test]
    fn span_across_adjacent_regions() {
        let table = sorted(layout());
        let span = Span {
            base: 0x3000_7F00,
            len: 0x200,
        };
        assert!(covers(span, &table, data_only));
    }

    #[test]
    fn span_through_rejected_region() {
        let table = sorted(layout());
        let span = Span {
            base: 0x3000_F000,
            len: 0x3000,
        };
        assert!(
            !covers(span, &table, data_only),
            "span crossing secure code must be refused",
        );
        // Same span is fine if the predicate accepts everything.
        assert!(covers(span, &table, |_| true));
    }

    #[test]
    fn span_in_unmapped_memory() {
        let table = sorted(layout());
        for base in [0x0000_0000, 0x2000_0000, 0x3001_2000, 0xFFFF_FF00] {
            let span = Span { base, len: 4 };
            assert!(
                !covers(span, &table, |_| true),
                "span at {base:#x} should not be covered",
            );
        }
    }

    #[test]
    fn span_running_off_the_last_region() {
        let table = sorted(layout());
        let span = Span {
            base: 0x3001_1F00,
            len: 0x200,
        };
        assert!(!covers(span, &table, data_only));
    }

    #[test]
    fn span_bridging_a_gap() {
        let table = vec![
            Region {
                base: 0x3000_0000,
                size: 0x1000,
                kind: Kind::PartitionData,
            },
            Region {
                base: 0x3000_2000,
                size: 0x1000,
                kind: Kind::PartitionData,
            },
        ];
        let span = Span {
            base: 0x3000_0800,
            len: 0x2000,
        };
        assert!(!covers(span, &table, data_only));
    }

    #[test]
    fn empty_span_needs_no_region() {
        let table = sorted(layout());
        assert!(covers(Span { base: 0, len: 0 }, &table, data_only));
        assert!(covers(Span { base: 0, len: 0 }, &[] as &[Region], data_only));
    }

    #[test]
    fn region_reaching_top_of_address_space() {
        let table = vec![Region {
            base: 0xFFFF_0000,
            size: 0x0001_0000,
            kind: Kind::NsData,
        }];
        let span = Span {
            base: 0xFFFF_FF00,
            len: 0x100,
        };
        assert!(covers(span, &table, |r| r.kind == Kind::NsData));
    }
}
