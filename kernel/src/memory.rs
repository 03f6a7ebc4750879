// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Allocates the page regions that back kernel threads.
//!
//! Each thread owns one region of [`STACK_PAGES`] pages. The thread
//! control block sits at the base of the region and the rest is the
//! thread's kernel stack, growing down towards the control block. The
//! region is aligned to its own size, so the owning thread can always
//! be recovered by rounding the stack pointer down with [`round_down`].
//!
//! Allocation goes through the global allocator: the embedder's
//! physical allocator on bare metal, the host allocator in hosted runs.

use alloc::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use bitflags::bitflags;
use core::ptr::NonNull;

/// The size of a single memory page, in bytes.
///
pub const PAGE_SIZE: usize = 4096;

/// The number of pages in a thread's stack region.
///
pub const STACK_PAGES: usize = 8;

/// The size of a thread's stack region, in bytes.
///
pub const STACK_SIZE: usize = PAGE_SIZE * STACK_PAGES;

bitflags! {
    /// Options for [`page_alloc`].
    ///
    pub struct PageFlags: u32 {
        /// Return the region zeroed.
        const ZERO = 1 << 0;

        /// Panic instead of returning `None` if no
        /// memory is available.
        const ASSERT = 1 << 1;
    }
}

/// The layout of a thread's stack region. The alignment
/// matches the size so that [`round_down`] on any address
/// within the region lands on its base.
///
fn stack_layout() -> Layout {
    // STACK_SIZE is a non-zero power of two, so this
    // cannot fail.
    Layout::from_size_align(STACK_SIZE, STACK_SIZE).expect("bad stack region layout")
}

/// Allocates one stack region, returning a pointer to its
/// base, or `None` if memory is exhausted and `flags` does
/// not include [`ASSERT`](PageFlags::ASSERT).
///
pub fn page_alloc(flags: PageFlags) -> Option<NonNull<u8>> {
    let layout = stack_layout();
    let ptr = if flags.contains(PageFlags::ZERO) {
        unsafe { alloc_zeroed(layout) }
    } else {
        unsafe { alloc(layout) }
    };

    let page = NonNull::new(ptr);
    if page.is_none() && flags.contains(PageFlags::ASSERT) {
        panic!("out of memory allocating a thread stack region");
    }

    page
}

/// Returns a stack region previously returned by [`page_alloc`].
///
/// # Safety
///
/// `page` must have come from [`page_alloc`] and must not be
/// used again afterwards.
///
pub unsafe fn page_free(page: NonNull<u8>) {
    dealloc(page.as_ptr(), stack_layout());
}

/// Rounds an address within a stack region down to the
/// region's base.
///
pub const fn round_down(addr: u64) -> u64 {
    addr & !(STACK_SIZE as u64 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        let base = 7 * STACK_SIZE as u64;
        assert_eq!(round_down(base), base);
        assert_eq!(round_down(base + 1), base);
        assert_eq!(round_down(base + STACK_SIZE as u64 - 1), base);
        assert_eq!(round_down(base + STACK_SIZE as u64), base + STACK_SIZE as u64);
    }

    #[test]
    fn regions_are_aligned() {
        let page = page_alloc(PageFlags::ZERO | PageFlags::ASSERT).unwrap();
        let addr = page.as_ptr() as u64;
        assert_eq!(addr % STACK_SIZE as u64, 0);
        unsafe { page_free(page) };
    }
}
