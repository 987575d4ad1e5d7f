//! Pool and page allocations backed by the host allocator.
//!
//! Every live allocation is recorded with its layout so `free` can reject
//! pointers it never handed out, and everything still outstanding is
//! released when the allocator is dropped.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;

use uefi::EfiStatus;

/// Alignment of pool allocations.
pub const POOL_ALIGNMENT: usize = 8;

/// Page granularity of `allocate_pages`.
pub const EFI_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Pool,
    Pages,
}

#[derive(Debug)]
struct Allocation {
    ptr: NonNull<u8>,
    layout: Layout,
    kind: Kind,
}

/// Tracks allocations made on the guest's behalf.
#[derive(Debug, Default)]
pub struct PoolAllocator {
    live: HashMap<usize, Allocation>,
}

impl PoolAllocator {
    /// An allocator with nothing outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding allocations.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.live.len()
    }

    fn alloc(&mut self, size: usize, align: usize, kind: Kind) -> Result<NonNull<u8>, EfiStatus> {
        // Zero-byte requests still get a unique pointer.
        let layout = Layout::from_size_align(size.max(1), align).map_err(|_| EfiStatus::OUT_OF_RESOURCES)?;
        // SAFETY: the layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(EfiStatus::OUT_OF_RESOURCES)?;
        self.live.insert(ptr.as_ptr().addr(), Allocation { ptr, layout, kind });
        Ok(ptr)
    }

    fn release(&mut self, ptr: *mut u8, kind: Kind) -> Result<(), EfiStatus> {
        match self.live.get(&ptr.addr()) {
            Some(allocation) if allocation.kind == kind => {}
            _ => return Err(EfiStatus::INVALID_PARAMETER),
        }
        if let Some(allocation) = self.live.remove(&ptr.addr()) {
            // SAFETY: the pointer was returned by `alloc` with this layout
            // and has not been freed since; it is removed from `live` first.
            unsafe { alloc::dealloc(allocation.ptr.as_ptr(), allocation.layout) };
        }
        Ok(())
    }

    /// Allocates `size` bytes, 8-byte aligned.
    ///
    /// # Errors
    ///
    /// `OUT_OF_RESOURCES` if the host cannot satisfy the request.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, EfiStatus> {
        self.alloc(size, POOL_ALIGNMENT, Kind::Pool)
    }

    /// Releases a pointer returned by [`allocate`](Self::allocate).
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` for any other pointer, including page
    /// allocations and pointers already freed.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), EfiStatus> {
        self.release(ptr, Kind::Pool)
    }

    /// Allocates `pages` page-aligned pages.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` for zero pages, `OUT_OF_RESOURCES` if the host
    /// cannot satisfy the request.
    pub fn allocate_pages(&mut self, pages: usize) -> Result<NonNull<u8>, EfiStatus> {
        if pages == 0 {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let size = pages.checked_mul(EFI_PAGE_SIZE).ok_or(EfiStatus::OUT_OF_RESOURCES)?;
        self.alloc(size, EFI_PAGE_SIZE, Kind::Pages)
    }

    /// Releases a page allocation. `pages` must match the allocation.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if `ptr` is not a page allocation, `INVALID_PARAMETER`
    /// if the page count differs.
    pub fn free_pages(&mut self, ptr: *mut u8, pages: usize) -> Result<(), EfiStatus> {
        let allocation = self
            .live
            .get(&ptr.addr())
            .filter(|a| a.kind == Kind::Pages)
            .ok_or(EfiStatus::NOT_FOUND)?;
        if Some(allocation.layout.size()) != pages.checked_mul(EFI_PAGE_SIZE) {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        self.release(ptr, Kind::Pages)
    }

    /// Copies `value` into a fresh pool allocation.
    ///
    /// # Errors
    ///
    /// `OUT_OF_RESOURCES` if the host cannot satisfy the request.
    pub fn allocate_copy<T: Copy>(&mut self, value: &[T]) -> Result<NonNull<T>, EfiStatus> {
        const { assert!(align_of::<T>() <= POOL_ALIGNMENT) };
        let bytes = size_of_val(value);
        let ptr = self.allocate(bytes)?.cast::<T>();
        // SAFETY: the allocation is `bytes` long, suitably aligned, and
        // cannot overlap `value`.
        unsafe { ptr.as_ptr().copy_from_nonoverlapping(value.as_ptr(), value.len()) };
        Ok(ptr)
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        for (_, allocation) in self.live.drain() {
            // SAFETY: every entry in `live` is an outstanding allocation with
            // the recorded layout.
            unsafe { alloc::dealloc(allocation.ptr.as_ptr(), allocation.layout) };
        }
    }
}
