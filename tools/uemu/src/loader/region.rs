//! Host memory for a mapped image.

use core::ffi::c_void;
use core::ops::Range;
use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::ptr::NonNull;

use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::unistd::{SysconfVar, sysconf};

/// Page size assumed when the host will not say.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// The host page size.
#[must_use]
pub fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) => usize::try_from(size).unwrap_or(FALLBACK_PAGE_SIZE),
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// An anonymous private mapping, unmapped on drop.
pub struct MemoryRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the region owns its mapping exclusively; moving it to another
// thread moves that ownership.
unsafe impl Send for MemoryRegion {}

impl MemoryRegion {
    /// Reserves `size` read-write bytes aligned to `alignment`.
    ///
    /// `preferred` is a hint only. The kernel may place the mapping
    /// elsewhere, in which case the region is re-reserved with enough slack
    /// to honor the alignment; [`MemoryRegion::base`] always reports where it
    /// actually landed.
    ///
    /// # Errors
    ///
    /// Returns the `mmap` error, or `EINVAL` for a zero size or an alignment
    /// that is not a non-zero multiple of the page size.
    pub fn reserve(preferred: Option<u64>, alignment: usize, size: usize) -> nix::Result<Self> {
        let len = NonZeroUsize::new(size).ok_or(nix::Error::EINVAL)?;
        // Trimming unmaps whole pages, so any page multiple works, powers of
        // two or not.
        if alignment == 0 || alignment % page_size() != 0 {
            return Err(nix::Error::EINVAL);
        }

        let hint = preferred
            .and_then(|addr| usize::try_from(addr).ok())
            .and_then(NonZeroUsize::new);
        let first = map(hint, len)?;
        if first.addr().get() % alignment == 0 {
            return Ok(Self { base: first, len: size });
        }
        // SAFETY: `first` was mapped above with this length.
        unsafe { unmap(first, size)? };

        let padded = size.checked_add(alignment).ok_or(nix::Error::ENOMEM)?;
        let raw = map(None, NonZeroUsize::new(padded).ok_or(nix::Error::EINVAL)?)?;
        let head = raw.addr().get().next_multiple_of(alignment) - raw.addr().get();
        let tail = padded - head - size;
        // SAFETY: both trims lie inside the mapping just created and leave
        // exactly `size` bytes at the aligned start.
        unsafe {
            if head != 0 {
                unmap(raw, head)?;
            }
            let base = raw.add(head);
            if tail != 0 {
                unmap(base.add(size), tail)?;
            }
            Ok(Self { base, len: size })
        }
    }

    /// Address of the first byte.
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for an empty region. Never the case for a reserved one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole region, for filling in before it is protected.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the mapping is `len` bytes, readable and writable until
        // `protect` is called, and `&mut self` excludes other borrows.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }

    /// Changes the protection of the pages covering `range`.
    ///
    /// # Errors
    ///
    /// `EINVAL` if `range` is out of bounds or not page aligned, otherwise
    /// the `mprotect` error.
    pub fn protect(&mut self, range: Range<usize>, prot: ProtFlags) -> nix::Result<()> {
        if range.start > range.end || range.end > self.len {
            return Err(nix::Error::EINVAL);
        }
        if range.is_empty() {
            return Ok(());
        }
        // SAFETY: the range lies inside the mapping.
        unsafe {
            let start = self.base.as_ptr().add(range.start).cast::<c_void>();
            mman::mprotect(start, range.len(), prot)
        }
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        // SAFETY: the region owns the whole mapping.
        if let Err(err) = unsafe { unmap(self.base, self.len) } {
            log::warn!("failed to unmap image at {:p}: {err}", self.base);
        }
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("base", &self.base)
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}

fn map(hint: Option<NonZeroUsize>, len: NonZeroUsize) -> nix::Result<NonNull<u8>> {
    // SAFETY: an anonymous mapping without MAP_FIXED cannot clobber
    // existing memory.
    let ptr = unsafe {
        mman::mmap(
            hint,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            None::<BorrowedFd<'_>>,
            0,
        )?
    };
    NonNull::new(ptr.cast::<u8>()).ok_or(nix::Error::ENOMEM)
}

/// # Safety
///
/// `ptr..ptr + len` must be mapped and owned by the caller.
unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> nix::Result<()> {
    // SAFETY: guaranteed by the caller.
    unsafe { mman::munmap(ptr.as_ptr().cast(), len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn reserved_memory_is_zeroed_and_writable() {
        let mut region = MemoryRegion::reserve(None, page_size(), 3 * page_size()).unwrap();
        assert_eq!(region.len(), 3 * page_size());
        let bytes = region.as_mut_slice();
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[0] = 0x5a;
        let last = bytes.len() - 1;
        bytes[last] = 0xa5;
        assert_eq!(region.as_mut_slice()[last], 0xa5);
    }

    #[test]
    fn alignment_beyond_the_page_size_is_honored() {
        let align = 64 * page_size();
        let region = MemoryRegion::reserve(None, align, page_size()).unwrap();
        assert_eq!(region.base().addr().get() % align, 0);
    }

    #[test]
    fn alignment_need_not_be_a_power_of_two() {
        let align = 3 * page_size();
        for _ in 0..4 {
            let region = MemoryRegion::reserve(None, align, 2 * page_size()).unwrap();
            assert_eq!(region.base().addr().get() % align, 0);
            assert_eq!(region.len(), 2 * page_size());
        }
    }

    #[test]
    fn taken_hint_is_reported_honestly() {
        let first = MemoryRegion::reserve(None, page_size(), page_size()).unwrap();
        let taken = first.base().addr().get() as u64;
        let second = MemoryRegion::reserve(Some(taken), page_size(), page_size()).unwrap();
        assert_ne!(second.base(), first.base());
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert_eq!(MemoryRegion::reserve(None, page_size(), 0).unwrap_err(), nix::Error::EINVAL);
        assert_eq!(MemoryRegion::reserve(None, 3, page_size()).unwrap_err(), nix::Error::EINVAL);
        assert_eq!(MemoryRegion::reserve(None, 0, page_size()).unwrap_err(), nix::Error::EINVAL);
        let mut region = MemoryRegion::reserve(None, page_size(), page_size()).unwrap();
        let out_of_bounds = 0..2 * page_size();
        assert_eq!(region.protect(out_of_bounds, ProtFlags::PROT_READ), Err(nix::Error::EINVAL));
        assert_eq!(region.protect(0..page_size(), ProtFlags::PROT_READ), Ok(()));
    }
}
