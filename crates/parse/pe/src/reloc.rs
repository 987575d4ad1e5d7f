//! Base relocation processing.
//!
//! The `.reloc` directory is a sequence of blocks, each a page RVA and a
//! block size followed by 16-bit entries: the fixup type in the top four
//! bits, the offset within the page in the low twelve. Only the two types
//! an AMD64 image needs are accepted.

use crate::error::{Invalid, PeError};
use crate::header::{DataDirectory, FileCharacteristics, ImageHeader, le_u16, le_u32, le_u64};

// ---------------------------------------------------------------------------
// Fixup types
// ---------------------------------------------------------------------------

/// Padding entry, skipped.
pub const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;

/// Add the load delta to the 64-bit value at the target.
pub const IMAGE_REL_BASED_DIR64: u8 = 10;

/// Size of a block header: page RVA and block size.
pub const BLOCK_HEADER_SIZE: u32 = 8;

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Counters reported after relocating an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocStats {
    /// Blocks walked.
    pub blocks: usize,
    /// `DIR64` fixups applied.
    pub fixups: usize,
}

/// Relocates `image`, mapped at `actual_base`, from its preferred base.
///
/// Does nothing when the two bases are equal.
///
/// # Errors
///
/// [`Invalid::RelocationsStripped`] if the image must move but was linked
/// without relocations, otherwise see [`apply_delta`].
pub fn apply(image: &mut [u8], header: &ImageHeader, actual_base: u64) -> Result<RelocStats, PeError> {
    let delta = actual_base.wrapping_sub(header.image_base);
    if delta == 0 {
        return Ok(RelocStats::default());
    }
    if header.characteristics.contains(FileCharacteristics::RELOCS_STRIPPED) {
        return Err(Invalid::RelocationsStripped.into());
    }
    let stats = apply_delta(image, header.base_relocation(), delta)?;
    log::debug!(
        "relocated by {delta:#x}: {} fixups in {} blocks",
        stats.fixups,
        stats.blocks
    );
    Ok(stats)
}

/// Walks the relocation directory `dir` inside `image` and adds `delta`
/// (modulo 2^64) to every `DIR64` target.
///
/// # Errors
///
/// [`PeError::Invalid`] if a block overruns the directory, a block or
/// target lies outside `image`, or an entry has an unsupported type. The
/// image may be partially relocated when an error is returned.
pub fn apply_delta(image: &mut [u8], dir: DataDirectory, delta: u64) -> Result<RelocStats, PeError> {
    let mut stats = RelocStats::default();
    let mut pos = u64::from(dir.virtual_address);
    let mut remaining = dir.size;

    while remaining > BLOCK_HEADER_SIZE {
        let header = slice_at(image, pos, u64::from(BLOCK_HEADER_SIZE))?;
        let page_rva = le_u32(header, 0);
        let block_size = le_u32(header, 4);
        if block_size < BLOCK_HEADER_SIZE || block_size > remaining {
            return Err(Invalid::RelocationBlockSize(block_size).into());
        }

        let count = (block_size - BLOCK_HEADER_SIZE) / 2;
        let entries_at = pos + u64::from(BLOCK_HEADER_SIZE);
        slice_at(image, entries_at, u64::from(count) * 2)?;

        for i in 0..u64::from(count) {
            let entry = le_u16(image, (entries_at + i * 2) as usize);
            let kind = (entry >> 12) as u8;
            let offset = u64::from(entry & 0x0fff);
            match kind {
                IMAGE_REL_BASED_ABSOLUTE => {}
                IMAGE_REL_BASED_DIR64 => {
                    let target = u64::from(page_rva) + offset;
                    let slot = slice_at_mut(image, target, 8)?;
                    let value = le_u64(slot, 0).wrapping_add(delta);
                    slot.copy_from_slice(&value.to_le_bytes());
                    stats.fixups += 1;
                }
                other => return Err(Invalid::RelocationType(other).into()),
            }
        }

        stats.blocks += 1;
        pos += u64::from(block_size);
        remaining -= block_size;
    }
    Ok(stats)
}

fn bounds(image_len: usize, at: u64, len: u64) -> Result<core::ops::Range<usize>, Invalid> {
    let end = at.checked_add(len).ok_or(Invalid::RelocationBounds(at))?;
    if end > image_len as u64 {
        return Err(Invalid::RelocationBounds(at));
    }
    Ok(at as usize..end as usize)
}

fn slice_at(image: &[u8], at: u64, len: u64) -> Result<&[u8], Invalid> {
    Ok(&image[bounds(image.len(), at, len)?])
}

fn slice_at_mut(image: &mut [u8], at: u64, len: u64) -> Result<&mut [u8], Invalid> {
    let range = bounds(image.len(), at, len)?;
    Ok(&mut image[range])
}
