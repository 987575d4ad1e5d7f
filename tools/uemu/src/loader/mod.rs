//! Maps a PE32+ image into host memory and prepares it to run.
//!
//! Parsing, section placement and relocation come from `uemu_pe`, which
//! works on plain byte slices. This module supplies the slice: it reserves
//! `SizeOfImage` bytes of anonymous memory, preferably at the image's own
//! base, and once the image is laid out and relocated, narrows each
//! section's pages to the access its characteristics ask for.

pub mod region;

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use nix::sys::mman::ProtFlags;
use uefi::table::ImageEntryPoint;
use uemu_pe::layout::copy_headers;
use uemu_pe::reloc::{self, RelocStats};
use uemu_pe::{ImageHeader, PeError, ReadAt, SectionHeader, SectionTable, round_up};

use self::region::{MemoryRegion, page_size};
use crate::firmware::ImageInfo;

/// How an image is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Ask for the image's preferred base. When `false` the image lands
    /// wherever the host puts it and is always relocated.
    pub honor_preferred_base: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            honor_preferred_base: true,
        }
    }
}

/// Why an image could not be loaded.
#[derive(Debug)]
pub enum LoadError {
    /// The image file could not be opened.
    Io(io::Error),
    /// The file is not a loadable image.
    Format(PeError),
    /// Memory for the image could not be reserved or protected.
    Alloc(nix::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot open image: {err}"),
            Self::Format(err) => err.fmt(f),
            Self::Alloc(err) => write!(f, "cannot map image: {err}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Format(err) => Some(err),
            Self::Alloc(err) => Some(err),
        }
    }
}

impl From<PeError> for LoadError {
    fn from(err: PeError) -> Self {
        Self::Format(err)
    }
}

impl From<nix::Error> for LoadError {
    fn from(err: nix::Error) -> Self {
        Self::Alloc(err)
    }
}

/// An image mapped, relocated and protected, ready to enter.
#[derive(Debug)]
pub struct LoadedImage {
    region: MemoryRegion,
    header: ImageHeader,
    sections: SectionTable,
    relocations: RelocStats,
}

impl LoadedImage {
    /// Where the image was mapped.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.region.base().addr().get() as u64
    }

    /// `SizeOfImage`.
    #[must_use]
    pub fn size(&self) -> usize {
        self.region.len()
    }

    /// The validated headers.
    #[must_use]
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// The section table, in file order.
    #[must_use]
    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    /// Fixups applied while relocating. Zero when the preferred base was
    /// granted.
    #[must_use]
    pub fn relocations(&self) -> RelocStats {
        self.relocations
    }

    /// Returns `true` if the image runs somewhere other than its preferred
    /// base.
    #[must_use]
    pub fn was_relocated(&self) -> bool {
        self.base() != self.header.image_base
    }

    /// The image as its Loaded Image protocol describes it.
    #[must_use]
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            base: self.region.base().as_ptr().cast(),
            size: self.region.len(),
        }
    }

    /// The entry point.
    ///
    /// # Safety
    ///
    /// Calling the returned function runs the guest. The caller must keep
    /// `self` alive for as long as guest code can run, and the image must
    /// actually contain x86-64 code at its entry point RVA.
    #[must_use]
    pub unsafe fn entry_point(&self) -> ImageEntryPoint {
        // `validate` checked that the entry point lies inside the image.
        let entry = self.region.base().as_ptr().wrapping_add(self.header.entry_point as usize);
        // SAFETY: `entry` points into the mapped image; the caller vouches
        // for what is there.
        unsafe { std::mem::transmute::<*mut u8, ImageEntryPoint>(entry) }
    }
}

/// Opens and loads the image at `path`.
///
/// # Errors
///
/// See [`load`].
pub fn load_file(path: &Path, options: LoadOptions) -> Result<LoadedImage, LoadError> {
    let file = File::open(path).map_err(LoadError::Io)?;
    load(&file, options)
}

/// Loads an image from `stream`.
///
/// Validates the headers, reserves memory, copies headers and sections,
/// applies relocations if the image did not land at its preferred base and
/// protects the result. Any partial mapping is released on failure.
///
/// # Errors
///
/// [`LoadError::Format`] for anything wrong with the image itself,
/// [`LoadError::Alloc`] if the host refuses the memory.
pub fn load<R: ReadAt + ?Sized>(stream: &R, options: LoadOptions) -> Result<LoadedImage, LoadError> {
    let page = page_size();
    let offset = uemu_pe::locate_header(stream)?;
    let header = uemu_pe::load_and_validate(stream, offset, page as u64)?;
    let sections = SectionTable::load(stream, &header)?;

    let preferred = options.honor_preferred_base.then_some(header.image_base);
    let mut region = MemoryRegion::reserve(
        preferred,
        header.section_alignment as usize,
        header.size_of_image as usize,
    )?;
    let base = region.base().addr().get() as u64;
    log::debug!(
        "reserved {:#x} bytes at {base:#x} (preferred {:#x})",
        region.len(),
        header.image_base
    );

    let image = region.as_mut_slice();
    copy_headers(image, &header, stream)?;
    uemu_pe::place_sections(image, &header, &sections, stream, page as u64)?;
    let relocations = reloc::apply(image, &header, base)?;

    protect(&mut region, &header, &sections, page)?;

    Ok(LoadedImage {
        region,
        header,
        sections,
        relocations,
    })
}

/// The page protection a section asks for.
fn section_protection(section: &SectionHeader) -> ProtFlags {
    let mut prot = ProtFlags::PROT_NONE;
    if section.is_readable() {
        prot |= ProtFlags::PROT_READ;
    }
    if section.is_writable() {
        prot |= ProtFlags::PROT_WRITE;
    }
    if section.is_executable() {
        prot |= ProtFlags::PROT_EXEC;
    }
    prot
}

/// Makes the whole image read-only, then grants each section its own
/// access over its page-rounded extent.
#[expect(clippy::cast_possible_truncation, reason = "extents were checked against SizeOfImage")]
fn protect(
    region: &mut MemoryRegion,
    header: &ImageHeader,
    sections: &SectionTable,
    page: usize,
) -> nix::Result<()> {
    region.protect(0..region.len(), ProtFlags::PROT_READ)?;
    for section in sections {
        let start = section.virtual_address as usize;
        let len = round_up(u64::from(section.virtual_size), page as u64).unwrap_or(0) as usize;
        let prot = section_protection(section);
        log::trace!("protect {:<8} {start:#x}+{len:#x} {prot:?}", section.name());
        region.protect(start..start + len, prot)?;
    }
    log::debug!(
        "headers {:#x} bytes read-only, {} sections protected",
        header.size_of_headers,
        sections.len()
    );
    Ok(())
}
