//! Errors produced while loading a PE32+ image.

use core::fmt;
use std::io;

/// A failure to read, or a rejection of, a PE32+ image.
#[derive(Debug)]
pub enum PeError {
    /// Reading the backing file failed.
    Disk(io::Error),
    /// The file ended before a structure it declares.
    Truncated,
    /// A structural invariant of the image is violated.
    Invalid(Invalid),
}

/// The structural check an image failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalid {
    /// The file does not start with `MZ`.
    DosMagic,
    /// `e_lfanew` does not point at `PE\0\0`.
    NtSignature,
    /// The optional header is not PE32+.
    OptionalMagic(u16),
    /// The optional header is too small to hold the PE32+ fields.
    OptionalHeaderSize(u16),
    /// The machine is not AMD64.
    Machine(u16),
    /// The subsystem is not "EFI application".
    Subsystem(u16),
    /// `SectionAlignment` is not a positive multiple of the page size.
    SectionAlignment(u32),
    /// `FileAlignment` is zero.
    FileAlignment,
    /// `SizeOfImage` is not a multiple of `SectionAlignment`.
    ImageSize(u32),
    /// `SizeOfHeaders` differs from the size computed from the header fields.
    HeaderSize {
        /// Value stored in the optional header.
        declared: u32,
        /// Value computed from the header layout.
        expected: u64,
    },
    /// `SizeOfHeaders` exceeds `SizeOfImage`.
    HeadersExceedImage,
    /// The entry point lies outside the image.
    EntryPoint(u32),
    /// A section's raw data is larger than its page-rounded virtual size.
    RawDataTooLarge(usize),
    /// A section starts below the end of the previous one.
    SectionOverlap(usize),
    /// A section extends past `SizeOfImage`.
    SectionBounds(usize),
    /// A relocation block is larger than what is left of the directory, or
    /// smaller than its own header.
    RelocationBlockSize(u32),
    /// The relocation directory or a fixup target lies outside the image.
    RelocationBounds(u64),
    /// A fixup type other than `ABSOLUTE` or `DIR64`.
    RelocationType(u8),
    /// The image must be relocated but was linked without relocations.
    RelocationsStripped,
}

impl fmt::Display for PeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disk(err) => write!(f, "disk read error: {err}"),
            Self::Truncated => f.write_str("truncated image"),
            Self::Invalid(reason) => write!(f, "invalid image: {reason}"),
        }
    }
}

impl fmt::Display for Invalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DosMagic => f.write_str("missing MZ signature"),
            Self::NtSignature => f.write_str("missing PE signature"),
            Self::OptionalMagic(magic) => write!(f, "optional header magic {magic:#06x} is not PE32+"),
            Self::OptionalHeaderSize(size) => write!(f, "optional header of {size} bytes is too small"),
            Self::Machine(machine) => {
                write!(f, "machine {machine:#06x} is not supported, only AMD64 images are")
            }
            Self::Subsystem(subsystem) => {
                write!(f, "subsystem {subsystem} is not supported, only EFI applications are")
            }
            Self::SectionAlignment(align) => {
                write!(f, "section alignment {align:#x} is not a multiple of the page size")
            }
            Self::FileAlignment => f.write_str("file alignment is zero"),
            Self::ImageSize(size) => {
                write!(f, "image size {size:#x} is not a multiple of the section alignment")
            }
            Self::HeaderSize { declared, expected } => {
                write!(f, "headers size {declared:#x} differs from expected {expected:#x}")
            }
            Self::HeadersExceedImage => f.write_str("headers size exceeds image size"),
            Self::EntryPoint(rva) => write!(f, "entry point {rva:#x} lies outside the image"),
            Self::RawDataTooLarge(index) => {
                write!(f, "section {index} has more raw data than virtual space")
            }
            Self::SectionOverlap(index) => {
                write!(f, "section {index} overlaps or precedes the previous section")
            }
            Self::SectionBounds(index) => write!(f, "section {index} extends past the image"),
            Self::RelocationBlockSize(size) => {
                write!(f, "relocation block size {size:#x} overruns the directory")
            }
            Self::RelocationBounds(rva) => {
                write!(f, "relocation at {rva:#x} lies outside the image")
            }
            Self::RelocationType(kind) => write!(f, "unsupported relocation type {kind}"),
            Self::RelocationsStripped => {
                f.write_str("image must be relocated but its relocations were stripped")
            }
        }
    }
}

impl std::error::Error for PeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Disk(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PeError {
    fn from(err: io::Error) -> Self {
        Self::Disk(err)
    }
}

impl From<Invalid> for PeError {
    fn from(reason: Invalid) -> Self {
        Self::Invalid(reason)
    }
}

impl PeError {
    /// Returns the violated invariant, if this is an [`PeError::Invalid`] error.
    #[must_use]
    pub fn invalid(&self) -> Option<Invalid> {
        match self {
            Self::Invalid(reason) => Some(*reason),
            _ => None,
        }
    }
}
