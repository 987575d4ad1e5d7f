//! DOS stub and NT header parsing.
//!
//! Fields are extracted with `from_le_bytes` from buffers read through
//! [`ReadAt`], so a malformed file can only produce an error.

use bitflags::bitflags;

use crate::error::{Invalid, PeError};
use crate::layout::round_up;
use crate::stream::{ReadAt, read_exact_at};

/// `MZ`.
pub const DOS_MAGIC: [u8; 2] = *b"MZ";

/// `PE\0\0`.
pub const NT_SIGNATURE: [u8; 4] = *b"PE\0\0";

/// Optional header magic of a PE32+ image.
pub const PE32_PLUS_MAGIC: u16 = 0x020b;

/// `IMAGE_FILE_MACHINE_AMD64`.
pub const MACHINE_AMD64: u16 = 0x8664;

/// `IMAGE_SUBSYSTEM_EFI_APPLICATION`.
pub const SUBSYSTEM_EFI_APPLICATION: u16 = 10;

/// Size of the DOS header (`IMAGE_DOS_HEADER`).
pub const DOS_HEADER_SIZE: usize = 64;

/// Offset of `e_lfanew` within the DOS header.
pub(crate) const E_LFANEW_OFFSET: usize = 0x3c;

/// Size of the NT signature.
pub const SIGNATURE_SIZE: usize = 4;

/// Size of the COFF file header (`IMAGE_FILE_HEADER`).
pub const FILE_HEADER_SIZE: usize = 20;

/// Size of the PE32+ optional header fields preceding the data directories.
pub(crate) const OPTIONAL_HEADER_FIXED_SIZE: usize = 112;

/// Size of a PE32+ optional header carrying all data directories.
pub const OPTIONAL_HEADER_SIZE: usize = OPTIONAL_HEADER_FIXED_SIZE + NUM_DATA_DIRECTORIES * 8;

/// Size of a section header (`IMAGE_SECTION_HEADER`).
pub const SECTION_HEADER_SIZE: usize = 40;

/// Number of data directory slots defined for PE32+.
pub const NUM_DATA_DIRECTORIES: usize = 16;

/// Index of the base relocation directory.
pub const DIRECTORY_BASE_RELOCATION: usize = 5;

/// Read a little-endian `u16` from `data` at byte offset `off`.
///
/// # Panics
///
/// Panics if `off + 2 > data.len()`. Callers must bounds-check first.
pub(crate) fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a little-endian `u32` from `data` at byte offset `off`.
pub(crate) fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a little-endian `u64` from `data` at byte offset `off`.
pub(crate) fn le_u64(data: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(*data[off..].first_chunk().unwrap())
}

bitflags! {
    /// `IMAGE_FILE_HEADER::Characteristics`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileCharacteristics: u16 {
        /// The image carries no base relocations.
        const RELOCS_STRIPPED = 0x0001;
        /// The image is executable.
        const EXECUTABLE_IMAGE = 0x0002;
        /// The image can handle addresses above 2 GiB.
        const LARGE_ADDRESS_AWARE = 0x0020;
        /// The image is a DLL.
        const DLL = 0x2000;
    }
}

/// File offset of the NT headers, taken from the DOS header's `e_lfanew`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderOffset(u32);

impl HeaderOffset {
    /// Wraps a raw `e_lfanew` value.
    #[must_use]
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// The offset in bytes from the start of the file.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// An entry of the optional header's data directory table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    /// RVA of the table.
    pub virtual_address: u32,
    /// Size of the table in bytes.
    pub size: u32,
}

impl DataDirectory {
    /// Returns `true` if the directory is absent.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// The NT headers of a PE32+ image, reduced to what loading needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Where the NT headers start in the file.
    pub offset: HeaderOffset,
    /// Target machine.
    pub machine: u16,
    /// Number of entries in the section table.
    pub number_of_sections: u16,
    /// Size of the optional header; the section table follows it.
    pub size_of_optional_header: u16,
    /// COFF characteristics.
    pub characteristics: FileCharacteristics,
    /// RVA of the entry point.
    pub entry_point: u32,
    /// Preferred load address.
    pub image_base: u64,
    /// Alignment of sections in memory.
    pub section_alignment: u32,
    /// Alignment of section data in the file.
    pub file_alignment: u32,
    /// Size of the mapped image.
    pub size_of_image: u32,
    /// Size of all headers, rounded to `file_alignment`.
    pub size_of_headers: u32,
    /// Target subsystem.
    pub subsystem: u16,
    /// Data directories. Slots beyond `NumberOfRvaAndSizes` are empty.
    pub data_directories: [DataDirectory; NUM_DATA_DIRECTORIES],
}

impl ImageHeader {
    /// Parses the NT headers from `data`, which starts at the NT signature.
    ///
    /// Checks the signature and the PE32+ magic only; the remaining
    /// invariants are checked by [`ImageHeader::validate`].
    ///
    /// # Errors
    ///
    /// [`PeError::Truncated`] if `data` is shorter than the headers it
    /// declares, [`PeError::Invalid`] on a bad signature or magic.
    pub fn parse(data: &[u8], offset: HeaderOffset) -> Result<Self, PeError> {
        let fixed = SIGNATURE_SIZE + FILE_HEADER_SIZE + OPTIONAL_HEADER_FIXED_SIZE;
        if data.len() < fixed {
            return Err(PeError::Truncated);
        }
        if data[..SIGNATURE_SIZE] != NT_SIGNATURE {
            return Err(Invalid::NtSignature.into());
        }

        let file = &data[SIGNATURE_SIZE..];
        let machine = le_u16(file, 0);
        let number_of_sections = le_u16(file, 2);
        let size_of_optional_header = le_u16(file, 16);
        let characteristics = FileCharacteristics::from_bits_retain(le_u16(file, 18));

        let opt = &data[SIGNATURE_SIZE + FILE_HEADER_SIZE..];
        let magic = le_u16(opt, 0);
        if magic != PE32_PLUS_MAGIC {
            return Err(Invalid::OptionalMagic(magic).into());
        }
        if usize::from(size_of_optional_header) < OPTIONAL_HEADER_FIXED_SIZE {
            return Err(Invalid::OptionalHeaderSize(size_of_optional_header).into());
        }

        // Directory slots present in both the declared count and the header.
        let declared = usize::try_from(le_u32(opt, 108)).unwrap_or(usize::MAX);
        let room = (usize::from(size_of_optional_header) - OPTIONAL_HEADER_FIXED_SIZE) / 8;
        let count = declared.min(room).min(NUM_DATA_DIRECTORIES);
        if opt.len() < OPTIONAL_HEADER_FIXED_SIZE + count * 8 {
            return Err(PeError::Truncated);
        }

        let mut data_directories = [DataDirectory::default(); NUM_DATA_DIRECTORIES];
        for (i, dir) in data_directories.iter_mut().enumerate().take(count) {
            let off = OPTIONAL_HEADER_FIXED_SIZE + i * 8;
            *dir = DataDirectory {
                virtual_address: le_u32(opt, off),
                size: le_u32(opt, off + 4),
            };
        }

        Ok(Self {
            offset,
            machine,
            number_of_sections,
            size_of_optional_header,
            characteristics,
            entry_point: le_u32(opt, 16),
            image_base: le_u64(opt, 24),
            section_alignment: le_u32(opt, 32),
            file_alignment: le_u32(opt, 36),
            size_of_image: le_u32(opt, 56),
            size_of_headers: le_u32(opt, 60),
            subsystem: le_u16(opt, 68),
            data_directories,
        })
    }

    /// Checks the invariants a loadable image must satisfy on a host with
    /// pages of `page_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as [`PeError::Invalid`].
    pub fn validate(&self, page_size: u64) -> Result<(), PeError> {
        if self.machine != MACHINE_AMD64 {
            return Err(Invalid::Machine(self.machine).into());
        }
        if self.subsystem != SUBSYSTEM_EFI_APPLICATION {
            return Err(Invalid::Subsystem(self.subsystem).into());
        }

        let align = u64::from(self.section_alignment);
        if align < page_size || align % page_size != 0 {
            return Err(Invalid::SectionAlignment(self.section_alignment).into());
        }
        if u64::from(self.size_of_image) % align != 0 {
            return Err(Invalid::ImageSize(self.size_of_image).into());
        }

        let expected = self.expected_header_size().ok_or(Invalid::FileAlignment)?;
        if u64::from(self.size_of_headers) != expected {
            return Err(Invalid::HeaderSize {
                declared: self.size_of_headers,
                expected,
            }
            .into());
        }
        if self.size_of_headers > self.size_of_image {
            return Err(Invalid::HeadersExceedImage.into());
        }
        if self.entry_point >= self.size_of_image {
            return Err(Invalid::EntryPoint(self.entry_point).into());
        }
        Ok(())
    }

    /// The header size implied by the layout: signature, file header,
    /// optional header and section table past `e_lfanew`, rounded up to the
    /// file alignment. `None` when the file alignment is zero.
    #[must_use]
    pub fn expected_header_size(&self) -> Option<u64> {
        let unaligned = u64::from(self.offset.get())
            + (SIGNATURE_SIZE + FILE_HEADER_SIZE) as u64
            + u64::from(self.size_of_optional_header)
            + u64::from(self.number_of_sections) * SECTION_HEADER_SIZE as u64;
        round_up(unaligned, u64::from(self.file_alignment))
    }

    /// File offset of the first section header.
    #[must_use]
    pub fn section_table_offset(&self) -> u64 {
        u64::from(self.offset.get())
            + (SIGNATURE_SIZE + FILE_HEADER_SIZE) as u64
            + u64::from(self.size_of_optional_header)
    }

    /// The base relocation directory.
    #[must_use]
    pub fn base_relocation(&self) -> DataDirectory {
        self.data_directories[DIRECTORY_BASE_RELOCATION]
    }
}

/// Reads the DOS header and returns where the NT headers start.
///
/// # Errors
///
/// [`PeError::Disk`] or [`PeError::Truncated`] if the DOS header cannot be
/// read, [`PeError::Invalid`] if it lacks the `MZ` signature.
pub fn locate_header<R: ReadAt + ?Sized>(stream: &R) -> Result<HeaderOffset, PeError> {
    let mut dos = [0u8; DOS_HEADER_SIZE];
    read_exact_at(stream, &mut dos, 0)?;
    if dos[..2] != DOS_MAGIC {
        return Err(Invalid::DosMagic.into());
    }
    Ok(HeaderOffset(le_u32(&dos, E_LFANEW_OFFSET)))
}

/// Reads the NT headers at `offset` and validates them for a host with
/// pages of `page_size` bytes.
///
/// # Errors
///
/// Any [`PeError`]: read failures, truncation, or the first violated
/// header invariant.
pub fn load_and_validate<R: ReadAt + ?Sized>(
    stream: &R,
    offset: HeaderOffset,
    page_size: u64,
) -> Result<ImageHeader, PeError> {
    let base = u64::from(offset.get());

    // The fixed part first; it tells how large the optional header is.
    let fixed = SIGNATURE_SIZE + FILE_HEADER_SIZE + OPTIONAL_HEADER_FIXED_SIZE;
    let mut buf = vec![0u8; fixed];
    read_exact_at(stream, &mut buf, base)?;
    let declared = usize::from(le_u16(&buf, SIGNATURE_SIZE + 16)).min(OPTIONAL_HEADER_SIZE);
    if declared > OPTIONAL_HEADER_FIXED_SIZE {
        buf.resize(SIGNATURE_SIZE + FILE_HEADER_SIZE + declared, 0);
        read_exact_at(stream, &mut buf[fixed..], base + fixed as u64)?;
    }

    let header = ImageHeader::parse(&buf, offset)?;
    header.validate(page_size)?;
    log::debug!(
        "PE32+ header at {:#x}: base {:#x}, image size {:#x}, {} sections, entry {:#x}",
        base,
        header.image_base,
        header.size_of_image,
        header.number_of_sections,
        header.entry_point,
    );
    Ok(header)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::builder::ImageBuilder;

    const PAGE: u64 = 4096;

    fn load(bytes: &[u8]) -> Result<ImageHeader, PeError> {
        let offset = locate_header(bytes)?;
        load_and_validate(bytes, offset, PAGE)
    }

    fn invalid(bytes: &[u8]) -> Option<Invalid> {
        load(bytes).err().and_then(|e| e.invalid())
    }

    #[test]
    fn well_formed_image_loads() {
        let image = ImageBuilder::new().text(&[0xc3]).build();
        let header = load(&image).unwrap();
        assert_eq!(header.machine, MACHINE_AMD64);
        assert_eq!(header.subsystem, SUBSYSTEM_EFI_APPLICATION);
        assert_eq!(header.number_of_sections, 1);
        assert_eq!(u64::from(header.size_of_headers), header.expected_header_size().unwrap());
    }

    #[test]
    fn locate_reads_e_lfanew() {
        let image = ImageBuilder::new().text(&[0xc3]).build();
        assert_eq!(locate_header(image.as_slice()).unwrap(), HeaderOffset::new(0x80));
    }

    #[test]
    fn each_magic_byte_matters() {
        let image = ImageBuilder::new().text(&[0xc3]).build();
        // MZ, PE\0\0 and the optional header magic.
        let magic_bytes = [0usize, 1, 0x80, 0x81, 0x82, 0x83, 0x98, 0x99];
        for &at in &magic_bytes {
            let mut mutated = image.clone();
            mutated[at] ^= 0x01;
            assert!(
                matches!(load(&mutated), Err(PeError::Invalid(_))),
                "flipping byte {at:#x} was accepted"
            );
        }
    }

    #[test]
    fn reject_bad_dos_magic() {
        let mut image = ImageBuilder::new().text(&[0xc3]).build();
        image[0] = b'Z';
        assert_eq!(invalid(&image), Some(Invalid::DosMagic));
    }

    #[test]
    fn reject_wrong_machine() {
        let image = ImageBuilder::new().machine(0x014c).text(&[0xc3]).build();
        assert_eq!(invalid(&image), Some(Invalid::Machine(0x014c)));
    }

    #[test]
    fn reject_wrong_subsystem() {
        let image = ImageBuilder::new().subsystem(3).text(&[0xc3]).build();
        assert_eq!(invalid(&image), Some(Invalid::Subsystem(3)));
    }

    #[test]
    fn reject_sub_page_alignment() {
        let image = ImageBuilder::new().section_alignment(0x200).text(&[0xc3]).build();
        assert_eq!(invalid(&image), Some(Invalid::SectionAlignment(0x200)));
    }

    #[test]
    fn reject_unaligned_image_size() {
        let image = ImageBuilder::new().size_of_image(0x2100).text(&[0xc3]).build();
        assert_eq!(invalid(&image), Some(Invalid::ImageSize(0x2100)));
    }

    #[test]
    fn reject_header_size_mismatch() {
        let image = ImageBuilder::new().size_of_headers(0x600).text(&[0xc3]).build();
        assert!(matches!(
            invalid(&image),
            Some(Invalid::HeaderSize { declared: 0x600, expected: 0x200 })
        ));
    }

    #[test]
    fn reject_truncated_dos_header() {
        let image = ImageBuilder::new().text(&[0xc3]).build();
        assert!(matches!(load(&image[..40]), Err(PeError::Truncated)));
    }

    #[test]
    fn reject_truncated_nt_headers() {
        let image = ImageBuilder::new().text(&[0xc3]).build();
        assert!(matches!(load(&image[..0x100]), Err(PeError::Truncated)));
    }

    #[test]
    fn missing_directories_read_as_empty() {
        let image = ImageBuilder::new().text(&[0xc3]).build();
        let header = load(&image).unwrap();
        assert!(header.base_relocation().is_empty());
    }

    #[test]
    fn display_errors() {
        let err = PeError::Invalid(Invalid::Machine(0x014c));
        assert_eq!(
            err.to_string(),
            "invalid image: machine 0x014c is not supported, only AMD64 images are"
        );
        assert_eq!(PeError::Truncated.to_string(), "truncated image");
    }
}
