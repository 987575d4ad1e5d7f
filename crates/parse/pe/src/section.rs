//! Section table parsing.

use bitflags::bitflags;

use crate::error::PeError;
use crate::header::{ImageHeader, SECTION_HEADER_SIZE, le_u32};
use crate::stream::{ReadAt, read_exact_at};

bitflags! {
    /// `IMAGE_SECTION_HEADER::Characteristics`, without the alignment field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// Contains executable code.
        const CNT_CODE = 1 << 5;
        /// Contains initialized data.
        const CNT_INITIALIZED_DATA = 1 << 6;
        /// Contains uninitialized data.
        const CNT_UNINITIALIZED_DATA = 1 << 7;
        /// Can be discarded after loading.
        const MEM_DISCARDABLE = 1 << 25;
        /// Can be shared.
        const MEM_SHARED = 1 << 28;
        /// Can be executed.
        const MEM_EXECUTE = 1 << 29;
        /// Can be read.
        const MEM_READ = 1 << 30;
        /// Can be written.
        const MEM_WRITE = 1 << 31;
    }
}

/// A parsed section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Raw 8-byte name, NUL-padded.
    pub name: [u8; 8],
    /// Size of the section in memory.
    pub virtual_size: u32,
    /// RVA of the section.
    pub virtual_address: u32,
    /// Size of the section's data in the file.
    pub size_of_raw_data: u32,
    /// File offset of the section's data.
    pub pointer_to_raw_data: u32,
    /// Memory permissions and content flags.
    pub characteristics: SectionFlags,
}

impl SectionHeader {
    /// Parses one 40-byte section header.
    ///
    /// # Panics
    ///
    /// Panics if `data` is shorter than a section header.
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        let mut name = [0u8; 8];
        name.copy_from_slice(&data[..8]);
        Self {
            name,
            virtual_size: le_u32(data, 8),
            virtual_address: le_u32(data, 12),
            size_of_raw_data: le_u32(data, 16),
            pointer_to_raw_data: le_u32(data, 20),
            characteristics: SectionFlags::from_bits_retain(le_u32(data, 36)),
        }
    }

    /// The name up to the first NUL, lossily decoded.
    #[must_use]
    pub fn name(&self) -> String {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }

    /// Whether the section is mapped readable.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_READ)
    }

    /// Whether the section is mapped writable.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_WRITE)
    }

    /// Whether the section is mapped executable.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.characteristics
            .intersects(SectionFlags::MEM_EXECUTE | SectionFlags::CNT_CODE)
    }
}

/// The section table of an image, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionTable {
    sections: Vec<SectionHeader>,
}

impl SectionTable {
    /// Reads the section table that follows the optional header.
    ///
    /// # Errors
    ///
    /// [`PeError::Disk`] or [`PeError::Truncated`] if the table cannot be
    /// read in full.
    pub fn load<R: ReadAt + ?Sized>(stream: &R, header: &ImageHeader) -> Result<Self, PeError> {
        let mut raw = vec![0u8; usize::from(header.number_of_sections) * SECTION_HEADER_SIZE];
        read_exact_at(stream, &mut raw, header.section_table_offset())?;
        Ok(Self {
            sections: raw.chunks_exact(SECTION_HEADER_SIZE).map(SectionHeader::parse).collect(),
        })
    }

    /// The sections in file order.
    #[must_use]
    pub fn as_slice(&self) -> &[SectionHeader] {
        &self.sections
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns `true` if the image has no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Iterates over the sections in file order.
    pub fn iter(&self) -> core::slice::Iter<'_, SectionHeader> {
        self.sections.iter()
    }
}

impl From<Vec<SectionHeader>> for SectionTable {
    fn from(sections: Vec<SectionHeader>) -> Self {
        Self { sections }
    }
}

impl<'a> IntoIterator for &'a SectionTable {
    type Item = &'a SectionHeader;
    type IntoIter = core::slice::Iter<'a, SectionHeader>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
