//! A PE32+ writer for producing test images.
//!
//! Emits the smallest file the loader accepts: a 64-byte DOS header with
//! `e_lfanew = 0x80`, NT headers with all sixteen data directories, the
//! section table, then each section's raw data padded to the file
//! alignment. Every field can be overridden to produce malformed images.

use crate::header::{
    DIRECTORY_BASE_RELOCATION, DOS_MAGIC, FILE_HEADER_SIZE, FileCharacteristics, MACHINE_AMD64,
    NT_SIGNATURE, NUM_DATA_DIRECTORIES, OPTIONAL_HEADER_SIZE, PE32_PLUS_MAGIC, SECTION_HEADER_SIZE,
    SIGNATURE_SIZE, SUBSYSTEM_EFI_APPLICATION,
};
use crate::layout::round_up;
use crate::reloc::{IMAGE_REL_BASED_ABSOLUTE, IMAGE_REL_BASED_DIR64};
use crate::section::SectionFlags;

/// File offset of the NT headers in built images.
pub const NT_HEADER_OFFSET: u32 = 0x80;

/// Default preferred base of built images.
pub const DEFAULT_IMAGE_BASE: u64 = 0x1_4000_0000;

/// One section to emit.
#[derive(Debug, Clone)]
pub struct SectionSpec {
    name: [u8; 8],
    virtual_address: u32,
    virtual_size: u32,
    data: Vec<u8>,
    flags: SectionFlags,
}

impl SectionSpec {
    /// A section at an explicit RVA.
    ///
    /// # Panics
    ///
    /// Panics if `name` is longer than eight bytes.
    #[must_use]
    pub fn new(name: &str, virtual_address: u32, virtual_size: u32, data: &[u8], flags: SectionFlags) -> Self {
        assert!(name.len() <= 8, "section names are at most 8 bytes");
        let mut raw_name = [0u8; 8];
        raw_name[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            name: raw_name,
            virtual_address,
            virtual_size,
            data: data.to_vec(),
            flags,
        }
    }
}

/// Builder for a PE32+ EFI application image.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    machine: u16,
    subsystem: u16,
    characteristics: FileCharacteristics,
    image_base: u64,
    section_alignment: u32,
    file_alignment: u32,
    entry_point: Option<u32>,
    size_of_image: Option<u32>,
    size_of_headers: Option<u32>,
    sections: Vec<SectionSpec>,
    dir64_fixups: Vec<u32>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// A valid AMD64 EFI application with no sections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            machine: MACHINE_AMD64,
            subsystem: SUBSYSTEM_EFI_APPLICATION,
            characteristics: FileCharacteristics::EXECUTABLE_IMAGE
                | FileCharacteristics::LARGE_ADDRESS_AWARE,
            image_base: DEFAULT_IMAGE_BASE,
            section_alignment: 0x1000,
            file_alignment: 0x200,
            entry_point: None,
            size_of_image: None,
            size_of_headers: None,
            sections: Vec::new(),
            dir64_fixups: Vec::new(),
        }
    }

    /// Overrides the machine field.
    #[must_use]
    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Overrides the subsystem field.
    #[must_use]
    pub fn subsystem(mut self, subsystem: u16) -> Self {
        self.subsystem = subsystem;
        self
    }

    /// Overrides the COFF characteristics.
    #[must_use]
    pub fn characteristics(mut self, characteristics: FileCharacteristics) -> Self {
        self.characteristics = characteristics;
        self
    }

    /// Sets the preferred base.
    #[must_use]
    pub fn image_base(mut self, base: u64) -> Self {
        self.image_base = base;
        self
    }

    /// Sets the section alignment.
    #[must_use]
    pub fn section_alignment(mut self, align: u32) -> Self {
        self.section_alignment = align;
        self
    }

    /// Sets the entry point RVA. Defaults to the first code section.
    #[must_use]
    pub fn entry_point(mut self, rva: u32) -> Self {
        self.entry_point = Some(rva);
        self
    }

    /// Overrides `SizeOfImage`.
    #[must_use]
    pub fn size_of_image(mut self, size: u32) -> Self {
        self.size_of_image = Some(size);
        self
    }

    /// Overrides `SizeOfHeaders`.
    #[must_use]
    pub fn size_of_headers(mut self, size: u32) -> Self {
        self.size_of_headers = Some(size);
        self
    }

    /// Appends a section as given.
    #[must_use]
    pub fn section(mut self, spec: SectionSpec) -> Self {
        self.sections.push(spec);
        self
    }

    /// RVA the next automatically placed section will get.
    #[must_use]
    pub fn next_virtual_address(&self) -> u32 {
        let align = u64::from(self.section_alignment);
        let end = self
            .sections
            .iter()
            .map(|s| u64::from(s.virtual_address) + u64::from(s.virtual_size.max(1)))
            .max()
            .unwrap_or(0);
        let next = round_up(end, align).unwrap_or(0).max(align);
        u32::try_from(next).unwrap_or(u32::MAX)
    }

    /// Appends an executable `.text` section holding `code`.
    #[must_use]
    pub fn text(self, code: &[u8]) -> Self {
        let rva = self.next_virtual_address();
        let flags = SectionFlags::CNT_CODE | SectionFlags::MEM_EXECUTE | SectionFlags::MEM_READ;
        let len = u32::try_from(code.len()).unwrap_or(u32::MAX);
        self.section(SectionSpec::new(".text", rva, len, code, flags))
    }

    /// Appends a writable `.data` section of `virtual_size` bytes starting
    /// with `data`.
    #[must_use]
    pub fn data(self, data: &[u8], virtual_size: u32) -> Self {
        let rva = self.next_virtual_address();
        let flags = SectionFlags::CNT_INITIALIZED_DATA | SectionFlags::MEM_READ | SectionFlags::MEM_WRITE;
        self.section(SectionSpec::new(".data", rva, virtual_size, data, flags))
    }

    /// Records a `DIR64` fixup at `rva`; a `.reloc` section is emitted last.
    #[must_use]
    pub fn dir64(mut self, rva: u32) -> Self {
        self.dir64_fixups.push(rva);
        self
    }

    /// Encodes the relocation blocks for the recorded fixups.
    fn relocation_blocks(&self) -> Vec<u8> {
        let mut fixups = self.dir64_fixups.clone();
        fixups.sort_unstable();
        let mut out = Vec::new();
        let mut i = 0;
        while i < fixups.len() {
            let page = fixups[i] & !0xfff;
            let mut entries: Vec<u16> = Vec::new();
            while i < fixups.len() && fixups[i] & !0xfff == page {
                entries.push((u16::from(IMAGE_REL_BASED_DIR64) << 12) | (fixups[i] & 0xfff) as u16);
                i += 1;
            }
            if entries.len() % 2 == 1 {
                entries.push(u16::from(IMAGE_REL_BASED_ABSOLUTE) << 12);
            }
            let size = 8 + 2 * entries.len() as u32;
            out.extend_from_slice(&page.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            for entry in entries {
                out.extend_from_slice(&entry.to_le_bytes());
            }
        }
        out
    }

    /// Serializes the image.
    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "test images are far below 4 GiB")]
    pub fn build(mut self) -> Vec<u8> {
        let mut reloc_dir = (0u32, 0u32);
        if !self.dir64_fixups.is_empty() {
            let blocks = self.relocation_blocks();
            let rva = self.next_virtual_address();
            reloc_dir = (rva, blocks.len() as u32);
            let flags = SectionFlags::CNT_INITIALIZED_DATA
                | SectionFlags::MEM_READ
                | SectionFlags::MEM_DISCARDABLE;
            self.sections
                .push(SectionSpec::new(".reloc", rva, blocks.len() as u32, &blocks, flags));
        }

        let file_align = u64::from(self.file_alignment);
        let header_bytes = u64::from(NT_HEADER_OFFSET)
            + (SIGNATURE_SIZE + FILE_HEADER_SIZE + OPTIONAL_HEADER_SIZE) as u64
            + (self.sections.len() * SECTION_HEADER_SIZE) as u64;
        let computed_headers = round_up(header_bytes, file_align).unwrap_or(header_bytes);
        let size_of_headers = self.size_of_headers.unwrap_or(computed_headers as u32);
        let size_of_image = self.size_of_image.unwrap_or_else(|| {
            let end = self
                .sections
                .iter()
                .map(|s| u64::from(s.virtual_address) + u64::from(s.virtual_size))
                .max()
                .unwrap_or(computed_headers);
            round_up(end, u64::from(self.section_alignment)).unwrap_or(end) as u32
        });
        let entry_point = self.entry_point.unwrap_or_else(|| {
            self.sections
                .iter()
                .find(|s| s.flags.contains(SectionFlags::CNT_CODE))
                .or(self.sections.first())
                .map_or(0, |s| s.virtual_address)
        });

        // Raw data placement.
        let mut file_offset = computed_headers;
        let mut raw = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let padded = round_up(section.data.len() as u64, file_align).unwrap_or(0);
            let pointer = if padded == 0 { 0 } else { file_offset };
            raw.push((pointer as u32, padded as u32));
            file_offset += padded;
        }

        let mut out = vec![0u8; file_offset as usize];
        out[..2].copy_from_slice(&DOS_MAGIC);
        put(&mut out, 0x3c, &NT_HEADER_OFFSET.to_le_bytes());

        let nt = NT_HEADER_OFFSET as usize;
        out[nt..nt + 4].copy_from_slice(&NT_SIGNATURE);
        let file = nt + SIGNATURE_SIZE;
        put(&mut out, file, &self.machine.to_le_bytes());
        put(&mut out, file + 2, &(self.sections.len() as u16).to_le_bytes());
        put(&mut out, file + 16, &(OPTIONAL_HEADER_SIZE as u16).to_le_bytes());
        put(&mut out, file + 18, &self.characteristics.bits().to_le_bytes());

        let opt = file + FILE_HEADER_SIZE;
        let code_size: u32 = self
            .sections
            .iter()
            .zip(&raw)
            .filter(|(s, _)| s.flags.contains(SectionFlags::CNT_CODE))
            .map(|(_, &(_, size))| size)
            .sum();
        put(&mut out, opt, &PE32_PLUS_MAGIC.to_le_bytes());
        put(&mut out, opt + 4, &code_size.to_le_bytes());
        put(&mut out, opt + 16, &entry_point.to_le_bytes());
        put(&mut out, opt + 24, &self.image_base.to_le_bytes());
        put(&mut out, opt + 32, &self.section_alignment.to_le_bytes());
        put(&mut out, opt + 36, &self.file_alignment.to_le_bytes());
        put(&mut out, opt + 56, &size_of_image.to_le_bytes());
        put(&mut out, opt + 60, &size_of_headers.to_le_bytes());
        put(&mut out, opt + 68, &self.subsystem.to_le_bytes());
        put(&mut out, opt + 72, &0x10_0000u64.to_le_bytes());
        put(&mut out, opt + 80, &0x1000u64.to_le_bytes());
        put(&mut out, opt + 108, &(NUM_DATA_DIRECTORIES as u32).to_le_bytes());
        let reloc_slot = opt + 112 + DIRECTORY_BASE_RELOCATION * 8;
        put(&mut out, reloc_slot, &reloc_dir.0.to_le_bytes());
        put(&mut out, reloc_slot + 4, &reloc_dir.1.to_le_bytes());

        let table = opt + OPTIONAL_HEADER_SIZE;
        for (i, (section, &(pointer, size))) in self.sections.iter().zip(&raw).enumerate() {
            let at = table + i * SECTION_HEADER_SIZE;
            put(&mut out, at, &section.name);
            put(&mut out, at + 8, &section.virtual_size.to_le_bytes());
            put(&mut out, at + 12, &section.virtual_address.to_le_bytes());
            put(&mut out, at + 16, &size.to_le_bytes());
            put(&mut out, at + 20, &pointer.to_le_bytes());
            put(&mut out, at + 36, &section.flags.bits().to_le_bytes());
            put(&mut out, pointer as usize, &section.data);
        }
        out
    }
}

fn put(out: &mut [u8], at: usize, bytes: &[u8]) {
    out[at..at + bytes.len()].copy_from_slice(bytes);
}
