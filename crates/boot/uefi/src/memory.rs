//! Memory types accepted by the pool services.

/// The type of a memory region, as passed to `AllocatePool`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EfiMemoryType {
    /// Not usable.
    ReservedMemoryType = 0,
    /// Code of a loaded application.
    LoaderCode = 1,
    /// Data of a loaded application.
    LoaderData = 2,
    /// Code of a boot services driver.
    BootServicesCode = 3,
    /// Data of a boot services driver.
    BootServicesData = 4,
    /// Code of a runtime services driver.
    RuntimeServicesCode = 5,
    /// Data of a runtime services driver.
    RuntimeServicesData = 6,
    /// Free memory.
    ConventionalMemory = 7,
    /// Memory with detected errors.
    UnusableMemory = 8,
    /// Memory holding ACPI tables.
    AcpiReclaimMemory = 9,
    /// Firmware-reserved ACPI memory.
    AcpiMemoryNvs = 10,
    /// Memory-mapped I/O.
    MemoryMappedIo = 11,
    /// Memory-mapped I/O port space.
    MemoryMappedIoPortSpace = 12,
    /// Processor firmware code.
    PalCode = 13,
    /// Byte-addressable non-volatile memory.
    PersistentMemory = 14,
    /// Memory not yet accepted by the isolation architecture.
    UnacceptedMemoryType = 15,
}

/// A raw memory type value outside the defined range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidMemoryType(pub u32);

impl TryFrom<u32> for EfiMemoryType {
    type Error = InvalidMemoryType;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => Self::ReservedMemoryType,
            1 => Self::LoaderCode,
            2 => Self::LoaderData,
            3 => Self::BootServicesCode,
            4 => Self::BootServicesData,
            5 => Self::RuntimeServicesCode,
            6 => Self::RuntimeServicesData,
            7 => Self::ConventionalMemory,
            8 => Self::UnusableMemory,
            9 => Self::AcpiReclaimMemory,
            10 => Self::AcpiMemoryNvs,
            11 => Self::MemoryMappedIo,
            12 => Self::MemoryMappedIoPortSpace,
            13 => Self::PalCode,
            14 => Self::PersistentMemory,
            15 => Self::UnacceptedMemoryType,
            other => return Err(InvalidMemoryType(other)),
        })
    }
}
