//! Variable attribute flags.

use bitflags::bitflags;

bitflags! {
    /// Attributes stored alongside each UEFI variable.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VariableAttributes: u32 {
        /// Persisted across resets.
        const NON_VOLATILE = 0x0000_0001;
        /// Visible while boot services are available.
        const BOOTSERVICE_ACCESS = 0x0000_0002;
        /// Visible after `ExitBootServices`.
        const RUNTIME_ACCESS = 0x0000_0004;
        /// Hardware error record.
        const HARDWARE_ERROR_RECORD = 0x0000_0008;
        /// Writes require authentication.
        const AUTHENTICATED_WRITE_ACCESS = 0x0000_0010;
        /// Time-based authenticated writes.
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x0000_0020;
        /// Writes append to the existing value.
        const APPEND_WRITE = 0x0000_0040;
    }
}

impl VariableAttributes {
    /// The usual attribute set for boot-time configuration variables.
    pub const DEFAULT: Self = Self::NON_VOLATILE
        .union(Self::BOOTSERVICE_ACCESS)
        .union(Self::RUNTIME_ACCESS);
}
