//! GUIDs and the identifiers the emulator installs or recognizes.

use core::fmt;
use core::str::FromStr;

/// A UEFI GUID in its mixed-endian in-memory layout.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EfiGuid {
    /// First 32 bits, little-endian.
    pub data1: u32,
    /// Next 16 bits, little-endian.
    pub data2: u16,
    /// Next 16 bits, little-endian.
    pub data3: u16,
    /// Remaining 64 bits, stored as bytes.
    pub data4: [u8; 8],
}

#[expect(
    clippy::unreadable_literal,
    reason = "GUID bytes are inherently opaque"
)]
impl EfiGuid {
    /// Creates a GUID from its component parts.
    #[must_use]
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// The all-zero GUID.
    pub const NULL: Self = Self::new(0, 0, 0, [0; 8]);

    /// `EFI_SIMPLE_TEXT_INPUT_PROTOCOL`.
    pub const SIMPLE_TEXT_INPUT_PROTOCOL: Self =
        Self::new(0x387477c1, 0x69c7, 0x11d2, [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b]);

    /// `EFI_SIMPLE_TEXT_OUTPUT_PROTOCOL`.
    pub const SIMPLE_TEXT_OUTPUT_PROTOCOL: Self =
        Self::new(0x387477c2, 0x69c7, 0x11d2, [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b]);

    /// `EFI_GRAPHICS_OUTPUT_PROTOCOL`.
    pub const GRAPHICS_OUTPUT_PROTOCOL: Self =
        Self::new(0x9042a9de, 0x23dc, 0x4a38, [0x96, 0xfb, 0x7a, 0xde, 0xd0, 0x80, 0x51, 0x6a]);

    /// `EFI_LOADED_IMAGE_PROTOCOL`.
    pub const LOADED_IMAGE_PROTOCOL: Self =
        Self::new(0x5b1b31a1, 0x9562, 0x11d2, [0x8e, 0x3f, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b]);

    /// `EFI_GLOBAL_VARIABLE`, the vendor of the architecturally defined variables.
    pub const GLOBAL_VARIABLE: Self =
        Self::new(0x8be4df61, 0x93ca, 0x11d2, [0xaa, 0x0d, 0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c]);

    /// Returns `true` for the all-zero GUID.
    #[must_use]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for EfiGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7],
        )
    }
}

impl fmt::Debug for EfiGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EfiGuid({self})")
    }
}

/// Error returned when a string is not in `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseGuidError;

impl fmt::Display for ParseGuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected a GUID of the form xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx")
    }
}

impl core::error::Error for ParseGuidError {}

impl FromStr for EfiGuid {
    type Err = ParseGuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 36 || [8, 13, 18, 23].iter().any(|&i| bytes[i] != b'-') {
            return Err(ParseGuidError);
        }

        let mut digits = bytes.iter().filter(|&&b| b != b'-');
        let mut next = |count: usize| -> Result<u64, ParseGuidError> {
            let mut value = 0u64;
            for _ in 0..count {
                let c = *digits.next().ok_or(ParseGuidError)?;
                let nibble = char::from(c).to_digit(16).ok_or(ParseGuidError)?;
                value = (value << 4) | u64::from(nibble);
            }
            Ok(value)
        };

        let data1 = u32::try_from(next(8)?).map_err(|_| ParseGuidError)?;
        let data2 = u16::try_from(next(4)?).map_err(|_| ParseGuidError)?;
        let data3 = u16::try_from(next(4)?).map_err(|_| ParseGuidError)?;
        let mut data4 = [0u8; 8];
        for byte in &mut data4 {
            *byte = u8::try_from(next(2)?).map_err(|_| ParseGuidError)?;
        }
        Ok(Self::new(data1, data2, data3, data4))
    }
}

const _: () = assert!(core::mem::size_of::<EfiGuid>() == 16);
