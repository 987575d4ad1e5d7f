//! PE32+ image parsing for the user-mode UEFI emulator.
//!
//! Reads and validates the DOS stub, NT headers and section table of a UEFI
//! application, lays its sections out into a caller-provided byte slice and
//! applies base relocations. Everything here is safe code working on byte
//! slices; reserving and protecting the memory the image finally runs from
//! is left to the caller.
//!
//! # Usage
//!
//! ```no_run
//! use std::fs::File;
//!
//! # fn load(file: File, image: &mut [u8], actual_base: u64) -> Result<(), uemu_pe::PeError> {
//! let offset = uemu_pe::locate_header(&file)?;
//! let header = uemu_pe::load_and_validate(&file, offset, 4096)?;
//! let sections = uemu_pe::SectionTable::load(&file, &header)?;
//! uemu_pe::place_sections(image, &header, &sections, &file, 4096)?;
//! if actual_base != header.image_base {
//!     uemu_pe::reloc::apply(image, &header, actual_base)?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

#[cfg(any(test, feature = "builder"))]
pub mod builder;
pub mod error;
pub mod header;
pub mod layout;
pub mod reloc;
pub mod section;
pub mod stream;

pub use error::{Invalid, PeError};
pub use header::{
    DataDirectory, FileCharacteristics, HeaderOffset, ImageHeader, load_and_validate,
    locate_header,
};
pub use layout::{place_sections, round_up};
pub use section::{SectionFlags, SectionHeader, SectionTable};
pub use stream::ReadAt;
