//! Placing headers and sections into the memory an image runs from.
//!
//! The target is a plain byte slice covering `SizeOfImage` bytes. Sections
//! are placed in file order behind a write cursor that only moves forward,
//! so a table with overlapping or unsorted sections is rejected before any
//! byte of the offending section is written.

use core::ops::Range;

use crate::error::{Invalid, PeError};
use crate::header::ImageHeader;
use crate::section::{SectionHeader, SectionTable};
use crate::stream::{ReadAt, read_exact_at};

/// Rounds `value` up to a multiple of `align`.
///
/// Returns `None` if `align` is zero or the result overflows.
#[must_use]
pub fn round_up(value: u64, align: u64) -> Option<u64> {
    if align == 0 {
        return None;
    }
    value.div_ceil(align).checked_mul(align)
}

/// Copies `SizeOfHeaders` bytes from the start of the file to the start of
/// the image.
///
/// # Errors
///
/// [`PeError::Disk`] or [`PeError::Truncated`] if the headers cannot be read,
/// [`PeError::Invalid`] if `image` cannot hold them.
pub fn copy_headers<R: ReadAt + ?Sized>(
    image: &mut [u8],
    header: &ImageHeader,
    stream: &R,
) -> Result<(), PeError> {
    let len = header.size_of_headers as usize;
    let target = image.get_mut(..len).ok_or(Invalid::HeadersExceedImage)?;
    read_exact_at(stream, target, 0)
}

/// Computes where section `index` lands, given the current write cursor.
///
/// Returns the page-rounded extent the section occupies.
fn section_extent(
    index: usize,
    section: &SectionHeader,
    cursor: u64,
    image_size: u64,
    page_size: u64,
) -> Result<Range<u64>, Invalid> {
    let rounded = round_up(u64::from(section.virtual_size), page_size)
        .ok_or(Invalid::SectionBounds(index))?;
    if u64::from(section.size_of_raw_data) > rounded {
        return Err(Invalid::RawDataTooLarge(index));
    }
    let start = u64::from(section.virtual_address);
    let end = start + rounded;
    if start < cursor {
        return Err(Invalid::SectionOverlap(index));
    }
    if end > image_size {
        return Err(Invalid::SectionBounds(index));
    }
    Ok(start..end)
}

/// Zero-fills and loads every section of `sections` into `image`.
///
/// For each section in file order: reject it if its page-rounded extent
/// starts below the cursor or ends past `SizeOfImage`, zero the extent,
/// read `SizeOfRawData` bytes from `PointerToRawData`, and advance the
/// cursor to the end of the extent. The cursor starts at `SizeOfHeaders`.
///
/// # Errors
///
/// [`PeError::Invalid`] for a layout violation, [`PeError::Disk`] or
/// [`PeError::Truncated`] if section data cannot be read.
pub fn place_sections<R: ReadAt + ?Sized>(
    image: &mut [u8],
    header: &ImageHeader,
    sections: &SectionTable,
    stream: &R,
    page_size: u64,
) -> Result<(), PeError> {
    let image_size = u64::from(header.size_of_image).min(image.len() as u64);
    let mut cursor = u64::from(header.size_of_headers);

    for (index, section) in sections.iter().enumerate() {
        let extent = section_extent(index, section, cursor, image_size, page_size)?;
        log::debug!(
            "section {:<8} rva {:#010x}..{:#010x} raw {:#x}@{:#x} flags {:?}",
            section.name(),
            extent.start,
            extent.end,
            section.size_of_raw_data,
            section.pointer_to_raw_data,
            section.characteristics,
        );

        // Extents were bounds-checked against `image.len()` above.
        let target = &mut image[extent.start as usize..extent.end as usize];
        target.fill(0);
        let raw = section.size_of_raw_data as usize;
        read_exact_at(stream, &mut target[..raw], u64::from(section.pointer_to_raw_data))?;

        cursor = extent.end;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ImageBuilder, SectionSpec};
    use crate::header::{load_and_validate, locate_header};
    use crate::section::SectionFlags;

    const PAGE: u64 = 4096;

    fn parse(bytes: &[u8]) -> (ImageHeader, SectionTable) {
        let header = load_and_validate(bytes, locate_header(bytes).unwrap(), PAGE).unwrap();
        let sections = SectionTable::load(bytes, &header).unwrap();
        (header, sections)
    }

    fn map(bytes: &[u8]) -> Result<Vec<u8>, PeError> {
        let (header, sections) = parse(bytes);
        let mut image = vec![0xaa; header.size_of_image as usize];
        copy_headers(&mut image, &header, bytes)?;
        place_sections(&mut image, &header, &sections, bytes, PAGE)?;
        Ok(image)
    }

    #[test]
    fn round_up_edges() {
        assert_eq!(round_up(0, 4096), Some(0));
        assert_eq!(round_up(1, 4096), Some(4096));
        assert_eq!(round_up(4096, 4096), Some(4096));
        assert_eq!(round_up(5, 0), None);
        assert_eq!(round_up(u64::MAX, 4096), None);
    }

    #[test]
    fn placement_is_reproducible() {
        let file = ImageBuilder::new()
            .text(&[0x31, 0xc0, 0xc3])
            .data(b"payload", 0x3000)
            .build();
        let first = map(&file).unwrap();
        let second = map(&file).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn headers_and_data_land_at_their_rvas() {
        let file = ImageBuilder::new().text(&[0x31, 0xc0, 0xc3]).data(b"payload", 0x20).build();
        let (header, sections) = parse(&file);
        let image = map(&file).unwrap();

        assert_eq!(&image[..2], b"MZ");
        let data = &sections.as_slice()[1];
        let at = data.virtual_address as usize;
        assert_eq!(&image[at..at + 7], b"payload");
        // Gap between headers and first section is untouched.
        assert_eq!(image[header.size_of_headers as usize], 0xaa);
    }

    #[test]
    fn virtual_tail_is_zeroed() {
        let file = ImageBuilder::new().text(&[0xc3]).data(b"xy", 0x2000).build();
        let (_, sections) = parse(&file);
        let image = map(&file).unwrap();
        let data = &sections.as_slice()[1];
        let start = data.virtual_address as usize;
        assert!(image[start + 2..start + 0x2000].iter().all(|&b| b == 0));
    }

    #[test]
    fn reject_overlapping_sections() {
        let file = ImageBuilder::new()
            .section(SectionSpec::new(".a", 0x1000, 0x1800, b"a", SectionFlags::MEM_READ))
            .section(SectionSpec::new(".b", 0x2000, 0x10, b"b", SectionFlags::MEM_READ))
            .build();
        assert_eq!(map(&file).unwrap_err().invalid(), Some(Invalid::SectionOverlap(1)));
    }

    #[test]
    fn reject_unsorted_sections() {
        let file = ImageBuilder::new()
            .section(SectionSpec::new(".b", 0x2000, 0x10, b"b", SectionFlags::MEM_READ))
            .section(SectionSpec::new(".a", 0x1000, 0x10, b"a", SectionFlags::MEM_READ))
            .build();
        assert_eq!(map(&file).unwrap_err().invalid(), Some(Invalid::SectionOverlap(1)));
    }

    #[test]
    fn reject_section_inside_headers() {
        let file = ImageBuilder::new()
            .section(SectionSpec::new(".a", 0x100, 0x10, b"a", SectionFlags::MEM_READ))
            .size_of_image(0x2000)
            .build();
        assert_eq!(map(&file).unwrap_err().invalid(), Some(Invalid::SectionOverlap(0)));
    }

    #[test]
    fn reject_section_past_image_end() {
        let file = ImageBuilder::new()
            .section(SectionSpec::new(".a", 0x1000, 0x2000, b"a", SectionFlags::MEM_READ))
            .size_of_image(0x2000)
            .build();
        assert_eq!(map(&file).unwrap_err().invalid(), Some(Invalid::SectionBounds(0)));
    }

    #[test]
    fn reject_raw_data_larger_than_extent() {
        let file = ImageBuilder::new()
            .section(SectionSpec::new(".a", 0x1000, 0x10, &[0u8; 0x1200], SectionFlags::MEM_READ))
            .size_of_image(0x3000)
            .build();
        assert_eq!(map(&file).unwrap_err().invalid(), Some(Invalid::RawDataTooLarge(0)));
    }

    #[test]
    fn truncated_section_data() {
        let file = ImageBuilder::new().text(&[0xc3; 0x80]).build();
        let (header, sections) = parse(&file);
        let short = &file[..file.len() - 0x10];
        let mut image = vec![0; header.size_of_image as usize];
        let err = place_sections(&mut image, &header, &sections, short, PAGE).unwrap_err();
        assert!(matches!(err, PeError::Truncated));
    }
}
