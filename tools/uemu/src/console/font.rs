//! Text-mode glyphs.
//!
//! Glyphs come from the `font8x8` sets. Each source row is drawn twice to
//! give the 8x16 cell the text grid is laid out in. Bit 0 of a row is the
//! leftmost pixel.

use font8x8::UnicodeFonts;

/// Width of a character cell in pixels.
pub const GLYPH_WIDTH: usize = 8;

/// Height of a character cell in pixels.
pub const GLYPH_HEIGHT: usize = 16;

const REPLACEMENT: char = '?';

/// An 8x8 bitmap, one byte per row.
pub type Glyph = [u8; 8];

/// Looks up the glyph for a UCS-2 code unit, falling back to `?`.
#[must_use]
pub fn glyph(code: u16) -> Glyph {
    char::from_u32(u32::from(code))
        .and_then(lookup)
        .or_else(|| lookup(REPLACEMENT))
        .unwrap_or_default()
}

fn lookup(c: char) -> Option<Glyph> {
    font8x8::BASIC_FONTS
        .get(c)
        .or_else(|| font8x8::LATIN_FONTS.get(c))
        .or_else(|| font8x8::BOX_FONTS.get(c))
        .or_else(|| font8x8::BLOCK_FONTS.get(c))
}

/// Whether pixel `(x, y)` of the 8x16 cell for `glyph` is foreground.
#[must_use]
pub fn is_set(glyph: &Glyph, x: usize, y: usize) -> bool {
    glyph[y / 2] & (1 << x) != 0
}
