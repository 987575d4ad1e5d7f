//! The emulated framebuffer and the text renderer that draws into it.
//!
//! Pixels are `u32` in `PixelRedGreenBlueReserved8BitPerColor` order: red
//! in the lowest byte. The buffer is shared with the guest through the
//! Graphics Output protocol, so it lives behind atomics and a stable heap
//! allocation; every host-side change bumps a generation counter that the
//! presenter polls.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::font::{self, GLYPH_HEIGHT, GLYPH_WIDTH};

/// Horizontal resolution.
pub const WIDTH: usize = 800;

/// Vertical resolution.
pub const HEIGHT: usize = 600;

/// Text columns.
pub const COLUMNS: usize = 80;

/// Text rows.
pub const ROWS: usize = 25;

/// Light gray on black.
pub const DEFAULT_ATTRIBUTE: u8 = 0x07;

/// The EGA palette, indexed by the 4-bit color of a text attribute.
const PALETTE: [(u8, u8, u8); 16] = [
    (0x00, 0x00, 0x00),
    (0x00, 0x00, 0xaa),
    (0x00, 0xaa, 0x00),
    (0x00, 0xaa, 0xaa),
    (0xaa, 0x00, 0x00),
    (0xaa, 0x00, 0xaa),
    (0xaa, 0x55, 0x00),
    (0xaa, 0xaa, 0xaa),
    (0x55, 0x55, 0x55),
    (0x55, 0x55, 0xff),
    (0x55, 0xff, 0x55),
    (0x55, 0xff, 0xff),
    (0xff, 0x55, 0x55),
    (0xff, 0x55, 0xff),
    (0xff, 0xff, 0x55),
    (0xff, 0xff, 0xff),
];

/// Packs a color in framebuffer order.
#[must_use]
pub const fn rgb(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) | (g as u32) << 8 | (b as u32) << 16
}

/// Splits a framebuffer pixel into `(r, g, b)`.
#[must_use]
pub const fn components(pixel: u32) -> (u8, u8, u8) {
    (pixel as u8, (pixel >> 8) as u8, (pixel >> 16) as u8)
}

/// The pixel value of palette entry `index & 0xf`.
#[must_use]
pub const fn palette(index: u8) -> u32 {
    let (r, g, b) = PALETTE[(index & 0x0f) as usize];
    rgb(r, g, b)
}

// ---------------------------------------------------------------------------
// Framebuffer
// ---------------------------------------------------------------------------

/// A `WIDTH` x `HEIGHT` pixel buffer at a fixed address.
pub struct Framebuffer {
    pixels: Box<[AtomicU32]>,
    generation: AtomicU64,
}

impl Framebuffer {
    /// Creates a black framebuffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pixels: (0..WIDTH * HEIGHT).map(|_| AtomicU32::new(0)).collect(),
            generation: AtomicU64::new(1),
        }
    }

    /// Address of the first pixel, as handed to the guest.
    #[must_use]
    pub fn base(&self) -> *mut u32 {
        self.pixels.as_ptr().cast::<u32>().cast_mut()
    }

    /// Size of the buffer in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.pixels.len() * size_of::<u32>()
    }

    /// Counter that changes whenever the host side draws.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Reads pixel `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the buffer.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * WIDTH + x].load(Ordering::Relaxed)
    }

    fn plot(&self, x: usize, y: usize, value: u32) {
        if x < WIDTH && y < HEIGHT {
            self.pixels[y * WIDTH + x].store(value, Ordering::Relaxed);
        }
    }

    /// Paints every pixel `value`.
    pub fn fill(&self, value: u32) {
        for pixel in &self.pixels {
            pixel.store(value, Ordering::Relaxed);
        }
        self.touch();
    }

    /// Moves everything up by `lines` pixel rows, filling the exposed rows
    /// with `value`.
    pub fn scroll_up(&self, lines: usize, value: u32) {
        let lines = lines.min(HEIGHT);
        let shift = lines * WIDTH;
        for i in 0..self.pixels.len() - shift {
            let moved = self.pixels[i + shift].load(Ordering::Relaxed);
            self.pixels[i].store(moved, Ordering::Relaxed);
        }
        for pixel in &self.pixels[self.pixels.len() - shift..] {
            pixel.store(value, Ordering::Relaxed);
        }
        self.touch();
    }

    /// Copies the current contents into `out`, replacing what it held.
    pub fn snapshot(&self, out: &mut Vec<u32>) {
        out.clear();
        out.extend(self.pixels.iter().map(|p| p.load(Ordering::Relaxed)));
    }

    /// Draws the glyph for `code` into text cell `(column, row)`.
    pub fn draw_glyph(&self, column: usize, row: usize, code: u16, attribute: u8) {
        let glyph = font::glyph(code);
        let fg = palette(attribute);
        let bg = palette(attribute >> 4);
        let left = column * GLYPH_WIDTH;
        let top = row * GLYPH_HEIGHT;
        for y in 0..GLYPH_HEIGHT {
            for x in 0..GLYPH_WIDTH {
                let value = if font::is_set(&glyph, x, y) { fg } else { bg };
                self.plot(left + x, top + y, value);
            }
        }
        self.touch();
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Text renderer
// ---------------------------------------------------------------------------

/// Cursor position and color of the text console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCursor {
    /// Column of the next glyph.
    pub column: usize,
    /// Row of the next glyph. May equal [`ROWS`] until the next draw
    /// scrolls the screen.
    pub row: usize,
    /// Foreground in the low nibble, background in the high nibble.
    pub attribute: u8,
}

impl TextCursor {
    /// Home position with the default attribute.
    pub const HOME: Self = Self {
        column: 0,
        row: 0,
        attribute: DEFAULT_ATTRIBUTE,
    };

    /// Background color of the current attribute.
    #[must_use]
    pub const fn background(&self) -> u32 {
        palette(self.attribute >> 4)
    }
}

impl Default for TextCursor {
    fn default() -> Self {
        Self::HOME
    }
}

const CARRIAGE_RETURN: u16 = 0x0d;
const LINE_FEED: u16 = 0x0a;

/// Renders a UCS-2 string at the cursor.
///
/// `\r` returns to column 0 and `\n` moves down one row. Everything else
/// draws a glyph and advances, wrapping at [`COLUMNS`]. The screen scrolls
/// by one text row whenever a glyph is about to be drawn below the last
/// row.
pub fn write(fb: &Framebuffer, cursor: &mut TextCursor, text: &[u16]) {
    for &code in text {
        match code {
            CARRIAGE_RETURN => cursor.column = 0,
            LINE_FEED => cursor.row += 1,
            _ => {
                while cursor.row >= ROWS {
                    fb.scroll_up(GLYPH_HEIGHT, cursor.background());
                    cursor.row -= 1;
                }
                fb.draw_glyph(cursor.column, cursor.row, code, cursor.attribute);
                cursor.column += 1;
                if cursor.column >= COLUMNS {
                    cursor.column = 0;
                    cursor.row += 1;
                }
            }
        }
    }
}

/// Clears the screen to the background color and homes the cursor.
pub fn clear(fb: &Framebuffer, cursor: &mut TextCursor) {
    fb.fill(cursor.background());
    cursor.column = 0;
    cursor.row = 0;
}

/// Reads back the text row `row` by matching each cell against the glyphs
/// of printable ASCII in `attribute`. Cells that match nothing read as
/// `\0`.
#[cfg(test)]
pub fn read_row(fb: &Framebuffer, row: usize, attribute: u8) -> String {
    let probe = Framebuffer::new();
    let candidates: Vec<(char, Vec<u32>)> = (0x20u8..0x7f)
        .map(|c| {
            probe.draw_glyph(0, 0, u16::from(c), attribute);
            (char::from(c), cell(&probe, 0, 0))
        })
        .collect();
    (0..COLUMNS)
        .map(|column| {
            let pixels = cell(fb, column, row);
            candidates
                .iter()
                .find(|(_, glyph)| *glyph == pixels)
                .map_or('\0', |(c, _)| *c)
        })
        .collect::<String>()
        .trim_end_matches(['\0', ' '])
        .to_owned()
}

#[cfg(test)]
fn cell(fb: &Framebuffer, column: usize, row: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(GLYPH_WIDTH * GLYPH_HEIGHT);
    for y in 0..GLYPH_HEIGHT {
        for x in 0..GLYPH_WIDTH {
            out.push(fb.pixel(column * GLYPH_WIDTH + x, row * GLYPH_HEIGHT + y));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ucs2(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn pixel_layout_is_red_first() {
        assert_eq!(rgb(0x11, 0x22, 0x33), 0x0033_2211);
        assert_eq!(components(palette(0x0c)), (0xff, 0x55, 0x55));
        assert_eq!(palette(0x07), rgb(0xaa, 0xaa, 0xaa));
    }

    #[test]
    fn text_lands_in_cells() {
        let fb = Framebuffer::new();
        let mut cursor = TextCursor::HOME;
        write(&fb, &mut cursor, &ucs2("Hi\r\nthere"));
        assert_eq!(read_row(&fb, 0, DEFAULT_ATTRIBUTE), "Hi");
        assert_eq!(read_row(&fb, 1, DEFAULT_ATTRIBUTE), "there");
        assert_eq!((cursor.column, cursor.row), (5, 1));
    }

    #[test]
    fn carriage_return_overwrites() {
        let fb = Framebuffer::new();
        let mut cursor = TextCursor::HOME;
        write(&fb, &mut cursor, &ucs2("abc\rX"));
        assert_eq!(read_row(&fb, 0, DEFAULT_ATTRIBUTE), "Xbc");
    }

    #[test]
    fn long_lines_wrap() {
        let fb = Framebuffer::new();
        let mut cursor = TextCursor::HOME;
        let line: String = std::iter::repeat_n('x', COLUMNS + 3).collect();
        write(&fb, &mut cursor, &ucs2(&line));
        assert_eq!(read_row(&fb, 1, DEFAULT_ATTRIBUTE), "xxx");
        assert_eq!((cursor.column, cursor.row), (3, 1));
    }

    #[test]
    fn scrolls_when_drawing_below_last_row() {
        let fb = Framebuffer::new();
        let mut cursor = TextCursor::HOME;
        for i in 0..ROWS {
            write(&fb, &mut cursor, &ucs2(&format!("line {i}\r\n")));
        }
        // The newline after the last row does not scroll on its own.
        assert_eq!(cursor.row, ROWS);
        assert_eq!(read_row(&fb, 0, DEFAULT_ATTRIBUTE), "line 0");

        write(&fb, &mut cursor, &ucs2("tail"));
        assert_eq!(cursor.row, ROWS - 1);
        assert_eq!(read_row(&fb, 0, DEFAULT_ATTRIBUTE), "line 1");
        assert_eq!(read_row(&fb, ROWS - 2, DEFAULT_ATTRIBUTE), format!("line {}", ROWS - 1));
        assert_eq!(read_row(&fb, ROWS - 1, DEFAULT_ATTRIBUTE), "tail");
    }

    #[test]
    fn attribute_selects_colors() {
        let fb = Framebuffer::new();
        let mut cursor = TextCursor {
            attribute: 0x1e,
            ..TextCursor::HOME
        };
        write(&fb, &mut cursor, &ucs2(" "));
        assert_eq!(fb.pixel(0, 0), palette(0x01));
        assert_eq!(read_row(&fb, 0, 0x1e), "");

        write(&fb, &mut cursor, &ucs2("A"));
        assert_eq!(read_row(&fb, 0, 0x1e), " A");
        assert_eq!(read_row(&fb, 0, DEFAULT_ATTRIBUTE), "");
    }

    #[test]
    fn clear_fills_background_and_homes() {
        let fb = Framebuffer::new();
        let mut cursor = TextCursor {
            column: 7,
            row: 3,
            attribute: 0x40,
        };
        clear(&fb, &mut cursor);
        assert_eq!((cursor.column, cursor.row), (0, 0));
        assert_eq!(fb.pixel(WIDTH - 1, HEIGHT - 1), palette(0x04));
    }

    #[test]
    fn host_drawing_bumps_generation() {
        let fb = Framebuffer::new();
        let before = fb.generation();
        fb.draw_glyph(0, 0, u16::from(b'a'), DEFAULT_ATTRIBUTE);
        assert!(fb.generation() > before);
    }
}
