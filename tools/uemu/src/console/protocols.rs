//! Simple Text Input, Simple Text Output and Graphics Output on top of the
//! console.
//!
//! The protocol structures live at fixed addresses for as long as the
//! firmware does. Every entry point checks its `this` argument against
//! those addresses before touching anything, so a guest passing a stale or
//! foreign pointer gets `INVALID_PARAMETER` back.

use core::ffi::c_void;

use uefi::protocol::gop::{
    GraphicsOutputMode, GraphicsOutputModeInformation, GraphicsOutputProtocol, PixelBitmask, pixel_format,
};
use uefi::protocol::simple_text::{SimpleTextOutputMode, SimpleTextOutputProtocol};
use uefi::protocol::simple_text_input::{InputKey, SimpleTextInputProtocol};
use uefi::{EfiBoolean, EfiStatus};

use super::ConsoleHandle;
use super::screen::{COLUMNS, DEFAULT_ATTRIBUTE, HEIGHT, ROWS, WIDTH, palette};
use crate::firmware::{self, Exposed, KEY_EVENT, ucs2};

/// The only text mode.
const TEXT_MODE: usize = 0;
/// The only graphics mode.
const GRAPHICS_MODE: u32 = 0;

/// The console protocol instances and the console they drive.
pub struct ConsoleProtocols {
    console: ConsoleHandle,
    text_in: Exposed<SimpleTextInputProtocol>,
    text_out: Exposed<SimpleTextOutputProtocol>,
    text_mode: Exposed<SimpleTextOutputMode>,
    gop: Exposed<GraphicsOutputProtocol>,
    gop_mode: Exposed<GraphicsOutputMode>,
    gop_info: Exposed<GraphicsOutputModeInformation>,
}

impl ConsoleProtocols {
    /// Builds the protocol structures for `console`.
    #[must_use]
    pub fn new(console: ConsoleHandle) -> Self {
        let text_in = Exposed::new(SimpleTextInputProtocol {
            reset: input_reset,
            read_key_stroke,
            wait_for_key: KEY_EVENT,
        });

        let text_mode = Exposed::new(SimpleTextOutputMode {
            max_mode: 1,
            mode: 0,
            attribute: i32::from(DEFAULT_ATTRIBUTE),
            cursor_column: 0,
            cursor_row: 0,
            cursor_visible: 0,
        });
        let text_out = Exposed::new(SimpleTextOutputProtocol {
            reset: output_reset,
            output_string,
            test_string,
            query_mode: text_query_mode,
            set_mode: text_set_mode,
            set_attribute,
            clear_screen,
            set_cursor_position,
            enable_cursor,
            mode: text_mode.as_ptr(),
        });

        let framebuffer = console.framebuffer();
        let gop_info = Exposed::new(mode_information());
        let gop_mode = Exposed::new(GraphicsOutputMode {
            max_mode: 1,
            mode: GRAPHICS_MODE,
            info: gop_info.as_ptr(),
            size_of_info: size_of::<GraphicsOutputModeInformation>(),
            frame_buffer_base: framebuffer.base().expose_provenance() as u64,
            frame_buffer_size: framebuffer.size_in_bytes(),
        });
        let gop = Exposed::new(GraphicsOutputProtocol {
            query_mode: gop_query_mode,
            set_mode: gop_set_mode,
            blt,
            mode: gop_mode.as_ptr(),
        });

        Self {
            console,
            text_in,
            text_out,
            text_mode,
            gop,
            gop_mode,
            gop_info,
        }
    }

    /// The console these protocols drive.
    #[must_use]
    pub fn console(&self) -> &ConsoleHandle {
        &self.console
    }

    /// Interface installed for Simple Text Input.
    #[must_use]
    pub fn text_input(&self) -> *mut SimpleTextInputProtocol {
        self.text_in.as_ptr()
    }

    /// Interface installed for Simple Text Output, shared by `ConOut` and
    /// `StdErr`.
    #[must_use]
    pub fn text_output(&self) -> *mut SimpleTextOutputProtocol {
        self.text_out.as_ptr()
    }

    /// Interface installed for Graphics Output.
    #[must_use]
    pub fn graphics_output(&self) -> *mut GraphicsOutputProtocol {
        self.gop.as_ptr()
    }

    fn check_input(&self, this: *mut SimpleTextInputProtocol) -> Result<&ConsoleHandle, EfiStatus> {
        if self.text_in.is(this) { Ok(&self.console) } else { Err(EfiStatus::INVALID_PARAMETER) }
    }

    fn check_output(&self, this: *mut SimpleTextOutputProtocol) -> Result<&ConsoleHandle, EfiStatus> {
        if self.text_out.is(this) { Ok(&self.console) } else { Err(EfiStatus::INVALID_PARAMETER) }
    }

    fn check_graphics(&self, this: *mut GraphicsOutputProtocol) -> Result<&ConsoleHandle, EfiStatus> {
        if self.gop.is(this) { Ok(&self.console) } else { Err(EfiStatus::INVALID_PARAMETER) }
    }

    /// Mirrors cursor and attribute into the guest-visible mode structure.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn sync_mode(&mut self) {
        let cursor = self.console.cursor();
        let mode = self.text_mode.get_mut();
        mode.attribute = i32::from(cursor.attribute);
        // A pending scroll leaves the cursor one row past the bottom.
        mode.cursor_row = cursor.row.min(ROWS - 1) as i32;
        mode.cursor_column = cursor.column as i32;
    }
}

#[expect(clippy::cast_possible_truncation, reason = "screen dimensions are small constants")]
fn mode_information() -> GraphicsOutputModeInformation {
    GraphicsOutputModeInformation {
        version: 0,
        horizontal_resolution: WIDTH as u32,
        vertical_resolution: HEIGHT as u32,
        pixel_format: pixel_format::RGB_RESERVED_8BIT,
        pixel_information: PixelBitmask::default(),
        pixels_per_scan_line: WIDTH as u32,
    }
}

// ---------------------------------------------------------------------------
// Simple Text Input
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn input_reset(
    this: *mut SimpleTextInputProtocol,
    _extended_verification: EfiBoolean,
) -> EfiStatus {
    firmware::service("ConIn.Reset", |fw| {
        fw.console.check_input(this)?.reset_input();
        Ok(())
    })
}

unsafe extern "efiapi" fn read_key_stroke(this: *mut SimpleTextInputProtocol, key: *mut InputKey) -> EfiStatus {
    firmware::service("ConIn.ReadKeyStroke", |fw| {
        let console = fw.console.check_input(this)?;
        if key.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let next = console.read_key().ok_or(EfiStatus::NOT_READY)?;
        // SAFETY: checked non-null; the guest owns the buffer.
        unsafe { key.write_unaligned(next) };
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Simple Text Output
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn output_reset(
    this: *mut SimpleTextOutputProtocol,
    _extended_verification: EfiBoolean,
) -> EfiStatus {
    firmware::service("ConOut.Reset", |fw| {
        fw.console.check_output(this)?.reset_output();
        fw.console.sync_mode();
        Ok(())
    })
}

unsafe extern "efiapi" fn output_string(this: *mut SimpleTextOutputProtocol, string: *const u16) -> EfiStatus {
    firmware::service("ConOut.OutputString", |fw| {
        let console = fw.console.check_output(this)?;
        // SAFETY: the guest passes a NUL-terminated string.
        let text = unsafe { ucs2::from_ptr(string) }.ok_or(EfiStatus::INVALID_PARAMETER)?;
        console.output(text);
        fw.console.sync_mode();
        Ok(())
    })
}

unsafe extern "efiapi" fn test_string(this: *mut SimpleTextOutputProtocol, string: *const u16) -> EfiStatus {
    firmware::service("ConOut.TestString", |fw| {
        fw.console.check_output(this)?;
        // SAFETY: the guest passes a NUL-terminated string.
        unsafe { ucs2::from_ptr(string) }.ok_or(EfiStatus::INVALID_PARAMETER)?;
        Ok(())
    })
}

unsafe extern "efiapi" fn text_query_mode(
    this: *mut SimpleTextOutputProtocol,
    mode_number: usize,
    columns: *mut usize,
    rows: *mut usize,
) -> EfiStatus {
    firmware::service("ConOut.QueryMode", |fw| {
        fw.console.check_output(this)?;
        if columns.is_null() || rows.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        if mode_number != TEXT_MODE {
            return Err(EfiStatus::UNSUPPORTED);
        }
        // SAFETY: both checked non-null.
        unsafe {
            columns.write_unaligned(COLUMNS);
            rows.write_unaligned(ROWS);
        }
        Ok(())
    })
}

unsafe extern "efiapi" fn text_set_mode(this: *mut SimpleTextOutputProtocol, mode_number: usize) -> EfiStatus {
    firmware::service("ConOut.SetMode", |fw| {
        let console = fw.console.check_output(this)?;
        if mode_number != TEXT_MODE {
            return Err(EfiStatus::UNSUPPORTED);
        }
        console.clear();
        fw.console.sync_mode();
        Ok(())
    })
}

unsafe extern "efiapi" fn set_attribute(this: *mut SimpleTextOutputProtocol, attribute: usize) -> EfiStatus {
    firmware::service("ConOut.SetAttribute", |fw| {
        let console = fw.console.check_output(this)?;
        let attribute = u8::try_from(attribute)
            .ok()
            .filter(|a| a & 0x80 == 0)
            .ok_or(EfiStatus::UNSUPPORTED)?;
        console.set_attribute(attribute);
        fw.console.sync_mode();
        Ok(())
    })
}

unsafe extern "efiapi" fn clear_screen(this: *mut SimpleTextOutputProtocol) -> EfiStatus {
    firmware::service("ConOut.ClearScreen", |fw| {
        fw.console.check_output(this)?.clear();
        fw.console.sync_mode();
        Ok(())
    })
}

unsafe extern "efiapi" fn set_cursor_position(
    this: *mut SimpleTextOutputProtocol,
    column: usize,
    row: usize,
) -> EfiStatus {
    firmware::service("ConOut.SetCursorPosition", |fw| {
        if !fw.console.check_output(this)?.set_cursor(column, row) {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        fw.console.sync_mode();
        Ok(())
    })
}

unsafe extern "efiapi" fn enable_cursor(this: *mut SimpleTextOutputProtocol, _visible: EfiBoolean) -> EfiStatus {
    firmware::service("ConOut.EnableCursor", |fw| {
        fw.console.check_output(this)?;
        Err(EfiStatus::UNSUPPORTED)
    })
}

// ---------------------------------------------------------------------------
// Graphics Output
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn gop_query_mode(
    this: *mut GraphicsOutputProtocol,
    mode_number: u32,
    size_of_info: *mut usize,
    info: *mut *mut GraphicsOutputModeInformation,
) -> EfiStatus {
    firmware::service("Gop.QueryMode", |fw| {
        fw.console.check_graphics(this)?;
        if mode_number != GRAPHICS_MODE || size_of_info.is_null() || info.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        // The caller frees the copy with FreePool.
        let copy = fw.pool.allocate_copy(&[*fw.console.gop_info.get()])?;
        // SAFETY: both checked non-null.
        unsafe {
            size_of_info.write_unaligned(size_of::<GraphicsOutputModeInformation>());
            info.write_unaligned(copy.as_ptr());
        }
        Ok(())
    })
}

unsafe extern "efiapi" fn gop_set_mode(this: *mut GraphicsOutputProtocol, mode_number: u32) -> EfiStatus {
    firmware::service("Gop.SetMode", |fw| {
        let console = fw.console.check_graphics(this)?;
        if mode_number != GRAPHICS_MODE {
            return Err(EfiStatus::UNSUPPORTED);
        }
        console.framebuffer().fill(palette(0));
        fw.console.gop_mode.get_mut().mode = GRAPHICS_MODE;
        Ok(())
    })
}

#[expect(clippy::too_many_arguments, reason = "firmware calling convention")]
unsafe extern "efiapi" fn blt(
    this: *mut GraphicsOutputProtocol,
    _blt_buffer: *mut c_void,
    _blt_operation: u32,
    _source_x: usize,
    _source_y: usize,
    _destination_x: usize,
    _destination_y: usize,
    _width: usize,
    _height: usize,
    _delta: usize,
) -> EfiStatus {
    if firmware::with(|fw| fw.console.check_graphics(this).is_err()).unwrap_or(true) {
        return EfiStatus::INVALID_PARAMETER;
    }
    firmware::report_unsupported("Gop.Blt")
}
