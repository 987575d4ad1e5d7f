//! Simple Text Output protocol.

use crate::{EfiBoolean, EfiStatus};

/// `Reset`.
pub type TextResetFn = unsafe extern "efiapi" fn(
    this: *mut SimpleTextOutputProtocol,
    extended_verification: EfiBoolean,
) -> EfiStatus;
/// `OutputString` and `TestString`.
pub type TextStringFn =
    unsafe extern "efiapi" fn(this: *mut SimpleTextOutputProtocol, string: *const u16) -> EfiStatus;
/// `QueryMode`.
pub type TextQueryModeFn = unsafe extern "efiapi" fn(
    this: *mut SimpleTextOutputProtocol,
    mode_number: usize,
    columns: *mut usize,
    rows: *mut usize,
) -> EfiStatus;
/// `SetMode` and `SetAttribute`.
pub type TextSetValueFn =
    unsafe extern "efiapi" fn(this: *mut SimpleTextOutputProtocol, value: usize) -> EfiStatus;
/// `ClearScreen`.
pub type TextClearScreenFn =
    unsafe extern "efiapi" fn(this: *mut SimpleTextOutputProtocol) -> EfiStatus;
/// `SetCursorPosition`.
pub type TextSetCursorPositionFn = unsafe extern "efiapi" fn(
    this: *mut SimpleTextOutputProtocol,
    column: usize,
    row: usize,
) -> EfiStatus;
/// `EnableCursor`.
pub type TextEnableCursorFn =
    unsafe extern "efiapi" fn(this: *mut SimpleTextOutputProtocol, visible: EfiBoolean) -> EfiStatus;

/// `EFI_SIMPLE_TEXT_OUTPUT_PROTOCOL`.
#[repr(C)]
pub struct SimpleTextOutputProtocol {
    /// Resets the device.
    pub reset: TextResetFn,
    /// Writes a NUL-terminated UCS-2 string at the cursor.
    pub output_string: TextStringFn,
    /// Checks whether a string can be rendered.
    pub test_string: TextStringFn,
    /// Returns the geometry of a text mode.
    pub query_mode: TextQueryModeFn,
    /// Selects a text mode.
    pub set_mode: TextSetValueFn,
    /// Sets the colors used by later output.
    pub set_attribute: TextSetValueFn,
    /// Clears the screen to the background color and homes the cursor.
    pub clear_screen: TextClearScreenFn,
    /// Moves the cursor.
    pub set_cursor_position: TextSetCursorPositionFn,
    /// Shows or hides the cursor.
    pub enable_cursor: TextEnableCursorFn,
    /// Current mode state.
    pub mode: *mut SimpleTextOutputMode,
}

/// `SIMPLE_TEXT_OUTPUT_MODE`, mirrored from the console state after each call.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimpleTextOutputMode {
    /// Number of supported modes.
    pub max_mode: i32,
    /// Current mode.
    pub mode: i32,
    /// Current attribute.
    pub attribute: i32,
    /// Cursor column.
    pub cursor_column: i32,
    /// Cursor row.
    pub cursor_row: i32,
    /// Cursor visibility.
    pub cursor_visible: EfiBoolean,
}

/// Text attribute colors.
pub mod color {
    /// Black.
    pub const BLACK: usize = 0x00;
    /// Blue.
    pub const BLUE: usize = 0x01;
    /// Green.
    pub const GREEN: usize = 0x02;
    /// Cyan.
    pub const CYAN: usize = 0x03;
    /// Red.
    pub const RED: usize = 0x04;
    /// Magenta.
    pub const MAGENTA: usize = 0x05;
    /// Brown.
    pub const BROWN: usize = 0x06;
    /// Light gray.
    pub const LIGHT_GRAY: usize = 0x07;
    /// Dark gray.
    pub const DARK_GRAY: usize = 0x08;
    /// Light blue.
    pub const LIGHT_BLUE: usize = 0x09;
    /// Light green.
    pub const LIGHT_GREEN: usize = 0x0a;
    /// Light cyan.
    pub const LIGHT_CYAN: usize = 0x0b;
    /// Light red.
    pub const LIGHT_RED: usize = 0x0c;
    /// Light magenta.
    pub const LIGHT_MAGENTA: usize = 0x0d;
    /// Yellow.
    pub const YELLOW: usize = 0x0e;
    /// White.
    pub const WHITE: usize = 0x0f;

    /// Packs a foreground and background color into an attribute.
    #[must_use]
    pub const fn attribute(foreground: usize, background: usize) -> usize {
        ((background & 0x07) << 4) | (foreground & 0x0f)
    }

    /// Foreground color of an attribute.
    #[must_use]
    pub const fn foreground(attribute: usize) -> usize {
        attribute & 0x0f
    }

    /// Background color of an attribute.
    #[must_use]
    pub const fn background(attribute: usize) -> usize {
        (attribute >> 4) & 0x07
    }
}

const _: () = {
    assert!(core::mem::size_of::<SimpleTextOutputProtocol>() == 80);
    assert!(core::mem::size_of::<SimpleTextOutputMode>() == 24);
};
