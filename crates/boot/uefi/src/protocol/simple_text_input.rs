//! Simple Text Input protocol.

use crate::{EfiBoolean, EfiEvent, EfiStatus};

/// `Reset`.
pub type InputResetFn = unsafe extern "efiapi" fn(
    this: *mut SimpleTextInputProtocol,
    extended_verification: EfiBoolean,
) -> EfiStatus;
/// `ReadKeyStroke`.
pub type ReadKeyStrokeFn =
    unsafe extern "efiapi" fn(this: *mut SimpleTextInputProtocol, key: *mut InputKey) -> EfiStatus;

/// `EFI_SIMPLE_TEXT_INPUT_PROTOCOL`.
#[repr(C)]
pub struct SimpleTextInputProtocol {
    /// Resets the device and discards pending keys.
    pub reset: InputResetFn,
    /// Pops the next keystroke, or returns `NOT_READY`.
    pub read_key_stroke: ReadKeyStrokeFn,
    /// Event signaled while a keystroke is pending.
    pub wait_for_key: EfiEvent,
}

/// A keystroke: either a scan code or a UCS-2 character, the other being zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputKey {
    /// One of the [`scan_code`] values.
    pub scan_code: u16,
    /// The character typed.
    pub unicode_char: u16,
}

impl InputKey {
    /// A key reported by scan code.
    #[must_use]
    pub const fn scan(scan_code: u16) -> Self {
        Self {
            scan_code,
            unicode_char: 0,
        }
    }

    /// A key reported as a character.
    #[must_use]
    pub const fn char(unicode_char: u16) -> Self {
        Self {
            scan_code: scan_code::NULL,
            unicode_char,
        }
    }
}

/// Scan codes for keys without a character.
pub mod scan_code {
    /// No scan code; the key is a character.
    pub const NULL: u16 = 0x00;
    /// Cursor up.
    pub const UP: u16 = 0x01;
    /// Cursor down.
    pub const DOWN: u16 = 0x02;
    /// Cursor right.
    pub const RIGHT: u16 = 0x03;
    /// Cursor left.
    pub const LEFT: u16 = 0x04;
    /// Home.
    pub const HOME: u16 = 0x05;
    /// End.
    pub const END: u16 = 0x06;
    /// Insert.
    pub const INSERT: u16 = 0x07;
    /// Delete.
    pub const DELETE: u16 = 0x08;
    /// Page up.
    pub const PAGE_UP: u16 = 0x09;
    /// Page down.
    pub const PAGE_DOWN: u16 = 0x0a;
    /// F1; F2 through F10 follow consecutively.
    pub const F1: u16 = 0x0b;
    /// F10.
    pub const F10: u16 = 0x14;
    /// F11.
    pub const F11: u16 = 0x15;
    /// F12.
    pub const F12: u16 = 0x16;
    /// Escape.
    pub const ESC: u16 = 0x17;
}

/// Control characters delivered as `unicode_char`.
pub mod chars {
    /// Backspace.
    pub const BACKSPACE: u16 = 0x08;
    /// Horizontal tab.
    pub const TAB: u16 = 0x09;
    /// Line feed.
    pub const LINEFEED: u16 = 0x0a;
    /// Carriage return.
    pub const CARRIAGE_RETURN: u16 = 0x0d;
}

const _: () = {
    assert!(core::mem::size_of::<SimpleTextInputProtocol>() == 24);
    assert!(core::mem::size_of::<InputKey>() == 4);
};
