//! Graphics Output protocol.

use core::ffi::c_void;

use crate::{EfiPhysicalAddress, EfiStatus};

/// `QueryMode`.
pub type GopQueryModeFn = unsafe extern "efiapi" fn(
    this: *mut GraphicsOutputProtocol,
    mode_number: u32,
    size_of_info: *mut usize,
    info: *mut *mut GraphicsOutputModeInformation,
) -> EfiStatus;
/// `SetMode`.
pub type GopSetModeFn =
    unsafe extern "efiapi" fn(this: *mut GraphicsOutputProtocol, mode_number: u32) -> EfiStatus;
/// `Blt`.
pub type GopBltFn = unsafe extern "efiapi" fn(
    this: *mut GraphicsOutputProtocol,
    blt_buffer: *mut c_void,
    blt_operation: u32,
    source_x: usize,
    source_y: usize,
    destination_x: usize,
    destination_y: usize,
    width: usize,
    height: usize,
    delta: usize,
) -> EfiStatus;

/// `EFI_GRAPHICS_OUTPUT_PROTOCOL`.
#[repr(C)]
pub struct GraphicsOutputProtocol {
    /// Describes a mode.
    pub query_mode: GopQueryModeFn,
    /// Selects a mode.
    pub set_mode: GopSetModeFn,
    /// Block transfer.
    pub blt: GopBltFn,
    /// Current mode.
    pub mode: *mut GraphicsOutputMode,
}

/// `EFI_GRAPHICS_OUTPUT_PROTOCOL_MODE`.
#[repr(C)]
#[derive(Debug)]
pub struct GraphicsOutputMode {
    /// Number of modes.
    pub max_mode: u32,
    /// Current mode.
    pub mode: u32,
    /// Description of the current mode.
    pub info: *mut GraphicsOutputModeInformation,
    /// Size of `*info`.
    pub size_of_info: usize,
    /// Base of the linear framebuffer.
    pub frame_buffer_base: EfiPhysicalAddress,
    /// Size of the framebuffer in bytes.
    pub frame_buffer_size: usize,
}

/// `EFI_GRAPHICS_OUTPUT_MODE_INFORMATION`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsOutputModeInformation {
    /// Structure version, 0.
    pub version: u32,
    /// Width in pixels.
    pub horizontal_resolution: u32,
    /// Height in pixels.
    pub vertical_resolution: u32,
    /// One of the [`pixel_format`] values.
    pub pixel_format: u32,
    /// Channel masks, meaningful for [`pixel_format::BIT_MASK`].
    pub pixel_information: PixelBitmask,
    /// Pixels per framebuffer row.
    pub pixels_per_scan_line: u32,
}

/// Channel masks of a pixel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelBitmask {
    /// Red channel.
    pub red_mask: u32,
    /// Green channel.
    pub green_mask: u32,
    /// Blue channel.
    pub blue_mask: u32,
    /// Reserved channel.
    pub reserved_mask: u32,
}

/// `EFI_GRAPHICS_PIXEL_FORMAT` values.
pub mod pixel_format {
    /// Byte 0 red, byte 1 green, byte 2 blue, byte 3 reserved.
    pub const RGB_RESERVED_8BIT: u32 = 0;
    /// Byte 0 blue, byte 1 green, byte 2 red, byte 3 reserved.
    pub const BGR_RESERVED_8BIT: u32 = 1;
    /// Layout given by the pixel bitmask.
    pub const BIT_MASK: u32 = 2;
    /// No linear framebuffer.
    pub const BLT_ONLY: u32 = 3;
}

const _: () = {
    assert!(core::mem::size_of::<GraphicsOutputProtocol>() == 32);
    assert!(core::mem::size_of::<GraphicsOutputMode>() == 40);
    assert!(core::mem::size_of::<GraphicsOutputModeInformation>() == 36);
};
