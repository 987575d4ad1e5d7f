//! Loaded Image protocol.

use core::ffi::c_void;

use crate::table::SystemTable;
use crate::{EfiHandle, EfiStatus};

/// Revision stored in [`LoadedImageProtocol::revision`].
pub const LOADED_IMAGE_PROTOCOL_REVISION: u32 = 0x1000;

/// `Unload` callback.
pub type UnloadFn = unsafe extern "efiapi" fn(image_handle: EfiHandle) -> EfiStatus;

/// `EFI_LOADED_IMAGE_PROTOCOL`, installed on the image handle.
#[repr(C)]
#[derive(Debug)]
pub struct LoadedImageProtocol {
    /// Protocol revision.
    pub revision: u32,
    /// Handle of the image that loaded this one.
    pub parent_handle: EfiHandle,
    /// System table handed to the image.
    pub system_table: *mut SystemTable,
    /// Device the image was loaded from.
    pub device_handle: EfiHandle,
    /// File path of the image on the device.
    pub file_path: *mut c_void,
    /// Reserved.
    pub reserved: *mut c_void,
    /// Size of the load options.
    pub load_options_size: u32,
    /// Load options.
    pub load_options: *mut c_void,
    /// Base of the mapped image.
    pub image_base: *mut c_void,
    /// Size of the mapped image.
    pub image_size: u64,
    /// Memory type of the code sections.
    pub image_code_type: u32,
    /// Memory type of the data sections.
    pub image_data_type: u32,
    /// Unload callback, if any.
    pub unload: Option<UnloadFn>,
}

const _: () = {
    assert!(core::mem::size_of::<LoadedImageProtocol>() == 96);
    assert!(core::mem::offset_of!(LoadedImageProtocol, image_base) == 64);
};
