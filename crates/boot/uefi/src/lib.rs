//! UEFI ABI types for the user-mode emulator.
//!
//! The structures in this crate mirror the memory layout a UEFI application
//! expects to find behind the pointers it is handed at entry: the System
//! Table, the Boot and Runtime Services tables and the console protocols.
//! Every structure carries compile-time size and offset checks, because a
//! guest binary calls through these tables by fixed offset.
//!
//! The emulator is the *provider* of these tables, so function pointer
//! signatures receive enum-like arguments as raw integers: the caller is
//! untrusted guest code and an out-of-range value must be rejected with a
//! status code, never materialized as an invalid Rust enum.
//!
//! - [`status`]: status codes
//! - [`guid`]: GUID type and the protocol/vendor identifiers in use
//! - [`memory`]: memory types accepted by the pool allocator
//! - [`table`]: System Table, Boot Services, Runtime Services
//! - [`protocol`]: Simple Text In/Out, Graphics Output, Loaded Image
//! - [`variable`]: variable attribute flags

#![no_std]

pub mod guid;
pub mod memory;
pub mod protocol;
pub mod status;
pub mod table;
pub mod variable;

use core::ffi::c_void;

pub use guid::EfiGuid;
pub use status::EfiStatus;

/// An opaque handle to a UEFI object.
pub type EfiHandle = *mut c_void;

/// An opaque handle to a UEFI event.
pub type EfiEvent = *mut c_void;

/// A physical address.
pub type EfiPhysicalAddress = u64;

/// A task priority level.
pub type EfiTpl = usize;

/// UEFI `BOOLEAN`, passed as a byte. Any non-zero value is true.
pub type EfiBoolean = u8;

/// Revision 2.70, reported in the System Table header.
pub const SPECIFICATION_REVISION: u32 = (2 << 16) | 70;
