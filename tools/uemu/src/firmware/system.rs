//! The System Table and the service tables it points to.

use std::ptr;

use uefi::table::{
    BOOT_SERVICES_SIGNATURE, BootServices, RUNTIME_SERVICES_SIGNATURE, RuntimeServices, SYSTEM_TABLE_SIGNATURE,
    SystemTable, TableHeader,
};
use uefi::{EfiHandle, SPECIFICATION_REVISION};

use super::{Exposed, boot, runtime, ucs2};
use crate::console::protocols::ConsoleProtocols;

/// Shown to the guest as the firmware vendor.
pub const FIRMWARE_VENDOR: &str = "uemu user-mode emulator";

/// Reported as the firmware revision: major version in the high half.
pub const FIRMWARE_REVISION: u32 = 0x0001_0000;

/// A table that starts with a [`TableHeader`].
///
/// # Safety
///
/// Implementors must be `repr(C)` with no padding bytes, since the checksum
/// reads every byte of the table.
unsafe trait Table: Sized {
    const SIGNATURE: u64;

    fn header(&mut self) -> &mut TableHeader;
}

// SAFETY: all three are padding-free `repr(C)` tables, checked by the
// layout assertions in the `uefi` crate.
unsafe impl Table for SystemTable {
    const SIGNATURE: u64 = SYSTEM_TABLE_SIGNATURE;

    fn header(&mut self) -> &mut TableHeader {
        &mut self.header
    }
}

// SAFETY: as above.
unsafe impl Table for BootServices {
    const SIGNATURE: u64 = BOOT_SERVICES_SIGNATURE;

    fn header(&mut self) -> &mut TableHeader {
        &mut self.header
    }
}

// SAFETY: as above.
unsafe impl Table for RuntimeServices {
    const SIGNATURE: u64 = RUNTIME_SERVICES_SIGNATURE;

    fn header(&mut self) -> &mut TableHeader {
        &mut self.header
    }
}

/// CRC32 of every byte of `table`, header included as it currently is.
fn table_crc32<T: Table>(table: &T) -> u32 {
    // SAFETY: `Table` guarantees every byte is initialized.
    let bytes = unsafe { std::slice::from_raw_parts(ptr::from_ref(table).cast::<u8>(), size_of::<T>()) };
    crc32fast::hash(bytes)
}

/// Fills in the header and its checksum.
#[expect(clippy::cast_possible_truncation, reason = "tables are a few hundred bytes")]
fn seal<T: Table>(table: &mut T) {
    *table.header() = TableHeader {
        signature: T::SIGNATURE,
        revision: SPECIFICATION_REVISION,
        header_size: size_of::<T>() as u32,
        crc32: 0,
        reserved: 0,
    };
    let crc = table_crc32(table);
    table.header().crc32 = crc;
}

/// The System Table with its Boot and Runtime Services.
pub struct SystemTables {
    _vendor: Box<[u16]>,
    system: Exposed<SystemTable>,
    _boot: Exposed<BootServices>,
    _runtime: Exposed<RuntimeServices>,
}

impl SystemTables {
    /// Builds the tables with the console bound to `ConIn`, `ConOut` and
    /// `StdErr`.
    #[must_use]
    pub fn new(console_handle: EfiHandle, console: &ConsoleProtocols) -> Self {
        let vendor: Box<[u16]> = ucs2::encode(FIRMWARE_VENDOR).into_boxed_slice();

        let mut boot = Exposed::new(boot::table());
        seal(boot.get_mut());
        let mut runtime = Exposed::new(runtime::table());
        seal(runtime.get_mut());

        let mut system = Exposed::new(SystemTable {
            header: TableHeader::default(),
            firmware_vendor: vendor.as_ptr(),
            firmware_revision: FIRMWARE_REVISION,
            pad: 0,
            console_in_handle: console_handle,
            con_in: console.text_input(),
            console_out_handle: console_handle,
            con_out: console.text_output(),
            standard_error_handle: console_handle,
            std_err: console.text_output(),
            runtime_services: runtime.as_ptr(),
            boot_services: boot.as_ptr(),
            number_of_table_entries: 0,
            configuration_table: ptr::null_mut(),
        });
        seal(system.get_mut());

        Self {
            _vendor: vendor,
            system,
            _boot: boot,
            _runtime: runtime,
        }
    }

    /// The table handed to the entry point.
    #[must_use]
    pub fn system_table(&self) -> *mut SystemTable {
        self.system.as_ptr()
    }
}
