//! The emulated firmware: the object graph behind the System Table.
//!
//! A [`Firmware`] owns every structure the guest is handed a pointer to,
//! plus the handle database, variables and pool allocations those pointers
//! lead to. The guest calls back in through `extern "efiapi"` shims that
//! carry no context argument, so the firmware is installed in a
//! thread-local on the image thread and each shim borrows it for the
//! duration of one call with [`with`] or [`service`].
//!
//! The borrow is never held while guest code runs or while the image thread
//! sleeps, so a service that waits does so between borrows.

pub mod boot;
pub mod handles;
pub mod pool;
pub mod runtime;
pub mod system;
pub mod ucs2;
pub mod variables;

use core::ffi::c_void;
use std::cell::RefCell;
use std::collections::HashSet;
use std::ptr::{self, NonNull};
use std::sync::mpsc::Sender;
use std::thread;

use uefi::memory::EfiMemoryType;
use uefi::protocol::loaded_image::{LOADED_IMAGE_PROTOCOL_REVISION, LoadedImageProtocol};
use uefi::table::{SystemTable, tpl};
use uefi::{EfiEvent, EfiGuid, EfiStatus, EfiTpl};

use crate::console::ConsoleHandle;
use crate::console::protocols::ConsoleProtocols;
use crate::emulator::Outcome;

use self::handles::{Handle, HandleDatabase};
use self::pool::PoolAllocator;
use self::system::SystemTables;
use self::variables::VariableStore;

/// The console's `WaitForKey` event. Events are opaque tokens; this is the
/// only one the firmware knows.
pub const KEY_EVENT: EfiEvent = ptr::without_provenance_mut(1);

/// A heap value at a fixed address that the guest may read and write.
///
/// Rust code reaches the value only through this wrapper, so guest writes
/// through the raw pointer never alias a live reference for longer than a
/// single service call.
pub struct Exposed<T> {
    ptr: NonNull<T>,
}

impl<T> Exposed<T> {
    /// Moves `value` to the heap.
    pub fn new(value: T) -> Self {
        Self {
            ptr: NonNull::from(Box::leak(Box::new(value))),
        }
    }

    /// The address handed to the guest.
    #[must_use]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Returns `true` if `ptr` is this value's address.
    #[must_use]
    pub fn is(&self, ptr: *const T) -> bool {
        ptr::eq(self.ptr.as_ptr(), ptr)
    }

    /// Borrows the value.
    #[must_use]
    pub fn get(&self) -> &T {
        // SAFETY: the pointer came from `Box::leak` and is freed only on drop.
        unsafe { self.ptr.as_ref() }
    }

    /// Mutably borrows the value.
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: as for `get`; `&mut self` rules out other Rust borrows.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for Exposed<T> {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `Box::leak` and is dropped once.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}

/// The mapped guest image, as described by its Loaded Image protocol.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    /// Address of the first byte of the image.
    pub base: *mut c_void,
    /// Size of the mapping in bytes.
    pub size: usize,
}

/// Everything the guest can reach through its System Table.
pub struct Firmware {
    pub(crate) handles: HandleDatabase,
    pub(crate) variables: VariableStore,
    pub(crate) pool: PoolAllocator,
    pub(crate) console: ConsoleProtocols,
    tables: SystemTables,
    image_handle: Handle,
    console_handle: Handle,
    _loaded_image: Exposed<LoadedImageProtocol>,
    exit: Sender<Outcome>,
    pub(crate) tpl: EfiTpl,
    pub(crate) monotonic_count: u64,
}

impl Firmware {
    /// Builds the System Table and the handles behind it.
    ///
    /// The console handle carries Simple Text Input, Simple Text Output and
    /// Graphics Output; the image handle carries Loaded Image. `exit`
    /// receives the guest's outcome when it calls `Exit` or `ResetSystem`.
    ///
    /// # Errors
    ///
    /// Returns the status of the first protocol installation that fails.
    pub fn new(
        image: ImageInfo,
        console: ConsoleHandle,
        variables: VariableStore,
        exit: Sender<Outcome>,
    ) -> Result<Self, EfiStatus> {
        let console = ConsoleProtocols::new(console);
        let mut handles = HandleDatabase::new();

        let console_handle = handles.install(
            None,
            EfiGuid::SIMPLE_TEXT_INPUT_PROTOCOL,
            console.text_input().cast(),
        )?;
        handles.install(
            Some(console_handle),
            EfiGuid::SIMPLE_TEXT_OUTPUT_PROTOCOL,
            console.text_output().cast(),
        )?;
        handles.install(
            Some(console_handle),
            EfiGuid::GRAPHICS_OUTPUT_PROTOCOL,
            console.graphics_output().cast(),
        )?;

        let tables = SystemTables::new(console_handle.as_raw(), &console);

        let image_handle = handles.create_handle();
        let loaded_image = Exposed::new(LoadedImageProtocol {
            revision: LOADED_IMAGE_PROTOCOL_REVISION,
            parent_handle: ptr::null_mut(),
            system_table: tables.system_table(),
            device_handle: ptr::null_mut(),
            file_path: ptr::null_mut(),
            reserved: ptr::null_mut(),
            load_options_size: 0,
            load_options: ptr::null_mut(),
            image_base: image.base,
            image_size: image.size as u64,
            image_code_type: EfiMemoryType::LoaderCode as u32,
            image_data_type: EfiMemoryType::LoaderData as u32,
            unload: None,
        });
        handles.install(
            Some(image_handle),
            EfiGuid::LOADED_IMAGE_PROTOCOL,
            loaded_image.as_ptr().cast(),
        )?;

        log::debug!(
            "firmware ready: {} handles, {} variables",
            handles.len(),
            variables.len()
        );

        Ok(Self {
            handles,
            variables,
            pool: PoolAllocator::new(),
            console,
            tables,
            image_handle,
            console_handle,
            _loaded_image: loaded_image,
            exit,
            tpl: tpl::APPLICATION,
            monotonic_count: 0,
        })
    }

    /// The table handed to the entry point.
    #[must_use]
    pub fn system_table(&self) -> *mut SystemTable {
        self.tables.system_table()
    }

    /// The handle handed to the entry point.
    #[must_use]
    pub fn image_handle(&self) -> Handle {
        self.image_handle
    }

    /// The handle carrying the console protocols.
    #[must_use]
    pub fn console_handle(&self) -> Handle {
        self.console_handle
    }

    /// A sender for reporting how the guest finished.
    #[must_use]
    pub fn exit_sender(&self) -> Sender<Outcome> {
        self.exit.clone()
    }
}

thread_local! {
    static FIRMWARE: RefCell<Option<Firmware>> = const { RefCell::new(None) };
    static REPORTED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// Makes `firmware` the current thread's firmware and returns its System
/// Table.
///
/// Any previously installed firmware is dropped.
pub fn install(firmware: Firmware) -> *mut SystemTable {
    let table = firmware.system_table();
    let previous = FIRMWARE.with(|cell| cell.replace(Some(firmware)));
    drop(previous);
    table
}

/// Removes and returns the current thread's firmware.
pub fn uninstall() -> Option<Firmware> {
    FIRMWARE.with(RefCell::take)
}

/// Runs `f` on the current thread's firmware.
///
/// Returns `None` if no firmware is installed or it is already borrowed
/// further up the stack.
pub fn with<R>(f: impl FnOnce(&mut Firmware) -> R) -> Option<R> {
    FIRMWARE.with(|cell| {
        let mut guard = cell.try_borrow_mut().ok()?;
        guard.as_mut().map(f)
    })
}

/// Runs the body of service `name` and collapses the result to a status.
pub fn service(name: &'static str, f: impl FnOnce(&mut Firmware) -> Result<(), EfiStatus>) -> EfiStatus {
    match with(f) {
        Some(Ok(())) => EfiStatus::SUCCESS,
        Some(Err(status)) => {
            log::trace!("{name} -> {status}");
            status
        }
        None => {
            log::error!("{name} called without firmware");
            EfiStatus::DEVICE_ERROR
        }
    }
}

/// Notes a call to a service the emulator does not provide.
///
/// Each service is logged the first time it is called.
pub fn report_unsupported(name: &'static str) -> EfiStatus {
    if REPORTED.with(|reported| reported.borrow_mut().insert(name)) {
        log::debug!("guest called unsupported service {name}");
    }
    EfiStatus::UNSUPPORTED
}

/// Reports `outcome` and stops the image thread for good.
///
/// The driver exits the process once it sees the outcome; parking keeps any
/// further guest code from running in the meantime.
pub fn terminate(outcome: Outcome) -> ! {
    if let Some(exit) = with(|fw| fw.exit.clone()) {
        // A closed channel means the driver is already on its way out.
        let _ = exit.send(outcome);
    } else {
        log::error!("guest finished without firmware: {outcome:?}");
    }
    park_forever()
}

/// Parks the current thread until the process exits.
pub fn park_forever() -> ! {
    loop {
        thread::park();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Installed;
    use super::*;

    #[test]
    fn exposed_values_keep_their_address() {
        let mut value = Exposed::new(7u32);
        let ptr = value.as_ptr();
        *value.get_mut() = 9;
        assert!(value.is(ptr));
        assert_eq!(unsafe { ptr.read() }, 9);
        let moved = value;
        assert!(moved.is(ptr));
        assert_eq!(*moved.get(), 9);
    }

    #[test]
    fn service_without_firmware_is_a_device_error() {
        assert!(uninstall().is_none());
        assert_eq!(service("Test", |_| Ok(())), EfiStatus::DEVICE_ERROR);
    }

    #[test]
    fn nested_borrow_is_refused() {
        let _fw = Installed::new(VariableStore::default());
        let inner = with(|_| with(|_| ()));
        assert_eq!(inner, Some(None));
    }

    #[test]
    fn handles_carry_the_expected_protocols() {
        let _fw = Installed::new(VariableStore::default());
        with(|fw| {
            let console = fw.console_handle();
            for guid in [
                EfiGuid::SIMPLE_TEXT_INPUT_PROTOCOL,
                EfiGuid::SIMPLE_TEXT_OUTPUT_PROTOCOL,
                EfiGuid::GRAPHICS_OUTPUT_PROTOCOL,
            ] {
                assert!(fw.handles.handle_protocol(console, &guid).is_ok(), "{guid}");
            }
            let image = fw.image_handle();
            let loaded = fw
                .handles
                .handle_protocol(image, &EfiGuid::LOADED_IMAGE_PROTOCOL)
                .unwrap()
                .cast::<LoadedImageProtocol>();
            let loaded = unsafe { &*loaded };
            assert_eq!(loaded.system_table, fw.system_table());
            assert_eq!(loaded.image_size, 0x3000);
            assert_eq!(loaded.image_code_type, 1);
            assert_eq!(loaded.image_data_type, 2);
        })
        .unwrap();
    }

    #[test]
    fn unsupported_services_report_once() {
        let _fw = Installed::new(VariableStore::default());
        assert_eq!(report_unsupported("SetTimer"), EfiStatus::UNSUPPORTED);
        assert_eq!(report_unsupported("SetTimer"), EfiStatus::UNSUPPORTED);
        assert_eq!(REPORTED.with(|r| r.borrow().iter().filter(|n| **n == "SetTimer").count()), 1);
    }
}
