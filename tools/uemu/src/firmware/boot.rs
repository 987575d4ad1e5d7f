//! Boot Services.
//!
//! Memory, protocol and event services are backed by the firmware context.
//! Everything else is bound to a stub that reports the call and returns
//! `UNSUPPORTED`.

use core::ffi::c_void;
use std::ptr;
use std::thread;
use std::time::Duration;

use uefi::memory::EfiMemoryType;
use uefi::table::{BootServices, LocateSearchType, OpenProtocolInformationEntry, TableHeader, interface_type, tpl};
use uefi::{EfiBoolean, EfiEvent, EfiGuid, EfiHandle, EfiPhysicalAddress, EfiStatus, EfiTpl};

use super::handles::Search;
use super::{Firmware, KEY_EVENT, ucs2};
use crate::emulator::Outcome;
use crate::firmware;

/// How often `WaitForEvent` checks for a pending key.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// `AllocateAnyPages`, the only allocation type supported.
const ALLOCATE_ANY_PAGES: u32 = 0;

/// Defines services that only report themselves and return `UNSUPPORTED`.
macro_rules! unsupported {
    ($($service:literal => fn $name:ident($($arg:ident: $ty:ty),* $(,)?);)*) => {
        $(
            #[allow(unused_variables)]
            unsafe extern "efiapi" fn $name($($arg: $ty),*) -> EfiStatus {
                firmware::report_unsupported($service)
            }
        )*
    };
}

unsupported! {
    "GetMemoryMap" => fn get_memory_map(
        memory_map_size: *mut usize,
        memory_map: *mut c_void,
        map_key: *mut usize,
        descriptor_size: *mut usize,
        descriptor_version: *mut u32,
    );
    "CreateEvent" => fn create_event(
        event_type: u32,
        notify_tpl: EfiTpl,
        notify_function: *mut c_void,
        notify_context: *mut c_void,
        event: *mut EfiEvent,
    );
    "SetTimer" => fn set_timer(event: EfiEvent, timer_type: u32, trigger_time: u64);
    "SignalEvent" => fn signal_event(event: EfiEvent);
    "CloseEvent" => fn close_event(event: EfiEvent);
    "RegisterProtocolNotify" => fn register_protocol_notify(
        protocol: *const EfiGuid,
        event: EfiEvent,
        registration: *mut *mut c_void,
    );
    "LocateDevicePath" => fn locate_device_path(
        protocol: *const EfiGuid,
        device_path: *mut *mut c_void,
        device: *mut EfiHandle,
    );
    "InstallConfigurationTable" => fn install_configuration_table(guid: *const EfiGuid, table: *mut c_void);
    "LoadImage" => fn load_image(
        boot_policy: EfiBoolean,
        parent_image_handle: EfiHandle,
        device_path: *mut c_void,
        source_buffer: *mut c_void,
        source_size: usize,
        image_handle: *mut EfiHandle,
    );
    "StartImage" => fn start_image(image_handle: EfiHandle, exit_data_size: *mut usize, exit_data: *mut *mut u16);
    "UnloadImage" => fn unload_image(image_handle: EfiHandle);
    "ExitBootServices" => fn exit_boot_services(image_handle: EfiHandle, map_key: usize);
    "ConnectController" => fn connect_controller(
        controller_handle: EfiHandle,
        driver_image_handle: *mut EfiHandle,
        remaining_device_path: *mut c_void,
        recursive: EfiBoolean,
    );
    "DisconnectController" => fn disconnect_controller(
        controller_handle: EfiHandle,
        driver_image_handle: EfiHandle,
        child_handle: EfiHandle,
    );
    "OpenProtocol" => fn open_protocol(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        interface: *mut *mut c_void,
        agent_handle: EfiHandle,
        controller_handle: EfiHandle,
        attributes: u32,
    );
    "CloseProtocol" => fn close_protocol(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        agent_handle: EfiHandle,
        controller_handle: EfiHandle,
    );
    "OpenProtocolInformation" => fn open_protocol_information(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        entry_buffer: *mut *mut OpenProtocolInformationEntry,
        entry_count: *mut usize,
    );
    "CreateEventEx" => fn create_event_ex(
        event_type: u32,
        notify_tpl: EfiTpl,
        notify_function: *mut c_void,
        notify_context: *const c_void,
        event_group: *const EfiGuid,
        event: *mut EfiEvent,
    );
}

/// A Boot Services table bound to this module's services. The header is
/// left for the caller to seal.
pub fn table() -> BootServices {
    BootServices {
        header: TableHeader::default(),
        raise_tpl,
        restore_tpl,
        allocate_pages,
        free_pages,
        get_memory_map,
        allocate_pool,
        free_pool,
        create_event,
        set_timer,
        wait_for_event,
        signal_event,
        close_event,
        check_event,
        install_protocol_interface,
        reinstall_protocol_interface,
        uninstall_protocol_interface,
        handle_protocol,
        reserved: ptr::null_mut(),
        register_protocol_notify,
        locate_handle,
        locate_device_path,
        install_configuration_table,
        load_image,
        start_image,
        exit,
        unload_image,
        exit_boot_services,
        get_next_monotonic_count,
        stall,
        set_watchdog_timer,
        connect_controller,
        disconnect_controller,
        open_protocol,
        close_protocol,
        open_protocol_information,
        protocols_per_handle,
        locate_handle_buffer,
        locate_protocol,
        install_multiple_protocol_interfaces,
        uninstall_multiple_protocol_interfaces,
        calculate_crc32,
        copy_mem,
        set_mem,
        create_event_ex,
    }
}

/// Reads a guest GUID argument.
fn guid(protocol: *const EfiGuid) -> Result<EfiGuid, EfiStatus> {
    if protocol.is_null() {
        return Err(EfiStatus::INVALID_PARAMETER);
    }
    // SAFETY: checked non-null; the guest passes a readable GUID.
    Ok(unsafe { protocol.read_unaligned() })
}

/// Writes a guest out-parameter.
fn put<T>(out: *mut T, value: T) -> Result<(), EfiStatus> {
    if out.is_null() {
        return Err(EfiStatus::INVALID_PARAMETER);
    }
    // SAFETY: checked non-null; the guest passes a writable location.
    unsafe { out.write_unaligned(value) };
    Ok(())
}

fn memory_type(raw: u32) -> Result<EfiMemoryType, EfiStatus> {
    EfiMemoryType::try_from(raw).map_err(|_| EfiStatus::INVALID_PARAMETER)
}

fn search(search_type: u32, protocol: *const EfiGuid) -> Result<Search, EfiStatus> {
    match LocateSearchType::from_raw(search_type) {
        Some(LocateSearchType::AllHandles) => Ok(Search::AllHandles),
        Some(LocateSearchType::ByProtocol) => guid(protocol).map(Search::ByProtocol),
        Some(LocateSearchType::ByRegisterNotify) => Err(firmware::report_unsupported("LocateHandle(ByRegisterNotify)")),
        None => Err(EfiStatus::INVALID_PARAMETER),
    }
}

// ---------------------------------------------------------------------------
// Task priority
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn raise_tpl(new_tpl: EfiTpl) -> EfiTpl {
    firmware::with(|fw| {
        if new_tpl < fw.tpl {
            log::warn!("RaiseTPL to {new_tpl} below current {}", fw.tpl);
        }
        std::mem::replace(&mut fw.tpl, new_tpl)
    })
    .unwrap_or(tpl::APPLICATION)
}

unsafe extern "efiapi" fn restore_tpl(old_tpl: EfiTpl) {
    firmware::with(|fw| fw.tpl = old_tpl);
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn allocate_pages(
    allocate_type: u32,
    memory_type_raw: u32,
    pages: usize,
    memory: *mut EfiPhysicalAddress,
) -> EfiStatus {
    firmware::service("AllocatePages", |fw| {
        memory_type(memory_type_raw)?;
        if memory.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        if allocate_type != ALLOCATE_ANY_PAGES {
            return Err(firmware::report_unsupported("AllocatePages(fixed address)"));
        }
        let ptr = fw.pool.allocate_pages(pages)?;
        put(memory, ptr.as_ptr().addr() as EfiPhysicalAddress)
    })
}

unsafe extern "efiapi" fn free_pages(memory: EfiPhysicalAddress, pages: usize) -> EfiStatus {
    firmware::service("FreePages", |fw| {
        let addr = usize::try_from(memory).map_err(|_| EfiStatus::NOT_FOUND)?;
        fw.pool.free_pages(ptr::without_provenance_mut(addr), pages)
    })
}

unsafe extern "efiapi" fn allocate_pool(pool_type: u32, size: usize, buffer: *mut *mut c_void) -> EfiStatus {
    firmware::service("AllocatePool", |fw| {
        memory_type(pool_type)?;
        if buffer.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let ptr = fw.pool.allocate(size)?;
        put(buffer, ptr.as_ptr().cast())
    })
}

unsafe extern "efiapi" fn free_pool(buffer: *mut c_void) -> EfiStatus {
    firmware::service("FreePool", |fw| fw.pool.free(buffer.cast()))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn wait_for_event(number_of_events: usize, events: *const EfiEvent, index: *mut usize) -> EfiStatus {
    let console = firmware::with(|fw| -> Result<_, EfiStatus> {
        if number_of_events == 0 || events.is_null() || index.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        if fw.tpl != tpl::APPLICATION {
            return Err(EfiStatus::UNSUPPORTED);
        }
        // SAFETY: the guest passes `number_of_events` readable events.
        let events = unsafe { std::slice::from_raw_parts(events, number_of_events) };
        match events.iter().position(|&e| e != KEY_EVENT) {
            Some(at) => {
                // SAFETY: checked non-null.
                unsafe { index.write_unaligned(at) };
                Err(EfiStatus::INVALID_PARAMETER)
            }
            None => Ok(fw.console.console().clone()),
        }
    });
    let console = match console {
        Some(Ok(console)) => console,
        Some(Err(status)) => return status,
        None => return EfiStatus::DEVICE_ERROR,
    };

    // Sleep without holding the firmware so the key can arrive.
    while !console.key_pending() {
        if !console.is_running() {
            // The emulator is shutting down; the guest must not run again.
            firmware::park_forever();
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
    // SAFETY: checked non-null above.
    unsafe { index.write_unaligned(0) };
    EfiStatus::SUCCESS
}

unsafe extern "efiapi" fn check_event(event: EfiEvent) -> EfiStatus {
    firmware::service("CheckEvent", |fw| {
        if event != KEY_EVENT {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        if fw.console.console().key_pending() { Ok(()) } else { Err(EfiStatus::NOT_READY) }
    })
}

// ---------------------------------------------------------------------------
// Protocol handler services
// ---------------------------------------------------------------------------

/// Installs one binding on `*handle`, creating the handle if it is null, and
/// writes the handle back.
fn install_one(
    fw: &mut Firmware,
    handle: *mut EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut c_void,
) -> Result<(), EfiStatus> {
    if handle.is_null() {
        return Err(EfiStatus::INVALID_PARAMETER);
    }
    let protocol = guid(protocol)?;
    // SAFETY: checked non-null.
    let raw = unsafe { handle.read_unaligned() };
    let existing = if raw.is_null() { None } else { Some(fw.handles.resolve(raw)?) };
    let installed = fw.handles.install(existing, protocol, interface)?;
    put(handle, installed.as_raw())
}

unsafe extern "efiapi" fn install_protocol_interface(
    handle: *mut EfiHandle,
    protocol: *const EfiGuid,
    interface_type_raw: u32,
    interface: *mut c_void,
) -> EfiStatus {
    firmware::service("InstallProtocolInterface", |fw| {
        if interface_type_raw != interface_type::NATIVE_INTERFACE {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        install_one(fw, handle, protocol, interface)
    })
}

unsafe extern "efiapi" fn reinstall_protocol_interface(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    old_interface: *mut c_void,
    new_interface: *mut c_void,
) -> EfiStatus {
    firmware::service("ReinstallProtocolInterface", |fw| {
        let handle = fw.handles.resolve(handle)?;
        fw.handles.reinstall(handle, &guid(protocol)?, old_interface, new_interface)
    })
}

unsafe extern "efiapi" fn uninstall_protocol_interface(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    _interface: *mut c_void,
) -> EfiStatus {
    firmware::service("UninstallProtocolInterface", |fw| {
        let handle = fw.handles.resolve(handle)?;
        fw.handles.uninstall(handle, &guid(protocol)?)
    })
}

unsafe extern "efiapi" fn handle_protocol(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut *mut c_void,
) -> EfiStatus {
    firmware::service("HandleProtocol", |fw| {
        let handle = fw.handles.resolve(handle)?;
        let protocol = guid(protocol)?;
        if interface.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let found = fw.handles.handle_protocol(handle, &protocol)?;
        put(interface, found)
    })
}

unsafe extern "efiapi" fn locate_handle(
    search_type: u32,
    protocol: *const EfiGuid,
    _search_key: *mut c_void,
    buffer_size: *mut usize,
    buffer: *mut EfiHandle,
) -> EfiStatus {
    firmware::service("LocateHandle", |fw| {
        let search = search(search_type, protocol)?;
        if buffer_size.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        // SAFETY: checked non-null.
        let capacity = unsafe { buffer_size.read_unaligned() };
        let (required, found) = fw.handles.locate_handles(search, capacity);
        put(buffer_size, required)?;
        let found = found?;
        if buffer.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        for (i, handle) in found.iter().enumerate() {
            // SAFETY: the caller's buffer holds `capacity >= required` bytes.
            unsafe { buffer.add(i).write_unaligned(handle.as_raw()) };
        }
        Ok(())
    })
}

unsafe extern "efiapi" fn locate_handle_buffer(
    search_type: u32,
    protocol: *const EfiGuid,
    _search_key: *mut c_void,
    no_handles: *mut usize,
    buffer: *mut *mut EfiHandle,
) -> EfiStatus {
    firmware::service("LocateHandleBuffer", |fw| {
        let search = search(search_type, protocol)?;
        if no_handles.is_null() || buffer.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let found: Vec<EfiHandle> = fw.handles.find(search).into_iter().map(|h| h.as_raw()).collect();
        if found.is_empty() {
            return Err(EfiStatus::NOT_FOUND);
        }
        let copy = fw.pool.allocate_copy(&found)?;
        put(no_handles, found.len())?;
        put(buffer, copy.as_ptr())
    })
}

unsafe extern "efiapi" fn locate_protocol(
    protocol: *const EfiGuid,
    _registration: *mut c_void,
    interface: *mut *mut c_void,
) -> EfiStatus {
    firmware::service("LocateProtocol", |fw| {
        let protocol = guid(protocol)?;
        if interface.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let found = fw.handles.locate_protocol(&protocol)?;
        put(interface, found)
    })
}

unsafe extern "efiapi" fn protocols_per_handle(
    handle: EfiHandle,
    protocol_buffer: *mut *mut *mut EfiGuid,
    protocol_buffer_count: *mut usize,
) -> EfiStatus {
    firmware::service("ProtocolsPerHandle", |fw| {
        let handle = fw.handles.resolve(handle)?;
        if protocol_buffer.is_null() || protocol_buffer_count.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let guids = fw.handles.protocols(handle)?;
        // One pool block: the pointer array followed by the GUIDs it points at.
        let bytes = guids.len() * (size_of::<*mut EfiGuid>() + size_of::<EfiGuid>());
        let block = fw.pool.allocate(bytes)?.as_ptr();
        // SAFETY: the block holds the pointer array and then the GUIDs, and
        // both element types have alignment no greater than the pool's.
        unsafe {
            let pointers = block.cast::<*mut EfiGuid>();
            let storage = pointers.add(guids.len()).cast::<EfiGuid>();
            for (i, guid) in guids.iter().enumerate() {
                storage.add(i).write(*guid);
                pointers.add(i).write(storage.add(i));
            }
            protocol_buffer.write_unaligned(pointers);
        }
        put(protocol_buffer_count, guids.len())
    })
}

unsafe extern "efiapi" fn install_multiple_protocol_interfaces(
    handle: *mut EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut c_void,
    terminator: *const c_void,
) -> EfiStatus {
    firmware::service("InstallMultipleProtocolInterfaces", |fw| {
        if handle.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        // An empty list installs nothing. Its later arguments are not there
        // to read.
        if protocol.is_null() {
            return Ok(());
        }
        if !terminator.is_null() {
            return Err(firmware::report_unsupported("InstallMultipleProtocolInterfaces(more than one pair)"));
        }
        install_one(fw, handle, protocol, interface)
    })
}

unsafe extern "efiapi" fn uninstall_multiple_protocol_interfaces(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    _interface: *mut c_void,
    terminator: *const c_void,
) -> EfiStatus {
    firmware::service("UninstallMultipleProtocolInterfaces", |fw| {
        let handle = fw.handles.resolve(handle)?;
        if protocol.is_null() {
            return Ok(());
        }
        if !terminator.is_null() {
            return Err(firmware::report_unsupported("UninstallMultipleProtocolInterfaces(more than one pair)"));
        }
        fw.handles.uninstall(handle, &guid(protocol)?)
    })
}

// ---------------------------------------------------------------------------
// Image services
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn exit(
    image_handle: EfiHandle,
    exit_status: EfiStatus,
    exit_data_size: usize,
    exit_data: *mut u16,
) -> EfiStatus {
    match firmware::with(|fw| fw.image_handle().as_raw() == image_handle) {
        Some(true) => {}
        Some(false) => return EfiStatus::INVALID_PARAMETER,
        None => return EfiStatus::DEVICE_ERROR,
    }
    if exit_data_size != 0 {
        // SAFETY: exit data starts with a NUL-terminated string.
        if let Some(data) = unsafe { ucs2::from_ptr(exit_data) } {
            log::info!("guest exit data: {}", ucs2::to_string_lossy(data));
        }
    }
    log::debug!("guest called Exit({exit_status})");
    firmware::terminate(Outcome::Exited(exit_status))
}

// ---------------------------------------------------------------------------
// Miscellaneous
// ---------------------------------------------------------------------------

unsafe extern "efiapi" fn get_next_monotonic_count(count: *mut u64) -> EfiStatus {
    firmware::service("GetNextMonotonicCount", |fw| {
        put(count, fw.monotonic_count)?;
        fw.monotonic_count = fw.monotonic_count.wrapping_add(1);
        Ok(())
    })
}

unsafe extern "efiapi" fn stall(microseconds: usize) -> EfiStatus {
    thread::sleep(Duration::from_micros(microseconds as u64));
    EfiStatus::SUCCESS
}

unsafe extern "efiapi" fn set_watchdog_timer(
    timeout: usize,
    _watchdog_code: u64,
    _data_size: usize,
    _watchdog_data: *mut u16,
) -> EfiStatus {
    // There is no watchdog to arm; accepting the call keeps guests that
    // disable it at startup going.
    log::trace!("SetWatchdogTimer({timeout}) ignored");
    EfiStatus::SUCCESS
}

unsafe extern "efiapi" fn calculate_crc32(data: *const c_void, data_size: usize, crc32: *mut u32) -> EfiStatus {
    if data.is_null() || data_size == 0 || crc32.is_null() {
        return EfiStatus::INVALID_PARAMETER;
    }
    // SAFETY: the guest passes `data_size` readable bytes.
    let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), data_size) };
    // SAFETY: checked non-null.
    unsafe { crc32.write_unaligned(crc32fast::hash(bytes)) };
    EfiStatus::SUCCESS
}

unsafe extern "efiapi" fn copy_mem(destination: *mut c_void, source: *const c_void, length: usize) {
    if length == 0 {
        return;
    }
    // SAFETY: the guest passes valid, possibly overlapping, ranges.
    unsafe { ptr::copy(source.cast::<u8>(), destination.cast::<u8>(), length) };
}

unsafe extern "efiapi" fn set_mem(buffer: *mut c_void, size: usize, value: u8) {
    if size == 0 {
        return;
    }
    // SAFETY: the guest passes a writable range.
    unsafe { buffer.cast::<u8>().write_bytes(value, size) };
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::console::Console;
    use crate::console::display::HeadlessDisplay;
    use crate::firmware::testing::Installed;
    use crate::firmware::variables::VariableStore;
    use crate::firmware::{ImageInfo, install};
    use uefi::protocol::simple_text_input::InputKey;

    const TEST_PROTOCOL: EfiGuid = EfiGuid::new(0xdead_beef, 1, 2, [3; 8]);

    fn bs(fw: &Installed) -> &BootServices {
        unsafe { &*fw.table().boot_services }
    }

    fn iface(tag: usize) -> *mut c_void {
        ptr::without_provenance_mut(0x10_0000 + tag)
    }

    #[test]
    fn pool_round_trip() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut buffer = ptr::null_mut();
        unsafe {
            assert_eq!((bs.allocate_pool)(2, 64, &raw mut buffer), EfiStatus::SUCCESS);
            assert!(!buffer.is_null());
            (bs.set_mem)(buffer, 64, 0x5a);
            assert_eq!(*buffer.cast::<u8>().add(63), 0x5a);
            assert_eq!((bs.free_pool)(buffer), EfiStatus::SUCCESS);
            assert_eq!((bs.free_pool)(buffer), EfiStatus::INVALID_PARAMETER);
            assert_eq!((bs.allocate_pool)(16, 8, &raw mut buffer), EfiStatus::INVALID_PARAMETER);
        }
    }

    #[test]
    fn pages_round_trip() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut address = 0;
        unsafe {
            assert_eq!((bs.allocate_pages)(0, 2, 3, &raw mut address), EfiStatus::SUCCESS);
            assert_eq!(address % 4096, 0);
            assert_eq!((bs.allocate_pages)(2, 2, 1, &raw mut address), EfiStatus::UNSUPPORTED);
            assert_eq!((bs.free_pages)(address, 3), EfiStatus::SUCCESS);
        }
    }

    #[test]
    fn copy_mem_handles_overlap() {
        let fw = Installed::new(VariableStore::default());
        let mut bytes = *b"abcdef";
        let base = bytes.as_mut_ptr().cast::<c_void>();
        unsafe { (bs(&fw).copy_mem)(base.byte_add(2), base, 4) };
        assert_eq!(&bytes, b"ababcd");
    }

    #[test]
    fn install_and_query_protocols() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut handle: EfiHandle = ptr::null_mut();
        let mut found = ptr::null_mut();
        unsafe {
            assert_eq!((bs.install_protocol_interface)(&raw mut handle, &TEST_PROTOCOL, 0, iface(1)), EfiStatus::SUCCESS);
            assert!(!handle.is_null());
            assert_eq!(
                (bs.install_protocol_interface)(&raw mut handle, &TEST_PROTOCOL, 0, iface(2)),
                EfiStatus::INVALID_PARAMETER
            );
            assert_eq!((bs.handle_protocol)(handle, &TEST_PROTOCOL, &raw mut found), EfiStatus::SUCCESS);
            assert_eq!(found, iface(1));

            assert_eq!((bs.reinstall_protocol_interface)(handle, &TEST_PROTOCOL, iface(1), iface(3)), EfiStatus::SUCCESS);
            assert_eq!((bs.locate_protocol)(&TEST_PROTOCOL, ptr::null_mut(), &raw mut found), EfiStatus::SUCCESS);
            assert_eq!(found, iface(3));

            assert_eq!((bs.uninstall_protocol_interface)(handle, &TEST_PROTOCOL, iface(3)), EfiStatus::SUCCESS);
            assert_eq!((bs.handle_protocol)(handle, &TEST_PROTOCOL, &raw mut found), EfiStatus::UNSUPPORTED);
            assert_eq!(
                (bs.handle_protocol)(ptr::without_provenance_mut(999), &TEST_PROTOCOL, &raw mut found),
                EfiStatus::INVALID_PARAMETER
            );
            assert_eq!((bs.locate_protocol)(&TEST_PROTOCOL, ptr::null_mut(), &raw mut found), EfiStatus::NOT_FOUND);
        }
    }

    #[test]
    fn locate_handle_size_query() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut size = 0;
        unsafe {
            // Console handle and image handle.
            assert_eq!(
                (bs.locate_handle)(0, ptr::null(), ptr::null_mut(), &raw mut size, ptr::null_mut()),
                EfiStatus::BUFFER_TOO_SMALL
            );
            assert_eq!(size, 2 * size_of::<EfiHandle>());
            let mut handles = vec![ptr::null_mut(); 2];
            assert_eq!(
                (bs.locate_handle)(0, ptr::null(), ptr::null_mut(), &raw mut size, handles.as_mut_ptr()),
                EfiStatus::SUCCESS
            );
            assert!(handles.iter().all(|h| !h.is_null()));

            size = 0;
            assert_eq!(
                (bs.locate_handle)(2, &EfiGuid::GRAPHICS_OUTPUT_PROTOCOL, ptr::null_mut(), &raw mut size, ptr::null_mut()),
                EfiStatus::BUFFER_TOO_SMALL
            );
            assert_eq!(size, size_of::<EfiHandle>());
            assert_eq!(
                (bs.locate_handle)(1, ptr::null(), ptr::null_mut(), &raw mut size, ptr::null_mut()),
                EfiStatus::UNSUPPORTED
            );
            assert_eq!(
                (bs.locate_handle)(7, ptr::null(), ptr::null_mut(), &raw mut size, ptr::null_mut()),
                EfiStatus::INVALID_PARAMETER
            );
        }
    }

    #[test]
    fn locate_handle_buffer_allocates() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut count = 0;
        let mut buffer = ptr::null_mut();
        unsafe {
            assert_eq!(
                (bs.locate_handle_buffer)(2, &EfiGuid::LOADED_IMAGE_PROTOCOL, ptr::null_mut(), &raw mut count, &raw mut buffer),
                EfiStatus::SUCCESS
            );
            assert_eq!(count, 1);
            assert_eq!(Some(*buffer), firmware::with(|fw| fw.image_handle().as_raw()));
            assert_eq!((bs.free_pool)(buffer.cast()), EfiStatus::SUCCESS);
            assert_eq!(
                (bs.locate_handle_buffer)(2, &TEST_PROTOCOL, ptr::null_mut(), &raw mut count, &raw mut buffer),
                EfiStatus::NOT_FOUND
            );
        }
    }

    #[test]
    fn protocols_per_handle_lists_console_protocols() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut guids = ptr::null_mut();
        let mut count = 0;
        unsafe {
            assert_eq!(
                (bs.protocols_per_handle)(fw.table().console_out_handle, &raw mut guids, &raw mut count),
                EfiStatus::SUCCESS
            );
            assert_eq!(count, 3);
            assert_eq!(**guids.add(1), EfiGuid::SIMPLE_TEXT_OUTPUT_PROTOCOL);
            assert_eq!((bs.free_pool)(guids.cast()), EfiStatus::SUCCESS);
        }
    }

    #[test]
    fn multiple_interfaces_single_pair() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut handle: EfiHandle = ptr::null_mut();
        let mut found = ptr::null_mut();
        unsafe {
            assert_eq!(
                (bs.install_multiple_protocol_interfaces)(&raw mut handle, &TEST_PROTOCOL, iface(1), ptr::null()),
                EfiStatus::SUCCESS
            );
            assert_eq!((bs.handle_protocol)(handle, &TEST_PROTOCOL, &raw mut found), EfiStatus::SUCCESS);
            assert_eq!(
                (bs.install_multiple_protocol_interfaces)(&raw mut handle, &TEST_PROTOCOL, iface(1), iface(2)),
                EfiStatus::UNSUPPORTED
            );
            assert_eq!(
                (bs.uninstall_multiple_protocol_interfaces)(handle, &TEST_PROTOCOL, iface(1), ptr::null()),
                EfiStatus::SUCCESS
            );
            assert_eq!((bs.handle_protocol)(handle, &TEST_PROTOCOL, &raw mut found), EfiStatus::UNSUPPORTED);
        }
    }

    #[test]
    fn multiple_interfaces_empty_list_ignores_trailing_arguments() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let image = firmware::with(|fw| fw.image_handle().as_raw()).unwrap();
        let mut handle = image;
        let junk = iface(0x5a5a);
        unsafe {
            assert_eq!(
                (bs.install_multiple_protocol_interfaces)(&raw mut handle, ptr::null(), junk, junk.cast_const()),
                EfiStatus::SUCCESS
            );
            assert_eq!(
                (bs.uninstall_multiple_protocol_interfaces)(handle, ptr::null(), junk, junk.cast_const()),
                EfiStatus::SUCCESS
            );
        }
        assert_eq!(handle, image);
    }

    #[test]
    fn crc32_matches_reference() {
        let fw = Installed::new(VariableStore::default());
        let data = b"123456789";
        let mut crc = 0;
        unsafe {
            assert_eq!((bs(&fw).calculate_crc32)(data.as_ptr().cast(), data.len(), &raw mut crc), EfiStatus::SUCCESS);
            assert_eq!((bs(&fw).calculate_crc32)(data.as_ptr().cast(), 0, &raw mut crc), EfiStatus::INVALID_PARAMETER);
        }
        assert_eq!(crc, 0xcbf4_3926);
    }

    #[test]
    fn monotonic_count_increases() {
        let fw = Installed::new(VariableStore::default());
        let (mut a, mut b) = (0, 0);
        unsafe {
            (bs(&fw).get_next_monotonic_count)(&raw mut a);
            (bs(&fw).get_next_monotonic_count)(&raw mut b);
        }
        assert_eq!(b, a + 1);
    }

    #[test]
    fn tpl_raise_and_restore() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        unsafe {
            let old = (bs.raise_tpl)(tpl::NOTIFY);
            assert_eq!(old, tpl::APPLICATION);
            let mut index = 0;
            assert_eq!((bs.wait_for_event)(1, &KEY_EVENT, &raw mut index), EfiStatus::UNSUPPORTED);
            (bs.restore_tpl)(old);
        }
        assert_eq!(firmware::with(|fw| fw.tpl), Some(tpl::APPLICATION));
    }

    #[test]
    fn key_event_wait_and_check() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let console = fw.console.handle();
        let mut index = usize::MAX;
        unsafe {
            assert_eq!((bs.check_event)(KEY_EVENT), EfiStatus::NOT_READY);
            assert_eq!((bs.check_event)(ptr::null_mut()), EfiStatus::INVALID_PARAMETER);
            assert_eq!((bs.wait_for_event)(0, &KEY_EVENT, &raw mut index), EfiStatus::INVALID_PARAMETER);

            let pusher = thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                console.push_key(InputKey::char(u16::from(b'y')));
            });
            assert_eq!((bs.wait_for_event)(1, &KEY_EVENT, &raw mut index), EfiStatus::SUCCESS);
            assert_eq!(index, 0);
            pusher.join().unwrap();
            assert_eq!((bs.check_event)(KEY_EVENT), EfiStatus::SUCCESS);
        }
    }

    #[test]
    fn unsupported_services_say_so() {
        let fw = Installed::new(VariableStore::default());
        let bs = bs(&fw);
        let mut event = ptr::null_mut();
        unsafe {
            assert_eq!((bs.create_event)(0, 0, ptr::null_mut(), ptr::null_mut(), &raw mut event), EfiStatus::UNSUPPORTED);
            assert_eq!(
                (bs.open_protocol)(ptr::null_mut(), &TEST_PROTOCOL, ptr::null_mut(), ptr::null_mut(), ptr::null_mut(), 0),
                EfiStatus::UNSUPPORTED
            );
            assert_eq!((bs.set_watchdog_timer)(0, 0, 0, ptr::null_mut()), EfiStatus::SUCCESS);
        }
    }

    #[test]
    fn exit_reports_status_and_parks() {
        let console = Console::start(Box::new(HeadlessDisplay::new()), Box::new(|| {})).unwrap();
        let handle = console.handle();
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        thread::spawn(move || {
            let image = ImageInfo {
                base: ptr::null_mut(),
                size: 0,
            };
            let firmware = Firmware::new(image, handle, VariableStore::default(), tx).unwrap();
            let image_handle = firmware.image_handle().as_raw();
            let st = install(firmware);
            unsafe {
                let bs = &*(*st).boot_services;
                let wrong = (bs.exit)(ptr::null_mut(), EfiStatus::SUCCESS, 0, ptr::null_mut());
                ready_tx.send(wrong).unwrap();
                (bs.exit)(image_handle, EfiStatus::NOT_FOUND, 0, ptr::null_mut());
            }
            unreachable!("Exit returned");
        });
        assert_eq!(ready_rx.recv().unwrap(), EfiStatus::INVALID_PARAMETER);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::Exited(EfiStatus::NOT_FOUND)
        );
        console.shutdown();
    }
}
