//! System Table, Boot Services and Runtime Services layouts.
//!
//! Each service slot has a named function-pointer type so an implementation
//! can be checked against the exact signature it is stored under. Slots are
//! plain function pointers, never `Option<fn>`, so an implementation must
//! exist for every entry (the emulator binds unsupported stubs to the rest).

use core::ffi::c_void;
use core::mem::{offset_of, size_of};

use crate::protocol::simple_text::SimpleTextOutputProtocol;
use crate::protocol::simple_text_input::SimpleTextInputProtocol;
use crate::{EfiBoolean, EfiEvent, EfiGuid, EfiHandle, EfiPhysicalAddress, EfiStatus, EfiTpl};

// ── Table header ─────────────────────────────────────────────────────

/// Header shared by every UEFI table.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TableHeader {
    /// Identifies the table type.
    pub signature: u64,
    /// Specification revision the table conforms to.
    pub revision: u32,
    /// Size of the whole table, header included.
    pub header_size: u32,
    /// CRC32 of the table computed with this field zeroed.
    pub crc32: u32,
    /// Must be zero.
    pub reserved: u32,
}

/// `"IBI SYST"`.
pub const SYSTEM_TABLE_SIGNATURE: u64 = u64::from_le_bytes(*b"IBI SYST");
/// `"BOOTSERV"`.
pub const BOOT_SERVICES_SIGNATURE: u64 = u64::from_le_bytes(*b"BOOTSERV");
/// `"RUNTSERV"`.
pub const RUNTIME_SERVICES_SIGNATURE: u64 = u64::from_le_bytes(*b"RUNTSERV");

/// An entry of the configuration table array.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationTable {
    /// Identifies the table.
    pub vendor_guid: EfiGuid,
    /// Vendor-specific table data.
    pub vendor_table: *mut c_void,
}

// ── System table ─────────────────────────────────────────────────────

/// The table handed to an application's entry point.
#[repr(C)]
pub struct SystemTable {
    /// Table header.
    pub header: TableHeader,
    /// NUL-terminated UCS-2 vendor string.
    pub firmware_vendor: *const u16,
    /// Vendor-specific firmware revision.
    pub firmware_revision: u32,
    /// Explicit padding so the table has no uninitialized bytes to checksum.
    pub pad: u32,
    /// Handle of the active console input device.
    pub console_in_handle: EfiHandle,
    /// Simple Text Input protocol of the console.
    pub con_in: *mut SimpleTextInputProtocol,
    /// Handle of the active console output device.
    pub console_out_handle: EfiHandle,
    /// Simple Text Output protocol of the console.
    pub con_out: *mut SimpleTextOutputProtocol,
    /// Handle of the standard error device.
    pub standard_error_handle: EfiHandle,
    /// Simple Text Output protocol for standard error.
    pub std_err: *mut SimpleTextOutputProtocol,
    /// Runtime Services table.
    pub runtime_services: *mut RuntimeServices,
    /// Boot Services table.
    pub boot_services: *mut BootServices,
    /// Number of configuration table entries.
    pub number_of_table_entries: usize,
    /// Configuration table array.
    pub configuration_table: *mut ConfigurationTable,
}

/// Signature of an application entry point.
pub type ImageEntryPoint =
    unsafe extern "efiapi" fn(image_handle: EfiHandle, system_table: *mut SystemTable) -> EfiStatus;

// ── Enumerations received as raw integers ────────────────────────────

/// Interface type for `InstallProtocolInterface`.
pub mod interface_type {
    /// The only defined interface type.
    pub const NATIVE_INTERFACE: u32 = 0;
}

/// Search type for `LocateHandle`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateSearchType {
    /// Every handle in the database.
    AllHandles = 0,
    /// Handles newly registered for a notify key.
    ByRegisterNotify = 1,
    /// Handles supporting a protocol.
    ByProtocol = 2,
}

impl LocateSearchType {
    /// Converts a guest-supplied value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::AllHandles),
            1 => Some(Self::ByRegisterNotify),
            2 => Some(Self::ByProtocol),
            _ => None,
        }
    }
}

/// Task priority levels.
pub mod tpl {
    use crate::EfiTpl;

    /// Normal application level.
    pub const APPLICATION: EfiTpl = 4;
    /// Callback level.
    pub const CALLBACK: EfiTpl = 8;
    /// Notification level.
    pub const NOTIFY: EfiTpl = 16;
    /// Highest level, interrupts disabled.
    pub const HIGH_LEVEL: EfiTpl = 31;
}

// ── Supporting structures ────────────────────────────────────────────

/// An agent that has a protocol open.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OpenProtocolInformationEntry {
    /// Agent that opened the protocol.
    pub agent_handle: EfiHandle,
    /// Controller the open is associated with.
    pub controller_handle: EfiHandle,
    /// Open attributes.
    pub attributes: u32,
    /// Number of opens by this agent.
    pub open_count: u32,
}

/// Calendar time as reported by `GetTime`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EfiTime {
    /// 1900..=9999.
    pub year: u16,
    /// 1..=12.
    pub month: u8,
    /// 1..=31.
    pub day: u8,
    /// 0..=23.
    pub hour: u8,
    /// 0..=59.
    pub minute: u8,
    /// 0..=59.
    pub second: u8,
    /// Padding.
    pub pad1: u8,
    /// 0..=999_999_999.
    pub nanosecond: u32,
    /// Offset from UTC in minutes, or [`EfiTime::UNSPECIFIED_TIMEZONE`].
    pub time_zone: i16,
    /// Daylight saving flags.
    pub daylight: u8,
    /// Padding.
    pub pad2: u8,
}

impl EfiTime {
    /// Time is interpreted as local time.
    pub const UNSPECIFIED_TIMEZONE: i16 = 0x07ff;
}

/// Real-time clock capabilities reported by `GetTime`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EfiTimeCapabilities {
    /// Resolution in counts per second.
    pub resolution: u32,
    /// Accuracy in parts per million times 1e6.
    pub accuracy: u32,
    /// Whether setting the time clears sub-second state.
    pub sets_to_zero: EfiBoolean,
}

// ── Boot services ────────────────────────────────────────────────────

/// `RaiseTPL`.
pub type RaiseTplFn = unsafe extern "efiapi" fn(new_tpl: EfiTpl) -> EfiTpl;
/// `RestoreTPL`.
pub type RestoreTplFn = unsafe extern "efiapi" fn(old_tpl: EfiTpl);
/// `AllocatePages`.
pub type AllocatePagesFn = unsafe extern "efiapi" fn(
    allocate_type: u32,
    memory_type: u32,
    pages: usize,
    memory: *mut EfiPhysicalAddress,
) -> EfiStatus;
/// `FreePages`.
pub type FreePagesFn =
    unsafe extern "efiapi" fn(memory: EfiPhysicalAddress, pages: usize) -> EfiStatus;
/// `GetMemoryMap`.
pub type GetMemoryMapFn = unsafe extern "efiapi" fn(
    memory_map_size: *mut usize,
    memory_map: *mut c_void,
    map_key: *mut usize,
    descriptor_size: *mut usize,
    descriptor_version: *mut u32,
) -> EfiStatus;
/// `AllocatePool`.
pub type AllocatePoolFn =
    unsafe extern "efiapi" fn(pool_type: u32, size: usize, buffer: *mut *mut c_void) -> EfiStatus;
/// `FreePool`.
pub type FreePoolFn = unsafe extern "efiapi" fn(buffer: *mut c_void) -> EfiStatus;
/// `CreateEvent`.
pub type CreateEventFn = unsafe extern "efiapi" fn(
    event_type: u32,
    notify_tpl: EfiTpl,
    notify_function: *mut c_void,
    notify_context: *mut c_void,
    event: *mut EfiEvent,
) -> EfiStatus;
/// `SetTimer`.
pub type SetTimerFn =
    unsafe extern "efiapi" fn(event: EfiEvent, timer_type: u32, trigger_time: u64) -> EfiStatus;
/// `WaitForEvent`.
pub type WaitForEventFn = unsafe extern "efiapi" fn(
    number_of_events: usize,
    events: *const EfiEvent,
    index: *mut usize,
) -> EfiStatus;
/// `SignalEvent`, `CloseEvent` and `CheckEvent`.
pub type EventFn = unsafe extern "efiapi" fn(event: EfiEvent) -> EfiStatus;
/// `InstallProtocolInterface`.
pub type InstallProtocolInterfaceFn = unsafe extern "efiapi" fn(
    handle: *mut EfiHandle,
    protocol: *const EfiGuid,
    interface_type: u32,
    interface: *mut c_void,
) -> EfiStatus;
/// `ReinstallProtocolInterface`.
pub type ReinstallProtocolInterfaceFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    old_interface: *mut c_void,
    new_interface: *mut c_void,
) -> EfiStatus;
/// `UninstallProtocolInterface`.
pub type UninstallProtocolInterfaceFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut c_void,
) -> EfiStatus;
/// `HandleProtocol`.
pub type HandleProtocolFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut *mut c_void,
) -> EfiStatus;
/// `RegisterProtocolNotify`.
pub type RegisterProtocolNotifyFn = unsafe extern "efiapi" fn(
    protocol: *const EfiGuid,
    event: EfiEvent,
    registration: *mut *mut c_void,
) -> EfiStatus;
/// `LocateHandle`.
pub type LocateHandleFn = unsafe extern "efiapi" fn(
    search_type: u32,
    protocol: *const EfiGuid,
    search_key: *mut c_void,
    buffer_size: *mut usize,
    buffer: *mut EfiHandle,
) -> EfiStatus;
/// `LocateDevicePath`.
pub type LocateDevicePathFn = unsafe extern "efiapi" fn(
    protocol: *const EfiGuid,
    device_path: *mut *mut c_void,
    device: *mut EfiHandle,
) -> EfiStatus;
/// `InstallConfigurationTable`.
pub type InstallConfigurationTableFn =
    unsafe extern "efiapi" fn(guid: *const EfiGuid, table: *mut c_void) -> EfiStatus;
/// `LoadImage`.
pub type LoadImageFn = unsafe extern "efiapi" fn(
    boot_policy: EfiBoolean,
    parent_image_handle: EfiHandle,
    device_path: *mut c_void,
    source_buffer: *mut c_void,
    source_size: usize,
    image_handle: *mut EfiHandle,
) -> EfiStatus;
/// `StartImage`.
pub type StartImageFn = unsafe extern "efiapi" fn(
    image_handle: EfiHandle,
    exit_data_size: *mut usize,
    exit_data: *mut *mut u16,
) -> EfiStatus;
/// `Exit`.
pub type ExitFn = unsafe extern "efiapi" fn(
    image_handle: EfiHandle,
    exit_status: EfiStatus,
    exit_data_size: usize,
    exit_data: *mut u16,
) -> EfiStatus;
/// `UnloadImage`.
pub type UnloadImageFn = unsafe extern "efiapi" fn(image_handle: EfiHandle) -> EfiStatus;
/// `ExitBootServices`.
pub type ExitBootServicesFn =
    unsafe extern "efiapi" fn(image_handle: EfiHandle, map_key: usize) -> EfiStatus;
/// `GetNextMonotonicCount`.
pub type GetNextMonotonicCountFn = unsafe extern "efiapi" fn(count: *mut u64) -> EfiStatus;
/// `Stall`.
pub type StallFn = unsafe extern "efiapi" fn(microseconds: usize) -> EfiStatus;
/// `SetWatchdogTimer`.
pub type SetWatchdogTimerFn = unsafe extern "efiapi" fn(
    timeout: usize,
    watchdog_code: u64,
    data_size: usize,
    watchdog_data: *mut u16,
) -> EfiStatus;
/// `ConnectController`.
pub type ConnectControllerFn = unsafe extern "efiapi" fn(
    controller_handle: EfiHandle,
    driver_image_handle: *mut EfiHandle,
    remaining_device_path: *mut c_void,
    recursive: EfiBoolean,
) -> EfiStatus;
/// `DisconnectController`.
pub type DisconnectControllerFn = unsafe extern "efiapi" fn(
    controller_handle: EfiHandle,
    driver_image_handle: EfiHandle,
    child_handle: EfiHandle,
) -> EfiStatus;
/// `OpenProtocol`.
pub type OpenProtocolFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut *mut c_void,
    agent_handle: EfiHandle,
    controller_handle: EfiHandle,
    attributes: u32,
) -> EfiStatus;
/// `CloseProtocol`.
pub type CloseProtocolFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    agent_handle: EfiHandle,
    controller_handle: EfiHandle,
) -> EfiStatus;
/// `OpenProtocolInformation`.
pub type OpenProtocolInformationFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    entry_buffer: *mut *mut OpenProtocolInformationEntry,
    entry_count: *mut usize,
) -> EfiStatus;
/// `ProtocolsPerHandle`.
pub type ProtocolsPerHandleFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol_buffer: *mut *mut *mut EfiGuid,
    protocol_buffer_count: *mut usize,
) -> EfiStatus;
/// `LocateHandleBuffer`.
pub type LocateHandleBufferFn = unsafe extern "efiapi" fn(
    search_type: u32,
    protocol: *const EfiGuid,
    search_key: *mut c_void,
    no_handles: *mut usize,
    buffer: *mut *mut EfiHandle,
) -> EfiStatus;
/// `LocateProtocol`.
pub type LocateProtocolFn = unsafe extern "efiapi" fn(
    protocol: *const EfiGuid,
    registration: *mut c_void,
    interface: *mut *mut c_void,
) -> EfiStatus;
/// `InstallMultipleProtocolInterfaces`.
///
/// The firmware definition is variadic. Under the x64 calling convention the
/// first four arguments travel in registers, so a provider can receive one
/// `(protocol, interface)` pair plus the slot where the terminating null of a
/// single-pair call lands. Longer lists are detectable (non-null `terminator`)
/// but not readable.
pub type MultipleProtocolInterfacesFn = unsafe extern "efiapi" fn(
    handle: *mut EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut c_void,
    terminator: *const c_void,
) -> EfiStatus;
/// `UninstallMultipleProtocolInterfaces`, received the same way as
/// [`MultipleProtocolInterfacesFn`].
pub type UninstallMultipleProtocolInterfacesFn = unsafe extern "efiapi" fn(
    handle: EfiHandle,
    protocol: *const EfiGuid,
    interface: *mut c_void,
    terminator: *const c_void,
) -> EfiStatus;
/// `CalculateCrc32`.
pub type CalculateCrc32Fn =
    unsafe extern "efiapi" fn(data: *const c_void, data_size: usize, crc32: *mut u32) -> EfiStatus;
/// `CopyMem`.
pub type CopyMemFn =
    unsafe extern "efiapi" fn(destination: *mut c_void, source: *const c_void, length: usize);
/// `SetMem`.
pub type SetMemFn = unsafe extern "efiapi" fn(buffer: *mut c_void, size: usize, value: u8);
/// `CreateEventEx`.
pub type CreateEventExFn = unsafe extern "efiapi" fn(
    event_type: u32,
    notify_tpl: EfiTpl,
    notify_function: *mut c_void,
    notify_context: *const c_void,
    event_group: *const EfiGuid,
    event: *mut EfiEvent,
) -> EfiStatus;

/// The Boot Services table, in firmware slot order.
#[repr(C)]
pub struct BootServices {
    /// Table header.
    pub header: TableHeader,

    /// Raises the task priority level.
    pub raise_tpl: RaiseTplFn,
    /// Restores the task priority level.
    pub restore_tpl: RestoreTplFn,

    /// Allocates pages.
    pub allocate_pages: AllocatePagesFn,
    /// Frees pages.
    pub free_pages: FreePagesFn,
    /// Returns the memory map.
    pub get_memory_map: GetMemoryMapFn,
    /// Allocates pool memory.
    pub allocate_pool: AllocatePoolFn,
    /// Frees pool memory.
    pub free_pool: FreePoolFn,

    /// Creates an event.
    pub create_event: CreateEventFn,
    /// Arms a timer event.
    pub set_timer: SetTimerFn,
    /// Waits for one of a set of events.
    pub wait_for_event: WaitForEventFn,
    /// Signals an event.
    pub signal_event: EventFn,
    /// Closes an event.
    pub close_event: EventFn,
    /// Checks whether an event is signaled.
    pub check_event: EventFn,

    /// Installs a protocol interface on a handle.
    pub install_protocol_interface: InstallProtocolInterfaceFn,
    /// Replaces a protocol interface on a handle.
    pub reinstall_protocol_interface: ReinstallProtocolInterfaceFn,
    /// Removes a protocol interface from a handle.
    pub uninstall_protocol_interface: UninstallProtocolInterfaceFn,
    /// Queries a handle for a protocol.
    pub handle_protocol: HandleProtocolFn,
    /// Reserved slot.
    pub reserved: *mut c_void,
    /// Registers for protocol installation notifications.
    pub register_protocol_notify: RegisterProtocolNotifyFn,
    /// Returns handles matching a search.
    pub locate_handle: LocateHandleFn,
    /// Locates a device path handle.
    pub locate_device_path: LocateDevicePathFn,
    /// Adds or removes a configuration table entry.
    pub install_configuration_table: InstallConfigurationTableFn,

    /// Loads an image.
    pub load_image: LoadImageFn,
    /// Starts a loaded image.
    pub start_image: StartImageFn,
    /// Terminates the calling image.
    pub exit: ExitFn,
    /// Unloads an image.
    pub unload_image: UnloadImageFn,
    /// Terminates boot services.
    pub exit_boot_services: ExitBootServicesFn,

    /// Returns a monotonic counter value.
    pub get_next_monotonic_count: GetNextMonotonicCountFn,
    /// Busy-waits for a number of microseconds.
    pub stall: StallFn,
    /// Arms the watchdog timer.
    pub set_watchdog_timer: SetWatchdogTimerFn,

    /// Connects drivers to a controller.
    pub connect_controller: ConnectControllerFn,
    /// Disconnects drivers from a controller.
    pub disconnect_controller: DisconnectControllerFn,

    /// Opens a protocol on behalf of an agent.
    pub open_protocol: OpenProtocolFn,
    /// Closes a protocol opened with `open_protocol`.
    pub close_protocol: CloseProtocolFn,
    /// Lists agents that opened a protocol.
    pub open_protocol_information: OpenProtocolInformationFn,

    /// Lists protocols installed on a handle.
    pub protocols_per_handle: ProtocolsPerHandleFn,
    /// Returns handles matching a search in a pool buffer.
    pub locate_handle_buffer: LocateHandleBufferFn,
    /// Returns the first interface of a protocol.
    pub locate_protocol: LocateProtocolFn,
    /// Installs several protocol interfaces.
    pub install_multiple_protocol_interfaces: MultipleProtocolInterfacesFn,
    /// Removes several protocol interfaces.
    pub uninstall_multiple_protocol_interfaces: UninstallMultipleProtocolInterfacesFn,

    /// Computes a CRC32.
    pub calculate_crc32: CalculateCrc32Fn,

    /// Copies memory.
    pub copy_mem: CopyMemFn,
    /// Fills memory.
    pub set_mem: SetMemFn,
    /// Creates an event in a group.
    pub create_event_ex: CreateEventExFn,
}

// ── Runtime services ─────────────────────────────────────────────────

/// `GetTime`.
pub type GetTimeFn = unsafe extern "efiapi" fn(
    time: *mut EfiTime,
    capabilities: *mut EfiTimeCapabilities,
) -> EfiStatus;
/// `SetTime`.
pub type SetTimeFn = unsafe extern "efiapi" fn(time: *const EfiTime) -> EfiStatus;
/// `GetWakeupTime`.
pub type GetWakeupTimeFn = unsafe extern "efiapi" fn(
    enabled: *mut EfiBoolean,
    pending: *mut EfiBoolean,
    time: *mut EfiTime,
) -> EfiStatus;
/// `SetWakeupTime`.
pub type SetWakeupTimeFn =
    unsafe extern "efiapi" fn(enable: EfiBoolean, time: *const EfiTime) -> EfiStatus;
/// `SetVirtualAddressMap`.
pub type SetVirtualAddressMapFn = unsafe extern "efiapi" fn(
    memory_map_size: usize,
    descriptor_size: usize,
    descriptor_version: u32,
    virtual_map: *mut c_void,
) -> EfiStatus;
/// `ConvertPointer`.
pub type ConvertPointerFn =
    unsafe extern "efiapi" fn(debug_disposition: usize, address: *mut *mut c_void) -> EfiStatus;
/// `GetVariable`.
pub type GetVariableFn = unsafe extern "efiapi" fn(
    variable_name: *const u16,
    vendor_guid: *const EfiGuid,
    attributes: *mut u32,
    data_size: *mut usize,
    data: *mut c_void,
) -> EfiStatus;
/// `GetNextVariableName`.
pub type GetNextVariableNameFn = unsafe extern "efiapi" fn(
    variable_name_size: *mut usize,
    variable_name: *mut u16,
    vendor_guid: *mut EfiGuid,
) -> EfiStatus;
/// `SetVariable`.
pub type SetVariableFn = unsafe extern "efiapi" fn(
    variable_name: *const u16,
    vendor_guid: *const EfiGuid,
    attributes: u32,
    data_size: usize,
    data: *const c_void,
) -> EfiStatus;
/// `GetNextHighMonotonicCount`.
pub type GetNextHighMonotonicCountFn = unsafe extern "efiapi" fn(high_count: *mut u32) -> EfiStatus;
/// `ResetSystem`. Never returns on real firmware.
pub type ResetSystemFn = unsafe extern "efiapi" fn(
    reset_type: u32,
    reset_status: EfiStatus,
    data_size: usize,
    reset_data: *const c_void,
);
/// `UpdateCapsule`.
pub type UpdateCapsuleFn = unsafe extern "efiapi" fn(
    capsule_header_array: *mut *mut c_void,
    capsule_count: usize,
    scatter_gather_list: EfiPhysicalAddress,
) -> EfiStatus;
/// `QueryCapsuleCapabilities`.
pub type QueryCapsuleCapabilitiesFn = unsafe extern "efiapi" fn(
    capsule_header_array: *mut *mut c_void,
    capsule_count: usize,
    maximum_capsule_size: *mut u64,
    reset_type: *mut u32,
) -> EfiStatus;
/// `QueryVariableInfo`.
pub type QueryVariableInfoFn = unsafe extern "efiapi" fn(
    attributes: u32,
    maximum_variable_storage_size: *mut u64,
    remaining_variable_storage_size: *mut u64,
    maximum_variable_size: *mut u64,
) -> EfiStatus;

/// The Runtime Services table, in firmware slot order.
#[repr(C)]
pub struct RuntimeServices {
    /// Table header.
    pub header: TableHeader,
    /// Reads the current time.
    pub get_time: GetTimeFn,
    /// Sets the current time.
    pub set_time: SetTimeFn,
    /// Reads the wakeup alarm.
    pub get_wakeup_time: GetWakeupTimeFn,
    /// Sets the wakeup alarm.
    pub set_wakeup_time: SetWakeupTimeFn,
    /// Switches runtime services to virtual addressing.
    pub set_virtual_address_map: SetVirtualAddressMapFn,
    /// Converts a pointer to its virtual address.
    pub convert_pointer: ConvertPointerFn,
    /// Reads a variable.
    pub get_variable: GetVariableFn,
    /// Enumerates variable names.
    pub get_next_variable_name: GetNextVariableNameFn,
    /// Writes or deletes a variable.
    pub set_variable: SetVariableFn,
    /// Returns the high half of the monotonic counter.
    pub get_next_high_monotonic_count: GetNextHighMonotonicCountFn,
    /// Resets the platform.
    pub reset_system: ResetSystemFn,
    /// Passes capsules to the firmware.
    pub update_capsule: UpdateCapsuleFn,
    /// Queries capsule support.
    pub query_capsule_capabilities: QueryCapsuleCapabilitiesFn,
    /// Reports variable storage limits.
    pub query_variable_info: QueryVariableInfoFn,
}

// ── Layout checks ────────────────────────────────────────────────────

const _: () = {
    assert!(size_of::<TableHeader>() == 24);
    assert!(size_of::<ConfigurationTable>() == 24);
    assert!(size_of::<EfiTime>() == 16);
    assert!(size_of::<EfiTimeCapabilities>() == 12);

    assert!(size_of::<SystemTable>() == 120);
    assert!(offset_of!(SystemTable, firmware_vendor) == 24);
    assert!(offset_of!(SystemTable, console_in_handle) == 40);
    assert!(offset_of!(SystemTable, con_in) == 48);
    assert!(offset_of!(SystemTable, con_out) == 64);
    assert!(offset_of!(SystemTable, runtime_services) == 88);
    assert!(offset_of!(SystemTable, boot_services) == 96);
    assert!(offset_of!(SystemTable, configuration_table) == 112);

    assert!(size_of::<BootServices>() == 24 + 44 * 8);
    assert!(offset_of!(BootServices, allocate_pool) == 0x40);
    assert!(offset_of!(BootServices, wait_for_event) == 0x60);
    assert!(offset_of!(BootServices, install_protocol_interface) == 0x80);
    assert!(offset_of!(BootServices, handle_protocol) == 0x98);
    assert!(offset_of!(BootServices, locate_handle) == 0xb0);
    assert!(offset_of!(BootServices, exit) == 0xd8);
    assert!(offset_of!(BootServices, open_protocol) == 0x118);
    assert!(offset_of!(BootServices, locate_protocol) == 0x140);
    assert!(offset_of!(BootServices, calculate_crc32) == 0x158);
    assert!(offset_of!(BootServices, create_event_ex) == 0x170);

    assert!(size_of::<RuntimeServices>() == 24 + 14 * 8);
    assert!(offset_of!(RuntimeServices, get_variable) == 0x48);
    assert!(offset_of!(RuntimeServices, get_next_variable_name) == 0x50);
    assert!(offset_of!(RuntimeServices, reset_system) == 0x68);
};
