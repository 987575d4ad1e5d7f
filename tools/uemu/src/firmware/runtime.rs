//! Runtime Services: the clock, variables and reset.

use core::ffi::c_void;
use std::ptr;

use time::OffsetDateTime;
use uefi::table::{EfiTime, EfiTimeCapabilities, RuntimeServices, TableHeader};
use uefi::variable::VariableAttributes;
use uefi::{EfiBoolean, EfiGuid, EfiPhysicalAddress, EfiStatus};

use super::ucs2;
use crate::emulator::Outcome;
use crate::firmware;

/// Reset types, for logging.
const RESET_TYPES: [&str; 4] = ["cold", "warm", "shutdown", "platform-specific"];

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
    "SetTime" => fn set_time(time: *const EfiTime);
    "GetWakeupTime" => fn get_wakeup_time(enabled: *mut EfiBoolean, pending: *mut EfiBoolean, time: *mut EfiTime);
    "SetWakeupTime" => fn set_wakeup_time(enable: EfiBoolean, time: *const EfiTime);
    "SetVirtualAddressMap" => fn set_virtual_address_map(
        memory_map_size: usize,
        descriptor_size: usize,
        descriptor_version: u32,
        virtual_map: *mut c_void,
    );
    "ConvertPointer" => fn convert_pointer(debug_disposition: usize, address: *mut *mut c_void);
    "UpdateCapsule" => fn update_capsule(
        capsule_header_array: *mut *mut c_void,
        capsule_count: usize,
        scatter_gather_list: EfiPhysicalAddress,
    );
    "QueryCapsuleCapabilities" => fn query_capsule_capabilities(
        capsule_header_array: *mut *mut c_void,
        capsule_count: usize,
        maximum_capsule_size: *mut u64,
        reset_type: *mut u32,
    );
    "QueryVariableInfo" => fn query_variable_info(
        attributes: u32,
        maximum_variable_storage_size: *mut u64,
        remaining_variable_storage_size: *mut u64,
        maximum_variable_size: *mut u64,
    );
}

/// A Runtime Services table bound to this module's services. The header is
/// left for the caller to seal.
pub fn table() -> RuntimeServices {
    RuntimeServices {
        header: TableHeader::default(),
        get_time,
        set_time,
        get_wakeup_time,
        set_wakeup_time,
        set_virtual_address_map,
        convert_pointer,
        get_variable,
        get_next_variable_name,
        set_variable,
        get_next_high_monotonic_count,
        reset_system,
        update_capsule,
        query_capsule_capabilities,
        query_variable_info,
    }
}

/// Converts a host timestamp, keeping its UTC offset.
#[must_use]
pub fn efi_time(now: OffsetDateTime) -> EfiTime {
    EfiTime {
        year: u16::try_from(now.year()).unwrap_or(1900),
        month: u8::from(now.month()),
        day: now.day(),
        hour: now.hour(),
        minute: now.minute(),
        second: now.second(),
        pad1: 0,
        nanosecond: now.nanosecond(),
        time_zone: now.offset().whole_minutes(),
        daylight: 0,
        pad2: 0,
    }
}

unsafe extern "efiapi" fn get_time(time: *mut EfiTime, capabilities: *mut EfiTimeCapabilities) -> EfiStatus {
    if time.is_null() {
        return EfiStatus::INVALID_PARAMETER;
    }
    // SAFETY: checked non-null; the guest passes writable structures.
    unsafe {
        time.write_unaligned(efi_time(OffsetDateTime::now_utc()));
        if !capabilities.is_null() {
            capabilities.write_unaligned(EfiTimeCapabilities {
                resolution: 1,
                accuracy: 50_000_000,
                sets_to_zero: 0,
            });
        }
    }
    EfiStatus::SUCCESS
}

unsafe extern "efiapi" fn get_variable(
    variable_name: *const u16,
    vendor_guid: *const EfiGuid,
    attributes: *mut u32,
    data_size: *mut usize,
    data: *mut c_void,
) -> EfiStatus {
    firmware::service("GetVariable", |fw| {
        if vendor_guid.is_null() || data_size.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        // SAFETY: the guest passes a NUL-terminated name.
        let name = unsafe { ucs2::from_ptr(variable_name) }.ok_or(EfiStatus::INVALID_PARAMETER)?;
        // SAFETY: checked non-null.
        let vendor = unsafe { vendor_guid.read_unaligned() };
        let variable = fw.variables.get(name, &vendor)?;

        // SAFETY: checked non-null, or optional and checked before use.
        unsafe {
            if !attributes.is_null() {
                attributes.write_unaligned(variable.attributes.bits());
            }
            let capacity = data_size.read_unaligned();
            data_size.write_unaligned(variable.data.len());
            if capacity < variable.data.len() {
                return Err(EfiStatus::BUFFER_TOO_SMALL);
            }
            if data.is_null() {
                return Err(EfiStatus::INVALID_PARAMETER);
            }
            ptr::copy_nonoverlapping(variable.data.as_ptr(), data.cast::<u8>(), variable.data.len());
        }
        Ok(())
    })
}

unsafe extern "efiapi" fn get_next_variable_name(
    variable_name_size: *mut usize,
    variable_name: *mut u16,
    vendor_guid: *mut EfiGuid,
) -> EfiStatus {
    firmware::service("GetNextVariableName", |fw| {
        if variable_name_size.is_null() || variable_name.is_null() || vendor_guid.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        // SAFETY: checked non-null.
        let capacity = unsafe { variable_name_size.read_unaligned() };
        let units = capacity / size_of::<u16>();
        // A buffer too small for a terminator is a size query from the start.
        // Otherwise the previous name must be terminated within the buffer the
        // caller claims to have.
        let previous = if units == 0 {
            Vec::new()
        } else {
            // SAFETY: the guest buffer holds `capacity` bytes.
            let buffer = unsafe { std::slice::from_raw_parts(variable_name.cast_const(), units) };
            ucs2::until_nul(buffer).ok_or(EfiStatus::INVALID_PARAMETER)?.to_vec()
        };
        // SAFETY: checked non-null.
        let vendor = unsafe { vendor_guid.read_unaligned() };

        let next = fw.variables.next_after(&previous, &vendor)?;
        let required = next.name_size();
        // SAFETY: checked non-null; the name buffer holds `capacity` bytes,
        // which is at least `required` once the size check passes.
        unsafe {
            variable_name_size.write_unaligned(required);
            if capacity < required {
                return Err(EfiStatus::BUFFER_TOO_SMALL);
            }
            ptr::copy_nonoverlapping(next.name.as_ptr(), variable_name, next.name.len());
            variable_name.add(next.name.len()).write_unaligned(0);
            vendor_guid.write_unaligned(next.vendor);
        }
        Ok(())
    })
}

unsafe extern "efiapi" fn set_variable(
    variable_name: *const u16,
    vendor_guid: *const EfiGuid,
    attributes: u32,
    data_size: usize,
    data: *const c_void,
) -> EfiStatus {
    firmware::service("SetVariable", |fw| {
        if vendor_guid.is_null() || (data_size != 0 && data.is_null()) {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        // SAFETY: the guest passes a NUL-terminated name.
        let name = unsafe { ucs2::from_ptr(variable_name) }.ok_or(EfiStatus::INVALID_PARAMETER)?;
        let attributes = VariableAttributes::from_bits(attributes).ok_or(EfiStatus::INVALID_PARAMETER)?;
        // SAFETY: checked non-null.
        let vendor = unsafe { vendor_guid.read_unaligned() };
        let data: &[u8] = if data_size == 0 {
            &[]
        } else {
            // SAFETY: the guest passes `data_size` readable bytes.
            unsafe { std::slice::from_raw_parts(data.cast::<u8>(), data_size) }
        };
        log::trace!("SetVariable({}, {vendor}, {attributes:?}, {data_size} bytes)", ucs2::to_string_lossy(name));
        fw.variables.set(name, &vendor, attributes, data)
    })
}

unsafe extern "efiapi" fn get_next_high_monotonic_count(high_count: *mut u32) -> EfiStatus {
    firmware::service("GetNextHighMonotonicCount", |fw| {
        if high_count.is_null() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        let high = u32::try_from(fw.monotonic_count >> 32).unwrap_or(u32::MAX).wrapping_add(1);
        fw.monotonic_count = u64::from(high) << 32;
        // SAFETY: checked non-null.
        unsafe { high_count.write_unaligned(high) };
        Ok(())
    })
}

unsafe extern "efiapi" fn reset_system(
    reset_type: u32,
    reset_status: EfiStatus,
    _data_size: usize,
    _reset_data: *const c_void,
) {
    let kind = usize::try_from(reset_type)
        .ok()
        .and_then(|i| RESET_TYPES.get(i))
        .unwrap_or(&"unknown");
    log::info!("guest requested {kind} reset with {reset_status}");
    firmware::terminate(Outcome::Exited(reset_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::testing::Installed;
    use crate::firmware::variables::{Variable, VariableStore};

    fn seeded() -> Installed {
        let variable = |name: &str, data: &[u8]| Variable {
            name: name.encode_utf16().collect(),
            vendor: EfiGuid::GLOBAL_VARIABLE,
            attributes: VariableAttributes::DEFAULT,
            data: data.to_vec(),
        };
        Installed::new(VariableStore::new([variable("Lang", b"eng"), variable("BootOrder", &[1, 0])]))
    }

    fn rt(fw: &Installed) -> &RuntimeServices {
        unsafe { &*fw.table().runtime_services }
    }

    #[test]
    fn get_variable_size_query() {
        let fw = seeded();
        let rt = rt(&fw);
        let name = ucs2::encode("Lang");
        let mut attributes = 0;
        let mut size = 0;
        let mut data = [0u8; 8];
        unsafe {
            assert_eq!(
                (rt.get_variable)(name.as_ptr(), &EfiGuid::GLOBAL_VARIABLE, &raw mut attributes, &raw mut size, ptr::null_mut()),
                EfiStatus::BUFFER_TOO_SMALL
            );
            assert_eq!(size, 3);
            assert_eq!(attributes, 7);
            assert_eq!(
                (rt.get_variable)(
                    name.as_ptr(),
                    &EfiGuid::GLOBAL_VARIABLE,
                    ptr::null_mut(),
                    &raw mut size,
                    data.as_mut_ptr().cast()
                ),
                EfiStatus::SUCCESS
            );
        }
        assert_eq!(&data[..size], b"eng");
    }

    #[test]
    fn get_variable_missing() {
        let fw = seeded();
        let name = ucs2::encode("Lang");
        let mut size = 16;
        let mut data = [0u8; 16];
        let status = unsafe {
            (rt(&fw).get_variable)(name.as_ptr(), &EfiGuid::NULL, ptr::null_mut(), &raw mut size, data.as_mut_ptr().cast())
        };
        assert_eq!(status, EfiStatus::NOT_FOUND);
    }

    /// Walks the store the way a guest does, growing the buffer on demand.
    fn enumerate(rt: &RuntimeServices) -> Vec<(String, EfiGuid)> {
        let mut buffer = vec![0u16; 1];
        let mut vendor = EfiGuid::NULL;
        let mut found = Vec::new();
        loop {
            let mut size = buffer.len() * 2;
            let status = unsafe { (rt.get_next_variable_name)(&raw mut size, buffer.as_mut_ptr(), &raw mut vendor) };
            match status {
                EfiStatus::SUCCESS => {
                    let name = ucs2::until_nul(&buffer).unwrap();
                    found.push((ucs2::to_string_lossy(name), vendor));
                }
                EfiStatus::BUFFER_TOO_SMALL => {
                    assert!(size > buffer.len() * 2);
                    buffer.resize(size / 2, 0);
                }
                EfiStatus::NOT_FOUND => return found,
                other => panic!("unexpected {other}"),
            }
        }
    }

    #[test]
    fn enumeration_grows_buffer() {
        let fw = seeded();
        let names: Vec<_> = enumerate(rt(&fw)).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Lang", "BootOrder"]);
    }

    #[test]
    fn enumeration_size_query_with_empty_buffer() {
        let fw = seeded();
        let rt = rt(&fw);
        let mut vendor = EfiGuid::NULL;
        let mut buffer = [0xffffu16; 8];
        let mut size = 0;
        unsafe {
            assert_eq!(
                (rt.get_next_variable_name)(&raw mut size, buffer.as_mut_ptr(), &raw mut vendor),
                EfiStatus::BUFFER_TOO_SMALL
            );
            assert_eq!(size, ("Lang".len() + 1) * 2);
            assert_eq!(buffer, [0xffff; 8]);
            assert_eq!(vendor, EfiGuid::NULL);

            buffer[0] = 0;
            assert_eq!(
                (rt.get_next_variable_name)(&raw mut size, buffer.as_mut_ptr(), &raw mut vendor),
                EfiStatus::SUCCESS
            );
        }
        assert_eq!(ucs2::until_nul(&buffer), Some(&ucs2::encode("Lang")[..4]));
        assert_eq!(vendor, EfiGuid::GLOBAL_VARIABLE);
    }

    #[test]
    fn enumeration_rejects_unknown_and_unterminated_names() {
        let fw = seeded();
        let rt = rt(&fw);
        let mut vendor = EfiGuid::GLOBAL_VARIABLE;
        let mut unknown = ucs2::encode("Nope");
        let mut size = unknown.len() * 2;
        unsafe {
            assert_eq!(
                (rt.get_next_variable_name)(&raw mut size, unknown.as_mut_ptr(), &raw mut vendor),
                EfiStatus::INVALID_PARAMETER
            );
            let mut unterminated = [u16::from(b'L'); 4];
            let mut size = 8;
            assert_eq!(
                (rt.get_next_variable_name)(&raw mut size, unterminated.as_mut_ptr(), &raw mut vendor),
                EfiStatus::INVALID_PARAMETER
            );
        }
    }

    #[test]
    fn set_variable_creates_and_deletes() {
        let fw = seeded();
        let rt = rt(&fw);
        let name = ucs2::encode("Timeout");
        let value = [5u8, 0];
        unsafe {
            assert_eq!(
                (rt.set_variable)(name.as_ptr(), &EfiGuid::GLOBAL_VARIABLE, 7, 2, value.as_ptr().cast()),
                EfiStatus::SUCCESS
            );
        }
        assert_eq!(enumerate(rt).len(), 3);
        unsafe {
            assert_eq!(
                (rt.set_variable)(name.as_ptr(), &EfiGuid::GLOBAL_VARIABLE, 7, 0, ptr::null()),
                EfiStatus::SUCCESS
            );
            assert_eq!(
                (rt.set_variable)(name.as_ptr(), &EfiGuid::GLOBAL_VARIABLE, 0x1000, 2, value.as_ptr().cast()),
                EfiStatus::INVALID_PARAMETER
            );
            let empty = ucs2::encode("");
            assert_eq!(
                (rt.set_variable)(empty.as_ptr(), &EfiGuid::GLOBAL_VARIABLE, 7, 2, value.as_ptr().cast()),
                EfiStatus::INVALID_PARAMETER
            );
        }
        assert_eq!(enumerate(rt).len(), 2);
    }

    #[test]
    fn get_time_reports_utc() {
        let fw = seeded();
        let mut time = EfiTime::default();
        let mut caps = EfiTimeCapabilities::default();
        unsafe {
            assert_eq!((rt(&fw).get_time)(&raw mut time, &raw mut caps), EfiStatus::SUCCESS);
            assert_eq!((rt(&fw).get_time)(ptr::null_mut(), ptr::null_mut()), EfiStatus::INVALID_PARAMETER);
        }
        assert!(time.year >= 2024);
        assert!((1..=12).contains(&time.month));
        assert_eq!(time.time_zone, 0);
        assert_eq!(caps.resolution, 1);
    }

    #[test]
    fn efi_time_fields() {
        let at = time::Date::from_calendar_date(2024, time::Month::February, 29)
            .unwrap()
            .with_hms_nano(13, 45, 7, 500_000_000)
            .unwrap()
            .assume_utc();
        let t = efi_time(at);
        assert_eq!((t.year, t.month, t.day), (2024, 2, 29));
        assert_eq!((t.hour, t.minute, t.second), (13, 45, 7));
        assert_eq!(t.nanosecond, 500_000_000);
    }

    #[test]
    fn high_monotonic_count_advances_low_count() {
        let fw = seeded();
        let mut high = 0;
        unsafe {
            assert_eq!((rt(&fw).get_next_high_monotonic_count)(&raw mut high), EfiStatus::SUCCESS);
        }
        assert_eq!(high, 1);
        assert_eq!(firmware::with(|fw| fw.monotonic_count), Some(1 << 32));
    }
}
