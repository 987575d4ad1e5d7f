//! UCS-2 strings crossing the guest boundary.

/// Longest string read from guest memory, in code units.
///
/// Bounds the scan for a terminator in a string the guest forgot to end.
pub const MAX_GUEST_STRING: usize = 1 << 16;

/// Encodes `s` with a trailing NUL.
#[must_use]
pub fn encode(s: &str) -> Vec<u16> {
    s.encode_utf16().chain([0]).collect()
}

/// Decodes for log output, replacing invalid sequences.
#[must_use]
pub fn to_string_lossy(units: &[u16]) -> String {
    char::decode_utf16(units.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Borrows the NUL-terminated string at `ptr`, without the terminator.
///
/// Returns `None` for a null pointer or if no terminator is found within
/// [`MAX_GUEST_STRING`] code units.
///
/// # Safety
///
/// A non-null `ptr` must be readable up to and including its terminator (or
/// [`MAX_GUEST_STRING`] units), and the memory must not change while the
/// returned slice is alive.
pub unsafe fn from_ptr<'a>(ptr: *const u16) -> Option<&'a [u16]> {
    if ptr.is_null() {
        return None;
    }
    let mut len = 0;
    // SAFETY: every unit up to the terminator is readable, per the caller.
    while unsafe { ptr.add(len).read_unaligned() } != 0 {
        len += 1;
        if len >= MAX_GUEST_STRING {
            return None;
        }
    }
    // SAFETY: the `len` units before the terminator were just read.
    Some(unsafe { core::slice::from_raw_parts(ptr, len) })
}

/// Returns the code units of `buffer` before the first NUL, or `None` if it
/// holds no NUL.
#[must_use]
pub fn until_nul(buffer: &[u16]) -> Option<&[u16]> {
    buffer.iter().position(|&u| u == 0).map(|end| &buffer[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_appends_terminator() {
        assert_eq!(encode("Hi"), [0x48, 0x69, 0]);
        assert_eq!(encode(""), [0]);
    }

    #[test]
    fn from_ptr_stops_at_terminator() {
        let units = encode("BootOrder");
        let s = unsafe { from_ptr(units.as_ptr()) }.unwrap();
        assert_eq!(to_string_lossy(s), "BootOrder");
        assert_eq!(unsafe { from_ptr(core::ptr::null()) }, None);
    }

    #[test]
    fn until_nul_requires_terminator() {
        assert_eq!(until_nul(&[0x41, 0, 0x42]), Some(&[0x41][..]));
        assert_eq!(until_nul(&[0x41, 0x42]), None);
        assert_eq!(until_nul(&[0]), Some(&[][..]));
    }
}
