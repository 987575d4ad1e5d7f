//! UEFI status codes.
//!
//! [`EfiStatus`] wraps the native-width `EFI_STATUS` word. The top bit marks an
//! error; warnings are the non-zero values with the top bit clear.

use core::fmt;

/// The top bit of `usize`, set on every error code.
pub const ERROR_BIT: usize = 1 << (usize::BITS - 1);

/// A UEFI status code, ABI-compatible with `EFI_STATUS`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EfiStatus(pub usize);

/// Declares the named status constants together with the `name` lookup table.
macro_rules! status_codes {
    ($($(#[$meta:meta])* $name:ident = $value:expr;)*) => {
        impl EfiStatus {
            $(
                $(#[$meta])*
                pub const $name: Self = Self($value);
            )*

            /// Returns the symbolic `EFI_*` name of a known status code.
            #[must_use]
            pub const fn name(self) -> Option<&'static str> {
                $(
                    if self.0 == $value {
                        return Some(concat!("EFI_", stringify!($name)));
                    }
                )*
                None
            }
        }
    };
}

status_codes! {
    /// The operation completed successfully.
    SUCCESS = 0;
    /// A string contained characters that could not be rendered.
    WARN_UNKNOWN_GLYPH = 1;
    /// The result buffer was too small and the data was truncated.
    WARN_BUFFER_TOO_SMALL = 4;

    /// The image failed to load.
    LOAD_ERROR = ERROR_BIT | 1;
    /// A parameter was incorrect.
    INVALID_PARAMETER = ERROR_BIT | 2;
    /// The operation is not supported.
    UNSUPPORTED = ERROR_BIT | 3;
    /// The buffer was not the proper size for the request.
    BAD_BUFFER_SIZE = ERROR_BIT | 4;
    /// The buffer is not large enough to hold the requested data.
    /// The required size is returned alongside.
    BUFFER_TOO_SMALL = ERROR_BIT | 5;
    /// There is no data pending upon return.
    NOT_READY = ERROR_BIT | 6;
    /// The physical device reported an error.
    DEVICE_ERROR = ERROR_BIT | 7;
    /// The device cannot be written to.
    WRITE_PROTECTED = ERROR_BIT | 8;
    /// A resource has run out.
    OUT_OF_RESOURCES = ERROR_BIT | 9;
    /// The item was not found.
    NOT_FOUND = ERROR_BIT | 0x0e;
    /// Access was denied.
    ACCESS_DENIED = ERROR_BIT | 0x0f;
    /// The operation was aborted.
    ABORTED = ERROR_BIT | 0x15;
    /// A CRC error was detected.
    CRC_ERROR = ERROR_BIT | 0x1b;
}

impl EfiStatus {
    /// Builds an error status from its code (the bits below [`ERROR_BIT`]).
    #[must_use]
    pub const fn from_error_code(code: usize) -> Self {
        Self(ERROR_BIT | code)
    }

    /// Returns `true` for [`EfiStatus::SUCCESS`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the error bit is set.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 & ERROR_BIT != 0
    }

    /// Returns `true` for non-zero codes with the error bit clear.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        self.0 != 0 && !self.is_error()
    }

    /// The status value with the error bit masked off.
    #[must_use]
    pub const fn code(self) -> usize {
        self.0 & !ERROR_BIT
    }

    /// Converts the status into a `Result`, treating warnings as success.
    ///
    /// # Errors
    ///
    /// Returns `Err(self)` if the error bit is set.
    pub const fn to_result(self) -> Result<(), Self> {
        if self.is_error() { Err(self) } else { Ok(()) }
    }
}

impl From<Result<(), EfiStatus>> for EfiStatus {
    fn from(result: Result<(), EfiStatus>) -> Self {
        match result {
            Ok(()) => Self::SUCCESS,
            Err(status) => status,
        }
    }
}

impl fmt::Debug for EfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None if self.is_error() => write!(f, "EfiStatus(error {:#x})", self.code()),
            None => write!(f, "EfiStatus({:#x})", self.0),
        }
    }
}

impl fmt::Display for EfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const _: () = assert!(core::mem::size_of::<EfiStatus>() == core::mem::size_of::<usize>());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify() {
        assert!(EfiStatus::SUCCESS.is_success());
        assert!(EfiStatus::WARN_UNKNOWN_GLYPH.is_warning());
        assert!(EfiStatus::NOT_FOUND.is_error());
        assert!(!EfiStatus::NOT_FOUND.is_warning());
        assert_eq!(EfiStatus::NOT_FOUND.code(), 0x0e);
        assert_eq!(EfiStatus::from_error_code(3), EfiStatus::UNSUPPORTED);
    }

    #[test]
    fn names() {
        assert_eq!(EfiStatus::BUFFER_TOO_SMALL.name(), Some("EFI_BUFFER_TOO_SMALL"));
        assert_eq!(EfiStatus(ERROR_BIT | 0x7f).name(), None);
    }

    #[test]
    fn result_round_trip() {
        assert_eq!(EfiStatus::WARN_BUFFER_TOO_SMALL.to_result(), Ok(()));
        assert_eq!(EfiStatus::from(Err(EfiStatus::ABORTED)), EfiStatus::ABORTED);
        assert_eq!(EfiStatus::from(Ok(())), EfiStatus::SUCCESS);
    }
}
