//! The handle database.
//!
//! Handles live in an arena in creation order and are never destroyed; a
//! handle whose last protocol is uninstalled stays valid and empty. The
//! value a guest sees is the arena index plus one, so a null handle never
//! names anything and any other value is checked against the arena before
//! use. Each handle keeps its protocol bindings in installation order, at
//! most one per GUID.

use core::ffi::c_void;
use core::num::NonZeroUsize;
use core::ptr;

use uefi::{EfiGuid, EfiHandle, EfiStatus};

/// An interface pointer bound to a protocol GUID. Owned by whoever
/// installed it.
pub type Interface = *mut c_void;

/// An opaque reference to an entry in the [`HandleDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroUsize);

impl Handle {
    fn from_index(index: usize) -> Self {
        Self(NonZeroUsize::MIN.saturating_add(index))
    }

    fn index(self) -> usize {
        self.0.get() - 1
    }

    /// The value handed to the guest.
    #[must_use]
    pub fn as_raw(self) -> EfiHandle {
        ptr::without_provenance_mut(self.0.get())
    }

    /// Interprets a guest handle. Does not check it exists.
    #[must_use]
    pub fn from_raw(raw: EfiHandle) -> Option<Self> {
        NonZeroUsize::new(raw.addr()).map(Self)
    }
}

/// Which handles `locate_handles` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
    /// Every handle.
    AllHandles,
    /// Handles with a binding for the GUID.
    ByProtocol(EfiGuid),
}

#[derive(Debug)]
struct Binding {
    protocol: EfiGuid,
    interface: Interface,
}

/// Handles and the protocols installed on them.
#[derive(Debug, Default)]
pub struct HandleDatabase {
    handles: Vec<Vec<Binding>>,
}

impl HandleDatabase {
    /// An empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` before the first handle is created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Creates an empty handle.
    pub fn create_handle(&mut self) -> Handle {
        self.handles.push(Vec::new());
        Handle::from_index(self.handles.len() - 1)
    }

    /// Resolves a guest handle.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` for null or a value that names no handle.
    pub fn resolve(&self, raw: EfiHandle) -> Result<Handle, EfiStatus> {
        Handle::from_raw(raw)
            .filter(|h| h.index() < self.handles.len())
            .ok_or(EfiStatus::INVALID_PARAMETER)
    }

    fn bindings(&self, handle: Handle) -> Result<&Vec<Binding>, EfiStatus> {
        self.handles.get(handle.index()).ok_or(EfiStatus::INVALID_PARAMETER)
    }

    fn bindings_mut(&mut self, handle: Handle) -> Result<&mut Vec<Binding>, EfiStatus> {
        self.handles.get_mut(handle.index()).ok_or(EfiStatus::INVALID_PARAMETER)
    }

    /// Binds `interface` to `protocol` on `handle`, creating a new handle
    /// when `handle` is `None`.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` if `handle` does not exist or already has a
    /// binding for `protocol`.
    pub fn install(
        &mut self,
        handle: Option<Handle>,
        protocol: EfiGuid,
        interface: Interface,
    ) -> Result<Handle, EfiStatus> {
        let handle = match handle {
            Some(handle) => {
                if self.bindings(handle)?.iter().any(|b| b.protocol == protocol) {
                    return Err(EfiStatus::INVALID_PARAMETER);
                }
                handle
            }
            None => self.create_handle(),
        };
        self.bindings_mut(handle)?.push(Binding { protocol, interface });
        Ok(handle)
    }

    /// Removes the binding for `protocol` from `handle`.
    ///
    /// The interface pointer is not compared: a handle has at most one
    /// binding per GUID.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` for an unknown handle, `NOT_FOUND` if the handle
    /// has no such binding.
    pub fn uninstall(&mut self, handle: Handle, protocol: &EfiGuid) -> Result<(), EfiStatus> {
        let bindings = self.bindings_mut(handle)?;
        let at = bindings
            .iter()
            .position(|b| b.protocol == *protocol)
            .ok_or(EfiStatus::NOT_FOUND)?;
        bindings.remove(at);
        Ok(())
    }

    /// Swaps the interface bound to `protocol` from `old` to `new`.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` for an unknown handle, `NOT_FOUND` if the
    /// binding is absent or currently holds a different interface.
    pub fn reinstall(
        &mut self,
        handle: Handle,
        protocol: &EfiGuid,
        old: Interface,
        new: Interface,
    ) -> Result<(), EfiStatus> {
        let binding = self
            .bindings_mut(handle)?
            .iter_mut()
            .find(|b| b.protocol == *protocol && ptr::eq(b.interface, old))
            .ok_or(EfiStatus::NOT_FOUND)?;
        binding.interface = new;
        Ok(())
    }

    /// The interface bound to `protocol` on `handle`.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` for an unknown handle, `UNSUPPORTED` if the
    /// handle does not carry the protocol.
    pub fn handle_protocol(&self, handle: Handle, protocol: &EfiGuid) -> Result<Interface, EfiStatus> {
        self.bindings(handle)?
            .iter()
            .find(|b| b.protocol == *protocol)
            .map(|b| b.interface)
            .ok_or(EfiStatus::UNSUPPORTED)
    }

    /// The protocols installed on `handle`, in installation order.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` for an unknown handle.
    pub fn protocols(&self, handle: Handle) -> Result<Vec<EfiGuid>, EfiStatus> {
        Ok(self.bindings(handle)?.iter().map(|b| b.protocol).collect())
    }

    /// Handles matching `search`, in creation order.
    #[must_use]
    pub fn find(&self, search: Search) -> Vec<Handle> {
        self.handles
            .iter()
            .enumerate()
            .filter(|(_, bindings)| match search {
                Search::AllHandles => true,
                Search::ByProtocol(guid) => bindings.iter().any(|b| b.protocol == guid),
            })
            .map(|(index, _)| Handle::from_index(index))
            .collect()
    }

    /// Two-phase handle lookup against a caller buffer of `buffer_size`
    /// bytes.
    ///
    /// Always returns the byte size the full result needs. The handles come
    /// back only if they all fit; a short buffer gets nothing.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if nothing matches, `BUFFER_TOO_SMALL` if the matches do
    /// not fit.
    pub fn locate_handles(&self, search: Search, buffer_size: usize) -> (usize, Result<Vec<Handle>, EfiStatus>) {
        let handles = self.find(search);
        let required = handles.len() * size_of::<EfiHandle>();
        if handles.is_empty() {
            return (required, Err(EfiStatus::NOT_FOUND));
        }
        if buffer_size < required {
            return (required, Err(EfiStatus::BUFFER_TOO_SMALL));
        }
        (required, Ok(handles))
    }

    /// The first interface bound to `protocol` on any handle, in creation
    /// order.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if no handle carries the protocol.
    pub fn locate_protocol(&self, protocol: &EfiGuid) -> Result<Interface, EfiStatus> {
        self.handles
            .iter()
            .flatten()
            .find(|b| b.protocol == *protocol)
            .map(|b| b.interface)
            .ok_or(EfiStatus::NOT_FOUND)
    }
}
