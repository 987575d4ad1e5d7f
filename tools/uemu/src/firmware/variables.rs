//! In-memory variable store.
//!
//! Variables are kept in a list in creation order, which is also the order
//! `GetNextVariableName` walks them in. Nothing is persisted.

use uefi::variable::VariableAttributes;
use uefi::{EfiGuid, EfiStatus};

/// Attributes the store refuses to accept.
const UNSUPPORTED_ATTRIBUTES: VariableAttributes = VariableAttributes::HARDWARE_ERROR_RECORD
    .union(VariableAttributes::AUTHENTICATED_WRITE_ACCESS)
    .union(VariableAttributes::TIME_BASED_AUTHENTICATED_WRITE_ACCESS);

/// A named, vendor-scoped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Name in UCS-2, without terminator.
    pub name: Vec<u16>,
    /// Vendor namespace.
    pub vendor: EfiGuid,
    /// Attributes reported by `GetVariable`.
    pub attributes: VariableAttributes,
    /// Contents.
    pub data: Vec<u8>,
}

impl Variable {
    /// Byte size of the name including its terminator.
    #[must_use]
    pub fn name_size(&self) -> usize {
        (self.name.len() + 1) * size_of::<u16>()
    }

    fn is(&self, name: &[u16], vendor: &EfiGuid) -> bool {
        self.vendor == *vendor && self.name == name
    }
}

/// The firmware's variables.
#[derive(Debug, Default)]
pub struct VariableStore {
    variables: Vec<Variable>,
}

impl VariableStore {
    /// A store holding `variables`, in order. Later duplicates replace
    /// earlier ones.
    #[must_use]
    pub fn new(variables: impl IntoIterator<Item = Variable>) -> Self {
        let mut store = Self::default();
        for variable in variables {
            match store.position(&variable.name, &variable.vendor) {
                Some(at) => store.variables[at] = variable,
                None => store.variables.push(variable),
            }
        }
        store
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Returns `true` if the store holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    fn position(&self, name: &[u16], vendor: &EfiGuid) -> Option<usize> {
        self.variables.iter().position(|v| v.is(name, vendor))
    }

    /// Looks up a variable.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` if there is no such variable.
    pub fn get(&self, name: &[u16], vendor: &EfiGuid) -> Result<&Variable, EfiStatus> {
        self.variables
            .iter()
            .find(|v| v.is(name, vendor))
            .ok_or(EfiStatus::NOT_FOUND)
    }

    /// Creates, replaces, appends to or deletes a variable.
    ///
    /// Empty `data` or empty `attributes` deletes, unless appending. An
    /// append to a missing variable creates it.
    ///
    /// # Errors
    ///
    /// - `INVALID_PARAMETER` for an empty name, or for access attributes
    ///   that allow runtime access without boot services access.
    /// - `UNSUPPORTED` for authenticated writes and hardware error records.
    /// - `NOT_FOUND` when deleting a variable that does not exist.
    pub fn set(
        &mut self,
        name: &[u16],
        vendor: &EfiGuid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), EfiStatus> {
        if name.is_empty() {
            return Err(EfiStatus::INVALID_PARAMETER);
        }
        if attributes.intersects(UNSUPPORTED_ATTRIBUTES) {
            return Err(EfiStatus::UNSUPPORTED);
        }
        if attributes.contains(VariableAttributes::RUNTIME_ACCESS)
            && !attributes.contains(VariableAttributes::BOOTSERVICE_ACCESS)
        {
            return Err(EfiStatus::INVALID_PARAMETER);
        }

        let append = attributes.contains(VariableAttributes::APPEND_WRITE);
        let stored = attributes.difference(VariableAttributes::APPEND_WRITE);
        let existing = self.position(name, vendor);

        if append {
            match existing {
                Some(at) => self.variables[at].data.extend_from_slice(data),
                None if data.is_empty() => {}
                None => self.variables.push(Variable {
                    name: name.to_vec(),
                    vendor: *vendor,
                    attributes: stored,
                    data: data.to_vec(),
                }),
            }
            return Ok(());
        }

        if stored.is_empty() || data.is_empty() {
            let at = existing.ok_or(EfiStatus::NOT_FOUND)?;
            self.variables.remove(at);
            return Ok(());
        }

        let variable = Variable {
            name: name.to_vec(),
            vendor: *vendor,
            attributes: stored,
            data: data.to_vec(),
        };
        match existing {
            Some(at) => self.variables[at] = variable,
            None => self.variables.push(variable),
        }
        Ok(())
    }

    /// The variable after `name`/`vendor` in enumeration order; an empty
    /// `name` starts from the beginning.
    ///
    /// # Errors
    ///
    /// `INVALID_PARAMETER` if a non-empty `name` names no variable,
    /// `NOT_FOUND` once enumeration is complete.
    pub fn next_after(&self, name: &[u16], vendor: &EfiGuid) -> Result<&Variable, EfiStatus> {
        let next = if name.is_empty() {
            0
        } else {
            self.position(name, vendor).ok_or(EfiStatus::INVALID_PARAMETER)? + 1
        };
        self.variables.get(next).ok_or(EfiStatus::NOT_FOUND)
    }

    /// Iterates in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }
}
