//! Component layout descriptors.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Size and alignment of a component type.
///
/// Components without type info are tags and never produce data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TypeInfo {
    /// Size in bytes.
    pub size: u32,
    /// Alignment in bytes.
    pub alignment: u32,
}

impl TypeInfo {
    /// Creates a type info with explicit size and alignment.
    #[must_use]
    pub const fn new(size: u32, alignment: u32) -> Self {
        Self { size, alignment }
    }

    /// Returns the layout of a Rust type, saturating at `u32::MAX`.
    #[must_use]
    pub fn of<T>() -> Self {
        let size = u32::try_from(std::mem::size_of::<T>()).unwrap_or(u32::MAX);
        let alignment = u32::try_from(std::mem::align_of::<T>()).unwrap_or(u32::MAX);
        Self { size, alignment }
    }
}

/// Layout of a single member of a component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemberInfo {
    /// Byte offset of the member inside the component.
    pub offset: u32,
    /// Size of the member in bytes.
    pub size: u32,
}

impl MemberInfo {
    /// Creates a member descriptor.
    #[must_use]
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }
}
