//! Entity and component identifiers.
//!
//! An [`Entity`] names anything stored in the world: components, tags,
//! relationships, and plain entities. An [`Id`] is what a table can "have":
//! either a plain entity or a pair of two entities (relationship, target).

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;
const GENERATION_MASK: u64 = 0xFFFF;
const PAIR_FLAG: u64 = 1 << 63;

/// Entity identifier with a generational index.
///
/// # Layout
/// - bits 0..32: index into entity storage
/// - bits 32..48: generation counter, bumped when an index is recycled
///
/// The value `0` is reserved and means "no entity".
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entity(u64);

impl Entity {
    /// The "no entity" value.
    pub const NULL: Entity = Entity(0);

    /// Creates an entity from an index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u16) -> Self {
        Self(((generation as u64) << GENERATION_SHIFT) | index as u64)
    }

    /// Creates an entity from its raw 64-bit representation.
    ///
    /// Bits outside the index and generation are discarded.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw & ((GENERATION_MASK << GENERATION_SHIFT) | INDEX_MASK))
    }

    /// Returns the raw 64-bit representation.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the storage index.
    #[must_use]
    pub const fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    /// Returns the generation counter.
    #[must_use]
    pub const fn generation(self) -> u16 {
        ((self.0 >> GENERATION_SHIFT) & GENERATION_MASK) as u16
    }

    /// Returns true if this is the null entity.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index())
    }
}

/// Component id: a plain entity or a `(first, second)` pair.
///
/// Pairs store the 32-bit indices of both elements, so resolving a pair
/// element back to a live [`Entity`] requires the world.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Id(u64);

impl Id {
    /// The empty id.
    pub const NULL: Id = Id(0);

    /// Creates a pair id.
    #[must_use]
    pub const fn pair(first: Entity, second: Entity) -> Self {
        Self::pair_from_indices(first.index(), second.index())
    }

    /// Creates a pair id from raw element indices.
    #[must_use]
    pub const fn pair_from_indices(first: u32, second: u32) -> Self {
        Self(PAIR_FLAG | ((first as u64) << 32) | second as u64)
    }

    /// Creates an id from its raw representation.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw representation.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns true if this id is a pair.
    #[must_use]
    pub const fn is_pair(self) -> bool {
        self.0 & PAIR_FLAG != 0
    }

    /// Returns true if this is the empty id.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Index of the first pair element, or of the entity for plain ids.
    #[must_use]
    pub const fn first(self) -> u32 {
        if self.is_pair() {
            ((self.0 & !PAIR_FLAG) >> 32) as u32
        } else {
            (self.0 & INDEX_MASK) as u32
        }
    }

    /// Index of the second pair element, `0` for plain ids.
    #[must_use]
    pub const fn second(self) -> u32 {
        if self.is_pair() {
            (self.0 & INDEX_MASK) as u32
        } else {
            0
        }
    }

    /// Returns the entity for a plain id.
    #[must_use]
    pub const fn entity(self) -> Option<Entity> {
        if self.is_pair() || self.0 == 0 {
            None
        } else {
            Some(Entity::from_raw(self.0))
        }
    }

    /// Returns true if the id contains `*` or `_` in any position.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        if self.is_pair() {
            is_wildcard_index(self.first()) || is_wildcard_index(self.second())
        } else {
            is_wildcard_index(self.first())
        }
    }

    /// Returns true if the id contains `_` in any position.
    #[must_use]
    pub const fn is_any(self) -> bool {
        let any = Entity::ANY.index();
        if self.is_pair() {
            self.first() == any || self.second() == any
        } else {
            self.first() == any
        }
    }
}

const fn is_wildcard_index(index: u32) -> bool {
    index == Entity::WILDCARD.index() || index == Entity::ANY.index()
}

impl From<Entity> for Id {
    fn from(entity: Entity) -> Self {
        Self(entity.raw())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pair() {
            write!(f, "Id(#{}, #{})", self.first(), self.second())
        } else {
            write!(f, "Id(#{})", self.first())
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pair() {
            write!(f, "(#{}, #{})", self.first(), self.second())
        } else {
            write!(f, "#{}", self.first())
        }
    }
}
