//! Query variable identifiers and fixed-size variable sets.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not, Sub};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Maximum number of variables a single query can allocate.
pub const MAX_VARIABLES: usize = 64;

/// Dense index of a query variable.
///
/// Index 0 is reserved for the implicit `$this` table variable.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VarId(u8);

impl VarId {
    /// The implicit `$this` table variable.
    pub const THIS: VarId = VarId(0);

    /// Creates a variable id, failing if it doesn't fit in a [`VarSet`].
    ///
    /// # Errors
    ///
    /// Returns `TooManyVariables` when `index >= MAX_VARIABLES`.
    pub fn new(index: usize) -> Result<Self> {
        u8::try_from(index)
            .ok()
            .filter(|&i| usize::from(i) < MAX_VARIABLES)
            .map(Self)
            .ok_or_else(|| {
                Error::new(ErrorKind::TooManyVariables {
                    limit: MAX_VARIABLES,
                })
            })
    }

    /// Returns the dense index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarId({})", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Bitset over [`VarId`]s.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VarSet(u64);

impl VarSet {
    /// The empty set.
    pub const EMPTY: VarSet = VarSet(0);

    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Creates a set containing a single variable.
    #[must_use]
    pub const fn single(var: VarId) -> Self {
        Self(1 << var.0)
    }

    /// Creates a set from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Adds a variable.
    pub fn insert(&mut self, var: VarId) {
        self.0 |= 1 << var.0;
    }

    /// Removes a variable.
    pub fn remove(&mut self, var: VarId) {
        self.0 &= !(1 << var.0);
    }

    /// Returns true if the variable is in the set.
    #[must_use]
    pub const fn contains(self, var: VarId) -> bool {
        self.0 & (1 << var.0) != 0
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the number of variables in the set.
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns true if both sets share a variable.
    #[must_use]
    pub const fn intersects(self, other: VarSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Iterates the variables in ascending order.
    pub fn iter(self) -> impl Iterator<Item = VarId> {
        (0..MAX_VARIABLES)
            .filter(move |&i| self.0 & (1 << i) != 0)
            .map(|i| VarId(i as u8))
    }
}

impl BitOr for VarSet {
    type Output = VarSet;

    fn bitor(self, rhs: VarSet) -> VarSet {
        VarSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for VarSet {
    fn bitor_assign(&mut self, rhs: VarSet) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for VarSet {
    type Output = VarSet;

    fn bitand(self, rhs: VarSet) -> VarSet {
        VarSet(self.0 & rhs.0)
    }
}

impl Sub for VarSet {
    type Output = VarSet;

    fn sub(self, rhs: VarSet) -> VarSet {
        VarSet(self.0 & !rhs.0)
    }
}

impl Not for VarSet {
    type Output = VarSet;

    fn not(self) -> VarSet {
        VarSet(!self.0)
    }
}

impl FromIterator<VarId> for VarSet {
    fn from_iter<I: IntoIterator<Item = VarId>>(iter: I) -> Self {
        let mut set = VarSet::new();
        for var in iter {
            set.insert(var);
        }
        set
    }
}

impl fmt::Debug for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
