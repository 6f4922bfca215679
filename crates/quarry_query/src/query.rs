//! Query descriptors and the validated query shape.

use std::fmt;

use quarry_foundation::{Error, ErrorKind, Id, Result};
use quarry_storage::WorldLookup;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::compiler::Compiler;
use crate::config::QueryOptions;
use crate::flags::bit_flags;
use crate::program::Program;
use crate::term::{Term, TermRef};
use crate::validator::Validator;

/// Raw input for a query: terms plus options.
#[derive(Clone, Debug, Default)]
pub struct QueryDesc {
    /// Terms in evaluation order.
    pub terms: Vec<Term>,
    /// Validation and compilation options.
    pub options: QueryOptions,
    /// Optional name, used in error reports.
    pub name: Option<String>,
}

impl QueryDesc {
    /// Creates an empty descriptor with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the options.
    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder method to set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method to append a term. The term limit is checked during validation.
    #[must_use]
    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    /// Appends a term.
    ///
    /// # Errors
    ///
    /// Returns `MaxTermsExceeded` if the descriptor is full.
    pub fn push(&mut self, term: Term) -> Result<()> {
        self.check_capacity(1)?;
        self.terms.push(term);
        Ok(())
    }

    /// Appends `first(a, b, c, ...)` as the chain `first(a, b), first(b, c), ...`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTerm` with fewer than two arguments, or
    /// `MaxTermsExceeded` if the chain doesn't fit.
    pub fn push_chain(&mut self, first: impl Into<TermRef>, args: &[TermRef]) -> Result<()> {
        if args.len() < 2 {
            return Err(Error::invalid_term(
                "relationship chain needs a source and at least one target",
            ));
        }
        self.check_capacity(args.len() - 1)?;
        let first = first.into();
        for window in args.windows(2) {
            self.terms.push(
                Term::pair(first.clone(), window[1].clone()).src(window[0].clone()),
            );
        }
        Ok(())
    }

    fn check_capacity(&self, additional: usize) -> Result<()> {
        let count = self.terms.len() + additional;
        let limit = self.options.term_limit();
        if count > limit {
            return Err(Error::new(ErrorKind::MaxTermsExceeded {
                count,
                limit,
            }));
        }
        Ok(())
    }
}

bit_flags! {
    /// Query-level flags derived by the validator and compiler.
    pub struct QueryFlags(u32) {
        /// At least one term matches with a wildcard.
        const MATCH_WILDCARDS = 1 << 0;
        /// Prefab entities are matched.
        const MATCH_PREFAB = 1 << 1;
        /// Disabled entities are matched.
        const MATCH_DISABLED = 1 << 2;
        /// At least one term matches `$this`.
        const MATCH_THIS = 1 << 3;
        /// Every term matches `$this`.
        const MATCH_ONLY_THIS = 1 << 4;
        /// Every term matches `$this` on the entity itself.
        const MATCH_ONLY_SELF = 1 << 5;
        /// Every term has a 0 source.
        const MATCH_NOTHING = 1 << 6;
        /// The query uses builtin predicates.
        const HAS_PRED = 1 << 7;
        /// The query uses `{ }` scopes.
        const HAS_SCOPES = 1 << 8;
        /// The query has Not or Optional terms, so fields may be unset.
        const HAS_COND_SET = 1 << 9;
        /// At least one term is cacheable.
        const HAS_CACHEABLE = 1 << 10;
        /// Every term is cacheable.
        const IS_CACHEABLE = 1 << 11;
        /// The query can be evaluated without the instruction program.
        const IS_TRIVIAL = 1 << 12;
        /// `$this` is bound as a table variable.
        const HAS_TABLE_THIS_VAR = 1 << 13;
    }
}

/// Bitset over field indices.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldSet(u64);

impl FieldSet {
    /// The empty set.
    pub const EMPTY: FieldSet = FieldSet(0);

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

    /// Adds a field.
    pub fn insert(&mut self, field: u8) {
        self.0 |= 1 << field;
    }

    /// Removes a field.
    pub fn remove(&mut self, field: u8) {
        self.0 &= !(1 << field);
    }

    /// Returns true if the field is in the set.
    #[must_use]
    pub const fn contains(self, field: u8) -> bool {
        self.0 & (1 << field) != 0
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the number of fields in the set.
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns the fields in either set.
    #[must_use]
    pub const fn union(self, other: FieldSet) -> FieldSet {
        FieldSet(self.0 | other.0)
    }

    /// Returns the fields in `self` that are not in `other`.
    #[must_use]
    pub const fn difference(self, other: FieldSet) -> FieldSet {
        FieldSet(self.0 & !other.0)
    }

    /// Iterates the fields in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0u8..64).filter(move |&field| self.contains(field))
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The id and data size reported for a result field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldInfo {
    /// Id matched by the field, or 0 when an OR chain mixes types.
    pub id: Id,
    /// Size of the field's data, 0 for tags.
    pub size: u32,
}

/// A validated query: normalized terms plus the result shape.
#[derive(Clone, Debug, Default)]
pub struct Query {
    /// Validated terms.
    pub terms: Vec<Term>,
    /// Query flags.
    pub flags: QueryFlags,
    /// Number of result fields.
    pub field_count: u8,
    /// Id and size per field.
    pub fields: Vec<FieldInfo>,
    /// Fields whose id is known before matching.
    pub static_id_fields: FieldSet,
    /// Fields that provide data.
    pub data_fields: FieldSet,
    /// Fields that are always set when a result is returned.
    pub set_fields: FieldSet,
    /// Fields matched on a fixed entity.
    pub fixed_fields: FieldSet,
    /// Fields matched on a variable other than `$this`.
    pub var_fields: FieldSet,
    /// Options the query was validated with.
    pub options: QueryOptions,
    /// Optional name.
    pub name: Option<String>,
}

impl Query {
    /// Returns the number of terms.
    #[must_use]
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Returns true if the query can be evaluated by the trivial iterator.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.flags.contains(QueryFlags::IS_TRIVIAL)
    }

    /// Returns true if the query result can be fully cached.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.flags.contains(QueryFlags::IS_CACHEABLE)
    }
}

/// A query that went through validation and compilation.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    /// The validated query.
    pub query: Query,
    /// The instruction program.
    pub program: Program,
}

impl CompiledQuery {
    /// Validates and compiles a query.
    ///
    /// # Errors
    ///
    /// Returns the first validation or compilation error, with the failing
    /// term marked in the error context.
    pub fn new(world: &impl WorldLookup, desc: &QueryDesc) -> Result<Self> {
        let query = Validator::finalize(world, desc)?;
        let program = Compiler::compile(world, &query)?;
        Ok(Self { query, program })
    }
}
