//! Options that change how a query is validated and compiled.

/// Default upper bound on the number of terms in one query.
pub const DEFAULT_MAX_TERMS: usize = 32;

/// Hard upper bound on the number of terms. Term and field sets are 64-bit masks.
pub const MAX_TERMS: usize = 64;

/// Configuration for validating and compiling a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    /// Keep names that don't resolve to an entity as literal names instead of failing.
    pub allow_unresolved_by_name: bool,

    /// Also match prefab entities.
    pub match_prefab: bool,

    /// Also match disabled entities.
    pub match_disabled: bool,

    /// Only match tables; skip per-entity toggle evaluation.
    pub table_only: bool,

    /// Maximum number of terms, including terms added by desugaring.
    ///
    /// Values above [`MAX_TERMS`] are treated as [`MAX_TERMS`].
    pub max_terms: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            allow_unresolved_by_name: false,
            match_prefab: false,
            match_disabled: false,
            table_only: false,
            max_terms: DEFAULT_MAX_TERMS,
        }
    }
}

impl QueryOptions {
    /// Creates options that accept unresolved names and match every kind of table.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allow_unresolved_by_name: true,
            match_prefab: true,
            match_disabled: true,
            ..Self::default()
        }
    }

    /// Builder method to accept unresolved names.
    #[must_use]
    pub fn with_allow_unresolved_by_name(mut self, allow: bool) -> Self {
        self.allow_unresolved_by_name = allow;
        self
    }

    /// Builder method to match prefab entities.
    #[must_use]
    pub fn with_match_prefab(mut self, match_prefab: bool) -> Self {
        self.match_prefab = match_prefab;
        self
    }

    /// Builder method to match disabled entities.
    #[must_use]
    pub fn with_match_disabled(mut self, match_disabled: bool) -> Self {
        self.match_disabled = match_disabled;
        self
    }

    /// Builder method to only match tables.
    #[must_use]
    pub fn with_table_only(mut self, table_only: bool) -> Self {
        self.table_only = table_only;
        self
    }

    /// Builder method to set the term limit, clamped to [`MAX_TERMS`].
    #[must_use]
    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.max_terms = max_terms.min(MAX_TERMS);
        self
    }

    /// Returns the effective term limit.
    #[must_use]
    pub fn term_limit(&self) -> usize {
        self.max_terms.min(MAX_TERMS)
    }
}
