//! Error types for the Quarry system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! Validation and compilation are all-or-nothing: every failure surfaces as
//! an [`Error`] carrying the index of the offending term and a rendering of
//! the whole term list.

use std::fmt;

use thiserror::Error;

use crate::entity::Entity;

/// The main error type for Quarry operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a conflicting reference flags error.
    #[must_use]
    pub fn conflicting_ref_flags(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConflictingRefFlags(message.into()))
    }

    /// Creates an unresolved identifier error.
    #[must_use]
    pub fn unresolved_identifier(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedIdentifier(name.into()))
    }

    /// Creates a pair/id mismatch error.
    #[must_use]
    pub fn mismatched_pair_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MismatchedPairId(message.into()))
    }

    /// Creates an invalid traversal error.
    #[must_use]
    pub fn invalid_traversal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTraversal(message.into()))
    }

    /// Creates an invalid operator combination error.
    #[must_use]
    pub fn invalid_operator(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperatorCombination(message.into()))
    }

    /// Creates an unbalanced scope error.
    #[must_use]
    pub fn unbalanced_scope(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnbalancedScope(message.into()))
    }

    /// Creates an unknown variable error.
    #[must_use]
    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownVariable(name.into()))
    }

    /// Creates an uninitialized variable error.
    #[must_use]
    pub fn uninitialized_variable(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UninitializedVariable(name.into()))
    }

    /// Creates an invalid term error.
    #[must_use]
    pub fn invalid_term(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTerm(message.into()))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns the index of the term that caused the error, if known.
    #[must_use]
    pub fn term_index(&self) -> Option<usize> {
        self.context.as_ref().and_then(|ctx| ctx.term_index)
    }

    /// Formats the error together with its context.
    #[must_use]
    pub fn report(&self) -> String {
        match &self.context {
            Some(context) => format!("{}\n{context}", self.kind),
            None => self.kind.to_string(),
        }
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A term reference carries flags or values that contradict each other.
    #[error("conflicting reference flags: {0}")]
    ConflictingRefFlags(String),

    /// A name could not be resolved to an entity.
    #[error("unresolved identifier '{0}'")]
    UnresolvedIdentifier(String),

    /// The term id does not agree with its first/second elements.
    #[error("mismatched pair id: {0}")]
    MismatchedPairId(String),

    /// A term id has no first element.
    #[error("missing first element in term id")]
    MissingFirstElement,

    /// A pair id has no second element.
    #[error("missing second element in term id")]
    MissingSecondElement,

    /// Traversal flags or relationship are not valid for the term.
    #[error("invalid traversal: {0}")]
    InvalidTraversal(String),

    /// Operators are combined in a way the compiler cannot express.
    #[error("invalid operator combination: {0}")]
    InvalidOperatorCombination(String),

    /// An acyclic, non-reflexive relationship uses the same source and target.
    #[error("term with acyclic relationship '{relationship}' cannot have the same source and target")]
    AcyclicSelfPair {
        /// Name of the relationship.
        relationship: String,
    },

    /// A pair target is outside the set allowed by the relationship.
    #[error("invalid target '{target}' for '{relationship}': must be child of '{scope}'")]
    InvalidTarget {
        /// Name of the rejected target.
        target: String,
        /// Name of the relationship.
        relationship: String,
        /// Name of the entity the target must be a child of.
        scope: String,
    },

    /// Scope braces do not balance.
    #[error("unbalanced scope: {0}")]
    UnbalancedScope(String),

    /// The last term of the query has the Or operator.
    #[error("last term of query can't have OR operator")]
    TrailingOr,

    /// The query has more terms than the configured limit.
    #[error("too many terms in query: {count} (limit {limit})")]
    MaxTermsExceeded {
        /// Number of terms that were requested.
        count: usize,
        /// The configured limit.
        limit: usize,
    },

    /// A variable is referenced but never defined.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// A variable is used before any instruction writes it.
    #[error("uninitialized variable '{0}'")]
    UninitializedVariable(String),

    /// The traversal relationship of a term could not be resolved.
    #[error("unresolved traversal relationship {0}")]
    UnresolvedTraversalRelationship(Entity),

    /// The query needs more variables than a variable set can hold.
    #[error("too many variables in query (limit {limit})")]
    TooManyVariables {
        /// The maximum number of variables.
        limit: usize,
    },

    /// The term is structurally invalid.
    #[error("invalid term: {0}")]
    InvalidTerm(String),

    /// Entity was not found in the world.
    #[error("entity not found: {0:?}")]
    EntityNotFound(Entity),

    /// A name is already taken in its scope.
    #[error("duplicate name '{0}'")]
    DuplicateName(String),

    /// Internal error (indicates a compiler bug, not a bad query).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Index of the offending term.
    pub term_index: Option<usize>,
    /// Rendering of the full term list with the offending term marked.
    pub query: Option<String>,
    /// Name of the query, if it has one.
    pub name: Option<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the offending term index.
    #[must_use]
    pub fn with_term(mut self, index: usize) -> Self {
        self.term_index = Some(index);
        self
    }

    /// Sets the rendered term list.
    #[must_use]
    pub fn with_query(mut self, rendered: impl Into<String>) -> Self {
        self.query = Some(rendered.into());
        self
    }

    /// Sets the query name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            writeln!(f, "in query '{name}'")?;
        }
        if let Some(query) = &self.query {
            write!(f, "{query}")?;
        } else if let Some(index) = self.term_index {
            write!(f, "at term {index}")?;
        }
        Ok(())
    }
}

/// Result type for Quarry operations.
pub type Result<T> = std::result::Result<T, Error>;
