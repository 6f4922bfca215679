//! Reserved entities that exist in every world.
//!
//! These occupy fixed low indices so the query layer can compare against
//! them without a world lookup.

use crate::entity::Entity;

impl Entity {
    // =========================================================================
    // Query variables
    // =========================================================================

    /// `*`: matches any id, yielding every match.
    pub const WILDCARD: Entity = Entity::new(1, 0);
    /// `_`: matches any id, yielding the first match.
    pub const ANY: Entity = Entity::new(2, 0);
    /// `$this`: the implicit query source.
    pub const THIS: Entity = Entity::new(3, 0);
    /// `$`: the singleton idiom, replaced by the predicate.
    pub const VARIABLE: Entity = Entity::new(4, 0);

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Hierarchy relationship.
    pub const CHILD_OF: Entity = Entity::new(5, 0);
    /// Inheritance relationship.
    pub const IS_A: Entity = Entity::new(6, 0);

    // =========================================================================
    // Query markers and predicates
    // =========================================================================

    /// Opens a term scope (`{`).
    pub const SCOPE_OPEN: Entity = Entity::new(7, 0);
    /// Closes a term scope (`}`).
    pub const SCOPE_CLOSE: Entity = Entity::new(8, 0);
    /// Equality predicate (`$x == y`).
    pub const PRED_EQ: Entity = Entity::new(9, 0);
    /// Name match predicate (`$x ~= "pattern"`).
    pub const PRED_MATCH: Entity = Entity::new(10, 0);
    /// Lookup predicate (`$x.child`).
    pub const PRED_LOOKUP: Entity = Entity::new(11, 0);

    // =========================================================================
    // Builtin components and tags
    // =========================================================================

    /// Identifier component, paired with [`Entity::NAME`].
    pub const IDENTIFIER: Entity = Entity::new(12, 0);
    /// Name target for [`Entity::IDENTIFIER`].
    pub const NAME: Entity = Entity::new(13, 0);
    /// Tag for prefab entities, skipped by queries by default.
    pub const PREFAB: Entity = Entity::new(14, 0);
    /// Tag for disabled entities, skipped by queries by default.
    pub const DISABLED: Entity = Entity::new(15, 0);

    // =========================================================================
    // Traits
    // =========================================================================

    /// `R(a, b), R(b, c)` implies `R(a, c)`.
    pub const TRANSITIVE: Entity = Entity::new(16, 0);
    /// `R(a, a)` always holds.
    pub const REFLEXIVE: Entity = Entity::new(17, 0);
    /// The relationship graph has no cycles.
    pub const ACYCLIC: Entity = Entity::new(18, 0);
    /// The relationship can be used for up traversal.
    pub const TRAVERSABLE: Entity = Entity::new(19, 0);
    /// An entity can have at most one target for the relationship.
    pub const EXCLUSIVE: Entity = Entity::new(20, 0);
    /// The relationship is stored as a union.
    pub const UNION: Entity = Entity::new(21, 0);
    /// The component can be enabled/disabled per entity.
    pub const CAN_TOGGLE: Entity = Entity::new(22, 0);
    /// The entity cannot be inherited from.
    pub const FINAL: Entity = Entity::new(23, 0);
    /// Queries for the component also match its IsA subtypes.
    pub const INHERITABLE: Entity = Entity::new(24, 0);
    /// Instances inherit the component from their IsA base.
    pub const INHERIT: Entity = Entity::new(25, 0);
    /// Pair targets must be children of the relationship's OneOf entity.
    pub const ONE_OF: Entity = Entity::new(26, 0);
}

/// First index available to user entities.
pub const FIRST_USER_INDEX: u32 = 64;

/// Names of the reserved entities, in index order.
pub const BUILTIN_NAMES: &[(Entity, &str)] = &[
    (Entity::WILDCARD, "*"),
    (Entity::ANY, "_"),
    (Entity::THIS, "this"),
    (Entity::VARIABLE, "$"),
    (Entity::CHILD_OF, "ChildOf"),
    (Entity::IS_A, "IsA"),
    (Entity::SCOPE_OPEN, "{"),
    (Entity::SCOPE_CLOSE, "}"),
    (Entity::PRED_EQ, "PredEq"),
    (Entity::PRED_MATCH, "PredMatch"),
    (Entity::PRED_LOOKUP, "PredLookup"),
    (Entity::IDENTIFIER, "Identifier"),
    (Entity::NAME, "Name"),
    (Entity::PREFAB, "Prefab"),
    (Entity::DISABLED, "Disabled"),
    (Entity::TRANSITIVE, "Transitive"),
    (Entity::REFLEXIVE, "Reflexive"),
    (Entity::ACYCLIC, "Acyclic"),
    (Entity::TRAVERSABLE, "Traversable"),
    (Entity::EXCLUSIVE, "Exclusive"),
    (Entity::UNION, "Union"),
    (Entity::CAN_TOGGLE, "CanToggle"),
    (Entity::FINAL, "Final"),
    (Entity::INHERITABLE, "Inheritable"),
    (Entity::INHERIT, "Inherit"),
    (Entity::ONE_OF, "OneOf"),
];

impl Entity {
    /// Returns true for the builtin query variables (`*`, `_`, `this`, `$`).
    #[must_use]
    pub const fn is_builtin_variable(self) -> bool {
        let index = self.index();
        self.generation() == 0
            && (index == Entity::WILDCARD.index()
                || index == Entity::ANY.index()
                || index == Entity::THIS.index()
                || index == Entity::VARIABLE.index())
    }

    /// Returns true for the builtin predicates.
    #[must_use]
    pub const fn is_builtin_predicate(self) -> bool {
        let index = self.index();
        self.generation() == 0
            && (index == Entity::PRED_EQ.index()
                || index == Entity::PRED_MATCH.index()
                || index == Entity::PRED_LOOKUP.index())
    }
}
