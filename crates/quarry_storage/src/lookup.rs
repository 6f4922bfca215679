//! The read-only world capability consumed by query validation and compilation.

use quarry_foundation::{Entity, Id, MemberInfo, TypeInfo};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Separator between path segments in entity names (`parent.child`).
pub const PATH_SEPARATOR: &str = ".";

/// Traits that change how terms over a relationship or component compile.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Trait {
    /// `R(a, b), R(b, c)` implies `R(a, c)`.
    Transitive,
    /// `R(a, a)` always holds.
    Reflexive,
    /// The relationship graph has no cycles.
    Acyclic,
    /// The relationship can be traversed upwards.
    Traversable,
    /// At most one target per source.
    Exclusive,
    /// Stored as a union relationship.
    Union,
    /// Can be enabled/disabled per entity.
    CanToggle,
    /// Cannot be used as an IsA base.
    Final,
    /// Queries also match IsA subtypes.
    Inheritable,
    /// Instances inherit the component from their base.
    Inherit,
}

impl Trait {
    /// All traits, in declaration order.
    pub const ALL: [Trait; 10] = [
        Trait::Transitive,
        Trait::Reflexive,
        Trait::Acyclic,
        Trait::Traversable,
        Trait::Exclusive,
        Trait::Union,
        Trait::CanToggle,
        Trait::Final,
        Trait::Inheritable,
        Trait::Inherit,
    ];

    /// Returns the reserved entity that represents this trait.
    #[must_use]
    pub const fn entity(self) -> Entity {
        match self {
            Trait::Transitive => Entity::TRANSITIVE,
            Trait::Reflexive => Entity::REFLEXIVE,
            Trait::Acyclic => Entity::ACYCLIC,
            Trait::Traversable => Entity::TRAVERSABLE,
            Trait::Exclusive => Entity::EXCLUSIVE,
            Trait::Union => Entity::UNION,
            Trait::CanToggle => Entity::CAN_TOGGLE,
            Trait::Final => Entity::FINAL,
            Trait::Inheritable => Entity::INHERITABLE,
            Trait::Inherit => Entity::INHERIT,
        }
    }
}

/// Name resolution, trait and layout queries over the entity store.
///
/// Implementations must be cheap to call repeatedly: the validator asks
/// several questions per term. Everything except [`WorldLookup::keep_alive`]
/// is a pure read.
pub trait WorldLookup {
    /// Resolves a name (or `.`-separated path) from the root scope.
    fn lookup(&self, name: &str) -> Option<Entity>;

    /// Resolves a name (or path) relative to `parent`.
    fn lookup_child(&self, parent: Entity, name: &str) -> Option<Entity>;

    /// Returns the name of an entity.
    fn name(&self, entity: Entity) -> Option<&str>;

    /// Returns true if the entity exists with this exact generation.
    fn is_alive(&self, entity: Entity) -> bool;

    /// Returns the live entity currently occupying `index`.
    fn get_alive(&self, index: u32) -> Option<Entity>;

    /// Returns true if the entity has the id. Wildcards in `id` match any element.
    fn has_id(&self, entity: Entity, id: Id) -> bool;

    /// Returns the ids of an entity in ascending order.
    fn type_of(&self, entity: Entity) -> Vec<Id>;

    /// Returns the layout for an id, or `None` for tags.
    fn type_info(&self, id: Id) -> Option<TypeInfo>;

    /// Returns the layout of a component member entity.
    fn member(&self, entity: Entity) -> Option<MemberInfo>;

    /// Returns the `ChildOf` parent of an entity.
    fn parent(&self, entity: Entity) -> Option<Entity>;

    /// Returns true if any entity has the id. Wildcards in `id` match any element.
    fn id_in_use(&self, id: Id) -> bool;

    /// Marks the id as referenced by a query so that it outlives the query.
    fn keep_alive(&self, id: Id);

    /// Returns true if `entity` carries the trait.
    fn has_trait(&self, entity: Entity, t: Trait) -> bool {
        self.has_id(entity, Id::from(t.entity()))
    }

    /// Returns true if the relationship (or plain component) of `id` carries the trait.
    fn id_has_trait(&self, id: Id, t: Trait) -> bool {
        self.get_alive(id.first())
            .is_some_and(|first| self.has_trait(first, t))
    }

    /// Returns true if `entity` has the pair `(rel, target)`.
    fn has_pair(&self, entity: Entity, rel: Entity, target: Entity) -> bool {
        self.has_id(entity, Id::pair(rel, target))
    }

    /// Returns the first target of `rel` on `entity`.
    fn target(&self, entity: Entity, rel: Entity) -> Option<Entity> {
        self.type_of(entity)
            .into_iter()
            .find(|id| id.is_pair() && id.first() == rel.index())
            .and_then(|id| self.get_alive(id.second()))
    }

    /// Returns the scope that pair targets of `rel` must be children of.
    ///
    /// A plain `OneOf` tag scopes targets to the relationship itself; a
    /// `(OneOf, scope)` pair scopes them to `scope`.
    fn one_of(&self, rel: Entity) -> Option<Entity> {
        if self.has_id(rel, Id::from(Entity::ONE_OF)) {
            return Some(rel);
        }
        self.target(rel, Entity::ONE_OF)
    }

    /// Renders the full path of an entity, or `#index` when it has no name.
    fn path(&self, entity: Entity) -> String {
        let Some(name) = self.name(entity) else {
            return format!("#{}", entity.index());
        };
        match self.parent(entity) {
            Some(parent) => format!("{}{PATH_SEPARATOR}{name}", self.path(parent)),
            None => name.to_string(),
        }
    }
}
