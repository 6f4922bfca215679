//! In-memory identity store implementing [`WorldLookup`].
//!
//! The `World` tracks which entities exist, their names and hierarchy, the
//! ids they have, and component layouts. It stores no component data.
//! Collections are persistent (`im`) so cloning a world is cheap; the
//! keep-alive counters are shared between clones.

use std::sync::Arc;

use dashmap::DashMap;
use im::{HashMap, OrdSet, Vector};
use quarry_foundation::{
    BUILTIN_NAMES, Entity, Error, ErrorKind, FIRST_USER_INDEX, Id, MemberInfo, Result, TypeInfo,
};
use tracing::trace;

use crate::lookup::{PATH_SEPARATOR, Trait, WorldLookup};

/// Scope key for entities without a parent.
const ROOT_SCOPE: u32 = 0;

#[derive(Clone, Debug)]
struct EntityRecord {
    entity: Entity,
    name: Option<Arc<str>>,
    parent: Option<Entity>,
    ids: OrdSet<Id>,
    type_info: Option<TypeInfo>,
    member: Option<MemberInfo>,
}

impl EntityRecord {
    fn new(entity: Entity) -> Self {
        Self {
            entity,
            name: None,
            parent: None,
            ids: OrdSet::new(),
            type_info: None,
            member: None,
        }
    }
}

/// Identity store for entities, names, ids and component layouts.
///
/// Every world starts with the reserved entities (`ChildOf`, `IsA`, the
/// query variables and the traits) bootstrapped at their fixed indices.
#[derive(Clone, Debug)]
pub struct World {
    /// Live entity records by index.
    records: HashMap<u32, EntityRecord>,
    /// Name index: parent index (or root) to child name to entity.
    names: HashMap<u32, HashMap<Arc<str>, Entity>>,
    /// Generation to use the next time a freed index is reused.
    generations: HashMap<u32, u16>,
    /// Freed indices available for reuse.
    free_list: Vector<u32>,
    /// Next never-used index.
    next_index: u32,
    /// Number of entities that have each id.
    id_counts: HashMap<Id, usize>,
    /// Ids referenced by queries, shared across clones.
    keep_alive: Arc<DashMap<Id, u32>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world with the reserved entities bootstrapped.
    #[must_use]
    pub fn new() -> Self {
        let mut world = Self {
            records: HashMap::new(),
            names: HashMap::new(),
            generations: HashMap::new(),
            free_list: Vector::new(),
            next_index: FIRST_USER_INDEX,
            id_counts: HashMap::new(),
            keep_alive: Arc::new(DashMap::new()),
        };

        for &(entity, name) in BUILTIN_NAMES {
            let mut record = EntityRecord::new(entity);
            let name: Arc<str> = Arc::from(name);
            record.name = Some(Arc::clone(&name));
            world.records.insert(entity.index(), record);
            world
                .names
                .entry(ROOT_SCOPE)
                .or_insert_with(HashMap::new)
                .insert(name, entity);
        }

        world.bootstrap_traits(
            Entity::CHILD_OF,
            &[Trait::Acyclic, Trait::Traversable, Trait::Exclusive],
        );
        world.bootstrap_traits(
            Entity::IS_A,
            &[
                Trait::Transitive,
                Trait::Reflexive,
                Trait::Acyclic,
                Trait::Traversable,
            ],
        );
        if let Some(record) = world.records.get_mut(&Entity::IDENTIFIER.index()) {
            record.type_info = Some(TypeInfo::new(16, 8));
        }

        world
    }

    fn bootstrap_traits(&mut self, entity: Entity, traits: &[Trait]) {
        for t in traits {
            self.insert_id(entity, Id::from(t.entity()));
        }
    }

    /// Returns the number of live entities, reserved entities included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.records.len()
    }

    // --- Entity Operations ---

    /// Creates an anonymous entity.
    pub fn spawn(&mut self) -> Entity {
        let entity = if let Some(index) = self.free_list.pop_back() {
            let generation = self.generations.get(&index).copied().unwrap_or(1);
            Entity::new(index, generation)
        } else {
            let index = self.next_index;
            self.next_index += 1;
            Entity::new(index, 0)
        };
        self.records
            .insert(entity.index(), EntityRecord::new(entity));
        trace!(?entity, "spawned entity");
        entity
    }

    /// Creates a named entity in the root scope.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if the name is taken.
    pub fn entity(&mut self, name: &str) -> Result<Entity> {
        self.check_name_free(ROOT_SCOPE, name)?;
        let entity = self.spawn();
        self.set_name(entity, ROOT_SCOPE, name);
        Ok(entity)
    }

    /// Creates a named child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the parent is not alive, or
    /// `DuplicateName` if the parent already has a child with this name.
    pub fn child(&mut self, parent: Entity, name: &str) -> Result<Entity> {
        self.validate(parent)?;
        self.check_name_free(parent.index(), name)?;
        let entity = self.spawn();
        self.set_name(entity, parent.index(), name);
        self.insert_id(entity, Id::pair(Entity::CHILD_OF, parent));
        if let Some(record) = self.records.get_mut(&entity.index()) {
            record.parent = Some(parent);
        }
        Ok(entity)
    }

    /// Creates a named component with the given layout.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if the name is taken.
    pub fn component(&mut self, name: &str, type_info: TypeInfo) -> Result<Entity> {
        let entity = self.entity(name)?;
        self.set_type_info(entity, type_info)?;
        Ok(entity)
    }

    /// Sets the layout of an entity, turning it into a data component.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity is not alive.
    pub fn set_type_info(&mut self, entity: Entity, type_info: TypeInfo) -> Result<()> {
        self.validate(entity)?;
        if let Some(record) = self.records.get_mut(&entity.index()) {
            record.type_info = Some(type_info);
        }
        Ok(())
    }

    /// Declares a member of `component` at `offset` with the given layout.
    ///
    /// The member is a named child entity of the component.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the component is not alive, or
    /// `DuplicateName` if the component already has a member with this name.
    pub fn member(
        &mut self,
        component: Entity,
        name: &str,
        type_info: TypeInfo,
        offset: u32,
    ) -> Result<Entity> {
        let member = self.child(component, name)?;
        if let Some(record) = self.records.get_mut(&member.index()) {
            record.member = Some(MemberInfo::new(offset, type_info.size));
        }
        Ok(member)
    }

    /// Adds an id to an entity.
    ///
    /// Adding `(ChildOf, parent)` moves the entity (and its name) under `parent`.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity is not alive, or
    /// `DuplicateName` if reparenting collides with an existing child name.
    pub fn add(&mut self, entity: Entity, id: Id) -> Result<()> {
        self.validate(entity)?;
        if id.is_pair() && id.first() == Entity::CHILD_OF.index() {
            let parent = self
                .get_alive(id.second())
                .ok_or_else(|| Error::new(ErrorKind::EntityNotFound(Entity::new(id.second(), 0))))?;
            return self.reparent(entity, parent);
        }
        self.insert_id(entity, id);
        Ok(())
    }

    /// Adds the pair `(rel, target)` to an entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if any of the entities is not alive.
    pub fn add_pair(&mut self, entity: Entity, rel: Entity, target: Entity) -> Result<()> {
        self.validate(rel)?;
        self.validate(target)?;
        self.add(entity, Id::pair(rel, target))
    }

    /// Adds a trait to a relationship or component.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity is not alive.
    pub fn add_trait(&mut self, entity: Entity, t: Trait) -> Result<()> {
        self.add(entity, Id::from(t.entity()))
    }

    /// Makes `entity` inherit from `base` through `(IsA, base)`.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if either entity is not alive.
    pub fn is_a(&mut self, entity: Entity, base: Entity) -> Result<()> {
        self.add_pair(entity, Entity::IS_A, base)
    }

    /// Removes an id from an entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity is not alive.
    pub fn remove(&mut self, entity: Entity, id: Id) -> Result<()> {
        self.validate(entity)?;
        self.remove_id(entity, id);
        Ok(())
    }

    /// Deletes an entity and, recursively, its children.
    ///
    /// The index is recycled with a bumped generation.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity is not alive.
    pub fn delete(&mut self, entity: Entity) -> Result<()> {
        self.validate(entity)?;

        let children: Vec<Entity> = self
            .records
            .values()
            .filter(|record| record.parent == Some(entity))
            .map(|record| record.entity)
            .collect();
        for child in children {
            self.delete(child)?;
        }

        let Some(record) = self.records.remove(&entity.index()) else {
            return Err(Error::new(ErrorKind::EntityNotFound(entity)));
        };
        for id in &record.ids {
            self.decrement_id_count(*id);
        }
        if let Some(name) = &record.name {
            let scope = record.parent.map_or(ROOT_SCOPE, Entity::index);
            if let Some(names) = self.names.get_mut(&scope) {
                names.remove(name);
            }
        }
        self.names.remove(&entity.index());
        self.generations
            .insert(entity.index(), entity.generation().wrapping_add(1));
        self.free_list.push_back(entity.index());
        trace!(?entity, "deleted entity");
        Ok(())
    }

    /// Returns how many queries keep the id alive.
    #[must_use]
    pub fn keep_alive_count(&self, id: Id) -> u32 {
        self.keep_alive.get(&id).map_or(0, |count| *count)
    }

    // --- Internals ---

    fn validate(&self, entity: Entity) -> Result<()> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::EntityNotFound(entity)))
        }
    }

    fn check_name_free(&self, scope: u32, name: &str) -> Result<()> {
        let taken = self
            .names
            .get(&scope)
            .is_some_and(|names| names.contains_key(name));
        if taken {
            Err(Error::new(ErrorKind::DuplicateName(name.to_string())))
        } else {
            Ok(())
        }
    }

    fn set_name(&mut self, entity: Entity, scope: u32, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.names
            .entry(scope)
            .or_insert_with(HashMap::new)
            .insert(Arc::clone(&name), entity);
        if let Some(record) = self.records.get_mut(&entity.index()) {
            record.name = Some(name);
        }
    }

    fn reparent(&mut self, entity: Entity, parent: Entity) -> Result<()> {
        let Some(record) = self.records.get(&entity.index()).cloned() else {
            return Err(Error::new(ErrorKind::EntityNotFound(entity)));
        };
        if let Some(name) = &record.name {
            self.check_name_free(parent.index(), name)?;
            let old_scope = record.parent.map_or(ROOT_SCOPE, Entity::index);
            if let Some(names) = self.names.get_mut(&old_scope) {
                names.remove(name);
            }
            self.names
                .entry(parent.index())
                .or_insert_with(HashMap::new)
                .insert(Arc::clone(name), entity);
        }
        if let Some(old) = record.parent {
            self.remove_id(entity, Id::pair(Entity::CHILD_OF, old));
        }
        self.insert_id(entity, Id::pair(Entity::CHILD_OF, parent));
        if let Some(record) = self.records.get_mut(&entity.index()) {
            record.parent = Some(parent);
        }
        Ok(())
    }

    fn insert_id(&mut self, entity: Entity, id: Id) {
        let Some(record) = self.records.get_mut(&entity.index()) else {
            return;
        };
        if record.ids.insert(id).is_none() {
            *self.id_counts.entry(id).or_insert(0) += 1;
        }
    }

    fn remove_id(&mut self, entity: Entity, id: Id) {
        let Some(record) = self.records.get_mut(&entity.index()) else {
            return;
        };
        if record.ids.remove(&id).is_some() {
            self.decrement_id_count(id);
        }
    }

    fn decrement_id_count(&mut self, id: Id) {
        let remaining = match self.id_counts.get_mut(&id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            self.id_counts.remove(&id);
        }
    }

    fn lookup_in(&self, scope: u32, path: &str) -> Option<Entity> {
        let mut current = scope;
        let mut found = None;
        for segment in path.split(PATH_SEPARATOR) {
            let entity = *self.names.get(&current)?.get(segment)?;
            current = entity.index();
            found = Some(entity);
        }
        found
    }
}

/// Returns true if `id` matches `pattern`, treating `*` and `_` as wildcards.
fn id_matches(pattern: Id, id: Id) -> bool {
    if !pattern.is_wildcard() {
        return pattern == id;
    }
    let element = |p: u32, v: u32| {
        p == Entity::WILDCARD.index() || p == Entity::ANY.index() || p == v
    };
    if pattern.is_pair() {
        id.is_pair() && element(pattern.first(), id.first()) && element(pattern.second(), id.second())
    } else {
        !id.is_pair()
    }
}

impl WorldLookup for World {
    fn lookup(&self, name: &str) -> Option<Entity> {
        self.lookup_in(ROOT_SCOPE, name)
    }

    fn lookup_child(&self, parent: Entity, name: &str) -> Option<Entity> {
        self.lookup_in(parent.index(), name)
    }

    fn name(&self, entity: Entity) -> Option<&str> {
        self.records
            .get(&entity.index())
            .filter(|record| record.entity == entity)
            .and_then(|record| record.name.as_deref())
    }

    fn is_alive(&self, entity: Entity) -> bool {
        !entity.is_null()
            && self
                .records
                .get(&entity.index())
                .is_some_and(|record| record.entity == entity)
    }

    fn get_alive(&self, index: u32) -> Option<Entity> {
        self.records.get(&index).map(|record| record.entity)
    }

    fn has_id(&self, entity: Entity, id: Id) -> bool {
        let Some(record) = self
            .records
            .get(&entity.index())
            .filter(|record| record.entity == entity)
        else {
            return false;
        };
        if id.is_wildcard() {
            record.ids.iter().any(|&have| id_matches(id, have))
        } else {
            record.ids.contains(&id)
        }
    }

    fn type_of(&self, entity: Entity) -> Vec<Id> {
        self.records
            .get(&entity.index())
            .filter(|record| record.entity == entity)
            .map(|record| record.ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn type_info(&self, id: Id) -> Option<TypeInfo> {
        let of = |index: u32| self.records.get(&index).and_then(|record| record.type_info);
        if id.is_pair() {
            of(id.first()).or_else(|| of(id.second()))
        } else if id.is_null() {
            None
        } else {
            of(id.first())
        }
    }

    fn member(&self, entity: Entity) -> Option<MemberInfo> {
        self.records
            .get(&entity.index())
            .filter(|record| record.entity == entity)
            .and_then(|record| record.member)
    }

    fn parent(&self, entity: Entity) -> Option<Entity> {
        self.records
            .get(&entity.index())
            .filter(|record| record.entity == entity)
            .and_then(|record| record.parent)
    }

    fn id_in_use(&self, id: Id) -> bool {
        if id.is_wildcard() {
            self.id_counts.keys().any(|&have| id_matches(id, have))
        } else {
            self.id_counts.contains_key(&id)
        }
    }

    fn keep_alive(&self, id: Id) {
        *self.keep_alive.entry(id).or_insert(0) += 1;
    }
}
