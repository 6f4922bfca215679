//! Integration tests for the world lookup capability
//!
//! Tests name and path resolution, wildcard id matching, traits, and keep-alive.

use quarry_foundation::{Entity, Id, TypeInfo};
use quarry_storage::{Trait, World, WorldLookup};

// =============================================================================
// Name Resolution
// =============================================================================

#[test]
fn builtin_names_resolve() {
    let world = World::new();
    assert_eq!(world.lookup("ChildOf"), Some(Entity::CHILD_OF));
    assert_eq!(world.lookup("*"), Some(Entity::WILDCARD));
    assert_eq!(world.name(Entity::IS_A), Some("IsA"));
}

#[test]
fn paths_resolve_through_scopes() {
    let mut world = World::new();
    let colors = world.entity("Colors").unwrap();
    let red = world.child(colors, "Red").unwrap();

    assert_eq!(world.lookup("Colors.Red"), Some(red));
    assert_eq!(world.lookup_child(colors, "Red"), Some(red));
    assert_eq!(world.lookup("Red"), None);
    assert_eq!(world.path(red), "Colors.Red");
}

#[test]
fn unnamed_entity_path_is_index() {
    let mut world = World::new();
    let e = world.spawn();
    assert_eq!(world.path(e), format!("#{}", e.index()));
}

// =============================================================================
// Id Matching
// =============================================================================

#[test]
fn has_id_matches_wildcards() {
    let mut world = World::new();
    let likes = world.entity("Likes").unwrap();
    let bob = world.entity("Bob").unwrap();
    let alice = world.entity("Alice").unwrap();
    world.add_pair(alice, likes, bob).unwrap();

    assert!(world.has_pair(alice, likes, bob));
    assert!(world.has_id(alice, Id::pair(likes, Entity::WILDCARD)));
    assert!(world.has_id(alice, Id::pair(Entity::ANY, bob)));
    assert!(!world.has_id(bob, Id::pair(likes, Entity::WILDCARD)));
    assert_eq!(world.target(alice, likes), Some(bob));
}

#[test]
fn id_in_use_tracks_removal() {
    let mut world = World::new();
    let tag = world.entity("Tag").unwrap();
    let e = world.spawn();
    world.add(e, Id::from(tag)).unwrap();
    assert!(world.id_in_use(Id::from(tag)));

    world.remove(e, Id::from(tag)).unwrap();
    assert!(!world.id_in_use(Id::from(tag)));
}

#[test]
fn type_of_is_sorted() {
    let mut world = World::new();
    let a = world.entity("A").unwrap();
    let b = world.entity("B").unwrap();
    let e = world.spawn();
    world.add(e, Id::from(b)).unwrap();
    world.add(e, Id::from(a)).unwrap();

    let ids = world.type_of(e);
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    assert_eq!(ids.len(), 2);
}

// =============================================================================
// Traits
// =============================================================================

#[test]
fn builtin_relationship_traits() {
    let world = World::new();
    assert!(world.has_trait(Entity::IS_A, Trait::Transitive));
    assert!(world.has_trait(Entity::IS_A, Trait::Reflexive));
    assert!(world.has_trait(Entity::CHILD_OF, Trait::Acyclic));
    assert!(world.has_trait(Entity::CHILD_OF, Trait::Traversable));
    assert!(!world.has_trait(Entity::CHILD_OF, Trait::Transitive));
}

#[test]
fn id_has_trait_uses_relationship() {
    let mut world = World::new();
    let likes = world.entity("Likes").unwrap();
    let bob = world.entity("Bob").unwrap();
    world.add_trait(likes, Trait::Union).unwrap();

    assert!(world.id_has_trait(Id::pair(likes, bob), Trait::Union));
    assert!(!world.id_has_trait(Id::from(bob), Trait::Union));
}

#[test]
fn one_of_scopes_targets() {
    let mut world = World::new();
    let color = world.entity("Color").unwrap();
    world.add(color, Id::from(Entity::ONE_OF)).unwrap();
    assert_eq!(world.one_of(color), Some(color));

    let palette = world.entity("Palette").unwrap();
    let tint = world.entity("Tint").unwrap();
    world.add_pair(tint, Entity::ONE_OF, palette).unwrap();
    assert_eq!(world.one_of(tint), Some(palette));
}

// =============================================================================
// Keep Alive
// =============================================================================

#[test]
fn keep_alive_counts_references() {
    let mut world = World::new();
    let position = world.component("Position", TypeInfo::new(8, 4)).unwrap();
    let id = Id::from(position);

    assert_eq!(world.keep_alive_count(id), 0);
    world.keep_alive(id);
    world.keep_alive(id);
    assert_eq!(world.keep_alive_count(id), 2);
}

#[test]
fn keep_alive_through_shared_reference() {
    let mut world = World::new();
    let position = world.component("Position", TypeInfo::new(8, 4)).unwrap();
    let id = Id::from(position);

    let shared = &world;
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| shared.keep_alive(id));
        }
    });
    assert_eq!(world.keep_alive_count(id), 4);
}
