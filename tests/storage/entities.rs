//! Integration tests for entity storage
//!
//! Tests naming, hierarchy, deletion, and generational indices.

use quarry_foundation::{Entity, ErrorKind, FIRST_USER_INDEX, Id, TypeInfo};
use quarry_storage::{World, WorldLookup};

// =============================================================================
// Entity Creation
// =============================================================================

#[test]
fn user_entities_start_after_reserved_range() {
    let mut world = World::new();
    let e = world.spawn();
    assert!(e.index() >= FIRST_USER_INDEX);
    assert!(world.is_alive(e));
}

#[test]
fn named_entities_are_unique_per_scope() {
    let mut world = World::new();
    let parent = world.entity("Parent").unwrap();
    world.entity("Child").unwrap();

    // Same name under a different parent is fine.
    let child = world.child(parent, "Child").unwrap();
    assert_eq!(world.parent(child), Some(parent));

    let err = world.entity("Child").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateName(ref name) if name == "Child"));
}

#[test]
fn components_carry_layout() {
    let mut world = World::new();
    let position = world.component("Position", TypeInfo::new(8, 4)).unwrap();
    let tag = world.entity("Tag").unwrap();

    assert_eq!(world.type_info(Id::from(position)), Some(TypeInfo::new(8, 4)));
    assert_eq!(world.type_info(Id::from(tag)), None);
}

#[test]
fn pair_layout_comes_from_relationship_then_target() {
    let mut world = World::new();
    let position = world.component("Position", TypeInfo::new(8, 4)).unwrap();
    let world_space = world.entity("World").unwrap();

    assert_eq!(
        world.type_info(Id::pair(position, world_space)),
        Some(TypeInfo::new(8, 4))
    );
    assert_eq!(
        world.type_info(Id::pair(world_space, position)),
        Some(TypeInfo::new(8, 4))
    );
}

#[test]
fn members_are_children_of_their_component() {
    let mut world = World::new();
    let position = world.component("Position", TypeInfo::new(8, 4)).unwrap();
    let y = World::member(&mut world, position, "y", TypeInfo::new(4, 4), 4).unwrap();

    assert_eq!(world.parent(y), Some(position));
    let member = WorldLookup::member(&world, y);
    assert_eq!(member.map(|m| (m.offset, m.size)), Some((4, 4)));
}

// =============================================================================
// Deletion
// =============================================================================

#[test]
fn delete_recycles_index_with_new_generation() {
    let mut world = World::new();
    let e = world.spawn();
    world.delete(e).unwrap();
    assert!(!world.is_alive(e));

    let reused = world.spawn();
    assert_eq!(reused.index(), e.index());
    assert_ne!(reused.generation(), e.generation());
    assert!(!world.is_alive(e));
}

#[test]
fn delete_removes_children_and_names() {
    let mut world = World::new();
    let parent = world.entity("Parent").unwrap();
    let child = world.child(parent, "Child").unwrap();

    world.delete(parent).unwrap();
    assert!(!world.is_alive(child));
    assert_eq!(world.lookup("Parent"), None);
    assert!(world.entity("Parent").is_ok());
}

#[test]
fn operations_on_dead_entity_fail() {
    let mut world = World::new();
    let e = world.spawn();
    world.delete(e).unwrap();

    let err = world.add(e, Id::from(Entity::PREFAB)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::EntityNotFound(_)));
}
