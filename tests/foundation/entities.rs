//! Integration tests for Entity and Id
//!
//! Tests identifier layout, pair encoding, wildcards, and the reserved entities.

use quarry_foundation::{BUILTIN_NAMES, Entity, FIRST_USER_INDEX, Id};

// =============================================================================
// Entity Layout
// =============================================================================

#[test]
fn entity_index_and_generation() {
    let e = Entity::new(1000, 7);
    assert_eq!(e.index(), 1000);
    assert_eq!(e.generation(), 7);
}

#[test]
fn recycled_index_is_a_different_entity() {
    let old = Entity::new(70, 0);
    let new = Entity::new(70, 1);
    assert_ne!(old, new);
    assert_eq!(old.index(), new.index());
}

#[test]
fn null_entity() {
    assert!(Entity::NULL.is_null());
    assert!(Entity::default().is_null());
    assert!(!Entity::THIS.is_null());
}

// =============================================================================
// Id Encoding
// =============================================================================

#[test]
fn plain_id_wraps_entity() {
    let e = Entity::new(100, 2);
    let id = Id::from(e);
    assert!(!id.is_pair());
    assert_eq!(id.first(), 100);
    assert_eq!(id.second(), 0);
    assert_eq!(id.entity(), Some(e));
}

#[test]
fn pair_id_elements() {
    let rel = Entity::new(100, 0);
    let target = Entity::new(200, 0);
    let id = Id::pair(rel, target);
    assert!(id.is_pair());
    assert_eq!(id.first(), 100);
    assert_eq!(id.second(), 200);
    assert_eq!(id.entity(), None);
}

#[test]
fn pair_and_plain_ids_differ() {
    let e = Entity::new(100, 0);
    assert_ne!(Id::from(e), Id::pair(e, Entity::NULL));
}

#[test]
fn id_display() {
    let rel = Entity::new(100, 0);
    let target = Entity::new(200, 0);
    assert_eq!(Id::pair(rel, target).to_string(), "(#100, #200)");
    assert_eq!(Id::from(rel).to_string(), "#100");
}

// =============================================================================
// Wildcards
// =============================================================================

#[test]
fn wildcard_ids() {
    let rel = Entity::new(100, 0);
    assert!(Id::from(Entity::WILDCARD).is_wildcard());
    assert!(Id::from(Entity::ANY).is_wildcard());
    assert!(Id::pair(rel, Entity::WILDCARD).is_wildcard());
    assert!(Id::pair(Entity::WILDCARD, rel).is_wildcard());
    assert!(!Id::pair(rel, rel).is_wildcard());
}

#[test]
fn any_ids() {
    let rel = Entity::new(100, 0);
    assert!(Id::pair(rel, Entity::ANY).is_any());
    assert!(!Id::pair(rel, Entity::WILDCARD).is_any());
}

// =============================================================================
// Reserved Entities
// =============================================================================

#[test]
fn reserved_entities_are_below_user_range() {
    for (entity, name) in BUILTIN_NAMES {
        assert!(entity.index() < FIRST_USER_INDEX, "{name} is not reserved");
    }
}

#[test]
fn builtin_variables() {
    assert!(Entity::WILDCARD.is_builtin_variable());
    assert!(Entity::ANY.is_builtin_variable());
    assert!(Entity::THIS.is_builtin_variable());
    assert!(Entity::VARIABLE.is_builtin_variable());
    assert!(!Entity::CHILD_OF.is_builtin_variable());
}

#[test]
fn builtin_predicates() {
    assert!(Entity::PRED_EQ.is_builtin_predicate());
    assert!(Entity::PRED_MATCH.is_builtin_predicate());
    assert!(Entity::PRED_LOOKUP.is_builtin_predicate());
    assert!(!Entity::IS_A.is_builtin_predicate());
}
