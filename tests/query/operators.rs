//! Integration tests for traversal, relationship traits, scopes and predicates
//!
//! Tests the opcode each term shape compiles to.

use quarry_foundation::{Entity, Id, TypeInfo, VarId};
use quarry_query::{OpKind, Operand, Payload, Term, TermRef, VarKind, VarRef};
use quarry_storage::Trait;

use crate::common::{compile, fixture};

// =============================================================================
// Traversal
// =============================================================================

#[test]
fn up_traversal_uses_fixed_id() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::new(f.velocity), Term::new(f.position).up(Entity::CHILD_OF)],
    )
    .unwrap();
    let program = &compiled.program;

    assert_eq!(program.match_kinds(), vec![OpKind::AndId, OpKind::UpId]);
    assert_eq!(program.count(OpKind::Populate), 1);
    assert_eq!(program.count(OpKind::PopulateSelf), 0);
}

#[test]
fn self_up_traversal_uses_fixed_id() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::new(f.velocity), Term::new(f.position).self_up(Entity::CHILD_OF)],
    )
    .unwrap();
    assert_eq!(compiled.program.match_kinds(), vec![OpKind::AndId, OpKind::SelfUpId]);
}

// =============================================================================
// Relationship Traits
// =============================================================================

#[test]
fn unconstrained_transitive_term_finds_targets_first() {
    let mut f = fixture();
    let located_in = f.world.entity("LocatedIn").unwrap();
    f.world.add_trait(located_in, Trait::Transitive).unwrap();

    let compiled = compile(&f.world, [Term::pair(located_in, TermRef::var("y"))]).unwrap();
    let program = &compiled.program;
    assert_eq!(
        program.match_kinds(),
        vec![OpKind::IdsRight, OpKind::And, OpKind::Trav]
    );

    let ids = &program.ops[0];
    let and = &program.ops[1];
    assert_eq!(ids.first, Operand::Literal(Id::from(located_in)));
    let target = ids.second.var().unwrap();
    assert!(program.vars.is_anonymous(target));
    assert_eq!(program.vars.display_name(target), format!("$[y]{}", target.index()));
    assert_eq!(and.second, ids.second);
    assert!(and.is_self);
}

#[test]
fn union_relationship_uses_union_ops() {
    let mut f = fixture();
    let movement = f.world.entity("Movement").unwrap();
    let walking = f.world.entity("Walking").unwrap();
    f.world.add_trait(movement, Trait::Union).unwrap();

    let eq = compile(
        &f.world,
        [Term::new(f.position), Term::pair(movement, walking)],
    )
    .unwrap();
    assert_eq!(eq.program.match_kinds(), vec![OpKind::AndId, OpKind::UnionEq]);

    let neq = compile(
        &f.world,
        [Term::new(f.position), Term::pair(movement, walking).not()],
    )
    .unwrap();
    assert_eq!(neq.program.match_kinds(), vec![OpKind::AndId, OpKind::UnionNeq]);
    assert_eq!(neq.program.count(OpKind::Not), 0);
}

// =============================================================================
// Self References
// =============================================================================

#[test]
fn source_reused_as_target_checks_containment() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::pair(f.likes, TermRef::var("x")).src(TermRef::var("x"))],
    )
    .unwrap();
    let program = &compiled.program;

    let and = program.ops.iter().position(|op| op.kind == OpKind::And).unwrap();
    let contain = &program.ops[and + 1];
    assert_eq!(contain.kind, OpKind::Contain);

    let table = program.vars.find(VarRef::Named("x"), VarKind::Table).unwrap();
    let entity = program.vars.find(VarRef::Named("x"), VarKind::Entity).unwrap();
    assert_eq!(program.ops[and].src, Operand::Var(table));
    assert_eq!(program.ops[and].second, Operand::Var(entity));
    assert_eq!(contain.src, Operand::Var(table));
    assert_eq!(contain.first, Operand::Var(entity));
}

#[test]
fn relationship_reused_as_target_checks_pair_equality() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::pair(TermRef::var("r"), TermRef::var("r"))],
    )
    .unwrap();
    let program = &compiled.program;

    let and = program.ops.iter().position(|op| op.kind == OpKind::And).unwrap();
    let r = program.vars.find(VarRef::Named("r"), VarKind::Entity).unwrap();
    assert_eq!(program.ops[and].first, Operand::Var(r));
    assert_eq!(program.ops[and].second, Operand::Var(r));
    assert_eq!(program.ops[and].src, Operand::Var(VarId::THIS));

    let eq = &program.ops[and + 1];
    assert_eq!(eq.kind, OpKind::PairEq);
    assert_eq!(eq.field_index, Some(0));
    assert_eq!(program.count(OpKind::Contain), 0);
}

// =============================================================================
// Any Source
// =============================================================================

#[test]
fn any_source_with_unbound_relationship_lists_ids() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::new(TermRef::var("r")).src(Entity::ANY)],
    )
    .unwrap();
    let program = &compiled.program;

    let ids = program.ops.iter().find(|op| op.kind == OpKind::IdsLeft).unwrap();
    let r = program.vars.find(VarRef::Named("r"), VarKind::Entity).unwrap();
    assert_eq!(ids.first, Operand::Var(r));
    assert_eq!(ids.src, Operand::Unset);
    assert!(ids.written.contains(r));
    assert_eq!(program.count(OpKind::IdsRight), 0);
}

#[test]
fn any_id_on_unbound_this_matches_any_table() {
    let f = fixture();
    let compiled = compile(&f.world, [Term::new(Entity::ANY)]).unwrap();
    let only = compiled
        .program
        .ops
        .iter()
        .find(|op| op.kind == OpKind::OnlyAny)
        .unwrap();
    assert_eq!(only.src, Operand::Var(VarId::THIS));
    assert_eq!(compiled.program.count(OpKind::AndAny), 0);

    let bound = compile(&f.world, [Term::new(f.position), Term::new(Entity::ANY)]).unwrap();
    assert_eq!(bound.program.count(OpKind::OnlyAny), 0);
    assert_eq!(bound.program.count(OpKind::AndAny), 1);
}

// =============================================================================
// Member Terms
// =============================================================================

#[test]
fn negated_member_term_compares_inside_ifset() {
    let mut f = fixture();
    let y = f.world.member(f.position, "y", TypeInfo::new(4, 4), 4).unwrap();
    let ten = f.world.entity("Ten").unwrap();

    let compiled = compile(
        &f.world,
        [Term::new(f.velocity), Term::pair(y, ten).not()],
    )
    .unwrap();
    let program = &compiled.program;
    program.check_blocks().unwrap();

    // The component itself is optional: entities without it don't match the member.
    assert_eq!(program.count(OpKind::Not), 0);
    let optional = program.ops.iter().position(|op| op.kind == OpKind::Optional).unwrap();
    assert_eq!(program.ops[optional + 1].first, Operand::Literal(Id::from(f.position)));

    let ifset = program.ops.iter().position(|op| op.kind == OpKind::IfSet).unwrap();
    assert!(optional < ifset);
    assert_eq!(program.ops[ifset - 1].kind, OpKind::Each);
    assert_eq!(program.ops[ifset].payload, Payload::IfSet { field: 1 });
    assert_eq!(program.ops[ifset].next.index(), ifset + 2);
    assert_eq!(program.ops[ifset + 2].kind, OpKind::End);

    let member = &program.ops[ifset + 1];
    assert_eq!(member.kind, OpKind::MemberNeq);
    assert!(matches!(
        member.payload,
        Payload::Member { offset: 4, size: 8, table_var: None }
    ));
    let this = program.vars.find(VarRef::Implicit, VarKind::Entity).unwrap();
    assert_eq!(member.src, Operand::Var(this));
    assert_eq!(member.second, Operand::Literal(Id::from(ten)));
    assert_eq!(program.count(OpKind::MemberEq), 0);
}

// =============================================================================
// Scopes
// =============================================================================

#[test]
fn negated_scope_wraps_its_terms() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [
            Term::new(f.position),
            Term::scope_open().not(),
            Term::new(f.tag),
            Term::scope_close(),
        ],
    )
    .unwrap();
    let program = &compiled.program;
    program.check_blocks().unwrap();

    assert_eq!(
        program.match_kinds(),
        vec![OpKind::AndId, OpKind::Not, OpKind::AndId, OpKind::End]
    );
    let not = program.ops.iter().position(|op| op.kind == OpKind::Not).unwrap();
    assert_eq!(program.ops[not + 1].first, Operand::Literal(Id::from(f.tag)));
    assert_eq!(program.ops[not].next.index(), not + 2);
}

// =============================================================================
// Predicates
// =============================================================================

#[test]
fn name_match_on_unbound_this_selects_named_entities() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::pred_match("this", "Bob*"), Term::new(f.position)],
    )
    .unwrap();
    let program = &compiled.program;

    assert_eq!(
        program.match_kinds(),
        vec![OpKind::And, OpKind::PredEqMatch, OpKind::AndId]
    );
    let select = program.ops.iter().find(|op| op.kind == OpKind::And).unwrap();
    assert_eq!(select.first, Operand::Literal(Id::from(Entity::IDENTIFIER)));
    assert_eq!(select.second, Operand::Literal(Id::from(Entity::NAME)));
}

#[test]
fn negated_predicate_is_not_a_block() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::new(f.position), Term::pred_match("this", "Bob*").not()],
    )
    .unwrap();
    let program = &compiled.program;

    assert_eq!(program.match_kinds(), vec![OpKind::AndId, OpKind::PredNeqMatch]);
    assert_eq!(program.count(OpKind::Not), 0);
}
