//! Integration tests for query variables
//!
//! Tests variable discovery, table/entity variable pairs, and how bound
//! variables flow between terms.

use quarry_foundation::VarId;
use quarry_query::{OpKind, Operand, Term, TermRef, VarKind, VarRef};

use crate::common::{compile, fixture};

// =============================================================================
// Source Variables
// =============================================================================

#[test]
fn named_source_gets_table_and_entity_variable() {
    let f = fixture();
    let compiled = compile(&f.world, [Term::new(f.position).src(TermRef::var("x"))]).unwrap();
    let program = &compiled.program;
    let vars = &program.vars;

    let evar = vars.find(VarRef::Named("x"), VarKind::Entity).unwrap();
    let tvar = vars.find(VarRef::Named("x"), VarKind::Table).unwrap();
    assert_eq!(vars.get(evar).unwrap().table_id, Some(tvar));
    assert_eq!(program.public_var_count(), 2);

    assert_eq!(
        program.kinds(),
        vec![
            OpKind::SetIds,
            OpKind::AndId,
            OpKind::Each,
            OpKind::SetVars,
            OpKind::Populate,
            OpKind::Yield,
        ]
    );
    assert_eq!(program.ops[1].src, Operand::Var(tvar));
    assert_eq!(program.ops[2].src, Operand::Var(evar));
    assert_eq!(program.ops[2].first, Operand::Var(tvar));
}

#[test]
fn bound_variable_is_used_as_entity_source() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [
            Term::pair(f.likes, TermRef::var("x")),
            Term::new(f.position).src(TermRef::var("x")),
        ],
    )
    .unwrap();
    let program = &compiled.program;
    let x = program.vars.find(VarRef::Named("x"), VarKind::Entity).unwrap();

    assert_eq!(program.match_kinds(), vec![OpKind::And, OpKind::AndId]);
    let likes = program.ops.iter().find(|op| op.kind == OpKind::And).unwrap();
    assert_eq!(likes.src, Operand::Var(VarId::THIS));
    assert_eq!(likes.second, Operand::Var(x));
    assert!(likes.written.contains(x));

    let position = program.ops.iter().find(|op| op.kind == OpKind::AndId).unwrap();
    assert_eq!(position.src, Operand::Var(x));
    assert_eq!(program.count(OpKind::Each), 0);
    assert!(program.kinds().contains(&OpKind::SetVars));
}

// =============================================================================
// Naming
// =============================================================================

#[test]
fn variables_render_with_dollar_prefix() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::new(f.position), Term::pair(f.likes, TermRef::var("target"))],
    )
    .unwrap();
    let vars = &compiled.program.vars;

    let target = vars.find(VarRef::Named("target"), VarKind::Entity).unwrap();
    assert_eq!(vars.display_name(target), "$target");
    assert_eq!(vars.display_name(VarId::THIS), "$this");
    assert_eq!(vars.name_of(target), "target");
}

#[test]
fn variable_ids_follow_first_use() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [
            Term::new(f.position),
            Term::pair(f.likes, TermRef::var("a")),
            Term::pair(f.eats, TermRef::var("b")),
        ],
    )
    .unwrap();
    let vars = &compiled.program.vars;

    let a = vars.find(VarRef::Named("a"), VarKind::Entity).unwrap();
    let b = vars.find(VarRef::Named("b"), VarKind::Entity).unwrap();
    assert_eq!(a.index(), 1);
    assert_eq!(b.index(), 2);
}

#[test]
fn wildcard_target_is_anonymous() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::new(f.position), Term::pair(f.likes, TermRef::name("*"))],
    )
    .unwrap();
    let program = &compiled.program;

    assert_eq!(program.public_var_count(), 1);
    let likes = program
        .ops
        .iter()
        .find(|op| op.term_index == Some(1))
        .unwrap();
    let second = likes.second.var().unwrap();
    assert!(program.vars.is_anonymous(second));
    assert_eq!(program.vars.display_name(second), format!("$[*]{}", second.index()));
}
