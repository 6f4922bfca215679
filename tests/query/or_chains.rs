//! Integration tests for OR chains
//!
//! Tests field sharing, alternative linkage, and resets of variables written
//! inside a chain.

use quarry_foundation::VarId;
use quarry_query::{FieldInfo, OpKind, Operand, Term, TermRef, VarKind, VarRef};

use crate::common::{compile, fixture};

#[test]
fn chain_shares_one_field() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [Term::new(f.position).or(), Term::new(f.velocity), Term::new(f.tag)],
    )
    .unwrap();

    assert_eq!(compiled.query.field_count, 2);
    assert_eq!(compiled.query.fields[0], FieldInfo::default());
    let fields: Vec<_> = compiled
        .program
        .ops
        .iter()
        .filter(|op| op.kind == OpKind::And)
        .map(|op| op.field_index)
        .collect();
    assert_eq!(fields, vec![Some(0), Some(0)]);
}

#[test]
fn alternatives_jump_to_chain_end() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [
            Term::new(f.position).or(),
            Term::new(f.velocity).or(),
            Term::new(f.mass),
        ],
    )
    .unwrap();
    let program = &compiled.program;
    program.check_blocks().unwrap();

    let or = program.ops.iter().position(|op| op.kind == OpKind::Or).unwrap();
    let end = program.ops[or].next.index();
    assert_eq!(program.ops[or].src, Operand::Var(VarId::THIS));
    assert_eq!(end, or + 4);
    for alternative in &program.ops[or + 1..end] {
        assert_eq!(alternative.kind, OpKind::And);
        assert_eq!(alternative.next.index(), end);
    }
}

#[test]
fn chain_terms_never_use_fixed_ids() {
    let f = fixture();
    let compiled = compile(&f.world, [Term::new(f.position).or(), Term::new(f.velocity)]).unwrap();
    assert_eq!(compiled.program.count(OpKind::AndId), 0);
    assert_eq!(compiled.program.count(OpKind::And), 2);
}

#[test]
fn variables_written_in_chain_are_reset() {
    let f = fixture();
    let compiled = compile(
        &f.world,
        [
            Term::new(f.position),
            Term::pair(f.likes, TermRef::var("x")).or(),
            Term::pair(f.eats, TermRef::var("x")),
        ],
    )
    .unwrap();
    let program = &compiled.program;
    program.check_blocks().unwrap();

    let x = program.vars.find(VarRef::Named("x"), VarKind::Entity).unwrap();
    let or = program.ops.iter().position(|op| op.kind == OpKind::Or).unwrap();
    let end = program.ops[or].next.index();
    let reset = &program.ops[end + 1];
    assert_eq!(reset.kind, OpKind::Reset);
    assert_eq!(reset.src, Operand::Var(x));
    assert!(program.ops[or + 1].written.contains(x));
    assert!(program.ops[or + 2].written.contains(x));
}
