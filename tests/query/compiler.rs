//! Integration tests for the instruction compiler
//!
//! Tests program layout, the fixed-id fast path, blocks, inheritance, toggles,
//! member terms, and plan rendering.

use quarry_foundation::{Entity, Id, TypeInfo, VarId};
use quarry_query::{
    CompiledQuery, FieldSet, OpKind, Operand, Payload, QueryDesc, QueryOptions, Term, TermRef,
    VarKind, VarRef,
};
use quarry_storage::Trait;

use crate::common::{compile, fixture};

// =============================================================================
// Program Layout
// =============================================================================

#[test]
fn single_component_program() {
    let f = fixture();
    let compiled = compile(&f.world, [Term::new(f.position)]).unwrap();
    let program = &compiled.program;

    assert_eq!(
        program.kinds(),
        vec![OpKind::SetIds, OpKind::AndId, OpKind::PopulateSelf, OpKind::Yield]
    );
    assert_eq!(program.ops[1].field_index, Some(0));
    assert_eq!(program.ops[1].first, Operand::Literal(Id::from(f.position)));
    assert_eq!(program.ops[2].payload, Payload::Fields(FieldSet::from_bits(0b1)));
    program.check_blocks().unwrap();
}

#[test]
fn trivial_tags_share_one_instruction() {
    let f = fixture();
    let compiled = compile(&f.world, [Term::new(f.tag), Term::new(f.eats)]).unwrap();
    let program = &compiled.program;

    assert_eq!(program.match_kinds(), vec![OpKind::Triv]);
    assert_eq!(program.count(OpKind::Populate) + program.count(OpKind::PopulateSelf), 0);
    let triv = program.ops.iter().find(|op| op.kind == OpKind::Triv).unwrap();
    assert_eq!(triv.payload, Payload::Terms(0b11));
    assert!(triv.written.contains(VarId::THIS));
}

#[test]
fn matching_prefabs_disables_trivial_batching() {
    let f = fixture();
    let desc = QueryDesc::new()
        .with_options(QueryOptions::default().with_match_prefab(true))
        .term(Term::new(f.position))
        .term(Term::new(f.velocity));
    let compiled = CompiledQuery::new(&f.world, &desc).unwrap();

    assert_eq!(compiled.program.match_kinds(), vec![OpKind::AndId, OpKind::AndId]);
    assert_eq!(
        compiled.program.ops[1].payload,
        Payload::TableFilter(quarry_query::TableFilter {
            skip_disabled: true,
            skip_prefab: false,
        })
    );
}

#[test]
fn fixed_source_terms_are_populated_first() {
    let mut f = fixture();
    let game = f.world.entity("Game").unwrap();
    let compiled = compile(
        &f.world,
        [Term::new(f.position), Term::new(f.mass).src(game)],
    )
    .unwrap();

    assert_eq!(
        compiled.program.kinds(),
        vec![
            OpKind::SetFixed,
            OpKind::SetIds,
            OpKind::WithId,
            OpKind::Populate,
            OpKind::AndId,
            OpKind::PopulateSelf,
            OpKind::Yield,
        ]
    );
    let with = &compiled.program.ops[2];
    assert_eq!(with.src, Operand::Literal(Id::from(game)));
    assert_eq!(compiled.program.ops[3].payload, Payload::Fields(FieldSet::from_bits(0b10)));
}

// =============================================================================
// Blocks
// =============================================================================

#[test]
fn not_and_optional_are_symmetric() {
    let f = fixture();
    let not = compile(&f.world, [Term::new(f.position), Term::new(f.mass).not()]).unwrap();
    let opt = compile(&f.world, [Term::new(f.position), Term::new(f.mass).optional()]).unwrap();

    let matching = |compiled: &CompiledQuery| {
        compiled
            .program
            .ops
            .iter()
            .filter(|op| !op.kind.is_bookkeeping())
            .cloned()
            .collect::<Vec<_>>()
    };
    let not_ops = matching(&not);
    let opt_ops = matching(&opt);
    assert_eq!(not_ops.len(), opt_ops.len());

    for (a, b) in not_ops.iter().zip(&opt_ops) {
        let kind = if a.kind == OpKind::Not { OpKind::Optional } else { a.kind };
        assert_eq!(kind, b.kind);
        assert_eq!((a.src, a.first, a.second), (b.src, b.first, b.second));
        assert_eq!(a.field_index, b.field_index);
    }
    not.program.check_blocks().unwrap();
    opt.program.check_blocks().unwrap();
}

#[test]
fn block_end_restores_operands() {
    let f = fixture();
    let compiled = compile(&f.world, [Term::new(f.position), Term::new(f.tag).not()]).unwrap();
    let program = &compiled.program;

    let not = program.ops.iter().position(|op| op.kind == OpKind::Not).unwrap();
    let end = program.ops[not].next.index();
    assert_eq!(program.ops[end].kind, OpKind::End);
    assert_eq!(program.ops[end].prev.map(|l| l.index()), Some(not));
    assert_eq!(program.ops[end].first, program.ops[not + 1].first);
}

// =============================================================================
// Inheritance
// =============================================================================

#[test]
fn inherited_component_walks_subtypes_first() {
    let mut f = fixture();
    let unit = f.world.entity("Unit").unwrap();
    let warrior = f.world.entity("Warrior").unwrap();
    f.world.is_a(warrior, unit).unwrap();

    let compiled = compile(&f.world, [Term::new(unit)]).unwrap();
    let program = &compiled.program;
    assert_eq!(
        program.match_kinds(),
        vec![OpKind::Trav, OpKind::Each, OpKind::And]
    );

    let ops: Vec<_> = program
        .ops
        .iter()
        .filter(|op| !op.kind.is_bookkeeping())
        .collect();
    let (trav, each, and) = (ops[0], ops[1], ops[2]);
    assert_eq!(trav.first, Operand::Literal(Id::from(Entity::IS_A)));
    assert_eq!(trav.second, Operand::Literal(Id::from(unit)));
    assert_eq!(each.first, trav.src);
    assert_eq!(and.first, each.src);
    assert!(program.vars.is_anonymous(each.src.var().unwrap()));
}

// =============================================================================
// Toggles
// =============================================================================

#[test]
fn toggle_terms_get_a_toggle_instruction() {
    let mut f = fixture();
    f.world.add_trait(f.position, Trait::CanToggle).unwrap();
    let compiled = compile(&f.world, [Term::new(f.velocity), Term::new(f.position)]).unwrap();
    let program = &compiled.program;

    let toggle = program.ops.iter().find(|op| op.kind == OpKind::Toggle).unwrap();
    assert_eq!(toggle.src, Operand::Var(VarId::THIS));
    assert_eq!(toggle.payload, Payload::Toggle { enabled: 0b10, disabled: 0 });
}

#[test]
fn negated_toggle_term_is_optional() {
    let mut f = fixture();
    f.world.add_trait(f.position, Trait::CanToggle).unwrap();
    let compiled = compile(&f.world, [Term::new(f.velocity), Term::new(f.position).not()]).unwrap();
    let program = &compiled.program;

    assert_eq!(program.count(OpKind::Not), 0);
    assert_eq!(program.count(OpKind::Optional), 1);
    let toggle = program.ops.iter().find(|op| op.kind == OpKind::Toggle).unwrap();
    assert_eq!(toggle.payload, Payload::Toggle { enabled: 0, disabled: 0b10 });
}

#[test]
fn table_only_skips_toggles() {
    let mut f = fixture();
    f.world.add_trait(f.position, Trait::CanToggle).unwrap();
    let desc = QueryDesc::new()
        .with_options(QueryOptions::default().with_table_only(true))
        .term(Term::new(f.position));
    let compiled = CompiledQuery::new(&f.world, &desc).unwrap();
    assert_eq!(compiled.program.count(OpKind::Toggle), 0);
}

// =============================================================================
// Member Terms
// =============================================================================

#[test]
fn member_term_matches_component_then_compares() {
    let mut f = fixture();
    f.world.member(f.position, "x", TypeInfo::new(4, 4), 0).unwrap();
    let y = f.world.member(f.position, "y", TypeInfo::new(4, 4), 4).unwrap();

    let compiled = compile(&f.world, [Term::pair(y, TermRef::var("v"))]).unwrap();
    let program = &compiled.program;

    let and = program.ops.iter().position(|op| op.kind == OpKind::And).unwrap();
    assert_eq!(program.ops[and].first, Operand::Literal(Id::from(f.position)));

    let member = &program.ops[and + 1];
    assert_eq!(member.kind, OpKind::MemberEq);
    assert!(matches!(
        member.payload,
        Payload::Member { offset: 4, table_var: Some(VarId::THIS), .. }
    ));

    let this = program.vars.find(VarRef::Implicit, VarKind::Entity).unwrap();
    let v = program.vars.find(VarRef::Named("v"), VarKind::Entity).unwrap();
    assert_eq!(member.src, Operand::Var(this));
    assert_eq!(member.second, Operand::Var(v));
    assert!(program.kinds().contains(&OpKind::SetThis));
}

// =============================================================================
// Plan Rendering
// =============================================================================

#[test]
fn plan_names_operands() {
    let f = fixture();
    let compiled = compile(&f.world, [Term::new(f.position), Term::new(f.tag).not()]).unwrap();
    let plan = compiled.program.plan(&f.world);

    assert_eq!(plan.lines().count(), compiled.program.len());
    assert!(plan.contains("$this (Position)"));
    assert!(plan.contains("(Tag)"));
    assert!(plan.lines().any(|line| line.contains("not")));
    assert!(plan.lines().last().unwrap().contains("yield"));
}
