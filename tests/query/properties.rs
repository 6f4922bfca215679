//! Property tests over randomly generated queries
//!
//! Whatever the term list, a successful compilation yields a well-formed
//! program, and compiling twice yields the same program.

use proptest::prelude::*;
use quarry_query::{OpKind, Oper, Operand, Term, TermRef};

use crate::common::{Fixture, compile, fixture};

#[derive(Clone, Copy, Debug)]
enum Shape {
    Plain,
    Target(&'static str),
    Source(&'static str),
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    prop_oneof![
        3 => Just(Shape::Plain),
        1 => Just(Shape::Target("x")),
        1 => Just(Shape::Target("y")),
        1 => Just(Shape::Source("x")),
    ]
}

fn oper_strategy() -> impl Strategy<Value = Oper> {
    prop_oneof![
        4 => Just(Oper::And),
        1 => Just(Oper::Not),
        1 => Just(Oper::Optional),
        1 => Just(Oper::Or),
    ]
}

fn term_strategy() -> impl Strategy<Value = (usize, Shape, Oper)> {
    (0usize..5, shape_strategy(), oper_strategy())
}

fn build(f: &Fixture, specs: &[(usize, Shape, Oper)]) -> Vec<Term> {
    let components = [f.position, f.velocity, f.mass, f.tag, f.eats];
    specs
        .iter()
        .map(|&(component, shape, oper)| {
            let term = match shape {
                Shape::Plain => Term::new(components[component]),
                Shape::Target(var) => Term::pair(f.likes, TermRef::var(var)),
                Shape::Source(var) => Term::new(components[component]).src(TermRef::var(var)),
            };
            term.oper(oper)
        })
        .collect()
}

proptest! {
    #[test]
    fn compiled_programs_are_well_formed(specs in prop::collection::vec(term_strategy(), 1..8)) {
        let f = fixture();
        let Ok(compiled) = compile(&f.world, build(&f, &specs)) else {
            return Ok(());
        };
        let program = &compiled.program;

        prop_assert!(program.check_blocks().is_ok());
        let last = program.ops.last().map(|op| op.kind);
        prop_assert!(matches!(last, Some(OpKind::Yield | OpKind::Nothing)));

        for op in &program.ops {
            for operand in [op.src, op.first, op.second] {
                if let Operand::Var(var) = operand {
                    prop_assert!(var.index() < program.vars.len());
                }
            }
            if let Some(field) = op.field_index {
                prop_assert!(field < compiled.query.field_count);
            }
        }
    }

    #[test]
    fn compilation_is_deterministic(specs in prop::collection::vec(term_strategy(), 1..8)) {
        let f = fixture();
        let first = compile(&f.world, build(&f, &specs));
        let second = compile(&f.world, build(&f, &specs));
        match (first, second) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(a.program, b.program);
            }
            (Err(a), Err(b)) => {
                prop_assert_eq!(a.kind, b.kind);
            }
            _ => {
                prop_assert!(false, "compilation outcome changed between runs");
            }
        }
    }
}
