//! Integration tests for compilation determinism
//!
//! The same query against the same world must always produce the same
//! program, down to the serialized bytes.

use quarry_query::{Program, Term, TermRef};

use crate::common::{Fixture, compile, fixture};

fn mixed_terms(f: &Fixture) -> Vec<Term> {
    vec![
        Term::new(f.position),
        Term::pair(f.likes, TermRef::var("x")).or(),
        Term::pair(f.eats, TermRef::var("x")),
        Term::new(f.mass).not(),
        Term::new(f.velocity).src(TermRef::var("x")).optional(),
    ]
}

#[test]
fn repeated_compilation_is_identical() {
    let f = fixture();
    let a = compile(&f.world, mixed_terms(&f)).unwrap();
    let b = compile(&f.world, mixed_terms(&f)).unwrap();

    assert_eq!(a.program, b.program);
    assert_eq!(a.program.plan(&f.world), b.program.plan(&f.world));
}

#[test]
fn serialized_programs_are_byte_identical() {
    let f = fixture();
    let a = compile(&f.world, mixed_terms(&f)).unwrap();
    let b = compile(&f.world, mixed_terms(&f)).unwrap();

    let bytes_a = rmp_serde::to_vec(&a.program).unwrap();
    let bytes_b = rmp_serde::to_vec(&b.program).unwrap();
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn program_survives_serialization() {
    let f = fixture();
    let compiled = compile(&f.world, mixed_terms(&f)).unwrap();

    let bytes = rmp_serde::to_vec(&compiled.program).unwrap();
    let decoded: Program = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(decoded, compiled.program);
    decoded.check_blocks().unwrap();
}

#[test]
fn keep_alive_is_taken_per_compilation() {
    let f = fixture();
    compile(&f.world, [Term::new(f.position)]).unwrap();
    compile(&f.world, [Term::new(f.position)]).unwrap();
    assert_eq!(f.world.keep_alive_count(f.position.into()), 2);
}
