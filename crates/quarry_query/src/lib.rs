//! Term validation and instruction compilation for Quarry queries.
//!
//! This crate provides:
//! - [`Term`] / [`TermRef`] - Query terms and their references
//! - [`Validator`] - Normalizes terms and derives the query shape
//! - [`VarTable`] - Variable discovery for a validated query
//! - [`Compiler`] - Emits the instruction [`Program`] for a validated query
//! - [`CompiledQuery`] - Validation and compilation in one step
//!
//! Both stages are all-or-nothing: the first failing term produces an
//! [`Error`](quarry_foundation::Error) whose context marks that term.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod flags;

pub mod compiler;
pub mod config;
pub mod program;
pub mod query;
pub mod term;
pub mod validator;
pub mod vars;

pub use compiler::Compiler;
pub use config::{DEFAULT_MAX_TERMS, MAX_TERMS, QueryOptions};
pub use program::{Instruction, Label, OpKind, Operand, Payload, Program, TableFilter};
pub use query::{CompiledQuery, FieldInfo, FieldSet, Query, QueryDesc, QueryFlags};
pub use term::{InOut, Oper, RefFlags, Term, TermFlags, TermRef, render_terms};
pub use validator::Validator;
pub use vars::{THIS_NAME, Var, VarKind, VarRef, VarTable};
