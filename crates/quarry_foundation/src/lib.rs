//! Core identifiers and error types for Quarry.
//!
//! This crate provides:
//! - [`Entity`] - Generational entity identifiers
//! - [`Id`] - Component ids, plain or `(first, second)` pairs
//! - [`VarId`] / [`VarSet`] - Query variable indices and bitsets
//! - [`TypeInfo`] - Component layout descriptors
//! - [`Error`] - Rich error types with context
//!
//! Reserved entities (`*`, `_`, `this`, `ChildOf`, `IsA`, the traits) are
//! associated constants on [`Entity`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builtin;
pub mod entity;
pub mod error;
pub mod types;
pub mod var;

pub use builtin::{BUILTIN_NAMES, FIRST_USER_INDEX};
pub use entity::{Entity, Id};
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use types::{MemberInfo, TypeInfo};
pub use var::{MAX_VARIABLES, VarId, VarSet};
