//! Integration tests for Layer 2: Query
//!
//! Tests for term validation, variable discovery, and instruction compilation.

mod common;
mod compiler;
mod determinism;
mod operators;
mod or_chains;
mod properties;
mod variables;
