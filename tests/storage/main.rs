//! Integration tests for Layer 1: Storage
//!
//! Tests for the entity store and the lookup capability the query layer uses.

mod entities;
mod lookup;
