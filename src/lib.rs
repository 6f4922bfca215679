//! Quarry - ECS query front end
//!
//! This crate re-exports all layers of the Quarry system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 2: quarry_query      - Term validation, variables, instruction compiler
//! Layer 1: quarry_storage    - Entity names, hierarchy, traits, layouts
//! Layer 0: quarry_foundation - Core types (Entity, Id, VarSet, Error)
//! ```

pub use quarry_foundation as foundation;
pub use quarry_query as query;
pub use quarry_storage as storage;
