//! Entity identity store and world lookup capability for Quarry.
//!
//! This crate provides:
//! - [`WorldLookup`] - The read-only capability the query layer consumes
//! - [`Trait`] - Relationship and component traits that shape query compilation
//! - [`World`] - A minimal in-memory store of names, hierarchy, ids, and layouts

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod lookup;
pub mod world;

pub use lookup::{Trait, WorldLookup};
pub use world::World;
