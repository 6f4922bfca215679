//! Shared world fixture for query tests.

use quarry_foundation::{Entity, Result, TypeInfo};
use quarry_query::{CompiledQuery, QueryDesc, Term};
use quarry_storage::World;

pub struct Fixture {
    pub world: World,
    pub position: Entity,
    pub velocity: Entity,
    pub mass: Entity,
    pub likes: Entity,
    pub eats: Entity,
    pub tag: Entity,
}

pub fn fixture() -> Fixture {
    let mut world = World::new();
    let position = world.component("Position", TypeInfo::new(8, 4)).unwrap();
    let velocity = world.component("Velocity", TypeInfo::new(8, 4)).unwrap();
    let mass = world.component("Mass", TypeInfo::new(4, 4)).unwrap();
    let likes = world.entity("Likes").unwrap();
    let eats = world.entity("Eats").unwrap();
    let tag = world.entity("Tag").unwrap();
    Fixture {
        world,
        position,
        velocity,
        mass,
        likes,
        eats,
        tag,
    }
}

pub fn compile(world: &World, terms: impl IntoIterator<Item = Term>) -> Result<CompiledQuery> {
    let desc = terms
        .into_iter()
        .fold(QueryDesc::new(), |desc, term| desc.term(term));
    CompiledQuery::new(world, &desc)
}
