//! Term validation: normalizes raw terms and derives term and query flags.
//!
//! Validation runs in two layers. [`Validator::finalize_term`] resolves the
//! references of a single term, fills in defaults and checks that the term is
//! consistent with itself. [`Validator::finalize`] runs that over every term of
//! a [`QueryDesc`] and then derives everything that depends on term order:
//! OR chains, scopes, field indices and the query flags.

use std::sync::Arc;

use quarry_foundation::{Entity, Error, ErrorContext, ErrorKind, Id, Result};
use quarry_storage::{Trait, WorldLookup};
use tracing::{debug, trace};

use crate::config::QueryOptions;
use crate::query::{FieldInfo, FieldSet, Query, QueryDesc, QueryFlags};
use crate::term::{InOut, Oper, RefFlags, Term, TermFlags, TermRef, render_terms};

/// Validates terms and queries.
pub struct Validator;

// =============================================================================
// Term Validation
// =============================================================================

impl Validator {
    /// Normalizes a single term in place.
    ///
    /// After this returns, every set reference is either an entity, a
    /// variable, or a literal name, `term.id` agrees with `first`/`second`,
    /// traversal defaults are filled in and the per-term flags are derived.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found in the term.
    pub fn finalize_term(
        world: &impl WorldLookup,
        term: &mut Term,
        options: &QueryOptions,
    ) -> Result<()> {
        let first_flags = term.first.flags;
        let second_flags = term.second.flags;

        check_competing(&term.src, "src")?;
        check_competing(&term.first, "first")?;
        check_competing(&term.second, "second")?;

        if !term.id.is_null() {
            populate_from_id(world, term)?;
        }

        finalize_refs(world, term, options)?;

        if term.first.is_builtin_var(Entity::ANY) || term.second.is_builtin_var(Entity::ANY) {
            term.flags.insert(TermFlags::MATCH_ANY);
        }
        if term.src.is_builtin_var(Entity::ANY) {
            term.flags.insert(TermFlags::MATCH_ANY_SRC);
        }

        // `$` as source or target copies the predicate: `Foo($)` is `Foo(Foo)`.
        if term.src.is_builtin_var(Entity::VARIABLE) {
            term.src = copy_first(&term.first, term.src.flags);
        }
        if term.second.is_builtin_var(Entity::VARIABLE) {
            term.second = copy_first(&term.first, term.second.flags);
        }

        if term.id.is_null() {
            populate_id(term);
        }

        let childof_any = Id::pair(Entity::CHILD_OF, Entity::ANY);
        let childof_wildcard = Id::pair(Entity::CHILD_OF, Entity::WILDCARD);
        let childof_zero = Id::pair(Entity::CHILD_OF, Entity::NULL);

        // `!(ChildOf, *)` is the same as matching root entities.
        if term.oper == Oper::Not
            && (term.id == childof_any || term.id == childof_wildcard)
            && !term.src.is_builtin_var(Entity::ANY)
        {
            term.oper = Oper::And;
            term.id = childof_zero;
            term.second = TermRef::zero().self_only();
        }
        if term.id == childof_zero {
            term.flags.insert(TermFlags::MATCH_ANY);
        }

        let first_entity = if term.first.is_entity() {
            term.first.id
        } else {
            Entity::NULL
        };
        let inherit = !term.id.is_null() && world.id_has_trait(term.id, Trait::Inherit);

        if term.src.is_set() && !term.match_zero() {
            finalize_traversal(world, term, inherit)?;
        }

        if !inherit && term.trav == Entity::IS_A && term.src.flags.contains(RefFlags::UP) {
            return Err(Error::invalid_traversal(format!(
                "IsA traversal not allowed for '{}', add the Inherit trait",
                render_id(world, term.id)
            )));
        }

        if !first_entity.is_null() && !term.match_zero() {
            derive_trait_flags(world, term, first_entity, first_flags, second_flags);
        }

        if term.first.id == Entity::VARIABLE {
            return Err(Error::invalid_term("invalid $ for term.first"));
        }

        if term.oper.is_from() && !matches!(term.inout, InOut::Default | InOut::None) {
            return Err(Error::invalid_operator(
                "invalid inout value for AndFrom/OrFrom/NotFrom term",
            ));
        }

        derive_evaluation_flags(world, term, first_entity);

        verify(world, term)
    }
}

fn check_competing(r: &TermRef, refname: &str) -> Result<()> {
    match &r.name {
        Some(name) if !r.id.is_null() => Err(Error::conflicting_ref_flags(format!(
            "{refname}.name ({name}) and {refname}.id have competing values"
        ))),
        _ => Ok(()),
    }
}

fn copy_first(first: &TermRef, flags: RefFlags) -> TermRef {
    let identity = first.flags & (RefFlags::IS_ENTITY | RefFlags::IS_VARIABLE);
    TermRef {
        id: first.id,
        name: first.name.clone(),
        flags: (flags & !RefFlags::IDENTITY) | identity,
    }
}

/// Fills `first` and `second` from a raw `term.id`.
fn populate_from_id(world: &impl WorldLookup, term: &mut Term) -> Result<()> {
    let id = term.id;
    let first_index = id.first();
    if first_index == 0 {
        return Err(Error::new(ErrorKind::MissingFirstElement));
    }

    let mut zero_target = false;
    if id.is_pair() && id.second() == 0 {
        if first_index != Entity::CHILD_OF.index() {
            return Err(Error::new(ErrorKind::MissingSecondElement));
        }
        zero_target = true;
    }

    let term_first = ref_entity(&term.first);
    if term_first.is_null() {
        let fallback = id
            .entity()
            .unwrap_or_else(|| Entity::new(first_index, 0));
        term.first.id = world.get_alive(first_index).unwrap_or(fallback);
    } else if term_first.index() != first_index {
        return Err(Error::mismatched_pair_id(
            "mismatch between term.id and term.first",
        ));
    }

    if !id.is_pair() {
        return Ok(());
    }

    if zero_target {
        term.second = TermRef::zero();
        return Ok(());
    }

    let second_index = id.second();
    let term_second = ref_entity(&term.second);
    if term_second.is_null() {
        term.second.id = world
            .get_alive(second_index)
            .unwrap_or_else(|| Entity::new(second_index, 0));
    } else if term_second.index() != second_index {
        return Err(Error::mismatched_pair_id(
            "mismatch between term.id and term.second",
        ));
    }
    Ok(())
}

/// The entity a reference contributes to `term.id`.
fn ref_entity(r: &TermRef) -> Entity {
    if r.is_entity() {
        r.id
    } else if r.is_var() {
        if r.id == Entity::ANY {
            Entity::ANY
        } else {
            Entity::WILDCARD
        }
    } else {
        Entity::NULL
    }
}

fn populate_id(term: &mut Term) {
    let first = ref_entity(&term.first);
    let second = ref_entity(&term.second);
    term.id = if !second.is_null() || term.second.is_entity() {
        Id::pair(first, second)
    } else {
        Id::from(first)
    };
}

fn finalize_refs(world: &impl WorldLookup, term: &mut Term, options: &QueryOptions) -> Result<()> {
    if term.first.flags.traversal().is_empty() {
        term.first.flags.insert(RefFlags::SELF);
    }
    if term.second.flags.traversal().is_empty() && term.second.is_set() {
        term.second.flags.insert(RefFlags::SELF);
    }
    if term.src.id.is_null() && term.src.name.is_none() && !term.src.is_entity() {
        term.src.id = Entity::THIS;
        term.src.flags.insert(RefFlags::IS_VARIABLE);
    }

    finalize_ref_flags(&mut term.src, "src")?;
    finalize_ref_flags(&mut term.first, "first")?;
    finalize_ref_flags(&mut term.second, "second")?;

    lookup_ref(world, None, &mut term.src, options)?;
    lookup_ref(world, None, &mut term.first, options)?;

    let mut scope = None;
    if term.first.is_entity() {
        if term.first.id.is_null() {
            return Err(Error::new(ErrorKind::MissingFirstElement));
        }
        scope = world.one_of(term.first.id);
    }
    lookup_ref(world, scope, &mut term.second, options)?;

    if term.src.id.is_null() && term.src.is_entity() {
        term.src.flags.remove(RefFlags::TRAVERSE);
        term.trav = Entity::NULL;
    }

    if term.src.is_var() && (term.src.id == Entity::WILDCARD || term.src.id == Entity::ANY) {
        term.inout = InOut::None;
    }
    Ok(())
}

fn finalize_ref_flags(r: &mut TermRef, refname: &str) -> Result<()> {
    if r.is_entity() && r.is_var() {
        return Err(Error::conflicting_ref_flags(format!(
            "cannot set both IsEntity and IsVariable for term.{refname}"
        )));
    }

    let stripped = r.name.as_deref().and_then(|name| name.strip_prefix('$'));
    if let Some(stripped) = stripped.map(str::to_string) {
        if stripped.is_empty() {
            if !r.is_name() {
                return Err(Error::invalid_term(format!(
                    "invalid variable name '$' for term.{refname}"
                )));
            }
        } else {
            r.name = Some(Arc::from(stripped.as_str()));
            r.flags.insert(RefFlags::IS_VARIABLE);
        }
    }

    if (r.flags & RefFlags::IDENTITY).is_empty() && (!r.id.is_null() || r.name.is_some()) {
        if r.id.is_builtin_variable() {
            r.flags.insert(RefFlags::IS_VARIABLE);
        } else {
            r.flags.insert(RefFlags::IS_ENTITY);
        }
    }
    Ok(())
}

fn lookup_ref(
    world: &impl WorldLookup,
    scope: Option<Entity>,
    r: &mut TermRef,
    options: &QueryOptions,
) -> Result<()> {
    let Some(name) = r.name.clone() else {
        if r.is_entity() && !r.id.is_null() && !world.is_alive(r.id) {
            return Err(Error::unresolved_identifier(r.id.to_string()));
        }
        return Ok(());
    };

    if r.is_var() {
        if &*name == "this" {
            r.id = Entity::THIS;
            r.name = None;
        }
        return Ok(());
    }
    if r.is_name() {
        return Ok(());
    }

    if &*name == "#0" {
        if !r.id.is_null() {
            return Err(Error::mismatched_pair_id(
                "name '#0' does not match entity id",
            ));
        }
        r.name = None;
        return Ok(());
    }

    let resolved = scope
        .and_then(|scope| world.lookup_child(scope, &name))
        .or_else(|| world.lookup(&name));
    let Some(entity) = resolved else {
        if options.allow_unresolved_by_name {
            r.flags.remove(RefFlags::IS_ENTITY);
            r.flags.insert(RefFlags::IS_NAME);
            return Ok(());
        }
        return Err(Error::unresolved_identifier(&*name));
    };

    if !r.id.is_null() && r.id != entity {
        return Err(Error::mismatched_pair_id(format!(
            "name '{name}' does not match id '{}'",
            world.path(r.id)
        )));
    }
    r.id = entity;

    if matches!(&*name, "*" | "_" | "$") {
        r.flags.remove(RefFlags::IS_ENTITY);
        r.flags.insert(RefFlags::IS_VARIABLE);
    }

    if !world.is_alive(r.id) {
        return Err(Error::unresolved_identifier(format!("{name} (not alive)")));
    }
    r.name = None;
    Ok(())
}

fn finalize_traversal(world: &impl WorldLookup, term: &mut Term, inherit: bool) -> Result<()> {
    if term.src.flags.traversal().is_empty() {
        if inherit {
            term.src.flags.insert(RefFlags::SELF | RefFlags::UP);
            if term.trav.is_null() {
                term.trav = Entity::IS_A;
            }
        } else {
            term.src.flags.insert(RefFlags::SELF);
            if !term.trav.is_null() {
                return Err(Error::invalid_traversal(format!(
                    "traversal relationship '{}' specified for component '{}' which can't be inherited",
                    world.path(term.trav),
                    render_id(world, term.id)
                )));
            }
        }
    }

    for (r, refname) in [(&term.first, "first"), (&term.second, "second")] {
        if r.flags.contains(RefFlags::CASCADE) {
            return Err(Error::invalid_traversal(format!(
                "cascade modifier invalid for term.{refname}"
            )));
        }
        if r.flags.contains(RefFlags::DESC) {
            return Err(Error::invalid_traversal(format!(
                "desc modifier invalid for term.{refname}"
            )));
        }
    }

    let src_flags = term.src.flags;
    if src_flags.contains(RefFlags::DESC) && !src_flags.contains(RefFlags::CASCADE) {
        return Err(Error::invalid_traversal(
            "desc modifier for term.src must be used with cascade",
        ));
    }
    if src_flags.contains(RefFlags::CASCADE) {
        term.src.flags.insert(RefFlags::UP);
    }
    if term.src.flags.contains(RefFlags::UP) && term.trav.is_null() {
        term.trav = Entity::CHILD_OF;
    }
    Ok(())
}

fn derive_trait_flags(
    world: &impl WorldLookup,
    term: &mut Term,
    first: Entity,
    first_flags: RefFlags,
    second_flags: RefFlags,
) {
    let first_is_self = first_flags.traversal() == RefFlags::SELF;
    let first_can_isa = world.has_id(first, Id::pair(Entity::IS_A, Entity::WILDCARD))
        && !world.has_trait(first, Trait::Final);

    if (world.id_in_use(Id::pair(Entity::IS_A, first))
        || world.id_has_trait(term.id, Trait::Inheritable)
        || first_can_isa)
        && !first_is_self
    {
        term.flags.insert(TermFlags::ID_INHERITED);
    }

    if term.second.is_set() {
        if second_flags.traversal() != RefFlags::SELF
            && !term.src.is_builtin_var(Entity::ANY)
            && !term.second.is_builtin_var(Entity::ANY)
            && !(term.second.id == Entity::WILDCARD && term.oper == Oper::Not)
        {
            if world.has_trait(first, Trait::Transitive) {
                term.flags.insert(TermFlags::TRANSITIVE);
            }
            if world.has_trait(first, Trait::Reflexive) {
                term.flags.insert(TermFlags::REFLEXIVE);
            }
        }
        if world.has_trait(first, Trait::Union) {
            term.flags.insert(TermFlags::IS_UNION);
        }
    }

    if world.id_has_trait(term.id, Trait::CanToggle) {
        term.flags.insert(TermFlags::IS_TOGGLE);
    }
    if world.member(first).is_some() {
        term.flags.insert(TermFlags::IS_MEMBER);
    }
}

/// Decides whether the term can be evaluated by the trivial iterator or a cache.
fn derive_evaluation_flags(world: &impl WorldLookup, term: &mut Term, first: Entity) {
    let mut trivial = true;
    let mut cacheable = true;
    let id = term.id;

    if term.oper != Oper::And || term.flags.contains(TermFlags::IS_OR) {
        trivial = false;
    }
    if id.is_pair() && id.first() == Entity::CHILD_OF.index() && id.second() != 0 {
        trivial = false;
    }

    if id.is_wildcard() {
        if id.is_pair() && id.first() == Entity::WILDCARD.index() {
            trivial = false;
            cacheable = false;
        }
        if !world.id_has_trait(id, Trait::Exclusive) {
            trivial = false;
        }
        if term.first.is_var() && (!is_wildcard(term.first.id) || term.first.id == Entity::ANY) {
            trivial = false;
            cacheable = false;
        }
        if term.second.is_var() && (!is_wildcard(term.second.id) || term.second.id == Entity::ANY)
        {
            trivial = false;
            if term.second.id != Entity::ANY {
                cacheable = false;
            }
        }
    }

    if !term.match_this() {
        trivial = false;
    }
    if term
        .flags
        .intersects(TermFlags::TRANSITIVE | TermFlags::ID_INHERITED | TermFlags::REFLEXIVE)
    {
        trivial = false;
        cacheable = false;
    }
    if !term.trav.is_null() && term.trav != Entity::IS_A {
        trivial = false;
    }
    if !term.src.flags.contains(RefFlags::SELF) {
        trivial = false;
    }
    if first.is_builtin_predicate() {
        trivial = false;
        cacheable = false;
    }
    if term.src.id != Entity::THIS {
        cacheable = false;
    }
    if id == Id::pair(Entity::CHILD_OF, Entity::NULL) {
        cacheable = false;
    }
    if term
        .flags
        .intersects(TermFlags::IS_MEMBER | TermFlags::IS_UNION)
    {
        trivial = false;
        cacheable = false;
    }
    if term.flags.contains(TermFlags::IS_TOGGLE) {
        trivial = false;
    }

    term.flags.set(TermFlags::IS_TRIVIAL, trivial);
    term.flags.set(TermFlags::IS_CACHEABLE, cacheable);
}

fn is_wildcard(entity: Entity) -> bool {
    entity == Entity::WILDCARD || entity == Entity::ANY
}

fn render_id(world: &impl WorldLookup, id: Id) -> String {
    let element = |index: u32| match world.get_alive(index) {
        Some(entity) => world.path(entity),
        None => format!("#{index}"),
    };
    if id.is_pair() {
        format!("({}, {})", element(id.first()), element(id.second()))
    } else {
        element(id.first())
    }
}

fn verify(world: &impl WorldLookup, term: &Term) -> Result<()> {
    let id = term.id;

    if term.src.is_name() && term.second.is_name() {
        return Err(Error::mismatched_pair_id(
            "term.src and term.second cannot both be literal names",
        ));
    }

    let first_id = if term.first.is_entity() {
        term.first.id
    } else {
        Entity::NULL
    };
    let second_id = if term.second.is_entity() {
        term.second.id
    } else {
        Entity::NULL
    };

    if first_id.is_builtin_predicate() {
        return verify_pred(term, first_id);
    }

    if term.second.is_set() && !id.is_pair() {
        return Err(Error::mismatched_pair_id("expected pair id for term with pair"));
    }
    if !term.second.is_set() && id.is_pair() && first_id != Entity::CHILD_OF {
        return Err(Error::mismatched_pair_id("unexpected pair id for term without pair"));
    }
    if !term.src.is_set() {
        return Err(Error::invalid_term("term.src is not initialized"));
    }
    if !term.first.is_set() {
        return Err(Error::new(ErrorKind::MissingFirstElement));
    }

    if id.first() == 0 {
        return Err(Error::new(ErrorKind::MissingFirstElement));
    }
    if id.is_pair() && id.second() == 0 && id.first() != Entity::CHILD_OF.index() {
        return Err(Error::new(ErrorKind::MissingSecondElement));
    }
    verify_element(&term.first, id.first(), "first")?;
    if id.is_pair() {
        verify_element(&term.second, id.second(), "second")?;
    }

    if !first_id.is_null() {
        if term.second.is_set() && is_same_ref(&term.src, &term.second)
            && world.has_trait(first_id, Trait::Acyclic)
            && !term.flags.contains(TermFlags::REFLEXIVE)
        {
            return Err(Error::new(ErrorKind::AcyclicSelfPair {
                relationship: world.path(first_id),
            }));
        }

        let scope = if second_id.is_null() || is_wildcard(second_id) {
            None
        } else {
            world.one_of(first_id)
        };
        if let Some(scope) = scope {
            if !world.has_pair(second_id, Entity::CHILD_OF, scope) {
                return Err(Error::new(ErrorKind::InvalidTarget {
                    target: world.path(second_id),
                    relationship: world.path(first_id),
                    scope: world.path(scope),
                }));
            }
        }
    }

    if !term.trav.is_null() {
        if !world.is_alive(term.trav) {
            return Err(Error::new(ErrorKind::UnresolvedTraversalRelationship(
                term.trav,
            )));
        }
        if !world.has_trait(term.trav, Trait::Traversable) {
            return Err(Error::invalid_traversal(format!(
                "cannot traverse non-traversable relationship '{}'",
                world.path(term.trav)
            )));
        }
    }
    Ok(())
}

fn verify_element(r: &TermRef, index: u32, refname: &str) -> Result<()> {
    if r.is_entity() && r.id.index() != index {
        return Err(Error::mismatched_pair_id(format!(
            "mismatch between term.id and term.{refname}"
        )));
    }
    if r.is_var()
        && index != Entity::WILDCARD.index()
        && index != Entity::ANY.index()
    {
        return Err(Error::mismatched_pair_id(format!(
            "expected wildcard for variable term.{refname}"
        )));
    }
    Ok(())
}

/// Returns true if two references denote the same entity or variable.
fn is_same_ref(a: &TermRef, b: &TermRef) -> bool {
    let mask = RefFlags::IS_ENTITY | RefFlags::IS_VARIABLE;
    if a.flags & mask != b.flags & mask {
        return false;
    }
    if a.is_entity() {
        return !a.id.is_null() && a.id == b.id;
    }
    matches!((&a.name, &b.name), (Some(x), Some(y)) if x == y)
}

fn verify_pred(term: &Term, pred: Entity) -> Result<()> {
    if !matches!(term.oper, Oper::And | Oper::Not | Oper::Or) {
        return Err(Error::invalid_operator(
            "predicates can only be combined with and, not and or",
        ));
    }
    if term.src.is_name() && term.second.is_name() {
        return Err(Error::invalid_operator(
            "both sides of operator cannot be a name",
        ));
    }
    if term.src.is_entity() && term.second.is_entity() {
        return Err(Error::invalid_operator(
            "both sides of operator cannot be an entity",
        ));
    }
    if !term.src.is_var() {
        return Err(Error::invalid_operator(
            "left-hand of operator must be a variable",
        ));
    }
    if pred == Entity::PRED_MATCH && !term.second.is_name() {
        return Err(Error::invalid_operator(
            "right-hand of match operator must be a string",
        ));
    }
    if term.second.is_var() {
        let same_id = !term.src.id.is_null() && term.src.id == term.second.id;
        let same_name = matches!((&term.src.name, &term.second.name), (Some(a), Some(b)) if a == b);
        if same_id || same_name {
            return Err(Error::invalid_operator("both sides of operator are equal"));
        }
    }
    if pred == Entity::PRED_EQ
        && (term.second.id == Entity::PRED_EQ || term.second.id == Entity::PRED_MATCH)
    {
        return Err(Error::invalid_operator(
            "invalid right-hand side for equality operator",
        ));
    }
    Ok(())
}

// =============================================================================
// Query Validation
// =============================================================================

impl Validator {
    /// Validates every term of a query and derives the result shape.
    ///
    /// # Errors
    ///
    /// Returns the first error found. The error context carries the index of
    /// the failing term and the term list with that term marked.
    pub fn finalize(world: &impl WorldLookup, desc: &QueryDesc) -> Result<Query> {
        let limit = desc.options.term_limit();
        if desc.terms.len() > limit {
            return Err(Error::new(ErrorKind::MaxTermsExceeded {
                count: desc.terms.len(),
                limit,
            }));
        }

        let mut finalizer = QueryFinalizer::new(world, desc);
        match finalizer.run() {
            Ok(()) => Ok(finalizer.finish()),
            Err((index, err)) => Err(finalizer.attach_context(index, err)),
        }
    }
}

/// Accumulates query-level state while walking the terms.
struct QueryFinalizer<'a, W: WorldLookup> {
    world: &'a W,
    options: &'a QueryOptions,
    name: Option<&'a str>,
    terms: Vec<Term>,
    flags: QueryFlags,
    field_count: u8,
    static_id_fields: FieldSet,
    data_fields: FieldSet,
    set_fields: FieldSet,
    fixed_fields: FieldSet,
    var_fields: FieldSet,
    fields: Vec<FieldInfo>,
}

impl<'a, W: WorldLookup> QueryFinalizer<'a, W> {
    fn new(world: &'a W, desc: &'a QueryDesc) -> Self {
        Self {
            world,
            options: &desc.options,
            name: desc.name.as_deref(),
            terms: desc.terms.clone(),
            flags: QueryFlags::EMPTY,
            field_count: 0,
            static_id_fields: FieldSet::EMPTY,
            data_fields: FieldSet::EMPTY,
            set_fields: FieldSet::EMPTY,
            fixed_fields: FieldSet::EMPTY,
            var_fields: FieldSet::EMPTY,
            fields: Vec::new(),
        }
    }

    fn attach_context(&self, index: usize, err: Error) -> Error {
        let mut context = ErrorContext::new()
            .with_term(index)
            .with_query(render_terms(self.world, &self.terms, Some(index)));
        if let Some(name) = self.name {
            context = context.with_name(name);
        }
        err.with_context(context)
    }

    #[allow(clippy::too_many_lines)]
    fn run(&mut self) -> std::result::Result<(), (usize, Error)> {
        let count = self.terms.len();
        let world = self.world;

        self.flags.insert(QueryFlags::MATCH_ONLY_THIS);
        if self.options.match_prefab {
            self.flags.insert(QueryFlags::MATCH_PREFAB);
        }
        if self.options.match_disabled {
            self.flags.insert(QueryFlags::MATCH_DISABLED);
        }

        for i in 0..count {
            if self.terms[i].oper == Oper::Or {
                self.terms[i].flags.insert(TermFlags::IS_OR);
                if i + 1 < count {
                    self.terms[i + 1].flags.insert(TermFlags::IS_OR);
                }
            }
        }

        let mut cacheable = true;
        let mut match_nothing = true;
        let mut has_childof = false;
        let mut scope_nesting: i32 = 0;
        let mut cacheable_terms = 0usize;
        let mut cond_set = false;

        for i in 0..count {
            let prev_is_or = i > 0 && self.terms[i - 1].oper == Oper::Or;

            Validator::finalize_term(world, &mut self.terms[i], self.options)
                .map_err(|err| (i, err))?;

            let term = &self.terms[i];
            trace!(index = i, term = %term.render(world), "validated term");

            if term.id == Id::pair(Entity::CHILD_OF, Entity::NULL) || is_childof_pair(term) {
                has_childof = true;
            }
            if !term.match_zero() {
                match_nothing = false;
            }

            let mut term_flags = term.flags;
            if scope_nesting > 0 {
                term_flags.remove(TermFlags::IS_CACHEABLE);
            }

            // An OR chain is only cacheable if every member is.
            if prev_is_or || term.oper == Oper::Or {
                let mut chain_cacheable = term_flags.contains(TermFlags::IS_CACHEABLE);
                let mut j = i;
                while j > 0 && self.terms[j - 1].oper == Oper::Or {
                    j -= 1;
                    chain_cacheable &= self.terms[j].flags.contains(TermFlags::IS_CACHEABLE);
                }
                if !chain_cacheable {
                    term_flags.remove(TermFlags::IS_CACHEABLE);
                    for t in &mut self.terms[j..i] {
                        if t.flags.contains(TermFlags::IS_CACHEABLE) {
                            t.flags.remove(TermFlags::IS_CACHEABLE);
                            cacheable_terms -= 1;
                        }
                    }
                }
            }
            if term_flags.contains(TermFlags::IS_TOGGLE | TermFlags::IS_CACHEABLE) {
                cacheable = false;
            }

            if !prev_is_or {
                self.field_count = self.field_count.saturating_add(1);
            }
            let field = self.field_count - 1;

            let term = &mut self.terms[i];
            term.flags = term_flags;
            term.field_index = field;

            if term.id.is_wildcard() {
                if term.oper != Oper::Not || term.id.is_any() {
                    self.flags.insert(QueryFlags::MATCH_WILDCARDS);
                }
            } else if !term.flags.contains(TermFlags::IS_OR) {
                self.static_id_fields.insert(field);
            }

            if term.id == Id::from(Entity::PREFAB) {
                self.flags.insert(QueryFlags::MATCH_PREFAB);
            }
            if term.id == Id::from(Entity::DISABLED) && term.src.flags.contains(RefFlags::SELF) {
                self.flags.insert(QueryFlags::MATCH_DISABLED);
            }

            if term.oper == Oper::Not && term.inout == InOut::Default {
                term.inout = InOut::None;
            }
            if (term.id == Id::from(Entity::WILDCARD)
                || term.id == Id::pair(Entity::WILDCARD, Entity::WILDCARD))
                && term.inout == InOut::Default
            {
                term.inout = InOut::None;
            }

            let mut nodata = term.match_zero()
                || term.inout == InOut::None
                || world.type_info(term.id).is_none()
                || term.flags.contains(TermFlags::IS_MEMBER)
                || scope_nesting > 0
                || (term.id.is_pair()
                    && is_wildcard_index(term.id.second())
                    && world.get_alive(term.id.first()).is_none_or(|first| {
                        world.type_info(Id::from(first)).is_none()
                    }));

            let is_or = term.flags.contains(TermFlags::IS_OR);
            if is_or {
                if !nodata && or_other_type(world, &self.terms, i) {
                    nodata = true;
                }
                self.data_fields.remove(field);
            }

            let term = &mut self.terms[i];
            if term.flags.contains(TermFlags::IS_MEMBER) {
                nodata = false;
            }
            term.flags.set(TermFlags::NO_DATA, nodata);
            if !nodata && term.oper != Oper::Not {
                self.data_fields.insert(field);
            }

            if !term.src.id.is_null() && term.src.is_entity() {
                self.fixed_fields.insert(field);
            } else if term.src.is_var() && term.src.id != Entity::THIS {
                self.var_fields.insert(field);
            }

            if term.match_this() {
                self.flags.insert(QueryFlags::MATCH_THIS);
            } else {
                self.flags.remove(QueryFlags::MATCH_ONLY_THIS);
            }

            if prev_is_or {
                let prev = &self.terms[i - 1];
                let term = &self.terms[i];
                if prev.src.id != term.src.id || prev.src.name != term.src.name {
                    return Err((
                        i,
                        Error::invalid_operator(
                            "mismatching sources in OR expression, all terms must have the same source",
                        ),
                    ));
                }
                if !matches!(term.oper, Oper::Or | Oper::And) {
                    return Err((
                        i,
                        Error::invalid_operator("term after OR expression cannot use operators"),
                    ));
                }
            }

            let term = &mut self.terms[i];
            if matches!(term.oper, Oper::Optional | Oper::Not) {
                cond_set = true;
            }

            if term.is_builtin_pred() {
                self.flags.insert(QueryFlags::HAS_PRED);
                term.src.flags = (term.src.flags & !RefFlags::TRAVERSE) | RefFlags::SELF;
                term.inout = InOut::None;
            } else if !term.match_zero() && !matches!(term.oper, Oper::Not | Oper::NotFrom) {
                self.set_fields.insert(field);
            }

            if term.is_scope_open() {
                self.flags.insert(QueryFlags::HAS_SCOPES);
                scope_nesting += 1;
            }

            if scope_nesting > 0 {
                term.flags.insert(TermFlags::IS_SCOPE);
                term.flags.remove(TermFlags::IS_TRIVIAL | TermFlags::IS_CACHEABLE);
            }

            if term.flags.contains(TermFlags::IS_CACHEABLE) {
                cacheable_terms += 1;
            }

            if self.terms[i].is_scope_close() {
                if i > 0 && self.terms[i - 1].is_scope_open() {
                    return Err((i, Error::unbalanced_scope("invalid empty scope")));
                }
                self.flags.insert(QueryFlags::HAS_SCOPES);
                scope_nesting -= 1;
            }
            if scope_nesting < 0 {
                return Err((i, Error::unbalanced_scope("'}' without matching '{'")));
            }
        }

        if count > 0 {
            let last = count - 1;
            if scope_nesting != 0 {
                return Err((last, Error::unbalanced_scope("missing '}'")));
            }
            if self.terms[last].oper == Oper::Or {
                return Err((last, Error::new(ErrorKind::TrailingOr)));
            }
        }

        self.populate_fields();

        if cond_set {
            self.flags.insert(QueryFlags::HAS_COND_SET);
        }
        self.derive_trivial();

        if cacheable_terms != 0 {
            self.flags.insert(QueryFlags::HAS_CACHEABLE);
        }
        if cacheable && cacheable_terms == count && !has_childof {
            self.flags.insert(QueryFlags::IS_CACHEABLE);
        }
        if match_nothing {
            self.flags.insert(QueryFlags::MATCH_NOTHING);
        }
        Ok(())
    }

    fn populate_fields(&mut self) {
        let world = self.world;
        self.fields = vec![FieldInfo::default(); usize::from(self.field_count)];
        for (i, term) in self.terms.iter().enumerate() {
            let field = usize::from(term.field_index);
            self.fields[field].id = term.id;

            if !term.match_zero() {
                world.keep_alive(term.id);
            }

            if term.flags.contains(TermFlags::IS_OR) && or_other_type(world, &self.terms, i) {
                self.fields[field] = FieldInfo::default();
                continue;
            }
            if term.id.is_pair() && term.id.first() == Entity::WILDCARD.index() {
                continue;
            }
            if let Some(info) = world.type_info(term.id) {
                self.fields[field].size = info.size;
            }
        }
    }

    fn derive_trivial(&mut self) {
        if !self.flags.contains(QueryFlags::MATCH_ONLY_THIS)
            || self
                .flags
                .intersects(QueryFlags::HAS_PRED | QueryFlags::MATCH_DISABLED | QueryFlags::MATCH_PREFAB)
        {
            return;
        }

        self.flags.insert(QueryFlags::MATCH_ONLY_SELF);
        let mut trivial = true;
        for term in &self.terms {
            if term.src.flags.contains(RefFlags::UP) {
                self.flags.remove(QueryFlags::MATCH_ONLY_SELF);
            }
            if is_childof_pair(term) || !term.flags.contains(TermFlags::IS_TRIVIAL) {
                trivial = false;
            }
        }
        if trivial && !self.terms.is_empty() {
            self.flags.insert(QueryFlags::IS_TRIVIAL);
        }
    }

    fn finish(self) -> Query {
        debug!(
            terms = self.terms.len(),
            fields = self.field_count,
            flags = ?self.flags,
            "validated query"
        );
        Query {
            terms: self.terms,
            flags: self.flags,
            field_count: self.field_count,
            fields: self.fields,
            static_id_fields: self.static_id_fields,
            data_fields: self.data_fields,
            set_fields: self.set_fields,
            fixed_fields: self.fixed_fields,
            var_fields: self.var_fields,
            options: self.options.clone(),
            name: self.name.map(str::to_string),
        }
    }
}

/// `(ChildOf, parent)` with a nonzero parent.
fn is_childof_pair(term: &Term) -> bool {
    term.first.id == Entity::CHILD_OF && !term.second.id.is_null()
}

fn is_wildcard_index(index: u32) -> bool {
    index == Entity::WILDCARD.index() || index == Entity::ANY.index()
}

/// Returns the entity that provides the type info of an id.
fn type_source(world: &impl WorldLookup, id: Id) -> Option<u32> {
    let has_type = |index: u32| {
        world
            .get_alive(index)
            .is_some_and(|e| world.type_info(Id::from(e)).is_some())
    };
    if has_type(id.first()) {
        Some(id.first())
    } else if id.is_pair() && has_type(id.second()) {
        Some(id.second())
    } else {
        None
    }
}

/// Returns true if the term's type differs from the first term of its OR chain.
fn or_other_type(world: &impl WorldLookup, terms: &[Term], index: usize) -> bool {
    let mut start = index;
    while start > 0 && terms[start - 1].oper == Oper::Or {
        start -= 1;
    }
    if start == index {
        return false;
    }
    type_source(world, terms[start].id) != type_source(world, terms[index].id)
}
