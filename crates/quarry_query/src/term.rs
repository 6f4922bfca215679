//! The term model: one clause of a query.
//!
//! A [`Term`] matches `first(src, second)`: the predicate `first`, an
//! optional pair target `second`, and the source `src` the predicate is
//! evaluated on. Each of the three is a [`TermRef`], which can be a fixed
//! entity, a variable, or an unresolved name.

use std::fmt::Write as _;
use std::sync::Arc;

use quarry_foundation::{Entity, Id};
use quarry_storage::WorldLookup;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::flags::bit_flags;

bit_flags! {
    /// Identity and traversal flags of a [`TermRef`].
    pub struct RefFlags(u16) {
        /// Match the entity itself.
        const SELF = 1 << 0;
        /// Match by traversing upwards along the term's relationship.
        const UP = 1 << 1;
        /// Traverse upwards, ordering results breadth-first.
        const CASCADE = 1 << 2;
        /// Reverse the cascade order.
        const DESC = 1 << 3;
        /// The reference is a variable.
        const IS_VARIABLE = 1 << 4;
        /// The reference is a fixed entity.
        const IS_ENTITY = 1 << 5;
        /// The reference is a literal name.
        const IS_NAME = 1 << 6;
    }
}

impl RefFlags {
    /// All traversal flags.
    pub const TRAVERSE: RefFlags = RefFlags::from_bits(0b1111);
    /// All identity flags.
    pub const IDENTITY: RefFlags = RefFlags::from_bits(0b111_0000);

    /// Returns only the traversal flags.
    #[must_use]
    pub fn traversal(self) -> RefFlags {
        self & RefFlags::TRAVERSE
    }
}

/// One of the three references of a term.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TermRef {
    /// Resolved entity, or [`Entity::NULL`].
    pub id: Entity,
    /// Name of the entity or variable (without `$` once validated).
    pub name: Option<Arc<str>>,
    /// Identity and traversal flags.
    pub flags: RefFlags,
}

impl TermRef {
    /// A reference to a fixed entity.
    #[must_use]
    pub fn entity(id: Entity) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// A reference by name. A leading `$` makes it a variable.
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self {
            name: Some(Arc::from(name)),
            ..Self::default()
        }
    }

    /// A named variable.
    #[must_use]
    pub fn var(name: &str) -> Self {
        Self {
            name: Some(Arc::from(name)),
            flags: RefFlags::IS_VARIABLE,
            ..Self::default()
        }
    }

    /// A literal string, used as the right-hand side of name predicates.
    #[must_use]
    pub fn literal(text: &str) -> Self {
        Self {
            name: Some(Arc::from(text)),
            flags: RefFlags::IS_NAME,
            ..Self::default()
        }
    }

    /// The implicit `$this` variable.
    #[must_use]
    pub fn this() -> Self {
        Self {
            id: Entity::THIS,
            flags: RefFlags::IS_VARIABLE,
            ..Self::default()
        }
    }

    /// The 0 entity: a term with this source matches nothing and produces no rows.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            flags: RefFlags::IS_ENTITY,
            ..Self::default()
        }
    }

    /// Builder method to add flags.
    #[must_use]
    pub fn with_flags(mut self, flags: RefFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Builder method to match only the entity itself.
    #[must_use]
    pub fn self_only(self) -> Self {
        self.with_flags(RefFlags::SELF)
    }

    /// Builder method to match by upwards traversal only.
    #[must_use]
    pub fn up(self) -> Self {
        self.with_flags(RefFlags::UP)
    }

    /// Builder method to match on the entity itself or upwards.
    #[must_use]
    pub fn self_up(self) -> Self {
        self.with_flags(RefFlags::SELF | RefFlags::UP)
    }

    /// Builder method to match upwards in breadth-first order.
    #[must_use]
    pub fn cascade(self) -> Self {
        self.with_flags(RefFlags::CASCADE)
    }

    /// Returns true if the reference carries an id, a name, or is the 0 entity.
    #[must_use]
    pub fn is_set(&self) -> bool {
        !self.id.is_null() || self.name.is_some() || self.flags.contains(RefFlags::IS_ENTITY)
    }

    /// Returns true if the reference is a variable.
    #[must_use]
    pub fn is_var(&self) -> bool {
        self.flags.contains(RefFlags::IS_VARIABLE)
    }

    /// Returns true if the reference is a fixed entity.
    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.flags.contains(RefFlags::IS_ENTITY)
    }

    /// Returns true if the reference is a literal name.
    #[must_use]
    pub fn is_name(&self) -> bool {
        self.flags.contains(RefFlags::IS_NAME)
    }

    /// Returns true if the only traversal flag is `SELF`.
    #[must_use]
    pub fn is_self_only(&self) -> bool {
        self.flags.traversal() == RefFlags::SELF
    }

    /// Returns true if this is an unnamed variable bound to `var`.
    #[must_use]
    pub fn is_builtin_var(&self, var: Entity) -> bool {
        self.is_var() && self.id == var
    }

    /// Returns true if this is an anonymous `*` or `_` variable.
    #[must_use]
    pub fn is_wildcard_var(&self) -> bool {
        self.is_var()
            && self.name.is_none()
            && (self.id == Entity::WILDCARD || self.id == Entity::ANY)
    }
}

impl From<Entity> for TermRef {
    fn from(id: Entity) -> Self {
        TermRef::entity(id)
    }
}

impl From<&str> for TermRef {
    fn from(name: &str) -> Self {
        TermRef::name(name)
    }
}

/// Term operator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Oper {
    /// The source must match.
    #[default]
    And,
    /// This term or the next one must match.
    Or,
    /// The source must not match.
    Not,
    /// The source may match.
    Optional,
    /// The source must have all ids of the term's type list.
    AndFrom,
    /// The source must have one of the ids of the term's type list.
    OrFrom,
    /// The source must have none of the ids of the term's type list.
    NotFrom,
}

impl Oper {
    /// Returns true for `AndFrom`, `OrFrom` and `NotFrom`.
    #[must_use]
    pub const fn is_from(self) -> bool {
        matches!(self, Oper::AndFrom | Oper::OrFrom | Oper::NotFrom)
    }
}

/// Data access intent of a term.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InOut {
    /// Decided by the query: usually read-write for `$this`, read for other sources.
    #[default]
    Default,
    /// The term doesn't access data.
    None,
    /// Read only.
    In,
    /// Write only.
    Out,
    /// Read and write.
    InOut,
}

bit_flags! {
    /// Flags derived by the validator.
    pub struct TermFlags(u16) {
        /// The term is part of an OR chain.
        const IS_OR = 1 << 0;
        /// The term can be evaluated by the trivial iterator.
        const IS_TRIVIAL = 1 << 1;
        /// The term can be evaluated by a query cache.
        const IS_CACHEABLE = 1 << 2;
        /// The relationship is transitive.
        const TRANSITIVE = 1 << 3;
        /// The relationship is reflexive.
        const REFLEXIVE = 1 << 4;
        /// The id is matched through its IsA subtypes.
        const ID_INHERITED = 1 << 5;
        /// The relationship is a union.
        const IS_UNION = 1 << 6;
        /// The component can be toggled per entity.
        const IS_TOGGLE = 1 << 7;
        /// The term filters on a component member.
        const IS_MEMBER = 1 << 8;
        /// The term is inside a `{ }` scope.
        const IS_SCOPE = 1 << 9;
        /// The term produces no data.
        const NO_DATA = 1 << 10;
        /// The term uses `_` for first or second.
        const MATCH_ANY = 1 << 11;
        /// The term uses `_` as source.
        const MATCH_ANY_SRC = 1 << 12;
    }
}

/// One clause of a query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Term {
    /// Component id, derived from `first` and `second` during validation.
    pub id: Id,
    /// Predicate (component or relationship).
    pub first: TermRef,
    /// Pair target.
    pub second: TermRef,
    /// Source the predicate is matched on.
    pub src: TermRef,
    /// Relationship used for upwards traversal.
    pub trav: Entity,
    /// Operator.
    pub oper: Oper,
    /// Data access intent.
    pub inout: InOut,
    /// Derived flags.
    pub flags: TermFlags,
    /// Index of the result field.
    pub field_index: u8,
}

impl Term {
    /// A term for a component or tag.
    #[must_use]
    pub fn new(first: impl Into<TermRef>) -> Self {
        Self {
            first: first.into(),
            ..Self::default()
        }
    }

    /// A term for the pair `(first, second)`.
    #[must_use]
    pub fn pair(first: impl Into<TermRef>, second: impl Into<TermRef>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
            ..Self::default()
        }
    }

    /// A term for a raw id; `first`/`second` are filled in during validation.
    #[must_use]
    pub fn from_id(id: Id) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Opens a `{ }` scope.
    #[must_use]
    pub fn scope_open() -> Self {
        Self::new(Entity::SCOPE_OPEN).src(TermRef::zero())
    }

    /// Closes a `{ }` scope.
    #[must_use]
    pub fn scope_close() -> Self {
        Self::new(Entity::SCOPE_CLOSE).src(TermRef::zero())
    }

    /// `$left == right`.
    #[must_use]
    pub fn pred_eq(left: &str, right: impl Into<TermRef>) -> Self {
        Self::pair(Entity::PRED_EQ, right).src(TermRef::var(left))
    }

    /// `$left ~= "pattern"`.
    #[must_use]
    pub fn pred_match(left: &str, pattern: &str) -> Self {
        Self::pair(Entity::PRED_MATCH, TermRef::literal(pattern)).src(TermRef::var(left))
    }

    /// Builder method to set the source.
    #[must_use]
    pub fn src(mut self, src: impl Into<TermRef>) -> Self {
        self.src = src.into();
        self
    }

    /// Builder method to set the pair target.
    #[must_use]
    pub fn second(mut self, second: impl Into<TermRef>) -> Self {
        self.second = second.into();
        self
    }

    /// Builder method to set the operator.
    #[must_use]
    pub fn oper(mut self, oper: Oper) -> Self {
        self.oper = oper;
        self
    }

    /// Builder method for `!term`.
    #[must_use]
    pub fn not(self) -> Self {
        self.oper(Oper::Not)
    }

    /// Builder method for `?term`.
    #[must_use]
    pub fn optional(self) -> Self {
        self.oper(Oper::Optional)
    }

    /// Builder method for `term || next`.
    #[must_use]
    pub fn or(self) -> Self {
        self.oper(Oper::Or)
    }

    /// Builder method to set the data access intent.
    #[must_use]
    pub fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }

    /// Builder method to set the traversal relationship.
    #[must_use]
    pub fn trav(mut self, rel: Entity) -> Self {
        self.trav = rel;
        self
    }

    /// Builder method to match upwards along `rel`.
    #[must_use]
    pub fn up(mut self, rel: Entity) -> Self {
        self.src.flags.insert(RefFlags::UP);
        self.trav(rel)
    }

    /// Builder method to match on the source itself or upwards along `rel`.
    #[must_use]
    pub fn self_up(mut self, rel: Entity) -> Self {
        self.src.flags.insert(RefFlags::SELF | RefFlags::UP);
        self.trav(rel)
    }

    /// Builder method to match only on the source itself.
    #[must_use]
    pub fn self_only(mut self) -> Self {
        self.src.flags.insert(RefFlags::SELF);
        self
    }

    /// Returns true if the source is the `$this` variable.
    #[must_use]
    pub fn match_this(&self) -> bool {
        self.src.is_var() && self.src.id == Entity::THIS
    }

    /// Returns true if the source is the 0 entity.
    #[must_use]
    pub fn match_zero(&self) -> bool {
        self.src.id.is_null() && self.src.is_entity()
    }

    /// Returns true if `first` is one of the builtin predicates.
    #[must_use]
    pub fn is_builtin_pred(&self) -> bool {
        !self.first.is_var() && !self.first.is_name() && self.first.id.is_builtin_predicate()
    }

    /// Returns true for `{`.
    #[must_use]
    pub fn is_scope_open(&self) -> bool {
        self.first.id == Entity::SCOPE_OPEN
    }

    /// Returns true for `}`.
    #[must_use]
    pub fn is_scope_close(&self) -> bool {
        self.first.id == Entity::SCOPE_CLOSE
    }

    /// Renders the term in query-expression form.
    #[must_use]
    pub fn render(&self, world: &impl WorldLookup) -> String {
        let mut out = String::new();

        if self.is_scope_open() {
            if self.oper == Oper::Not {
                out.push('!');
            }
            out.push('{');
            return out;
        }
        if self.is_scope_close() {
            out.push('}');
            return out;
        }

        out.push_str(match self.oper {
            Oper::Not => "!",
            Oper::Optional => "?",
            Oper::AndFrom => "and | ",
            Oper::OrFrom => "or | ",
            Oper::NotFrom => "not | ",
            Oper::And | Oper::Or => "",
        });

        if self.is_builtin_pred() {
            let op = match (self.first.id, self.oper == Oper::Not) {
                (e, false) if e == Entity::PRED_EQ => "==",
                (e, true) if e == Entity::PRED_EQ => "!=",
                (e, _) if e == Entity::PRED_MATCH => "~=",
                _ => "lookup",
            };
            let _ = write!(
                out,
                "{} {op} {}",
                render_ref(world, &self.src),
                render_ref(world, &self.second)
            );
            return out;
        }

        let first = if self.first.is_set() {
            render_ref(world, &self.first)
        } else {
            render_id_element(world, self.id.first())
        };
        let has_second = self.second.is_set() || self.id.is_pair();
        let second = has_second.then(|| {
            if self.second.is_set() {
                render_ref(world, &self.second)
            } else {
                render_id_element(world, self.id.second())
            }
        });

        let default_src = !self.src.is_set()
            || (self.match_this() && self.src.name.is_none() && !self.src.flags.contains(RefFlags::UP));

        if default_src {
            match second {
                Some(second) => {
                    let _ = write!(out, "({first}, {second})");
                }
                None => out.push_str(&first),
            }
        } else {
            let _ = write!(out, "{first}({}", render_ref(world, &self.src));
            if self.src.flags.contains(RefFlags::UP) {
                out.push_str(if self.src.flags.contains(RefFlags::SELF) {
                    "|self|up"
                } else {
                    "|up"
                });
                if self.src.flags.contains(RefFlags::CASCADE) {
                    out.push_str("|cascade");
                }
                if !self.trav.is_null() {
                    let _ = write!(out, " {}", world.path(self.trav));
                }
            }
            if let Some(second) = second {
                let _ = write!(out, ", {second}");
            }
            out.push(')');
        }
        out
    }
}

fn render_id_element(world: &impl WorldLookup, index: u32) -> String {
    match world.get_alive(index) {
        Some(entity) => world.path(entity),
        None => format!("#{index}"),
    }
}

fn render_ref(world: &impl WorldLookup, r: &TermRef) -> String {
    if r.is_var() {
        return match (&r.name, r.id) {
            (Some(name), _) => format!("${name}"),
            (None, id) if id == Entity::THIS => "$this".to_string(),
            (None, id) if id == Entity::WILDCARD => "*".to_string(),
            (None, id) if id == Entity::ANY => "_".to_string(),
            (None, id) if id == Entity::VARIABLE => "$".to_string(),
            (None, id) => format!("${}", id.index()),
        };
    }
    if r.is_name() {
        return format!("\"{}\"", r.name.as_deref().unwrap_or_default());
    }
    if let Some(name) = &r.name {
        return name.to_string();
    }
    if r.id.is_null() {
        "#0".to_string()
    } else {
        world.path(r.id)
    }
}

/// Renders a term list one term per line, marking `marked` with ` > `.
///
/// Or terms end in ` ||`, all other terms except the last end in `,`.
#[must_use]
pub fn render_terms(world: &impl WorldLookup, terms: &[Term], marked: Option<usize>) -> String {
    let mut out = String::new();
    let count = terms.len();
    for (i, term) in terms.iter().enumerate() {
        out.push_str(if marked == Some(i) { " > " } else { "   " });
        out.push_str(&term.render(world));
        if term.oper == Oper::Or {
            out.push_str(" ||");
        } else if i + 1 != count {
            out.push(',');
        }
        out.push('\n');
    }
    out
}
