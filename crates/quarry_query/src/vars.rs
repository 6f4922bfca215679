//! Query variables: allocation, lookup and discovery.
//!
//! Every query has at least one variable, the implicit `$this` table variable
//! at [`VarId::THIS`]. Named variables used as a term source get an entity
//! variable (public) plus a hidden table variable appended after all public
//! variables. Anonymous variables created during compilation (wildcards,
//! inheritance walks, transitive targets) come last.

use std::sync::Arc;

use quarry_foundation::{Entity, Error, Result, VarId, VarSet};
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::query::Query;
use crate::term::{Oper, TermFlags, TermRef};

/// Name of the implicit source variable.
pub const THIS_NAME: &str = "this";

/// What a variable binds to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VarKind {
    /// A whole table (archetype).
    Table,
    /// A single entity.
    Entity,
}

/// A reference to a variable by name.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarRef<'a> {
    /// The implicit `$this` variable.
    Implicit,
    /// A named variable.
    Named(&'a str),
}

impl<'a> VarRef<'a> {
    /// Returns the variable a term reference names, if it names one.
    ///
    /// Anonymous wildcards (`*`, `_`) don't name a variable.
    #[must_use]
    pub fn of(r: &'a TermRef) -> Option<Self> {
        if !r.is_var() {
            return None;
        }
        if r.id == Entity::THIS && r.name.is_none() {
            return Some(VarRef::Implicit);
        }
        r.name.as_deref().map(VarRef::from)
    }

    /// Returns the variable name, `this` for the implicit variable.
    #[must_use]
    pub fn name(self) -> &'a str {
        match self {
            VarRef::Implicit => THIS_NAME,
            VarRef::Named(name) => name,
        }
    }
}

impl<'a> From<&'a str> for VarRef<'a> {
    fn from(name: &'a str) -> Self {
        if name == THIS_NAME {
            VarRef::Implicit
        } else {
            VarRef::Named(name)
        }
    }
}

/// One query variable.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Var {
    /// Dense index.
    pub id: VarId,
    /// Table or entity.
    pub kind: VarKind,
    /// Name, `None` for anonymous variables.
    pub name: Option<Arc<str>>,
    /// What an anonymous variable stands for, used when rendering.
    pub label: Option<Arc<str>>,
    /// Table variable that holds the table of this entity variable.
    pub table_id: Option<VarId>,
    /// Entity variable a lookup (`$base.child`) is resolved against.
    pub base_id: Option<VarId>,
    /// Child path of a lookup variable.
    pub lookup: Option<Arc<str>>,
    /// Not visible to the application.
    pub anonymous: bool,
}

/// The variables of one query.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VarTable {
    vars: Vec<Var>,
    public_count: usize,
    has_table_this: bool,
    src_vars: Vec<Option<VarId>>,
}

impl Default for VarTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VarTable {
    /// Creates a table that only holds the `$this` table variable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vars: vec![Var {
                id: VarId::THIS,
                kind: VarKind::Table,
                name: None,
                label: None,
                table_id: None,
                base_id: None,
                lookup: None,
                anonymous: false,
            }],
            public_count: 1,
            has_table_this: true,
            src_vars: Vec::new(),
        }
    }

    /// Returns the number of variables, including hidden ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Always false: `$this` is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Returns the number of variables visible to the application.
    #[must_use]
    pub fn public_count(&self) -> usize {
        self.public_count
    }

    /// Returns false when `$this` is only ever used as an entity.
    #[must_use]
    pub fn has_table_this(&self) -> bool {
        self.has_table_this
    }

    /// Returns the variable with the given id.
    #[must_use]
    pub fn get(&self, id: VarId) -> Option<&Var> {
        self.vars.get(id.index())
    }

    /// Iterates all variables.
    pub fn iter(&self) -> impl Iterator<Item = &Var> {
        self.vars.iter()
    }

    /// Returns the variable used as source of a field, if it isn't `$this`.
    #[must_use]
    pub fn src_var(&self, field: u8) -> Option<VarId> {
        self.src_vars.get(usize::from(field)).copied().flatten()
    }

    /// Returns the kind of a variable.
    ///
    /// # Panics
    ///
    /// Panics if the id was not allocated by this table.
    #[must_use]
    pub fn kind(&self, id: VarId) -> VarKind {
        self.vars[id.index()].kind
    }

    /// Returns true if the variable is anonymous.
    #[must_use]
    pub fn is_anonymous(&self, id: VarId) -> bool {
        self.get(id).is_some_and(|var| var.anonymous)
    }

    /// Finds a variable of the given kind.
    #[must_use]
    pub fn find(&self, var: VarRef<'_>, kind: VarKind) -> Option<VarId> {
        if kind == VarKind::Table && var == VarRef::Implicit {
            return self.has_table_this.then_some(VarId::THIS);
        }
        let name = var.name();
        self.vars
            .iter()
            .skip(1)
            .find(|v| v.kind == kind && v.name.as_deref() == Some(name))
            .map(|v| v.id)
    }

    /// Resolves the variable that carries the most information right now.
    ///
    /// With a fixed `kind` this is a plain lookup. Otherwise a written entity
    /// variable wins, then an unwritten table variable, then whichever exists.
    #[must_use]
    pub fn most_specific(
        &self,
        var: VarRef<'_>,
        kind: Option<VarKind>,
        written: VarSet,
    ) -> Option<VarId> {
        if let Some(kind) = kind {
            return self.find(var, kind);
        }

        let evar = self.find(var, VarKind::Entity);
        if let Some(evar) = evar {
            if written.contains(evar) {
                return Some(evar);
            }
        }

        match self.find(var, VarKind::Table) {
            Some(tvar) => Some(tvar),
            None => evar,
        }
    }

    /// Adds a named variable, or returns the existing one with the same kind.
    ///
    /// Names with a `.` are lookup variables and always entities. A new
    /// entity variable is linked to a table variable with the same name.
    ///
    /// # Errors
    ///
    /// Returns `TooManyVariables` when the table is full.
    pub fn add(&mut self, name: &str, kind: VarKind) -> Result<VarId> {
        let dot = name.find('.');
        let kind = if dot.is_some() { VarKind::Entity } else { kind };

        let var = VarRef::from(name);
        if let Some(existing) = self.find(var, kind) {
            return Ok(existing);
        }
        let table_id = match kind {
            VarKind::Entity => self.find(var, VarKind::Table),
            VarKind::Table => None,
        };

        let id = VarId::new(self.vars.len())?;
        self.vars.push(Var {
            id,
            kind,
            name: Some(Arc::from(name)),
            label: None,
            table_id,
            base_id: None,
            lookup: dot.map(|dot| Arc::from(&name[dot + 1..])),
            anonymous: name.starts_with('_'),
        });
        trace!(var = %id, name, ?kind, "allocated variable");
        Ok(id)
    }

    /// Adds an anonymous variable.
    ///
    /// # Errors
    ///
    /// Returns `TooManyVariables` when the table is full.
    pub fn add_anonymous(&mut self, kind: VarKind, label: Option<&str>) -> Result<VarId> {
        let id = VarId::new(self.vars.len())?;
        self.vars.push(Var {
            id,
            kind,
            name: None,
            label: label.map(Arc::from),
            table_id: None,
            base_id: None,
            lookup: None,
            anonymous: true,
        });
        trace!(var = %id, label, ?kind, "allocated anonymous variable");
        Ok(id)
    }

    /// Renders a variable as `$name`, `$this` or `$[label]#id` for anonymous ones.
    #[must_use]
    pub fn display_name(&self, id: VarId) -> String {
        if id == VarId::THIS {
            return format!("${THIS_NAME}");
        }
        match self.get(id) {
            Some(Var {
                name: Some(name), ..
            }) => format!("${name}"),
            Some(Var {
                label: Some(label),
                ..
            }) => format!("$[{label}]{}", id.index()),
            _ => format!("${}", id.index()),
        }
    }

    /// Returns the user-facing name of a variable, used in error messages.
    #[must_use]
    pub fn name_of(&self, id: VarId) -> String {
        match self.get(id).and_then(|var| var.name.as_deref()) {
            Some(name) => name.to_string(),
            None if id == VarId::THIS => THIS_NAME.to_string(),
            None => format!("#{}", id.index()),
        }
    }

    fn var_mut(&mut self, id: VarId) -> &mut Var {
        &mut self.vars[id.index()]
    }

    fn add_for_ref(&mut self, r: &TermRef, kind: VarKind) -> Result<Option<VarId>> {
        match VarRef::of(r) {
            Some(var) => self.add(var.name(), kind).map(Some),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Finds every named variable a query uses.
    ///
    /// Runs before any instruction is emitted so that public variables get
    /// stable, dense ids in order of first use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTerm` when an anonymous variable is the source of a
    /// data term, or `TooManyVariables`.
    pub fn discover(query: &Query) -> Result<Self> {
        let mut table = Self::new();
        table.src_vars = vec![None; usize::from(query.field_count)];

        // Entity variables used as source that still need a table variable.
        let mut needs_table: Vec<VarId> = Vec::new();
        let mut scope = 0usize;
        let mut scoped_from = 0usize;
        let mut table_this = false;
        let mut entity_before_table_this = false;

        for term in &query.terms {
            if term.is_scope_open() {
                if scope == 0 {
                    scoped_from = table.vars.len();
                }
                scope += 1;
                continue;
            }
            if term.is_scope_close() {
                scope = scope.saturating_sub(1);
                if scope == 0 {
                    for var in &mut table.vars[scoped_from..] {
                        var.anonymous = true;
                    }
                }
                continue;
            }

            let first_var = table.add_for_ref(&term.first, VarKind::Entity)?;

            match VarRef::of(&term.src) {
                Some(VarRef::Named(name)) => {
                    let var_id = match table.find(VarRef::Named(name), VarKind::Entity) {
                        Some(id) if Some(id) != first_var => id,
                        _ => table.add(name, VarKind::Entity)?,
                    };

                    let var = &table.vars[var_id.index()];
                    if var.lookup.is_none() && !needs_table.contains(&var_id) {
                        needs_table.push(var_id);
                    }
                    if !term.flags.contains(TermFlags::NO_DATA) && var.anonymous {
                        return Err(Error::invalid_term(format!(
                            "can't use anonymous variable '{name}' as source of data term"
                        )));
                    }
                    table.src_vars[usize::from(term.field_index)] = Some(var_id);
                }
                Some(VarRef::Implicit) => {
                    if term.is_builtin_pred() && term.oper == Oper::Or {
                        table.add(THIS_NAME, VarKind::Entity)?;
                    }
                }
                None => {}
            }

            table.add_for_ref(&term.second, VarKind::Entity)?;

            if term.flags.contains(TermFlags::IS_MEMBER) {
                table.add_for_ref(&term.src, VarKind::Entity)?;
            }

            if term.match_this() {
                table_this = true;
            }
            let this_ref = |r: &TermRef| VarRef::of(r) == Some(VarRef::Implicit);
            if (this_ref(&term.first) || this_ref(&term.second)) && !table_this {
                entity_before_table_this = true;
            }
        }

        let lookup_bases = table.resolve_lookup_bases(&needs_table)?;

        for &var_id in &needs_table {
            let name = table.vars[var_id.index()].name.clone();
            if let Some(name) = name {
                let tvar = table.add(&name, VarKind::Table)?;
                table.var_mut(var_id).table_id = Some(tvar);
            }
        }

        // Lookups whose base only gets a table variable in the step above.
        for (var_id, base) in lookup_bases {
            if let Some(tvar) = table.find(VarRef::from(base.as_str()), VarKind::Table) {
                table.var_mut(var_id).table_id = Some(tvar);
            }
        }

        table.public_count = table.vars.len() - needs_table.len();
        table.has_table_this = !entity_before_table_this;
        Ok(table)
    }

    /// Links lookup variables to their base. Returns lookups whose base table
    /// variable is not allocated yet.
    fn resolve_lookup_bases(&mut self, needs_table: &[VarId]) -> Result<Vec<(VarId, String)>> {
        let mut pending = Vec::new();
        let count = self.vars.len();

        for index in 1..count {
            let var = &self.vars[index];
            let (Some(name), Some(_)) = (var.name.clone(), var.lookup.as_ref()) else {
                continue;
            };
            let var_id = var.id;
            let base = name.split('.').next().unwrap_or_default().to_string();
            let base_ref = VarRef::from(base.as_str());

            let base_table = self.find(base_ref, VarKind::Table);
            if let Some(tvar) = base_table {
                self.var_mut(var_id).table_id = Some(tvar);
            } else {
                let deferred = needs_table.iter().any(|&id| {
                    self.vars[id.index()].name.as_deref() == Some(base.as_str())
                });
                if deferred {
                    pending.push((var_id, base.clone()));
                }
            }

            let base_entity = match self.find(base_ref, VarKind::Entity) {
                Some(evar) => evar,
                None => {
                    let base_name = match base_table {
                        Some(tvar) if tvar != VarId::THIS => {
                            self.name_of(tvar)
                        }
                        _ => THIS_NAME.to_string(),
                    };
                    self.add(&base_name, VarKind::Entity)?
                }
            };
            self.var_mut(var_id).base_id = Some(base_entity);
        }
        Ok(pending)
    }
}
