//! Instruction compiler.
//!
//! Compiles a validated [`Query`] into a [`Program`] in a single pass over the
//! terms. Instructions are appended to a flat buffer; control blocks are
//! linked through labels once their `End` is emitted.
//!
//! Term order is mostly preserved, with three exceptions:
//! - terms with a fixed source go first
//! - leading Optional terms go after the terms they don't depend on
//! - an And term whose variables are all unbound is deferred in favour of
//!   the next term with a bound variable

mod context;
mod term;

use quarry_foundation::{Entity, Error, ErrorContext, ErrorKind, Id, Result, VarId, VarSet};
use quarry_storage::WorldLookup;
use tracing::{debug, trace};

use crate::config::MAX_TERMS;
use crate::program::{Instruction, Label, OpKind, Operand, Payload, Program};
use crate::query::{FieldSet, Query, QueryFlags};
use crate::term::{Oper, RefFlags, Term, TermFlags, render_terms};
use crate::vars::{VarKind, VarRef, VarTable};

use context::CompileContext;

/// Compiles validated queries into instruction programs.
pub struct Compiler;

impl Compiler {
    /// Compiles a validated query.
    ///
    /// # Errors
    ///
    /// Returns `UnknownVariable`, `UninitializedVariable`, `TooManyVariables`
    /// or `InvalidTerm` (member terms). Errors raised while compiling a term
    /// carry the term index and the marked term list. A query with more than
    /// [`MAX_TERMS`] terms fails with `MaxTermsExceeded`.
    pub fn compile(world: &impl WorldLookup, query: &Query) -> Result<Program> {
        if query.terms.len() > MAX_TERMS {
            return Err(Error::new(ErrorKind::MaxTermsExceeded {
                count: query.terms.len(),
                limit: MAX_TERMS,
            }));
        }
        let vars = VarTable::discover(query)?;
        let mut compilation = Compilation {
            world,
            query,
            vars,
            ctx: CompileContext::new(),
            current_term: None,
        };

        match compilation.run() {
            Ok(()) => Ok(compilation.finish()),
            Err(err) => Err(compilation.attach_context(err)),
        }
    }
}

/// State of one compilation.
struct Compilation<'a, W: WorldLookup> {
    world: &'a W,
    query: &'a Query,
    vars: VarTable,
    ctx: CompileContext,
    current_term: Option<usize>,
}

impl<W: WorldLookup> Compilation<'_, W> {
    fn attach_context(&self, err: Error) -> Error {
        let Some(index) = self.current_term else {
            return err;
        };
        let mut context = ErrorContext::new()
            .with_term(index)
            .with_query(render_terms(self.world, &self.query.terms, Some(index)));
        if let Some(name) = &self.query.name {
            context = context.with_name(name.clone());
        }
        err.with_context(context)
    }

    fn finish(self) -> Program {
        let program = Program {
            ops: self.ctx.ops,
            vars: self.vars,
        };
        debug_assert!(
            program.check_blocks().is_ok(),
            "compiled program has unbalanced blocks"
        );
        debug!(
            terms = self.query.term_count(),
            ops = program.len(),
            vars = program.vars.len(),
            "compiled query"
        );
        program
    }

    /// Appends an instruction.
    fn insert(&mut self, op: Instruction) -> Label {
        let kind = op.kind;
        let label = self.ctx.insert(op);
        trace!(label = %label, op = %kind, "emitted instruction");
        label
    }

    // =========================================================================
    // Program Layout
    // =========================================================================

    fn run(&mut self) -> Result<()> {
        let query = self.query;
        let terms = &query.terms;
        let count = terms.len();

        if terms.iter().any(|term| term.src.is_entity()) {
            self.insert(Instruction::new(OpKind::SetFixed));
        }
        let has_fixed_ids = terms
            .iter()
            .enumerate()
            .any(|(i, term)| self.is_fixed_id(i, term) || term.match_zero());
        if has_fixed_ids {
            self.insert(Instruction::new(OpKind::SetIds));
        }

        let mut compiled = 0u64;
        let mut populated = FieldSet::EMPTY;
        self.insert_fixed_src_terms(&mut compiled, &mut populated)?;
        self.insert_trivial_search(&mut compiled, &mut populated);

        // Leading optional terms would otherwise have to scan every table.
        let mut start_term = terms
            .iter()
            .take_while(|term| term.oper == Oper::Optional)
            .count();

        loop {
            let mut i = start_term;
            while i < count {
                if compiled & (1 << i) != 0 {
                    i += 1;
                    continue;
                }
                let term = &terms[i];
                if term.oper == Oper::Optional && start_term != 0 {
                    break;
                }

                let mut index = i;
                let mut repeat = false;
                let can_reorder = term.oper == Oper::And && !self.is_or(i);
                if can_reorder && !self.ctx.written.is_empty() && self.term_is_unknown(term)? {
                    if let Some(known) = self.next_known(i + 1, compiled)? {
                        trace!(deferred = i, compiled = known, "reordered unknown term");
                        index = known;
                        repeat = true;
                    }
                }

                self.current_term = Some(index);
                self.compile_term(index, &mut populated)?;
                compiled |= 1 << index;
                if !repeat {
                    i += 1;
                }
            }

            if start_term == 0 {
                break;
            }
            start_term = 0;
        }
        self.current_term = None;

        self.insert_epilogue(populated)
    }

    fn insert_epilogue(&mut self, populated: FieldSet) -> Result<()> {
        let query = self.query;

        if let Some(this) = self.vars.find(VarRef::Implicit, VarKind::Entity) {
            if self.ctx.written.contains(this) {
                self.insert(Instruction {
                    first: Operand::Var(this),
                    ..Instruction::new(OpKind::SetThis)
                });
            }
        }

        // Named table variables have to be returned as entities.
        let tables: Vec<(VarId, VarId)> = self
            .vars
            .iter()
            .filter(|var| var.id != VarId::THIS && var.kind == VarKind::Table)
            .filter_map(|var| {
                let name = var.name.as_deref()?;
                let evar = self.vars.find(VarRef::from(name), VarKind::Entity)?;
                Some((var.id, evar))
            })
            .collect();
        for (tvar, evar) in tables {
            if !self.ctx.written.contains(evar) && !self.vars.is_anonymous(evar) {
                self.insert_each(tvar, evar, false);
            }
        }

        let named_src_var = (0..query.field_count)
            .filter_map(|field| self.vars.src_var(field))
            .any(|var| !self.vars.is_anonymous(var));
        if named_src_var {
            self.insert(Instruction::new(OpKind::SetVars));
        }

        if query.term_count() == self.ctx.skipped {
            self.ctx.ops.clear();
            self.insert(Instruction::new(OpKind::Nothing));
            return Ok(());
        }

        if !query.options.table_only {
            self.insert_toggles()?;
        }
        self.insert_populate(query.data_fields.difference(populated));
        self.insert(Instruction::new(OpKind::Yield));
        Ok(())
    }

    /// Compiles terms with a fixed source before everything else, followed
    /// by a populate for their data fields.
    fn insert_fixed_src_terms(&mut self, compiled: &mut u64, populated_out: &mut FieldSet) -> Result<()> {
        let query = self.query;
        let mut populated = FieldSet::EMPTY;

        for (i, term) in query.terms.iter().enumerate() {
            // `!$var(e)` before `Tag($var)` would reject every match.
            if term.oper == Oper::Not && matches_multiple(term) {
                continue;
            }
            if term.flags.contains(TermFlags::IS_SCOPE) {
                continue;
            }
            if !term.src.is_entity() || term.src.id.is_null() {
                continue;
            }

            self.current_term = Some(i);
            self.compile_term(i, populated_out)?;
            *compiled |= 1 << i;
            if query.data_fields.contains(term.field_index) {
                populated.insert(term.field_index);
            }
        }
        self.current_term = None;

        self.insert_populate(populated);
        *populated_out = populated_out.union(populated);
        Ok(())
    }

    /// Batches two or more trivial terms into one instruction.
    fn insert_trivial_search(&mut self, compiled: &mut u64, populated: &mut FieldSet) {
        let query = self.query;
        if query
            .flags
            .intersects(QueryFlags::MATCH_PREFAB | QueryFlags::MATCH_DISABLED)
        {
            return;
        }

        // Per-entity terms need a dedicated populate.
        let populate = !query
            .terms
            .iter()
            .any(|term| term.flags.intersects(TermFlags::IS_TOGGLE | TermFlags::IS_MEMBER));

        let mut trivial_set = 0u64;
        let mut wildcard_terms = 0usize;
        let mut data_terms = 0usize;
        for (i, term) in query.terms.iter().enumerate() {
            if *compiled & (1 << i) != 0
                || !term.flags.contains(TermFlags::IS_TRIVIAL)
                || term.src.flags.traversal() != RefFlags::SELF
            {
                continue;
            }
            trivial_set |= 1 << i;
            if term.id.is_wildcard() {
                wildcard_terms += 1;
            }
            if populate && query.data_fields.contains(term.field_index) {
                data_terms += 1;
            }
        }

        if trivial_set.count_ones() < 2 {
            return;
        }

        for (i, term) in query.terms.iter().enumerate() {
            if trivial_set & (1 << i) != 0 {
                *compiled |= 1 << i;
                if populate {
                    populated.insert(term.field_index);
                }
            }
        }

        let kind = if wildcard_terms > 0 {
            OpKind::TrivWildcard
        } else if data_terms > 0 {
            OpKind::TrivData
        } else {
            OpKind::Triv
        };
        self.insert(Instruction {
            payload: Payload::Terms(trivial_set),
            written: VarSet::single(VarId::THIS),
            ..Instruction::new(kind)
        });
        self.ctx.written.insert(VarId::THIS);
    }

    /// Inserts `Toggle` and `ToggleOption` instructions, one group per source.
    fn insert_toggles(&mut self) -> Result<()> {
        let query = self.query;
        let count = query.terms.len();
        let mut done = 0u64;

        for i in 0..count {
            let term = &query.terms[i];
            if done & (1 << i) != 0 || !term.flags.contains(TermFlags::IS_TOGGLE) {
                continue;
            }
            let src = self.compile_ref(&term.src, None, false)?;

            let mut enabled = 0u64;
            let mut disabled = 0u64;
            let mut optional = 0u64;
            for j in i..count {
                let other = &query.terms[j];
                if done & (1 << j) != 0 || !other.flags.contains(TermFlags::IS_TOGGLE) {
                    continue;
                }
                if self.compile_ref(&other.src, None, false)? != src {
                    continue;
                }
                match other.oper {
                    Oper::Not => disabled |= 1 << j,
                    Oper::Optional => optional |= 1 << j,
                    _ => enabled |= 1 << j,
                }
                done |= 1 << j;
            }

            if enabled != 0 || disabled != 0 {
                self.insert(Instruction {
                    src,
                    written: src.var().map_or(VarSet::EMPTY, VarSet::single),
                    payload: Payload::Toggle { enabled, disabled },
                    ..Instruction::new(OpKind::Toggle)
                });
            }

            // One instruction per optional term, so results are split into
            // batches with identical toggle masks.
            for j in (i..count).filter(|&j| optional & (1 << j) != 0) {
                self.insert(Instruction {
                    src,
                    payload: Payload::Terms(1 << j),
                    ..Instruction::new(OpKind::ToggleOption)
                });
            }
        }
        Ok(())
    }

    fn insert_populate(&mut self, populated: FieldSet) {
        if populated.is_empty() {
            return;
        }

        let mut populate_count = 0usize;
        let mut self_count = 0usize;
        for term in &self.query.terms {
            if !populated.contains(term.field_index) {
                continue;
            }
            populate_count += 1;
            if term.match_this() && !term.src.flags.contains(RefFlags::UP) {
                self_count += 1;
            }
        }

        let kind = if populate_count == self_count {
            OpKind::PopulateSelf
        } else {
            OpKind::Populate
        };
        self.insert(Instruction {
            payload: Payload::Fields(populated),
            ..Instruction::new(kind)
        });
    }

    // =========================================================================
    // Term Classification
    // =========================================================================

    /// Returns true if the term is part of an OR chain.
    fn is_or(&self, index: usize) -> bool {
        let terms = &self.query.terms;
        terms[index].oper == Oper::Or || (index > 0 && terms[index - 1].oper == Oper::Or)
    }

    /// Returns true if the term always matches the same id.
    fn is_fixed_id(&self, index: usize, term: &Term) -> bool {
        if term.flags.intersects(
            TermFlags::TRANSITIVE
                | TermFlags::ID_INHERITED
                | TermFlags::MATCH_ANY
                | TermFlags::MATCH_ANY_SRC,
        ) {
            return false;
        }
        if self.is_or(index) || term.id.is_wildcard() {
            return false;
        }
        !(index == 0 && matches!(term.oper, Oper::Not | Oper::Optional))
    }

    /// Returns true if the type of the id has an id that instances inherit.
    fn has_inheritable_ids(&self, id: Id) -> bool {
        let Some(entity) = id.entity() else {
            return false;
        };
        self.world.type_of(entity).into_iter().any(is_inherited)
    }

    /// Returns true if every variable of the term is still unbound.
    fn term_is_unknown(&mut self, term: &Term) -> Result<bool> {
        let operands = [
            self.compile_ref(&term.first, Some(VarKind::Entity), false)?,
            self.compile_ref(&term.second, Some(VarKind::Entity), false)?,
            self.compile_ref(&term.src, None, false)?,
        ];
        let mut vars = operands.iter().filter_map(|operand| operand.var()).peekable();
        if vars.peek().is_none() {
            return Ok(false);
        }
        Ok(vars.all(|var| self.var_is_unknown(var)))
    }

    fn var_is_unknown(&self, var: VarId) -> bool {
        let mut current = Some(var);
        while let Some(var) = current {
            if self.ctx.written.contains(var) {
                return false;
            }
            current = self.vars.get(var).and_then(|v| v.table_id);
        }
        true
    }

    /// Finds the next uncompiled And term with a bound variable.
    fn next_known(&mut self, offset: usize, compiled: u64) -> Result<Option<usize>> {
        let query = self.query;
        for i in offset..query.terms.len() {
            let term = &query.terms[i];
            if compiled & (1 << i) != 0
                || term.oper != Oper::And
                || self.is_or(i)
                || term.flags.contains(TermFlags::IS_SCOPE)
            {
                continue;
            }
            if !self.term_is_unknown(term)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

/// Returns true if first or second is a variable that can match more than one id.
fn matches_multiple(term: &Term) -> bool {
    let multiple = |r: &crate::term::TermRef| r.is_var() && r.id != Entity::ANY;
    multiple(&term.first) || multiple(&term.second)
}

/// Returns true for ids that instances inherit from their base.
fn is_inherited(id: Id) -> bool {
    if id.is_pair() {
        let rel = id.first();
        rel != Entity::CHILD_OF.index() && rel != Entity::IDENTIFIER.index()
    } else {
        id.first() != Entity::PREFAB.index()
    }
}
