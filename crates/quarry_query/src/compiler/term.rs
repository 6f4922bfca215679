//! Compilation of a single term into instructions.

use std::sync::Arc;

use quarry_foundation::{Entity, Error, Id, Result, VarId, VarSet};
use quarry_storage::WorldLookup;
use tracing::trace;

use crate::program::{Instruction, OpKind, Operand, Payload, TableFilter};
use crate::query::{FieldSet, QueryFlags};
use crate::term::{Oper, RefFlags, Term, TermFlags, TermRef};
use crate::vars::{THIS_NAME, VarKind, VarRef};

use super::Compilation;

/// Saved parts of a member term, restored once the component is matched.
struct MemberTerm {
    id: Id,
    first: TermRef,
    second: TermRef,
}

impl<W: WorldLookup> Compilation<'_, W> {
    // =========================================================================
    // Term Pipeline
    // =========================================================================

    /// Compiles the term at `index`, appending its instructions.
    #[allow(clippy::too_many_lines)]
    pub(super) fn compile_term(&mut self, index: usize, populated: &mut FieldSet) -> Result<()> {
        let query = self.query;
        let mut term = query.terms[index].clone();
        let saved = MemberTerm {
            id: term.id,
            first: term.first.clone(),
            second: term.second.clone(),
        };
        let toggle_term = term.flags.contains(TermFlags::IS_TOGGLE);
        let member_term = term.flags.contains(TermFlags::IS_MEMBER);
        if member_term {
            populated.insert(term.field_index);
            self.begin_member_term(&mut term)?;
        }

        let first_is_var = term.first.is_var();
        let second_is_var = term.second.is_var();
        let mut src_is_var = term.src.is_var();
        let src_is_wildcard = term.src.is_wildcard_var();
        let builtin_pred = term.is_builtin_pred();
        let mut is_optional = term.oper == Oper::Optional;
        let is_or = self.is_or(index);
        let first_or = is_or && (index == 0 || query.terms[index - 1].oper != Oper::Or);
        let last_or = is_or && term.oper != Oper::Or;
        let cond_write = term.oper == Oper::Optional || is_or;

        if term.oper.is_from() && !self.has_inheritable_ids(term.id) {
            trace!(index, "skipping type operator without inheritable ids");
            self.ctx.skipped += 1;
            return Ok(());
        }

        if term.oper == Oper::Not && term.id == Id::from(Entity::ANY) {
            self.insert(Instruction::new(OpKind::Nothing));
            return Ok(());
        }

        if first_or {
            self.ctx.or_chain.cond_written = self.ctx.cond_written;
            self.ctx.or_chain.in_or = true;
        } else if is_or {
            self.ctx.or_chain.restore(&mut self.ctx.written);
        }

        if term.match_zero() {
            return self.compile_zero_src(index);
        }

        if builtin_pred
            && (term.second.id == Entity::WILDCARD || term.second.id == Entity::ANY)
        {
            return Ok(());
        }

        let term_index = u8::try_from(index)
            .map_err(|_| Error::internal(format!("term index {index} out of range")))?;
        let mut op = Instruction {
            field_index: Some(term.field_index),
            term_index: Some(term_index),
            ..Instruction::default()
        };
        op.kind = self.select_kind(&mut term, index, src_is_var, member_term);

        let mut is_not = term.oper == Oper::Not && !builtin_pred;
        let cond_write_state = self.ctx.cond_written;

        op.first = self.compile_ref(&term.first, Some(VarKind::Entity), true)?;
        op.second = self.compile_ref(&term.second, Some(VarKind::Entity), true)?;
        op.src = self.compile_ref(&term.src, None, true)?;

        let mut src_written = true;
        let mut src_is_lookup = false;
        if let Operand::Var(src) = op.src {
            src_is_lookup = self.vars.get(src).is_some_and(|var| var.lookup.is_some());
            src_written = self.ctx.written.contains(src);
        }

        let first_written = self.ensure_vars(op.first, cond_write)?;
        let second_written = self.ensure_vars(op.second, cond_write)?;

        if first_or {
            self.ctx.or_chain.written = self.ctx.written;
        }

        if src_is_var && !src_written && !src_is_wildcard && !src_is_lookup {
            src_written = self.select_all(&term, &op);
        }

        // An OR chain over predicates or members on a table source has to
        // test every entity of the table, so resolve the source as entity.
        if src_is_var
            && src_written
            && (builtin_pred || member_term)
            && term.oper == Oper::Or
            && op.src.var().is_some_and(|src| self.vars.kind(src) == VarKind::Table)
        {
            op.src = self.compile_ref(&term.src, Some(VarKind::Entity), true)?;
            if let Some(evar) = op.src.var() {
                self.ctx.or_chain.written.insert(evar);
            }
        }

        self.ensure_vars(op.src, cond_write)?;

        if term.flags.contains(TermFlags::MATCH_ANY_SRC) {
            op.kind = OpKind::Ids;
            if !first_written || !second_written {
                if !first_written {
                    if term.first.id != Entity::ANY {
                        op.kind = OpKind::IdsLeft;
                    }
                } else if term.second.id != Entity::ANY {
                    op.kind = OpKind::IdsRight;
                }
                op.src = Operand::Unset;
                src_is_var = false;
            }
        } else if !src_written
            && term.id == Id::from(Entity::ANY)
            && op.kind == OpKind::AndAny
            && !src_is_lookup
        {
            op.kind = OpKind::OnlyAny;
        }

        if term.flags.contains(TermFlags::TRANSITIVE)
            && src_is_var
            && second_is_var
            && !src_written
            && !second_written
        {
            self.insert_unconstrained_transitive(&op, cond_write)?;
        }

        if !self.ctx.cond_written.is_empty() && (!is_or || first_or) {
            self.ctx.begin_cond_eval(&op, cond_write_state);
        }

        // A disabled toggle component still has to be found to be rejected.
        if toggle_term && is_not {
            is_not = false;
            is_optional = true;
        }

        if is_not {
            self.ctx.begin_block(OpKind::Not);
        } else if is_optional {
            self.ctx.begin_block(OpKind::Optional);
        } else if first_or {
            let alias_only = term.first.id == Entity::PRED_EQ
                && term.second.is_var()
                && !self.ctx.is_written(op.src.var());
            self.ctx.begin_or(&op, !alias_only);
        }

        if term.flags.contains(TermFlags::ID_INHERITED) {
            self.insert_inheritance(&term, &mut op, cond_write)?;
        }

        op.match_flags = term.flags;
        op.is_self = term.src.flags.contains(RefFlags::SELF);

        let mut write_state = self.ctx.written;
        for (is_var, operand) in [
            (first_is_var, op.first),
            (src_is_var, op.src),
            (second_is_var, op.second),
        ] {
            if let (true, Some(var)) = (is_var, operand.var()) {
                if self.compile_lookup(var, cond_write) {
                    write_state.insert(var);
                }
            }
        }

        if builtin_pred {
            self.compile_builtin_pred(&term, &mut op, write_state)?;
        }

        if !src_written && op.src == Operand::Var(VarId::THIS) {
            let flags = query.flags;
            let match_disabled = flags.contains(QueryFlags::MATCH_DISABLED);
            let match_prefab = flags.contains(QueryFlags::MATCH_PREFAB);
            if !match_disabled || !match_prefab {
                op.payload = Payload::TableFilter(TableFilter {
                    skip_disabled: !match_disabled,
                    skip_prefab: !match_prefab,
                });
            }
        }

        for (is_var, operand) in [
            (src_is_var, op.src),
            (first_is_var, op.first),
            (second_is_var, op.second),
        ] {
            if let (true, Some(var)) = (is_var, operand.var()) {
                op.written.insert(var);
                self.ctx.write(var, cond_write);
            }
        }

        let label = self.insert(op.clone());
        self.ctx.frame_mut().lbl_query = Some(label);
        if is_or && !member_term {
            self.ctx.mark_last_or_op();
        }

        if let (true, Some(src)) = (src_is_var, op.src.var()) {
            if let (true, Some(first)) = (first_is_var, op.first.var()) {
                self.insert_contains(src, first);
            }
            if let (true, Some(second)) = (second_is_var, op.second.var()) {
                if op.first != op.second {
                    self.insert_contains(src, second);
                }
            }
        }

        if !Id::from(saved.first.id).is_wildcard()
            && first_is_var
            && !first_written
            && op.first == op.second
        {
            self.insert(Instruction {
                field_index: Some(term.field_index),
                ..Instruction::new(OpKind::PairEq)
            });
        }

        if is_not || is_optional {
            self.ctx.end_block(true);
        }

        if member_term {
            self.end_member_term(&mut term, saved, &op, cond_write)?;
            if is_or {
                self.ctx.mark_last_or_op();
            }
        }

        if last_or {
            self.end_or();
        }

        if self.ctx.frame().lbl_cond_eval.is_some()
            && (first_is_var || second_is_var || src_is_var)
            && (!is_or || last_or)
        {
            self.ctx.end_cond_eval();
        }

        if term.flags.contains(TermFlags::ID_INHERITED) && is_not {
            self.insert(Instruction {
                first: Operand::Literal(term.id),
                field_index: Some(term.field_index),
                ..Instruction::new(OpKind::SetId)
            });
        }
        Ok(())
    }

    /// Picks the opcode for a term from its source, operator and flags.
    ///
    /// A negated union term with a fixed target is rewritten to an And term
    /// over `UnionNeq`.
    fn select_kind(
        &self,
        term: &mut Term,
        index: usize,
        src_is_var: bool,
        member_term: bool,
    ) -> OpKind {
        let mut kind = if src_is_var { OpKind::And } else { OpKind::With };
        let trav = term.src.flags.traversal() & !(RefFlags::CASCADE | RefFlags::DESC);
        let up = RefFlags::UP;
        let self_up = RefFlags::SELF | RefFlags::UP;

        match term.oper {
            Oper::AndFrom => kind = OpKind::AndFrom,
            Oper::OrFrom => kind = OpKind::OrFrom,
            Oper::NotFrom => kind = OpKind::NotFrom,
            _ if term.flags.contains(TermFlags::TRANSITIVE) => kind = OpKind::Trav,
            _ if term.flags.contains(TermFlags::IS_UNION) => {
                if kind == OpKind::And {
                    kind = OpKind::UnionEq;
                    if term.oper == Oper::Not && !term.second.is_wildcard_var() {
                        term.oper = Oper::And;
                        kind = OpKind::UnionNeq;
                    }
                } else {
                    kind = OpKind::UnionEqWith;
                }
                if kind == OpKind::UnionEq {
                    if trav == up {
                        kind = OpKind::UnionEqUp;
                    } else if trav == self_up {
                        kind = OpKind::UnionEqSelfUp;
                    }
                }
            }
            _ => {
                if term
                    .flags
                    .intersects(TermFlags::MATCH_ANY | TermFlags::MATCH_ANY_SRC)
                {
                    kind = OpKind::AndAny;
                } else if trav == up {
                    kind = OpKind::Up;
                } else if trav == self_up {
                    kind = OpKind::SelfUp;
                }
            }
        }

        if !member_term && self.is_fixed_id(index, term) {
            kind = match kind {
                OpKind::And => OpKind::AndId,
                OpKind::With => OpKind::WithId,
                OpKind::Up => OpKind::UpId,
                OpKind::SelfUp => OpKind::SelfUpId,
                other => other,
            };
        }
        kind
    }

    // =========================================================================
    // Operands
    // =========================================================================

    /// Resolves a term reference to an operand.
    ///
    /// `kind` is `None` when either a table or an entity variable may be
    /// used. With `create_wildcards`, anonymous wildcards get a fresh
    /// variable; otherwise they resolve to nothing.
    pub(super) fn compile_ref(
        &mut self,
        r: &TermRef,
        kind: Option<VarKind>,
        create_wildcards: bool,
    ) -> Result<Operand> {
        if !r.is_set() {
            return Ok(Operand::Unset);
        }
        if r.is_var() {
            if let Some(var) = VarRef::of(r) {
                return self
                    .vars
                    .most_specific(var, kind, self.ctx.written)
                    .map(Operand::Var)
                    .ok_or_else(|| Error::unknown_variable(var.name()));
            }
            if !create_wildcards {
                return Ok(Operand::Unset);
            }
            let is_wildcard = r.is_wildcard_var();
            let var_kind = if is_wildcard && kind.is_none() {
                VarKind::Table
            } else {
                VarKind::Entity
            };
            let label = if is_wildcard {
                self.world.name(r.id)
            } else {
                None
            };
            return self.vars.add_anonymous(var_kind, label).map(Operand::Var);
        }
        if r.is_entity() {
            return Ok(Operand::Literal(Id::from(r.id)));
        }
        Ok(Operand::Unset)
    }

    /// Makes sure a variable operand is usable as an entity, bridging from
    /// its table variable when only that one is written.
    ///
    /// Returns whether the operand is written. Fixed operands always are.
    pub(super) fn ensure_vars(&mut self, operand: Operand, cond_write: bool) -> Result<bool> {
        let Operand::Var(id) = operand else {
            return Ok(true);
        };
        let Some(var) = self.vars.get(id) else {
            return Err(Error::internal(format!("operand uses unknown variable #{}", id.index())));
        };
        let (kind, table_id, base_id, is_lookup) =
            (var.kind, var.table_id, var.base_id, var.lookup.is_some());

        let mut written = false;
        if kind == VarKind::Entity && !self.ctx.written.contains(id) {
            match table_id.filter(|&tvar| self.ctx.written.contains(tvar)) {
                Some(tvar) => {
                    if is_lookup {
                        if let Some(base) = base_id.filter(|&b| !self.ctx.written.contains(b)) {
                            self.insert_each(tvar, base, cond_write);
                        }
                    } else {
                        self.insert_each(tvar, id, cond_write);
                    }
                    written = true;
                }
                None if is_lookup && !self.ctx.is_written(base_id) => {
                    return Err(Error::uninitialized_variable(self.vars.display_name(id)));
                }
                None => {}
            }
        }
        Ok(written || self.ctx.written.contains(id))
    }

    /// Inserts a `Lookup` if `var` is a lookup variable. Returns true if it was.
    fn compile_lookup(&mut self, var: VarId, cond_write: bool) -> bool {
        let Some(base) = self
            .vars
            .get(var)
            .filter(|v| v.lookup.is_some())
            .and_then(|v| v.base_id)
        else {
            return false;
        };
        self.ctx.write(var, cond_write);
        self.insert(Instruction {
            src: Operand::Var(var),
            first: Operand::Var(base),
            written: VarSet::single(var),
            ..Instruction::new(OpKind::Lookup)
        });
        true
    }

    /// Inserts an `Each` that iterates table variable `tvar` into `evar`.
    pub(super) fn insert_each(&mut self, tvar: VarId, evar: VarId, cond_write: bool) {
        self.ctx.write(evar, cond_write);
        self.insert(Instruction {
            src: Operand::Var(evar),
            first: Operand::Var(tvar),
            written: VarSet::single(evar),
            ..Instruction::new(OpKind::Each)
        });
    }

    /// Inserts a `Contain` when `other` is an entity of table variable `src`.
    fn insert_contains(&mut self, src: VarId, other: VarId) {
        let in_table = self
            .vars
            .get(other)
            .is_some_and(|var| var.table_id == Some(src));
        if src != other && in_table {
            self.insert(Instruction {
                src: Operand::Var(src),
                first: Operand::Var(other),
                ..Instruction::new(OpKind::Contain)
            });
        }
    }

    /// Inserts an `And` that matches every entity for an unconstrained source.
    ///
    /// Not, Optional and match terms can't bind their source themselves.
    /// Returns true if the instruction was inserted.
    fn select_all(&mut self, term: &Term, op: &Instruction) -> bool {
        let pred_match = term.is_builtin_pred() && term.first.id == Entity::PRED_MATCH;
        let unconstrained = matches!(term.oper, Oper::Not | Oper::Optional | Oper::NotFrom);
        let Some(src) = op.src.var() else {
            return false;
        };
        if !unconstrained && !pred_match {
            return false;
        }

        let (first, second) = if pred_match {
            (
                Operand::Literal(Id::from(Entity::IDENTIFIER)),
                Operand::Literal(Id::from(Entity::NAME)),
            )
        } else {
            (Operand::Literal(Id::from(Entity::ANY)), Operand::Unset)
        };
        self.insert(Instruction {
            src: op.src,
            first,
            second,
            is_self: true,
            written: VarSet::single(src),
            ..Instruction::new(OpKind::And)
        });
        self.ctx.write(src, false);
        true
    }

    // =========================================================================
    // Pre-passes
    // =========================================================================

    /// Finds the targets of a transitive relationship before the sources.
    fn insert_unconstrained_transitive(&mut self, op: &Instruction, cond_write: bool) -> Result<()> {
        let label: Option<Arc<str>> = op
            .second
            .var()
            .and_then(|var| self.vars.get(var))
            .and_then(|var| var.name.clone());
        let target = self.vars.add_anonymous(VarKind::Entity, label.as_deref())?;

        self.ctx.write(target, cond_write);
        self.insert(Instruction {
            first: op.first,
            second: Operand::Var(target),
            written: VarSet::single(target),
            ..Instruction::new(OpKind::IdsRight)
        });

        let mut and = Instruction {
            field_index: op.field_index,
            first: op.first,
            second: Operand::Var(target),
            src: op.src,
            is_self: true,
            ..Instruction::new(OpKind::And)
        };
        if let Some(src) = op.src.var() {
            self.ctx.write(src, cond_write);
            and.written = VarSet::single(src);
        }
        self.insert(and);
        Ok(())
    }

    /// Walks the IsA subtypes of the term's component and rewrites the
    /// instruction to match each of them.
    fn insert_inheritance(
        &mut self,
        term: &Term,
        op: &mut Instruction,
        cond_write: bool,
    ) -> Result<()> {
        let label = self.world.name(term.first.id);
        let tvar = self.vars.add_anonymous(VarKind::Table, label)?;
        let evar = self.vars.add_anonymous(VarKind::Entity, label)?;

        let mut trav = Instruction {
            first: Operand::Literal(Id::from(Entity::IS_A)),
            second: Operand::Literal(Id::from(term.first.id)),
            src: Operand::Var(tvar),
            is_self: true,
            written: VarSet::single(tvar),
            ..Instruction::new(OpKind::Trav)
        };
        if term.first.flags.contains(RefFlags::SELF) {
            trav.match_flags = TermFlags::REFLEXIVE;
        }
        self.insert(trav);
        self.insert_each(tvar, evar, cond_write);

        op.first = Operand::Var(evar);
        Ok(())
    }

    // =========================================================================
    // Predicates
    // =========================================================================

    fn compile_builtin_pred(
        &self,
        term: &Term,
        op: &mut Instruction,
        write_state: VarSet,
    ) -> Result<()> {
        let negate = term.oper == Oper::Not;
        if term.first.id == Entity::PRED_EQ {
            op.kind = match (term.second.is_name(), negate) {
                (true, false) => OpKind::PredEqName,
                (true, true) => OpKind::PredNeqName,
                (false, false) => OpKind::PredEq,
                (false, true) => OpKind::PredNeq,
            };
        } else if term.first.id == Entity::PRED_MATCH {
            op.kind = if negate {
                OpKind::PredNeqMatch
            } else {
                OpKind::PredEqMatch
            };
        }

        if let Operand::Var(second) = op.second {
            if !write_state.contains(second) {
                return Err(Error::uninitialized_variable(self.vars.display_name(second)));
            }
        }

        let Some(src) = op.src.var() else {
            return Err(Error::internal("predicate without variable source"));
        };
        // `$x == value` with an unwritten `$x` is an assignment.
        if !write_state.contains(src) && !matches!(op.kind, OpKind::PredEq | OpKind::PredEqName) {
            return Err(Error::uninitialized_variable(self.vars.display_name(src)));
        }
        Ok(())
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    fn compile_zero_src(&mut self, index: usize) -> Result<()> {
        let query = self.query;
        let term = &query.terms[index];
        if term.is_scope_open() {
            self.ensure_scope_vars(index)?;
            let negated = term.oper == Oper::Not;
            if negated {
                self.ctx.begin_block(OpKind::Not);
            }
            self.ctx.push_scope(negated);
        } else if term.is_scope_close() && self.ctx.pop_scope() {
            self.ctx.end_block(false);
        }
        Ok(())
    }

    /// Resolves entity variables that a scope uses but that are only written
    /// as tables, before entering the scope.
    fn ensure_scope_vars(&mut self, index: usize) -> Result<()> {
        let query = self.query;
        for term in query.terms[index..]
            .iter()
            .take_while(|term| !term.is_scope_close())
        {
            for r in [&term.first, &term.second] {
                let operand = self.compile_ref(r, Some(VarKind::Entity), false)?;
                let Some(id) = operand.var() else {
                    continue;
                };
                let Some(var) = self.vars.get(id) else {
                    continue;
                };
                let bridge = var.kind == VarKind::Entity
                    && !self.ctx.written.contains(id)
                    && var
                        .table_id
                        .is_some_and(|tvar| self.ctx.written.contains(tvar));
                if bridge {
                    self.ensure_vars(operand, false)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // OR Chains
    // =========================================================================

    fn end_or(&mut self) {
        let src = self.ctx.end_or();

        // All alternatives may have resolved a table source as entity.
        if let Some(src) = src {
            if self.vars.kind(src) == VarKind::Table {
                let name = self
                    .vars
                    .get(src)
                    .and_then(|var| var.name.clone())
                    .unwrap_or_else(|| Arc::from(THIS_NAME));
                let evar = self.vars.find(VarRef::from(&*name), VarKind::Entity);
                if let Some(evar) = evar.filter(|&e| self.ctx.cond_written.contains(e)) {
                    self.ctx.written.insert(evar);
                    self.ctx.cond_written.remove(evar);
                }
            }
        }
        self.ctx.written |= self.ctx.cond_written;

        let reset = self.ctx.cond_written - self.ctx.or_chain.cond_written;
        for var in reset.iter() {
            if var == VarId::THIS || Some(var) == src {
                continue;
            }
            self.insert(Instruction {
                src: Operand::Var(var),
                ..Instruction::new(OpKind::Reset)
            });
        }
    }

    // =========================================================================
    // Member Terms
    // =========================================================================

    /// Rewrites a member term to match the component that owns the member.
    fn begin_member_term(&mut self, term: &mut Term) -> Result<()> {
        term.flags.remove(TermFlags::IS_MEMBER);

        let Some(component) = self.world.parent(term.first.id) else {
            return Err(Error::invalid_term("member without parent in query"));
        };
        if self.world.type_info(Id::from(component)).is_none() {
            return Err(Error::invalid_term("parent of member is not a component"));
        }

        let second_wildcard = term.second.is_wildcard_var();
        term.first.id = component;
        term.second = TermRef::default();
        term.id = Id::from(component);

        self.ctx.member_oper = term.oper;
        // Not has to match both entities without the component and entities
        // whose member doesn't match.
        if term.oper == Oper::Not && !second_wildcard {
            term.oper = Oper::Optional;
        }
        Ok(())
    }

    /// Restores a member term and emits the member comparison.
    fn end_member_term(
        &mut self,
        term: &mut Term,
        saved: MemberTerm,
        op: &Instruction,
        cond_write: bool,
    ) -> Result<()> {
        let component = term.first.id;
        let Some(type_info) = self.world.type_info(Id::from(component)) else {
            return Err(Error::internal("member component lost its type info"));
        };

        term.id = saved.id;
        term.first = saved.first;
        term.second = saved.second;
        term.flags.insert(TermFlags::IS_MEMBER);
        term.oper = self.ctx.member_oper;

        let Some(member) = self.world.member(term.first.id) else {
            return Err(Error::invalid_term("member term without member layout"));
        };
        let evar = VarRef::of(&term.src).and_then(|var| self.vars.find(var, VarKind::Entity));
        let mut src_is_table = op
            .src
            .var()
            .is_some_and(|var| self.vars.kind(var) == VarKind::Table);
        let second_wildcard = term.second.is_wildcard_var() || term.oper == Oper::Optional;

        let mut mbr = Instruction {
            kind: OpKind::MemberEq,
            payload: Payload::Member {
                offset: member.offset,
                size: type_info.size,
                table_var: None,
            },
            ..op.clone()
        };

        let oper = self.ctx.member_oper;
        let conditional = matches!(oper, Oper::Not | Oper::Optional);
        if conditional {
            if second_wildcard && oper == Oper::Not {
                return Ok(());
            }

            // Resolve to the entity before branching so both branches see
            // the same variable.
            if let (true, Some(src), Some(evar)) = (src_is_table, op.src.var(), evar) {
                self.insert_each(src, evar, cond_write);
                src_is_table = false;
            }

            let label = self.ctx.begin_block(OpKind::IfSet);
            self.ctx.ops[label.index()].payload = Payload::IfSet {
                field: term.field_index,
            };
            if oper == Oper::Not {
                mbr.kind = OpKind::MemberNeq;
            }
        }

        if let (true, Some(evar)) = (src_is_table, evar) {
            mbr.payload = Payload::Member {
                offset: member.offset,
                size: type_info.size,
                table_var: op.src.var(),
            };
            self.ctx.write(evar, cond_write);
            mbr.written.insert(evar);
        }

        mbr.src = self.compile_ref(&term.src, Some(VarKind::Entity), true)?;
        if second_wildcard {
            mbr.second = Operand::Literal(Id::from(Entity::WILDCARD));
        } else {
            mbr.second = self.compile_ref(&term.second, Some(VarKind::Entity), true)?;
            if let Some(var) = mbr.second.var() {
                self.ensure_vars(mbr.second, cond_write)?;
                self.ctx.write(var, cond_write);
                mbr.written.insert(var);
            }
        }

        self.insert(mbr);
        if conditional {
            self.ctx.end_block(false);
        }
        Ok(())
    }
}
