//! Mutable state threaded through a single compilation.

use quarry_foundation::{VarId, VarSet};

use crate::program::{Instruction, Label, OpKind, Operand};
use crate::term::Oper;

/// Maximum nesting depth of `{ }` scopes.
pub const MAX_SCOPE_DEPTH: usize = 32;

/// Labels of the block that is open at one scope level.
#[derive(Copy, Clone, Debug, Default)]
pub struct ControlFrame {
    /// Begin instruction of the open Not/Optional/Or/IfSet block.
    pub lbl_begin: Option<Label>,
    /// Last instruction that matched a term.
    pub lbl_query: Option<Label>,
    /// Open `IfVar` instruction.
    pub lbl_cond_eval: Option<Label>,
}

/// Write state saved at the start of an OR chain.
///
/// Every term of a chain is compiled against the same assumptions about
/// which variables are already written.
#[derive(Copy, Clone, Debug, Default)]
pub struct OrChainState {
    /// A chain is being compiled.
    pub in_or: bool,
    /// Written variables after the first term resolved its operands.
    pub written: VarSet,
    /// Conditionally written variables before the chain started.
    pub cond_written: VarSet,
    /// Source variable of the chain.
    pub src: Option<VarId>,
    /// Whether the chain source was written before the chain.
    pub src_written: bool,
}

impl OrChainState {
    /// Resets `written` to the state the first term of the chain saw.
    pub fn restore(&self, written: &mut VarSet) {
        *written = self.written;
    }
}

/// Instruction buffer plus the write bookkeeping of the compiler.
#[derive(Debug)]
pub struct CompileContext {
    /// Emitted instructions.
    pub ops: Vec<Instruction>,
    /// Variables written by the instructions emitted so far.
    pub written: VarSet,
    /// Variables that may or may not be written (optional or OR terms).
    pub cond_written: VarSet,
    /// OR chain state.
    pub or_chain: OrChainState,
    /// Terms that compiled to nothing.
    pub skipped: usize,
    /// Operator of the member term being compiled.
    pub member_oper: Oper,
    frames: Vec<ControlFrame>,
    scope: usize,
    scope_is_not: u32,
    or_markers: Vec<usize>,
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileContext {
    /// Creates an empty context at scope level 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            written: VarSet::EMPTY,
            cond_written: VarSet::EMPTY,
            or_chain: OrChainState::default(),
            skipped: 0,
            member_oper: Oper::And,
            frames: vec![ControlFrame::default(); MAX_SCOPE_DEPTH + 1],
            scope: 0,
            scope_is_not: 0,
            or_markers: Vec::new(),
        }
    }

    /// Returns the frame of the current scope.
    pub fn frame(&self) -> &ControlFrame {
        &self.frames[self.scope]
    }

    /// Returns the frame of the current scope mutably.
    pub fn frame_mut(&mut self) -> &mut ControlFrame {
        &mut self.frames[self.scope]
    }

    /// Returns the current scope depth.
    #[cfg(test)]
    pub fn scope(&self) -> usize {
        self.scope
    }

    /// Enters a `{ }` scope.
    pub fn push_scope(&mut self, negated: bool) {
        if negated {
            self.scope_is_not |= 1 << self.scope;
        } else {
            self.scope_is_not &= !(1 << self.scope);
        }
        self.scope = (self.scope + 1).min(MAX_SCOPE_DEPTH);
        self.frames[self.scope] = ControlFrame::default();
    }

    /// Leaves a `{ }` scope, returning whether it was negated.
    pub fn pop_scope(&mut self) -> bool {
        self.scope = self.scope.saturating_sub(1);
        self.scope_is_not & (1 << self.scope) != 0
    }

    /// Returns true if the variable is written. A missing variable counts as written.
    pub fn is_written(&self, var: Option<VarId>) -> bool {
        var.is_none_or(|var| self.written.contains(var))
    }

    /// Marks a variable as written, and as conditionally written if this
    /// is its first write and the write is conditional.
    pub fn write(&mut self, var: VarId, cond_write: bool) {
        let was_written = self.written.contains(var);
        self.written.insert(var);
        if !was_written && cond_write {
            self.cond_written.insert(var);
        }
    }

    /// Appends an instruction, linking it to its neighbors.
    ///
    /// Outside of a block an instruction doesn't re-write what the previous
    /// instruction wrote.
    pub fn insert(&mut self, mut op: Instruction) -> Label {
        let count = self.ops.len();
        if self.frame().lbl_begin.is_none() {
            if let Some(prev) = self.ops.last() {
                op.written = op.written - prev.written;
            }
        }
        op.prev = count.checked_sub(1).map(Label::new);
        op.next = Label::new(count + 1);
        self.ops.push(op);
        Label::new(count)
    }

    /// Opens a block in the current frame.
    pub fn begin_block(&mut self, kind: OpKind) -> Label {
        let label = self.insert(Instruction::new(kind));
        self.frame_mut().lbl_begin = Some(label);
        label
    }

    /// Closes the block of the current frame with an `End`.
    ///
    /// With `reset`, the `End` carries the operands of the last matching
    /// instruction so it can restore them on backtracking.
    pub fn end_block(&mut self, reset: bool) {
        let end = self.insert(Instruction::new(OpKind::End));
        let frame = *self.frame();
        let Some(begin) = frame.lbl_begin else {
            return;
        };
        self.ops[begin.index()].next = end;

        let query_op = frame
            .lbl_query
            .filter(|_| reset)
            .map(|label| self.ops[label.index()].clone());
        let end_op = &mut self.ops[end.index()];
        end_op.prev = Some(begin);
        match query_op {
            Some(query_op) => copy_operands(end_op, &query_op),
            None => end_op.field_index = None,
        }
        self.frame_mut().lbl_begin = None;
    }

    /// Opens an `IfVar` block that skips the next instruction unless its
    /// conditionally written operands are set.
    pub fn begin_cond_eval(&mut self, op: &Instruction, cond_write_state: VarSet) {
        let state = if self.or_chain.in_or {
            self.or_chain.cond_written
        } else {
            cond_write_state
        };

        if !op.vars().intersects(state) {
            self.frame_mut().lbl_cond_eval = None;
            return;
        }

        let only_cond = |operand: Operand| match operand {
            Operand::Var(var) if state.contains(var) => operand,
            _ => Operand::Unset,
        };
        let mut jump = Instruction::new(OpKind::IfVar);
        jump.src = only_cond(op.src);
        jump.first = only_cond(op.first);
        jump.second = only_cond(op.second);

        let label = self.insert(jump);
        self.frame_mut().lbl_cond_eval = Some(label);
    }

    /// Closes the open `IfVar` block, if any.
    pub fn end_cond_eval(&mut self) {
        let frame = *self.frame();
        let Some(begin) = frame.lbl_cond_eval else {
            return;
        };
        let end = self.insert(Instruction::new(OpKind::End));
        self.ops[begin.index()].next = end;

        let query_op = frame.lbl_query.map(|label| self.ops[label.index()].clone());
        let end_op = &mut self.ops[end.index()];
        end_op.prev = Some(begin);
        if let Some(query_op) = query_op {
            copy_operands(end_op, &query_op);
        }
        self.frame_mut().lbl_cond_eval = None;
    }

    /// Opens an OR chain for `op`, the first term of the chain.
    ///
    /// `add_src` is false when the chain source only acts as an alias.
    pub fn begin_or(&mut self, op: &Instruction, add_src: bool) {
        let label = self.begin_block(OpKind::Or);
        if let Operand::Var(src) = op.src {
            if add_src {
                self.ops[label.index()].src = op.src;
                self.or_chain.src = Some(src);
            }
            self.or_chain.src_written = self.written.contains(src);
        }
    }

    /// Marks the last instruction as the end of one OR alternative.
    pub fn mark_last_or_op(&mut self) {
        if let Some(last) = self.ops.len().checked_sub(1) {
            if !self.or_markers.contains(&last) {
                self.or_markers.push(last);
            }
        }
    }

    /// Closes the OR chain and links its alternatives.
    ///
    /// Returns the chain source, which is now written.
    pub fn end_or(&mut self) -> Option<VarId> {
        let end = self.insert(Instruction::new(OpKind::End));
        let begin = self.frame().lbl_begin?;

        let markers = std::mem::take(&mut self.or_markers);
        let mut prev_or = begin.index() + 1;
        for i in begin.index() + 1..end.index() {
            if !markers.contains(&i) {
                continue;
            }
            self.ops[prev_or].prev = if i == end.index() - 1 {
                Some(begin)
            } else {
                Some(Label::new(i + 1))
            };
            self.ops[i].next = end;
            prev_or = i + 1;
        }

        self.ops[begin.index()].next = end;
        self.ops[end.index()].prev = Some(begin);
        self.ops[end.index() - 1].prev = Some(begin);

        self.or_chain.in_or = false;
        self.frame_mut().lbl_begin = None;

        let src = self.ops[begin.index()].src.var();
        if let Some(src) = src {
            self.written.insert(src);
        }
        src
    }
}

fn copy_operands(dst: &mut Instruction, src: &Instruction) {
    dst.src = src.src;
    dst.first = src.first;
    dst.second = src.second;
    dst.is_self = src.is_self;
    dst.field_index = src.field_index;
}
