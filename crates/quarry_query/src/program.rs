//! The instruction program produced by the compiler.
//!
//! A program is a linear buffer of [`Instruction`]s. Control blocks (Not,
//! Optional, Or, `IfVar`, `IfSet`) are begin instructions whose `next` points
//! at their matching `End`; the `End` points back through `prev`.

use std::fmt::{self, Write as _};

use quarry_foundation::{Error, Id, Result, VarId, VarSet};
use quarry_storage::WorldLookup;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::query::FieldSet;
use crate::term::TermFlags;
use crate::vars::VarTable;

/// Index of an instruction in a [`Program`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Label(u32);

impl Label {
    /// Creates a label for an instruction index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the instruction index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the three operand slots of an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Operand {
    /// Not used by the instruction.
    #[default]
    Unset,
    /// A fixed id.
    Literal(Id),
    /// A query variable.
    Var(VarId),
}

impl Operand {
    /// Returns the variable, if the operand is one.
    #[must_use]
    pub const fn var(self) -> Option<VarId> {
        match self {
            Operand::Var(var) => Some(var),
            _ => None,
        }
    }

    /// Returns true if the operand is a variable.
    #[must_use]
    pub const fn is_var(self) -> bool {
        matches!(self, Operand::Var(_))
    }

    /// Returns true if the operand is a fixed id.
    #[must_use]
    pub const fn is_literal(self) -> bool {
        matches!(self, Operand::Literal(_))
    }

    /// Returns true unless the operand is unset.
    #[must_use]
    pub const fn is_set(self) -> bool {
        !matches!(self, Operand::Unset)
    }
}

/// Instruction opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OpKind {
    // === Matching ===
    /// Find tables (or test the source) with an id, binding wildcards.
    #[default]
    And,
    /// [`OpKind::And`] for a fixed id.
    AndId,
    /// [`OpKind::And`] for ids with `_`, yielding one match per table.
    AndAny,
    /// Find tables with any id, using the `_` record.
    OnlyAny,
    /// Match a batch of trivial terms on `$this` in one pass.
    Triv,
    /// [`OpKind::Triv`] that also populates data fields.
    TrivData,
    /// [`OpKind::Triv`] where some terms are wildcards.
    TrivWildcard,
    /// Match an id on an ancestor of the source.
    Up,
    /// [`OpKind::Up`] for a fixed id.
    UpId,
    /// Match an id on the source or an ancestor.
    SelfUp,
    /// [`OpKind::SelfUp`] for a fixed id.
    SelfUpId,
    /// Test an id on a fixed source.
    With,
    /// [`OpKind::With`] for a fixed id.
    WithId,
    /// Walk a transitive relationship.
    Trav,
    /// The source must have every id of a type list.
    AndFrom,
    /// The source must have one id of a type list.
    OrFrom,
    /// The source must have no id of a type list.
    NotFrom,
    /// Enumerate ids matching a pattern without a source.
    Ids,
    /// Enumerate the targets of `(R, *)`.
    IdsRight,
    /// Enumerate the relationships of `(*, T)`.
    IdsLeft,

    // === Variables ===
    /// Iterate the entities of a table variable into an entity variable.
    Each,
    /// Resolve a child by name relative to a base variable.
    Lookup,
    /// Clear a variable on redo.
    Reset,

    // === Control Flow ===
    /// Begin an OR chain.
    Or,
    /// Begin an optional block.
    Optional,
    /// Begin a negated block.
    Not,
    /// Skip the block unless the variables are set.
    IfVar,
    /// Skip the block unless the field is set.
    IfSet,
    /// End of a block.
    End,

    // === Predicates ===
    /// `$src == second`.
    PredEq,
    /// `$src != second`.
    PredNeq,
    /// `$src == "name"`.
    PredEqName,
    /// `$src != "name"`.
    PredNeqName,
    /// `$src ~= "pattern"`.
    PredEqMatch,
    /// `!($src ~= "pattern")`.
    PredNeqMatch,

    // === Members ===
    /// A component member equals a value or variable.
    MemberEq,
    /// A component member doesn't equal a value or variable.
    MemberNeq,

    // === Toggle ===
    /// Filter entities on enabled/disabled toggle bits.
    Toggle,
    /// Split results on an optional toggle bit.
    ToggleOption,

    // === Union ===
    /// Match a union relationship target.
    UnionEq,
    /// [`OpKind::UnionEq`] on a fixed source.
    UnionEqWith,
    /// Negated [`OpKind::UnionEq`].
    UnionNeq,
    /// [`OpKind::UnionEq`] on an ancestor.
    UnionEqUp,
    /// [`OpKind::UnionEq`] on the source or an ancestor.
    UnionEqSelfUp,

    // === Checks ===
    /// The table variable contains the entity variable.
    Contain,
    /// First and second of a pair resolve to the same entity.
    PairEq,

    // === Bookkeeping ===
    /// Initialize variables that are field sources.
    SetVars,
    /// Copy the `$this` entity variable into the result.
    SetThis,
    /// Initialize fixed sources.
    SetFixed,
    /// Initialize fixed ids.
    SetIds,
    /// Restore the id of a field after a Not block.
    SetId,
    /// Fetch data for fields.
    Populate,
    /// [`OpKind::Populate`] when every field is on `$this` itself.
    PopulateSelf,
    /// A result was found.
    Yield,
    /// Matches nothing.
    Nothing,
}

impl OpKind {
    /// Short lowercase name used in plan output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpKind::And => "and",
            OpKind::AndId => "andid",
            OpKind::AndAny => "andany",
            OpKind::OnlyAny => "onlyany",
            OpKind::Triv => "triv",
            OpKind::TrivData => "trivpop",
            OpKind::TrivWildcard => "trivwc",
            OpKind::Up => "up",
            OpKind::UpId => "upid",
            OpKind::SelfUp => "selfup",
            OpKind::SelfUpId => "selfupid",
            OpKind::With => "with",
            OpKind::WithId => "withid",
            OpKind::Trav => "trav",
            OpKind::AndFrom => "andfrom",
            OpKind::OrFrom => "orfrom",
            OpKind::NotFrom => "notfrom",
            OpKind::Ids => "ids",
            OpKind::IdsRight => "idsr",
            OpKind::IdsLeft => "idsl",
            OpKind::Each => "each",
            OpKind::Lookup => "lookup",
            OpKind::Reset => "reset",
            OpKind::Or => "or",
            OpKind::Optional => "option",
            OpKind::Not => "not",
            OpKind::IfVar => "ifvar",
            OpKind::IfSet => "ifset",
            OpKind::End => "end",
            OpKind::PredEq => "pred_eq",
            OpKind::PredNeq => "pred_neq",
            OpKind::PredEqName => "pred_eq_nm",
            OpKind::PredNeqName => "pred_neq_nm",
            OpKind::PredEqMatch => "pred_eq_m",
            OpKind::PredNeqMatch => "pred_neq_m",
            OpKind::MemberEq => "membereq",
            OpKind::MemberNeq => "memberneq",
            OpKind::Toggle => "toggle",
            OpKind::ToggleOption => "togglepart",
            OpKind::UnionEq => "union",
            OpKind::UnionEqWith => "union_w",
            OpKind::UnionNeq => "union_neq",
            OpKind::UnionEqUp => "union_up",
            OpKind::UnionEqSelfUp => "union_sup",
            OpKind::Contain => "contain",
            OpKind::PairEq => "pair_eq",
            OpKind::SetVars => "setvars",
            OpKind::SetThis => "setthis",
            OpKind::SetFixed => "setfix",
            OpKind::SetIds => "setids",
            OpKind::SetId => "setid",
            OpKind::Populate => "populate",
            OpKind::PopulateSelf => "popself",
            OpKind::Yield => "yield",
            OpKind::Nothing => "nothing",
        }
    }

    /// Returns true for instructions that open a block closed by [`OpKind::End`].
    #[must_use]
    pub const fn is_block_begin(self) -> bool {
        matches!(
            self,
            OpKind::Or | OpKind::Optional | OpKind::Not | OpKind::IfVar | OpKind::IfSet
        )
    }

    /// Returns true for instructions that don't match anything themselves.
    #[must_use]
    pub const fn is_bookkeeping(self) -> bool {
        matches!(
            self,
            OpKind::SetVars
                | OpKind::SetThis
                | OpKind::SetFixed
                | OpKind::SetIds
                | OpKind::SetId
                | OpKind::Populate
                | OpKind::PopulateSelf
                | OpKind::Yield
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which tables an instruction that first binds `$this` skips.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TableFilter {
    /// Skip tables with disabled entities.
    pub skip_disabled: bool,
    /// Skip tables with prefabs.
    pub skip_prefab: bool,
}

/// Instruction-specific data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Payload {
    /// No payload.
    #[default]
    None,
    /// Bitset of term indices (`Triv*`, `ToggleOption`).
    Terms(u64),
    /// Fields to populate.
    Fields(FieldSet),
    /// Term bitsets for [`OpKind::Toggle`].
    Toggle {
        /// Terms that must be enabled.
        enabled: u64,
        /// Terms that must be disabled.
        disabled: u64,
    },
    /// Layout of the member compared by [`OpKind::MemberEq`]/[`OpKind::MemberNeq`].
    Member {
        /// Byte offset of the member in the component.
        offset: u32,
        /// Size of the component.
        size: u32,
        /// Table variable the instruction also iterates.
        table_var: Option<VarId>,
    },
    /// Field tested by [`OpKind::IfSet`].
    IfSet {
        /// The field.
        field: u8,
    },
    /// Tables to skip when `$this` is first bound.
    TableFilter(TableFilter),
}

/// One instruction.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instruction {
    /// Opcode.
    pub kind: OpKind,
    /// Source operand.
    pub src: Operand,
    /// First operand (predicate).
    pub first: Operand,
    /// Second operand (pair target).
    pub second: Operand,
    /// Match on the source itself.
    pub is_self: bool,
    /// Result field the instruction sets.
    pub field_index: Option<u8>,
    /// Term the instruction was compiled from.
    pub term_index: Option<u8>,
    /// Flags of the originating term.
    pub match_flags: TermFlags,
    /// Variables the instruction binds.
    pub written: VarSet,
    /// Previous instruction, or the begin of the block for an `End`.
    pub prev: Option<Label>,
    /// Next instruction, or the `End` of the block for a begin.
    pub next: Label,
    /// Instruction-specific data.
    pub payload: Payload,
}

impl Instruction {
    /// Creates an instruction with all operands unset.
    #[must_use]
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Returns the variables the instruction reads or writes.
    #[must_use]
    pub fn vars(&self) -> VarSet {
        [self.src, self.first, self.second]
            .into_iter()
            .filter_map(Operand::var)
            .collect()
    }
}

/// The compiled program of a query.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Program {
    /// Instructions in execution order.
    pub ops: Vec<Instruction>,
    /// Variables referenced by the instructions.
    pub vars: VarTable,
}

impl Program {
    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if there are no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the instruction at a label.
    #[must_use]
    pub fn get(&self, label: Label) -> Option<&Instruction> {
        self.ops.get(label.index())
    }

    /// Returns the opcodes in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<OpKind> {
        self.ops.iter().map(|op| op.kind).collect()
    }

    /// Returns the opcodes of the instructions that match or control flow,
    /// leaving out bookkeeping.
    #[must_use]
    pub fn match_kinds(&self) -> Vec<OpKind> {
        self.ops
            .iter()
            .map(|op| op.kind)
            .filter(|kind| !kind.is_bookkeeping())
            .collect()
    }

    /// Returns the number of instructions with an opcode.
    #[must_use]
    pub fn count(&self, kind: OpKind) -> usize {
        self.ops.iter().filter(|op| op.kind == kind).count()
    }

    /// Returns the public variable count.
    #[must_use]
    pub fn public_var_count(&self) -> usize {
        self.vars.public_count()
    }

    /// Checks that every block begin links to exactly one `End` that links back.
    ///
    /// # Errors
    ///
    /// Returns an internal error describing the first broken link.
    pub fn check_blocks(&self) -> Result<()> {
        let mut ends_seen = vec![false; self.ops.len()];
        for (index, op) in self.ops.iter().enumerate() {
            if !op.kind.is_block_begin() {
                continue;
            }
            let Some(end) = self.get(op.next) else {
                return Err(Error::internal(format!(
                    "block at {index} links past the end of the program"
                )));
            };
            if end.kind != OpKind::End {
                return Err(Error::internal(format!(
                    "block at {index} ends on {} at {}",
                    end.kind, op.next
                )));
            }
            if end.prev != Some(Label::new(index)) {
                return Err(Error::internal(format!(
                    "end at {} doesn't link back to block at {index}",
                    op.next
                )));
            }
            if std::mem::replace(&mut ends_seen[op.next.index()], true) {
                return Err(Error::internal(format!(
                    "end at {} closes more than one block",
                    op.next
                )));
            }
        }

        for (index, op) in self.ops.iter().enumerate() {
            if op.kind == OpKind::End && !ends_seen[index] {
                return Err(Error::internal(format!("end at {index} closes no block")));
            }
        }
        Ok(())
    }

    /// Renders the program one instruction per line.
    ///
    /// Each line shows the index, the `prev`/`next` links, the opcode and
    /// its operands. Block contents are indented.
    #[must_use]
    pub fn plan(&self, world: &impl WorldLookup) -> String {
        let mut out = String::new();
        let mut depth = 0usize;

        for (index, op) in self.ops.iter().enumerate() {
            if op.kind == OpKind::End {
                depth = depth.saturating_sub(1);
            }
            let prev = op
                .prev
                .map_or_else(|| "-1".to_string(), |label| label.to_string());
            let _ = write!(
                out,
                "{index:>2}. [{prev:>2}, {:>2}]  {:indent$}{:<10}",
                op.next,
                "",
                op.kind.name(),
                indent = depth * 2
            );

            if op.src.is_set() {
                let _ = write!(out, " {}", self.render_operand(world, op.src));
            }
            match (op.first.is_set(), op.second.is_set()) {
                (true, true) => {
                    let _ = write!(
                        out,
                        " ({}, {})",
                        self.render_operand(world, op.first),
                        self.render_operand(world, op.second)
                    );
                }
                (true, false) => {
                    let _ = write!(out, " ({})", self.render_operand(world, op.first));
                }
                (false, true) => {
                    let _ = write!(out, " (_, {})", self.render_operand(world, op.second));
                }
                (false, false) => {}
            }
            match op.payload {
                Payload::Terms(terms) => {
                    let _ = write!(out, " terms={terms:#b}");
                }
                Payload::Fields(fields) => {
                    let _ = write!(out, " fields={fields:?}");
                }
                Payload::Toggle { enabled, disabled } => {
                    let _ = write!(out, " enabled={enabled:#b} disabled={disabled:#b}");
                }
                Payload::Member { offset, size, .. } => {
                    let _ = write!(out, " offset={offset} size={size}");
                }
                Payload::IfSet { field } => {
                    let _ = write!(out, " field={field}");
                }
                Payload::TableFilter(_) | Payload::None => {}
            }
            out.push('\n');

            if op.kind.is_block_begin() {
                depth += 1;
            }
        }
        out
    }

    fn render_operand(&self, world: &impl WorldLookup, operand: Operand) -> String {
        match operand {
            Operand::Unset => String::new(),
            Operand::Var(var) => self.vars.display_name(var),
            Operand::Literal(id) => render_id(world, id),
        }
    }
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
