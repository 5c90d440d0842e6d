use smallvec::SmallVec;

use super::basic_block::BlockId;
use super::datatype::DataType;
use super::opcode::Opcode;

/// Dense instruction id; index into the graph's instruction arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

impl InstId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

bitflags::bitflags! {
    /// Per-instruction behaviour flags. Initialised from the opcode table;
    /// some passes flip them on individual instructions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstFlags: u16 {
        /// Equivalence-based removal is forbidden.
        const NO_CSE = 1 << 0;
        /// Dead-code removal is forbidden even when unused.
        const NO_DCE = 1 << 1;
        /// The last input must be a save state.
        const REQUIRE_STATE = 1 << 2;
        /// The accumulator is an implicit input.
        const ACC_READ = 1 << 3;
        /// The accumulator is an implicit output.
        const ACC_WRITE = 1 << 4;
        /// The result is a GC-movable reference and must appear in
        /// dominating save states.
        const MOVABLE_OBJECT = 1 << 5;
        /// Hoisting out of loops is forbidden.
        const NO_HOIST = 1 << 6;
        /// Allocates managed memory.
        const ALLOC = 1 << 7;
        /// Ends its basic block.
        const TERMINATOR = 1 << 8;
    }
}

/// Immediate payload, integer or floating.
#[derive(Debug, Clone, Copy)]
pub enum Imm {
    /// Sign-extended integer immediate.
    Int(i64),
    /// Floating immediate; compared bitwise.
    Float(f64),
}

impl Imm {
    /// Bit pattern used for structural equality.
    pub fn bits(self) -> u64 {
        match self {
            Imm::Int(v) => v as u64,
            Imm::Float(v) => v.to_bits(),
        }
    }

    /// Integer payload, if integral.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Imm::Int(v) => Some(v),
            Imm::Float(_) => None,
        }
    }
}

impl PartialEq for Imm {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Imm::Int(a), Imm::Int(b)) => a == b,
            (Imm::Float(a), Imm::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Imm {}

impl From<i64> for Imm {
    fn from(v: i64) -> Self {
        Imm::Int(v)
    }
}

impl From<f64> for Imm {
    fn from(v: f64) -> Self {
        Imm::Float(v)
    }
}

/// Condition code of `Compare`, `Cmp`, `If` and `IfImm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum ConditionCode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned below.
    B,
    /// Unsigned below-or-equal.
    Be,
    /// Unsigned above.
    A,
    /// Unsigned above-or-equal.
    Ae,
}

impl ConditionCode {
    /// The code testing the inverted condition.
    pub fn inverted(self) -> ConditionCode {
        match self {
            ConditionCode::Eq => ConditionCode::Ne,
            ConditionCode::Ne => ConditionCode::Eq,
            ConditionCode::Lt => ConditionCode::Ge,
            ConditionCode::Le => ConditionCode::Gt,
            ConditionCode::Gt => ConditionCode::Le,
            ConditionCode::Ge => ConditionCode::Lt,
            ConditionCode::B => ConditionCode::Ae,
            ConditionCode::Be => ConditionCode::A,
            ConditionCode::A => ConditionCode::Be,
            ConditionCode::Ae => ConditionCode::B,
        }
    }

    /// The code with swapped operands, e.g. `a < b` to `b > a`.
    pub fn swapped(self) -> ConditionCode {
        match self {
            ConditionCode::Lt => ConditionCode::Gt,
            ConditionCode::Le => ConditionCode::Ge,
            ConditionCode::Gt => ConditionCode::Lt,
            ConditionCode::Ge => ConditionCode::Le,
            ConditionCode::B => ConditionCode::A,
            ConditionCode::Be => ConditionCode::Ae,
            ConditionCode::A => ConditionCode::B,
            ConditionCode::Ae => ConditionCode::Be,
            other => other,
        }
    }
}

/// Reason code carried by `Deoptimize` and `DeoptimizeIf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[allow(missing_docs)]
pub enum DeoptReason {
    NullCheck,
    BoundsCheck,
    NegativeCheck,
    ZeroCheck,
}

/// Virtual register slot recorded for a save-state input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VReg {
    /// A numbered virtual register of the bytecode frame.
    Number(u16),
    /// The accumulator.
    Acc,
    /// Reserved marker: the value is kept alive for GC only and has no
    /// frame slot.
    Bridge,
}

/// One `(value, vreg)` entry of a save state; parallel to the input list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveStateEntry {
    /// Frame slot of the value.
    pub vreg: VReg,
}

/// Well-known runtime intrinsics the optimizer reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum IntrinsicId {
    /// `StringBuilder` default constructor; the result is the instance.
    StringBuilderCtor,
    /// `StringBuilder(String)` constructor.
    StringBuilderCtorString,
    /// `StringBuilder.append(String)`, returns the instance.
    StringBuilderAppendString,
    /// `StringBuilder.toString()`.
    StringBuilderToString,
    /// Two-argument string concatenation.
    ConcatStrings,
}

/// An instruction node of the graph arena.
///
/// Fields are crate-private; passes mutate instructions through
/// [`super::Graph`] so def-use edges and block lists stay consistent.
#[derive(Debug, Clone)]
pub struct Inst {
    pub(crate) op: Opcode,
    pub(crate) ty: DataType,
    pub(crate) block: Option<BlockId>,
    pub(crate) inputs: SmallVec<[InstId; 4]>,
    pub(crate) users: Vec<InstId>,
    pub(crate) imm: Option<Imm>,
    pub(crate) type_id: Option<u32>,
    pub(crate) cc: Option<ConditionCode>,
    pub(crate) flags: InstFlags,
    /// Save states only: parallel to `inputs`.
    pub(crate) vregs: SmallVec<[SaveStateEntry; 4]>,
    pub(crate) intrinsic: Option<IntrinsicId>,
    pub(crate) deopt: Option<DeoptReason>,
    /// Branch weight hint on `IfImm`.
    pub(crate) likely: Option<bool>,
    /// Null check elision on `CheckCast` / `IsInstance`.
    pub(crate) omit_null_check: bool,
    pub(crate) prev: Option<InstId>,
    pub(crate) next: Option<InstId>,
}

impl Inst {
    pub(crate) fn new(op: Opcode, ty: DataType) -> Self {
        Self {
            op,
            ty,
            block: None,
            inputs: SmallVec::new(),
            users: Vec::new(),
            imm: None,
            type_id: None,
            cc: None,
            flags: op.flags(),
            vregs: SmallVec::new(),
            intrinsic: None,
            deopt: None,
            likely: None,
            omit_null_check: false,
            prev: None,
            next: None,
        }
    }

    /// Operation tag.
    pub fn opcode(&self) -> Opcode {
        self.op
    }

    /// Result type.
    pub fn ty(&self) -> DataType {
        self.ty
    }

    /// Owning block; `None` while detached.
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Input edges in operand order.
    pub fn inputs(&self) -> &[InstId] {
        &self.inputs
    }

    /// Single input accessor.
    pub fn input(&self, idx: usize) -> InstId {
        self.inputs[idx]
    }

    /// Instructions using this value, duplicates possible.
    pub fn users(&self) -> &[InstId] {
        &self.users
    }

    /// Whether the value has no users.
    pub fn is_unused(&self) -> bool {
        self.users.is_empty()
    }

    /// Immediate payload.
    pub fn imm(&self) -> Option<Imm> {
        self.imm
    }

    /// Type-id payload.
    pub fn type_id(&self) -> Option<u32> {
        self.type_id
    }

    /// Condition code payload.
    pub fn cc(&self) -> Option<ConditionCode> {
        self.cc
    }

    /// Behaviour flags.
    pub fn flags(&self) -> InstFlags {
        self.flags
    }

    /// Intrinsic payload of `Intrinsic` instructions.
    pub fn intrinsic(&self) -> Option<IntrinsicId> {
        self.intrinsic
    }

    /// Deoptimization reason payload.
    pub fn deopt_reason(&self) -> Option<DeoptReason> {
        self.deopt
    }

    /// Branch hint of `IfImm`.
    pub fn likely(&self) -> Option<bool> {
        self.likely
    }

    /// Whether a dominating guard proved the object non-null.
    pub fn omit_null_check(&self) -> bool {
        self.omit_null_check
    }

    /// Save-state entries, parallel to inputs.
    pub fn save_state_entries(&self) -> &[SaveStateEntry] {
        &self.vregs
    }

    /// The save-state input of a `REQUIRE_STATE` instruction.
    pub fn save_state_input(&self) -> Option<InstId> {
        if self.flags.contains(InstFlags::REQUIRE_STATE) {
            self.inputs.last().copied()
        } else {
            None
        }
    }

    /// Whether this is one of the save-state anchors.
    pub fn is_save_state(&self) -> bool {
        self.op.is_save_state()
    }

    /// Whether this is a phi.
    pub fn is_phi(&self) -> bool {
        self.op == Opcode::Phi
    }

    /// Whether the value is a GC-movable managed reference.
    pub fn is_movable_value(&self) -> bool {
        self.ty.is_reference() && self.flags.contains(InstFlags::MOVABLE_OBJECT)
    }

    /// Whether the instruction is a `Constant`.
    pub fn is_const(&self) -> bool {
        self.op == Opcode::Constant
    }

    /// Integer payload of a constant.
    pub fn const_int(&self) -> Option<i64> {
        if self.op == Opcode::Constant {
            self.imm.and_then(Imm::as_int)
        } else {
            None
        }
    }
}
