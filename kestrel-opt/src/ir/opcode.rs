use super::inst::InstFlags;

/// IR operation tag.
///
/// The per-opcode behaviour tables live in [`Opcode::flags`] and the
/// predicate helpers; instruction payloads (immediates, type ids,
/// condition codes, save-state entries) are carried by the instruction
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[allow(missing_docs)]
pub enum Opcode {
    // Values and parameters.
    Parameter,
    Constant,
    NullPtr,
    Phi,
    // Side-effect anchors.
    SaveState,
    SaveStateDeoptimize,
    SaveStateOsr,
    Nop,
    LiveOut,
    // Arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AShr,
    Neg,
    Not,
    Abs,
    // Immediate forms.
    AddI,
    SubI,
    MulI,
    DivI,
    ModI,
    AndI,
    OrI,
    XorI,
    ShlI,
    ShrI,
    AShrI,
    // Conversions and comparisons.
    Cast,
    Cmp,
    Compare,
    // Control flow.
    If,
    IfImm,
    Return,
    ReturnVoid,
    Throw,
    // Checked operations.
    NullCheck,
    BoundsCheck,
    ZeroCheck,
    NegativeCheck,
    RefTypeCheck,
    Deoptimize,
    DeoptimizeIf,
    // Allocation and memory.
    NewArray,
    NewObject,
    LenArray,
    LoadArray,
    StoreArray,
    LoadObject,
    StoreObject,
    LoadStatic,
    StoreStatic,
    LoadString,
    LoadConstArray,
    // Class handling.
    LoadClass,
    InitClass,
    LoadAndInitClass,
    CheckCast,
    IsInstance,
    // Embedded-pointer loads.
    LoadImmediate,
    LoadObjFromConst,
    FunctionImmediate,
    LoadFromConstantPool,
    // Resolution and calls.
    ResolveVirtual,
    ResolveStatic,
    ResolveObjectFieldStatic,
    CallStatic,
    CallVirtual,
    CallResolvedVirtual,
    Intrinsic,
    // Synchronisation.
    Monitor,
}

use InstFlags as F;

impl Opcode {
    /// Static property flags applied to a freshly created instruction.
    pub fn flags(self) -> InstFlags {
        match self {
            Opcode::Parameter | Opcode::Constant | Opcode::NullPtr => F::NO_DCE.union(F::NO_CSE),
            Opcode::Phi => F::empty(),
            Opcode::SaveState | Opcode::SaveStateDeoptimize | Opcode::SaveStateOsr => {
                F::NO_CSE.union(F::NO_DCE)
            }
            Opcode::Nop => F::NO_CSE,
            Opcode::LiveOut => F::NO_CSE.union(F::NO_DCE),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Min
            | Opcode::Max
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::AShr
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Abs
            | Opcode::AddI
            | Opcode::SubI
            | Opcode::MulI
            | Opcode::DivI
            | Opcode::ModI
            | Opcode::AndI
            | Opcode::OrI
            | Opcode::XorI
            | Opcode::ShlI
            | Opcode::ShrI
            | Opcode::AShrI
            | Opcode::Cast
            | Opcode::Cmp
            | Opcode::Compare => F::empty(),
            Opcode::If | Opcode::IfImm | Opcode::Return | Opcode::ReturnVoid => {
                F::NO_CSE.union(F::NO_DCE).union(F::TERMINATOR)
            }
            Opcode::Throw => {
                F::NO_CSE.union(F::NO_DCE).union(F::TERMINATOR).union(F::REQUIRE_STATE)
            }
            Opcode::NullCheck | Opcode::RefTypeCheck => {
                F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE)
            }
            Opcode::BoundsCheck | Opcode::ZeroCheck | Opcode::NegativeCheck => {
                F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE)
            }
            Opcode::Deoptimize => {
                F::NO_CSE.union(F::NO_DCE).union(F::TERMINATOR).union(F::REQUIRE_STATE)
            }
            Opcode::DeoptimizeIf => F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE),
            Opcode::NewArray | Opcode::NewObject => F::NO_CSE
                .union(F::NO_DCE)
                .union(F::REQUIRE_STATE)
                .union(F::ALLOC)
                .union(F::MOVABLE_OBJECT),
            Opcode::LenArray => F::empty(),
            Opcode::LoadArray | Opcode::LoadObject | Opcode::LoadStatic => F::NO_CSE,
            Opcode::StoreArray | Opcode::StoreObject | Opcode::StoreStatic => {
                F::NO_CSE.union(F::NO_DCE)
            }
            Opcode::LoadString | Opcode::LoadConstArray => {
                F::NO_CSE.union(F::REQUIRE_STATE).union(F::MOVABLE_OBJECT)
            }
            Opcode::LoadClass | Opcode::InitClass | Opcode::LoadAndInitClass => {
                F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE)
            }
            Opcode::CheckCast => F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE),
            Opcode::IsInstance => F::NO_CSE.union(F::REQUIRE_STATE),
            Opcode::LoadImmediate | Opcode::LoadObjFromConst | Opcode::FunctionImmediate => {
                F::NO_CSE
            }
            Opcode::LoadFromConstantPool => F::NO_CSE,
            Opcode::ResolveVirtual | Opcode::ResolveStatic | Opcode::ResolveObjectFieldStatic => {
                F::NO_CSE.union(F::REQUIRE_STATE)
            }
            Opcode::CallStatic | Opcode::CallVirtual | Opcode::CallResolvedVirtual => {
                F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE)
            }
            Opcode::Intrinsic => F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE),
            Opcode::Monitor => F::NO_CSE.union(F::NO_DCE).union(F::REQUIRE_STATE),
        }
    }

    /// Opcodes whose operands commute for value numbering, on non-float
    /// result types only.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Min
                | Opcode::Max
        )
    }

    /// Binary arithmetic with two value inputs.
    pub fn is_binary_arith(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Min
                | Opcode::Max
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::AShr
        )
    }

    /// Checked operation lowered by ChecksElimination.
    pub fn is_check(self) -> bool {
        matches!(
            self,
            Opcode::NullCheck
                | Opcode::BoundsCheck
                | Opcode::ZeroCheck
                | Opcode::NegativeCheck
                | Opcode::RefTypeCheck
        )
    }

    /// Any of the save-state anchors.
    pub fn is_save_state(self) -> bool {
        matches!(
            self,
            Opcode::SaveState | Opcode::SaveStateDeoptimize | Opcode::SaveStateOsr
        )
    }

    /// Block terminator.
    pub fn is_terminator(self) -> bool {
        self.flags().contains(F::TERMINATOR)
    }

    /// Call-like operation.
    pub fn is_call(self) -> bool {
        matches!(
            self,
            Opcode::CallStatic | Opcode::CallVirtual | Opcode::CallResolvedVirtual
                | Opcode::Intrinsic
        )
    }

    /// Memory access classified by the alias analysis.
    pub fn is_memory(self) -> bool {
        matches!(
            self,
            Opcode::LoadArray
                | Opcode::StoreArray
                | Opcode::LoadObject
                | Opcode::StoreObject
                | Opcode::LoadStatic
                | Opcode::StoreStatic
        )
    }
}
