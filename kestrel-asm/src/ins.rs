use smallvec::SmallVec;

use crate::debuginfo::InsDebug;

/// Virtual register number. The accumulator is not a numbered register;
/// opcodes address it implicitly via [`InsFlags::ACC_READ`] /
/// [`InsFlags::ACC_WRITE`].
pub type Reg = u16;

bitflags::bitflags! {
    /// Static properties of an assembly opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InsFlags: u32 {
        /// Transfers control to a label operand.
        const JUMP = 1 << 0;
        /// Conditional form of a jump.
        const COND = 1 << 1;
        /// Calls a method operand.
        const CALL = 1 << 2;
        /// Leaves the function.
        const RETURN = 1 << 3;
        /// Reads the accumulator.
        const ACC_READ = 1 << 4;
        /// Writes the accumulator.
        const ACC_WRITE = 1 << 5;
        /// May raise a managed exception.
        const THROWING = 1 << 6;
        /// First id operand names a method.
        const METHOD_ID = 1 << 7;
        /// First id operand names a field.
        const FIELD_ID = 1 << 8;
        /// First id operand names a type.
        const TYPE_ID = 1 << 9;
        /// First id operand is a string table entry.
        const STRING_ID = 1 << 10;
        /// First id operand is a literal array id.
        const LITERALARRAY_ID = 1 << 11;
    }
}

macro_rules! asm_opcodes {
    ($( $variant:ident = ($mnemonic:literal, $flags:expr) ),+ $(,)?) => {
        /// Opcode of the textual assembly dialect.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, serde::Serialize, serde::Deserialize)]
        #[allow(missing_docs)]
        pub enum AsmOpcode {
            $($variant),+
        }

        impl AsmOpcode {
            /// Textual mnemonic as written in `.function` bodies.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic),+
                }
            }

            /// Static property flags of this opcode.
            pub fn flags(self) -> InsFlags {
                match self {
                    $(Self::$variant => $flags),+
                }
            }
        }
    };
}

use InsFlags as F;

asm_opcodes! {
    Nop = ("nop", F::empty()),
    Mov = ("mov", F::empty()),
    Movi = ("movi", F::empty()),
    FMovi = ("fmovi", F::empty()),
    Lda = ("lda", F::ACC_WRITE),
    Ldai = ("ldai", F::ACC_WRITE),
    FLdai = ("fldai", F::ACC_WRITE),
    LdaStr = ("lda.str", F::ACC_WRITE.union(F::STRING_ID)),
    LdaConst = ("lda.const", F::ACC_WRITE.union(F::LITERALARRAY_ID)),
    LdaNull = ("lda.null", F::ACC_WRITE),
    Sta = ("sta", F::ACC_READ),
    Add2 = ("add2", F::ACC_READ.union(F::ACC_WRITE)),
    Sub2 = ("sub2", F::ACC_READ.union(F::ACC_WRITE)),
    Mul2 = ("mul2", F::ACC_READ.union(F::ACC_WRITE)),
    Div2 = ("div2", F::ACC_READ.union(F::ACC_WRITE).union(F::THROWING)),
    Mod2 = ("mod2", F::ACC_READ.union(F::ACC_WRITE).union(F::THROWING)),
    And2 = ("and2", F::ACC_READ.union(F::ACC_WRITE)),
    Or2 = ("or2", F::ACC_READ.union(F::ACC_WRITE)),
    Xor2 = ("xor2", F::ACC_READ.union(F::ACC_WRITE)),
    Shl2 = ("shl2", F::ACC_READ.union(F::ACC_WRITE)),
    Shr2 = ("shr2", F::ACC_READ.union(F::ACC_WRITE)),
    Ashr2 = ("ashr2", F::ACC_READ.union(F::ACC_WRITE)),
    Addi = ("addi", F::ACC_READ.union(F::ACC_WRITE)),
    Subi = ("subi", F::ACC_READ.union(F::ACC_WRITE)),
    Muli = ("muli", F::ACC_READ.union(F::ACC_WRITE)),
    Divi = ("divi", F::ACC_READ.union(F::ACC_WRITE).union(F::THROWING)),
    Modi = ("modi", F::ACC_READ.union(F::ACC_WRITE).union(F::THROWING)),
    Andi = ("andi", F::ACC_READ.union(F::ACC_WRITE)),
    Ori = ("ori", F::ACC_READ.union(F::ACC_WRITE)),
    Xori = ("xori", F::ACC_READ.union(F::ACC_WRITE)),
    Shli = ("shli", F::ACC_READ.union(F::ACC_WRITE)),
    Shri = ("shri", F::ACC_READ.union(F::ACC_WRITE)),
    Ashri = ("ashri", F::ACC_READ.union(F::ACC_WRITE)),
    Neg = ("neg", F::ACC_READ.union(F::ACC_WRITE)),
    Not = ("not", F::ACC_READ.union(F::ACC_WRITE)),
    I32toI64 = ("i32toi64", F::ACC_READ.union(F::ACC_WRITE)),
    I64toI32 = ("i64toi32", F::ACC_READ.union(F::ACC_WRITE)),
    I32toF64 = ("i32tof64", F::ACC_READ.union(F::ACC_WRITE)),
    F64toI32 = ("f64toi32", F::ACC_READ.union(F::ACC_WRITE)),
    F32toF64 = ("f32tof64", F::ACC_READ.union(F::ACC_WRITE)),
    F64toF32 = ("f64tof32", F::ACC_READ.union(F::ACC_WRITE)),
    Cmp = ("cmp", F::ACC_READ.union(F::ACC_WRITE)),
    FCmpl = ("fcmpl", F::ACC_READ.union(F::ACC_WRITE)),
    FCmpg = ("fcmpg", F::ACC_READ.union(F::ACC_WRITE)),
    Jmp = ("jmp", F::JUMP),
    Jeq = ("jeq", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jne = ("jne", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jlt = ("jlt", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jgt = ("jgt", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jle = ("jle", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jge = ("jge", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jeqz = ("jeqz", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jnez = ("jnez", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jltz = ("jltz", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jgtz = ("jgtz", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jlez = ("jlez", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Jgez = ("jgez", F::JUMP.union(F::COND).union(F::ACC_READ)),
    Return = ("return", F::RETURN.union(F::ACC_READ)),
    ReturnVoid = ("return.void", F::RETURN),
    Throw = ("throw", F::THROWING),
    Newarr = ("newarr", F::TYPE_ID.union(F::THROWING)),
    Lenarr = ("lenarr", F::ACC_WRITE.union(F::THROWING)),
    Ldarr = ("ldarr", F::ACC_READ.union(F::ACC_WRITE).union(F::THROWING)),
    Starr = ("starr", F::ACC_READ.union(F::THROWING)),
    Newobj = ("newobj", F::TYPE_ID.union(F::THROWING)),
    Ldobj = ("ldobj", F::FIELD_ID.union(F::ACC_WRITE).union(F::THROWING)),
    Stobj = ("stobj", F::FIELD_ID.union(F::ACC_READ).union(F::THROWING)),
    Ldstatic = ("ldstatic", F::FIELD_ID.union(F::ACC_WRITE).union(F::THROWING)),
    Ststatic = ("ststatic", F::FIELD_ID.union(F::ACC_READ).union(F::THROWING)),
    CallShort = ("call.short", F::CALL.union(F::METHOD_ID).union(F::ACC_WRITE).union(F::THROWING)),
    Call = ("call", F::CALL.union(F::METHOD_ID).union(F::ACC_WRITE).union(F::THROWING)),
    CallVirtShort = ("call.virt.short", F::CALL.union(F::METHOD_ID).union(F::ACC_WRITE).union(F::THROWING)),
    CallVirt = ("call.virt", F::CALL.union(F::METHOD_ID).union(F::ACC_WRITE).union(F::THROWING)),
    Checkcast = ("checkcast", F::TYPE_ID.union(F::ACC_READ).union(F::THROWING)),
    Isinstance = ("isinstance", F::TYPE_ID.union(F::ACC_READ).union(F::ACC_WRITE)),
    MonitorEnter = ("monitorenter", F::ACC_READ.union(F::THROWING)),
    MonitorExit = ("monitorexit", F::ACC_READ.union(F::THROWING)),
}

/// Immediate operand: the dialect distinguishes integer and floating
/// spellings (`movi` vs `fmovi`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum InsImm {
    /// Integer immediate, stored sign-extended.
    Int(i64),
    /// Floating immediate.
    Float(f64),
}

impl InsImm {
    /// Integer payload if this is an integer immediate.
    pub fn as_int(self) -> Option<i64> {
        match self {
            InsImm::Int(v) => Some(v),
            InsImm::Float(_) => None,
        }
    }
}

impl From<i64> for InsImm {
    fn from(v: i64) -> Self {
        InsImm::Int(v)
    }
}

impl From<f64> for InsImm {
    fn from(v: f64) -> Self {
        InsImm::Float(v)
    }
}

/// One line of a function body: an opcode with register, immediate and
/// identifier operands, an optional leading label, and debug info.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Ins {
    /// The opcode.
    pub opcode: AsmOpcode,
    /// Register operands in operand order.
    pub regs: SmallVec<[Reg; 4]>,
    /// Immediate operands in operand order.
    pub imms: SmallVec<[InsImm; 2]>,
    /// Identifier operands: method/field/type/string/literal-array names
    /// and jump target labels.
    pub ids: SmallVec<[String; 1]>,
    /// Label defined at this line, if any.
    pub label: Option<String>,
    /// Source mapping of the line.
    pub debug: InsDebug,
}

impl Ins {
    /// Creates an operand-less instruction.
    pub fn new(opcode: AsmOpcode) -> Self {
        Self {
            opcode,
            regs: SmallVec::new(),
            imms: SmallVec::new(),
            ids: SmallVec::new(),
            label: None,
            debug: InsDebug::default(),
        }
    }

    /// Builder-style register operand.
    pub fn reg(mut self, reg: Reg) -> Self {
        self.regs.push(reg);
        self
    }

    /// Builder-style immediate operand.
    pub fn imm(mut self, imm: impl Into<InsImm>) -> Self {
        self.imms.push(imm.into());
        self
    }

    /// Builder-style identifier operand.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    /// Attaches a leading label to this line.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether this instruction can raise a managed exception.
    pub fn can_throw(&self) -> bool {
        self.opcode.flags().contains(InsFlags::THROWING)
    }

    /// Whether this instruction transfers control to a label.
    pub fn is_jump(&self) -> bool {
        self.opcode.flags().contains(InsFlags::JUMP)
    }

    /// Whether a jump is conditional.
    pub fn is_conditional(&self) -> bool {
        self.opcode.flags().contains(InsFlags::COND)
    }

    /// Whether this instruction ends the function.
    pub fn is_return(&self) -> bool {
        self.opcode.flags().contains(InsFlags::RETURN)
    }

    /// Jump target label, when [`Self::is_jump`].
    pub fn jump_target(&self) -> Option<&str> {
        self.is_jump().then(|| self.ids.first().map(String::as_str)).flatten()
    }

    /// Whether the line carries a source mapping.
    pub fn has_debug_info(&self) -> bool {
        self.debug.line_number != 0
    }
}

impl std::fmt::Display for Ins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{label}: ")?;
        }
        write!(f, "{}", self.opcode.mnemonic())?;
        let mut sep = " ";
        for r in &self.regs {
            write!(f, "{sep}v{r}")?;
            sep = ", ";
        }
        for imm in &self.imms {
            match imm {
                InsImm::Int(v) => write!(f, "{sep}{v}")?,
                InsImm::Float(v) => write!(f, "{sep}{v}")?,
            }
            sep = ", ";
        }
        for id in &self.ids {
            write!(f, "{sep}{id}")?;
            sep = ", ";
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn conditional_implies_jump() {
        for op in AsmOpcode::iter() {
            if op.flags().contains(InsFlags::COND) {
                assert!(op.flags().contains(InsFlags::JUMP), "{op:?}");
            }
        }
    }

    #[test]
    fn mnemonics_are_unique() {
        let all: Vec<_> = AsmOpcode::iter().map(|op| op.mnemonic()).collect();
        let mut dedup = all.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(all.len(), dedup.len());
    }

    #[test]
    fn display_formats_operands() {
        let ins = Ins::new(AsmOpcode::Jeq).reg(3).id("loop_head").with_label("entry");
        assert_eq!(ins.to_string(), "entry: jeq v3, loop_head");
        assert!(ins.is_jump());
        assert!(ins.is_conditional());
        assert_eq!(ins.jump_target(), Some("loop_head"));
    }

    #[test]
    fn throwing_flags() {
        assert!(Ins::new(AsmOpcode::Div2).can_throw());
        assert!(!Ins::new(AsmOpcode::Add2).can_throw());
    }
}
