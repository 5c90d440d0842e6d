//! Lowering of an optimized graph back to the textual instruction list.
//!
//! Every value-producing instruction gets a dense virtual register; the
//! accumulator carries intermediate results the way the dialect expects.
//! Check instructions and save states disappear here: the emitted
//! bytecodes perform those checks themselves.

use std::collections::HashMap;

use kestrel_asm::{AsmOpcode, Ins};

use crate::analysis::compute_linear_order;
use crate::ir::{BlockId, ConditionCode, DataType, Graph, Imm, InstId, IntrinsicId, Opcode};

/// Why a graph could not be lowered; the driver keeps the original body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodegenError {
    /// An instruction shape the emitter does not handle.
    #[error("cannot lower {0}")]
    Unsupported(String),
    /// Too many live values for the frame.
    #[error("register budget exceeded: {0}")]
    TooManyRegisters(usize),
}

/// Result of lowering: the new body and its register demand.
#[derive(Debug)]
pub struct LoweredBody {
    /// Replacement instruction list.
    pub ins: Vec<Ins>,
    /// Number of local registers the body uses.
    pub regs_num: u32,
}

const MAX_FRAME_REGS: usize = u16::MAX as usize;

/// Lowers `graph` into a fresh instruction list.
pub fn lower(graph: &Graph) -> Result<LoweredBody, CodegenError> {
    Emitter::new(graph).emit()
}

struct Emitter<'g> {
    graph: &'g Graph,
    regs: HashMap<InstId, u16>,
    next_reg: usize,
    out: Vec<Ins>,
    pending_label: Option<String>,
}

impl<'g> Emitter<'g> {
    fn new(graph: &'g Graph) -> Self {
        Self { graph, regs: HashMap::new(), next_reg: 0, out: Vec::new(), pending_label: None }
    }

    fn emit(mut self) -> Result<LoweredBody, CodegenError> {
        let order: Vec<BlockId> = compute_linear_order(self.graph)
            .into_iter()
            .filter(|&b| b != self.graph.end_block())
            .collect();
        self.assign_registers(&order)?;
        for (pos, &block) in order.iter().enumerate() {
            // A block that emitted nothing still needs its label in the
            // stream; a nop carries it.
            if self.pending_label.is_some() {
                self.push(Ins::new(AsmOpcode::Nop));
            }
            self.pending_label = Some(block_label(block));
            // Phis themselves emit nothing; copies at the predecessors
            // materialise them.
            for id in self.graph.block_insts(block) {
                self.emit_inst(id)?;
            }
            self.emit_phi_copies_and_jump(block, order.get(pos + 1).copied())?;
        }
        if self.pending_label.is_some() {
            self.push(Ins::new(AsmOpcode::Nop));
        }
        if self.next_reg > MAX_FRAME_REGS {
            return Err(CodegenError::TooManyRegisters(self.next_reg));
        }
        Ok(LoweredBody { ins: self.out, regs_num: self.next_reg as u32 })
    }

    fn assign_registers(&mut self, order: &[BlockId]) -> Result<(), CodegenError> {
        for &block in order {
            for id in self.graph.block_insts_with_phis(block) {
                if produces_value(self.graph, id) {
                    self.regs.insert(id, self.next_reg as u16);
                    self.next_reg += 1;
                }
            }
        }
        Ok(())
    }

    fn reg_of(&self, id: InstId) -> Result<u16, CodegenError> {
        let root = value_root(self.graph, id);
        self.regs
            .get(&root)
            .copied()
            .ok_or_else(|| CodegenError::Unsupported(format!("{root} has no register")))
    }

    fn push(&mut self, mut ins: Ins) {
        if let Some(label) = self.pending_label.take() {
            ins.label = Some(label);
        }
        self.out.push(ins);
    }

    /// `lda` the value into the accumulator.
    fn load_acc(&mut self, id: InstId) -> Result<(), CodegenError> {
        let reg = self.reg_of(id)?;
        self.push(Ins::new(AsmOpcode::Lda).reg(reg));
        Ok(())
    }

    /// `sta` the accumulator into the instruction's register.
    fn store_result(&mut self, id: InstId) -> Result<(), CodegenError> {
        let reg = self.reg_of(id)?;
        self.push(Ins::new(AsmOpcode::Sta).reg(reg));
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn emit_inst(&mut self, id: InstId) -> Result<(), CodegenError> {
        let inst = self.graph.inst(id);
        match inst.opcode() {
            // Structural instructions with no bytecode counterpart.
            Opcode::Nop
            | Opcode::SaveState
            | Opcode::SaveStateDeoptimize
            | Opcode::SaveStateOsr
            | Opcode::NullCheck
            | Opcode::BoundsCheck
            | Opcode::ZeroCheck
            | Opcode::NegativeCheck
            | Opcode::RefTypeCheck
            | Opcode::LoadClass
            | Opcode::InitClass
            | Opcode::LoadAndInitClass
            | Opcode::Phi => Ok(()),
            Opcode::Parameter => {
                let incoming = self.next_reg as u16
                    + inst.imm().and_then(Imm::as_int).unwrap_or(0) as u16;
                let ins = Ins::new(AsmOpcode::Mov).reg(self.reg_of(id)?).reg(incoming);
                self.push(ins);
                Ok(())
            }
            Opcode::Constant => {
                match inst.imm() {
                    Some(Imm::Int(v)) => self.push(Ins::new(AsmOpcode::Ldai).imm(v)),
                    Some(Imm::Float(v)) => self.push(Ins::new(AsmOpcode::FLdai).imm(v)),
                    None => return Err(CodegenError::Unsupported(format!("{id}"))),
                }
                self.store_result(id)
            }
            Opcode::NullPtr => {
                self.push(Ins::new(AsmOpcode::LdaNull));
                self.store_result(id)
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::And
            | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr | Opcode::AShr => {
                self.load_acc(inst.input(0))?;
                let rhs = self.reg_of(inst.input(1))?;
                let op = match inst.opcode() {
                    Opcode::Add => AsmOpcode::Add2,
                    Opcode::Sub => AsmOpcode::Sub2,
                    Opcode::Mul => AsmOpcode::Mul2,
                    Opcode::Div => AsmOpcode::Div2,
                    Opcode::Mod => AsmOpcode::Mod2,
                    Opcode::And => AsmOpcode::And2,
                    Opcode::Or => AsmOpcode::Or2,
                    Opcode::Xor => AsmOpcode::Xor2,
                    Opcode::Shl => AsmOpcode::Shl2,
                    Opcode::Shr => AsmOpcode::Shr2,
                    _ => AsmOpcode::Ashr2,
                };
                self.push(Ins::new(op).reg(rhs));
                self.store_result(id)
            }
            Opcode::AddI | Opcode::SubI | Opcode::MulI | Opcode::DivI | Opcode::ModI
            | Opcode::AndI | Opcode::OrI | Opcode::XorI | Opcode::ShlI | Opcode::ShrI
            | Opcode::AShrI => {
                self.load_acc(inst.input(0))?;
                let v = inst
                    .imm()
                    .and_then(Imm::as_int)
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                let op = match inst.opcode() {
                    Opcode::AddI => AsmOpcode::Addi,
                    Opcode::SubI => AsmOpcode::Subi,
                    Opcode::MulI => AsmOpcode::Muli,
                    Opcode::DivI => AsmOpcode::Divi,
                    Opcode::ModI => AsmOpcode::Modi,
                    Opcode::AndI => AsmOpcode::Andi,
                    Opcode::OrI => AsmOpcode::Ori,
                    Opcode::XorI => AsmOpcode::Xori,
                    Opcode::ShlI => AsmOpcode::Shli,
                    Opcode::ShrI => AsmOpcode::Shri,
                    _ => AsmOpcode::Ashri,
                };
                self.push(Ins::new(op).imm(v));
                self.store_result(id)
            }
            Opcode::Neg | Opcode::Not => {
                self.load_acc(inst.input(0))?;
                let op = if inst.opcode() == Opcode::Neg { AsmOpcode::Neg } else { AsmOpcode::Not };
                self.push(Ins::new(op));
                self.store_result(id)
            }
            Opcode::Cast => {
                self.load_acc(inst.input(0))?;
                let from = self.graph.inst(inst.input(0)).ty();
                let op = match (from, inst.ty()) {
                    (DataType::Int32, DataType::Int64) => AsmOpcode::I32toI64,
                    (DataType::Int64, DataType::Int32) => AsmOpcode::I64toI32,
                    (DataType::Int32, DataType::Float64) => AsmOpcode::I32toF64,
                    (DataType::Float64, DataType::Int32) => AsmOpcode::F64toI32,
                    (DataType::Float32, DataType::Float64) => AsmOpcode::F32toF64,
                    (DataType::Float64, DataType::Float32) => AsmOpcode::F64toF32,
                    other => {
                        return Err(CodegenError::Unsupported(format!("cast {other:?}")))
                    }
                };
                self.push(Ins::new(op));
                self.store_result(id)
            }
            Opcode::Cmp => {
                self.load_acc(inst.input(0))?;
                let rhs = self.reg_of(inst.input(1))?;
                let op = if self.graph.inst(inst.input(0)).ty().is_float() {
                    AsmOpcode::FCmpl
                } else {
                    AsmOpcode::Cmp
                };
                self.push(Ins::new(op).reg(rhs));
                self.store_result(id)
            }
            Opcode::Compare => {
                // Fused into the conditional jump of the terminator.
                let fused = inst
                    .users()
                    .iter()
                    .all(|&u| self.graph.inst(u).opcode() == Opcode::IfImm);
                if fused {
                    Ok(())
                } else {
                    Err(CodegenError::Unsupported("compare used as a value".to_string()))
                }
            }
            Opcode::IfImm => Ok(()),
            Opcode::Return => {
                self.load_acc(inst.input(0))?;
                self.push(Ins::new(AsmOpcode::Return));
                Ok(())
            }
            Opcode::ReturnVoid => {
                self.push(Ins::new(AsmOpcode::ReturnVoid));
                Ok(())
            }
            Opcode::Throw => {
                let reg = self.reg_of(inst.input(0))?;
                self.push(Ins::new(AsmOpcode::Throw).reg(reg));
                Ok(())
            }
            Opcode::NewArray => {
                let size = self.reg_of(inst.input(1))?;
                let ty_name = inst
                    .type_id()
                    .map(|t| self.graph.type_name(t).to_string())
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                let ins = Ins::new(AsmOpcode::Newarr).reg(self.reg_of(id)?).reg(size).id(ty_name);
                self.push(ins);
                Ok(())
            }
            Opcode::LenArray => {
                let array = self.reg_of(inst.input(0))?;
                self.push(Ins::new(AsmOpcode::Lenarr).reg(array));
                self.store_result(id)
            }
            Opcode::LoadArray => {
                self.load_acc(inst.input(1))?;
                let array = self.reg_of(inst.input(0))?;
                self.push(Ins::new(AsmOpcode::Ldarr).reg(array));
                self.store_result(id)
            }
            Opcode::StoreArray => {
                self.load_acc(inst.input(2))?;
                let array = self.reg_of(inst.input(0))?;
                let index = self.reg_of(inst.input(1))?;
                self.push(Ins::new(AsmOpcode::Starr).reg(array).reg(index));
                Ok(())
            }
            Opcode::LoadConstArray => {
                let table_id = inst
                    .type_id()
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                self.push(Ins::new(AsmOpcode::LdaConst).id(table_id.to_string()));
                self.store_result(id)
            }
            Opcode::LoadString => {
                let sid = inst
                    .type_id()
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                let value = self.graph.string(sid).to_string();
                self.push(Ins::new(AsmOpcode::LdaStr).id(value));
                self.store_result(id)
            }
            Opcode::NewObject => {
                let ty_name = inst
                    .type_id()
                    .map(|t| self.graph.type_name(t).to_string())
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                let ins = Ins::new(AsmOpcode::Newobj).reg(self.reg_of(id)?).id(ty_name);
                self.push(ins);
                Ok(())
            }
            Opcode::LoadObject => {
                let object = self.reg_of(inst.input(0))?;
                let field = self.field_name(inst.type_id(), id)?;
                self.push(Ins::new(AsmOpcode::Ldobj).reg(object).id(field));
                self.store_result(id)
            }
            Opcode::StoreObject => {
                self.load_acc(inst.input(1))?;
                let object = self.reg_of(inst.input(0))?;
                let field = self.field_name(inst.type_id(), id)?;
                self.push(Ins::new(AsmOpcode::Stobj).reg(object).id(field));
                Ok(())
            }
            Opcode::LoadStatic => {
                let field = self.field_name(inst.type_id(), id)?;
                self.push(Ins::new(AsmOpcode::Ldstatic).id(field));
                self.store_result(id)
            }
            Opcode::StoreStatic => {
                self.load_acc(inst.input(1))?;
                let field = self.field_name(inst.type_id(), id)?;
                self.push(Ins::new(AsmOpcode::Ststatic).id(field));
                Ok(())
            }
            Opcode::CallStatic | Opcode::CallVirtual | Opcode::CallResolvedVirtual => {
                let args = &inst.inputs()[..inst.inputs().len() - 1];
                if args.len() > 4 {
                    return Err(CodegenError::Unsupported("call with over 4 args".to_string()));
                }
                let method = inst
                    .type_id()
                    .map(|m| self.graph.method_name(m).to_string())
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                let op = if inst.opcode() == Opcode::CallStatic {
                    AsmOpcode::Call
                } else {
                    AsmOpcode::CallVirt
                };
                let mut ins = Ins::new(op);
                for &arg in args {
                    ins = ins.reg(self.reg_of(arg)?);
                }
                self.push(ins.id(method));
                self.store_result(id)
            }
            Opcode::Intrinsic => {
                let name = match inst.intrinsic() {
                    Some(IntrinsicId::StringBuilderCtor) => "std.core.StringBuilder.<ctor>",
                    Some(IntrinsicId::StringBuilderCtorString) => {
                        "std.core.StringBuilder.<ctor-str>"
                    }
                    Some(IntrinsicId::StringBuilderAppendString) => "std.core.StringBuilder.append",
                    Some(IntrinsicId::StringBuilderToString) => "std.core.StringBuilder.toString",
                    Some(IntrinsicId::ConcatStrings) => "std.core.String.concat",
                    None => return Err(CodegenError::Unsupported(format!("{id}"))),
                };
                let args = &inst.inputs()[..inst.inputs().len() - 1];
                let mut ins = Ins::new(AsmOpcode::Call);
                for &arg in args {
                    ins = ins.reg(self.reg_of(arg)?);
                }
                self.push(ins.id(name));
                self.store_result(id)
            }
            Opcode::CheckCast => {
                self.load_acc(inst.input(0))?;
                let ty_name = inst
                    .type_id()
                    .map(|t| self.graph.type_name(t).to_string())
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                self.push(Ins::new(AsmOpcode::Checkcast).id(ty_name));
                Ok(())
            }
            Opcode::IsInstance => {
                self.load_acc(inst.input(0))?;
                let ty_name = inst
                    .type_id()
                    .map(|t| self.graph.type_name(t).to_string())
                    .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))?;
                self.push(Ins::new(AsmOpcode::Isinstance).id(ty_name));
                self.store_result(id)
            }
            Opcode::Monitor => {
                self.load_acc(inst.input(0))?;
                let op = if inst.imm().and_then(Imm::as_int) == Some(1) {
                    AsmOpcode::MonitorEnter
                } else {
                    AsmOpcode::MonitorExit
                };
                self.push(Ins::new(op));
                Ok(())
            }
            other => Err(CodegenError::Unsupported(format!("{other}"))),
        }
    }

    fn field_name(&self, type_id: Option<u32>, id: InstId) -> Result<String, CodegenError> {
        type_id
            .map(|t| self.graph.type_name(t).to_string())
            .ok_or_else(|| CodegenError::Unsupported(format!("{id}")))
    }

    /// Phi copies for each successor, then the block's outgoing jump.
    fn emit_phi_copies_and_jump(
        &mut self,
        block: BlockId,
        next: Option<BlockId>,
    ) -> Result<(), CodegenError> {
        for &succ in self.graph.block(block).succs() {
            let pred_idx = self
                .graph
                .block(succ)
                .pred_index(block)
                .expect("edge lists are symmetric");
            for &phi in self.graph.block(succ).phis() {
                let input = self.graph.inst(phi).input(pred_idx);
                let ins = Ins::new(AsmOpcode::Mov)
                    .reg(self.reg_of(phi)?)
                    .reg(self.reg_of(input)?);
                self.push(ins);
            }
        }
        let term = self.graph.block(block).last_inst();
        let term_op = term.map(|t| self.graph.inst(t).opcode());
        match term_op {
            Some(Opcode::Return) | Some(Opcode::ReturnVoid) | Some(Opcode::Throw) => Ok(()),
            Some(Opcode::IfImm) => {
                let term = term.expect("matched Some above");
                let cond = self.graph.inst(term).input(0);
                let succs = self.graph.block(block).succs().to_vec();
                let (true_succ, false_succ) = (succs[0], succs[1]);
                if self.graph.inst(cond).opcode() == Opcode::Compare {
                    let cc = self
                        .graph
                        .inst(cond)
                        .cc()
                        .ok_or_else(|| CodegenError::Unsupported("compare without cc".into()))?;
                    self.load_acc(self.graph.inst(cond).input(0))?;
                    let rhs = self.reg_of(self.graph.inst(cond).input(1))?;
                    let op = jump_for(cc)?;
                    self.push(Ins::new(op).reg(rhs).id(block_label(true_succ)));
                } else {
                    self.load_acc(cond)?;
                    self.push(Ins::new(AsmOpcode::Jnez).id(block_label(true_succ)));
                }
                if next != Some(false_succ) {
                    self.push(Ins::new(AsmOpcode::Jmp).id(block_label(false_succ)));
                }
                Ok(())
            }
            _ => {
                // Fall through or explicit jump to the sole successor.
                match self.graph.sole_succ(block) {
                    Some(succ) if succ == self.graph.end_block() => Ok(()),
                    Some(succ) if next == Some(succ) => Ok(()),
                    Some(succ) => {
                        self.push(Ins::new(AsmOpcode::Jmp).id(block_label(succ)));
                        Ok(())
                    }
                    None => Ok(()),
                }
            }
        }
    }
}

fn block_label(block: BlockId) -> String {
    format!("l{}", block.0)
}

fn jump_for(cc: ConditionCode) -> Result<AsmOpcode, CodegenError> {
    match cc {
        ConditionCode::Eq => Ok(AsmOpcode::Jeq),
        ConditionCode::Ne => Ok(AsmOpcode::Jne),
        ConditionCode::Lt => Ok(AsmOpcode::Jlt),
        ConditionCode::Le => Ok(AsmOpcode::Jle),
        ConditionCode::Gt => Ok(AsmOpcode::Jgt),
        ConditionCode::Ge => Ok(AsmOpcode::Jge),
        other => Err(CodegenError::Unsupported(format!("condition {other}"))),
    }
}

/// Whether the instruction's value needs a frame register.
fn produces_value(graph: &Graph, id: InstId) -> bool {
    let inst = graph.inst(id);
    if inst.ty() == DataType::NoType || inst.is_save_state() {
        return false;
    }
    match inst.opcode() {
        Opcode::Nop
        | Opcode::NullCheck
        | Opcode::BoundsCheck
        | Opcode::ZeroCheck
        | Opcode::NegativeCheck
        | Opcode::RefTypeCheck
        | Opcode::LoadClass
        | Opcode::InitClass
        | Opcode::LoadAndInitClass
        | Opcode::Compare
        | Opcode::IfImm => false,
        _ => true,
    }
}

/// Checks forward their operand's value; resolve to the register-bearing
/// root.
fn value_root(graph: &Graph, mut id: InstId) -> InstId {
    loop {
        let inst = graph.inst(id);
        id = match inst.opcode() {
            Opcode::NullCheck | Opcode::ZeroCheck | Opcode::NegativeCheck => inst.input(0),
            Opcode::BoundsCheck | Opcode::RefTypeCheck => inst.input(1),
            _ => return id,
        };
    }
}
