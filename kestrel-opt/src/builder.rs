//! Graph construction from a function's textual instruction list.
//!
//! Blocks are split at labels and after control transfers; registers and
//! the accumulator are promoted to SSA with a phi at every join (cleanup
//! folds the redundant ones); throwing bytecodes get their explicit check
//! instructions and a save state listing the live frame registers, the
//! contract every later pass builds on.

use std::collections::HashMap;

use kestrel_asm::{AsmOpcode, Function, Ins, InsImm};
use tracing::trace;

use crate::ir::{
    BlockFlags, BlockId, ConditionCode, DataType, Graph, GraphMode, InstId, Opcode, VReg,
};

/// Why a function could not be converted; the driver keeps such functions
/// unoptimised.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    /// An instruction the optimizer does not model.
    #[error("unsupported instruction `{0}`")]
    Unsupported(String),
    /// A jump names a label the function never defines.
    #[error("undefined label `{0}`")]
    UndefinedLabel(String),
    /// A register is read on a path that never wrote it.
    #[error("register v{0} may be read before it is written")]
    MaybeUndefined(u16),
    /// The function exceeds a structural limit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

const MAX_REGS: usize = u16::MAX as usize;

/// Per-block frame state: SSA value per register, plus the accumulator.
#[derive(Debug, Clone, Default)]
struct FrameState {
    regs: HashMap<u16, InstId>,
    acc: Option<InstId>,
}

/// Builds the graph for one function.
pub fn build_graph(func: &Function) -> Result<Graph, BuildError> {
    IrBuilder::new(func)?.build()
}

struct IrBuilder<'f> {
    func: &'f Function,
    graph: Graph,
    /// Block per leader instruction index, in order.
    block_of_leader: Vec<(usize, BlockId)>,
    label_block: HashMap<String, BlockId>,
}

impl<'f> IrBuilder<'f> {
    fn new(func: &'f Function) -> Result<Self, BuildError> {
        if func.total_regs() > MAX_REGS {
            return Err(BuildError::LimitExceeded(format!(
                "{} registers",
                func.total_regs()
            )));
        }
        Ok(Self {
            func,
            graph: Graph::new(GraphMode::default()),
            block_of_leader: Vec::new(),
            label_block: HashMap::new(),
        })
    }

    fn build(mut self) -> Result<Graph, BuildError> {
        self.split_blocks()?;
        self.connect_blocks()?;
        self.mark_guarded_regions();
        self.fill_blocks()?;
        Ok(self.graph)
    }

    /// Leaders: index 0, every labelled line, every line after a control
    /// transfer.
    fn split_blocks(&mut self) -> Result<(), BuildError> {
        let ins = &self.func.ins;
        let mut leaders = vec![false; ins.len()];
        if !ins.is_empty() {
            leaders[0] = true;
        }
        for (i, line) in ins.iter().enumerate() {
            if line.label.is_some() {
                leaders[i] = true;
            }
            if (line.is_jump() || line.is_return() || line.opcode == AsmOpcode::Throw)
                && i + 1 < ins.len()
            {
                leaders[i + 1] = true;
            }
        }
        for (i, &leader) in leaders.iter().enumerate() {
            if !leader {
                continue;
            }
            let block = self.graph.create_block();
            self.block_of_leader.push((i, block));
            if let Some(label) = &ins[i].label {
                self.label_block.insert(label.clone(), block);
            }
        }
        Ok(())
    }

    fn block_range(&self, block_pos: usize) -> (usize, usize) {
        let (start, _) = self.block_of_leader[block_pos];
        let end = self
            .block_of_leader
            .get(block_pos + 1)
            .map(|&(next, _)| next)
            .unwrap_or(self.func.ins.len());
        (start, end)
    }

    fn connect_blocks(&mut self) -> Result<(), BuildError> {
        let entry = self.block_of_leader.first().map(|&(_, b)| b);
        let start = self.graph.start_block();
        match entry {
            Some(entry) => self.graph.connect(start, entry),
            None => {
                let end = self.graph.end_block();
                self.graph.connect(start, end);
                return Ok(());
            }
        }
        for pos in 0..self.block_of_leader.len() {
            let (_, block) = self.block_of_leader[pos];
            let (start_idx, end_idx) = self.block_range(pos);
            debug_assert!(end_idx > start_idx);
            let last = &self.func.ins[end_idx - 1];
            let next_block = self.block_of_leader.get(pos + 1).map(|&(_, b)| b);
            if last.is_jump() {
                let target = last
                    .jump_target()
                    .ok_or_else(|| BuildError::UndefinedLabel(String::new()))?;
                let target = *self
                    .label_block
                    .get(target)
                    .ok_or_else(|| BuildError::UndefinedLabel(target.to_string()))?;
                // Taken edge first, fall-through second.
                self.graph.connect(block, target);
                if last.is_conditional() {
                    match next_block {
                        Some(next) => self.graph.connect(block, next),
                        None => {
                            return Err(BuildError::Unsupported(
                                "conditional jump at function end".to_string(),
                            ))
                        }
                    }
                }
            } else if last.is_return() || last.opcode == AsmOpcode::Throw {
                let end = self.graph.end_block();
                self.graph.connect(block, end);
            } else {
                match next_block {
                    Some(next) => self.graph.connect(block, next),
                    None => {
                        return Err(BuildError::Unsupported(
                            "function falls off its end".to_string(),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Flags blocks inside `.catch` ranges and connects handlers so they
    /// stay reachable.
    fn mark_guarded_regions(&mut self) {
        for catch in &self.func.catch_blocks {
            let begin = self.label_block.get(&catch.try_begin_label).copied();
            let end = self.label_block.get(&catch.try_end_label).copied();
            let handler = self.label_block.get(&catch.catch_begin_label).copied();
            let (Some(begin), Some(end), Some(handler)) = (begin, end, handler) else {
                continue;
            };
            let mut in_range = false;
            let mut first_try = None;
            for &(_, block) in &self.block_of_leader {
                if block == begin {
                    in_range = true;
                }
                if block == end {
                    in_range = false;
                }
                if in_range {
                    self.graph.add_block_flags(block, BlockFlags::TRY);
                    first_try.get_or_insert(block);
                }
            }
            self.graph.add_block_flags(handler, BlockFlags::CATCH);
            if let Some(first) = first_try {
                self.graph.connect(first, handler);
            }
        }
    }

    /// Translates every block, wiring frame states through join phis.
    fn fill_blocks(&mut self) -> Result<(), BuildError> {
        let params = self.collect_parameters();
        // Maximal SSA: a phi per register at every join, folded later by
        // cleanup.
        let mut entry_states: HashMap<BlockId, FrameState> = HashMap::new();
        let mut join_phis: HashMap<BlockId, HashMap<VRegKey, InstId>> = HashMap::new();
        for pos in 0..self.block_of_leader.len() {
            let (_, block) = self.block_of_leader[pos];
            let preds = self.graph.block(block).preds().len();
            let mut state = FrameState::default();
            if preds >= 2 {
                let mut phis = HashMap::new();
                for reg in self.known_regs() {
                    let phi = self.graph.build(Opcode::Phi, DataType::Any).as_phi_of(block);
                    phis.insert(VRegKey::Reg(reg), phi);
                    state.regs.insert(reg, phi);
                }
                let acc_phi = self.graph.build(Opcode::Phi, DataType::Any).as_phi_of(block);
                phis.insert(VRegKey::Acc, acc_phi);
                state.acc = Some(acc_phi);
                join_phis.insert(block, phis);
            } else if pos == 0 || preds == 0 {
                state = params.clone();
            }
            entry_states.insert(block, state);
        }
        // Single-predecessor states flow in once the predecessor is done;
        // translate in leader order and resolve afterwards.
        let mut exit_states: HashMap<BlockId, FrameState> = HashMap::new();
        for pos in 0..self.block_of_leader.len() {
            let (_, block) = self.block_of_leader[pos];
            let preds: Vec<BlockId> = self.graph.block(block).preds().to_vec();
            let state = if preds.len() == 1 && exit_states.contains_key(&preds[0]) {
                exit_states[&preds[0]].clone()
            } else {
                entry_states[&block].clone()
            };
            let out = self.translate_block(pos, block, state)?;
            exit_states.insert(block, out);
        }
        self.fill_join_phis(&join_phis, &exit_states, &params)?;
        Ok(())
    }

    fn collect_parameters(&mut self) -> FrameState {
        let mut state = FrameState::default();
        let start = self.graph.start_block();
        for (i, param) in self.func.params.iter().enumerate() {
            let ty = DataType::from_asm_type(&param.ty);
            let inst = self.graph.build(Opcode::Parameter, ty).imm(i as i64).append_to(start);
            let reg = self.func.regs_num as u16 + i as u16;
            state.regs.insert(reg, inst);
        }
        state
    }

    fn known_regs(&self) -> Vec<u16> {
        (0..self.func.total_regs() as u16).collect()
    }

    fn fill_join_phis(
        &mut self,
        join_phis: &HashMap<BlockId, HashMap<VRegKey, InstId>>,
        exit_states: &HashMap<BlockId, FrameState>,
        params: &FrameState,
    ) -> Result<(), BuildError> {
        for (&block, phis) in join_phis {
            let preds: Vec<BlockId> = self.graph.block(block).preds().to_vec();
            for (&key, &phi) in phis {
                let mut inputs = Vec::with_capacity(preds.len());
                for pred in &preds {
                    let state = exit_states.get(pred).or_else(|| {
                        (*pred == self.graph.start_block()).then_some(params)
                    });
                    let value = state.and_then(|s| match key {
                        VRegKey::Reg(reg) => s.regs.get(&reg).copied(),
                        VRegKey::Acc => s.acc,
                    });
                    match value {
                        Some(v) => inputs.push(v),
                        None => break,
                    }
                }
                if inputs.len() == preds.len() {
                    let ty = self.graph.inst(inputs[0]).ty();
                    self.graph.set_inputs(phi, &inputs);
                    self.graph.set_result_type(phi, ty);
                    continue;
                }
                // The register is dead on at least one path. Save states
                // speculatively listed the slot; a real consumer makes it
                // an error.
                let only_save_states = self
                    .graph
                    .inst(phi)
                    .users()
                    .iter()
                    .all(|&u| self.graph.inst(u).is_save_state());
                if only_save_states {
                    self.graph.purge_from_save_states(phi);
                    self.graph.remove_inst(phi);
                } else {
                    let reg = match key {
                        VRegKey::Reg(reg) => reg,
                        VRegKey::Acc => u16::MAX,
                    };
                    return Err(BuildError::MaybeUndefined(reg));
                }
            }
        }
        Ok(())
    }

    /// A save state over the currently defined frame registers.
    fn make_save_state(&mut self, block: BlockId, state: &FrameState) -> InstId {
        let ss = self.graph.build(Opcode::SaveState, DataType::NoType).append_to(block);
        let mut regs: Vec<(&u16, &InstId)> = state.regs.iter().collect();
        regs.sort_by_key(|&(reg, _)| *reg);
        for (&reg, &value) in regs {
            self.graph.add_save_state_input(ss, value, VReg::Number(reg));
        }
        if let Some(acc) = state.acc {
            self.graph.add_save_state_input(ss, acc, VReg::Acc);
        }
        ss
    }

    #[allow(clippy::too_many_lines)]
    fn translate_block(
        &mut self,
        pos: usize,
        block: BlockId,
        mut state: FrameState,
    ) -> Result<FrameState, BuildError> {
        let (start_idx, end_idx) = self.block_range(pos);
        for i in start_idx..end_idx {
            let line = self.func.ins[i].clone();
            trace!(block = %block, ins = %line, "translating");
            self.translate_ins(block, &line, &mut state)?;
        }
        Ok(state)
    }

    fn reg(&self, line: &Ins, idx: usize, state: &FrameState) -> Result<InstId, BuildError> {
        let reg = line.regs[idx];
        state
            .regs
            .get(&reg)
            .copied()
            .ok_or(BuildError::MaybeUndefined(reg))
    }

    fn acc(&self, state: &FrameState) -> Result<InstId, BuildError> {
        state.acc.ok_or(BuildError::MaybeUndefined(u16::MAX))
    }

    fn int_imm(&self, line: &Ins) -> Result<i64, BuildError> {
        match line.imms.first() {
            Some(InsImm::Int(v)) => Ok(*v),
            _ => Err(BuildError::Unsupported(line.to_string())),
        }
    }

    fn binary(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: DataType,
        lhs: InstId,
        rhs: InstId,
    ) -> InstId {
        self.graph.build(op, ty).inputs(&[lhs, rhs]).append_to(block)
    }

    #[allow(clippy::too_many_lines)]
    fn translate_ins(
        &mut self,
        block: BlockId,
        line: &Ins,
        state: &mut FrameState,
    ) -> Result<(), BuildError> {
        use AsmOpcode as A;
        match line.opcode {
            A::Nop => {}
            A::Mov => {
                let src = self.reg(line, 1, state)?;
                state.regs.insert(line.regs[0], src);
            }
            A::Movi => {
                let v = self.int_imm(line)?;
                let c = self.graph.find_or_create_constant(v);
                state.regs.insert(line.regs[0], c);
            }
            A::FMovi => {
                let v = match line.imms.first() {
                    Some(InsImm::Float(v)) => *v,
                    _ => return Err(BuildError::Unsupported(line.to_string())),
                };
                let c = self.graph.find_or_create_float_constant(v);
                state.regs.insert(line.regs[0], c);
            }
            A::Lda => state.acc = Some(self.reg(line, 0, state)?),
            A::Ldai => {
                let v = self.int_imm(line)?;
                state.acc = Some(self.graph.find_or_create_constant(v));
            }
            A::FLdai => {
                let v = match line.imms.first() {
                    Some(InsImm::Float(v)) => *v,
                    _ => return Err(BuildError::Unsupported(line.to_string())),
                };
                state.acc = Some(self.graph.find_or_create_float_constant(v));
            }
            A::LdaNull => state.acc = Some(self.graph.find_or_create_null_ptr()),
            A::LdaStr => {
                let id = line.ids.first().ok_or_else(|| {
                    BuildError::Unsupported(line.to_string())
                })?;
                let sid = self.graph.intern_string(id);
                let ss = self.make_save_state(block, state);
                let s = self
                    .graph
                    .build(Opcode::LoadString, DataType::Reference)
                    .inputs(&[ss])
                    .type_id(sid)
                    .append_to(block);
                state.acc = Some(s);
            }
            A::LdaConst => {
                let id = line
                    .ids
                    .first()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let ss = self.make_save_state(block, state);
                let arr = self
                    .graph
                    .build(Opcode::LoadConstArray, DataType::Reference)
                    .inputs(&[ss])
                    .type_id(id)
                    .append_to(block);
                state.acc = Some(arr);
            }
            A::Sta => {
                let acc = self.acc(state)?;
                state.regs.insert(line.regs[0], acc);
            }
            A::Add2 | A::Sub2 | A::Mul2 | A::And2 | A::Or2 | A::Xor2 | A::Shl2 | A::Shr2
            | A::Ashr2 => {
                let acc = self.acc(state)?;
                let rhs = self.reg(line, 0, state)?;
                let op = match line.opcode {
                    A::Add2 => Opcode::Add,
                    A::Sub2 => Opcode::Sub,
                    A::Mul2 => Opcode::Mul,
                    A::And2 => Opcode::And,
                    A::Or2 => Opcode::Or,
                    A::Xor2 => Opcode::Xor,
                    A::Shl2 => Opcode::Shl,
                    A::Shr2 => Opcode::Shr,
                    _ => Opcode::AShr,
                };
                state.acc = Some(self.binary(block, op, DataType::Int32, acc, rhs));
            }
            A::Div2 | A::Mod2 => {
                let acc = self.acc(state)?;
                let rhs = self.reg(line, 0, state)?;
                let ss = self.make_save_state(block, state);
                let zc = self
                    .graph
                    .build(Opcode::ZeroCheck, DataType::Int32)
                    .inputs(&[rhs, ss])
                    .append_to(block);
                let op = if line.opcode == A::Div2 { Opcode::Div } else { Opcode::Mod };
                state.acc = Some(self.binary(block, op, DataType::Int32, acc, zc));
            }
            A::Addi | A::Subi | A::Muli | A::Andi | A::Ori | A::Xori | A::Shli | A::Shri
            | A::Ashri => {
                let acc = self.acc(state)?;
                let v = self.int_imm(line)?;
                let op = match line.opcode {
                    A::Addi => Opcode::AddI,
                    A::Subi => Opcode::SubI,
                    A::Muli => Opcode::MulI,
                    A::Andi => Opcode::AndI,
                    A::Ori => Opcode::OrI,
                    A::Xori => Opcode::XorI,
                    A::Shli => Opcode::ShlI,
                    A::Shri => Opcode::ShrI,
                    _ => Opcode::AShrI,
                };
                state.acc = Some(
                    self.graph.build(op, DataType::Int32).inputs(&[acc]).imm(v).append_to(block),
                );
            }
            A::Divi | A::Modi => {
                let acc = self.acc(state)?;
                let v = self.int_imm(line)?;
                let divisor = self.graph.find_or_create_constant(v);
                let ss = self.make_save_state(block, state);
                let zc = self
                    .graph
                    .build(Opcode::ZeroCheck, DataType::Int32)
                    .inputs(&[divisor, ss])
                    .append_to(block);
                let op = if line.opcode == A::Divi { Opcode::Div } else { Opcode::Mod };
                state.acc = Some(self.binary(block, op, DataType::Int32, acc, zc));
            }
            A::Neg | A::Not => {
                let acc = self.acc(state)?;
                let op = if line.opcode == A::Neg { Opcode::Neg } else { Opcode::Not };
                state.acc =
                    Some(self.graph.build(op, DataType::Int32).inputs(&[acc]).append_to(block));
            }
            A::I32toI64 | A::I64toI32 | A::I32toF64 | A::F64toI32 | A::F32toF64 | A::F64toF32 => {
                let acc = self.acc(state)?;
                let ty = match line.opcode {
                    A::I32toI64 => DataType::Int64,
                    A::I64toI32 | A::F64toI32 => DataType::Int32,
                    A::I32toF64 | A::F32toF64 => DataType::Float64,
                    _ => DataType::Float32,
                };
                state.acc =
                    Some(self.graph.build(Opcode::Cast, ty).inputs(&[acc]).append_to(block));
            }
            A::Cmp | A::FCmpl | A::FCmpg => {
                let acc = self.acc(state)?;
                let rhs = self.reg(line, 0, state)?;
                state.acc = Some(self.binary(block, Opcode::Cmp, DataType::Int32, acc, rhs));
            }
            A::Jmp => {}
            A::Jeq | A::Jne | A::Jlt | A::Jgt | A::Jle | A::Jge => {
                let acc = self.acc(state)?;
                let rhs = self.reg(line, 0, state)?;
                let cc = match line.opcode {
                    A::Jeq => ConditionCode::Eq,
                    A::Jne => ConditionCode::Ne,
                    A::Jlt => ConditionCode::Lt,
                    A::Jgt => ConditionCode::Gt,
                    A::Jle => ConditionCode::Le,
                    _ => ConditionCode::Ge,
                };
                let cmp = self
                    .graph
                    .build(Opcode::Compare, DataType::Bool)
                    .inputs(&[acc, rhs])
                    .cc(cc)
                    .append_to(block);
                self.graph
                    .build(Opcode::IfImm, DataType::NoType)
                    .inputs(&[cmp])
                    .imm(0)
                    .cc(ConditionCode::Ne)
                    .append_to(block);
            }
            A::Jeqz | A::Jnez | A::Jltz | A::Jgtz | A::Jlez | A::Jgez => {
                let acc = self.acc(state)?;
                let zero = self.graph.find_or_create_constant(0);
                let cc = match line.opcode {
                    A::Jeqz => ConditionCode::Eq,
                    A::Jnez => ConditionCode::Ne,
                    A::Jltz => ConditionCode::Lt,
                    A::Jgtz => ConditionCode::Gt,
                    A::Jlez => ConditionCode::Le,
                    _ => ConditionCode::Ge,
                };
                let cmp = self
                    .graph
                    .build(Opcode::Compare, DataType::Bool)
                    .inputs(&[acc, zero])
                    .cc(cc)
                    .append_to(block);
                self.graph
                    .build(Opcode::IfImm, DataType::NoType)
                    .inputs(&[cmp])
                    .imm(0)
                    .cc(ConditionCode::Ne)
                    .append_to(block);
            }
            A::Return => {
                let acc = self.acc(state)?;
                let ty = DataType::from_asm_type(&self.func.return_type);
                self.graph.build(Opcode::Return, ty).inputs(&[acc]).append_to(block);
            }
            A::ReturnVoid => {
                self.graph.build(Opcode::ReturnVoid, DataType::NoType).append_to(block);
            }
            A::Throw => {
                let exception = self.reg(line, 0, state)?;
                let ss = self.make_save_state(block, state);
                self.graph
                    .build(Opcode::Throw, DataType::NoType)
                    .inputs(&[exception, ss])
                    .append_to(block);
            }
            A::Newarr => {
                let size = self.reg(line, 1, state)?;
                let ty_name = line
                    .ids
                    .first()
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let tid = self.graph.intern_type_name(ty_name);
                let ss = self.make_save_state(block, state);
                let cls = self
                    .graph
                    .build(Opcode::LoadAndInitClass, DataType::Reference)
                    .inputs(&[ss])
                    .type_id(tid)
                    .append_to(block);
                let arr = self
                    .graph
                    .build(Opcode::NewArray, DataType::Reference)
                    .inputs(&[cls, size, ss])
                    .type_id(tid)
                    .append_to(block);
                state.regs.insert(line.regs[0], arr);
            }
            A::Lenarr => {
                let array = self.reg(line, 0, state)?;
                let ss = self.make_save_state(block, state);
                let nc = self
                    .graph
                    .build(Opcode::NullCheck, DataType::Reference)
                    .inputs(&[array, ss])
                    .append_to(block);
                state.acc =
                    Some(self.graph.build(Opcode::LenArray, DataType::Int32).inputs(&[nc]).append_to(block));
            }
            A::Ldarr => {
                let array = self.reg(line, 0, state)?;
                let index = self.acc(state)?;
                let ss = self.make_save_state(block, state);
                let nc = self
                    .graph
                    .build(Opcode::NullCheck, DataType::Reference)
                    .inputs(&[array, ss])
                    .append_to(block);
                let len =
                    self.graph.build(Opcode::LenArray, DataType::Int32).inputs(&[nc]).append_to(block);
                let bc = self
                    .graph
                    .build(Opcode::BoundsCheck, DataType::Int32)
                    .inputs(&[len, index, ss])
                    .append_to(block);
                state.acc = Some(
                    self.graph
                        .build(Opcode::LoadArray, DataType::Int32)
                        .inputs(&[nc, bc])
                        .append_to(block),
                );
            }
            A::Starr => {
                let array = self.reg(line, 0, state)?;
                let index = self.reg(line, 1, state)?;
                let value = self.acc(state)?;
                let ss = self.make_save_state(block, state);
                let nc = self
                    .graph
                    .build(Opcode::NullCheck, DataType::Reference)
                    .inputs(&[array, ss])
                    .append_to(block);
                let len =
                    self.graph.build(Opcode::LenArray, DataType::Int32).inputs(&[nc]).append_to(block);
                let bc = self
                    .graph
                    .build(Opcode::BoundsCheck, DataType::Int32)
                    .inputs(&[len, index, ss])
                    .append_to(block);
                self.graph
                    .build(Opcode::StoreArray, DataType::NoType)
                    .inputs(&[nc, bc, value])
                    .append_to(block);
            }
            A::Newobj => {
                let ty_name = line
                    .ids
                    .first()
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let tid = self.graph.intern_type_name(ty_name);
                let ss = self.make_save_state(block, state);
                let cls = self
                    .graph
                    .build(Opcode::LoadAndInitClass, DataType::Reference)
                    .inputs(&[ss])
                    .type_id(tid)
                    .append_to(block);
                let obj = self
                    .graph
                    .build(Opcode::NewObject, DataType::Reference)
                    .inputs(&[cls, ss])
                    .type_id(tid)
                    .append_to(block);
                state.regs.insert(line.regs[0], obj);
            }
            A::Ldobj | A::Stobj => {
                let object = self.reg(line, 0, state)?;
                let field = line
                    .ids
                    .first()
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let fid = self.graph.intern_type_name(field);
                let ss = self.make_save_state(block, state);
                let nc = self
                    .graph
                    .build(Opcode::NullCheck, DataType::Reference)
                    .inputs(&[object, ss])
                    .append_to(block);
                if line.opcode == A::Ldobj {
                    state.acc = Some(
                        self.graph
                            .build(Opcode::LoadObject, DataType::Int32)
                            .inputs(&[nc])
                            .type_id(fid)
                            .append_to(block),
                    );
                } else {
                    let value = self.acc(state)?;
                    self.graph
                        .build(Opcode::StoreObject, DataType::NoType)
                        .inputs(&[nc, value])
                        .type_id(fid)
                        .append_to(block);
                }
            }
            A::Ldstatic | A::Ststatic => {
                let field = line
                    .ids
                    .first()
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let fid = self.graph.intern_type_name(field);
                let ss = self.make_save_state(block, state);
                let cls = self
                    .graph
                    .build(Opcode::LoadAndInitClass, DataType::Reference)
                    .inputs(&[ss])
                    .type_id(fid)
                    .append_to(block);
                if line.opcode == A::Ldstatic {
                    state.acc = Some(
                        self.graph
                            .build(Opcode::LoadStatic, DataType::Int32)
                            .inputs(&[cls])
                            .type_id(fid)
                            .append_to(block),
                    );
                } else {
                    let value = self.acc(state)?;
                    self.graph
                        .build(Opcode::StoreStatic, DataType::NoType)
                        .inputs(&[cls, value])
                        .type_id(fid)
                        .append_to(block);
                }
            }
            A::CallShort | A::Call | A::CallVirtShort | A::CallVirt => {
                let method = line
                    .ids
                    .first()
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let mid = self.graph.intern_method(method);
                let mut args = Vec::with_capacity(line.regs.len());
                for idx in 0..line.regs.len() {
                    args.push(self.reg(line, idx, state)?);
                }
                let ss = self.make_save_state(block, state);
                let virt =
                    matches!(line.opcode, A::CallVirtShort | A::CallVirt);
                if virt {
                    let receiver = *args
                        .first()
                        .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                    let nc = self
                        .graph
                        .build(Opcode::NullCheck, DataType::Reference)
                        .inputs(&[receiver, ss])
                        .append_to(block);
                    args[0] = nc;
                }
                let op = if virt { Opcode::CallVirtual } else { Opcode::CallStatic };
                args.push(ss);
                state.acc =
                    Some(self.graph.build(op, DataType::Any).inputs(&args).type_id(mid).append_to(block));
            }
            A::Checkcast => {
                let acc = self.acc(state)?;
                let ty_name = line
                    .ids
                    .first()
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let tid = self.graph.intern_type_name(ty_name);
                let ss = self.make_save_state(block, state);
                self.graph
                    .build(Opcode::CheckCast, DataType::NoType)
                    .inputs(&[acc, ss])
                    .type_id(tid)
                    .append_to(block);
            }
            A::Isinstance => {
                let acc = self.acc(state)?;
                let ty_name = line
                    .ids
                    .first()
                    .ok_or_else(|| BuildError::Unsupported(line.to_string()))?;
                let tid = self.graph.intern_type_name(ty_name);
                let ss = self.make_save_state(block, state);
                state.acc = Some(
                    self.graph
                        .build(Opcode::IsInstance, DataType::Bool)
                        .inputs(&[acc, ss])
                        .type_id(tid)
                        .append_to(block),
                );
            }
            A::MonitorEnter | A::MonitorExit => {
                let acc = self.acc(state)?;
                let ss = self.make_save_state(block, state);
                let entry = i64::from(line.opcode == A::MonitorEnter);
                self.graph
                    .build(Opcode::Monitor, DataType::NoType)
                    .inputs(&[acc, ss])
                    .imm(entry)
                    .append_to(block);
            }
        }
        Ok(())
    }
}

/// Key of a frame slot: a numbered register or the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VRegKey {
    Reg(u16),
    Acc,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphChecker;
    use kestrel_asm::{AsmOpcode as A, Parameter};
    use kestrel_types::Type;

    fn function(body: Vec<Ins>) -> Function {
        let mut f = Function::new("test");
        f.regs_num = 8;
        f.ins = body;
        f.body_presence = true;
        f
    }

    #[test]
    fn straight_line_arithmetic() {
        let f = function(vec![
            Ins::new(A::Ldai).imm(4i64),
            Ins::new(A::Sta).reg(0),
            Ins::new(A::Ldai).imm(3i64),
            Ins::new(A::Add2).reg(0),
            Ins::new(A::Return),
        ]);
        let g = build_graph(&f).unwrap();
        GraphChecker::new(&g).check().unwrap();
        let rpo = crate::analysis::compute_rpo(&g);
        // start, body, end.
        assert_eq!(rpo.len(), 3);
        let body = rpo[1];
        let has_add = g
            .block_insts(body)
            .iter()
            .any(|&i| g.inst(i).opcode() == Opcode::Add);
        assert!(has_add);
    }

    #[test]
    fn loop_gets_join_phis() {
        // v0 = 0; loop: v0 += 1; if v0 != v1 goto loop; return.void
        let mut f = function(vec![
            Ins::new(A::Movi).reg(0).imm(0i64),
            Ins::new(A::Lda).reg(0).with_label("loop"),
            Ins::new(A::Addi).imm(1i64),
            Ins::new(A::Sta).reg(0),
            Ins::new(A::Jne).reg(8).id("loop"),
            Ins::new(A::ReturnVoid),
        ]);
        f.params.push(Parameter::new(Type::from_name("i32")));
        let g = build_graph(&f).unwrap();
        GraphChecker::new(&g).check().unwrap();
        let has_phi = g.block_ids().iter().any(|&b| !g.block(b).phis().is_empty());
        assert!(has_phi);
    }

    #[test]
    fn array_store_gets_checks() {
        let f = function(vec![
            Ins::new(A::Movi).reg(1).imm(10i64),
            Ins::new(A::Newarr).reg(0).reg(1).id("i32[]"),
            Ins::new(A::Ldai).imm(7i64),
            Ins::new(A::Starr).reg(0).reg(1),
            Ins::new(A::ReturnVoid),
        ]);
        let g = build_graph(&f).unwrap();
        GraphChecker::new(&g).check().unwrap();
        let all: Vec<Opcode> = g
            .block_ids()
            .iter()
            .flat_map(|&b| g.block_insts(b))
            .map(|i| g.inst(i).opcode())
            .collect();
        assert!(all.contains(&Opcode::NullCheck));
        assert!(all.contains(&Opcode::BoundsCheck));
        assert!(all.contains(&Opcode::NewArray));
    }

    #[test]
    fn undefined_register_is_reported() {
        let f = function(vec![Ins::new(A::Lda).reg(5), Ins::new(A::Return)]);
        assert!(matches!(build_graph(&f), Err(BuildError::MaybeUndefined(5))));
    }

    #[test]
    fn unknown_label_is_reported() {
        let f = function(vec![Ins::new(A::Jmp).id("nowhere"), Ins::new(A::ReturnVoid)]);
        assert!(matches!(build_graph(&f), Err(BuildError::UndefinedLabel(_))));
    }
}
