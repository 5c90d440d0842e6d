use std::collections::HashMap;

use smallvec::SmallVec;

use super::basic_block::{BasicBlock, BlockFlags, BlockId};
use super::datatype::DataType;
use super::inst::{
    ConditionCode, DeoptReason, Imm, Inst, InstFlags, InstId, IntrinsicId, SaveStateEntry, VReg,
};
use super::opcode::Opcode;

/// Execution mode of a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphMode {
    /// Dynamic-language function.
    pub dynamic: bool,
    /// On-stack-replacement compilation: loop headers are OSR entries.
    pub osr: bool,
}

/// Per-function control-flow graph over arena-allocated instructions.
///
/// Blocks and instructions are addressed by dense ids. All def-use
/// mutations go through the graph so input and user lists stay in sync;
/// removing or replacing an instruction updates both sides.
#[derive(Debug, Clone)]
pub struct Graph {
    insts: Vec<Inst>,
    blocks: Vec<BasicBlock>,
    removed_blocks: Vec<bool>,
    start: BlockId,
    end: BlockId,
    mode: GraphMode,
    int_constants: HashMap<i64, InstId>,
    float_constants: HashMap<u64, InstId>,
    null_ptr: Option<InstId>,
    type_names: Vec<String>,
    strings: Vec<String>,
    methods: Vec<String>,
}

impl Graph {
    /// Creates a graph with fresh start and end blocks.
    pub fn new(mode: GraphMode) -> Self {
        let mut graph = Self {
            insts: Vec::new(),
            blocks: Vec::new(),
            removed_blocks: Vec::new(),
            start: BlockId(0),
            end: BlockId(0),
            mode,
            int_constants: HashMap::new(),
            float_constants: HashMap::new(),
            null_ptr: None,
            type_names: Vec::new(),
            strings: Vec::new(),
            methods: Vec::new(),
        };
        graph.start = graph.create_block();
        graph.end = graph.create_block();
        graph
    }

    /// Execution mode.
    pub fn mode(&self) -> GraphMode {
        self.mode
    }

    /// Whether the graph is compiled for on-stack replacement.
    pub fn is_osr(&self) -> bool {
        self.mode.osr
    }

    /// The synthetic entry block holding parameters and constants.
    pub fn start_block(&self) -> BlockId {
        self.start
    }

    /// The synthetic exit block.
    pub fn end_block(&self) -> BlockId {
        self.end
    }

    // ---------------------------------------------------------------
    // Blocks.

    /// Allocates an empty block.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::default());
        self.removed_blocks.push(false);
        id
    }

    /// Read access to a block.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Number of allocated block slots, removed blocks included.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Ids of all live blocks.
    pub fn block_ids(&self) -> Vec<BlockId> {
        (0..self.blocks.len() as u32)
            .map(BlockId)
            .filter(|b| !self.removed_blocks[b.index()])
            .collect()
    }

    /// Whether the block slot has been removed.
    pub fn is_block_removed(&self, id: BlockId) -> bool {
        self.removed_blocks[id.index()]
    }

    /// Adds a CFG edge, appending to both edge lists.
    pub fn connect(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).succs.push(to);
        self.block_mut(to).preds.push(from);
    }

    /// Removes the `from → to` edge and the corresponding phi inputs of
    /// `to`.
    pub fn disconnect(&mut self, from: BlockId, to: BlockId) {
        if let Some(pos) = self.block(from).succs.iter().position(|&s| s == to) {
            self.block_mut(from).succs.remove(pos);
        }
        if let Some(pos) = self.block(to).preds.iter().position(|&p| p == from) {
            self.block_mut(to).preds.remove(pos);
            for phi in self.block(to).phis.to_vec() {
                self.remove_input(phi, pos);
            }
        }
    }

    /// Replaces `from → mid` and `mid → to` with a direct `from → to`
    /// edge, preserving positions on both sides so conditional polarity
    /// and phi arity stay intact. `mid` is left edge-less.
    pub fn rewire_edge(&mut self, from: BlockId, mid: BlockId, to: BlockId) {
        let spos = self
            .block(from)
            .succs
            .iter()
            .position(|&s| s == mid)
            .expect("from must branch to mid");
        self.block_mut(from).succs[spos] = to;
        let ppos = self
            .block(to)
            .preds
            .iter()
            .position(|&p| p == mid)
            .expect("to must be entered from mid");
        self.block_mut(to).preds[ppos] = from;
        self.block_mut(mid).succs.clear();
        self.block_mut(mid).preds.clear();
    }

    /// Clears a user list ahead of a bulk sweep of mutually-referencing
    /// dead instructions.
    #[doc(hidden)]
    pub fn clear_users_for_sweep(&mut self, id: InstId) {
        self.inst_mut(id).users.clear();
    }

    /// Marks a block as removed; it must hold no instructions and no
    /// edges.
    pub fn remove_block(&mut self, id: BlockId) {
        debug_assert!(self.block(id).is_empty());
        debug_assert!(self.block(id).preds.is_empty() && self.block(id).succs.is_empty());
        self.removed_blocks[id.index()] = true;
    }

    /// Sets flags on a block.
    pub fn add_block_flags(&mut self, id: BlockId, flags: BlockFlags) {
        self.block_mut(id).flags |= flags;
    }

    /// Clears flags on a block.
    pub fn clear_block_flags(&mut self, id: BlockId, flags: BlockFlags) {
        self.block_mut(id).flags &= !flags;
    }

    /// The unique successor of an unconditional block.
    pub fn sole_succ(&self, id: BlockId) -> Option<BlockId> {
        match self.block(id).succs[..] {
            [s] => Some(s),
            _ => None,
        }
    }

    // ---------------------------------------------------------------
    // Instruction creation.

    pub(crate) fn alloc_inst(&mut self, op: Opcode, ty: DataType) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Inst::new(op, ty));
        id
    }

    /// Starts building an instruction; finish with
    /// [`InstBuilder::append_to`] or a sibling placement method.
    pub fn build(&mut self, op: Opcode, ty: DataType) -> InstBuilder<'_> {
        let id = self.alloc_inst(op, ty);
        InstBuilder { graph: self, id }
    }

    /// Read access to an instruction.
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub(crate) fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    /// Number of allocated instruction slots.
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    /// Number of live (attached, non-nop) instructions.
    pub fn live_inst_count(&self) -> usize {
        self.insts
            .iter()
            .filter(|i| i.block.is_some() && i.op != Opcode::Nop)
            .count()
    }

    // ---------------------------------------------------------------
    // Inputs and users.

    /// Replaces the whole input list.
    pub fn set_inputs(&mut self, id: InstId, inputs: &[InstId]) {
        for idx in 0..self.inst(id).inputs.len() {
            let old = self.inst(id).inputs[idx];
            remove_one_user(&mut self.insts[old.index()].users, id);
        }
        self.inst_mut(id).inputs = SmallVec::from_slice(inputs);
        for &input in inputs {
            self.insts[input.index()].users.push(id);
        }
    }

    /// Rewrites one input edge.
    pub fn set_input(&mut self, id: InstId, idx: usize, new: InstId) {
        let old = self.inst(id).inputs[idx];
        if old == new {
            return;
        }
        remove_one_user(&mut self.insts[old.index()].users, id);
        self.inst_mut(id).inputs[idx] = new;
        self.insts[new.index()].users.push(id);
    }

    /// Appends one input edge.
    pub fn add_input(&mut self, id: InstId, input: InstId) {
        self.inst_mut(id).inputs.push(input);
        self.insts[input.index()].users.push(id);
    }

    /// Removes the input at `idx`; for save states the vreg entry at the
    /// same position goes with it.
    pub fn remove_input(&mut self, id: InstId, idx: usize) {
        let old = self.inst(id).inputs[idx];
        remove_one_user(&mut self.insts[old.index()].users, id);
        self.inst_mut(id).inputs.remove(idx);
        if self.inst(id).is_save_state() && idx < self.inst(id).vregs.len() {
            self.inst_mut(id).vregs.remove(idx);
        }
    }

    /// Clears all inputs (and save-state entries).
    pub fn drop_inputs(&mut self, id: InstId) {
        while !self.inst(id).inputs.is_empty() {
            self.remove_input(id, 0);
        }
    }

    /// Appends a `(value, vreg)` pair to a save state.
    pub fn add_save_state_input(&mut self, ss: InstId, value: InstId, vreg: VReg) {
        debug_assert!(self.inst(ss).is_save_state());
        self.inst_mut(ss).vregs.push(SaveStateEntry { vreg });
        self.add_input(ss, value);
    }

    /// Removes every `(value, _)` pair of a save state.
    pub fn remove_save_state_value(&mut self, ss: InstId, value: InstId) {
        while let Some(pos) = self.inst(ss).inputs.iter().position(|&i| i == value) {
            self.remove_input(ss, pos);
        }
    }

    /// Whether a save state already lists `value`.
    pub fn save_state_contains(&self, ss: InstId, value: InstId) -> bool {
        self.inst(ss).inputs.contains(&value)
    }

    /// Re-points every user of `old` to `new`, keeping save-state vreg
    /// bindings intact.
    pub fn replace_users(&mut self, old: InstId, new: InstId) {
        if old == new {
            return;
        }
        let users = std::mem::take(&mut self.inst_mut(old).users);
        for user in &users {
            for idx in 0..self.inst(*user).inputs.len() {
                if self.inst(*user).inputs[idx] == old {
                    self.inst_mut(*user).inputs[idx] = new;
                }
            }
        }
        self.inst_mut(new).users.extend(users);
    }

    // ---------------------------------------------------------------
    // Placement.

    /// Appends `id` at the end of `block`.
    pub fn append_inst(&mut self, id: InstId, block: BlockId) {
        debug_assert!(self.inst(id).block.is_none());
        let last = self.block(block).last;
        self.inst_mut(id).block = Some(block);
        self.inst_mut(id).prev = last;
        self.inst_mut(id).next = None;
        match last {
            Some(last) => self.inst_mut(last).next = Some(id),
            None => self.block_mut(block).first = Some(id),
        }
        self.block_mut(block).last = Some(id);
    }

    /// Inserts `id` as the first instruction of `block`.
    pub fn prepend_inst(&mut self, id: InstId, block: BlockId) {
        debug_assert!(self.inst(id).block.is_none());
        let first = self.block(block).first;
        self.inst_mut(id).block = Some(block);
        self.inst_mut(id).next = first;
        self.inst_mut(id).prev = None;
        match first {
            Some(first) => self.inst_mut(first).prev = Some(id),
            None => self.block_mut(block).last = Some(id),
        }
        self.block_mut(block).first = Some(id);
    }

    /// Inserts `id` immediately before `anchor`.
    pub fn insert_before(&mut self, id: InstId, anchor: InstId) {
        let block = self.inst(anchor).block.expect("anchor must be attached");
        let prev = self.inst(anchor).prev;
        self.inst_mut(id).block = Some(block);
        self.inst_mut(id).prev = prev;
        self.inst_mut(id).next = Some(anchor);
        self.inst_mut(anchor).prev = Some(id);
        match prev {
            Some(prev) => self.inst_mut(prev).next = Some(id),
            None => self.block_mut(block).first = Some(id),
        }
    }

    /// Inserts `id` immediately after `anchor`.
    pub fn insert_after(&mut self, id: InstId, anchor: InstId) {
        let block = self.inst(anchor).block.expect("anchor must be attached");
        let next = self.inst(anchor).next;
        self.inst_mut(id).block = Some(block);
        self.inst_mut(id).prev = Some(anchor);
        self.inst_mut(id).next = next;
        self.inst_mut(anchor).next = Some(id);
        match next {
            Some(next) => self.inst_mut(next).prev = Some(id),
            None => self.block_mut(block).last = Some(id),
        }
    }

    /// Registers a phi in its block's phi list.
    pub fn add_phi(&mut self, id: InstId, block: BlockId) {
        debug_assert_eq!(self.inst(id).op, Opcode::Phi);
        self.inst_mut(id).block = Some(block);
        self.block_mut(block).phis.push(id);
    }

    /// Unlinks an instruction from its block, keeping inputs and users.
    pub fn detach_inst(&mut self, id: InstId) {
        let Some(block) = self.inst(id).block else { return };
        if self.inst(id).is_phi() {
            let phis = &mut self.block_mut(block).phis;
            if let Some(pos) = phis.iter().position(|&p| p == id) {
                phis.remove(pos);
            }
        } else {
            let (prev, next) = (self.inst(id).prev, self.inst(id).next);
            match prev {
                Some(prev) => self.inst_mut(prev).next = next,
                None => self.block_mut(block).first = next,
            }
            match next {
                Some(next) => self.inst_mut(next).prev = prev,
                None => self.block_mut(block).last = prev,
            }
        }
        let inst = self.inst_mut(id);
        inst.block = None;
        inst.prev = None;
        inst.next = None;
    }

    /// Detaches an instruction and drops its input edges. The users list
    /// must already be empty.
    pub fn remove_inst(&mut self, id: InstId) {
        debug_assert!(self.inst(id).users.is_empty(), "removing {id} with users");
        self.detach_inst(id);
        self.drop_inputs(id);
    }

    /// Turns an instruction into `Nop` in place: inputs dropped, id and
    /// position preserved for later cleanup.
    pub fn make_nop(&mut self, id: InstId) {
        self.drop_inputs(id);
        let inst = self.inst_mut(id);
        inst.op = Opcode::Nop;
        inst.ty = DataType::NoType;
        inst.flags = Opcode::Nop.flags();
        inst.imm = None;
        inst.cc = None;
        inst.type_id = None;
        inst.intrinsic = None;
        inst.deopt = None;
        inst.vregs.clear();
    }

    /// Moves an attached instruction to the end of another block.
    pub fn move_inst_to_block_end(&mut self, id: InstId, block: BlockId) {
        self.detach_inst(id);
        self.append_inst(id, block);
    }

    /// Instruction ids of a block in list order (phis excluded).
    pub fn block_insts(&self, block: BlockId) -> Vec<InstId> {
        let mut out = Vec::new();
        let mut cur = self.block(block).first;
        while let Some(id) = cur {
            out.push(id);
            cur = self.inst(id).next;
        }
        out
    }

    /// Phis followed by instructions of a block.
    pub fn block_insts_with_phis(&self, block: BlockId) -> Vec<InstId> {
        let mut out = self.block(block).phis.to_vec();
        out.extend(self.block_insts(block));
        out
    }

    /// Position of an instruction within its block, phis first.
    pub fn inst_position(&self, id: InstId) -> usize {
        let block = self.inst(id).block.expect("inst must be attached");
        self.block_insts_with_phis(block)
            .iter()
            .position(|&i| i == id)
            .expect("inst must be linked in its block")
    }

    // ---------------------------------------------------------------
    // Constants and interned payloads.

    /// Interned integer constant, allocated in the start block on first
    /// use.
    pub fn find_or_create_constant(&mut self, value: i64) -> InstId {
        if let Some(&id) = self.int_constants.get(&value) {
            return id;
        }
        let id = self.alloc_inst(Opcode::Constant, DataType::Int64);
        self.inst_mut(id).imm = Some(Imm::Int(value));
        let start = self.start;
        self.append_inst(id, start);
        self.int_constants.insert(value, id);
        id
    }

    /// Interned floating constant.
    pub fn find_or_create_float_constant(&mut self, value: f64) -> InstId {
        if let Some(&id) = self.float_constants.get(&value.to_bits()) {
            return id;
        }
        let id = self.alloc_inst(Opcode::Constant, DataType::Float64);
        self.inst_mut(id).imm = Some(Imm::Float(value));
        let start = self.start;
        self.append_inst(id, start);
        self.float_constants.insert(value.to_bits(), id);
        id
    }

    /// The unique `NullPtr` instruction.
    pub fn find_or_create_null_ptr(&mut self) -> InstId {
        if let Some(id) = self.null_ptr {
            return id;
        }
        let id = self.alloc_inst(Opcode::NullPtr, DataType::Reference);
        let start = self.start;
        self.append_inst(id, start);
        self.null_ptr = Some(id);
        id
    }

    /// Interns a type name, returning its id.
    pub fn intern_type_name(&mut self, name: &str) -> u32 {
        intern(&mut self.type_names, name)
    }

    /// Type name behind a type id.
    pub fn type_name(&self, id: u32) -> &str {
        &self.type_names[id as usize]
    }

    /// Interns a string-table entry.
    pub fn intern_string(&mut self, value: &str) -> u32 {
        intern(&mut self.strings, value)
    }

    /// String behind a string id.
    pub fn string(&self, id: u32) -> &str {
        &self.strings[id as usize]
    }

    /// Interns a method name.
    pub fn intern_method(&mut self, name: &str) -> u32 {
        intern(&mut self.methods, name)
    }

    /// Method name behind a method id.
    pub fn method_name(&self, id: u32) -> &str {
        &self.methods[id as usize]
    }

    /// Adds behaviour flags to one instruction.
    pub fn add_inst_flags(&mut self, id: InstId, flags: InstFlags) {
        self.inst_mut(id).flags |= flags;
    }

    /// Adjusts a result type after construction; used when a phi's type
    /// only becomes known once its inputs are resolved.
    pub(crate) fn set_result_type(&mut self, id: InstId, ty: DataType) {
        self.inst_mut(id).ty = ty;
    }

    /// Drops `id` from every save state that lists it. Remaining users, if
    /// any, are real value consumers.
    pub fn purge_from_save_states(&mut self, id: InstId) {
        for user in self.inst(id).users().to_vec() {
            if self.inst(user).is_save_state() {
                self.remove_save_state_value(user, id);
            }
        }
    }

    /// Marks a `CheckCast`/`IsInstance` as not needing its own null
    /// check.
    pub fn set_omit_null_check(&mut self, id: InstId, omit: bool) {
        self.inst_mut(id).omit_null_check = omit;
    }

    /// Sets the branch hint of an `IfImm`.
    pub fn set_likely(&mut self, id: InstId, likely: bool) {
        self.inst_mut(id).likely = Some(likely);
    }

    /// Bulk payload setter used by the test DSL.
    #[doc(hidden)]
    pub fn set_payload_for_test(
        &mut self,
        id: InstId,
        imm: Option<Imm>,
        cc: Option<ConditionCode>,
        type_id: Option<u32>,
        intrinsic: Option<IntrinsicId>,
        deopt: Option<DeoptReason>,
    ) {
        let inst = self.inst_mut(id);
        inst.imm = imm.or(inst.imm);
        inst.cc = cc.or(inst.cc);
        inst.type_id = type_id.or(inst.type_id);
        inst.intrinsic = intrinsic.or(inst.intrinsic);
        inst.deopt = deopt.or(inst.deopt);
    }

    /// Bulk save-state entry setter used by the test DSL.
    #[doc(hidden)]
    pub fn set_save_state_entries_for_test(
        &mut self,
        id: InstId,
        entries: Option<Vec<SaveStateEntry>>,
    ) {
        if let Some(entries) = entries {
            self.inst_mut(id).vregs = entries.into();
        }
    }

    /// Registers an externally built `Constant`/`NullPtr` in the interning
    /// maps so passes reuse it instead of materialising a twin.
    #[doc(hidden)]
    pub fn index_constant_for_test(&mut self, id: InstId) {
        match (self.inst(id).op, self.inst(id).imm) {
            (Opcode::Constant, Some(Imm::Int(v))) => {
                self.int_constants.entry(v).or_insert(id);
            }
            (Opcode::Constant, Some(Imm::Float(v))) => {
                self.float_constants.entry(v.to_bits()).or_insert(id);
            }
            (Opcode::NullPtr, _) => {
                self.null_ptr.get_or_insert(id);
            }
            _ => {}
        }
    }

    // ---------------------------------------------------------------
    // Structured rewrites shared by passes.

    /// Clones a save state, entries included, inserting the copy before
    /// `anchor`.
    pub fn clone_save_state_before(&mut self, ss: InstId, anchor: InstId) -> InstId {
        let op = self.inst(ss).op;
        let inputs: Vec<InstId> = self.inst(ss).inputs.to_vec();
        let vregs = self.inst(ss).vregs.clone();
        let copy = self.alloc_inst(op, DataType::NoType);
        self.set_inputs(copy, &inputs);
        self.inst_mut(copy).vregs = vregs;
        self.insert_before(copy, anchor);
        copy
    }

    /// Removes every instruction after `from` in its block, drops the
    /// block's outgoing edges and routes it into the end block. Used when
    /// a check is proven to always fail.
    pub fn truncate_block_after(&mut self, from: InstId) {
        let block = self.inst(from).block.expect("inst must be attached");
        for succ in self.block(block).succs.to_vec() {
            self.disconnect(block, succ);
        }
        let mut tail = Vec::new();
        let mut cur = self.inst(from).next;
        while let Some(id) = cur {
            tail.push(id);
            cur = self.inst(id).next;
        }
        // Reverse order so intra-tail uses are gone before their defs.
        // Users that survive at this point sit in blocks made unreachable
        // by the disconnect above; the next cleanup sweeps them.
        for &id in tail.iter().rev() {
            self.inst_mut(id).users.clear();
            self.remove_inst(id);
        }
        let end = self.end;
        self.connect(block, end);
    }
}

fn remove_one_user(users: &mut Vec<InstId>, user: InstId) {
    if let Some(pos) = users.iter().position(|&u| u == user) {
        users.swap_remove(pos);
    }
}

fn intern(table: &mut Vec<String>, value: &str) -> u32 {
    if let Some(pos) = table.iter().position(|v| v == value) {
        return pos as u32;
    }
    table.push(value.to_string());
    (table.len() - 1) as u32
}

/// Fluent construction of one instruction.
pub struct InstBuilder<'g> {
    graph: &'g mut Graph,
    id: InstId,
}

impl<'g> InstBuilder<'g> {
    /// Sets the input list.
    pub fn inputs(self, inputs: &[InstId]) -> Self {
        let id = self.id;
        self.graph.set_inputs(id, inputs);
        self
    }

    /// Sets the immediate payload.
    pub fn imm(self, imm: impl Into<Imm>) -> Self {
        self.graph.inst_mut(self.id).imm = Some(imm.into());
        self
    }

    /// Sets the condition code.
    pub fn cc(self, cc: ConditionCode) -> Self {
        self.graph.inst_mut(self.id).cc = Some(cc);
        self
    }

    /// Sets the type-id payload.
    pub fn type_id(self, type_id: u32) -> Self {
        self.graph.inst_mut(self.id).type_id = Some(type_id);
        self
    }

    /// Sets the intrinsic payload.
    pub fn intrinsic(self, id: IntrinsicId) -> Self {
        self.graph.inst_mut(self.id).intrinsic = Some(id);
        self
    }

    /// Sets the deoptimization reason.
    pub fn deopt(self, reason: DeoptReason) -> Self {
        self.graph.inst_mut(self.id).deopt = Some(reason);
        self
    }

    /// Sets the branch hint.
    pub fn likely(self, likely: bool) -> Self {
        self.graph.inst_mut(self.id).likely = Some(likely);
        self
    }

    /// Adds extra behaviour flags.
    pub fn flags(self, flags: InstFlags) -> Self {
        self.graph.inst_mut(self.id).flags |= flags;
        self
    }

    /// Sets save-state entries; the input list must match in length.
    pub fn save_state_entries(self, vregs: &[VReg]) -> Self {
        self.graph.inst_mut(self.id).vregs =
            vregs.iter().map(|&vreg| SaveStateEntry { vreg }).collect();
        self
    }

    /// Appends to a block and returns the id.
    pub fn append_to(self, block: BlockId) -> InstId {
        let id = self.id;
        self.graph.append_inst(id, block);
        id
    }

    /// Inserts before an attached instruction and returns the id.
    pub fn before(self, anchor: InstId) -> InstId {
        let id = self.id;
        self.graph.insert_before(id, anchor);
        id
    }

    /// Inserts after an attached instruction and returns the id.
    pub fn after(self, anchor: InstId) -> InstId {
        let id = self.id;
        self.graph.insert_after(id, anchor);
        id
    }

    /// Registers as a phi of `block` and returns the id.
    pub fn as_phi_of(self, block: BlockId) -> InstId {
        let id = self.id;
        self.graph.add_phi(id, block);
        id
    }

    /// Leaves the instruction detached and returns the id.
    pub fn detached(self) -> InstId {
        self.id
    }
}
