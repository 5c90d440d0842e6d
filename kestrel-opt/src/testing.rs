//! Graph construction DSL and structural comparator for tests.
//!
//! Tests build a graph by declaring numbered instructions inside numbered
//! blocks, run a pass, then compare against a second graph built the same
//! way. Instruction and block numbers are arbitrary user labels; inputs
//! may reference numbers declared later (loop phis), so the graph is
//! materialised in [`TestGraph::finish`].

use std::collections::HashMap;

use crate::ir::{
    BlockFlags, BlockId, ConditionCode, DataType, DeoptReason, Graph, GraphMode, Imm, InstId,
    IntrinsicId, Opcode, SaveStateEntry, VReg,
};

/// Successor label for the end block.
pub const END: i64 = -1;

#[derive(Debug, Clone)]
struct ProtoInst {
    user_id: u32,
    op: Opcode,
    ty: DataType,
    block: i64,
    inputs: Vec<u32>,
    vregs: Option<Vec<VReg>>,
    imm: Option<Imm>,
    cc: Option<ConditionCode>,
    type_id: Option<u32>,
    intrinsic: Option<IntrinsicId>,
    deopt: Option<DeoptReason>,
}

/// Builder for one declared instruction; configuration methods mirror the
/// instruction payload fields.
pub struct TestInst<'t> {
    tg: &'t mut TestGraph,
    idx: usize,
}

impl TestInst<'_> {
    /// Input list by user ids.
    pub fn inputs(self, inputs: &[u32]) -> Self {
        self.tg.protos[self.idx].inputs = inputs.to_vec();
        self
    }

    /// Save-state entries; one vreg per input.
    pub fn vregs(self, vregs: &[u16]) -> Self {
        self.tg.protos[self.idx].vregs =
            Some(vregs.iter().map(|&n| VReg::Number(n)).collect());
        self
    }

    /// Save-state entries with explicit markers.
    pub fn raw_vregs(self, vregs: &[VReg]) -> Self {
        self.tg.protos[self.idx].vregs = Some(vregs.to_vec());
        self
    }

    /// Integer immediate.
    pub fn imm(self, v: i64) -> Self {
        self.tg.protos[self.idx].imm = Some(Imm::Int(v));
        self
    }

    /// Floating immediate.
    pub fn fimm(self, v: f64) -> Self {
        self.tg.protos[self.idx].imm = Some(Imm::Float(v));
        self
    }

    /// Condition code.
    pub fn cc(self, cc: ConditionCode) -> Self {
        self.tg.protos[self.idx].cc = Some(cc);
        self
    }

    /// Type-id payload.
    pub fn type_id(self, id: u32) -> Self {
        self.tg.protos[self.idx].type_id = Some(id);
        self
    }

    /// Intrinsic payload.
    pub fn intrinsic(self, id: IntrinsicId) -> Self {
        self.tg.protos[self.idx].intrinsic = Some(id);
        self
    }

    /// Deoptimization reason payload.
    pub fn deopt(self, reason: DeoptReason) -> Self {
        self.tg.protos[self.idx].deopt = Some(reason);
        self
    }
}

/// The graph-under-construction.
pub struct TestGraph {
    mode: GraphMode,
    protos: Vec<ProtoInst>,
    blocks: Vec<(i64, Vec<i64>, BlockFlags)>,
    current: i64,
    type_names: Vec<String>,
    strings: Vec<String>,
}

const START: i64 = -2;

impl TestGraph {
    /// Starts a static-mode graph.
    pub fn new() -> Self {
        Self {
            mode: GraphMode::default(),
            protos: Vec::new(),
            blocks: Vec::new(),
            current: START,
            type_names: Vec::new(),
            strings: Vec::new(),
        }
    }

    /// Pre-interns type names; ids follow declaration order.
    pub fn types(&mut self, names: &[&str]) -> &mut Self {
        self.type_names.extend(names.iter().map(|s| s.to_string()));
        self
    }

    /// Pre-interns string-table entries; ids follow declaration order.
    pub fn string_table(&mut self, values: &[&str]) -> &mut Self {
        self.strings.extend(values.iter().map(|s| s.to_string()));
        self
    }

    /// Starts an OSR-mode graph.
    pub fn new_osr() -> Self {
        let mut tg = Self::new();
        tg.mode.osr = true;
        tg
    }

    /// Declares a parameter in the start block.
    pub fn parameter(&mut self, id: u32, ty: DataType) -> &mut Self {
        self.protos.push(ProtoInst {
            user_id: id,
            op: Opcode::Parameter,
            ty,
            block: START,
            inputs: Vec::new(),
            vregs: None,
            imm: None,
            cc: None,
            type_id: None,
            intrinsic: None,
            deopt: None,
        });
        self
    }

    /// Declares an integer constant in the start block.
    pub fn constant(&mut self, id: u32, v: i64) -> &mut Self {
        self.protos.push(ProtoInst {
            user_id: id,
            op: Opcode::Constant,
            ty: DataType::Int64,
            block: START,
            inputs: Vec::new(),
            vregs: None,
            imm: Some(Imm::Int(v)),
            cc: None,
            type_id: None,
            intrinsic: None,
            deopt: None,
        });
        self
    }

    /// Declares the `NullPtr` singleton in the start block.
    pub fn null_ptr(&mut self, id: u32) -> &mut Self {
        self.protos.push(ProtoInst {
            user_id: id,
            op: Opcode::NullPtr,
            ty: DataType::Reference,
            block: START,
            inputs: Vec::new(),
            vregs: None,
            imm: None,
            cc: None,
            type_id: None,
            intrinsic: None,
            deopt: None,
        });
        self
    }

    /// Opens a block with the given successor labels; following
    /// [`TestGraph::inst`] calls land here. For conditionals the first
    /// successor is the true edge; [`END`] names the end block.
    pub fn bb(&mut self, id: i64, succs: &[i64]) -> &mut Self {
        self.blocks.push((id, succs.to_vec(), BlockFlags::empty()));
        self.current = id;
        self
    }

    /// Opens a block with extra flags (try / catch / OSR entry).
    pub fn bb_flagged(&mut self, id: i64, succs: &[i64], flags: BlockFlags) -> &mut Self {
        self.blocks.push((id, succs.to_vec(), flags));
        self.current = id;
        self
    }

    /// Declares an instruction in the current block.
    pub fn inst(&mut self, id: u32, op: Opcode, ty: DataType) -> TestInst<'_> {
        assert!(self.current != START, "open a block before declaring instructions");
        self.protos.push(ProtoInst {
            user_id: id,
            op,
            ty,
            block: self.current,
            inputs: Vec::new(),
            vregs: None,
            imm: None,
            cc: None,
            type_id: None,
            intrinsic: None,
            deopt: None,
        });
        let idx = self.protos.len() - 1;
        TestInst { tg: self, idx }
    }

    /// Materialises the graph: allocates blocks and instructions, resolves
    /// input references and connects edges. The start block falls through
    /// into the first declared block.
    pub fn finish(&self) -> Graph {
        let mut graph = Graph::new(self.mode);
        for name in &self.type_names {
            graph.intern_type_name(name);
        }
        for value in &self.strings {
            graph.intern_string(value);
        }
        let mut block_map: HashMap<i64, BlockId> = HashMap::new();
        block_map.insert(END, graph.end_block());
        block_map.insert(START, graph.start_block());
        for (id, _, flags) in &self.blocks {
            let b = graph.create_block();
            graph.add_block_flags(b, *flags);
            block_map.insert(*id, b);
        }
        if let Some((first, _, _)) = self.blocks.first() {
            let first = block_map[first];
            graph.connect(graph.start_block(), first);
        }
        for (id, succs, _) in &self.blocks {
            for s in succs {
                graph.connect(block_map[id], block_map[s]);
            }
        }
        // First allocate every instruction so forward references resolve.
        let mut inst_map: HashMap<u32, InstId> = HashMap::new();
        let mut allocated = Vec::with_capacity(self.protos.len());
        for proto in &self.protos {
            let id = graph.build(proto.op, proto.ty).detached();
            assert!(
                inst_map.insert(proto.user_id, id).is_none(),
                "instruction {} declared twice",
                proto.user_id
            );
            allocated.push(id);
        }
        for (proto, &id) in self.protos.iter().zip(&allocated) {
            let inputs: Vec<InstId> = proto.inputs.iter().map(|u| inst_map[u]).collect();
            graph.set_inputs(id, &inputs);
            if let Some(vregs) = &proto.vregs {
                assert_eq!(vregs.len(), inputs.len(), "one vreg per save-state input");
            }
            let vreg_entries: Option<Vec<SaveStateEntry>> = proto
                .vregs
                .as_ref()
                .map(|v| v.iter().map(|&vreg| SaveStateEntry { vreg }).collect());
            graph.set_save_state_entries_for_test(id, vreg_entries);
            graph.set_payload_for_test(
                id,
                proto.imm,
                proto.cc,
                proto.type_id,
                proto.intrinsic,
                proto.deopt,
            );
            let block = block_map[&proto.block];
            if proto.op == Opcode::Phi {
                graph.add_phi(id, block);
            } else {
                graph.append_inst(id, block);
            }
            graph.index_constant_for_test(id);
        }
        graph
    }
}

impl Default for TestGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural graph comparison under block/instruction renaming.
///
/// Blocks are paired by traversal order from start, instructions by list
/// position; payloads and (mapped) inputs must match. Returns a
/// human-readable mismatch for test output.
pub fn compare_graphs(actual: &Graph, expected: &Graph) -> Result<(), String> {
    let rpo_a = crate::analysis::compute_rpo(actual);
    let rpo_e = crate::analysis::compute_rpo(expected);
    if rpo_a.len() != rpo_e.len() {
        return Err(format!(
            "block count differs: {} vs {}",
            rpo_a.len(),
            rpo_e.len()
        ));
    }
    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for (&a, &e) in rpo_a.iter().zip(&rpo_e) {
        block_map.insert(a, e);
    }
    // Pair instructions by position.
    let mut inst_map: HashMap<InstId, InstId> = HashMap::new();
    for (&a, &e) in rpo_a.iter().zip(&rpo_e) {
        let insts_a = actual.block_insts_with_phis(a);
        let insts_e = expected.block_insts_with_phis(e);
        if insts_a.len() != insts_e.len() {
            return Err(format!(
                "instruction count differs in {a}: {} vs {}",
                insts_a.len(),
                insts_e.len()
            ));
        }
        for (&ia, &ie) in insts_a.iter().zip(&insts_e) {
            inst_map.insert(ia, ie);
        }
    }
    for (&a, &e) in rpo_a.iter().zip(&rpo_e) {
        let succs_a = actual.block(a).succs();
        let succs_e = expected.block(e).succs();
        if succs_a.len() != succs_e.len()
            || succs_a.iter().zip(succs_e).any(|(&sa, &se)| block_map[&sa] != se)
        {
            return Err(format!("successors of {a} differ"));
        }
        for (&ia, &ie) in actual
            .block_insts_with_phis(a)
            .iter()
            .zip(&expected.block_insts_with_phis(e))
        {
            compare_insts(actual, expected, &inst_map, ia, ie)?;
        }
    }
    Ok(())
}

fn compare_insts(
    actual: &Graph,
    expected: &Graph,
    inst_map: &HashMap<InstId, InstId>,
    a: InstId,
    e: InstId,
) -> Result<(), String> {
    let ia = actual.inst(a);
    let ie = expected.inst(e);
    if ia.opcode() != ie.opcode() {
        return Err(format!("{a}: opcode {} vs {}", ia.opcode(), ie.opcode()));
    }
    if ia.opcode() == Opcode::Nop {
        return Ok(());
    }
    if ia.ty() != ie.ty() {
        return Err(format!("{a}: type {} vs {}", ia.ty(), ie.ty()));
    }
    if ia.imm() != ie.imm() {
        return Err(format!("{a}: immediate differs"));
    }
    if ia.cc() != ie.cc() || ia.type_id() != ie.type_id() || ia.intrinsic() != ie.intrinsic() {
        return Err(format!("{a}: payload differs"));
    }
    if ia.deopt_reason() != ie.deopt_reason() {
        return Err(format!("{a}: deopt reason differs"));
    }
    if ia.inputs().len() != ie.inputs().len() {
        return Err(format!(
            "{a}: input count {} vs {}",
            ia.inputs().len(),
            ie.inputs().len()
        ));
    }
    for (idx, (&ina, &ine)) in ia.inputs().iter().zip(ie.inputs()).enumerate() {
        match inst_map.get(&ina) {
            Some(&mapped) if mapped == ine => {}
            _ => return Err(format!("{a}: input {idx} differs")),
        }
    }
    if ia.is_save_state() {
        let va = ia.save_state_entries();
        let ve = ie.save_state_entries();
        if va != ve {
            return Err(format!("{a}: save-state entries differ"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphChecker;

    #[test]
    fn dsl_builds_a_checkable_loop() {
        let mut t = TestGraph::new();
        t.constant(0, 0).constant(1, 1).constant(2, 10);
        t.bb(2, &[3]);
        t.inst(43, Opcode::SaveState, DataType::NoType).inputs(&[0, 1, 2]).vregs(&[0, 1, 2]);
        t.inst(44, Opcode::LoadAndInitClass, DataType::Reference).inputs(&[43]).type_id(68);
        t.inst(3, Opcode::NewArray, DataType::Reference).inputs(&[44, 2, 43]);
        t.bb(3, &[4, 5]);
        t.inst(4, Opcode::Phi, DataType::Int32).inputs(&[0, 10]);
        t.inst(5, Opcode::Compare, DataType::Bool).inputs(&[4, 2]).cc(ConditionCode::Lt);
        t.inst(6, Opcode::IfImm, DataType::NoType).inputs(&[5]).imm(0).cc(ConditionCode::Ne);
        t.bb(4, &[3]);
        t.inst(7, Opcode::SaveState, DataType::NoType).inputs(&[0, 1, 2, 3]).vregs(&[0, 1, 2, 3]);
        t.inst(8, Opcode::BoundsCheck, DataType::Int32).inputs(&[2, 4, 7]);
        t.inst(9, Opcode::StoreArray, DataType::NoType).inputs(&[3, 8, 0]);
        t.inst(10, Opcode::Add, DataType::Int32).inputs(&[4, 1]);
        t.bb(5, &[END]);
        t.inst(12, Opcode::Return, DataType::Reference).inputs(&[3]);
        let graph = t.finish();
        GraphChecker::new(&graph).check().unwrap();
        assert_eq!(crate::analysis::compute_rpo(&graph).len(), 6);
    }

    #[test]
    fn comparator_accepts_identical_and_rejects_different() {
        let build = |v: i64| {
            let mut t = TestGraph::new();
            t.constant(0, v);
            t.bb(2, &[END]);
            t.inst(1, Opcode::Return, DataType::Int64).inputs(&[0]);
            t.finish()
        };
        assert!(compare_graphs(&build(3), &build(3)).is_ok());
        assert!(compare_graphs(&build(3), &build(4)).is_err());
    }
}
