use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::debug;

use crate::analysis::{DomTree, LoopTree, SaveStateBridges};
use crate::ir::{
    BlockId, ConditionCode, DataType, Graph, InstFlags, InstId, IntrinsicId, Opcode,
};

use super::{Pass, PassContext, PassError};

/// Value numbering across the dominator tree.
///
/// Two instructions share a value number iff they compute the same value
/// in every execution where both execute; the dominated duplicate is
/// rewritten to `Nop` and its users re-pointed at the dominating
/// equivalent. Commutative integer operations compare their operand pair
/// unordered; float arithmetic never commutes. Class-initialisation and
/// resolver instructions follow their own equivalence rules.
#[derive(Debug, Default)]
pub struct ValNum {
    applied: bool,
}

/// Structural equivalence key. `REQUIRE_STATE` instructions drop their
/// save-state input: the anchor does not contribute to the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VnKey {
    op: Opcode,
    ty: DataType,
    imm: Option<u64>,
    cc: Option<ConditionCode>,
    type_id: Option<u32>,
    intrinsic: Option<IntrinsicId>,
    inputs: SmallVec<[InstId; 4]>,
}

fn vn_key(graph: &Graph, id: InstId) -> VnKey {
    let inst = graph.inst(id);
    let mut inputs: SmallVec<[InstId; 4]> = SmallVec::from_slice(inst.inputs());
    if inst.flags().contains(InstFlags::REQUIRE_STATE) && !inputs.is_empty() {
        inputs.pop();
    }
    if inst.opcode().is_commutative() && !inst.ty().is_float() {
        inputs.sort();
    }
    VnKey {
        op: inst.opcode(),
        ty: inst.ty(),
        imm: inst.imm().map(|i| i.bits()),
        cc: inst.cc(),
        type_id: inst.type_id(),
        intrinsic: inst.intrinsic(),
        inputs,
    }
}

/// Opcodes the structural table handles even though their flags carry
/// `NO_CSE` for the other passes.
fn is_special_cse(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::IsInstance
            | Opcode::ResolveVirtual
            | Opcode::ResolveStatic
            | Opcode::ResolveObjectFieldStatic
            | Opcode::LoadImmediate
            | Opcode::LoadObjFromConst
            | Opcode::FunctionImmediate
            | Opcode::LoadFromConstantPool
    )
}

/// Resolver equivalences must not be carried across try-region borders.
fn crosses_try_border(graph: &Graph, a: BlockId, b: BlockId) -> bool {
    a != b && (graph.block(a).is_try() || graph.block(b).is_try())
}

impl ValNum {
    fn replace(&mut self, graph: &mut Graph, victim: InstId, keeper: InstId) {
        debug!(victim = %victim, keeper = %keeper, "vn replaces");
        let users: Vec<InstId> = graph.inst(victim).users().to_vec();
        graph.replace_users(victim, keeper);
        graph.make_nop(victim);
        if graph.inst(keeper).is_movable_value() {
            // The keeper's live range grew; save states between it and the
            // adopted users must hold the reference.
            for user in users {
                if graph.inst(user).block().is_some() {
                    SaveStateBridges::fix_between(graph, keeper, user);
                }
            }
        }
        self.applied = true;
    }

    /// Rewrites a `LoadClass` into `LoadAndInitClass` at the same
    /// position, adopting its users.
    fn strengthen_load_class(&mut self, graph: &mut Graph, load: InstId) -> InstId {
        let inputs: Vec<InstId> = graph.inst(load).inputs().to_vec();
        let type_id = graph.inst(load).type_id().unwrap_or_default();
        let strengthened = graph
            .build(Opcode::LoadAndInitClass, DataType::Reference)
            .inputs(&inputs)
            .type_id(type_id)
            .before(load);
        graph.replace_users(load, strengthened);
        graph.make_nop(load);
        self.applied = true;
        strengthened
    }

    #[allow(clippy::too_many_lines)]
    fn visit_block(
        &mut self,
        graph: &mut Graph,
        dom: &DomTree,
        loops: &LoopTree,
        block: BlockId,
        table: &mut HashMap<VnKey, Vec<InstId>>,
        classes: &mut HashMap<u32, Vec<InstId>>,
    ) {
        let mut pushed_keys: Vec<VnKey> = Vec::new();
        let mut pushed_classes: Vec<u32> = Vec::new();
        for id in graph.block_insts(block) {
            let op = graph.inst(id).opcode();
            match op {
                Opcode::Nop => continue,
                Opcode::LoadClass | Opcode::InitClass | Opcode::LoadAndInitClass => {
                    let Some(tid) = graph.inst(id).type_id() else { continue };
                    self.visit_class_inst(graph, id, op, tid, classes, &mut pushed_classes);
                    continue;
                }
                Opcode::CheckCast | Opcode::IsInstance => {
                    let object = graph.inst(id).input(0);
                    if proves_non_null(graph, object) {
                        graph.set_omit_null_check(id, true);
                    }
                    if op == Opcode::CheckCast {
                        continue;
                    }
                }
                _ => {}
            }
            let flags = graph.inst(id).flags();
            if flags.contains(InstFlags::NO_CSE) && !is_special_cse(op) {
                continue;
            }
            if op.is_terminator() || op == Opcode::Phi {
                continue;
            }
            let key = vn_key(graph, id);
            let candidate = table.get(&key).and_then(|stack| stack.last().copied());
            let replaceable = candidate.is_some_and(|cand| {
                let cand_block = graph.inst(cand).block().expect("candidate is attached");
                if graph.is_osr() && loops.loop_of(cand_block) != loops.loop_of(block) {
                    // The interpreter cannot rebuild a value hoisted over
                    // an OSR entry.
                    return false;
                }
                if is_special_cse(op) && crosses_try_border(graph, cand_block, block) {
                    return false;
                }
                debug_assert!(cand == id || dom.inst_dominates(graph, cand, id));
                cand != id
            });
            match candidate {
                Some(cand) if replaceable => self.replace(graph, id, cand),
                _ => {
                    table.entry(key.clone()).or_default().push(id);
                    pushed_keys.push(key);
                }
            }
        }
        for child in dom.children(block) {
            self.visit_block(graph, dom, loops, child, table, classes);
        }
        for key in pushed_keys {
            if let Some(stack) = table.get_mut(&key) {
                stack.pop();
            }
        }
        for tid in pushed_classes {
            if let Some(stack) = classes.get_mut(&tid) {
                stack.pop();
            }
        }
    }

    fn visit_class_inst(
        &mut self,
        graph: &mut Graph,
        id: InstId,
        op: Opcode,
        tid: u32,
        classes: &mut HashMap<u32, Vec<InstId>>,
        pushed: &mut Vec<u32>,
    ) {
        let top = classes.get(&tid).and_then(|s| s.last().copied());
        let top_op = top.map(|t| graph.inst(t).opcode());
        match (op, top_op) {
            (Opcode::InitClass, Some(Opcode::InitClass | Opcode::LoadAndInitClass)) => {
                graph.make_nop(id);
                self.applied = true;
            }
            (Opcode::InitClass, Some(Opcode::LoadClass)) => {
                let load = top.expect("matched Some above");
                let strengthened = self.strengthen_load_class(graph, load);
                graph.make_nop(id);
                *classes
                    .get_mut(&tid)
                    .and_then(|s| s.last_mut())
                    .expect("stack top exists") = strengthened;
            }
            (Opcode::LoadClass, Some(Opcode::LoadClass | Opcode::LoadAndInitClass)) => {
                self.replace(graph, id, top.expect("matched Some above"));
            }
            (Opcode::LoadAndInitClass, Some(Opcode::LoadAndInitClass)) => {
                self.replace(graph, id, top.expect("matched Some above"));
            }
            (Opcode::LoadAndInitClass, Some(Opcode::LoadClass)) => {
                let load = top.expect("matched Some above");
                let strengthened = self.strengthen_load_class(graph, load);
                self.replace(graph, id, strengthened);
                *classes
                    .get_mut(&tid)
                    .and_then(|s| s.last_mut())
                    .expect("stack top exists") = strengthened;
            }
            _ => {
                classes.entry(tid).or_default().push(id);
                pushed.push(tid);
            }
        }
    }

    /// Inserts a phi at a join whose every predecessor computes the same
    /// expression, replacing the join-block duplicate.
    fn synthesize_phis(&mut self, graph: &mut Graph, dom: &DomTree) {
        if graph.is_osr() {
            return;
        }
        for &block in dom.rpo() {
            let preds = graph.block(block).preds().to_vec();
            if preds.len() < 2 {
                continue;
            }
            if graph.block(block).is_try()
                || preds.iter().any(|&p| graph.block(p).is_try() || graph.block(p).is_catch())
            {
                continue;
            }
            for id in graph.block_insts(block) {
                let inst = graph.inst(id);
                if !inst.opcode().is_binary_arith()
                    || inst.flags().contains(InstFlags::NO_CSE)
                {
                    continue;
                }
                let key = vn_key(graph, id);
                let mut partners = Vec::with_capacity(preds.len());
                for &pred in &preds {
                    let found = graph
                        .block_insts(pred)
                        .into_iter()
                        .find(|&p| vn_key(graph, p) == key);
                    match found {
                        Some(p) => partners.push(p),
                        None => break,
                    }
                }
                if partners.len() != preds.len() {
                    continue;
                }
                let ty = graph.inst(id).ty();
                let phi = graph.build(Opcode::Phi, ty).inputs(&partners).as_phi_of(block);
                debug!(join = %block, phi = %phi, "vn synthesizes phi");
                graph.replace_users(id, phi);
                graph.make_nop(id);
                self.applied = true;
            }
        }
    }
}

/// Whether the value is known non-null at its definition.
fn proves_non_null(graph: &Graph, value: InstId) -> bool {
    matches!(
        graph.inst(value).opcode(),
        Opcode::NullCheck
            | Opcode::NewArray
            | Opcode::NewObject
            | Opcode::LoadString
            | Opcode::LoadConstArray
    )
}

impl Pass for ValNum {
    fn name(&self) -> &'static str {
        "vn"
    }

    fn run(&mut self, graph: &mut Graph, _ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        self.applied = false;
        let dom = DomTree::build(graph);
        let loops = LoopTree::build(graph, &dom);
        let mut table = HashMap::new();
        let mut classes = HashMap::new();
        let start = graph.start_block();
        self.visit_block(graph, &dom, &loops, start, &mut table, &mut classes);
        self.synthesize_phis(graph, &dom);
        Ok(self.applied)
    }
}
