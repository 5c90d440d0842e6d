use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::debug;

use crate::analysis::{DomTree, LoopTree};
use crate::ir::{
    BlockId, DataType, Graph, InstFlags, InstId, Opcode,
};

use super::{Pass, PassContext, PassError};

/// Common-subexpression elimination over plain arithmetic.
///
/// A lighter companion of value numbering: block-local matching extended
/// into the dominator region, commutativity on non-float operands, and
/// phi synthesis at two-predecessor joins whose arms both compute the
/// expression the join recomputes.
#[derive(Debug, Default)]
pub struct Cse {
    applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExprKey {
    op: Opcode,
    ty: DataType,
    imm: Option<u64>,
    inputs: SmallVec<[InstId; 2]>,
}

fn eligible(graph: &Graph, id: InstId) -> bool {
    let inst = graph.inst(id);
    if inst.flags().contains(InstFlags::NO_CSE) {
        return false;
    }
    inst.opcode().is_binary_arith()
        || matches!(
            inst.opcode(),
            Opcode::Neg | Opcode::Not | Opcode::Abs | Opcode::AddI | Opcode::SubI
        )
}

fn expr_key(graph: &Graph, id: InstId) -> ExprKey {
    let inst = graph.inst(id);
    let mut inputs: SmallVec<[InstId; 2]> = SmallVec::from_slice(inst.inputs());
    if inst.opcode().is_commutative() && !inst.ty().is_float() {
        inputs.sort();
    }
    ExprKey {
        op: inst.opcode(),
        ty: inst.ty(),
        imm: inst.imm().map(|i| i.bits()),
        inputs,
    }
}

impl Cse {
    fn visit_block(
        &mut self,
        graph: &mut Graph,
        dom: &DomTree,
        loops: &LoopTree,
        block: BlockId,
        table: &mut HashMap<ExprKey, Vec<InstId>>,
    ) {
        let mut pushed: Vec<ExprKey> = Vec::new();
        for id in graph.block_insts(block) {
            if !eligible(graph, id) {
                continue;
            }
            let key = expr_key(graph, id);
            let candidate = table.get(&key).and_then(|s| s.last().copied());
            let ok = candidate.is_some_and(|cand| {
                let cand_block = graph.inst(cand).block().expect("candidate is attached");
                if graph.is_osr() && loops.loop_of(cand_block) != loops.loop_of(block) {
                    return false;
                }
                // Guarded regions keep their own copies.
                !(cand_block != block
                    && (graph.block(cand_block).is_try() || graph.block(block).is_try()))
            });
            match candidate {
                Some(cand) if ok => {
                    debug!(victim = %id, keeper = %cand, "cse replaces");
                    graph.replace_users(id, cand);
                    graph.make_nop(id);
                    self.applied = true;
                }
                _ => {
                    table.entry(key.clone()).or_default().push(id);
                    pushed.push(key);
                }
            }
        }
        for child in dom.children(block) {
            self.visit_block(graph, dom, loops, child, table);
        }
        for key in pushed {
            if let Some(stack) = table.get_mut(&key) {
                stack.pop();
            }
        }
    }

    /// A join block recomputing an expression both arms already computed
    /// receives a phi over the two arm instances instead.
    fn synthesize_phis(&mut self, graph: &mut Graph, dom: &DomTree) {
        if graph.is_osr() {
            return;
        }
        for &block in dom.rpo() {
            let preds = graph.block(block).preds().to_vec();
            if preds.len() != 2 {
                continue;
            }
            if graph.block(block).is_try()
                || preds.iter().any(|&p| graph.block(p).is_try() || graph.block(p).is_catch())
            {
                continue;
            }
            for id in graph.block_insts(block) {
                if !eligible(graph, id) || !graph.inst(id).opcode().is_binary_arith() {
                    continue;
                }
                let key = expr_key(graph, id);
                let lhs = graph
                    .block_insts(preds[0])
                    .into_iter()
                    .find(|&p| eligible(graph, p) && expr_key(graph, p) == key);
                let rhs = graph
                    .block_insts(preds[1])
                    .into_iter()
                    .find(|&p| eligible(graph, p) && expr_key(graph, p) == key);
                let (Some(lhs), Some(rhs)) = (lhs, rhs) else { continue };
                let ty = graph.inst(id).ty();
                let phi = graph.build(Opcode::Phi, ty).inputs(&[lhs, rhs]).as_phi_of(block);
                debug!(join = %block, phi = %phi, "cse synthesizes phi");
                graph.replace_users(id, phi);
                graph.make_nop(id);
                self.applied = true;
            }
        }
    }
}

impl Pass for Cse {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn run(&mut self, graph: &mut Graph, _ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        self.applied = false;
        let dom = DomTree::build(graph);
        let loops = LoopTree::build(graph, &dom);
        let mut table = HashMap::new();
        let start = graph.start_block();
        self.visit_block(graph, &dom, &loops, start, &mut table);
        self.synthesize_phis(graph, &dom);
        Ok(self.applied)
    }
}
