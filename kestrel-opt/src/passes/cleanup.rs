use tracing::trace;

use crate::analysis::compute_rpo;
use crate::ir::{BlockFlags, Graph, InstFlags, Opcode};

use super::{Pass, PassContext, PassError};

/// Removes `Nop`s, unused instructions, dead phis, unreachable blocks and
/// empty forwarding blocks. Runs to a fixpoint; every other pass relies on
/// it to sweep what they left behind.
#[derive(Debug, Default)]
pub struct Cleanup;

impl Pass for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn run(&mut self, graph: &mut Graph, _ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        let mut changed = false;
        loop {
            let mut round = false;
            round |= sweep_unreachable(graph);
            round |= sweep_phis(graph);
            round |= sweep_insts(graph);
            round |= bypass_empty_blocks(graph);
            if !round {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }
}

/// Drops blocks unreachable from start, clearing their instructions.
fn sweep_unreachable(graph: &mut Graph) -> bool {
    let reachable: std::collections::HashSet<_> = compute_rpo(graph).into_iter().collect();
    let dead: Vec<_> = graph
        .block_ids()
        .into_iter()
        .filter(|b| !reachable.contains(b))
        .collect();
    if dead.is_empty() {
        return false;
    }
    for &b in &dead {
        for succ in graph.block(b).succs().to_vec() {
            graph.disconnect(b, succ);
        }
        for pred in graph.block(b).preds().to_vec() {
            graph.disconnect(pred, b);
        }
    }
    // Dead instructions may feed each other across dead blocks; clear all
    // user lists before unlinking anything.
    let all: Vec<_> = dead.iter().flat_map(|&b| graph.block_insts_with_phis(b)).collect();
    for &id in &all {
        graph.clear_users_for_sweep(id);
    }
    for &id in &all {
        graph.remove_inst(id);
    }
    for &b in &dead {
        graph.remove_block(b);
    }
    true
}

/// Removes single-input and unused phis.
fn sweep_phis(graph: &mut Graph) -> bool {
    let mut changed = false;
    for b in graph.block_ids() {
        for phi in graph.block(b).phis().to_vec() {
            let others: Vec<_> =
                graph.inst(phi).inputs().iter().copied().filter(|&i| i != phi).collect();
            let same = others
                .first()
                .copied()
                .filter(|&first| others.iter().all(|&i| i == first));
            if let Some(value) = same {
                graph.replace_users(phi, value);
                graph.remove_inst(phi);
                changed = true;
            } else if graph.inst(phi).is_unused() {
                graph.remove_inst(phi);
                changed = true;
            }
        }
    }
    changed
}

/// Removes `Nop`s and unused instructions not protected by `NO_DCE`.
fn sweep_insts(graph: &mut Graph) -> bool {
    let mut changed = false;
    for b in graph.block_ids() {
        for id in graph.block_insts(b).into_iter().rev() {
            let inst = graph.inst(id);
            let removable = match inst.opcode() {
                Opcode::Nop => inst.is_unused(),
                _ => inst.is_unused() && !inst.flags().contains(InstFlags::NO_DCE),
            };
            if removable {
                trace!(inst = %id, "cleanup removes");
                graph.remove_inst(id);
                changed = true;
            }
        }
    }
    changed
}

/// Routes predecessors of an empty single-pred/single-succ block straight
/// to its successor.
fn bypass_empty_blocks(graph: &mut Graph) -> bool {
    let mut changed = false;
    for b in graph.block_ids() {
        if b == graph.start_block() || b == graph.end_block() {
            continue;
        }
        if !graph.block(b).is_empty() {
            continue;
        }
        if graph.block(b).flags().intersects(BlockFlags::TRY | BlockFlags::CATCH) {
            continue;
        }
        let preds = graph.block(b).preds().to_vec();
        let Some(succ) = graph.sole_succ(b) else { continue };
        if preds.len() != 1 || succ == b {
            continue;
        }
        let pred = preds[0];
        // The successor keeps its phi arity: one incoming edge is
        // replaced by another.
        graph.rewire_edge(pred, b, succ);
        graph.remove_block(b);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphChecker, GraphMode};
    use crate::passes::PassContext;

    #[test]
    fn removes_nops_and_dead_code() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let c = g.find_or_create_constant(1);
        let dead = g.build(Opcode::Add, DataType::Int32).inputs(&[c, c]).append_to(b);
        let nop = g.build(Opcode::Nop, DataType::NoType).append_to(b);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(b);
        let _ = (dead, nop);
        let mut cleanup = Cleanup;
        assert!(cleanup.run(&mut g, &mut PassContext::detached()).unwrap());
        assert_eq!(g.block_insts(b).len(), 1);
        GraphChecker::new(&g).check().unwrap();
    }

    #[test]
    fn folds_single_input_phi() {
        let mut g = Graph::new(GraphMode::default());
        let (a, join) = (g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, join);
        g.connect(join, g.end_block());
        let c = g.find_or_create_constant(3);
        let phi = g.build(Opcode::Phi, DataType::Int64).inputs(&[c]).as_phi_of(join);
        let ret = g.build(Opcode::Return, DataType::Int64).inputs(&[phi]).append_to(join);
        let mut cleanup = Cleanup;
        assert!(cleanup.run(&mut g, &mut PassContext::detached()).unwrap());
        assert_eq!(g.inst(ret).input(0), c);
        assert!(g.block(join).phis().is_empty());
    }

    #[test]
    fn drops_unreachable_blocks() {
        let mut g = Graph::new(GraphMode::default());
        let (a, orphan) = (g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, g.end_block());
        let c = g.find_or_create_constant(1);
        g.build(Opcode::Return, DataType::Int64).inputs(&[c]).append_to(orphan);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(a);
        let mut cleanup = Cleanup;
        assert!(cleanup.run(&mut g, &mut PassContext::detached()).unwrap());
        assert!(g.is_block_removed(orphan));
    }

    #[test]
    fn bypasses_empty_forwarding_block() {
        let mut g = Graph::new(GraphMode::default());
        let (a, empty, c) = (g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, empty);
        g.connect(empty, c);
        g.connect(c, g.end_block());
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(c);
        let mut cleanup = Cleanup;
        assert!(cleanup.run(&mut g, &mut PassContext::detached()).unwrap());
        assert!(g.is_block_removed(empty));
        assert_eq!(g.block(a).succs(), [c]);
        GraphChecker::new(&g).check().unwrap();
    }

    #[test]
    fn is_idempotent() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let c = g.find_or_create_constant(1);
        let dead = g.build(Opcode::Add, DataType::Int32).inputs(&[c, c]).append_to(b);
        let _ = dead;
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(b);
        let mut cleanup = Cleanup;
        assert!(cleanup.run(&mut g, &mut PassContext::detached()).unwrap());
        assert!(!cleanup.run(&mut g, &mut PassContext::detached()).unwrap());
    }
}
