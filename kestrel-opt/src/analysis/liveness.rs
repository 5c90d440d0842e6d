use std::collections::HashSet;

use crate::ir::{BlockId, Graph, InstId};

/// Block-level live sets over SSA values.
///
/// Phi inputs count as live out of the corresponding predecessor; phi
/// results are defined at the top of their block.
#[derive(Debug)]
pub struct Liveness {
    live_in: Vec<HashSet<InstId>>,
    live_out: Vec<HashSet<InstId>>,
}

impl Liveness {
    /// Iterates the backward dataflow to a fixpoint.
    pub fn build(graph: &Graph) -> Self {
        let n = graph.block_count();
        let mut upward = vec![HashSet::new(); n];
        let mut defs = vec![HashSet::new(); n];
        let blocks = graph.block_ids();
        for &b in &blocks {
            let (u, d) = (&mut upward[b.index()], &mut defs[b.index()]);
            for &phi in graph.block(b).phis() {
                d.insert(phi);
            }
            for id in graph.block_insts(b) {
                for &input in graph.inst(id).inputs() {
                    if !d.contains(&input) {
                        u.insert(input);
                    }
                }
                d.insert(id);
            }
        }
        let mut live_in = vec![HashSet::new(); n];
        let mut live_out = vec![HashSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for &b in blocks.iter().rev() {
                let mut out: HashSet<InstId> = HashSet::new();
                for &succ in graph.block(b).succs() {
                    for &v in &live_in[succ.index()] {
                        out.insert(v);
                    }
                    let pred_pos = graph
                        .block(succ)
                        .pred_index(b)
                        .expect("edge lists are symmetric");
                    for &phi in graph.block(succ).phis() {
                        out.remove(&phi);
                        if let Some(&input) = graph.inst(phi).inputs().get(pred_pos) {
                            out.insert(input);
                        }
                    }
                }
                let mut inn: HashSet<InstId> = upward[b.index()].clone();
                for &v in &out {
                    if !defs[b.index()].contains(&v) {
                        inn.insert(v);
                    }
                }
                if out != live_out[b.index()] || inn != live_in[b.index()] {
                    live_out[b.index()] = out;
                    live_in[b.index()] = inn;
                    changed = true;
                }
            }
        }
        Self { live_in, live_out }
    }

    /// Values live on entry to `block`, phi results excluded.
    pub fn live_in(&self, block: BlockId) -> &HashSet<InstId> {
        &self.live_in[block.index()]
    }

    /// Values live on exit from `block`.
    pub fn live_out(&self, block: BlockId) -> &HashSet<InstId> {
        &self.live_out[block.index()]
    }

    /// Values live immediately after `at` inside its block: the block's
    /// live-out plus everything used later in the block, minus values not
    /// yet defined.
    pub fn live_after(&self, graph: &Graph, at: InstId) -> HashSet<InstId> {
        let block = graph.inst(at).block().expect("inst must be attached");
        let mut live = self.live_out[block.index()].clone();
        let insts = graph.block_insts(block);
        let pos = insts.iter().position(|&i| i == at).expect("inst is linked");
        for &id in insts[pos + 1..].iter().rev() {
            live.remove(&id);
            for &input in graph.inst(id).inputs() {
                live.insert(input);
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphMode, Opcode};

    #[test]
    fn value_used_in_later_block_is_live_through() {
        let mut g = Graph::new(GraphMode::default());
        let (a, b) = (g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, b);
        g.connect(b, g.end_block());
        let c = g.find_or_create_constant(4);
        let neg = g.build(Opcode::Neg, DataType::Int32).inputs(&[c]).append_to(a);
        let _ret = g.build(Opcode::Return, DataType::Int32).inputs(&[neg]).append_to(b);
        let live = Liveness::build(&g);
        assert!(live.live_out(a).contains(&neg));
        assert!(live.live_in(b).contains(&neg));
        assert!(!live.live_out(b).contains(&neg));
    }

    #[test]
    fn phi_inputs_are_live_out_of_their_pred_only() {
        let mut g = Graph::new(GraphMode::default());
        let (a, b, c, join) =
            (g.create_block(), g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, b);
        g.connect(a, c);
        g.connect(b, join);
        g.connect(c, join);
        g.connect(join, g.end_block());
        let c1 = g.find_or_create_constant(1);
        let x = g.build(Opcode::Neg, DataType::Int32).inputs(&[c1]).append_to(b);
        let y = g.build(Opcode::Not, DataType::Int32).inputs(&[c1]).append_to(c);
        let phi = g.build(Opcode::Phi, DataType::Int32).inputs(&[x, y]).as_phi_of(join);
        let _ret = g.build(Opcode::Return, DataType::Int32).inputs(&[phi]).append_to(join);
        let live = Liveness::build(&g);
        assert!(live.live_out(b).contains(&x));
        assert!(!live.live_out(b).contains(&y));
        assert!(live.live_out(c).contains(&y));
        assert!(!live.live_in(join).contains(&phi));
    }

    #[test]
    fn live_after_walks_the_block_tail() {
        let mut g = Graph::new(GraphMode::default());
        let a = g.create_block();
        g.connect(g.start_block(), a);
        g.connect(a, g.end_block());
        let c = g.find_or_create_constant(2);
        let first = g.build(Opcode::Neg, DataType::Int32).inputs(&[c]).append_to(a);
        let second = g.build(Opcode::Not, DataType::Int32).inputs(&[first]).append_to(a);
        let _ret = g.build(Opcode::Return, DataType::Int32).inputs(&[second]).append_to(a);
        let live = Liveness::build(&g);
        let after_first = live.live_after(&g, first);
        assert!(after_first.contains(&first));
        assert!(!after_first.contains(&second));
    }
}
