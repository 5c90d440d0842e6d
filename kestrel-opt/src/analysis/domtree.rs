use crate::ir::{BlockId, Graph, InstId};

use super::rpo::compute_rpo;

/// Immediate-dominator tree.
///
/// Built with the iterative two-finger algorithm over reverse post-order.
/// A block A dominates B iff every path from start to B passes through A.
#[derive(Debug, Clone)]
pub struct DomTree {
    rpo: Vec<BlockId>,
    /// Immediate dominator per block id; start maps to itself.
    idom: Vec<Option<BlockId>>,
    /// RPO position per block id; `usize::MAX` for unreachable blocks.
    order: Vec<usize>,
}

impl DomTree {
    /// Builds the tree for the current CFG.
    pub fn build(graph: &Graph) -> Self {
        let rpo = compute_rpo(graph);
        let mut order = vec![usize::MAX; graph.block_count()];
        for (i, &b) in rpo.iter().enumerate() {
            order[b.index()] = i;
        }
        let mut idom: Vec<Option<BlockId>> = vec![None; graph.block_count()];
        let start = graph.start_block();
        idom[start.index()] = Some(start);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in graph.block(block).preds() {
                    if order[pred.index()] == usize::MAX || idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => intersect(&idom, &order, pred, cur),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }
        Self { rpo, idom, order }
    }

    /// Reverse post-order computed during construction.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Immediate dominator; `None` for the start block and unreachable
    /// blocks.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let idom = self.idom[block.index()]?;
        (idom != block).then_some(idom)
    }

    /// Whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if self.order[a.index()] == usize::MAX || self.order[b.index()] == usize::MAX {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom[cur.index()] {
                Some(next) if next != cur => cur = next,
                _ => return false,
            }
        }
    }

    /// Blocks immediately dominated by `block`, in RPO.
    pub fn children(&self, block: BlockId) -> Vec<BlockId> {
        self.rpo
            .iter()
            .copied()
            .filter(|&b| b != block && self.idom[b.index()] == Some(block))
            .collect()
    }

    /// Whether instruction `a` dominates instruction `b`. Within one block
    /// phis precede instructions; an instruction does not dominate itself.
    pub fn inst_dominates(&self, graph: &Graph, a: InstId, b: InstId) -> bool {
        if a == b {
            return false;
        }
        let (Some(block_a), Some(block_b)) = (graph.inst(a).block(), graph.inst(b).block()) else {
            return false;
        };
        if block_a != block_b {
            return self.dominates(block_a, block_b);
        }
        graph.inst_position(a) < graph.inst_position(b)
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    order: &[usize],
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while order[a.index()] > order[b.index()] {
            a = idom[a.index()].expect("processed block has an idom");
        }
        while order[b.index()] > order[a.index()] {
            b = idom[b.index()].expect("processed block has an idom");
        }
    }
    a
}
