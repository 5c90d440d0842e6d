use std::collections::HashSet;

use crate::ir::{BlockId, Graph};

use super::domtree::DomTree;

/// Index into [`LoopTree::loops`]; `0` is the synthetic root.
pub type LoopId = usize;

/// One natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// Loop header; the target of the back edges.
    pub header: Option<BlockId>,
    /// Sources of back edges into the header.
    pub back_edges: Vec<BlockId>,
    /// All blocks of the loop, header included.
    pub blocks: HashSet<BlockId>,
    /// Enclosing loop; `None` only for the root.
    pub outer: Option<LoopId>,
    /// Directly nested loops.
    pub inner: Vec<LoopId>,
    /// The unique non-latch predecessor of the header, when it exists.
    pub preheader: Option<BlockId>,
}

impl LoopInfo {
    /// The synthetic root covering the whole graph.
    pub fn is_root(&self) -> bool {
        self.header.is_none()
    }
}

/// Natural-loop forest derived from back edges in the dominator relation.
#[derive(Debug, Clone)]
pub struct LoopTree {
    loops: Vec<LoopInfo>,
    /// Innermost loop per block; root for blocks outside any loop.
    block_loop: Vec<LoopId>,
}

impl LoopTree {
    /// Builds the forest for the current CFG.
    pub fn build(graph: &Graph, dom: &DomTree) -> Self {
        let root = LoopInfo {
            header: None,
            back_edges: Vec::new(),
            blocks: dom.rpo().iter().copied().collect(),
            outer: None,
            inner: Vec::new(),
            preheader: None,
        };
        let mut loops = vec![root];
        // One loop per header, merging multiple back edges.
        for &header in dom.rpo() {
            let latches: Vec<BlockId> = graph
                .block(header)
                .preds()
                .iter()
                .copied()
                .filter(|&p| dom.dominates(header, p))
                .collect();
            if latches.is_empty() {
                continue;
            }
            let mut blocks: HashSet<BlockId> = HashSet::from([header]);
            let mut work: Vec<BlockId> = latches.clone();
            while let Some(b) = work.pop() {
                if blocks.insert(b) {
                    work.extend(graph.block(b).preds().iter().copied());
                }
            }
            let preheader = {
                let outside: Vec<BlockId> = graph
                    .block(header)
                    .preds()
                    .iter()
                    .copied()
                    .filter(|p| !blocks.contains(p))
                    .collect();
                match outside[..] {
                    [p] => Some(p),
                    _ => None,
                }
            };
            loops.push(LoopInfo {
                header: Some(header),
                back_edges: latches,
                blocks,
                outer: None,
                inner: Vec::new(),
                preheader,
            });
        }
        // Nesting: the innermost loop of a block is the smallest loop
        // containing it; outer pointers follow from header containment.
        let mut block_loop = vec![0usize; graph.block_count()];
        for &block in dom.rpo() {
            let mut best: LoopId = 0;
            let mut best_size = usize::MAX;
            for (id, l) in loops.iter().enumerate().skip(1) {
                if l.blocks.contains(&block) && l.blocks.len() < best_size {
                    best = id;
                    best_size = l.blocks.len();
                }
            }
            block_loop[block.index()] = best;
        }
        for id in 1..loops.len() {
            let header = loops[id].header.expect("non-root has a header");
            let mut outer: LoopId = 0;
            let mut outer_size = usize::MAX;
            for (other, l) in loops.iter().enumerate() {
                if other == id {
                    continue;
                }
                let covers = l.is_root() || l.blocks.contains(&header);
                if covers && l.blocks.len() < outer_size {
                    outer = other;
                    outer_size = l.blocks.len();
                }
            }
            loops[id].outer = Some(outer);
        }
        for id in 1..loops.len() {
            let outer = loops[id].outer.expect("assigned above");
            loops[outer].inner.push(id);
        }
        Self { loops, block_loop }
    }

    /// All loops, root first.
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Loop info by id.
    pub fn get(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id]
    }

    /// Innermost loop of a block (root when outside every loop).
    pub fn loop_of(&self, block: BlockId) -> LoopId {
        self.block_loop[block.index()]
    }

    /// Whether `block` belongs to loop `id`, nested loops included.
    pub fn contains(&self, id: LoopId, block: BlockId) -> bool {
        self.loops[id].is_root() || self.loops[id].blocks.contains(&block)
    }

    /// Ids of non-root loops, innermost first.
    pub fn inner_to_outer(&self) -> Vec<LoopId> {
        let mut ids: Vec<LoopId> = (1..self.loops.len()).collect();
        ids.sort_by_key(|&id| self.loops[id].blocks.len());
        ids
    }

    /// The single block outside the loop that loop exits branch to, when
    /// unique.
    pub fn post_exit(&self, graph: &Graph, id: LoopId) -> Option<BlockId> {
        let l = &self.loops[id];
        let mut out: Option<BlockId> = None;
        for &b in &l.blocks {
            for &succ in graph.block(b).succs() {
                if !l.blocks.contains(&succ) {
                    if out.is_some_and(|o| o != succ) {
                        return None;
                    }
                    out = Some(succ);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::GraphMode;

    #[test]
    fn single_loop_shape() {
        let mut g = Graph::new(GraphMode::default());
        let (pre, head, body, exit) =
            (g.create_block(), g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), pre);
        g.connect(pre, head);
        g.connect(head, body);
        g.connect(head, exit);
        g.connect(body, head);
        g.connect(exit, g.end_block());
        let dom = DomTree::build(&g);
        let loops = LoopTree::build(&g, &dom);
        assert_eq!(loops.loops().len(), 2);
        let l = &loops.loops()[1];
        assert_eq!(l.header, Some(head));
        assert_eq!(l.back_edges, vec![body]);
        assert_eq!(l.preheader, Some(pre));
        assert!(l.blocks.contains(&body));
        assert!(!l.blocks.contains(&exit));
        assert_eq!(loops.loop_of(body), 1);
        assert_eq!(loops.loop_of(exit), 0);
        assert_eq!(loops.post_exit(&g, 1), Some(exit));
    }

    #[test]
    fn nested_loops() {
        let mut g = Graph::new(GraphMode::default());
        let (h1, h2, latch2, latch1, exit) = (
            g.create_block(),
            g.create_block(),
            g.create_block(),
            g.create_block(),
            g.create_block(),
        );
        g.connect(g.start_block(), h1);
        g.connect(h1, h2);
        g.connect(h2, latch2);
        g.connect(latch2, h2);
        g.connect(latch2, latch1);
        g.connect(latch1, h1);
        g.connect(h1, exit);
        g.connect(exit, g.end_block());
        let dom = DomTree::build(&g);
        let loops = LoopTree::build(&g, &dom);
        assert_eq!(loops.loops().len(), 3);
        let inner_id = loops.loop_of(h2);
        let outer_id = loops.loop_of(h1);
        assert_ne!(inner_id, outer_id);
        assert_eq!(loops.get(inner_id).outer, Some(outer_id));
        assert!(loops.get(outer_id).inner.contains(&inner_id));
        let order = loops.inner_to_outer();
        assert_eq!(order[0], inner_id);
    }
}
