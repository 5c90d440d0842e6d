use crate::ir::{BlockId, Graph};

/// Reverse post-order of the blocks reachable from start. Successors are
/// visited in edge order, so the traversal is deterministic.
pub fn compute_rpo(graph: &Graph) -> Vec<BlockId> {
    let mut visited = vec![false; graph.block_count()];
    let mut post = Vec::with_capacity(graph.block_count());
    // Iterative DFS; the explicit stack keeps a per-frame successor cursor.
    let mut stack: Vec<(BlockId, usize)> = vec![(graph.start_block(), 0)];
    visited[graph.start_block().index()] = true;
    while let Some(&(block, cursor)) = stack.last() {
        let succs = graph.block(block).succs();
        if cursor < succs.len() {
            stack.last_mut().expect("stack is non-empty").1 += 1;
            let next = succs[cursor];
            if !visited[next.index()] {
                visited[next.index()] = true;
                stack.push((next, 0));
            }
        } else {
            post.push(block);
            stack.pop();
        }
    }
    post.reverse();
    post
}
