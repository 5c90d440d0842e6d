use crate::ir::{BlockId, Graph, Opcode};

use super::rpo::compute_rpo;

/// Emission order of blocks for lowering.
///
/// Starts from reverse post-order and rotates conditional successors so
/// that, where possible, the false successor (or the unlikely one, when
/// the terminator carries a hint) is the fall-through block. The caller
/// still checks adjacency and emits explicit jumps where the order cannot
/// satisfy it.
pub fn compute_linear_order(graph: &Graph) -> Vec<BlockId> {
    let mut order = compute_rpo(graph);
    // Hinted conditionals prefer the likely edge as fall-through: hoist
    // the likely successor right behind its branch when the layout allows.
    for i in 0..order.len() {
        let block = order[i];
        let Some(term) = graph.block(block).last_inst() else { continue };
        if graph.inst(term).opcode() != Opcode::IfImm {
            continue;
        }
        let Some(likely) = graph.inst(term).likely() else { continue };
        let succs = graph.block(block).succs();
        if succs.len() != 2 {
            continue;
        }
        let preferred = if likely { succs[0] } else { succs[1] };
        if order.get(i + 1) == Some(&preferred) {
            continue;
        }
        if let Some(pos) = order.iter().position(|&b| b == preferred) {
            if pos > i + 1 {
                let b = order.remove(pos);
                order.insert(i + 1, b);
            }
        }
    }
    order
}
