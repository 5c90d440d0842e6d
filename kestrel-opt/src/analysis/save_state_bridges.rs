use std::collections::HashSet;

use crate::ir::{BlockId, Graph, InstId, VReg};

/// Maintains the invariant that every GC-movable reference live across a
/// save state appears among its inputs.
///
/// Values injected here carry the reserved [`VReg::Bridge`] marker: they
/// have no bytecode frame slot and exist only so the collector sees the
/// reference at the safepoint. Every pass that moves, clones or hoists an
/// instruction calls one of these fixups at the mutation site.
pub struct SaveStateBridges;

impl SaveStateBridges {
    /// Re-establishes bridges inside one block: every movable reference
    /// defined in the block and still live after a save state must be
    /// listed in it.
    pub fn fix_block(graph: &mut Graph, block: BlockId) {
        let insts = graph.block_insts(block);
        for (pos, &ss) in insts.iter().enumerate() {
            if !graph.inst(ss).is_save_state() {
                continue;
            }
            for &value in insts.iter().take(pos) {
                if !graph.inst(value).is_movable_value() {
                    continue;
                }
                if graph.save_state_contains(ss, value) {
                    continue;
                }
                if Self::lives_past(graph, &insts, value, pos, ss) {
                    graph.add_save_state_input(ss, value, VReg::Bridge);
                }
            }
        }
    }

    /// Whether `value` has a user after position `pos` of its block, or
    /// any user outside the block.
    fn lives_past(
        graph: &Graph,
        insts: &[InstId],
        value: InstId,
        pos: usize,
        ss: InstId,
    ) -> bool {
        let block = graph.inst(value).block();
        graph.inst(value).users().iter().any(|&user| {
            if user == ss {
                return false;
            }
            match graph.inst(user).block() {
                Some(ub) if Some(ub) == block => {
                    // Phis of the block are not in the linear list and
                    // conservatively count as live.
                    insts.iter().position(|&i| i == user).map_or(true, |up| up > pos)
                }
                _ => true,
            }
        })
    }

    /// After inserting `target`, which consumes the movable value
    /// `source`, walks every path between the two and adds `source` to
    /// each save state it crosses.
    pub fn fix_between(graph: &mut Graph, source: InstId, target: InstId) {
        let Some(src_block) = graph.inst(source).block() else { return };
        let Some(tgt_block) = graph.inst(target).block() else { return };
        if !graph.inst(source).is_movable_value() {
            return;
        }
        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut work: Vec<(BlockId, Option<InstId>)> = vec![(tgt_block, Some(target))];
        while let Some((block, before)) = work.pop() {
            if !visited.insert(block) && before.is_none() {
                continue;
            }
            let insts = graph.block_insts(block);
            let upper = match before {
                Some(b) => insts.iter().position(|&i| i == b).unwrap_or(insts.len()),
                None => insts.len(),
            };
            let lower = if block == src_block {
                insts
                    .iter()
                    .position(|&i| i == source)
                    .map(|p| p + 1)
                    .unwrap_or(0)
            } else {
                0
            };
            for &id in insts.iter().take(upper).skip(lower) {
                if graph.inst(id).is_save_state() && !graph.save_state_contains(id, source) {
                    graph.add_save_state_input(id, source, VReg::Bridge);
                }
            }
            if block != src_block {
                for &pred in graph.block(block).preds() {
                    if !visited.contains(&pred) {
                        work.push((pred, None));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphMode, Opcode};

    #[test]
    fn block_fixup_adds_bridge_for_live_reference() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let size = g.find_or_create_constant(3);
        let ss0 = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        let cls = g
            .build(Opcode::LoadAndInitClass, DataType::Reference)
            .inputs(&[ss0])
            .type_id(0)
            .append_to(b);
        let arr =
            g.build(Opcode::NewArray, DataType::Reference).inputs(&[cls, size, ss0]).append_to(b);
        let ss1 = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        let ret = g.build(Opcode::Return, DataType::Reference).inputs(&[arr]).append_to(b);
        let _ = ret;
        assert!(!g.save_state_contains(ss1, arr));
        SaveStateBridges::fix_block(&mut g, b);
        assert!(g.save_state_contains(ss1, arr));
        let entry_pos = g.inst(ss1).inputs().iter().position(|&i| i == arr).unwrap();
        assert_eq!(g.inst(ss1).save_state_entries()[entry_pos].vreg, VReg::Bridge);
    }

    #[test]
    fn block_fixup_skips_dead_values() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let ss0 = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        let s = g
            .build(Opcode::LoadString, DataType::Reference)
            .inputs(&[ss0])
            .type_id(0)
            .append_to(b);
        let _ = s;
        let _ss1 = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(b);
        SaveStateBridges::fix_block(&mut g, b);
        // No user after the save state: no bridge.
        assert!(!g.save_state_contains(_ss1, s));
    }

    #[test]
    fn path_fixup_covers_intermediate_blocks() {
        let mut g = Graph::new(GraphMode::default());
        let (a, mid, c) = (g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, mid);
        g.connect(mid, c);
        g.connect(c, g.end_block());
        let ss0 = g.build(Opcode::SaveState, DataType::NoType).append_to(a);
        let obj = g
            .build(Opcode::LoadString, DataType::Reference)
            .inputs(&[ss0])
            .type_id(0)
            .append_to(a);
        let ss_mid = g.build(Opcode::SaveState, DataType::NoType).append_to(mid);
        let ss_c = g.build(Opcode::SaveState, DataType::NoType).append_to(c);
        let user = g.build(Opcode::Return, DataType::Reference).inputs(&[obj]).append_to(c);
        SaveStateBridges::fix_between(&mut g, obj, user);
        assert!(g.save_state_contains(ss_mid, obj));
        assert!(g.save_state_contains(ss_c, obj));
    }
}
