use tracing::debug;

use crate::analysis::{DomTree, LoopTree, SaveStateBridges};
use crate::ir::{
    BlockFlags, BlockId, DataType, Graph, InstFlags, InstId, IntrinsicId, Opcode, VReg,
};

use super::{Pass, PassContext, PassError};

const MAX_CONCAT_ARGS: usize = 4;

/// Recognises `StringBuilder` usage patterns and rewrites them.
///
/// Three rewrites, all gated on the absence of try regions and OSR:
/// an instance built from a string and only ever read back collapses to
/// the string; a short append chain closed by a single `toString` becomes
/// nested string concatenations; and an accumulator loop gets its builder
/// hoisted to the preheader with the final `toString` moved past the
/// loop. Each rewrite re-establishes the save-state bridges it affects,
/// and a second run leaves the graph untouched.
#[derive(Debug, Default)]
pub struct SimplifyStringBuilder {
    applied: bool,
}

impl Pass for SimplifyStringBuilder {
    fn name(&self) -> &'static str {
        "simplify-string-builder"
    }

    fn run(&mut self, graph: &mut Graph, _ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        self.applied = false;
        if graph.is_osr() || has_guarded_blocks(graph) {
            return Ok(false);
        }
        let dom = DomTree::build(graph);
        let loops = LoopTree::build(graph, &dom);
        self.hoist_loop_accumulators(graph, &loops);
        for &block in DomTree::build(graph).rpo() {
            self.flatten_cascades(graph, block);
            self.collapse_unused_builders(graph, block);
            self.rewrite_concatenations(graph, block);
        }
        Ok(self.applied)
    }
}

fn has_guarded_blocks(graph: &Graph) -> bool {
    graph
        .block_ids()
        .into_iter()
        .any(|b| graph.block(b).flags().intersects(BlockFlags::TRY | BlockFlags::CATCH))
}

fn intrinsic_of(graph: &Graph, id: InstId) -> Option<IntrinsicId> {
    (graph.inst(id).opcode() == Opcode::Intrinsic)
        .then(|| graph.inst(id).intrinsic())
        .flatten()
}

fn is_append(graph: &Graph, id: InstId) -> bool {
    intrinsic_of(graph, id) == Some(IntrinsicId::StringBuilderAppendString)
}

fn is_to_string(graph: &Graph, id: InstId) -> bool {
    intrinsic_of(graph, id) == Some(IntrinsicId::StringBuilderToString)
}

impl SimplifyStringBuilder {
    /// `new StringBuilder(s)` whose instance only ever flows into
    /// `toString()` calls is the identity on `s`.
    fn collapse_unused_builders(&mut self, graph: &mut Graph, block: BlockId) {
        for instance in graph.block_insts(block) {
            if intrinsic_of(graph, instance) != Some(IntrinsicId::StringBuilderCtorString) {
                continue;
            }
            let arg = graph.inst(instance).input(0);
            let mut to_strings = Vec::new();
            let mut blocked = false;
            for &user in graph.inst(instance).users() {
                if is_to_string(graph, user) {
                    to_strings.push(user);
                } else if !graph.inst(user).is_save_state() {
                    blocked = true;
                }
            }
            if blocked || to_strings.is_empty() {
                continue;
            }
            debug!(instance = %instance, "collapsing read-only string builder");
            for ts in to_strings {
                graph.replace_users(ts, arg);
                graph.purge_from_save_states(ts);
                graph.remove_inst(ts);
            }
            graph.purge_from_save_states(instance);
            graph.remove_inst(instance);
            self.applied = true;
        }
    }

    /// A default-constructed builder, two to four appends and a single
    /// `toString` in one block become nested concatenations.
    fn rewrite_concatenations(&mut self, graph: &mut Graph, block: BlockId) {
        'outer: for instance in graph.block_insts(block) {
            if intrinsic_of(graph, instance) != Some(IntrinsicId::StringBuilderCtor) {
                continue;
            }
            let mut appends = Vec::new();
            let mut to_string = None;
            for &user in graph.inst(instance).users() {
                if is_append(graph, user) && graph.inst(user).input(0) == instance {
                    if graph.inst(user).block() != Some(block) {
                        continue 'outer;
                    }
                    appends.push(user);
                } else if is_to_string(graph, user) {
                    if to_string.replace(user).is_some()
                        || graph.inst(user).block() != Some(block)
                    {
                        continue 'outer;
                    }
                } else if !graph.inst(user).is_save_state() {
                    continue 'outer;
                }
            }
            let Some(to_string) = to_string else { continue };
            if appends.len() < 2 || appends.len() > MAX_CONCAT_ARGS {
                continue;
            }
            appends.sort_by_key(|&a| graph.inst_position(a));
            let args: Vec<InstId> = appends.iter().map(|&a| graph.inst(a).input(1)).collect();
            debug!(instance = %instance, args = args.len(), "rewriting concatenation chain");
            let result = self.build_concat_tree(graph, to_string, &args);
            graph.replace_users(to_string, result);
            graph.purge_from_save_states(to_string);
            graph.remove_inst(to_string);
            for append in appends {
                graph.purge_from_save_states(append);
                graph.remove_inst(append);
            }
            graph.purge_from_save_states(instance);
            graph.remove_inst(instance);
            SaveStateBridges::fix_block(graph, block);
            self.applied = true;
        }
    }

    /// Nested `ConcatStrings` over `args`, inserted before `to_string`,
    /// each with its own clone of the `toString` save state.
    fn build_concat_tree(&mut self, graph: &mut Graph, to_string: InstId, args: &[InstId]) -> InstId {
        let original_ss = graph
            .inst(to_string)
            .save_state_input()
            .expect("toString carries a save state");
        let mut concat = |graph: &mut Graph, lhs: InstId, rhs: InstId| {
            let ss = graph.clone_save_state_before(original_ss, to_string);
            graph
                .build(Opcode::Intrinsic, DataType::Reference)
                .intrinsic(IntrinsicId::ConcatStrings)
                .inputs(&[lhs, rhs, ss])
                .flags(InstFlags::MOVABLE_OBJECT)
                .before(to_string)
        };
        match args {
            [a, b] => concat(graph, *a, *b),
            [a, b, c] => {
                let first = concat(graph, *a, *b);
                concat(graph, first, *c)
            }
            [a, b, c, d] => {
                let first = concat(graph, *a, *b);
                let second = concat(graph, *c, *d);
                concat(graph, first, second)
            }
            _ => unreachable!("arity checked by caller"),
        }
    }

    /// `sb1 = new StringBuilder; sb1.append(x); sb2.append(sb1.toString())`
    /// appends `x` directly.
    fn flatten_cascades(&mut self, graph: &mut Graph, block: BlockId) {
        for inner in graph.block_insts(block) {
            if intrinsic_of(graph, inner) != Some(IntrinsicId::StringBuilderCtor) {
                continue;
            }
            let mut inner_append = None;
            let mut inner_to_string = None;
            let mut blocked = false;
            for &user in graph.inst(inner).users() {
                if is_append(graph, user) && graph.inst(user).input(0) == inner {
                    if inner_append.replace(user).is_some() {
                        blocked = true;
                    }
                } else if is_to_string(graph, user) {
                    if inner_to_string.replace(user).is_some() {
                        blocked = true;
                    }
                } else if !graph.inst(user).is_save_state() {
                    blocked = true;
                }
            }
            let (Some(inner_append), Some(inner_to_string)) = (inner_append, inner_to_string)
            else {
                continue;
            };
            if blocked {
                continue;
            }
            // Keep the rewrite local: the whole inner chain sits in this
            // block, append before toString.
            if graph.inst(inner_append).block() != Some(block)
                || graph.inst(inner_to_string).block() != Some(block)
                || graph.inst_position(inner_append) >= graph.inst_position(inner_to_string)
            {
                continue;
            }
            // The inner toString must feed exactly one outer append.
            let consumers: Vec<InstId> = graph
                .inst(inner_to_string)
                .users()
                .iter()
                .copied()
                .filter(|&u| !graph.inst(u).is_save_state())
                .collect();
            let [outer_append] = consumers[..] else { continue };
            if !is_append(graph, outer_append)
                || graph.inst(outer_append).input(1) != inner_to_string
            {
                continue;
            }
            let x = graph.inst(inner_append).input(1);
            debug!(inner = %inner, outer = %outer_append, "flattening builder cascade");
            graph.set_input(outer_append, 1, x);
            graph.purge_from_save_states(inner_to_string);
            graph.remove_inst(inner_to_string);
            graph.purge_from_save_states(inner_append);
            graph.remove_inst(inner_append);
            graph.purge_from_save_states(inner);
            graph.remove_inst(inner);
            self.applied = true;
        }
    }

    /// `for (..) s = sb.toString() where sb appends phi(s)`: builds once
    /// in the preheader, reads once past the loop.
    fn hoist_loop_accumulators(&mut self, graph: &mut Graph, loops: &LoopTree) {
        for loop_id in loops.inner_to_outer() {
            if !loops.get(loop_id).inner.is_empty() {
                continue;
            }
            let info = loops.get(loop_id);
            let (Some(header), Some(preheader)) = (info.header, info.preheader) else { continue };
            let Some(post_exit) = loops.post_exit(graph, loop_id) else { continue };
            if !graph.block(post_exit).phis().is_empty()
                || graph.block(post_exit).preds().len() != 1
            {
                continue;
            }
            let Some(ssd) = graph
                .block_insts(preheader)
                .into_iter()
                .find(|&i| graph.inst(i).opcode() == Opcode::SaveStateDeoptimize)
            else {
                continue;
            };
            let Some(pre_idx) = graph.block(header).pred_index(preheader) else { continue };
            for phi in graph.block(header).phis().to_vec() {
                if self.try_hoist_accumulator(
                    graph, loops, loop_id, phi, pre_idx, preheader, post_exit, ssd,
                ) {
                    self.applied = true;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_hoist_accumulator(
        &mut self,
        graph: &mut Graph,
        loops: &LoopTree,
        loop_id: crate::analysis::LoopId,
        phi: InstId,
        pre_idx: usize,
        preheader: BlockId,
        post_exit: BlockId,
        ssd: InstId,
    ) -> bool {
        if graph.inst(phi).ty() != DataType::Reference || graph.inst(phi).inputs().len() != 2 {
            return false;
        }
        let init = graph.inst(phi).input(pre_idx);
        let back = graph.inst(phi).input(1 - pre_idx);
        if !is_to_string(graph, back) {
            return false;
        }
        let instance = graph.inst(back).input(0);
        if intrinsic_of(graph, instance) != Some(IntrinsicId::StringBuilderCtor) {
            return false;
        }
        let in_loop = |g: &Graph, id: InstId| {
            g.inst(id).block().is_some_and(|b| loops.contains(loop_id, b))
        };
        if !in_loop(graph, instance) || !in_loop(graph, back) {
            return false;
        }
        // The builder may only feed its appends and the closing toString.
        let mut appends = Vec::new();
        for &user in graph.inst(instance).users() {
            if is_append(graph, user) && graph.inst(user).input(0) == instance {
                appends.push(user);
            } else if user != back && !graph.inst(user).is_save_state() {
                return false;
            }
        }
        if appends.is_empty() {
            return false;
        }
        appends.sort_by_key(|&a| graph.inst_position(a));
        let first_append = appends[0];
        if graph.inst(first_append).input(1) != phi {
            return false;
        }
        // The phi's value is only consumed by re-appending it.
        let external_users: Vec<InstId> = graph
            .inst(phi)
            .users()
            .iter()
            .copied()
            .filter(|&u| u != first_append)
            .collect();
        if external_users
            .iter()
            .any(|&u| in_loop(graph, u) && !graph.inst(u).is_save_state())
        {
            return false;
        }
        debug!(phi = %phi, instance = %instance, "hoisting string-builder accumulator");
        // Build the instance once before the loop and seed it with the
        // initial accumulator value.
        graph.detach_inst(instance);
        graph.insert_after(instance, ssd);
        let instance_ss_idx = graph.inst(instance).inputs().len() - 1;
        graph.set_input(instance, instance_ss_idx, ssd);
        graph.add_inst_flags(instance, InstFlags::MOVABLE_OBJECT);
        graph
            .build(Opcode::Intrinsic, DataType::Reference)
            .intrinsic(IntrinsicId::StringBuilderAppendString)
            .inputs(&[instance, init, ssd])
            .after(instance);
        // Read the result once after the loop.
        graph.detach_inst(back);
        let post_ss = graph.build(Opcode::SaveState, DataType::NoType).detached();
        match graph.block_insts(post_exit).first().copied() {
            Some(first) => {
                graph.insert_before(post_ss, first);
            }
            None => graph.append_inst(post_ss, post_exit),
        }
        graph.add_save_state_input(post_ss, instance, VReg::Bridge);
        graph.insert_after(back, post_ss);
        let back_ss_idx = graph.inst(back).inputs().len() - 1;
        graph.set_input(back, back_ss_idx, post_ss);
        // The first append fed the accumulator back in; the hoisted seed
        // took its place.
        graph.purge_from_save_states(first_append);
        graph.remove_inst(first_append);
        // In-loop save states must not adopt the moved toString; the
        // remaining external users read the post-exit result.
        graph.purge_from_save_states(phi);
        graph.replace_users(phi, back);
        graph.remove_inst(phi);
        // The instance now lives from the preheader across the whole
        // loop.
        for append in appends.into_iter().skip(1) {
            SaveStateBridges::fix_between(graph, instance, append);
        }
        SaveStateBridges::fix_between(graph, instance, back);
        SaveStateBridges::fix_block(graph, preheader);
        SaveStateBridges::fix_block(graph, post_exit);
        true
    }
}
