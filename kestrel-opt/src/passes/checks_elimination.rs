use tracing::debug;

use crate::analysis::{
    find_countable_loop, BoundsAnalysis, CountableLoop, DomTree, LoopTree, Range,
};
use crate::ir::{
    BlockId, ConditionCode, DataType, DeoptReason, Graph, InstId, Opcode,
};

use super::{Pass, PassContext, PassError};

/// Rewrites runtime guards that the analyses prove redundant.
///
/// A proven-safe check becomes `Nop` (keeping its id until cleanup) with
/// its users re-pointed at the underlying operand; a proven-failing check
/// becomes an unconditional `Deoptimize` that truncates its block; loop
/// checks over counted induction variables are replaced by a pair of
/// `DeoptimizeIf` guards in the preheader.
#[derive(Debug, Default)]
pub struct ChecksElimination {
    applied: bool,
}

impl Pass for ChecksElimination {
    fn name(&self) -> &'static str {
        "checks-elimination"
    }

    fn run(&mut self, graph: &mut Graph, _ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        self.applied = false;
        let checks: Vec<InstId> = {
            let dom = DomTree::build(graph);
            dom.rpo()
                .iter()
                .flat_map(|&b| graph.block_insts(b))
                .filter(|&id| graph.inst(id).opcode().is_check())
                .collect()
        };
        for check in checks {
            // Truncation or grouping may have removed it meanwhile.
            if graph.inst(check).block().is_none() {
                continue;
            }
            match graph.inst(check).opcode() {
                Opcode::NullCheck => self.process_null_check(graph, check),
                Opcode::BoundsCheck => self.process_bounds_check(graph, check),
                Opcode::ZeroCheck => self.process_zero_check(graph, check),
                Opcode::NegativeCheck => self.process_negative_check(graph, check),
                Opcode::RefTypeCheck => self.process_ref_type_check(graph, check),
                // Rewritten meanwhile (grouped or truncated away).
                _ => {}
            }
        }
        Ok(self.applied)
    }
}

impl ChecksElimination {
    fn eliminate(&mut self, graph: &mut Graph, check: InstId, replacement: InstId) {
        debug!(check = %check, "check eliminated");
        graph.replace_users(check, replacement);
        graph.make_nop(check);
        self.applied = true;
    }

    /// The check always fails: deoptimize unconditionally and drop the
    /// rest of the block.
    fn replace_with_deopt(&mut self, graph: &mut Graph, check: InstId, reason: DeoptReason) {
        debug!(check = %check, %reason, "check always fails");
        let ss = graph
            .inst(check)
            .save_state_input()
            .expect("checks carry a save state");
        let deopt = graph
            .build(Opcode::Deoptimize, DataType::NoType)
            .inputs(&[ss])
            .deopt(reason)
            .before(check);
        graph.truncate_block_after(deopt);
        self.applied = true;
    }

    // ---------------------------------------------------------------
    // NullCheck.

    fn process_null_check(&mut self, graph: &mut Graph, check: InstId) {
        let value = graph.inst(check).input(0);
        if graph.inst(value).opcode() == Opcode::NullPtr {
            self.replace_with_deopt(graph, check, DeoptReason::NullCheck);
            return;
        }
        let dom = DomTree::build(graph);
        if is_non_null(graph, value) || guarded_non_null(graph, &dom, check, value) {
            self.eliminate(graph, check, value);
            return;
        }
        if let Some(dominating) = find_dominating_check(graph, &dom, check) {
            self.eliminate(graph, check, dominating);
            return;
        }
        self.try_hoist_null_check(graph, &dom, check, value);
    }

    /// Loop-invariant reference checked on every iteration: test once in
    /// the preheader instead.
    fn try_hoist_null_check(
        &mut self,
        graph: &mut Graph,
        dom: &DomTree,
        check: InstId,
        value: InstId,
    ) {
        let block = graph.inst(check).block().expect("check is attached");
        let loops = LoopTree::build(graph, dom);
        let loop_id = loops.loop_of(block);
        if loops.get(loop_id).is_root() {
            return;
        }
        if graph
            .inst(value)
            .block()
            .is_some_and(|b| loops.contains(loop_id, b) && !loops.get(loop_id).is_root())
        {
            return;
        }
        let Some(preheader) = loops.get(loop_id).preheader else { return };
        let Some(ssd) = find_deopt_anchor(graph, preheader) else { return };
        let anchor = last_guard_after(graph, preheader, ssd);
        let null_ptr = graph.find_or_create_null_ptr();
        let cmp = graph
            .build(Opcode::Compare, DataType::Bool)
            .inputs(&[value, null_ptr])
            .cc(ConditionCode::Eq)
            .after(anchor);
        let _guard = graph
            .build(Opcode::DeoptimizeIf, DataType::NoType)
            .inputs(&[cmp, ssd])
            .deopt(DeoptReason::NullCheck)
            .after(cmp);
        debug!(check = %check, "null check hoisted to preheader");
        self.eliminate(graph, check, value);
    }

    // ---------------------------------------------------------------
    // BoundsCheck.

    fn process_bounds_check(&mut self, graph: &mut Graph, check: InstId) {
        let len = graph.inst(check).input(0);
        let index = graph.inst(check).input(1);
        let block = graph.inst(check).block().expect("check is attached");
        let dom = DomTree::build(graph);
        let loops = LoopTree::build(graph, &dom);
        let decision = {
            let bounds = BoundsAnalysis::new(graph, &dom, &loops);
            let len_r = bounds.range_of(len, block);
            let idx_r = bounds.range_of(index, block);
            if idx_r.min >= 0 && idx_r.max < len_r.min {
                Decision::Safe
            } else if idx_r.max < 0 || idx_r.min >= len_r.max {
                Decision::AlwaysFails
            } else {
                Decision::Unknown
            }
        };
        match decision {
            Decision::Safe => {
                self.eliminate(graph, check, index);
                return;
            }
            Decision::AlwaysFails => {
                self.replace_with_deopt(graph, check, DeoptReason::BoundsCheck);
                return;
            }
            Decision::Unknown => {}
        }
        if let Some(dominating) = find_dominating_check(graph, &dom, check) {
            self.eliminate(graph, check, dominating);
            return;
        }
        if self.try_hoist_bounds_check(graph, &dom, &loops, check, len, index) {
            return;
        }
        self.try_group_bounds_checks(graph, &dom, &loops, check, len, index);
    }

    /// `for (i = lo; i < up; i++) use a[i + k]` becomes two preheader
    /// guards (`lo + k < 0`, `up + k > len`) and an unchecked body.
    fn try_hoist_bounds_check(
        &mut self,
        graph: &mut Graph,
        dom: &DomTree,
        loops: &LoopTree,
        check: InstId,
        len: InstId,
        index: InstId,
    ) -> bool {
        let block = graph.inst(check).block().expect("check is attached");
        let loop_id = loops.loop_of(block);
        if loops.get(loop_id).is_root() {
            return false;
        }
        let Some(counted) = find_countable_loop(graph, loops, loop_id) else {
            return false;
        };
        let Some((base, offset)) = split_index(graph, index) else { return false };
        if base != counted.phi || counted.step.abs() != 1 {
            return false;
        }
        let Some(preheader) = loops.get(loop_id).preheader else { return false };
        let Some(ssd) = find_deopt_anchor(graph, preheader) else { return false };
        let Some((low, high)) = iteration_bounds(&counted, offset) else { return false };
        // New guards line up after any the pass already planted here.
        let mut anchor = last_guard_after(graph, preheader, ssd);
        // The length the guard compares against must not change while the
        // loop runs; a length of a loop-invariant array is rematerialised
        // in the preheader.
        let in_loop = |g: &Graph, i: InstId| {
            g.inst(i)
                .block()
                .is_some_and(|b| loops.contains(loop_id, b) && !loops.get(loop_id).is_root())
        };
        let guard_len = if !in_loop(graph, len) {
            len
        } else if graph.inst(len).opcode() == Opcode::LenArray {
            let mut array = graph.inst(len).input(0);
            while graph.inst(array).opcode() == Opcode::NullCheck {
                array = graph.inst(array).input(0);
            }
            if in_loop(graph, array) {
                return false;
            }
            let hoisted = graph
                .build(Opcode::LenArray, DataType::Int32)
                .inputs(&[array])
                .after(anchor);
            anchor = hoisted;
            hoisted
        } else {
            return false;
        };
        let len = guard_len;
        // Lower guard: smallest touched index below zero.
        if !provably_non_negative(graph, low) {
            let low_inst = self.materialize(graph, &mut anchor, low);
            let zero = graph.find_or_create_constant(0);
            let cmp = graph
                .build(Opcode::Compare, DataType::Bool)
                .inputs(&[low_inst, zero])
                .cc(ConditionCode::Lt)
                .after(anchor);
            anchor = graph
                .build(Opcode::DeoptimizeIf, DataType::NoType)
                .inputs(&[cmp, ssd])
                .deopt(DeoptReason::BoundsCheck)
                .after(cmp);
        }
        // Upper guard: largest touched index reaching the length.
        if !provably_below(graph, high, len) {
            let (expr, cc) = match high {
                // `i < up` touches up-1: deoptimize when up + k > len.
                Bound::Exclusive(expr) => (expr, ConditionCode::Gt),
                // `i <= up` touches up: deoptimize when up + k >= len.
                Bound::Inclusive(expr) => (expr, ConditionCode::Ge),
            };
            let high_inst = self.materialize(graph, &mut anchor, expr);
            let cmp = graph
                .build(Opcode::Compare, DataType::Bool)
                .inputs(&[high_inst, len])
                .cc(cc)
                .after(anchor);
            graph
                .build(Opcode::DeoptimizeIf, DataType::NoType)
                .inputs(&[cmp, ssd])
                .deopt(DeoptReason::BoundsCheck)
                .after(cmp);
        }
        debug!(check = %check, "bounds check hoisted to preheader");
        self.eliminate(graph, check, index);
        true
    }

    /// Several checks against the same array and base index in one block
    /// collapse into two covering guards.
    fn try_group_bounds_checks(
        &mut self,
        graph: &mut Graph,
        dom: &DomTree,
        loops: &LoopTree,
        check: InstId,
        len: InstId,
        index: InstId,
    ) {
        let _ = (dom, loops);
        let block = graph.inst(check).block().expect("check is attached");
        let Some((base, _)) = split_index(graph, index) else { return };
        let mut group: Vec<(InstId, i64)> = Vec::new();
        for id in graph.block_insts(block) {
            if graph.inst(id).opcode() != Opcode::BoundsCheck || graph.inst(id).input(0) != len {
                continue;
            }
            if let Some((b, k)) = split_index(graph, graph.inst(id).input(1)) {
                if b == base {
                    group.push((id, k));
                }
            }
        }
        if group.len() < 2 {
            return;
        }
        let min_k = group.iter().map(|&(_, k)| k).min().expect("group is non-empty");
        let max_k = group.iter().map(|&(_, k)| k).max().expect("group is non-empty");
        let (first, _) = group[0];
        let ss = graph
            .inst(first)
            .save_state_input()
            .expect("checks carry a save state");
        // Guards sit where the first check was, using its save state.
        let placeholder = graph.build(Opcode::Nop, DataType::NoType).before(first);
        let mut anchor = placeholder;
        let low = self.materialize(graph, &mut anchor, Expr { base: Some(base), offset: min_k });
        let zero = graph.find_or_create_constant(0);
        let low_cmp = graph
            .build(Opcode::Compare, DataType::Bool)
            .inputs(&[low, zero])
            .cc(ConditionCode::Lt)
            .after(anchor);
        let low_guard = graph
            .build(Opcode::DeoptimizeIf, DataType::NoType)
            .inputs(&[low_cmp, ss])
            .deopt(DeoptReason::BoundsCheck)
            .after(low_cmp);
        anchor = low_guard;
        let high = self.materialize(graph, &mut anchor, Expr { base: Some(base), offset: max_k });
        let high_cmp = graph
            .build(Opcode::Compare, DataType::Bool)
            .inputs(&[high, len])
            .cc(ConditionCode::Ge)
            .after(anchor);
        graph
            .build(Opcode::DeoptimizeIf, DataType::NoType)
            .inputs(&[high_cmp, ss])
            .deopt(DeoptReason::BoundsCheck)
            .after(high_cmp);
        graph.remove_inst(placeholder);
        debug!(block = %block, count = group.len(), "grouped bounds checks");
        for (id, _) in group {
            let idx = graph.inst(id).input(1);
            self.eliminate(graph, id, idx);
        }
    }

    /// Emits `base + offset` (or reuses `base` / a folded constant),
    /// inserting any new arithmetic after `anchor` and advancing it.
    fn materialize(&mut self, graph: &mut Graph, anchor: &mut InstId, expr: Expr) -> InstId {
        match (expr.base, expr.offset) {
            (Some(base), 0) => base,
            (Some(base), k) => {
                if let Some(folded) =
                    graph.inst(base).const_int().and_then(|v| v.checked_add(k))
                {
                    return graph.find_or_create_constant(folded);
                }
                let ty = graph.inst(base).ty();
                let id = graph.build(Opcode::AddI, ty).inputs(&[base]).imm(k).after(*anchor);
                *anchor = id;
                id
            }
            (None, k) => graph.find_or_create_constant(k),
        }
    }

    // ---------------------------------------------------------------
    // ZeroCheck / NegativeCheck / RefTypeCheck.

    fn process_zero_check(&mut self, graph: &mut Graph, check: InstId) {
        let value = graph.inst(check).input(0);
        let block = graph.inst(check).block().expect("check is attached");
        let dom = DomTree::build(graph);
        let loops = LoopTree::build(graph, &dom);
        let range = BoundsAnalysis::new(graph, &dom, &loops).range_of(value, block);
        if range.min > 0 || range.max < 0 {
            self.eliminate(graph, check, value);
            return;
        }
        if range == Range::exact(0) {
            self.replace_with_deopt(graph, check, DeoptReason::ZeroCheck);
            return;
        }
        if let Some(dominating) = find_dominating_check(graph, &dom, check) {
            self.eliminate(graph, check, dominating);
        }
    }

    fn process_negative_check(&mut self, graph: &mut Graph, check: InstId) {
        let value = graph.inst(check).input(0);
        let block = graph.inst(check).block().expect("check is attached");
        let dom = DomTree::build(graph);
        let loops = LoopTree::build(graph, &dom);
        let range = BoundsAnalysis::new(graph, &dom, &loops).range_of(value, block);
        if range.min >= 0 {
            self.eliminate(graph, check, value);
            return;
        }
        if range.max < 0 {
            self.replace_with_deopt(graph, check, DeoptReason::NegativeCheck);
            return;
        }
        if let Some(dominating) = find_dominating_check(graph, &dom, check) {
            self.eliminate(graph, check, dominating);
        }
    }

    fn process_ref_type_check(&mut self, graph: &mut Graph, check: InstId) {
        let value = graph.inst(check).input(1);
        // Storing null never needs an element-type check.
        if graph.inst(value).opcode() == Opcode::NullPtr {
            self.eliminate(graph, check, value);
            return;
        }
        let dom = DomTree::build(graph);
        if let Some(dominating) = find_dominating_check(graph, &dom, check) {
            self.eliminate(graph, check, dominating);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Safe,
    AlwaysFails,
    Unknown,
}

/// `base + offset` with an optional base value.
#[derive(Debug, Clone, Copy)]
struct Expr {
    base: Option<InstId>,
    offset: i64,
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    /// The touched maximum stays strictly below this expression.
    Exclusive(Expr),
    /// The touched maximum reaches this expression.
    Inclusive(Expr),
}

/// Splits an index into `(base, constant-offset)`.
fn split_index(graph: &Graph, index: InstId) -> Option<(InstId, i64)> {
    let inst = graph.inst(index);
    match inst.opcode() {
        Opcode::AddI => Some((inst.input(0), inst.imm()?.as_int()?)),
        Opcode::SubI => Some((inst.input(0), -(inst.imm()?.as_int()?))),
        Opcode::Add => {
            let k = graph.inst(inst.input(1)).const_int()?;
            Some((inst.input(0), k))
        }
        Opcode::Sub => {
            let k = graph.inst(inst.input(1)).const_int()?;
            Some((inst.input(0), -k))
        }
        _ => Some((index, 0)),
    }
}

/// Smallest and largest index expressions a counted loop touches through
/// `phi + offset`.
fn iteration_bounds(counted: &CountableLoop, offset: i64) -> Option<(Expr, Bound)> {
    if counted.step > 0 {
        let low = Expr { base: Some(counted.init), offset };
        let high = match counted.cc {
            ConditionCode::Lt => Bound::Exclusive(Expr { base: Some(counted.limit), offset }),
            ConditionCode::Le => Bound::Inclusive(Expr { base: Some(counted.limit), offset }),
            _ => return None,
        };
        Some((low, high))
    } else {
        let low = match counted.cc {
            ConditionCode::Gt => Expr { base: Some(counted.limit), offset: offset + 1 },
            ConditionCode::Ge => Expr { base: Some(counted.limit), offset },
            _ => return None,
        };
        let high = Bound::Inclusive(Expr { base: Some(counted.init), offset });
        Some((low, high))
    }
}

fn provably_non_negative(graph: &Graph, expr: Expr) -> bool {
    match expr.base {
        Some(base) => graph
            .inst(base)
            .const_int()
            .is_some_and(|v| v.checked_add(expr.offset).is_some_and(|s| s >= 0)),
        None => expr.offset >= 0,
    }
}

fn provably_below(graph: &Graph, bound: Bound, len: InstId) -> bool {
    let Some(len_v) = graph.inst(len).const_int() else { return false };
    let (expr, inclusive) = match bound {
        Bound::Exclusive(e) => (e, false),
        Bound::Inclusive(e) => (e, true),
    };
    let Some(base) = expr.base else {
        return if inclusive { expr.offset < len_v } else { expr.offset <= len_v };
    };
    let Some(base_v) = graph.inst(base).const_int() else { return false };
    let Some(v) = base_v.checked_add(expr.offset) else { return false };
    if inclusive {
        v < len_v
    } else {
        v <= len_v
    }
}

/// A value produced non-null by construction.
fn is_non_null(graph: &Graph, value: InstId) -> bool {
    matches!(
        graph.inst(value).opcode(),
        Opcode::NullCheck
            | Opcode::NewArray
            | Opcode::NewObject
            | Opcode::LoadString
            | Opcode::LoadConstArray
    )
}

/// Whether a dominating `DeoptimizeIf(value == null)` already guards the
/// reference.
fn guarded_non_null(graph: &Graph, dom: &DomTree, check: InstId, value: InstId) -> bool {
    graph.inst(value).users().iter().any(|&cmp| {
        let c = graph.inst(cmp);
        if c.opcode() != Opcode::Compare || c.cc() != Some(ConditionCode::Eq) {
            return false;
        }
        let other = if c.input(0) == value { c.input(1) } else { c.input(0) };
        if graph.inst(other).opcode() != Opcode::NullPtr {
            return false;
        }
        c.users().iter().any(|&guard| {
            graph.inst(guard).opcode() == Opcode::DeoptimizeIf
                && graph.inst(guard).deopt_reason() == Some(DeoptReason::NullCheck)
                && dom.inst_dominates(graph, guard, check)
        })
    })
}

/// A dominating check of the same kind over the same operands.
fn find_dominating_check(graph: &Graph, dom: &DomTree, check: InstId) -> Option<InstId> {
    let op = graph.inst(check).opcode();
    let key_input = match op {
        Opcode::RefTypeCheck => graph.inst(check).input(1),
        _ => graph.inst(check).input(0),
    };
    graph
        .inst(key_input)
        .users()
        .iter()
        .copied()
        .find(|&other| {
            if other == check || graph.inst(other).opcode() != op {
                return false;
            }
            let same_operands = match op {
                Opcode::BoundsCheck => {
                    graph.inst(other).input(0) == graph.inst(check).input(0)
                        && graph.inst(other).input(1) == graph.inst(check).input(1)
                }
                Opcode::RefTypeCheck => {
                    graph.inst(other).input(0) == graph.inst(check).input(0)
                        && graph.inst(other).input(1) == graph.inst(check).input(1)
                }
                _ => graph.inst(other).input(0) == graph.inst(check).input(0),
            };
            same_operands && dom.inst_dominates(graph, other, check)
        })
}

/// The deoptimization anchor of a preheader, when present.
fn find_deopt_anchor(graph: &Graph, preheader: BlockId) -> Option<InstId> {
    graph
        .block_insts(preheader)
        .into_iter()
        .find(|&id| graph.inst(id).opcode() == Opcode::SaveStateDeoptimize)
}

/// The last guard instruction already planted after `ssd`, or `ssd`
/// itself. The preheader's own loop-entry compare (feeding an `IfImm`)
/// ends the guard run.
fn last_guard_after(graph: &Graph, preheader: BlockId, ssd: InstId) -> InstId {
    let insts = graph.block_insts(preheader);
    let Some(pos) = insts.iter().position(|&i| i == ssd) else { return ssd };
    let mut anchor = ssd;
    for &id in &insts[pos + 1..] {
        let is_guard_part = match graph.inst(id).opcode() {
            Opcode::DeoptimizeIf | Opcode::AddI | Opcode::LenArray => true,
            Opcode::Compare => graph
                .inst(id)
                .users()
                .iter()
                .all(|&u| graph.inst(u).opcode() == Opcode::DeoptimizeIf),
            _ => false,
        };
        if is_guard_part {
            anchor = id;
        } else {
            break;
        }
    }
    anchor
}
