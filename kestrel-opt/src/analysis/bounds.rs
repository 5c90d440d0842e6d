use std::collections::HashSet;

use crate::ir::{BlockId, ConditionCode, DataType, Graph, InstId, Opcode};

use super::domtree::DomTree;
use super::loops::{LoopId, LoopTree};

/// Closed integer interval. The empty interval is not representable; an
/// unknown value gets the full range of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Smallest possible value.
    pub min: i64,
    /// Largest possible value.
    pub max: i64,
}

impl Range {
    /// Single-point interval.
    pub fn exact(v: i64) -> Self {
        Self { min: v, max: v }
    }

    /// Full range of an integer type.
    pub fn of_type(ty: DataType) -> Self {
        Self { min: ty.min_value(), max: ty.max_value() }
    }

    /// Whole `i64` span; the "know nothing" element.
    pub fn full() -> Self {
        Self { min: i64::MIN, max: i64::MAX }
    }

    /// Whether the interval is one point.
    pub fn is_exact(&self) -> bool {
        self.min == self.max
    }

    /// Whether every value is non-negative.
    pub fn is_non_negative(&self) -> bool {
        self.min >= 0
    }

    /// Interval sum; `None` when either end overflows.
    pub fn add(self, other: Range) -> Option<Range> {
        Some(Range {
            min: self.min.checked_add(other.min)?,
            max: self.max.checked_add(other.max)?,
        })
    }

    /// Interval difference; `None` on overflow.
    pub fn sub(self, other: Range) -> Option<Range> {
        Some(Range {
            min: self.min.checked_sub(other.max)?,
            max: self.max.checked_sub(other.min)?,
        })
    }

    /// Union hull.
    pub fn union(self, other: Range) -> Range {
        Range { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    /// Intersection; `None` when disjoint.
    pub fn intersect(self, other: Range) -> Option<Range> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min <= max).then_some(Range { min, max })
    }
}

/// A recognised counted loop: `for (phi = init; phi cc limit; phi += step)`.
#[derive(Debug, Clone, Copy)]
pub struct CountableLoop {
    /// The induction phi in the loop header.
    pub phi: InstId,
    /// Initial value, defined outside the loop.
    pub init: InstId,
    /// The `Add`/`Sub` feeding the back edge.
    pub update: InstId,
    /// Signed step; negative for decreasing loops.
    pub step: i64,
    /// Loop bound, defined outside the loop.
    pub limit: InstId,
    /// Guard condition with the induction value on the left.
    pub cc: ConditionCode,
    /// Whether the guard tests the updated value rather than the phi.
    pub guard_on_update: bool,
}

/// Recognises the induction shape of a loop, if any.
pub fn find_countable_loop(
    graph: &Graph,
    loops: &LoopTree,
    loop_id: LoopId,
) -> Option<CountableLoop> {
    let info = loops.get(loop_id);
    let header = info.header?;
    let preheader = info.preheader?;
    let pre_idx = graph.block(header).pred_index(preheader)?;
    // The exiting conditional: a loop block with one successor inside and
    // one outside, ending in IfImm over a Compare.
    let mut guard = None;
    for &b in &info.blocks {
        let succs = graph.block(b).succs();
        if succs.len() != 2 {
            continue;
        }
        let inside = info.blocks.contains(&succs[0]);
        let outside = !info.blocks.contains(&succs[1]);
        if inside && outside {
            guard = Some(b);
            break;
        }
    }
    let guard_block = guard?;
    let if_imm = graph.block(guard_block).last_inst()?;
    if graph.inst(if_imm).opcode() != Opcode::IfImm
        || graph.inst(if_imm).cc() != Some(ConditionCode::Ne)
        || graph.inst(if_imm).imm().and_then(|i| i.as_int()) != Some(0)
    {
        return None;
    }
    let cmp = graph.inst(if_imm).input(0);
    if graph.inst(cmp).opcode() != Opcode::Compare {
        return None;
    }
    let cc = graph.inst(cmp).cc()?;
    let (lhs, rhs) = (graph.inst(cmp).input(0), graph.inst(cmp).input(1));
    for &phi in graph.block(header).phis() {
        if graph.inst(phi).inputs().len() != 2 {
            continue;
        }
        let init = graph.inst(phi).input(pre_idx);
        let update = graph.inst(phi).input(1 - pre_idx);
        let step = match graph.inst(update).opcode() {
            Opcode::Add if graph.inst(update).input(0) == phi => {
                graph.inst(graph.inst(update).input(1)).const_int()
            }
            Opcode::Sub if graph.inst(update).input(0) == phi => {
                graph.inst(graph.inst(update).input(1)).const_int().map(|s| -s)
            }
            Opcode::AddI if graph.inst(update).input(0) == phi => {
                graph.inst(update).imm().and_then(|i| i.as_int())
            }
            Opcode::SubI if graph.inst(update).input(0) == phi => {
                graph.inst(update).imm().and_then(|i| i.as_int()).map(|s| -s)
            }
            _ => None,
        };
        let Some(step) = step else { continue };
        let (tested, limit, cc) = if lhs == phi || lhs == update {
            (lhs, rhs, cc)
        } else if rhs == phi || rhs == update {
            (rhs, lhs, cc.swapped())
        } else {
            continue;
        };
        // The limit must not vary inside the loop.
        if let Some(limit_block) = graph.inst(limit).block() {
            if loops.contains(loop_id, limit_block) && !loops.get(loop_id).is_root() {
                continue;
            }
        }
        return Some(CountableLoop {
            phi,
            init,
            update,
            step,
            limit,
            cc,
            guard_on_update: tested == update,
        });
    }
    None
}

/// Interval analysis over integer SSA values, refined by dominating
/// conditions at a query block.
pub struct BoundsAnalysis<'a> {
    graph: &'a Graph,
    dom: &'a DomTree,
    loops: &'a LoopTree,
}

impl<'a> BoundsAnalysis<'a> {
    /// Creates the analysis over prebuilt dominator and loop trees.
    pub fn new(graph: &'a Graph, dom: &'a DomTree, loops: &'a LoopTree) -> Self {
        Self { graph, dom, loops }
    }

    /// Range of `inst` as observed from `at`, dominating conditions
    /// applied.
    pub fn range_of(&self, inst: InstId, at: BlockId) -> Range {
        let base = self.base_range(inst, &mut HashSet::new());
        self.refine(inst, at, base)
    }

    fn base_range(&self, inst: InstId, visiting: &mut HashSet<InstId>) -> Range {
        if !visiting.insert(inst) {
            return Range::full();
        }
        let r = self.base_range_impl(inst, visiting);
        visiting.remove(&inst);
        r
    }

    fn base_range_impl(&self, inst: InstId, visiting: &mut HashSet<InstId>) -> Range {
        let graph = self.graph;
        let data = graph.inst(inst);
        let type_range = || {
            if data.ty().is_int() {
                Range::of_type(data.ty())
            } else {
                Range::full()
            }
        };
        match data.opcode() {
            Opcode::Constant => data.const_int().map(Range::exact).unwrap_or_else(Range::full),
            Opcode::LenArray => self.len_array_range(inst),
            Opcode::BoundsCheck => self.base_range(data.input(1), visiting),
            Opcode::ZeroCheck => self.base_range(data.input(0), visiting),
            Opcode::NegativeCheck => {
                let r = self.base_range(data.input(0), visiting);
                Range { min: r.min.max(0), max: r.max.max(0) }
            }
            Opcode::Abs => {
                let r = self.base_range(data.input(0), visiting);
                let hi = r.min.checked_abs().and_then(|a| {
                    r.max.checked_abs().map(|b| a.max(b))
                });
                match hi {
                    Some(hi) => Range { min: 0, max: hi },
                    None => Range { min: 0, max: i64::MAX },
                }
            }
            Opcode::Neg => {
                let r = self.base_range(data.input(0), visiting);
                match (r.max.checked_neg(), r.min.checked_neg()) {
                    (Some(min), Some(max)) => Range { min, max },
                    _ => type_range(),
                }
            }
            Opcode::Add => {
                let a = self.base_range(data.input(0), visiting);
                let b = self.base_range(data.input(1), visiting);
                a.add(b).unwrap_or_else(type_range)
            }
            Opcode::Sub => {
                let a = self.base_range(data.input(0), visiting);
                let b = self.base_range(data.input(1), visiting);
                a.sub(b).unwrap_or_else(type_range)
            }
            Opcode::AddI => {
                let a = self.base_range(data.input(0), visiting);
                let k = data.imm().and_then(|i| i.as_int()).unwrap_or(0);
                a.add(Range::exact(k)).unwrap_or_else(type_range)
            }
            Opcode::SubI => {
                let a = self.base_range(data.input(0), visiting);
                let k = data.imm().and_then(|i| i.as_int()).unwrap_or(0);
                a.sub(Range::exact(k)).unwrap_or_else(type_range)
            }
            Opcode::Min => {
                let a = self.base_range(data.input(0), visiting);
                let b = self.base_range(data.input(1), visiting);
                Range { min: a.min.min(b.min), max: a.max.min(b.max) }
            }
            Opcode::Max => {
                let a = self.base_range(data.input(0), visiting);
                let b = self.base_range(data.input(1), visiting);
                Range { min: a.min.max(b.min), max: a.max.max(b.max) }
            }
            Opcode::Mod | Opcode::ModI => {
                let m = match data.opcode() {
                    Opcode::Mod => graph.inst(data.input(1)).const_int(),
                    _ => data.imm().and_then(|i| i.as_int()),
                };
                match m.and_then(|m| m.checked_abs()).filter(|&m| m > 0) {
                    Some(m) => {
                        let lhs = self.base_range(data.input(0), visiting);
                        if lhs.is_non_negative() {
                            Range { min: 0, max: m - 1 }
                        } else {
                            Range { min: -(m - 1), max: m - 1 }
                        }
                    }
                    None => type_range(),
                }
            }
            Opcode::Cast => {
                let r = self.base_range(data.input(0), visiting);
                if data.ty().is_int() {
                    r.intersect(Range::of_type(data.ty())).unwrap_or_else(type_range)
                } else {
                    Range::full()
                }
            }
            Opcode::Phi => self.phi_range(inst, visiting),
            _ => type_range(),
        }
    }

    fn len_array_range(&self, len: InstId) -> Range {
        // A length of a freshly allocated array with constant size is that
        // size.
        let mut array = self.graph.inst(len).input(0);
        while self.graph.inst(array).opcode() == Opcode::NullCheck {
            array = self.graph.inst(array).input(0);
        }
        if self.graph.inst(array).opcode() == Opcode::NewArray {
            let size = self.graph.inst(array).input(1);
            if let Some(v) = self.graph.inst(size).const_int() {
                return Range::exact(v);
            }
        }
        Range { min: 0, max: i64::from(i32::MAX) }
    }

    fn phi_range(&self, phi: InstId, visiting: &mut HashSet<InstId>) -> Range {
        let graph = self.graph;
        let block = graph.inst(phi).block().expect("phi is attached");
        let loop_id = self.loops.loop_of(block);
        if self.loops.get(loop_id).header == Some(block) {
            if let Some(counted) = find_countable_loop(graph, self.loops, loop_id) {
                if counted.phi == phi {
                    return self.induction_range(&counted, visiting);
                }
            }
            // A header phi without induction shape cycles through itself.
            return Range::full();
        }
        // A join phi is bounded by what each value can be on its arriving
        // edge, conditions included.
        let preds = graph.block(block).preds();
        let mut out: Option<Range> = None;
        for (i, &input) in graph.inst(phi).inputs().iter().enumerate() {
            let base = self.base_range(input, visiting);
            let r = match preds.get(i) {
                Some(&pred) => self.refine(input, pred, base),
                None => base,
            };
            out = Some(match out {
                None => r,
                Some(acc) => acc.union(r),
            });
        }
        out.unwrap_or_else(Range::full)
    }

    fn induction_range(&self, counted: &CountableLoop, visiting: &mut HashSet<InstId>) -> Range {
        let init = self.base_range(counted.init, visiting);
        let limit = self.base_range(counted.limit, visiting);
        if counted.step > 0 {
            let max = match counted.cc {
                ConditionCode::Lt | ConditionCode::B => limit.max.checked_sub(1),
                ConditionCode::Le | ConditionCode::Be => Some(limit.max),
                _ => None,
            };
            match max {
                Some(max) => Range { min: init.min, max: max.max(init.min) },
                None => Range::full(),
            }
        } else if counted.step < 0 {
            let min = match counted.cc {
                ConditionCode::Gt | ConditionCode::A => limit.min.checked_add(1),
                ConditionCode::Ge | ConditionCode::Ae => Some(limit.min),
                _ => None,
            };
            match min {
                Some(min) => Range { min: min.min(init.max), max: init.max },
                None => Range::full(),
            }
        } else {
            init
        }
    }

    /// Narrows `base` with every dominating condition that pins `inst`.
    fn refine(&self, inst: InstId, at: BlockId, base: Range) -> Range {
        let graph = self.graph;
        let mut range = base;
        let at_loop = self.loops.loop_of(at);
        let mut cur = Some(at);
        while let Some(block) = cur {
            cur = self.dom.idom(block);
            let Some(dominator) = cur else { break };
            let succs = graph.block(dominator).succs();
            if succs.len() != 2 {
                continue;
            }
            let Some(term) = graph.block(dominator).last_inst() else { continue };
            if graph.inst(term).opcode() != Opcode::IfImm
                || graph.inst(term).imm().and_then(|i| i.as_int()) != Some(0)
            {
                continue;
            }
            let cmp = graph.inst(term).input(0);
            if graph.inst(cmp).opcode() != Opcode::Compare {
                continue;
            }
            let Some(mut cc) = graph.inst(cmp).cc() else { continue };
            if graph.inst(term).cc() == Some(ConditionCode::Eq) {
                cc = cc.inverted();
            } else if graph.inst(term).cc() != Some(ConditionCode::Ne) {
                continue;
            }
            let (a, b) = (graph.inst(cmp).input(0), graph.inst(cmp).input(1));
            // Loop-variant operands may have changed since the test ran.
            let invariant = |v: InstId| match graph.inst(v).block() {
                Some(vb) => {
                    self.loops.get(at_loop).is_root() || !self.loops.contains(at_loop, vb)
                }
                None => true,
            };
            if !invariant(a) || !invariant(b) {
                continue;
            }
            let holds = if self.dom.dominates(succs[0], at) {
                Some(cc)
            } else if self.dom.dominates(succs[1], at) {
                Some(cc.inverted())
            } else {
                None
            };
            let Some(cc) = holds else { continue };
            let refined = if a == inst {
                constrain(range, cc, self.base_range(b, &mut HashSet::new()))
            } else if b == inst {
                constrain(range, cc.swapped(), self.base_range(a, &mut HashSet::new()))
            } else {
                None
            };
            if let Some(r) = refined {
                range = r;
            }
        }
        range
    }
}

/// `value cc bound` holds; narrow `value`'s range accordingly.
fn constrain(range: Range, cc: ConditionCode, bound: Range) -> Option<Range> {
    let limit = match cc {
        ConditionCode::Lt => Range { min: i64::MIN, max: bound.max.checked_sub(1)? },
        ConditionCode::Le => Range { min: i64::MIN, max: bound.max },
        ConditionCode::Gt => Range { min: bound.min.checked_add(1)?, max: i64::MAX },
        ConditionCode::Ge => Range { min: bound.min, max: i64::MAX },
        ConditionCode::Eq => bound,
        _ => return None,
    };
    range.intersect(limit)
}
