use crate::ir::{BlockFlags, BlockId, Graph, InstId, Opcode};

use super::rpo::compute_rpo;

/// Whether a `Monitor` instruction is the enter half.
pub fn is_monitor_entry(graph: &Graph, inst: InstId) -> bool {
    graph.inst(inst).opcode() == Opcode::Monitor
        && graph.inst(inst).imm().and_then(|i| i.as_int()) == Some(1)
}

/// Whether a `Monitor` instruction is the exit half.
pub fn is_monitor_exit(graph: &Graph, inst: InstId) -> bool {
    graph.inst(inst).opcode() == Opcode::Monitor
        && graph.inst(inst).imm().and_then(|i| i.as_int()) == Some(0)
}

/// Per-block classification of monitor usage.
///
/// The analysis runs a forward walk of held-monitor counts. It reports
/// `!is_valid()` when enter/exit counts disagree between converging paths
/// or a path exits more monitors than it entered; paths that end in
/// `Throw` are exempt, since unwinding releases held monitors.
#[derive(Debug)]
pub struct MonitorAnalysis {
    entry: Vec<bool>,
    exit: Vec<bool>,
    held: Vec<bool>,
    valid: bool,
}

impl MonitorAnalysis {
    /// Runs the analysis.
    pub fn build(graph: &Graph) -> Self {
        let n = graph.block_count();
        let mut entry = vec![false; n];
        let mut exit = vec![false; n];
        let mut held = vec![false; n];
        let rpo = compute_rpo(graph);
        let mut delta = vec![0i32; n];
        let mut valid = true;
        for &b in &rpo {
            let mut d = 0i32;
            for id in graph.block_insts(b) {
                if is_monitor_entry(graph, id) {
                    entry[b.index()] = true;
                    d += 1;
                } else if is_monitor_exit(graph, id) {
                    exit[b.index()] = true;
                    d -= 1;
                }
            }
            delta[b.index()] = d;
        }
        // Forward count propagation in RPO; None = not yet reached by a
        // non-throwing path.
        let mut in_count: Vec<Option<i32>> = vec![None; n];
        in_count[graph.start_block().index()] = Some(0);
        for &b in &rpo {
            let mut incoming: Option<i32> = if b == graph.start_block() { Some(0) } else { None };
            for &pred in graph.block(b).preds() {
                if ends_with_throw(graph, pred) {
                    continue;
                }
                let Some(pin) = in_count[pred.index()] else { continue };
                let pout = pin + delta[pred.index()];
                match incoming {
                    None => incoming = Some(pout),
                    Some(cur) if cur != pout => {
                        valid = false;
                        break;
                    }
                    Some(_) => {}
                }
            }
            if !valid {
                break;
            }
            let Some(inc) = incoming else { continue };
            // A path must never release a monitor it does not hold.
            let mut running = inc;
            for id in graph.block_insts(b) {
                if is_monitor_entry(graph, id) {
                    running += 1;
                } else if is_monitor_exit(graph, id) {
                    running -= 1;
                    if running < 0 {
                        valid = false;
                    }
                }
            }
            in_count[b.index()] = Some(inc);
            held[b.index()] = inc + delta[b.index()] > 0;
        }
        if valid {
            if let Some(end_in) = in_count[graph.end_block().index()] {
                if end_in + delta[graph.end_block().index()] != 0 {
                    valid = false;
                }
            }
        }
        Self { entry, exit, held, valid }
    }

    /// Whether the results are trustworthy; consumers treat `false` as
    /// a go/no-go signal.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Block contains a monitor enter.
    pub fn is_entry_block(&self, b: BlockId) -> bool {
        self.entry[b.index()]
    }

    /// Block contains a monitor exit.
    pub fn is_exit_block(&self, b: BlockId) -> bool {
        self.exit[b.index()]
    }

    /// A monitor is held at the end of the block on every path.
    pub fn is_monitor_block(&self, b: BlockId) -> bool {
        self.held[b.index()]
    }

    /// Writes the computed classification into the block flags.
    pub fn apply_to_graph(&self, graph: &mut Graph) {
        for b in graph.block_ids() {
            let mut flags = BlockFlags::empty();
            if self.entry[b.index()] {
                flags |= BlockFlags::MONITOR_ENTRY;
            }
            if self.exit[b.index()] {
                flags |= BlockFlags::MONITOR_EXIT;
            }
            if self.held[b.index()] {
                flags |= BlockFlags::MONITOR_BLOCK;
            }
            graph.clear_block_flags(
                b,
                BlockFlags::MONITOR_ENTRY | BlockFlags::MONITOR_EXIT | BlockFlags::MONITOR_BLOCK,
            );
            graph.add_block_flags(b, flags);
        }
    }
}

fn ends_with_throw(graph: &Graph, b: BlockId) -> bool {
    graph
        .block(b)
        .last_inst()
        .is_some_and(|t| graph.inst(t).opcode() == Opcode::Throw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphMode, InstId};

    fn monitor(graph: &mut Graph, block: BlockId, object: InstId, enter: bool) {
        let ss = graph.build(Opcode::SaveState, DataType::NoType).append_to(block);
        graph
            .build(Opcode::Monitor, DataType::NoType)
            .inputs(&[object, ss])
            .imm(if enter { 1i64 } else { 0i64 })
            .append_to(block);
    }

    /// enter and exit in one straight-line block.
    #[test]
    fn balanced_single_block() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let start = g.start_block();

        let obj = g.build(Opcode::Parameter, DataType::Reference).append_to(start);
        monitor(&mut g, b, obj, true);
        monitor(&mut g, b, obj, false);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(b);
        let analysis = MonitorAnalysis::build(&g);
        assert!(analysis.is_valid());
        assert!(analysis.is_entry_block(b));
        assert!(analysis.is_exit_block(b));
        assert!(!analysis.is_monitor_block(b));
        assert!(!analysis.is_entry_block(g.start_block()));
    }

    /// enter before a diamond, exit after it: every block between is a
    /// monitor block.
    #[test]
    fn balanced_across_diamond() {
        let mut g = Graph::new(GraphMode::default());
        let (top, t, f, bottom) =
            (g.create_block(), g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), top);
        g.connect(top, t);
        g.connect(top, f);
        g.connect(t, bottom);
        g.connect(f, bottom);
        g.connect(bottom, g.end_block());
        let start = g.start_block();

        let obj = g.build(Opcode::Parameter, DataType::Reference).append_to(start);
        monitor(&mut g, top, obj, true);
        let c = g.find_or_create_constant(0);
        g.build(Opcode::IfImm, DataType::NoType)
            .inputs(&[c])
            .imm(0i64)
            .cc(crate::ir::ConditionCode::Ne)
            .append_to(top);
        monitor(&mut g, bottom, obj, false);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(bottom);
        let analysis = MonitorAnalysis::build(&g);
        assert!(analysis.is_valid());
        assert!(analysis.is_monitor_block(top));
        assert!(analysis.is_monitor_block(t));
        assert!(analysis.is_monitor_block(f));
        assert!(!analysis.is_monitor_block(bottom));
    }

    /// Optional enter on one arm of a branch: the merged counts disagree.
    #[test]
    fn optional_entry_invalidates() {
        let mut g = Graph::new(GraphMode::default());
        let (top, arm, merge) = (g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), top);
        g.connect(top, arm);
        g.connect(top, merge);
        g.connect(arm, merge);
        g.connect(merge, g.end_block());
        let start = g.start_block();

        let obj = g.build(Opcode::Parameter, DataType::Reference).append_to(start);
        let c = g.find_or_create_constant(0);
        g.build(Opcode::IfImm, DataType::NoType)
            .inputs(&[c])
            .imm(0i64)
            .cc(crate::ir::ConditionCode::Ne)
            .append_to(top);
        monitor(&mut g, arm, obj, true);
        monitor(&mut g, merge, obj, false);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(merge);
        let analysis = MonitorAnalysis::build(&g);
        assert!(!analysis.is_valid());
    }

    /// Double exit along one path.
    #[test]
    fn double_exit_invalidates() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let start = g.start_block();

        let obj = g.build(Opcode::Parameter, DataType::Reference).append_to(start);
        monitor(&mut g, b, obj, true);
        monitor(&mut g, b, obj, false);
        monitor(&mut g, b, obj, false);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(b);
        let analysis = MonitorAnalysis::build(&g);
        assert!(!analysis.is_valid());
    }

    /// A throwing path may leave the monitor held.
    #[test]
    fn throw_path_is_exempt() {
        let mut g = Graph::new(GraphMode::default());
        let (top, thrower, quiet) = (g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), top);
        g.connect(top, thrower);
        g.connect(top, quiet);
        g.connect(thrower, g.end_block());
        g.connect(quiet, g.end_block());
        let start = g.start_block();

        let obj = g.build(Opcode::Parameter, DataType::Reference).append_to(start);
        monitor(&mut g, top, obj, true);
        let c = g.find_or_create_constant(0);
        g.build(Opcode::IfImm, DataType::NoType)
            .inputs(&[c])
            .imm(0i64)
            .cc(crate::ir::ConditionCode::Ne)
            .append_to(top);
        let ss = g.build(Opcode::SaveState, DataType::NoType).append_to(thrower);
        g.build(Opcode::Throw, DataType::NoType).inputs(&[obj, ss]).append_to(thrower);
        monitor(&mut g, quiet, obj, false);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(quiet);
        let analysis = MonitorAnalysis::build(&g);
        assert!(analysis.is_valid());
    }
}
