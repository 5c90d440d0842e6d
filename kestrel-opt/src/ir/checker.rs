use std::collections::HashSet;

use crate::analysis::{compute_rpo, DomTree, Liveness};

use super::basic_block::{BlockFlags, BlockId};
use super::graph::Graph;
use super::inst::{InstFlags, InstId};
use super::opcode::Opcode;

/// A violated graph invariant.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckerError {
    /// A non-phi input does not dominate its user.
    #[error("input {input} of {user} does not dominate it")]
    InputNotDominating {
        /// The input value.
        input: InstId,
        /// The consuming instruction.
        user: InstId,
    },
    /// Phi arity differs from the block's predecessor count.
    #[error("phi {phi} has {inputs} inputs but its block has {preds} predecessors")]
    PhiArityMismatch {
        /// The phi.
        phi: InstId,
        /// Its input count.
        inputs: usize,
        /// The block's predecessor count.
        preds: usize,
    },
    /// A phi input does not dominate the end of its predecessor.
    #[error("phi {phi} input {input} does not dominate the end of {pred}")]
    PhiInputNotDominating {
        /// The phi.
        phi: InstId,
        /// The offending input.
        input: InstId,
        /// The predecessor the input arrives from.
        pred: BlockId,
    },
    /// A `REQUIRE_STATE` instruction is missing its save-state input.
    #[error("{inst} requires a save state as its last input")]
    MissingSaveState {
        /// The instruction.
        inst: InstId,
    },
    /// A movable reference is live across a save state but not listed.
    #[error("{value} is live across save state {save_state} but not listed in it")]
    UnbridgedReference {
        /// The live movable value.
        value: InstId,
        /// The save state missing it.
        save_state: InstId,
    },
    /// Successor-count rule broken.
    #[error("{block} has {succs} successors but its terminator is {terminator:?}")]
    BadSuccessorCount {
        /// The block.
        block: BlockId,
        /// Its successor count.
        succs: usize,
        /// Its terminator opcode, if any.
        terminator: Option<Opcode>,
    },
    /// Asymmetric predecessor/successor edge lists.
    #[error("edge {from} -> {to} is not symmetric")]
    AsymmetricEdge {
        /// Edge source.
        from: BlockId,
        /// Edge target.
        to: BlockId,
    },
    /// In OSR mode a loop header lacks its OSR entry marking.
    #[error("loop header {block} is not an OSR entry in an OSR graph")]
    MissingOsrEntry {
        /// The header block.
        block: BlockId,
    },
}

/// Validates the structural invariants of a graph. Passes run it (in
/// debug configurations) after every transform.
pub struct GraphChecker<'a> {
    graph: &'a Graph,
}

impl<'a> GraphChecker<'a> {
    /// Creates a checker over `graph`.
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    /// Runs every check, stopping at the first violation.
    pub fn check(&self) -> Result<(), CheckerError> {
        self.check_edges()?;
        self.check_successor_counts()?;
        self.check_dominance()?;
        self.check_phis()?;
        self.check_save_states()?;
        self.check_osr()?;
        Ok(())
    }

    fn reachable(&self) -> Vec<BlockId> {
        compute_rpo(self.graph)
    }

    fn check_edges(&self) -> Result<(), CheckerError> {
        let graph = self.graph;
        for b in self.reachable() {
            for &succ in graph.block(b).succs() {
                if graph.block(succ).pred_index(b).is_none() {
                    return Err(CheckerError::AsymmetricEdge { from: b, to: succ });
                }
            }
            for &pred in graph.block(b).preds() {
                if !graph.block(pred).succs().contains(&b) {
                    return Err(CheckerError::AsymmetricEdge { from: pred, to: b });
                }
            }
        }
        Ok(())
    }

    fn check_successor_counts(&self) -> Result<(), CheckerError> {
        let graph = self.graph;
        for b in self.reachable() {
            let succs = graph.block(b).succs().len();
            let terminator = graph
                .block(b)
                .last_inst()
                .map(|t| graph.inst(t).opcode())
                .filter(|op| op.is_terminator());
            let expected = match terminator {
                Some(Opcode::If) | Some(Opcode::IfImm) => 2,
                Some(_) => 1,
                None if b == graph.end_block() => 0,
                None => 1,
            };
            if b == graph.end_block() {
                if succs != 0 {
                    return Err(CheckerError::BadSuccessorCount { block: b, succs, terminator });
                }
                continue;
            }
            // Guarded blocks carry one extra exceptional edge into their
            // handler.
            let exceptional = usize::from(graph.block(b).is_try());
            if succs != expected && succs != expected + exceptional {
                return Err(CheckerError::BadSuccessorCount { block: b, succs, terminator });
            }
        }
        Ok(())
    }

    fn check_dominance(&self) -> Result<(), CheckerError> {
        let graph = self.graph;
        let dom = DomTree::build(graph);
        for b in self.reachable() {
            for user in graph.block_insts(b) {
                for &input in graph.inst(user).inputs() {
                    if !dom.inst_dominates(graph, input, user) {
                        return Err(CheckerError::InputNotDominating { input, user });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_phis(&self) -> Result<(), CheckerError> {
        let graph = self.graph;
        let dom = DomTree::build(graph);
        for b in self.reachable() {
            let preds = graph.block(b).preds();
            for &phi in graph.block(b).phis() {
                let inputs = graph.inst(phi).inputs();
                if inputs.len() != preds.len() {
                    return Err(CheckerError::PhiArityMismatch {
                        phi,
                        inputs: inputs.len(),
                        preds: preds.len(),
                    });
                }
                for (i, &input) in inputs.iter().enumerate() {
                    let pred = preds[i];
                    let ok = match graph.inst(input).block() {
                        Some(def_block) => {
                            def_block == pred
                                || dom.dominates(def_block, pred)
                                || graph.inst(input).is_phi() && def_block == b
                        }
                        None => false,
                    };
                    if !ok {
                        return Err(CheckerError::PhiInputNotDominating { phi, input, pred });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_save_states(&self) -> Result<(), CheckerError> {
        let graph = self.graph;
        for b in self.reachable() {
            for inst in graph.block_insts(b) {
                if graph.inst(inst).flags().contains(InstFlags::REQUIRE_STATE) {
                    let ok = graph
                        .inst(inst)
                        .save_state_input()
                        .map_or(false, |ss| graph.inst(ss).is_save_state());
                    if !ok {
                        return Err(CheckerError::MissingSaveState { inst });
                    }
                }
            }
        }
        // Movable-reference completeness, via per-block backward liveness.
        let liveness = Liveness::build(graph);
        for b in self.reachable() {
            let mut live: HashSet<InstId> = liveness.live_out(b).clone();
            for inst in graph.block_insts(b).into_iter().rev() {
                if graph.inst(inst).is_save_state() {
                    for &value in &live {
                        if graph.inst(value).is_movable_value()
                            && !graph.save_state_contains(inst, value)
                        {
                            return Err(CheckerError::UnbridgedReference {
                                value,
                                save_state: inst,
                            });
                        }
                    }
                }
                live.remove(&inst);
                for &input in graph.inst(inst).inputs() {
                    live.insert(input);
                }
            }
        }
        Ok(())
    }

    fn check_osr(&self) -> Result<(), CheckerError> {
        let graph = self.graph;
        if !graph.is_osr() {
            return Ok(());
        }
        let dom = DomTree::build(graph);
        let loops = crate::analysis::LoopTree::build(graph, &dom);
        for l in loops.loops().iter().filter(|l| !l.is_root()) {
            let header = l.header.expect("non-root loop has a header");
            let is_entry = graph.block(header).flags().contains(BlockFlags::OSR_ENTRY);
            let has_osr_state = graph
                .block_insts(header)
                .iter()
                .any(|&i| graph.inst(i).opcode() == Opcode::SaveStateOsr);
            if !is_entry || !has_osr_state {
                return Err(CheckerError::MissingOsrEntry { block: header });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphMode, VReg};

    fn linear_graph() -> (Graph, BlockId) {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        (g, b)
    }

    #[test]
    fn accepts_well_formed_graph() {
        let (mut g, b) = linear_graph();
        let c = g.find_or_create_constant(1);
        let neg = g.build(Opcode::Neg, DataType::Int32).inputs(&[c]).append_to(b);
        g.build(Opcode::Return, DataType::Int32).inputs(&[neg]).append_to(b);
        GraphChecker::new(&g).check().unwrap();
    }

    #[test]
    fn rejects_missing_save_state() {
        let (mut g, b) = linear_graph();
        let size = g.find_or_create_constant(4);
        let ss = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        let cls = g
            .build(Opcode::LoadAndInitClass, DataType::Reference)
            .inputs(&[ss])
            .type_id(0)
            .append_to(b);
        // NewArray missing its save-state input.
        let arr = g.build(Opcode::NewArray, DataType::Reference).inputs(&[cls, size]).append_to(b);
        g.build(Opcode::Return, DataType::Reference).inputs(&[arr]).append_to(b);
        assert!(matches!(
            GraphChecker::new(&g).check(),
            Err(CheckerError::MissingSaveState { .. })
        ));
    }

    #[test]
    fn rejects_unbridged_movable_reference() {
        let (mut g, b) = linear_graph();
        let ss0 = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        let s = g
            .build(Opcode::LoadString, DataType::Reference)
            .inputs(&[ss0])
            .type_id(0)
            .append_to(b);
        let _ss1 = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        g.build(Opcode::Return, DataType::Reference).inputs(&[s]).append_to(b);
        assert!(matches!(
            GraphChecker::new(&g).check(),
            Err(CheckerError::UnbridgedReference { .. })
        ));
        // After bridging the same graph passes.
        crate::analysis::SaveStateBridges::fix_block(&mut g, b);
        GraphChecker::new(&g).check().unwrap();
    }

    #[test]
    fn rejects_phi_arity_mismatch() {
        let mut g = Graph::new(GraphMode::default());
        let (a, b, join) = (g.create_block(), g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, b);
        g.connect(a, join);
        g.connect(b, join);
        g.connect(join, g.end_block());
        let c = g.find_or_create_constant(0);
        g.build(Opcode::IfImm, DataType::NoType)
            .inputs(&[c])
            .imm(0i64)
            .cc(crate::ir::ConditionCode::Ne)
            .append_to(a);
        let phi = g.build(Opcode::Phi, DataType::Int64).inputs(&[c]).as_phi_of(join);
        g.build(Opcode::Return, DataType::Int64).inputs(&[phi]).append_to(join);
        assert!(matches!(
            GraphChecker::new(&g).check(),
            Err(CheckerError::PhiArityMismatch { .. })
        ));
    }

    #[test]
    fn rejects_use_before_def() {
        let mut g = Graph::new(GraphMode::default());
        let (a, b) = (g.create_block(), g.create_block());
        g.connect(g.start_block(), a);
        g.connect(a, b);
        g.connect(b, g.end_block());
        let c = g.find_or_create_constant(1);
        // The Neg lives in `b` but its user sits in `a`.
        let neg = g.build(Opcode::Neg, DataType::Int32).inputs(&[c]).append_to(b);
        g.build(Opcode::Return, DataType::Int32).inputs(&[neg]).append_to(a);
        assert!(matches!(
            GraphChecker::new(&g).check(),
            Err(CheckerError::InputNotDominating { .. })
        ));
    }

    #[test]
    fn save_state_entry_count_matches_inputs() {
        let (mut g, b) = linear_graph();
        let c = g.find_or_create_constant(1);
        let ss = g.build(Opcode::SaveState, DataType::NoType).detached();
        g.add_save_state_input(ss, c, VReg::Number(0));
        g.append_inst(ss, b);
        g.build(Opcode::ReturnVoid, DataType::NoType).append_to(b);
        GraphChecker::new(&g).check().unwrap();
        assert_eq!(g.inst(ss).inputs().len(), g.inst(ss).save_state_entries().len());
    }
}
