//! Per-program optimization driver.
//!
//! Functions are processed one at a time: graph construction, the fixed
//! pass pipeline, validation, lowering. Any failure along the way leaves
//! that function's original instruction list in place; optimization is
//! never fatal to the compilation.

use kestrel_asm::{Metadata, Program};
use tracing::{debug, warn};

use crate::builder::build_graph;
use crate::codegen;
use crate::ir::GraphChecker;
use crate::passes::{
    ChecksElimination, Cleanup, ConstArrayResolver, Cse, Pass, PassContext, SimplifyStringBuilder,
    ValNum,
};

/// Pass toggles and debugging knobs. Passed by reference; there is no
/// ambient configuration.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Run the check-elimination pass.
    pub checks_elimination: bool,
    /// Run the string-builder simplification pass.
    pub simplify_string_builder: bool,
    /// Run the constant-array resolver.
    pub const_array_resolver: bool,
    /// Validate the graph after every pass.
    pub verify_after_each_pass: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            checks_elimination: true,
            simplify_string_builder: true,
            const_array_resolver: true,
            verify_after_each_pass: cfg!(debug_assertions),
        }
    }
}

/// Counters reported back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    /// Functions whose bodies were replaced.
    pub optimized: usize,
    /// Functions without a suitable body.
    pub skipped: usize,
    /// Functions where a pass, the checker or lowering gave up.
    pub failed: usize,
}

fn pipeline(config: &OptimizerConfig) -> Vec<Box<dyn Pass>> {
    let mut passes: Vec<Box<dyn Pass>> = vec![
        Box::new(Cleanup),
        Box::new(ValNum::default()),
        Box::new(Cleanup),
        Box::new(Cse::default()),
    ];
    if config.checks_elimination {
        passes.push(Box::new(ChecksElimination::default()));
        passes.push(Box::new(Cleanup));
    }
    if config.simplify_string_builder {
        passes.push(Box::new(SimplifyStringBuilder::default()));
        passes.push(Box::new(Cleanup));
    }
    if config.const_array_resolver {
        passes.push(Box::new(ConstArrayResolver::default()));
        passes.push(Box::new(Cleanup));
    }
    passes
}

/// Optimizes every defined function of the program in place.
pub fn optimize(program: &mut Program, config: &OptimizerConfig) -> OptimizeStats {
    let mut stats = OptimizeStats::default();
    let names: Vec<String> = program.functions().map(|(n, _)| n.to_string()).collect();
    for name in names {
        let Some(func) = program.function(&name) else { continue };
        if !func.body_presence && func.ins.is_empty() {
            stats.skipped += 1;
            continue;
        }
        if func.metadata.is_foreign() || func.ins.is_empty() {
            stats.skipped += 1;
            continue;
        }
        let mut graph = match build_graph(func) {
            Ok(graph) => graph,
            Err(err) => {
                warn!(function = %name, %err, "graph construction failed");
                stats.skipped += 1;
                continue;
            }
        };
        let mut healthy = true;
        for mut pass in pipeline(config) {
            let mut ctx = PassContext { program: Some(program) };
            match pass.run(&mut graph, &mut ctx) {
                Ok(changed) => {
                    debug!(function = %name, pass = pass.name(), changed, "pass finished");
                }
                Err(err) => {
                    warn!(function = %name, pass = pass.name(), %err, "pass failed");
                    healthy = false;
                    break;
                }
            }
            if config.verify_after_each_pass {
                if let Err(err) = GraphChecker::new(&graph).check() {
                    warn!(function = %name, pass = pass.name(), %err, "invariant violated");
                    healthy = false;
                    break;
                }
            }
        }
        if !healthy {
            stats.failed += 1;
            continue;
        }
        match codegen::lower(&graph) {
            Ok(lowered) => {
                let func = program.function_mut(&name).expect("function still present");
                func.ins = lowered.ins;
                func.regs_num = lowered.regs_num;
                stats.optimized += 1;
            }
            Err(err) => {
                warn!(function = %name, %err, "lowering failed, keeping original body");
                stats.failed += 1;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_asm::{AsmOpcode as A, Function, Ins};

    fn program_with(body: Vec<Ins>) -> Program {
        let mut program = Program::new();
        let mut f = Function::new("main");
        f.regs_num = 8;
        f.body_presence = true;
        f.ins = body;
        program.add_function(f);
        program
    }

    #[test]
    fn optimizes_simple_function() {
        let mut program = program_with(vec![
            Ins::new(A::Ldai).imm(4i64),
            Ins::new(A::Sta).reg(0),
            Ins::new(A::Ldai).imm(3i64),
            Ins::new(A::Add2).reg(0),
            Ins::new(A::Return),
        ]);
        let stats = optimize(&mut program, &OptimizerConfig::default());
        assert_eq!(stats.optimized, 1);
        assert_eq!(stats.failed, 0);
        let func = program.function("main:()").unwrap();
        assert!(!func.ins.is_empty());
    }

    #[test]
    fn foreign_functions_are_skipped() {
        let mut program = Program::new();
        let mut f = Function::new("ext");
        f.metadata.set_attribute("external", "");
        program.add_function(f);
        let stats = optimize(&mut program, &OptimizerConfig::default());
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.optimized, 0);
    }

    #[test]
    fn unsupported_body_keeps_original_ins() {
        // Reads an undefined register: construction fails, body survives.
        let body = vec![Ins::new(A::Lda).reg(5), Ins::new(A::Return)];
        let mut program = program_with(body.clone());
        let stats = optimize(&mut program, &OptimizerConfig::default());
        assert_eq!(stats.skipped, 1);
        let func = program.function("main:()").unwrap();
        assert_eq!(func.ins.len(), body.len());
    }
}
