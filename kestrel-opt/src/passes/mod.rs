//! Optimization passes.
//!
//! Passes are `Result`-typed: a failure leaves the graph untouched from
//! the caller's point of view (the driver drops the optimised graph and
//! keeps the function's original instruction list). The boolean result
//! reports whether anything changed, which the driver logs.

mod checks_elimination;
mod cleanup;
mod const_array_resolver;
mod cse;
mod simplify_string_builder;
mod vn;

pub use checks_elimination::ChecksElimination;
pub use cleanup::Cleanup;
pub use const_array_resolver::ConstArrayResolver;
pub use cse::Cse;
pub use simplify_string_builder::SimplifyStringBuilder;
pub use vn::ValNum;

use kestrel_asm::Program;

use crate::ir::{CheckerError, Graph};

/// Error surface of a pass run.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// A function-level limit was exceeded; the function stays
    /// unoptimised.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    /// The graph failed validation after the pass.
    #[error("invariant violated after {pass}: {source}")]
    Invariant {
        /// The offending pass.
        pass: &'static str,
        /// The violated invariant.
        #[source]
        source: CheckerError,
    },
}

/// Shared mutable context passes may need besides the graph. Only the
/// literal-array resolver touches the program.
pub struct PassContext<'a> {
    /// The owning program, for passes that register program-level data.
    pub program: Option<&'a mut Program>,
}

impl PassContext<'_> {
    /// A context without program access, as used in graph-only tests.
    pub fn detached() -> PassContext<'static> {
        PassContext { program: None }
    }
}

/// A graph-rewriting pass.
pub trait Pass {
    /// Stable pass name for logs.
    fn name(&self) -> &'static str;

    /// Runs the pass; returns whether the graph changed.
    fn run(&mut self, graph: &mut Graph, ctx: &mut PassContext<'_>) -> Result<bool, PassError>;
}
