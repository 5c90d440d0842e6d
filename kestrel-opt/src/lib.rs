//! Bytecode optimizer of the KestrelVM.
//!
//! For each function of a [`kestrel_asm::Program`] the optimizer builds a
//! control-flow graph of SSA-like instructions ([`ir::Graph`]), runs a
//! fixed pipeline of analyses and rewriting passes over it, and lowers the
//! graph back to the textual instruction list. Passes never unwind: each
//! returns a `Result`, failures leave the function unoptimised, and the
//! [`ir::GraphChecker`] re-validates the graph between passes.

#![warn(missing_docs)]

pub mod analysis;
pub mod builder;
pub mod codegen;
pub mod driver;
pub mod ir;
pub mod passes;
pub mod testing;

pub use driver::{optimize, OptimizerConfig, OptimizeStats};
