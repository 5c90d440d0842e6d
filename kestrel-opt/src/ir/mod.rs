//! The per-function intermediate representation.
//!
//! A [`Graph`] owns densely indexed arenas of [`BasicBlock`]s and
//! instructions. Instructions reference each other by [`InstId`]; blocks
//! keep their instructions in an intrusive doubly-linked list and their
//! phis in a separate list. Every mutation that touches a def-use edge
//! goes through the graph so both directions stay in sync.

mod basic_block;
mod checker;
mod datatype;
mod graph;
mod inst;
mod opcode;

pub use basic_block::{BasicBlock, BlockFlags, BlockId};
pub use checker::{CheckerError, GraphChecker};
pub use datatype::DataType;
pub use graph::{Graph, GraphMode, InstBuilder};
pub use inst::{
    ConditionCode, DeoptReason, Imm, Inst, InstFlags, InstId, IntrinsicId, SaveStateEntry, VReg,
};
pub use opcode::Opcode;
