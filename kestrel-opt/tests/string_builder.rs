//! StringBuilder simplification: read-only builders, concatenation
//! chains, accumulator loops.

use kestrel_opt::ir::{
    ConditionCode, DataType, GraphChecker, IntrinsicId, Opcode, VReg,
};
use kestrel_opt::passes::{Pass, PassContext, SimplifyStringBuilder};
use kestrel_opt::testing::{compare_graphs, TestGraph, END};

fn run_pass(graph: &mut kestrel_opt::ir::Graph) -> bool {
    let changed = SimplifyStringBuilder::default()
        .run(graph, &mut PassContext::detached())
        .unwrap();
    GraphChecker::new(graph).check().unwrap();
    changed
}

/// `new StringBuilder(s).toString()` is `s`.
#[test]
fn read_only_builder_collapses_to_its_argument() {
    let mut t = TestGraph::new();
    t.parameter(0, DataType::Reference);
    t.bb(2, &[END]);
    t.inst(1, Opcode::SaveState, DataType::NoType).inputs(&[0]).vregs(&[0]);
    t.inst(2, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtorString)
        .inputs(&[0, 1]);
    t.inst(3, Opcode::SaveState, DataType::NoType).inputs(&[0]).vregs(&[0]);
    t.inst(4, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[2, 3]);
    t.inst(5, Opcode::Return, DataType::Reference).inputs(&[4]);
    let mut graph = t.finish();
    assert!(run_pass(&mut graph));

    let mut e = TestGraph::new();
    e.parameter(0, DataType::Reference);
    e.bb(2, &[END]);
    e.inst(1, Opcode::SaveState, DataType::NoType).inputs(&[0]).vregs(&[0]);
    e.inst(3, Opcode::SaveState, DataType::NoType).inputs(&[0]).vregs(&[0]);
    e.inst(5, Opcode::Return, DataType::Reference).inputs(&[0]);
    compare_graphs(&graph, &e.finish()).unwrap();
}

/// An append keeps the builder alive: no collapse.
#[test]
fn appended_builder_is_kept() {
    let mut t = TestGraph::new();
    t.parameter(0, DataType::Reference).parameter(1, DataType::Reference);
    t.bb(2, &[END]);
    t.inst(2, Opcode::SaveState, DataType::NoType).inputs(&[0, 1]).vregs(&[0, 1]);
    t.inst(3, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtorString)
        .inputs(&[0, 2]);
    t.inst(4, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[3, 1, 2]);
    t.inst(5, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[3, 2]);
    t.inst(6, Opcode::Return, DataType::Reference).inputs(&[5]);
    let mut graph = t.finish();
    assert!(!run_pass(&mut graph));
}

/// Two appends and one `toString` become a single concatenation carrying
/// a clone of the `toString` save state.
#[test]
fn append_chain_becomes_concat() {
    let mut t = TestGraph::new();
    t.parameter(10, DataType::Reference).parameter(11, DataType::Reference);
    t.bb(2, &[END]);
    t.inst(1, Opcode::SaveState, DataType::NoType).inputs(&[10, 11]).vregs(&[0, 1]);
    t.inst(2, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtor)
        .inputs(&[1]);
    t.inst(3, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[2, 10, 1]);
    t.inst(4, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[2, 11, 1]);
    t.inst(5, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[2, 1]);
    t.inst(6, Opcode::Return, DataType::Reference).inputs(&[5]);
    let mut graph = t.finish();
    assert!(run_pass(&mut graph));

    let mut e = TestGraph::new();
    e.parameter(10, DataType::Reference).parameter(11, DataType::Reference);
    e.bb(2, &[END]);
    e.inst(1, Opcode::SaveState, DataType::NoType).inputs(&[10, 11]).vregs(&[0, 1]);
    e.inst(20, Opcode::SaveState, DataType::NoType).inputs(&[10, 11]).vregs(&[0, 1]);
    e.inst(21, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::ConcatStrings)
        .inputs(&[10, 11, 20]);
    e.inst(6, Opcode::Return, DataType::Reference).inputs(&[21]);
    compare_graphs(&graph, &e.finish()).unwrap();
}

/// Four appends produce the balanced `(a+b)+(c+d)` tree.
#[test]
fn four_appends_build_a_balanced_tree() {
    let mut t = TestGraph::new();
    t.parameter(10, DataType::Reference)
        .parameter(11, DataType::Reference)
        .parameter(12, DataType::Reference)
        .parameter(13, DataType::Reference);
    t.bb(2, &[END]);
    t.inst(1, Opcode::SaveState, DataType::NoType)
        .inputs(&[10, 11, 12, 13])
        .vregs(&[0, 1, 2, 3]);
    t.inst(2, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtor)
        .inputs(&[1]);
    t.inst(3, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[2, 10, 1]);
    t.inst(4, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[2, 11, 1]);
    t.inst(5, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[2, 12, 1]);
    t.inst(6, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[2, 13, 1]);
    t.inst(7, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[2, 1]);
    t.inst(8, Opcode::Return, DataType::Reference).inputs(&[7]);
    let mut graph = t.finish();
    assert!(run_pass(&mut graph));

    let concats: Vec<_> = graph
        .block_ids()
        .iter()
        .flat_map(|&b| graph.block_insts(b))
        .filter(|&i| graph.inst(i).intrinsic() == Some(IntrinsicId::ConcatStrings))
        .collect();
    assert_eq!(concats.len(), 3);
    // The final concat merges the two partial ones.
    let last = *concats.last().unwrap();
    assert_eq!(graph.inst(last).input(0), concats[0]);
    assert_eq!(graph.inst(last).input(1), concats[1]);
}

/// `sb2.append(sb1.toString())` with a single-append inner builder
/// appends the inner value directly.
#[test]
fn cascaded_builders_flatten() {
    let mut t = TestGraph::new();
    t.parameter(10, DataType::Reference).parameter(11, DataType::Reference);
    t.bb(2, &[END]);
    t.inst(1, Opcode::SaveState, DataType::NoType).inputs(&[10, 11]).vregs(&[0, 1]);
    // Inner builder holding one value.
    t.inst(2, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtor)
        .inputs(&[1]);
    t.inst(3, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[2, 10, 1]);
    t.inst(4, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[2, 1]);
    // Outer builder consuming the inner result.
    t.inst(5, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtor)
        .inputs(&[1]);
    t.inst(6, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[5, 4, 1]);
    t.inst(7, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[5, 11, 1]);
    t.inst(8, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[5, 1]);
    t.inst(9, Opcode::Return, DataType::Reference).inputs(&[8]);
    let mut graph = t.finish();
    assert!(run_pass(&mut graph));
    // The inner chain is gone and the outer chain concatenates the raw
    // values.
    let concats: Vec<_> = graph
        .block_ids()
        .iter()
        .flat_map(|&b| graph.block_insts(b))
        .filter(|&i| graph.inst(i).intrinsic() == Some(IntrinsicId::ConcatStrings))
        .collect();
    assert_eq!(concats.len(), 1);
    let concat = concats[0];
    let p10 = graph.inst(concat).input(0);
    let p11 = graph.inst(concat).input(1);
    assert_eq!(graph.inst(p10).opcode(), Opcode::Parameter);
    assert_eq!(graph.inst(p11).opcode(), Opcode::Parameter);
}

/// Scenario: `for (i = 0; i < n; i++) s += a` hoists the builder to the
/// preheader and reads it back after the loop.
#[test]
fn accumulator_loop_hoists_builder() {
    let mut t = TestGraph::new();
    t.parameter(0, DataType::Reference).parameter(1, DataType::Reference);
    t.constant(2, 0).constant(3, 1).constant(4, 10);
    t.bb(2, &[3]);
    t.inst(5, Opcode::SaveState, DataType::NoType).inputs(&[0]).vregs(&[0]);
    t.inst(6, Opcode::SaveStateDeoptimize, DataType::NoType).inputs(&[0]).vregs(&[0]);
    t.bb(3, &[4, 5]);
    t.inst(7, Opcode::Phi, DataType::Reference).inputs(&[0, 12]);
    t.inst(8, Opcode::Phi, DataType::Int32).inputs(&[2, 13]);
    t.inst(9, Opcode::Compare, DataType::Bool).inputs(&[8, 4]).cc(ConditionCode::Lt);
    t.inst(10, Opcode::IfImm, DataType::NoType).inputs(&[9]).imm(0).cc(ConditionCode::Ne);
    t.bb(4, &[3]);
    t.inst(11, Opcode::SaveState, DataType::NoType).inputs(&[7]).vregs(&[0]);
    t.inst(20, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtor)
        .inputs(&[11]);
    t.inst(21, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[20, 7, 11]);
    t.inst(22, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[20, 1, 11]);
    t.inst(12, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[20, 11]);
    t.inst(13, Opcode::Add, DataType::Int32).inputs(&[8, 3]);
    t.bb(5, &[END]);
    t.inst(14, Opcode::Return, DataType::Reference).inputs(&[7]);
    let mut graph = t.finish();
    assert!(run_pass(&mut graph));

    let mut e = TestGraph::new();
    e.parameter(0, DataType::Reference).parameter(1, DataType::Reference);
    e.constant(2, 0).constant(3, 1).constant(4, 10);
    e.bb(2, &[3]);
    e.inst(5, Opcode::SaveState, DataType::NoType).inputs(&[0]).vregs(&[0]);
    e.inst(6, Opcode::SaveStateDeoptimize, DataType::NoType).inputs(&[0]).vregs(&[0]);
    e.inst(20, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtor)
        .inputs(&[6]);
    e.inst(30, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[20, 0, 6]);
    e.bb(3, &[4, 5]);
    e.inst(8, Opcode::Phi, DataType::Int32).inputs(&[2, 13]);
    e.inst(9, Opcode::Compare, DataType::Bool).inputs(&[8, 4]).cc(ConditionCode::Lt);
    e.inst(10, Opcode::IfImm, DataType::NoType).inputs(&[9]).imm(0).cc(ConditionCode::Ne);
    e.bb(4, &[3]);
    e.inst(11, Opcode::SaveState, DataType::NoType)
        .inputs(&[20])
        .raw_vregs(&[VReg::Bridge]);
    e.inst(22, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderAppendString)
        .inputs(&[20, 1, 11]);
    e.inst(13, Opcode::Add, DataType::Int32).inputs(&[8, 3]);
    e.bb(5, &[END]);
    e.inst(31, Opcode::SaveState, DataType::NoType)
        .inputs(&[20])
        .raw_vregs(&[VReg::Bridge]);
    e.inst(12, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[20, 31]);
    e.inst(14, Opcode::Return, DataType::Reference).inputs(&[12]);
    compare_graphs(&graph, &e.finish()).unwrap();

    // Running the pass again changes nothing.
    assert!(!run_pass(&mut graph));
}

/// Try regions disable every rewrite.
#[test]
fn guarded_regions_are_left_alone() {
    use kestrel_opt::ir::BlockFlags;
    let mut t = TestGraph::new();
    t.parameter(0, DataType::Reference);
    t.bb_flagged(2, &[END], BlockFlags::TRY);
    t.inst(1, Opcode::SaveState, DataType::NoType).inputs(&[0]).vregs(&[0]);
    t.inst(2, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderCtorString)
        .inputs(&[0, 1]);
    t.inst(3, Opcode::Intrinsic, DataType::Reference)
        .intrinsic(IntrinsicId::StringBuilderToString)
        .inputs(&[2, 1]);
    t.inst(4, Opcode::Return, DataType::Reference).inputs(&[3]);
    let mut graph = t.finish();
    assert!(!run_pass(&mut graph));
}
