//! Constant-array resolution into program literal arrays.

use kestrel_asm::{LiteralTag, LiteralValue, Program};
use kestrel_opt::ir::{DataType, GraphChecker, Opcode};
use kestrel_opt::passes::{ConstArrayResolver, Pass, PassContext};
use kestrel_opt::testing::{compare_graphs, TestGraph, END};

fn run_resolver(graph: &mut kestrel_opt::ir::Graph, program: &mut Program) -> bool {
    let mut ctx = PassContext { program: Some(program) };
    let changed = ConstArrayResolver::default().run(graph, &mut ctx).unwrap();
    GraphChecker::new(graph).check().unwrap();
    changed
}

fn filled_array_graph() -> kestrel_opt::ir::Graph {
    let mut t = TestGraph::new();
    t.types(&["i32[]"]);
    t.constant(0, 3);
    t.constant(1, 0).constant(2, 1).constant(3, 2);
    t.constant(4, 1).constant(5, 2).constant(6, 3);
    t.bb(2, &[END]);
    t.inst(7, Opcode::SaveState, DataType::NoType);
    t.inst(8, Opcode::LoadAndInitClass, DataType::Reference).inputs(&[7]).type_id(0);
    t.inst(9, Opcode::NewArray, DataType::Reference).inputs(&[8, 0, 7]).type_id(0);
    t.inst(10, Opcode::StoreArray, DataType::NoType).inputs(&[9, 1, 4]);
    t.inst(11, Opcode::StoreArray, DataType::NoType).inputs(&[9, 2, 5]);
    t.inst(12, Opcode::StoreArray, DataType::NoType).inputs(&[9, 3, 6]);
    t.inst(14, Opcode::Return, DataType::Reference).inputs(&[9]);
    t.finish()
}

/// `NewArray(3)` plus three constant stores becomes one literal-array
/// load; the table entry carries the tag, length and values.
#[test]
fn resolves_filled_constant_array() {
    let mut graph = filled_array_graph();
    let mut program = Program::new();
    assert!(run_resolver(&mut graph, &mut program));

    assert_eq!(program.literal_array_count(), 1);
    let array = program.literal_array("0").unwrap();
    assert_eq!(array.element_tag(), Some(LiteralTag::ArrayI32));
    assert_eq!(array.len(), 3);
    let values: Vec<&LiteralValue> = array.literals[2..].iter().map(|l| &l.value).collect();
    assert_eq!(
        values,
        [&LiteralValue::U32(1), &LiteralValue::U32(2), &LiteralValue::U32(3)]
    );

    let mut e = TestGraph::new();
    e.types(&["i32[]"]);
    e.constant(0, 3);
    e.constant(1, 0).constant(2, 1).constant(3, 2);
    e.constant(4, 1).constant(5, 2).constant(6, 3);
    e.bb(2, &[END]);
    e.inst(7, Opcode::SaveState, DataType::NoType);
    e.inst(8, Opcode::LoadAndInitClass, DataType::Reference).inputs(&[7]).type_id(0);
    e.inst(20, Opcode::SaveState, DataType::NoType);
    e.inst(21, Opcode::LoadConstArray, DataType::Reference).inputs(&[20]).type_id(0);
    e.inst(14, Opcode::Return, DataType::Reference).inputs(&[21]);
    compare_graphs(&graph, &e.finish()).unwrap();
}

/// An incomplete fill keeps the allocation.
#[test]
fn partial_fill_is_left_alone() {
    let mut t = TestGraph::new();
    t.types(&["i32[]"]);
    t.constant(0, 3);
    t.constant(1, 0).constant(4, 1);
    t.bb(2, &[END]);
    t.inst(7, Opcode::SaveState, DataType::NoType);
    t.inst(8, Opcode::LoadAndInitClass, DataType::Reference).inputs(&[7]).type_id(0);
    t.inst(9, Opcode::NewArray, DataType::Reference).inputs(&[8, 0, 7]).type_id(0);
    t.inst(10, Opcode::StoreArray, DataType::NoType).inputs(&[9, 1, 4]);
    t.inst(14, Opcode::Return, DataType::Reference).inputs(&[9]);
    let mut graph = t.finish();
    let mut program = Program::new();
    assert!(!run_resolver(&mut graph, &mut program));
    assert_eq!(program.literal_array_count(), 0);
}

/// A store with a non-constant value aborts the patch.
#[test]
fn runtime_value_aborts_the_patch() {
    let mut t = TestGraph::new();
    t.types(&["i32[]"]);
    t.parameter(30, DataType::Int32);
    t.constant(0, 2);
    t.constant(1, 0).constant(2, 1);
    t.constant(4, 1);
    t.bb(2, &[END]);
    t.inst(7, Opcode::SaveState, DataType::NoType);
    t.inst(8, Opcode::LoadAndInitClass, DataType::Reference).inputs(&[7]).type_id(0);
    t.inst(9, Opcode::NewArray, DataType::Reference).inputs(&[8, 0, 7]).type_id(0);
    t.inst(10, Opcode::StoreArray, DataType::NoType).inputs(&[9, 1, 4]);
    t.inst(11, Opcode::StoreArray, DataType::NoType).inputs(&[9, 2, 30]);
    t.inst(14, Opcode::Return, DataType::Reference).inputs(&[9]);
    let mut graph = t.finish();
    let mut program = Program::new();
    assert!(!run_resolver(&mut graph, &mut program));
}

/// Rank-two arrays are not encodable.
#[test]
fn multidimensional_arrays_are_skipped() {
    let mut t = TestGraph::new();
    t.types(&["i32[][]"]);
    t.constant(0, 2);
    t.constant(1, 0).constant(2, 1);
    t.constant(4, 1).constant(5, 2);
    t.bb(2, &[END]);
    t.inst(7, Opcode::SaveState, DataType::NoType);
    t.inst(8, Opcode::LoadAndInitClass, DataType::Reference).inputs(&[7]).type_id(0);
    t.inst(9, Opcode::NewArray, DataType::Reference).inputs(&[8, 0, 7]).type_id(0);
    t.inst(10, Opcode::StoreArray, DataType::NoType).inputs(&[9, 1, 4]);
    t.inst(11, Opcode::StoreArray, DataType::NoType).inputs(&[9, 2, 5]);
    t.inst(14, Opcode::Return, DataType::Reference).inputs(&[9]);
    let mut graph = t.finish();
    let mut program = Program::new();
    assert!(!run_resolver(&mut graph, &mut program));
}

/// String elements produce an `ArrayString` literal array.
#[test]
fn string_arrays_are_encodable() {
    let mut t = TestGraph::new();
    t.types(&["std.core.String[]"]);
    t.string_table(&["ab", "cd"]);
    t.constant(0, 2);
    t.constant(1, 0).constant(2, 1);
    t.bb(2, &[END]);
    t.inst(7, Opcode::SaveState, DataType::NoType);
    t.inst(8, Opcode::LoadAndInitClass, DataType::Reference).inputs(&[7]).type_id(0);
    t.inst(9, Opcode::NewArray, DataType::Reference).inputs(&[8, 0, 7]).type_id(0);
    t.inst(15, Opcode::LoadString, DataType::Reference).inputs(&[7]).type_id(0);
    t.inst(10, Opcode::StoreArray, DataType::NoType).inputs(&[9, 1, 15]);
    t.inst(16, Opcode::LoadString, DataType::Reference).inputs(&[7]).type_id(1);
    t.inst(11, Opcode::StoreArray, DataType::NoType).inputs(&[9, 2, 16]);
    t.inst(14, Opcode::Return, DataType::Reference).inputs(&[9]);
    let mut graph = t.finish();
    let mut program = Program::new();
    assert!(run_resolver(&mut graph, &mut program));
    let array = program.literal_array("0").unwrap();
    assert_eq!(array.element_tag(), Some(LiteralTag::ArrayString));
    assert_eq!(array.literals[2].value, LiteralValue::String("ab".to_string()));
    assert_eq!(array.literals[3].value, LiteralValue::String("cd".to_string()));
}

/// Ids continue from the existing table size.
#[test]
fn new_ids_extend_the_table() {
    let mut graph = filled_array_graph();
    let mut program = Program::new();
    program.add_literal_array("0", kestrel_asm::LiteralArray::default());
    assert!(run_resolver(&mut graph, &mut program));
    assert_eq!(program.literal_array_count(), 2);
    assert!(program.literal_array("1").is_some());
}
