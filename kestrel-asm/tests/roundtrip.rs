//! Serialization round-trips preserve every behaviour-observable field.

use kestrel_asm::{
    AsmOpcode, CatchBlock, Field, Function, Ins, Literal, LiteralArray, LiteralTag, LiteralValue,
    Metadata, Parameter, Program, Record,
};
use kestrel_types::Type;

fn sample_program() -> Program {
    let mut program = Program::new();

    let mut record = Record::new("app.Point");
    record.fields.push(Field::new("x", Type::from_name("i32")));
    record.fields.push(Field::new("y", Type::from_name("i32")));
    record.metadata.set_attribute("ets.extends", "std.core.Object");
    program.add_record(record);

    let mut f = Function::new("app.Point.norm");
    f.params.push(Parameter::new(Type::from_name("app.Point")));
    f.return_type = Type::from_name("i32");
    f.regs_num = 4;
    f.body_presence = true;
    let mut first = Ins::new(AsmOpcode::Ldobj).reg(4).id("app.Point.x");
    first.debug.set_line(3);
    f.ins.push(first);
    f.ins.push(Ins::new(AsmOpcode::Sta).reg(0));
    f.ins.push(Ins::new(AsmOpcode::Lda).reg(0).with_label("done"));
    f.ins.push(Ins::new(AsmOpcode::Return));
    f.define_label("done", Some(5));
    f.catch_blocks.push(CatchBlock {
        exception_record: "std.core.Exception".to_string(),
        try_begin_label: "t0".to_string(),
        try_end_label: "t1".to_string(),
        catch_begin_label: "h0".to_string(),
        catch_end_label: "h1".to_string(),
    });
    program.add_function(f);

    program.add_literal_array(
        "0",
        LiteralArray::with_intro(vec![
            Literal { tag: LiteralTag::ArrayI32, value: LiteralValue::U32(1) },
            Literal { tag: LiteralTag::ArrayI32, value: LiteralValue::U32(2) },
        ]),
    );
    program.strings.insert("hello".to_string());
    program.array_types.insert(Type::from_name("i32[]"));
    program
}

#[test]
fn serde_round_trip_preserves_the_program() {
    let program = sample_program();
    let json = serde_json::to_string(&program).unwrap();
    let back: Program = serde_json::from_str(&json).unwrap();

    // Tables come back in order with their content intact.
    let names: Vec<_> = back.functions().map(|(n, _)| n.to_string()).collect();
    assert_eq!(names, ["app.Point.norm:(app.Point)"]);
    let f = back.function("app.Point.norm:(app.Point)").unwrap();
    assert_eq!(f.ins.len(), 4);
    assert_eq!(f.ins[0].debug.line_number, 3);
    assert_eq!(f.ins[2].label.as_deref(), Some("done"));
    assert_eq!(f.catch_blocks.len(), 1);
    assert_eq!(f.catch_blocks[0].try_begin_label, "t0");
    assert!(f.label_table.contains_key("done"));

    let record = back.record("app.Point").unwrap();
    assert_eq!(record.fields.len(), 2);
    assert_eq!(record.metadata.attribute("ets.extends"), Some("std.core.Object"));

    let array = back.literal_array("0").unwrap();
    assert_eq!(array.len(), 2);
    assert!(back.strings.contains("hello"));
    assert!(back.array_types.contains(&Type::from_name("i32[]")));

    // A second trip is byte-identical.
    assert_eq!(serde_json::to_string(&back).unwrap(), json);
    assert_eq!(back.json_dump(), program.json_dump());
}

#[test]
fn lookups_survive_deserialization() {
    let program = sample_program();
    let json = serde_json::to_string(&program).unwrap();
    let back: Program = serde_json::from_str(&json).unwrap();
    // The name index is rebuilt, not serialized.
    assert!(back.function("app.Point.norm:(app.Point)").is_some());
    assert!(back.record("app.Point").is_some());
    assert!(back.record("app.Missing").is_none());
}
