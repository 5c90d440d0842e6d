use std::collections::BTreeSet;

use kestrel_asm::{
    AsmOpcode, Field, Function, Ins, Literal, LiteralArray, LiteralTag, LiteralValue, Metadata,
    Program, Record,
};
use kestrel_link::{link, resolve, Config, ForeignKind, ForeignRef};
use kestrel_types::Type;

fn defined_helper() -> Function {
    let mut f = Function::new("Global.helper");
    f.body_presence = true;
    f.ins = vec![
        Ins::new(AsmOpcode::Ldai).imm(1i64),
        Ins::new(AsmOpcode::Return),
    ];
    f
}

fn foreign_helper() -> Function {
    let mut f = Function::new("Global.helper");
    f.metadata.set_attribute("external", "");
    f
}

fn unit(records: Vec<Record>, functions: Vec<Function>) -> Program {
    let mut program = Program::new();
    for r in records {
        program.add_record(r);
    }
    for f in functions {
        program.add_function(f);
    }
    program
}

#[test]
fn foreign_function_resolves_against_definition() {
    let a = unit(vec![], vec![foreign_helper()]);
    let b = unit(vec![], vec![defined_helper()]);
    let result = link(&Config::default(), vec![a, b]);
    assert!(result.success(), "{:?}", result.errors);
    let merged = result.program.function("Global.helper:()").unwrap();
    assert!(!merged.metadata.is_foreign());
    assert_eq!(merged.ins.len(), 2);
}

#[test]
fn identical_duplicate_definitions_deduplicate() {
    let a = unit(vec![], vec![defined_helper()]);
    let b = unit(vec![], vec![defined_helper()]);
    let result = link(&Config::default(), vec![a, b]);
    assert!(result.success(), "{:?}", result.errors);
    assert_eq!(result.stats.deduplicated_foreigners, 1);
}

#[test]
fn conflicting_definitions_are_an_error() {
    let a = unit(vec![], vec![defined_helper()]);
    let mut other = defined_helper();
    other.ins.insert(0, Ins::new(AsmOpcode::Nop));
    let b = unit(vec![], vec![other]);
    let result = link(&Config::default(), vec![a, b]);
    assert!(!result.success());
    assert!(result.errors[0].contains("conflicting"));
}

#[test]
fn unresolved_reference_is_an_error_unless_allow_listed() {
    let a = unit(vec![], vec![foreign_helper()]);
    let result = link(&Config::default(), vec![a.clone()]);
    assert!(!result.success());
    assert!(result.errors[0].contains("unresolved"));

    let config = Config {
        remains_partial: BTreeSet::from(["Global".to_string()]),
        ..Config::default()
    };
    let result = link(&config, vec![a]);
    assert!(result.success(), "{:?}", result.errors);
}

#[test]
fn partial_records_merge_their_fields() {
    let mut left = Record::new("For");
    left.fields.push(Field::new("x", Type::from_name("i32")));
    let mut right = Record::new("For");
    right.fields.push(Field::new("y", Type::from_name("f64")));
    let config = Config {
        partial: BTreeSet::from(["For".to_string()]),
        ..Config::default()
    };
    let result = link(&config, vec![unit(vec![left], vec![]), unit(vec![right], vec![])]);
    assert!(result.success(), "{:?}", result.errors);
    let merged = result.program.record("For").unwrap();
    assert_eq!(merged.fields.len(), 2);
    assert!(merged.field("x").is_some());
    assert!(merged.field("y").is_some());
}

#[test]
fn overlapping_record_without_partial_is_an_error() {
    let left = Record::new("For");
    let right = Record::new("For");
    let result = link(
        &Config::default(),
        vec![unit(vec![left], vec![]), unit(vec![right], vec![])],
    );
    assert!(!result.success());
}

#[test]
fn debug_info_is_counted_and_strippable() {
    let mut f = defined_helper();
    f.ins[0].debug.set_line(12);
    f.ins[1].debug.set_line(13);
    let a = unit(vec![], vec![f.clone()]);
    let b = unit(vec![], vec![f]);

    let result = link(&Config::default(), vec![a.clone(), b.clone()]);
    assert!(result.success(), "{:?}", result.errors);
    assert_eq!(result.stats.debug_count, 1);

    let config = Config { strip_debug_info: true, ..Config::default() };
    let result = link(&config, vec![a, b]);
    assert_eq!(result.stats.debug_count, 0);
    let merged = result.program.function("Global.helper:()").unwrap();
    assert!(!merged.has_debug_info());
}

#[test]
fn output_is_independent_of_input_order() {
    let mut lit = Program::new();
    lit.add_literal_array(
        "0",
        LiteralArray::with_intro(vec![Literal {
            tag: LiteralTag::ArrayI32,
            value: LiteralValue::U32(7),
        }]),
    );
    let mut f = Function::new("uses.array");
    f.body_presence = true;
    f.ins = vec![Ins::new(AsmOpcode::LdaConst).id("0"), Ins::new(AsmOpcode::Return)];
    lit.add_function(f);

    let mut other = Program::new();
    other.add_record(Record::new("Alpha"));
    other.add_function(defined_helper());
    other.strings.insert("greeting".to_string());

    let forward = link(&Config::default(), vec![lit.clone(), other.clone()]);
    let backward = link(&Config::default(), vec![other, lit]);
    assert!(forward.success() && backward.success());
    let fwd = serde_json::to_string(&forward.program).unwrap();
    let bwd = serde_json::to_string(&backward.program).unwrap();
    assert_eq!(fwd, bwd);
    assert_eq!(forward.program.json_dump(), backward.program.json_dump());
}

#[test]
fn resolve_reports_unique_matches_and_failures() {
    let result = link(&Config::default(), vec![unit(vec![Record::new("A")], vec![defined_helper()])]);
    let program = &result.program;
    assert_eq!(
        resolve(
            program,
            &ForeignRef {
                record: "A".to_string(),
                kind: ForeignKind::Class,
                signature: String::new(),
            }
        ),
        Ok("A".to_string())
    );
    assert!(resolve(
        program,
        &ForeignRef {
            record: "Global".to_string(),
            kind: ForeignKind::Method,
            signature: "Global.helper:()".to_string(),
        }
    )
    .is_ok());
    assert!(resolve(
        program,
        &ForeignRef {
            record: "Global".to_string(),
            kind: ForeignKind::Method,
            signature: "Global.missing:()".to_string(),
        }
    )
    .is_err());
}
