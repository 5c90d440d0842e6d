//! Static linker core of the KestrelVM.
//!
//! Consumes an ordered list of compiled units and produces one merged
//! [`Program`]: foreign references are resolved against the union of
//! defining symbols, duplicate definitions are de-duplicated, partial
//! classes are merged field-by-field, and debug info is de-duplicated or
//! stripped. The output is independent of input order: all merged tables
//! are emitted sorted by canonicalised name.

#![warn(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, HashSet};

use itertools::Itertools;
use kestrel_asm::{Function, Metadata, Program, Record};
use tracing::debug;

/// Linker options, parsed by the CLI driver and passed by reference.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Records whose fields may be defined across several inputs.
    pub partial: BTreeSet<String>,
    /// Records allowed to stay unresolved in the output.
    pub remains_partial: BTreeSet<String>,
    /// Drop all debug info instead of merging it.
    pub strip_debug_info: bool,
}

/// Counters exposed to the driver and asserted by tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Identical duplicate definitions dropped during the merge.
    pub deduplicated_foreigners: usize,
    /// Distinct per-function debug payloads retained.
    pub debug_count: usize,
}

/// Outcome of a link: the merged program when error-free, plus the
/// aggregated per-input errors and statistics.
#[derive(Debug, Default)]
pub struct LinkResult {
    /// The merged program; meaningful only when `errors` is empty.
    pub program: Program,
    /// Human-readable errors, aggregated across inputs.
    pub errors: Vec<String>,
    /// Merge statistics.
    pub stats: LinkStats,
}

impl LinkResult {
    /// Whether the link succeeded.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Kind of symbol a foreign reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignKind {
    /// A method reference.
    Method,
    /// A field reference.
    Field,
    /// A class reference.
    Class,
}

/// A reference into another compiled unit, resolved during the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignRef {
    /// The record that owns the referenced symbol.
    pub record: String,
    /// What the reference names.
    pub kind: ForeignKind,
    /// Mangled signature of the symbol.
    pub signature: String,
}

/// Links the inputs into one program.
pub fn link(config: &Config, mut inputs: Vec<Program>) -> LinkResult {
    let mut result = LinkResult::default();
    let mut records: BTreeMap<String, Record> = BTreeMap::new();
    let mut functions: BTreeMap<String, Function> = BTreeMap::new();
    let mut strings: BTreeSet<String> = BTreeSet::new();
    let mut array_types = BTreeSet::new();
    // Literal arrays are renumbered into a content-sorted table so the
    // assigned ids do not depend on input order; identical payloads merge.
    let merged_arrays = collect_literal_arrays(&inputs);
    for input in &mut inputs {
        renumber_literal_arrays(input, &merged_arrays);
    }
    for (input_index, input) in inputs.iter().enumerate() {
        strings.extend(input.strings.iter().cloned());
        array_types.extend(input.array_types.iter().cloned());
        for (name, record) in input.records() {
            merge_record(config, &mut records, name, record, input_index, &mut result);
        }
        for (name, function) in input.functions() {
            merge_function(&mut functions, name, function, input_index, &mut result);
        }
    }
    check_unresolved(config, &records, &functions, &mut result);
    result.stats.debug_count = handle_debug_info(config, &mut functions);
    // Emission order is the sorted map order: byte-identical output for
    // any input permutation.
    for (_, record) in records {
        result.program.add_record(record);
    }
    for (_, function) in functions {
        result.program.add_function(function);
    }
    for (id, (_, array)) in merged_arrays.into_iter().enumerate() {
        result.program.add_literal_array(id.to_string(), array);
    }
    result.program.strings = strings;
    result.program.array_types = array_types;
    result
}

fn literal_array_key(array: &kestrel_asm::LiteralArray) -> String {
    serde_json::to_string(array).expect("literal arrays always serialize")
}

/// The union of every input's literal arrays, content-sorted and
/// de-duplicated. The position in the result is the merged id.
fn collect_literal_arrays(inputs: &[Program]) -> Vec<(String, kestrel_asm::LiteralArray)> {
    let mut by_content: BTreeMap<String, kestrel_asm::LiteralArray> = BTreeMap::new();
    for input in inputs {
        for (_, array) in input.literal_arrays() {
            by_content.insert(literal_array_key(array), array.clone());
        }
    }
    by_content.into_iter().collect()
}

/// Patches one input's instructions to reference the merged array ids.
fn renumber_literal_arrays(
    input: &mut Program,
    merged: &[(String, kestrel_asm::LiteralArray)],
) {
    let mut mapping: BTreeMap<String, String> = BTreeMap::new();
    for (old_id, array) in input.literal_arrays() {
        let key = literal_array_key(array);
        if let Some(pos) = merged.iter().position(|(k, _)| *k == key) {
            mapping.insert(old_id.to_string(), pos.to_string());
        }
    }
    for (_, function) in input.functions_mut() {
        for ins in &mut function.ins {
            if !ins.opcode.flags().contains(kestrel_asm::InsFlags::LITERALARRAY_ID) {
                continue;
            }
            if let Some(id) = ins.ids.first_mut() {
                if let Some(new_id) = mapping.get(id.as_str()) {
                    *id = new_id.clone();
                }
            }
        }
    }
}

fn merge_record(
    config: &Config,
    records: &mut BTreeMap<String, Record>,
    name: &str,
    record: &Record,
    input_index: usize,
    result: &mut LinkResult,
) {
    let Some(existing) = records.get_mut(name) else {
        records.insert(name.to_string(), record.clone());
        return;
    };
    let existing_defined = !existing.metadata.is_foreign();
    let incoming_defined = !record.metadata.is_foreign();
    match (existing_defined, incoming_defined) {
        (_, false) => {}
        (false, true) => *existing = record.clone(),
        (true, true) => {
            if config.partial.contains(name) {
                merge_partial_fields(existing, record, name, input_index, result);
            } else {
                result.errors.push(format!(
                    "input #{input_index}: record `{name}` is defined more than once"
                ));
            }
        }
    }
}

/// Partial classes accumulate fields from several inputs; a field seen
/// twice must agree on its type.
fn merge_partial_fields(
    existing: &mut Record,
    incoming: &Record,
    name: &str,
    input_index: usize,
    result: &mut LinkResult,
) {
    for field in &incoming.fields {
        match existing.field(&field.name) {
            None => existing.fields.push(field.clone()),
            Some(present) if present.ty == field.ty => {}
            Some(present) => result.errors.push(format!(
                "input #{input_index}: partial record `{name}` field `{}` declared as {} and {}",
                field.name,
                present.ty,
                field.ty,
            )),
        }
    }
    existing.fields.sort_by(|a, b| a.name.cmp(&b.name));
}

fn merge_function(
    functions: &mut BTreeMap<String, Function>,
    name: &str,
    function: &Function,
    input_index: usize,
    result: &mut LinkResult,
) {
    let Some(existing) = functions.get_mut(name) else {
        functions.insert(name.to_string(), function.clone());
        return;
    };
    let existing_defined = !existing.metadata.is_foreign();
    let incoming_defined = !function.metadata.is_foreign();
    match (existing_defined, incoming_defined) {
        (_, false) => {}
        (false, true) => *existing = function.clone(),
        (true, true) => {
            if same_body(existing, function) {
                debug!(function = name, "duplicate definition deduplicated");
                result.stats.deduplicated_foreigners += 1;
            } else {
                result.errors.push(format!(
                    "input #{input_index}: function `{name}` has conflicting definitions"
                ));
            }
        }
    }
}

/// Structural body equality: same signature and instruction stream.
fn same_body(a: &Function, b: &Function) -> bool {
    if a.return_type != b.return_type
        || a.params.len() != b.params.len()
        || a.params.iter().zip(&b.params).any(|(x, y)| x.ty != y.ty)
        || a.ins.len() != b.ins.len()
    {
        return false;
    }
    a.ins.iter().zip(&b.ins).all(|(x, y)| {
        x.opcode == y.opcode
            && x.regs == y.regs
            && x.imms == y.imms
            && x.ids == y.ids
            && x.label == y.label
    })
}

/// Symbols that stayed foreign must be covered by the allow-list.
fn check_unresolved(
    config: &Config,
    records: &BTreeMap<String, Record>,
    functions: &BTreeMap<String, Function>,
    result: &mut LinkResult,
) {
    for (name, record) in records {
        if record.metadata.is_foreign() && !config.remains_partial.contains(name) {
            result
                .errors
                .push(format!("unresolved reference: record `{name}`"));
        }
    }
    for (name, function) in functions {
        if !function.metadata.is_foreign() {
            continue;
        }
        let owner = owning_record(name);
        if !config.remains_partial.contains(owner) {
            result
                .errors
                .push(format!("unresolved reference: function `{name}`"));
        }
    }
}

/// The record part of a mangled function name, the global scope when the
/// name is unqualified.
fn owning_record(mangled: &str) -> &str {
    let bare = mangled.split(':').next().unwrap_or(mangled);
    match bare.rfind('.') {
        Some(pos) => &bare[..pos],
        None => "_GLOBAL",
    }
}

/// Strips or de-duplicates debug info; returns the number of distinct
/// debug payloads kept.
fn handle_debug_info(config: &Config, functions: &mut BTreeMap<String, Function>) -> usize {
    if config.strip_debug_info {
        for function in functions.values_mut() {
            for ins in &mut function.ins {
                ins.debug = kestrel_asm::InsDebug::default();
            }
            function.local_variables.clear();
        }
        return 0;
    }
    let mut seen: HashSet<Vec<(usize, usize)>> = HashSet::new();
    for function in functions.values() {
        if !function.has_debug_info() {
            continue;
        }
        let payload: Vec<(usize, usize)> = function
            .ins
            .iter()
            .map(|ins| (ins.debug.line_number, ins.debug.column_number))
            .collect();
        seen.insert(payload);
    }
    seen.len()
}

/// Resolves one foreign reference against the merged program: succeeds
/// only when a unique matching definition exists.
pub fn resolve(program: &Program, reference: &ForeignRef) -> Result<String, String> {
    match reference.kind {
        ForeignKind::Class => {
            if program
                .record(&reference.record)
                .is_some_and(|r| !r.metadata.is_foreign())
            {
                Ok(reference.record.clone())
            } else {
                Err(format!("unresolved class `{}`", reference.record))
            }
        }
        ForeignKind::Method => {
            let matches: Vec<&str> = program
                .functions()
                .filter(|(name, f)| *name == reference.signature && !f.metadata.is_foreign())
                .map(|(name, _)| name)
                .collect();
            match matches.iter().exactly_one() {
                Ok(name) => Ok((*name).to_string()),
                Err(_) if matches.is_empty() => {
                    Err(format!("unresolved method `{}`", reference.signature))
                }
                Err(_) => Err(format!("ambiguous method `{}`", reference.signature)),
            }
        }
        ForeignKind::Field => {
            let record = program
                .record(&reference.record)
                .ok_or_else(|| format!("unresolved class `{}`", reference.record))?;
            record
                .field(&reference.signature)
                .map(|f| f.name.clone())
                .ok_or_else(|| format!("unresolved field `{}`", reference.signature))
        }
    }
}
