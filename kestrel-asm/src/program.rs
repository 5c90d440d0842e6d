use std::collections::{BTreeSet, HashMap};

use kestrel_types::Type;
use serde_json::{json, Map, Value};

use crate::debuginfo::FileLocation;
use crate::function::Function;
use crate::literals::LiteralArray;
use crate::record::Record;

/// An insertion-ordered table keyed by name. Iteration order is the order
/// entries were added, which [`Program::json_dump`] exposes as a public
/// contract.
#[derive(Debug, Clone)]
pub(crate) struct NamedTable<T> {
    items: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> Default for NamedTable<T> {
    fn default() -> Self {
        NamedTable { items: Vec::new(), index: HashMap::new() }
    }
}

impl<T: serde::Serialize> serde::Serialize for NamedTable<T> {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        // Entries only; the index is rebuilt on the way in.
        self.items.serialize(ser)
    }
}

impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for NamedTable<T> {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let items: Vec<(String, T)> = Vec::deserialize(de)?;
        let mut table = NamedTable { items: Vec::with_capacity(items.len()), index: HashMap::new() };
        for (name, item) in items {
            table.insert(name, item);
        }
        Ok(table)
    }
}

impl<T> NamedTable<T> {
    /// Inserts or replaces the entry under `name`.
    pub fn insert(&mut self, name: impl Into<String>, item: T) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&pos) => self.items[pos].1 = item,
            None => {
                self.index.insert(name.clone(), self.items.len());
                self.items.push((name, item));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&pos| &self.items[pos].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.index.get(name).copied().map(move |pos| &mut self.items[pos].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.items.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> {
        self.items.iter_mut().map(|(n, v)| (n.as_str(), v))
    }
}

/// A whole compilation unit: records, functions, literal arrays, the
/// string table and the array-type set.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Program {
    records: NamedTable<Record>,
    functions: NamedTable<Function>,
    literal_arrays: NamedTable<LiteralArray>,
    /// String-literal table.
    pub strings: BTreeSet<String>,
    /// Array types referenced by the unit.
    pub array_types: BTreeSet<Type>,
}

impl Program {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record under its own name.
    pub fn add_record(&mut self, record: Record) {
        self.records.insert(record.name.clone(), record);
    }

    /// Adds a function under its mangled name.
    pub fn add_function(&mut self, function: Function) {
        self.functions.insert(function.mangled_name(), function);
    }

    /// Registers a literal array under an id chosen by the caller.
    pub fn add_literal_array(&mut self, id: impl Into<String>, array: LiteralArray) {
        self.literal_arrays.insert(id, array);
    }

    /// Looks up a record by name.
    pub fn record(&self, name: &str) -> Option<&Record> {
        self.records.get(name)
    }

    /// Looks up a function by mangled name.
    pub fn function(&self, mangled: &str) -> Option<&Function> {
        self.functions.get(mangled)
    }

    /// Mutable lookup of a function by mangled name.
    pub fn function_mut(&mut self, mangled: &str) -> Option<&mut Function> {
        self.functions.get_mut(mangled)
    }

    /// Looks up a literal array by id.
    pub fn literal_array(&self, id: &str) -> Option<&LiteralArray> {
        self.literal_arrays.get(id)
    }

    /// Whether a record with this name exists.
    pub fn has_record(&self, name: &str) -> bool {
        self.records.contains(name)
    }

    /// Number of registered literal arrays; also the next fresh id.
    pub fn literal_array_count(&self) -> usize {
        self.literal_arrays.len()
    }

    /// Records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.records.iter()
    }

    /// Functions in insertion order.
    pub fn functions(&self) -> impl Iterator<Item = (&str, &Function)> {
        self.functions.iter()
    }

    /// Mutable iteration over functions in insertion order.
    pub fn functions_mut(&mut self) -> impl Iterator<Item = (&str, &mut Function)> {
        self.functions.iter_mut()
    }

    /// Literal arrays in insertion order.
    pub fn literal_arrays(&self) -> impl Iterator<Item = (&str, &LiteralArray)> {
        self.literal_arrays.iter()
    }

    /// Stable JSON view of the program structure and body locations,
    /// consumed by IDE tooling and tests.
    ///
    /// Entry order follows table insertion order; the `bodyLocation` key
    /// is emitted only for declarations with a defined file location.
    pub fn json_dump(&self) -> String {
        let functions: Vec<Value> = self
            .functions
            .iter()
            .map(|(name, f)| {
                dump_entry(name, f.file_location.as_ref(), || {
                    json!({
                        "begin": { "line": f.body_location.begin.line, "column": f.body_location.begin.column },
                        "end": { "line": f.body_location.end.line, "column": f.body_location.end.column },
                    })
                })
            })
            .collect();
        let records: Vec<Value> = self
            .records
            .iter()
            .map(|(name, r)| {
                dump_entry(name, r.file_location.as_ref(), || {
                    json!({
                        "begin": { "line": r.file_location.as_ref().map(|l| l.line_start).unwrap_or(0), "column": 0 },
                        "end": { "line": r.file_location.as_ref().map(|l| l.line_end).unwrap_or(0), "column": 0 },
                    })
                })
            })
            .collect();
        json!({ "functions": functions, "records": records }).to_string()
    }
}

fn dump_entry(
    name: &str,
    location: Option<&FileLocation>,
    body: impl FnOnce() -> Value,
) -> Value {
    let mut entry = Map::new();
    entry.insert("name".to_string(), Value::String(name.to_string()));
    if location.is_some_and(|l| l.is_defined) {
        entry.insert("bodyLocation".to_string(), body());
    }
    Value::Object(entry)
}
