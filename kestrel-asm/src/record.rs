use kestrel_types::Type;

use crate::debuginfo::FileLocation;
use crate::meta::{FieldMetadata, RecordMetadata};

/// A class-like entity: an ordered list of fields plus metadata.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Record {
    /// Fully qualified record name, dot separated.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<Field>,
    /// Access flags, attributes, base class, interfaces.
    pub metadata: RecordMetadata,
    /// Where the record is declared, if parsed from a file.
    pub file_location: Option<FileLocation>,
    /// Source file of the declaration, empty when unknown.
    pub source_file: String,
}

impl Record {
    /// Creates an empty record.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A member field of a [`Record`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Field {
    /// Field name, unique within the record.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Access flags and attributes.
    pub metadata: FieldMetadata,
    /// Declaration line, if parsed from a file.
    pub line_of_def: Option<usize>,
}

impl Field {
    /// Creates a field of the given type.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty, metadata: FieldMetadata::default(), line_of_def: None }
    }
}
