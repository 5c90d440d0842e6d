//! Declaration metadata: access flags and free-form attribute tables.

use std::collections::BTreeMap;

bitflags::bitflags! {
    /// Access and property flags of records, functions and fields.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// Public visibility.
        const PUBLIC = 0x0001;
        /// Private visibility.
        const PRIVATE = 0x0002;
        /// Protected visibility.
        const PROTECTED = 0x0004;
        /// Static member.
        const STATIC = 0x0008;
        /// Final member or record.
        const FINAL = 0x0010;
        /// Abstract record or method.
        const ABSTRACT = 0x0400;
        /// Interface record.
        const INTERFACE = 0x0200;
        /// Synthetic, compiler-generated.
        const SYNTHETIC = 0x1000;
    }
}

/// Common surface of declaration metadata.
///
/// Attributes are free-form `name → values` entries set by the parser
/// (`external`, `ctor`, `noimpl`, `ets.implements`, …); well-known ones
/// get typed accessors on the concrete metadata types.
pub trait Metadata {
    /// Access flag word.
    fn access_flags(&self) -> AccessFlags;

    /// Replaces the access flag word.
    fn set_access_flags(&mut self, flags: AccessFlags);

    /// First value of an attribute, if present.
    fn attribute(&self, name: &str) -> Option<&str>;

    /// All values of an attribute.
    fn attribute_values(&self, name: &str) -> &[String];

    /// Adds a value to an attribute.
    fn set_attribute(&mut self, name: &str, value: impl Into<String>)
    where
        Self: Sized;

    /// Whether a boolean attribute is set.
    fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Whether the declaration is only referenced, not defined, here.
    fn is_foreign(&self) -> bool {
        self.has_attribute("external")
    }
}

/// Attribute storage shared by all metadata kinds. Ordered map so dumps
/// and comparisons are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct AttributeTable {
    #[serde(with = "access_flag_bits")]
    access: AccessFlags,
    attributes: BTreeMap<String, Vec<String>>,
}

/// Access flags travel as their raw bit word.
mod access_flag_bits {
    use super::AccessFlags;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flags: &AccessFlags, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u32(flags.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<AccessFlags, D::Error> {
        Ok(AccessFlags::from_bits_retain(u32::deserialize(de)?))
    }
}

impl AttributeTable {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn set_attribute(&mut self, name: &str, value: String) {
        self.attributes.entry(name.to_string()).or_default().push(value);
    }
}

macro_rules! impl_metadata {
    ($ty:ident) => {
        impl Metadata for $ty {
            fn access_flags(&self) -> AccessFlags {
                self.table.access
            }

            fn set_access_flags(&mut self, flags: AccessFlags) {
                self.table.access = flags;
            }

            fn attribute(&self, name: &str) -> Option<&str> {
                self.table.attribute(name)
            }

            fn attribute_values(&self, name: &str) -> &[String] {
                self.table.attribute_values(name)
            }

            fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
                self.table.set_attribute(name, value.into());
            }
        }
    };
}

/// Metadata of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecordMetadata {
    table: AttributeTable,
}

impl RecordMetadata {
    /// Superclass name, when declared.
    pub fn base(&self) -> Option<&str> {
        self.attribute("ets.extends")
    }

    /// Implemented interface names.
    pub fn interfaces(&self) -> &[String] {
        self.attribute_values("ets.implements")
    }
}

impl_metadata!(RecordMetadata);

/// Metadata of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FunctionMetadata {
    table: AttributeTable,
}

impl FunctionMetadata {
    /// Whether the function body is declared elsewhere.
    pub fn has_implementation(&self) -> bool {
        !self.has_attribute("noimpl") && !self.is_foreign()
    }

    /// Whether this is an instance constructor.
    pub fn is_ctor(&self) -> bool {
        self.has_attribute("ctor")
    }

    /// Whether this is a class initializer.
    pub fn is_cctor(&self) -> bool {
        self.has_attribute("cctor")
    }
}

impl_metadata!(FunctionMetadata);

/// Metadata of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldMetadata {
    table: AttributeTable,
}

impl_metadata!(FieldMetadata);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_accumulate_values() {
        let mut meta = RecordMetadata::default();
        meta.set_attribute("ets.implements", "A");
        meta.set_attribute("ets.implements", "B");
        assert_eq!(meta.interfaces(), ["A", "B"]);
        assert_eq!(meta.attribute("ets.implements"), Some("A"));
    }

    #[test]
    fn foreign_and_implementation() {
        let mut meta = FunctionMetadata::default();
        assert!(meta.has_implementation());
        meta.set_attribute("external", "");
        assert!(meta.is_foreign());
        assert!(!meta.has_implementation());
    }

    #[test]
    fn access_flags_round_trip() {
        let mut meta = FieldMetadata::default();
        meta.set_access_flags(AccessFlags::PUBLIC | AccessFlags::STATIC);
        assert!(meta.access_flags().contains(AccessFlags::STATIC));
    }
}
