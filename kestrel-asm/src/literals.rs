//! Literal arrays: constant array payloads stored in the program's data
//! section.

use kestrel_types::TypeId;

/// Tag of a single literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum LiteralTag {
    TagValue = 0x00,
    Integer = 0x02,
    ArrayU1 = 0x0a,
    ArrayU8 = 0x0b,
    ArrayI8 = 0x0c,
    ArrayU16 = 0x0d,
    ArrayI16 = 0x0e,
    ArrayU32 = 0x0f,
    ArrayI32 = 0x10,
    ArrayU64 = 0x11,
    ArrayI64 = 0x12,
    ArrayF32 = 0x13,
    ArrayF64 = 0x14,
    ArrayString = 0x15,
}

impl LiteralTag {
    /// Element tag for arrays of the given primitive component, `None`
    /// when the component cannot live in a literal array.
    pub fn from_component(id: TypeId) -> Option<LiteralTag> {
        match id {
            TypeId::U1 => Some(LiteralTag::ArrayU1),
            TypeId::U8 => Some(LiteralTag::ArrayU8),
            TypeId::I8 => Some(LiteralTag::ArrayI8),
            TypeId::U16 => Some(LiteralTag::ArrayU16),
            TypeId::I16 => Some(LiteralTag::ArrayI16),
            TypeId::U32 => Some(LiteralTag::ArrayU32),
            TypeId::I32 => Some(LiteralTag::ArrayI32),
            TypeId::U64 => Some(LiteralTag::ArrayU64),
            TypeId::I64 => Some(LiteralTag::ArrayI64),
            TypeId::F32 => Some(LiteralTag::ArrayF32),
            TypeId::F64 => Some(LiteralTag::ArrayF64),
            _ => None,
        }
    }
}

/// Payload of a literal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[allow(missing_docs)]
pub enum LiteralValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

/// A tagged literal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Literal {
    /// Element kind.
    pub tag: LiteralTag,
    /// Payload; its variant is dictated by the tag.
    pub value: LiteralValue,
}

/// An ordered literal list. The first two entries of a well-formed array
/// encode the element tag and the length, in that order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LiteralArray {
    /// The literals, intro entries included.
    pub literals: Vec<Literal>,
}

impl LiteralArray {
    /// Wraps payload literals with the `[element-tag, length]` intro.
    pub fn with_intro(payload: Vec<Literal>) -> Self {
        let elem_tag = payload.last().map(|l| l.tag as u8).unwrap_or(LiteralTag::TagValue as u8);
        let mut literals = Vec::with_capacity(payload.len() + 2);
        literals.push(Literal {
            tag: LiteralTag::TagValue,
            value: LiteralValue::U8(elem_tag),
        });
        literals.push(Literal {
            tag: LiteralTag::Integer,
            value: LiteralValue::U32(payload.len() as u32),
        });
        literals.extend(payload);
        Self { literals }
    }

    /// Element tag of a well-formed array.
    pub fn element_tag(&self) -> Option<LiteralTag> {
        self.literals.get(2).map(|l| l.tag)
    }

    /// Element count of a well-formed array.
    pub fn len(&self) -> usize {
        self.literals.len().saturating_sub(2)
    }

    /// Whether the array carries no payload literals.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intro_encodes_tag_and_length() {
        let payload = vec![
            Literal { tag: LiteralTag::ArrayI32, value: LiteralValue::U32(1) },
            Literal { tag: LiteralTag::ArrayI32, value: LiteralValue::U32(2) },
            Literal { tag: LiteralTag::ArrayI32, value: LiteralValue::U32(3) },
        ];
        let arr = LiteralArray::with_intro(payload);
        assert_eq!(arr.literals[0].tag, LiteralTag::TagValue);
        assert_eq!(arr.literals[0].value, LiteralValue::U8(LiteralTag::ArrayI32 as u8));
        assert_eq!(arr.literals[1].tag, LiteralTag::Integer);
        assert_eq!(arr.literals[1].value, LiteralValue::U32(3));
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.element_tag(), Some(LiteralTag::ArrayI32));
    }

    #[test]
    fn component_mapping_covers_all_primitives() {
        assert_eq!(LiteralTag::from_component(TypeId::U1), Some(LiteralTag::ArrayU1));
        assert_eq!(LiteralTag::from_component(TypeId::F64), Some(LiteralTag::ArrayF64));
        assert_eq!(LiteralTag::from_component(TypeId::Reference), None);
        assert_eq!(LiteralTag::from_component(TypeId::Void), None);
    }
}
