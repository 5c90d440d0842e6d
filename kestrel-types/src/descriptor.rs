use crate::primitive::{primitive_by_code, primitive_by_name};
use crate::{TypeError, TypeId};

/// A type of the assembly dialect: a component name plus an array rank.
///
/// The component is a primitive (`i32`), a record reference
/// (`std.core.String`) or a union (`{Ui32,std.core.String}`); the rank
/// counts `[]` pairs. `Type` values are cheap to clone and compare.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Type {
    component: String,
    rank: usize,
}

const UNION_PREFIX: &str = "{U";

impl Type {
    /// Creates a type from a component name (no rank suffix) and a rank.
    pub fn new(component: impl Into<String>, rank: usize) -> Self {
        Self { component: component.into(), rank }
    }

    /// Parses the textual name form, e.g. `i32[][]` or `std.core.String`.
    pub fn from_name(name: &str) -> Self {
        let mut end = name.len();
        let mut rank = 0;
        while end >= 2 && &name[end - 2..end] == "[]" {
            end -= 2;
            rank += 1;
        }
        Self { component: name[..end].to_string(), rank }
    }

    /// Parses the descriptor form, e.g. `[[I` or `Lstd/core/String;`.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, TypeError> {
        let bytes = descriptor.as_bytes();
        let mut rank = 0;
        while rank < bytes.len() && bytes[rank] == b'[' {
            rank += 1;
        }
        let (component, consumed) = component_from_descriptor(&descriptor[rank..])?;
        if rank + consumed != descriptor.len() {
            return Err(TypeError::MalformedDescriptor(descriptor.to_string()));
        }
        Ok(Self { component, rank })
    }

    /// The component name without the rank suffix.
    pub fn component_name(&self) -> &str {
        &self.component
    }

    /// The full name, rank spelled as trailing `[]` pairs.
    pub fn name(&self) -> String {
        let mut name = self.component.clone();
        for _ in 0..self.rank {
            name.push_str("[]");
        }
        name
    }

    /// Array rank; zero for scalars.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The element type of an array, one rank down.
    pub fn component_type(&self) -> Type {
        debug_assert!(self.rank > 0);
        Type { component: self.component.clone(), rank: self.rank - 1 }
    }

    /// File-level tag of this type.
    pub fn type_id(&self) -> TypeId {
        if self.rank > 0 || self.is_union() {
            return TypeId::Reference;
        }
        primitive_by_name(&self.component).map(|p| p.type_id).unwrap_or(TypeId::Reference)
    }

    /// Whether the component (ignoring rank) is a primitive of the dialect.
    pub fn is_primitive(&self) -> bool {
        self.rank == 0 && primitive_by_name(&self.component).is_some()
    }

    /// Whether the type is a reference: record, union or any array.
    pub fn is_object(&self) -> bool {
        !self.is_primitive()
    }

    /// Whether the component is a union.
    pub fn is_union(&self) -> bool {
        self.component.starts_with(UNION_PREFIX)
    }

    /// Whether the type has rank at least one.
    pub fn is_array(&self) -> bool {
        self.rank > 0
    }

    /// Whether the type is `void`.
    pub fn is_void(&self) -> bool {
        self.rank == 0 && self.component == "void"
    }

    /// Whether the type is the dynamically tagged `any`.
    pub fn is_tagged(&self) -> bool {
        self.rank == 0 && self.component == "any"
    }

    /// Whether the type is an integral primitive.
    pub fn is_integral(&self) -> bool {
        self.rank == 0 && self.type_id().is_integral()
    }

    /// Whether an integral type fits into 32 bits.
    pub fn fits_into32(&self) -> bool {
        self.rank == 0 && self.type_id().fits_into32()
    }

    /// Whether the type is `f32`.
    pub fn is_float32(&self) -> bool {
        self.rank == 0 && self.component == "f32"
    }

    /// Whether the type is `f64`.
    pub fn is_float64(&self) -> bool {
        self.rank == 0 && self.component == "f64"
    }

    /// Descriptor form: `[` per rank, then the component descriptor.
    pub fn descriptor(&self) -> String {
        let mut out = "[".repeat(self.rank);
        out.push_str(&component_descriptor(&self.component));
        out
    }

    /// Union constituent types, empty for non-unions.
    pub fn constituents(&self) -> Vec<Type> {
        if !self.is_union() {
            return Vec::new();
        }
        let inner = &self.component[UNION_PREFIX.len()..self.component.len() - 1];
        split_top_level(inner).into_iter().map(|s| Type::from_name(&s)).collect()
    }

    /// Sorts union constituents by descriptor and drops duplicates,
    /// recursing through arrays of unions. Non-unions are unchanged.
    pub fn canonicalize(&mut self) {
        if !self.is_union() {
            return;
        }
        let mut parts: Vec<Type> = self
            .constituents()
            .into_iter()
            .map(|mut c| {
                c.canonicalize();
                c
            })
            .collect();
        parts.sort_by_key(|t| t.descriptor());
        parts.dedup();
        let mut name = String::from(UNION_PREFIX);
        for (i, p) in parts.iter().enumerate() {
            if i > 0 {
                name.push(',');
            }
            name.push_str(&p.name());
        }
        name.push('}');
        self.component = name;
    }

    /// Canonical form of a descriptor string.
    pub fn canonicalize_descriptor(descriptor: &str) -> Result<String, TypeError> {
        let mut ty = Type::from_descriptor(descriptor)?;
        ty.canonicalize();
        Ok(ty.descriptor())
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn component_descriptor(component: &str) -> String {
    if let Some(p) = primitive_by_name(component) {
        return p.code.to_string();
    }
    if let Some(inner) = component.strip_prefix(UNION_PREFIX).and_then(|s| s.strip_suffix('}')) {
        let mut out = String::from(UNION_PREFIX);
        for part in split_top_level(inner) {
            out.push_str(&Type::from_name(&part).descriptor());
        }
        out.push('}');
        return out;
    }
    let mut out = String::with_capacity(component.len() + 2);
    out.push('L');
    out.extend(component.chars().map(|c| if c == '.' { '/' } else { c }));
    out.push(';');
    out
}

/// Decodes a rank-stripped descriptor component, returning the component
/// name and the number of bytes consumed.
fn component_from_descriptor(descriptor: &str) -> Result<(String, usize), TypeError> {
    let Some(first) = descriptor.chars().next() else {
        return Err(TypeError::MalformedDescriptor(descriptor.to_string()));
    };
    match first {
        'L' => {
            let end = descriptor
                .find(';')
                .ok_or_else(|| TypeError::MalformedDescriptor(descriptor.to_string()))?;
            let name: String = descriptor[1..end]
                .chars()
                .map(|c| if c == '/' { '.' } else { c })
                .collect();
            Ok((name, end + 1))
        }
        '{' => {
            if !descriptor.starts_with(UNION_PREFIX) {
                return Err(TypeError::MalformedDescriptor(descriptor.to_string()));
            }
            let mut name = String::from(UNION_PREFIX);
            let mut pos = UNION_PREFIX.len();
            let bytes = descriptor.as_bytes();
            let mut first_part = true;
            while pos < descriptor.len() && bytes[pos] != b'}' {
                let mut rank = 0;
                while pos + rank < descriptor.len() && bytes[pos + rank] == b'[' {
                    rank += 1;
                }
                pos += rank;
                let (part, used) = component_from_descriptor(&descriptor[pos..])?;
                pos += used;
                if !first_part {
                    name.push(',');
                }
                first_part = false;
                name.push_str(&part);
                for _ in 0..rank {
                    name.push_str("[]");
                }
            }
            if pos >= descriptor.len() {
                return Err(TypeError::MalformedDescriptor(descriptor.to_string()));
            }
            name.push('}');
            Ok((name, pos + 1))
        }
        code => match primitive_by_code(code) {
            Some(p) => Ok((p.name.to_string(), code.len_utf8())),
            None => Err(TypeError::UnknownPrimitive(code)),
        },
    }
}

/// Splits union constituents at commas that are not nested in `{}`.
fn split_top_level(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("i32", "I")]
    #[case("u1", "Z")]
    #[case("f64", "D")]
    #[case("any", "A")]
    #[case("std.core.String", "Lstd/core/String;")]
    #[case("i32[]", "[I")]
    #[case("std.core.String[][]", "[[Lstd/core/String;")]
    fn name_descriptor_round_trip(#[case] name: &str, #[case] descriptor: &str) {
        let ty = Type::from_name(name);
        assert_eq!(ty.descriptor(), descriptor);
        let back = Type::from_descriptor(descriptor).unwrap();
        assert_eq!(back.name(), name);
    }

    #[test]
    fn union_descriptor_round_trip() {
        let ty = Type::from_name("{Ui32,std.core.String}");
        assert_eq!(ty.descriptor(), "{UILstd/core/String;}");
        let back = Type::from_descriptor("{UILstd/core/String;}").unwrap();
        assert_eq!(back, ty);
    }

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let mut ty = Type::from_name("{Ustd.core.String,i32,i32}");
        ty.canonicalize();
        // `I` sorts before `Lstd/core/String;`.
        assert_eq!(ty.name(), "{Ui32,std.core.String}");
        assert_eq!(ty.descriptor(), "{UILstd/core/String;}");
    }

    #[test]
    fn canonicalize_descriptor_is_idempotent() {
        let canon = Type::canonicalize_descriptor("{ULstd/core/String;II}").unwrap();
        assert_eq!(Type::canonicalize_descriptor(&canon).unwrap(), canon);
    }

    #[test]
    fn canonicalize_recurses_into_array_of_union() {
        let mut ty = Type::from_name("{U{Uf64,i32}[],u1}");
        ty.canonicalize();
        assert_eq!(ty.name(), "{U{Ui32,f64}[],u1}");
    }

    #[test]
    fn predicates() {
        assert!(Type::from_name("i32").is_primitive());
        assert!(Type::from_name("i32").is_integral());
        assert!(Type::from_name("i32").fits_into32());
        assert!(!Type::from_name("i64").fits_into32());
        assert!(Type::from_name("i32[]").is_object());
        assert!(Type::from_name("std.core.String").is_object());
        assert!(Type::from_name("{Ui32,f64}").is_union());
        assert!(Type::from_name("any").is_tagged());
        assert_eq!(Type::from_name("i32[]").type_id(), TypeId::Reference);
        assert_eq!(Type::from_name("u16").type_id(), TypeId::U16);
    }

    #[test]
    fn component_type_drops_one_rank() {
        let arr = Type::from_name("f64[][]");
        assert_eq!(arr.component_type().name(), "f64[]");
        assert_eq!(arr.component_type().component_type().name(), "f64");
    }
}
