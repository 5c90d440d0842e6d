//! Name mangling.
//!
//! Two encodings meet here: the assembler's mangled function names
//! (`name:(param,param,…)`) and the textual-ANI descriptors used by the
//! FFI layer, which spell types with a compact letter syntax (`i`, `C{…}`,
//! `A{…}`, `X{…}`) and must be converted to classic descriptors before
//! lookup.

use crate::descriptor::Type;
use crate::TypeError;

const OBJECT_DESCRIPTOR: &str = "Lstd/core/Object;";

/// Builds the mangled table name of a function from its unqualified name
/// and parameter type names. The unqualified name must not contain `:`.
pub fn mangle_function(name: &str, params: &[Type]) -> String {
    let mut out = String::with_capacity(name.len() + 2 + params.len() * 4);
    out.push_str(name);
    out.push_str(":(");
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&p.name());
    }
    out.push(')');
    out
}

/// Converts a textual-ANI class descriptor (`a.b.C` or `A{…}` when
/// `allow_array` is set) into a classic descriptor.
pub fn textual_descriptor(descriptor: &str, allow_array: bool) -> Result<String, TypeError> {
    if descriptor.is_empty() || descriptor.ends_with(';') {
        return Err(TypeError::IncorrectMangling(descriptor.to_string()));
    }
    if allow_array && descriptor.len() >= 3 && descriptor.starts_with("A{") {
        let mut out = String::new();
        let consumed = parse_array_body(&descriptor[1..], &mut out)
            .ok_or_else(|| TypeError::IncorrectMangling(descriptor.to_string()))?;
        if 1 + consumed != descriptor.len() {
            return Err(TypeError::IncorrectMangling(descriptor.to_string()));
        }
        return Ok(out);
    }
    let mut out = String::with_capacity(descriptor.len() + 2);
    out.push('L');
    for c in descriptor.chars() {
        if c == '/' {
            return Err(TypeError::IncorrectMangling(descriptor.to_string()));
        }
        out.push(if c == '.' { '/' } else { c });
    }
    out.push(';');
    Ok(out)
}

/// Converts a textual-ANI signature (`<params>:<return>`) into classic
/// form. An empty return type becomes `V`.
pub fn textual_signature(descriptor: &str) -> Result<String, TypeError> {
    let mut out = String::with_capacity(descriptor.len() * 2);
    let mut returns: i32 = -1;
    let mut seen_colon = false;
    let mut i = 0;
    while i < descriptor.len() {
        if descriptor[i..].starts_with(':') {
            out.push(':');
            returns = 0;
            seen_colon = true;
            i += 1;
            continue;
        }
        let consumed = parse_type(&descriptor[i..], &mut out)
            .ok_or_else(|| TypeError::IncorrectMangling(descriptor.to_string()))?;
        i += consumed;
        if seen_colon {
            returns += 1;
        }
    }
    if !seen_colon {
        return Err(TypeError::IncorrectMangling(descriptor.to_string()));
    }
    if returns == 0 {
        out.push('V');
    }
    Ok(out)
}

/// Parses one textual type starting at `data`, appending its classic form
/// to `out`. Returns the consumed length, or `None` on malformed input.
fn parse_type(data: &str, out: &mut String) -> Option<usize> {
    let ty = data.chars().next()?;
    match ty {
        'z' => {
            out.push('Z');
            Some(1)
        }
        'c' => {
            out.push('C');
            Some(1)
        }
        'b' => {
            out.push('B');
            Some(1)
        }
        's' => {
            out.push('S');
            Some(1)
        }
        'i' => {
            out.push('I');
            Some(1)
        }
        'l' => {
            out.push('J');
            Some(1)
        }
        'f' => {
            out.push('F');
            Some(1)
        }
        'd' => {
            out.push('D');
            Some(1)
        }
        'Y' | 'N' | 'U' => {
            out.push_str(OBJECT_DESCRIPTOR);
            Some(1)
        }
        'A' => parse_array_body(&data[1..], out).map(|n| 1 + n),
        'X' => parse_union_body(&data[1..], out).map(|n| 1 + n),
        'C' | 'E' | 'P' => parse_class_body(ty, &data[1..], out).map(|n| 1 + n),
        _ => None,
    }
}

fn parse_class_body(kind: char, data: &str, out: &mut String) -> Option<usize> {
    if data.len() < 3 || !data.starts_with('{') {
        return None;
    }
    let end = data.find('}')?;
    let mut name = String::with_capacity(end + 2);
    name.push('L');
    for c in data[1..end].chars() {
        if c == '/' || c == ':' {
            return None;
        }
        name.push(if c == '.' { '/' } else { c });
    }
    if kind == 'P' {
        // "La/b/X;" becomes "La/b/%%partial-X;".
        let split = name.rfind('/').map(|p| p + 1).unwrap_or(1);
        name.insert_str(split, "%%partial-");
    }
    name.push(';');
    out.push_str(&name);
    Some(end + 1)
}

fn parse_union_body(data: &str, out: &mut String) -> Option<usize> {
    if data.len() < 3 || !data.starts_with('{') {
        return None;
    }
    let mut union = String::from("{U");
    let mut previous = String::new();
    let mut pos = 1;
    while pos < data.len() && !data[pos..].starts_with('}') {
        let consumed = parse_type(&data[pos..], &mut union)?;
        let parsed = data[pos..pos + consumed].to_string();
        // Constituents arrive in ascending order of their textual encoding.
        if previous > parsed {
            return None;
        }
        previous = parsed;
        pos += consumed;
    }
    if pos >= data.len() || !data[pos..].starts_with('}') {
        return None;
    }
    union.push('}');
    out.push_str(&Type::canonicalize_descriptor(&union).ok()?);
    Some(pos + 1)
}

fn parse_array_body(data: &str, out: &mut String) -> Option<usize> {
    if data.len() < 3 || !data.starts_with('{') {
        return None;
    }
    out.push('[');
    let consumed = parse_type(&data[1..], out)?;
    if !data[1 + consumed..].starts_with('}') {
        return None;
    }
    Some(1 + consumed + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn mangled_function_name() {
        let params = vec![Type::from_name("any"), Type::from_name("any"), Type::from_name("any")];
        assert_eq!(mangle_function("func", &params), "func:(any,any,any)");
        assert_eq!(mangle_function("empty", &[]), "empty:()");
    }

    #[rstest]
    #[case("a.b.Klass", "La/b/Klass;")]
    #[case("Global", "LGlobal;")]
    fn descriptor_conversion(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(textual_descriptor(input, false).unwrap(), expected);
    }

    #[test]
    fn descriptor_rejects_classic_forms() {
        assert!(textual_descriptor("La/b/C;", false).is_err());
        assert!(textual_descriptor("a/b/C", false).is_err());
        assert!(textual_descriptor("", false).is_err());
    }

    #[test]
    fn array_descriptor_needs_opt_in() {
        assert_eq!(textual_descriptor("A{i}", true).unwrap(), "[I");
        assert!(textual_descriptor("A{i}", false).is_err());
    }

    #[rstest]
    #[case("ii:i", "II:I")]
    #[case("zcbsilfd:", "ZCBSIJFD:V")]
    #[case("C{a.b.K}:d", "La/b/K;:D")]
    #[case("A{C{a.K}}:", "[La/K;:V")]
    #[case("Y:N", "Lstd/core/Object;:Lstd/core/Object;")]
    fn signature_conversion(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(textual_signature(input).unwrap(), expected);
    }

    #[test]
    fn signature_requires_colon() {
        assert!(textual_signature("ii").is_err());
    }

    #[test]
    fn partial_class_gets_marker() {
        assert_eq!(textual_signature("P{a.b.K}:").unwrap(), "La/b/%%partial-K;:V");
    }

    #[test]
    fn union_is_canonicalised() {
        // Constituents must already be textually ordered; output is the
        // canonical classic union descriptor.
        let out = textual_signature("X{di}:").unwrap();
        assert_eq!(out, "{UDI}:V");
        // Out-of-order constituents are rejected.
        assert!(textual_signature("X{id}:").is_err());
    }
}
