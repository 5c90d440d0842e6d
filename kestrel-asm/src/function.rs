use std::collections::HashMap;

use kestrel_types::{mangle_function, Type};

use crate::debuginfo::{FileLocation, LocalVariable, SourceLocation};
use crate::ins::Ins;
use crate::meta::{AccessFlags, FunctionMetadata, Metadata};

/// A label defined inside a function body.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Declaration line, if parsed from a file.
    pub line_of_def: Option<usize>,
}

/// A formal parameter.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Parameter {
    /// Declared type.
    pub ty: Type,
}

impl Parameter {
    /// Creates a parameter of the given type.
    pub fn new(ty: Type) -> Self {
        Self { ty }
    }
}

/// A `.catch` / `.catchall` directive: the guarded label range and the
/// handler entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CatchBlock {
    /// Exception record name; empty for catch-all.
    pub exception_record: String,
    /// Label opening the guarded range.
    pub try_begin_label: String,
    /// Label closing the guarded range.
    pub try_end_label: String,
    /// Label of the handler entry.
    pub catch_begin_label: String,
    /// Label of the handler end.
    pub catch_end_label: String,
}

/// A function: the instruction list plus everything the emitter needs to
/// serialise it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Function {
    /// Unqualified name; the mangled table key comes from
    /// [`Function::mangled_name`].
    pub name: String,
    /// Formal parameters in order.
    pub params: Vec<Parameter>,
    /// Declared return type.
    pub return_type: Type,
    /// Instruction list, the textual body.
    pub ins: Vec<Ins>,
    /// Labels defined in the body.
    pub label_table: HashMap<String, Label>,
    /// Guarded ranges in first-appearance order of their `try_begin`.
    pub catch_blocks: Vec<CatchBlock>,
    /// Local-variable debug records.
    pub local_variables: Vec<LocalVariable>,
    /// Access flags and attributes.
    pub metadata: FunctionMetadata,
    /// Number of non-parameter registers the body uses.
    pub regs_num: u32,
    /// Whether a body was present in the source.
    pub body_presence: bool,
    /// Declaration location, if parsed from a file.
    pub file_location: Option<FileLocation>,
    /// Body span for IDE tooling.
    pub body_location: SourceLocation,
    /// Source file of the declaration, empty when unknown.
    pub source_file: String,
}

impl Function {
    /// Creates a function with a `void` return type and no body.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            return_type: Type::from_name("void"),
            ins: Vec::new(),
            label_table: HashMap::new(),
            catch_blocks: Vec::new(),
            local_variables: Vec::new(),
            metadata: FunctionMetadata::default(),
            regs_num: 0,
            body_presence: false,
            file_location: None,
            body_location: SourceLocation::default(),
            source_file: String::new(),
        }
    }

    /// The mangled table key: name plus parameter type names.
    pub fn mangled_name(&self) -> String {
        let params: Vec<Type> = self.params.iter().map(|p| p.ty.clone()).collect();
        mangle_function(&self.name, &params)
    }

    /// Appends an instruction to the body.
    pub fn add_instruction(&mut self, ins: Ins) {
        self.ins.push(ins);
    }

    /// Whether the function is static.
    pub fn is_static(&self) -> bool {
        self.metadata.access_flags().contains(AccessFlags::STATIC)
    }

    /// Number of registers including parameter registers.
    pub fn total_regs(&self) -> usize {
        self.regs_num as usize + self.params.len()
    }

    /// Registers at or above `regs_num` hold parameters.
    pub fn is_parameter_reg(&self, reg: u16) -> bool {
        u32::from(reg) >= self.regs_num
    }

    /// Whether any instruction can raise a managed exception.
    pub fn can_throw(&self) -> bool {
        self.ins.iter().any(Ins::can_throw)
    }

    /// Whether any instruction carries a source mapping.
    pub fn has_debug_info(&self) -> bool {
        self.ins.iter().any(Ins::has_debug_info)
    }

    /// Defines a label, remembering its declaration line.
    pub fn define_label(&mut self, name: impl Into<String>, line: Option<usize>) {
        let name = name.into();
        self.label_table.insert(name.clone(), Label { name, line_of_def: line });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ins::AsmOpcode;

    #[test]
    fn mangled_name_includes_parameter_names() {
        let mut f = Function::new("foo");
        f.params.push(Parameter::new(Type::from_name("i32")));
        f.params.push(Parameter::new(Type::from_name("std.core.String[]")));
        assert_eq!(f.mangled_name(), "foo:(i32,std.core.String[])");
    }

    #[test]
    fn parameter_registers_follow_locals() {
        let mut f = Function::new("foo");
        f.regs_num = 3;
        f.params.push(Parameter::new(Type::from_name("i32")));
        assert!(!f.is_parameter_reg(2));
        assert!(f.is_parameter_reg(3));
        assert_eq!(f.total_regs(), 4);
    }

    #[test]
    fn can_throw_scans_the_body() {
        let mut f = Function::new("foo");
        f.add_instruction(Ins::new(AsmOpcode::Ldai).imm(1i64));
        assert!(!f.can_throw());
        f.add_instruction(Ins::new(AsmOpcode::Div2).reg(0));
        assert!(f.can_throw());
    }
}
