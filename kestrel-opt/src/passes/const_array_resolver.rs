use kestrel_asm::{Literal, LiteralArray, LiteralTag, LiteralValue};
use kestrel_types::Type;
use tracing::debug;

use crate::analysis::compute_rpo;
use crate::ir::{DataType, Graph, InstId, Opcode};

use super::{Pass, PassContext, PassError};

const MIN_ARRAY_ELEMENTS_AMOUNT: usize = 2;
const SINGLE_DIM_ARRAY_RANK: usize = 1;

/// Turns a `NewArray` followed by an uninterrupted run of constant
/// `StoreArray`s into a literal-array load.
///
/// The filling patch is recognised backwards from its stores; the literal
/// array is registered in the program table under the next free integer
/// id, and the allocation site becomes `SaveState` + `LoadConstArray`.
#[derive(Debug, Default)]
pub struct ConstArrayResolver {
    applied: bool,
}

impl Pass for ConstArrayResolver {
    fn name(&self) -> &'static str {
        "const-array-resolver"
    }

    fn run(&mut self, graph: &mut Graph, ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        self.applied = false;
        if ctx.program.is_none() {
            return Ok(false);
        }
        let candidates = self.find_constant_arrays(graph, ctx);
        for (id, new_array, stores) in candidates {
            self.remove_array_fill(graph, &stores);
            self.insert_load_const_array(graph, id, new_array);
        }
        Ok(self.applied)
    }
}

/// Opcodes allowed to appear inside a filling patch.
fn is_patch_allowed(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::StoreArray | Opcode::LoadString | Opcode::Constant | Opcode::Cast
            | Opcode::SaveState
    )
}

impl ConstArrayResolver {
    fn find_constant_arrays(
        &mut self,
        graph: &mut Graph,
        ctx: &mut PassContext<'_>,
    ) -> Vec<(u32, InstId, Vec<InstId>)> {
        let program = ctx.program.as_deref_mut().expect("checked by run");
        let mut out = Vec::new();
        let mut claimed: std::collections::HashSet<InstId> = std::collections::HashSet::new();
        for bb in compute_rpo(graph) {
            // Walk backwards until a store ends a potential patch.
            for id in graph.block_insts(bb).into_iter().rev() {
                if graph.inst(id).opcode() != Opcode::StoreArray {
                    continue;
                }
                let array = graph.inst(id).input(0);
                if graph.inst(array).opcode() != Opcode::NewArray || claimed.contains(&array) {
                    continue;
                }
                if graph.inst(array).block() != Some(bb) {
                    continue;
                }
                let Some(elem_ty) = array_component(graph, array) else { continue };
                if elem_ty.rank() + 1 > SINGLE_DIM_ARRAY_RANK {
                    // Multidimensional arrays are not encodable yet.
                    continue;
                }
                let Some(size) = constant_value(graph, graph.inst(array).input(1)) else {
                    continue;
                };
                if size < MIN_ARRAY_ELEMENTS_AMOUNT as i64 {
                    continue;
                }
                let Some((literals, stores)) =
                    self.fill_literal_array(graph, array, &elem_ty, size as usize)
                else {
                    continue;
                };
                let array_id = program.literal_array_count() as u32;
                program.add_literal_array(array_id.to_string(), LiteralArray::with_intro(literals));
                debug!(array = %array, id = array_id, "constant array resolved");
                claimed.insert(array);
                out.push((array_id, array, stores));
                self.applied = true;
            }
        }
        out
    }

    /// Collects one literal per element for an uninterrupted fill of
    /// positions `0..size`, or gives up.
    fn fill_literal_array(
        &self,
        graph: &Graph,
        new_array: InstId,
        elem_ty: &Type,
        size: usize,
    ) -> Option<(Vec<Literal>, Vec<InstId>)> {
        let bb = graph.inst(new_array).block()?;
        let insts = graph.block_insts(bb);
        let start = insts.iter().position(|&i| i == new_array)?;
        let mut literals = Vec::with_capacity(size);
        let mut stores = Vec::with_capacity(size);
        for &next in &insts[start + 1..] {
            if literals.len() == size {
                break;
            }
            let op = graph.inst(next).opcode();
            if !is_patch_allowed(op) {
                break;
            }
            if op != Opcode::StoreArray {
                continue;
            }
            if graph.inst(next).input(0) != new_array {
                break;
            }
            // The patch must fill positions in order.
            let index = constant_value(graph, graph.inst(next).input(1))?;
            if index != literals.len() as i64 {
                return None;
            }
            literals.push(self.fill_literal(graph, next, elem_ty)?);
            stores.push(next);
        }
        if literals.len() < size || stores.len() < MIN_ARRAY_ELEMENTS_AMOUNT {
            return None;
        }
        Some((literals, stores))
    }

    fn fill_literal(&self, graph: &Graph, store: InstId, elem_ty: &Type) -> Option<Literal> {
        let value = graph.inst(store).input(2);
        if elem_ty.is_primitive() {
            let tag = LiteralTag::from_component(elem_ty.type_id())?;
            let raw = constant_value(graph, value)?;
            let literal_value = match tag {
                LiteralTag::ArrayU1 => LiteralValue::Bool(raw != 0),
                LiteralTag::ArrayU8 | LiteralTag::ArrayI8 => LiteralValue::U8(raw as u8),
                LiteralTag::ArrayU16 | LiteralTag::ArrayI16 => LiteralValue::U16(raw as u16),
                LiteralTag::ArrayU32 | LiteralTag::ArrayI32 => LiteralValue::U32(raw as u32),
                LiteralTag::ArrayU64 | LiteralTag::ArrayI64 => LiteralValue::U64(raw as u64),
                LiteralTag::ArrayF32 => float_literal(graph, value, true)?,
                LiteralTag::ArrayF64 => float_literal(graph, value, false)?,
                _ => return None,
            };
            return Some(Literal { tag, value: literal_value });
        }
        if graph.inst(value).opcode() == Opcode::LoadString
            && elem_ty.component_name() == "std.core.String"
        {
            let string_id = graph.inst(value).type_id()?;
            return Some(Literal {
                tag: LiteralTag::ArrayString,
                value: LiteralValue::String(graph.string(string_id).to_string()),
            });
        }
        None
    }

    fn remove_array_fill(&mut self, graph: &mut Graph, stores: &[InstId]) {
        for &store in stores {
            graph.remove_inst(store);
        }
    }

    fn insert_load_const_array(&mut self, graph: &mut Graph, id: u32, new_array: InstId) {
        let save_state = graph.build(Opcode::SaveState, DataType::NoType).before(new_array);
        let load = graph
            .build(Opcode::LoadConstArray, DataType::Reference)
            .inputs(&[save_state])
            .type_id(id)
            .after(save_state);
        graph.replace_users(new_array, load);
        graph.remove_inst(new_array);
    }
}

/// Constant value of an instruction, looking through casts of constants.
fn constant_value(graph: &Graph, inst: InstId) -> Option<i64> {
    match graph.inst(inst).opcode() {
        Opcode::Constant => graph.inst(inst).const_int(),
        Opcode::Cast => {
            let input = graph.inst(inst).input(0);
            if graph.inst(input).opcode() == Opcode::NullPtr {
                return None;
            }
            graph.inst(input).const_int()
        }
        _ => None,
    }
}

fn float_literal(graph: &Graph, value: InstId, single: bool) -> Option<LiteralValue> {
    let inst = match graph.inst(value).opcode() {
        Opcode::Constant => value,
        Opcode::Cast => graph.inst(value).input(0),
        _ => return None,
    };
    match graph.inst(inst).imm()? {
        crate::ir::Imm::Float(f) => {
            Some(if single { LiteralValue::F32(f as f32) } else { LiteralValue::F64(f) })
        }
        crate::ir::Imm::Int(v) => {
            Some(if single { LiteralValue::F32(v as f32) } else { LiteralValue::F64(v as f64) })
        }
    }
}

/// The element type of the array a `NewArray` allocates.
fn array_component(graph: &Graph, new_array: InstId) -> Option<Type> {
    let tid = graph.inst(new_array).type_id()?;
    let array_ty = Type::from_name(graph.type_name(tid));
    if array_ty.rank() == 0 {
        return None;
    }
    Some(array_ty.component_type())
}

