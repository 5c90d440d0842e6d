use crate::ir::{Graph, InstId, Opcode};

/// Disjoint memory-location class of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasClass {
    /// `array[index]`; `index` is the constant value when known.
    ArrayElement {
        /// The array reference with checks stripped.
        array: InstId,
        /// Constant index, if the index operand folds.
        index: Option<i64>,
    },
    /// An instance field.
    ObjectField {
        /// The object reference with checks stripped.
        object: InstId,
        /// Field type-id.
        field: u32,
    },
    /// A static field.
    StaticField {
        /// Field type-id.
        field: u32,
    },
}

/// Strips check instructions off a reference operand, yielding the SSA
/// root the runtime actually addresses.
fn strip_checks(graph: &Graph, mut inst: InstId) -> InstId {
    loop {
        match graph.inst(inst).opcode() {
            Opcode::NullCheck | Opcode::RefTypeCheck => inst = graph.inst(inst).input(0),
            _ => return inst,
        }
    }
}

fn index_root(graph: &Graph, mut inst: InstId) -> InstId {
    while graph.inst(inst).opcode() == Opcode::BoundsCheck {
        inst = graph.inst(inst).input(1);
    }
    inst
}

/// Classifies a memory instruction; `None` for everything else.
pub fn alias_class(graph: &Graph, inst: InstId) -> Option<AliasClass> {
    let data = graph.inst(inst);
    match data.opcode() {
        Opcode::LoadArray | Opcode::StoreArray => {
            let array = strip_checks(graph, data.input(0));
            let index = index_root(graph, data.input(1));
            Some(AliasClass::ArrayElement {
                array,
                index: graph.inst(index).const_int(),
            })
        }
        Opcode::LoadObject | Opcode::StoreObject => Some(AliasClass::ObjectField {
            object: strip_checks(graph, data.input(0)),
            field: data.type_id().unwrap_or(0),
        }),
        Opcode::LoadStatic | Opcode::StoreStatic => {
            Some(AliasClass::StaticField { field: data.type_id().unwrap_or(0) })
        }
        _ => None,
    }
}

/// Whether two memory instructions may address the same location.
/// Non-memory instructions never alias.
pub fn may_alias(graph: &Graph, a: InstId, b: InstId) -> bool {
    let (Some(ca), Some(cb)) = (alias_class(graph, a), alias_class(graph, b)) else {
        return false;
    };
    match (ca, cb) {
        (
            AliasClass::ArrayElement { array: a1, index: i1 },
            AliasClass::ArrayElement { array: a2, index: i2 },
        ) => {
            if a1 == a2 {
                // Same array: distinct constant indexes cannot collide.
                !matches!((i1, i2), (Some(x), Some(y)) if x != y)
            } else {
                // Two distinct fresh allocations never overlap.
                !(is_alloc(graph, a1) && is_alloc(graph, a2))
            }
        }
        (
            AliasClass::ObjectField { object: o1, field: f1 },
            AliasClass::ObjectField { object: o2, field: f2 },
        ) => {
            if f1 != f2 {
                return false;
            }
            o1 == o2 || !(is_alloc(graph, o1) && is_alloc(graph, o2))
        }
        (AliasClass::StaticField { field: f1 }, AliasClass::StaticField { field: f2 }) => f1 == f2,
        _ => false,
    }
}

fn is_alloc(graph: &Graph, inst: InstId) -> bool {
    matches!(graph.inst(inst).opcode(), Opcode::NewArray | Opcode::NewObject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, GraphMode};

    fn array_store(graph: &mut Graph, block: crate::ir::BlockId, array: InstId, index: i64) -> InstId {
        let idx = graph.find_or_create_constant(index);
        let value = graph.find_or_create_constant(0);
        graph
            .build(Opcode::StoreArray, DataType::NoType)
            .inputs(&[array, idx, value])
            .append_to(block)
    }

    #[test]
    fn distinct_constant_indexes_do_not_alias() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let start = g.start_block();

        let arr = g.build(Opcode::Parameter, DataType::Reference).append_to(start);
        let s0 = array_store(&mut g, b, arr, 0);
        let s1 = array_store(&mut g, b, arr, 1);
        let s0b = array_store(&mut g, b, arr, 0);
        assert!(!may_alias(&g, s0, s1));
        assert!(may_alias(&g, s0, s0b));
    }

    #[test]
    fn fields_alias_only_with_same_id() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let start = g.start_block();

        let obj = g.build(Opcode::Parameter, DataType::Reference).append_to(start);
        let v = g.find_or_create_constant(1);
        let f1 = g
            .build(Opcode::StoreObject, DataType::NoType)
            .inputs(&[obj, v])
            .type_id(10)
            .append_to(b);
        let f2 = g
            .build(Opcode::StoreObject, DataType::NoType)
            .inputs(&[obj, v])
            .type_id(11)
            .append_to(b);
        assert!(!may_alias(&g, f1, f2));
    }

    #[test]
    fn separate_allocations_do_not_alias() {
        let mut g = Graph::new(GraphMode::default());
        let b = g.create_block();
        g.connect(g.start_block(), b);
        g.connect(b, g.end_block());
        let size = g.find_or_create_constant(4);
        let ss = g.build(Opcode::SaveState, DataType::NoType).append_to(b);
        let cls = g.build(Opcode::LoadAndInitClass, DataType::Reference).inputs(&[ss]).type_id(1).append_to(b);
        let a1 = g
            .build(Opcode::NewArray, DataType::Reference)
            .inputs(&[cls, size, ss])
            .append_to(b);
        let a2 = g
            .build(Opcode::NewArray, DataType::Reference)
            .inputs(&[cls, size, ss])
            .append_to(b);
        let s1 = array_store(&mut g, b, a1, 0);
        let s2 = array_store(&mut g, b, a2, 0);
        assert!(!may_alias(&g, s1, s2));
    }
}
