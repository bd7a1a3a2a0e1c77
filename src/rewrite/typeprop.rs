//! Value type inference over the def-use graph.
//!
//! Instruction outputs get their types from their operation (constants,
//! allocations, casts) or from interned descriptors (invokes, field
//! reads, arguments). Phis merge their operand types and are iterated to
//! a fixpoint so cyclic phi dependencies settle instead of yielding
//! spurious results.

use crate::{
    ir::{Instruction, IrGraph, ValueType},
    refs::{AccessFlags, ProgramView, RefInterner, TypeId},
};

/// The IR value type a reference type produces.
///
/// Primitive descriptors map to their primitive lattice points,
/// everything else is a reference of that class.
#[must_use]
pub fn value_type_of(interner: &RefInterner, ty: TypeId) -> ValueType {
    match interner.type_descriptor(ty) {
        Some("I") => ValueType::Int,
        Some("J") => ValueType::Long,
        Some("D") => ValueType::Double,
        _ => ValueType::Class(ty),
    }
}

/// Recomputes every value's type from definitions, to a fixpoint.
pub fn propagate_types(graph: &mut IrGraph, view: &ProgramView) {
    loop {
        let mut changed = false;
        for id in graph.block_ids().collect::<Vec<_>>() {
            let mut updates = Vec::new();
            {
                let block = graph.block(id);
                for phi in &block.phis {
                    let merged = phi
                        .operands
                        .iter()
                        .fold(ValueType::Unknown, |acc, &op| {
                            acc.merge(graph.value_type(op))
                        });
                    if graph.value_type(phi.out) != &merged {
                        updates.push((phi.out, merged));
                    }
                }
                for instr in &block.instructions {
                    let Some(out) = instr.out else { continue };
                    let Some(ty) = output_type(graph, view, &instr.kind) else {
                        continue;
                    };
                    if graph.value_type(out) != &ty {
                        updates.push((out, ty));
                    }
                }
            }
            for (value, ty) in updates {
                graph.set_value_type(value, ty);
                changed = true;
            }
        }
        if !changed {
            return;
        }
    }
}

/// Type of an instruction's defined value, `None` when the instruction
/// contributes no type information of its own.
fn output_type(graph: &IrGraph, view: &ProgramView, kind: &Instruction) -> Option<ValueType> {
    match kind {
        Instruction::Argument { index } => Some(argument_type(graph, view, *index)),
        Instruction::ConstNumber { .. }
        | Instruction::Binop { .. }
        | Instruction::InstanceOf { .. } => Some(ValueType::Int),
        Instruction::ConstString { .. } => Some(ValueType::Object),
        Instruction::ConstNull => Some(ValueType::Null),
        Instruction::Invoke { method, .. } => {
            let desc = view.interner.method_desc(*method)?;
            let ret = desc.proto.ret?;
            Some(value_type_of(&view.interner, ret))
        }
        Instruction::StaticGet { field } | Instruction::InstanceGet { field, .. } => {
            let desc = view.interner.field_desc(*field)?;
            Some(value_type_of(&view.interner, desc.ty))
        }
        Instruction::NewInstance { ty } | Instruction::CheckCast { ty, .. } => {
            Some(ValueType::Class(*ty))
        }
        _ => None,
    }
}

/// Type of the formal argument at `index`, receiver included.
fn argument_type(graph: &IrGraph, view: &ProgramView, index: u32) -> ValueType {
    let method = graph.method();
    let Some(desc) = view.interner.method_desc(method.method) else {
        return ValueType::Unknown;
    };
    let is_static = match view.method_def(method.method) {
        Some(def) => def.flags.contains(AccessFlags::STATIC),
        // No definition registered: infer from the argument count, which
        // includes the receiver for instance methods.
        None => graph.num_args() as usize == desc.proto.arity(),
    };
    let param = if is_static {
        index as usize
    } else {
        if index == 0 {
            return ValueType::Class(method.holder);
        }
        index as usize - 1
    };
    match desc.proto.params.get(param) {
        Some(&ty) => value_type_of(&view.interner, ty),
        None => ValueType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{build_ir, BlockId, CodeBlock, CodeInst, CodeObject, ConstValue, IfKind},
        lens::LensId,
        refs::{MethodProto, ProgramMethod},
    };

    fn int_type(view: &ProgramView) -> TypeId {
        view.interner.intern_type("I")
    }

    #[test]
    fn test_descriptor_mapping() {
        let view = ProgramView::new();
        let int = view.interner.intern_type("I");
        let long = view.interner.intern_type("J");
        let class = view.interner.intern_type("com/example/A");
        assert_eq!(value_type_of(&view.interner, int), ValueType::Int);
        assert_eq!(value_type_of(&view.interner, long), ValueType::Long);
        assert_eq!(
            value_type_of(&view.interner, class),
            ValueType::Class(class)
        );
    }

    #[test]
    fn test_argument_types_from_prototype() {
        let view = ProgramView::new();
        let holder = view.interner.intern_type("com/example/A");
        let other = view.interner.intern_type("com/example/B");
        let method = view.interner.intern_method(
            holder,
            "consume",
            MethodProto::new(None, vec![other, int_type(&view)]),
        );

        // Instance method: receiver plus two declared parameters.
        let mut code = CodeObject::new(3);
        code.blocks.push(CodeBlock {
            instructions: vec![CodeInst::Return { src: None }],
            catches: Vec::new(),
        });
        let mut graph =
            build_ir(ProgramMethod::new(holder, method), &code, LensId::BASE).unwrap();
        propagate_types(&mut graph, &view);

        let entry = graph.block(graph.entry());
        let args: Vec<ValueType> = entry
            .instructions
            .iter()
            .filter_map(|i| i.out)
            .map(|v| graph.value_type(v).clone())
            .collect();
        assert_eq!(
            args,
            vec![
                ValueType::Class(holder),
                ValueType::Class(other),
                ValueType::Int
            ]
        );
    }

    #[test]
    fn test_phi_fixpoint_over_loop() {
        let view = ProgramView::new();
        let holder = view.interner.intern_type("com/example/A");
        let method =
            view.interner
                .intern_method(holder, "count", MethodProto::new(None, vec![int_type(&view)]));

        // r1 cycles through a loop phi; its type must settle on Int.
        let mut code = CodeObject::new(1);
        code.num_registers = 2;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::Const {
                    dest: 1,
                    value: ConstValue::Number(0),
                },
                CodeInst::Goto { target: 1 },
            ],
            catches: Vec::new(),
        });
        code.blocks.push(CodeBlock {
            instructions: vec![CodeInst::If {
                kind: IfKind::Ne,
                lhs: 1,
                rhs: Some(0),
                then_target: 2,
                else_target: 3,
            }],
            catches: Vec::new(),
        });
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::Binop {
                    dest: 1,
                    op: crate::ir::BinopKind::Add,
                    lhs: 1,
                    rhs: 0,
                },
                CodeInst::Goto { target: 1 },
            ],
            catches: Vec::new(),
        });
        code.blocks.push(CodeBlock {
            instructions: vec![CodeInst::Return { src: Some(1) }],
            catches: Vec::new(),
        });

        let mut graph =
            build_ir(ProgramMethod::new(holder, method), &code, LensId::BASE).unwrap();
        propagate_types(&mut graph, &view);

        let header = graph.block(BlockId::new(2));
        assert_eq!(graph.value_type(header.phis[0].out), &ValueType::Int);
    }
}
