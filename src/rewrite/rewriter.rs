//! The lens code rewriter: replays unapplied chain records over a graph.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::{
        BlockId, CatchHandler, ConstValue, Instr, Instruction, InvokeKind, IrGraph, ValueId,
        ValueType, MAX_ARGUMENTS,
    },
    lens::{LensChain, LensId, ReturnChange, RewrittenPrototypeDescription},
    refs::{ProgramView, TypeId},
    rewrite::{
        intervals::{unapplied_intervals, RewriteInterval},
        typeprop::propagate_types,
    },
    Error, Result,
};

/// Rewrites method graphs from their code lens to the chain head.
///
/// The rewriter is stateless between methods; one instance serves a whole
/// wave of workers by shared reference.
pub struct LensCodeRewriter<'a> {
    chain: &'a LensChain,
    view: &'a ProgramView,
}

impl<'a> LensCodeRewriter<'a> {
    /// Creates a rewriter over the shared chain and program view.
    #[must_use]
    pub fn new(chain: &'a LensChain, view: &'a ProgramView) -> Self {
        LensCodeRewriter { chain, view }
    }

    /// Brings `graph` up to date with the chain head.
    ///
    /// Rewriting an already-current graph is a no-op, so replaying twice
    /// to the same head cannot double-apply any record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArgumentCountOverflow`] when a prototype rewrite
    /// grows an invoke past [`MAX_ARGUMENTS`], and propagates chain walk
    /// and hook failures.
    pub fn rewrite(&self, graph: &mut IrGraph) -> Result<()> {
        let head = self.chain.head();
        if graph.code_lens() == head {
            return Ok(());
        }
        for interval in unapplied_intervals(self.chain, graph.code_lens())? {
            self.apply_interval(graph, &interval)?;
            if let Some(hook) = &interval.hook {
                hook.rewrite(graph)?;
            }
            graph.set_code_lens(interval.head);
            propagate_types(graph, self.view);
        }
        graph.remove_unreachable_blocks();
        Ok(())
    }

    fn apply_interval(&self, graph: &mut IrGraph, interval: &RewriteInterval) -> Result<()> {
        for id in graph.block_ids().collect::<Vec<_>>() {
            self.rewrite_instructions(graph, id, interval)?;
        }
        for id in graph.block_ids().collect::<Vec<_>>() {
            self.rewrite_catch_handlers(graph, id, interval)?;
        }
        Ok(())
    }

    fn lookup_type(&self, ty: TypeId, interval: &RewriteInterval) -> Result<TypeId> {
        let mapped = self
            .chain
            .lookup_type_between(ty, interval.stop, interval.head)?;
        // Identity fallback is reserved for references outside the
        // program; a library type moving would mean a corrupted record.
        debug_assert!(
            !self.view.interner.is_library(ty) || mapped == ty,
            "library type {ty} must resolve to itself"
        );
        Ok(mapped)
    }

    fn rewrite_instructions(
        &self,
        graph: &mut IrGraph,
        id: BlockId,
        interval: &RewriteInterval,
    ) -> Result<()> {
        let instructions = std::mem::take(&mut graph.block_mut(id).instructions);
        let mut rewritten = Vec::with_capacity(instructions.len());
        for mut instr in instructions {
            match &mut instr.kind {
                Instruction::NewInstance { ty }
                | Instruction::CheckCast { ty, .. }
                | Instruction::InstanceOf { ty, .. }
                | Instruction::InitClass { ty } => {
                    *ty = self.lookup_type(*ty, interval)?;
                    rewritten.push(instr);
                }
                Instruction::StaticGet { field } | Instruction::InstanceGet { field, .. } => {
                    let result = self
                        .chain
                        .lookup_field_between(*field, interval.stop, interval.head)?;
                    *field = result.bound_reference();
                    match result.read_cast {
                        Some(cast_ty) if instr.out.is_some() => {
                            // The raw load lands in a fresh value; the
                            // original id becomes the cast result so every
                            // user sees the expected type.
                            let expected = instr.out.take();
                            let raw = graph.alloc_value(ValueType::Unknown);
                            instr.out = Some(raw);
                            rewritten.push(instr);
                            rewritten.push(Instr::new(
                                Instruction::CheckCast {
                                    ty: cast_ty,
                                    value: raw,
                                },
                                expected,
                            ));
                        }
                        _ => rewritten.push(instr),
                    }
                }
                Instruction::StaticPut { field, value }
                | Instruction::InstancePut { field, value, .. } => {
                    let result = self
                        .chain
                        .lookup_field_between(*field, interval.stop, interval.head)?;
                    *field = result.bound_reference();
                    if let Some(cast_ty) = result.write_cast {
                        let cast_out = graph.alloc_value(ValueType::Class(cast_ty));
                        rewritten.push(Instr::new(
                            Instruction::CheckCast {
                                ty: cast_ty,
                                value: *value,
                            },
                            Some(cast_out),
                        ));
                        *value = cast_out;
                    }
                    rewritten.push(instr);
                }
                Instruction::Invoke { .. } => {
                    self.rewrite_invoke(graph, instr, interval, &mut rewritten)?;
                }
                _ => rewritten.push(instr),
            }
        }
        graph.block_mut(id).instructions = rewritten;
        Ok(())
    }

    fn rewrite_invoke(
        &self,
        graph: &mut IrGraph,
        mut instr: Instr,
        interval: &RewriteInterval,
        rewritten: &mut Vec<Instr>,
    ) -> Result<()> {
        let Instruction::Invoke { kind, method, args } = &mut instr.kind else {
            return Err(invalid_ir_error!("invoke rewrite on a non-invoke"));
        };
        let receiver_count = match kind {
            InvokeKind::Static => 0,
            InvokeKind::Virtual | InvokeKind::Direct => 1,
        };
        let arity = args.len() - receiver_count;
        let result =
            self.chain
                .lookup_method_between(*method, arity, interval.stop, interval.head)?;
        let changes = &result.prototype_changes;

        if !changes.is_empty() {
            let mut params: Vec<Option<ValueId>> =
                args[receiver_count..].iter().copied().map(Some).collect();

            // Retypes address original indices, so they apply before the
            // removals shift anything.
            for retype in &changes.retyped {
                let slot = params.get_mut(retype.index).ok_or_else(|| {
                    invalid_ir_error!("retyped parameter {} out of range", retype.index)
                })?;
                let value = slot.ok_or_else(|| {
                    invalid_ir_error!("retyped parameter {} already removed", retype.index)
                })?;
                if self.needs_cast(graph, value, retype.new_type) {
                    let cast_out = graph.alloc_value(ValueType::Class(retype.new_type));
                    rewritten.push(Instr::new(
                        Instruction::CheckCast {
                            ty: retype.new_type,
                            value,
                        },
                        Some(cast_out),
                    ));
                    *slot = Some(cast_out);
                }
            }
            for removal in &changes.removed {
                let slot = params.get_mut(removal.index).ok_or_else(|| {
                    invalid_ir_error!("removed parameter {} out of range", removal.index)
                })?;
                *slot = None;
            }
            let mut new_args: Vec<ValueId> = args[..receiver_count].to_vec();
            new_args.extend(params.into_iter().flatten());
            for appended in &changes.appended {
                let value = self.materialize(graph, &appended.value, rewritten);
                new_args.push(value);
            }
            if new_args.len() > MAX_ARGUMENTS {
                return Err(Error::ArgumentCountOverflow {
                    method: result.reference,
                    count: new_args.len(),
                    limit: MAX_ARGUMENTS,
                });
            }
            *args = new_args;
        }
        *method = result.bound_reference();

        match (&changes.return_change, instr.out) {
            (Some(ReturnChange::RemovedWithConstant(constant)), Some(out)) => {
                let constant = constant.clone();
                instr.out = None;
                rewritten.push(instr);
                let replacement = self.const_instruction(&constant);
                graph.set_value_type(out, constant.value_type());
                rewritten.push(Instr::new(replacement, Some(out)));
            }
            (Some(ReturnChange::Retyped(new_type)), Some(out)) => {
                let new_type = *new_type;
                let raw = graph.alloc_value(ValueType::Unknown);
                instr.out = Some(raw);
                rewritten.push(instr);
                rewritten.push(Instr::new(
                    Instruction::CheckCast {
                        ty: new_type,
                        value: raw,
                    },
                    Some(out),
                ));
            }
            _ => rewritten.push(instr),
        }
        Ok(())
    }

    /// Returns `true` when `value` is not already known to satisfy
    /// `target`, so a checked cast must guard the narrowing.
    fn needs_cast(&self, graph: &IrGraph, value: ValueId, target: TypeId) -> bool {
        match graph.value_type(value) {
            ValueType::Class(class) => !self.view.is_subtype(*class, target),
            ValueType::Null => false,
            _ => true,
        }
    }

    fn const_instruction(&self, constant: &ConstValue) -> Instruction {
        match constant {
            ConstValue::Number(value) => Instruction::ConstNumber { value: *value },
            ConstValue::String(value) => Instruction::ConstString {
                value: value.clone(),
            },
            ConstValue::Null => Instruction::ConstNull,
        }
    }

    fn materialize(
        &self,
        graph: &mut IrGraph,
        constant: &ConstValue,
        rewritten: &mut Vec<Instr>,
    ) -> ValueId {
        let out = graph.alloc_value(constant.value_type());
        rewritten.push(Instr::new(self.const_instruction(constant), Some(out)));
        out
    }

    /// Rewrites catch guards and drops handlers made redundant by a type
    /// merge. The first handler of a guard wins; later duplicates can
    /// never match and their exception edges are retired.
    fn rewrite_catch_handlers(
        &self,
        graph: &mut IrGraph,
        id: BlockId,
        interval: &RewriteInterval,
    ) -> Result<()> {
        if graph.block(id).catch_handlers.is_empty() {
            return Ok(());
        }
        let handlers = graph.block(id).catch_handlers.clone();
        let mut kept = Vec::with_capacity(handlers.len());
        let mut seen = HashSet::new();
        // (target, occurrence among this block's catches to that target)
        let mut dropped: Vec<(BlockId, usize)> = Vec::new();
        let mut occurrence: HashMap<BlockId, usize> = HashMap::new();
        for handler in handlers {
            let guard = self.lookup_type(handler.guard, interval)?;
            let index = occurrence.entry(handler.target).or_insert(0);
            let this_occurrence = *index;
            *index += 1;
            if seen.insert(guard) {
                kept.push(CatchHandler {
                    guard,
                    target: handler.target,
                });
            } else {
                dropped.push((handler.target, this_occurrence));
            }
        }
        graph.block_mut(id).catch_handlers = kept;

        // Retire the matching exceptional predecessor entries, highest
        // occurrence first so earlier positions stay valid.
        dropped.sort_by(|a, b| b.1.cmp(&a.1));
        for (target, occurrence) in dropped {
            let position = graph
                .block(target)
                .predecessors
                .iter()
                .enumerate()
                .filter(|(_, &p)| p == id)
                .map(|(position, _)| position)
                .nth(occurrence)
                .ok_or_else(|| {
                    invalid_ir_error!("missing exception edge from {} to {}", id, target)
                })?;
            graph.block_mut(target).remove_predecessor(position);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        ir::{build_ir, CodeBlock, CodeInst, CodeObject},
        lens::{
            AppendedParameter, FieldMapping, InstructionRewriteHook, LensRecord, MethodMapping,
            RemovedParameter,
        },
        refs::{MethodId, MethodProto, ProgramMethod},
    };

    fn simple_call_graph(
        view: &ProgramView,
        callee: MethodId,
        args: Vec<crate::ir::Register>,
    ) -> IrGraph {
        let holder = view.interner.intern_type("com/example/Caller");
        let caller = view
            .interner
            .intern_method(holder, "call", MethodProto::void());
        let mut code = CodeObject::new(args.len() as u32);
        code.num_registers = args.len() as u32;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::InvokeStatic {
                    dest: None,
                    method: callee,
                    args,
                },
                CodeInst::Return { src: None },
            ],
            catches: Vec::new(),
        });
        build_ir(ProgramMethod::new(holder, caller), &code, LensId::BASE).unwrap()
    }

    fn find_invoke(graph: &IrGraph) -> (MethodId, Vec<ValueId>) {
        for id in graph.block_ids() {
            for instr in &graph.block(id).instructions {
                if let Instruction::Invoke { method, args, .. } = &instr.kind {
                    return (*method, args.clone());
                }
            }
        }
        panic!("no invoke in graph");
    }

    #[test]
    fn test_rewrite_to_same_head_is_noop() {
        let view = ProgramView::new();
        let chain = LensChain::new();
        let callee = view.interner.intern_method(
            view.interner.intern_type("com/example/Util"),
            "helper",
            MethodProto::void(),
        );
        chain
            .append(LensRecord::new(LensId::BASE).with_method_mapping(
                callee,
                MethodMapping::renamed(view.interner.intern_method(
                    view.interner.intern_type("com/example/Util"),
                    "renamed",
                    MethodProto::void(),
                )),
            ))
            .unwrap();

        let mut graph = simple_call_graph(&view, callee, vec![]);
        let rewriter = LensCodeRewriter::new(&chain, &view);
        rewriter.rewrite(&mut graph).unwrap();
        let after_first = graph.to_string();
        assert_eq!(graph.code_lens(), chain.head());

        rewriter.rewrite(&mut graph).unwrap();
        assert_eq!(graph.to_string(), after_first);
    }

    #[test]
    fn test_invoke_prototype_rewrite() {
        let view = ProgramView::new();
        let chain = LensChain::new();
        let util = view.interner.intern_type("com/example/Util");
        let int = view.interner.intern_type("I");
        let old = view
            .interner
            .intern_method(util, "combine", MethodProto::new(None, vec![int, int]));
        let new = view
            .interner
            .intern_method(util, "combine$merged", MethodProto::new(None, vec![int, int]));
        chain
            .append(LensRecord::new(LensId::BASE).with_method_mapping(
                old,
                MethodMapping {
                    new_method: new,
                    rebound: None,
                    prototype_changes: RewrittenPrototypeDescription {
                        removed: vec![RemovedParameter {
                            index: 0,
                            replacement: ConstValue::Number(0),
                        }],
                        appended: vec![AppendedParameter {
                            ty: int,
                            value: ConstValue::Number(7),
                        }],
                        ..Default::default()
                    },
                },
            ))
            .unwrap();

        let mut graph = simple_call_graph(&view, old, vec![0, 1]);
        LensCodeRewriter::new(&chain, &view)
            .rewrite(&mut graph)
            .unwrap();

        let (method, args) = find_invoke(&graph);
        assert_eq!(method, new);
        assert_eq!(args.len(), 2);
        // Second argument is the materialized constant 7.
        let body = graph.block(crate::ir::BlockId::new(1));
        assert!(body.instructions.iter().any(|i| {
            i.out == Some(args[1]) && matches!(i.kind, Instruction::ConstNumber { value: 7 })
        }));
        // First argument survives from the original second parameter.
        let entry = graph.block(graph.entry());
        assert_eq!(entry.instructions[1].out, Some(args[0]));
    }

    #[test]
    fn test_field_read_gets_cast_after_widening() {
        let view = ProgramView::new();
        let chain = LensChain::new();
        let holder = view.interner.intern_type("com/example/Box");
        let narrow = view.interner.intern_type("com/example/Narrow");
        let object = view.interner.intern_type("java/lang/Object");
        let old = view.interner.intern_field(holder, "value", narrow);
        let new = view.interner.intern_field(holder, "value$wide", object);
        chain
            .append(LensRecord::new(LensId::BASE).with_field_mapping(
                old,
                FieldMapping {
                    new_field: new,
                    rebound: None,
                    old_type: narrow,
                    new_type: object,
                },
            ))
            .unwrap();

        let caller = view
            .interner
            .intern_method(holder, "read", MethodProto::new(Some(narrow), vec![]));
        let mut code = CodeObject::new(0);
        code.num_registers = 1;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::StaticGet { dest: 0, field: old },
                CodeInst::Return { src: Some(0) },
            ],
            catches: Vec::new(),
        });
        let mut graph =
            build_ir(ProgramMethod::new(holder, caller), &code, LensId::BASE).unwrap();
        LensCodeRewriter::new(&chain, &view)
            .rewrite(&mut graph)
            .unwrap();

        let body = graph.block(crate::ir::BlockId::new(1));
        let get_out = body.instructions[0].out.unwrap();
        assert!(matches!(
            body.instructions[0].kind,
            Instruction::StaticGet { field } if field == new
        ));
        assert!(matches!(
            body.instructions[1].kind,
            Instruction::CheckCast { ty, value } if ty == narrow && value == get_out
        ));
        // The return still consumes the cast result.
        let cast_out = body.instructions[1].out.unwrap();
        assert!(matches!(
            body.instructions[2].kind,
            Instruction::Return { value: Some(v) } if v == cast_out
        ));
    }

    #[test]
    fn test_merged_guard_types_drop_duplicate_handler() {
        let view = ProgramView::new();
        let chain = LensChain::new();
        let ex_a = view.interner.intern_type("com/example/ExA");
        let ex_b = view.interner.intern_type("com/example/ExB");
        chain
            .append(LensRecord::new(LensId::BASE).with_type_mapping(ex_b, ex_a))
            .unwrap();

        let holder = view.interner.intern_type("com/example/Caller");
        let callee = view
            .interner
            .intern_method(holder, "risky", MethodProto::void());
        let caller = view
            .interner
            .intern_method(holder, "call", MethodProto::void());
        let mut code = CodeObject::new(0);
        code.num_registers = 1;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::InvokeStatic {
                    dest: None,
                    method: callee,
                    args: vec![],
                },
                CodeInst::Return { src: None },
            ],
            catches: vec![(ex_a, 1), (ex_b, 2)],
        });
        code.blocks.push(CodeBlock {
            instructions: vec![CodeInst::Return { src: None }],
            catches: Vec::new(),
        });
        code.blocks.push(CodeBlock {
            instructions: vec![CodeInst::Return { src: None }],
            catches: Vec::new(),
        });

        let mut graph =
            build_ir(ProgramMethod::new(holder, caller), &code, LensId::BASE).unwrap();
        LensCodeRewriter::new(&chain, &view)
            .rewrite(&mut graph)
            .unwrap();

        let guarded = graph.block(crate::ir::BlockId::new(1));
        assert_eq!(guarded.catch_handlers.len(), 1);
        assert_eq!(guarded.catch_handlers[0].guard, ex_a);
        // The duplicate handler's block lost its exception edge and is
        // detached as unreachable.
        assert!(graph.block(crate::ir::BlockId::new(3)).detached);
    }

    #[test]
    fn test_argument_overflow_is_fatal() {
        let view = ProgramView::new();
        let chain = LensChain::new();
        let util = view.interner.intern_type("com/example/Util");
        let int = view.interner.intern_type("I");
        let old = view
            .interner
            .intern_method(util, "wide", MethodProto::void());
        let appended = (0..=MAX_ARGUMENTS)
            .map(|_| AppendedParameter {
                ty: int,
                value: ConstValue::Number(0),
            })
            .collect();
        chain
            .append(LensRecord::new(LensId::BASE).with_method_mapping(
                old,
                MethodMapping {
                    new_method: old,
                    rebound: None,
                    prototype_changes: RewrittenPrototypeDescription {
                        appended,
                        ..Default::default()
                    },
                },
            ))
            .unwrap();

        let mut graph = simple_call_graph(&view, old, vec![]);
        let err = LensCodeRewriter::new(&chain, &view)
            .rewrite(&mut graph)
            .unwrap_err();
        assert!(matches!(err, Error::ArgumentCountOverflow { .. }));
    }

    #[test]
    fn test_hook_runs_against_its_snapshot() {
        struct DoubleConstants;

        impl InstructionRewriteHook for DoubleConstants {
            fn name(&self) -> &'static str {
                "double-constants"
            }

            fn rewrite(&self, graph: &mut IrGraph) -> Result<()> {
                for id in graph.block_ids().collect::<Vec<_>>() {
                    for instr in &mut graph.block_mut(id).instructions {
                        if let Instruction::ConstNumber { value } = &mut instr.kind {
                            *value *= 2;
                        }
                    }
                }
                Ok(())
            }
        }

        let view = ProgramView::new();
        let chain = LensChain::new();
        chain
            .append(LensRecord::new(LensId::BASE).with_hook(Arc::new(DoubleConstants)))
            .unwrap();

        let holder = view.interner.intern_type("com/example/A");
        let caller = view
            .interner
            .intern_method(holder, "answer", MethodProto::new(Some(view.interner.intern_type("I")), vec![]));
        let mut code = CodeObject::new(0);
        code.num_registers = 1;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::Const {
                    dest: 0,
                    value: ConstValue::Number(21),
                },
                CodeInst::Return { src: Some(0) },
            ],
            catches: Vec::new(),
        });
        let mut graph =
            build_ir(ProgramMethod::new(holder, caller), &code, LensId::BASE).unwrap();
        LensCodeRewriter::new(&chain, &view)
            .rewrite(&mut graph)
            .unwrap();

        let body = graph.block(crate::ir::BlockId::new(1));
        assert!(matches!(
            body.instructions[0].kind,
            Instruction::ConstNumber { value: 42 }
        ));
    }
}
