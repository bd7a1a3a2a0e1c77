//! Call-site splicing: moving callee bodies into their callers.

use std::collections::HashMap;

use crate::{
    inliner::{
        compute_inlining_constraint, InlineReason, InlineStrategy, InlinerOptions,
    },
    ir::{
        build_ir, BlockId, CatchHandler, Instr, Instruction, InvokeKind, IrGraph, ValueId,
        ValueType,
    },
    lens::LensChain,
    pipeline::{FeedbackBuffer, OptimizationInfoStore},
    refs::{AccessFlags, ProgramMethod, ProgramView},
    rewrite::{propagate_types, LensCodeRewriter},
    Result,
};

/// A resolved call site awaiting an inlining decision.
struct CallSite {
    block: BlockId,
    index: usize,
    kind: InvokeKind,
    args: Vec<ValueId>,
    out: Option<ValueId>,
    target: ProgramMethod,
}

/// Scans `graph` for inlinable call sites and splices admitted callees.
///
/// Sites are visited in program order; splicing resumes inside freshly
/// inserted blocks up to `max_inlining_depth`. The caller's instruction
/// allowance bounds total growth. Single-caller callees whose call site
/// disappeared are enqueued on `feedback` for wave-boundary removal.
///
/// # Errors
///
/// Propagates callee IR construction and lens replay failures.
pub fn perform_inlining(
    graph: &mut IrGraph,
    view: &ProgramView,
    chain: &LensChain,
    store: &OptimizationInfoStore,
    feedback: &FeedbackBuffer,
    strategy: &dyn InlineStrategy,
    options: &InlinerOptions,
) -> Result<()> {
    let caller = graph.method();
    let mut allowance = options.instruction_allowance;
    let mut depths: HashMap<BlockId, usize> = HashMap::new();
    let mut demoted_flags = AccessFlags::empty();
    let mut spliced_any = false;

    let mut block_index = 0;
    while block_index < graph.block_count() {
        let id = BlockId::new(block_index as u32);
        block_index += 1;
        if graph.block(id).detached {
            continue;
        }
        let depth = depths.get(&id).copied().unwrap_or(0);

        let mut instr_index = 0;
        while let Some(site) = find_call_site(graph, view, id, instr_index) {
            instr_index = site.index + 1;
            if depth >= options.max_inlining_depth || allowance == 0 {
                continue;
            }
            let Some(action) = strategy.compute_action(view, store, caller, site.target) else {
                continue;
            };
            let Some(spliced) = splice(graph, view, chain, &site, depth, &mut depths)? else {
                continue;
            };
            allowance = allowance.saturating_sub(spliced.instruction_count);
            spliced_any = true;
            if action.reason == InlineReason::SingleCaller {
                feedback.request_removal(site.target.method);
            }
            for flag in [AccessFlags::BRIDGE, AccessFlags::SYNTHETIC] {
                if !spliced.callee_flags.contains(flag) {
                    demoted_flags |= flag;
                }
            }
            // The rest of the block moved past the splice; the new blocks
            // are scanned by the outer loop.
            break;
        }
    }

    if spliced_any {
        graph.remove_unreachable_blocks();
        propagate_types(graph, view);
        // A caller that absorbed hand-written code is no longer a pure
        // compiler artifact.
        if !demoted_flags.is_empty() {
            if let Some(mut def) = view.method_def_mut(caller.method) {
                def.flags &= !demoted_flags;
            }
        }
    }
    Ok(())
}

fn find_call_site(
    graph: &IrGraph,
    view: &ProgramView,
    block: BlockId,
    from: usize,
) -> Option<CallSite> {
    let instructions = &graph.block(block).instructions;
    for (index, instr) in instructions.iter().enumerate().skip(from) {
        let Instruction::Invoke { kind, method, args } = &instr.kind else {
            continue;
        };
        let target = match kind {
            InvokeKind::Virtual => view.single_dispatch_target(*method),
            InvokeKind::Static | InvokeKind::Direct => {
                view.resolve_method(*method).and_then(|resolved| {
                    let holder = view.interner.method_desc(resolved)?.holder;
                    Some(ProgramMethod::new(holder, resolved))
                })
            }
        };
        let Some(target) = target else { continue };
        return Some(CallSite {
            block,
            index,
            kind: *kind,
            args: args.clone(),
            out: instr.out,
            target,
        });
    }
    None
}

struct Spliced {
    instruction_count: usize,
    callee_flags: AccessFlags,
}

/// Splices one callee body over the call site. Returns `None` when a
/// late check (accessibility of the fresh body, inexpressible monitor
/// wrapping) rejects the site after all.
fn splice(
    graph: &mut IrGraph,
    view: &ProgramView,
    chain: &LensChain,
    site: &CallSite,
    depth: usize,
    depths: &mut HashMap<BlockId, usize>,
) -> Result<Option<Spliced>> {
    let (code, code_lens, callee_flags) = {
        let Some(def) = view.method_def(site.target.method) else {
            return Ok(None);
        };
        let Some(code) = def.code.clone() else {
            return Ok(None);
        };
        (code, def.code_lens, def.flags)
    };

    // The callee body is built fresh per call site and replayed to the
    // chain head, so its references line up with the caller's.
    let mut callee = build_ir(site.target, &code, code_lens)?;
    LensCodeRewriter::new(chain, view).rewrite(&mut callee)?;

    let constraint = compute_inlining_constraint(&callee, view);
    if !constraint.allows(view, graph.method().holder) {
        return Ok(None);
    }

    let synchronized = callee_flags.contains(AccessFlags::SYNCHRONIZED);
    if synchronized {
        // Without an exception edge that releases the monitor, only a
        // throw-free body can be wrapped soundly.
        let can_throw = callee
            .block_ids()
            .any(|b| callee.block(b).instructions.iter().any(Instr::can_throw));
        if can_throw {
            return Ok(None);
        }
    }
    if site.args.len() as u32 != callee.num_args() {
        return Err(invalid_ir_error!(
            "call site passes {} values to {} expecting {}",
            site.args.len(),
            site.target.method,
            callee.num_args()
        ));
    }

    let instruction_count = callee.instruction_count();
    let needs_null_check =
        site.kind != InvokeKind::Static && !dereferences_receiver_first(&callee);

    // Detach the continuation, then drop the invoke itself.
    let tail = graph.split_block_after(site.block, site.index)?;
    graph.block_mut(site.block).instructions.remove(site.index);
    depths.insert(tail, depth);

    // Copy values. Argument definitions map straight to the call-site
    // operands and are not copied as instructions.
    let mut value_map: Vec<Option<ValueId>> = vec![None; callee.value_count()];
    for id in callee.block_ids() {
        for instr in &callee.block(id).instructions {
            if let (Instruction::Argument { index }, Some(out)) = (&instr.kind, instr.out) {
                value_map[out.index() as usize] = Some(site.args[*index as usize]);
            }
        }
    }
    let callee_blocks: Vec<BlockId> = callee.block_ids().collect();
    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for &cb in &callee_blocks {
        let nb = graph.add_block();
        block_map.insert(cb, nb);
        depths.insert(nb, depth + 1);
    }
    let mut map_value = |graph: &mut IrGraph, value: ValueId| -> ValueId {
        let slot = &mut value_map[value.index() as usize];
        match *slot {
            Some(mapped) => mapped,
            None => {
                let mapped = graph.alloc_value(callee.value_type(value).clone());
                *slot = Some(mapped);
                mapped
            }
        }
    };

    let outer_handlers = graph.block(site.block).catch_handlers.clone();
    for &cb in &callee_blocks {
        let source = callee.block(cb).clone();
        let nb = block_map[&cb];

        let mut phis = Vec::with_capacity(source.phis.len());
        for phi in source.phis {
            let mut mapped = crate::ir::Phi::new(map_value(graph, phi.out));
            mapped.operands = phi
                .operands
                .iter()
                .map(|&op| map_value(graph, op))
                .collect();
            phis.push(mapped);
        }
        let mut instructions = Vec::with_capacity(source.instructions.len());
        for instr in source.instructions {
            if matches!(instr.kind, Instruction::Argument { .. }) {
                continue;
            }
            let mut copied = Instr::new(instr.kind, instr.out.map(|v| map_value(graph, v)));
            copied.for_each_operand_mut(|v| *v = map_value(graph, *v));
            instructions.push(copied);
        }
        let block = graph.block_mut(nb);
        block.phis = phis;
        block.instructions = instructions;
        block.predecessors = source.predecessors.iter().map(|p| block_map[p]).collect();
        block.successors = source.successors.iter().map(|s| block_map[s]).collect();
        block.catch_handlers = source
            .catch_handlers
            .iter()
            .map(|h| CatchHandler {
                guard: h.guard,
                target: block_map[&h.target],
            })
            .collect();
        // Exceptions escaping the inlined code fall to the handlers that
        // guarded the call site; own handlers shadow them.
        add_outer_handlers(graph, nb, site.block, &outer_handlers);
    }

    // Reroute control: call block enters the callee, returns rejoin the
    // continuation.
    let entry = block_map[&callee.entry()];
    if let Some(pos) = graph.block(tail).predecessor_index(site.block) {
        graph.block_mut(tail).remove_predecessor(pos);
    }
    graph.block_mut(site.block).successors = vec![entry];
    graph.block_mut(entry).predecessors = vec![site.block];

    let mut return_values = Vec::new();
    for &cb in &callee_blocks {
        let nb = block_map[&cb];
        let Some(Instr {
            kind: Instruction::Return { value },
            ..
        }) = graph.block(nb).terminator().cloned()
        else {
            continue;
        };
        if let Some(value) = value {
            return_values.push(value);
        }
        if let Some(last) = graph.block_mut(nb).instructions.last_mut() {
            *last = Instr::effect(Instruction::Goto);
        }
        graph.link(nb, tail);
    }
    if let Some(out) = site.out {
        match return_values.as_slice() {
            [] => {}
            [single] => graph.replace_uses(out, *single),
            _ => {
                let mut phi = crate::ir::Phi::new(out);
                phi.operands = return_values;
                graph.block_mut(tail).phis.push(phi);
            }
        }
    }

    // Boundary synthesis in the call block, before its terminator.
    let terminator_at = graph.block(site.block).instructions.len() - 1;
    let mut inserted = Vec::new();
    if site.kind == InvokeKind::Static && view.has_class_initializer(site.target.holder) {
        inserted.push(Instr::effect(Instruction::InitClass {
            ty: site.target.holder,
        }));
    }
    if synchronized {
        inserted.push(Instr::effect(Instruction::MonitorEnter {
            value: site.args[0],
        }));
        graph.block_mut(tail).instructions.insert(
            0,
            Instr::effect(Instruction::MonitorExit {
                value: site.args[0],
            }),
        );
    }
    graph
        .block_mut(site.block)
        .instructions
        .splice(terminator_at..terminator_at, inserted);

    if needs_null_check {
        synthesize_null_check(graph, site, entry, &outer_handlers, depths, depth);
    }
    if site.kind != InvokeKind::Static {
        // Reaching the body proves the receiver, scoped to the splice.
        graph.block_mut(entry).instructions.insert(
            0,
            Instr::effect(Instruction::AssumeNonNull {
                value: site.args[0],
            }),
        );
    }

    Ok(Some(Spliced {
        instruction_count,
        callee_flags,
    }))
}

/// Appends the call site's handlers to an inlined block and registers the
/// block as an exceptional predecessor of each handler target, reusing
/// the phi operands of the call block's own exceptional edge.
fn add_outer_handlers(
    graph: &mut IrGraph,
    block: BlockId,
    call_block: BlockId,
    handlers: &[CatchHandler],
) {
    let mut occurrence: HashMap<BlockId, usize> = HashMap::new();
    for handler in handlers {
        graph.block_mut(block).catch_handlers.push(*handler);
        let n = occurrence.entry(handler.target).or_insert(0);
        let target = graph.block_mut(handler.target);
        let idx = target
            .predecessors
            .iter()
            .enumerate()
            .filter(|(_, &p)| p == call_block)
            .map(|(i, _)| i)
            .nth(*n);
        *n += 1;
        if let Some(idx) = idx {
            target.predecessors.insert(idx + 1, block);
            for phi in &mut target.phis {
                let op = phi.operands[idx];
                phi.operands.insert(idx + 1, op);
            }
        }
    }
}

/// Returns `true` if the callee's first effect is a dereference of its
/// receiver, making an explicit null check at the call site redundant.
fn dereferences_receiver_first(callee: &IrGraph) -> bool {
    let entry = callee.block(callee.entry());
    let Some(receiver) = entry.instructions.iter().find_map(|i| {
        matches!(i.kind, Instruction::Argument { index: 0 }).then_some(i.out)?
    }) else {
        return false;
    };
    let Some(&first) = entry.successors.first() else {
        return false;
    };
    for instr in &callee.block(first).instructions {
        let dereferences = match &instr.kind {
            Instruction::InstanceGet { object, .. }
            | Instruction::InstancePut { object, .. } => *object == receiver,
            Instruction::Invoke { kind, args, .. } => {
                *kind != InvokeKind::Static && args.first() == Some(&receiver)
            }
            Instruction::MonitorEnter { value } => *value == receiver,
            _ => false,
        };
        if dereferences {
            return true;
        }
        if instr.has_side_effects() || instr.can_throw() {
            return false;
        }
    }
    false
}

/// Replaces the call block's goto with an explicit receiver test that
/// throws on null, matching the dispatch the invoke performed.
fn synthesize_null_check(
    graph: &mut IrGraph,
    site: &CallSite,
    entry: BlockId,
    outer_handlers: &[CatchHandler],
    depths: &mut HashMap<BlockId, usize>,
    depth: usize,
) {
    let throw_block = graph.add_block();
    depths.insert(throw_block, depth + 1);
    let message = graph.alloc_value(ValueType::Object);
    graph.block_mut(throw_block).instructions = vec![
        Instr::new(
            Instruction::ConstString {
                value: "Attempt to invoke a method on a null object reference".to_string(),
            },
            Some(message),
        ),
        Instr::effect(Instruction::Throw { value: message }),
    ];
    add_outer_handlers(graph, throw_block, site.block, outer_handlers);

    let block = graph.block_mut(site.block);
    if let Some(last) = block.instructions.last_mut() {
        *last = Instr::effect(Instruction::If {
            kind: crate::ir::IfKind::Eq,
            lhs: site.args[0],
            rhs: None,
        });
    }
    block.successors = vec![throw_block, entry];
    graph.block_mut(throw_block).predecessors.push(site.block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inliner::DefaultOracle,
        ir::{CodeBlock, CodeInst, CodeObject, ConstValue},
        lens::LensId,
        refs::{ClassDef, MethodDef, MethodId, MethodProto, TypeId},
    };

    struct Fixture {
        view: ProgramView,
        chain: LensChain,
        store: OptimizationInfoStore,
        feedback: FeedbackBuffer,
        holder: TypeId,
    }

    impl Fixture {
        fn new() -> Self {
            let view = ProgramView::new();
            let holder = view.interner.intern_type("com/example/A");
            view.add_class(ClassDef {
                ty: holder,
                super_type: None,
                interfaces: Vec::new(),
                flags: AccessFlags::PUBLIC,
                nest_host: None,
                methods: Vec::new(),
                fields: Vec::new(),
                has_class_initializer: false,
            });
            Fixture {
                view,
                chain: LensChain::new(),
                store: OptimizationInfoStore::new(),
                feedback: FeedbackBuffer::new(),
                holder,
            }
        }

        fn add_method(
            &self,
            name: &str,
            proto: MethodProto,
            flags: AccessFlags,
            code: CodeObject,
        ) -> MethodId {
            let id = self.view.interner.intern_method(self.holder, name, proto);
            let mut class = self.view.definition_for(self.holder).unwrap().value().clone();
            class.methods.push(id);
            self.view.add_class(class);
            self.view.add_method(MethodDef {
                id,
                flags,
                code: Some(code),
                code_lens: LensId::BASE,
            });
            id
        }

        fn inline(&self, graph: &mut IrGraph, options: &InlinerOptions) {
            let oracle = DefaultOracle::new(*options);
            perform_inlining(
                graph,
                &self.view,
                &self.chain,
                &self.store,
                &self.feedback,
                &oracle,
                options,
            )
            .unwrap();
        }
    }

    fn int_proto(view: &ProgramView) -> MethodProto {
        let int = view.interner.intern_type("I");
        MethodProto::new(Some(int), Vec::new())
    }

    fn const_return_body() -> CodeObject {
        let mut code = CodeObject::new(0);
        code.num_registers = 1;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::Const {
                    dest: 0,
                    value: ConstValue::Number(7),
                },
                CodeInst::Return { src: Some(0) },
            ],
            catches: Vec::new(),
        });
        code
    }

    fn calling_body(callee: MethodId) -> CodeObject {
        let mut code = CodeObject::new(0);
        code.num_registers = 1;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::InvokeStatic {
                    dest: Some(0),
                    method: callee,
                    args: Vec::new(),
                },
                CodeInst::Return { src: Some(0) },
            ],
            catches: Vec::new(),
        });
        code
    }

    fn invoke_count(graph: &IrGraph) -> usize {
        graph
            .block_ids()
            .flat_map(|b| graph.block(b).instructions.iter())
            .filter(|i| matches!(i.kind, Instruction::Invoke { .. }))
            .count()
    }

    #[test]
    fn test_single_caller_splice_replaces_invoke() {
        let fixture = Fixture::new();
        let callee = fixture.add_method(
            "seven",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            const_return_body(),
        );
        fixture.view.set_call_count(callee, 1);
        let caller = fixture.add_method(
            "caller",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            calling_body(callee),
        );

        let code = fixture.view.method_def(caller).unwrap().code.clone().unwrap();
        let mut graph = build_ir(
            ProgramMethod::new(fixture.holder, caller),
            &code,
            LensId::BASE,
        )
        .unwrap();
        fixture.inline(&mut graph, &InlinerOptions::default());

        assert_eq!(invoke_count(&graph), 0);
        // The continuation returns the spliced constant.
        let constant = graph
            .block_ids()
            .flat_map(|b| graph.block(b).instructions.iter())
            .find_map(|i| {
                matches!(i.kind, Instruction::ConstNumber { value: 7 }).then_some(i.out)?
            })
            .unwrap();
        let returns: Vec<_> = graph
            .block_ids()
            .flat_map(|b| graph.block(b).instructions.iter())
            .filter_map(|i| match i.kind {
                Instruction::Return { value } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(returns, vec![Some(constant)]);
        // The now-callsite-free callee is queued for removal.
        let mut feedback = fixture.feedback;
        let committed = feedback.commit(&fixture.store);
        assert_eq!(committed.removals, vec![callee]);
    }

    #[test]
    fn test_growth_stays_within_allowance() {
        let fixture = Fixture::new();
        let callee = fixture.add_method(
            "seven",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            const_return_body(),
        );
        fixture.view.set_call_count(callee, 1);

        // Many call sites, tiny allowance: growth must stop at
        // allowance + one callee body.
        let mut code = CodeObject::new(0);
        code.num_registers = 4;
        let mut instructions = Vec::new();
        for dest in 0..4 {
            instructions.push(CodeInst::InvokeStatic {
                dest: Some(dest),
                method: callee,
                args: Vec::new(),
            });
        }
        instructions.push(CodeInst::Return { src: Some(0) });
        code.blocks.push(CodeBlock {
            instructions,
            catches: Vec::new(),
        });
        let caller = fixture.add_method(
            "caller",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            code.clone(),
        );

        let mut graph = build_ir(
            ProgramMethod::new(fixture.holder, caller),
            &code,
            LensId::BASE,
        )
        .unwrap();
        let before = graph.instruction_count();
        let options = InlinerOptions {
            instruction_allowance: 1,
            ..InlinerOptions::default()
        };
        fixture.inline(&mut graph, &options);

        // The callee graph carries its synthetic entry block, so its
        // spliced size is four instructions.
        let callee_size = 4;
        assert!(graph.instruction_count() <= before + options.instruction_allowance + callee_size);
        // Only the first site was spliced.
        assert_eq!(invoke_count(&graph), 3);
    }

    #[test]
    fn test_null_check_synthesized_for_virtual_receiver() {
        let fixture = Fixture::new();
        // An instance callee that never touches its receiver.
        let mut body = CodeObject::new(1);
        body.num_registers = 2;
        body.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::Const {
                    dest: 1,
                    value: ConstValue::Number(3),
                },
                CodeInst::Return { src: Some(1) },
            ],
            catches: Vec::new(),
        });
        let int = fixture.view.interner.intern_type("I");
        let callee = fixture.add_method(
            "constant",
            MethodProto::new(Some(int), Vec::new()),
            AccessFlags::PUBLIC | AccessFlags::FINAL,
            body,
        );
        fixture.view.set_call_count(callee, 1);

        let mut code = CodeObject::new(1);
        code.num_registers = 2;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::InvokeVirtual {
                    dest: Some(1),
                    method: callee,
                    args: vec![0],
                },
                CodeInst::Return { src: Some(1) },
            ],
            catches: Vec::new(),
        });
        let caller = fixture.add_method(
            "caller",
            MethodProto::new(Some(int), Vec::new()),
            AccessFlags::PUBLIC,
            code.clone(),
        );

        let mut graph = build_ir(
            ProgramMethod::new(fixture.holder, caller),
            &code,
            LensId::BASE,
        )
        .unwrap();
        fixture.inline(&mut graph, &InlinerOptions::default());

        assert_eq!(invoke_count(&graph), 0);
        let has_receiver_test = graph.block_ids().any(|b| {
            matches!(
                graph.block(b).terminator().map(|t| &t.kind),
                Some(Instruction::If {
                    kind: crate::ir::IfKind::Eq,
                    rhs: None,
                    ..
                })
            )
        });
        let has_throw = graph.block_ids().any(|b| {
            matches!(
                graph.block(b).terminator().map(|t| &t.kind),
                Some(Instruction::Throw { .. })
            )
        });
        assert!(has_receiver_test);
        assert!(has_throw);
    }

    #[test]
    fn test_clinit_trigger_for_static_callee() {
        let fixture = Fixture::new();
        let other = fixture.view.interner.intern_type("com/example/Init");
        fixture.view.add_class(ClassDef {
            ty: other,
            super_type: None,
            interfaces: Vec::new(),
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: Vec::new(),
            fields: Vec::new(),
            has_class_initializer: true,
        });
        let int = fixture.view.interner.intern_type("I");
        let callee = fixture
            .view
            .interner
            .intern_method(other, "seven", MethodProto::new(Some(int), Vec::new()));
        let mut class = fixture.view.definition_for(other).unwrap().value().clone();
        class.methods.push(callee);
        fixture.view.add_class(class);
        fixture.view.add_method(MethodDef {
            id: callee,
            flags: AccessFlags::PUBLIC | AccessFlags::STATIC,
            code: Some(const_return_body()),
            code_lens: LensId::BASE,
        });
        fixture.view.set_call_count(callee, 1);

        let caller = fixture.add_method(
            "caller",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            calling_body(callee),
        );
        let code = fixture.view.method_def(caller).unwrap().code.clone().unwrap();
        let mut graph = build_ir(
            ProgramMethod::new(fixture.holder, caller),
            &code,
            LensId::BASE,
        )
        .unwrap();
        fixture.inline(&mut graph, &InlinerOptions::default());

        let triggers = graph
            .block_ids()
            .flat_map(|b| graph.block(b).instructions.iter())
            .filter(|i| matches!(i.kind, Instruction::InitClass { ty } if ty == other))
            .count();
        assert_eq!(triggers, 1);
    }

    #[test]
    fn test_depth_limit_stops_nested_splicing() {
        let fixture = Fixture::new();
        let leaf = fixture.add_method(
            "leaf",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            const_return_body(),
        );
        let mid = fixture.add_method(
            "mid",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            calling_body(leaf),
        );
        fixture.view.set_call_count(leaf, 1);
        fixture.view.set_call_count(mid, 1);
        let caller = fixture.add_method(
            "caller",
            int_proto(&fixture.view),
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            calling_body(mid),
        );

        let code = fixture.view.method_def(caller).unwrap().code.clone().unwrap();
        let mut graph = build_ir(
            ProgramMethod::new(fixture.holder, caller),
            &code,
            LensId::BASE,
        )
        .unwrap();
        let options = InlinerOptions {
            max_inlining_depth: 1,
            ..InlinerOptions::default()
        };
        fixture.inline(&mut graph, &options);

        // mid was spliced; the leaf call inside the spliced region stays.
        let remaining: Vec<_> = graph
            .block_ids()
            .flat_map(|b| graph.block(b).instructions.iter())
            .filter_map(Instr::invoked_method)
            .collect();
        assert_eq!(remaining, vec![leaf]);
    }
}
