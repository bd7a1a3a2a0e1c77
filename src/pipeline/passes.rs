//! The per-method optimization passes the converter runs between lens
//! replay and finalization.

use std::collections::HashMap;

use crate::{
    inliner::compute_inlining_constraint,
    ir::{
        CodeBlock, CodeInst, CodeObject, ConstValue, Instruction, InvokeKind, IrGraph, ValueId,
        ValueType,
    },
    pipeline::OptimizationInfo,
    refs::ProgramView,
    Result,
};

/// Folds constant arithmetic and constant branches.
///
/// Branch folding prunes the untaken edge, so unreachable arms are
/// detached before later passes look at them. Division keeps its
/// instruction when the divisor folds to zero.
pub fn fold_constants(graph: &mut IrGraph) {
    let mut pruned_branches = false;
    loop {
        let mut constants: HashMap<ValueId, i64> = HashMap::new();
        for id in graph.block_ids().collect::<Vec<_>>() {
            for instr in &graph.block(id).instructions {
                let Some(out) = instr.out else { continue };
                match instr.kind {
                    Instruction::ConstNumber { value } => {
                        constants.insert(out, value);
                    }
                    Instruction::ConstNull => {
                        constants.insert(out, 0);
                    }
                    _ => {}
                }
            }
        }

        let mut changed = false;
        for id in graph.block_ids().collect::<Vec<_>>() {
            for instr in &mut graph.block_mut(id).instructions {
                let Instruction::Binop { op, lhs, rhs } = instr.kind else {
                    continue;
                };
                let (Some(&lhs), Some(&rhs)) = (constants.get(&lhs), constants.get(&rhs)) else {
                    continue;
                };
                if let Some(value) = op.fold(lhs, rhs) {
                    instr.kind = Instruction::ConstNumber { value };
                    if let Some(out) = instr.out {
                        constants.insert(out, value);
                    }
                    changed = true;
                }
            }

            let block = graph.block(id);
            let Some(term) = block.terminator() else { continue };
            let Instruction::If { kind, lhs, rhs } = term.kind else {
                continue;
            };
            let Some(&lhs) = constants.get(&lhs) else { continue };
            let rhs = match rhs {
                Some(rhs) => match constants.get(&rhs) {
                    Some(&rhs) => rhs,
                    None => continue,
                },
                None => 0,
            };
            let (taken, untaken) = if kind.evaluate(lhs, rhs) {
                (block.successors[0], block.successors[1])
            } else {
                (block.successors[1], block.successors[0])
            };
            if let Some(last) = graph.block_mut(id).instructions.last_mut() {
                *last = crate::ir::Instr::effect(Instruction::Goto);
            }
            graph.block_mut(id).successors = vec![taken];
            // The pruned edge is a branch edge, so its occurrence is the
            // last one for this predecessor.
            let preds = &graph.block(untaken).predecessors;
            if let Some(pos) = preds.iter().rposition(|&p| p == id) {
                graph.block_mut(untaken).remove_predecessor(pos);
            }
            pruned_branches = true;
            changed = true;
        }
        if !changed {
            break;
        }
    }
    if pruned_branches {
        graph.remove_unreachable_blocks();
    }
}

/// Rewrites virtual invokes with a unique concrete target into direct
/// invokes of that target.
pub fn devirtualize(graph: &mut IrGraph, view: &ProgramView) {
    for id in graph.block_ids().collect::<Vec<_>>() {
        for instr in &mut graph.block_mut(id).instructions {
            let Instruction::Invoke { kind, method, .. } = &mut instr.kind else {
                continue;
            };
            if *kind != InvokeKind::Virtual {
                continue;
            }
            if let Some(target) = view.single_dispatch_target(*method) {
                *kind = InvokeKind::Direct;
                *method = target.method;
            }
        }
    }
}

/// Removes instructions and phis whose defined value is unused.
///
/// Side-effecting instructions always survive; analysis markers like
/// `AssumeNonNull` are dropped once nothing consumes them.
pub fn remove_dead_code(graph: &mut IrGraph) {
    loop {
        let mut uses: HashMap<ValueId, usize> = HashMap::new();
        for id in graph.block_ids().collect::<Vec<_>>() {
            let block = graph.block(id);
            for phi in &block.phis {
                for &op in &phi.operands {
                    *uses.entry(op).or_insert(0) += 1;
                }
            }
            for instr in &block.instructions {
                for op in instr.operands() {
                    *uses.entry(op).or_insert(0) += 1;
                }
            }
        }

        let mut changed = false;
        for id in graph.block_ids().collect::<Vec<_>>() {
            let block = graph.block_mut(id);
            let before = block.phis.len() + block.instructions.len();
            block
                .phis
                .retain(|phi| uses.get(&phi.out).copied().unwrap_or(0) > 0);
            block.instructions.retain(|instr| {
                if matches!(instr.kind, Instruction::AssumeNonNull { .. }) {
                    return false;
                }
                if instr.has_side_effects() {
                    return true;
                }
                match instr.out {
                    Some(out) => uses.get(&out).copied().unwrap_or(0) > 0,
                    // Keep valueless effect-free markers like debug
                    // positions for the encoder.
                    None => true,
                }
            });
            if block.phis.len() + block.instructions.len() != before {
                changed = true;
            }
        }
        if !changed {
            return;
        }
    }
}

/// Structural and type validation run before a graph is finalized.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidIr`] on a missing terminator, a
/// successor count that contradicts the terminator, a phi whose operands
/// do not line up with the predecessors, or an operand of conflicting
/// inferred type.
pub fn type_check(graph: &IrGraph) -> Result<()> {
    for id in graph.block_ids() {
        let block = graph.block(id);
        let Some(term) = block.terminator() else {
            return Err(invalid_ir_error!("{} has no terminator", id));
        };
        let expected = match term.kind {
            Instruction::If { .. } => 2,
            Instruction::Goto => 1,
            Instruction::Return { .. } | Instruction::Throw { .. } => 0,
            _ => return Err(invalid_ir_error!("{} ends in a non-terminator", id)),
        };
        if block.successors.len() != expected {
            return Err(invalid_ir_error!(
                "{} has {} successors, terminator implies {}",
                id,
                block.successors.len(),
                expected
            ));
        }
        for phi in &block.phis {
            if phi.operands.len() != block.predecessors.len() {
                return Err(invalid_ir_error!(
                    "phi {} in {} has {} operands for {} predecessors",
                    phi.out,
                    id,
                    phi.operands.len(),
                    block.predecessors.len()
                ));
            }
            if graph.value_type(phi.out) == &ValueType::Varying {
                return Err(invalid_ir_error!(
                    "phi {} in {} merges conflicting types",
                    phi.out,
                    id
                ));
            }
        }
        for instr in &block.instructions {
            for op in instr.operands() {
                if graph.value_type(op) == &ValueType::Varying {
                    return Err(invalid_ir_error!(
                        "{} uses {} of conflicting type",
                        id,
                        op
                    ));
                }
            }
        }
    }
    Ok(())
}

/// The canonical replacement body for a method that failed validation:
/// throw unconditionally with a diagnostic string.
#[must_use]
pub fn throwing_stub(num_args: u32, message: &str) -> CodeObject {
    let register = num_args;
    let mut code = CodeObject::new(num_args);
    code.num_registers = num_args + 1;
    code.blocks.push(CodeBlock {
        instructions: vec![
            CodeInst::Const {
                dest: register,
                value: ConstValue::String(message.to_string()),
            },
            CodeInst::Throw { src: register },
        ],
        catches: Vec::new(),
    });
    code
}

/// Derives the method's [`OptimizationInfo`] from its optimized graph.
#[must_use]
pub fn compute_optimization_info(graph: &IrGraph, view: &ProgramView) -> OptimizationInfo {
    let mut returns = Vec::new();
    let mut has_handlers = false;
    let mut has_monitors = false;
    for id in graph.block_ids() {
        let block = graph.block(id);
        has_handlers |= !block.catch_handlers.is_empty();
        has_monitors |= block.instructions.iter().any(|i| {
            matches!(
                i.kind,
                Instruction::MonitorEnter { .. } | Instruction::MonitorExit { .. }
            )
        });
        if let Some(Instruction::Return { value }) = block.terminator().map(|t| &t.kind) {
            returns.push(*value);
        }
    }

    let mut returns_constant = None;
    if !returns.is_empty() {
        let mut candidate = None;
        let all_constant = returns.iter().all(|value| {
            let Some(constant) = value.and_then(|v| defining_constant(graph, v)) else {
                return false;
            };
            match &candidate {
                None => {
                    candidate = Some(constant);
                    true
                }
                Some(existing) => existing == &constant,
            }
        });
        if all_constant {
            returns_constant = candidate;
        }
    }

    OptimizationInfo {
        instruction_count: graph.instruction_count(),
        returns_constant,
        never_returns_normally: returns.is_empty(),
        simple_inlining_eligible: !has_handlers && !has_monitors,
        constraint: compute_inlining_constraint(graph, view),
    }
}

fn defining_constant(graph: &IrGraph, value: ValueId) -> Option<ConstValue> {
    for id in graph.block_ids() {
        for instr in &graph.block(id).instructions {
            if instr.out != Some(value) {
                continue;
            }
            return match &instr.kind {
                Instruction::ConstNumber { value } => Some(ConstValue::Number(*value)),
                Instruction::ConstString { value } => Some(ConstValue::String(value.clone())),
                Instruction::ConstNull => Some(ConstValue::Null),
                _ => None,
            };
        }
    }
    None
}
