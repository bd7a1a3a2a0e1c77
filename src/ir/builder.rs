//! Construction of the SSA graph from a register code object.
//!
//! The builder uses the maximal-phi strategy: a synthetic entry block
//! defines every register (arguments, then undefined fillers), every code
//! block opens with one phi per register, and phi operands are copied from
//! each predecessor's register state at block exit (at block entry for
//! exception edges). A cleanup pass then
//! removes the phis that turned out trivial. This trades a transient
//! surplus of phis for not needing dominance information at all.
//!
//! `Move` instructions never reach the graph; they only rename entries of
//! the register state, so copies are propagated for free.

use crate::{
    ir::{
        BlockId, CatchHandler, CodeInst, CodeObject, ConstValue, Instr, Instruction, InvokeKind,
        IrGraph, Phi, ValueId, ValueType,
    },
    lens::LensId,
    refs::ProgramMethod,
    Result,
};

/// Builds the SSA graph for `method` from its register code.
///
/// The produced graph is stamped with `code_lens`, the chain snapshot the
/// code object's references are current against.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidIr`] when the code object is malformed:
/// no blocks, a register or branch target out of range, or a block that
/// does not end in a terminator.
pub fn build_ir(method: ProgramMethod, code: &CodeObject, code_lens: LensId) -> Result<IrGraph> {
    Builder::new(method, code, code_lens)?.build()
}

struct Builder<'a> {
    code: &'a CodeObject,
    graph: IrGraph,
    /// Register state at the end of each graph block, indexed by block.
    exit_states: Vec<Vec<ValueId>>,
    /// Register state at the start of each graph block (its phi outs).
    entry_states: Vec<Vec<ValueId>>,
    /// Predecessor-list positions that are exception edges, as
    /// `(handler block, position)`.
    exceptional: std::collections::HashSet<(BlockId, usize)>,
}

impl<'a> Builder<'a> {
    fn new(method: ProgramMethod, code: &'a CodeObject, code_lens: LensId) -> Result<Self> {
        if code.blocks.is_empty() {
            return Err(invalid_ir_error!("code object for {} has no blocks", method.method));
        }
        if code.num_args > code.num_registers {
            return Err(invalid_ir_error!(
                "{} arguments do not fit in {} registers",
                code.num_args,
                code.num_registers
            ));
        }
        Ok(Builder {
            code,
            graph: IrGraph::new(method, code_lens, code.num_args),
            exit_states: Vec::new(),
            entry_states: Vec::new(),
            exceptional: std::collections::HashSet::new(),
        })
    }

    /// Graph block holding the translation of code block `index`.
    ///
    /// Block 0 is the synthetic entry, so code blocks shift up by one.
    fn target_block(&self, index: usize) -> Result<BlockId> {
        if index >= self.code.blocks.len() {
            return Err(invalid_ir_error!("branch target {} out of range", index));
        }
        Ok(BlockId::new(index as u32 + 1))
    }

    fn build(mut self) -> Result<IrGraph> {
        let num_registers = self.code.num_registers as usize;

        let entry = self.build_entry_block();
        for _ in &self.code.blocks {
            let id = self.graph.add_block();
            let mut state = Vec::with_capacity(num_registers);
            for _ in 0..num_registers {
                let out = self.graph.alloc_value(ValueType::Unknown);
                self.graph.block_mut(id).phis.push(Phi::new(out));
                state.push(out);
            }
            self.exit_states.push(state);
        }
        self.entry_states = self.exit_states.clone();
        self.graph.link(entry, self.target_block(0)?);

        for index in 0..self.code.blocks.len() {
            self.translate_block(index)?;
        }
        self.fill_phi_operands();
        remove_trivial_phis(&mut self.graph);
        Ok(self.graph)
    }

    /// Defines every register up front: arguments first, then fillers for
    /// registers the method writes before reading. Fillers keep type
    /// `Unknown` so they never pollute a phi merge on paths that define
    /// the register properly.
    fn build_entry_block(&mut self) -> BlockId {
        let entry = self.graph.add_block();
        let mut state = Vec::with_capacity(self.code.num_registers as usize);
        for index in 0..self.code.num_args {
            let out = self.graph.alloc_value(ValueType::Unknown);
            self.graph
                .block_mut(entry)
                .instructions
                .push(Instr::new(Instruction::Argument { index }, Some(out)));
            state.push(out);
        }
        for _ in self.code.num_args..self.code.num_registers {
            let out = self.graph.alloc_value(ValueType::Unknown);
            self.graph
                .block_mut(entry)
                .instructions
                .push(Instr::new(Instruction::ConstNumber { value: 0 }, Some(out)));
            state.push(out);
        }
        self.graph
            .block_mut(entry)
            .instructions
            .push(Instr::effect(Instruction::Goto));
        self.exit_states.push(state);
        entry
    }

    fn translate_block(&mut self, index: usize) -> Result<()> {
        let id = self.target_block(index)?;
        // Start from the block's own phis.
        let mut state = self.exit_states[id.index()].clone();
        let num_registers = self.code.num_registers;

        let read = |state: &[ValueId], reg: u32| -> Result<ValueId> {
            if reg >= num_registers {
                return Err(invalid_ir_error!("register {} out of range", reg));
            }
            Ok(state[reg as usize])
        };

        for (target, guard) in self
            .code
            .blocks
            .get(index)
            .map(|b| b.catches.iter().map(|&(g, t)| (t, g)))
            .into_iter()
            .flatten()
        {
            let handler = self.target_block(target)?;
            self.graph.block_mut(id).catch_handlers.push(CatchHandler {
                guard,
                target: handler,
            });
            let position = self.graph.block(handler).predecessors.len();
            self.graph.block_mut(handler).predecessors.push(id);
            self.exceptional.insert((handler, position));
        }

        let instructions = &self.code.blocks[index].instructions;
        for (position, inst) in instructions.iter().enumerate() {
            let is_last = position + 1 == instructions.len();
            match inst {
                CodeInst::Const { dest, value } => {
                    read(&state, *dest)?;
                    let (kind, ty) = match value {
                        ConstValue::Number(n) => {
                            (Instruction::ConstNumber { value: *n }, ValueType::Int)
                        }
                        ConstValue::String(s) => (
                            Instruction::ConstString { value: s.clone() },
                            ValueType::Object,
                        ),
                        ConstValue::Null => (Instruction::ConstNull, ValueType::Null),
                    };
                    let out = self.graph.alloc_value(ty);
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::new(kind, Some(out)));
                    state[*dest as usize] = out;
                }
                CodeInst::Move { dest, src } => {
                    let value = read(&state, *src)?;
                    read(&state, *dest)?;
                    state[*dest as usize] = value;
                }
                CodeInst::Binop { dest, op, lhs, rhs } => {
                    let lhs = read(&state, *lhs)?;
                    let rhs = read(&state, *rhs)?;
                    let out = self.graph.alloc_value(ValueType::Int);
                    self.graph.block_mut(id).instructions.push(Instr::new(
                        Instruction::Binop { op: *op, lhs, rhs },
                        Some(out),
                    ));
                    state[*dest as usize] = out;
                }
                CodeInst::InvokeStatic { dest, method, args }
                | CodeInst::InvokeVirtual { dest, method, args }
                | CodeInst::InvokeDirect { dest, method, args } => {
                    let kind = match inst {
                        CodeInst::InvokeStatic { .. } => InvokeKind::Static,
                        CodeInst::InvokeVirtual { .. } => InvokeKind::Virtual,
                        _ => InvokeKind::Direct,
                    };
                    let args = args
                        .iter()
                        .map(|&reg| read(&state, reg))
                        .collect::<Result<Vec<_>>>()?;
                    let out = match dest {
                        Some(dest) => {
                            read(&state, *dest)?;
                            Some(self.graph.alloc_value(ValueType::Unknown))
                        }
                        None => None,
                    };
                    self.graph.block_mut(id).instructions.push(Instr::new(
                        Instruction::Invoke {
                            kind,
                            method: *method,
                            args,
                        },
                        out,
                    ));
                    if let (Some(dest), Some(out)) = (dest, out) {
                        state[*dest as usize] = out;
                    }
                }
                CodeInst::StaticGet { dest, field } => {
                    read(&state, *dest)?;
                    let out = self.graph.alloc_value(ValueType::Unknown);
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::new(Instruction::StaticGet { field: *field }, Some(out)));
                    state[*dest as usize] = out;
                }
                CodeInst::StaticPut { src, field } => {
                    let value = read(&state, *src)?;
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::StaticPut {
                            field: *field,
                            value,
                        }));
                }
                CodeInst::InstanceGet {
                    dest,
                    field,
                    object,
                } => {
                    let object = read(&state, *object)?;
                    read(&state, *dest)?;
                    let out = self.graph.alloc_value(ValueType::Unknown);
                    self.graph.block_mut(id).instructions.push(Instr::new(
                        Instruction::InstanceGet {
                            field: *field,
                            object,
                        },
                        Some(out),
                    ));
                    state[*dest as usize] = out;
                }
                CodeInst::InstancePut { src, field, object } => {
                    let object = read(&state, *object)?;
                    let value = read(&state, *src)?;
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::InstancePut {
                            field: *field,
                            object,
                            value,
                        }));
                }
                CodeInst::NewInstance { dest, ty } => {
                    read(&state, *dest)?;
                    let out = self.graph.alloc_value(ValueType::Class(*ty));
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::new(Instruction::NewInstance { ty: *ty }, Some(out)));
                    state[*dest as usize] = out;
                }
                CodeInst::CheckCast { dest, src, ty } => {
                    let value = read(&state, *src)?;
                    read(&state, *dest)?;
                    let out = self.graph.alloc_value(ValueType::Class(*ty));
                    self.graph.block_mut(id).instructions.push(Instr::new(
                        Instruction::CheckCast { ty: *ty, value },
                        Some(out),
                    ));
                    state[*dest as usize] = out;
                }
                CodeInst::InstanceOf { dest, src, ty } => {
                    let value = read(&state, *src)?;
                    read(&state, *dest)?;
                    let out = self.graph.alloc_value(ValueType::Int);
                    self.graph.block_mut(id).instructions.push(Instr::new(
                        Instruction::InstanceOf { ty: *ty, value },
                        Some(out),
                    ));
                    state[*dest as usize] = out;
                }
                CodeInst::InitClass { ty } => {
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::InitClass { ty: *ty }));
                }
                CodeInst::MonitorEnter { src } => {
                    let value = read(&state, *src)?;
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::MonitorEnter { value }));
                }
                CodeInst::MonitorExit { src } => {
                    let value = read(&state, *src)?;
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::MonitorExit { value }));
                }
                CodeInst::If {
                    kind,
                    lhs,
                    rhs,
                    then_target,
                    else_target,
                } => {
                    if !is_last {
                        return Err(invalid_ir_error!(
                            "branch in the middle of block {}",
                            index
                        ));
                    }
                    let lhs = read(&state, *lhs)?;
                    let rhs = rhs.map(|r| read(&state, r)).transpose()?;
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::If {
                            kind: *kind,
                            lhs,
                            rhs,
                        }));
                    let then_block = self.target_block(*then_target)?;
                    let else_block = self.target_block(*else_target)?;
                    self.graph.link(id, then_block);
                    self.graph.link(id, else_block);
                }
                CodeInst::Goto { target } => {
                    if !is_last {
                        return Err(invalid_ir_error!(
                            "branch in the middle of block {}",
                            index
                        ));
                    }
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::Goto));
                    let target = self.target_block(*target)?;
                    self.graph.link(id, target);
                }
                CodeInst::Return { src } => {
                    let value = src.map(|r| read(&state, r)).transpose()?;
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::Return { value }));
                }
                CodeInst::Throw { src } => {
                    let value = read(&state, *src)?;
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::Throw { value }));
                }
                CodeInst::DebugPosition { line } => {
                    self.graph
                        .block_mut(id)
                        .instructions
                        .push(Instr::effect(Instruction::DebugPosition { line: *line }));
                }
            }
        }

        if self.graph.block(id).terminator().is_none() {
            return Err(invalid_ir_error!("block {} has no terminator", index));
        }
        self.exit_states[id.index()] = state;
        Ok(())
    }

    /// Fills every phi from the register states of its block's predecessors.
    ///
    /// A normal predecessor contributes its exit state. An exceptional
    /// predecessor contributes its entry state: a handler observes the
    /// registers as they were when the guarded block was entered, which
    /// lets the lowering place the handler-bound copies ahead of anything
    /// that can throw.
    fn fill_phi_operands(&mut self) {
        for index in 1..self.graph.block_count() {
            let id = BlockId::new(index as u32);
            let predecessors = self.graph.block(id).predecessors.clone();
            for register in 0..self.code.num_registers as usize {
                let operands: Vec<ValueId> = predecessors
                    .iter()
                    .enumerate()
                    .map(|(position, pred)| {
                        if self.exceptional.contains(&(id, position)) {
                            self.entry_states[pred.index()][register]
                        } else {
                            self.exit_states[pred.index()][register]
                        }
                    })
                    .collect();
                self.graph.block_mut(id).phis[register].operands = operands;
            }
        }
    }
}

/// Removes phis whose operands all agree, to a fixpoint.
///
/// Replacing one phi can make another trivial, so the pass loops until a
/// full sweep changes nothing.
pub fn remove_trivial_phis(graph: &mut IrGraph) {
    loop {
        let mut replacements = std::collections::HashMap::new();
        for id in graph.block_ids().collect::<Vec<_>>() {
            let block = graph.block_mut(id);
            let mut kept = Vec::with_capacity(block.phis.len());
            for phi in block.phis.drain(..) {
                match phi.trivial_replacement() {
                    Some(replacement) => {
                        replacements.insert(phi.out, replacement);
                    }
                    None => kept.push(phi),
                }
            }
            block.phis = kept;
        }
        if replacements.is_empty() {
            return;
        }
        // A sweep can chain replacements (A to B, B to C), so each one is
        // resolved to its final value before applying. Mutually-referencing
        // trivial phis only occur in unreachable code; the seen set stops
        // the walk there.
        for &old in replacements.keys().copied().collect::<Vec<_>>().iter() {
            let mut new = replacements[&old];
            let mut seen = std::collections::HashSet::from([old]);
            while let Some(&next) = replacements.get(&new) {
                if !seen.insert(new) {
                    break;
                }
                new = next;
            }
            graph.replace_uses(old, new);
        }
    }
}
