//! Lowering of the SSA graph back to a register code object.
//!
//! Every SSA value gets its own register: arguments keep registers
//! `0..num_args`, everything else is numbered in graph order. No coalescing
//! is attempted; compacting the register file is the encoder's concern.
//!
//! Phis are eliminated with copies. A copy for a normal edge lands at the
//! end of the predecessor when it has a single successor, or in a fresh
//! trampoline block spliced onto the edge when it has several. A copy for
//! an exception edge lands at the top of the guarded block, ahead of
//! anything that can throw, which is sound because handler phis carry the
//! guarded block's entry state. Copies of one edge are parallel; when a
//! destination register doubles as a source the set is staged through
//! temporaries.
//!
//! Detached blocks and analysis markers ([`Instruction::AssumeNonNull`])
//! are dropped.

use std::collections::BTreeMap;

use crate::{
    ir::{
        BlockId, CodeBlock, CodeInst, CodeObject, ConstValue, Instr, Instruction, InvokeKind,
        IrGraph, Register,
    },
    Result,
};

/// A pending phi copy, `(destination, source)` in final registers.
type MoveSet = Vec<(Register, Register)>;

/// Lowers `graph` to a register code object.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidIr`] when the graph is structurally
/// inconsistent: a block without a terminator, a terminator whose successor
/// count does not match its kind, a use of a value with no definition, or a
/// phi whose operand count disagrees with its block's predecessor list.
pub fn lower(graph: &IrGraph) -> Result<CodeObject> {
    Lowering::new(graph)?.run()
}

struct Lowering<'a> {
    graph: &'a IrGraph,
    /// Final register per value, indexed by value id.
    registers: Vec<Option<Register>>,
    next_register: Register,
    /// Code block index per attached graph block.
    code_index: Vec<Option<usize>>,
    /// Copies to place at the top of a block (exception edges out of it).
    top_moves: BTreeMap<BlockId, MoveSet>,
    /// Copies to place before the terminator of a single-successor block.
    end_moves: BTreeMap<BlockId, MoveSet>,
    /// Copies owned by one edge of a multi-successor block, keyed by
    /// `(block, successor slot)`, together with the edge's target.
    edge_moves: BTreeMap<(BlockId, usize), (BlockId, MoveSet)>,
}

impl<'a> Lowering<'a> {
    fn new(graph: &'a IrGraph) -> Result<Self> {
        let mut lowering = Lowering {
            graph,
            registers: vec![None; graph.value_count()],
            next_register: graph.num_args(),
            code_index: vec![None; graph.block_count()],
            top_moves: BTreeMap::new(),
            end_moves: BTreeMap::new(),
            edge_moves: BTreeMap::new(),
        };
        lowering.assign_registers()?;
        lowering.schedule_phi_moves()?;
        Ok(lowering)
    }

    fn assign_registers(&mut self) -> Result<()> {
        let mut next_code_index = 0;
        for id in self.graph.block_ids() {
            self.code_index[id.index()] = Some(next_code_index);
            next_code_index += 1;

            for phi in &self.graph.block(id).phis {
                self.define(phi.out.index() as usize);
            }
            for instr in &self.graph.block(id).instructions {
                if let Instruction::Argument { index } = instr.kind {
                    if index >= self.graph.num_args() {
                        return Err(invalid_ir_error!(
                            "argument index {} out of range",
                            index
                        ));
                    }
                    let out = instr.out.ok_or_else(|| {
                        invalid_ir_error!("argument {} defines no value", index)
                    })?;
                    self.registers[out.index() as usize] = Some(index);
                } else if let Some(out) = instr.out {
                    self.define(out.index() as usize);
                }
            }
        }
        Ok(())
    }

    fn define(&mut self, value: usize) {
        if self.registers[value].is_none() {
            self.registers[value] = Some(self.next_register);
            self.next_register += 1;
        }
    }

    fn register(&self, value: crate::ir::ValueId) -> Result<Register> {
        self.registers[value.index() as usize]
            .ok_or_else(|| invalid_ir_error!("use of undefined value {}", value))
    }

    /// Distributes every phi's copies to the predecessor-side slot that
    /// will carry them.
    fn schedule_phi_moves(&mut self) -> Result<()> {
        for id in self.graph.block_ids().collect::<Vec<_>>() {
            let block = self.graph.block(id);
            if block.phis.is_empty() {
                continue;
            }
            // Per predecessor block: how many of its occurrences we have
            // seen, and how many of them are exception edges.
            let mut seen: BTreeMap<BlockId, usize> = BTreeMap::new();
            let mut normal_slot: BTreeMap<BlockId, usize> = BTreeMap::new();
            for (position, &pred) in block.predecessors.iter().enumerate() {
                let mut moves = MoveSet::new();
                for phi in &block.phis {
                    if phi.operands.len() != block.predecessors.len() {
                        return Err(invalid_ir_error!(
                            "phi in {} has {} operands for {} predecessors",
                            id,
                            phi.operands.len(),
                            block.predecessors.len()
                        ));
                    }
                    let dest = self.register(phi.out)?;
                    let src = self.register(phi.operands[position])?;
                    moves.push((dest, src));
                }

                let occurrence = seen.entry(pred).or_insert(0);
                let exceptional_edges = self
                    .graph
                    .block(pred)
                    .catch_handlers
                    .iter()
                    .filter(|h| h.target == id)
                    .count();
                // Exception-edge occurrences precede normal ones for the
                // same predecessor; the builder and the inliner both push
                // handler edges first.
                let is_exceptional = *occurrence < exceptional_edges;
                *occurrence += 1;

                if is_exceptional {
                    self.top_moves.entry(pred).or_default().extend(moves);
                } else if self.graph.block(pred).successors.len() <= 1 {
                    self.end_moves.entry(pred).or_default().extend(moves);
                } else {
                    let k = normal_slot.entry(pred).or_insert(0);
                    let slot = self
                        .graph
                        .block(pred)
                        .successors
                        .iter()
                        .enumerate()
                        .filter(|(_, &s)| s == id)
                        .map(|(slot, _)| slot)
                        .nth(*k)
                        .ok_or_else(|| {
                            invalid_ir_error!("{} is not a successor of {}", id, pred)
                        })?;
                    *k += 1;
                    self.edge_moves.insert((pred, slot), (id, moves));
                }
            }
        }
        Ok(())
    }

    fn run(mut self) -> Result<CodeObject> {
        let attached: Vec<BlockId> = self.graph.block_ids().collect();

        // Trampoline indices follow the regular blocks.
        let mut trampoline_index = BTreeMap::new();
        let mut next = attached.len();
        for key in self.edge_moves.keys() {
            trampoline_index.insert(*key, next);
            next += 1;
        }

        let mut code = CodeObject::new(self.graph.num_args());
        for &id in &attached {
            let block = self.lower_block(id, &trampoline_index)?;
            code.blocks.push(block);
        }
        for (key, (target, moves)) in std::mem::take(&mut self.edge_moves) {
            let mut block = CodeBlock::new();
            self.emit_parallel_moves(&moves, &mut block.instructions);
            block.instructions.push(CodeInst::Goto {
                target: self.target_index(target)?,
            });
            debug_assert!(trampoline_index.contains_key(&key));
            code.blocks.push(block);
        }
        code.num_registers = self.next_register;
        Ok(code)
    }

    fn target_index(&self, block: BlockId) -> Result<usize> {
        self.code_index[block.index()]
            .ok_or_else(|| invalid_ir_error!("edge into detached block {}", block))
    }

    fn lower_block(
        &mut self,
        id: BlockId,
        trampolines: &BTreeMap<(BlockId, usize), usize>,
    ) -> Result<CodeBlock> {
        let block = self.graph.block(id);
        let mut out = CodeBlock::new();

        for handler in &block.catch_handlers {
            out.catches
                .push((handler.guard, self.target_index(handler.target)?));
        }
        if let Some(moves) = self.top_moves.remove(&id) {
            self.emit_parallel_moves(&moves, &mut out.instructions);
        }

        let terminator_at = block.instructions.len().checked_sub(1).filter(|_| {
            block
                .instructions
                .last()
                .is_some_and(Instr::is_terminator)
        });
        let Some(terminator_at) = terminator_at else {
            return Err(invalid_ir_error!("{} has no terminator", id));
        };

        for instr in &block.instructions[..terminator_at] {
            if let Some(lowered) = self.lower_instruction(instr)? {
                out.instructions.push(lowered);
            }
        }
        if let Some(moves) = self.end_moves.remove(&id) {
            self.emit_parallel_moves(&moves, &mut out.instructions);
        }
        out.instructions
            .push(self.lower_terminator(id, &block.instructions[terminator_at], trampolines)?);
        Ok(out)
    }

    fn lower_terminator(
        &self,
        id: BlockId,
        instr: &Instr,
        trampolines: &BTreeMap<(BlockId, usize), usize>,
    ) -> Result<CodeInst> {
        let successors = &self.graph.block(id).successors;
        let resolve = |slot: usize| -> Result<usize> {
            if let Some(&index) = trampolines.get(&(id, slot)) {
                return Ok(index);
            }
            let target = successors.get(slot).ok_or_else(|| {
                invalid_ir_error!("{} is missing successor {}", id, slot)
            })?;
            self.target_index(*target)
        };
        match &instr.kind {
            Instruction::If { kind, lhs, rhs } => Ok(CodeInst::If {
                kind: *kind,
                lhs: self.register(*lhs)?,
                rhs: rhs.map(|r| self.register(r)).transpose()?,
                then_target: resolve(0)?,
                else_target: resolve(1)?,
            }),
            Instruction::Goto => Ok(CodeInst::Goto {
                target: resolve(0)?,
            }),
            Instruction::Return { value } => Ok(CodeInst::Return {
                src: value.map(|v| self.register(v)).transpose()?,
            }),
            Instruction::Throw { value } => Ok(CodeInst::Throw {
                src: self.register(*value)?,
            }),
            other => Err(invalid_ir_error!("{:?} is not a terminator", other)),
        }
    }

    fn lower_instruction(&self, instr: &Instr) -> Result<Option<CodeInst>> {
        let dest = |out: Option<crate::ir::ValueId>| -> Result<Register> {
            let out = out.ok_or_else(|| invalid_ir_error!("instruction defines no value"))?;
            self.register(out)
        };
        let lowered = match &instr.kind {
            // Arguments live in their registers on entry; markers are
            // analysis-only.
            Instruction::Argument { .. } | Instruction::AssumeNonNull { .. } => None,
            Instruction::ConstNumber { value } => Some(CodeInst::Const {
                dest: dest(instr.out)?,
                value: ConstValue::Number(*value),
            }),
            Instruction::ConstString { value } => Some(CodeInst::Const {
                dest: dest(instr.out)?,
                value: ConstValue::String(value.clone()),
            }),
            Instruction::ConstNull => Some(CodeInst::Const {
                dest: dest(instr.out)?,
                value: ConstValue::Null,
            }),
            Instruction::Binop { op, lhs, rhs } => Some(CodeInst::Binop {
                dest: dest(instr.out)?,
                op: *op,
                lhs: self.register(*lhs)?,
                rhs: self.register(*rhs)?,
            }),
            Instruction::Invoke { kind, method, args } => {
                let dest = instr.out.map(|o| self.register(o)).transpose()?;
                let args = args
                    .iter()
                    .map(|&a| self.register(a))
                    .collect::<Result<Vec<_>>>()?;
                Some(match kind {
                    InvokeKind::Static => CodeInst::InvokeStatic {
                        dest,
                        method: *method,
                        args,
                    },
                    InvokeKind::Virtual => CodeInst::InvokeVirtual {
                        dest,
                        method: *method,
                        args,
                    },
                    InvokeKind::Direct => CodeInst::InvokeDirect {
                        dest,
                        method: *method,
                        args,
                    },
                })
            }
            Instruction::StaticGet { field } => Some(CodeInst::StaticGet {
                dest: dest(instr.out)?,
                field: *field,
            }),
            Instruction::StaticPut { field, value } => Some(CodeInst::StaticPut {
                src: self.register(*value)?,
                field: *field,
            }),
            Instruction::InstanceGet { field, object } => Some(CodeInst::InstanceGet {
                dest: dest(instr.out)?,
                field: *field,
                object: self.register(*object)?,
            }),
            Instruction::InstancePut {
                field,
                object,
                value,
            } => Some(CodeInst::InstancePut {
                src: self.register(*value)?,
                field: *field,
                object: self.register(*object)?,
            }),
            Instruction::NewInstance { ty } => Some(CodeInst::NewInstance {
                dest: dest(instr.out)?,
                ty: *ty,
            }),
            Instruction::CheckCast { ty, value } => Some(CodeInst::CheckCast {
                dest: dest(instr.out)?,
                src: self.register(*value)?,
                ty: *ty,
            }),
            Instruction::InstanceOf { ty, value } => Some(CodeInst::InstanceOf {
                dest: dest(instr.out)?,
                src: self.register(*value)?,
                ty: *ty,
            }),
            Instruction::InitClass { ty } => Some(CodeInst::InitClass { ty: *ty }),
            Instruction::MonitorEnter { value } => Some(CodeInst::MonitorEnter {
                src: self.register(*value)?,
            }),
            Instruction::MonitorExit { value } => Some(CodeInst::MonitorExit {
                src: self.register(*value)?,
            }),
            Instruction::DebugPosition { line } => {
                Some(CodeInst::DebugPosition { line: *line })
            }
            Instruction::If { .. }
            | Instruction::Goto
            | Instruction::Return { .. }
            | Instruction::Throw { .. } => {
                return Err(invalid_ir_error!("terminator in the middle of a block"));
            }
        };
        Ok(lowered)
    }

    /// Emits one edge's copies, preserving parallel-assignment semantics.
    fn emit_parallel_moves(&mut self, moves: &MoveSet, out: &mut Vec<CodeInst>) {
        let destinations: std::collections::HashSet<Register> =
            moves.iter().map(|&(dest, _)| dest).collect();
        let conflicting = moves.iter().any(|&(_, src)| destinations.contains(&src));
        if !conflicting {
            for &(dest, src) in moves {
                if dest != src {
                    out.push(CodeInst::Move { dest, src });
                }
            }
            return;
        }
        // A destination doubles as a source; stage everything through
        // temporaries so no copy observes another copy's write.
        let mut staged = Vec::with_capacity(moves.len());
        for &(dest, src) in moves {
            let temp = self.next_register;
            self.next_register += 1;
            out.push(CodeInst::Move { dest: temp, src });
            staged.push((dest, temp));
        }
        for (dest, temp) in staged {
            out.push(CodeInst::Move { dest, src: temp });
        }
    }
}
