//! The per-method IR graph.
//!
//! An [`IrGraph`] owns an arena of basic blocks and an arena of value
//! slots. Everything is addressed by index ([`BlockId`], [`ValueId`]) so
//! the rewriter and the inliner can splice, split and detach blocks
//! without invalidating references held elsewhere.
//!
//! A graph remembers the lens snapshot it was built against (its *code
//! lens*); the lens code rewriter advances it to the chain head before any
//! optimization pass runs.

use std::fmt;

use crate::{
    ir::{BasicBlock, Instr, ValueType},
    lens::LensId,
    refs::ProgramMethod,
    Result,
};

/// Index of a value slot in its graph's arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    /// Creates a value id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        ValueId(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({})", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

pub use crate::ir::block::BlockId;

/// The mutable SSA-like graph of one method.
#[derive(Debug, Clone)]
pub struct IrGraph {
    /// The method this graph belongs to.
    method: ProgramMethod,
    /// The lens snapshot the graph's references are current against.
    code_lens: LensId,
    /// Block arena; block 0 is the entry.
    blocks: Vec<BasicBlock>,
    /// Value slot types, indexed by [`ValueId`].
    values: Vec<ValueType>,
    /// Number of formal arguments, receiver included.
    num_args: u32,
}

impl IrGraph {
    /// Creates an empty graph for `method`, current as of `code_lens`.
    #[must_use]
    pub fn new(method: ProgramMethod, code_lens: LensId, num_args: u32) -> Self {
        IrGraph {
            method,
            code_lens,
            blocks: Vec::new(),
            values: Vec::new(),
            num_args,
        }
    }

    /// The method the graph belongs to.
    #[must_use]
    pub const fn method(&self) -> ProgramMethod {
        self.method
    }

    /// The lens snapshot the graph was last rewritten to.
    #[must_use]
    pub const fn code_lens(&self) -> LensId {
        self.code_lens
    }

    /// Stamps a new code lens after a completed rewrite.
    pub fn set_code_lens(&mut self, lens: LensId) {
        self.code_lens = lens;
    }

    /// Number of formal arguments.
    #[must_use]
    pub const fn num_args(&self) -> u32 {
        self.num_args
    }

    /// The entry block.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    /// Allocates a fresh value slot.
    pub fn alloc_value(&mut self, ty: ValueType) -> ValueId {
        let id = ValueId::new(u32::try_from(self.values.len()).expect("value arena overflow"));
        self.values.push(ty);
        id
    }

    /// Number of allocated value slots.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// The inferred type of a value.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> &ValueType {
        &self.values[value.index() as usize]
    }

    /// Overwrites the inferred type of a value.
    pub fn set_value_type(&mut self, value: ValueId, ty: ValueType) {
        self.values[value.index() as usize] = ty;
    }

    /// Appends a new block to the arena.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId::new(u32::try_from(self.blocks.len()).expect("block arena overflow"));
        self.blocks.push(BasicBlock::new());
        id
    }

    /// Borrows a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Mutably borrows a block.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Number of blocks in the arena, detached tombstones included.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Iterates the ids of attached blocks in arena order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.detached)
            .map(|(i, _)| BlockId::new(i as u32))
    }

    /// Adds a CFG edge, keeping predecessor and successor lists in sync.
    pub fn link(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].successors.push(to);
        self.blocks[to.index()].predecessors.push(from);
    }

    /// Total instruction count over attached blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| !b.detached)
            .map(|b| b.instructions.len())
            .sum()
    }

    /// Replaces every use of `old` with `new` in phis and instructions.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) {
        for block in &mut self.blocks {
            if block.detached {
                continue;
            }
            for phi in &mut block.phis {
                for operand in &mut phi.operands {
                    if *operand == old {
                        *operand = new;
                    }
                }
            }
            for instr in &mut block.instructions {
                instr.for_each_operand_mut(|v| {
                    if *v == old {
                        *v = new;
                    }
                });
            }
        }
    }

    /// Splits `block` after the instruction at `index`.
    ///
    /// The tail (instructions past `index`) moves to a fresh block that
    /// inherits the original successors and catch handlers; the original
    /// block ends with a goto to the tail. Each handler target gains the
    /// tail as an additional exceptional predecessor, with phi operands
    /// duplicated from the head's own exceptional edge.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidIr`] if `index` is out of range.
    pub fn split_block_after(&mut self, block: BlockId, index: usize) -> Result<BlockId> {
        if index >= self.blocks[block.index()].instructions.len() {
            return Err(invalid_ir_error!(
                "split index {} out of range in {}",
                index,
                block
            ));
        }
        let tail_id = self.add_block();

        let head = &mut self.blocks[block.index()];
        let tail_instructions = head.instructions.split_off(index + 1);
        let tail_successors = std::mem::take(&mut head.successors);
        let handlers = head.catch_handlers.clone();
        head.instructions.push(Instr::effect(crate::ir::Instruction::Goto));
        head.successors = vec![tail_id];

        // Normal occurrences sit after exceptional ones, so the last
        // occurrence is the branch edge being moved to the tail.
        for &succ in &tail_successors {
            let preds = &mut self.blocks[succ.index()].predecessors;
            if let Some(pos) = preds.iter().rposition(|&p| p == block) {
                preds[pos] = tail_id;
            }
        }

        let tail = &mut self.blocks[tail_id.index()];
        tail.instructions = tail_instructions;
        tail.successors = tail_successors;
        tail.predecessors = vec![block];
        tail.catch_handlers = handlers.clone();

        // Handler phi operands for the tail match the head's exceptional
        // edge: both edges carry the try region's entry state. The tail's
        // occurrence goes right behind the head's so exceptional entries
        // keep preceding normal ones. Multiple handlers sharing a target
        // pair up with the head's occurrences in order.
        let mut occurrence: std::collections::HashMap<BlockId, usize> =
            std::collections::HashMap::new();
        for handler in handlers {
            let n = occurrence.entry(handler.target).or_insert(0);
            let target = &mut self.blocks[handler.target.index()];
            let idx = target
                .predecessors
                .iter()
                .enumerate()
                .filter(|(_, &p)| p == block)
                .map(|(i, _)| i)
                .nth(*n);
            *n += 1;
            if let Some(idx) = idx {
                target.predecessors.insert(idx + 1, tail_id);
                for phi in &mut target.phis {
                    let op = phi.operands[idx];
                    phi.operands.insert(idx + 1, op);
                }
            }
        }
        Ok(tail_id)
    }

    /// Detaches every block unreachable from the entry.
    ///
    /// Handler targets count as reachable from their guarded block.
    /// Returns `true` if anything was detached.
    pub fn remove_unreachable_blocks(&mut self) -> bool {
        let mut reachable = vec![false; self.blocks.len()];
        let mut worklist = vec![self.entry()];
        while let Some(id) = worklist.pop() {
            if std::mem::replace(&mut reachable[id.index()], true) {
                continue;
            }
            let block = &self.blocks[id.index()];
            worklist.extend(block.successors.iter().copied());
            worklist.extend(block.catch_handlers.iter().map(|h| h.target));
        }

        let mut changed = false;
        for index in 0..self.blocks.len() {
            if reachable[index] || self.blocks[index].detached {
                continue;
            }
            changed = true;
            let id = BlockId::new(index as u32);
            let successors = std::mem::take(&mut self.blocks[index].successors);
            let handlers = std::mem::take(&mut self.blocks[index].catch_handlers);
            for succ in successors
                .into_iter()
                .chain(handlers.into_iter().map(|h| h.target))
            {
                if let Some(pos) = self.blocks[succ.index()].predecessor_index(id) {
                    self.blocks[succ.index()].remove_predecessor(pos);
                }
            }
            let block = &mut self.blocks[index];
            block.detached = true;
            block.instructions.clear();
            block.phis.clear();
            block.predecessors.clear();
        }
        changed
    }
}

impl fmt::Display for IrGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.block_ids() {
            let block = self.block(id);
            writeln!(f, "{id}:")?;
            for phi in &block.phis {
                write!(f, "  {} = phi(", phi.out)?;
                for (i, (op, pred)) in phi.operands.iter().zip(&block.predecessors).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{op} from {pred}")?;
                }
                writeln!(f, ")")?;
            }
            for instr in &block.instructions {
                writeln!(f, "  {instr}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Instruction, ValueType},
        refs::{MethodId, TypeId},
    };

    fn test_graph() -> IrGraph {
        IrGraph::new(
            ProgramMethod::new(TypeId::new(0), MethodId::new(0)),
            LensId::BASE,
            0,
        )
    }

    #[test]
    fn test_value_allocation() {
        let mut graph = test_graph();
        let a = graph.alloc_value(ValueType::Int);
        let b = graph.alloc_value(ValueType::Object);
        assert_ne!(a, b);
        assert_eq!(graph.value_type(a), &ValueType::Int);
        assert_eq!(graph.value_type(b), &ValueType::Object);
    }

    #[test]
    fn test_link_keeps_edges_in_sync() {
        let mut graph = test_graph();
        let a = graph.add_block();
        let b = graph.add_block();
        graph.link(a, b);
        assert_eq!(graph.block(a).successors, vec![b]);
        assert_eq!(graph.block(b).predecessors, vec![a]);
    }

    #[test]
    fn test_split_block_after() {
        let mut graph = test_graph();
        let entry = graph.add_block();
        let exit = graph.add_block();
        let v = graph.alloc_value(ValueType::Int);
        graph.block_mut(entry).instructions = vec![
            Instr::new(Instruction::ConstNumber { value: 1 }, Some(v)),
            Instr::new(Instruction::ConstNumber { value: 2 }, None),
            Instr::effect(Instruction::Goto),
        ];
        graph.link(entry, exit);

        let tail = graph.split_block_after(entry, 0).unwrap();
        // Head keeps the first instruction plus a fresh goto.
        assert_eq!(graph.block(entry).instructions.len(), 2);
        assert!(graph.block(entry).terminator().is_some());
        assert_eq!(graph.block(entry).successors, vec![tail]);
        // Tail inherits the rest and the old successor edge.
        assert_eq!(graph.block(tail).instructions.len(), 2);
        assert_eq!(graph.block(tail).successors, vec![exit]);
        assert_eq!(graph.block(exit).predecessors, vec![tail]);
    }

    #[test]
    fn test_remove_unreachable_blocks() {
        let mut graph = test_graph();
        let entry = graph.add_block();
        let live = graph.add_block();
        let dead = graph.add_block();
        graph.link(entry, live);
        graph.link(dead, live);
        graph.block_mut(entry).instructions.push(Instr::effect(Instruction::Goto));
        graph
            .block_mut(live)
            .instructions
            .push(Instr::effect(Instruction::Return { value: None }));

        assert!(graph.remove_unreachable_blocks());
        assert!(graph.block(dead).detached);
        // The dead predecessor edge is gone.
        assert_eq!(graph.block(live).predecessors, vec![entry]);
        // Second run is a no-op.
        assert!(!graph.remove_unreachable_blocks());
    }

    #[test]
    fn test_replace_uses() {
        let mut graph = test_graph();
        let block = graph.add_block();
        let old = graph.alloc_value(ValueType::Int);
        let new = graph.alloc_value(ValueType::Int);
        graph
            .block_mut(block)
            .instructions
            .push(Instr::effect(Instruction::Return { value: Some(old) }));
        graph.replace_uses(old, new);
        assert_eq!(
            graph.block(block).instructions[0].operands(),
            vec![new]
        );
    }
}
