//! Basic blocks, phis, and exception handlers.
//!
//! Blocks live in the graph's arena and refer to each other exclusively by
//! [`BlockId`] - successors, predecessors, phi operands and catch targets
//! are all indices, never owned references.
//!
//! Phi semantics: phis are evaluated simultaneously at block entry, before
//! any instruction. A phi's operand list is parallel to the block's
//! predecessor list: operand `i` is the value flowing in from
//! `predecessors[i]`.

use std::fmt;

use crate::{
    ir::{Instr, ValueId},
    refs::TypeId,
};

/// Index of a basic block in its graph's arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Creates a block id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        BlockId(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A phi merging values at block entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    /// The value the phi defines.
    pub out: ValueId,
    /// One operand per predecessor, in predecessor-list order.
    pub operands: Vec<ValueId>,
}

impl Phi {
    /// Creates a phi defining `out` with no operands yet.
    #[must_use]
    pub fn new(out: ValueId) -> Self {
        Phi {
            out,
            operands: Vec::new(),
        }
    }

    /// Returns `true` if every operand is either the same single value or
    /// the phi itself.
    ///
    /// Such a phi is redundant and can be replaced by that value.
    #[must_use]
    pub fn trivial_replacement(&self) -> Option<ValueId> {
        let mut unique = None;
        for &op in &self.operands {
            if op == self.out {
                continue;
            }
            match unique {
                None => unique = Some(op),
                Some(existing) if existing == op => {}
                Some(_) => return None,
            }
        }
        unique
    }
}

/// An exception handler edge: a guard type and its target block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchHandler {
    /// The guarded exception type.
    pub guard: TypeId,
    /// The handler block entered when the guard matches.
    pub target: BlockId,
}

/// A basic block: phis, instructions, and CFG edges by index.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// Predecessor blocks, order significant for phi operands.
    pub predecessors: Vec<BlockId>,
    /// Successor blocks. For an `If` terminator the order is `[then, else]`.
    pub successors: Vec<BlockId>,
    /// Phis at block entry.
    pub phis: Vec<Phi>,
    /// Instructions in execution order; the last is the terminator.
    pub instructions: Vec<Instr>,
    /// Exception handlers guarding this block, in priority order.
    pub catch_handlers: Vec<CatchHandler>,
    /// Detached blocks are unreachable tombstones awaiting lowering, which
    /// skips them. Ids stay stable.
    pub detached: bool,
}

impl BasicBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        BasicBlock::default()
    }

    /// Returns the terminator instruction, if the block is non-empty.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instr> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    /// Replaces a predecessor id in place, keeping phi operand order intact.
    pub fn replace_predecessor(&mut self, old: BlockId, new: BlockId) {
        for pred in &mut self.predecessors {
            if *pred == old {
                *pred = new;
            }
        }
    }

    /// Replaces a successor id in place.
    pub fn replace_successor(&mut self, old: BlockId, new: BlockId) {
        for succ in &mut self.successors {
            if *succ == old {
                *succ = new;
            }
        }
    }

    /// Position of `pred` in the predecessor list.
    #[must_use]
    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.predecessors.iter().position(|&p| p == pred)
    }

    /// Removes the predecessor at `index`, dropping the matching operand
    /// from every phi.
    pub fn remove_predecessor(&mut self, index: usize) {
        self.predecessors.remove(index);
        for phi in &mut self.phis {
            if index < phi.operands.len() {
                phi.operands.remove(index);
            }
        }
    }

    /// Values defined in this block: phi outs plus instruction outs.
    pub fn defined_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        let phi_defs = self.phis.iter().map(|p| p.out);
        let instr_defs = self.instructions.iter().filter_map(|i| i.out);
        phi_defs.chain(instr_defs)
    }
}
