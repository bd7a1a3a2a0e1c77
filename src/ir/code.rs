//! The register-based code object exchanged with the decoder and encoder.
//!
//! A [`CodeObject`] is the external, linear form of a method body: basic
//! blocks of register instructions. The decoder hands the pipeline one per
//! method; the pipeline lowers each optimized IR graph back into one for
//! the encoder. The IR builder is the only consumer, and the lowering in
//! [`crate::pipeline`] the only producer, of this form inside the core.

use crate::{
    ir::{BinopKind, ConstValue, IfKind},
    refs::{FieldId, MethodId, TypeId},
};

/// The output format's hard limit on invoke arguments.
///
/// Rewriting that would push a signature past this limit is a hard error,
/// never a truncation.
pub const MAX_ARGUMENTS: usize = 255;

/// A register index in a code object.
pub type Register = u32;

/// A method body in the register dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    /// Number of registers the body uses.
    pub num_registers: u32,
    /// Number of leading registers holding arguments on entry. For instance
    /// methods register 0 is the receiver.
    pub num_args: u32,
    /// Basic blocks; block 0 is the entry.
    pub blocks: Vec<CodeBlock>,
}

impl CodeObject {
    /// Creates a code object with the given argument count and no blocks.
    #[must_use]
    pub fn new(num_args: u32) -> Self {
        CodeObject {
            num_registers: num_args,
            num_args,
            blocks: Vec::new(),
        }
    }

    /// Total instruction count across all blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}

/// A basic block of register instructions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeBlock {
    /// Straight-line instructions; the last one is the terminator.
    pub instructions: Vec<CodeInst>,
    /// Exception handlers guarding this block, in priority order.
    pub catches: Vec<(TypeId, usize)>,
}

impl CodeBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        CodeBlock::default()
    }
}

/// A single register instruction.
///
/// Branch targets are block indices into [`CodeObject::blocks`].
#[derive(Debug, Clone, PartialEq)]
pub enum CodeInst {
    /// Load a constant into a register.
    Const {
        /// Destination register.
        dest: Register,
        /// The constant.
        value: ConstValue,
    },
    /// Copy a register.
    Move {
        /// Destination register.
        dest: Register,
        /// Source register.
        src: Register,
    },
    /// Binary operation.
    Binop {
        /// Destination register.
        dest: Register,
        /// Operator.
        op: BinopKind,
        /// Left operand register.
        lhs: Register,
        /// Right operand register.
        rhs: Register,
    },
    /// Static method invocation.
    InvokeStatic {
        /// Destination register for the return value, if any.
        dest: Option<Register>,
        /// Callee reference.
        method: MethodId,
        /// Argument registers.
        args: Vec<Register>,
    },
    /// Virtual dispatch; `args[0]` is the receiver.
    InvokeVirtual {
        /// Destination register for the return value, if any.
        dest: Option<Register>,
        /// Callee reference.
        method: MethodId,
        /// Argument registers, receiver first.
        args: Vec<Register>,
    },
    /// Direct (non-virtual) instance invocation; `args[0]` is the receiver.
    InvokeDirect {
        /// Destination register for the return value, if any.
        dest: Option<Register>,
        /// Callee reference.
        method: MethodId,
        /// Argument registers, receiver first.
        args: Vec<Register>,
    },
    /// Read a static field.
    StaticGet {
        /// Destination register.
        dest: Register,
        /// Field reference.
        field: FieldId,
    },
    /// Write a static field.
    StaticPut {
        /// Source register.
        src: Register,
        /// Field reference.
        field: FieldId,
    },
    /// Read an instance field.
    InstanceGet {
        /// Destination register.
        dest: Register,
        /// Field reference.
        field: FieldId,
        /// Receiver register.
        object: Register,
    },
    /// Write an instance field.
    InstancePut {
        /// Source register.
        src: Register,
        /// Field reference.
        field: FieldId,
        /// Receiver register.
        object: Register,
    },
    /// Allocate an instance without running a constructor.
    NewInstance {
        /// Destination register.
        dest: Register,
        /// Class to instantiate.
        ty: TypeId,
    },
    /// Checked downcast; throws on failure.
    CheckCast {
        /// Destination register.
        dest: Register,
        /// Source register.
        src: Register,
        /// Target type.
        ty: TypeId,
    },
    /// Type test producing 0 or 1.
    InstanceOf {
        /// Destination register.
        dest: Register,
        /// Source register.
        src: Register,
        /// Tested type.
        ty: TypeId,
    },
    /// Trigger class initialization.
    InitClass {
        /// The class to initialize.
        ty: TypeId,
    },
    /// Acquire an object monitor.
    MonitorEnter {
        /// Monitored object register.
        src: Register,
    },
    /// Release an object monitor.
    MonitorExit {
        /// Monitored object register.
        src: Register,
    },
    /// Conditional branch. `rhs` of `None` compares against zero/null.
    If {
        /// Comparison kind.
        kind: IfKind,
        /// Left operand register.
        lhs: Register,
        /// Right operand register, `None` for zero/null.
        rhs: Option<Register>,
        /// Target block when the comparison holds.
        then_target: usize,
        /// Target block otherwise.
        else_target: usize,
    },
    /// Unconditional branch.
    Goto {
        /// Target block.
        target: usize,
    },
    /// Return, with an optional value register.
    Return {
        /// Returned register, `None` for void.
        src: Option<Register>,
    },
    /// Throw the referenced exception object.
    Throw {
        /// Exception register.
        src: Register,
    },
    /// Source line marker carried through for the encoder.
    DebugPosition {
        /// Source line.
        line: u32,
    },
}
