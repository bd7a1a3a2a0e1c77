//! IR instructions with explicit value operands.
//!
//! Instructions are a closed tagged enum so every transformation dispatches
//! with exhaustive matches - a new instruction kind fails to compile until
//! the rewriter, the constraint computation and the lowering handle it.

use std::fmt;

use crate::{
    ir::{BinopKind, IfKind, ValueId},
    refs::{FieldId, MethodId, TypeId},
};

/// How an invoke dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// Static call, no receiver.
    Static,
    /// Virtual dispatch on the receiver.
    Virtual,
    /// Direct (non-virtual) call on the receiver.
    Direct,
}

/// A single IR operation.
///
/// The defined value, if any, lives on the enclosing [`Instr`]; operands are
/// explicit [`ValueId`]s here.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Formal argument of the method.
    Argument {
        /// Argument position, receiver first for instance methods.
        index: u32,
    },
    /// Integer constant.
    ConstNumber {
        /// The constant.
        value: i64,
    },
    /// String constant.
    ConstString {
        /// The constant.
        value: String,
    },
    /// Null constant.
    ConstNull,
    /// Binary operation.
    Binop {
        /// Operator.
        op: BinopKind,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Method invocation. For `Virtual` and `Direct`, `args[0]` is the
    /// receiver and the remaining entries mirror the prototype parameters.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Callee reference.
        method: MethodId,
        /// Argument values.
        args: Vec<ValueId>,
    },
    /// Read a static field.
    StaticGet {
        /// Field reference.
        field: FieldId,
    },
    /// Write a static field.
    StaticPut {
        /// Field reference.
        field: FieldId,
        /// Stored value.
        value: ValueId,
    },
    /// Read an instance field.
    InstanceGet {
        /// Field reference.
        field: FieldId,
        /// Receiver.
        object: ValueId,
    },
    /// Write an instance field.
    InstancePut {
        /// Field reference.
        field: FieldId,
        /// Receiver.
        object: ValueId,
        /// Stored value.
        value: ValueId,
    },
    /// Allocate an instance without running a constructor.
    NewInstance {
        /// Class to instantiate.
        ty: TypeId,
    },
    /// Checked downcast of `value` to `ty`; throws on failure.
    CheckCast {
        /// Target type.
        ty: TypeId,
        /// Cast value.
        value: ValueId,
    },
    /// Type test producing 0 or 1.
    InstanceOf {
        /// Tested type.
        ty: TypeId,
        /// Tested value.
        value: ValueId,
    },
    /// Trigger class initialization of `ty`.
    InitClass {
        /// The class to initialize.
        ty: TypeId,
    },
    /// Analysis marker: `value` is known non-null from here on.
    ///
    /// Never lowered to code; dead-code elimination may drop it freely.
    AssumeNonNull {
        /// The value assumed non-null.
        value: ValueId,
    },
    /// Acquire an object monitor.
    MonitorEnter {
        /// Monitored object.
        value: ValueId,
    },
    /// Release an object monitor.
    MonitorExit {
        /// Monitored object.
        value: ValueId,
    },
    /// Conditional branch; targets live on the block's successor list as
    /// `[then, else]`. `rhs` of `None` compares against zero/null.
    If {
        /// Comparison kind.
        kind: IfKind,
        /// Left operand.
        lhs: ValueId,
        /// Right operand, `None` for zero/null.
        rhs: Option<ValueId>,
    },
    /// Unconditional branch to the single successor.
    Goto,
    /// Return, with an optional value.
    Return {
        /// Returned value, `None` for void.
        value: Option<ValueId>,
    },
    /// Throw the exception object.
    Throw {
        /// Exception value.
        value: ValueId,
    },
    /// Source line marker carried through for the encoder.
    DebugPosition {
        /// Source line.
        line: u32,
    },
}

/// An instruction together with its defined value, if it produces one.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// The operation.
    pub kind: Instruction,
    /// The value this instruction defines, at most one.
    pub out: Option<ValueId>,
}

impl Instr {
    /// Creates an instruction defining `out`.
    #[must_use]
    pub fn new(kind: Instruction, out: Option<ValueId>) -> Self {
        Instr { kind, out }
    }

    /// Creates an instruction with no defined value.
    #[must_use]
    pub fn effect(kind: Instruction) -> Self {
        Instr { kind, out: None }
    }

    /// Returns the operand values in evaluation order.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match &self.kind {
            Instruction::Argument { .. }
            | Instruction::ConstNumber { .. }
            | Instruction::ConstString { .. }
            | Instruction::ConstNull
            | Instruction::StaticGet { .. }
            | Instruction::NewInstance { .. }
            | Instruction::InitClass { .. }
            | Instruction::Goto
            | Instruction::DebugPosition { .. } => Vec::new(),
            Instruction::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instruction::Invoke { args, .. } => args.clone(),
            Instruction::StaticPut { value, .. }
            | Instruction::CheckCast { value, .. }
            | Instruction::InstanceOf { value, .. }
            | Instruction::AssumeNonNull { value }
            | Instruction::MonitorEnter { value }
            | Instruction::MonitorExit { value }
            | Instruction::Throw { value } => vec![*value],
            Instruction::InstanceGet { object, .. } => vec![*object],
            Instruction::InstancePut { object, value, .. } => vec![*object, *value],
            Instruction::If { lhs, rhs, .. } => match rhs {
                Some(rhs) => vec![*lhs, *rhs],
                None => vec![*lhs],
            },
            Instruction::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Rewrites every operand through `f`.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match &mut self.kind {
            Instruction::Argument { .. }
            | Instruction::ConstNumber { .. }
            | Instruction::ConstString { .. }
            | Instruction::ConstNull
            | Instruction::StaticGet { .. }
            | Instruction::NewInstance { .. }
            | Instruction::InitClass { .. }
            | Instruction::Goto
            | Instruction::DebugPosition { .. } => {}
            Instruction::Binop { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::Invoke { args, .. } => args.iter_mut().for_each(f),
            Instruction::StaticPut { value, .. }
            | Instruction::CheckCast { value, .. }
            | Instruction::InstanceOf { value, .. }
            | Instruction::AssumeNonNull { value }
            | Instruction::MonitorEnter { value }
            | Instruction::MonitorExit { value }
            | Instruction::Throw { value } => f(value),
            Instruction::InstanceGet { object, .. } => f(object),
            Instruction::InstancePut { object, value, .. } => {
                f(object);
                f(value);
            }
            Instruction::If { lhs, rhs, .. } => {
                f(lhs);
                if let Some(rhs) = rhs {
                    f(rhs);
                }
            }
            Instruction::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
        }
    }

    /// Returns `true` if the instruction ends its block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            Instruction::If { .. }
                | Instruction::Goto
                | Instruction::Return { .. }
                | Instruction::Throw { .. }
        )
    }

    /// Returns `true` if the instruction can transfer control to a handler.
    #[must_use]
    pub const fn can_throw(&self) -> bool {
        matches!(
            self.kind,
            Instruction::Invoke { .. }
                | Instruction::StaticGet { .. }
                | Instruction::StaticPut { .. }
                | Instruction::InstanceGet { .. }
                | Instruction::InstancePut { .. }
                | Instruction::NewInstance { .. }
                | Instruction::CheckCast { .. }
                | Instruction::InitClass { .. }
                | Instruction::MonitorEnter { .. }
                | Instruction::MonitorExit { .. }
                | Instruction::Throw { .. }
                | Instruction::Binop {
                    op: crate::ir::BinopKind::Div,
                    ..
                }
        )
    }

    /// Returns `true` if removing the instruction would change behavior
    /// even when its defined value is unused.
    #[must_use]
    pub const fn has_side_effects(&self) -> bool {
        matches!(
            self.kind,
            Instruction::Invoke { .. }
                | Instruction::StaticGet { .. }
                | Instruction::StaticPut { .. }
                | Instruction::InstanceGet { .. }
                | Instruction::InstancePut { .. }
                | Instruction::NewInstance { .. }
                | Instruction::CheckCast { .. }
                | Instruction::InitClass { .. }
                | Instruction::MonitorEnter { .. }
                | Instruction::MonitorExit { .. }
                | Instruction::If { .. }
                | Instruction::Goto
                | Instruction::Return { .. }
                | Instruction::Throw { .. }
                | Instruction::Binop {
                    op: crate::ir::BinopKind::Div,
                    ..
                }
        )
    }

    /// Returns the invoked method if this is an invoke.
    #[must_use]
    pub fn invoked_method(&self) -> Option<MethodId> {
        match &self.kind {
            Instruction::Invoke { method, .. } => Some(*method),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(out) = self.out {
            write!(f, "{out} = ")?;
        }
        match &self.kind {
            Instruction::Argument { index } => write!(f, "arg {index}"),
            Instruction::ConstNumber { value } => write!(f, "const {value}"),
            Instruction::ConstString { value } => write!(f, "const-string {value:?}"),
            Instruction::ConstNull => write!(f, "const-null"),
            Instruction::Binop { op, lhs, rhs } => write!(f, "{op:?} {lhs}, {rhs}"),
            Instruction::Invoke { kind, method, args } => {
                write!(f, "invoke-{kind:?} {method} (")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Instruction::StaticGet { field } => write!(f, "sget {field}"),
            Instruction::StaticPut { field, value } => write!(f, "sput {field}, {value}"),
            Instruction::InstanceGet { field, object } => write!(f, "iget {field}, {object}"),
            Instruction::InstancePut {
                field,
                object,
                value,
            } => write!(f, "iput {field}, {object}, {value}"),
            Instruction::NewInstance { ty } => write!(f, "new {ty}"),
            Instruction::CheckCast { ty, value } => write!(f, "check-cast {value} to {ty}"),
            Instruction::InstanceOf { ty, value } => write!(f, "instance-of {value}, {ty}"),
            Instruction::InitClass { ty } => write!(f, "init-class {ty}"),
            Instruction::AssumeNonNull { value } => write!(f, "assume-nonnull {value}"),
            Instruction::MonitorEnter { value } => write!(f, "monitor-enter {value}"),
            Instruction::MonitorExit { value } => write!(f, "monitor-exit {value}"),
            Instruction::If { kind, lhs, rhs } => match rhs {
                Some(rhs) => write!(f, "if-{kind:?} {lhs}, {rhs}"),
                None => write!(f, "if-{kind:?}z {lhs}"),
            },
            Instruction::Goto => write!(f, "goto"),
            Instruction::Return { value } => match value {
                Some(value) => write!(f, "return {value}"),
                None => write!(f, "return-void"),
            },
            Instruction::Throw { value } => write!(f, "throw {value}"),
            Instruction::DebugPosition { line } => write!(f, ".line {line}"),
        }
    }
}
