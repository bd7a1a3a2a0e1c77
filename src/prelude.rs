//! # classlens Prelude
//!
//! A curated selection of the most frequently used types, for convenient
//! glob imports in pipeline embedders and tests.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all classlens operations
pub use crate::Error;

/// The result type used throughout classlens
pub use crate::Result;

// ================================================================================================
// References and the Program View
// ================================================================================================

/// Interned reference ids
pub use crate::refs::{FieldId, MethodId, TypeId};

/// The whole-program set and its definitions
pub use crate::refs::{
    AccessFlags, ClassDef, FieldDef, KeepInfo, MethodDef, MethodProto, ProgramMethod, ProgramView,
    RefInterner,
};

// ================================================================================================
// Lens Chain
// ================================================================================================

/// The chain, its records and lookup results
pub use crate::lens::{
    FieldLookupResult, FieldMapping, InstructionRewriteHook, LensChain, LensId, LensRecord,
    MethodLookupResult, MethodMapping, RewrittenPrototypeDescription,
};

// ================================================================================================
// IR
// ================================================================================================

/// The register form exchanged with decoder and encoder
pub use crate::ir::{CodeBlock, CodeInst, CodeObject, Register};

/// The per-method value graph and its construction
pub use crate::ir::{build_ir, lower, BasicBlock, BlockId, Instr, Instruction, IrGraph, ValueId};

// ================================================================================================
// Rewriter, Pipeline and Inliner
// ================================================================================================

/// Lens replay over method graphs
pub use crate::rewrite::LensCodeRewriter;

/// Pipeline orchestration and feedback
pub use crate::pipeline::{
    Converter, FeedbackBuffer, MethodState, OptimizationInfo, OptimizationInfoStore, Warning, Wave,
    WaveScheduler,
};

/// Inlining policy and constraints
pub use crate::inliner::{
    Constraint, ConstraintWithTarget, DefaultOracle, InlineReason, InlineStrategy, InlinerOptions,
};
