// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # classlens
//!
//! The optimizer core of a whole-program bytecode compiler: a closed set of
//! classes is repeatedly rewritten by structural optimizations that never
//! patch code eagerly. Instead, every reference change - renamed classes,
//! merged methods, retyped fields, rewritten prototypes - is appended to an
//! immutable *lens chain*, and each method body catches up lazily the next
//! time the pipeline touches it.
//!
//! ## Features
//!
//! - **Lens chain** - append-only log of reference remappings with
//!   stop-bounded, composing lookups
//! - **SSA-like IR** - per-method graphs with explicit values, phis and
//!   exceptional edges
//! - **Lens code rewriter** - replays unapplied chain records over a graph:
//!   reference substitution, cast insertion, prototype adjustment, custom
//!   hooks
//! - **Wave pipeline** - bounded batches of methods processed in parallel
//!   with `rayon`, feedback committed single-threaded at wave boundaries
//! - **Heuristic inliner** - accessibility-constraint and budget driven
//!   splicing with a pluggable oracle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use classlens::prelude::*;
//!
//! let view = ProgramView::new();
//! let chain = LensChain::new();
//! // ... register classes, methods and their code objects ...
//! let mut scheduler = WaveScheduler::new(Converter::new(&view, &chain));
//! scheduler.run(Vec::new())?;
//! for warning in scheduler.converter().warnings() {
//!     eprintln!("{warning}");
//! }
//! # Ok::<(), classlens::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Decoding and encoding of the container format stay outside this crate:
//! the input is one [`crate::ir::CodeObject`] per method plus static
//! metadata, the output is the finalized code objects together with the
//! final [`crate::lens::LensId`] so the encoder can remap debug info and
//! catch guards to original references.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use classlens::prelude::*;
///
/// let view = ProgramView::new();
/// let chain = LensChain::new();
/// assert!(chain.head().is_base());
/// assert!(view.definition_for(TypeId::new(0)).is_none());
/// ```
pub mod prelude;

/// Interned references and the whole-program view.
///
/// Classes, methods and fields are referred to by small copyable ids drawn
/// from a [`refs::RefInterner`]; [`refs::ProgramView`] holds the closed
/// program set, hierarchy queries and keep info.
pub mod refs;

/// The append-only lens chain recording reference remappings.
///
/// # Key Types
///
/// - [`lens::LensChain`] - the shared chain with stop-bounded lookups
/// - [`lens::LensRecord`] - one optimization's type/method/field mappings
/// - [`lens::RewrittenPrototypeDescription`] - parameter and return changes
pub mod lens;

/// The per-method SSA-like IR: construction, graphs and lowering.
///
/// # Key Types
///
/// - [`ir::CodeObject`] - the linear register form exchanged with the
///   decoder and encoder
/// - [`ir::IrGraph`] - the mutable value graph passes operate on
pub mod ir;

/// Replay of unapplied lens records over method graphs.
pub mod rewrite;

/// The wave-based optimization pipeline and per-method conversion.
pub mod pipeline;

/// Heuristic inlining: constraints, oracle and splicing.
pub mod inliner;

/// The result type used throughout classlens.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
