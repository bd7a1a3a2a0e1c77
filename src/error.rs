use thiserror::Error;

use crate::refs::MethodId;

macro_rules! invalid_ir_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvalidIr {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidIr {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, covering every hard failure this library can return.
///
/// Only unrecoverable invariant violations surface here. A method that merely
/// fails post-rewrite type checking is replaced by a throwing stub and recorded
/// as a [`crate::pipeline::Warning`]; an unprovable optimization opportunity is
/// skipped silently. An `Error` means the rewriting machinery itself is unsound
/// for this input, and the run terminates without emitting output.
///
/// # Error Categories
///
/// ## Lens Chain Errors
/// - [`Error::LensCycle`] - The previous-lens chain does not terminate
/// - [`Error::UnknownLens`] - A lens id does not address a registered record
///
/// ## Rewriting Errors
/// - [`Error::ArgumentCountOverflow`] - A prototype rewrite pushed a method
///   past the output format's argument limit
/// - [`Error::InvalidIr`] - The IR graph reached an inconsistent state
///
/// ## Reference Errors
/// - [`Error::UnknownReference`] - A reference id was not produced by this
///   program's intern table
#[derive(Error, Debug)]
pub enum Error {
    /// The lens chain contains a cycle.
    ///
    /// The chain is append-only and every record must point strictly backward,
    /// so a cycle indicates a corrupted chain. Lookups would not terminate.
    #[error("Lens chain contains a cycle at lens {0}")]
    LensCycle(u32),

    /// A lens id does not address any appended record.
    #[error("Lens id {0} is not registered in the chain")]
    UnknownLens(u32),

    /// Rewriting pushed a method's argument count past the output format limit.
    ///
    /// Appending lens-materialized trailing parameters can grow a signature.
    /// The output format caps invoke arguments, and silently truncating would
    /// miscompile, so this aborts the run instead.
    #[error("Method {method} would have {count} arguments, limit is {limit}")]
    ArgumentCountOverflow {
        /// The method whose rewritten signature overflowed
        method: MethodId,
        /// The argument count after rewriting
        count: usize,
        /// The maximum the output format supports
        limit: usize,
    },

    /// The IR graph is in an inconsistent state.
    ///
    /// This indicates a bug in a transformation rather than bad input: a block
    /// index out of range, a phi with the wrong operand count, a use of an
    /// undefined value, and similar structural violations.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the inconsistency
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Invalid IR - {file}:{line}: {message}")]
    InvalidIr {
        /// The message to be printed for the InvalidIr error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A reference id was not produced by this program's intern table.
    ///
    /// Reference identity is intern-table identity; an id from another table
    /// (or a stale id) has no meaning here.
    #[error("Unknown reference - {0}")]
    UnknownReference(u32),
}
