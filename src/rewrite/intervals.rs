//! Partitioning of the unapplied chain suffix into rewrite intervals.

use std::sync::Arc;

use crate::{
    lens::{InstructionRewriteHook, LensChain, LensId},
    Result,
};

/// One contiguous chain segment the rewriter applies in a single sweep.
///
/// Lookups for the segment run across `(stop, head]`. A hook interval
/// covers exactly one record, so the hook observes the references of its
/// own defining snapshot and nothing newer.
#[derive(Clone)]
pub struct RewriteInterval {
    /// Exclusive lower bound of the segment.
    pub stop: LensId,
    /// Inclusive upper bound of the segment.
    pub head: LensId,
    /// The isolated record's hook, when this is a hook interval.
    pub hook: Option<Arc<dyn InstructionRewriteHook>>,
}

impl std::fmt::Debug for RewriteInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteInterval")
            .field("stop", &self.stop)
            .field("head", &self.head)
            .field("hook", &self.hook.as_ref().map(|h| h.name()))
            .finish()
    }
}

/// Computes the intervals between `code_lens` and the chain head,
/// oldest-first. Consecutive default records coalesce into one interval;
/// every hook record stands alone.
///
/// # Errors
///
/// Returns [`crate::Error::UnknownLens`] when `code_lens` is not on the
/// chain and [`crate::Error::LensCycle`] when the chain is corrupted.
pub fn unapplied_intervals(
    chain: &LensChain,
    code_lens: LensId,
) -> Result<Vec<RewriteInterval>> {
    let mut intervals = Vec::new();
    let mut stop = code_lens;
    let mut open: Option<LensId> = None;
    for (id, record) in chain.records_since(code_lens)? {
        if let Some(hook) = &record.hook {
            if let Some(head) = open.take() {
                intervals.push(RewriteInterval {
                    stop,
                    head,
                    hook: None,
                });
                stop = head;
            }
            intervals.push(RewriteInterval {
                stop,
                head: id,
                hook: Some(Arc::clone(hook)),
            });
            stop = id;
        } else {
            open = Some(id);
        }
    }
    if let Some(head) = open {
        intervals.push(RewriteInterval {
            stop,
            head,
            hook: None,
        });
    }
    Ok(intervals)
}
