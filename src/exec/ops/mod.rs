//! The aggregation, selection and projection operators.
//!
//! Every operator implements [`Aggregator`]: a typed state struct plus the
//! seven evaluation hooks and the data-requirement estimator. Operators
//! are constructed through the registry in [`crate::exec::table`], which
//! fixes the stable operator numbering and the intermediate buffer sizes.

pub mod apercentile;
pub mod arith;
pub mod avg;
pub mod count;
pub mod diff;
pub mod firstlast;
pub mod interp;
pub mod leastsquares;
pub mod minmax;
pub mod percentile;
pub mod project;
pub mod spread;
pub mod stddev;
pub mod sum;
pub mod topbot;
pub mod tscomp;
pub mod twa;

use tracing::trace;

use super::{BlockInput, BlockLoad, EvalCtx};

/// Evaluation hooks of one operator instance.
///
/// An instance holds the state of a single (group, column) cell and lives
/// from setup to finalize. Hooks are non-blocking; the caller guarantees
/// stage ordering (scans, then first merges, then second merges).
pub trait Aggregator: Send {
    /// Initializes the result cell. Returns false when the cell was
    /// already initialized (state is kept for another pass over the same
    /// data).
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        true
    }

    /// Consumes all rows of the block.
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>);

    /// Consumes the single row at `row`.
    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize);

    /// Advances a multi-pass operator; single-pass operators simply mark
    /// the cell complete.
    fn next_stage(&mut self, ctx: &mut EvalCtx) {
        ctx.res.complete = true;
    }

    /// Emits the user-visible value; the default writes the null sentinel
    /// when no result was produced.
    fn finalize(&mut self, ctx: &mut EvalCtx) {
        finish_common(ctx);
    }

    /// Consumes primary-scan snapshots produced at one node.
    fn merge_first(&mut self, _ctx: &mut EvalCtx, _input: &BlockInput<'_>) {}

    /// Consumes per-node snapshots at the coordinator.
    fn merge_second(&mut self, _ctx: &mut EvalCtx, _input: &BlockInput<'_>) {}

    /// Tells the storage layer how much of a block this operator needs,
    /// given the block's timestamp range.
    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::All
    }
}

/// Shared finalize tail: null out the cell when nothing was aggregated,
/// then release it for re-initialization.
pub(crate) fn finish_common(ctx: &mut EvalCtx) {
    if !ctx.res.has_result {
        trace!("no result generated, output set to null");
        ctx.out.write_null();
    }
    ctx.res.reset();
}

/// Merge-stage sanity check: a second merge only ever sees the binary
/// intermediate form.
pub(crate) fn check_merge_input(ctx: &EvalCtx, input: &BlockInput<'_>) {
    if ctx.stage == super::Stage::SecondMerge {
        debug_assert!(
            matches!(input.col.ty, crate::types::ScalarType::Binary(_)),
            "second merge requires binary intermediate input"
        );
    }
}

/// Pass-through merge used by timestamp/tag/projection operators: the
/// first input cell is copied into the output cell.
pub(crate) fn copy_merge(ctx: &mut EvalCtx, input: &BlockInput<'_>) {
    if input.size == 0 {
        return;
    }
    let cell = input.col.cell(0);
    let n = cell.len().min(ctx.out.bytes);
    ctx.out.cur_mut()[..n].copy_from_slice(&cell[..n]);
    ctx.set_val(input.size, 1);
}
