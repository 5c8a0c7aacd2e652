//! Standard deviation, computed in two scans of the same data.
//!
//! The first pass is the plain average; `next_stage` snapshots the mean
//! and switches to the variance pass, which accumulates Σ(xᵢ - mean)².
//! The two pass states are an explicit enum, not an overlaid buffer, so
//! the transition is checked instead of relying on field layout.
//!
//! Scan-only: stddev refuses super-table mode and has no merge hooks.

use tracing::debug;

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx};

use super::Aggregator;

#[derive(Debug, Clone, PartialEq)]
pub enum StddevState {
    /// First pass: the running average.
    Accum { sum: f64, num: i64 },
    /// Second pass: squared distances from the snapshotted mean.
    Variance { avg: f64, num: i64, sum_sq: f64 },
}

#[derive(Debug)]
pub struct StddevOp {
    pub(crate) state: StddevState,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(StddevOp { state: StddevState::Accum { sum: 0.0, num: 0 } })
}

impl Aggregator for StddevOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        debug_assert!(!ctx.res.super_table, "stddev does not support super-table queries");
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.state = StddevState::Accum { sum: 0.0, num: 0 };
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        match &mut self.state {
            StddevState::Accum { sum, num } => {
                let mut not_null = 0;
                for i in 0..input.size {
                    if input.has_null && input.col.is_null(i) {
                        continue;
                    }
                    not_null += 1;
                    *sum += input.col.get_f64(i);
                }
                *num += not_null;
                ctx.set_val(not_null as usize, 1);
                if not_null > 0 {
                    ctx.res.has_result = true;
                }
            }
            StddevState::Variance { avg, sum_sq, .. } => {
                for i in 0..input.size {
                    if input.has_null && input.col.is_null(i) {
                        continue;
                    }
                    let d = input.col.get_f64(i) - *avg;
                    *sum_sq += d * d;
                }
                ctx.set_val(1, 1);
            }
        }
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        match &mut self.state {
            StddevState::Accum { sum, num } => {
                *sum += input.col.get_f64(row);
                *num += 1;
                ctx.res.has_result = true;
            }
            StddevState::Variance { avg, sum_sq, .. } => {
                let d = input.col.get_f64(row) - *avg;
                *sum_sq += d * d;
            }
        }
        ctx.set_val(1, 1);
    }

    fn next_stage(&mut self, ctx: &mut EvalCtx) {
        match self.state {
            StddevState::Accum { sum, num } => {
                let avg = if num > 0 { sum / num as f64 } else { 0.0 };
                debug!(num, avg, "stddev advancing to variance pass");
                self.state = StddevState::Variance { avg, num, sum_sq: 0.0 };
            }
            StddevState::Variance { .. } => {
                // Both passes done; the scan driver stops here.
                ctx.res.complete = true;
            }
        }
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        match self.state {
            StddevState::Variance { num, sum_sq, .. } if num > 0 => {
                let v = (sum_sq / num as f64).sqrt();
                let ty = ctx.out.ty;
                ty.write_f64(ctx.out.cur_mut(), v);
                ctx.res.num_of_res = 1;
            }
            _ => ctx.out.write_null(),
        }
        ctx.res.reset();
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ColumnData;
    use crate::types::ScalarType;

    fn run_two_pass(values: &[Option<i32>]) -> EvalCtx {
        let col = ColumnData::from_i32s(values);
        let mut op = StddevOp { state: StddevState::Accum { sum: 0.0, num: 0 } };
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.next_stage(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.next_stage(&mut ctx);
        assert!(ctx.res.complete);
        op.finalize(&mut ctx);
        ctx
    }

    #[test]
    fn test_stddev_two_pass() {
        // values 1..5: mean 3, variance 2
        let ctx = run_two_pass(&[Some(1), Some(2), Some(3), Some(4), Some(5)]);
        assert!((ctx.out.f64_at(0) - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_stddev_with_nulls() {
        // non-null values 2 and 4: mean 3, variance 1
        let ctx = run_two_pass(&[Some(2), None, Some(4)]);
        assert_eq!(ctx.out.f64_at(0), 1.0);
    }

    #[test]
    fn test_stddev_no_data_is_null() {
        let ctx = run_two_pass(&[None, None]);
        assert!(ScalarType::Double.is_null(ctx.out.row(0)));
    }

    #[test]
    fn test_stage_transition_snapshots_mean() {
        let col = ColumnData::from_i32s(&[Some(10), Some(20)]);
        let mut op = StddevOp { state: StddevState::Accum { sum: 0.0, num: 0 } };
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.next_stage(&mut ctx);
        assert_eq!(op.state, StddevState::Variance { avg: 15.0, num: 2, sum_sq: 0.0 });
        assert!(!ctx.res.complete);
    }
}
