//! Approximate percentile over a bounded histogram.
//!
//! The primary scan inserts values (widened to double) into the
//! histogram; both merge stages merge encoded histograms, copying when the
//! target is still empty. Finalize queries the uniform approximation at
//! the ratio in `params[0]`.

use crate::exec::histogram::Histogram;
use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx};

use super::{check_merge_input, Aggregator};

#[derive(Debug, Default)]
pub struct ApercentileOp {
    hist: Histogram,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(ApercentileOp::default())
}

impl ApercentileOp {
    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            self.hist.encode(ctx.out.cur_mut());
        }
    }

    fn merge(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        for i in 0..input.size {
            let incoming = Histogram::decode(input.col.cell(i));
            if incoming.is_empty() {
                continue;
            }
            self.hist.merge(&incoming);
            ctx.res.has_result = true;
        }
        ctx.set_val(1, 1);
        self.snapshot(ctx);
    }
}

impl Aggregator for ApercentileOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.hist = Histogram::new();
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let mut not_null = 0;
        for i in 0..input.size {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            not_null += 1;
            self.hist.add(input.col.get_f64(i));
        }
        ctx.set_val(not_null, 1);
        if not_null > 0 {
            ctx.res.has_result = true;
        }
        self.snapshot(ctx);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        self.hist.add(input.col.get_f64(row));
        ctx.set_val(1, 1);
        ctx.res.has_result = true;
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if self.hist.is_empty() {
            ctx.out.write_null();
        } else {
            let v = self.hist.uniform(ctx.params[0].f64());
            let ty = ctx.out.ty;
            ty.write_f64(ctx.out.cur_mut(), v);
            ctx.res.num_of_res = 1;
        }
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ColumnData;
    use crate::exec::histogram::HISTOGRAM_BYTES;
    use crate::exec::{Param, Stage};
    use crate::types::ScalarType;

    #[test]
    fn test_apercentile_scan() {
        let col = ColumnData::from_i32s(&[Some(1), Some(2), Some(3), Some(4), None]);
        let mut op = ApercentileOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        ctx.params[0] = Param::F64(100.0);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.f64_at(0), 4.0);
    }

    #[test]
    fn test_apercentile_distributed() {
        let mut snapshots = Vec::new();
        for range in [0..50, 50..100] {
            let values: Vec<Option<i32>> = range.map(Some).collect();
            let col = ColumnData::from_i32s(&values);
            let mut op = ApercentileOp::default();
            let mut ctx = EvalCtx::new(ScalarType::Binary(HISTOGRAM_BYTES), HISTOGRAM_BYTES, 1);
            ctx.res.super_table = true;
            op.setup(&mut ctx);
            op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
            snapshots.extend_from_slice(ctx.out.row(0));
        }

        let mut op = ApercentileOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        ctx.stage = Stage::SecondMerge;
        ctx.params[0] = Param::F64(50.0);
        op.setup(&mut ctx);
        op.merge_second(&mut ctx, &BlockInput::intermediate(&snapshots, HISTOGRAM_BYTES));
        op.finalize(&mut ctx);
        let v = ctx.out.f64_at(0);
        assert!((v - 49.5).abs() < 2.0, "median {v}");
    }

    #[test]
    fn test_apercentile_empty_partials() {
        let snapshots = vec![0u8; HISTOGRAM_BYTES];
        let mut op = ApercentileOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        ctx.stage = Stage::FirstMerge;
        op.setup(&mut ctx);
        op.merge_first(&mut ctx, &BlockInput::intermediate(&snapshots, HISTOGRAM_BYTES));
        op.finalize(&mut ctx);
        assert!(ScalarType::Double.is_null(ctx.out.row(0)));
    }
}
