//! Exact percentile over a scanned column.
//!
//! Every non-null value is inserted into the [`MemBucket`] collaborator;
//! finalize queries it with the ratio from `params[0]`. Scan-only and not
//! supported in super-table mode.

use crate::exec::membucket::MemBucket;
use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx};

use super::Aggregator;

#[derive(Debug, Default)]
pub struct PercentileOp {
    bucket: MemBucket,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(PercentileOp::default())
}

impl Aggregator for PercentileOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        debug_assert!(!ctx.res.super_table, "percentile does not support super-table queries");
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.bucket = MemBucket::new();
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let mut not_null = 0;
        for i in 0..input.size {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            not_null += 1;
            self.bucket.put(input.col.get_f64(i));
        }
        ctx.set_val(not_null, 1);
        ctx.res.has_result = true;
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        self.bucket.put(input.col.get_f64(row));
        ctx.set_val(1, 1);
        ctx.res.has_result = true;
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if self.bucket.is_empty() {
            ctx.out.write_null();
        } else {
            let ratio = ctx.params[0].f64();
            let v = self.bucket.percentile(ratio);
            let ty = ctx.out.ty;
            ty.write_f64(ctx.out.cur_mut(), v);
            ctx.res.num_of_res = 1;
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
    use crate::exec::Param;
    use crate::types::ScalarType;

    #[test]
    fn test_percentile_median() {
        let col = ColumnData::from_i32s(&[Some(9), None, Some(1), Some(5)]);
        let mut op = PercentileOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        ctx.params[0] = Param::F64(50.0);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.f64_at(0), 5.0);
    }

    #[test]
    fn test_percentile_all_null() {
        let col = ColumnData::from_i32s(&[None]);
        let mut op = PercentileOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        ctx.params[0] = Param::I64(90);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);
        assert!(ScalarType::Double.is_null(ctx.out.row(0)));
    }
}
