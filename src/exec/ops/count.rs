//! Row counting.
//!
//! Count never goes through the intermediate-null path: a group with no
//! rows reports 0, so finalize only publishes the accumulated value.

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx};

use super::{check_merge_input, Aggregator};

#[derive(Debug, Default)]
pub struct CountOp {
    count: i64,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(CountOp::default())
}

impl CountOp {
    fn merge(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        for i in 0..input.size {
            self.count += i64::from_le_bytes(input.col.cell(i)[..8].try_into().unwrap());
        }
        self.publish(ctx);
        ctx.set_val(input.size, 1);
    }

    fn publish(&self, ctx: &mut EvalCtx) {
        ctx.out
            .cur_mut()
            .copy_from_slice(&self.count.to_le_bytes());
    }
}

impl Aggregator for CountOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.count = 0;
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let num = if input.loaded {
            if input.has_null {
                (0..input.size).filter(|&i| !input.col.is_null(i)).count()
            } else {
                input.size
            }
        } else if input.pre_agg.is_set {
            input.size - input.pre_agg.num_null
        } else {
            // Missing statistics imply a null-free block.
            debug_assert!(!input.has_null);
            input.size
        };

        if num > 0 {
            ctx.res.has_result = true;
        }
        self.count += num as i64;
        self.publish(ctx);
        ctx.set_val(num, 1);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        self.count += 1;
        ctx.res.has_result = true;
        self.publish(ctx);
        ctx.set_val(1, 1);
    }

    // Missing data counts as 0, never as null.
    fn finalize(&mut self, ctx: &mut EvalCtx) {
        self.publish(ctx);
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, primary_ts_col: bool) -> BlockLoad {
        if primary_ts_col {
            BlockLoad::None
        } else {
            BlockLoad::FieldsOnly
        }
    }
}
