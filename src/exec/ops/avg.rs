//! Arithmetic mean.
//!
//! Keeps `{running sum, running count}`; the division happens in finalize
//! because no earlier stage knows the total number of points. The 16-byte
//! `[f64 sum][i64 count]` record is also the super-table snapshot.

use crate::block::AggSum;
use crate::exec::table::{OpInit, AVG_INTER_BYTES};
use crate::exec::{BlockInput, BlockLoad, EvalCtx};

use super::{check_merge_input, Aggregator};

#[derive(Debug, Default)]
pub struct AvgOp {
    pub(crate) sum: f64,
    pub(crate) num: i64,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(AvgOp::default())
}

pub(crate) fn encode(sum: f64, num: i64, out: &mut [u8]) {
    debug_assert!(out.len() >= AVG_INTER_BYTES);
    out[..8].copy_from_slice(&sum.to_le_bytes());
    out[8..16].copy_from_slice(&num.to_le_bytes());
}

pub(crate) fn decode(cell: &[u8]) -> (f64, i64) {
    let sum = f64::from_le_bytes(cell[..8].try_into().unwrap());
    let num = i64::from_le_bytes(cell[8..16].try_into().unwrap());
    (sum, num)
}

impl AvgOp {
    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            encode(self.sum, self.num, ctx.out.cur_mut());
        }
    }

    pub(crate) fn accumulate_block(&mut self, input: &BlockInput<'_>) -> usize {
        let mut not_null = 0;
        if !input.loaded && input.pre_agg.is_set {
            not_null = input.size - input.pre_agg.num_null;
            match input.pre_agg.sum {
                AggSum::Int(v) => self.sum += v as f64,
                AggSum::Float(v) => self.sum += v,
            }
        } else {
            for i in 0..input.size {
                if input.has_null && input.col.is_null(i) {
                    continue;
                }
                not_null += 1;
                self.sum += input.col.get_f64(i);
            }
        }
        self.num += not_null as i64;
        not_null
    }
}

impl Aggregator for AvgOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.sum = 0.0;
        self.num = 0;
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let not_null = self.accumulate_block(input);
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
        self.sum += input.col.get_f64(row);
        self.num += 1;
        ctx.set_val(1, 1);
        ctx.res.has_result = true;
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if self.num == 0 {
            ctx.out.write_null();
        } else {
            let v = self.sum / self.num as f64;
            let ty = ctx.out.ty;
            ty.write_f64(ctx.out.cur_mut(), v);
            ctx.res.num_of_res = 1;
        }
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        for i in 0..input.size {
            let (sum, num) = decode(input.col.cell(i));
            if num == 0 {
                continue;
            }
            self.sum += sum;
            self.num += num;
        }
        if self.num > 0 {
            ctx.res.has_result = true;
            self.snapshot(ctx);
        }
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge_first(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::FieldsOnly
    }
}
