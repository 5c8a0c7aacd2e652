//! Spread: max - min over all non-null values.
//!
//! The intermediate keeps both extrema as doubles regardless of the input
//! type. The second merge folds into `params[0]` (running min) and
//! `params[3]` (running max) so finalize can subtract without touching
//! operator state.

use crate::exec::table::{OpInit, SPREAD_INTER_BYTES};
use crate::exec::{BlockInput, BlockLoad, EvalCtx, Param, Stage};

use super::{check_merge_input, Aggregator};

#[derive(Debug)]
pub struct SpreadOp {
    min: f64,
    max: f64,
    has: bool,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(SpreadOp { min: f64::MAX, max: f64::MIN, has: false })
}

fn encode(min: f64, max: f64, has: bool, out: &mut [u8]) {
    debug_assert!(out.len() >= SPREAD_INTER_BYTES);
    out[..8].copy_from_slice(&min.to_le_bytes());
    out[8..16].copy_from_slice(&max.to_le_bytes());
    out[16] = has as u8;
}

fn decode(cell: &[u8]) -> (f64, f64, bool) {
    let min = f64::from_le_bytes(cell[..8].try_into().unwrap());
    let max = f64::from_le_bytes(cell[8..16].try_into().unwrap());
    (min, max, cell[16] != 0)
}

impl SpreadOp {
    fn fold(&mut self, v: f64) {
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            encode(self.min, self.max, self.has, ctx.out.cur_mut());
        }
    }
}

impl Aggregator for SpreadOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        if ctx.stage == Stage::SecondMerge {
            ctx.params[0] = Param::F64(f64::MAX);
            ctx.params[3] = Param::F64(f64::MIN);
        } else {
            self.min = f64::MAX;
            self.max = f64::MIN;
            self.has = false;
        }
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let mut not_null;

        if !input.loaded && input.pre_agg.is_set {
            not_null = input.size - input.pre_agg.num_null;
            if not_null > 0 {
                self.fold(input.pre_agg.min.as_f64());
                self.fold(input.pre_agg.max.as_f64());
            }
        } else {
            not_null = 0;
            for i in 0..input.size {
                if input.has_null && input.col.is_null(i) {
                    continue;
                }
                not_null += 1;
                self.fold(input.col.get_f64(i));
            }
        }

        ctx.set_val(not_null, 1);
        if not_null > 0 {
            self.has = true;
            ctx.res.has_result = true;
        }
        self.snapshot(ctx);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        self.fold(input.col.get_f64(row));
        self.has = true;
        ctx.res.has_result = true;
        ctx.set_val(1, 1);
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        let spread = if ctx.stage == Stage::SecondMerge {
            if !ctx.res.has_result {
                None
            } else {
                Some(ctx.params[3].f64() - ctx.params[0].f64())
            }
        } else if self.has {
            Some(self.max - self.min)
        } else {
            None
        };

        match spread {
            Some(v) => {
                let ty = ctx.out.ty;
                ty.write_f64(ctx.out.cur_mut(), v);
                ctx.res.num_of_res = 1;
            }
            None => ctx.out.write_null(),
        }
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        let mut not_null = 0;
        for i in 0..input.size {
            let (min, max, has) = decode(input.col.cell(i));
            if !has {
                continue;
            }
            not_null += 1;
            self.fold(min);
            self.fold(max);
            self.has = true;
        }
        if not_null > 0 {
            ctx.res.has_result = true;
            self.snapshot(ctx);
        }
        ctx.set_val(not_null, 1);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        for i in 0..input.size {
            let (min, max, has) = decode(input.col.cell(i));
            if !has {
                continue;
            }
            if ctx.params[0].f64() > min {
                ctx.params[0] = Param::F64(min);
            }
            if ctx.params[3].f64() < max {
                ctx.params[3] = Param::F64(max);
            }
            ctx.res.has_result = true;
        }
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, primary_ts_col: bool) -> BlockLoad {
        if primary_ts_col {
            BlockLoad::None
        } else {
            BlockLoad::FieldsOnly
        }
    }
}
