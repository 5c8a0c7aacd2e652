//! Time-weighted average.
//!
//! The running state is a piecewise-constant integral: each non-null row
//! closes the segment `last_value × (ts - last_key)`. The first non-null
//! value anchors `last_key` to the query's nominal start timestamp, and
//! finalize closes the tail segment against the end key from `params[2]`.
//! `params[1]` carries the start key for the intermediate record.
//!
//! Intermediate layout (42 bytes): `[skey][ekey][last-key][last-value]
//! [running-sum][1B family][1B has-result]`, integer family accumulating
//! exactly in i64.

use crate::exec::table::{OpInit, TWA_INTER_BYTES};
use crate::exec::{BlockInput, BlockLoad, EvalCtx, Stage};

use super::{check_merge_input, Aggregator};

#[derive(Debug, Clone, Copy)]
struct TwaState {
    skey: i64,
    ekey: i64,
    last_key: i64,
    last_val_i: i64,
    last_val_f: f64,
    sum_i: i64,
    sum_f: f64,
    is_float: bool,
    has: bool,
}

impl TwaState {
    fn new(is_float: bool) -> Self {
        Self {
            skey: 0,
            ekey: 0,
            last_key: i64::MIN,
            last_val_i: 0,
            last_val_f: 0.0,
            sum_i: 0,
            sum_f: 0.0,
            is_float,
            has: false,
        }
    }

    fn close_segment(&mut self, until: i64) {
        if self.is_float {
            self.sum_f += self.last_val_f * (until - self.last_key) as f64;
        } else {
            self.sum_i += self.last_val_i * (until - self.last_key);
        }
    }

    fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= TWA_INTER_BYTES);
        out[..8].copy_from_slice(&self.skey.to_le_bytes());
        out[8..16].copy_from_slice(&self.ekey.to_le_bytes());
        out[16..24].copy_from_slice(&self.last_key.to_le_bytes());
        if self.is_float {
            out[24..32].copy_from_slice(&self.last_val_f.to_le_bytes());
            out[32..40].copy_from_slice(&self.sum_f.to_le_bytes());
        } else {
            out[24..32].copy_from_slice(&self.last_val_i.to_le_bytes());
            out[32..40].copy_from_slice(&self.sum_i.to_le_bytes());
        }
        out[40] = self.is_float as u8;
        out[41] = self.has as u8;
    }

    fn decode(cell: &[u8]) -> Self {
        let is_float = cell[40] != 0;
        let mut state = TwaState::new(is_float);
        state.skey = i64::from_le_bytes(cell[..8].try_into().unwrap());
        state.ekey = i64::from_le_bytes(cell[8..16].try_into().unwrap());
        state.last_key = i64::from_le_bytes(cell[16..24].try_into().unwrap());
        if is_float {
            state.last_val_f = f64::from_le_bytes(cell[24..32].try_into().unwrap());
            state.sum_f = f64::from_le_bytes(cell[32..40].try_into().unwrap());
        } else {
            state.last_val_i = i64::from_le_bytes(cell[24..32].try_into().unwrap());
            state.sum_i = i64::from_le_bytes(cell[32..40].try_into().unwrap());
        }
        state.has = cell[41] != 0;
        state
    }
}

#[derive(Debug)]
pub struct TwaOp {
    state: TwaState,
}

pub fn make(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TwaOp { state: TwaState::new(init.data_ty.is_float()) })
}

impl TwaOp {
    fn consume(&mut self, ctx: &mut EvalCtx, v_i: i64, v_f: f64, ts: i64) {
        if self.state.last_key == i64::MIN {
            self.state.last_key = ctx.start_ts;
            self.state.last_val_i = v_i;
            self.state.last_val_f = v_f;
            self.state.has = true;
        }
        self.state.close_segment(ts);
        self.state.last_key = ts;
        self.state.last_val_i = v_i;
        self.state.last_val_f = v_f;
    }

    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            self.state.encode(ctx.out.cur_mut());
        }
    }
}

impl Aggregator for TwaOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        let is_float = self.state.is_float;
        self.state = TwaState::new(is_float);
        self.state.skey = ctx.params[1].i64();
        self.state.ekey = ctx.params[2].i64();
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        debug_assert!(input.loaded, "twa requires loaded blocks");

        let mut not_null = 0;
        for i in 0..input.size {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            not_null += 1;
            self.consume(ctx, input.col.get_i64(i), input.col.get_f64(i), input.ts_list[i]);
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
        self.consume(ctx, input.col.get_i64(row), input.col.get_f64(row), input.ts_list[row]);
        ctx.set_val(1, 1);
        ctx.res.has_result = true;
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if !self.state.has {
            ctx.out.write_null();
            ctx.res.reset();
            return;
        }

        let v = if self.state.skey == self.state.ekey {
            0.0
        } else {
            self.state.close_segment(self.state.ekey);
            self.state.last_key = self.state.ekey;
            let total = if self.state.is_float { self.state.sum_f } else { self.state.sum_i as f64 };
            total / (self.state.ekey - self.state.skey) as f64
        };

        let ty = ctx.out.ty;
        ty.write_f64(ctx.out.cur_mut(), v);
        ctx.res.num_of_res = 1;
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        let mut not_null = 0;
        for i in 0..input.size {
            let partial = TwaState::decode(input.col.cell(i));
            if !partial.has {
                continue;
            }
            not_null += 1;
            self.state.sum_i += partial.sum_i;
            self.state.sum_f += partial.sum_f;
            self.state.skey = partial.skey;
            self.state.ekey = partial.ekey;
            self.state.last_key = partial.last_key;
            self.state.last_val_i = partial.last_val_i;
            self.state.last_val_f = partial.last_val_f;
            self.state.is_float = partial.is_float;
            self.state.has = true;
        }
        ctx.set_val(not_null, 1);
        if not_null > 0 {
            ctx.res.has_result = true;
        }
        self.snapshot(ctx);
    }

    /// The coordinator side only copies the single per-table record in;
    /// time-weighted averaging never spans sibling tables.
    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        debug_assert_eq!(ctx.stage, Stage::SecondMerge);
        if input.size == 0 {
            return;
        }
        self.state = TwaState::decode(input.col.cell(0));
        ctx.res.has_result = self.state.has;
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

    fn scan(values: &[Option<i32>], ts: &[i64], start: i64, end: i64) -> EvalCtx {
        let col = ColumnData::from_i32s(values);
        let mut op = TwaOp { state: TwaState::new(false) };
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        ctx.params[1] = Param::I64(start);
        ctx.params[2] = Param::I64(end);
        ctx.start_ts = start;
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), ts));
        op.finalize(&mut ctx);
        ctx
    }

    #[test]
    fn test_twa_reference_scenario() {
        // start=0 end=10, rows (0,10) and (5,20): 10*5 + 20*5 over 10 -> 15.0
        let ctx = scan(&[Some(10), Some(20)], &[0, 5], 0, 10);
        assert_eq!(ctx.out.f64_at(0), 15.0);
    }

    #[test]
    fn test_twa_single_point() {
        // one value over the whole range is just that value
        let ctx = scan(&[Some(7)], &[0], 0, 100);
        assert_eq!(ctx.out.f64_at(0), 7.0);
    }

    #[test]
    fn test_twa_zero_span() {
        let ctx = scan(&[Some(3)], &[5], 5, 5);
        assert_eq!(ctx.out.f64_at(0), 0.0);
    }

    #[test]
    fn test_twa_no_data_is_null() {
        let ctx = scan(&[None, None], &[1, 2], 0, 10);
        assert!(ScalarType::Double.is_null(ctx.out.row(0)));
    }

    #[test]
    fn test_twa_intermediate_roundtrip() {
        let col = ColumnData::from_i32s(&[Some(10), Some(20)]);
        let mut op = TwaOp { state: TwaState::new(false) };
        let mut ctx = EvalCtx::new(ScalarType::Binary(TWA_INTER_BYTES), TWA_INTER_BYTES, 1);
        ctx.res.super_table = true;
        ctx.params[1] = Param::I64(0);
        ctx.params[2] = Param::I64(10);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[0, 5]));
        let snapshot = ctx.out.row(0).to_vec();

        let mut coord = TwaOp { state: TwaState::new(false) };
        let mut cctx = EvalCtx::new(ScalarType::Double, 8, 1);
        cctx.stage = Stage::SecondMerge;
        coord.setup(&mut cctx);
        coord.merge_second(&mut cctx, &BlockInput::intermediate(&snapshot, TWA_INTER_BYTES));
        coord.finalize(&mut cctx);
        assert_eq!(cctx.out.f64_at(0), 15.0);
    }
}
