//! Minimum / maximum selection.
//!
//! The running extremum starts from a typed sentinel and is only replaced
//! on a strict comparison, so the first occurrence wins ties. Every
//! improvement also drives the tag contexts with the winning row's
//! timestamp, which is how tag columns travel with the selected row.

use crate::block::PreAgg;
use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx};
use crate::types::{Datum, ScalarType};

use super::{check_merge_input, finish_common, Aggregator};

#[derive(Debug)]
pub struct MinMaxOp {
    is_min: bool,
    data_ty: ScalarType,
    data_bytes: usize,
    cur: Datum,
    has: bool,
}

pub fn make_min(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(MinMaxOp::new(true, init))
}

pub fn make_max(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(MinMaxOp::new(false, init))
}

/// Typed seed for the running extremum.
///
/// Floats seed at the infinities so no finite value can ever tie the
/// strict comparison; the reference implementation seeded max with the
/// smallest positive normal, which dropped all-negative columns.
fn seed(is_min: bool, ty: ScalarType) -> Datum {
    match ty {
        ScalarType::TinyInt => Datum::Int(if is_min { i8::MAX as i64 } else { i8::MIN as i64 }),
        ScalarType::SmallInt => Datum::Int(if is_min { i16::MAX as i64 } else { i16::MIN as i64 }),
        ScalarType::Int => Datum::Int(if is_min { i32::MAX as i64 } else { i32::MIN as i64 }),
        ScalarType::BigInt | ScalarType::Timestamp => {
            Datum::Int(if is_min { i64::MAX } else { i64::MIN })
        }
        ScalarType::Float | ScalarType::Double => {
            Datum::Double(if is_min { f64::INFINITY } else { f64::NEG_INFINITY })
        }
        other => {
            tracing::error!("illegal data type {other:?} in min/max query");
            Datum::Null
        }
    }
}

impl MinMaxOp {
    fn new(is_min: bool, init: &OpInit) -> Self {
        Self {
            is_min,
            data_ty: init.data_ty,
            data_bytes: init.data_bytes,
            cur: seed(is_min, init.data_ty),
            has: false,
        }
    }

    /// Strict improvement test; equal values never replace the holder.
    fn improves(&self, candidate: &Datum) -> bool {
        match (&self.cur, candidate) {
            (Datum::Int(cur), Datum::Int(v)) => {
                if self.is_min {
                    v < cur
                } else {
                    v > cur
                }
            }
            (Datum::Double(cur), Datum::Double(v)) => {
                if self.is_min {
                    v < cur
                } else {
                    v > cur
                }
            }
            (Datum::Double(cur), Datum::Int(v)) => {
                let v = *v as f64;
                if self.is_min {
                    v < *cur
                } else {
                    v > *cur
                }
            }
            _ => false,
        }
    }

    fn candidate(&self, col: &crate::block::ColumnView<'_>, i: usize) -> Datum {
        if self.data_ty.is_float() {
            Datum::Double(col.get_f64(i))
        } else {
            Datum::Int(col.get_i64(i))
        }
    }

    fn update(&mut self, ctx: &mut EvalCtx, candidate: Datum, ts: Option<i64>) -> bool {
        if !self.improves(&candidate) {
            return false;
        }
        self.cur = candidate;
        ctx.update_tags(ts);
        true
    }

    fn step_preagg(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, pre: &PreAgg) -> usize {
        let not_null = input.size - pre.num_null;
        if not_null == 0 {
            return 0;
        }
        let (value, index) = if self.is_min {
            (pre.min.clone(), pre.min_index)
        } else {
            (pre.max.clone(), pre.max_index)
        };
        let ts = input.ts_list.get(index).copied();
        self.update(ctx, value, ts);
        not_null
    }

    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            let bytes = self.data_bytes;
            let cur = self.cur.clone();
            let has = self.has;
            let ty = self.data_ty;
            let out = ctx.out.cur_mut();
            ty.write_datum(&mut out[..bytes], &cur);
            out[bytes] = has as u8;
        }
    }

    fn merge(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);

        let mut updated = 0;
        for i in 0..input.size {
            let cell = input.col.cell(i);
            if cell[self.data_bytes] == 0 {
                continue;
            }
            let value = if self.data_ty.is_float() {
                Datum::Double(self.data_ty.read_f64(&cell[..self.data_bytes]))
            } else {
                Datum::Int(self.data_ty.read_i64(&cell[..self.data_bytes]))
            };
            if self.update(ctx, value, None) {
                updated += 1;
            }
            self.has = true;
        }

        ctx.set_val(updated, 1);
        if updated > 0 {
            ctx.res.has_result = true;
        }
        self.snapshot(ctx);
    }
}

impl Aggregator for MinMaxOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.cur = seed(self.is_min, self.data_ty);
        self.has = false;
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let not_null = if !input.loaded && input.pre_agg.is_set {
            let pre = input.pre_agg.clone();
            self.step_preagg(ctx, input, &pre)
        } else {
            let mut n = 0;
            for i in 0..input.size {
                if input.has_null && input.col.is_null(i) {
                    continue;
                }
                n += 1;
                let candidate = self.candidate(&input.col, i);
                let ts = input.ts_list.get(i).copied();
                self.update(ctx, candidate, ts);
            }
            n
        };

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
        let candidate = self.candidate(&input.col, row);
        let ts = input.ts_list.get(row).copied();
        self.update(ctx, candidate, ts);
        self.has = true;
        ctx.res.has_result = true;
        ctx.set_val(1, 1);
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if ctx.res.has_result {
            let cur = self.cur.clone();
            let ty = ctx.out.ty;
            ty.write_datum(ctx.out.cur_mut(), &cur);
        }
        finish_common(ctx);
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::FieldsOnly
    }
}
