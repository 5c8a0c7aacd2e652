//! Summation.
//!
//! The integer family accumulates into a signed 64-bit value, the float
//! family into a double. Super-table scans publish the 9-byte
//! `[sum union][has-result]` snapshot after every block so the coordinator
//! can re-reduce.

use crate::block::AggSum;
use crate::exec::table::{OpInit, SUM_INTER_BYTES};
use crate::exec::{BlockInput, BlockLoad, EvalCtx};
use crate::types::ScalarType;

use super::{check_merge_input, finish_common, Aggregator};

#[derive(Debug)]
pub struct SumOp {
    acc: AggSum,
    int_family: bool,
}

pub fn make(init: &OpInit) -> Box<dyn Aggregator> {
    let int_family = init.data_ty.is_integer();
    Box::new(SumOp {
        acc: if int_family { AggSum::Int(0) } else { AggSum::Float(0.0) },
        int_family,
    })
}

fn encode(acc: &AggSum, has_result: bool, out: &mut [u8]) {
    debug_assert!(out.len() >= SUM_INTER_BYTES);
    match acc {
        AggSum::Int(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
        AggSum::Float(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
    }
    out[8] = has_result as u8;
}

impl SumOp {
    fn add_i64(&mut self, v: i64) {
        if let AggSum::Int(acc) = &mut self.acc {
            *acc = acc.wrapping_add(v);
        }
    }

    fn add_f64(&mut self, v: f64) {
        if let AggSum::Float(acc) = &mut self.acc {
            *acc += v;
        }
    }

    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            let acc = self.acc;
            let has = ctx.res.has_result;
            encode(&acc, has, ctx.out.cur_mut());
        }
    }

    fn merge(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);

        let mut not_null = 0;
        for i in 0..input.size {
            let cell = input.col.cell(i);
            if cell[8] == 0 {
                continue;
            }
            not_null += 1;
            if self.int_family {
                self.add_i64(i64::from_le_bytes(cell[..8].try_into().unwrap()));
            } else {
                self.add_f64(f64::from_le_bytes(cell[..8].try_into().unwrap()));
            }
        }

        if not_null > 0 {
            ctx.res.has_result = true;
        }
        ctx.set_val(not_null, 1);
        self.snapshot(ctx);
    }
}

impl Aggregator for SumOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let mut not_null = 0;

        if !input.loaded && input.pre_agg.is_set {
            not_null = input.size - input.pre_agg.num_null;
            match input.pre_agg.sum {
                AggSum::Int(v) if self.int_family => self.add_i64(v),
                AggSum::Int(v) => self.add_f64(v as f64),
                AggSum::Float(v) => self.add_f64(v),
            }
        } else {
            let col = &input.col;
            for i in 0..input.size {
                if input.has_null && col.is_null(i) {
                    continue;
                }
                not_null += 1;
                match col.ty {
                    t if t.is_integer() => self.add_i64(col.get_i64(i)),
                    ScalarType::Float | ScalarType::Double => self.add_f64(col.get_f64(i)),
                    // bool/string columns contribute nothing
                    _ => not_null -= 1,
                }
            }
        }

        ctx.set_val(not_null, 1);
        if not_null > 0 {
            ctx.res.has_result = true;
        }
        self.snapshot(ctx);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        let col = &input.col;
        if input.has_null && col.is_null(row) {
            return;
        }
        if self.int_family {
            self.add_i64(col.get_i64(row));
        } else if col.ty.is_float() {
            self.add_f64(col.get_f64(row));
        } else {
            return;
        }
        ctx.set_val(1, 1);
        ctx.res.has_result = true;
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if ctx.res.has_result {
            match self.acc {
                AggSum::Int(v) => {
                    let ty = ctx.out.ty;
                    ty.write_i64(ctx.out.cur_mut(), v);
                }
                AggSum::Float(v) => {
                    let ty = ctx.out.ty;
                    ty.write_f64(ctx.out.cur_mut(), v);
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ColumnData, PreAgg};
    use crate::exec::Stage;

    fn int_init() -> OpInit {
        OpInit { data_ty: ScalarType::Int, data_bytes: 4, param: 0, tag_len: 0, super_table: false }
    }

    #[test]
    fn test_sum_ints_with_nulls() {
        // nulls are skipped: 1 + 2 + 4 + 8 = 15
        let col = ColumnData::from_i32s(&[Some(1), Some(2), None, Some(4), None, Some(8)]);
        let mut op = make(&int_init());
        let mut ctx = EvalCtx::new(ScalarType::BigInt, 8, 1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        assert!(ctx.res.has_result);
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 15);
    }

    #[test]
    fn test_sum_all_null_outputs_null() {
        let col = ColumnData::from_i32s(&[None, None]);
        let mut op = make(&int_init());
        let mut ctx = EvalCtx::new(ScalarType::BigInt, 8, 1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);
        assert!(ScalarType::BigInt.is_null(ctx.out.row(0)));
    }

    #[test]
    fn test_sum_from_preagg() {
        let col = ColumnData::from_i32s(&[Some(10), None, Some(20)]);
        let pre = PreAgg::compute(&col.view());
        let empty = ColumnData::new(ScalarType::Int);
        let mut op = make(&int_init());
        let mut ctx = EvalCtx::new(ScalarType::BigInt, 8, 1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::stats_only(empty.view(), &[0, 1, 2], pre));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 30);
    }

    #[test]
    fn test_sum_supertable_snapshot_and_merge() {
        let mut st = int_init();
        st.super_table = true;

        // two "nodes" produce snapshots
        let mut snapshots = Vec::new();
        for values in [&[Some(1), Some(2)][..], &[Some(3), None][..]] {
            let col = ColumnData::from_i32s(values);
            let mut op = make(&st);
            let mut ctx = EvalCtx::new(ScalarType::Binary(9), 9, 1);
            ctx.res.super_table = true;
            op.setup(&mut ctx);
            op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
            snapshots.extend_from_slice(ctx.out.row(0));
        }

        let mut op = make(&int_init());
        let mut ctx = EvalCtx::new(ScalarType::BigInt, 8, 1);
        ctx.stage = Stage::SecondMerge;
        op.setup(&mut ctx);
        op.merge_second(&mut ctx, &BlockInput::intermediate(&snapshots, SUM_INTER_BYTES));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 6);
    }

    #[test]
    fn test_sum_merge_skips_unset_partials() {
        let mut data = vec![0u8; 18];
        data[..8].copy_from_slice(&7i64.to_le_bytes());
        data[8] = 1;
        // second partial has no data-set flag
        data[9..17].copy_from_slice(&100i64.to_le_bytes());

        let mut op = make(&int_init());
        let mut ctx = EvalCtx::new(ScalarType::BigInt, 8, 1);
        ctx.stage = Stage::FirstMerge;
        op.setup(&mut ctx);
        op.merge_first(&mut ctx, &BlockInput::intermediate(&data, SUM_INTER_BYTES));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 7);
    }

    #[test]
    fn test_sum_float_family() {
        let col = ColumnData::from_f32s(&[Some(1.5), Some(2.5), None]);
        let init = OpInit {
            data_ty: ScalarType::Float,
            data_bytes: 4,
            param: 0,
            tag_len: 0,
            super_table: false,
        };
        let mut op = make(&init);
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.f64_at(0), 4.0);
    }
}
