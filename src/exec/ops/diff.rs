//! Per-row difference against the previous non-null value.
//!
//! The first non-null value of the query only seeds `params[1]` (the
//! typed "previous value" scratch, `Param::None` until assigned); every
//! later non-null row emits `current - previous` in the input type and
//! mirrors the row timestamp to the parallel timestamp output. Scan order
//! decides both the iteration direction and the output cursor step.
//!
//! Scan-only: diff has no distributed variant.

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx, Order, Param};

use super::Aggregator;

#[derive(Debug)]
pub struct DiffOp {
    int_family: bool,
}

pub fn make(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(DiffOp { int_family: !init.data_ty.is_float() })
}

impl DiffOp {
    fn emit(&self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize, step: isize) -> bool {
        let prev = ctx.params[1];
        let col = &input.col;

        match prev {
            Param::None => {
                ctx.params[1] = if self.int_family {
                    Param::I64(col.get_i64(row))
                } else {
                    Param::F64(col.get_f64(row))
                };
                false
            }
            _ => {
                let pos = ctx.out.pos;
                if self.int_family {
                    let cur = col.get_i64(row);
                    let ty = ctx.out.ty;
                    ty.write_i64(ctx.out.row_mut(pos), cur.wrapping_sub(prev.i64()));
                    ctx.params[1] = Param::I64(cur);
                } else {
                    let cur = col.get_f64(row);
                    let ty = ctx.out.ty;
                    ty.write_f64(ctx.out.row_mut(pos), cur - prev.f64());
                    ctx.params[1] = Param::F64(cur);
                }
                if let Some(pts) = ctx.pts_out.as_mut() {
                    pts.set(pos, input.ts_list[row]);
                }
                ctx.out.pos += step;
                true
            }
        }
    }
}

impl Aggregator for DiffOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        ctx.params[1] = Param::None;
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let step = ctx.order.step();
        let rows: Box<dyn Iterator<Item = usize>> = if ctx.order == Order::Asc {
            Box::new(0..input.size)
        } else {
            Box::new((0..input.size).rev())
        };

        let mut emitted = 0;
        for i in rows {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            if self.emit(ctx, input, i, step) {
                emitted += 1;
            }
        }

        if emitted > 0 {
            ctx.res.num_of_res += emitted;
            ctx.res.has_result = true;
        }
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        if self.emit(ctx, input, row, ctx.order.step()) {
            ctx.res.num_of_res += 1;
            ctx.res.has_result = true;
        }
    }

    // Multi-output pass-through: the emitted rows are already final.
    fn finalize(&mut self, ctx: &mut EvalCtx) {
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

    fn init() -> OpInit {
        OpInit { data_ty: ScalarType::Int, data_bytes: 4, param: 0, tag_len: 0, super_table: false }
    }

    #[test]
    fn test_diff_with_leading_nulls() {
        // [null, 5, 7, null, 10] emits [2, 3] with the
        // timestamps of the rows that produced them
        let col = ColumnData::from_i32s(&[None, Some(5), Some(7), None, Some(10)]);
        let ts = [10i64, 20, 30, 40, 50];
        let mut op = DiffOp { int_family: true };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 5).with_ts_output(5);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &ts));
        op.finalize(&mut ctx);

        assert_eq!(ctx.out.i64_at(0), 2);
        assert_eq!(ctx.out.i64_at(1), 3);
        let pts = ctx.pts_out.as_ref().unwrap();
        assert_eq!(&pts.buf[..2], &[30, 50]);
    }

    #[test]
    fn test_diff_carries_prev_across_blocks() {
        let a = ColumnData::from_i32s(&[Some(1), Some(4)]);
        let b = ColumnData::from_i32s(&[Some(9)]);
        let mut op = DiffOp { int_family: true };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 4).with_ts_output(4);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(a.view(), &[1, 2]));
        op.step_block(&mut ctx, &BlockInput::loaded(b.view(), &[3]));

        assert_eq!(ctx.res.num_of_res, 2);
        assert_eq!(ctx.out.i64_at(0), 3);
        assert_eq!(ctx.out.i64_at(1), 5);
    }

    #[test]
    fn test_diff_desc_scan() {
        let col = ColumnData::from_i32s(&[Some(10), Some(7), Some(1)]);
        let ts = [100i64, 200, 300];
        let mut op = DiffOp { int_family: true };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 3).with_ts_output(3);
        ctx.order = Order::Desc;
        ctx.out.pos = 2;
        if let Some(pts) = ctx.pts_out.as_mut() {
            pts.pos = 2;
        }
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &ts));

        // scanned 1, 7, 10: emits 6 then 3, written backwards
        assert_eq!(ctx.res.num_of_res, 2);
        assert_eq!(ctx.out.i64_at(2), 6);
        assert_eq!(ctx.out.i64_at(1), 3);
        let pts = ctx.pts_out.as_ref().unwrap();
        assert_eq!(pts.buf[2], 200);
        assert_eq!(pts.buf[1], 100);
    }

    #[test]
    fn test_diff_float_preserves_type() {
        let col = ColumnData::from_f32s(&[Some(1.5), Some(4.0)]);
        let init = OpInit { data_ty: ScalarType::Float, ..init() };
        let mut op = DiffOp { int_family: !init.data_ty.is_float() };
        let mut ctx = EvalCtx::new(ScalarType::Float, 4, 2).with_ts_output(2);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[1, 2]));
        assert_eq!(ctx.out.f64_at(0), 2.5);
    }

    #[test]
    fn test_diff_all_null_emits_nothing() {
        let col = ColumnData::from_i32s(&[None, None]);
        let mut op = DiffOp { int_family: true };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 2).with_ts_output(2);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[1, 2]));
        assert_eq!(ctx.res.num_of_res, 0);
        assert_eq!(ctx.params[1], Param::None);
    }
}
