//! Point interpolation at a user-specified timestamp.
//!
//! Produces exactly one row. `params[3]` selects the mode; `params[1]`
//! and `params[2]` carry the anchor (timestamp, value) pairs for the
//! prev/linear modes, and the query's nominal start timestamp is the
//! interpolation target.

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx, Param};

use super::Aggregator;

/// Interpolation mode encoded in `params[3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpMode {
    None = 0,
    /// The row exists at the requested timestamp; pass it through.
    Direct = 1,
    /// Repeat the previous known value.
    Prev = 2,
    /// Linear interpolation between the two anchors.
    Linear = 3,
    /// Emit the caller-provided constant.
    SetValue = 4,
    /// Emit the null sentinel.
    Null = 5,
}

impl InterpMode {
    pub fn from_param(p: &Param) -> Self {
        match p.i64() {
            1 => InterpMode::Direct,
            2 => InterpMode::Prev,
            3 => InterpMode::Linear,
            4 => InterpMode::SetValue,
            5 => InterpMode::Null,
            _ => InterpMode::None,
        }
    }
}

#[derive(Debug, Default)]
pub struct InterpOp;

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(InterpOp)
}

impl Aggregator for InterpOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let mode = InterpMode::from_param(&ctx.params[3]);

        match mode {
            InterpMode::None => {
                ctx.res.reset();
                return;
            }
            InterpMode::Direct => {
                if input.size > 0 {
                    let cell = input.col.cell(0);
                    let n = cell.len().min(ctx.out.bytes);
                    ctx.out.cur_mut()[..n].copy_from_slice(&cell[..n]);
                }
            }
            InterpMode::Null => ctx.out.write_null(),
            InterpMode::SetValue => {
                let v = ctx.params[1].f64();
                let ty = ctx.out.ty;
                ty.write_f64(ctx.out.cur_mut(), v);
            }
            InterpMode::Prev => {
                let v = ctx.params[1].f64();
                let ty = ctx.out.ty;
                if ty.is_numeric() {
                    ty.write_f64(ctx.out.cur_mut(), v);
                } else {
                    ctx.out.write_null();
                }
            }
            InterpMode::Linear => {
                let (k1, v1) = match ctx.params[1] {
                    Param::Anchor(ts, v) => (ts, v),
                    other => (other.i64(), other.f64()),
                };
                let (k2, v2) = match ctx.params[2] {
                    Param::Anchor(ts, v) => (ts, v),
                    other => (other.i64(), other.f64()),
                };
                let ty = ctx.out.ty;
                if !ty.is_numeric() || k1 == k2 {
                    ctx.out.write_null();
                } else {
                    let t = ctx.start_ts;
                    let v = v1 + (v2 - v1) * (t - k1) as f64 / (k2 - k1) as f64;
                    ty.write_f64(ctx.out.cur_mut(), v);
                }
            }
        }

        ctx.res.has_result = true;
        ctx.set_val(1, 1);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, _row: usize) {
        self.step_block(ctx, input);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ColumnData;
    use crate::types::ScalarType;

    fn ctx_with_mode(mode: i64) -> EvalCtx {
        let mut ctx = EvalCtx::new(ScalarType::Double, 8, 1);
        ctx.params[3] = Param::I64(mode);
        ctx
    }

    #[test]
    fn test_interp_direct() {
        let col = ColumnData::from_f64s(&[Some(4.25)]);
        let mut op = InterpOp;
        let mut ctx = ctx_with_mode(1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[100]));
        assert_eq!(ctx.out.f64_at(0), 4.25);
        assert_eq!(ctx.res.num_of_res, 1);
    }

    #[test]
    fn test_interp_linear_midpoint() {
        let empty = ColumnData::new(ScalarType::Double);
        let mut op = InterpOp;
        let mut ctx = ctx_with_mode(3);
        ctx.start_ts = 15;
        ctx.params[1] = Param::Anchor(10, 1.0);
        ctx.params[2] = Param::Anchor(20, 3.0);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(empty.view(), &[]));
        assert_eq!(ctx.out.f64_at(0), 2.0);
    }

    #[test]
    fn test_interp_null_mode() {
        let empty = ColumnData::new(ScalarType::Double);
        let mut op = InterpOp;
        let mut ctx = ctx_with_mode(5);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(empty.view(), &[]));
        assert!(ScalarType::Double.is_null(ctx.out.row(0)));
        assert_eq!(ctx.res.num_of_res, 1);
    }

    #[test]
    fn test_interp_set_value() {
        let empty = ColumnData::new(ScalarType::Double);
        let mut op = InterpOp;
        let mut ctx = ctx_with_mode(4);
        ctx.params[1] = Param::F64(9.5);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(empty.view(), &[]));
        assert_eq!(ctx.out.f64_at(0), 9.5);
    }

    #[test]
    fn test_interp_none_produces_nothing() {
        let empty = ColumnData::new(ScalarType::Double);
        let mut op = InterpOp;
        let mut ctx = ctx_with_mode(0);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(empty.view(), &[]));
        assert_eq!(ctx.res.num_of_res, 0);
    }
}
