//! Simple linear regression over a synthetic x axis.
//!
//! `params[0]` seeds the x value, `params[1]` is the x step. Each
//! non-null row contributes to a 2×3 normal-equation matrix; finalize
//! solves the 2×2 system by Gaussian elimination and emits the textual
//! `"(slope, intercept)"` with six fractional digits, which downstream
//! readers parse.
//!
//! Scan-only; not available for super-table queries.

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx};

use super::Aggregator;

#[derive(Debug, Default)]
pub struct LeastSquaresOp {
    mat: [[f64; 3]; 2],
    x: f64,
    num: i64,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(LeastSquaresOp::default())
}

impl LeastSquaresOp {
    fn add(&mut self, y: f64, step: f64) {
        self.mat[0][0] += self.x * self.x;
        self.mat[0][1] += self.x;
        self.mat[0][2] += self.x * y;
        self.mat[1][2] += y;
        self.x += step;
        self.num += 1;
    }
}

impl Aggregator for LeastSquaresOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        *self = LeastSquaresOp { x: ctx.params[0].f64(), ..LeastSquaresOp::default() };
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let step = ctx.params[1].f64();
        let mut not_null = 0;
        for i in 0..input.size {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            not_null += 1;
            self.add(input.col.get_f64(i), step);
        }
        ctx.set_val(not_null, 1);
        if self.num > 0 {
            ctx.res.has_result = true;
        }
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        self.add(input.col.get_f64(row), ctx.params[1].f64());
        ctx.set_val(1, 1);
        ctx.res.has_result = true;
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if self.num == 0 {
            ctx.out.write_null();
            ctx.res.reset();
            return;
        }

        let p = &mut self.mat;
        p[1][1] = self.num as f64;
        p[1][0] = p[0][1];

        p[0][0] -= p[1][0] * (p[0][1] / p[1][1]);
        p[0][2] -= p[1][2] * (p[0][1] / p[1][1]);
        p[0][1] = 0.0;
        p[1][2] -= p[0][2] * (p[1][0] / p[0][0]);
        p[1][0] = 0.0;
        p[0][2] /= p[0][0];
        p[1][2] /= p[1][1];

        let text = format!("({:.6}, {:.6})", p[0][2], p[1][2]);
        let out = ctx.out.cur_mut();
        out.fill(0);
        let n = text.len().min(out.len());
        out[..n].copy_from_slice(&text.as_bytes()[..n]);

        ctx.res.num_of_res = 1;
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

    fn run(values: &[Option<i32>]) -> String {
        let col = ColumnData::from_i32s(values);
        let mut op = LeastSquaresOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Binary(50), 50, 1);
        ctx.params[0] = Param::F64(0.0);
        ctx.params[1] = Param::F64(1.0);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);
        let raw = ctx.out.row(0);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8(raw[..end].to_vec()).unwrap()
    }

    #[test]
    fn test_perfect_line() {
        // y = 2x + 1 over x = 0,1,2
        assert_eq!(run(&[Some(1), Some(3), Some(5)]), "(2.000000, 1.000000)");
    }

    #[test]
    fn test_flat_line_with_null() {
        // nulls consume no x step
        assert_eq!(run(&[Some(4), None, Some(4)]), "(0.000000, 4.000000)");
    }

    #[test]
    fn test_no_data_is_null() {
        let col = ColumnData::from_i32s(&[None]);
        let mut op = LeastSquaresOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Binary(50), 50, 1);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);
        assert!(ScalarType::Binary(50).is_null(ctx.out.row(0)));
    }
}
