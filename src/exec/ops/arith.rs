//! Row-wise arithmetic over an expression tree.
//!
//! The expression and the mapping from column id to the block's column
//! data are supplied by the caller on every block; the operator itself is
//! stateless and always emits doubles, one output row per input row. A
//! null in any referenced operand nulls the output row.

use tracing::warn;

use crate::block::ColumnView;
use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx};
use crate::types::ScalarType;

use super::Aggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// A caller-built expression tree over the block's columns.
#[derive(Debug, Clone)]
pub enum ExprNode {
    Column(u32),
    Const(f64),
    Binary { op: BinaryOp, lhs: Box<ExprNode>, rhs: Box<ExprNode> },
}

/// Per-block expression binding: the tree plus the resolver data mapping
/// column ids to the columns of the current block.
#[derive(Debug, Clone)]
pub struct ArithInput<'a> {
    pub expr: &'a ExprNode,
    pub columns: &'a [(u32, ColumnView<'a>)],
}

impl<'a> ArithInput<'a> {
    fn resolve(&self, id: u32) -> Option<&ColumnView<'a>> {
        self.columns.iter().find(|(cid, _)| *cid == id).map(|(_, col)| col)
    }

    fn eval(&self, node: &ExprNode, row: usize) -> Option<f64> {
        match node {
            ExprNode::Const(v) => Some(*v),
            ExprNode::Column(id) => {
                let col = self.resolve(*id)?;
                if col.is_null(row) {
                    None
                } else {
                    Some(col.get_f64(row))
                }
            }
            ExprNode::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs, row)?;
                let r = self.eval(rhs, row)?;
                Some(match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Rem => l % r,
                })
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ArithOp;

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(ArithOp)
}

impl Aggregator for ArithOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let Some(arith) = input.arith.as_ref() else {
            warn!("arithmetic operator invoked without an expression binding");
            return;
        };

        let step = ctx.order.step();
        for i in 0..input.size {
            let pos = ctx.out.pos + i as isize * step;
            match arith.eval(arith.expr, i) {
                Some(v) => ScalarType::Double.write_f64(ctx.out.row_mut(pos), v),
                None => ScalarType::Double.write_null(ctx.out.row_mut(pos)),
            }
        }

        ctx.out.pos += input.size as isize * step;
        ctx.res.num_of_res += input.size;
        ctx.res.has_result = true;
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        let Some(arith) = input.arith.as_ref() else {
            return;
        };
        let pos = ctx.out.pos;
        match arith.eval(arith.expr, row) {
            Some(v) => ScalarType::Double.write_f64(ctx.out.row_mut(pos), v),
            None => ScalarType::Double.write_null(ctx.out.row_mut(pos)),
        }
        ctx.out.pos += ctx.order.step();
        ctx.res.num_of_res += 1;
        ctx.res.has_result = true;
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::All
    }
}
