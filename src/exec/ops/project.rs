//! Projection and tag/timestamp placeholder operators.
//!
//! These are pass-through operators: the timestamp column writer, the
//! column and tag projections, and the group-by tag emitter. All of them
//! use the copy merge for both reduction stages.

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx, Order, Param};

use super::{copy_merge, Aggregator};

// ---------------------------------------------------------------------------
// ts (query start timestamp)

#[derive(Debug, Default)]
pub struct TsOp;

pub fn make_ts(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TsOp)
}

impl Aggregator for TsOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let ts = ctx.start_ts;
        ctx.out.cur_mut()[..8].copy_from_slice(&ts.to_le_bytes());
        ctx.set_val(input.size, 1);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, _row: usize) {
        self.step_block(ctx, input);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::None
    }
}

// ---------------------------------------------------------------------------
// ts_dummy / tag_dummy placeholders

#[derive(Debug, Default)]
pub struct TsDummyOp;

pub fn make_ts_dummy(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TsDummyOp)
}

impl Aggregator for TsDummyOp {
    fn step_block(&mut self, _ctx: &mut EvalCtx, _input: &BlockInput<'_>) {}

    fn step_row(&mut self, _ctx: &mut EvalCtx, _input: &BlockInput<'_>, _row: usize) {}

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }
}

#[derive(Debug, Default)]
pub struct TagDummyOp;

pub fn make_tag_dummy(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TagDummyOp)
}

impl Aggregator for TagDummyOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, _input: &BlockInput<'_>) {
        emit_tag(ctx);
    }

    fn step_row(&mut self, _ctx: &mut EvalCtx, _input: &BlockInput<'_>, _row: usize) {}

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::None
    }
}

// ---------------------------------------------------------------------------
// tag (group-by tag value, one output per query range)

fn emit_tag(ctx: &mut EvalCtx) {
    let tag = ctx.tag.clone();
    let ty = ctx.out.ty;
    ty.write_datum(ctx.out.cur_mut(), &tag);
    ctx.set_val(1, 1);
}

#[derive(Debug, Default)]
pub struct TagOp;

pub fn make_tag(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TagOp)
}

impl Aggregator for TagOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, _input: &BlockInput<'_>) {
        emit_tag(ctx);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, _input: &BlockInput<'_>, _row: usize) {
        emit_tag(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::None
    }
}

// ---------------------------------------------------------------------------
// column projection

#[derive(Debug, Default)]
pub struct ColProjectOp;

pub fn make_colprj(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(ColProjectOp)
}

impl Aggregator for ColProjectOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        if input.size == 0 {
            return;
        }
        ctx.res.num_of_res += input.size;

        // descending scans fill the output backwards while keeping the
        // rows in input order
        let base = if ctx.order == Order::Asc {
            ctx.out.pos
        } else {
            ctx.out.pos - (input.size as isize - 1)
        };
        for i in 0..input.size {
            let cell = input.col.cell(i);
            let n = cell.len().min(ctx.out.bytes);
            ctx.out.row_mut(base + i as isize)[..n].copy_from_slice(&cell[..n]);
        }

        ctx.out.pos += input.size as isize * ctx.order.step();
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        // single-output projections stop after the first row
        if ctx.params[0] == Param::I64(1) && ctx.res.num_of_res >= 1 {
            return;
        }
        ctx.res.num_of_res += 1;
        let cell = input.col.cell(row);
        let n = cell.len().min(ctx.out.bytes);
        let pos = ctx.out.pos;
        ctx.out.row_mut(pos)[..n].copy_from_slice(&cell[..n]);
        ctx.out.pos += ctx.order.step();
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }
}

// ---------------------------------------------------------------------------
// tag projection (repeats the group tag for every row)

#[derive(Debug, Default)]
pub struct TagProjectOp;

pub fn make_tagprj(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TagProjectOp)
}

impl Aggregator for TagProjectOp {
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        ctx.res.num_of_res += input.size;
        let step = ctx.order.step();
        for _ in 0..input.size {
            let tag = ctx.tag.clone();
            let ty = ctx.out.ty;
            ty.write_datum(ctx.out.cur_mut(), &tag);
            ctx.out.pos += step;
        }
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, _input: &BlockInput<'_>, _row: usize) {
        ctx.res.num_of_res += 1;
        let tag = ctx.tag.clone();
        let ty = ctx.out.ty;
        ty.write_datum(ctx.out.cur_mut(), &tag);
        ctx.out.pos += ctx.order.step();
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        copy_merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ColumnData;
    use crate::types::{Datum, ScalarType};

    #[test]
    fn test_col_project_asc() {
        let col = ColumnData::from_i32s(&[Some(1), Some(2), Some(3)]);
        let mut op = ColProjectOp;
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 3);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        assert_eq!(
            (0..3).map(|i| ctx.out.i64_at(i)).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(ctx.res.num_of_res, 3);
    }

    #[test]
    fn test_col_project_desc_writes_backwards() {
        let col = ColumnData::from_i32s(&[Some(1), Some(2), Some(3)]);
        let mut op = ColProjectOp;
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 3);
        ctx.order = Order::Desc;
        ctx.out.pos = 2;
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        assert_eq!(
            (0..3).map(|i| ctx.out.i64_at(i)).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(ctx.out.pos, -1);
    }

    #[test]
    fn test_tag_operator_emits_group_tag() {
        let empty = ColumnData::new(ScalarType::Int);
        let mut op = TagOp;
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 1);
        ctx.tag = Datum::Int(42);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(empty.view(), &[]));
        assert_eq!(ctx.out.i64_at(0), 42);
        assert_eq!(ctx.res.num_of_res, 1);
    }

    #[test]
    fn test_tag_project_repeats_tag() {
        let col = ColumnData::from_i32s(&[Some(0), Some(0)]);
        let mut op = TagProjectOp;
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 2);
        ctx.tag = Datum::Int(7);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        assert_eq!(ctx.out.i64_at(0), 7);
        assert_eq!(ctx.out.i64_at(1), 7);
    }

    #[test]
    fn test_ts_writes_query_start() {
        let col = ColumnData::from_i64s(&[Some(0)]);
        let mut op = TsOp;
        let mut ctx = EvalCtx::new(ScalarType::Timestamp, 8, 1);
        ctx.start_ts = 1234;
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        assert_eq!(ctx.out.i64_at(0), 1234);
    }
}
