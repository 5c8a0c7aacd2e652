//! First / last selection, their distributed variants, and last_row.
//!
//! The plain operators rely on the scan direction: first only looks at
//! ascending scans and stops at the first non-null value, last only at
//! descending scans. The `_dist` variants keep a `[value][timestamp]
//! [has-result]` intermediate so partial results from different nodes can
//! be reduced by timestamp.

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx, Order, Param, Stage};

use super::{check_merge_input, finish_common, Aggregator};

// ---------------------------------------------------------------------------
// plain first / last (single-table scans)

#[derive(Debug)]
pub struct FirstLastOp {
    is_first: bool,
    data_bytes: usize,
    val: Vec<u8>,
}

pub fn make_first(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(FirstLastOp { is_first: true, data_bytes: init.data_bytes, val: Vec::new() })
}

pub fn make_last(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(FirstLastOp { is_first: false, data_bytes: init.data_bytes, val: Vec::new() })
}

impl FirstLastOp {
    fn wrong_direction(&self, order: Order) -> bool {
        if self.is_first {
            order == Order::Desc
        } else {
            order == Order::Asc
        }
    }

    fn take(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        self.val = input.col.cell(row).to_vec();
        ctx.out.cur_mut()[..self.data_bytes].copy_from_slice(&self.val);
        ctx.update_tags(input.ts_list.get(row).copied());
        ctx.res.has_result = true;
        ctx.res.complete = true;
    }
}

impl Aggregator for FirstLastOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.val.clear();
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        if !input.loaded || self.wrong_direction(ctx.order) || ctx.res.complete {
            return;
        }

        let rows: Box<dyn Iterator<Item = usize>> = if self.is_first {
            Box::new(0..input.size)
        } else {
            Box::new((0..input.size).rev())
        };

        for i in rows {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            self.take(ctx, input, i);
            ctx.set_val(1, 1);
            break;
        }
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if self.wrong_direction(ctx.order) || (input.has_null && input.col.is_null(row)) {
            return;
        }
        self.take(ctx, input, row);
        ctx.set_val(1, 1);
    }

    fn block_load(&self, ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        if self.wrong_direction(ctx.order) {
            return BlockLoad::None;
        }
        if ctx.res.num_of_res == 0 {
            BlockLoad::All
        } else {
            BlockLoad::None
        }
    }
}

// ---------------------------------------------------------------------------
// distributed first / last

#[derive(Debug)]
pub struct FirstLastDistOp {
    is_first: bool,
    data_bytes: usize,
    val: Vec<u8>,
    ts: i64,
    has: bool,
}

pub fn make_first_dist(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(FirstLastDistOp::new(true, init))
}

pub fn make_last_dist(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(FirstLastDistOp::new(false, init))
}

fn encode_dist(val: &[u8], ts: i64, has: bool, out: &mut [u8]) {
    let bytes = val.len();
    out[..bytes].copy_from_slice(val);
    out[bytes..bytes + 8].copy_from_slice(&ts.to_le_bytes());
    out[bytes + 8] = has as u8;
}

fn decode_dist(cell: &[u8], data_bytes: usize) -> (&[u8], i64, bool) {
    let ts = i64::from_le_bytes(cell[data_bytes..data_bytes + 8].try_into().unwrap());
    (&cell[..data_bytes], ts, cell[data_bytes + 8] != 0)
}

impl FirstLastDistOp {
    fn new(is_first: bool, init: &OpInit) -> Self {
        Self { is_first, data_bytes: init.data_bytes, val: Vec::new(), ts: 0, has: false }
    }

    fn beats(&self, ts: i64) -> bool {
        if !self.has {
            return true;
        }
        if self.is_first {
            ts < self.ts
        } else {
            ts > self.ts
        }
    }

    fn assign(&mut self, ctx: &mut EvalCtx, val: &[u8], ts: i64) {
        if !self.beats(ts) {
            return;
        }
        self.val = val.to_vec();
        self.ts = ts;
        self.has = true;
        ctx.update_tags(Some(ts));
    }

    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            let (val, ts, has) = (self.val.clone(), self.ts, self.has);
            let mut buf = vec![0u8; self.data_bytes];
            let n = val.len().min(self.data_bytes);
            buf[..n].copy_from_slice(&val[..n]);
            encode_dist(&buf, ts, has, ctx.out.cur_mut());
        }
    }

    fn wrong_direction(&self, order: Order) -> bool {
        if self.is_first {
            order == Order::Desc
        } else {
            order == Order::Asc
        }
    }
}

impl Aggregator for FirstLastDistOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        // running best timestamp of the second merge
        ctx.params[1] = Param::None;
        self.val.clear();
        self.ts = 0;
        self.has = false;
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        if input.size == 0 || !input.loaded || self.wrong_direction(ctx.order) {
            return;
        }

        let rows: Box<dyn Iterator<Item = usize>> = if self.is_first {
            Box::new(0..input.size)
        } else {
            Box::new((0..input.size).rev())
        };

        for i in rows {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            let ts = input.ts_list[i];
            let cell = input.col.cell(i);
            self.assign(ctx, cell, ts);
            ctx.res.has_result = true;
            ctx.set_val(1, 1);
            break;
        }
        self.snapshot(ctx);
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.size == 0
            || self.wrong_direction(ctx.order)
            || (input.has_null && input.col.is_null(row))
        {
            return;
        }
        let ts = input.ts_list[row];
        let cell = input.col.cell(row);
        self.assign(ctx, cell, ts);
        ctx.res.has_result = true;
        ctx.set_val(1, 1);
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if ctx.res.has_result && !self.val.is_empty() {
            let val = self.val.clone();
            let n = val.len().min(ctx.out.bytes);
            ctx.out.cur_mut()[..n].copy_from_slice(&val[..n]);
        }
        finish_common(ctx);
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        for i in 0..input.size {
            let (val, ts, has) = decode_dist(input.col.cell(i), self.data_bytes);
            if !has {
                continue;
            }
            let val = val.to_vec();
            self.assign(ctx, &val, ts);
        }
        self.snapshot(ctx);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        debug_assert_eq!(ctx.stage, Stage::SecondMerge);

        for i in 0..input.size {
            let (val, ts, has) = decode_dist(input.col.cell(i), self.data_bytes);
            if !has {
                continue;
            }

            let better = match ctx.params[1] {
                Param::None => true,
                Param::I64(best) => {
                    if self.is_first {
                        best > ts
                    } else {
                        best < ts
                    }
                }
                _ => true,
            };
            if better {
                let val = val.to_vec();
                self.val = val;
                self.ts = ts;
                self.has = true;
                ctx.params[1] = Param::I64(ts);
                ctx.update_tags(Some(ts));
            }

            ctx.set_val(1, 1);
            ctx.res.has_result = true;
        }
    }

    fn block_load(&self, ctx: &EvalCtx, start: i64, end: i64, _primary_ts_col: bool) -> BlockLoad {
        if self.wrong_direction(ctx.order) {
            return BlockLoad::None;
        }
        if !self.has {
            return BlockLoad::All;
        }
        let skip = if self.is_first { self.ts <= start } else { self.ts > end };
        if skip {
            BlockLoad::None
        } else {
            BlockLoad::All
        }
    }
}

// ---------------------------------------------------------------------------
// last_row

#[derive(Debug)]
pub struct LastRowOp {
    inner: FirstLastDistOp,
}

pub fn make_last_row(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(LastRowOp { inner: FirstLastDistOp::new(false, init) })
}

impl Aggregator for LastRowOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        self.inner.setup(ctx)
    }

    /// Always accepts the single incoming row; its timestamp is supplied
    /// externally in `params[0]`.
    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        debug_assert_eq!(input.size, 1);
        let ts = ctx.params[0].i64();
        let cell = input.col.cell(0).to_vec();

        self.inner.val = cell.clone();
        self.inner.ts = ts;
        self.inner.has = true;
        let n = cell.len().min(ctx.out.bytes);
        ctx.out.cur_mut()[..n]
            .copy_from_slice(&cell[..n]);
        ctx.res.has_result = true;

        if ctx.res.super_table {
            self.inner.snapshot(ctx);
            ctx.update_tags(Some(ts));
        }
        ctx.set_val(input.size, 1);
    }

    fn step_row(&mut self, _ctx: &mut EvalCtx, _input: &BlockInput<'_>, _row: usize) {}

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        if ctx.stage == Stage::SecondMerge {
            if !ctx.res.has_result {
                ctx.out.write_null();
                ctx.res.reset();
                return;
            }
            if !self.inner.val.is_empty() {
                let val = self.inner.val.clone();
                let n = val.len().min(ctx.out.bytes);
                ctx.out.cur_mut()[..n].copy_from_slice(&val[..n]);
            }
        }
        ctx.res.num_of_res = 1;
        ctx.res.reset();
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.inner.merge_second(ctx, input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ColumnData;
    use crate::exec::TagContext;
    use crate::types::{Datum, ScalarType};

    fn init() -> OpInit {
        OpInit { data_ty: ScalarType::Int, data_bytes: 4, param: 0, tag_len: 0, super_table: false }
    }

    #[test]
    fn test_first_skips_leading_nulls() {
        let col = ColumnData::from_i32s(&[None, None, Some(7), Some(8)]);
        let ts = [1i64, 2, 3, 4];
        let mut op = FirstLastOp { is_first: true, data_bytes: 4, val: Vec::new() };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 1);
        ctx.tag_ctxs.push(TagContext::ts_placeholder());
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &ts));
        assert!(ctx.res.complete);
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 7);
        assert_eq!(ctx.tag_ctxs[0].out.i64_at(0), 3);
    }

    #[test]
    fn test_first_ignores_desc_scan() {
        let col = ColumnData::from_i32s(&[Some(1)]);
        let mut op = FirstLastOp { is_first: true, data_bytes: 4, val: Vec::new() };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 1);
        ctx.order = Order::Desc;
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[5]));
        assert!(!ctx.res.has_result);
    }

    #[test]
    fn test_last_scans_backward() {
        let col = ColumnData::from_i32s(&[Some(1), Some(2), None]);
        let ts = [1i64, 2, 3];
        let mut op = FirstLastOp { is_first: false, data_bytes: 4, val: Vec::new() };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 1);
        ctx.order = Order::Desc;
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &ts));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 2);
    }

    #[test]
    fn test_first_dist_keeps_earliest_across_blocks() {
        let a = ColumnData::from_i32s(&[None, Some(5)]);
        let b = ColumnData::from_i32s(&[Some(3)]);
        let mut op = FirstLastDistOp::new(true, &init());
        let mut ctx = EvalCtx::new(ScalarType::Binary(13), 13, 1);
        ctx.res.super_table = true;
        op.setup(&mut ctx);
        // later block arrives first
        op.step_block(&mut ctx, &BlockInput::loaded(a.view(), &[100, 200]));
        op.step_block(&mut ctx, &BlockInput::loaded(b.view(), &[50]));

        let (val, ts, has) = decode_dist(ctx.out.row(0), 4);
        assert!(has);
        assert_eq!(ts, 50);
        assert_eq!(ScalarType::Int.read_i64(val), 3);
    }

    #[test]
    fn test_first_dist_second_merge_uses_param_timestamp() {
        let mut partials = Vec::new();
        for (v, ts) in [(9i64, 400i64), (4, 100), (6, 250)] {
            let mut cell = vec![0u8; 13];
            ScalarType::Int.write_i64(&mut cell[..4], v);
            cell[4..12].copy_from_slice(&ts.to_le_bytes());
            cell[12] = 1;
            partials.extend_from_slice(&cell);
        }

        let mut op = FirstLastDistOp::new(true, &init());
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 1);
        ctx.stage = Stage::SecondMerge;
        op.setup(&mut ctx);
        op.merge_second(&mut ctx, &BlockInput::intermediate(&partials, 13));
        assert_eq!(ctx.params[1], Param::I64(100));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 4);
    }

    #[test]
    fn test_last_dist_block_load_skips_older_blocks() {
        let mut op = FirstLastDistOp::new(false, &init());
        let mut ctx = EvalCtx::new(ScalarType::Binary(13), 13, 1);
        ctx.order = Order::Desc;
        op.setup(&mut ctx);
        assert_eq!(op.block_load(&ctx, 0, 100, false), BlockLoad::All);

        let col = ColumnData::from_i32s(&[Some(1)]);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[500]));
        assert_eq!(op.block_load(&ctx, 0, 100, false), BlockLoad::None);
        assert_eq!(op.block_load(&ctx, 400, 600, false), BlockLoad::All);
    }

    #[test]
    fn test_last_row_takes_value_and_external_ts() {
        let col = ColumnData::from_i32s(&[Some(42)]);
        let mut op = LastRowOp { inner: FirstLastDistOp::new(false, &init()) };
        let mut ctx = EvalCtx::new(ScalarType::Int, 4, 1);
        op.setup(&mut ctx);
        ctx.params[0] = Param::I64(777);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[777]));
        op.finalize(&mut ctx);
        assert_eq!(ctx.out.i64_at(0), 42);
        assert_eq!(ctx.res.num_of_res, 1);
    }

    #[test]
    fn test_tag_datum_travels_with_first() {
        let col = ColumnData::from_i32s(&[Some(5)]);
        let mut op = FirstLastDistOp::new(true, &init());
        let mut ctx = EvalCtx::new(ScalarType::Binary(13), 13, 1);
        ctx.tag_ctxs.push(TagContext::new(Datum::Int(31), ScalarType::Int));
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[10]));
        assert_eq!(ctx.tag_ctxs[0].out.i64_at(0), 31);
    }
}
