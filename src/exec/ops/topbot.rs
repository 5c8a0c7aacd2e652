//! Top-k / bottom-k selection.
//!
//! Entries are kept sorted with the current worst at index 0, so both the
//! eviction test and the block pre-filter are O(1). Each entry carries its
//! timestamp and a packed copy of all tag columns of the winning row.
//!
//! Finalize parameters: `params[0]` is k, `params[1]` picks the output
//! sort key (0 = timestamp, 1 = value), `params[2]` the direction
//! (0 = ascending, 1 = descending).
//!
//! The transported intermediate stores the pointer area as offsets from
//! the entry region (`[num][pad][k offsets][k entries]`); decoding always
//! reconstitutes owned entries before any comparison.

use std::cmp::Ordering;

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx, Stage};
use crate::types::{Datum, ScalarType};

use super::{check_merge_input, Aggregator};

const HEADER_BYTES: usize = 8;
const PAIR_BYTES: usize = 16; // 8-byte value union + 8-byte timestamp

#[derive(Debug, Clone, PartialEq)]
pub struct ValuePair {
    pub val: Datum,
    pub ts: i64,
    pub tags: Vec<u8>,
}

#[derive(Debug)]
pub struct TopBotOp {
    is_top: bool,
    data_ty: ScalarType,
    k: usize,
    tag_len: usize,
    entries: Vec<ValuePair>,
}

pub fn make_top(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TopBotOp::new(true, init))
}

pub fn make_bottom(init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TopBotOp::new(false, init))
}

/// Intermediate size for capacity `k` and `tag_len` bytes of packed tags.
pub fn inter_bytes(k: usize, tag_len: usize) -> usize {
    HEADER_BYTES + k * (PAIR_BYTES + 8 + tag_len)
}

impl TopBotOp {
    fn new(is_top: bool, init: &OpInit) -> Self {
        Self {
            is_top,
            data_ty: init.data_ty,
            k: init.param.max(0) as usize,
            tag_len: init.tag_len,
            entries: Vec::new(),
        }
    }

    fn cmp_val(&self, a: &Datum, b: &Datum) -> Ordering {
        if self.data_ty.is_float() {
            a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal)
        } else {
            a.as_i64().cmp(&b.as_i64())
        }
    }

    /// Sorted insert keeping the worst entry at index 0.
    fn add(&mut self, val: Datum, ts: i64, tags: Vec<u8>) {
        let pair = ValuePair { val, ts, tags };

        if self.entries.len() < self.k {
            let pos = self.entries.partition_point(|e| {
                let ord = self.cmp_val(&e.val, &pair.val);
                if self.is_top {
                    ord != Ordering::Greater
                } else {
                    ord != Ordering::Less
                }
            });
            self.entries.insert(pos, pair);
            return;
        }
        if self.k == 0 {
            return;
        }

        let beats_worst = {
            let ord = self.cmp_val(&pair.val, &self.entries[0].val);
            if self.is_top {
                ord == Ordering::Greater
            } else {
                ord == Ordering::Less
            }
        };
        if !beats_worst {
            return;
        }

        self.entries.remove(0);
        let pos = self.entries.partition_point(|e| {
            let ord = self.cmp_val(&e.val, &pair.val);
            if self.is_top {
                ord == Ordering::Less
            } else {
                ord == Ordering::Greater
            }
        });
        self.entries.insert(pos, pair);
    }

    /// Packs the current tag-context values (timestamp placeholders get
    /// the winning row's timestamp) into an entry's tag bytes.
    fn pack_tags(ctx: &mut EvalCtx, ts: i64, tag_len: usize) -> Vec<u8> {
        let mut tags = vec![0u8; tag_len];
        let mut off = 0;
        for tag in &mut ctx.tag_ctxs {
            if tag.is_ts_placeholder {
                tag.tag = Datum::Int(ts);
            }
            let bytes = tag.out.bytes;
            if off + bytes > tag_len {
                break;
            }
            tag.out.ty.write_datum(&mut tags[off..off + bytes], &tag.tag);
            off += bytes;
        }
        tags
    }

    fn encode(&self, out: &mut [u8]) {
        let total = inter_bytes(self.k, self.tag_len);
        debug_assert!(out.len() >= total);
        out[..total].fill(0);
        out[..4].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());

        let entry_bytes = PAIR_BYTES + self.tag_len;
        let offsets_end = HEADER_BYTES + self.k * 8;
        for i in 0..self.k {
            let off = (i * entry_bytes) as u64;
            out[HEADER_BYTES + i * 8..HEADER_BYTES + i * 8 + 8]
                .copy_from_slice(&off.to_le_bytes());
        }

        for (i, pair) in self.entries.iter().enumerate() {
            let base = offsets_end + i * entry_bytes;
            if self.data_ty.is_float() {
                out[base..base + 8].copy_from_slice(&pair.val.as_f64().to_le_bytes());
            } else {
                out[base..base + 8].copy_from_slice(&pair.val.as_i64().to_le_bytes());
            }
            out[base + 8..base + 16].copy_from_slice(&pair.ts.to_le_bytes());
            let n = pair.tags.len().min(self.tag_len);
            out[base + 16..base + 16 + n].copy_from_slice(&pair.tags[..n]);
        }
    }

    /// Rebuilds owned entries from a relocated intermediate buffer.
    fn decode(&self, data: &[u8]) -> Vec<ValuePair> {
        let num = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
        let entry_bytes = PAIR_BYTES + self.tag_len;
        let area = HEADER_BYTES + self.k * 8;

        let mut pairs = Vec::with_capacity(num.min(self.k));
        for i in 0..num.min(self.k) {
            let off =
                u64::from_le_bytes(data[HEADER_BYTES + i * 8..HEADER_BYTES + i * 8 + 8].try_into().unwrap())
                    as usize;
            let base = area + off;
            let val = if self.data_ty.is_float() {
                Datum::Double(f64::from_le_bytes(data[base..base + 8].try_into().unwrap()))
            } else {
                Datum::Int(i64::from_le_bytes(data[base..base + 8].try_into().unwrap()))
            };
            let ts = i64::from_le_bytes(data[base + 8..base + 16].try_into().unwrap());
            let tags = data[base + 16..base + 16 + self.tag_len].to_vec();
            pairs.push(ValuePair { val, ts, tags });
        }
        pairs
    }

    fn snapshot(&self, ctx: &mut EvalCtx) {
        if ctx.res.super_table {
            let buf_len = inter_bytes(self.k, self.tag_len);
            debug_assert!(ctx.out.bytes >= buf_len);
            let mut buf = vec![0u8; buf_len];
            self.encode(&mut buf);
            ctx.out.cur_mut()[..buf_len].copy_from_slice(&buf);
        }
    }

    fn merge(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        check_merge_input(ctx, input);
        let mut incoming = 0;
        for i in 0..input.size {
            let pairs = self.decode(input.col.cell(i));
            incoming += pairs.len();
            for pair in pairs {
                self.add(pair.val, pair.ts, pair.tags);
            }
        }
        if incoming > 0 {
            ctx.set_val(incoming, self.entries.len());
            if !self.entries.is_empty() {
                ctx.res.has_result = true;
            }
        }
        self.snapshot(ctx);
    }

    /// Block pre-filter: a fully populated heap only needs a block whose
    /// extremum can displace the current worst entry.
    pub fn block_may_improve(&self, min: &Datum, max: &Datum) -> bool {
        if self.entries.len() < self.k {
            return true;
        }
        let worst = &self.entries[0].val;
        if self.is_top {
            self.cmp_val(max, worst) == Ordering::Greater
        } else {
            self.cmp_val(min, worst) == Ordering::Less
        }
    }
}

impl Aggregator for TopBotOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.entries.clear();
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        let mut not_null = 0;
        for i in 0..input.size {
            if input.has_null && input.col.is_null(i) {
                continue;
            }
            not_null += 1;
            let ts = input.ts_list.get(i).copied().unwrap_or(0);
            let val = if self.data_ty.is_float() {
                Datum::Double(input.col.get_f64(i))
            } else {
                Datum::Int(input.col.get_i64(i))
            };
            let tags = Self::pack_tags(ctx, ts, self.tag_len);
            self.add(val, ts, tags);
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
        let ts = input.ts_list.get(row).copied().unwrap_or(0);
        let val = if self.data_ty.is_float() {
            Datum::Double(input.col.get_f64(row))
        } else {
            Datum::Int(input.col.get_i64(row))
        };
        let tags = Self::pack_tags(ctx, ts, self.tag_len);
        self.add(val, ts, tags);
        ctx.set_val(1, 1);
        ctx.res.has_result = true;
        self.snapshot(ctx);
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        ctx.res.num_of_res = self.entries.len();

        let by_value = ctx.params[1].i64() != 0;
        let desc = ctx.params[2].i64() != 0;
        let mut sorted = self.entries.clone();
        if by_value {
            sorted.sort_by(|a, b| self.cmp_val(&a.val, &b.val));
        } else {
            sorted.sort_by_key(|p| p.ts);
        }
        if desc {
            sorted.reverse();
        }

        // second-stage output is always written forward
        let step = if ctx.stage == Stage::SecondMerge { 1 } else { ctx.order.step() };

        let mut pos = ctx.out.pos;
        for pair in &sorted {
            let ty = ctx.out.ty;
            ty.write_datum(ctx.out.row_mut(pos), &pair.val);
            if let Some(pts) = ctx.pts_out.as_mut() {
                pts.set(pos, pair.ts);
            }
            pos += step;
        }

        // unpack the carried tags into each tag context's output column
        for (i, pair) in sorted.iter().enumerate() {
            let mut off = 0;
            for tag in &mut ctx.tag_ctxs {
                let bytes = tag.out.bytes;
                if off + bytes > pair.tags.len() || i >= tag.out.rows() {
                    break;
                }
                tag.out.row_mut(i as isize).copy_from_slice(&pair.tags[off..off + bytes]);
                off += bytes;
            }
        }

        ctx.res.reset();
    }

    fn merge_first(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn merge_second(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        self.merge(ctx, input);
    }

    fn block_load(&self, _ctx: &EvalCtx, _start: i64, _end: i64, _primary_ts_col: bool) -> BlockLoad {
        BlockLoad::All
    }
}
