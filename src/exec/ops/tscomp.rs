//! Timestamp-column export (`ts_comp`).
//!
//! Collects the primary timestamp column of a group, delta-encodes it,
//! and flushes the compressed frames into a scratch file; the operator's
//! result is the file path. The join executor on the other side reads the
//! file back with the same framing.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use xxhash_rust::xxh3::xxh3_64;

use crate::exec::table::OpInit;
use crate::exec::{BlockInput, BlockLoad, EvalCtx, ExecError, Order};
use crate::types::Datum;

use super::Aggregator;

/// One run of timestamps, delta-encoded against `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TsFrame {
    start: i64,
    deltas: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TsFile {
    frames: Vec<TsFrame>,
}

impl TsFile {
    fn push(&mut self, ts: i64) {
        match self.frames.last_mut() {
            Some(frame) => {
                let prev = frame.start + frame.deltas.iter().sum::<i64>();
                frame.deltas.push(ts - prev);
            }
            None => self.frames.push(TsFrame { start: ts, deltas: Vec::new() }),
        }
    }

    fn compress(&self) -> Result<Vec<u8>, ExecError> {
        let raw = bincode::serialize(self).map_err(|e| ExecError::Io(e.to_string()))?;
        zstd::encode_all(&raw[..], 3).map_err(|e| ExecError::Io(e.to_string()))
    }

    #[cfg(test)]
    fn decompress(data: &[u8]) -> Result<Self, ExecError> {
        let raw = zstd::decode_all(data).map_err(|e| ExecError::Io(e.to_string()))?;
        bincode::deserialize(&raw).map_err(|e| ExecError::Io(e.to_string()))
    }

    #[cfg(test)]
    fn timestamps(&self) -> Vec<i64> {
        let mut out = Vec::new();
        for frame in &self.frames {
            let mut cur = frame.start;
            out.push(cur);
            for d in &frame.deltas {
                cur += d;
                out.push(cur);
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct TsCompOp {
    file: TsFile,
}

pub fn make(_init: &OpInit) -> Box<dyn Aggregator> {
    Box::new(TsCompOp::default())
}

impl TsCompOp {
    fn group_key(tag: &Datum) -> u64 {
        match tag {
            Datum::Bytes(b) => xxh3_64(b),
            Datum::Int(v) => xxh3_64(&v.to_le_bytes()),
            Datum::Double(v) => xxh3_64(&v.to_le_bytes()),
            Datum::Bool(b) => xxh3_64(&[*b as u8]),
            Datum::Null => xxh3_64(&[]),
        }
    }

    fn flush(&self, tag: &Datum) -> Result<String, ExecError> {
        let compressed = self.file.compress()?;
        let prefix = format!("tscomp-{:016x}-", Self::group_key(tag));
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".zst")
            .tempfile()
            .map_err(|e| ExecError::Io(e.to_string()))?;
        file.write_all(&compressed).map_err(|e| ExecError::Io(e.to_string()))?;

        let (_, path) = file.keep().map_err(|e| ExecError::Io(e.to_string()))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

impl Aggregator for TsCompOp {
    fn setup(&mut self, ctx: &mut EvalCtx) -> bool {
        if ctx.res.initialized {
            return false;
        }
        ctx.out.buf.fill(0);
        ctx.res.init();
        self.file = TsFile::default();
        true
    }

    fn step_block(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>) {
        // the primary key column has no nulls; honor the scan direction
        if ctx.order == Order::Asc {
            for i in 0..input.size {
                self.file.push(input.col.get_i64(i));
            }
        } else {
            for i in (0..input.size).rev() {
                self.file.push(input.col.get_i64(i));
            }
        }
        ctx.set_val(input.size, 1);
        ctx.res.has_result = true;
    }

    fn step_row(&mut self, ctx: &mut EvalCtx, input: &BlockInput<'_>, row: usize) {
        if input.has_null && input.col.is_null(row) {
            return;
        }
        self.file.push(input.col.get_i64(row));
        ctx.set_val(input.size, 1);
        ctx.res.has_result = true;
    }

    fn finalize(&mut self, ctx: &mut EvalCtx) {
        match self.flush(&ctx.tag) {
            Ok(path) => {
                debug!(path, "ts_comp scratch file flushed");
                let out = ctx.out.cur_mut();
                out.fill(0);
                let bytes = path.as_bytes();
                let n = bytes.len().min(out.len());
                out[..n].copy_from_slice(&bytes[..n]);
                ctx.res.num_of_res = 1;
            }
            Err(e) => {
                error!("ts_comp flush failed: {e}");
                ctx.out.write_null();
            }
        }
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

    #[test]
    fn test_frame_roundtrip() {
        let mut file = TsFile::default();
        for ts in [100, 105, 105, 200] {
            file.push(ts);
        }
        let compressed = file.compress().unwrap();
        let back = TsFile::decompress(&compressed).unwrap();
        assert_eq!(back.timestamps(), vec![100, 105, 105, 200]);
    }

    #[test]
    fn test_ts_comp_writes_path() {
        let col = ColumnData::from_i64s(&[Some(10), Some(20), Some(30)]);
        let mut op = TsCompOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Binary(256), 256, 1);
        ctx.tag = Datum::Int(5);
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        op.finalize(&mut ctx);

        let raw = ctx.out.row(0);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let path = String::from_utf8(raw[..end].to_vec()).unwrap();
        assert!(path.contains("tscomp-"));

        let data = std::fs::read(&path).unwrap();
        let back = TsFile::decompress(&data).unwrap();
        assert_eq!(back.timestamps(), vec![10, 20, 30]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_ts_comp_desc_appends_reversed() {
        let col = ColumnData::from_i64s(&[Some(30), Some(20), Some(10)]);
        let mut op = TsCompOp::default();
        let mut ctx = EvalCtx::new(ScalarType::Binary(256), 256, 1);
        ctx.order = Order::Desc;
        op.setup(&mut ctx);
        op.step_block(&mut ctx, &BlockInput::loaded(col.view(), &[]));
        assert_eq!(op.file.timestamps(), vec![10, 20, 30]);
    }
}
