//! Evaluation state shared by all aggregation operators.
//!
//! An [`EvalCtx`] is the per-(group, column) state that survives across
//! blocks: the output cell, scratch parameters, the result-info cell and
//! the tag contexts that travel with selection operators. Each block (or
//! each batch of intermediate buffers during a merge stage) is bound
//! through a short-lived [`BlockInput`].
//!
//! Stage ordering is the caller's contract: every scan-stage call for a
//! group precedes that group's finalize, and all scans precede first
//! merges, which precede second merges.

pub mod histogram;
pub mod membucket;
pub mod ops;
pub mod table;

use crate::block::{ColumnView, PreAgg};
use crate::types::{Datum, ScalarType};

pub use ops::arith::{ArithInput, ExprNode};
pub use ops::Aggregator;
pub use table::{result_data_info, Descriptor, FuncId, OpInit, ResultDataInfo, COMPAT, FUNC_TABLE};

/// Errors surfaced by the aggregation kernel.
#[derive(Debug, Clone)]
pub enum ExecError {
    /// Unsupported (type, operator) pair or inconsistent cell width.
    InvalidOperand { ty: ScalarType, bytes: usize, func: &'static str },
    /// Scratch-file I/O failure (ts_comp).
    Io(String),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::InvalidOperand { ty, bytes, func } => {
                write!(f, "invalid operand {ty:?}/{bytes}B for {func}")
            }
            ExecError::Io(msg) => write!(f, "scratch I/O error: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}

/// Reduction stage a hook is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Per-node primary scan over raw typed data.
    Scan,
    /// Per-node consolidation of primary-scan snapshots.
    FirstMerge,
    /// Coordinator-side consolidation of per-node snapshots.
    SecondMerge,
}

/// Scan direction for first/last semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// +1 for ascending scans, -1 for descending.
    pub fn step(&self) -> isize {
        match self {
            Order::Asc => 1,
            Order::Desc => -1,
        }
    }
}

/// What a block-load-need hook asks of the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLoad {
    /// Raw data not needed at all.
    None,
    /// Pre-aggregate fields suffice.
    FieldsOnly,
    /// Raw cells required.
    All,
}

/// Operator-specific scratch parameter.
///
/// `Param::None` doubles as the "not yet assigned" marker used by diff and
/// the distributed first/last merges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    None,
    I64(i64),
    F64(f64),
    /// A (timestamp, value) anchor used by interpolation.
    Anchor(i64, f64),
}

impl Param {
    pub fn i64(&self) -> i64 {
        match self {
            Param::I64(v) => *v,
            Param::F64(v) => *v as i64,
            Param::Anchor(ts, _) => *ts,
            Param::None => 0,
        }
    }

    pub fn f64(&self) -> f64 {
        match self {
            Param::I64(v) => *v as f64,
            Param::F64(v) => *v,
            Param::Anchor(_, v) => *v,
            Param::None => 0.0,
        }
    }
}

/// Per-column result cell.
///
/// `buf_len` is fixed at setup from [`result_data_info`] and checked
/// against every encoded snapshot; `num_of_res` follows the output
/// semantics rule (only raised by steps that saw at least one element).
#[derive(Debug, Clone, Default)]
pub struct ResultInfo {
    pub initialized: bool,
    pub complete: bool,
    pub has_result: bool,
    pub num_of_res: usize,
    pub buf_len: usize,
    pub super_table: bool,
}

impl ResultInfo {
    pub fn init(&mut self) {
        self.initialized = true;
        self.complete = false;
        self.has_result = false;
        self.num_of_res = 0;
    }

    /// Keeps `num_of_res` (it may still be consumed) but allows the cell
    /// to be re-initialized by the next setup.
    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

/// Destination cells for an operator's output.
///
/// `pos` is a signed row cursor so that descending scans can write at
/// decreasing offsets; single-output operators leave it at 0.
#[derive(Debug, Clone)]
pub struct OutputCol {
    pub ty: ScalarType,
    pub bytes: usize,
    pub buf: Vec<u8>,
    pub pos: isize,
}

impl OutputCol {
    pub fn new(ty: ScalarType, bytes: usize, rows: usize) -> Self {
        Self { ty, bytes, buf: vec![0; bytes * rows.max(1)], pos: 0 }
    }

    pub fn rows(&self) -> usize {
        self.buf.len() / self.bytes
    }

    pub fn row_mut(&mut self, row: isize) -> &mut [u8] {
        let row = usize::try_from(row).expect("output cursor underflow");
        &mut self.buf[row * self.bytes..(row + 1) * self.bytes]
    }

    pub fn row(&self, row: isize) -> &[u8] {
        let row = usize::try_from(row).expect("output cursor underflow");
        &self.buf[row * self.bytes..(row + 1) * self.bytes]
    }

    /// Cell under the cursor.
    pub fn cur_mut(&mut self) -> &mut [u8] {
        self.row_mut(self.pos)
    }

    pub fn cur(&self) -> &[u8] {
        self.row(self.pos)
    }

    pub fn write_null(&mut self) {
        let ty = self.ty;
        ty.write_null(self.cur_mut());
    }

    pub fn datum_at(&self, row: isize) -> Datum {
        self.ty.read_datum(self.row(row))
    }

    pub fn f64_at(&self, row: isize) -> f64 {
        self.ty.read_f64(self.row(row))
    }

    pub fn i64_at(&self, row: isize) -> i64 {
        self.ty.read_i64(self.row(row))
    }
}

/// Parallel timestamp output used by diff and top/bottom.
#[derive(Debug, Clone)]
pub struct TsOutput {
    pub buf: Vec<i64>,
    pub pos: isize,
}

impl TsOutput {
    pub fn new(rows: usize) -> Self {
        Self { buf: vec![0; rows.max(1)], pos: 0 }
    }

    pub fn set(&mut self, row: isize, ts: i64) {
        let row = usize::try_from(row).expect("timestamp cursor underflow");
        self.buf[row] = ts;
    }
}

/// A sibling context carrying a non-measured column through a selection
/// operator. Timestamp placeholders receive the winning row's timestamp
/// before the tag value is emitted.
#[derive(Debug, Clone)]
pub struct TagContext {
    pub is_ts_placeholder: bool,
    pub tag: Datum,
    pub out: OutputCol,
}

impl TagContext {
    pub fn new(tag: Datum, ty: ScalarType) -> Self {
        Self::with_rows(tag, ty, 1)
    }

    /// Multi-output selection operators (top/bottom) unpack one tag value
    /// per emitted row; size the output accordingly.
    pub fn with_rows(tag: Datum, ty: ScalarType, rows: usize) -> Self {
        let bytes = ty.bytes();
        Self { is_ts_placeholder: false, tag, out: OutputCol::new(ty, bytes, rows) }
    }

    pub fn ts_placeholder() -> Self {
        let mut ctx = Self::new(Datum::Null, ScalarType::BigInt);
        ctx.is_ts_placeholder = true;
        ctx
    }

    /// Emits the tag value into this context's output cell.
    pub fn emit(&mut self) {
        let tag = self.tag.clone();
        let ty = self.out.ty;
        ty.write_datum(self.out.cur_mut(), &tag);
    }
}

/// Persistent evaluation state for one (group, column) pair.
#[derive(Debug)]
pub struct EvalCtx {
    pub out: OutputCol,
    pub pts_out: Option<TsOutput>,
    pub order: Order,
    pub stage: Stage,
    /// Nominal start timestamp of the query range.
    pub start_ts: i64,
    /// Tag value of the current group, emitted by the tag operators.
    pub tag: Datum,
    pub params: [Param; 4],
    pub tag_ctxs: Vec<TagContext>,
    pub res: ResultInfo,
}

impl EvalCtx {
    pub fn new(out_ty: ScalarType, out_bytes: usize, rows: usize) -> Self {
        Self {
            out: OutputCol::new(out_ty, out_bytes, rows),
            pts_out: None,
            order: Order::Asc,
            stage: Stage::Scan,
            start_ts: 0,
            tag: Datum::Null,
            params: [Param::None; 4],
            tag_ctxs: Vec::new(),
            res: ResultInfo::default(),
        }
    }

    pub fn with_ts_output(mut self, rows: usize) -> Self {
        self.pts_out = Some(TsOutput::new(rows));
        self
    }

    /// Drives every tag context forward with the winning row's timestamp.
    pub fn update_tags(&mut self, ts: Option<i64>) {
        for tag in &mut self.tag_ctxs {
            if tag.is_ts_placeholder {
                if let Some(ts) = ts {
                    tag.tag = Datum::Int(ts);
                }
            }
            tag.emit();
        }
    }

    /// Output semantics rule: only steps that consumed at least one
    /// element may publish a result count.
    pub fn set_val(&mut self, consumed: usize, num_of_res: usize) {
        if consumed > 0 {
            self.res.num_of_res = num_of_res;
        }
    }
}

/// Per-block input binding handed to every hook.
///
/// During merge stages `col` carries the binary intermediate rows and
/// `ts_list` is empty.
#[derive(Debug, Clone)]
pub struct BlockInput<'a> {
    pub size: usize,
    pub col: ColumnView<'a>,
    pub ts_list: &'a [i64],
    pub has_null: bool,
    /// Raw cells present; when false only `pre_agg` may be consulted.
    pub loaded: bool,
    pub pre_agg: PreAgg,
    pub arith: Option<ArithInput<'a>>,
}

impl<'a> BlockInput<'a> {
    pub fn loaded(col: ColumnView<'a>, ts_list: &'a [i64]) -> Self {
        let has_null = (0..col.len()).any(|i| col.is_null(i));
        Self {
            size: col.len(),
            col,
            ts_list,
            has_null,
            loaded: true,
            pre_agg: PreAgg::default(),
            arith: None,
        }
    }

    /// A block whose raw cells were not loaded; only statistics travel.
    pub fn stats_only(col: ColumnView<'a>, ts_list: &'a [i64], pre_agg: PreAgg) -> Self {
        Self {
            size: if ts_list.is_empty() { col.len() } else { ts_list.len() },
            col,
            ts_list,
            has_null: pre_agg.num_null > 0,
            loaded: false,
            pre_agg,
            arith: None,
        }
    }

    /// Binds intermediate rows for a merge stage.
    pub fn intermediate(data: &'a [u8], row_bytes: usize) -> Self {
        let col = ColumnView { ty: ScalarType::Binary(row_bytes), bytes: row_bytes, data };
        Self {
            size: col.len(),
            col,
            ts_list: &[],
            has_null: false,
            loaded: true,
            pre_agg: PreAgg::default(),
            arith: None,
        }
    }
}
