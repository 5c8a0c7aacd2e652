//! The operator registry.
//!
//! A fixed table of 28 descriptors keyed by [`FuncId`]. The numbering is
//! stable: intermediate buffers are exchanged between nodes by operator
//! id, so reordering entries is a wire-format break. The same applies to
//! the intermediate sizes computed by [`result_data_info`].

use tracing::error;

use crate::exec::histogram::HISTOGRAM_BYTES;
use crate::exec::ops::{self, Aggregator};
use crate::exec::ExecError;
use crate::types::ScalarType;

/// Single-output operator.
pub const FUNCSTATE_SO: u32 = 0x01;
/// Multi-output operator.
pub const FUNCSTATE_MO: u32 = 0x02;
/// Supports streaming evaluation.
pub const FUNCSTATE_STREAM: u32 = 0x04;
/// Applicable to super-table queries.
pub const FUNCSTATE_METRIC: u32 = 0x08;
/// Requires the primary timestamp column.
pub const FUNCSTATE_NEED_TS: u32 = 0x10;
/// Selecting operator; may trigger tag-column copying.
pub const FUNCSTATE_SELECTIVITY: u32 = 0x20;

pub const BASE_FUNC_SO: u32 = FUNCSTATE_SO | FUNCSTATE_STREAM | FUNCSTATE_METRIC;
pub const BASE_FUNC_MO: u32 = FUNCSTATE_MO | FUNCSTATE_STREAM | FUNCSTATE_METRIC;

/// Result-cell header charged to pass-through intermediates.
pub const RESULT_CELL_HEADER: usize = 16;
/// `[8B sum union][1B has-result]`.
pub const SUM_INTER_BYTES: usize = 9;
/// `[8B f64 sum][8B i64 count]`.
pub const AVG_INTER_BYTES: usize = 16;
/// `[8B f64 min][8B f64 max][1B has-result]`.
pub const SPREAD_INTER_BYTES: usize = 17;
/// `[3×8B keys][8B last value][8B sum][1B family][1B has-result]`.
pub const TWA_INTER_BYTES: usize = 42;
/// `[8B avg][8B count][8B sum of squares][1B stage]`.
pub const STDDEV_INTER_BYTES: usize = 25;
/// `[8B timestamp][1B has-result]` appended after the raw value.
pub const FIRSTLAST_TAIL_BYTES: usize = 9;
/// Fixed width of the textual leastsquares result.
pub const LEASTSQUARES_OUTPUT_BYTES: usize = 50;
/// Capacity of the scratch-file path emitted by ts_comp.
pub const TS_COMP_PATH_BYTES: usize = 256;

/// Stable operator numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FuncId {
    Count = 0,
    Sum = 1,
    Avg = 2,
    Min = 3,
    Max = 4,
    Stddev = 5,
    Percentile = 6,
    Apercentile = 7,
    First = 8,
    Last = 9,
    LastRow = 10,
    Top = 11,
    Bottom = 12,
    Spread = 13,
    Twa = 14,
    Leastsquares = 15,
    Ts = 16,
    TsDummy = 17,
    TagDummy = 18,
    TsComp = 19,
    Tag = 20,
    ColProject = 21,
    TagProject = 22,
    Arithmetic = 23,
    Diff = 24,
    FirstDist = 25,
    LastDist = 26,
    Interp = 27,
}

pub const NUM_FUNCS: usize = 28;

impl FuncId {
    pub fn from_index(i: usize) -> Option<FuncId> {
        FUNC_TABLE.get(i).map(|d| d.id)
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        FUNC_TABLE[self.index()].name
    }

    pub fn descriptor(&self) -> &'static Descriptor {
        &FUNC_TABLE[self.index()]
    }
}

/// Construction parameters for one operator instance.
#[derive(Debug, Clone, Copy)]
pub struct OpInit {
    pub data_ty: ScalarType,
    pub data_bytes: usize,
    /// Operator parameter (top/bottom capacity).
    pub param: i64,
    /// Total packed width of the carried tag columns.
    pub tag_len: usize,
    pub super_table: bool,
}

/// One entry of the operator table.
pub struct Descriptor {
    pub name: &'static str,
    pub id: FuncId,
    /// Distributed partner id; `None` for scan-only operators.
    pub dist_id: Option<FuncId>,
    pub caps: u32,
    pub make: fn(&OpInit) -> Box<dyn Aggregator>,
}

impl Descriptor {
    pub fn new_op(&self, init: &OpInit) -> Box<dyn Aggregator> {
        (self.make)(init)
    }

    pub fn needs_ts(&self) -> bool {
        self.caps & FUNCSTATE_NEED_TS != 0
    }

    pub fn is_selectivity(&self) -> bool {
        self.caps & FUNCSTATE_SELECTIVITY != 0
    }

    pub fn super_table_safe(&self) -> bool {
        self.caps & FUNCSTATE_METRIC != 0
    }
}

pub static FUNC_TABLE: [Descriptor; NUM_FUNCS] = [
    Descriptor {
        name: "count",
        id: FuncId::Count,
        dist_id: Some(FuncId::Count),
        caps: BASE_FUNC_SO,
        make: ops::count::make,
    },
    Descriptor {
        name: "sum",
        id: FuncId::Sum,
        dist_id: Some(FuncId::Sum),
        caps: BASE_FUNC_SO,
        make: ops::sum::make,
    },
    Descriptor {
        name: "avg",
        id: FuncId::Avg,
        dist_id: Some(FuncId::Avg),
        caps: BASE_FUNC_SO,
        make: ops::avg::make,
    },
    Descriptor {
        name: "min",
        id: FuncId::Min,
        dist_id: Some(FuncId::Min),
        caps: BASE_FUNC_SO | FUNCSTATE_SELECTIVITY,
        make: ops::minmax::make_min,
    },
    Descriptor {
        name: "max",
        id: FuncId::Max,
        dist_id: Some(FuncId::Max),
        caps: BASE_FUNC_SO | FUNCSTATE_SELECTIVITY,
        make: ops::minmax::make_max,
    },
    Descriptor {
        name: "stddev",
        id: FuncId::Stddev,
        dist_id: None,
        caps: FUNCSTATE_SO | FUNCSTATE_STREAM,
        make: ops::stddev::make,
    },
    Descriptor {
        name: "percentile",
        id: FuncId::Percentile,
        dist_id: None,
        caps: FUNCSTATE_SO | FUNCSTATE_STREAM,
        make: ops::percentile::make,
    },
    Descriptor {
        name: "apercentile",
        id: FuncId::Apercentile,
        dist_id: Some(FuncId::Apercentile),
        caps: FUNCSTATE_SO | FUNCSTATE_STREAM | FUNCSTATE_METRIC,
        make: ops::apercentile::make,
    },
    Descriptor {
        name: "first",
        id: FuncId::First,
        dist_id: Some(FuncId::FirstDist),
        caps: BASE_FUNC_SO | FUNCSTATE_SELECTIVITY,
        make: ops::firstlast::make_first,
    },
    Descriptor {
        name: "last",
        id: FuncId::Last,
        dist_id: Some(FuncId::LastDist),
        caps: BASE_FUNC_SO | FUNCSTATE_SELECTIVITY,
        make: ops::firstlast::make_last,
    },
    Descriptor {
        name: "last_row",
        id: FuncId::LastRow,
        dist_id: Some(FuncId::LastRow),
        caps: FUNCSTATE_SO | FUNCSTATE_METRIC | FUNCSTATE_NEED_TS | FUNCSTATE_SELECTIVITY,
        make: ops::firstlast::make_last_row,
    },
    Descriptor {
        name: "top",
        id: FuncId::Top,
        dist_id: Some(FuncId::Top),
        caps: FUNCSTATE_MO | FUNCSTATE_METRIC | FUNCSTATE_NEED_TS | FUNCSTATE_SELECTIVITY,
        make: ops::topbot::make_top,
    },
    Descriptor {
        name: "bottom",
        id: FuncId::Bottom,
        dist_id: Some(FuncId::Bottom),
        caps: FUNCSTATE_MO | FUNCSTATE_METRIC | FUNCSTATE_NEED_TS | FUNCSTATE_SELECTIVITY,
        make: ops::topbot::make_bottom,
    },
    Descriptor {
        name: "spread",
        id: FuncId::Spread,
        dist_id: Some(FuncId::Spread),
        caps: BASE_FUNC_SO,
        make: ops::spread::make,
    },
    Descriptor {
        name: "twa",
        id: FuncId::Twa,
        dist_id: Some(FuncId::Twa),
        caps: BASE_FUNC_SO | FUNCSTATE_NEED_TS,
        make: ops::twa::make,
    },
    Descriptor {
        name: "leastsquares",
        id: FuncId::Leastsquares,
        dist_id: None,
        caps: FUNCSTATE_SO | FUNCSTATE_STREAM,
        make: ops::leastsquares::make,
    },
    Descriptor {
        name: "ts",
        id: FuncId::Ts,
        dist_id: Some(FuncId::Ts),
        caps: BASE_FUNC_SO | FUNCSTATE_NEED_TS,
        make: ops::project::make_ts,
    },
    Descriptor {
        name: "ts",
        id: FuncId::TsDummy,
        dist_id: Some(FuncId::TsDummy),
        caps: BASE_FUNC_SO | FUNCSTATE_NEED_TS,
        make: ops::project::make_ts_dummy,
    },
    Descriptor {
        name: "tag",
        id: FuncId::TagDummy,
        dist_id: Some(FuncId::TagDummy),
        caps: BASE_FUNC_SO,
        make: ops::project::make_tag_dummy,
    },
    Descriptor {
        name: "ts",
        id: FuncId::TsComp,
        dist_id: Some(FuncId::TsComp),
        caps: FUNCSTATE_MO | FUNCSTATE_NEED_TS,
        make: ops::tscomp::make,
    },
    Descriptor {
        name: "tag",
        id: FuncId::Tag,
        dist_id: Some(FuncId::Tag),
        caps: BASE_FUNC_SO,
        make: ops::project::make_tag,
    },
    Descriptor {
        name: "colprj",
        id: FuncId::ColProject,
        dist_id: Some(FuncId::ColProject),
        caps: BASE_FUNC_MO | FUNCSTATE_NEED_TS,
        make: ops::project::make_colprj,
    },
    Descriptor {
        name: "tagprj",
        id: FuncId::TagProject,
        dist_id: Some(FuncId::TagProject),
        caps: BASE_FUNC_MO,
        make: ops::project::make_tagprj,
    },
    Descriptor {
        name: "arithmetic",
        id: FuncId::Arithmetic,
        dist_id: Some(FuncId::Arithmetic),
        caps: FUNCSTATE_MO | FUNCSTATE_METRIC | FUNCSTATE_NEED_TS,
        make: ops::arith::make,
    },
    Descriptor {
        name: "diff",
        id: FuncId::Diff,
        dist_id: None,
        caps: FUNCSTATE_MO | FUNCSTATE_NEED_TS,
        make: ops::diff::make,
    },
    Descriptor {
        name: "first_dist",
        id: FuncId::FirstDist,
        dist_id: Some(FuncId::FirstDist),
        caps: BASE_FUNC_SO | FUNCSTATE_NEED_TS | FUNCSTATE_SELECTIVITY,
        make: ops::firstlast::make_first_dist,
    },
    Descriptor {
        name: "last_dist",
        id: FuncId::LastDist,
        dist_id: Some(FuncId::LastDist),
        caps: BASE_FUNC_SO | FUNCSTATE_NEED_TS | FUNCSTATE_SELECTIVITY,
        make: ops::firstlast::make_last_dist,
    },
    Descriptor {
        name: "interp",
        id: FuncId::Interp,
        dist_id: Some(FuncId::Interp),
        caps: FUNCSTATE_SO | FUNCSTATE_METRIC | FUNCSTATE_NEED_TS,
        make: ops::interp::make,
    },
];

/// Operator stacking classes: `1` stacks with same-class operators, `-1`
/// must appear alone, `4` is the last_row class, `5` the interp class.
pub const COMPAT: [i32; NUM_FUNCS] = [
    // count..last
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // last_row, top, bottom, spread, twa, leastsquares, ts, ts_dummy, tag_dummy, ts_comp, tag
    4, -1, -1, 1, 1, 1, 1, 1, 1, -1, 1,
    // colprj, tagprj, arithmetic, diff, first_dist, last_dist, interp
    1, 1, 1, -1, 1, 1, 5,
];

/// True when the given operators may appear in one projection list.
pub fn compatible(ids: &[FuncId]) -> bool {
    if ids.len() <= 1 {
        return true;
    }
    let first = COMPAT[ids[0].index()];
    ids.iter().all(|id| {
        let class = COMPAT[id.index()];
        class != -1 && class == first
    })
}

/// Output sizing of one operator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultDataInfo {
    pub out_ty: ScalarType,
    pub out_bytes: usize,
    pub inter_bytes: usize,
}

impl ResultDataInfo {
    fn plain(out_ty: ScalarType, out_bytes: usize, inter_bytes: usize) -> Self {
        Self { out_ty, out_bytes, inter_bytes }
    }

    fn binary(bytes: usize) -> Self {
        Self { out_ty: ScalarType::Binary(bytes), out_bytes: bytes, inter_bytes: bytes }
    }
}

/// Computes (output type, output bytes, intermediate bytes) for one
/// operator over one input column. Downstream serialization depends on
/// these values; change them only together with every consumer.
pub fn result_data_info(
    data_ty: ScalarType,
    data_bytes: usize,
    func: FuncId,
    param: i64,
    tag_len: usize,
    super_table: bool,
) -> Result<ResultDataInfo, ExecError> {
    if !data_ty.is_valid(data_bytes) {
        error!("illegal data type {data_ty:?} or length {data_bytes}");
        return Err(ExecError::InvalidOperand { ty: data_ty, bytes: data_bytes, func: func.name() });
    }

    // pass-through operators keep the input shape
    if matches!(
        func,
        FuncId::Ts
            | FuncId::TsDummy
            | FuncId::TagDummy
            | FuncId::Diff
            | FuncId::ColProject
            | FuncId::TagProject
            | FuncId::Tag
            | FuncId::Interp
    ) {
        return Ok(ResultDataInfo::plain(data_ty, data_bytes, data_bytes + RESULT_CELL_HEADER));
    }

    match func {
        FuncId::Count => return Ok(ResultDataInfo::plain(ScalarType::BigInt, 8, 8)),
        FuncId::Arithmetic => return Ok(ResultDataInfo::plain(ScalarType::Double, 8, 8)),
        FuncId::TsComp => {
            return Ok(ResultDataInfo {
                out_ty: ScalarType::Binary(TS_COMP_PATH_BYTES),
                out_bytes: TS_COMP_PATH_BYTES,
                inter_bytes: 8,
            });
        }
        _ => {}
    }

    if super_table {
        match func {
            FuncId::Min | FuncId::Max => return Ok(ResultDataInfo::binary(data_bytes + 1)),
            FuncId::Sum => return Ok(ResultDataInfo::binary(SUM_INTER_BYTES)),
            FuncId::Avg => return Ok(ResultDataInfo::binary(AVG_INTER_BYTES)),
            FuncId::Top | FuncId::Bottom => {
                let bytes = ops::topbot::inter_bytes(param.max(0) as usize, tag_len);
                return Ok(ResultDataInfo::binary(bytes));
            }
            FuncId::Spread => return Ok(ResultDataInfo::binary(SPREAD_INTER_BYTES)),
            FuncId::Apercentile => return Ok(ResultDataInfo::binary(HISTOGRAM_BYTES)),
            FuncId::LastRow | FuncId::FirstDist | FuncId::LastDist => {
                return Ok(ResultDataInfo::binary(data_bytes + FIRSTLAST_TAIL_BYTES));
            }
            FuncId::Twa => {
                return Ok(ResultDataInfo {
                    out_ty: ScalarType::Double,
                    out_bytes: TWA_INTER_BYTES,
                    inter_bytes: TWA_INTER_BYTES,
                });
            }
            _ => {}
        }
    }

    let info = match func {
        FuncId::Sum => {
            let out_ty = if data_ty.is_integer() { ScalarType::BigInt } else { ScalarType::Double };
            ResultDataInfo::plain(out_ty, 8, SUM_INTER_BYTES)
        }
        FuncId::Apercentile => ResultDataInfo::plain(ScalarType::Double, 8, HISTOGRAM_BYTES),
        FuncId::Twa => ResultDataInfo::plain(ScalarType::Double, 8, TWA_INTER_BYTES),
        FuncId::Avg => ResultDataInfo::plain(ScalarType::Double, 8, AVG_INTER_BYTES),
        FuncId::Stddev => ResultDataInfo::plain(ScalarType::Double, 8, STDDEV_INTER_BYTES),
        FuncId::Min | FuncId::Max => ResultDataInfo::plain(data_ty, data_bytes, data_bytes + 1),
        FuncId::First | FuncId::Last => {
            ResultDataInfo::plain(data_ty, data_bytes, data_bytes + RESULT_CELL_HEADER)
        }
        FuncId::Spread => ResultDataInfo::plain(ScalarType::Double, 8, SPREAD_INTER_BYTES),
        FuncId::Percentile => ResultDataInfo::plain(ScalarType::Double, 8, 8),
        FuncId::Leastsquares => ResultDataInfo::plain(
            ScalarType::Binary(LEASTSQUARES_OUTPUT_BYTES),
            LEASTSQUARES_OUTPUT_BYTES,
            LEASTSQUARES_OUTPUT_BYTES + RESULT_CELL_HEADER,
        ),
        FuncId::FirstDist | FuncId::LastDist => {
            ResultDataInfo::binary(data_bytes + FIRSTLAST_TAIL_BYTES)
        }
        FuncId::Top | FuncId::Bottom => ResultDataInfo {
            out_ty: data_ty,
            out_bytes: data_bytes,
            inter_bytes: ops::topbot::inter_bytes(param.max(0) as usize, tag_len),
        },
        FuncId::LastRow => ResultDataInfo {
            out_ty: data_ty,
            out_bytes: data_bytes,
            inter_bytes: data_bytes + FIRSTLAST_TAIL_BYTES,
        },
        _ => {
            return Err(ExecError::InvalidOperand {
                ty: data_ty,
                bytes: data_bytes,
                func: func.name(),
            });
        }
    };

    Ok(info)
}
