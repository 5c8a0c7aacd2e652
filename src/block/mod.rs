//! Column blocks and their pre-computed statistics.
//!
//! A block is a contiguous run of fixed-width cells for a single column.
//! Blocks arrive either with raw data loaded, or with only the per-block
//! pre-aggregates when the storage layer decided the raw cells were not
//! needed. If [`PreAgg::is_set`] is false consumers must fall back to
//! scanning raw data.

use serde::{Deserialize, Serialize};

use crate::types::{Datum, ScalarType};

/// Borrowed view over one column's cells in a block.
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a> {
    pub ty: ScalarType,
    pub bytes: usize,
    pub data: &'a [u8],
}

impl<'a> ColumnView<'a> {
    pub fn new(ty: ScalarType, data: &'a [u8]) -> Self {
        let bytes = ty.bytes();
        debug_assert!(data.len() % bytes == 0);
        Self { ty, bytes, data }
    }

    /// Number of cells in the view.
    pub fn len(&self) -> usize {
        self.data.len() / self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw bytes of the i-th cell.
    pub fn cell(&self, i: usize) -> &'a [u8] {
        &self.data[i * self.bytes..(i + 1) * self.bytes]
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.ty.is_null(self.cell(i))
    }

    pub fn get_i64(&self, i: usize) -> i64 {
        self.ty.read_i64(self.cell(i))
    }

    pub fn get_f64(&self, i: usize) -> f64 {
        self.ty.read_f64(self.cell(i))
    }

    pub fn get_datum(&self, i: usize) -> Datum {
        self.ty.read_datum(self.cell(i))
    }
}

/// Owned column cells, used to assemble blocks in tests and demos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnData {
    pub ty: ScalarType,
    pub data: Vec<u8>,
}

impl ColumnData {
    pub fn new(ty: ScalarType) -> Self {
        Self { ty, data: Vec::new() }
    }

    pub fn view(&self) -> ColumnView<'_> {
        ColumnView::new(self.ty, &self.data)
    }

    pub fn push(&mut self, value: &Datum) {
        let bytes = self.ty.bytes();
        let start = self.data.len();
        self.data.resize(start + bytes, 0);
        self.ty.write_datum(&mut self.data[start..], value);
    }

    pub fn from_i32s(values: &[Option<i32>]) -> Self {
        let mut col = Self::new(ScalarType::Int);
        for v in values {
            col.push(&v.map_or(Datum::Null, |v| Datum::Int(v as i64)));
        }
        col
    }

    pub fn from_i64s(values: &[Option<i64>]) -> Self {
        let mut col = Self::new(ScalarType::BigInt);
        for v in values {
            col.push(&v.map_or(Datum::Null, Datum::Int));
        }
        col
    }

    pub fn from_f64s(values: &[Option<f64>]) -> Self {
        let mut col = Self::new(ScalarType::Double);
        for v in values {
            col.push(&v.map_or(Datum::Null, Datum::Double));
        }
        col
    }

    pub fn from_f32s(values: &[Option<f32>]) -> Self {
        let mut col = Self::new(ScalarType::Float);
        for v in values {
            col.push(&v.map_or(Datum::Null, |v| Datum::Double(v as f64)));
        }
        col
    }
}

/// Sum accumulator of a pre-aggregate: integer columns keep an exact
/// signed sum, float columns a double sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AggSum {
    Int(i64),
    Float(f64),
}

impl AggSum {
    pub fn as_f64(&self) -> f64 {
        match self {
            AggSum::Int(v) => *v as f64,
            AggSum::Float(v) => *v,
        }
    }
}

/// Per-block pre-computed statistics for one column.
///
/// `min_index`/`max_index` point at the first row that produced each
/// extremum, so selection operators can recover the row timestamp without
/// loading the block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreAgg {
    pub is_set: bool,
    pub num_null: usize,
    pub sum: AggSum,
    pub min: Datum,
    pub max: Datum,
    pub min_index: usize,
    pub max_index: usize,
}

impl Default for PreAgg {
    fn default() -> Self {
        Self {
            is_set: false,
            num_null: 0,
            sum: AggSum::Int(0),
            min: Datum::Null,
            max: Datum::Null,
            min_index: 0,
            max_index: 0,
        }
    }
}

impl PreAgg {
    /// Computes block statistics the way the storage layer would.
    ///
    /// Strings only get a null count; numeric columns get sum/min/max and
    /// extremum indices. Nulls are skipped everywhere.
    pub fn compute(col: &ColumnView<'_>) -> Self {
        let mut agg = PreAgg {
            is_set: true,
            ..PreAgg::default()
        };

        if !col.ty.is_numeric() && col.ty != ScalarType::Bool {
            for i in 0..col.len() {
                if col.is_null(i) {
                    agg.num_null += 1;
                }
            }
            return agg;
        }

        if col.ty.is_float() {
            // infinite seeds: a finite value can never tie the strict compare
            let (mut sum, mut min, mut max) = (0.0f64, f64::INFINITY, f64::NEG_INFINITY);
            for i in 0..col.len() {
                if col.is_null(i) {
                    agg.num_null += 1;
                    continue;
                }
                let v = col.get_f64(i);
                sum += v;
                if v < min {
                    min = v;
                    agg.min_index = i;
                }
                if v > max {
                    max = v;
                    agg.max_index = i;
                }
            }
            agg.sum = AggSum::Float(sum);
            if agg.num_null < col.len() {
                agg.min = Datum::Double(min);
                agg.max = Datum::Double(max);
            }
        } else {
            let (mut sum, mut min, mut max) = (0i64, i64::MAX, i64::MIN);
            for i in 0..col.len() {
                if col.is_null(i) {
                    agg.num_null += 1;
                    continue;
                }
                let v = col.get_i64(i);
                sum += v;
                if v < min {
                    min = v;
                    agg.min_index = i;
                }
                if v > max {
                    max = v;
                    agg.max_index = i;
                }
            }
            agg.sum = AggSum::Int(sum);
            if agg.num_null < col.len() {
                agg.min = Datum::Int(min);
                agg.max = Datum::Int(max);
            }
        }

        agg
    }
}
