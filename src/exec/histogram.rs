//! Bounded-bin histogram backing the approximate percentile operator.
//!
//! At most [`MAX_HISTOGRAM_BIN`] value/count bins are kept, sorted by
//! value; when an insert would exceed the cap, the two closest adjacent
//! bins coalesce into their weighted mean. The encoded form is part of
//! the cross-node intermediate contract, so the layout is fixed:
//! `[8B reserved][4B entries][4B pad][8B elems][501 × (8B value, 8B count)]`.

/// Upper bound on the number of histogram bins.
pub const MAX_HISTOGRAM_BIN: usize = 500;

/// Encoded size of a histogram intermediate.
pub const HISTOGRAM_BYTES: usize = 8 + 16 + (MAX_HISTOGRAM_BIN + 1) * 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistBin {
    pub val: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Histogram {
    bins: Vec<HistBin>,
    num_elems: i64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_elems == 0
    }

    pub fn num_elems(&self) -> i64 {
        self.num_elems
    }

    pub fn add(&mut self, v: f64) {
        match self.bins.binary_search_by(|b| b.val.partial_cmp(&v).unwrap()) {
            Ok(i) => self.bins[i].count += 1,
            Err(i) => {
                self.bins.insert(i, HistBin { val: v, count: 1 });
                if self.bins.len() > MAX_HISTOGRAM_BIN {
                    self.coalesce_closest();
                }
            }
        }
        self.num_elems += 1;
    }

    /// Merges another histogram in; the result stays within the bin cap.
    pub fn merge(&mut self, other: &Histogram) {
        if other.num_elems == 0 {
            return;
        }
        if self.num_elems == 0 {
            *self = other.clone();
            return;
        }

        let mut merged = Vec::with_capacity(self.bins.len() + other.bins.len());
        let (mut a, mut b) = (self.bins.iter().peekable(), other.bins.iter().peekable());
        while let (Some(&x), Some(&y)) = (a.peek(), b.peek()) {
            if x.val <= y.val {
                push_bin(&mut merged, *x);
                a.next();
            } else {
                push_bin(&mut merged, *y);
                b.next();
            }
        }
        for x in a {
            push_bin(&mut merged, *x);
        }
        for y in b {
            push_bin(&mut merged, *y);
        }

        self.bins = merged;
        self.num_elems += other.num_elems;
        while self.bins.len() > MAX_HISTOGRAM_BIN {
            self.coalesce_closest();
        }
    }

    /// Approximate percentile for `ratio` in 0..=100, interpolating on the
    /// cumulative bin counts.
    pub fn uniform(&self, ratio: f64) -> f64 {
        assert!(self.num_elems > 0);
        let target = self.num_elems as f64 * ratio.clamp(0.0, 100.0) / 100.0;

        let mut cum = 0.0;
        for (i, bin) in self.bins.iter().enumerate() {
            let next = cum + bin.count as f64;
            if target <= next {
                if i == 0 || target >= cum + bin.count as f64 / 2.0 {
                    return bin.val;
                }
                // interpolate between the previous bin center and this one
                let prev = &self.bins[i - 1];
                let span = bin.count as f64 / 2.0 + prev.count as f64 / 2.0;
                let frac = (target - (cum - prev.count as f64 / 2.0)) / span;
                return prev.val + (bin.val - prev.val) * frac.clamp(0.0, 1.0);
            }
            cum = next;
        }
        self.bins.last().unwrap().val
    }

    fn coalesce_closest(&mut self) {
        let mut best = 0;
        let mut gap = f64::MAX;
        for i in 0..self.bins.len() - 1 {
            let d = self.bins[i + 1].val - self.bins[i].val;
            if d < gap {
                gap = d;
                best = i;
            }
        }
        let hi = self.bins.remove(best + 1);
        let lo = &mut self.bins[best];
        let total = lo.count + hi.count;
        lo.val = (lo.val * lo.count as f64 + hi.val * hi.count as f64) / total as f64;
        lo.count = total;
    }

    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HISTOGRAM_BYTES);
        out[..HISTOGRAM_BYTES].fill(0);
        out[8..12].copy_from_slice(&(self.bins.len() as u32).to_le_bytes());
        out[16..24].copy_from_slice(&self.num_elems.to_le_bytes());
        let mut off = 24;
        for bin in &self.bins {
            out[off..off + 8].copy_from_slice(&bin.val.to_le_bytes());
            out[off + 8..off + 16].copy_from_slice(&bin.count.to_le_bytes());
            off += 16;
        }
    }

    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= HISTOGRAM_BYTES);
        let entries = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        let num_elems = i64::from_le_bytes(data[16..24].try_into().unwrap());
        let mut bins = Vec::with_capacity(entries.min(MAX_HISTOGRAM_BIN + 1));
        let mut off = 24;
        for _ in 0..entries.min(MAX_HISTOGRAM_BIN + 1) {
            let val = f64::from_le_bytes(data[off..off + 8].try_into().unwrap());
            let count = i64::from_le_bytes(data[off + 8..off + 16].try_into().unwrap());
            bins.push(HistBin { val, count });
            off += 16;
        }
        Self { bins, num_elems }
    }
}

fn push_bin(bins: &mut Vec<HistBin>, bin: HistBin) {
    if let Some(last) = bins.last_mut() {
        if last.val == bin.val {
            last.count += bin.count;
            return;
        }
    }
    bins.push(bin);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_uniform_exact() {
        let mut h = Histogram::new();
        for v in 1..=100 {
            h.add(v as f64);
        }
        assert_eq!(h.len(), 100);
        let median = h.uniform(50.0);
        assert!((median - 50.0).abs() <= 1.0, "median {median}");
    }

    #[test]
    fn test_bin_cap_enforced() {
        let mut h = Histogram::new();
        for v in 0..2000 {
            h.add(v as f64);
        }
        assert!(h.len() <= MAX_HISTOGRAM_BIN);
        assert_eq!(h.num_elems(), 2000);
        let p90 = h.uniform(90.0);
        assert!((p90 - 1800.0).abs() < 40.0, "p90 {p90}");
    }

    #[test]
    fn test_merge_matches_union() {
        let mut a = Histogram::new();
        let mut b = Histogram::new();
        let mut whole = Histogram::new();
        for v in 0..500 {
            a.add(v as f64);
            whole.add(v as f64);
        }
        for v in 500..1000 {
            b.add(v as f64);
            whole.add(v as f64);
        }
        a.merge(&b);
        assert_eq!(a.num_elems(), whole.num_elems());
        assert!((a.uniform(50.0) - whole.uniform(50.0)).abs() < 20.0);
    }

    #[test]
    fn test_merge_into_empty_copies() {
        let mut a = Histogram::new();
        let mut b = Histogram::new();
        b.add(7.0);
        b.add(9.0);
        a.merge(&b);
        assert_eq!(a.num_elems(), 2);
        assert_eq!(a.uniform(100.0), 9.0);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut h = Histogram::new();
        for v in [3.0, 1.0, 4.0, 1.0, 5.0] {
            h.add(v);
        }
        let mut buf = vec![0u8; HISTOGRAM_BYTES];
        h.encode(&mut buf);
        let back = Histogram::decode(&buf);
        assert_eq!(back.num_elems(), 5);
        assert_eq!(back.len(), h.len());
        assert_eq!(back.uniform(50.0), h.uniform(50.0));
    }
}
