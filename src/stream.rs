//! Chunked processing of long sample arrays.
//!
//! Logs easily run past 100k rows. Statistics are gathered per bounded chunk
//! and combined with explicit merge functions, so the working set of any one
//! step stays small and the partial results can also be reduced in parallel.

use rayon::prelude::*;

/// Position of a chunk within the full slice
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    pub index: usize,
    pub start_offset: usize,
}

/// Run `f` over consecutive chunks, strictly in order, collecting one result per chunk.
///
/// A `chunk_size` of 0 is treated as 1.
pub fn for_each_chunk<R, T, F>(rows: &[R], chunk_size: usize, mut f: F) -> Vec<T>
where
    F: FnMut(&[R], ChunkInfo) -> T,
{
    let chunk_size = chunk_size.max(1);
    rows.chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| {
            tracing::trace!(
                "Processing chunk {} ({} rows at offset {})",
                index,
                chunk.len(),
                index * chunk_size
            );
            f(
                chunk,
                ChunkInfo {
                    index,
                    start_offset: index * chunk_size,
                },
            )
        })
        .collect()
}

/// Compute a partial result per chunk and combine them with `merge`.
pub fn fold_chunks<R, T, F, M>(rows: &[R], chunk_size: usize, init: T, partial: F, merge: M) -> T
where
    F: FnMut(&[R], ChunkInfo) -> T,
    M: Fn(T, T) -> T,
{
    for_each_chunk(rows, chunk_size, partial)
        .into_iter()
        .fold(init, merge)
}

/// Mergeable summary statistics
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunningStats {
    pub count: usize,
    pub sum: f64,
    pub sum_sq: f64,
    pub sum_abs: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            sum_abs: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics over a slice. Non-finite values are skipped.
    pub fn from_slice(values: &[f64]) -> Self {
        let mut stats = Self::new();
        for &v in values {
            stats.push(v);
        }
        stats
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.sum_abs += value.abs();
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Combine two partial summaries. Associative and commutative.
    pub fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            sum_abs: self.sum_abs + other.sum_abs,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> f64 {
        safe_div(self.sum, self.count as f64)
    }

    pub fn mean_abs(&self) -> f64 {
        safe_div(self.sum_abs, self.count as f64)
    }

    pub fn rms(&self) -> f64 {
        safe_div(self.sum_sq, self.count as f64).sqrt()
    }

    /// Population variance
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn max_abs(&self) -> f64 {
        self.min().abs().max(self.max().abs())
    }
}

/// Chunked statistics of a slice, merged sequentially
pub fn chunked_stats(values: &[f64], chunk_size: usize) -> RunningStats {
    fold_chunks(
        values,
        chunk_size,
        RunningStats::new(),
        |chunk, _| RunningStats::from_slice(chunk),
        RunningStats::merge,
    )
}

/// Chunked statistics of a slice, chunks reduced in parallel
pub fn par_chunked_stats(values: &[f64], chunk_size: usize) -> RunningStats {
    values
        .par_chunks(chunk_size.max(1))
        .map(RunningStats::from_slice)
        .reduce(RunningStats::new, RunningStats::merge)
}

/// Division that yields 0 instead of NaN/Inf
#[inline]
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 || !den.is_finite() || !num.is_finite() {
        0.0
    } else {
        num / den
    }
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    safe_div(values.iter().sum(), values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_each_chunk_order_and_offsets() {
        let data: Vec<usize> = (0..2500).collect();
        let infos = for_each_chunk(&data, 1000, |chunk, info| (info, chunk.len(), chunk[0]));

        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].0, ChunkInfo { index: 0, start_offset: 0 });
        assert_eq!(infos[1].0.start_offset, 1000);
        assert_eq!(infos[2].1, 500);
        assert_eq!(infos[2].2, 2000);
    }

    #[test]
    fn test_zero_chunk_size() {
        let data = [1, 2, 3];
        let out = for_each_chunk(&data, 0, |c, _| c.len());
        assert_eq!(out, vec![1, 1, 1]);
    }

    #[test]
    fn test_running_stats_basic() {
        let stats = RunningStats::from_slice(&[1.0, -2.0, 3.0, -4.0]);
        assert_eq!(stats.count, 4);
        assert!((stats.mean() - (-0.5)).abs() < 1e-12);
        assert!((stats.mean_abs() - 2.5).abs() < 1e-12);
        assert!((stats.rms() - (30.0f64 / 4.0).sqrt()).abs() < 1e-12);
        assert_eq!(stats.max_abs(), 4.0);
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let stats = RunningStats::new();
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.rms(), 0.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.min(), 0.0);
        assert_eq!(stats.max(), 0.0);
    }

    #[test]
    fn test_chunked_matches_whole() {
        let data: Vec<f64> = (0..5000).map(|i| ((i as f64) * 0.37).sin() * 40.0).collect();
        let whole = RunningStats::from_slice(&data);
        let chunked = chunked_stats(&data, 700);
        let parallel = par_chunked_stats(&data, 700);

        assert_eq!(whole.count, chunked.count);
        assert!((whole.rms() - chunked.rms()).abs() < 1e-9);
        assert!((whole.variance() - parallel.variance()).abs() < 1e-9);
        assert_eq!(whole.max, parallel.max);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(1.0, 0.0), 0.0);
        assert_eq!(safe_div(f64::NAN, 2.0), 0.0);
        assert_eq!(safe_div(6.0, 3.0), 2.0);
        assert_eq!(mean(&[]), 0.0);
    }
}
