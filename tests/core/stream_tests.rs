//! Tests for chunked processing and mergeable statistics

use quadtune::stream::{chunked_stats, fold_chunks, for_each_chunk, par_chunked_stats, safe_div, RunningStats};

#[test]
fn test_chunks_are_sequential_with_offsets() {
    let rows: Vec<u32> = (0..25).collect();
    let infos = for_each_chunk(&rows, 10, |chunk, info| (info.index, info.start_offset, chunk.len()));
    assert_eq!(infos, vec![(0, 0, 10), (1, 10, 10), (2, 20, 5)]);
}

#[test]
fn test_zero_chunk_size_is_one() {
    let rows = [1.0, 2.0, 3.0];
    assert_eq!(for_each_chunk(&rows, 0, |c, _| c.len()), vec![1, 1, 1]);
}

#[test]
fn test_fold_chunks_sum() {
    let rows: Vec<f64> = (1..=100).map(|v| v as f64).collect();
    let total = fold_chunks(&rows, 7, 0.0, |c, _| c.iter().sum::<f64>(), |a, b| a + b);
    assert_eq!(total, 5050.0);
}

#[test]
fn test_chunked_stats_match_single_pass() {
    let values: Vec<f64> = (0..5000).map(|i| ((i * 37) % 101) as f64 - 50.0).collect();
    let whole = RunningStats::from_slice(&values);

    for chunk_size in [1, 500, 1000, 2000, 9999] {
        let chunked = chunked_stats(&values, chunk_size);
        assert_eq!(chunked.count, whole.count);
        assert!((chunked.mean() - whole.mean()).abs() < 1e-9);
        assert!((chunked.rms() - whole.rms()).abs() < 1e-9);
        assert!((chunked.variance() - whole.variance()).abs() < 1e-6);
        assert_eq!(chunked.max_abs(), whole.max_abs());
    }

    let parallel = par_chunked_stats(&values, 512);
    assert!((parallel.rms() - whole.rms()).abs() < 1e-9);
}

#[test]
fn test_empty_stats_are_zero() {
    let stats = RunningStats::new();
    assert_eq!(stats.mean(), 0.0);
    assert_eq!(stats.rms(), 0.0);
    assert_eq!(stats.variance(), 0.0);
    assert_eq!(stats.min(), 0.0);
    assert_eq!(stats.max_abs(), 0.0);
    assert_eq!(safe_div(1.0, 0.0), 0.0);
}
