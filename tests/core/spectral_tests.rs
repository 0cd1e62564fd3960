//! Tests for the spectral engine

use crate::common::synthetic;
use quadtune::analysis::spectral::{
    analyze, classify_noise, cluster_frequencies, fft, find_dominant_peaks, hann_window, noise_width,
    NoiseClass, Peak, SpectralOptions,
};

#[test]
fn test_hann_window_endpoints() {
    let w = hann_window(&[1.0; 9]);
    assert!(w[0].abs() < 1e-12);
    assert!(w[8].abs() < 1e-12);
    assert!((w[4] - 1.0).abs() < 1e-12);
}

#[test]
fn test_fft_amplitude_normalization() {
    // 100 Hz on an exact bin, no window: magnitude equals the amplitude
    let fs = 1024.0;
    let data = synthetic::sine(100.0, 7.0, fs, 1024);
    let spectrum = fft(&data, 1024, fs);

    assert_eq!(spectrum.len(), 512);
    assert!((spectrum.resolution() - 1.0).abs() < 1e-12);
    assert!((spectrum.magnitude_at(100.0) - 7.0).abs() < 1e-6);
    assert!(spectrum.points.windows(2).all(|w| w[1].frequency > w[0].frequency));
}

#[test]
fn test_short_segment_is_zero_padded() {
    let spectrum = fft(&[1.0, 2.0, 3.0], 1000, 1000.0);
    assert_eq!(spectrum.fft_size, 1024);
    assert_eq!(spectrum.len(), 512);
}

#[test]
fn test_scenario_a_dominant_peak_at_80hz() {
    let fs = 3200.0;
    let data = synthetic::sine(80.0, 50.0, fs, 1024);
    let spectrum = fft(&hann_window(&data), 1024, fs);
    let peaks = find_dominant_peaks(&spectrum, 0.01, 5);

    assert!(!peaks.is_empty());
    assert!((peaks[0].frequency - 80.0).abs() <= fs / 1024.0, "top peak at {}", peaks[0].frequency);
    assert!(peaks.windows(2).all(|w| w[0].magnitude >= w[1].magnitude));
}

#[test]
fn test_peaks_respect_threshold_and_cap() {
    let fs = 2048.0;
    let data = synthetic::add(
        &synthetic::add(&synthetic::sine(100.0, 10.0, fs, 2048), &synthetic::sine(300.0, 5.0, fs, 2048)),
        &synthetic::sine(500.0, 0.001, fs, 2048),
    );
    let spectrum = fft(&data, 2048, fs);

    let peaks = find_dominant_peaks(&spectrum, 0.01, 5);
    assert!(peaks.iter().all(|p| (p.frequency - 500.0).abs() > 2.0));
    assert_eq!(find_dominant_peaks(&spectrum, 0.01, 1).len(), 1);
}

#[test]
fn test_cluster_frequencies_tracks_occurrence() {
    let peak = |frequency: f64, magnitude: f64| Peak {
        bin: 0,
        frequency,
        magnitude,
    };
    let segments = vec![
        vec![peak(100.0, 1.0), peak(200.0, 5.0)],
        vec![peak(101.0, 1.0)],
        vec![peak(99.5, 1.0), peak(350.0, 2.0)],
        vec![],
    ];
    let clusters = cluster_frequencies(&segments, 2.0);

    assert_eq!(clusters.len(), 3);
    assert!((clusters[0].frequency - 100.17).abs() < 0.01);
    assert!((clusters[0].occurrence_rate - 0.75).abs() < 1e-12);
    // Single-segment clusters ranked by magnitude
    assert_eq!(clusters[1].frequency, 200.0);
    assert!((clusters[2].occurrence_rate - 0.25).abs() < 1e-12);
}

#[test]
fn test_noise_width_and_classification() {
    let fs = 1024.0;
    let data = synthetic::sine(200.0, 10.0, fs, 1024);
    let spectrum = fft(&hann_window(&data), 1024, fs);
    let bin = spectrum.bin_of(200.0).expect("bin in range");

    let width = noise_width(&spectrum, bin);
    assert!(width > 0.0 && width < 2.0, "width {}", width);
    assert_eq!(classify_noise(width, 0.9), NoiseClass::NarrowbandStable);
    assert_eq!(classify_noise(8.0, 0.7), NoiseClass::MediumbandStable);
    assert_eq!(classify_noise(25.0, 0.9), NoiseClass::WidebandOrUnstable);
    assert_eq!(classify_noise(15.0, 0.5), NoiseClass::Standard);
    assert_eq!(NoiseClass::WidebandOrUnstable.q_factor(), 120);
}

#[test]
fn test_multi_segment_analysis_finds_stable_tone() {
    let fs = 3200.0;
    let n = 8192;
    let data = synthetic::add(&synthetic::sine(180.0, 20.0, fs, n), &synthetic::noise(1.0, n, 3));
    let analysis = analyze(&data, fs, &SpectralOptions::default());

    assert_eq!(analysis.segment_count, 8);
    let top = analysis.dominant.first().expect("dominant frequency");
    assert!((top.frequency - 180.0).abs() < 4.0);
    assert!((top.occurrence_rate - 1.0).abs() < 1e-12);
    assert!(analysis.noise_floor > 0.0);
}

#[test]
fn test_empty_signal_analysis() {
    let analysis = analyze(&[], 3200.0, &SpectralOptions::default());
    assert_eq!(analysis.segment_count, 0);
    assert!(analysis.dominant.is_empty());
}
