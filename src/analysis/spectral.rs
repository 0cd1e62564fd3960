//! Spectral analysis: windowing, FFT, peak picking and frequency clustering.
//!
//! A long signal is split into non-overlapping FFT windows; each window is
//! analyzed on its own and the peaks are clustered across windows, so a
//! resonance has to show up repeatedly to rank highly. Short signals are the
//! degenerate single-window case, zero-padded to the FFT size.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;
use std::f64::consts::PI;

use crate::stream::safe_div;

/// One FFT bin
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpectrumPoint {
    pub frequency: f64,
    pub magnitude: f64,
}

/// Single-sided amplitude spectrum, bins `[0, fft_size/2)`
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Spectrum {
    pub points: Vec<SpectrumPoint>,
    pub sample_rate: f64,
    pub fft_size: usize,
}

impl Spectrum {
    /// Frequency step between bins
    pub fn resolution(&self) -> f64 {
        safe_div(self.sample_rate, self.fft_size as f64)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index of the bin closest to `frequency`
    pub fn bin_of(&self, frequency: f64) -> Option<usize> {
        if self.points.is_empty() || self.resolution() <= 0.0 {
            return None;
        }
        let bin = (frequency / self.resolution()).round();
        if bin < 0.0 {
            return None;
        }
        Some((bin as usize).min(self.points.len() - 1))
    }

    /// Magnitude of the bin closest to `frequency` (0 when empty)
    pub fn magnitude_at(&self, frequency: f64) -> f64 {
        self.bin_of(frequency)
            .map(|b| self.points[b].magnitude)
            .unwrap_or(0.0)
    }

    /// Sum of squared magnitudes over `[low_hz, high_hz)`
    pub fn band_energy(&self, low_hz: f64, high_hz: f64) -> f64 {
        self.points
            .iter()
            .filter(|p| p.frequency >= low_hz && p.frequency < high_hz)
            .map(|p| p.magnitude * p.magnitude)
            .sum()
    }

    /// Median bin magnitude, skipping DC
    pub fn noise_floor(&self) -> f64 {
        let mut mags: Vec<f64> = self.points.iter().skip(1).map(|p| p.magnitude).collect();
        if mags.is_empty() {
            return 0.0;
        }
        mags.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        mags[mags.len() / 2]
    }

    /// Bin-wise mean of spectra that share the same size and sample rate
    pub fn average(spectra: &[Spectrum]) -> Spectrum {
        let Some(first) = spectra.first() else {
            return Spectrum::default();
        };

        let mut points = first.points.clone();
        for spectrum in &spectra[1..] {
            for (acc, p) in points.iter_mut().zip(&spectrum.points) {
                acc.magnitude += p.magnitude;
            }
        }
        let n = spectra.len() as f64;
        for p in &mut points {
            p.magnitude /= n;
        }

        Spectrum {
            points,
            sample_rate: first.sample_rate,
            fft_size: first.fft_size,
        }
    }
}

/// Elementwise Hann window: `0.5 * (1 - cos(2*pi*i/(N-1)))`
pub fn hann_window(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n < 2 {
        return samples.to_vec();
    }
    let denom = (n - 1) as f64;
    samples
        .iter()
        .enumerate()
        .map(|(i, &x)| x * 0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos()))
        .collect()
}

/// Amplitude spectrum of `samples`.
///
/// `size` is rounded up to a power of two; shorter input is zero-padded and
/// longer input truncated. Magnitudes are `|X[k]| / (size/2)`.
pub fn fft(samples: &[f64], size: usize, sample_rate: f64) -> Spectrum {
    let size = size.max(2).next_power_of_two();

    let mut buffer: Vec<Complex<f64>> = samples
        .iter()
        .take(size)
        .map(|&v| Complex::new(if v.is_finite() { v } else { 0.0 }, 0.0))
        .collect();
    buffer.resize(size, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let plan = planner.plan_fft_forward(size);
    plan.process(&mut buffer);

    let half = size / 2;
    let resolution = sample_rate / size as f64;
    let points = buffer
        .iter()
        .take(half)
        .enumerate()
        .map(|(k, c)| SpectrumPoint {
            frequency: k as f64 * resolution,
            magnitude: c.norm() / half as f64,
        })
        .collect();

    Spectrum {
        points,
        sample_rate,
        fft_size: size,
    }
}

/// Magnitude and phase of a single frequency, by direct DFT over `samples`.
///
/// Magnitude uses the same `2/N` amplitude normalization as [`fft`].
pub fn dft_bin(samples: &[f64], frequency: f64, sample_rate: f64) -> (f64, f64) {
    if samples.is_empty() || sample_rate <= 0.0 {
        return (0.0, 0.0);
    }
    let w = 2.0 * PI * frequency / sample_rate;
    let (re, im) = samples
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(re, im), (n, &x)| {
            let angle = w * n as f64;
            (re + x * angle.cos(), im - x * angle.sin())
        });
    let magnitude = 2.0 * (re * re + im * im).sqrt() / samples.len() as f64;
    (magnitude, im.atan2(re))
}

/// Local maximum of a spectrum
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Peak {
    pub bin: usize,
    pub frequency: f64,
    pub magnitude: f64,
}

/// Bins strictly greater than both neighbours and above `threshold`,
/// strongest first, at most `max_peaks`.
pub fn find_dominant_peaks(spectrum: &Spectrum, threshold: f64, max_peaks: usize) -> Vec<Peak> {
    let pts = &spectrum.points;
    if pts.len() < 3 {
        return vec![];
    }

    let mut peaks: Vec<Peak> = (1..pts.len() - 1)
        .filter(|&i| {
            let m = pts[i].magnitude;
            m > threshold && m > pts[i - 1].magnitude && m > pts[i + 1].magnitude
        })
        .map(|i| Peak {
            bin: i,
            frequency: pts[i].frequency,
            magnitude: pts[i].magnitude,
        })
        .collect();

    peaks.sort_by(|a, b| {
        b.magnitude
            .partial_cmp(&a.magnitude)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    peaks.truncate(max_peaks);
    peaks
}

/// A frequency that recurs across analysis segments
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DominantFrequency {
    pub frequency: f64,
    pub magnitude: f64,
    /// Fraction of segments the frequency appeared in, in [0, 1]
    pub occurrence_rate: f64,
}

#[derive(Clone, Debug)]
struct Cluster {
    frequency: f64,
    weight_sum: f64,
    magnitude_sum: f64,
    hits: usize,
    last_segment: Option<usize>,
    segments: usize,
}

/// Greedy online clustering of per-segment peaks.
///
/// Each peak joins the nearest cluster within `tolerance_hz` (the cluster
/// frequency becomes the magnitude-weighted running mean) or opens a new one.
/// Clusters are ranked by occurrence, then magnitude.
pub fn cluster_frequencies(peaks_per_segment: &[Vec<Peak>], tolerance_hz: f64) -> Vec<DominantFrequency> {
    let segment_count = peaks_per_segment.len();
    let mut clusters: Vec<Cluster> = Vec::new();

    for (segment, peaks) in peaks_per_segment.iter().enumerate() {
        for peak in peaks {
            let nearest = clusters
                .iter()
                .enumerate()
                .map(|(i, c)| (i, (c.frequency - peak.frequency).abs()))
                .filter(|(_, d)| *d <= tolerance_hz)
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);

            match nearest {
                Some(i) => {
                    let cluster = &mut clusters[i];
                    let w = peak.magnitude.max(f64::EPSILON);
                    cluster.frequency = (cluster.frequency * cluster.weight_sum + peak.frequency * w)
                        / (cluster.weight_sum + w);
                    cluster.weight_sum += w;
                    cluster.magnitude_sum += peak.magnitude;
                    cluster.hits += 1;
                    if cluster.last_segment != Some(segment) {
                        cluster.segments += 1;
                        cluster.last_segment = Some(segment);
                    }
                }
                None => clusters.push(Cluster {
                    frequency: peak.frequency,
                    weight_sum: peak.magnitude.max(f64::EPSILON),
                    magnitude_sum: peak.magnitude,
                    hits: 1,
                    last_segment: Some(segment),
                    segments: 1,
                }),
            }
        }
    }

    let mut result: Vec<(usize, DominantFrequency)> = clusters
        .into_iter()
        .map(|c| {
            (
                c.segments,
                DominantFrequency {
                    frequency: c.frequency,
                    magnitude: safe_div(c.magnitude_sum, c.hits as f64),
                    occurrence_rate: safe_div(c.segments as f64, segment_count as f64).min(1.0),
                },
            )
        })
        .collect();

    result.sort_by(|a, b| {
        b.0.cmp(&a.0).then(
            b.1.magnitude
                .partial_cmp(&a.1.magnitude)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    result.into_iter().map(|(_, d)| d).collect()
}

/// Half-width (Hz) of the region around `peak_bin` that stays at or above
/// 70.7% (-3 dB) of the peak magnitude. Crossings are linearly interpolated.
pub fn noise_width(spectrum: &Spectrum, peak_bin: usize) -> f64 {
    let pts = &spectrum.points;
    if peak_bin >= pts.len() {
        return 0.0;
    }
    let level = pts[peak_bin].magnitude * std::f64::consts::FRAC_1_SQRT_2;
    if level <= 0.0 {
        return 0.0;
    }

    let crossing = |inside: usize, outside: usize| -> f64 {
        let (mi, mo) = (pts[inside].magnitude, pts[outside].magnitude);
        let frac = safe_div(mi - level, mi - mo).clamp(0.0, 1.0);
        pts[inside].frequency + (pts[outside].frequency - pts[inside].frequency) * frac
    };

    let mut left = peak_bin;
    while left > 0 && pts[left - 1].magnitude >= level {
        left -= 1;
    }
    let low = if left > 0 {
        crossing(left, left - 1)
    } else {
        pts[0].frequency
    };

    let mut right = peak_bin;
    while right + 1 < pts.len() && pts[right + 1].magnitude >= level {
        right += 1;
    }
    let high = if right + 1 < pts.len() {
        crossing(right, right + 1)
    } else {
        pts[right].frequency
    };

    (high - low) / 2.0
}

/// Noise character of a peak, with the notch Q suited to it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NoiseClass {
    NarrowbandStable,
    MediumbandStable,
    WidebandOrUnstable,
    Standard,
}

impl NoiseClass {
    pub fn q_factor(self) -> u32 {
        match self {
            NoiseClass::NarrowbandStable => 500,
            NoiseClass::MediumbandStable => 300,
            NoiseClass::WidebandOrUnstable => 120,
            NoiseClass::Standard => 250,
        }
    }
}

/// Fixed classification policy on peak half-width (Hz) and stability in [0, 1]
pub fn classify_noise(width_hz: f64, stability: f64) -> NoiseClass {
    if width_hz < 5.0 && stability > 0.8 {
        NoiseClass::NarrowbandStable
    } else if width_hz < 10.0 && stability > 0.6 {
        NoiseClass::MediumbandStable
    } else if width_hz > 20.0 || stability < 0.4 {
        NoiseClass::WidebandOrUnstable
    } else {
        NoiseClass::Standard
    }
}

/// A characterized noise peak
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NoisePeak {
    pub frequency: f64,
    pub magnitude: f64,
    pub width_hz: f64,
    pub stability: f64,
    pub class: NoiseClass,
    pub q: u32,
}

/// Parameters for [`analyze`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralOptions {
    pub fft_size: usize,
    pub max_segments: usize,
    pub peak_threshold: f64,
    pub max_peaks: usize,
    pub cluster_tolerance_hz: f64,
}

impl Default for SpectralOptions {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            max_segments: 16,
            peak_threshold: 0.01,
            max_peaks: 5,
            cluster_tolerance_hz: 2.0,
        }
    }
}

impl From<&crate::config::AnalysisConfig> for SpectralOptions {
    fn from(cfg: &crate::config::AnalysisConfig) -> Self {
        Self {
            fft_size: cfg.fft_size(),
            max_segments: cfg.max_segments.max(1),
            peak_threshold: cfg.peak_threshold,
            max_peaks: cfg.max_peaks,
            cluster_tolerance_hz: cfg.cluster_tolerance_hz,
        }
    }
}

/// Result of a (possibly multi-segment) spectral analysis
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SpectralAnalysis {
    /// Segment-averaged spectrum
    #[serde(skip)]
    pub spectrum: Spectrum,
    pub segment_count: usize,
    pub dominant: Vec<DominantFrequency>,
    pub noise_floor: f64,
    pub noise_peaks: Vec<NoisePeak>,
}

impl SpectralAnalysis {
    pub fn dominant_frequencies(&self) -> Vec<f64> {
        self.dominant.iter().map(|d| d.frequency).collect()
    }
}

/// Start offsets of up to `max_segments` evenly spread, non-overlapping windows
pub fn segment_starts(len: usize, fft_size: usize, max_segments: usize) -> Vec<usize> {
    if len <= fft_size {
        return vec![0];
    }
    let available = len / fft_size;
    let count = available.min(max_segments.max(1));
    if count <= 1 {
        return vec![0];
    }
    let stride = (len - fft_size) / (count - 1);
    (0..count).map(|k| k * stride).collect()
}

/// Multi-segment spectral analysis of one signal
pub fn analyze(samples: &[f64], sample_rate: f64, opts: &SpectralOptions) -> SpectralAnalysis {
    if samples.is_empty() || sample_rate <= 0.0 {
        return SpectralAnalysis::default();
    }

    let fft_size = opts.fft_size.max(16).next_power_of_two();
    let starts = segment_starts(samples.len(), fft_size, opts.max_segments);

    let mut spectra = Vec::with_capacity(starts.len());
    let mut peaks_per_segment = Vec::with_capacity(starts.len());

    for &start in &starts {
        let end = (start + fft_size).min(samples.len());
        let segment = &samples[start..end];
        let seg_mean = crate::stream::mean(segment);
        let centered: Vec<f64> = segment.iter().map(|v| v - seg_mean).collect();
        let spectrum = fft(&hann_window(&centered), fft_size, sample_rate);
        peaks_per_segment.push(find_dominant_peaks(
            &spectrum,
            opts.peak_threshold,
            opts.max_peaks,
        ));
        spectra.push(spectrum);
    }

    let spectrum = Spectrum::average(&spectra);
    let dominant = cluster_frequencies(&peaks_per_segment, opts.cluster_tolerance_hz);

    let noise_peaks = dominant
        .iter()
        .filter_map(|d| {
            let bin = spectrum.bin_of(d.frequency)?;
            let width_hz = noise_width(&spectrum, bin);
            let class = classify_noise(width_hz, d.occurrence_rate);
            Some(NoisePeak {
                frequency: d.frequency,
                magnitude: d.magnitude,
                width_hz,
                stability: d.occurrence_rate,
                class,
                q: class.q_factor(),
            })
        })
        .collect();

    tracing::trace!(
        "Spectral analysis: {} samples, {} segments, {} dominant frequencies",
        samples.len(),
        starts.len(),
        dominant.len()
    );

    SpectralAnalysis {
        noise_floor: spectrum.noise_floor(),
        spectrum,
        segment_count: starts.len(),
        dominant,
        noise_peaks,
    }
}
