//! Cross-axis coupling analysis.
//!
//! Compares the gyro traces of roll, pitch and yaw pairwise (zero-lag
//! correlation, shared dominant frequencies, phase alignment at the shared
//! frequency), finds resonances common to several axes and works out which
//! axis an oscillation starts on.

use serde::Serialize;
use std::f64::consts::PI;

use super::spectral::{dft_bin, segment_starts, DominantFrequency, SpectralAnalysis};
use crate::columns::Axis;
use crate::stream::{safe_div, RunningStats};

/// Weights of the composite coupling score
const OVERLAP_WEIGHT: f64 = 0.4;
const CORRELATION_WEIGHT: f64 = 0.4;
const PHASE_WEIGHT: f64 = 0.2;

/// Amplitudes within this fraction count as equal; phase lead decides
const AMPLITUDE_TIE: f64 = 0.1;

/// Dominant frequencies per axis that take part in overlap matching
const OVERLAP_FREQUENCIES: usize = 5;

/// An unordered pair of axes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisPair {
    RollPitch,
    RollYaw,
    PitchYaw,
}

impl AxisPair {
    pub const ALL: [AxisPair; 3] = [AxisPair::RollPitch, AxisPair::RollYaw, AxisPair::PitchYaw];

    pub fn axes(self) -> (Axis, Axis) {
        match self {
            AxisPair::RollPitch => (Axis::Roll, Axis::Pitch),
            AxisPair::RollYaw => (Axis::Roll, Axis::Yaw),
            AxisPair::PitchYaw => (Axis::Pitch, Axis::Yaw),
        }
    }
}

/// Zero-lag correlation of the standardized signals, in [-1, 1].
///
/// Signals of different length are compared over the common prefix; a
/// constant signal gives 0.
pub fn normalized_cross_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);

    let sa = RunningStats::from_slice(a);
    let sb = RunningStats::from_slice(b);
    let (std_a, std_b) = (sa.std_dev(), sb.std_dev());
    if std_a <= f64::EPSILON || std_b <= f64::EPSILON {
        return 0.0;
    }
    let (mean_a, mean_b) = (sa.mean(), sb.mean());

    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| ((x - mean_a) / std_a) * ((y - mean_b) / std_b))
        .sum();
    (sum / n as f64).clamp(-1.0, 1.0)
}

/// Phase of two axes at one shared frequency
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PhaseRelation {
    pub frequency_hz: f64,
    /// Phase of the first axis minus the second, wrapped to (-180, 180]
    pub phase_diff_deg: f64,
    /// |cos(phase difference)|: 1 in phase or anti-phase, 0 in quadrature
    pub alignment: f64,
}

/// Wrap an angle in radians to (-pi, pi]
fn wrap_phase(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Phase relation of `a` and `b` at `frequency_hz`
pub fn phase_relation(a: &[f64], b: &[f64], frequency_hz: f64, sample_rate: f64) -> PhaseRelation {
    let n = a.len().min(b.len());
    let (_, phase_a) = dft_bin(&a[..n], frequency_hz, sample_rate);
    let (_, phase_b) = dft_bin(&b[..n], frequency_hz, sample_rate);
    let diff = wrap_phase(phase_a - phase_b);

    PhaseRelation {
        frequency_hz,
        phase_diff_deg: diff.to_degrees(),
        alignment: diff.cos().abs(),
    }
}

/// Fraction of the frequencies in the larger set that have a partner in the
/// other set within `tolerance_hz`. 0 when either set is empty.
pub fn frequency_overlap(freqs_a: &[f64], freqs_b: &[f64], tolerance_hz: f64) -> f64 {
    if freqs_a.is_empty() || freqs_b.is_empty() {
        return 0.0;
    }
    let matched = freqs_a
        .iter()
        .filter(|fa| freqs_b.iter().any(|fb| (*fa - fb).abs() <= tolerance_hz))
        .count();
    safe_div(matched as f64, freqs_a.len().max(freqs_b.len()) as f64).min(1.0)
}

/// Composite coupling score in [0, 1]:
/// `0.4 * overlap + 0.4 * |correlation| + 0.2 * phase alignment`.
pub fn coupling_strength(
    freqs_a: &[f64],
    freqs_b: &[f64],
    correlation: f64,
    phase: Option<&PhaseRelation>,
    tolerance_hz: f64,
) -> f64 {
    let overlap = frequency_overlap(freqs_a, freqs_b, tolerance_hz);
    let alignment = phase.map(|p| p.alignment).unwrap_or(0.0);
    let score = OVERLAP_WEIGHT * overlap
        + CORRELATION_WEIGHT * correlation.abs()
        + PHASE_WEIGHT * alignment;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A resonance seen on two or more axes
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommonHarmonic {
    pub frequency: f64,
    pub axes: Vec<Axis>,
    /// Dominant-frequency magnitude per axis (roll, pitch, yaw), 0 where absent
    pub magnitudes: [f64; 3],
}

impl CommonHarmonic {
    pub fn involves(&self, axis: Axis) -> bool {
        self.axes.contains(&axis)
    }
}

/// Frequencies that cluster within `tolerance_hz` across at least two axes.
///
/// Sorted by number of axes, then total magnitude, strongest first.
pub fn common_harmonics(per_axis: &[Vec<DominantFrequency>; 3], tolerance_hz: f64) -> Vec<CommonHarmonic> {
    let mut groups: Vec<CommonHarmonic> = Vec::new();

    for axis in Axis::ALL {
        for dom in &per_axis[axis.index()] {
            let existing = groups
                .iter()
                .enumerate()
                .filter(|(_, g)| !g.involves(axis))
                .map(|(i, g)| (i, (g.frequency - dom.frequency).abs()))
                .filter(|(_, d)| *d <= tolerance_hz)
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);
            match existing {
                Some(i) => {
                    let group = &mut groups[i];
                    let n = group.axes.len() as f64;
                    group.frequency = (group.frequency * n + dom.frequency) / (n + 1.0);
                    group.axes.push(axis);
                    group.magnitudes[axis.index()] = dom.magnitude;
                }
                None => {
                    let mut magnitudes = [0.0; 3];
                    magnitudes[axis.index()] = dom.magnitude;
                    groups.push(CommonHarmonic {
                        frequency: dom.frequency,
                        axes: vec![axis],
                        magnitudes,
                    });
                }
            }
        }
    }

    groups.retain(|g| g.axes.len() >= 2);
    groups.sort_by(|a, b| {
        let total = |g: &CommonHarmonic| g.magnitudes.iter().sum::<f64>();
        b.axes.len().cmp(&a.axes.len()).then(
            total(b)
                .partial_cmp(&total(a))
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    groups
}

/// Where each common harmonic appeared to start, counted over segments
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OscillationPropagation {
    /// Axis most often identified as the source
    pub source: Option<Axis>,
    /// Times each axis (roll, pitch, yaw) was the source
    pub source_counts: [usize; 3],
    pub events: usize,
}

/// For every common harmonic in every segment, the axis with the largest
/// amplitude at that frequency is the source; near-equal amplitudes go to the
/// axis leading in phase.
pub fn oscillation_propagation(
    signals: &[Option<&[f64]>; 3],
    harmonics: &[CommonHarmonic],
    sample_rate: f64,
    fft_size: usize,
    max_segments: usize,
) -> OscillationPropagation {
    let len = signals.iter().flatten().map(|s| s.len()).min().unwrap_or(0);
    if len == 0 || harmonics.is_empty() || sample_rate <= 0.0 {
        return OscillationPropagation::default();
    }

    let mut source_counts = [0usize; 3];
    let mut events = 0;

    for start in segment_starts(len, fft_size, max_segments) {
        let end = (start + fft_size).min(len);
        for harmonic in harmonics {
            let measured: Vec<(Axis, f64, f64)> = harmonic
                .axes
                .iter()
                .filter_map(|&axis| {
                    let signal = signals[axis.index()]?;
                    let (mag, phase) = dft_bin(&signal[start..end], harmonic.frequency, sample_rate);
                    Some((axis, mag, phase))
                })
                .collect();
            if measured.len() < 2 {
                continue;
            }

            let leader = measured.iter().copied().reduce(|best, cand| {
                let tie = (cand.1 - best.1).abs() <= AMPLITUDE_TIE * best.1.max(cand.1);
                if tie {
                    if wrap_phase(cand.2 - best.2) > 0.0 {
                        cand
                    } else {
                        best
                    }
                } else if cand.1 > best.1 {
                    cand
                } else {
                    best
                }
            });

            if let Some((axis, mag, _)) = leader {
                if mag > 0.0 {
                    source_counts[axis.index()] += 1;
                    events += 1;
                }
            }
        }
    }

    let source = Axis::ALL
        .into_iter()
        .filter(|a| source_counts[a.index()] > 0)
        .max_by_key(|a| (source_counts[a.index()], std::cmp::Reverse(a.index())));

    OscillationPropagation {
        source,
        source_counts,
        events,
    }
}

/// Coupling between two axes
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PairCoupling {
    pub pair: AxisPair,
    pub correlation: f64,
    pub frequency_overlap: f64,
    pub phase: Option<PhaseRelation>,
    pub strength: f64,
    pub strongly_coupled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CrossAxisAnalysis {
    pub pairs: Vec<PairCoupling>,
    pub common_harmonics: Vec<CommonHarmonic>,
    pub propagation: OscillationPropagation,
}

impl CrossAxisAnalysis {
    pub fn coupling(&self, pair: AxisPair) -> Option<&PairCoupling> {
        self.pairs.iter().find(|p| p.pair == pair)
    }

    pub fn source_axis(&self) -> Option<Axis> {
        self.propagation.source
    }
}

/// Parameters for [`analyze_cross_axis`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossAxisOptions {
    pub tolerance_hz: f64,
    pub coupling_threshold: f64,
    pub fft_size: usize,
    pub max_segments: usize,
}

impl Default for CrossAxisOptions {
    fn default() -> Self {
        Self::from(&crate::config::AnalysisConfig::default())
    }
}

impl From<&crate::config::AnalysisConfig> for CrossAxisOptions {
    fn from(cfg: &crate::config::AnalysisConfig) -> Self {
        Self {
            tolerance_hz: cfg.cluster_tolerance_hz,
            coupling_threshold: cfg.coupling_threshold,
            fft_size: cfg.fft_size(),
            max_segments: cfg.max_segments.max(1),
        }
    }
}

/// Pairwise coupling, common harmonics and propagation source for all axes.
///
/// `gyros` and `spectra` are indexed by [`Axis::index`]; an axis missing
/// either is left out of every comparison it would take part in.
pub fn analyze_cross_axis(
    gyros: &[Option<&[f64]>; 3],
    spectra: &[Option<&SpectralAnalysis>; 3],
    sample_rate: f64,
    opts: &CrossAxisOptions,
) -> CrossAxisAnalysis {
    let dominant = |axis: Axis| -> Vec<DominantFrequency> {
        spectra[axis.index()]
            .map(|s| s.dominant.iter().take(OVERLAP_FREQUENCIES).copied().collect())
            .unwrap_or_default()
    };
    let per_axis = [dominant(Axis::Roll), dominant(Axis::Pitch), dominant(Axis::Yaw)];
    let freqs = |axis: Axis| -> Vec<f64> { per_axis[axis.index()].iter().map(|d| d.frequency).collect() };

    let mut pairs = Vec::new();
    for pair in AxisPair::ALL {
        let (a, b) = pair.axes();
        let (Some(sig_a), Some(sig_b)) = (gyros[a.index()], gyros[b.index()]) else {
            continue;
        };
        let (freqs_a, freqs_b) = (freqs(a), freqs(b));

        let correlation = normalized_cross_correlation(sig_a, sig_b);
        // Phase at the strongest frequency of `a` that `b` shares
        let shared = freqs_a
            .iter()
            .copied()
            .find(|fa| freqs_b.iter().any(|fb| (fa - fb).abs() <= opts.tolerance_hz));
        let phase = shared.map(|f| phase_relation(sig_a, sig_b, f, sample_rate));
        let strength = coupling_strength(&freqs_a, &freqs_b, correlation, phase.as_ref(), opts.tolerance_hz);
        let strongly_coupled = strength > opts.coupling_threshold;

        if strongly_coupled {
            tracing::info!(
                "Strong {}/{} coupling: strength {:.2}, correlation {:.2}",
                a.name(),
                b.name(),
                strength,
                correlation
            );
        }

        pairs.push(PairCoupling {
            pair,
            correlation,
            frequency_overlap: frequency_overlap(&freqs_a, &freqs_b, opts.tolerance_hz),
            phase,
            strength,
            strongly_coupled,
        });
    }

    let common = common_harmonics(&per_axis, opts.tolerance_hz);
    let propagation = oscillation_propagation(gyros, &common, sample_rate, opts.fft_size, opts.max_segments);

    if let Some(source) = propagation.source {
        tracing::debug!(
            "Oscillation source: {} ({} of {} events)",
            source.name(),
            propagation.source_counts[source.index()],
            propagation.events
        );
    }

    CrossAxisAnalysis {
        pairs,
        common_harmonics: common,
        propagation,
    }
}
