//! Heart-rate outlier filtering
//!
//! Cleans a batch of heart-rate samples before it feeds the threshold model.
//! Three stages run in order: quartile clipping with a relaxation fallback,
//! relative-jump spike rejection, and a reserved time-window stage that is a
//! pass-through today. Short batches (< 5 samples) skip every stage.
//!
//! The pipeline guarantees a non-empty result for non-empty input and that
//! the output is a positional subsequence of the input. It is not guaranteed
//! to be idempotent: the relaxation fallback can make a second pass over an
//! already-filtered batch behave differently. That is a known property of
//! the heuristic, not a defect.

/// Tunable parameters for the outlier pipeline
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Batches shorter than this skip all stages
    pub min_samples: usize,
    /// IQR multiplier for the first clipping attempt
    pub iqr_multiplier: f64,
    /// IQR multiplier for the relaxed retry
    pub relaxed_iqr_multiplier: f64,
    /// Minimum survival fraction for the first clipping attempt
    pub min_survival: f64,
    /// Minimum survival fraction for the relaxed retry; below this the
    /// unfiltered input is kept
    pub relaxed_min_survival: f64,
    /// Maximum relative jump between consecutive samples
    pub max_relative_jump: f64,
    /// Minimum survival fraction for the spike-rejection stage to take effect
    pub min_spike_survival: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            iqr_multiplier: 1.8,
            relaxed_iqr_multiplier: 2.5,
            min_survival: 0.70,
            relaxed_min_survival: 0.50,
            max_relative_jump: 0.15,
            min_spike_survival: 0.80,
        }
    }
}

/// Outlier filter for heart-rate batches
#[derive(Debug, Clone, Default)]
pub struct OutlierFilter {
    config: FilterConfig,
}

impl OutlierFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline over a batch of heart rates.
    ///
    /// Returns the input unchanged when it is shorter than
    /// [`FilterConfig::min_samples`].
    pub fn filter(&self, values: &[f64]) -> Vec<f64> {
        if values.len() < self.config.min_samples {
            return values.to_vec();
        }

        let clipped = self.quartile_clip(values);
        let despiked = self.reject_spikes(&clipped);
        self.time_window_pass(despiked)
    }

    /// Stage 1: clip values outside the interquartile fence.
    ///
    /// If fewer than `min_survival` of the samples survive the 1.8x fence,
    /// the fence is relaxed to 2.5x; if even that keeps fewer than
    /// `relaxed_min_survival`, over-aggressive filtering is treated as a
    /// failure of the heuristic and the input is returned unfiltered.
    fn quartile_clip(&self, values: &[f64]) -> Vec<f64> {
        let first = clip_by_iqr(values, self.config.iqr_multiplier);
        if survival(values.len(), first.len()) >= self.config.min_survival {
            return first;
        }

        let relaxed = clip_by_iqr(values, self.config.relaxed_iqr_multiplier);
        if survival(values.len(), relaxed.len()) >= self.config.relaxed_min_survival {
            return relaxed;
        }

        values.to_vec()
    }

    /// Stage 2: drop samples whose relative jump from the last accepted
    /// sample exceeds `max_relative_jump`.
    ///
    /// The result replaces the working sequence only when at least
    /// `min_spike_survival` of the stage-1 output survives.
    fn reject_spikes(&self, values: &[f64]) -> Vec<f64> {
        if values.is_empty() {
            return Vec::new();
        }

        let mut stable = Vec::with_capacity(values.len());
        stable.push(values[0]);
        let mut prev = values[0];

        for &curr in &values[1..] {
            if prev > 0.0 && ((curr - prev).abs() / prev) > self.config.max_relative_jump {
                continue;
            }
            stable.push(curr);
            prev = curr;
        }

        if survival(values.len(), stable.len()) >= self.config.min_spike_survival {
            stable
        } else {
            values.to_vec()
        }
    }

    /// Stage 3: time-window analysis.
    ///
    /// Reserved extension point for when per-sample timestamps become
    /// available; a pass-through by contract today.
    fn time_window_pass(&self, values: Vec<f64>) -> Vec<f64> {
        values
    }
}

/// Keep values inside `[Q1 - m*IQR, Q3 + m*IQR]`, preserving input order.
///
/// Quartiles are taken at the 25th/75th-percentile indices of the sorted
/// batch (index-based, not interpolated).
fn clip_by_iqr(values: &[f64], multiplier: f64) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[sorted.len() * 3 / 4];
    let iqr = q3 - q1;
    let lower = q1 - multiplier * iqr;
    let upper = q3 + multiplier * iqr;

    values
        .iter()
        .copied()
        .filter(|v| (lower..=upper).contains(v))
        .collect()
}

fn survival(input_len: usize, output_len: usize) -> f64 {
    if input_len == 0 {
        return 1.0;
    }
    output_len as f64 / input_len as f64
}
