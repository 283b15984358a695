//! Curve metrics extraction
//!
//! This module reduces a post-meal glucose curve to the handful of metrics the
//! updater consumes:
//! - Baseline from the pre-meal readings
//! - Peak, rise above baseline and time to peak
//! - Incremental AUC over the analysis window
//! - A quality flag gating how far the observation is trusted

use crate::config::CurveConfig;
use crate::types::{round1, CurvePoint, ReviewMetrics, ReviewRecord, UserCalibration};
use log::debug;

/// Extractor for review metrics
#[derive(Debug, Clone, Default)]
pub struct CurveExtractor {
    config: CurveConfig,
}

impl CurveExtractor {
    pub fn new(config: CurveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CurveConfig {
        &self.config
    }

    /// Extract metrics from a curve, using `fallback_baseline` when the curve
    /// carries no pre-meal reading.
    pub fn extract(&self, points: &[CurvePoint], fallback_baseline: f64) -> ReviewMetrics {
        if points.is_empty() {
            return ReviewMetrics::empty(fallback_baseline);
        }

        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.time_minutes.total_cmp(&b.time_minutes));

        let baseline = self.compute_baseline(&sorted, fallback_baseline);

        let window: Vec<CurvePoint> = sorted
            .into_iter()
            .filter(|p| self.config.analysis_window.contains(p.time_minutes))
            .collect();

        if window.is_empty() {
            return ReviewMetrics::empty(round1(baseline));
        }

        let peak = window
            .iter()
            .map(|p| p.value)
            .fold(f64::NEG_INFINITY, f64::max);
        let peak_delta = (peak - baseline).max(0.0);

        let time_to_peak = window
            .iter()
            .find(|p| (peak - p.value).abs() <= self.config.peak_tolerance)
            .map(|p| p.time_minutes);

        let auc = compute_incremental_auc(&window, baseline);
        let is_quality = self.is_quality(&window, baseline);

        debug!(
            "event=curve_extracted points={} window_points={} peak_delta={:.2} quality={}",
            points.len(),
            window.len(),
            peak_delta,
            is_quality
        );

        ReviewMetrics {
            baseline_glucose: round1(baseline),
            peak_glucose: round1(peak),
            peak_delta: round1(peak_delta),
            time_to_peak_min: time_to_peak.map(round1),
            auc_0_180: auc.map(round1),
            is_quality,
        }
    }

    /// Extract metrics for a stored review.
    ///
    /// A review without a curve but with a manual peak reading is treated as a
    /// one-point curve taken at the recorded time (or the user's usual peak
    /// time); one point cannot establish shape, so it is never a quality curve.
    pub fn extract_review(
        &self,
        review: &ReviewRecord,
        calibration: &UserCalibration,
    ) -> ReviewMetrics {
        let fallback = calibration.baseline_glucose;

        if !review.glucose_curve.is_empty() {
            let points: Vec<CurvePoint> = review
                .glucose_curve
                .iter()
                .copied()
                .map(CurvePoint::from)
                .collect();
            return self.extract(&points, fallback);
        }

        match review.manual_peak {
            Some(peak) => {
                let time = review
                    .manual_peak_time_min
                    .unwrap_or(calibration.avg_peak_time_min);
                let metrics = self.extract(&[CurvePoint::new(time, peak)], fallback);
                ReviewMetrics {
                    is_quality: false,
                    ..metrics
                }
            }
            None => ReviewMetrics::empty(fallback),
        }
    }

    /// Average of the pre-meal window, else the reading at t = 0, else the fallback
    fn compute_baseline(&self, sorted: &[CurvePoint], fallback: f64) -> f64 {
        let pre_meal: Vec<f64> = sorted
            .iter()
            .filter(|p| self.config.baseline_window.contains(p.time_minutes))
            .map(|p| p.value)
            .collect();

        if !pre_meal.is_empty() {
            return pre_meal.iter().sum::<f64>() / pre_meal.len() as f64;
        }

        sorted
            .iter()
            .find(|p| p.time_minutes == 0.0)
            .map(|p| p.value)
            .unwrap_or(fallback)
    }

    fn is_quality(&self, window: &[CurvePoint], baseline: f64) -> bool {
        if window.len() >= self.config.quality_min_points {
            return true;
        }
        window.len() >= self.config.quality_min_points_with_rise
            && window
                .iter()
                .any(|p| p.value > baseline + self.config.quality_rise_threshold)
    }
}

/// Trapezoidal area of the excursion above baseline; none for a single point
fn compute_incremental_auc(window: &[CurvePoint], baseline: f64) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }

    let area = window
        .windows(2)
        .map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            let rise_a = (a.value - baseline).max(0.0);
            let rise_b = (b.value - baseline).max(0.0);
            (b.time_minutes - a.time_minutes) * (rise_a + rise_b) / 2.0
        })
        .sum();

    Some(area)
}
