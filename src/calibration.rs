//! Calibration updater
//!
//! This module holds the per-user learning step. Each review nudges the
//! calibration toward the new observation with an exponential moving average
//! whose rate shrinks as confidence grows. Exercise and sleep effects are
//! removed from the observed rise before it informs carb sensitivity, and are
//! themselves learned at a slower rate.
//!
//! The update is a pure function of its inputs. It always advances
//! `n_observations`, so callers must apply each review at most once.

use crate::config::{Range, UpdateConfig};
use crate::error::CalibrationError;
use crate::types::{round1, ContextFeatures, ReviewMetrics, UserCalibration};
use crate::validate;
use log::debug;
use serde::{Deserialize, Serialize};

/// Intermediate quantities of one update, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTrace {
    pub alpha: f64,
    pub alpha_context: f64,
    /// Sensitivity implied by this observation after deconfounding
    pub sensitivity_observation: Option<f64>,
    pub exercise_updated: bool,
    pub sleep_updated: bool,
}

/// EMA updater for [`UserCalibration`]
#[derive(Debug, Clone, Default)]
pub struct CalibrationUpdater {
    config: UpdateConfig,
}

fn ema(previous: f64, observed: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * previous + alpha * observed
}

/// Round to storage precision, then clamp; rounding first keeps bounds like
/// 0.35 from rounding out of range.
fn bounded(value: f64, range: Range) -> f64 {
    range.clamp(round1(value))
}

impl CalibrationUpdater {
    pub fn new(config: UpdateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Confidence after `n_quality` quality observations, capped at
    /// `max_confidence` so it never reaches 1
    pub fn confidence(&self, n_quality: u64) -> f64 {
        let raw = 1.0 - (-(n_quality as f64) / self.config.confidence_scale).exp();
        round1(raw).min(self.config.max_confidence)
    }

    /// Learning rate for an observation at the given confidence
    pub fn learning_rate(&self, is_quality: bool, confidence: f64) -> f64 {
        let base = if is_quality {
            self.config.quality_alpha
        } else {
            self.config.low_quality_alpha
        };
        self.config
            .bounds
            .learning_rate
            .clamp(base * (1.0 - self.config.confidence_damping * confidence))
    }

    /// Apply one review to a calibration
    pub fn update(
        &self,
        prior: &UserCalibration,
        metrics: &ReviewMetrics,
        net_carbs_g: f64,
        context: &ContextFeatures,
    ) -> UserCalibration {
        self.update_traced(prior, metrics, net_carbs_g, context).0
    }

    /// Validate every input, then apply the update
    pub fn try_update(
        &self,
        prior: &UserCalibration,
        metrics: &ReviewMetrics,
        net_carbs_g: f64,
        context: &ContextFeatures,
    ) -> Result<(UserCalibration, UpdateTrace), CalibrationError> {
        validate::validate_calibration(prior)?;
        validate::validate_metrics(metrics)?;
        validate::validate_net_carbs(net_carbs_g)?;
        validate::validate_context(context)?;
        Ok(self.update_traced(prior, metrics, net_carbs_g, context))
    }

    /// Apply one review and report the intermediate quantities
    pub fn update_traced(
        &self,
        prior: &UserCalibration,
        metrics: &ReviewMetrics,
        net_carbs_g: f64,
        context: &ContextFeatures,
    ) -> (UserCalibration, UpdateTrace) {
        let cfg = &self.config;
        let bounds = &cfg.bounds;

        let n_observations = prior.n_observations.saturating_add(1);
        let n_quality_observations = if metrics.is_quality {
            prior.n_quality_observations.saturating_add(1)
        } else {
            prior.n_quality_observations
        };
        let confidence = self.confidence(n_quality_observations);
        let alpha = self.learning_rate(metrics.is_quality, confidence);
        let alpha_context = alpha * cfg.context_rate_factor;

        let mut next = UserCalibration {
            n_observations,
            n_quality_observations,
            confidence,
            ..prior.clone()
        };
        let mut trace = UpdateTrace {
            alpha,
            alpha_context,
            sensitivity_observation: None,
            exercise_updated: false,
            sleep_updated: false,
        };

        next.baseline_glucose = bounded(
            ema(prior.baseline_glucose, metrics.baseline_glucose, alpha),
            bounds.baseline_glucose,
        );

        if let Some(time_to_peak) = metrics.time_to_peak_min {
            next.avg_peak_time_min = bounds
                .avg_peak_time_min
                .clamp(ema(prior.avg_peak_time_min, time_to_peak, alpha).round());
        }

        // Small carb loads say little about sensitivity
        if net_carbs_g >= cfg.min_net_carbs_g {
            let denom_sleep =
                (1.0 + prior.sleep_penalty * context.sleep_deficit).max(cfg.min_denominator);
            let denom_exercise =
                (1.0 - prior.exercise_effect * context.activity_score).max(cfg.min_denominator);
            let adjusted_delta = metrics.peak_delta / denom_sleep / denom_exercise;

            let carb_units = (net_carbs_g / 10.0).max(cfg.min_carb_units);
            let sensitivity_obs = adjusted_delta / carb_units;
            trace.sensitivity_observation = Some(sensitivity_obs);
            next.carb_sensitivity = bounded(
                ema(prior.carb_sensitivity, sensitivity_obs, alpha),
                bounds.carb_sensitivity,
            );

            if context.activity_score >= cfg.min_activity_score {
                let predicted = carb_units * prior.carb_sensitivity * denom_sleep;
                if predicted > cfg.min_predicted_delta {
                    let implied = cfg
                        .exercise_implied_range
                        .clamp(1.0 - metrics.peak_delta / predicted);
                    let per_unit = implied / context.activity_score;
                    next.exercise_effect = bounded(
                        ema(prior.exercise_effect, per_unit, alpha_context),
                        bounds.exercise_effect,
                    );
                    trace.exercise_updated = true;
                }
            }

            if context.sleep_deficit >= cfg.min_sleep_deficit && context.sleep_hours.is_some() {
                let predicted = carb_units * prior.carb_sensitivity * denom_exercise;
                if predicted > cfg.min_predicted_delta {
                    let implied = cfg
                        .sleep_implied_range
                        .clamp(metrics.peak_delta / predicted - 1.0);
                    let per_unit = implied / context.sleep_deficit;
                    next.sleep_penalty = bounded(
                        ema(prior.sleep_penalty, per_unit, alpha_context),
                        bounds.sleep_penalty,
                    );
                    trace.sleep_updated = true;
                }
            }
        }

        // Untouched fields of a legacy record may predate the current bounds
        next.baseline_glucose = bounds.baseline_glucose.clamp(next.baseline_glucose);
        next.carb_sensitivity = bounds.carb_sensitivity.clamp(next.carb_sensitivity);
        next.avg_peak_time_min = bounds.avg_peak_time_min.clamp(next.avg_peak_time_min);
        next.exercise_effect = bounds.exercise_effect.clamp(next.exercise_effect);
        next.sleep_penalty = bounds.sleep_penalty.clamp(next.sleep_penalty);

        debug!(
            "event=calibration_step n_observations={} quality={} alpha={:.3} sensitivity={} exercise_updated={} sleep_updated={}",
            next.n_observations,
            metrics.is_quality,
            alpha,
            next.carb_sensitivity,
            trace.exercise_updated,
            trace.sleep_updated
        );

        (next, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn quality_metrics(baseline: f64, peak_delta: f64, time_to_peak: f64) -> ReviewMetrics {
        ReviewMetrics {
            baseline_glucose: baseline,
            peak_glucose: baseline + peak_delta,
            peak_delta,
            time_to_peak_min: Some(time_to_peak),
            auc_0_180: Some(peak_delta * 60.0),
            is_quality: true,
        }
    }

    fn no_context() -> ContextFeatures {
        ContextFeatures::default()
    }

    #[test]
    fn test_first_review_scenario() {
        let updater = CalibrationUpdater::default();
        let prior = UserCalibration::default();
        let metrics = quality_metrics(5.5, 2.0, 45.0);

        let (next, trace) = updater.update_traced(&prior, &metrics, 40.0, &no_context());

        assert_eq!(trace.alpha, 0.12);
        assert_eq!(trace.sensitivity_observation, Some(0.5));
        assert_eq!(
            next,
            UserCalibration {
                n_observations: 1,
                n_quality_observations: 1,
                confidence: 0.0,
                ..UserCalibration::default()
            }
        );
    }

    #[test]
    fn test_sensitivity_moves_toward_observation() {
        let updater = CalibrationUpdater::default();
        let next = updater.update(
            &UserCalibration::default(),
            &quality_metrics(5.5, 4.0, 45.0),
            40.0,
            &no_context(),
        );
        // 0.88 * 0.4 + 0.12 * 1.0 = 0.472
        assert_eq!(next.carb_sensitivity, 0.5);
    }

    #[test]
    fn test_baseline_and_peak_time_ema() {
        let updater = CalibrationUpdater::default();
        let next = updater.update(
            &UserCalibration::default(),
            &quality_metrics(7.5, 1.0, 90.0),
            0.0,
            &no_context(),
        );
        // 0.88 * 5.5 + 0.12 * 7.5 = 5.74
        assert_eq!(next.baseline_glucose, 5.7);
        // 0.88 * 45 + 0.12 * 90 = 50.4
        assert_eq!(next.avg_peak_time_min, 50.0);
    }

    #[test]
    fn test_missing_time_to_peak_keeps_peak_time() {
        let prior = UserCalibration {
            avg_peak_time_min: 62.0,
            ..UserCalibration::default()
        };
        let next = CalibrationUpdater::default().update(
            &prior,
            &ReviewMetrics::empty(5.5),
            20.0,
            &no_context(),
        );
        assert_eq!(next.avg_peak_time_min, 62.0);
        assert_eq!(next.n_observations, 1);
        assert_eq!(next.n_quality_observations, 0);
    }

    #[test]
    fn test_low_carb_meal_leaves_effects_untouched() {
        let prior = UserCalibration {
            carb_sensitivity: 0.7,
            exercise_effect: 0.2,
            sleep_penalty: 0.3,
            ..UserCalibration::default()
        };
        let context = ContextFeatures {
            activity_score: 1.0,
            sleep_deficit: 1.0,
            sleep_hours: Some(4.0),
            degraded: false,
        };
        let (next, trace) = CalibrationUpdater::default().update_traced(
            &prior,
            &quality_metrics(5.5, 5.0, 40.0),
            7.9,
            &context,
        );

        assert_eq!(next.carb_sensitivity, 0.7);
        assert_eq!(next.exercise_effect, 0.2);
        assert_eq!(next.sleep_penalty, 0.3);
        assert_eq!(trace.sensitivity_observation, None);
    }

    #[test]
    fn test_exercise_effect_learns_from_blunted_rise() {
        let prior = UserCalibration {
            carb_sensitivity: 0.5,
            exercise_effect: 0.2,
            ..UserCalibration::default()
        };
        let context = ContextFeatures {
            activity_score: 0.3,
            ..ContextFeatures::default()
        };
        let (next, trace) = CalibrationUpdater::default().update_traced(
            &prior,
            &quality_metrics(5.5, 1.0, 45.0),
            40.0,
            &context,
        );

        // predicted 2.0, implied reduction 0.5, per unit 1.67, alpha_context 0.06
        assert!(trace.exercise_updated);
        assert_eq!(trace.alpha_context, 0.06);
        assert_eq!(next.exercise_effect, 0.3);
    }

    #[test]
    fn test_exercise_update_skipped_for_tiny_prediction() {
        let prior = UserCalibration {
            carb_sensitivity: 0.1,
            exercise_effect: 0.2,
            ..UserCalibration::default()
        };
        let context = ContextFeatures {
            activity_score: 1.0,
            ..ContextFeatures::default()
        };
        let (next, trace) = CalibrationUpdater::default().update_traced(
            &prior,
            &quality_metrics(5.5, 0.2, 45.0),
            8.0,
            &context,
        );

        assert!(!trace.exercise_updated);
        assert_eq!(next.exercise_effect, 0.2);
    }

    #[test]
    fn test_sleep_penalty_learns_from_amplified_rise() {
        let prior = UserCalibration {
            carb_sensitivity: 0.5,
            sleep_penalty: 0.3,
            ..UserCalibration::default()
        };
        let context = ContextFeatures {
            sleep_deficit: 0.5,
            sleep_hours: Some(5.5),
            ..ContextFeatures::default()
        };
        let (next, trace) = CalibrationUpdater::default().update_traced(
            &prior,
            &quality_metrics(5.5, 3.2, 45.0),
            40.0,
            &context,
        );

        // implied increase clamps to 0.6, per unit 1.2
        assert!(trace.sleep_updated);
        assert_eq!(next.sleep_penalty, 0.4);
    }

    #[test]
    fn test_sleep_penalty_requires_known_sleep_hours() {
        let prior = UserCalibration {
            carb_sensitivity: 0.5,
            sleep_penalty: 0.3,
            ..UserCalibration::default()
        };
        let context = ContextFeatures {
            sleep_deficit: 0.5,
            sleep_hours: None,
            ..ContextFeatures::default()
        };
        let (next, trace) = CalibrationUpdater::default().update_traced(
            &prior,
            &quality_metrics(5.5, 3.2, 45.0),
            40.0,
            &context,
        );

        assert!(!trace.sleep_updated);
        assert_eq!(next.sleep_penalty, 0.3);
    }

    #[test]
    fn test_effects_stay_inside_bounds_after_rounding() {
        let prior = UserCalibration {
            carb_sensitivity: 1.2,
            exercise_effect: 0.35,
            sleep_penalty: 0.45,
            ..UserCalibration::default()
        };
        let context = ContextFeatures {
            activity_score: 0.3,
            sleep_deficit: 0.2,
            sleep_hours: Some(6.4),
            degraded: false,
        };
        let next = CalibrationUpdater::default().update(
            &prior,
            &quality_metrics(5.5, 9.0, 45.0),
            200.0,
            &context,
        );

        assert!(next.exercise_effect <= 0.35);
        assert!(next.sleep_penalty <= 0.45);
        assert!(next.carb_sensitivity <= 1.2);
    }

    #[test]
    fn test_confidence_curve() {
        let updater = CalibrationUpdater::default();
        assert_eq!(updater.confidence(0), 0.0);
        assert_eq!(updater.confidence(1), 0.0);
        assert_eq!(updater.confidence(20), 0.6);
        assert_eq!(updater.confidence(40), 0.9);
        assert_eq!(updater.confidence(10_000), 0.9);
    }

    #[test]
    fn test_mature_users_keep_learning() {
        let updater = CalibrationUpdater::default();
        // Rounding alone would report 1.0 here
        assert_eq!(updater.confidence(60), 0.9);
        let alpha = updater.learning_rate(true, updater.confidence(60));
        assert!((alpha - 0.0444).abs() < 1e-9);
    }

    #[test]
    fn test_learning_rate_slows_with_confidence() {
        let updater = CalibrationUpdater::default();
        assert_eq!(updater.learning_rate(true, 0.0), 0.12);
        assert_eq!(updater.learning_rate(false, 0.0), 0.06);
        assert!(updater.learning_rate(true, 0.9) < 0.05);
        assert!((updater.learning_rate(false, 0.9) - 0.0222).abs() < 1e-9);

        let mut config = UpdateConfig::default();
        config.confidence_damping = 1.0;
        let strict = CalibrationUpdater::new(config);
        assert_eq!(strict.learning_rate(false, 0.9), 0.02);
    }

    #[test]
    fn test_try_update_rejects_nan() {
        let mut metrics = quality_metrics(5.5, 2.0, 45.0);
        metrics.baseline_glucose = f64::NAN;
        let result = CalibrationUpdater::default().try_update(
            &UserCalibration::default(),
            &metrics,
            40.0,
            &no_context(),
        );
        assert!(matches!(result, Err(CalibrationError::InvalidInput(_))));
    }

    #[test]
    fn test_legacy_out_of_range_prior_is_clamped() {
        let prior = UserCalibration {
            carb_sensitivity: 3.0,
            avg_peak_time_min: 10.0,
            ..UserCalibration::default()
        };
        let next = CalibrationUpdater::default().update(
            &prior,
            &ReviewMetrics::empty(5.5),
            0.0,
            &no_context(),
        );
        assert_eq!(next.carb_sensitivity, 1.2);
        assert_eq!(next.avg_peak_time_min, 25.0);
    }
}
