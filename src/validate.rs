//! Input validation
//!
//! The updater clamps its outputs but cannot repair NaN or infinite inputs,
//! which would otherwise propagate into stored state. Everything numeric is
//! checked here before it reaches the updater.

use crate::config::CurveConfig;
use crate::error::CalibrationError;
use crate::types::{ContextFeatures, ReviewMetrics, ReviewRecord, UserCalibration};

fn finite(name: &str, value: f64) -> Result<(), CalibrationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CalibrationError::InvalidInput(format!(
            "{name} must be a finite number, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), CalibrationError> {
    finite(name, value)?;
    if value < 0.0 {
        return Err(CalibrationError::InvalidInput(format!(
            "{name} must not be negative, got {value}"
        )));
    }
    Ok(())
}

/// Check a stored review before any metrics are derived from it.
///
/// A manual reading must fall after the meal and inside the analysis window;
/// earlier readings would be taken for the baseline, later ones dropped.
pub fn validate_review(
    review: &ReviewRecord,
    curve: &CurveConfig,
) -> Result<(), CalibrationError> {
    non_negative("carbs_g", review.carbs_g)?;
    non_negative("fiber_g", review.fiber_g)?;

    for (i, point) in review.glucose_curve.iter().enumerate() {
        finite(&format!("glucose_curve[{i}].time"), point.time_minutes())?;
        finite(&format!("glucose_curve[{i}].value"), point.value())?;
    }

    if let Some(peak) = review.manual_peak {
        finite("manual_peak", peak)?;
    }
    if let Some(time) = review.manual_peak_time_min {
        finite("manual_peak_time_min", time)?;
        let window = curve.analysis_window;
        if time <= window.min || time > window.max {
            return Err(CalibrationError::InvalidInput(format!(
                "manual_peak_time_min must be in ({}, {}], got {time}",
                window.min, window.max
            )));
        }
    }
    Ok(())
}

pub fn validate_metrics(metrics: &ReviewMetrics) -> Result<(), CalibrationError> {
    finite("baseline_glucose", metrics.baseline_glucose)?;
    finite("peak_glucose", metrics.peak_glucose)?;
    non_negative("peak_delta", metrics.peak_delta)?;
    if let Some(time) = metrics.time_to_peak_min {
        finite("time_to_peak_min", time)?;
    }
    if let Some(auc) = metrics.auc_0_180 {
        non_negative("auc_0_180", auc)?;
    }
    Ok(())
}

pub fn validate_context(context: &ContextFeatures) -> Result<(), CalibrationError> {
    non_negative("activity_score", context.activity_score)?;
    non_negative("sleep_deficit", context.sleep_deficit)?;
    if let Some(hours) = context.sleep_hours {
        non_negative("sleep_hours", hours)?;
    }
    Ok(())
}

pub fn validate_net_carbs(net_carbs_g: f64) -> Result<(), CalibrationError> {
    non_negative("net_carbs_g", net_carbs_g)
}

/// Check a prior calibration; a record with counters out of order is corrupt
pub fn validate_calibration(calibration: &UserCalibration) -> Result<(), CalibrationError> {
    finite("baseline_glucose", calibration.baseline_glucose)?;
    finite("carb_sensitivity", calibration.carb_sensitivity)?;
    finite("avg_peak_time_min", calibration.avg_peak_time_min)?;
    finite("exercise_effect", calibration.exercise_effect)?;
    finite("sleep_penalty", calibration.sleep_penalty)?;
    finite("confidence", calibration.confidence)?;
    if calibration.n_quality_observations > calibration.n_observations {
        return Err(CalibrationError::InvalidInput(format!(
            "n_quality_observations ({}) exceeds n_observations ({})",
            calibration.n_quality_observations, calibration.n_observations
        )));
    }
    Ok(())
}
