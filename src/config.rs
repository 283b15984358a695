//! Engine configuration
//!
//! Every threshold and rate used by the extractor, the context builder and the
//! updater lives here so they can be tuned against outcome data without code
//! changes. All fields have defaults; a JSON config only needs the fields it
//! overrides.

use crate::error::CalibrationError;
use serde::{Deserialize, Serialize};

/// Inclusive numeric range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn check(&self, name: &str) -> Result<(), CalibrationError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(CalibrationError::InvalidConfig(format!(
                "{name}: range [{}, {}] is not a valid interval",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Curve metrics extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    /// Pre-meal window averaged into the baseline (minutes)
    pub baseline_window: Range,
    /// Post-meal analysis window (minutes)
    pub analysis_window: Range,
    /// Values within this distance of the maximum count as the peak
    pub peak_tolerance: f64,
    /// A window with at least this many points is always a quality curve
    pub quality_min_points: usize,
    /// Fewer points can still qualify if they show a clear rise
    pub quality_min_points_with_rise: usize,
    /// Rise above baseline that makes a sparse curve usable
    pub quality_rise_threshold: f64,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            baseline_window: Range::new(-15.0, 0.0),
            analysis_window: Range::new(0.0, 180.0),
            peak_tolerance: 0.05,
            quality_min_points: 4,
            quality_min_points_with_rise: 2,
            quality_rise_threshold: 0.5,
        }
    }
}

/// Context feature settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Activity query reaches this far before the meal (hours)
    pub query_hours_before: i64,
    /// Activity query reaches this far after the meal (hours)
    pub query_hours_after: i64,
    /// Only activity within this many hours of the meal is scored
    pub scoring_hours: i64,
    /// Weighted minutes that make an activity score of 1.0
    pub reference_weighted_minutes: f64,
    /// Upper bound on both features
    pub max_feature: f64,
    /// Sleep hours considered sufficient
    pub target_sleep_hours: f64,
    /// Hours of shortfall that make a deficit of 1.0
    pub sleep_deficit_scale_hours: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            query_hours_before: 6,
            query_hours_after: 3,
            scoring_hours: 2,
            reference_weighted_minutes: 30.0,
            max_feature: 1.5,
            target_sleep_hours: 7.0,
            sleep_deficit_scale_hours: 3.0,
        }
    }
}

/// Hard physiological bounds on the calibration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationBounds {
    pub baseline_glucose: Range,
    pub carb_sensitivity: Range,
    pub avg_peak_time_min: Range,
    pub exercise_effect: Range,
    pub sleep_penalty: Range,
    pub learning_rate: Range,
}

impl Default for CalibrationBounds {
    fn default() -> Self {
        Self {
            baseline_glucose: Range::new(4.0, 9.0),
            carb_sensitivity: Range::new(0.1, 1.2),
            avg_peak_time_min: Range::new(25.0, 120.0),
            exercise_effect: Range::new(0.0, 0.35),
            sleep_penalty: Range::new(0.0, 0.45),
            learning_rate: Range::new(0.02, 0.12),
        }
    }
}

/// EMA updater settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub bounds: CalibrationBounds,
    /// Base learning rate for quality observations
    pub quality_alpha: f64,
    /// Base learning rate for everything else
    pub low_quality_alpha: f64,
    /// Fraction of the learning rate removed at full confidence
    pub confidence_damping: f64,
    /// Quality observations per e-fold of confidence
    pub confidence_scale: f64,
    /// Largest confidence value ever reported. One-decimal rounding would
    /// reach 1.0 from about 60 quality observations; 0.9 is the largest
    /// stored value below 1, which keeps the learning rate above its floor.
    pub max_confidence: f64,
    /// Context effects learn at this fraction of the main rate
    pub context_rate_factor: f64,
    /// Net carbs below this do not inform sensitivity (grams)
    pub min_net_carbs_g: f64,
    /// Floor on the carb load divisor (units of 10 g)
    pub min_carb_units: f64,
    /// Floor on the deconfounding denominators
    pub min_denominator: f64,
    /// Activity score needed to learn the exercise effect
    pub min_activity_score: f64,
    /// Sleep deficit needed to learn the sleep penalty
    pub min_sleep_deficit: f64,
    /// Predicted rise below which a context update is skipped
    pub min_predicted_delta: f64,
    /// Bounds on the reduction implied by one exercise observation
    pub exercise_implied_range: Range,
    /// Bounds on the increase implied by one sleep observation
    pub sleep_implied_range: Range,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            bounds: CalibrationBounds::default(),
            quality_alpha: 0.12,
            low_quality_alpha: 0.06,
            confidence_damping: 0.7,
            confidence_scale: 20.0,
            max_confidence: 0.9,
            context_rate_factor: 0.5,
            min_net_carbs_g: 8.0,
            min_carb_units: 0.5,
            min_denominator: 0.5,
            min_activity_score: 0.3,
            min_sleep_deficit: 0.2,
            min_predicted_delta: 0.3,
            exercise_implied_range: Range::new(-0.3, 0.5),
            sleep_implied_range: Range::new(-0.2, 0.6),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub curve: CurveConfig,
    pub context: ContextConfig,
    pub update: UpdateConfig,
}

impl EngineConfig {
    /// Load and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject configurations that would break the clamp invariants
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let curve = &self.curve;
        curve.baseline_window.check("curve.baseline_window")?;
        curve.analysis_window.check("curve.analysis_window")?;
        positive("curve.peak_tolerance", curve.peak_tolerance, true)?;
        if curve.quality_min_points == 0 || curve.quality_min_points_with_rise == 0 {
            return Err(CalibrationError::InvalidConfig(
                "curve quality point thresholds must be at least 1".to_string(),
            ));
        }

        let context = &self.context;
        if context.query_hours_before < context.scoring_hours
            || context.query_hours_after < context.scoring_hours
            || context.scoring_hours < 0
        {
            return Err(CalibrationError::InvalidConfig(
                "context scoring window must lie inside the query window".to_string(),
            ));
        }
        positive(
            "context.reference_weighted_minutes",
            context.reference_weighted_minutes,
            false,
        )?;
        positive("context.max_feature", context.max_feature, false)?;
        positive(
            "context.sleep_deficit_scale_hours",
            context.sleep_deficit_scale_hours,
            false,
        )?;

        let update = &self.update;
        let bounds = &update.bounds;
        bounds.baseline_glucose.check("bounds.baseline_glucose")?;
        bounds.carb_sensitivity.check("bounds.carb_sensitivity")?;
        bounds.avg_peak_time_min.check("bounds.avg_peak_time_min")?;
        bounds.exercise_effect.check("bounds.exercise_effect")?;
        bounds.sleep_penalty.check("bounds.sleep_penalty")?;
        bounds.learning_rate.check("bounds.learning_rate")?;
        update.exercise_implied_range.check("exercise_implied_range")?;
        update.sleep_implied_range.check("sleep_implied_range")?;
        if bounds.learning_rate.min <= 0.0 || bounds.learning_rate.max > 1.0 {
            return Err(CalibrationError::InvalidConfig(
                "bounds.learning_rate must lie within (0, 1]".to_string(),
            ));
        }
        positive("confidence_scale", update.confidence_scale, false)?;
        positive("min_carb_units", update.min_carb_units, false)?;
        positive("min_denominator", update.min_denominator, false)?;
        positive("min_activity_score", update.min_activity_score, false)?;
        positive("min_sleep_deficit", update.min_sleep_deficit, false)?;
        positive("min_predicted_delta", update.min_predicted_delta, false)?;
        for (name, value) in [
            ("quality_alpha", update.quality_alpha),
            ("low_quality_alpha", update.low_quality_alpha),
            ("confidence_damping", update.confidence_damping),
            ("context_rate_factor", update.context_rate_factor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CalibrationError::InvalidConfig(format!(
                    "{name} must lie within [0, 1], got {value}"
                )));
            }
        }
        if !(0.0..1.0).contains(&update.max_confidence) {
            return Err(CalibrationError::InvalidConfig(format!(
                "max_confidence must lie within [0, 1), got {}",
                update.max_confidence
            )));
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64, allow_zero: bool) -> Result<(), CalibrationError> {
    let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if ok {
        Ok(())
    } else {
        Err(CalibrationError::InvalidConfig(format!(
            "{name} must be positive, got {value}"
        )))
    }
}
