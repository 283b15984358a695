//! Core types for the glycal calibration engine
//!
//! This module defines the records that flow through each stage of an update:
//! raw curve input, extracted review metrics, context features, and the
//! per-user calibration state.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default calibrated baseline glucose (mmol/L)
pub const DEFAULT_BASELINE_GLUCOSE: f64 = 5.5;
/// Default carbohydrate sensitivity (glucose rise per 10 g net carbs)
pub const DEFAULT_CARB_SENSITIVITY: f64 = 0.4;
/// Default time from meal to glucose peak (minutes)
pub const DEFAULT_AVG_PEAK_TIME_MIN: f64 = 45.0;

/// Review ids remembered per calibration to refuse a repeated update
pub const APPLIED_REVIEW_HISTORY: usize = 256;

/// Round to one decimal place, the storage precision of every continuous field.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// A glucose curve point as it arrives from a client.
///
/// Two field conventions are in circulation; both are accepted and collapse
/// into [`CurvePoint`] through a single `From` conversion. A point that
/// mixes the two is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum RawCurvePoint {
    /// `{ "t_min": .., "glucose_delta": .. }`
    Delta { t_min: f64, glucose_delta: f64 },
    /// `{ "time": .., "value": .. }`
    Plain { time: f64, value: f64 },
}

impl RawCurvePoint {
    pub fn time_minutes(&self) -> f64 {
        match *self {
            RawCurvePoint::Delta { t_min, .. } => t_min,
            RawCurvePoint::Plain { time, .. } => time,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            RawCurvePoint::Delta { glucose_delta, .. } => glucose_delta,
            RawCurvePoint::Plain { value, .. } => value,
        }
    }
}

/// Normalized glucose observation, minutes relative to the meal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub time_minutes: f64,
    pub value: f64,
}

impl CurvePoint {
    pub fn new(time_minutes: f64, value: f64) -> Self {
        Self {
            time_minutes,
            value,
        }
    }
}

impl From<RawCurvePoint> for CurvePoint {
    fn from(raw: RawCurvePoint) -> Self {
        CurvePoint::new(raw.time_minutes(), raw.value())
    }
}

/// Metrics extracted from one post-meal glucose curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetrics {
    /// Pre-meal glucose level
    pub baseline_glucose: f64,
    /// Highest glucose level inside the analysis window
    pub peak_glucose: f64,
    /// Rise above baseline, never negative
    pub peak_delta: f64,
    /// Minutes from meal to peak, if a peak was observed
    pub time_to_peak_min: Option<f64>,
    /// Incremental area under the curve over 0-180 min (value x minutes)
    pub auc_0_180: Option<f64>,
    /// Whether the curve has enough shape to be trusted at the full learning rate
    pub is_quality: bool,
}

impl ReviewMetrics {
    /// Metrics for a review with no usable glucose readings
    pub fn empty(baseline: f64) -> Self {
        Self {
            baseline_glucose: baseline,
            peak_glucose: baseline,
            peak_delta: 0.0,
            time_to_peak_min: None,
            auc_0_180: None,
            is_quality: false,
        }
    }
}

/// Context features around a meal, consumed by a single update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFeatures {
    /// Weighted activity around the meal, 0.0 - 1.5
    pub activity_score: f64,
    /// Shortfall of last night's sleep against target, 0.0 - 1.5
    pub sleep_deficit: f64,
    /// Raw hours slept last night, if recorded
    pub sleep_hours: Option<f64>,
    /// True when a context lookup failed and a default was substituted
    #[serde(default)]
    pub degraded: bool,
}

impl Default for ContextFeatures {
    fn default() -> Self {
        Self {
            activity_score: 0.0,
            sleep_deficit: 0.0,
            sleep_hours: None,
            degraded: false,
        }
    }
}

/// Per-user physiological model, accumulated across reviews
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCalibration {
    pub baseline_glucose: f64,
    pub carb_sensitivity: f64,
    pub avg_peak_time_min: f64,
    pub exercise_effect: f64,
    pub sleep_penalty: f64,
    pub n_observations: u64,
    pub n_quality_observations: u64,
    pub confidence: f64,
    /// Set by the orchestrator when the record is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Most recent reviews folded into this record, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_review_ids: Vec<String>,
}

impl Default for UserCalibration {
    fn default() -> Self {
        Self {
            baseline_glucose: DEFAULT_BASELINE_GLUCOSE,
            carb_sensitivity: DEFAULT_CARB_SENSITIVITY,
            avg_peak_time_min: DEFAULT_AVG_PEAK_TIME_MIN,
            exercise_effect: 0.0,
            sleep_penalty: 0.0,
            n_observations: 0,
            n_quality_observations: 0,
            confidence: 0.0,
            updated_at: None,
            applied_review_ids: Vec::new(),
        }
    }
}

impl UserCalibration {
    /// Load calibration from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize calibration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn has_applied(&self, review_id: &str) -> bool {
        self.applied_review_ids.iter().any(|id| id == review_id)
    }

    /// Remember a review id, keeping at most [`APPLIED_REVIEW_HISTORY`] entries
    pub fn record_applied(&mut self, review_id: &str) {
        if self.has_applied(review_id) {
            return;
        }
        self.applied_review_ids.push(review_id.to_string());
        let excess = self
            .applied_review_ids
            .len()
            .saturating_sub(APPLIED_REVIEW_HISTORY);
        self.applied_review_ids.drain(..excess);
    }
}

/// Self-reported exercise intensity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Light,
    Moderate,
    Intense,
    /// Anything a client sends that we do not recognize
    #[serde(untagged)]
    Other(String),
}

impl Intensity {
    /// Multiplier applied to activity minutes
    pub fn weight(&self) -> f64 {
        match self {
            Intensity::Light => 1.0,
            Intensity::Moderate => 2.0,
            Intensity::Intense => 3.0,
            Intensity::Other(_) => 1.0,
        }
    }
}

/// One logged bout of activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub duration_minutes: f64,
    pub intensity: Intensity,
    pub logged_at: DateTime<Utc>,
}

/// Sleep recorded for the night ending on `date`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub date: NaiveDate,
    pub sleep_hours: f64,
}

/// Audit record attached to a review once it has been applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAnnotation {
    pub annotation_id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub metrics: ReviewMetrics,
    pub tokens: Vec<String>,
    #[serde(default)]
    pub context_degraded: bool,
}

/// A post-meal review with its linked meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub review_id: String,
    pub user_id: String,
    /// Meal time in the user's local offset
    pub meal_time: DateTime<FixedOffset>,
    #[serde(default)]
    pub meal_name: String,
    #[serde(default)]
    pub item_names: Vec<String>,
    #[serde(default)]
    pub carbs_g: f64,
    #[serde(default)]
    pub fiber_g: f64,
    #[serde(default)]
    pub glucose_curve: Vec<RawCurvePoint>,
    /// Single manually entered peak reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_peak: Option<f64>,
    /// Minutes after the meal the manual reading was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_peak_time_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<ReviewAnnotation>,
}

impl ReviewRecord {
    /// Available carbohydrate: carbs minus fiber, floored at zero
    pub fn net_carbs_g(&self) -> f64 {
        (self.carbs_g - self.fiber_g).max(0.0)
    }
}

/// Everything produced by one calibration update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub metrics: ReviewMetrics,
    pub calibration: UserCalibration,
    pub context: ContextFeatures,
    pub tokens: Vec<String>,
    /// False when the review annotation could not be stored
    pub annotation_persisted: bool,
}
