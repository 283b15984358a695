//! Meal context features
//!
//! This module derives two bounded scalars describing the circumstances of a
//! meal: how active the user was around it, and how short last night's sleep
//! was. Both come from external stores and are best-effort; a failed lookup
//! yields the neutral value and marks the features as degraded.

use crate::config::ContextConfig;
use crate::store::{ActivityRepository, SleepRepository};
use crate::types::{ActivityRecord, ContextFeatures};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use log::warn;

/// Builder for per-meal context features
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Build context features for a meal eaten at `meal_time`.
    ///
    /// Never fails: store errors are logged and replaced by neutral features.
    pub fn build(
        &self,
        user_id: &str,
        meal_time: DateTime<FixedOffset>,
        activity: &dyn ActivityRepository,
        sleep: &dyn SleepRepository,
    ) -> ContextFeatures {
        let mut features = ContextFeatures::default();
        let meal_utc = meal_time.with_timezone(&Utc);

        let start = meal_utc - Duration::hours(self.config.query_hours_before);
        let end = meal_utc + Duration::hours(self.config.query_hours_after);
        match activity.query(user_id, start, end) {
            Ok(records) => features.activity_score = self.activity_score(&records, meal_utc),
            Err(e) => {
                warn!("event=context_degraded source=activity user_id={user_id} error={e}");
                features.degraded = true;
            }
        }

        // Last night's sleep is filed under the day before the meal's local date
        if let Some(night) = meal_time.date_naive().pred_opt() {
            match sleep.lookup(user_id, night) {
                Ok(Some(record)) if record.sleep_hours.is_finite() && record.sleep_hours >= 0.0 => {
                    features.sleep_hours = Some(record.sleep_hours);
                    features.sleep_deficit = self.sleep_deficit(record.sleep_hours);
                }
                Ok(Some(record)) => {
                    warn!(
                        "event=sleep_record_ignored user_id={user_id} date={night} sleep_hours={}",
                        record.sleep_hours
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("event=context_degraded source=sleep user_id={user_id} error={e}");
                    features.degraded = true;
                }
            }
        }

        features
    }

    /// Weighted activity minutes near the meal, scaled to the reference load
    pub fn activity_score(&self, records: &[ActivityRecord], meal_time: DateTime<Utc>) -> f64 {
        let from = meal_time - Duration::hours(self.config.scoring_hours);
        let to = meal_time + Duration::hours(self.config.scoring_hours);

        let weighted_minutes: f64 = records
            .iter()
            .filter(|r| r.logged_at >= from && r.logged_at <= to)
            .filter(|r| {
                let usable = r.duration_minutes.is_finite() && r.duration_minutes >= 0.0;
                if !usable {
                    warn!(
                        "event=activity_record_ignored logged_at={} duration_minutes={}",
                        r.logged_at, r.duration_minutes
                    );
                }
                usable
            })
            .map(|r| r.duration_minutes * r.intensity.weight())
            .sum();

        (weighted_minutes / self.config.reference_weighted_minutes)
            .clamp(0.0, self.config.max_feature)
    }

    /// Shortfall against the target night, scaled and bounded
    pub fn sleep_deficit(&self, sleep_hours: f64) -> f64 {
        ((self.config.target_sleep_hours - sleep_hours) / self.config.sleep_deficit_scale_hours)
            .clamp(0.0, self.config.max_feature)
    }
}
