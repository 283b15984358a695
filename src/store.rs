//! Repository seams and the in-memory reference store
//!
//! The engine never talks to a database directly. Reviews, calibrations,
//! activity logs and sleep records are reached through the traits below; a
//! production backend implements them over its own storage. [`MemoryStore`]
//! implements all four and backs the CLI and the tests.

use crate::error::StoreError;
use crate::types::{ActivityRecord, ReviewAnnotation, ReviewRecord, SleepRecord, UserCalibration};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Access to post-meal reviews
pub trait ReviewRepository {
    fn load(&self, review_id: &str) -> Result<Option<ReviewRecord>, StoreError>;

    /// Attach the computed metrics and tokens to a review
    fn attach_annotation(
        &self,
        review_id: &str,
        annotation: &ReviewAnnotation,
    ) -> Result<(), StoreError>;
}

/// Access to per-user calibration state
pub trait CalibrationRepository {
    fn load(&self, user_id: &str) -> Result<Option<UserCalibration>, StoreError>;

    /// Store `calibration` only if the stored record still has
    /// `expected_observations` observations (`None`: no record may exist yet).
    ///
    /// Returns [`StoreError::Conflict`] when another update got there first.
    fn save(
        &self,
        user_id: &str,
        expected_observations: Option<u64>,
        calibration: &UserCalibration,
    ) -> Result<(), StoreError>;
}

/// Access to logged activity
pub trait ActivityRepository {
    /// All records for the user logged within `[start, end]`
    fn query(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError>;
}

/// Access to nightly sleep summaries
pub trait SleepRepository {
    fn lookup(&self, user_id: &str, date: NaiveDate) -> Result<Option<SleepRecord>, StoreError>;
}

/// Serializable snapshot of everything [`MemoryStore`] holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub reviews: Vec<ReviewRecord>,
    pub calibrations: HashMap<String, UserCalibration>,
    pub activity: HashMap<String, Vec<ActivityRecord>>,
    pub sleep: HashMap<String, Vec<SleepRecord>>,
}

/// Thread-safe in-memory implementation of every repository
#[derive(Debug, Default)]
pub struct MemoryStore {
    reviews: Mutex<HashMap<String, ReviewRecord>>,
    calibrations: Mutex<HashMap<String, UserCalibration>>,
    activity: Mutex<HashMap<String, Vec<ActivityRecord>>>,
    sleep: Mutex<HashMap<String, Vec<SleepRecord>>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable(format!("{name} lock poisoned")))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        let reviews = dataset
            .reviews
            .into_iter()
            .map(|r| (r.review_id.clone(), r))
            .collect();
        Self {
            reviews: Mutex::new(reviews),
            calibrations: Mutex::new(dataset.calibrations),
            activity: Mutex::new(dataset.activity),
            sleep: Mutex::new(dataset.sleep),
        }
    }

    /// Snapshot the store, reviews ordered by id
    pub fn to_dataset(&self) -> Result<Dataset, StoreError> {
        let mut reviews: Vec<ReviewRecord> = lock(&self.reviews, "reviews")?.values().cloned().collect();
        reviews.sort_by(|a, b| a.review_id.cmp(&b.review_id));
        Ok(Dataset {
            reviews,
            calibrations: lock(&self.calibrations, "calibrations")?.clone(),
            activity: lock(&self.activity, "activity")?.clone(),
            sleep: lock(&self.sleep, "sleep")?.clone(),
        })
    }

    /// Load a store from a JSON dataset
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let dataset: Dataset = serde_json::from_str(json)?;
        Ok(Self::from_dataset(dataset))
    }

    pub fn insert_review(&self, review: ReviewRecord) -> Result<(), StoreError> {
        lock(&self.reviews, "reviews")?.insert(review.review_id.clone(), review);
        Ok(())
    }

    pub fn log_activity(&self, user_id: &str, record: ActivityRecord) -> Result<(), StoreError> {
        lock(&self.activity, "activity")?
            .entry(user_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    pub fn record_sleep(&self, user_id: &str, record: SleepRecord) -> Result<(), StoreError> {
        let mut sleep = lock(&self.sleep, "sleep")?;
        let nights = sleep.entry(user_id.to_string()).or_default();
        nights.retain(|r| r.date != record.date);
        nights.push(record);
        Ok(())
    }
}

impl ReviewRepository for MemoryStore {
    fn load(&self, review_id: &str) -> Result<Option<ReviewRecord>, StoreError> {
        Ok(lock(&self.reviews, "reviews")?.get(review_id).cloned())
    }

    fn attach_annotation(
        &self,
        review_id: &str,
        annotation: &ReviewAnnotation,
    ) -> Result<(), StoreError> {
        let mut reviews = lock(&self.reviews, "reviews")?;
        let review = reviews
            .get_mut(review_id)
            .ok_or_else(|| StoreError::Unavailable(format!("review {review_id} disappeared")))?;
        review.annotation = Some(annotation.clone());
        Ok(())
    }
}

impl CalibrationRepository for MemoryStore {
    fn load(&self, user_id: &str) -> Result<Option<UserCalibration>, StoreError> {
        Ok(lock(&self.calibrations, "calibrations")?.get(user_id).cloned())
    }

    fn save(
        &self,
        user_id: &str,
        expected_observations: Option<u64>,
        calibration: &UserCalibration,
    ) -> Result<(), StoreError> {
        let mut calibrations = lock(&self.calibrations, "calibrations")?;
        let found = calibrations.get(user_id).map(|c| c.n_observations);
        if found != expected_observations {
            return Err(StoreError::Conflict {
                user_id: user_id.to_string(),
                expected: expected_observations,
                found,
            });
        }
        calibrations.insert(user_id.to_string(), calibration.clone());
        Ok(())
    }
}

impl ActivityRepository for MemoryStore {
    fn query(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        let activity = lock(&self.activity, "activity")?;
        Ok(activity
            .get(user_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.logged_at >= start && r.logged_at <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl SleepRepository for MemoryStore {
    fn lookup(&self, user_id: &str, date: NaiveDate) -> Result<Option<SleepRecord>, StoreError> {
        let sleep = lock(&self.sleep, "sleep")?;
        Ok(sleep
            .get(user_id)
            .and_then(|nights| nights.iter().find(|r| r.date == date))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Intensity;
    use chrono::TimeZone;

    #[test]
    fn test_save_is_compare_and_swap() {
        let store = MemoryStore::new();
        let first = UserCalibration {
            n_observations: 1,
            ..UserCalibration::default()
        };

        store.save("u1", None, &first).unwrap();
        // A second first-time insert must lose
        let err = store.save("u1", None, &first).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: None,
                found: Some(1),
                ..
            }
        ));

        let second = UserCalibration {
            n_observations: 2,
            ..UserCalibration::default()
        };
        store.save("u1", Some(1), &second).unwrap();
        assert!(store.save("u1", Some(1), &second).is_err());
        assert_eq!(CalibrationRepository::load(&store, "u1").unwrap(), Some(second));
    }

    #[test]
    fn test_activity_query_is_inclusive() {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        store
            .log_activity(
                "u1",
                ActivityRecord {
                    duration_minutes: 20.0,
                    intensity: Intensity::Light,
                    logged_at: at,
                },
            )
            .unwrap();

        assert_eq!(store.query("u1", at, at).unwrap().len(), 1);
        assert!(store.query("u2", at, at).unwrap().is_empty());
    }

    #[test]
    fn test_record_sleep_replaces_same_night() {
        let store = MemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        store.record_sleep("u1", SleepRecord { date, sleep_hours: 6.0 }).unwrap();
        store.record_sleep("u1", SleepRecord { date, sleep_hours: 7.5 }).unwrap();

        let record = store.lookup("u1", date).unwrap().unwrap();
        assert_eq!(record.sleep_hours, 7.5);
    }

    #[test]
    fn test_dataset_round_trip() {
        let json = r#"{
            "reviews": [{
                "review_id": "r1",
                "user_id": "u1",
                "meal_time": "2024-03-10T12:30:00+00:00",
                "carbs_g": 40
            }],
            "calibrations": {"u1": {
                "baseline_glucose": 5.6, "carb_sensitivity": 0.5, "avg_peak_time_min": 50,
                "exercise_effect": 0.1, "sleep_penalty": 0.0, "n_observations": 3,
                "n_quality_observations": 2, "confidence": 0.1
            }}
        }"#;
        let store = MemoryStore::from_json(json).unwrap();
        let dataset = store.to_dataset().unwrap();

        assert_eq!(dataset.reviews.len(), 1);
        assert_eq!(dataset.calibrations["u1"].n_observations, 3);
        assert!(ReviewRepository::load(&store, "r1").unwrap().is_some());
    }
}
