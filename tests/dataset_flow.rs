//! End-to-end flow over a JSON dataset loaded into the in-memory store

use glycal::{update_calibration, CalibrationError, MemoryStore};
use pretty_assertions::assert_eq;

const DATASET: &str = r#"{
    "reviews": [
        {
            "review_id": "r1",
            "user_id": "u1",
            "meal_time": "2024-03-10T12:30:00+00:00",
            "meal_name": "Pasta with tomato sauce",
            "item_names": ["Spaghetti", "Tomato sauce"],
            "carbs_g": 45.0,
            "fiber_g": 5.0,
            "glucose_curve": [
                {"t_min": -10, "glucose_delta": 5.5},
                {"t_min": 30, "glucose_delta": 6.8},
                {"t_min": 45, "glucose_delta": 7.5},
                {"t_min": 90, "glucose_delta": 6.4},
                {"t_min": 150, "glucose_delta": 5.6}
            ]
        },
        {
            "review_id": "r2",
            "user_id": "u1",
            "meal_time": "2024-03-11T08:00:00+01:00",
            "meal_name": "Toast",
            "carbs_g": 30.0,
            "manual_peak": 7.9,
            "manual_peak_time_min": 40
        }
    ],
    "activity": {
        "u1": [
            {"duration_minutes": 30, "intensity": "moderate", "logged_at": "2024-03-10T11:45:00Z"}
        ]
    },
    "sleep": {
        "u1": [
            {"date": "2024-03-09", "sleep_hours": 5.0}
        ]
    }
}"#;

fn store() -> MemoryStore {
    MemoryStore::from_json(DATASET).unwrap()
}

#[test]
fn first_review_updates_and_annotates() {
    let store = store();
    let outcome = update_calibration("u1", "r1", &store, &store, &store, &store).unwrap();

    assert_eq!(outcome.metrics.baseline_glucose, 5.5);
    assert_eq!(outcome.metrics.peak_delta, 2.0);
    assert_eq!(outcome.metrics.time_to_peak_min, Some(45.0));
    assert!(outcome.metrics.is_quality);

    assert_eq!(outcome.context.activity_score, 1.5);
    assert_eq!(outcome.context.sleep_hours, Some(5.0));
    assert!(!outcome.context.degraded);

    assert_eq!(outcome.calibration.n_observations, 1);
    assert_eq!(outcome.calibration.n_quality_observations, 1);
    assert!(outcome.calibration.updated_at.is_some());
    assert!(outcome.annotation_persisted);
    assert_eq!(
        outcome.tokens,
        vec!["pasta", "tomato", "sauce", "spaghetti"]
    );

    let snapshot = store.to_dataset().unwrap();
    assert_eq!(snapshot.calibrations["u1"], outcome.calibration);
    let annotation = snapshot.reviews[0].annotation.as_ref().unwrap();
    assert_eq!(annotation.metrics, outcome.metrics);
    assert_eq!(annotation.tokens, outcome.tokens);
}

#[test]
fn reviews_apply_at_most_once() {
    let store = store();
    update_calibration("u1", "r1", &store, &store, &store, &store).unwrap();

    let err = update_calibration("u1", "r1", &store, &store, &store, &store).unwrap_err();
    assert!(matches!(err, CalibrationError::AlreadyApplied(ref id) if id == "r1"));
    assert_eq!(store.to_dataset().unwrap().calibrations["u1"].n_observations, 1);
}

#[test]
fn manual_peak_review_builds_on_previous_calibration() {
    let store = store();
    update_calibration("u1", "r1", &store, &store, &store, &store).unwrap();
    let outcome = update_calibration("u1", "r2", &store, &store, &store, &store).unwrap();

    assert!(!outcome.metrics.is_quality);
    assert_eq!(outcome.metrics.peak_glucose, 7.9);
    assert_eq!(outcome.metrics.time_to_peak_min, Some(40.0));
    assert_eq!(outcome.calibration.n_observations, 2);
    assert_eq!(outcome.calibration.n_quality_observations, 1);
    // No sleep logged for the night before
    assert_eq!(outcome.context.sleep_hours, None);
}

#[test]
fn reviews_of_other_users_are_not_found() {
    let store = store();
    let err = update_calibration("u2", "r1", &store, &store, &store, &store).unwrap_err();
    assert!(matches!(err, CalibrationError::NotFound(_)));
    assert!(store.to_dataset().unwrap().calibrations.is_empty());
}
