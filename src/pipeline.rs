//! Pipeline orchestration
//!
//! This module provides the public entrypoint for applying a post-meal review
//! to a user's calibration: load the review and the prior calibration, extract
//! curve metrics, build context features, run the updater, tokenize the meal,
//! and persist the results.

use crate::calibration::CalibrationUpdater;
use crate::config::EngineConfig;
use crate::context::ContextBuilder;
use crate::curve::CurveExtractor;
use crate::error::CalibrationError;
use crate::store::{ActivityRepository, CalibrationRepository, ReviewRepository, SleepRepository};
use crate::tokenizer::tokenize_meal;
use crate::types::{CalibrationOutcome, ReviewAnnotation};
use crate::validate;
use chrono::Utc;
use log::{error, info, warn};
use uuid::Uuid;

/// Apply a review to a user's calibration using the default configuration.
///
/// # Arguments
/// * `user_id` - Owner of the review
/// * `review_id` - Review to apply
/// * `reviews`, `calibrations`, `activity`, `sleep` - Backing repositories
///
/// # Example
/// ```ignore
/// let store = MemoryStore::new();
/// let outcome = update_calibration("user-1", "review-9", &store, &store, &store, &store)?;
/// println!("sensitivity now {}", outcome.calibration.carb_sensitivity);
/// ```
pub fn update_calibration(
    user_id: &str,
    review_id: &str,
    reviews: &dyn ReviewRepository,
    calibrations: &dyn CalibrationRepository,
    activity: &dyn ActivityRepository,
    sleep: &dyn SleepRepository,
) -> Result<CalibrationOutcome, CalibrationError> {
    CalibrationEngine::default().process(user_id, review_id, reviews, calibrations, activity, sleep)
}

/// Calibration engine with a fixed configuration.
///
/// Holds no per-user state; everything persistent lives behind the
/// repositories, so one engine can serve every user.
#[derive(Debug, Clone, Default)]
pub struct CalibrationEngine {
    extractor: CurveExtractor,
    context: ContextBuilder,
    updater: CalibrationUpdater,
}

impl CalibrationEngine {
    /// Create an engine from a configuration, rejecting invalid settings
    pub fn new(config: EngineConfig) -> Result<Self, CalibrationError> {
        config.validate()?;
        Ok(Self {
            extractor: CurveExtractor::new(config.curve),
            context: ContextBuilder::new(config.context),
            updater: CalibrationUpdater::new(config.update),
        })
    }

    pub fn extractor(&self) -> &CurveExtractor {
        &self.extractor
    }

    pub fn updater(&self) -> &CalibrationUpdater {
        &self.updater
    }

    /// Apply one review.
    ///
    /// Stages:
    /// 1. Load and check the review (ownership, annotation, validity)
    /// 2. Load the prior calibration, or defaults for a first review, and
    ///    refuse a review it already records
    /// 3. CurveExtractor - metrics from the stored curve or manual peak
    /// 4. ContextBuilder - activity and sleep features (best effort)
    /// 5. CalibrationUpdater - the EMA step
    /// 6. Persist the calibration (compare-and-swap), then annotate the review
    ///
    /// A failure to annotate the review is logged and reported through
    /// `annotation_persisted`; every other store failure is returned.
    pub fn process(
        &self,
        user_id: &str,
        review_id: &str,
        reviews: &dyn ReviewRepository,
        calibrations: &dyn CalibrationRepository,
        activity: &dyn ActivityRepository,
        sleep: &dyn SleepRepository,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        // Stage 1: review
        let review = reviews
            .load(review_id)?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| {
                CalibrationError::NotFound(format!("review {review_id} for user {user_id}"))
            })?;

        if review.annotation.is_some() {
            return Err(CalibrationError::AlreadyApplied(review_id.to_string()));
        }
        validate::validate_review(&review, self.extractor.config())?;

        // Stage 2: prior calibration
        let stored = calibrations.load(user_id)?;
        let expected_observations = stored.as_ref().map(|c| c.n_observations);
        let prior = stored.unwrap_or_default();

        // The annotation may have failed after an earlier save
        if prior.has_applied(review_id) {
            warn!("event=review_already_in_calibration user_id={user_id} review_id={review_id}");
            return Err(CalibrationError::AlreadyApplied(review_id.to_string()));
        }

        // Stages 3-5
        let metrics = self.extractor.extract_review(&review, &prior);
        let context = self
            .context
            .build(user_id, review.meal_time, activity, sleep);
        let net_carbs = review.net_carbs_g();
        let (mut calibration, trace) =
            self.updater
                .try_update(&prior, &metrics, net_carbs, &context)?;
        let tokens = tokenize_meal(&review.meal_name, &review.item_names);

        let now = Utc::now();
        calibration.updated_at = Some(now);
        calibration.record_applied(review_id);

        // Stage 6: persistence
        if let Err(e) = calibrations.save(user_id, expected_observations, &calibration) {
            error!(
                "event=calibration_save_failed user_id={user_id} review_id={review_id} error={e}"
            );
            return Err(e.into());
        }

        let annotation = ReviewAnnotation {
            annotation_id: Uuid::new_v4(),
            computed_at: now,
            metrics: metrics.clone(),
            tokens: tokens.clone(),
            context_degraded: context.degraded,
        };
        let annotation_persisted = match reviews.attach_annotation(review_id, &annotation) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "event=review_annotation_failed user_id={user_id} review_id={review_id} error={e}"
                );
                false
            }
        };

        info!(
            "event=calibration_updated user_id={user_id} review_id={review_id} n_observations={} quality={} alpha={:.3} context_degraded={}",
            calibration.n_observations,
            metrics.is_quality,
            trace.alpha,
            context.degraded
        );

        Ok(CalibrationOutcome {
            metrics,
            calibration,
            context,
            tokens,
            annotation_persisted,
        })
    }
}
