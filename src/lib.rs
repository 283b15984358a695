//! glycal - Personal glucose-response calibration engine
//!
//! glycal learns, per user, how blood glucose responds to a meal. Each
//! post-meal review runs through a deterministic pipeline: curve metrics
//! extraction → context features (activity, sleep) → EMA calibration update,
//! with the results persisted through pluggable repositories.
//!
//! ## Modules
//!
//! - **Curve**: reduce a glucose curve to baseline, peak, AUC and a quality flag
//! - **Context**: activity score and sleep deficit around the meal
//! - **Calibration**: the adaptive-rate updater for the per-user model
//! - **Pipeline**: load, update and persist in one call

pub mod calibration;
pub mod config;
pub mod context;
pub mod curve;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod tokenizer;
pub mod types;
pub mod validate;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use calibration::{CalibrationUpdater, UpdateTrace};
pub use config::EngineConfig;
pub use context::ContextBuilder;
pub use curve::CurveExtractor;
pub use error::{CalibrationError, StoreError};
pub use pipeline::{update_calibration, CalibrationEngine};
pub use store::{
    ActivityRepository, CalibrationRepository, Dataset, MemoryStore, ReviewRepository,
    SleepRepository,
};
pub use tokenizer::tokenize_meal;
pub use types::{
    CalibrationOutcome, ContextFeatures, CurvePoint, RawCurvePoint, ReviewMetrics, ReviewRecord,
    UserCalibration,
};

/// glycal version
pub const GLYCAL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded by the CLI
pub const PRODUCER_NAME: &str = "glycal";
