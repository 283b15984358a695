//! FFI bindings for glycal
//!
//! This module provides C-compatible functions for calling the calibration
//! engine from mobile hosts. All payloads are JSON in null-terminated C
//! strings, and returned strings must be freed with `glycal_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::calibration::CalibrationUpdater;
use crate::curve::CurveExtractor;
use crate::error::CalibrationError;
use crate::tokenizer::tokenize_meal;
use crate::types::{ContextFeatures, CurvePoint, RawCurvePoint, ReviewMetrics, UserCalibration};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper for nullable C string arguments: NULL is `Ok(None)`, but a non-NULL
/// pointer must hold valid UTF-8
unsafe fn optional_cstr(
    ptr: *const c_char,
    name: &str,
) -> Result<Option<String>, CalibrationError> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|_| CalibrationError::InvalidInput(format!("{name} is not valid UTF-8")))
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a JSON result to the caller, or record the error and return NULL
fn finish(result: Result<String, CalibrationError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Calibration API
// ============================================================================

/// Extract review metrics from a JSON array of curve points.
///
/// # Safety
/// - `curve_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `glycal_free_string`.
/// - Returns NULL on error; call `glycal_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn glycal_extract_metrics(
    curve_json: *const c_char,
    fallback_baseline: f64,
) -> *mut c_char {
    clear_last_error();

    let curve_str = match cstr_to_string(curve_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid curve string pointer");
            return ptr::null_mut();
        }
    };

    finish(extract_metrics_json(&curve_str, fallback_baseline))
}

fn extract_metrics_json(curve_json: &str, fallback_baseline: f64) -> Result<String, CalibrationError> {
    if !fallback_baseline.is_finite() {
        return Err(CalibrationError::InvalidInput(
            "fallback_baseline must be a finite number".to_string(),
        ));
    }
    let raw: Vec<RawCurvePoint> = serde_json::from_str(curve_json)?;
    if raw.iter().any(|p| !p.time_minutes().is_finite() || !p.value().is_finite()) {
        return Err(CalibrationError::InvalidInput(
            "curve points must be finite numbers".to_string(),
        ));
    }
    let points: Vec<CurvePoint> = raw.into_iter().map(CurvePoint::from).collect();
    let metrics = CurveExtractor::default().extract(&points, fallback_baseline);
    Ok(serde_json::to_string(&metrics)?)
}

/// Apply one observation to a calibration and return the new calibration JSON.
///
/// # Safety
/// - `metrics_json` and `context_json` must be valid null-terminated C strings.
/// - `prior_json` may be NULL for a first-time user (defaults are used).
/// - Returns a newly allocated string that must be freed with `glycal_free_string`.
/// - Returns NULL on error; call `glycal_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn glycal_update_calibration(
    prior_json: *const c_char,
    metrics_json: *const c_char,
    net_carbs_g: f64,
    context_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let prior_str = match optional_cstr(prior_json, "prior_json") {
        Ok(s) => s,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let metrics_str = match cstr_to_string(metrics_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid metrics string pointer");
            return ptr::null_mut();
        }
    };

    let context_str = match cstr_to_string(context_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid context string pointer");
            return ptr::null_mut();
        }
    };

    finish(update_calibration_json(
        prior_str.as_deref(),
        &metrics_str,
        net_carbs_g,
        &context_str,
    ))
}

fn update_calibration_json(
    prior_json: Option<&str>,
    metrics_json: &str,
    net_carbs_g: f64,
    context_json: &str,
) -> Result<String, CalibrationError> {
    let prior = match prior_json {
        Some(json) => UserCalibration::from_json(json)?,
        None => UserCalibration::default(),
    };
    let metrics: ReviewMetrics = serde_json::from_str(metrics_json)?;
    let context: ContextFeatures = serde_json::from_str(context_json)?;

    let (calibration, _) =
        CalibrationUpdater::default().try_update(&prior, &metrics, net_carbs_g, &context)?;
    Ok(calibration.to_json()?)
}

/// Tokenize a meal name and a JSON array of item names.
///
/// # Safety
/// - `meal_name` must be a valid null-terminated C string.
/// - `items_json` may be NULL when the meal has no items.
/// - Returns a newly allocated string that must be freed with `glycal_free_string`.
/// - Returns NULL on error; call `glycal_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn glycal_tokenize_meal(
    meal_name: *const c_char,
    items_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let name = match cstr_to_string(meal_name) {
        Some(s) => s,
        None => {
            set_last_error("Invalid meal name string pointer");
            return ptr::null_mut();
        }
    };
    let items_str = match optional_cstr(items_json, "items_json") {
        Ok(s) => s,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let result = (|| -> Result<String, CalibrationError> {
        let items: Vec<String> = match items_str {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        Ok(serde_json::to_string(&tokenize_meal(&name, &items))?)
    })();

    finish(result)
}

/// Return the calibration assigned to a first-time user.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `glycal_free_string`.
#[no_mangle]
pub unsafe extern "C" fn glycal_default_calibration() -> *mut c_char {
    clear_last_error();
    finish(UserCalibration::default().to_json().map_err(CalibrationError::from))
}

/// Free a string returned by glycal functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a glycal function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn glycal_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next glycal function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn glycal_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the glycal library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn glycal_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        glycal_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_extract_metrics() {
        let curve = CString::new(
            r#"[{"t_min": 0, "glucose_delta": 5.0}, {"time": 30, "value": 6.0},
                {"time": 60, "value": 7.0}, {"t_min": 90, "glucose_delta": 6.0}]"#,
        )
        .unwrap();

        unsafe {
            let result = take_string(glycal_extract_metrics(curve.as_ptr(), 5.5));
            let metrics: ReviewMetrics = serde_json::from_str(&result).unwrap();
            assert!(metrics.is_quality);
            assert_eq!(metrics.peak_delta, 2.0);
            assert_eq!(metrics.time_to_peak_min, Some(60.0));
        }
    }

    #[test]
    fn test_ffi_update_from_defaults() {
        let metrics = CString::new(
            r#"{"baseline_glucose": 5.5, "peak_glucose": 7.5, "peak_delta": 2.0,
                "time_to_peak_min": 45.0, "auc_0_180": 120.0, "is_quality": true}"#,
        )
        .unwrap();
        let context = CString::new(
            r#"{"activity_score": 0.0, "sleep_deficit": 0.0, "sleep_hours": null}"#,
        )
        .unwrap();

        unsafe {
            let result = take_string(glycal_update_calibration(
                ptr::null(),
                metrics.as_ptr(),
                40.0,
                context.as_ptr(),
            ));
            let calibration = UserCalibration::from_json(&result).unwrap();
            assert_eq!(calibration.n_observations, 1);
            assert_eq!(calibration.carb_sensitivity, 0.4);

            // Chain the result back in as the next prior
            let prior = CString::new(result).unwrap();
            let next = take_string(glycal_update_calibration(
                prior.as_ptr(),
                metrics.as_ptr(),
                40.0,
                context.as_ptr(),
            ));
            assert_eq!(UserCalibration::from_json(&next).unwrap().n_observations, 2);
        }
    }

    #[test]
    fn test_ffi_tokenize() {
        let name = CString::new("Oatmeal with berries").unwrap();
        let items = CString::new(r#"["Rolled oats", "Blueberries"]"#).unwrap();

        unsafe {
            let result = take_string(glycal_tokenize_meal(name.as_ptr(), items.as_ptr()));
            let tokens: Vec<String> = serde_json::from_str(&result).unwrap();
            assert_eq!(tokens, vec!["oatmeal", "berries", "rolled", "oats", "blueberries"]);

            let result = take_string(glycal_tokenize_meal(name.as_ptr(), ptr::null()));
            assert_eq!(result, r#"["oatmeal","berries"]"#);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let metrics = CString::new("not json").unwrap();
        let context = CString::new("{}").unwrap();

        unsafe {
            let result =
                glycal_update_calibration(ptr::null(), metrics.as_ptr(), 40.0, context.as_ptr());
            assert!(result.is_null());

            let error = glycal_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("Invalid JSON"));
        }
    }

    #[test]
    fn test_ffi_rejects_negative_carbs() {
        let metrics = CString::new(
            r#"{"baseline_glucose": 5.5, "peak_glucose": 5.5, "peak_delta": 0.0,
                "time_to_peak_min": null, "auc_0_180": null, "is_quality": false}"#,
        )
        .unwrap();
        let context = CString::new(r#"{"activity_score": 0.0, "sleep_deficit": 0.0, "sleep_hours": null}"#)
            .unwrap();

        unsafe {
            let result =
                glycal_update_calibration(ptr::null(), metrics.as_ptr(), -5.0, context.as_ptr());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(glycal_last_error()).to_str().unwrap();
            assert!(error_str.contains("net_carbs_g"));
        }
    }

    #[test]
    fn test_ffi_rejects_non_utf8_prior() {
        let prior = CString::new(vec![0xff, 0xfe]).unwrap();
        let metrics = CString::new(
            r#"{"baseline_glucose": 5.5, "peak_glucose": 7.5, "peak_delta": 2.0,
                "time_to_peak_min": 45.0, "auc_0_180": 120.0, "is_quality": true}"#,
        )
        .unwrap();
        let context = CString::new(r#"{"activity_score": 0.0, "sleep_deficit": 0.0, "sleep_hours": null}"#)
            .unwrap();

        unsafe {
            let result =
                glycal_update_calibration(prior.as_ptr(), metrics.as_ptr(), 40.0, context.as_ptr());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(glycal_last_error()).to_str().unwrap();
            assert!(error_str.contains("prior_json is not valid UTF-8"));
        }
    }

    #[test]
    fn test_ffi_rejects_non_utf8_items() {
        let name = CString::new("Toast").unwrap();
        let items = CString::new(vec![b'[', 0xff, b']']).unwrap();

        unsafe {
            let result = glycal_tokenize_meal(name.as_ptr(), items.as_ptr());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(glycal_last_error()).to_str().unwrap();
            assert!(error_str.contains("items_json is not valid UTF-8"));
        }
    }

    #[test]
    fn test_ffi_default_and_version() {
        unsafe {
            let result = take_string(glycal_default_calibration());
            assert_eq!(UserCalibration::from_json(&result).unwrap(), UserCalibration::default());

            let version = CStr::from_ptr(glycal_version()).to_str().unwrap();
            assert!(!version.is_empty());
        }
    }
}
