//! FFI bindings for the titration engine
//!
//! This module provides C-compatible functions for calling the engine from other
//! languages. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `titration_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::clock::calculate_bedtime;
use crate::config::TitrationConfig;
use crate::metrics::compute_sleep_metrics;
use crate::titration::titrate;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

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

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn json_result<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Bedtime (`HH:MM`) that gives `time_in_bed_minutes` before `wake_time`.
///
/// # Safety
/// - `wake_time` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `titration_free_string`.
/// - Returns NULL on error; call `titration_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn titration_calculate_bedtime(
    wake_time: *const c_char,
    time_in_bed_minutes: u32,
) -> *mut c_char {
    clear_last_error();

    let wake = match cstr_to_string(wake_time) {
        Some(s) => s,
        None => {
            set_last_error("Invalid wake time string pointer");
            return ptr::null_mut();
        }
    };

    match calculate_bedtime(&wake, time_in_bed_minutes) {
        Ok(bedtime) => string_to_cstr(&bedtime),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

#[derive(Deserialize)]
struct MetricsRequest {
    bedtime: NaiveDateTime,
    out_of_bed_time: NaiveDateTime,
    #[serde(default)]
    sleep_onset_latency_minutes: u32,
    #[serde(default)]
    wake_after_sleep_onset_minutes: u32,
}

/// Sleep metrics for one night, as JSON.
///
/// Input: `{"bedtime": "...", "out_of_bed_time": "...",
/// "sleep_onset_latency_minutes": n, "wake_after_sleep_onset_minutes": n}`
/// with ISO-8601 local timestamps.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `titration_free_string`.
/// - Returns NULL on error; call `titration_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn titration_sleep_metrics(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    match serde_json::from_str::<MetricsRequest>(&json_str) {
        Ok(req) => json_result(&compute_sleep_metrics(
            req.bedtime,
            req.out_of_bed_time,
            req.sleep_onset_latency_minutes,
            req.wake_after_sleep_onset_minutes,
        )),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// One titration step with default constants, as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `titration_free_string`.
#[no_mangle]
pub unsafe extern "C" fn titration_weekly_step(
    avg_efficiency_percent: f64,
    current_time_in_bed_minutes: u32,
) -> *mut c_char {
    clear_last_error();
    let step = titrate(
        &TitrationConfig::default(),
        avg_efficiency_percent,
        current_time_in_bed_minutes,
    );
    json_result(&step)
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by titration functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a titration function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn titration_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next titration call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn titration_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn titration_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        titration_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_calculate_bedtime() {
        unsafe {
            let wake = CString::new("07:00").unwrap();
            assert_eq!(take(titration_calculate_bedtime(wake.as_ptr(), 480)), "23:00");
        }
    }

    #[test]
    fn test_ffi_sleep_metrics() {
        unsafe {
            let req = CString::new(
                r#"{"bedtime": "2024-01-15T23:00:00", "out_of_bed_time": "2024-01-16T07:00:00",
                    "sleep_onset_latency_minutes": 20, "wake_after_sleep_onset_minutes": 28}"#,
            )
            .unwrap();
            let json: serde_json::Value =
                serde_json::from_str(&take(titration_sleep_metrics(req.as_ptr()))).unwrap();
            assert_eq!(json["time_in_bed_minutes"], 480);
            assert_eq!(json["sleep_efficiency_percent"], 90.0);
        }
    }

    #[test]
    fn test_ffi_weekly_step() {
        unsafe {
            let json: serde_json::Value =
                serde_json::from_str(&take(titration_weekly_step(95.0, 540))).unwrap();
            assert_eq!(json["decision"], "maintain");
            assert_eq!(json["time_in_bed_minutes"], 540);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let bad = CString::new("25:00").unwrap();
            assert!(titration_calculate_bedtime(bad.as_ptr(), 480).is_null());

            let error = titration_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("25:00"));
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = titration_version();
            assert!(!version.is_null());
            assert!(!CStr::from_ptr(version).to_str().unwrap().is_empty());
        }
    }
}
