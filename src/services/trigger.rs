//! Trigger filter evaluation.
//!
//! Two entry points with deliberately different defaults: the generic
//! filter list used at webhook intake fails OPEN on an operator it does
//! not recognize, while workflow conditions evaluated through
//! `evaluate_condition` fail CLOSED when the semantic detector branch
//! does not recognize the operator. Basic filters are permissive; smart
//! detectors are conservative.

use crate::models::integration::{FilterOperator, TriggerFilter};
use crate::utils::json_path::{resolve_path, value_to_f64, value_to_string};
use serde_json::Value;
use tracing::warn;

const SUCCESS_KEYWORDS: &[&str] = &[
    "success",
    "successful",
    "booked",
    "confirmed",
    "scheduled",
    "completed",
    "yes",
    "interested",
];

const BOOKING_KEYWORDS: &[&str] = &[
    "book",
    "booked",
    "booking",
    "appointment",
    "meeting",
    "demo",
    "consultation",
    "schedule",
    "scheduled",
];

/// Calls shorter than this are treated as failed connects.
const SHORT_CALL_THRESHOLD_MS: f64 = 30_000.0;

/// AND-combined filter list gating whether an event is processed at all.
/// An empty list always matches.
pub fn evaluate_filters(payload: &Value, filters: &[TriggerFilter]) -> bool {
    filters.iter().all(|filter| {
        let actual = resolve_path(payload, &filter.field);
        match compare(filter.operator, actual, &filter.value) {
            Some(matched) => matched,
            None => {
                warn!(
                    "Unknown trigger filter operator {:?} on {}; allowing event through",
                    filter.operator, filter.field
                );
                true
            }
        }
    })
}

/// Workflow condition evaluation: plain operators behave as in
/// `evaluate_filters`, semantic operators run their detector, and
/// anything else is rejected.
pub fn evaluate_condition(payload: &Value, filter: &TriggerFilter) -> bool {
    let actual = resolve_path(payload, &filter.field);
    if let Some(matched) = compare(filter.operator, actual, &filter.value) {
        return matched;
    }
    match filter.operator {
        FilterOperator::IndicatesSuccess => indicates_success(payload),
        FilterOperator::IndicatesBooking => indicates_booking(payload),
        FilterOperator::IndicatesFailure => indicates_failure(payload),
        other => {
            warn!(
                "Unrecognized workflow condition operator {:?}; rejecting",
                other
            );
            false
        }
    }
}

pub fn evaluate_conditions(payload: &Value, conditions: &[TriggerFilter]) -> bool {
    conditions
        .iter()
        .all(|condition| evaluate_condition(payload, condition))
}

/// Plain operator comparison; `None` for operators this table does not
/// cover (semantic detectors and unknown operators).
fn compare(operator: FilterOperator, actual: Option<&Value>, expected: &Value) -> Option<bool> {
    let equals = || match actual {
        Some(a) => a == expected || value_to_string(a) == value_to_string(expected),
        None => false,
    };
    let contains = || match actual {
        Some(Value::Array(items)) => items.iter().any(|item| item == expected),
        Some(a) => value_to_string(a).contains(&value_to_string(expected)),
        None => false,
    };
    let exists = || matches!(actual, Some(v) if !v.is_null());

    match operator {
        FilterOperator::Equals => Some(equals()),
        FilterOperator::NotEquals => Some(!equals()),
        FilterOperator::Contains => Some(contains()),
        FilterOperator::NotContains => Some(!contains()),
        FilterOperator::GreaterThan => Some(matches!(
            (actual.and_then(value_to_f64), value_to_f64(expected)),
            (Some(a), Some(b)) if a > b
        )),
        FilterOperator::LessThan => Some(matches!(
            (actual.and_then(value_to_f64), value_to_f64(expected)),
            (Some(a), Some(b)) if a < b
        )),
        FilterOperator::Exists => Some(exists()),
        FilterOperator::NotExists => Some(!exists()),
        _ => None,
    }
}

fn analysis_of(payload: &Value) -> Option<&Value> {
    resolve_path(payload, "call.call_analysis").or_else(|| resolve_path(payload, "call_analysis"))
}

fn duration_ms_of(payload: &Value) -> Option<f64> {
    resolve_path(payload, "call.duration_ms")
        .or_else(|| resolve_path(payload, "duration_ms"))
        .and_then(value_to_f64)
}

fn custom_data_of(payload: &Value) -> Option<&serde_json::Map<String, Value>> {
    analysis_of(payload)?
        .get("custom_analysis_data")
        .and_then(Value::as_object)
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    let lowered = haystack.to_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}

/// The standard success flag is set, or any custom-analysis value carries
/// a success keyword.
pub fn indicates_success(payload: &Value) -> bool {
    let analysis = match analysis_of(payload) {
        Some(a) => a,
        None => return false,
    };
    if analysis.get("call_successful").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    custom_data_of(payload)
        .map(|data| {
            data.values()
                .any(|v| contains_any(&value_to_string(v), SUCCESS_KEYWORDS))
        })
        .unwrap_or(false)
}

/// Any custom-analysis key or value mentions booking.
pub fn indicates_booking(payload: &Value) -> bool {
    custom_data_of(payload)
        .map(|data| {
            data.iter().any(|(k, v)| {
                contains_any(k, BOOKING_KEYWORDS)
                    || contains_any(&value_to_string(v), BOOKING_KEYWORDS)
            })
        })
        .unwrap_or(false)
}

/// Explicit failure flag, voicemail, a short connect, or no analysis data
/// at all.
pub fn indicates_failure(payload: &Value) -> bool {
    let analysis = match analysis_of(payload) {
        Some(a) => a,
        None => return true,
    };
    if analysis.get("call_successful").and_then(Value::as_bool) == Some(false) {
        return true;
    }
    if analysis.get("in_voicemail").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    matches!(duration_ms_of(payload), Some(ms) if ms < SHORT_CALL_THRESHOLD_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(field: &str, operator: FilterOperator, value: Value) -> TriggerFilter {
        TriggerFilter {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn empty_filter_list_always_matches() {
        assert!(evaluate_filters(&json!({}), &[]));
    }

    #[test]
    fn equals_matches_only_on_exact_value() {
        let filters = vec![filter("a.b", FilterOperator::Equals, json!("x"))];
        assert!(evaluate_filters(&json!({"a": {"b": "x"}}), &filters));
        assert!(!evaluate_filters(&json!({"a": {"b": "y"}}), &filters));
        assert!(!evaluate_filters(&json!({"a": {}}), &filters));
    }

    #[test]
    fn filters_are_and_combined() {
        let filters = vec![
            filter("call.call_status", FilterOperator::Equals, json!("ended")),
            filter("call.duration_ms", FilterOperator::GreaterThan, json!(1000)),
        ];
        let payload = json!({"call": {"call_status": "ended", "duration_ms": 500}});
        assert!(!evaluate_filters(&payload, &filters));
        let payload = json!({"call": {"call_status": "ended", "duration_ms": 5000}});
        assert!(evaluate_filters(&payload, &filters));
    }

    #[test]
    fn exists_and_not_exists() {
        let payload = json!({"call": {"transcript": "hello", "gone": null}});
        assert!(evaluate_filters(
            &payload,
            &[filter("call.transcript", FilterOperator::Exists, json!(null))]
        ));
        assert!(evaluate_filters(
            &payload,
            &[filter("call.gone", FilterOperator::NotExists, json!(null))]
        ));
        assert!(evaluate_filters(
            &payload,
            &[filter("call.missing", FilterOperator::NotExists, json!(null))]
        ));
    }

    #[test]
    fn unknown_operator_fails_open_for_plain_filters() {
        let filters = vec![filter("a", FilterOperator::Unknown, json!(1))];
        assert!(evaluate_filters(&json!({}), &filters));
    }

    #[test]
    fn unknown_operator_fails_closed_for_conditions() {
        let condition = filter("a", FilterOperator::Unknown, json!(1));
        assert!(!evaluate_condition(&json!({}), &condition));
    }

    #[test]
    fn success_detector_reads_flag_and_keywords() {
        assert!(indicates_success(
            &json!({"call": {"call_analysis": {"call_successful": true}}})
        ));
        assert!(indicates_success(&json!({"call": {"call_analysis": {
            "custom_analysis_data": {"outcome": "Appointment booked for Tuesday"}
        }}})));
        assert!(!indicates_success(&json!({"call": {}})));
    }

    #[test]
    fn booking_detector_scans_keys_and_values() {
        assert!(indicates_booking(&json!({"call_analysis": {
            "custom_analysis_data": {"booking_date": "2026-08-10"}
        }})));
        assert!(indicates_booking(&json!({"call_analysis": {
            "custom_analysis_data": {"note": "wants a demo"}
        }})));
        assert!(!indicates_booking(&json!({"call_analysis": {
            "custom_analysis_data": {"note": "wrong number"}
        }})));
    }

    #[test]
    fn failure_detector_covers_voicemail_short_calls_and_missing_analysis() {
        assert!(indicates_failure(&json!({"call": {}})));
        assert!(indicates_failure(
            &json!({"call": {"call_analysis": {"call_successful": false}}})
        ));
        assert!(indicates_failure(
            &json!({"call": {"call_analysis": {"in_voicemail": true}}})
        ));
        assert!(indicates_failure(&json!({"call": {
            "call_analysis": {"call_successful": true},
            "duration_ms": 12_000
        }})));
        assert!(!indicates_failure(&json!({"call": {
            "call_analysis": {"call_successful": true},
            "duration_ms": 95_000
        }})));
    }

    #[test]
    fn semantic_condition_dispatches_detectors() {
        let payload = json!({"call": {"call_analysis": {"call_successful": true}, "duration_ms": 60_000}});
        assert!(evaluate_condition(
            &payload,
            &filter("call", FilterOperator::IndicatesSuccess, json!(null))
        ));
        assert!(!evaluate_condition(
            &payload,
            &filter("call", FilterOperator::IndicatesFailure, json!(null))
        ));
    }
}
