//! `{{dotted.path}}` placeholder resolution for workflow action fields.
//!
//! Deliberately not a template language: tokens resolve against a context
//! object via dot-path lookup, and anything that does not resolve is left
//! in the output verbatim.

use crate::utils::json_path::{resolve_path, value_to_string};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap();
}

pub fn resolve_template(template: &str, context: &Value) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &Captures| {
            match resolve_path(context, &caps[1]) {
                Some(value) if !value.is_null() => value_to_string(value),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Resolve every string value in an action's field map. Non-string values
/// pass through as literals.
pub fn resolve_fields(fields: &Value, context: &Value) -> Value {
    match fields {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_fields(v, context)))
                .collect(),
        ),
        Value::String(s) => Value::String(resolve_template(s, context)),
        other => other.clone(),
    }
}
