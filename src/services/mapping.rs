//! Field mapping engine.
//!
//! Converts a source event payload into a CRM-shaped payload using the
//! integration's declarative mapping rules. Stateless apart from reading
//! the CRM schema; identical inputs always produce identical output.

use crate::error::{Error, Result};
use crate::models::crm_schema::CrmSchema;
use crate::models::integration::{FieldMapping, FieldTransform};
use crate::utils::json_path::{resolve_path, set_path, value_to_string};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const TARGET_OBJECTS: &[&str] = &["person", "deal", "activity"];

lazy_static! {
    // Fixed-format targets carrying a constant id in the path itself.
    static ref STAGE_TARGET: Regex = Regex::new(r"^deal\.stage_id\.(\d+)$").unwrap();
    static ref ACTIVITY_TYPE_TARGET: Regex = Regex::new(r"^activity\.type\.(\d+)$").unwrap();
    static ref OWNER_TARGET: Regex =
        Regex::new(r"^(person|deal|activity)\.owner_id\.(\d+)$").unwrap();
    static ref CUSTOM_OPTION_TARGET: Regex =
        Regex::new(r"^(person|deal|activity)\.([A-Za-z0-9_]+)\.(\d+)$").unwrap();
}

/// Apply every mapping rule to `source` and assemble the per-object output
/// payload. A required rule whose source path is absent aborts the whole
/// transform; optional rules skip silently.
pub fn transform(
    source: &Value,
    mappings: &[FieldMapping],
    schema: &CrmSchema,
) -> Result<Value> {
    let mut output = Map::new();

    for mapping in mappings {
        let value = match resolve_path(source, &mapping.source_field) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                if mapping.required {
                    return Err(Error::Mapping(format!(
                        "Required source field {} is missing",
                        mapping.source_field
                    )));
                }
                debug!(
                    "Skipping mapping {} -> {}: source field absent",
                    mapping.source_field, mapping.target_field
                );
                continue;
            }
        };

        let value = match mapping.transform {
            Some(transform) => apply_transform(transform, value),
            None => value,
        };

        place(&mut output, &mapping.target_field, value, schema);
    }

    validate_against_schema(&mut output, schema);
    Ok(Value::Object(output))
}

fn apply_transform(transform: FieldTransform, value: Value) -> Value {
    let text = value_to_string(&value);
    match transform {
        FieldTransform::Uppercase => Value::String(text.to_uppercase()),
        FieldTransform::Lowercase => Value::String(text.to_lowercase()),
        FieldTransform::Capitalize => {
            let mut chars = text.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => text,
            };
            Value::String(capitalized)
        }
        FieldTransform::Truncate100 => {
            Value::String(text.chars().take(100).collect::<String>())
        }
        FieldTransform::PhoneFormat => Value::String(format_phone(&text)),
        FieldTransform::Unknown => {
            warn!("Unknown field transform; passing value through");
            value
        }
    }
}

/// Strip non-digits; exactly ten digits render as `(XXX) XXX-XXXX`,
/// anything else stays as the digit string.
fn format_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..10])
    } else {
        digits
    }
}

/// Place a mapped value. Fixed-format targets (constant ids embedded in
/// the path) take precedence; then plain `object.path` placement; targets
/// matching neither are dropped with a warning, never an error.
fn place(output: &mut Map<String, Value>, target_field: &str, value: Value, schema: &CrmSchema) {
    if let Some(caps) = STAGE_TARGET.captures(target_field) {
        if let Ok(id) = caps[1].parse::<i64>() {
            set_path(output, "deal.stage_id", json!(id));
            return;
        }
    }
    if let Some(caps) = ACTIVITY_TYPE_TARGET.captures(target_field) {
        if let Ok(id) = caps[1].parse::<i64>() {
            set_path(output, "activity.type", json!(id));
            return;
        }
    }
    if let Some(caps) = OWNER_TARGET.captures(target_field) {
        if let Ok(id) = caps[2].parse::<i64>() {
            set_path(output, &format!("{}.owner_id", &caps[1]), json!(id));
            return;
        }
    }
    if let Some(caps) = CUSTOM_OPTION_TARGET.captures(target_field) {
        let (object, key) = (&caps[1], &caps[2]);
        if schema.has_custom_field(object, key) {
            if let Ok(option_id) = caps[3].parse::<i64>() {
                set_path(output, &format!("{}.{}", object, key), json!(option_id));
                return;
            }
        }
    }

    let (object, rest) = match target_field.split_once('.') {
        Some(parts) => parts,
        None => (target_field, ""),
    };
    if TARGET_OBJECTS.contains(&object) && !rest.is_empty() {
        set_path(output, target_field, value);
        return;
    }

    warn!(
        "Dropping mapping target {}: matches no known object or format",
        target_field
    );
}

/// Cross-check id-bearing fields against the schema, removing anything
/// the CRM would reject. A person payload without a name-ish field is
/// only worth a warning.
fn validate_against_schema(output: &mut Map<String, Value>, schema: &CrmSchema) {
    if let Some(deal) = output.get_mut("deal").and_then(Value::as_object_mut) {
        if !schema.stages.is_empty() {
            if let Some(id) = deal.get("stage_id").and_then(Value::as_i64) {
                if !schema.has_stage(id) {
                    warn!("Removing unknown deal stage id {}", id);
                    deal.remove("stage_id");
                }
            }
        }
        if !schema.pipelines.is_empty() {
            if let Some(id) = deal.get("pipeline_id").and_then(Value::as_i64) {
                if !schema.has_pipeline(id) {
                    warn!("Removing unknown deal pipeline id {}", id);
                    deal.remove("pipeline_id");
                }
            }
        }
    }

    if let Some(activity) = output.get_mut("activity").and_then(Value::as_object_mut) {
        if !schema.activity_types.is_empty() {
            if let Some(id) = activity.get("type").and_then(Value::as_i64) {
                if !schema.has_activity_type(id) {
                    warn!("Removing unknown activity type id {}", id);
                    activity.remove("type");
                }
            }
        }
    }

    if let Some(person) = output.get("person").and_then(Value::as_object) {
        let has_name = ["name", "first_name", "last_name"]
            .iter()
            .any(|k| person.contains_key(*k));
        if !has_name {
            warn!("Mapped person payload has no name field");
        }
    }
}

struct SuggestionRule {
    source: Regex,
    target: &'static str,
}

lazy_static! {
    static ref SUGGESTION_RULES: Vec<SuggestionRule> = vec![
        SuggestionRule {
            source: Regex::new(r"(?i)phone|mobile|tel").unwrap(),
            target: "person.phone",
        },
        SuggestionRule {
            source: Regex::new(r"(?i)e[-_]?mail").unwrap(),
            target: "person.email",
        },
        SuggestionRule {
            source: Regex::new(r"(?i)company|organi[sz]ation").unwrap(),
            target: "person.org_name",
        },
        SuggestionRule {
            source: Regex::new(r"(?i)amount|value|price|revenue|budget").unwrap(),
            target: "deal.value",
        },
        SuggestionRule {
            source: Regex::new(r"(?i)title|subject").unwrap(),
            target: "deal.title",
        },
        SuggestionRule {
            source: Regex::new(r"(?i)note|summary|description|comment").unwrap(),
            target: "activity.note",
        },
        SuggestionRule {
            source: Regex::new(r"(?i)name").unwrap(),
            target: "person.name",
        },
    ];
}

/// Propose mappings for a list of source field names. First matching rule
/// wins per field; fields matching nothing fall back to a schema custom
/// field with the same name, or no suggestion at all. The proposed
/// transform keys off the TARGET field name.
pub fn suggest_field_mappings(source_fields: &[String], schema: &CrmSchema) -> Vec<FieldMapping> {
    source_fields
        .iter()
        .filter_map(|field| {
            let target = SUGGESTION_RULES
                .iter()
                .find(|rule| rule.source.is_match(field))
                .map(|rule| rule.target.to_string())
                .or_else(|| custom_field_target(field, schema));
            target.map(|target_field| FieldMapping {
                source_field: field.clone(),
                transform: suggest_transform(&target_field),
                target_field,
                required: false,
            })
        })
        .collect()
}

fn custom_field_target(field: &str, schema: &CrmSchema) -> Option<String> {
    let wanted = field.to_lowercase();
    if let Some(f) = schema
        .deal_fields
        .iter()
        .find(|f| f.name.to_lowercase() == wanted)
    {
        return Some(format!("deal.{}", f.key));
    }
    if let Some(f) = schema
        .person_fields
        .iter()
        .find(|f| f.name.to_lowercase() == wanted)
    {
        return Some(format!("person.{}", f.key));
    }
    None
}

fn suggest_transform(target_field: &str) -> Option<FieldTransform> {
    if target_field.contains("phone") {
        Some(FieldTransform::PhoneFormat)
    } else if target_field.ends_with("name") {
        Some(FieldTransform::Capitalize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::crm_schema::{CrmActivityType, CrmField, CrmPipeline, CrmStage};

    fn mapping(source: &str, target: &str) -> FieldMapping {
        FieldMapping {
            source_field: source.to_string(),
            target_field: target.to_string(),
            transform: None,
            required: false,
        }
    }

    fn schema() -> CrmSchema {
        CrmSchema {
            stages: vec![CrmStage {
                id: 5,
                name: "Qualified".into(),
                pipeline_id: Some(1),
            }],
            pipelines: vec![CrmPipeline {
                id: 1,
                name: "Sales".into(),
            }],
            deal_fields: vec![CrmField {
                key: "lead_source".into(),
                name: "Lead Source".into(),
                options: vec![],
            }],
            activity_types: vec![CrmActivityType {
                id: 2,
                name: "Call".into(),
            }],
            ..CrmSchema::default()
        }
    }

    #[test]
    fn phone_format_renders_ten_digit_numbers() {
        assert_eq!(format_phone("555-123-4567"), "(555) 123-4567");
        assert_eq!(format_phone("+447366842442"), "447366842442");
    }

    #[test]
    fn constant_id_targets_set_ids_from_the_path() {
        let source = serde_json::json!({"call": {"call_status": "ended"}});
        let mappings = vec![
            mapping("call.call_status", "deal.stage_id.5"),
            mapping("call.call_status", "activity.type.2"),
            mapping("call.call_status", "deal.owner_id.99"),
        ];
        let out = transform(&source, &mappings, &schema()).unwrap();
        assert_eq!(out["deal"]["stage_id"], 5);
        assert_eq!(out["deal"]["owner_id"], 99);
        assert_eq!(out["activity"]["type"], 2);
    }

    #[test]
    fn custom_option_targets_require_a_known_field_key() {
        let source = serde_json::json!({"x": "y"});
        let known = vec![mapping("x", "deal.lead_source.12")];
        let out = transform(&source, &known, &schema()).unwrap();
        assert_eq!(out["deal"]["lead_source"], 12);

        let unknown = vec![mapping("x", "deal.some_other_field.12")];
        let out = transform(&source, &unknown, &schema()).unwrap();
        // Unknown custom key: not a fixed format, and the nested plain
        // placement writes an object rather than an option id.
        assert_ne!(out["deal"]["some_other_field"], 12);
    }

    #[test]
    fn unknown_stage_ids_are_removed_by_validation() {
        let source = serde_json::json!({"s": "ended"});
        let mappings = vec![mapping("s", "deal.stage_id.999")];
        let out = transform(&source, &mappings, &schema()).unwrap();
        assert!(out["deal"].get("stage_id").is_none());
    }
}
