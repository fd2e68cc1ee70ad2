use callsync_backend::error::Error;
use callsync_backend::models::crm_schema::CrmSchema;
use callsync_backend::models::integration::{FieldMapping, FieldTransform};
use callsync_backend::services::mapping::{suggest_field_mappings, transform};
use serde_json::json;

fn mapping(source: &str, target: &str, transform: Option<FieldTransform>, required: bool) -> FieldMapping {
    FieldMapping {
        source_field: source.to_string(),
        target_field: target.to_string(),
        transform,
        required,
    }
}

fn call_payload() -> serde_json::Value {
    json!({
        "call": {
            "call_id": "c_123",
            "from_number": "5551234567",
            "call_analysis": {
                "call_summary": "Jane called about pricing",
                "custom_analysis_data": {
                    "customer_name": "jane doe",
                    "deal_value": "1200"
                }
            }
        }
    })
}

#[test]
fn maps_nested_source_fields_into_object_buckets() {
    let mappings = vec![
        mapping(
            "call.call_analysis.custom_analysis_data.customer_name",
            "person.name",
            Some(FieldTransform::Capitalize),
            false,
        ),
        mapping(
            "call.from_number",
            "person.phone",
            Some(FieldTransform::PhoneFormat),
            false,
        ),
        mapping(
            "call.call_analysis.custom_analysis_data.deal_value",
            "deal.value",
            None,
            false,
        ),
    ];

    let out = transform(&call_payload(), &mappings, &CrmSchema::default()).unwrap();
    assert_eq!(out["person"]["name"], "Jane doe");
    assert_eq!(out["person"]["phone"], "(555) 123-4567");
    assert_eq!(out["deal"]["value"], "1200");
}

#[test]
fn transform_is_idempotent_for_identical_inputs() {
    let mappings = vec![
        mapping("call.from_number", "person.phone", Some(FieldTransform::PhoneFormat), false),
        mapping("call.call_id", "activity.note", Some(FieldTransform::Uppercase), false),
    ];
    let schema = CrmSchema::default();
    let payload = call_payload();

    let first = transform(&payload, &mappings, &schema).unwrap();
    let second = transform(&payload, &mappings, &schema).unwrap();
    assert_eq!(first, second);
}

#[test]
fn required_mapping_with_absent_source_aborts() {
    let mappings = vec![
        mapping("call.from_number", "person.phone", None, false),
        mapping("call.missing_field", "person.email", None, true),
    ];
    let err = transform(&call_payload(), &mappings, &CrmSchema::default()).unwrap_err();
    assert!(matches!(err, Error::Mapping(_)));
}

#[test]
fn optional_mapping_with_absent_source_is_skipped() {
    let mappings = vec![
        mapping("call.missing_field", "person.email", None, false),
        mapping("call.from_number", "person.phone", None, false),
    ];
    let out = transform(&call_payload(), &mappings, &CrmSchema::default()).unwrap();
    assert!(out["person"].get("email").is_none());
    assert_eq!(out["person"]["phone"], "5551234567");
}

#[test]
fn unmatched_target_patterns_are_dropped_not_fatal() {
    let mappings = vec![
        mapping("call.call_id", "organization.name", None, false),
        mapping("call.from_number", "person.phone", None, false),
    ];
    let out = transform(&call_payload(), &mappings, &CrmSchema::default()).unwrap();
    assert!(out.get("organization").is_none());
    assert_eq!(out["person"]["phone"], "5551234567");
}

#[test]
fn truncate_caps_at_one_hundred_chars() {
    let payload = json!({"note": "x".repeat(250)});
    let mappings = vec![mapping("note", "activity.note", Some(FieldTransform::Truncate100), false)];
    let out = transform(&payload, &mappings, &CrmSchema::default()).unwrap();
    assert_eq!(out["activity"]["note"].as_str().unwrap().len(), 100);
}

#[test]
fn suggestions_follow_the_fixed_ruleset() {
    let fields = vec![
        "customer_phone".to_string(),
        "email_address".to_string(),
        "company".to_string(),
        "deal_amount".to_string(),
        "first_name".to_string(),
        "shoe_size".to_string(),
    ];
    let suggestions = suggest_field_mappings(&fields, &CrmSchema::default());

    let target_for = |source: &str| {
        suggestions
            .iter()
            .find(|s| s.source_field == source)
            .map(|s| s.target_field.clone())
    };
    assert_eq!(target_for("customer_phone").as_deref(), Some("person.phone"));
    assert_eq!(target_for("email_address").as_deref(), Some("person.email"));
    assert_eq!(target_for("company").as_deref(), Some("person.org_name"));
    assert_eq!(target_for("deal_amount").as_deref(), Some("deal.value"));
    assert_eq!(target_for("first_name").as_deref(), Some("person.name"));
    assert_eq!(target_for("shoe_size"), None);

    let phone = suggestions
        .iter()
        .find(|s| s.source_field == "customer_phone")
        .unwrap();
    assert_eq!(phone.transform, Some(FieldTransform::PhoneFormat));
    let name = suggestions
        .iter()
        .find(|s| s.source_field == "first_name")
        .unwrap();
    assert_eq!(name.transform, Some(FieldTransform::Capitalize));
}
