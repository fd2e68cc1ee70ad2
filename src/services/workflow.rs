//! Workflow execution engine.
//!
//! Runs the ordered action chains configured on an integration whenever a
//! matching event arrives. Actions see the results of earlier steps
//! through `previous_action_result` and `action_{i}_result` context slots;
//! the first failing action halts the rest of its chain, while other
//! workflows triggered by the same event run independently. There is no
//! rollback of steps that already succeeded.

use crate::error::{Error, Result};
use crate::models::integration::{ActionType, BusinessWorkflow, Integration, WorkflowAction};
use crate::services::crm::CrmClient;
use crate::services::trigger::evaluate_conditions;
use crate::utils::entity::generate_deal_title;
use crate::utils::json_path::{resolve_path, value_to_string};
use crate::utils::phone;
use crate::utils::template::resolve_fields;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action_type: String,
    pub success: bool,
    pub record_id: Option<Value>,
    pub data: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResult {
    pub workflow_id: String,
    pub workflow_name: String,
    pub actions: Vec<ActionOutcome>,
}

impl WorkflowRunResult {
    pub fn succeeded(&self) -> bool {
        self.actions.iter().all(|a| a.success)
    }
}

pub struct WorkflowEngine;

impl WorkflowEngine {
    /// Execute every enabled workflow whose trigger and conditions match
    /// the event. Disabled and empty workflows are skipped entirely and
    /// do not appear in the results.
    pub async fn execute_for_event(
        crm: &dyn CrmClient,
        integration: &Integration,
        event_type: &str,
        payload: &Value,
    ) -> Vec<WorkflowRunResult> {
        let mut results = Vec::new();
        for workflow in integration.workflows() {
            if !workflow.enabled || workflow.actions.is_empty() {
                continue;
            }
            if workflow.trigger.event != event_type {
                continue;
            }
            if !evaluate_conditions(payload, &workflow.conditions) {
                info!(
                    "Workflow {} conditions did not match event {}",
                    workflow.name, event_type
                );
                continue;
            }
            results.push(Self::run_workflow(crm, integration, &workflow, payload).await);
        }
        results
    }

    async fn run_workflow(
        crm: &dyn CrmClient,
        integration: &Integration,
        workflow: &BusinessWorkflow,
        payload: &Value,
    ) -> WorkflowRunResult {
        let mut context = match payload {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };

        let mut outcomes = Vec::new();
        for (index, action) in workflow.actions.iter().enumerate() {
            let context_value = Value::Object(context.clone());
            let fields = resolve_fields(&action.fields, &context_value);

            match Self::dispatch(crm, integration, action, fields, &context_value).await {
                Ok(record) => {
                    context.insert("previous_action_result".to_string(), record.clone());
                    context.insert(format!("action_{}_result", index), record.clone());
                    outcomes.push(ActionOutcome {
                        action_type: action.action_type.as_str().to_string(),
                        success: true,
                        record_id: record.get("id").cloned(),
                        data: Some(record),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(
                        "Workflow {} halted at action {} ({}): {}",
                        workflow.name,
                        index,
                        action.action_type.as_str(),
                        err
                    );
                    outcomes.push(ActionOutcome {
                        action_type: action.action_type.as_str().to_string(),
                        success: false,
                        record_id: None,
                        data: None,
                        error: Some(err.to_string()),
                    });
                    break;
                }
            }
        }

        WorkflowRunResult {
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            actions: outcomes,
        }
    }

    async fn dispatch(
        crm: &dyn CrmClient,
        integration: &Integration,
        action: &WorkflowAction,
        mut fields: Value,
        context: &Value,
    ) -> Result<Value> {
        let token = &integration.crm_access_token;
        match action.action_type {
            ActionType::CreatePerson => {
                Self::create_or_reconcile_person(crm, token, fields).await
            }
            ActionType::UpdatePerson => {
                let id = take_record_id(&mut fields)?;
                crm.update_person(token, &id, &fields).await
            }
            ActionType::CreateDeal => {
                enrich_deal_fields(&mut fields, integration, context);
                crm.create_deal(token, &fields).await
            }
            ActionType::UpdateDeal => {
                let id = take_record_id(&mut fields)?;
                crm.update_deal(token, &id, &fields).await
            }
            ActionType::CreateActivity => crm.create_activity(token, &fields).await,
            ActionType::UpdateActivity => {
                let id = take_record_id(&mut fields)?;
                crm.update_activity(token, &id, &fields).await
            }
            ActionType::Unknown => Err(Error::Config(
                "Unsupported workflow action type".to_string(),
            )),
        }
    }

    /// Search-before-create: look the person up under every representation
    /// of their phone number and update the match instead of inserting a
    /// duplicate contact.
    pub async fn create_or_reconcile_person(
        crm: &dyn CrmClient,
        token: &str,
        fields: Value,
    ) -> Result<Value> {
        let phone_raw = fields
            .get("phone")
            .map(value_to_string)
            .unwrap_or_default();

        for variation in phone::variations(&phone_raw) {
            let matches = crm.get_persons(token, &variation.format).await?;
            if let Some(existing) = matches.first() {
                let id = value_to_string(existing.get("id").unwrap_or(&Value::Null));
                if !id.is_empty() {
                    info!(
                        "Reconciled contact via {} representation {}",
                        variation.description, variation.format
                    );
                    return crm.update_person(token, &id, &fields).await;
                }
            }
        }

        crm.create_person(token, &fields).await
    }
}

fn take_record_id(fields: &mut Value) -> Result<String> {
    let id = fields
        .as_object_mut()
        .and_then(|map| map.remove("id"))
        .map(|v| value_to_string(&v))
        .unwrap_or_default();
    if id.is_empty() || id.contains("{{") {
        return Err(Error::Validation(
            "Update action is missing a resolvable record id".to_string(),
        ));
    }
    Ok(id)
}

/// Deals inherit the integration's configured pipeline and stage when the
/// action does not set them, and get a generated title when none resolves.
fn enrich_deal_fields(fields: &mut Value, integration: &Integration, context: &Value) {
    let map = match fields.as_object_mut() {
        Some(map) => map,
        None => return,
    };

    for key in ["pipeline_id", "stage_id"] {
        if !map.contains_key(key) {
            if let Some(v) = integration.crm_config.get(key) {
                map.insert(key.to_string(), v.clone());
            }
        }
    }

    let title_missing = map
        .get("title")
        .map(|t| value_to_string(t).trim().is_empty())
        .unwrap_or(true);
    if title_missing {
        let summary = resolve_path(context, "call.call_analysis.call_summary")
            .or_else(|| resolve_path(context, "call_analysis.call_summary"))
            .and_then(Value::as_str);
        let dynamic_vars = resolve_path(context, "call.retell_llm_dynamic_variables")
            .or_else(|| resolve_path(context, "retell_llm_dynamic_variables"));
        let phone_str = resolve_path(context, "call.from_number")
            .or_else(|| resolve_path(context, "from_number"))
            .map(value_to_string);
        let title = generate_deal_title(summary, dynamic_vars, phone_str.as_deref());
        map.insert("title".to_string(), json!(title));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::integration::WorkflowTrigger;
    use crate::services::crm::MockCrmClient;
    use uuid::Uuid;

    fn integration_with_workflows(workflows: Value) -> Integration {
        Integration {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "test".into(),
            crm_provider: "pipedrive".into(),
            crm_access_token: "tok".into(),
            webhook_secret: None,
            field_mappings: json!([]),
            trigger_filters: json!([]),
            workflows,
            crm_config: json!({"pipeline_id": 1, "stage_id": 5}),
            crm_schema: json!({}),
            notify_email: None,
            notify_on_success: false,
            notify_on_error: false,
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }

    fn three_action_workflow() -> Value {
        json!([{
            "id": "wf1",
            "name": "chain",
            "trigger": {"event": "call_analyzed"},
            "conditions": [],
            "actions": [
                {"type": "create_deal", "fields": {"title": "Deal one"}},
                {"type": "update_deal", "fields": {"id": "{{previous_action_result.id}}", "status": "won"}},
                {"type": "create_activity", "fields": {"subject": "Follow up"}}
            ],
            "enabled": true
        }])
    }

    #[tokio::test]
    async fn halts_on_first_failing_action() {
        let integration = integration_with_workflows(three_action_workflow());
        let mut crm = MockCrmClient::new();
        crm.expect_create_deal()
            .times(1)
            .returning(|_, _| Ok(json!({"id": 10, "title": "Deal one"})));
        crm.expect_update_deal()
            .times(1)
            .returning(|_, _, _| Err(Error::Internal("CRM exploded".into())));
        crm.expect_create_activity().times(0);

        let results = WorkflowEngine::execute_for_event(
            &crm,
            &integration,
            "call_analyzed",
            &json!({"call": {"call_id": "c1"}}),
        )
        .await;

        assert_eq!(results.len(), 1);
        let run = &results[0];
        assert_eq!(run.actions.len(), 2);
        assert!(run.actions[0].success);
        assert!(!run.actions[1].success);
        assert!(!run.succeeded());
    }

    #[tokio::test]
    async fn results_pass_between_steps() {
        let integration = integration_with_workflows(three_action_workflow());
        let mut crm = MockCrmClient::new();
        crm.expect_create_deal()
            .returning(|_, _| Ok(json!({"id": 77, "title": "Deal one"})));
        crm.expect_update_deal()
            .withf(|_, id, _| id == "77")
            .returning(|_, _, _| Ok(json!({"id": 77, "status": "won"})));
        crm.expect_create_activity()
            .returning(|_, _| Ok(json!({"id": 3})));

        let results = WorkflowEngine::execute_for_event(
            &crm,
            &integration,
            "call_analyzed",
            &json!({"call": {"call_id": "c1"}}),
        )
        .await;
        assert_eq!(results[0].actions.len(), 3);
        assert!(results[0].succeeded());
    }

    #[tokio::test]
    async fn disabled_and_empty_workflows_are_invisible() {
        let integration = integration_with_workflows(json!([
            {"id": "a", "name": "off", "trigger": {"event": "call_analyzed"},
             "actions": [{"type": "create_deal", "fields": {}}], "enabled": false},
            {"id": "b", "name": "empty", "trigger": {"event": "call_analyzed"},
             "actions": [], "enabled": true}
        ]));
        let crm = MockCrmClient::new();
        let results =
            WorkflowEngine::execute_for_event(&crm, &integration, "call_analyzed", &json!({}))
                .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_type_fails_that_workflow_only() {
        let integration = integration_with_workflows(json!([
            {"id": "a", "name": "bad", "trigger": {"event": "call_analyzed"},
             "actions": [{"type": "launch_rocket", "fields": {}}], "enabled": true},
            {"id": "b", "name": "good", "trigger": {"event": "call_analyzed"},
             "actions": [{"type": "create_activity", "fields": {"subject": "ok"}}], "enabled": true}
        ]));
        let mut crm = MockCrmClient::new();
        crm.expect_create_activity()
            .times(1)
            .returning(|_, _| Ok(json!({"id": 1})));

        let results =
            WorkflowEngine::execute_for_event(&crm, &integration, "call_analyzed", &json!({}))
                .await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].succeeded());
        assert!(results[0].actions[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Unsupported"));
        assert!(results[1].succeeded());
    }

    #[tokio::test]
    async fn person_creation_reconciles_by_phone_variation() {
        let mut crm = MockCrmClient::new();
        crm.expect_get_persons()
            .withf(|_, term| term == "07366842442")
            .returning(|_, _| Ok(vec![]));
        crm.expect_get_persons()
            .withf(|_, term| term == "+447366842442")
            .returning(|_, _| Ok(vec![json!({"id": 42, "name": "Jane"})]));
        crm.expect_get_persons()
            .withf(|_, term| term == "447366842442")
            .returning(|_, _| Ok(vec![]));
        crm.expect_update_person()
            .times(1)
            .withf(|_, id, _| id == "42")
            .returning(|_, _, _| Ok(json!({"id": 42, "name": "Jane Doe"})));
        crm.expect_create_person().times(0);

        let record = WorkflowEngine::create_or_reconcile_person(
            &crm,
            "tok",
            json!({"name": "Jane Doe", "phone": "07366842442"}),
        )
        .await
        .unwrap();
        assert_eq!(record["id"], 42);
    }

    #[tokio::test]
    async fn person_creation_falls_back_to_create() {
        let mut crm = MockCrmClient::new();
        crm.expect_get_persons().returning(|_, _| Ok(vec![]));
        crm.expect_create_person()
            .times(1)
            .returning(|_, _| Ok(json!({"id": 7})));

        let record = WorkflowEngine::create_or_reconcile_person(
            &crm,
            "tok",
            json!({"name": "New Caller", "phone": "07366842442"}),
        )
        .await
        .unwrap();
        assert_eq!(record["id"], 7);
    }
}
