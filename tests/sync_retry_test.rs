use callsync_backend::models::sync_event::{SyncEvent, SyncStatus};
use callsync_backend::services::sync::{
    begin_attempt, record_failure, record_success, reset_for_requeue, retry_delay_ms,
    FailureDisposition, DEFAULT_MAX_RETRIES,
};
use serde_json::json;
use uuid::Uuid;

fn fresh_event() -> SyncEvent {
    SyncEvent {
        id: Uuid::new_v4(),
        integration_id: Uuid::new_v4(),
        event_type: "call_triggered".into(),
        status: "pending".into(),
        source_payload: json!({"call": {"call_id": "c_1"}}),
        mapped_payload: None,
        call_id: Some("c_1".into()),
        error_message: None,
        retry_count: 0,
        max_retries: DEFAULT_MAX_RETRIES,
        next_attempt_at: None,
        processed_at: None,
        created_at: None,
        updated_at: None,
    }
}

#[test]
fn retry_budget_invariant_holds_while_retrying() {
    let mut event = fresh_event();
    loop {
        begin_attempt(&mut event);
        match record_failure(&mut event, "CRM timeout", true) {
            FailureDisposition::Retry { .. } => {
                assert_eq!(event.status().unwrap(), SyncStatus::Retrying);
                assert!(event.retry_count <= event.max_retries);
            }
            FailureDisposition::Terminal => break,
        }
    }
    assert_eq!(event.status().unwrap(), SyncStatus::Failed);
    assert_eq!(event.retry_count, DEFAULT_MAX_RETRIES + 1);
}

/// Four consecutive failures drive
/// pending -> processing -> retrying(1) -> processing -> retrying(2)
/// -> processing -> retrying(3) -> processing -> failed,
/// with delays 2000, 4000, 8000 ms and nothing scheduled after the fourth.
#[test]
fn full_failure_sequence_matches_backoff_schedule() {
    let mut event = fresh_event();
    assert_eq!(event.status().unwrap(), SyncStatus::Pending);

    let mut transitions = vec![event.status.clone()];
    let mut delays = Vec::new();

    for _ in 0..4 {
        begin_attempt(&mut event);
        transitions.push(event.status.clone());
        match record_failure(&mut event, "CRM unavailable", true) {
            FailureDisposition::Retry { delay_ms } => delays.push(delay_ms),
            FailureDisposition::Terminal => {}
        }
        transitions.push(event.status.clone());
    }

    let transitions: Vec<&str> = transitions.iter().map(String::as_str).collect();
    assert_eq!(
        transitions,
        vec![
            "pending",
            "processing",
            "retrying",
            "processing",
            "retrying",
            "processing",
            "retrying",
            "processing",
            "failed",
        ]
    );
    assert_eq!(delays, vec![2_000, 4_000, 8_000]);
    assert!(event.error_message.as_deref() == Some("CRM unavailable"));
}

#[test]
fn delay_growth_is_capped_at_five_minutes() {
    let observed: Vec<u64> = (1..=12).map(retry_delay_ms).collect();
    assert_eq!(observed[0], 2_000);
    assert_eq!(observed[1], 4_000);
    assert_eq!(observed[2], 8_000);
    assert!(observed.iter().all(|d| *d <= 300_000));
    assert_eq!(*observed.last().unwrap(), 300_000);
}

#[test]
fn success_after_retries_completes_and_stamps_processed_at() {
    let mut event = fresh_event();

    begin_attempt(&mut event);
    record_failure(&mut event, "transient", true);
    begin_attempt(&mut event);
    record_success(&mut event, json!({"records": {"person": {"id": 1}}}));

    assert_eq!(event.status().unwrap(), SyncStatus::Completed);
    assert!(event.status().unwrap().is_terminal());
    assert!(event.processed_at.is_some());
    assert!(event.error_message.is_none());
    assert_eq!(event.retry_count, 1);
}

#[test]
fn manual_requeue_restarts_the_lifecycle() {
    let mut event = fresh_event();
    for _ in 0..4 {
        begin_attempt(&mut event);
        record_failure(&mut event, "down", true);
    }
    assert_eq!(event.status().unwrap(), SyncStatus::Failed);

    reset_for_requeue(&mut event);
    assert_eq!(event.status().unwrap(), SyncStatus::Pending);
    assert_eq!(event.retry_count, 0);
    assert!(event.error_message.is_none());
    assert!(event.next_attempt_at.is_none());

    // The requeued event walks the same machine again.
    begin_attempt(&mut event);
    match record_failure(&mut event, "still down", true) {
        FailureDisposition::Retry { delay_ms } => assert_eq!(delay_ms, 2_000),
        FailureDisposition::Terminal => panic!("first failure after requeue must retry"),
    }
}

#[test]
fn configuration_errors_skip_the_retry_budget() {
    let mut event = fresh_event();
    begin_attempt(&mut event);
    let disposition = record_failure(&mut event, "Unsupported workflow action type", false);
    assert_eq!(disposition, FailureDisposition::Terminal);
    assert_eq!(event.status().unwrap(), SyncStatus::Failed);
    assert_eq!(event.retry_count, 1);
}
