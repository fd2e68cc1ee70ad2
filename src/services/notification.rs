use crate::error::Result;
use crate::models::notification_log::NotificationLog;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    SyncSuccess,
    SyncError,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTemplate::SyncSuccess => "sync_success",
            NotificationTemplate::SyncError => "sync_error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub template: NotificationTemplate,
    pub data: JsonValue,
}

/// Outcome notification side-channel. The sync state machine only knows
/// this trait; delivery details live behind it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Queue-backed email notifier: `send` records the notification, the
/// notification workers deliver it to the email service with capped
/// backoff on failure.
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
    service_url: String,
}

impl NotificationService {
    pub fn new(pool: PgPool, service_url: String) -> Self {
        Self {
            pool,
            client: Client::new(),
            service_url,
        }
    }

    pub async fn enqueue(&self, notification: &Notification) -> Result<NotificationLog> {
        let row = sqlx::query_as::<_, NotificationLog>(
            r#"
            INSERT INTO notification_logs (id, recipient, subject, template, data, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING id, recipient, subject, template, data, http_status, response_body,
                      attempts, max_attempts, next_retry_at, status, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&notification.to)
        .bind(&notification.subject)
        .bind(notification.template.as_str())
        .bind(&notification.data)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn deliver_once(&self, log_id: Uuid) -> Result<()> {
        let log = sqlx::query_as::<_, NotificationLog>(
            r#"SELECT id, recipient, subject, template, data, http_status, response_body,
                      attempts, max_attempts, next_retry_at, status, created_at, updated_at
               FROM notification_logs WHERE id = $1"#,
        )
        .bind(log_id)
        .fetch_one(&self.pool)
        .await?;

        let body = serde_json::json!({
            "to": log.recipient,
            "subject": log.subject,
            "template": log.template,
            "data": log.data,
        });

        let res = self.client.post(&self.service_url).json(&body).send().await;
        match res {
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let response_body = resp.text().await.unwrap_or_default();
                sqlx::query(
                    r#"UPDATE notification_logs
                       SET http_status = $1, response_body = $2,
                           status = CASE WHEN $1 BETWEEN 200 AND 299 THEN 'success' ELSE 'failed' END,
                           attempts = COALESCE(attempts, 0) + 1, updated_at = NOW()
                       WHERE id = $3"#,
                )
                .bind(status)
                .bind(response_body)
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
            Err(err) => {
                sqlx::query(
                    r#"UPDATE notification_logs
                       SET response_body = $1, status = 'failed',
                           attempts = COALESCE(attempts, 0) + 1, updated_at = NOW()
                       WHERE id = $2"#,
                )
                .bind(format!("{}", err))
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn run_once(&self) -> Result<bool> {
        let row_opt = sqlx::query(
            r#"SELECT id FROM notification_logs
               WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW())
               ORDER BY created_at ASC
               FOR UPDATE SKIP LOCKED
               LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row_opt else { return Ok(false) };
        let id: Uuid = row.try_get("id")?;

        let _ = self.deliver_once(id).await;

        let row2 = sqlx::query(
            r#"SELECT attempts, max_attempts, status FROM notification_logs WHERE id = $1"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let attempts: i32 = row2.try_get("attempts")?;
        let max_attempts: i32 = row2.try_get::<Option<i32>, _>("max_attempts")?.unwrap_or(3);
        let status: String = row2.try_get("status")?;

        if status == "failed" && attempts < max_attempts {
            sqlx::query(
                r#"UPDATE notification_logs
                   SET status = 'pending',
                       next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, GREATEST(0, attempts-1))::int))
                   WHERE id = $1"#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        Ok(true)
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.enqueue(notification).await?;
        Ok(())
    }
}
