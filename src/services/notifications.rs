//! Notification intents and their dispatchers
//!
//! The lending engine only says *what* happened. Delivery over email, WhatsApp
//! or push is the job of an external service reached through the webhook.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

use super::tokens::{PlainToken, Sensitive};
use crate::{
    config::NotificationsConfig,
    error::{AppError, AppResult},
    models::EquipmentCondition,
};

/// Something a borrower or staff member should hear about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationIntent {
    RequestSubmitted {
        request_id: i32,
        city_id: i32,
        borrower_name: String,
        item_count: usize,
    },
    RequestApproved {
        request_id: i32,
        city_id: i32,
        borrower_phone: String,
        token: PlainToken,
        pickup_url: Sensitive<String>,
        expires_at: DateTime<Utc>,
    },
    RequestRejected {
        request_id: i32,
        borrower_phone: String,
        reason: String,
    },
    RequestCancelled {
        request_id: i32,
        borrower_phone: String,
        reason: String,
    },
    StockLow {
        city_id: i32,
        equipment_id: i32,
        remaining: i32,
    },
    ReturnReported {
        record_id: i32,
        city_id: i32,
        equipment_id: i32,
        condition: EquipmentCondition,
    },
    FaultyEquipment {
        record_id: i32,
        city_id: i32,
        equipment_id: i32,
        notes: String,
    },
}

impl NotificationIntent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationIntent::RequestSubmitted { .. } => "request_submitted",
            NotificationIntent::RequestApproved { .. } => "request_approved",
            NotificationIntent::RequestRejected { .. } => "request_rejected",
            NotificationIntent::RequestCancelled { .. } => "request_cancelled",
            NotificationIntent::StockLow { .. } => "stock_low",
            NotificationIntent::ReturnReported { .. } => "return_reported",
            NotificationIntent::FaultyEquipment { .. } => "faulty_equipment",
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, intent: NotificationIntent) -> AppResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Logs intents and delivers nothing; used while notifications are disabled
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, intent: NotificationIntent) -> AppResult<()> {
        tracing::info!(kind = intent.kind(), "Notification intent (delivery disabled)");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "log"
    }
}

/// Posts intents as JSON to the delivery service
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    /// Every delivery, connect included, is abandoned after `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build webhook client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn dispatch(&self, intent: NotificationIntent) -> AppResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&intent)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to reach notification webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Notification webhook answered {} for {}",
                response.status(),
                intent.kind()
            )));
        }

        tracing::debug!(kind = intent.kind(), "Notification intent delivered");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "webhook"
    }
}

/// Pick the dispatcher described by the configuration
pub fn build_dispatcher(config: &NotificationsConfig) -> AppResult<Arc<dyn NotificationDispatcher>> {
    let dispatcher: Arc<dyn NotificationDispatcher> =
        match (config.enabled, config.webhook_url.as_deref()) {
            (true, Some(url)) => Arc::new(WebhookDispatcher::new(url, config.timeout())?),
            (true, None) => {
                tracing::warn!("Notifications enabled without webhook_url, falling back to log output");
                Arc::new(LogDispatcher)
            }
            (false, _) => Arc::new(LogDispatcher),
        };
    Ok(dispatcher)
}

/// Link sent to the borrower, carrying the token as a query parameter
pub fn pickup_url(base: &str, token: &PlainToken) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}token={}", base.trim_end_matches('/'), separator, token.expose())
}
