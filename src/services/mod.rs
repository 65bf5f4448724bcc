//! Business logic services

pub mod borrows;
pub mod clock;
pub mod inventory;
pub mod notifications;
pub mod overdue;
pub mod requests;
pub mod tokens;

use std::{future::Future, sync::Arc};

use crate::{
    config::LendingConfig,
    error::{AppError, AppResult},
    repository::LendingStore,
};

use self::{clock::Clock, notifications::{NotificationDispatcher, NotificationIntent}};

/// Collaborators shared by every lending service
#[derive(Clone)]
pub struct LendingContext {
    pub store: Arc<dyn LendingStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub config: LendingConfig,
}

impl LendingContext {
    /// Run one store call under the configured timeout
    pub(crate) async fn call<T, F>(&self, operation: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} exceeded {} ms",
                operation, self.config.store_timeout_ms
            ))),
        }
    }

    /// Hand an intent to the dispatcher; delivery failures never fail the operation
    pub(crate) async fn notify(&self, intent: NotificationIntent) {
        let kind = intent.kind();
        if let Err(e) = self.notifier.dispatch(intent).await {
            tracing::warn!(kind, error = %e, "Failed to dispatch notification intent");
        }
    }
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub requests: requests::RequestsService,
    pub borrows: borrows::BorrowsService,
    pub overdue: overdue::OverdueDetector,
    pub inventory: inventory::InventoryLedger,
    pub store: Arc<dyn LendingStore>,
}

impl Services {
    /// Create all services over one store
    pub fn new(
        store: Arc<dyn LendingStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: LendingConfig,
        pickup_base_url: String,
    ) -> Self {
        let ctx = LendingContext {
            store: store.clone(),
            clock,
            notifier,
            config,
        };
        let inventory = inventory::InventoryLedger::new(ctx.clone());
        let overdue = overdue::OverdueDetector::new(ctx.clone());

        Self {
            requests: requests::RequestsService::new(ctx.clone(), inventory.clone(), pickup_base_url),
            borrows: borrows::BorrowsService::new(ctx, inventory.clone(), overdue.clone()),
            overdue,
            inventory,
            store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        repository::MemoryStore,
        services::{clock::SystemClock, notifications::LogDispatcher},
    };
    use std::time::Duration;

    fn context(timeout_ms: u64) -> LendingContext {
        LendingContext {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogDispatcher),
            config: LendingConfig {
                store_timeout_ms: timeout_ms,
                ..LendingConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn test_slow_store_call_times_out() {
        let ctx = context(10);
        let result: AppResult<()> = ctx
            .call("slow", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fast_store_call_passes_through() {
        let ctx = context(1_000);
        let value = ctx.call("fast", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_swallowed() {
        let mut mock = notifications::MockNotificationDispatcher::new();
        mock.expect_dispatch()
            .times(1)
            .returning(|_| Err(AppError::Internal("webhook down".to_string())));
        let ctx = LendingContext {
            notifier: Arc::new(mock),
            ..context(1_000)
        };
        ctx.notify(NotificationIntent::StockLow {
            city_id: 1,
            equipment_id: 1,
            remaining: 0,
        })
        .await;
    }
}
