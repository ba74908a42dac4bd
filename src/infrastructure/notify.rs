//! Log-backed notification delivery. Real transports (desktop, webhook)
//! live outside the core and consume the same event shape.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::models::execution::ExecutorStatus;
use crate::domain::ports::{NotificationEvent, Notifier};

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) {
        match event.status {
            ExecutorStatus::Failed | ExecutorStatus::Blocked => warn!(
                task = %event.task_id,
                status = event.status.as_str(),
                category = event.error_category.as_deref().unwrap_or("-"),
                code = event.error_code.as_deref().unwrap_or("-"),
                "{}",
                event.message
            ),
            _ => info!(
                task = %event.task_id,
                status = event.status.as_str(),
                "{}",
                event.message
            ),
        }
    }
}
