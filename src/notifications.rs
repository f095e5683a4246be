//! Notification collaborator interface.
//!
//! The engine only enqueues notification requests; delivery (email, SMS,
//! push) and delivery-status tracking belong to the collaborator behind
//! the [`Notifier`] trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::EngineResult;

/// Delivery channels the collaborator may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
}

/// Admin roles resolvable by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    BranchAdmin,
    CompanyAdmin,
    SuperAdmin,
}

/// A single notification target. Role targets are resolved to concrete
/// recipients by the collaborator, not by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationTarget {
    User {
        user_id: Uuid,
    },
    Role {
        role: RecipientRole,
        company_id: Uuid,
        branch_id: Option<Uuid>,
    },
    Email {
        address: String,
    },
}

/// Request handed to the notification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub target: NotificationTarget,
    pub channel: NotificationChannel,
    pub subject: String,
    pub payload: serde_json::Value,
}

/// Outbound notification queue. Enqueueing is fire-and-forget: the engine
/// never inspects delivery status synchronously.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn enqueue(&self, request: NotificationRequest) -> EngineResult<Uuid>;
}

/// Notifier that records every request, for tests and local runs.
#[derive(Default)]
pub struct RecordingNotifier {
    requests: Mutex<Vec<NotificationRequest>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn requests(&self) -> Vec<NotificationRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn enqueue(&self, request: NotificationRequest) -> EngineResult<Uuid> {
        self.requests.lock().await.push(request);
        Ok(Uuid::new_v4())
    }
}
