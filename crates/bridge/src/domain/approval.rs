//! Human-approval gates
//!
//! Every connect or signing request opens a single-use gate. The approval UI
//! learns about it from the broadcast feed (or by listing pending approvals)
//! and answers with an action; the handler awaiting the gate resumes with the
//! decision. Gates are keyed by a fresh id, never by name, so two gates can
//! never answer for each other.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use super::session::PageOrigin;

const ANNOUNCEMENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalKind {
    #[serde(rename = "connect-modal-closed")]
    Connect,
    #[serde(rename = "sign-message-modal-closed")]
    SignMessage,
    #[serde(rename = "sign-transaction-modal-closed")]
    SignTransaction,
}

impl ApprovalKind {
    pub fn gate_name(&self) -> &'static str {
        match self {
            ApprovalKind::Connect => "connect-modal-closed",
            ApprovalKind::SignMessage => "sign-message-modal-closed",
            ApprovalKind::SignTransaction => "sign-transaction-modal-closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub kind: ApprovalKind,
    pub domain: String,
    pub title: Option<String>,
    pub icon_url: Option<String>,
    pub context: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Accept,
    Reject,
}

/// Body the approval UI posts back. Anything other than `accept` rejects.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalDecision {
    pub action: String,
}

impl ApprovalDecision {
    pub fn action(&self) -> ApprovalAction {
        if self.action.eq_ignore_ascii_case("accept") {
            ApprovalAction::Accept
        } else {
            ApprovalAction::Reject
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("approval rejected")]
    Rejected,
    #[error("approval timed out after {0:?}")]
    TimedOut(Duration),
}

struct PendingApproval {
    request: ApprovalRequest,
    reply: oneshot::Sender<ApprovalAction>,
}

/// Removes a gate from the pending table however its waiter ends: decided,
/// timed out, or dropped mid-wait by a cancelled handler.
struct OpenGate<'a> {
    approvals: &'a Approvals,
    id: Uuid,
}

impl Drop for OpenGate<'_> {
    fn drop(&mut self) {
        if self.approvals.table().remove(&self.id).is_some() {
            debug!("Approval {} closed without a decision", self.id);
        }
    }
}

pub struct Approvals {
    pending: Mutex<HashMap<Uuid, PendingApproval>>,
    announcements: broadcast::Sender<ApprovalRequest>,
    timeout: Duration,
}

impl Approvals {
    pub fn new(timeout: Duration) -> Self {
        let (announcements, _) = broadcast::channel(ANNOUNCEMENT_CAPACITY);
        Self {
            pending: Mutex::new(HashMap::new()),
            announcements,
            timeout,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Uuid, PendingApproval>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed of newly opened gates
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.announcements.subscribe()
    }

    pub async fn pending(&self) -> Vec<ApprovalRequest> {
        self.table()
            .values()
            .map(|pending| pending.request.clone())
            .collect()
    }

    /// Deliver a decision. Returns false for unknown or already resolved gates.
    pub async fn resolve(&self, id: Uuid, action: ApprovalAction) -> bool {
        let Some(pending) = self.table().remove(&id) else {
            debug!("No pending approval {}", id);
            return false;
        };
        info!(
            "Approval {} ({}) resolved: {:?}",
            id,
            pending.request.kind.gate_name(),
            action
        );
        // The waiter may have timed out in between; nothing left to tell
        let _ = pending.reply.send(action);
        true
    }

    /// Open a gate and wait for the decision
    pub async fn request(
        &self,
        kind: ApprovalKind,
        origin: PageOrigin,
        context: Value,
    ) -> Result<(), GateError> {
        let (reply, decision) = oneshot::channel();
        let request = ApprovalRequest {
            id: Uuid::now_v7(),
            kind,
            domain: origin.domain,
            title: origin.title,
            icon_url: origin.icon_url,
            context,
        };
        let id = request.id;

        self.table().insert(
            id,
            PendingApproval {
                request: request.clone(),
                reply,
            },
        );
        let _gate = OpenGate { approvals: self, id };
        info!("Approval {} opened: {}", id, kind.gate_name());
        if self.announcements.send(request).is_err() {
            debug!("No approval listeners subscribed, {} waits for polling", id);
        }

        match tokio::time::timeout(self.timeout, decision).await {
            Ok(Ok(ApprovalAction::Accept)) => Ok(()),
            Ok(Ok(ApprovalAction::Reject)) | Ok(Err(_)) => Err(GateError::Rejected),
            Err(_) => {
                warn!("Approval {} timed out", id);
                Err(GateError::TimedOut(self.timeout))
            }
        }
    }
}
