//! Async front door of the workflow: ledger hooks, stamping and the
//! reconciliation sweep on top of [`ApprovalService`].
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::folder::{FolderRole, FolderStatus};
use crate::ledger::{LedgerEvent, LedgerEventKind};
use crate::request::{NewRequest, StepAction, Transition};
use crate::service::ApprovalService;
use crate::stamping::{ApproverDirectory, ContentStore, Renderer, StampOutcome, StampingPipeline};
use crate::types::{ParticipantId, RequestId};
use crate::view::{ApprovalRequestView, ArtifactReference};

/// What handling one ledger event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Ignored,
    Bound { changed: bool },
    Transitioned(Transition),
}

pub struct WorkflowEngine {
    service: Arc<ApprovalService>,
    stamping: StampingPipeline,
}

impl WorkflowEngine {
    pub fn new(service: Arc<ApprovalService>, stamping: StampingPipeline) -> Self {
        Self { service, stamping }
    }

    /// Opens the store named by `config` and wires the stamping pipeline.
    pub fn open(
        config: &WorkflowConfig,
        content: Arc<dyn ContentStore>,
        renderer: Arc<dyn Renderer>,
        directory: Arc<dyn ApproverDirectory>,
    ) -> anyhow::Result<Self> {
        let db = Arc::new(config.open_db()?);
        let service = Arc::new(
            ApprovalService::new(db)?
                .with_codes(config.code_generator(), config.max_code_attempts),
        );
        let stamping = StampingPipeline::new(
            Arc::clone(&service),
            content,
            renderer,
            directory,
            config.stamp_timeout,
        );
        Ok(Self::new(service, stamping))
    }

    pub fn service(&self) -> &Arc<ApprovalService> {
        &self.service
    }

    pub fn create_request(&self, new: NewRequest) -> Result<RequestId, WorkflowError> {
        Ok(self.service.create_request(new)?.id().clone())
    }

    pub fn get_status(&self, id: &RequestId) -> Result<ApprovalRequestView, WorkflowError> {
        self.service.get_status(id)
    }

    pub fn list_folder(
        &self,
        owner: &ParticipantId,
        role: FolderRole,
        status: FolderStatus,
    ) -> Result<Vec<ArtifactReference>, WorkflowError> {
        self.service.list_folder(owner, role, status)
    }

    /// Dispatch a ledger event. Unconfirmed events are dropped.
    pub async fn handle(&self, event: LedgerEvent) -> Result<LedgerOutcome, WorkflowError> {
        if !event.confirmed {
            debug!(request = %event.request_id, tx = %event.tx_ref, "ignoring unconfirmed ledger event");
            return Ok(LedgerOutcome::Ignored);
        }

        match &event.kind {
            LedgerEventKind::Registered {
                ledger_request_id,
                ledger_document_id,
            } => {
                let changed = self.on_ledger_created(
                    &event.request_id,
                    &event.actor,
                    ledger_request_id,
                    ledger_document_id,
                    Some(&event.tx_ref),
                )?;
                Ok(LedgerOutcome::Bound { changed })
            }
            LedgerEventKind::Approved => self
                .on_ledger_approved(&event.request_id, &event.actor, event.step_action())
                .await
                .map(LedgerOutcome::Transitioned),
            LedgerEventKind::Rejected => self
                .on_ledger_rejected(&event.request_id, &event.actor, event.step_action())
                .map(LedgerOutcome::Transitioned),
            LedgerEventKind::CancelRequested => self
                .on_cancel_requested(&event.request_id, &event.actor)
                .map(LedgerOutcome::Transitioned),
        }
    }

    pub fn on_ledger_created(
        &self,
        id: &RequestId,
        actor: &ParticipantId,
        ledger_request_id: &str,
        ledger_document_id: &str,
        tx_ref: Option<&str>,
    ) -> Result<bool, WorkflowError> {
        self.service
            .bind_ledger(id, actor, ledger_request_id, ledger_document_id, tx_ref)
    }

    /// Records the approval and, when it completes the request, stamps the
    /// document. A stamping failure is logged and does not undo or fail the
    /// approval; the reconciliation sweep picks it up later.
    pub async fn on_ledger_approved(
        &self,
        id: &RequestId,
        approver: &ParticipantId,
        action: StepAction,
    ) -> Result<Transition, WorkflowError> {
        let transition = self.service.record_approval(id, approver, action)?;

        if transition.became_terminal {
            if let Err(err) = self.stamping.run(id).await {
                warn!(request = %id, error = %err, "approved without stamp, will retry on reconcile");
            }
        }
        Ok(transition)
    }

    pub fn on_ledger_rejected(
        &self,
        id: &RequestId,
        approver: &ParticipantId,
        action: StepAction,
    ) -> Result<Transition, WorkflowError> {
        self.service.record_rejection(id, approver, action)
    }

    pub fn on_cancel_requested(
        &self,
        id: &RequestId,
        actor: &ParticipantId,
    ) -> Result<Transition, WorkflowError> {
        self.service.cancel(id, actor)
    }

    pub async fn stamp(&self, id: &RequestId) -> Result<StampOutcome, WorkflowError> {
        self.stamping.run(id).await
    }

    /// Retries stamping for every approved request that still lacks a
    /// stamp. Returns how many were stamped in this pass.
    pub async fn reconcile_unstamped(&self) -> Result<usize, WorkflowError> {
        let pending = self.service.unstamped_approved()?;
        let mut stamped = 0;

        for id in &pending {
            match self.stamping.run(id).await {
                Ok(StampOutcome::Stamped { .. }) => stamped += 1,
                Ok(_) => {}
                Err(err) => warn!(request = %id, error = %err, "reconcile could not stamp"),
            }
        }

        info!(candidates = pending.len(), stamped, "stamp reconciliation finished");
        Ok(stamped)
    }
}
