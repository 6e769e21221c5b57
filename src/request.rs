//! Approval request and its steps: the authoritative state machine.
//!
//! Everything in here is pure. [`crate::service::ApprovalService`] loads a
//! request inside a storage transaction, applies one of the transitions
//! below and persists the result together with its folder projection and
//! history entries.
use chrono::Utc;
use minicbor::bytes::ByteVec;
use std::collections::HashSet;

use crate::error::WorkflowError;
use crate::history::HistoryEvent;
use crate::types::{
    ApprovalType, Artifact, ParticipantId, Priority, RequestId, RequestStatus, TimeStamp, Topology,
};
use crate::verification::VerificationCode;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStep {
    #[n(0)]
    approver: ParticipantId,
    #[n(1)]
    step_order: u32, // all steps share one order in a parallel request
    #[n(2)]
    has_approved: bool,
    #[n(3)]
    has_rejected: bool,
    #[n(4)]
    signature: Option<ByteVec>,
    #[n(5)]
    reason: Option<String>,
    #[n(6)]
    acted_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    ledger_tx: Option<String>,
}

impl ApprovalStep {
    fn new(approver: ParticipantId, step_order: u32) -> Self {
        Self {
            approver,
            step_order,
            has_approved: false,
            has_rejected: false,
            signature: None,
            reason: None,
            acted_at: None,
            ledger_tx: None,
        }
    }
    pub fn approver(&self) -> &ParticipantId {
        &self.approver
    }
    pub fn step_order(&self) -> u32 {
        self.step_order
    }
    pub fn has_approved(&self) -> bool {
        self.has_approved
    }
    pub fn has_rejected(&self) -> bool {
        self.has_rejected
    }
    pub fn is_resolved(&self) -> bool {
        self.has_approved || self.has_rejected
    }
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref().map(Vec::as_slice)
    }
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
    pub fn acted_at(&self) -> Option<&TimeStamp<Utc>> {
        self.acted_at.as_ref()
    }
    pub fn ledger_tx(&self) -> Option<&str> {
        self.ledger_tx.as_deref()
    }

    fn resolve(&mut self, approved: bool, action: StepAction, now: TimeStamp<Utc>) {
        self.has_approved = approved;
        self.has_rejected = !approved;
        self.signature = action.signature.map(ByteVec::from);
        self.reason = action.reason;
        self.ledger_tx = action.ledger_tx;
        self.acted_at = Some(now);
    }
}

/// What an approver submitted along with their decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepAction {
    signature: Option<Vec<u8>>,
    reason: Option<String>,
    ledger_tx: Option<String>,
}

impl StepAction {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }
    pub fn set_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
    pub fn set_ledger_tx(mut self, tx: impl Into<String>) -> Self {
        self.ledger_tx = Some(tx.into());
        self
    }
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Everything needed to submit a document for approval. The topology and
/// the approver list are frozen once the request is created.
#[derive(Debug, Clone)]
pub struct NewRequest {
    requester: ParticipantId,
    artifact: Artifact,
    approvers: Vec<ParticipantId>,
    topology: Topology,
    approval_type: ApprovalType,
    priority: Priority,
    expires_at: Option<TimeStamp<Utc>>,
}

impl NewRequest {
    pub fn new(requester: ParticipantId, artifact: Artifact) -> Self {
        Self {
            requester,
            artifact,
            approvers: vec![],
            topology: Topology::Sequential,
            approval_type: ApprovalType::Standard,
            priority: Priority::Normal,
            expires_at: None,
        }
    }
    pub fn add_approver(mut self, approver: ParticipantId) -> Self {
        self.approvers.push(approver);
        self
    }
    pub fn set_approvers(mut self, approvers: Vec<ParticipantId>) -> Self {
        self.approvers = approvers;
        self
    }
    pub fn set_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }
    pub fn set_approval_type(mut self, approval_type: ApprovalType) -> Self {
        self.approval_type = approval_type;
        self
    }
    pub fn set_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
    pub fn set_expires_at(mut self, expires_at: TimeStamp<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
    pub fn requester(&self) -> &ParticipantId {
        &self.requester
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.approvers.is_empty() {
            return Err(WorkflowError::NoApprovers);
        }
        let mut seen = HashSet::new();
        for approver in &self.approvers {
            if !seen.insert(approver) {
                return Err(WorkflowError::DuplicateApprover(approver.clone()));
            }
        }
        Ok(())
    }
}

/// Outcome of one committed state-machine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub request_id: RequestId,
    pub event: HistoryEvent,
    pub actor: Option<ParticipantId>,
    pub old_status: RequestStatus,
    pub new_status: RequestStatus,
    pub became_terminal: bool,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    #[n(0)]
    id: RequestId,
    #[n(1)]
    ledger_request_id: Option<String>,
    #[n(2)]
    ledger_document_id: Option<String>,
    #[n(3)]
    artifact: Artifact,
    #[n(4)]
    stamped_document: Option<String>,
    #[n(5)]
    stamped_hash: Option<String>,
    #[n(6)]
    stamped_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    topology: Topology,
    #[n(8)]
    approval_type: ApprovalType,
    #[n(9)]
    priority: Priority,
    #[n(10)]
    expires_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    status: RequestStatus,
    #[n(12)]
    requester: ParticipantId,
    #[n(13)]
    verification_code: VerificationCode,
    #[n(14)]
    code_assigned_at: TimeStamp<Utc>,
    #[n(15)]
    created_at: TimeStamp<Utc>,
    #[n(16)]
    submitted_at: Option<TimeStamp<Utc>>,
    #[n(17)]
    completed_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    updated_at: TimeStamp<Utc>,
    #[n(19)]
    steps: Vec<ApprovalStep>,
    #[n(20)]
    history_seq: u64,
}

impl ApprovalRequest {
    /// Builds a submitted request and all of its steps in one go. The
    /// verification code must already have been reserved by the caller.
    pub fn create(
        id: RequestId,
        new: NewRequest,
        verification_code: VerificationCode,
        now: TimeStamp<Utc>,
    ) -> Result<Self, WorkflowError> {
        new.validate()?;

        let steps = new
            .approvers
            .into_iter()
            .enumerate()
            .map(|(position, approver)| {
                let order = match new.topology {
                    Topology::Sequential => position as u32 + 1,
                    Topology::Parallel => 1,
                };
                ApprovalStep::new(approver, order)
            })
            .collect();

        Ok(Self {
            id,
            ledger_request_id: None,
            ledger_document_id: None,
            artifact: new.artifact,
            stamped_document: None,
            stamped_hash: None,
            stamped_at: None,
            topology: new.topology,
            approval_type: new.approval_type,
            priority: new.priority,
            expires_at: new.expires_at,
            status: RequestStatus::Pending,
            requester: new.requester,
            verification_code,
            code_assigned_at: now.clone(),
            created_at: now.clone(),
            submitted_at: Some(now.clone()),
            completed_at: None,
            updated_at: now,
            steps,
            history_seq: 0,
        })
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }
    pub fn ledger_request_id(&self) -> Option<&str> {
        self.ledger_request_id.as_deref()
    }
    pub fn ledger_document_id(&self) -> Option<&str> {
        self.ledger_document_id.as_deref()
    }
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }
    pub fn stamped_document(&self) -> Option<&str> {
        self.stamped_document.as_deref()
    }
    pub fn stamped_hash(&self) -> Option<&str> {
        self.stamped_hash.as_deref()
    }
    pub fn stamped_at(&self) -> Option<&TimeStamp<Utc>> {
        self.stamped_at.as_ref()
    }
    pub fn topology(&self) -> Topology {
        self.topology
    }
    pub fn approval_type(&self) -> ApprovalType {
        self.approval_type
    }
    pub fn priority(&self) -> Priority {
        self.priority
    }
    pub fn expires_at(&self) -> Option<&TimeStamp<Utc>> {
        self.expires_at.as_ref()
    }
    pub fn status(&self) -> RequestStatus {
        self.status
    }
    pub fn requester(&self) -> &ParticipantId {
        &self.requester
    }
    pub fn verification_code(&self) -> &VerificationCode {
        &self.verification_code
    }
    pub fn code_assigned_at(&self) -> &TimeStamp<Utc> {
        &self.code_assigned_at
    }
    pub fn created_at(&self) -> &TimeStamp<Utc> {
        &self.created_at
    }
    pub fn submitted_at(&self) -> Option<&TimeStamp<Utc>> {
        self.submitted_at.as_ref()
    }
    pub fn completed_at(&self) -> Option<&TimeStamp<Utc>> {
        self.completed_at.as_ref()
    }
    pub fn updated_at(&self) -> &TimeStamp<Utc> {
        &self.updated_at
    }
    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }
    pub fn step_of(&self, approver: &ParticipantId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| &s.approver == approver)
    }

    /// Locator approved folders should point at: the stamped copy once it
    /// exists, the original before that.
    pub fn approved_locator(&self) -> &str {
        self.stamped_document
            .as_deref()
            .unwrap_or(&self.artifact.locator)
    }

    /// Ledger transaction of the step that completed the approval.
    pub fn final_ledger_tx(&self) -> Option<&str> {
        self.steps
            .iter()
            .filter(|s| s.has_approved)
            .max_by_key(|s| s.acted_at.clone())
            .and_then(|s| s.ledger_tx.as_deref())
    }

    pub fn is_overdue(&self, now: &TimeStamp<Utc>) -> bool {
        self.status.is_active() && self.expires_at.as_ref().is_some_and(|at| now >= at)
    }

    /// Approvers that may act right now.
    pub fn awaiting(&self) -> Vec<&ParticipantId> {
        if !self.status.is_active() {
            return vec![];
        }
        self.steps
            .iter()
            .enumerate()
            .filter(|(idx, step)| !step.is_resolved() && self.is_turn_of(*idx))
            .map(|(_, step)| &step.approver)
            .collect()
    }

    fn is_turn_of(&self, idx: usize) -> bool {
        match self.topology {
            Topology::Parallel => true,
            Topology::Sequential => {
                let order = self.steps[idx].step_order;
                self.steps
                    .iter()
                    .filter(|s| s.step_order < order)
                    .all(|s| s.has_approved)
            }
        }
    }

    fn step_index(&self, approver: &ParticipantId) -> Result<usize, WorkflowError> {
        self.steps
            .iter()
            .position(|s| &s.approver == approver)
            .ok_or_else(|| WorkflowError::NotAnApprover(approver.clone()))
    }

    fn actionable_step(&self, approver: &ParticipantId) -> Result<usize, WorkflowError> {
        let idx = self.step_index(approver)?;

        if self.steps[idx].is_resolved() {
            return Err(WorkflowError::AlreadyResolved(approver.clone()));
        }
        if !self.status.is_active() {
            return Err(WorkflowError::RequestNotActive(self.status));
        }
        if !self.is_turn_of(idx) {
            return Err(WorkflowError::NotYourTurn(approver.clone()));
        }
        Ok(idx)
    }

    fn finish(&mut self, status: RequestStatus, now: TimeStamp<Utc>) {
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(now.clone());
        }
        self.updated_at = now;
    }

    fn transition(
        &self,
        event: HistoryEvent,
        actor: Option<&ParticipantId>,
        old_status: RequestStatus,
    ) -> Transition {
        Transition {
            request_id: self.id.clone(),
            event,
            actor: actor.cloned(),
            old_status,
            new_status: self.status,
            became_terminal: !old_status.is_terminal() && self.status.is_terminal(),
        }
    }

    pub fn approve(
        &mut self,
        approver: &ParticipantId,
        action: StepAction,
        now: TimeStamp<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let idx = self.actionable_step(approver)?;
        if self.approval_type.requires_signature() && action.signature.is_none() {
            return Err(WorkflowError::SignatureRequired);
        }

        let old_status = self.status;
        self.steps[idx].resolve(true, action, now.clone());

        let next = if self.steps.iter().all(|s| s.has_approved) {
            RequestStatus::Approved
        } else {
            match self.topology {
                Topology::Sequential => RequestStatus::Partial,
                Topology::Parallel => RequestStatus::Pending,
            }
        };
        self.finish(next, now);

        Ok(self.transition(HistoryEvent::ApprovedStep, Some(approver), old_status))
    }

    /// A single rejection vetoes the whole request, whatever the topology.
    pub fn reject(
        &mut self,
        approver: &ParticipantId,
        action: StepAction,
        now: TimeStamp<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let idx = self.actionable_step(approver)?;

        let old_status = self.status;
        self.steps[idx].resolve(false, action, now.clone());
        self.finish(RequestStatus::Rejected, now);

        Ok(self.transition(HistoryEvent::Rejected, Some(approver), old_status))
    }

    pub fn cancel(
        &mut self,
        actor: &ParticipantId,
        now: TimeStamp<Utc>,
    ) -> Result<Transition, WorkflowError> {
        if actor != &self.requester {
            return Err(WorkflowError::Forbidden(actor.clone()));
        }
        if !self.status.is_active() {
            return Err(WorkflowError::RequestNotActive(self.status));
        }

        let old_status = self.status;
        self.finish(RequestStatus::Cancelled, now);

        Ok(self.transition(HistoryEvent::Cancelled, Some(actor), old_status))
    }

    pub fn expire(&mut self, now: TimeStamp<Utc>) -> Result<Transition, WorkflowError> {
        if !self.status.is_active() {
            return Err(WorkflowError::RequestNotActive(self.status));
        }
        if !self.is_overdue(&now) {
            return Err(WorkflowError::NotYetExpired);
        }

        let old_status = self.status;
        self.finish(RequestStatus::Expired, now);

        Ok(self.transition(HistoryEvent::Expired, None, old_status))
    }

    /// Binds the ledger ids once. Returns `false` when the exact same
    /// binding was already present.
    pub fn bind_ledger(
        &mut self,
        ledger_request_id: &str,
        ledger_document_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<bool, WorkflowError> {
        match (&self.ledger_request_id, &self.ledger_document_id) {
            (None, None) => {
                self.ledger_request_id = Some(ledger_request_id.to_owned());
                self.ledger_document_id = Some(ledger_document_id.to_owned());
                self.updated_at = now;
                Ok(true)
            }
            (Some(req), Some(doc)) if req == ledger_request_id && doc == ledger_document_id => {
                Ok(false)
            }
            _ => Err(WorkflowError::LedgerAlreadyBound),
        }
    }

    /// Records the stamped artifact. Later writes replace earlier ones.
    pub fn record_stamp(
        &mut self,
        locator: &str,
        hash: &str,
        now: TimeStamp<Utc>,
    ) -> Result<(), WorkflowError> {
        if self.status != RequestStatus::Approved {
            return Err(WorkflowError::NotStampable(self.status));
        }
        self.stamped_document = Some(locator.to_owned());
        self.stamped_hash = Some(hash.to_owned());
        self.stamped_at = Some(now.clone());
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn next_history_seq(&mut self) -> u64 {
        self.history_seq += 1;
        self.history_seq
    }
}
