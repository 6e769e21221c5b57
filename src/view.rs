//! Versioned view types handed to API and UI layers.
//!
//! These are built deliberately from the internal entities so storage
//! layout can change without breaking consumers. Bump [`VIEW_VERSION`] on
//! any breaking change to their serialized shape.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::folder::{FolderRole, FolderSlot, FolderStatus};
use crate::history::HistoryEntry;
use crate::request::{ApprovalRequest, ApprovalStep};
use crate::types::{ApprovalType, Priority, RequestStatus, TimeStamp, Topology};

pub const VIEW_VERSION: u32 = 1;

fn at(ts: &TimeStamp<Utc>) -> DateTime<Utc> {
    ts.to_datetime_utc()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalStepView {
    pub approver: String,
    pub step_order: u32,
    pub has_approved: bool,
    pub has_rejected: bool,
    pub signature_hex: Option<String>,
    pub reason: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
    pub ledger_tx: Option<String>,
}

impl From<&ApprovalStep> for ApprovalStepView {
    fn from(step: &ApprovalStep) -> Self {
        Self {
            approver: step.approver().to_string(),
            step_order: step.step_order(),
            has_approved: step.has_approved(),
            has_rejected: step.has_rejected(),
            signature_hex: step.signature().map(hex::encode),
            reason: step.reason().map(str::to_owned),
            acted_at: step.acted_at().map(at),
            ledger_tx: step.ledger_tx().map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRequestView {
    pub version: u32,
    pub id: String,
    pub ledger_request_id: Option<String>,
    pub ledger_document_id: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub original_document: String,
    pub stamped_document: Option<String>,
    pub stamped_hash: Option<String>,
    pub topology: &'static str,
    pub approval_type: &'static str,
    pub priority: &'static str,
    pub status: &'static str,
    pub requester: String,
    pub verification_code: String,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    pub awaiting: Vec<String>,
    pub steps: Vec<ApprovalStepView>,
}

impl ApprovalRequestView {
    pub fn from_request(request: &ApprovalRequest, now: &TimeStamp<Utc>) -> Self {
        let artifact = request.artifact();
        Self {
            version: VIEW_VERSION,
            id: request.id().to_string(),
            ledger_request_id: request.ledger_request_id().map(str::to_owned),
            ledger_document_id: request.ledger_document_id().map(str::to_owned),
            file_name: artifact.name.clone(),
            file_size: artifact.size,
            content_type: artifact.content_type.clone(),
            original_document: artifact.locator.clone(),
            stamped_document: request.stamped_document().map(str::to_owned),
            stamped_hash: request.stamped_hash().map(str::to_owned),
            topology: match request.topology() {
                Topology::Sequential => "SEQUENTIAL",
                Topology::Parallel => "PARALLEL",
            },
            approval_type: match request.approval_type() {
                ApprovalType::Standard => "STANDARD",
                ApprovalType::DigitalSignature => "DIGITAL_SIGNATURE",
            },
            priority: match request.priority() {
                Priority::Low => "LOW",
                Priority::Normal => "NORMAL",
                Priority::High => "HIGH",
                Priority::Urgent => "URGENT",
            },
            status: request.status().as_str(),
            requester: request.requester().to_string(),
            verification_code: request.verification_code().to_string(),
            created_at: at(request.created_at()),
            submitted_at: request.submitted_at().map(at),
            completed_at: request.completed_at().map(at),
            expires_at: request.expires_at().map(at),
            is_overdue: request.is_overdue(now),
            awaiting: request.awaiting().iter().map(|p| p.to_string()).collect(),
            steps: request.steps().iter().map(ApprovalStepView::from).collect(),
        }
    }
}

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReference {
    pub request_id: String,
    pub role: &'static str,
    pub status: &'static str,
    pub locator: String,
    pub file_name: String,
    pub placed_at: DateTime<Utc>,
}

impl From<&FolderSlot> for ArtifactReference {
    fn from(slot: &FolderSlot) -> Self {
        Self {
            request_id: slot.request_id.to_string(),
            role: FolderRole::as_str(&slot.role),
            status: FolderStatus::as_str(&slot.status),
            locator: slot.locator.clone(),
            file_name: slot.file_name.clone(),
            placed_at: at(&slot.placed_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntryView {
    pub seq: u64,
    pub event: &'static str,
    pub actor: Option<String>,
    pub old_status: &'static str,
    pub new_status: &'static str,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl From<&HistoryEntry> for HistoryEntryView {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            seq: entry.seq,
            event: entry.event.as_str(),
            actor: entry.actor.as_ref().map(|a| a.to_string()),
            old_status: entry.old_status.as_str(),
            new_status: entry.new_status.as_str(),
            detail: entry.detail.clone(),
            recorded_at: at(&entry.recorded_at),
        }
    }
}

/// What a verifier learns from a verification code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRecord {
    pub code: String,
    pub request_id: String,
    pub status: &'static str,
    pub file_name: String,
    pub stamped_hash: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ApprovalRequest> for VerificationRecord {
    fn from(request: &ApprovalRequest) -> Self {
        Self {
            code: request.verification_code().to_string(),
            request_id: request.id().to_string(),
            status: request.status().as_str(),
            file_name: request.artifact().name.clone(),
            stamped_hash: request.stamped_hash().map(str::to_owned),
            completed_at: request.completed_at().map(at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    UnknownCode,
    NotStamped(VerificationRecord),
    Matches(VerificationRecord),
    Mismatch(VerificationRecord),
}

impl VerificationOutcome {
    pub fn is_authentic(&self) -> bool {
        matches!(self, VerificationOutcome::Matches(_))
    }
}

impl VerificationRecord {
    pub fn is_approved(&self) -> bool {
        self.status == RequestStatus::Approved.as_str()
    }
}
