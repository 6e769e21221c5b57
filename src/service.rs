//! Service layer API for approval workflow operations
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::folder::{FolderProjector, FolderRole, FolderStatus, expected_slots, slot_key};
use crate::history::{HistoryEvent, HistoryRecorder};
use crate::request::{ApprovalRequest, NewRequest, StepAction, Transition};
use crate::store::{ApprovalStore, TxResult, TxTrees, abort};
use crate::types::{ParticipantId, RequestId, RequestStatus, TimeStamp};
use crate::utils::{document_digest, new_uuid_to_bech32};
use crate::verification::{VerificationCode, VerificationCodeGenerator};
use crate::view::{
    ApprovalRequestView, ArtifactReference, HistoryEntryView, VerificationOutcome, VerificationRecord,
};

pub const DEFAULT_MAX_CODE_ATTEMPTS: u32 = 16;

pub struct ApprovalService {
    store: ApprovalStore,
    codes: VerificationCodeGenerator,
    max_code_attempts: u32,
    projector: FolderProjector,
    recorder: HistoryRecorder,
}

impl ApprovalService {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, WorkflowError> {
        Ok(Self {
            store: ApprovalStore::new(instance)?,
            codes: VerificationCodeGenerator::default(),
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
            projector: FolderProjector::new(),
            recorder: HistoryRecorder::new(),
        })
    }

    pub fn with_codes(mut self, codes: VerificationCodeGenerator, max_attempts: u32) -> Self {
        self.codes = codes;
        self.max_code_attempts = max_attempts.max(1);
        self
    }

    /// Load a request from the database
    pub fn load_request(&self, id: &RequestId) -> Result<ApprovalRequest, WorkflowError> {
        self.store.load_request(id)
    }

    /// Submit a document for approval. The request, all of its steps, the
    /// reserved verification code, the initial folder slots and the
    /// `Created` history entry are written in one transaction.
    pub fn create_request(&self, new: NewRequest) -> Result<ApprovalRequest, WorkflowError> {
        new.validate()?;

        let id = new_uuid_to_bech32("req_")
            .map(RequestId::new)
            .map_err(|e| WorkflowError::Encode(e.to_string()))?;

        let request = self.store.transact(|tx| {
            let now = TimeStamp::new();
            let code = self.reserve_code(tx, &id, now.year())?;

            let mut request = match ApprovalRequest::create(id.clone(), new.clone(), code, now) {
                Ok(request) => request,
                Err(err) => return abort(err),
            };

            self.projector.on_created(tx.folders, &request)?;
            let requester = request.requester().clone();
            self.recorder.append(
                tx.history,
                &mut request,
                HistoryEvent::Created,
                Some(&requester),
                RequestStatus::Draft,
                None,
            )?;
            tx.save_request(&request)?;
            Ok(request)
        })?;

        info!(
            request = %request.id(),
            code = %request.verification_code(),
            approvers = request.steps().len(),
            "approval request created"
        );
        Ok(request)
    }

    fn reserve_code(
        &self,
        tx: &TxTrees<'_>,
        id: &RequestId,
        year: i32,
    ) -> TxResult<VerificationCode> {
        let code = self.codes.generate_unique(
            year,
            self.max_code_attempts,
            |candidate| -> TxResult<bool> {
                Ok(tx.codes.get(candidate.as_str().as_bytes())?.is_some())
            },
        )?;
        let Some(code) = code else {
            return abort(WorkflowError::CodeSpaceExhausted(self.max_code_attempts));
        };
        tx.codes
            .insert(code.as_str().as_bytes(), id.as_str().as_bytes())?;
        Ok(code)
    }

    pub fn get_status(&self, id: &RequestId) -> Result<ApprovalRequestView, WorkflowError> {
        let request = self.store.load_request(id)?;
        Ok(ApprovalRequestView::from_request(&request, &TimeStamp::new()))
    }

    pub fn list_folder(
        &self,
        owner: &ParticipantId,
        role: FolderRole,
        status: FolderStatus,
    ) -> Result<Vec<ArtifactReference>, WorkflowError> {
        Ok(self
            .store
            .list_bucket(owner, role, status)?
            .iter()
            .map(ArtifactReference::from)
            .collect())
    }

    /// Audit trail of a request, oldest entry first.
    pub fn history(&self, id: &RequestId) -> Result<Vec<HistoryEntryView>, WorkflowError> {
        Ok(self
            .store
            .history(id)?
            .iter()
            .map(HistoryEntryView::from)
            .collect())
    }

    /// Record an approver's approval of their step
    pub fn record_approval(
        &self,
        id: &RequestId,
        approver: &ParticipantId,
        action: StepAction,
    ) -> Result<Transition, WorkflowError> {
        let transition = self.store.transact(|tx| {
            let mut request = tx.load_request(id)?;
            let transition = match request.approve(approver, action.clone(), TimeStamp::new()) {
                Ok(t) => t,
                Err(err) => return abort(err),
            };

            self.projector
                .on_approved(tx.folders, &request, approver, transition.became_terminal)?;
            self.recorder
                .record_transition(tx.history, &mut request, &transition, action.reason())?;
            tx.save_request(&request)?;
            Ok(transition)
        })?;

        info!(
            request = %id,
            approver = %approver,
            status = %transition.new_status,
            "approval recorded"
        );
        Ok(transition)
    }

    /// Record a rejection. One rejection ends the request for everyone.
    pub fn record_rejection(
        &self,
        id: &RequestId,
        approver: &ParticipantId,
        action: StepAction,
    ) -> Result<Transition, WorkflowError> {
        let transition = self.store.transact(|tx| {
            let mut request = tx.load_request(id)?;
            let transition = match request.reject(approver, action.clone(), TimeStamp::new()) {
                Ok(t) => t,
                Err(err) => return abort(err),
            };

            self.projector.on_rejected(tx.folders, &request, approver)?;
            self.recorder
                .record_transition(tx.history, &mut request, &transition, action.reason())?;
            tx.save_request(&request)?;
            Ok(transition)
        })?;

        info!(request = %id, approver = %approver, "request rejected");
        Ok(transition)
    }

    /// Cancel a request. Only its requester may do so.
    pub fn cancel(&self, id: &RequestId, actor: &ParticipantId) -> Result<Transition, WorkflowError> {
        let transition = self.store.transact(|tx| {
            let mut request = tx.load_request(id)?;
            let transition = match request.cancel(actor, TimeStamp::new()) {
                Ok(t) => t,
                Err(err) => return abort(err),
            };

            self.projector.on_canceled(tx.folders, &request)?;
            self.recorder
                .record_transition(tx.history, &mut request, &transition, None)?;
            tx.save_request(&request)?;
            Ok(transition)
        })?;

        info!(request = %id, actor = %actor, "request cancelled");
        Ok(transition)
    }

    /// Entry point for the external expiry scheduler.
    pub fn expire(&self, id: &RequestId, now: TimeStamp<Utc>) -> Result<Transition, WorkflowError> {
        let transition = self.store.transact(|tx| {
            let mut request = tx.load_request(id)?;
            let transition = match request.expire(now.clone()) {
                Ok(t) => t,
                Err(err) => return abort(err),
            };

            self.projector.on_canceled(tx.folders, &request)?;
            self.recorder
                .record_transition(tx.history, &mut request, &transition, None)?;
            tx.save_request(&request)?;
            Ok(transition)
        })?;

        info!(request = %id, "request expired");
        Ok(transition)
    }

    /// Bind the ledger's request and document ids. Returns `false` when the
    /// same binding was replayed.
    pub fn bind_ledger(
        &self,
        id: &RequestId,
        actor: &ParticipantId,
        ledger_request_id: &str,
        ledger_document_id: &str,
        ledger_tx: Option<&str>,
    ) -> Result<bool, WorkflowError> {
        let bound = self.store.transact(|tx| {
            let mut request = tx.load_request(id)?;
            let changed =
                match request.bind_ledger(ledger_request_id, ledger_document_id, TimeStamp::new()) {
                    Ok(changed) => changed,
                    Err(err) => return abort(err),
                };
            if changed {
                let status = request.status();
                self.recorder.append(
                    tx.history,
                    &mut request,
                    HistoryEvent::LedgerBound,
                    Some(actor),
                    status,
                    ledger_tx,
                )?;
                tx.save_request(&request)?;
            }
            Ok(changed)
        })?;

        if bound {
            info!(request = %id, ledger_request = ledger_request_id, "ledger ids bound");
        }
        Ok(bound)
    }

    /// Store the stamped artifact and point the approved folders at it.
    /// Called by the stamping pipeline once external work is done.
    pub fn record_stamp(
        &self,
        id: &RequestId,
        locator: &str,
        hash: &str,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let (request, patched) = self.store.transact(|tx| {
            let mut request = tx.load_request(id)?;
            if let Err(err) = request.record_stamp(locator, hash, TimeStamp::new()) {
                return abort(err);
            }

            let patched = self.projector.patch_stamped(tx.folders, &request)?;
            let status = request.status();
            self.recorder.append(
                tx.history,
                &mut request,
                HistoryEvent::Stamped,
                None,
                status,
                Some(locator),
            )?;
            tx.save_request(&request)?;
            Ok((request, patched))
        })?;

        info!(request = %id, locator, patched, "stamped document recorded");
        Ok(request)
    }

    /// Rebuild the folder slots of a request from its committed state.
    pub fn reproject(&self, id: &RequestId) -> Result<(), WorkflowError> {
        self.store.transact(|tx| {
            let request = tx.load_request(id)?;
            self.projector.reproject(tx.folders, &request)
        })
    }

    /// Check that stored slots match the ones derived from the request.
    pub fn verify_projection(&self, id: &RequestId) -> Result<(), WorkflowError> {
        let request = self.store.load_request(id)?;

        for slot in expected_slots(&request) {
            match self.store.slot(&slot.key())? {
                Some(stored) if stored.same_placement(&slot) => {}
                _ => {
                    warn!(request = %id, owner = %slot.owner, "missing or stale folder slot");
                    return Err(WorkflowError::FolderInvariant(id.clone()));
                }
            }
        }

        let expected = expected_slots(&request);
        let mut pairs = vec![(request.requester(), FolderRole::Sent)];
        pairs.extend(request.steps().iter().map(|s| (s.approver(), FolderRole::Received)));
        for (owner, role) in pairs {
            for status in FolderStatus::ALL {
                let key = slot_key(owner, role, status, id);
                let wanted = expected.iter().any(|s| s.key() == key);
                if !wanted && self.store.slot(&key)?.is_some() {
                    warn!(request = %id, owner = %owner, "unexpected folder slot");
                    return Err(WorkflowError::FolderInvariant(id.clone()));
                }
            }
        }
        Ok(())
    }

    /// Approved requests that do not carry a stamp yet.
    pub fn unstamped_approved(&self) -> Result<Vec<RequestId>, WorkflowError> {
        let mut ids = vec![];
        for request in self.store.requests() {
            let request = request?;
            if request.status() == RequestStatus::Approved && request.stamped_document().is_none() {
                ids.push(request.id().clone());
            }
        }
        Ok(ids)
    }

    pub fn verify_code(&self, code: &str) -> Result<Option<VerificationRecord>, WorkflowError> {
        let Some(code) = VerificationCode::parse(code) else {
            return Ok(None);
        };
        let Some(id) = self.store.request_for_code(code.as_str())? else {
            return Ok(None);
        };
        let request = self.store.load_request(&id)?;
        Ok(Some(VerificationRecord::from(&request)))
    }

    /// Check a presented document against the credential bound to `code`.
    pub fn verify_document(&self, code: &str, bytes: &[u8]) -> Result<VerificationOutcome, WorkflowError> {
        let Some(record) = self.verify_code(code)? else {
            return Ok(VerificationOutcome::UnknownCode);
        };
        let Some(expected) = record.stamped_hash.as_deref() else {
            return Ok(VerificationOutcome::NotStamped(record));
        };

        if document_digest(bytes) == expected {
            Ok(VerificationOutcome::Matches(record))
        } else {
            Ok(VerificationOutcome::Mismatch(record))
        }
    }
}
