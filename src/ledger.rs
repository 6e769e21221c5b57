//! Events observed on the external ledger.
//!
//! The ledger decides whether an action really happened; this crate decides
//! what it means for the request. Only confirmed events are acted upon.
use crate::request::StepAction;
use crate::types::{ParticipantId, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEventKind {
    /// The document and its approval request were registered on the ledger.
    Registered {
        ledger_request_id: String,
        ledger_document_id: String,
    },
    Approved,
    Rejected,
    CancelRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub kind: LedgerEventKind,
    pub request_id: RequestId,
    pub actor: ParticipantId,
    pub signature: Option<Vec<u8>>,
    pub reason: Option<String>,
    pub tx_ref: String,
    pub confirmed: bool,
}

impl LedgerEvent {
    pub fn new(kind: LedgerEventKind, request_id: RequestId, actor: ParticipantId, tx_ref: impl Into<String>) -> Self {
        Self {
            kind,
            request_id,
            actor,
            signature: None,
            reason: None,
            tx_ref: tx_ref.into(),
            confirmed: false,
        }
    }
    pub fn set_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }
    pub fn set_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    /// The step payload carried by an approval or rejection event.
    pub fn step_action(&self) -> StepAction {
        let mut action = StepAction::new().set_ledger_tx(self.tx_ref.clone());
        if let Some(signature) = &self.signature {
            action = action.set_signature(signature.clone());
        }
        if let Some(reason) = &self.reason {
            action = action.set_reason(reason.clone());
        }
        action
    }
}
