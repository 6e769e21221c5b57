//! Append-only audit trail of request transitions.
//!
//! History is for display and audit only. It can be rebuilt by replaying
//! the state machine, so losing it never affects correctness.
use chrono::Utc;
use sled::transaction::TransactionalTree;

use crate::request::{ApprovalRequest, Transition};
use crate::store::{TxResult, encode_tx};
use crate::types::{ParticipantId, RequestId, RequestStatus, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryEvent {
    #[n(0)]
    Created,
    #[n(1)]
    LedgerBound,
    #[n(2)]
    ApprovedStep,
    #[n(3)]
    Approved,
    #[n(4)]
    Rejected,
    #[n(5)]
    Cancelled,
    #[n(6)]
    Expired,
    #[n(7)]
    Stamped,
}

impl HistoryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEvent::Created => "CREATED",
            HistoryEvent::LedgerBound => "LEDGER_BOUND",
            HistoryEvent::ApprovedStep => "APPROVED_STEP",
            HistoryEvent::Approved => "APPROVED",
            HistoryEvent::Rejected => "REJECTED",
            HistoryEvent::Cancelled => "CANCELLED",
            HistoryEvent::Expired => "EXPIRED",
            HistoryEvent::Stamped => "STAMPED",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    #[n(0)]
    pub request_id: RequestId,
    #[n(1)]
    pub seq: u64, // per request, starts at 1
    #[n(2)]
    pub event: HistoryEvent,
    #[n(3)]
    pub actor: Option<ParticipantId>, // None for scheduler driven transitions
    #[n(4)]
    pub old_status: RequestStatus,
    #[n(5)]
    pub new_status: RequestStatus,
    #[n(6)]
    pub detail: Option<String>,
    #[n(7)]
    pub recorded_at: TimeStamp<Utc>,
}

/// History key: request id, a NUL separator, then the big-endian sequence so
/// a prefix scan returns entries in insertion order.
pub(crate) fn history_key(request_id: &RequestId, seq: u64) -> Vec<u8> {
    let mut key = history_prefix(request_id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub(crate) fn history_prefix(request_id: &RequestId) -> Vec<u8> {
    let mut key = request_id.as_str().as_bytes().to_vec();
    key.push(0);
    key
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HistoryRecorder;

impl HistoryRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Appends one entry. Sequence numbers come from the request record,
    /// which is saved in the same transaction, so entries never collide.
    pub fn append(
        &self,
        tree: &TransactionalTree,
        request: &mut ApprovalRequest,
        event: HistoryEvent,
        actor: Option<&ParticipantId>,
        old_status: RequestStatus,
        detail: Option<&str>,
    ) -> TxResult<HistoryEntry> {
        let seq = request.next_history_seq();
        let entry = HistoryEntry {
            request_id: request.id().clone(),
            seq,
            event,
            actor: actor.cloned(),
            old_status,
            new_status: request.status(),
            detail: detail.map(str::to_owned),
            recorded_at: request.updated_at().clone(),
        };

        tree.insert(history_key(request.id(), seq), encode_tx(&entry)?)?;
        Ok(entry)
    }

    /// Records a transition returned by the state machine. A step approval
    /// that completes the request also gets an `Approved` entry.
    pub fn record_transition(
        &self,
        tree: &TransactionalTree,
        request: &mut ApprovalRequest,
        transition: &Transition,
        detail: Option<&str>,
    ) -> TxResult<Vec<HistoryEntry>> {
        let mut entries = vec![self.append(
            tree,
            request,
            transition.event,
            transition.actor.as_ref(),
            transition.old_status,
            detail,
        )?];

        if transition.event == HistoryEvent::ApprovedStep && transition.became_terminal {
            entries.push(self.append(
                tree,
                request,
                HistoryEvent::Approved,
                transition.actor.as_ref(),
                transition.old_status,
                None,
            )?);
        }
        Ok(entries)
    }
}
