use std::time::Duration;

use crate::types::{ParticipantId, RequestId, RequestStatus};

/// How a failure should be treated by whoever called into the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller error. Nothing was written; never retried automatically.
    Precondition,
    /// A collaborator failed or timed out. Approval state is untouched and
    /// the operation may be retried.
    TransientExternal,
    /// Storage or invariant breakage. The enclosing transaction was rolled back.
    DataIntegrity,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Approval request {0} does not exist")]
    NotFound(RequestId),
    #[error("An approval request needs at least one approver")]
    NoApprovers,
    #[error("Approver {0} is listed more than once")]
    DuplicateApprover(ParticipantId),
    #[error("Participant id {0:?} is empty or contains NUL bytes")]
    InvalidParticipant(String),
    #[error("{0} has no approval step on this request")]
    NotAnApprover(ParticipantId),
    #[error("It is not yet the turn of {0}: an earlier step is unresolved")]
    NotYourTurn(ParticipantId),
    #[error("The step of {0} has already been resolved")]
    AlreadyResolved(ParticipantId),
    #[error("Request is not active, current status is {0}")]
    RequestNotActive(RequestStatus),
    #[error("{0} is not allowed to perform this action")]
    Forbidden(ParticipantId),
    #[error("Digital signature approvals must carry a signature")]
    SignatureRequired,
    #[error("Request has no expiry or has not reached it yet")]
    NotYetExpired,
    #[error("Request is already bound to a different ledger record")]
    LedgerAlreadyBound,
    #[error("Only approved requests can be stamped, current status is {0}")]
    NotStampable(RequestStatus),

    #[error("External collaborator failed while trying to {stage}: {source}")]
    External {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("Stamping did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Could not find a free verification code after {0} attempts")]
    CodeSpaceExhausted(u32),
    #[error("Folder projection of {0} diverged from the request state")]
    FolderInvariant(RequestId),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

impl WorkflowError {
    pub fn external(stage: &'static str, source: anyhow::Error) -> Self {
        WorkflowError::External { stage, source }
    }

    pub fn class(&self) -> ErrorClass {
        use WorkflowError::*;
        match self {
            NotFound(_)
            | NoApprovers
            | DuplicateApprover(_)
            | InvalidParticipant(_)
            | NotAnApprover(_)
            | NotYourTurn(_)
            | AlreadyResolved(_)
            | RequestNotActive(_)
            | Forbidden(_)
            | SignatureRequired
            | NotYetExpired
            | LedgerAlreadyBound
            | NotStampable(_) => ErrorClass::Precondition,
            External { .. } | Timeout(_) => ErrorClass::TransientExternal,
            CodeSpaceExhausted(_) | FolderInvariant(_) | Storage(_) | Encode(_) | Decode(_) => {
                ErrorClass::DataIntegrity
            }
        }
    }

    /// Stable code for the API layer. Integrity failures all collapse into
    /// `internal_error` since end users cannot act on them.
    pub fn code(&self) -> &'static str {
        use WorkflowError::*;
        match self {
            NotFound(_) => "not_found",
            NoApprovers => "no_approvers",
            DuplicateApprover(_) => "duplicate_approver",
            InvalidParticipant(_) => "invalid_participant",
            NotAnApprover(_) => "not_an_approver",
            NotYourTurn(_) => "not_your_turn",
            AlreadyResolved(_) => "already_resolved",
            RequestNotActive(_) => "request_not_active",
            Forbidden(_) => "forbidden",
            SignatureRequired => "signature_required",
            NotYetExpired => "not_yet_expired",
            LedgerAlreadyBound => "ledger_already_bound",
            NotStampable(_) => "not_stampable",
            External { .. } => "external_unavailable",
            Timeout(_) => "external_timeout",
            CodeSpaceExhausted(_) | FolderInvariant(_) | Storage(_) | Encode(_) | Decode(_) => {
                "internal_error"
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientExternal
    }
}

impl<T> From<minicbor::encode::Error<T>> for WorkflowError
where
    T: std::fmt::Display,
{
    fn from(value: minicbor::encode::Error<T>) -> Self {
        WorkflowError::Encode(value.to_string())
    }
}
