//! Durable storage on sled.
//!
//! Four trees back the workflow:
//! - `requests`: request id -> CBOR [`ApprovalRequest`] (steps included)
//! - `codes`: verification code -> request id, the uniqueness index
//! - `folders`: slot key -> CBOR [`FolderSlot`]
//! - `history`: request id ++ 0x00 ++ seq -> CBOR [`HistoryEntry`]
//!
//! Every state-machine operation runs as one transaction over all four, so
//! precondition checks, the status change, folder moves and history writes
//! commit or roll back together.
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::sync::Arc;

use crate::error::WorkflowError;
use crate::folder::{FolderRole, FolderSlot, FolderStatus, bucket_prefix};
use crate::history::{HistoryEntry, history_prefix};
use crate::request::ApprovalRequest;
use crate::types::{ParticipantId, RequestId};

pub type TxResult<T> = ConflictableTransactionResult<T, WorkflowError>;

/// Aborts the surrounding transaction with a domain error.
pub(crate) fn abort<T>(err: WorkflowError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, WorkflowError> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T, WorkflowError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

pub(crate) fn encode_tx<T: minicbor::Encode<()>>(value: &T) -> TxResult<Vec<u8>> {
    encode(value).or_else(abort)
}

pub(crate) fn decode_tx<T>(bytes: &[u8]) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    decode(bytes).or_else(abort)
}

/// The transactional view of every tree, handed to transaction closures.
pub(crate) struct TxTrees<'a> {
    pub requests: &'a TransactionalTree,
    pub codes: &'a TransactionalTree,
    pub folders: &'a TransactionalTree,
    pub history: &'a TransactionalTree,
}

impl TxTrees<'_> {
    pub fn load_request(&self, id: &RequestId) -> TxResult<ApprovalRequest> {
        match self.requests.get(id.as_str().as_bytes())? {
            Some(bytes) => decode_tx(&bytes),
            None => abort(WorkflowError::NotFound(id.clone())),
        }
    }

    pub fn save_request(&self, request: &ApprovalRequest) -> TxResult<()> {
        self.requests
            .insert(request.id().as_str().as_bytes(), encode_tx(request)?)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct ApprovalStore {
    requests: sled::Tree,
    codes: sled::Tree,
    folders: sled::Tree,
    history: sled::Tree,
}

impl ApprovalStore {
    pub fn new(db: Arc<sled::Db>) -> Result<Self, WorkflowError> {
        Ok(Self {
            requests: db.open_tree("requests")?,
            codes: db.open_tree("codes")?,
            folders: db.open_tree("folders")?,
            history: db.open_tree("history")?,
        })
    }

    /// Runs `f` as a single serializable transaction. sled may run the
    /// closure more than once on conflict, so it must not have side effects
    /// outside the trees it is given.
    pub(crate) fn transact<T, F>(&self, f: F) -> Result<T, WorkflowError>
    where
        F: Fn(&TxTrees<'_>) -> TxResult<T>,
    {
        (&self.requests, &self.codes, &self.folders, &self.history)
            .transaction(|(requests, codes, folders, history)| {
                f(&TxTrees {
                    requests,
                    codes,
                    folders,
                    history,
                })
            })
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => WorkflowError::Storage(err),
            })
    }

    pub fn load_request(&self, id: &RequestId) -> Result<ApprovalRequest, WorkflowError> {
        match self.requests.get(id.as_str().as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(WorkflowError::NotFound(id.clone())),
        }
    }

    pub fn request_for_code(&self, code: &str) -> Result<Option<RequestId>, WorkflowError> {
        Ok(self
            .codes
            .get(code.as_bytes())?
            .map(|id| RequestId::new(String::from_utf8_lossy(&id).into_owned())))
    }

    pub fn requests(&self) -> impl Iterator<Item = Result<ApprovalRequest, WorkflowError>> + '_ {
        self.requests.iter().values().map(|bytes| decode(&bytes?))
    }

    pub fn list_bucket(
        &self,
        owner: &ParticipantId,
        role: FolderRole,
        status: FolderStatus,
    ) -> Result<Vec<FolderSlot>, WorkflowError> {
        self.folders
            .scan_prefix(bucket_prefix(owner, role, status))
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    pub fn slot(&self, key: &[u8]) -> Result<Option<FolderSlot>, WorkflowError> {
        self.folders.get(key)?.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn history(&self, id: &RequestId) -> Result<Vec<HistoryEntry>, WorkflowError> {
        self.history
            .scan_prefix(history_prefix(id))
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }
}
