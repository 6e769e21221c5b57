//! Post-approval stamping: fetch the original, render the approval stamp,
//! store the result and point the request and its approved folders at it.
//!
//! Stamping is an enhancement on top of an approval that has already
//! committed. It holds no storage transaction while talking to external
//! collaborators, gives up after a bounded timeout, and leaves the request
//! untouched on failure so it can be retried later.
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::request::ApprovalRequest;
use crate::service::ApprovalService;
use crate::types::{ApprovalType, ParticipantId, RequestId, RequestStatus, TimeStamp};
use crate::utils::document_digest;

/// Content-addressed blob storage (IPFS or similar). Locators are opaque.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> anyhow::Result<String>;
    async fn get(&self, locator: &str) -> anyhow::Result<Vec<u8>>;
}

/// Produces the stamped document. Expected to be a pure function of its
/// inputs; it runs on the blocking pool.
pub trait Renderer: Send + Sync {
    fn render(&self, original: &[u8], metadata: &StampMetadata) -> anyhow::Result<Vec<u8>>;
}

/// Display details of participants, printed on the stamp.
pub trait ApproverDirectory: Send + Sync {
    fn describe(&self, participant: &ParticipantId) -> Option<ApproverInfo>;
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApproverInfo {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub role: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct StampedApprover {
    #[n(0)]
    pub participant: ParticipantId,
    #[n(1)]
    pub info: ApproverInfo,
    #[n(2)]
    pub acted_at: Option<TimeStamp<Utc>>,
    #[n(3)]
    pub signed: bool,
}

/// Everything the renderer needs to print on the document.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct StampMetadata {
    #[n(0)]
    pub verification_code: String,
    #[n(1)]
    pub request_id: RequestId,
    #[n(2)]
    pub document_name: String,
    #[n(3)]
    pub approval_type: ApprovalType,
    #[n(4)]
    pub approvers: Vec<StampedApprover>,
    #[n(5)]
    pub ledger_tx: Option<String>,
    #[n(6)]
    pub approved_at: Option<TimeStamp<Utc>>,
}

impl StampMetadata {
    pub fn for_request(request: &ApprovalRequest, directory: &dyn ApproverDirectory) -> Self {
        let approvers = request
            .steps()
            .iter()
            .filter(|step| step.has_approved())
            .map(|step| StampedApprover {
                participant: step.approver().clone(),
                info: directory.describe(step.approver()).unwrap_or_else(|| ApproverInfo {
                    name: step.approver().to_string(),
                    role: "approver".into(),
                }),
                acted_at: step.acted_at().cloned(),
                signed: step.signature().is_some(),
            })
            .collect();

        Self {
            verification_code: request.verification_code().to_string(),
            request_id: request.id().clone(),
            document_name: request.artifact().name.clone(),
            approval_type: request.approval_type(),
            approvers,
            ledger_tx: request.final_ledger_tx().map(str::to_owned),
            approved_at: request.completed_at().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StampOutcome {
    Stamped { locator: String, hash: String },
    AlreadyStamped { locator: String },
}

pub struct StampingPipeline {
    service: Arc<ApprovalService>,
    content: Arc<dyn ContentStore>,
    renderer: Arc<dyn Renderer>,
    directory: Arc<dyn ApproverDirectory>,
    timeout: Duration,
}

impl StampingPipeline {
    pub fn new(
        service: Arc<ApprovalService>,
        content: Arc<dyn ContentStore>,
        renderer: Arc<dyn Renderer>,
        directory: Arc<dyn ApproverDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            content,
            renderer,
            directory,
            timeout,
        }
    }

    /// Stamp an approved request. Safe to call repeatedly: an already
    /// stamped request is left as it is.
    pub async fn run(&self, id: &RequestId) -> Result<StampOutcome, WorkflowError> {
        let request = self.service.load_request(id)?;

        if request.status() != RequestStatus::Approved {
            return Err(WorkflowError::NotStampable(request.status()));
        }
        if let Some(locator) = request.stamped_document() {
            return Ok(StampOutcome::AlreadyStamped {
                locator: locator.to_owned(),
            });
        }

        let metadata = StampMetadata::for_request(&request, self.directory.as_ref());
        let produced = tokio::time::timeout(
            self.timeout,
            self.produce(request.artifact().locator.clone(), metadata),
        )
        .await;

        let (locator, hash) = match produced {
            Ok(Ok(stamped)) => stamped,
            Ok(Err(err)) => {
                warn!(request = %id, error = %err, "stamping failed, approval stays unstamped");
                return Err(err);
            }
            Err(_) => {
                warn!(request = %id, timeout = ?self.timeout, "stamping timed out");
                return Err(WorkflowError::Timeout(self.timeout));
            }
        };

        self.service.record_stamp(id, &locator, &hash)?;
        info!(request = %id, locator = %locator, "request stamped");
        Ok(StampOutcome::Stamped { locator, hash })
    }

    async fn produce(
        &self,
        original_locator: String,
        metadata: StampMetadata,
    ) -> Result<(String, String), WorkflowError> {
        let original = self
            .content
            .get(&original_locator)
            .await
            .map_err(|e| WorkflowError::external("fetch the original document", e))?;

        let renderer = Arc::clone(&self.renderer);
        let stamped = tokio::task::spawn_blocking(move || renderer.render(&original, &metadata))
            .await
            .map_err(|e| WorkflowError::external("render the stamp", e.into()))?
            .map_err(|e| WorkflowError::external("render the stamp", e))?;

        let hash = document_digest(&stamped);
        let locator = self
            .content
            .put(stamped)
            .await
            .map_err(|e| WorkflowError::external("store the stamped document", e))?;

        Ok((locator, hash))
    }
}

/// In-process content store keyed by the sha256 of the content, so storing
/// the same bytes twice yields the same locator.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: Vec<u8>) -> anyhow::Result<String> {
        let locator = document_digest(&bytes);
        self.blobs.write().await.insert(locator.clone(), bytes);
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> anyhow::Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(locator)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no content stored under {locator}"))
    }
}

const TRAILER_MARKER: &[u8] = b"\n%APPROVAL-STAMP%\n";

/// Appends the CBOR encoded stamp metadata after a marker line. Stands in
/// for the PDF/QR renderer wherever a real one is not wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborTrailerRenderer;

impl CborTrailerRenderer {
    /// Reads back the metadata embedded by [`Renderer::render`].
    pub fn read_trailer(stamped: &[u8]) -> anyhow::Result<StampMetadata> {
        let start = stamped
            .windows(TRAILER_MARKER.len())
            .rposition(|w| w == TRAILER_MARKER)
            .ok_or_else(|| anyhow::anyhow!("document carries no approval stamp"))?;
        Ok(minicbor::decode(&stamped[start + TRAILER_MARKER.len()..])?)
    }
}

impl Renderer for CborTrailerRenderer {
    fn render(&self, original: &[u8], metadata: &StampMetadata) -> anyhow::Result<Vec<u8>> {
        let mut stamped = original.to_vec();
        stamped.extend_from_slice(TRAILER_MARKER);
        stamped.extend(minicbor::to_vec(metadata)?);
        Ok(stamped)
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    entries: HashMap<ParticipantId, ApproverInfo>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(mut self, participant: ParticipantId, name: &str, role: &str) -> Self {
        self.entries.insert(
            participant,
            ApproverInfo {
                name: name.into(),
                role: role.into(),
            },
        );
        self
    }
}

impl ApproverDirectory for StaticDirectory {
    fn describe(&self, participant: &ParticipantId) -> Option<ApproverInfo> {
        self.entries.get(participant).cloned()
    }
}
