//! Projection of approval state into per-participant status folders.
//!
//! Each participant sees a request under `sent/*` (as requester) or
//! `received/*` (as approver), in one of four status buckets. Slots are a
//! read-optimised view and are never authoritative: [`expected_slots`]
//! derives the full view from a request at any time.
//!
//! All mutations run inside the request's storage transaction and are
//! replay safe. Removing a missing slot is a no-op, and so is inserting an
//! identical one.
use chrono::Utc;
use sled::transaction::TransactionalTree;
use tracing::debug;

use crate::request::ApprovalRequest;
use crate::store::{TxResult, decode_tx, encode_tx};
use crate::types::{ParticipantId, RequestId, RequestStatus, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderRole {
    #[n(0)]
    Sent,
    #[n(1)]
    Received,
}

impl FolderRole {
    fn tag(&self) -> u8 {
        match self {
            FolderRole::Sent => b's',
            FolderRole::Received => b'r',
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderRole::Sent => "sent",
            FolderRole::Received => "received",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FolderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Canceled,
}

impl FolderStatus {
    pub const ALL: [FolderStatus; 4] = [
        FolderStatus::Pending,
        FolderStatus::Approved,
        FolderStatus::Rejected,
        FolderStatus::Canceled,
    ];

    fn tag(&self) -> u8 {
        match self {
            FolderStatus::Pending => b'p',
            FolderStatus::Approved => b'a',
            FolderStatus::Rejected => b'r',
            FolderStatus::Canceled => b'c',
        }
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderStatus::Pending => "pending",
            FolderStatus::Approved => "approved",
            FolderStatus::Rejected => "rejected",
            FolderStatus::Canceled => "canceled",
        }
    }
}

/// One artifact reference placed in one bucket of one participant.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FolderSlot {
    #[n(0)]
    pub owner: ParticipantId,
    #[n(1)]
    pub role: FolderRole,
    #[n(2)]
    pub status: FolderStatus,
    #[n(3)]
    pub request_id: RequestId,
    #[n(4)]
    pub locator: String,
    #[n(5)]
    pub file_name: String,
    #[n(6)]
    pub placed_at: TimeStamp<Utc>,
}

impl FolderSlot {
    pub fn key(&self) -> Vec<u8> {
        slot_key(&self.owner, self.role, self.status, &self.request_id)
    }

    /// Two slots hold the same placement if they only differ in when they
    /// were written.
    pub fn same_placement(&self, other: &FolderSlot) -> bool {
        self.key() == other.key() && self.locator == other.locator
    }
}

/// `owner ++ 0x00 ++ role ++ status`: everything in one bucket.
pub(crate) fn bucket_prefix(owner: &ParticipantId, role: FolderRole, status: FolderStatus) -> Vec<u8> {
    let mut key = owner.as_str().as_bytes().to_vec();
    key.push(0);
    key.push(role.tag());
    key.push(status.tag());
    key
}

pub fn slot_key(
    owner: &ParticipantId,
    role: FolderRole,
    status: FolderStatus,
    request_id: &RequestId,
) -> Vec<u8> {
    let mut key = bucket_prefix(owner, role, status);
    key.extend_from_slice(request_id.as_str().as_bytes());
    key
}

fn build_slot(
    request: &ApprovalRequest,
    owner: &ParticipantId,
    role: FolderRole,
    status: FolderStatus,
    locator: &str,
) -> FolderSlot {
    FolderSlot {
        owner: owner.clone(),
        role,
        status,
        request_id: request.id().clone(),
        locator: locator.to_owned(),
        file_name: request.artifact().name.clone(),
        placed_at: request.updated_at().clone(),
    }
}

/// Bucket the requester's copy belongs in for a given request status.
fn sent_bucket(status: RequestStatus) -> FolderStatus {
    match status {
        RequestStatus::Draft | RequestStatus::Pending | RequestStatus::Partial => {
            FolderStatus::Pending
        }
        RequestStatus::Approved => FolderStatus::Approved,
        RequestStatus::Rejected => FolderStatus::Rejected,
        RequestStatus::Cancelled | RequestStatus::Expired => FolderStatus::Canceled,
    }
}

/// The complete folder view implied by a request's authoritative state.
///
/// Approvers whose step was never resolved have no slot once the request is
/// finished: the request died before reaching them.
pub fn expected_slots(request: &ApprovalRequest) -> Vec<FolderSlot> {
    let original = request.artifact().locator.as_str();
    let mut slots = vec![];

    let sent_status = sent_bucket(request.status());
    let sent_locator = if sent_status == FolderStatus::Approved {
        request.approved_locator()
    } else {
        original
    };
    slots.push(build_slot(
        request,
        request.requester(),
        FolderRole::Sent,
        sent_status,
        sent_locator,
    ));

    for step in request.steps() {
        let placement = if step.has_approved() {
            Some((FolderStatus::Approved, request.approved_locator()))
        } else if step.has_rejected() {
            Some((FolderStatus::Rejected, original))
        } else if request.status().is_active() {
            Some((FolderStatus::Pending, original))
        } else {
            None
        };
        if let Some((status, locator)) = placement {
            slots.push(build_slot(
                request,
                step.approver(),
                FolderRole::Received,
                status,
                locator,
            ));
        }
    }
    slots
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FolderProjector;

impl FolderProjector {
    pub fn new() -> Self {
        Self
    }

    /// Delete-then-insert inside the caller's transaction. Either both
    /// halves commit or neither does.
    pub fn move_slot(
        &self,
        tree: &TransactionalTree,
        request: &ApprovalRequest,
        owner: &ParticipantId,
        role: FolderRole,
        from: FolderStatus,
        to: FolderStatus,
        locator: &str,
    ) -> TxResult<()> {
        if from != to {
            tree.remove(slot_key(owner, role, from, request.id()))?;
        }
        self.ensure_slot(tree, request, owner, role, to, locator)?;
        debug!(
            request = %request.id(),
            owner = %owner,
            "moved {}/{} -> {}/{}",
            role.as_str(),
            from.as_str(),
            role.as_str(),
            to.as_str()
        );
        Ok(())
    }

    fn ensure_slot(
        &self,
        tree: &TransactionalTree,
        request: &ApprovalRequest,
        owner: &ParticipantId,
        role: FolderRole,
        status: FolderStatus,
        locator: &str,
    ) -> TxResult<()> {
        let slot = build_slot(request, owner, role, status, locator);
        let key = slot.key();

        // keep the original placement time on replays
        if let Some(existing) = tree.get(&key)? {
            let existing: FolderSlot = decode_tx(&existing)?;
            if existing.same_placement(&slot) {
                return Ok(());
            }
        }
        tree.insert(key, encode_tx(&slot)?)?;
        Ok(())
    }

    fn remove_slot(
        &self,
        tree: &TransactionalTree,
        request: &ApprovalRequest,
        owner: &ParticipantId,
        role: FolderRole,
        status: FolderStatus,
    ) -> TxResult<()> {
        tree.remove(slot_key(owner, role, status, request.id()))?;
        Ok(())
    }

    pub fn on_created(&self, tree: &TransactionalTree, request: &ApprovalRequest) -> TxResult<()> {
        let original = request.artifact().locator.as_str();
        self.ensure_slot(
            tree,
            request,
            request.requester(),
            FolderRole::Sent,
            FolderStatus::Pending,
            original,
        )?;
        for step in request.steps() {
            self.ensure_slot(
                tree,
                request,
                step.approver(),
                FolderRole::Received,
                FolderStatus::Pending,
                original,
            )?;
        }
        Ok(())
    }

    /// The approver's copy links the stamped artifact if it already exists,
    /// otherwise the original; stamping patches it later.
    pub fn on_approved(
        &self,
        tree: &TransactionalTree,
        request: &ApprovalRequest,
        approver: &ParticipantId,
        became_terminal: bool,
    ) -> TxResult<()> {
        let locator = request.approved_locator();
        self.move_slot(
            tree,
            request,
            approver,
            FolderRole::Received,
            FolderStatus::Pending,
            FolderStatus::Approved,
            locator,
        )?;
        if became_terminal {
            self.move_slot(
                tree,
                request,
                request.requester(),
                FolderRole::Sent,
                FolderStatus::Pending,
                FolderStatus::Approved,
                locator,
            )?;
        }
        Ok(())
    }

    pub fn on_rejected(
        &self,
        tree: &TransactionalTree,
        request: &ApprovalRequest,
        rejecting: &ParticipantId,
    ) -> TxResult<()> {
        let original = request.artifact().locator.as_str();
        self.move_slot(
            tree,
            request,
            rejecting,
            FolderRole::Received,
            FolderStatus::Pending,
            FolderStatus::Rejected,
            original,
        )?;
        self.move_slot(
            tree,
            request,
            request.requester(),
            FolderRole::Sent,
            FolderStatus::Pending,
            FolderStatus::Rejected,
            original,
        )?;
        for step in request.steps() {
            if !step.is_resolved() {
                self.remove_slot(
                    tree,
                    request,
                    step.approver(),
                    FolderRole::Received,
                    FolderStatus::Pending,
                )?;
            }
        }
        Ok(())
    }

    /// Also used for expiry: both end the request without a decision.
    pub fn on_canceled(&self, tree: &TransactionalTree, request: &ApprovalRequest) -> TxResult<()> {
        self.move_slot(
            tree,
            request,
            request.requester(),
            FolderRole::Sent,
            FolderStatus::Pending,
            FolderStatus::Canceled,
            &request.artifact().locator,
        )?;
        for step in request.steps() {
            self.remove_slot(
                tree,
                request,
                step.approver(),
                FolderRole::Received,
                FolderStatus::Pending,
            )?;
        }
        Ok(())
    }

    /// Points existing approved slots at the stamped artifact. Slots that do
    /// not exist are left alone; this never moves anything between buckets.
    pub fn patch_stamped(&self, tree: &TransactionalTree, request: &ApprovalRequest) -> TxResult<usize> {
        let Some(stamped) = request.stamped_document() else {
            return Ok(0);
        };

        let mut owners = vec![(request.requester(), FolderRole::Sent)];
        owners.extend(
            request
                .steps()
                .iter()
                .filter(|s| s.has_approved())
                .map(|s| (s.approver(), FolderRole::Received)),
        );

        let mut patched = 0;
        for (owner, role) in owners {
            let key = slot_key(owner, role, FolderStatus::Approved, request.id());
            if let Some(bytes) = tree.get(&key)? {
                let mut slot: FolderSlot = decode_tx(&bytes)?;
                if slot.locator != stamped {
                    slot.locator = stamped.to_owned();
                    tree.insert(key, encode_tx(&slot)?)?;
                    patched += 1;
                }
            }
        }
        Ok(patched)
    }

    /// Rewrites every slot of the request to match [`expected_slots`].
    /// Used to recover from a crash between commit and projection, or from
    /// slots edited out of band.
    pub fn reproject(&self, tree: &TransactionalTree, request: &ApprovalRequest) -> TxResult<()> {
        let expected = expected_slots(request);

        let mut pairs = vec![(request.requester(), FolderRole::Sent)];
        pairs.extend(request.steps().iter().map(|s| (s.approver(), FolderRole::Received)));

        for (owner, role) in pairs {
            for status in FolderStatus::ALL {
                let wanted = expected
                    .iter()
                    .find(|s| &s.owner == owner && s.role == role && s.status == status);
                match wanted {
                    Some(slot) => {
                        self.ensure_slot(tree, request, owner, role, status, &slot.locator)?
                    }
                    None => self.remove_slot(tree, request, owner, role, status)?,
                }
            }
        }
        Ok(())
    }
}
