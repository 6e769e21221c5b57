//! Property-based tests for the folder projection
//!
//! Each case runs a random action sequence against a fresh sled database and
//! checks that the stored folder slots are exactly the ones derived from the
//! committed request, with each participant in at most one bucket. These
//! tests touch disk, so the case count is kept low.

use proptest::prelude::*;
use sled::transaction::TransactionalTree;
use std::sync::Arc;

use document_approval::folder::{FolderProjector, FolderRole, FolderStatus, expected_slots};
use document_approval::store::TxResult;
use document_approval::view::ArtifactReference;
use document_approval::{
    ApprovalRequest, ApprovalService, Artifact, NewRequest, ParticipantId, RequestId,
    RequestStatus, StepAction, Topology,
};

#[derive(Debug, Clone, Copy)]
enum Action {
    Approve(usize),
    Reject(usize),
    Cancel,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        6 => (0usize..5).prop_map(Action::Approve),
        1 => (0usize..5).prop_map(Action::Reject),
        1 => Just(Action::Cancel),
    ]
}

fn approver(idx: usize) -> ParticipantId {
    ParticipantId::parse(format!("approver_{idx}")).unwrap()
}

fn requester() -> ParticipantId {
    ParticipantId::parse("requester").unwrap()
}

fn run_case(
    sequential: bool,
    approvers: usize,
    actions: &[Action],
) -> anyhow::Result<(tempfile::TempDir, Arc<sled::Db>, Arc<ApprovalService>, RequestId)> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("projection.db"))?);
    let service = Arc::new(ApprovalService::new(db.clone())?);

    let topology = if sequential { Topology::Sequential } else { Topology::Parallel };
    let new = NewRequest::new(requester(), Artifact::new("cid_original", "doc.pdf"))
        .set_approvers((0..approvers).map(approver).collect())
        .set_topology(topology);
    let id = service.create_request(new)?.id().clone();

    for action in actions {
        // precondition failures are expected and leave no trace
        let _ = match *action {
            Action::Approve(idx) => service.record_approval(&id, &approver(idx), StepAction::new()),
            Action::Reject(idx) => service.record_rejection(&id, &approver(idx), StepAction::new()),
            Action::Cancel => service.cancel(&id, &requester()),
        };
    }
    // dropped last, after the database
    Ok((dir, db, service, id))
}

fn snapshot(service: &ApprovalService, approvers: usize) -> Vec<ArtifactReference> {
    let mut owners = vec![(requester(), FolderRole::Sent)];
    owners.extend((0..approvers).map(|i| (approver(i), FolderRole::Received)));

    let mut slots = vec![];
    for (owner, role) in owners {
        for status in FolderStatus::ALL {
            slots.extend(service.list_folder(&owner, role, status).unwrap());
        }
    }
    slots
}

/// Runs the projector hook matching the committed status twice over the
/// folders tree. Returns `false` when no transition has happened yet.
fn replay_hook(db: &sled::Db, request: &ApprovalRequest) -> anyhow::Result<bool> {
    let folders = db.open_tree("folders")?;
    let projector = FolderProjector::new();

    let twice = |hook: &dyn Fn(&TransactionalTree) -> TxResult<()>| {
        folders
            .transaction(|tree| {
                hook(tree)?;
                hook(tree)
            })
            .map_err(|e| anyhow::anyhow!("replay failed: {e}"))
    };

    match request.status() {
        RequestStatus::Rejected => {
            let rejecting = request
                .steps()
                .iter()
                .find(|s| s.has_rejected())
                .map(|s| s.approver().clone())
                .ok_or_else(|| anyhow::anyhow!("rejected request without a rejecting step"))?;
            twice(&|tree: &TransactionalTree| projector.on_rejected(tree, request, &rejecting))?;
        }
        RequestStatus::Cancelled | RequestStatus::Expired => {
            twice(&|tree: &TransactionalTree| projector.on_canceled(tree, request))?;
        }
        status => {
            let Some(last) = request
                .steps()
                .iter()
                .filter(|s| s.has_approved())
                .max_by_key(|s| s.acted_at().cloned())
            else {
                return Ok(false);
            };
            let approver = last.approver().clone();
            let terminal = status == RequestStatus::Approved;
            twice(&|tree: &TransactionalTree| projector.on_approved(tree, request, &approver, terminal))?;
        }
    }
    Ok(true)
}

#[test]
fn replaying_each_hook_leaves_folders_unchanged() -> anyhow::Result<()> {
    let cases = [
        (false, 2, vec![Action::Approve(0), Action::Approve(1)], RequestStatus::Approved),
        (false, 3, vec![Action::Approve(0), Action::Reject(1)], RequestStatus::Rejected),
        (true, 2, vec![Action::Approve(0), Action::Cancel], RequestStatus::Cancelled),
        (true, 3, vec![Action::Approve(0)], RequestStatus::Partial),
    ];

    for (sequential, approvers, actions, expected) in cases {
        let (_dir, db, service, id) = run_case(sequential, approvers, &actions)?;
        let request = service.load_request(&id)?;
        assert_eq!(request.status(), expected);

        let before = snapshot(&service, approvers);
        assert!(replay_hook(&db, &request)?);
        assert_eq!(snapshot(&service, approvers), before);
        service.verify_projection(&id)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: stored slots equal the slots derived from the request, and
    /// nobody holds the same request in two buckets of one role
    #[test]
    fn prop_folders_mirror_request_state(
        sequential in any::<bool>(),
        approvers in 1usize..5,
        actions in prop::collection::vec(action_strategy(), 0..10),
    ) {
        let (_dir, _db, service, id) = run_case(sequential, approvers, &actions).unwrap();
        service.verify_projection(&id).unwrap();

        let request = service.load_request(&id).unwrap();
        let mut owners = vec![(requester(), FolderRole::Sent)];
        owners.extend((0..approvers).map(|i| (approver(i), FolderRole::Received)));

        for (owner, role) in owners {
            let mut buckets = 0;
            for status in FolderStatus::ALL {
                let listed = service.list_folder(&owner, role, status).unwrap();
                prop_assert!(listed.len() <= 1);
                buckets += listed.len();
            }
            prop_assert!(buckets <= 1);
            if role == FolderRole::Sent {
                prop_assert_eq!(buckets, 1);
            }
        }

        prop_assert_eq!(snapshot(&service, approvers).len(), expected_slots(&request).len());
    }

    /// Property: replaying the last projector hook twice changes nothing
    #[test]
    fn prop_hook_replay_is_idempotent(
        sequential in any::<bool>(),
        approvers in 1usize..5,
        actions in prop::collection::vec(action_strategy(), 0..10),
    ) {
        let (_dir, db, service, id) = run_case(sequential, approvers, &actions).unwrap();
        let request = service.load_request(&id).unwrap();

        let before = snapshot(&service, approvers);
        replay_hook(&db, &request).unwrap();
        service.verify_projection(&id).unwrap();

        prop_assert_eq!(before, snapshot(&service, approvers));
    }

    /// Property: reprojecting a consistent request changes nothing
    #[test]
    fn prop_reproject_is_idempotent(
        sequential in any::<bool>(),
        approvers in 1usize..5,
        actions in prop::collection::vec(action_strategy(), 0..10),
    ) {
        let (_dir, _db, service, id) = run_case(sequential, approvers, &actions).unwrap();

        let before = snapshot(&service, approvers);
        service.reproject(&id).unwrap();
        service.reproject(&id).unwrap();
        service.verify_projection(&id).unwrap();

        prop_assert_eq!(before, snapshot(&service, approvers));
    }
}
