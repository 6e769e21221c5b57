//! Property-based tests for the approval state machine
//!
//! Random sequences of approve/reject attempts are thrown at requests of
//! every shape. Whatever the order, the committed state must respect the
//! turn rules, resolve each step at most once and never leave a terminal
//! status.

use proptest::prelude::*;
use std::collections::HashSet;

use document_approval::types::TimeStamp;
use document_approval::verification::VerificationCodeGenerator;
use document_approval::{
    ApprovalRequest, Artifact, NewRequest, ParticipantId, RequestId, RequestStatus, StepAction,
    Topology, WorkflowError,
};

// PROPERTY TEST STRATEGIES

fn topology_strategy() -> impl Strategy<Value = Topology> {
    prop::bool::ANY.prop_map(|b| if b { Topology::Sequential } else { Topology::Parallel })
}

/// (approver index, approve?) pairs; indices may point past the approver
/// list to exercise outsiders.
fn actions_strategy() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0usize..7, prop::bool::weighted(0.8)), 0..24)
}

fn approver(idx: usize) -> ParticipantId {
    ParticipantId::parse(format!("approver_{idx}")).unwrap()
}

fn build(topology: Topology, approvers: usize) -> ApprovalRequest {
    let new = NewRequest::new(
        ParticipantId::parse("requester").unwrap(),
        Artifact::new("cid_original", "doc.pdf"),
    )
    .set_approvers((0..approvers).map(approver).collect())
    .set_topology(topology);
    let code = VerificationCodeGenerator::default().generate(2026);
    ApprovalRequest::create(RequestId::new("req_prop"), new, code, TimeStamp::new()).unwrap()
}

fn apply(request: &mut ApprovalRequest, idx: usize, approve: bool) -> Result<(), WorkflowError> {
    let who = approver(idx);
    if approve {
        request.approve(&who, StepAction::new(), TimeStamp::new())?;
    } else {
        request.reject(&who, StepAction::new(), TimeStamp::new())?;
    }
    Ok(())
}

proptest! {
    /// Property: a failed action never changes the request
    #[test]
    fn prop_failed_actions_do_not_mutate(
        topology in topology_strategy(),
        approvers in 1usize..6,
        actions in actions_strategy(),
    ) {
        let mut request = build(topology, approvers);
        for (idx, approve) in actions {
            let before = request.clone();
            if apply(&mut request, idx, approve).is_err() {
                prop_assert_eq!(&request, &before);
            }
        }
    }

    /// Property: every step resolves at most once, and a resolved step
    /// reports AlreadyResolved on any further attempt
    #[test]
    fn prop_steps_resolve_once(
        topology in topology_strategy(),
        approvers in 1usize..6,
        actions in actions_strategy(),
    ) {
        let mut request = build(topology, approvers);
        let mut resolved = HashSet::new();

        for (idx, approve) in actions {
            let result = apply(&mut request, idx, approve);
            if idx >= approvers {
                prop_assert!(matches!(result, Err(WorkflowError::NotAnApprover(_))));
            } else if resolved.contains(&idx) {
                prop_assert!(matches!(result, Err(WorkflowError::AlreadyResolved(_))));
            } else if result.is_ok() {
                resolved.insert(idx);
            }
        }

        for step in request.steps() {
            prop_assert!(!(step.has_approved() && step.has_rejected()));
        }
    }

    /// Property: in a sequential chain an approval only lands once every
    /// earlier step is approved
    #[test]
    fn prop_sequential_turn_order(
        approvers in 1usize..6,
        actions in actions_strategy(),
    ) {
        let mut request = build(Topology::Sequential, approvers);

        for (idx, approve) in actions {
            let active = request.status().is_active();
            let result = apply(&mut request, idx, approve);
            if result.is_ok() {
                prop_assert!(active);
                prop_assert!(request.steps()[..idx].iter().all(|s| s.has_approved()));
            }
            if let Err(WorkflowError::NotYourTurn(_)) = result {
                prop_assert!(request.steps()[..idx].iter().any(|s| !s.has_approved()));
            }
        }

        let orders: Vec<_> = request.steps().iter().map(|s| s.step_order()).collect();
        prop_assert_eq!(orders, (1..=approvers as u32).collect::<Vec<_>>());
    }

    /// Property: the status always matches the steps. One rejection means
    /// REJECTED, all approvals mean APPROVED, and PARTIAL is sequential only
    #[test]
    fn prop_status_follows_steps(
        topology in topology_strategy(),
        approvers in 1usize..6,
        actions in actions_strategy(),
    ) {
        let mut request = build(topology, approvers);
        for (idx, approve) in actions {
            let _ = apply(&mut request, idx, approve);

            let steps = request.steps();
            let expected = if steps.iter().any(|s| s.has_rejected()) {
                RequestStatus::Rejected
            } else if steps.iter().all(|s| s.has_approved()) {
                RequestStatus::Approved
            } else if topology == Topology::Sequential && steps.iter().any(|s| s.has_approved()) {
                RequestStatus::Partial
            } else {
                RequestStatus::Pending
            };
            prop_assert_eq!(request.status(), expected);
        }
    }

    /// Property: terminal statuses are sinks. Unresolved approvers and the
    /// requester get RequestNotActive, resolved approvers AlreadyResolved
    #[test]
    fn prop_terminal_is_a_sink(
        topology in topology_strategy(),
        approvers in 1usize..6,
        actions in actions_strategy(),
        cancel_at in 0usize..24,
    ) {
        let mut request = build(topology, approvers);
        let requester = request.requester().clone();

        for (n, (idx, approve)) in actions.into_iter().enumerate() {
            if n == cancel_at {
                let _ = request.cancel(&requester, TimeStamp::new());
            }
            let status = request.status();
            if !status.is_terminal() {
                let _ = apply(&mut request, idx, approve);
                continue;
            }

            let before = request.clone();
            let result = apply(&mut request, idx, approve);
            prop_assert_eq!(&request, &before);

            match request.step_of(&approver(idx)) {
                None => {
                    prop_assert!(matches!(result, Err(WorkflowError::NotAnApprover(_))));
                }
                Some(step) if step.is_resolved() => {
                    prop_assert!(matches!(result, Err(WorkflowError::AlreadyResolved(_))));
                }
                Some(_) => {
                    prop_assert!(matches!(result, Err(WorkflowError::RequestNotActive(s)) if s == status));
                }
            }
        }

        let status = request.status();
        if status.is_terminal() {
            prop_assert!(request.completed_at().is_some());
            let before = request.clone();
            let result = request.cancel(&requester, TimeStamp::new());
            prop_assert!(matches!(result, Err(WorkflowError::RequestNotActive(s)) if s == status));
            prop_assert_eq!(&request, &before);
        }
    }
}

#[test]
fn ten_thousand_codes_do_not_collide() {
    let generator = VerificationCodeGenerator::default();
    let mut seen = HashSet::new();

    for _ in 0..10_000 {
        let code = generator
            .generate_unique(2026, 16, |c| Ok::<_, WorkflowError>(seen.contains(c.as_str())))
            .unwrap()
            .unwrap();
        assert!(seen.insert(code.as_str().to_owned()));
    }
    assert_eq!(seen.len(), 10_000);
}
