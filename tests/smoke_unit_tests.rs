use std::collections::HashMap;
use std::time::Duration;

use document_approval::types::TimeStamp;
use document_approval::utils::{document_digest, new_uuid_to_bech32};
use document_approval::verification::{VerificationCode, VerificationCodeGenerator};
use document_approval::view::{ApprovalRequestView, VIEW_VERSION};
use document_approval::{
    ApprovalRequest, Artifact, ErrorClass, NewRequest, ParticipantId, Priority, RequestId,
    StepAction, Topology, WorkflowConfig, WorkflowError,
};

fn participant(name: &str) -> ParticipantId {
    ParticipantId::parse(name).unwrap()
}

#[test]
fn request_ids_are_bech32_with_prefix() {
    let id = new_uuid_to_bech32("req_").unwrap();
    assert!(id.starts_with("req_1"));
    assert_ne!(id, new_uuid_to_bech32("req_").unwrap());
}

#[test]
fn digest_is_hex_sha256() {
    let digest = document_digest(b"hello");
    assert_eq!(digest.len(), 64);
    assert_eq!(
        digest,
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

#[test]
fn verification_codes_parse_leniently() {
    let code = VerificationCodeGenerator::new("uni").generate(2026);
    assert!(code.as_str().starts_with("UNI-2026-"));

    let typed = format!("  {}  ", code.as_str().to_lowercase());
    assert_eq!(VerificationCode::parse(&typed), Some(code));

    assert!(VerificationCode::parse("UNI-26-ABCDEF").is_none());
    assert!(VerificationCode::parse("UNI-2026-ABC").is_none());
    assert!(VerificationCode::parse("UNI-2026-ABCDE!").is_none());
    assert!(VerificationCode::parse("").is_none());
}

#[test]
fn participant_ids_reject_empty_and_nul() {
    assert!(matches!(
        ParticipantId::parse(""),
        Err(WorkflowError::InvalidParticipant(_))
    ));
    assert!(ParticipantId::parse("a\0b").is_err());
    assert!(ParticipantId::parse("0xAbC").is_ok());
}

#[test]
fn new_request_validation() {
    let artifact = Artifact::new("cid", "a.pdf");

    let err = NewRequest::new(participant("req"), artifact.clone())
        .validate()
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NoApprovers));
    assert_eq!(err.class(), ErrorClass::Precondition);

    let err = NewRequest::new(participant("req"), artifact)
        .add_approver(participant("a"))
        .add_approver(participant("a"))
        .validate()
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateApprover(_)));
}

#[test]
fn config_defaults_when_nothing_is_set() {
    let config = WorkflowConfig::from_lookup(|_| None).unwrap();
    assert_eq!(config, WorkflowConfig::default());
    assert_eq!(config.code_prefix, "DOC");
    assert_eq!(config.max_code_attempts, 16);
    assert_eq!(config.stamp_timeout, Duration::from_secs(30));
}

#[test]
fn config_reads_overrides_and_rejects_garbage() {
    let vars = HashMap::from([
        ("APPROVAL_DB_PATH", "/tmp/approvals"),
        ("APPROVAL_CODE_PREFIX", "edu"),
        ("APPROVAL_CODE_MAX_ATTEMPTS", "4"),
        ("APPROVAL_STAMP_TIMEOUT_SECS", "5"),
        ("APPROVAL_LOG", "debug"),
    ]);
    let config = WorkflowConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(config.code_prefix, "EDU");
    assert_eq!(config.max_code_attempts, 4);
    assert_eq!(config.stamp_timeout, Duration::from_secs(5));
    assert_eq!(config.log_filter, "debug");
    assert!(config.code_generator().generate(2026).as_str().starts_with("EDU-2026-"));

    let bad_number = WorkflowConfig::from_lookup(|k| {
        (k == "APPROVAL_CODE_MAX_ATTEMPTS").then(|| "many".to_string())
    });
    assert!(bad_number.is_err());

    let bad_prefix = WorkflowConfig::from_lookup(|k| {
        (k == "APPROVAL_CODE_PREFIX").then(|| "TOO-LONG-PREFIX".to_string())
    });
    assert!(bad_prefix.is_err());
}

#[test]
fn request_view_serializes_with_version() {
    let new = NewRequest::new(participant("req"), Artifact::new("cid", "thesis.pdf").set_size(1024))
        .set_approvers(vec![participant("a"), participant("b")])
        .set_topology(Topology::Sequential)
        .set_priority(Priority::Urgent);
    let code = VerificationCodeGenerator::default().generate(2026);
    let mut request =
        ApprovalRequest::create(RequestId::new("req_view"), new, code, TimeStamp::new()).unwrap();
    request
        .approve(&participant("a"), StepAction::new().set_signature(vec![1, 2]), TimeStamp::new())
        .unwrap();

    let view = ApprovalRequestView::from_request(&request, &TimeStamp::new());
    let json = serde_json::to_value(&view).unwrap();

    assert_eq!(json["version"], VIEW_VERSION);
    assert_eq!(json["status"], "PARTIAL");
    assert_eq!(json["priority"], "URGENT");
    assert_eq!(json["file_size"], 1024);
    assert_eq!(json["awaiting"], serde_json::json!(["b"]));
    assert_eq!(json["steps"][0]["signature_hex"], "0102");
    assert_eq!(json["steps"][1]["step_order"], 2);
    assert_eq!(json["is_overdue"], false);
}
