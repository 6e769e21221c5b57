//! Two approvers sign off on a diploma in parallel, then the stamped copy is
//! checked against its verification code.
//!
//! Run with `cargo run --example parallel_approval`. Set `APPROVAL_DB_PATH`
//! to keep the store around; by default it lives in a temporary directory.
use std::sync::Arc;

use document_approval::folder::{FolderRole, FolderStatus};
use document_approval::ledger::{LedgerEvent, LedgerEventKind};
use document_approval::stamping::{CborTrailerRenderer, ContentStore, MemoryContentStore, StaticDirectory};
use document_approval::{Artifact, NewRequest, ParticipantId, Topology, WorkflowConfig, WorkflowEngine, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = WorkflowConfig::from_env()?;
    telemetry::init_tracing(&config.log_filter);

    let scratch = tempfile::tempdir()?;
    if std::env::var_os("APPROVAL_DB_PATH").is_none() {
        config.db_path = scratch.path().join("approval.db");
    }

    let registrar = ParticipantId::parse("registrar")?;
    let dean = ParticipantId::parse("dean")?;
    let rector = ParticipantId::parse("rector")?;

    let content = Arc::new(MemoryContentStore::new());
    let original = content.put(b"%PDF-1.7 diploma of J. Doe".to_vec()).await?;

    let directory = StaticDirectory::new()
        .insert(dean.clone(), "Prof. Ada Byron", "Dean")
        .insert(rector.clone(), "Prof. Alan Church", "Rector");

    let engine = WorkflowEngine::open(
        &config,
        content.clone(),
        Arc::new(CborTrailerRenderer),
        Arc::new(directory),
    )?;

    let id = engine.create_request(
        NewRequest::new(registrar.clone(), Artifact::new(original, "diploma.pdf"))
            .set_approvers(vec![dean.clone(), rector.clone()])
            .set_topology(Topology::Parallel),
    )?;
    println!("created {id}");

    for (n, approver) in [&dean, &rector].into_iter().enumerate() {
        let event = LedgerEvent::new(
            LedgerEventKind::Approved,
            id.clone(),
            approver.clone(),
            format!("0xdemo{n}"),
        )
        .confirmed();
        engine.handle(event).await?;
        println!("{approver} approved -> {}", engine.get_status(&id)?.status);
    }

    let view = engine.get_status(&id)?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    for slot in engine.list_folder(&registrar, FolderRole::Sent, FolderStatus::Approved)? {
        println!("registrar sent/approved: {} -> {}", slot.file_name, slot.locator);
    }

    if let Some(stamped) = view.stamped_document.as_deref() {
        let bytes = content.get(stamped).await?;
        let outcome = engine.service().verify_document(&view.verification_code, &bytes)?;
        println!("{} authentic: {}", view.verification_code, outcome.is_authentic());
    }

    Ok(())
}
