//! Multi-party document approval workflow.
//!
//! An [`ApprovalRequest`](request::ApprovalRequest) tracks the decisions of a
//! fixed list of approvers, in order or in parallel. Every committed
//! transition also moves the per-participant folder slots and appends to the
//! audit history in the same storage transaction. Once approved, the
//! document is stamped with a verification code that anyone can check later.

pub mod config;
pub mod engine;
pub mod error;
pub mod folder;
pub mod history;
pub mod ledger;
pub mod request;
pub mod service;
pub mod stamping;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod verification;
pub mod view;

pub use config::WorkflowConfig;
pub use engine::{LedgerOutcome, WorkflowEngine};
pub use error::{ErrorClass, WorkflowError};
pub use request::{ApprovalRequest, NewRequest, StepAction, Transition};
pub use service::ApprovalService;
pub use types::{ApprovalType, Artifact, ParticipantId, Priority, RequestId, RequestStatus, Topology};
