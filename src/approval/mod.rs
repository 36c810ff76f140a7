//! Approval workflow state machine
//!
//! Per-entity lifecycle (Draft / Approved / Rejected) driven by user and
//! group approval records stored in the replica next to the entity.

mod book;
mod record;
pub mod workflow;

pub use record::{ApprovalRecord, ApprovalRecords, ApprovalState, GroupApproval, UserApproval};
