// Coauthor - permissions, approvals and presence for co-edited documents

pub mod acl;
pub mod approval;
pub mod config;
pub mod controller;
pub mod convergent;
pub mod ephemeral;
pub mod principal;
pub mod schema;
pub mod subscription;

pub use acl::{AclMap, Permission, PermissionResolver, Scope, ScopeKind};
pub use approval::{ApprovalRecord, ApprovalRecords, ApprovalState, GroupApproval, UserApproval};
pub use config::{CoauthorConfig, ConfigError, PresenceConfig};
pub use controller::{
    BlockKind, BlockSummary, Change, ChangeFilter, ChangeKind, ControllerError, DocumentController,
    DocumentKind, Entity, ShiftDirection,
};
pub use convergent::{ContainerId, ContainerKind, PeerId, Replica, ReplicaError, Transaction, Value};
pub use ephemeral::{
    CursorReplica, CursorSelection, CursorStore, EphemeralError, EphemeralEvent, EphemeralKey,
    EphemeralStore, EphemeralValue, EventSource, PresenceHeartbeat, PresenceManager,
    PresenceRecord,
};
pub use principal::{ApprovalKey, PrincipalSet, Session};
pub use subscription::Subscription;
