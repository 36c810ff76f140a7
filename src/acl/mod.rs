//! Permission resolution engine
//!
//! Answers "can this authorization set do X on scope Y?" by reading ACL map
//! containers out of the replica. Block and element scopes without a map of
//! their own inherit the document map.

mod map;
mod permission;
mod resolver;

pub use map::AclMap;
pub use permission::{Permission, Scope, ScopeKind};
pub use resolver::PermissionResolver;
