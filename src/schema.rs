//! Document layout inside the replica
//!
//! Root containers:
//! - `meta` (map): `kind`, `owner`
//! - `acl` (map): the document-level ACL map
//! - `languages` (map): language code -> element entity container (statements)
//! - `blocks` (list): block entity containers in display order (sheets)
//!
//! Every content entity is a map container holding its content reference
//! plus two child map containers created with it: `acls` (empty means
//! "inherit the document ACL") and `approvals`.

use crate::convergent::{ContainerId, ContainerKind, ConvergentDocument, Value};

pub const KIND: &str = "kind";
pub const OWNER: &str = "owner";
pub const LANGUAGE: &str = "language";
pub const BLOCK_TYPE: &str = "type";
pub const CONTENT: &str = "content";
pub const ACLS: &str = "acls";
pub const APPROVALS: &str = "approvals";

pub fn meta() -> ContainerId {
    ContainerId::root("meta", ContainerKind::Map)
}

pub fn doc_acl() -> ContainerId {
    ContainerId::root("acl", ContainerKind::Map)
}

pub fn languages() -> ContainerId {
    ContainerId::root("languages", ContainerKind::Map)
}

pub fn blocks() -> ContainerId {
    ContainerId::root("blocks", ContainerKind::List)
}

/// Follow a container reference stored in an entity field.
pub fn child(doc: &ConvergentDocument, entity: &ContainerId, field: &str) -> Option<ContainerId> {
    if !doc.contains(entity) {
        return None;
    }
    doc.get(entity, field)
        .and_then(Value::as_container)
        .filter(|id| doc.contains(id))
        .cloned()
}

/// Entity containers currently reachable from the document roots.
pub fn live_entities(doc: &ConvergentDocument) -> Vec<ContainerId> {
    let from_languages = doc
        .entries(&languages())
        .filter_map(|(_, v)| v.as_container().cloned());
    let from_blocks = doc
        .list_entries(&blocks())
        .into_iter()
        .filter_map(|e| e.value.as_container().cloned());
    from_languages
        .chain(from_blocks)
        .filter(|id| doc.contains(id))
        .collect()
}

/// A dangling reference found by `validate`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub entity: Option<ContainerId>,
    pub message: String,
}

/// Check that every root entry points at a live entity and every entity's
/// ACL and approval containers exist.
pub fn validate(doc: &ConvergentDocument) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for (code, value) in doc.entries(&languages()) {
        match value.as_container() {
            Some(id) if doc.contains(id) => {}
            _ => issues.push(ValidationIssue {
                entity: value.as_container().cloned(),
                message: format!("language '{}' references a missing element", code),
            }),
        }
    }
    for entry in doc.list_entries(&blocks()) {
        match entry.value.as_container() {
            Some(id) if doc.contains(id) => {}
            _ => issues.push(ValidationIssue {
                entity: entry.value.as_container().cloned(),
                message: format!("block slot '{}' references a missing block", entry.key),
            }),
        }
    }

    for entity in live_entities(doc) {
        for field in [ACLS, APPROVALS] {
            if child(doc, &entity, field).is_none() {
                issues.push(ValidationIssue {
                    entity: Some(entity.clone()),
                    message: format!("entity is missing its '{}' container", field),
                });
            }
        }
    }

    issues
}
