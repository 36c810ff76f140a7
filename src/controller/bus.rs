//! Change notification bus
//!
//! One registry for every "something changed here" subscription, keyed by
//! (scope kind, scope id, change kind). Notifications carry no diff: a
//! listener re-reads whatever it cares about.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::acl::{Scope, ScopeKind};
use crate::convergent::{ContainerId, ConvergentDocument, EventOrigin, ReplicaEvent};
use crate::schema;
use crate::subscription::{Subscribers, Subscription};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Acl,
    Approval,
    /// Languages or blocks added, removed or reordered; document metadata
    Structure,
    Content,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Change {
    pub scope: Scope,
    pub kind: ChangeKind,
}

/// What a listener wants to hear about. Unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    pub scope_kind: Option<ScopeKind>,
    pub scope_id: Option<ContainerId>,
    pub change_kind: Option<ChangeKind>,
}

impl ChangeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Changes to exactly this scope.
    pub fn scope(scope: &Scope) -> Self {
        Self {
            scope_kind: Some(scope.kind()),
            scope_id: scope.container().cloned(),
            change_kind: None,
        }
    }

    pub fn kind(mut self, kind: ChangeKind) -> Self {
        self.change_kind = Some(kind);
        self
    }

    pub fn matches(&self, change: &Change) -> bool {
        if self.change_kind.map_or(false, |k| k != change.kind) {
            return false;
        }
        let scope_hit = self.scope_kind.map_or(true, |k| k == change.scope.kind())
            && self
                .scope_id
                .as_ref()
                .map_or(true, |id| change.scope.container() == Some(id));
        if scope_hit {
            return true;
        }
        // Blocks and elements without their own map inherit the document
        // ACL, so a document ACL change may change theirs too.
        change.kind == ChangeKind::Acl
            && change.scope == Scope::Document
            && matches!(self.scope_kind, Some(ScopeKind::Block | ScopeKind::Element))
    }
}

pub(crate) struct ChangeBus {
    subscribers: Subscribers<(Change, EventOrigin)>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            subscribers: Subscribers::new(),
        }
    }

    pub fn subscribe(
        &self,
        filter: ChangeFilter,
        callback: impl Fn(&Change, EventOrigin) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribers
            .subscribe(Arc::new(move |(change, origin): &(Change, EventOrigin)| {
                if filter.matches(change) {
                    callback(change, *origin);
                }
            }))
    }

    pub fn publish(&self, changes: &BTreeSet<Change>, origin: EventOrigin) {
        for change in changes {
            self.subscribers.emit(&(change.clone(), origin));
        }
    }
}

/// Where an entity sits and which containers hang off it
#[derive(Clone, Debug)]
struct IndexedEntity {
    scope: Scope,
    acls: Option<ContainerId>,
    approvals: Option<ContainerId>,
    content: Option<ContainerId>,
}

/// Entities seen at the last classification. A removed entity no longer
/// resolves in the document, so its scope and child containers are taken
/// from here.
#[derive(Clone, Debug, Default)]
pub(crate) struct EntityIndex {
    entities: BTreeMap<ContainerId, IndexedEntity>,
}

impl EntityIndex {
    pub fn build(doc: &ConvergentDocument) -> Self {
        let entities = schema::live_entities(doc)
            .into_iter()
            .map(|entity| {
                let scope = if doc.get(&entity, schema::LANGUAGE).is_some() {
                    Scope::Element(entity.clone())
                } else {
                    Scope::Block(entity.clone())
                };
                let indexed = IndexedEntity {
                    scope,
                    acls: schema::child(doc, &entity, schema::ACLS),
                    approvals: schema::child(doc, &entity, schema::APPROVALS),
                    content: schema::child(doc, &entity, schema::CONTENT),
                };
                (entity, indexed)
            })
            .collect();
        Self { entities }
    }
}

/// Translate touched containers into scoped changes and refresh `known`.
///
/// An entity that was live at the previous call and is gone now reports
/// every change kind: its ACL, approval state and content all read as absent.
pub(crate) fn classify(
    doc: &ConvergentDocument,
    known: &mut EntityIndex,
    event: &ReplicaEvent,
) -> BTreeSet<Change> {
    let mut changes = BTreeSet::new();
    let document = |kind| Change {
        scope: Scope::Document,
        kind,
    };

    for container in &event.containers {
        if *container == schema::doc_acl() {
            changes.insert(document(ChangeKind::Acl));
        } else if *container == schema::meta()
            || *container == schema::languages()
            || *container == schema::blocks()
        {
            changes.insert(document(ChangeKind::Structure));
        }
    }

    let current = EntityIndex::build(doc);
    for (id, info) in &known.entities {
        if !current.entities.contains_key(id) {
            for kind in [ChangeKind::Acl, ChangeKind::Approval, ChangeKind::Content] {
                changes.insert(Change {
                    scope: info.scope.clone(),
                    kind,
                });
            }
        }
    }

    for (id, info) in &current.entities {
        let touched = |child: &Option<ContainerId>| {
            child.as_ref().map_or(false, |c| event.containers.contains(c))
        };
        if touched(&info.acls) {
            changes.insert(Change {
                scope: info.scope.clone(),
                kind: ChangeKind::Acl,
            });
        }
        if touched(&info.approvals) {
            changes.insert(Change {
                scope: info.scope.clone(),
                kind: ChangeKind::Approval,
            });
        }
        if event.containers.contains(id) || touched(&info.content) {
            changes.insert(Change {
                scope: info.scope.clone(),
                kind: ChangeKind::Content,
            });
        }
    }

    *known = current;
    changes
}
