//! Approval lifecycle transitions
//!
//! Draft -> Approved/Rejected, Approved <-> Rejected, and back to Draft only
//! through an explicit Manage-gated revert. Every function here mutates the
//! open transaction only; callers pair each logical action with one commit.

use std::collections::BTreeSet;

use super::book;
use super::record::{ApprovalRecords, ApprovalState, GroupApproval, UserApproval};
use crate::acl::{Permission, PermissionResolver, Scope};
use crate::convergent::{ContainerId, ConvergentDocument};
use crate::principal::{group_token, PrincipalSet, Session};
use crate::schema;

fn approvals_container(doc: &ConvergentDocument, scope: &Scope) -> Option<ContainerId> {
    let resolver = PermissionResolver::new(doc);
    if !resolver.resolves(scope) {
        return None;
    }
    schema::child(doc, scope.container()?, schema::APPROVALS)
}

/// Records attached to an entity; empty when the entity is gone.
pub fn records(doc: &ConvergentDocument, scope: &Scope) -> ApprovalRecords {
    approvals_container(doc, scope)
        .map(|c| book::read(doc, &c))
        .unwrap_or_default()
}

fn approvers(doc: &ConvergentDocument, scope: &Scope) -> BTreeSet<String> {
    PermissionResolver::new(doc).approvers(scope)
}

/// Derived approval state of an entity. The document scope and vanished
/// entities are always `Draft`.
pub fn state(doc: &ConvergentDocument, scope: &Scope) -> ApprovalState {
    records(doc, scope).state(&approvers(doc, scope))
}

pub fn has_rejected(doc: &ConvergentDocument, scope: &Scope, approval_key: &str) -> bool {
    records(doc, scope).has_rejected(approval_key)
}

/// Edit gating: an approved entity is editable by `Manage` holders only.
pub fn can_edit(doc: &ConvergentDocument, scope: &Scope, principals: &PrincipalSet) -> bool {
    let resolver = PermissionResolver::new(doc);
    let required = if state(doc, scope) == ApprovalState::Approved {
        Permission::Manage
    } else {
        Permission::Edit
    };
    resolver.has_permission(scope, required, principals)
}

pub fn approve(doc: &mut ConvergentDocument, scope: &Scope, session: &Session) -> bool {
    cast_verdict(doc, scope, session, ApprovalState::Approved)
}

/// A rejection also drives every group the principal votes in to `Rejected`,
/// whatever the other members said.
pub fn reject(doc: &mut ConvergentDocument, scope: &Scope, session: &Session) -> bool {
    cast_verdict(doc, scope, session, ApprovalState::Rejected)
}

fn cast_verdict(
    doc: &mut ConvergentDocument,
    scope: &Scope,
    session: &Session,
    verdict: ApprovalState,
) -> bool {
    let (container, existing) = {
        let resolver = PermissionResolver::new(doc);
        if !resolver.has_permission(scope, Permission::Approve, &session.principals()) {
            log::debug!("{} may not {} {:?}", session.user, verdict, scope);
            return false;
        }
        let Some(container) = approvals_container(doc, scope) else {
            return false;
        };
        let existing = book::read(doc, &container);
        (container, existing)
    };

    let key = session.approval_key();
    let key_str = key.to_string();
    let record = UserApproval::new(session.user.as_str(), verdict);

    // Groups requested on this entity that the session belongs to
    let groups: Vec<&GroupApproval> = existing
        .groups
        .values()
        .filter(|g| session.is_member_of(&g.group_ref))
        .collect();

    if groups.is_empty() {
        if existing.users.get(&key_str).map(|u| u.state) == Some(verdict) {
            return false;
        }
        book::write_user(doc, &container, &key, &record);
        return true;
    }

    let mut changed = false;
    for group in groups {
        if group.members.get(&key_str).map(|m| m.state) == Some(verdict) {
            continue;
        }
        book::write_member(doc, &container, &group.group_ref, &key, &record);
        changed = true;
    }
    changed
}

/// Clear every approval record of the entity in one go. Manage only; a
/// second revert finds nothing to clear and reports `false`.
pub fn revert_to_draft(doc: &mut ConvergentDocument, scope: &Scope, session: &Session) -> bool {
    if !PermissionResolver::new(doc).has_permission(scope, Permission::Manage, &session.principals())
    {
        log::debug!("{} may not revert {:?}", session.user, scope);
        return false;
    }
    let Some(container) = approvals_container(doc, scope) else {
        return false;
    };
    doc.clear(&container) > 0
}

/// Ask a group to approve the entity. Manage only.
pub fn request_group_approval(
    doc: &mut ConvergentDocument,
    scope: &Scope,
    session: &Session,
    group: &str,
    require_all: bool,
) -> bool {
    if !PermissionResolver::new(doc).has_permission(scope, Permission::Manage, &session.principals())
    {
        return false;
    }
    let Some(container) = approvals_container(doc, scope) else {
        return false;
    };
    let group_ref = group_token(group);
    let existing = book::read(doc, &container);
    if existing
        .groups
        .get(&group_ref)
        .map_or(false, |g| g.require_all == require_all)
    {
        return false;
    }
    book::write_group(doc, &container, &group_ref, require_all);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclMap;
    use crate::convergent::{ContainerKind, PeerId, Value};

    fn setup() -> (ConvergentDocument, Scope) {
        let mut doc = ConvergentDocument::new(PeerId(1));
        let mut acl = AclMap::with_owner("alice");
        acl.grant(Permission::Approve, "bob")
            .grant(Permission::Approve, "carol")
            .grant(Permission::Approve, "group:legal")
            .grant(Permission::Edit, "erin");
        acl.write(&mut doc, &schema::doc_acl());

        let element = doc.create_container(ContainerKind::Map);
        let acls = doc.create_container(ContainerKind::Map);
        let approvals = doc.create_container(ContainerKind::Map);
        doc.put(&element, schema::LANGUAGE, Value::string("en"));
        doc.put(&element, schema::ACLS, Value::Container(acls));
        doc.put(&element, schema::APPROVALS, Value::Container(approvals));
        doc.put(&schema::languages(), "en", Value::Container(element.clone()));
        (doc, Scope::Element(element))
    }

    fn user(name: &str) -> Session {
        Session::new(name, "acme")
    }

    #[test]
    fn test_approve_is_idempotent_and_gated() {
        let (mut doc, scope) = setup();
        assert!(!approve(&mut doc, &scope, &user("erin")));
        assert_eq!(state(&doc, &scope), ApprovalState::Draft);

        assert!(approve(&mut doc, &scope, &user("bob")));
        assert!(!approve(&mut doc, &scope, &user("bob")));
        assert_eq!(state(&doc, &scope), ApprovalState::Approved);
    }

    #[test]
    fn test_reject_then_approve_again() {
        let (mut doc, scope) = setup();
        assert!(reject(&mut doc, &scope, &user("bob")));
        assert!(!reject(&mut doc, &scope, &user("bob")));
        assert!(has_rejected(&doc, &scope, "acme:bob"));
        assert_eq!(state(&doc, &scope), ApprovalState::Rejected);

        assert!(approve(&mut doc, &scope, &user("bob")));
        assert_eq!(state(&doc, &scope), ApprovalState::Approved);
        assert!(!has_rejected(&doc, &scope, "acme:bob"));
    }

    #[test]
    fn test_revert_requires_manage_and_is_idempotent() {
        let (mut doc, scope) = setup();
        approve(&mut doc, &scope, &user("bob"));
        reject(&mut doc, &scope, &user("carol"));

        assert!(!revert_to_draft(&mut doc, &scope, &user("bob")));
        assert!(revert_to_draft(&mut doc, &scope, &user("alice")));
        assert_eq!(state(&doc, &scope), ApprovalState::Draft);
        assert!(records(&doc, &scope).is_empty());
        assert!(!revert_to_draft(&mut doc, &scope, &user("alice")));
    }

    #[test]
    fn test_group_member_votes_land_in_group() {
        let (mut doc, scope) = setup();
        assert!(request_group_approval(&mut doc, &scope, &user("alice"), "legal", false));
        assert!(!request_group_approval(&mut doc, &scope, &user("alice"), "legal", false));
        assert_eq!(state(&doc, &scope), ApprovalState::Draft);

        let dan = Session::new("dan", "acme").with_group("legal");
        assert!(approve(&mut doc, &scope, &dan));
        let recs = records(&doc, &scope);
        assert!(recs.users.is_empty());
        assert_eq!(recs.groups["group:legal"].members.len(), 1);
        assert_eq!(state(&doc, &scope), ApprovalState::Approved);

        let fay = Session::new("fay", "acme").with_group("legal");
        assert!(reject(&mut doc, &scope, &fay));
        assert_eq!(state(&doc, &scope), ApprovalState::Rejected);
    }

    #[test]
    fn test_require_all_group_needs_every_approver() {
        let (mut doc, scope) = setup();
        request_group_approval(&mut doc, &scope, &user("alice"), "legal", true);

        let bob = Session::new("bob", "acme").with_group("legal");
        let carol = Session::new("carol", "acme").with_group("legal");
        approve(&mut doc, &scope, &bob);
        assert_eq!(state(&doc, &scope), ApprovalState::Draft);
        approve(&mut doc, &scope, &carol);
        assert_eq!(state(&doc, &scope), ApprovalState::Approved);
    }

    #[test]
    fn test_require_all_counts_direct_votes_of_outside_approvers() {
        let (mut doc, scope) = setup();
        request_group_approval(&mut doc, &scope, &user("alice"), "legal", true);

        let dan = Session::new("dan", "acme").with_group("legal");
        assert!(approve(&mut doc, &scope, &dan));
        assert_eq!(state(&doc, &scope), ApprovalState::Draft);

        // bob and carol are required approvers outside the group
        assert!(approve(&mut doc, &scope, &user("bob")));
        assert!(!approve(&mut doc, &scope, &user("bob")));
        assert_eq!(state(&doc, &scope), ApprovalState::Draft);
        assert!(approve(&mut doc, &scope, &user("carol")));
        assert_eq!(state(&doc, &scope), ApprovalState::Approved);

        assert!(reject(&mut doc, &scope, &user("carol")));
        assert_eq!(state(&doc, &scope), ApprovalState::Rejected);
    }

    #[test]
    fn test_approved_entity_needs_manage_to_edit() {
        let (mut doc, scope) = setup();
        let erin = user("erin").principals();
        let alice = user("alice").principals();
        assert!(can_edit(&doc, &scope, &erin));

        approve(&mut doc, &scope, &user("bob"));
        assert!(!can_edit(&doc, &scope, &erin));
        assert!(can_edit(&doc, &scope, &alice));

        revert_to_draft(&mut doc, &scope, &user("alice"));
        assert!(can_edit(&doc, &scope, &erin));
    }

    #[test]
    fn test_document_scope_has_no_approvals() {
        let (mut doc, _) = setup();
        assert!(!approve(&mut doc, &Scope::Document, &user("alice")));
        assert_eq!(state(&doc, &Scope::Document), ApprovalState::Draft);
    }
}
