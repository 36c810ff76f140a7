//! Multi-peer document scenarios
//!
//! Each peer owns its own `Replica`; "sync" moves committed transactions
//! between them the way a transport would, in whatever order the test picks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use coauthor::acl::PermissionResolver;
use coauthor::schema;
use coauthor::{
    AclMap, ApprovalKey, ApprovalState, BlockKind, DocumentController, DocumentKind, Entity,
    PeerId, Permission, PrincipalSet, Replica, Scope, Session,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn session(user: &str) -> Session {
    Session::new(user, "acme")
}

fn sync(a: &Replica, b: &Replica) {
    a.sync_into(b);
    b.sync_into(a);
}

/// A statement with an "en" element, owned by alice, where u1 and u2 may
/// approve. Returns the origin replica.
fn shared_statement() -> Replica {
    let replica = Replica::new(PeerId(1));
    let ctl = DocumentController::create(replica.clone(), DocumentKind::Statement, session("alice"))
        .unwrap();
    ctl.add_language("en").unwrap();
    let mut acl = ctl.doc_acl_map();
    acl.grant(Permission::Approve, "u1")
        .grant(Permission::Approve, "u2")
        .grant(Permission::Edit, "editor");
    assert!(ctl.patch_doc_acl_map(&acl));
    ctl.commit();
    replica
}

fn peer_of(origin: &Replica, peer: u64) -> Replica {
    let replica = Replica::new(PeerId(peer));
    origin.sync_into(&replica);
    replica
}

// ---------------------------------------------------------------------------
// Approval races
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_approve_and_reject_converge_to_rejected() {
    init_logging();
    for approve_first in [true, false] {
        let a = shared_statement();
        let b = peer_of(&a, 2);
        let u1 = DocumentController::open(a.clone(), session("u1")).unwrap();
        let u2 = DocumentController::open(b.clone(), session("u2")).unwrap();
        let en = Entity::language("en");

        assert!(u1.approve(&en).unwrap());
        assert!(u2.reject(&en).unwrap());
        if approve_first {
            u1.commit();
            u2.commit();
        } else {
            u2.commit();
            u1.commit();
        }
        assert_eq!(u1.approval_state(&en).unwrap(), ApprovalState::Approved);

        sync(&a, &b);
        assert_eq!(u1.approval_state(&en).unwrap(), ApprovalState::Rejected);
        assert_eq!(u2.approval_state(&en).unwrap(), ApprovalState::Rejected);
        assert!(u1
            .has_rejected(&en, &ApprovalKey::new("acme", "u2"))
            .unwrap());
    }
}

#[test]
fn test_group_member_rejection_overrides_earlier_approval() {
    init_logging();
    let a = shared_statement();
    let owner = DocumentController::open(a.clone(), session("alice")).unwrap();
    let en = Entity::language("en");

    let mut acl = owner.doc_acl_map();
    acl.grant(Permission::Approve, "group:legal");
    owner.patch_doc_acl_map(&acl);
    assert!(owner.request_group_approval(&en, "legal", false).unwrap());
    owner.commit();

    let b = peer_of(&a, 2);
    let c = peer_of(&a, 3);
    let dan = DocumentController::open(b.clone(), Session::new("dan", "acme").with_group("legal"))
        .unwrap();
    let eve = DocumentController::open(c.clone(), Session::new("eve", "acme").with_group("legal"))
        .unwrap();

    assert!(dan.approve(&en).unwrap());
    dan.commit();
    sync(&a, &b);
    assert_eq!(owner.approval_state(&en).unwrap(), ApprovalState::Approved);

    assert!(eve.reject(&en).unwrap());
    eve.commit();
    sync(&a, &c);
    sync(&a, &b);
    for ctl in [&owner, &dan, &eve] {
        assert_eq!(ctl.approval_state(&en).unwrap(), ApprovalState::Rejected);
    }
    let records = owner.approval_records(&en).unwrap();
    assert!(records.users.is_empty());
    assert_eq!(records.groups["group:legal"].members.len(), 2);
}

#[test]
fn test_revert_clears_every_record_on_all_peers() {
    init_logging();
    let a = shared_statement();
    let b = peer_of(&a, 2);
    let owner = DocumentController::open(a.clone(), session("alice")).unwrap();
    let u2 = DocumentController::open(b.clone(), session("u2")).unwrap();
    let en = Entity::language("en");

    u2.approve(&en).unwrap();
    u2.commit();
    sync(&a, &b);
    assert!(!DocumentController::open(a.clone(), session("editor"))
        .unwrap()
        .can_edit(&en)
        .unwrap());

    assert!(!u2.revert_to_draft(&en).unwrap());
    assert!(owner.revert_to_draft(&en).unwrap());
    owner.commit();
    assert!(!owner.revert_to_draft(&en).unwrap());
    sync(&a, &b);

    assert_eq!(u2.approval_state(&en).unwrap(), ApprovalState::Draft);
    assert!(u2.approval_records(&en).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

#[test]
fn test_remove_language_cascades_acl_and_approvals() {
    init_logging();
    let a = shared_statement();
    let owner = DocumentController::open(a.clone(), session("alice")).unwrap();
    let fr = owner.add_language("fr").unwrap().unwrap();

    assert!(owner.approve(&Entity::language("fr")).unwrap());
    let mut acl = AclMap::new();
    acl.grant(Permission::Edit, "translator");
    assert!(owner.patch_element_acl_map("fr", &acl).unwrap());
    owner.commit();

    let (acls, approvals) = {
        let doc = a.read();
        (
            schema::child(&doc, &fr, schema::ACLS).unwrap(),
            schema::child(&doc, &fr, schema::APPROVALS).unwrap(),
        )
    };
    let b = peer_of(&a, 2);

    assert!(owner.remove_language("fr").unwrap());
    owner.commit();
    sync(&a, &b);

    for replica in [&a, &b] {
        let doc = replica.read();
        assert!(!doc.contains(&fr));
        assert!(!doc.contains(&acls));
        assert!(!doc.contains(&approvals));
        assert!(doc.is_empty(&acls));
        assert!(doc.is_empty(&approvals));
        assert!(schema::validate(&doc).is_empty());
    }
    assert_eq!(owner.languages().unwrap(), vec!["en"]);
    assert_eq!(owner.element_acl_map("fr").unwrap(), None);
}

#[test]
fn test_approval_on_concurrently_removed_element_is_neutral() {
    init_logging();
    let a = shared_statement();
    let b = peer_of(&a, 2);
    let owner = DocumentController::open(a.clone(), session("alice")).unwrap();
    let u2 = DocumentController::open(b.clone(), session("u2")).unwrap();
    let en = Entity::language("en");

    owner.remove_language("en").unwrap();
    owner.commit();
    u2.approve(&en).unwrap();
    u2.commit();
    sync(&a, &b);

    assert_eq!(u2.approval_state(&en).unwrap(), ApprovalState::Draft);
    assert!(!u2.approve(&en).unwrap());
    assert!(!u2.can_edit(&en).unwrap());
    assert!(u2.validate().is_empty());
}

#[test]
fn test_blocks_replicate_in_order() {
    init_logging();
    let a = Replica::new(PeerId(1));
    let owner =
        DocumentController::create(a.clone(), DocumentKind::Sheet, session("alice")).unwrap();
    let first = owner.add_block(BlockKind::Text, 0).unwrap().unwrap();
    let second = owner.add_block(BlockKind::StatementGrid, 1).unwrap().unwrap();
    owner.commit();

    let b = peer_of(&a, 2);
    let remote = DocumentController::open(b.clone(), session("alice")).unwrap();
    assert_eq!(remote.kind(), DocumentKind::Sheet);
    assert!(remote
        .shift_block(&second, coauthor::ShiftDirection::Up)
        .unwrap());
    remote.commit();
    sync(&a, &b);

    let ids: Vec<_> = owner.blocks().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![second, first]);
}

// ---------------------------------------------------------------------------
// ACLs
// ---------------------------------------------------------------------------

#[test]
fn test_doc_acl_round_trip_across_peers() {
    init_logging();
    let a = shared_statement();
    let owner = DocumentController::open(a.clone(), session("alice")).unwrap();

    let mut acl = AclMap::with_owner("alice");
    acl.grant(Permission::View, "group:readers")
        .grant(Permission::Approve, "u3");
    acl.set(Permission::Edit, Vec::new());
    assert!(owner.patch_doc_acl_map(&acl));
    owner.commit();
    assert_eq!(owner.doc_acl_map(), acl);

    let b = peer_of(&a, 2);
    let remote = DocumentController::open(b, session("bob")).unwrap();
    assert_eq!(remote.doc_acl_map(), acl);
    assert!(!remote.patch_doc_acl_map(&AclMap::with_owner("bob")));
}

#[test]
fn test_concurrent_acl_patches_resolve_as_whole_maps() {
    init_logging();
    let a = shared_statement();
    let b = peer_of(&a, 2);
    let on_a = DocumentController::open(a.clone(), session("alice")).unwrap();
    let on_b = DocumentController::open(b.clone(), session("alice")).unwrap();

    let mut first = AclMap::with_owner("alice");
    first.grant(Permission::Edit, "x").grant(Permission::View, "x");
    let mut second = AclMap::with_owner("alice");
    second.grant(Permission::Approve, "y");

    on_a.patch_doc_acl_map(&first);
    on_b.patch_doc_acl_map(&second);
    on_a.commit();
    on_b.commit();
    sync(&a, &b);

    let merged = on_a.doc_acl_map();
    assert_eq!(merged, on_b.doc_acl_map());
    assert!(merged == first || merged == second, "mixed map {:?}", merged);
}

#[test]
fn test_manage_implies_every_other_permission() {
    let a = shared_statement();
    let owner = DocumentController::open(a.clone(), session("alice")).unwrap();
    let element = owner.element_id("en").unwrap().unwrap();
    let mut own = AclMap::new();
    own.grant(Permission::Manage, "group:leads");
    owner.patch_element_acl_map("en", &own);
    owner.commit();

    let principal_sets: Vec<PrincipalSet> = vec![
        session("alice").principals(),
        session("u1").principals(),
        session("editor").principals(),
        Session::new("lead", "acme").with_group("leads").principals(),
        PrincipalSet::new(),
    ];
    let scopes = [Scope::Document, Scope::Element(element)];

    let doc = a.read();
    let resolver = PermissionResolver::new(&doc);
    for principals in &principal_sets {
        for scope in &scopes {
            if resolver.has_permission(scope, Permission::Manage, principals) {
                for permission in Permission::ALL {
                    assert!(resolver.has_permission(scope, permission, principals));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications and persistence
// ---------------------------------------------------------------------------

#[test]
fn test_remote_approval_notifies_subscribers() {
    init_logging();
    let a = shared_statement();
    let b = peer_of(&a, 2);
    let watcher = DocumentController::open(b.clone(), session("u2")).unwrap();
    let element = watcher.element_id("en").unwrap().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let _sub = watcher.subscribe_to_element_approval_changes(&element, move || {
        h.fetch_add(1, Ordering::SeqCst);
    });

    let u1 = DocumentController::open(a.clone(), session("u1")).unwrap();
    u1.approve(&Entity::language("en")).unwrap();
    u1.commit();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    sync(&a, &b);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    // Re-importing the same operations changes nothing
    sync(&a, &b);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_snapshot_reopens_with_state() {
    init_logging();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("doc.json");

    let a = shared_statement();
    let u1 = DocumentController::open(a.clone(), session("u1")).unwrap();
    u1.approve(&Entity::language("en")).unwrap();
    u1.commit();
    a.save_snapshot(&path).unwrap();

    let reloaded = Replica::load_snapshot(&path, PeerId(1)).unwrap();
    let owner = DocumentController::open(reloaded.clone(), session("alice")).unwrap();
    assert!(owner.is_owner());
    assert_eq!(
        owner.approval_state(&Entity::language("en")).unwrap(),
        ApprovalState::Approved
    );

    // New containers from the reloaded peer must not collide with old ones
    let de = owner.add_language("de").unwrap().unwrap();
    owner.commit();
    assert!(!a.read().contains(&de));
    assert!(owner.validate().is_empty());
}
