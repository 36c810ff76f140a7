//! Document controller
//!
//! The single mutation surface over one replica. Every entity is addressed by
//! its container id and re-resolved on each call, so an entity removed by a
//! concurrent peer reads as "gone" (`None`, `false`, `Draft`) rather than
//! failing. Permission denials are `false`/`None` as well; only wiring
//! mistakes such as a statement operation on a sheet surface as errors.
//!
//! Mutations stay pending until `commit()`: pair each logical action with
//! exactly one commit.

mod bus;
mod content;

pub use bus::{Change, ChangeFilter, ChangeKind};
pub use content::{BlockKind, BlockSummary, DocumentKind, Entity, ShiftDirection};

use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::acl::{AclMap, Permission, PermissionResolver, Scope};
use crate::approval::{workflow, ApprovalRecords, ApprovalState};
use crate::convergent::{
    ContainerId, ContainerKind, ConvergentDocument, EventOrigin, Replica, Transaction, Value,
};
use crate::principal::{ApprovalKey, PrincipalSet, Session};
use crate::schema::{self, ValidationIssue};
use crate::subscription::Subscription;
use bus::{ChangeBus, EntityIndex};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Operation needs a {expected} document but this is a {actual}")]
    WrongDocumentKind {
        expected: DocumentKind,
        actual: DocumentKind,
    },

    #[error("Replica holds no document")]
    Uninitialized,

    #[error("Replica already holds a {0} document")]
    AlreadyInitialized(DocumentKind),
}

pub struct DocumentController {
    replica: Replica,
    session: Session,
    kind: DocumentKind,
    bus: Arc<ChangeBus>,
    _replica_events: Subscription,
}

fn stored_kind(doc: &ConvergentDocument) -> Option<DocumentKind> {
    let raw = doc.get(&schema::meta(), schema::KIND)?.as_str()?;
    let kind = DocumentKind::parse(raw);
    if kind.is_none() {
        log::warn!("unknown document kind {:?}", raw);
    }
    kind
}

fn element_of(doc: &ConvergentDocument, code: &str) -> Option<ContainerId> {
    doc.get(&schema::languages(), code)
        .and_then(Value::as_container)
        .filter(|id| doc.contains(id))
        .cloned()
}

/// Create an entity map with its content, ACL and approval containers.
fn create_entity(
    doc: &mut ConvergentDocument,
    marker: &str,
    marker_value: &str,
    content: ContainerKind,
) -> ContainerId {
    let entity = doc.create_container(ContainerKind::Map);
    let body = doc.create_container(content);
    let acls = doc.create_container(ContainerKind::Map);
    let approvals = doc.create_container(ContainerKind::Map);
    doc.put(&entity, marker, Value::string(marker_value));
    doc.put(&entity, schema::CONTENT, Value::Container(body));
    doc.put(&entity, schema::ACLS, Value::Container(acls));
    doc.put(&entity, schema::APPROVALS, Value::Container(approvals));
    entity
}

/// Clear and delete an entity together with every container hanging off it.
fn remove_entity(doc: &mut ConvergentDocument, entity: &ContainerId) {
    for field in [schema::ACLS, schema::APPROVALS] {
        if let Some(child) = schema::child(doc, entity, field) {
            doc.clear(&child);
            doc.delete_container(&child);
        }
    }
    if let Some(body) = schema::child(doc, entity, schema::CONTENT) {
        doc.delete_container(&body);
    }
    doc.delete_container(entity);
}

impl DocumentController {
    /// Initialize a fresh replica as a document owned by the session user.
    /// The caller commits.
    pub fn create(
        replica: Replica,
        kind: DocumentKind,
        session: Session,
    ) -> Result<Self, ControllerError> {
        {
            let mut doc = replica.write();
            if let Some(existing) = stored_kind(&doc) {
                return Err(ControllerError::AlreadyInitialized(existing));
            }
            doc.put(&schema::meta(), schema::KIND, Value::string(kind.as_str()));
            doc.put(&schema::meta(), schema::OWNER, Value::string(session.user.as_str()));
            AclMap::with_owner(&session.user).write(&mut doc, &schema::doc_acl());
        }
        log::info!("{} created a {} document", session.user, kind);
        Ok(Self::attach(replica, session, kind))
    }

    /// Attach to a replica that already holds a document.
    pub fn open(replica: Replica, session: Session) -> Result<Self, ControllerError> {
        let kind = stored_kind(&replica.read()).ok_or(ControllerError::Uninitialized)?;
        Ok(Self::attach(replica, session, kind))
    }

    fn attach(replica: Replica, session: Session, kind: DocumentKind) -> Self {
        let bus = Arc::new(ChangeBus::new());
        let weak = replica.downgrade();
        let relay = bus.clone();
        let known = Mutex::new(EntityIndex::build(&replica.read()));
        let replica_events = replica.subscribe(move |event| {
            let Some(replica) = weak.upgrade() else {
                return;
            };
            let changes = {
                let doc = replica.read();
                let mut known = known.lock().unwrap_or_else(PoisonError::into_inner);
                bus::classify(&doc, &mut known, event)
            };
            relay.publish(&changes, event.origin);
        });
        Self {
            replica,
            session,
            kind,
            bus,
            _replica_events: replica_events,
        }
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Seal everything mutated since the last commit into one transaction.
    pub fn commit(&self) -> Option<Transaction> {
        self.replica.commit()
    }

    pub fn validate(&self) -> Vec<ValidationIssue> {
        schema::validate(&self.replica.read())
    }

    fn principals(&self) -> PrincipalSet {
        self.session.principals()
    }

    fn expect_kind(&self, expected: DocumentKind) -> Result<(), ControllerError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ControllerError::WrongDocumentKind {
                expected,
                actual: self.kind,
            })
        }
    }

    fn scope_of(&self, entity: &Entity) -> Result<Option<Scope>, ControllerError> {
        match entity {
            Entity::Language(code) => Ok(self.element_id(code)?.map(Scope::Element)),
            Entity::Block(id) => {
                self.expect_kind(DocumentKind::Sheet)?;
                Ok(Some(Scope::Block(id.clone())))
            }
        }
    }

    fn allowed(&self, doc: &ConvergentDocument, scope: &Scope, permission: Permission) -> bool {
        let granted =
            PermissionResolver::new(doc).has_permission(scope, permission, &self.principals());
        if !granted {
            log::debug!("{} lacks {} on {:?}", self.session.user, permission, scope);
        }
        granted
    }

    // ------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------

    pub fn owner(&self) -> Option<String> {
        PermissionResolver::new(&self.replica.read()).owner()
    }

    pub fn is_owner(&self) -> bool {
        PermissionResolver::new(&self.replica.read()).is_owner(&self.session.user)
    }

    pub fn has_permission(&self, scope: &Scope, permission: Permission) -> bool {
        PermissionResolver::new(&self.replica.read()).has_permission(
            scope,
            permission,
            &self.principals(),
        )
    }

    pub fn has_doc_permission(&self, permission: Permission) -> bool {
        self.has_permission(&Scope::Document, permission)
    }

    pub fn has_entity_permission(
        &self,
        entity: &Entity,
        permission: Permission,
    ) -> Result<bool, ControllerError> {
        Ok(self
            .scope_of(entity)?
            .map_or(false, |scope| self.has_permission(&scope, permission)))
    }

    pub fn has_block_permission(
        &self,
        block: &ContainerId,
        permission: Permission,
    ) -> Result<bool, ControllerError> {
        self.has_entity_permission(&Entity::Block(block.clone()), permission)
    }

    pub fn has_element_permission(
        &self,
        code: &str,
        permission: Permission,
    ) -> Result<bool, ControllerError> {
        self.has_entity_permission(&Entity::language(code), permission)
    }

    // ------------------------------------------------------------------
    // Structure: statement languages
    // ------------------------------------------------------------------

    /// Language codes present in the statement, sorted.
    pub fn languages(&self) -> Result<Vec<String>, ControllerError> {
        self.expect_kind(DocumentKind::Statement)?;
        let doc = self.replica.read();
        Ok(doc
            .entries(&schema::languages())
            .filter(|(_, v)| v.as_container().map_or(false, |id| doc.contains(id)))
            .map(|(code, _)| code.to_string())
            .collect())
    }

    pub fn element_id(&self, code: &str) -> Result<Option<ContainerId>, ControllerError> {
        self.expect_kind(DocumentKind::Statement)?;
        Ok(element_of(&self.replica.read(), code))
    }

    /// Returns the new element, or `None` if denied or already present.
    pub fn add_language(&self, code: &str) -> Result<Option<ContainerId>, ControllerError> {
        self.expect_kind(DocumentKind::Statement)?;
        let mut doc = self.replica.write();
        if !self.allowed(&doc, &Scope::Document, Permission::AddRemove) {
            return Ok(None);
        }
        if element_of(&doc, code).is_some() {
            return Ok(None);
        }
        let element = create_entity(&mut doc, schema::LANGUAGE, code, ContainerKind::Text);
        doc.put(&schema::languages(), code, Value::Container(element.clone()));
        Ok(Some(element))
    }

    /// Remove a language and everything attached to its element.
    pub fn remove_language(&self, code: &str) -> Result<bool, ControllerError> {
        self.expect_kind(DocumentKind::Statement)?;
        let mut doc = self.replica.write();
        if !self.allowed(&doc, &Scope::Document, Permission::AddRemove) {
            return Ok(false);
        }
        let Some(element) = element_of(&doc, code) else {
            return Ok(false);
        };
        remove_entity(&mut doc, &element);
        doc.remove_key(&schema::languages(), code);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Structure: sheet blocks
    // ------------------------------------------------------------------

    pub fn blocks(&self) -> Result<Vec<BlockSummary>, ControllerError> {
        self.expect_kind(DocumentKind::Sheet)?;
        let doc = self.replica.read();
        let summaries = doc
            .list_entries(&schema::blocks())
            .into_iter()
            .filter_map(|entry| entry.value.as_container().cloned())
            .filter(|id| doc.contains(id))
            .filter_map(|id| {
                let kind = doc
                    .get(&id, schema::BLOCK_TYPE)
                    .and_then(Value::as_str)
                    .and_then(BlockKind::parse)?;
                Some((id, kind))
            })
            .enumerate()
            .map(|(position, (id, kind))| BlockSummary { id, kind, position })
            .collect();
        Ok(summaries)
    }

    /// Insert a block at `position` (clamped to the end of the list).
    pub fn add_block(
        &self,
        kind: BlockKind,
        position: usize,
    ) -> Result<Option<ContainerId>, ControllerError> {
        self.expect_kind(DocumentKind::Sheet)?;
        let mut doc = self.replica.write();
        if !self.allowed(&doc, &Scope::Document, Permission::AddRemove) {
            return Ok(None);
        }
        let len = doc.list_entries(&schema::blocks()).len();
        let block = create_entity(
            &mut doc,
            schema::BLOCK_TYPE,
            kind.as_str(),
            kind.content_container(),
        );
        doc.list_insert(
            &schema::blocks(),
            position.min(len),
            Value::Container(block.clone()),
        );
        Ok(Some(block))
    }

    pub fn remove_block(&self, block: &ContainerId) -> Result<bool, ControllerError> {
        self.expect_kind(DocumentKind::Sheet)?;
        let mut doc = self.replica.write();
        if !self.allowed(&doc, &Scope::Document, Permission::AddRemove) {
            return Ok(false);
        }
        let entry = doc
            .list_entries(&schema::blocks())
            .into_iter()
            .find(|e| e.value.as_container() == Some(block));
        let Some(entry) = entry else {
            return Ok(false);
        };
        doc.list_remove(&schema::blocks(), &entry.key);
        remove_entity(&mut doc, block);
        Ok(true)
    }

    /// Swap a block with its neighbour. `false` at either end of the list.
    pub fn shift_block(
        &self,
        block: &ContainerId,
        direction: ShiftDirection,
    ) -> Result<bool, ControllerError> {
        self.expect_kind(DocumentKind::Sheet)?;
        let mut doc = self.replica.write();
        if !self.allowed(&doc, &Scope::Document, Permission::AddRemove) {
            return Ok(false);
        }
        let entries = doc.list_entries(&schema::blocks());
        let Some(index) = entries
            .iter()
            .position(|e| e.value.as_container() == Some(block))
        else {
            return Ok(false);
        };
        let neighbour = match direction {
            ShiftDirection::Up => index.checked_sub(1),
            ShiftDirection::Down => Some(index + 1).filter(|n| *n < entries.len()),
        };
        let Some(neighbour) = neighbour else {
            return Ok(false);
        };
        doc.list_swap(&schema::blocks(), &entries[index], &entries[neighbour]);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // ACL maps
    // ------------------------------------------------------------------

    pub fn doc_acl_map(&self) -> AclMap {
        PermissionResolver::new(&self.replica.read())
            .explicit_acl(&Scope::Document)
            .unwrap_or_default()
    }

    /// The entity's own map; `None` when it inherits the document map or
    /// is gone.
    pub fn acl_map(&self, entity: &Entity) -> Result<Option<AclMap>, ControllerError> {
        let Some(scope) = self.scope_of(entity)? else {
            return Ok(None);
        };
        Ok(PermissionResolver::new(&self.replica.read()).explicit_acl(&scope))
    }

    /// The map that actually governs the entity.
    pub fn effective_acl_map(&self, entity: &Entity) -> Result<Option<AclMap>, ControllerError> {
        let Some(scope) = self.scope_of(entity)? else {
            return Ok(None);
        };
        Ok(PermissionResolver::new(&self.replica.read()).effective_acl(&scope))
    }

    pub fn block_acl_map(&self, block: &ContainerId) -> Result<Option<AclMap>, ControllerError> {
        self.acl_map(&Entity::Block(block.clone()))
    }

    pub fn element_acl_map(&self, code: &str) -> Result<Option<AclMap>, ControllerError> {
        self.acl_map(&Entity::language(code))
    }

    /// Replace the document ACL wholesale. Manage only.
    pub fn patch_doc_acl_map(&self, acl: &AclMap) -> bool {
        let mut doc = self.replica.write();
        if !self.allowed(&doc, &Scope::Document, Permission::Manage) {
            return false;
        }
        acl.write(&mut doc, &schema::doc_acl());
        true
    }

    /// Replace (`Some`) or drop (`None`) an entity's own ACL map. Allowed
    /// with Manage on the document or on the entity itself.
    fn write_entity_acl(
        &self,
        entity: &Entity,
        acl: Option<&AclMap>,
    ) -> Result<bool, ControllerError> {
        let Some(scope) = self.scope_of(entity)? else {
            return Ok(false);
        };
        let mut doc = self.replica.write();
        let permitted = PermissionResolver::new(&doc)
            .has_permission(&Scope::Document, Permission::Manage, &self.principals())
            || self.allowed(&doc, &scope, Permission::Manage);
        if !permitted {
            return Ok(false);
        }
        let Some(acls) = scope
            .container()
            .and_then(|id| schema::child(&doc, id, schema::ACLS))
        else {
            return Ok(false);
        };
        match acl {
            Some(acl) => {
                acl.write(&mut doc, &acls);
                Ok(true)
            }
            None => Ok(doc.clear(&acls) > 0),
        }
    }

    pub fn patch_block_acl_map(
        &self,
        block: &ContainerId,
        acl: &AclMap,
    ) -> Result<bool, ControllerError> {
        self.write_entity_acl(&Entity::Block(block.clone()), Some(acl))
    }

    pub fn patch_element_acl_map(&self, code: &str, acl: &AclMap) -> Result<bool, ControllerError> {
        self.write_entity_acl(&Entity::language(code), Some(acl))
    }

    /// Drop the block's own map so it inherits the document ACL again.
    pub fn clear_block_acl_map(&self, block: &ContainerId) -> Result<bool, ControllerError> {
        self.write_entity_acl(&Entity::Block(block.clone()), None)
    }

    pub fn clear_element_acl_map(&self, code: &str) -> Result<bool, ControllerError> {
        self.write_entity_acl(&Entity::language(code), None)
    }

    // ------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------

    pub fn approval_state(&self, entity: &Entity) -> Result<ApprovalState, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => workflow::state(&self.replica.read(), &scope),
            None => ApprovalState::Draft,
        })
    }

    pub fn approval_records(&self, entity: &Entity) -> Result<ApprovalRecords, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => workflow::records(&self.replica.read(), &scope),
            None => ApprovalRecords::default(),
        })
    }

    pub fn approve(&self, entity: &Entity) -> Result<bool, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => workflow::approve(&mut self.replica.write(), &scope, &self.session),
            None => false,
        })
    }

    pub fn reject(&self, entity: &Entity) -> Result<bool, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => workflow::reject(&mut self.replica.write(), &scope, &self.session),
            None => false,
        })
    }

    pub fn revert_to_draft(&self, entity: &Entity) -> Result<bool, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => {
                workflow::revert_to_draft(&mut self.replica.write(), &scope, &self.session)
            }
            None => false,
        })
    }

    pub fn request_group_approval(
        &self,
        entity: &Entity,
        group: &str,
        require_all: bool,
    ) -> Result<bool, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => workflow::request_group_approval(
                &mut self.replica.write(),
                &scope,
                &self.session,
                group,
                require_all,
            ),
            None => false,
        })
    }

    pub fn has_rejected(
        &self,
        entity: &Entity,
        approval_key: &ApprovalKey,
    ) -> Result<bool, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => {
                workflow::has_rejected(&self.replica.read(), &scope, &approval_key.to_string())
            }
            None => false,
        })
    }

    /// May the session edit the entity's content right now?
    pub fn can_edit(&self, entity: &Entity) -> Result<bool, ControllerError> {
        Ok(match self.scope_of(entity)? {
            Some(scope) => workflow::can_edit(&self.replica.read(), &scope, &self.principals()),
            None => false,
        })
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    fn content_of(
        &self,
        doc: &ConvergentDocument,
        scope: &Scope,
        kind: ContainerKind,
    ) -> Option<ContainerId> {
        let body = schema::child(doc, scope.container()?, schema::CONTENT)?;
        (body.kind() == kind).then_some(body)
    }

    /// Replace the text of a statement element or text block.
    pub fn set_text(&self, entity: &Entity, text: &str) -> Result<bool, ControllerError> {
        let Some(scope) = self.scope_of(entity)? else {
            return Ok(false);
        };
        let mut doc = self.replica.write();
        if !workflow::can_edit(&doc, &scope, &self.principals()) {
            log::debug!("{} may not edit {:?}", self.session.user, scope);
            return Ok(false);
        }
        let Some(body) = self.content_of(&doc, &scope, ContainerKind::Text) else {
            return Ok(false);
        };
        doc.set_text(&body, text);
        Ok(true)
    }

    pub fn text(&self, entity: &Entity) -> Result<Option<String>, ControllerError> {
        let Some(scope) = self.scope_of(entity)? else {
            return Ok(None);
        };
        let doc = self.replica.read();
        Ok(self
            .content_of(&doc, &scope, ContainerKind::Text)
            .map(|body| doc.text(&body)))
    }

    /// Write one field of a properties or grid block.
    pub fn set_block_field(
        &self,
        block: &ContainerId,
        key: &str,
        value: Value,
    ) -> Result<bool, ControllerError> {
        self.expect_kind(DocumentKind::Sheet)?;
        let scope = Scope::Block(block.clone());
        let mut doc = self.replica.write();
        if !workflow::can_edit(&doc, &scope, &self.principals()) {
            log::debug!("{} may not edit {:?}", self.session.user, scope);
            return Ok(false);
        }
        let Some(body) = self.content_of(&doc, &scope, ContainerKind::Map) else {
            return Ok(false);
        };
        doc.put(&body, key, value);
        Ok(true)
    }

    pub fn block_field(
        &self,
        block: &ContainerId,
        key: &str,
    ) -> Result<Option<Value>, ControllerError> {
        self.expect_kind(DocumentKind::Sheet)?;
        let scope = Scope::Block(block.clone());
        let doc = self.replica.read();
        Ok(self
            .content_of(&doc, &scope, ContainerKind::Map)
            .and_then(|body| doc.get(&body, key).cloned()))
    }

    // ------------------------------------------------------------------
    // Change notifications
    // ------------------------------------------------------------------

    /// Register for changes matching `filter`, local commits and imports
    /// alike. The callback runs after the replica lock is released and may
    /// read through this controller.
    pub fn subscribe(
        &self,
        filter: ChangeFilter,
        callback: impl Fn(&Change, EventOrigin) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(filter, callback)
    }

    fn on(
        &self,
        scope: Scope,
        kind: ChangeKind,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(ChangeFilter::scope(&scope).kind(kind), move |_, _| callback())
    }

    pub fn subscribe_to_doc_acl_changes(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.on(Scope::Document, ChangeKind::Acl, callback)
    }

    pub fn subscribe_to_block_acl_changes(
        &self,
        block: &ContainerId,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.on(Scope::Block(block.clone()), ChangeKind::Acl, callback)
    }

    pub fn subscribe_to_element_acl_changes(
        &self,
        element: &ContainerId,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.on(Scope::Element(element.clone()), ChangeKind::Acl, callback)
    }

    pub fn subscribe_to_block_approval_changes(
        &self,
        block: &ContainerId,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.on(Scope::Block(block.clone()), ChangeKind::Approval, callback)
    }

    pub fn subscribe_to_element_approval_changes(
        &self,
        element: &ContainerId,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.on(Scope::Element(element.clone()), ChangeKind::Approval, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergent::PeerId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn alice() -> Session {
        Session::new("alice", "acme")
    }

    fn statement() -> DocumentController {
        let replica = Replica::new(PeerId(1));
        let ctl = DocumentController::create(replica, DocumentKind::Statement, alice()).unwrap();
        ctl.commit();
        ctl
    }

    fn sheet() -> DocumentController {
        let replica = Replica::new(PeerId(1));
        let ctl = DocumentController::create(replica, DocumentKind::Sheet, alice()).unwrap();
        ctl.commit();
        ctl
    }

    fn as_user(ctl: &DocumentController, user: &str) -> DocumentController {
        DocumentController::open(ctl.replica().clone(), Session::new(user, "acme")).unwrap()
    }

    #[test]
    fn test_create_and_open() {
        let ctl = statement();
        assert!(ctl.is_owner());
        assert_eq!(ctl.owner().as_deref(), Some("alice"));
        assert!(ctl.has_doc_permission(Permission::Edit));

        let again = DocumentController::create(
            ctl.replica().clone(),
            DocumentKind::Sheet,
            alice(),
        );
        assert_eq!(
            again.err(),
            Some(ControllerError::AlreadyInitialized(DocumentKind::Statement))
        );

        let empty = Replica::new(PeerId(2));
        assert_eq!(
            DocumentController::open(empty, alice()).err(),
            Some(ControllerError::Uninitialized)
        );
    }

    #[test]
    fn test_wrong_document_kind_is_an_error() {
        let ctl = sheet();
        assert_eq!(
            ctl.add_language("fr"),
            Err(ControllerError::WrongDocumentKind {
                expected: DocumentKind::Statement,
                actual: DocumentKind::Sheet,
            })
        );
        assert!(statement().add_block(BlockKind::Text, 0).is_err());
    }

    #[test]
    fn test_languages_add_and_remove() {
        let ctl = statement();
        let fr = ctl.add_language("fr").unwrap().unwrap();
        assert_eq!(ctl.add_language("fr").unwrap(), None);
        ctl.add_language("en").unwrap();
        ctl.commit();

        assert_eq!(ctl.languages().unwrap(), vec!["en", "fr"]);
        assert_eq!(ctl.element_id("fr").unwrap(), Some(fr.clone()));

        assert!(ctl.remove_language("fr").unwrap());
        assert!(!ctl.remove_language("fr").unwrap());
        ctl.commit();
        assert_eq!(ctl.languages().unwrap(), vec!["en"]);
        assert!(!ctl.replica().read().contains(&fr));
        assert!(ctl.validate().is_empty());
    }

    #[test]
    fn test_structure_needs_add_remove() {
        let ctl = statement();
        let bob = as_user(&ctl, "bob");
        assert_eq!(bob.add_language("de").unwrap(), None);

        let mut acl = ctl.doc_acl_map();
        acl.grant(Permission::AddRemove, "bob");
        assert!(ctl.patch_doc_acl_map(&acl));
        ctl.commit();
        assert!(bob.add_language("de").unwrap().is_some());
    }

    #[test]
    fn test_block_order_and_shift() {
        let ctl = sheet();
        let a = ctl.add_block(BlockKind::Text, 0).unwrap().unwrap();
        let b = ctl.add_block(BlockKind::Properties, 1).unwrap().unwrap();
        let c = ctl.add_block(BlockKind::BarcodeGrid, 0).unwrap().unwrap();
        ctl.commit();

        let order = |ctl: &DocumentController| -> Vec<ContainerId> {
            ctl.blocks().unwrap().into_iter().map(|s| s.id).collect()
        };
        assert_eq!(order(&ctl), vec![c.clone(), a.clone(), b.clone()]);

        assert!(!ctl.shift_block(&c, ShiftDirection::Up).unwrap());
        assert!(!ctl.shift_block(&b, ShiftDirection::Down).unwrap());
        assert!(ctl.shift_block(&b, ShiftDirection::Up).unwrap());
        ctl.commit();
        assert_eq!(order(&ctl), vec![c.clone(), b.clone(), a.clone()]);

        assert!(ctl.remove_block(&b).unwrap());
        ctl.commit();
        assert_eq!(order(&ctl), vec![c, a]);
        assert_eq!(ctl.blocks().unwrap()[1].kind, BlockKind::Text);
    }

    #[test]
    fn test_block_acl_patch_and_clear() {
        let ctl = sheet();
        let block = ctl.add_block(BlockKind::Text, 0).unwrap().unwrap();
        ctl.commit();
        assert_eq!(ctl.block_acl_map(&block).unwrap(), None);

        let mut acl = AclMap::new();
        acl.grant(Permission::Manage, "bob");
        assert!(ctl.patch_block_acl_map(&block, &acl).unwrap());
        ctl.commit();
        assert_eq!(ctl.block_acl_map(&block).unwrap(), Some(acl));

        // bob manages the block but not the document
        let bob = as_user(&ctl, "bob");
        assert!(bob.has_block_permission(&block, Permission::Edit).unwrap());
        assert!(!bob.has_doc_permission(Permission::Edit));
        assert!(bob.clear_block_acl_map(&block).unwrap());
        bob.commit();
        assert_eq!(ctl.block_acl_map(&block).unwrap(), None);
        assert!(!bob.has_block_permission(&block, Permission::Edit).unwrap());
    }

    #[test]
    fn test_empty_block_acl_patch_round_trips() {
        let ctl = sheet();
        let block = ctl.add_block(BlockKind::Text, 0).unwrap().unwrap();
        let mut acl = ctl.doc_acl_map();
        acl.grant(Permission::Edit, "bob");
        ctl.patch_doc_acl_map(&acl);
        ctl.commit();

        let bob = as_user(&ctl, "bob");
        assert!(bob.has_block_permission(&block, Permission::Edit).unwrap());

        assert!(ctl.patch_block_acl_map(&block, &AclMap::new()).unwrap());
        ctl.commit();
        assert_eq!(ctl.block_acl_map(&block).unwrap(), Some(AclMap::new()));
        assert!(!bob.has_block_permission(&block, Permission::Edit).unwrap());
        // Document managers keep control of the block's map
        assert!(ctl.has_doc_permission(Permission::Manage));

        assert!(ctl.clear_block_acl_map(&block).unwrap());
        ctl.commit();
        assert_eq!(ctl.block_acl_map(&block).unwrap(), None);
        assert!(bob.has_block_permission(&block, Permission::Edit).unwrap());
    }

    #[test]
    fn test_approved_text_is_locked_for_editors() {
        let ctl = statement();
        ctl.add_language("en").unwrap();
        let mut acl = ctl.doc_acl_map();
        acl.grant(Permission::Edit, "erin")
            .grant(Permission::Approve, "bob");
        ctl.patch_doc_acl_map(&acl);
        ctl.commit();

        let en = Entity::language("en");
        let erin = as_user(&ctl, "erin");
        assert!(erin.set_text(&en, "Hello").unwrap());
        erin.commit();
        assert_eq!(ctl.text(&en).unwrap().as_deref(), Some("Hello"));

        let bob = as_user(&ctl, "bob");
        assert!(bob.approve(&en).unwrap());
        bob.commit();
        assert_eq!(ctl.approval_state(&en).unwrap(), ApprovalState::Approved);
        assert!(!erin.set_text(&en, "Hi").unwrap());
        assert!(ctl.set_text(&en, "Hi").unwrap());

        assert!(ctl.revert_to_draft(&en).unwrap());
        ctl.commit();
        assert!(erin.can_edit(&en).unwrap());
    }

    #[test]
    fn test_gone_entities_read_as_neutral() {
        let ctl = statement();
        let en = Entity::language("en");
        assert_eq!(ctl.approval_state(&en).unwrap(), ApprovalState::Draft);
        assert!(!ctl.approve(&en).unwrap());
        assert_eq!(ctl.text(&en).unwrap(), None);
        assert_eq!(ctl.element_acl_map("en").unwrap(), None);
    }

    #[test]
    fn test_block_fields() {
        let ctl = sheet();
        let props = ctl.add_block(BlockKind::Properties, 0).unwrap().unwrap();
        let text = ctl.add_block(BlockKind::Text, 1).unwrap().unwrap();
        assert!(ctl
            .set_block_field(&props, "sku", Value::string("A-1"))
            .unwrap());
        assert!(!ctl.set_block_field(&text, "sku", Value::Null).unwrap());
        ctl.commit();
        assert_eq!(
            ctl.block_field(&props, "sku").unwrap(),
            Some(Value::string("A-1"))
        );
    }

    #[test]
    fn test_subscriptions_fire_on_commit_only() {
        let ctl = sheet();
        let block = ctl.add_block(BlockKind::Text, 0).unwrap().unwrap();
        ctl.commit();

        let acl_hits = Arc::new(AtomicUsize::new(0));
        let approval_hits = Arc::new(AtomicUsize::new(0));
        let a = acl_hits.clone();
        let _acl = ctl.subscribe_to_block_acl_changes(&block, move || {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let p = approval_hits.clone();
        let approvals = ctl.subscribe_to_block_approval_changes(&block, move || {
            p.fetch_add(1, Ordering::SeqCst);
        });

        // Inherited: a document ACL change reaches block listeners
        let mut acl = ctl.doc_acl_map();
        acl.grant(Permission::Approve, "alice");
        ctl.patch_doc_acl_map(&acl);
        assert_eq!(acl_hits.load(Ordering::SeqCst), 0);
        ctl.commit();
        assert_eq!(acl_hits.load(Ordering::SeqCst), 1);

        ctl.approve(&Entity::Block(block.clone())).unwrap();
        ctl.commit();
        assert_eq!(approval_hits.load(Ordering::SeqCst), 1);
        assert_eq!(acl_hits.load(Ordering::SeqCst), 1);

        approvals.unsubscribe();
        ctl.revert_to_draft(&Entity::Block(block)).unwrap();
        ctl.commit();
        assert_eq!(approval_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_language_notifies_local_and_remote_listeners() {
        let ctl = statement();
        let fr = ctl.add_language("fr").unwrap().unwrap();
        ctl.commit();

        let remote = Replica::new(PeerId(2));
        ctl.replica().sync_into(&remote);
        let remote_ctl = DocumentController::open(remote.clone(), alice()).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let mut subs = Vec::new();
        for watcher in [&ctl, &remote_ctl] {
            let h = hits.clone();
            subs.push(watcher.subscribe_to_element_acl_changes(&fr, move || {
                h.fetch_add(1, Ordering::SeqCst);
            }));
            let h = hits.clone();
            subs.push(watcher.subscribe_to_element_approval_changes(&fr, move || {
                h.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(ctl.remove_language("fr").unwrap());
        ctl.commit();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        ctl.replica().sync_into(&remote);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(
            remote_ctl.approval_state(&Entity::language("fr")).unwrap(),
            ApprovalState::Draft
        );
    }
}
