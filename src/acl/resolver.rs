//! Permission resolution over the current replica state
//!
//! Pure reads: nothing here mutates the document. An unresolvable scope
//! (an entity removed by a concurrent peer, or a container id that was never
//! an entity of the requested kind) denies every permission.

use std::collections::BTreeSet;

use super::map::AclMap;
use super::permission::{Permission, Scope};
use crate::convergent::{ConvergentDocument, Value};
use crate::principal::{is_group_token, PrincipalSet};
use crate::schema;

pub struct PermissionResolver<'a> {
    doc: &'a ConvergentDocument,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(doc: &'a ConvergentDocument) -> Self {
        Self { doc }
    }

    /// Does the scope name a live entity of the right kind?
    pub fn resolves(&self, scope: &Scope) -> bool {
        let (id, marker) = match scope {
            Scope::Document => return true,
            Scope::Block(id) => (id, schema::BLOCK_TYPE),
            Scope::Element(id) => (id, schema::LANGUAGE),
        };
        self.doc.contains(id) && self.doc.get(id, marker).is_some()
    }

    /// The scope's own ACL map, without inheritance.
    pub fn explicit_acl(&self, scope: &Scope) -> Option<AclMap> {
        if !self.resolves(scope) {
            return None;
        }
        match scope.container() {
            None => AclMap::read(self.doc, &schema::doc_acl()),
            Some(entity) => {
                let acls = schema::child(self.doc, entity, schema::ACLS)?;
                AclMap::read(self.doc, &acls)
            }
        }
    }

    /// The map that governs the scope: its own, or the document's.
    pub fn effective_acl(&self, scope: &Scope) -> Option<AclMap> {
        if !self.resolves(scope) {
            return None;
        }
        self.explicit_acl(scope)
            .or_else(|| self.explicit_acl(&Scope::Document))
            .or_else(|| Some(AclMap::new()))
    }

    pub fn has_permission(
        &self,
        scope: &Scope,
        permission: Permission,
        principals: &PrincipalSet,
    ) -> bool {
        match self.effective_acl(scope) {
            Some(acl) => acl.allows(permission, principals),
            None => {
                log::debug!("permission check on unresolved scope {:?}", scope);
                false
            }
        }
    }

    pub fn owner(&self) -> Option<String> {
        self.doc
            .get(&schema::meta(), schema::OWNER)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn is_owner(&self, user: &str) -> bool {
        self.owner().map_or(false, |owner| owner == user)
    }

    /// Individual principals listed under `Approve` for the scope.
    pub fn approvers(&self, scope: &Scope) -> BTreeSet<String> {
        self.effective_acl(scope)
            .map(|acl| {
                acl.principals(Permission::Approve)
                    .iter()
                    .filter(|p| !is_group_token(p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
