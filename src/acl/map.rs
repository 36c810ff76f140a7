//! ACL maps: permission -> principals, and their replica encoding
//!
//! In the replica an ACL map is a map container keyed by permission name,
//! each value a list of principal strings, plus an `explicit` marker written
//! with every map. A container with no live keys means "no map of its own":
//! the scope inherits the document ACL. A written empty map keeps the marker
//! and stays an empty map of its own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::permission::Permission;
use crate::convergent::{ContainerId, ConvergentDocument, Value};
use crate::principal::PrincipalSet;

/// Present on every written map, so an empty map is told apart from none
const EXPLICIT_KEY: &str = "explicit";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclMap {
    entries: BTreeMap<Permission, Vec<String>>,
}

impl AclMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The initial document ACL: the owner manages everything.
    pub fn with_owner(owner: &str) -> Self {
        let mut map = Self::new();
        map.grant(Permission::Manage, owner);
        map
    }

    /// Add a principal to a permission entry (no-op if already present).
    pub fn grant(&mut self, permission: Permission, principal: impl Into<String>) -> &mut Self {
        let principal = principal.into();
        let list = self.entries.entry(permission).or_default();
        if !list.contains(&principal) {
            list.push(principal);
        }
        self
    }

    pub fn revoke(&mut self, permission: Permission, principal: &str) -> bool {
        match self.entries.get_mut(&permission) {
            Some(list) => {
                let before = list.len();
                list.retain(|p| p != principal);
                before != list.len()
            }
            None => false,
        }
    }

    /// Replace one permission entry wholesale.
    pub fn set(&mut self, permission: Permission, principals: Vec<String>) {
        self.entries.insert(permission, principals);
    }

    pub fn principals(&self, permission: Permission) -> &[String] {
        self.entries
            .get(&permission)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn permissions(&self) -> impl Iterator<Item = (Permission, &[String])> {
        self.entries.iter().map(|(p, list)| (*p, list.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Does any principal in `set` hold `permission`, directly or via `Manage`?
    pub fn allows(&self, permission: Permission, set: &PrincipalSet) -> bool {
        permission
            .satisfied_by()
            .any(|granted| set.intersects(self.principals(granted)))
    }

    /// Read the map stored in `container`; `None` when it has no live keys.
    pub fn read(doc: &ConvergentDocument, container: &ContainerId) -> Option<AclMap> {
        let mut map = AclMap::new();
        for (key, value) in doc.entries(container) {
            if key == EXPLICIT_KEY {
                continue;
            }
            let Some(permission) = Permission::parse(key) else {
                log::warn!("ignoring unknown permission key {:?} in {}", key, container);
                continue;
            };
            if let Some(principals) = value.as_string_list() {
                map.set(permission, principals);
            }
        }
        if doc.is_empty(container) {
            None
        } else {
            Some(map)
        }
    }

    /// Overwrite `container` with this map. Every permission key is written
    /// (absent ones as tombstones) so the whole map wins or loses as a unit.
    pub fn write(&self, doc: &mut ConvergentDocument, container: &ContainerId) {
        for permission in Permission::ALL {
            let value = match self.entries.get(&permission) {
                Some(list) => Value::List(list.iter().cloned().map(Value::String).collect()),
                None => Value::Null,
            };
            doc.put(container, permission.as_str(), value);
        }
        doc.put(container, EXPLICIT_KEY, Value::Bool(true));
    }
}
