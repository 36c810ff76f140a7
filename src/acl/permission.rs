//! Capabilities and the scopes they are granted over

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::convergent::ContainerId;

/// An enumerated capability.
///
/// `Manage` satisfies every other permission for its scope. `AddRemove`
/// covers structural edits (adding or removing blocks and languages) and does
/// not grant content edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    View,
    Edit,
    Approve,
    AddRemove,
    Manage,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::View,
        Permission::Edit,
        Permission::Approve,
        Permission::AddRemove,
        Permission::Manage,
    ];

    /// Key used for this permission inside an ACL map container
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Edit => "edit",
            Permission::Approve => "approve",
            Permission::AddRemove => "addRemove",
            Permission::Manage => "manage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Permission::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Does holding `granted` satisfy a check for `self`?
    pub fn is_satisfied_by(&self, granted: Permission) -> bool {
        granted == *self || granted == Permission::Manage
    }

    /// Every permission whose grant satisfies `self`.
    pub fn satisfied_by(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL
            .into_iter()
            .filter(move |granted| self.is_satisfied_by(*granted))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a permission check is about.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Document,
    /// A sheet content block, by its entity container id
    Block(ContainerId),
    /// A statement-language element, by its entity container id
    Element(ContainerId),
}

impl Scope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Document => ScopeKind::Document,
            Scope::Block(_) => ScopeKind::Block,
            Scope::Element(_) => ScopeKind::Element,
        }
    }

    pub fn container(&self) -> Option<&ContainerId> {
        match self {
            Scope::Document => None,
            Scope::Block(id) | Scope::Element(id) => Some(id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeKind {
    Document,
    Block,
    Element,
}
