//! Principals, sessions and the keys approvals are filed under
//!
//! A principal is a plain string: either a user id or a group/role token
//! carrying the `group:` prefix. A session's authorization set is its user
//! id plus every group token it holds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const GROUP_PREFIX: &str = "group:";

/// Principal string for a group or role.
pub fn group_token(group: &str) -> String {
    if group.starts_with(GROUP_PREFIX) {
        group.to_string()
    } else {
        format!("{}{}", GROUP_PREFIX, group)
    }
}

pub fn is_group_token(principal: &str) -> bool {
    principal.starts_with(GROUP_PREFIX)
}

/// The set of principals a session acts as.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSet(BTreeSet<String>);

impl PrincipalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, principal: impl Into<String>) {
        self.0.insert(principal.into());
    }

    pub fn contains(&self, principal: &str) -> bool {
        self.0.contains(principal)
    }

    /// True if any of `granted` is in this set.
    pub fn intersects<'a>(&self, granted: impl IntoIterator<Item = &'a String>) -> bool {
        granted.into_iter().any(|p| self.0.contains(p))
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for PrincipalSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        PrincipalSet(iter.into_iter().map(Into::into).collect())
    }
}

/// "Who is asking": organization plus user, the key approval records use.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApprovalKey {
    pub organization: String,
    pub user: String,
}

impl ApprovalKey {
    pub fn new(organization: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            user: user.into(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (organization, user) = s.split_once(':')?;
        if organization.is_empty() || user.is_empty() {
            return None;
        }
        Some(Self::new(organization, user))
    }
}

impl fmt::Display for ApprovalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.organization, self.user)
    }
}

/// An authenticated editing session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: String,
    pub organization: String,
    /// Group tokens, always stored with the `group:` prefix
    pub groups: BTreeSet<String>,
}

impl Session {
    pub fn new(user: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            organization: organization.into(),
            groups: BTreeSet::new(),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.insert(group_token(group));
        self
    }

    /// The session's authorization set.
    pub fn principals(&self) -> PrincipalSet {
        std::iter::once(self.user.clone())
            .chain(self.groups.iter().cloned())
            .collect()
    }

    pub fn approval_key(&self) -> ApprovalKey {
        ApprovalKey::new(&self.organization, &self.user)
    }

    pub fn is_member_of(&self, group_ref: &str) -> bool {
        self.groups.contains(&group_token(group_ref))
    }
}
