//! Approval records and how an entity's state is derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalState {
    Draft,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Draft => "draft",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ApprovalState::Draft),
            "approved" => Some(ApprovalState::Approved),
            "rejected" => Some(ApprovalState::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One person's verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserApproval {
    pub state: ApprovalState,
    /// User id of whoever cast the verdict
    pub principal: String,
    pub timestamp: DateTime<Utc>,
}

impl UserApproval {
    pub fn new(principal: impl Into<String>, state: ApprovalState) -> Self {
        Self {
            state,
            principal: principal.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An approval requested from a group, derived from its members' verdicts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupApproval {
    pub group_ref: String,
    pub require_all: bool,
    /// Member verdicts keyed by approval key
    pub members: BTreeMap<String, UserApproval>,
}

impl GroupApproval {
    pub fn new(group_ref: impl Into<String>, require_all: bool) -> Self {
        Self {
            group_ref: group_ref.into(),
            require_all,
            members: BTreeMap::new(),
        }
    }

    /// Derived state. Any member rejection wins. Otherwise one approval is
    /// enough, unless `require_all` is set, in which case every principal in
    /// `approvers` must have approved (an empty approver set falls back to
    /// needing one approval).
    pub fn state(&self, approvers: &BTreeSet<String>) -> ApprovalState {
        self.state_with_direct(approvers, &BTreeSet::new())
    }

    /// Like `state`, but a required approver outside the group may satisfy
    /// `require_all` with a direct approval listed in `direct`.
    pub fn state_with_direct(
        &self,
        approvers: &BTreeSet<String>,
        direct: &BTreeSet<&str>,
    ) -> ApprovalState {
        if self
            .members
            .values()
            .any(|m| m.state == ApprovalState::Rejected)
        {
            return ApprovalState::Rejected;
        }

        let approved: BTreeSet<&str> = self
            .members
            .values()
            .filter(|m| m.state == ApprovalState::Approved)
            .map(|m| m.principal.as_str())
            .collect();

        let satisfied = if self.require_all && !approvers.is_empty() {
            !approved.is_empty()
                && approvers
                    .iter()
                    .all(|p| approved.contains(p.as_str()) || direct.contains(p.as_str()))
        } else {
            !approved.is_empty()
        };

        if satisfied {
            ApprovalState::Approved
        } else {
            ApprovalState::Draft
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalRecord {
    User(UserApproval),
    Group(GroupApproval),
}

impl ApprovalRecord {
    pub fn state(&self, approvers: &BTreeSet<String>) -> ApprovalState {
        match self {
            ApprovalRecord::User(u) => u.state,
            ApprovalRecord::Group(g) => g.state(approvers),
        }
    }
}

/// Every approval record attached to one entity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApprovalRecords {
    /// Direct verdicts keyed by approval key
    pub users: BTreeMap<String, UserApproval>,
    /// Group approvals keyed by group reference
    pub groups: BTreeMap<String, GroupApproval>,
}

impl ApprovalRecords {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }

    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.users
            .values()
            .cloned()
            .map(ApprovalRecord::User)
            .chain(self.groups.values().cloned().map(ApprovalRecord::Group))
            .collect()
    }

    /// Reduce all records to the entity state: no records is `Draft`, any
    /// `Rejected` record is `Rejected`, all `Approved` is `Approved`. Direct
    /// approvals count toward `require_all` groups.
    pub fn state(&self, approvers: &BTreeSet<String>) -> ApprovalState {
        let direct: BTreeSet<&str> = self
            .users
            .values()
            .filter(|u| u.state == ApprovalState::Approved)
            .map(|u| u.principal.as_str())
            .collect();
        let states: Vec<ApprovalState> = self
            .users
            .values()
            .map(|u| u.state)
            .chain(
                self.groups
                    .values()
                    .map(|g| g.state_with_direct(approvers, &direct)),
            )
            .collect();
        if states.is_empty() {
            ApprovalState::Draft
        } else if states.contains(&ApprovalState::Rejected) {
            ApprovalState::Rejected
        } else if states.iter().all(|s| *s == ApprovalState::Approved) {
            ApprovalState::Approved
        } else {
            ApprovalState::Draft
        }
    }

    /// Has the holder of `approval_key` rejected, directly or as a group member?
    pub fn has_rejected(&self, approval_key: &str) -> bool {
        let direct = self
            .users
            .get(approval_key)
            .map_or(false, |u| u.state == ApprovalState::Rejected);
        direct
            || self.groups.values().any(|g| {
                g.members
                    .get(approval_key)
                    .map_or(false, |m| m.state == ApprovalState::Rejected)
            })
    }
}
