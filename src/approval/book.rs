//! Storage of approval records inside an entity's approvals container
//!
//! Keys:
//! - `user/{approvalKey}`: a direct verdict
//! - `group/{groupRef}`: a group approval request (`requireAll`)
//! - `member/{groupRef}/{approvalKey}`: a member's verdict for that group
//!
//! Each record is its own key, so verdicts from different principals merge
//! without conflict; two writes to the same key resolve last-writer-wins.
//!
//! `groupRef` is stored with `%` and `/` percent-escaped, so the first `/`
//! after it always ends the group part of a member key.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};

use super::record::{ApprovalRecords, ApprovalState, GroupApproval, UserApproval};
use crate::convergent::{ContainerId, ConvergentDocument, Value};
use crate::principal::ApprovalKey;

const USER_PREFIX: &str = "user/";
const GROUP_PREFIX: &str = "group/";
const MEMBER_PREFIX: &str = "member/";

fn escape_group(group_ref: &str) -> String {
    group_ref.replace('%', "%25").replace('/', "%2F")
}

fn unescape_group(stored: &str) -> String {
    stored.replace("%2F", "/").replace("%25", "%")
}

fn encode_user(record: &UserApproval) -> Value {
    Value::Map(BTreeMap::from([
        ("state".to_string(), Value::string(record.state.as_str())),
        ("principal".to_string(), Value::string(record.principal.as_str())),
        (
            "timestamp".to_string(),
            Value::Int(record.timestamp.timestamp_millis()),
        ),
    ]))
}

fn decode_user(value: &Value) -> Option<UserApproval> {
    let map = value.as_map()?;
    let state = ApprovalState::parse(map.get("state")?.as_str()?)?;
    let principal = map.get("principal")?.as_str()?.to_string();
    let timestamp = map
        .get("timestamp")
        .and_then(Value::as_int)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    Some(UserApproval {
        state,
        principal,
        timestamp,
    })
}

pub(crate) fn read(doc: &ConvergentDocument, container: &ContainerId) -> ApprovalRecords {
    let mut records = ApprovalRecords::default();
    let mut members: Vec<(String, String, UserApproval)> = Vec::new();

    for (key, value) in doc.entries(container) {
        if let Some(approval_key) = key.strip_prefix(USER_PREFIX) {
            match decode_user(value) {
                Some(record) => {
                    records.users.insert(approval_key.to_string(), record);
                }
                None => log::warn!("malformed approval record {:?} in {}", key, container),
            }
        } else if let Some(stored) = key.strip_prefix(GROUP_PREFIX) {
            let group_ref = unescape_group(stored);
            let require_all = value
                .as_map()
                .and_then(|m| m.get("requireAll"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            records
                .groups
                .entry(group_ref.clone())
                .or_insert_with(|| GroupApproval::new(group_ref, require_all))
                .require_all = require_all;
        } else if let Some(rest) = key.strip_prefix(MEMBER_PREFIX) {
            let parsed = rest
                .split_once('/')
                .and_then(|(group, who)| Some((group, who, decode_user(value)?)));
            match parsed {
                Some((group, who, record)) => {
                    members.push((unescape_group(group), who.to_string(), record))
                }
                None => log::warn!("malformed member record {:?} in {}", key, container),
            }
        }
    }

    // A member verdict can outlive its group request (concurrent revert);
    // it still counts, under a group without require_all.
    for (group, who, record) in members {
        records
            .groups
            .entry(group.clone())
            .or_insert_with(|| GroupApproval::new(group, false))
            .members
            .insert(who, record);
    }

    records
}

pub(crate) fn write_user(
    doc: &mut ConvergentDocument,
    container: &ContainerId,
    key: &ApprovalKey,
    record: &UserApproval,
) {
    doc.put(container, &format!("{}{}", USER_PREFIX, key), encode_user(record));
}

pub(crate) fn write_member(
    doc: &mut ConvergentDocument,
    container: &ContainerId,
    group_ref: &str,
    key: &ApprovalKey,
    record: &UserApproval,
) {
    doc.put(
        container,
        &format!("{}{}/{}", MEMBER_PREFIX, escape_group(group_ref), key),
        encode_user(record),
    );
}

pub(crate) fn write_group(
    doc: &mut ConvergentDocument,
    container: &ContainerId,
    group_ref: &str,
    require_all: bool,
) {
    let value = Value::Map(BTreeMap::from([(
        "requireAll".to_string(),
        Value::Bool(require_all),
    )]));
    doc.put(
        container,
        &format!("{}{}", GROUP_PREFIX, escape_group(group_ref)),
        value,
    );
}
