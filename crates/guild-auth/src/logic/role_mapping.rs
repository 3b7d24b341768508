//! Role -> group mapping between Discord roles and local permission groups.
//!
//! Two configuration encodings are accepted and normalize to the same
//! canonical map: a direct object (`{"roleId": "group"}` or
//! `{"roleId": ["a", "b"]}`) and a pair list
//! (`[{"role": "roleId", "group": "group"}]`). Role ids are compared as
//! strings everywhere; Discord ids exceed 2^53 and lose precision the moment
//! anything treats them as numbers.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use shared::error::CommonError;

/// One group or a list of groups on the right-hand side of a direct mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// A single `{role, group}` entry in the pair-list encoding.
#[derive(Debug, Clone, Deserialize)]
pub struct RolePair {
    pub role: String,
    pub group: String,
}

/// The mapping as configured, in either supported encoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRoleGroupMapping {
    Pairs(Vec<RolePair>),
    Direct(BTreeMap<String, OneOrMany>),
}

/// Canonical role -> groups mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleGroupMapping(BTreeMap<String, BTreeSet<String>>);

fn mapping_invalid(msg: &str) -> CommonError {
    CommonError::InvalidRequest {
        msg: format!("invalid role->group mapping: {msg}"),
        source: None,
    }
}

impl RoleGroupMapping {
    /// Normalize either encoding into the canonical map. Entries with an
    /// empty role id or group name are configuration errors.
    pub fn normalize(raw: &RawRoleGroupMapping) -> Result<Self, CommonError> {
        let mut normalized: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        let mut insert = |role: &str, group: &str| -> Result<(), CommonError> {
            if role.is_empty() {
                return Err(mapping_invalid("empty role id"));
            }
            if group.is_empty() {
                return Err(mapping_invalid(&format!("empty group name for role {role}")));
            }
            normalized
                .entry(role.to_string())
                .or_default()
                .insert(group.to_string());
            Ok(())
        };

        match raw {
            RawRoleGroupMapping::Direct(map) => {
                for (role, groups) in map {
                    match groups {
                        OneOrMany::One(group) => insert(role, group)?,
                        OneOrMany::Many(list) => {
                            if list.is_empty() {
                                return Err(mapping_invalid(&format!(
                                    "role {role} maps to an empty group list"
                                )));
                            }
                            for group in list {
                                insert(role, group)?;
                            }
                        }
                    }
                }
            }
            RawRoleGroupMapping::Pairs(pairs) => {
                for pair in pairs {
                    insert(&pair.role, &pair.group)?;
                }
            }
        }

        Ok(Self(normalized))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union of the groups mapped from each of the caller's roles. Empty if
    /// the mapping is empty or no role matches.
    pub fn target_groups(&self, roles: &[String]) -> BTreeSet<String> {
        let mut target = BTreeSet::new();
        for role in roles {
            if let Some(groups) = self.0.get(role.as_str()) {
                target.extend(groups.iter().cloned());
            }
        }
        target
    }

    /// Every group appearing anywhere in the mapping. Sync may only ever
    /// remove groups inside this set.
    pub fn managed_groups(&self) -> BTreeSet<String> {
        self.0.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> RoleGroupMapping {
        let raw: RawRoleGroupMapping = serde_json::from_value(value).unwrap();
        RoleGroupMapping::normalize(&raw).unwrap()
    }

    #[test]
    fn test_equivalent_encodings_normalize_identically() {
        let direct = parse(json!({
            "111111111111111111": "editor",
            "222222222222222222": ["moderator", "editor"],
        }));
        let pairs = parse(json!([
            {"role": "111111111111111111", "group": "editor"},
            {"role": "222222222222222222", "group": "moderator"},
            {"role": "222222222222222222", "group": "editor"},
        ]));

        assert_eq!(direct, pairs);
    }

    #[test]
    fn test_target_groups_union_over_matched_roles() {
        let mapping = parse(json!({
            "r1": "editor",
            "r2": ["moderator", "staff"],
            "r3": "admin",
        }));

        let roles = vec!["r1".to_string(), "r2".to_string(), "unknown".to_string()];
        let target = mapping.target_groups(&roles);
        assert_eq!(
            target,
            BTreeSet::from(["editor".to_string(), "moderator".to_string(), "staff".to_string()])
        );
    }

    #[test]
    fn test_role_ids_compared_as_strings() {
        // Ids beyond 2^53; must match exactly as strings
        let mapping = parse(json!({"987654321098765432101": "editor"}));
        let hit = mapping.target_groups(&["987654321098765432101".to_string()]);
        assert_eq!(hit.len(), 1);

        let miss = mapping.target_groups(&["987654321098765432102".to_string()]);
        assert!(miss.is_empty());
    }

    #[test]
    fn test_managed_groups_is_union_of_all_values() {
        let mapping = parse(json!({
            "r1": "editor",
            "r2": ["moderator", "editor"],
        }));
        assert_eq!(
            mapping.managed_groups(),
            BTreeSet::from(["editor".to_string(), "moderator".to_string()])
        );
    }

    #[test]
    fn test_empty_mapping_yields_no_targets() {
        let mapping = RoleGroupMapping::default();
        assert!(mapping.is_empty());
        assert!(mapping.target_groups(&["r1".to_string()]).is_empty());
        assert!(mapping.managed_groups().is_empty());
    }

    #[test]
    fn test_empty_role_or_group_rejected() {
        let raw: RawRoleGroupMapping = serde_json::from_value(json!({"": "editor"})).unwrap();
        assert!(RoleGroupMapping::normalize(&raw).is_err());

        let raw: RawRoleGroupMapping =
            serde_json::from_value(json!([{"role": "r1", "group": ""}])).unwrap();
        assert!(RoleGroupMapping::normalize(&raw).is_err());
    }
}
