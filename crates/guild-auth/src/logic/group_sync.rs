//! Reconciles an account's stored groups against the groups its upstream
//! roles entitle it to. Only groups named somewhere in the mapping are ever
//! touched; memberships granted out of band survive every sync.

use std::collections::BTreeSet;

use shared::error::CommonError;
use shared::primitives::WrappedUuidV4;
use tracing::info;

use crate::logic::role_mapping::RoleGroupMapping;
use crate::repository::AuthRepositoryLike;

/// Planned changes for one account. Computed before any write so the whole
/// sync can be logged and tested as data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl GroupDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Additions are target minus current. Removals only consider groups the
/// mapping manages, so the blast radius is bounded by the configuration.
pub fn compute_diff(
    mapping: &RoleGroupMapping,
    current_groups: &[String],
    roles: &[String],
) -> GroupDiff {
    let current: BTreeSet<String> = current_groups.iter().cloned().collect();
    let target = mapping.target_groups(roles);
    let managed = mapping.managed_groups();

    GroupDiff {
        to_add: target.difference(&current).cloned().collect(),
        to_remove: current
            .intersection(&managed)
            .filter(|group| !target.contains(*group))
            .cloned()
            .collect(),
    }
}

/// Applies the diff for one account. Each membership change is idempotent,
/// so a crash between writes leaves a state the next sync repairs.
pub async fn sync_account_groups<R: AuthRepositoryLike>(
    repository: &R,
    mapping: &RoleGroupMapping,
    account_id: &WrappedUuidV4,
    roles: &[String],
) -> Result<GroupDiff, CommonError> {
    let current = repository.get_groups(account_id).await?;
    let diff = compute_diff(mapping, &current, roles);

    if diff.is_empty() {
        return Ok(diff);
    }

    for group in &diff.to_add {
        repository.add_to_group(account_id, group).await?;
    }
    for group in &diff.to_remove {
        repository.remove_from_group(account_id, group).await?;
    }

    info!(
        account_id = %account_id,
        added = diff.to_add.len(),
        removed = diff.to_remove.len(),
        "synced group memberships"
    );

    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping() -> RoleGroupMapping {
        RoleGroupMapping::normalize(
            &serde_json::from_value(json!({
                "111": ["member"],
                "222": ["vip", "supporter"],
            }))
            .unwrap(),
        )
        .unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_adds_missing_target_groups() {
        let diff = compute_diff(&mapping(), &[], &strings(&["111", "222"]));
        assert_eq!(
            diff.to_add,
            BTreeSet::from(["member".into(), "supporter".into(), "vip".into()])
        );
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_diff_only_removes_managed_groups() {
        // "sysop" is not in the mapping and must survive losing every role
        let current = strings(&["member", "vip", "sysop"]);
        let diff = compute_diff(&mapping(), &current, &strings(&[]));
        assert!(diff.to_add.is_empty());
        assert_eq!(
            diff.to_remove,
            BTreeSet::from(["member".into(), "vip".into()])
        );
    }

    #[test]
    fn test_diff_is_empty_when_converged() {
        let current = strings(&["member", "supporter", "vip"]);
        let diff = compute_diff(&mapping(), &current, &strings(&["111", "222"]));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_partial_role_loss() {
        let current = strings(&["member", "supporter", "vip"]);
        let diff = compute_diff(&mapping(), &current, &strings(&["111"]));
        assert!(diff.to_add.is_empty());
        assert_eq!(
            diff.to_remove,
            BTreeSet::from(["supporter".into(), "vip".into()])
        );
    }

    #[test]
    fn test_unmapped_roles_grant_nothing() {
        let diff = compute_diff(&mapping(), &[], &strings(&["999"]));
        assert!(diff.is_empty());
    }
}
