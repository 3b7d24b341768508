//! Bulk membership audit: re-checks every linked account against the guild
//! using the bot credential and reports drift. Strictly read-only; the
//! report is for operators, repairs happen through the normal login sync.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use shared::error::CommonError;
use shared::primitives::WrappedUuidV4;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::logic::auth_flow::AuthFailure;
use crate::logic::discord::{DiscordApiError, DiscordApiLike};
use crate::logic::settings::AuthSettings;
use crate::repository::AuthRepositoryLike;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditRole {
    pub id: String,
    /// Resolved from the guild's role list; absent when the role has been
    /// deleted upstream.
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditEntry {
    pub account_id: WrappedUuidV4,
    pub account_name: String,
    pub external_id: String,
    pub access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AuthFailure>,
    pub roles: Vec<AuditRole>,
    pub expected_groups: Vec<String>,
    pub current_groups: Vec<String>,
    pub in_sync: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditReport {
    pub total_accounts: usize,
    pub valid: usize,
    pub invalid: usize,
    pub unlinked: usize,
    pub unlinked_accounts: Vec<String>,
    pub entries: Vec<AuditEntry>,
}

/// Checks every account with an identity link. Upstream lookups fan out with
/// bounded concurrency; the report is assembled once all complete.
pub async fn run_membership_audit<R: AuthRepositoryLike, D: DiscordApiLike>(
    repository: &R,
    discord: &D,
    settings: &AuthSettings,
) -> Result<AuditReport, CommonError> {
    if settings.bot_token.is_none() {
        return Err(CommonError::InvalidRequest {
            msg: "membership audit requires a configured bot token".to_string(),
            source: None,
        });
    }

    // Best effort; without it role ids simply stay unresolved.
    let role_names: BTreeMap<String, String> = match discord.fetch_guild_roles().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "could not resolve guild role names");
            BTreeMap::new()
        }
    };

    let accounts = repository.list_accounts().await?;
    let total_accounts = accounts.len();

    let mut unlinked_accounts = Vec::new();
    let mut linked = Vec::new();
    for account in accounts {
        match repository.get_identity_link_by_account(&account.id).await? {
            Some(link) => linked.push((account, link)),
            None => unlinked_accounts.push(account.name),
        }
    }

    let entries: Vec<Result<AuditEntry, CommonError>> = stream::iter(linked)
        .map(|(account, link)| {
            let role_names = &role_names;
            async move {
                let (access, reason, roles) =
                    match discord.fetch_membership_as_bot(&link.external_id).await {
                        Ok(membership) => {
                            let allowed = settings.allowed_roles.is_empty()
                                || settings.allowed_roles.iter().any(|allowed| {
                                    membership.roles.iter().any(|role| role == allowed)
                                });
                            if allowed {
                                (true, None, membership.roles)
                            } else {
                                (false, Some(AuthFailure::RoleNotAllowed), membership.roles)
                            }
                        }
                        Err(DiscordApiError::MissingBotCredential) => {
                            return Err(CommonError::InvalidRequest {
                                msg: "membership audit requires a configured bot token"
                                    .to_string(),
                                source: None,
                            });
                        }
                        Err(e) => {
                            if !matches!(e, DiscordApiError::NotMember) {
                                warn!(
                                    external_id = %link.external_id,
                                    error = %e,
                                    "membership lookup failed during audit"
                                );
                            }
                            (false, Some(AuthFailure::NotMember), Vec::new())
                        }
                    };

                let expected = settings.role_mapping.target_groups(&roles);
                let managed = settings.role_mapping.managed_groups();
                let current_groups = repository.get_groups(&account.id).await?;
                let current_managed: Vec<&String> = current_groups
                    .iter()
                    .filter(|group| managed.contains(*group))
                    .collect();
                let in_sync = expected.iter().eq(current_managed.into_iter());

                Ok(AuditEntry {
                    account_id: account.id,
                    account_name: account.name,
                    external_id: link.external_id,
                    access,
                    reason,
                    roles: roles
                        .into_iter()
                        .map(|id| AuditRole {
                            name: role_names.get(&id).cloned(),
                            id,
                        })
                        .collect(),
                    expected_groups: expected.into_iter().collect(),
                    current_groups,
                    in_sync,
                })
            }
        })
        .buffer_unordered(settings.audit_concurrency)
        .collect()
        .await;

    let mut entries = entries.into_iter().collect::<Result<Vec<_>, _>>()?;
    entries.sort_by(|a, b| a.account_name.cmp(&b.account_name));

    let valid = entries.iter().filter(|entry| entry.access).count();
    let invalid = entries.len() - valid;
    unlinked_accounts.sort();

    info!(total_accounts, valid, invalid, "membership audit complete");

    Ok(AuditReport {
        total_accounts,
        valid,
        invalid,
        unlinked: unlinked_accounts.len(),
        unlinked_accounts,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use serde_json::json;
    use shared::primitives::SqlMigrationLoader;
    use shared::test_utils::setup_in_memory_database;

    use crate::logic::discord::{AccessToken, ExternalIdentity, MembershipRecord};
    use crate::repository::sqlite::Repository;
    use crate::repository::CreateAccount;

    struct BotStub {
        members: BTreeMap<String, Vec<String>>,
    }

    impl DiscordApiLike for BotStub {
        fn authorize_url(&self, _state: &str) -> String {
            unreachable!("audit never authorizes")
        }

        async fn exchange_code(&self, _code: &str) -> Result<AccessToken, DiscordApiError> {
            unreachable!("audit never exchanges codes")
        }

        async fn fetch_identity(
            &self,
            _token: &AccessToken,
        ) -> Result<ExternalIdentity, DiscordApiError> {
            unreachable!("audit never fetches identities")
        }

        async fn fetch_membership(
            &self,
            _token: &AccessToken,
        ) -> Result<MembershipRecord, DiscordApiError> {
            unreachable!("audit uses the bot credential")
        }

        async fn fetch_membership_as_bot(
            &self,
            external_id: &str,
        ) -> Result<MembershipRecord, DiscordApiError> {
            match self.members.get(external_id) {
                Some(roles) => Ok(MembershipRecord {
                    roles: roles.clone(),
                }),
                None => Err(DiscordApiError::NotMember),
            }
        }

        async fn fetch_guild_roles(&self) -> Result<BTreeMap<String, String>, DiscordApiError> {
            Ok(BTreeMap::from([("111".to_string(), "Member".to_string())]))
        }
    }

    fn settings(extra: serde_json::Value) -> AuthSettings {
        let mut base = json!({
            "client_id": "cid",
            "client_secret": "secret",
            "redirect_uri": "https://wiki.example/auth/callback",
            "guild_id": "100200300",
            "bot_token": "bot-secret",
            "role_mapping": {"111": ["member"]},
        });
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        AuthSettings::from_json(base).unwrap()
    }

    async fn seed_account(
        repo: &Repository,
        name: &str,
        external_id: Option<&str>,
        groups: &[&str],
    ) {
        let account = repo
            .create_account(CreateAccount {
                name: name.to_string(),
                email: None,
            })
            .await
            .unwrap();
        if let Some(external_id) = external_id {
            repo.create_identity_link(external_id, &account.id, name)
                .await
                .unwrap();
        }
        for group in groups {
            repo.add_to_group(&account.id, group).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_audit_reports_membership_and_drift() {
        let (_db, conn) = setup_in_memory_database(Repository::load_sql_migrations())
            .await
            .unwrap();
        let repo = Repository::new(conn);

        // In sync, in guild
        seed_account(&repo, "Alice", Some("1"), &["member"]).await;
        // In guild but missing its mapped group
        seed_account(&repo, "Bob", Some("2"), &[]).await;
        // Left the guild but still holds a managed group
        seed_account(&repo, "Carol", Some("3"), &["member"]).await;
        // No identity link at all
        seed_account(&repo, "Dave", None, &[]).await;

        let discord = BotStub {
            members: BTreeMap::from([
                ("1".to_string(), vec!["111".to_string()]),
                ("2".to_string(), vec!["111".to_string()]),
            ]),
        };

        let report = run_membership_audit(&repo, &discord, &settings(json!({})))
            .await
            .unwrap();

        assert_eq!(report.total_accounts, 4);
        assert_eq!(report.valid, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.unlinked, 1);
        assert_eq!(report.unlinked_accounts, ["Dave"]);

        let by_name: BTreeMap<&str, &AuditEntry> = report
            .entries
            .iter()
            .map(|entry| (entry.account_name.as_str(), entry))
            .collect();

        let alice = by_name["Alice"];
        assert!(alice.access && alice.in_sync);
        assert_eq!(alice.roles[0].name.as_deref(), Some("Member"));

        let bob = by_name["Bob"];
        assert!(bob.access && !bob.in_sync);
        assert_eq!(bob.expected_groups, ["member"]);
        assert!(bob.current_groups.is_empty());

        let carol = by_name["Carol"];
        assert!(!carol.access && !carol.in_sync);
        assert_eq!(carol.reason, Some(AuthFailure::NotMember));
        assert_eq!(carol.current_groups, ["member"]);
    }

    #[tokio::test]
    async fn test_audit_role_allow_list() {
        let (_db, conn) = setup_in_memory_database(Repository::load_sql_migrations())
            .await
            .unwrap();
        let repo = Repository::new(conn);
        seed_account(&repo, "Eve", Some("5"), &[]).await;

        let discord = BotStub {
            members: BTreeMap::from([("5".to_string(), vec!["999".to_string()])]),
        };

        let report = run_membership_audit(
            &repo,
            &discord,
            &settings(json!({"allowed_roles": ["111"]})),
        )
        .await
        .unwrap();

        assert_eq!(report.invalid, 1);
        assert_eq!(report.entries[0].reason, Some(AuthFailure::RoleNotAllowed));
    }

    #[tokio::test]
    async fn test_audit_without_bot_token_is_a_typed_error() {
        let (_db, conn) = setup_in_memory_database(Repository::load_sql_migrations())
            .await
            .unwrap();
        let repo = Repository::new(conn);
        let discord = BotStub {
            members: BTreeMap::new(),
        };

        let mut settings = settings(json!({}));
        settings.bot_token = None;

        let result = run_membership_audit(&repo, &discord, &settings).await;
        assert!(matches!(result, Err(CommonError::InvalidRequest { .. })));
    }
}
